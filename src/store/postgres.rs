use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use super::{apply_mutation, Filter, Locked, Mutator, RequestStore};
use crate::errors::StoreError;
use crate::models::approval::{
    ApprovalRequest, MediaLists, NewApprovalRequest, RequestKey,
};
use crate::models::notification::NotificationHandles;

const SELECT_COLUMNS: &str = "story_id, platform, workflow_id, content, sub_content, images, videos, \
     notification_handles, status, created_at, decision_deadline, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn create(&self, new: NewApprovalRequest) -> Result<ApprovalRequest, StoreError> {
        if !new.key.is_valid() {
            return Err(StoreError::InvalidKey(new.key));
        }
        let key = new.key.clone();
        let record = new.into_record();

        let result = sqlx::query(
            r#"INSERT INTO approval_requests
                 (story_id, platform, workflow_id, content, sub_content, images, videos,
                  notification_handles, status, created_at, decision_deadline, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               ON CONFLICT (story_id, platform) DO NOTHING"#,
        )
        .bind(&record.story_id)
        .bind(record.platform.as_str())
        .bind(&record.workflow_id)
        .bind(&record.content)
        .bind(&record.sub_content)
        .bind(Json(&record.media.images))
        .bind(Json(&record.media.videos))
        .bind(Json(&record.notification_handles))
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.decision_deadline)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(key));
        }
        Ok(record)
    }

    async fn get(&self, key: &RequestKey) -> Result<ApprovalRequest, StoreError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM approval_requests WHERE story_id = $1 AND platform = $2",
            SELECT_COLUMNS
        ))
        .bind(&key.story_id)
        .bind(key.platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_record(),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    async fn with_lock(&self, key: &RequestKey, mutate: Mutator) -> Result<Locked, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM approval_requests WHERE story_id = $1 AND platform = $2 FOR UPDATE",
            SELECT_COLUMNS
        ))
        .bind(&key.story_id)
        .bind(key.platform.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let current = match row {
            Some(row) => row.into_record()?,
            None => return Err(StoreError::NotFound(key.clone())),
        };

        let Some(next) = apply_mutation(&current, mutate) else {
            tx.rollback().await?;
            return Ok(Locked {
                record: current,
                committed: false,
            });
        };

        sqlx::query(
            r#"UPDATE approval_requests
               SET images = $3, videos = $4, notification_handles = $5, status = $6, updated_at = $7
               WHERE story_id = $1 AND platform = $2"#,
        )
        .bind(&key.story_id)
        .bind(key.platform.as_str())
        .bind(Json(&next.media.images))
        .bind(Json(&next.media.videos))
        .bind(Json(&next.notification_handles))
        .bind(next.status.as_str())
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Locked {
            record: next,
            committed: true,
        })
    }

    async fn list(&self, filter: Filter<'_>) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM approval_requests ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_record() {
                Ok(record) if filter(&record) => out.push(record),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping unreadable record"),
            }
        }
        Ok(out)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    story_id: String,
    platform: String,
    workflow_id: String,
    content: String,
    sub_content: String,
    images: Json<Vec<String>>,
    videos: Json<Vec<String>>,
    notification_handles: Json<NotificationHandles>,
    status: String,
    created_at: DateTime<Utc>,
    decision_deadline: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn into_record(self) -> Result<ApprovalRequest, StoreError> {
        let location = format!("approval_requests({}, {})", self.story_id, self.platform);
        let platform = self.platform.parse().map_err(|reason| StoreError::Corrupt {
            location: location.clone(),
            reason,
        })?;
        let status = self
            .status
            .parse()
            .map_err(|reason| StoreError::Corrupt { location, reason })?;

        Ok(ApprovalRequest {
            story_id: self.story_id,
            platform,
            workflow_id: self.workflow_id,
            content: self.content,
            sub_content: self.sub_content,
            media: MediaLists {
                images: self.images.0,
                videos: self.videos.0,
            },
            notification_handles: self.notification_handles.0,
            status,
            created_at: self.created_at,
            decision_deadline: self.decision_deadline,
            updated_at: self.updated_at,
        })
    }
}

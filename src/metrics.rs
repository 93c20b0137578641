//! Prometheus metrics for the approval lifecycle.
//!
//! Exposed at `/metrics`. Each recorder owns its registry so several engines
//! (tests, CLI one-shots) can coexist in one process.

use prometheus::{opts, CounterVec, Encoder, GaugeVec, Registry, TextEncoder};

use crate::models::approval::{ApprovalStatus, Platform};

pub struct WorkflowMetrics {
    registry: Registry,
    transitions_total: CounterVec,
    publish_attempts_total: CounterVec,
    escalations_total: CounterVec,
    queue_depth: GaugeVec,
}

impl WorkflowMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let transitions_total = CounterVec::new(
            opts!("pressgate_transitions_total", "Committed lifecycle transitions by target status"),
            &["to"],
        )?;
        let publish_attempts_total = CounterVec::new(
            opts!("pressgate_publish_attempts_total", "Publish attempts by platform and outcome"),
            &["platform", "outcome"],
        )?;
        let escalations_total = CounterVec::new(
            opts!("pressgate_timeout_escalations_total", "Requests auto-approved after their deadline"),
            &["platform"],
        )?;
        let queue_depth = GaugeVec::new(
            opts!("pressgate_ready_requests", "APPROVED requests seen by the last scheduler scan"),
            &["platform"],
        )?;

        registry.register(Box::new(transitions_total.clone()))?;
        registry.register(Box::new(publish_attempts_total.clone()))?;
        registry.register(Box::new(escalations_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            transitions_total,
            publish_attempts_total,
            escalations_total,
            queue_depth,
        })
    }

    pub fn transition(&self, to: ApprovalStatus) {
        self.transitions_total.with_label_values(&[to.as_str()]).inc();
    }

    pub fn publish_attempt(&self, platform: Platform, outcome: &str) {
        self.publish_attempts_total
            .with_label_values(&[platform.as_str(), outcome])
            .inc();
    }

    pub fn escalated(&self, platform: Platform) {
        self.escalations_total
            .with_label_values(&[platform.as_str()])
            .inc();
    }

    pub fn ready(&self, platform: Platform, count: usize) {
        self.queue_depth
            .with_label_values(&[platform.as_str()])
            .set(count as f64);
    }

    pub fn transitions(&self, to: ApprovalStatus) -> u64 {
        self.transitions_total.with_label_values(&[to.as_str()]).get() as u64
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

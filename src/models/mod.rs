pub mod approval;
pub mod event;
pub mod notification;

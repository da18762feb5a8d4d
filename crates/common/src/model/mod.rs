mod alert_state;
mod annotation;
mod notification_state;

pub use alert_state::{AlertState, ExecutionErrorOption, NoDataOption, ParseStateError};
pub use annotation::Annotation;
pub use notification_state::{AlertNotificationState, NotificationStateKind};

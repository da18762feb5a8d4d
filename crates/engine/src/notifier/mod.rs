mod channel;
mod policy;
mod registry;
mod service;
mod settings;
mod slack;
mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{Notification, Notifier, NotifyError};
pub use policy::should_notify;
pub use registry::{NotifierFactory, NotifierRegistry};
pub use service::{DispatchSummary, NotificationService};
pub use settings::NotifierSettings;
pub use slack::SlackNotifier;
pub use webhook::WebhookNotifier;

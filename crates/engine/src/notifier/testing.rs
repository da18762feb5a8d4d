use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::channel::{Notification, Notifier, NotifyError};
use super::registry::NotifierRegistry;

/// Records every notification it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tokio::task::yield_now().await;
        if self.fail {
            return Err(NotifyError("refused".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Registry whose `recording` kind always resolves to `recorder`.
pub fn recording_registry(recorder: Arc<RecordingNotifier>) -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    registry.register("recording", move |_| Ok(recorder.clone() as Arc<dyn Notifier>));
    registry
}

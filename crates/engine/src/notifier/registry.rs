use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;

use super::channel::{Notifier, NotifyError};
use super::settings::NotifierSettings;
use super::slack::SlackNotifier;
use super::webhook::WebhookNotifier;

pub type NotifierFactory =
    Arc<dyn Fn(&NotifierSettings) -> Result<Arc<dyn Notifier>, NotifyError> + Send + Sync>;

/// Maps a notifier kind (`webhook`, `slack`, ...) to its constructor.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    factories: HashMap<String, NotifierFactory>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the HTTP notifiers, all sharing one client.
    pub fn with_builtins(client: Client) -> Self {
        let mut registry = Self::new();

        let webhook_client = client.clone();
        registry.register("webhook", move |settings| {
            let n = WebhookNotifier::from_settings(settings, webhook_client.clone())?;
            Ok(Arc::new(n) as Arc<dyn Notifier>)
        });

        registry.register("slack", move |settings| {
            let n = SlackNotifier::from_settings(settings, client.clone())?;
            Ok(Arc::new(n) as Arc<dyn Notifier>)
        });

        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&NotifierSettings) -> Result<Arc<dyn Notifier>, NotifyError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn build(&self, settings: &NotifierSettings) -> Result<Arc<dyn Notifier>, NotifyError> {
        let factory = self
            .factories
            .get(&settings.kind)
            .ok_or_else(|| NotifyError(format!("unknown notifier type {:?}", settings.kind)))?;
        factory(settings)
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{ConditionRegistry, Rule};
use crate::config::ClusterSettings;
use crate::store::AlertStore;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the schedulable rule set. Never fails: problems are logged and
/// the affected rules (or all of them) are left out.
#[async_trait]
pub trait RuleReader: Send + Sync {
    async fn fetch(&self) -> Vec<Rule>;
}

pub struct StoreRuleReader {
    store: Arc<dyn AlertStore>,
    registry: Arc<ConditionRegistry>,
    cluster: ClusterSettings,
    min_interval_seconds: i64,
}

impl StoreRuleReader {
    pub fn new(
        store: Arc<dyn AlertStore>,
        registry: Arc<ConditionRegistry>,
        cluster: ClusterSettings,
        min_interval_seconds: i64,
    ) -> Self {
        Self {
            store,
            registry,
            cluster,
            min_interval_seconds,
        }
    }
}

#[async_trait]
impl RuleReader for StoreRuleReader {
    async fn fetch(&self) -> Vec<Rule> {
        let defs = match tokio::time::timeout(FETCH_TIMEOUT, self.store.list_alerts()).await {
            Ok(Ok(defs)) => defs,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to load alert rules");
                return Vec::new();
            }
            Err(_) => {
                tracing::error!(
                    timeout_s = FETCH_TIMEOUT.as_secs(),
                    "loading alert rules timed out"
                );
                return Vec::new();
            }
        };

        let total = defs.len();
        let rules: Vec<Rule> = defs
            .into_iter()
            .filter(|d| self.cluster.owns(d.id))
            .filter_map(|d| {
                let rule_id = d.id;
                match Rule::from_definition(d, &self.registry, self.min_interval_seconds) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        tracing::warn!(rule_id, error = %e, "skipping invalid alert rule");
                        None
                    }
                }
            })
            .collect();

        tracing::debug!(total, scheduled = rules.len(), "alert rules fetched");
        rules
    }
}

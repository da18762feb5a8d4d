use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::notifier::NotifierSettings;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub alerting: AlertingSettings,
    #[serde(default)]
    pub cluster: ClusterSettings,
    /// Postgres connection string; the in-memory store is used without one.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    /// YAML list of rule definitions seeded into the store at startup.
    #[serde(default)]
    pub rules_file: Option<String>,
    #[serde(default = "default_api_addr")]
    pub api_addr: String,
    #[serde(default)]
    pub notifiers: Vec<NotifierSettings>,
    /// Datasource name to Prometheus-compatible base URL.
    #[serde(default)]
    pub datasources: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AlertingSettings {
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: i64,
    #[serde(default = "default_rule_refresh_ticks")]
    pub rule_refresh_ticks: u64,
    #[serde(default = "default_timeout_seconds")]
    pub evaluation_timeout_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub notification_timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_queue_capacity")]
    pub exec_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub result_queue_capacity: usize,
    #[serde(default = "default_min_interval")]
    pub min_interval_seconds: i64,
}

impl AlertingSettings {
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_seconds)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_seconds)
    }
}

impl Default for AlertingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: default_tick_interval(),
            rule_refresh_ticks: default_rule_refresh_ticks(),
            evaluation_timeout_seconds: default_timeout_seconds(),
            notification_timeout_seconds: default_timeout_seconds(),
            max_attempts: default_max_attempts(),
            exec_queue_capacity: default_queue_capacity(),
            result_queue_capacity: default_queue_capacity(),
            min_interval_seconds: default_min_interval(),
        }
    }
}

/// Rule sharding between engine replicas: a replica owns the rules whose
/// `id % node_count == node_index`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ClusterSettings {
    #[serde(default)]
    pub node_index: i64,
    #[serde(default = "default_node_count")]
    pub node_count: i64,
}

impl ClusterSettings {
    pub fn owns(&self, rule_id: i64) -> bool {
        self.node_count <= 1 || rule_id.rem_euclid(self.node_count) == self.node_index
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_index: 0,
            node_count: default_node_count(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_api_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_tick_interval() -> i64 {
    1
}

fn default_rule_refresh_ticks() -> u64 {
    10
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_min_interval() -> i64 {
    1
}

fn default_node_count() -> i64 {
    1
}

fn yes() -> bool {
    true
}

use std::path::Path;

use super::schema::EngineConfig;
use crate::alert::RuleDefinition;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("validation: {0}")]
    Validation(String),
}

pub fn load_from_file(path: &Path) -> Result<EngineConfig, LoadError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(yaml: &str) -> Result<EngineConfig, LoadError> {
    let cfg: EngineConfig = serde_yaml::from_str(yaml)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Reads a YAML list of rule definitions. Conditions are not checked here;
/// that happens when the rule reader builds schedulable rules.
pub fn load_rules_file(path: &Path) -> Result<Vec<RuleDefinition>, LoadError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

fn validate(cfg: &EngineConfig) -> Result<(), LoadError> {
    let a = &cfg.alerting;
    if a.tick_interval_seconds <= 0 {
        return Err(LoadError::Validation(
            "alerting.tick_interval_seconds must be > 0".into(),
        ));
    }
    if a.rule_refresh_ticks == 0 {
        return Err(LoadError::Validation(
            "alerting.rule_refresh_ticks must be > 0".into(),
        ));
    }
    if a.max_attempts == 0 {
        return Err(LoadError::Validation("alerting.max_attempts must be > 0".into()));
    }
    if a.evaluation_timeout_seconds == 0 || a.notification_timeout_seconds == 0 {
        return Err(LoadError::Validation("alerting timeouts must be > 0".into()));
    }
    if a.exec_queue_capacity == 0 || a.result_queue_capacity == 0 {
        return Err(LoadError::Validation("alerting queue capacities must be > 0".into()));
    }
    if a.min_interval_seconds <= 0 {
        return Err(LoadError::Validation(
            "alerting.min_interval_seconds must be > 0".into(),
        ));
    }

    let c = &cfg.cluster;
    if c.node_count <= 0 || c.node_index < 0 || c.node_index >= c.node_count {
        return Err(LoadError::Validation(format!(
            "cluster.node_index {} out of range for node_count {}",
            c.node_index, c.node_count
        )));
    }

    let mut ids = std::collections::HashSet::new();
    for n in &cfg.notifiers {
        if !ids.insert(n.id) {
            return Err(LoadError::Validation(format!("duplicate notifier id {}", n.id)));
        }
    }
    Ok(())
}

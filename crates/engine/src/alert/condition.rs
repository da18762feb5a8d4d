use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::eval_context::{EvalContext, EvalError, EvalMatch};
use super::query::{QueryCondition, QueryHandler};
use super::rule::{ConditionDefinition, RuleError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionResult {
    pub firing: bool,
    pub no_data_found: bool,
    pub matches: Vec<EvalMatch>,
}

/// One step of a rule's condition chain.
#[async_trait]
pub trait Condition: Send + Sync {
    fn kind(&self) -> &str;
    async fn eval(&self, ctx: &EvalContext) -> Result<ConditionResult, EvalError>;
}

pub type ConditionFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Condition>, String> + Send + Sync>;

/// Maps a condition type name to the constructor that parses its settings.
#[derive(Clone, Default)]
pub struct ConditionRegistry {
    factories: HashMap<String, ConditionFactory>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `query` condition backed by `queries`.
    pub fn with_builtins(queries: Arc<dyn QueryHandler>) -> Self {
        let mut registry = Self::new();
        registry.register(QueryCondition::KIND, move |settings| {
            let cond = QueryCondition::from_settings(settings, queries.clone())?;
            Ok(Arc::new(cond) as Arc<dyn Condition>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Condition>, String> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn build(
        &self,
        rule_id: i64,
        index: usize,
        def: &ConditionDefinition,
    ) -> Result<Arc<dyn Condition>, RuleError> {
        let factory =
            self.factories
                .get(&def.kind)
                .ok_or_else(|| RuleError::UnknownConditionType {
                    rule_id,
                    kind: def.kind.clone(),
                })?;
        factory(&def.settings).map_err(|reason| RuleError::InvalidCondition {
            rule_id,
            index,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::registry_with_static;

    #[test]
    fn build_known_condition() {
        let registry = registry_with_static();
        let def = ConditionDefinition {
            kind: "static".into(),
            settings: serde_json::json!({ "firing": true }),
        };
        let cond = registry.build(1, 0, &def).unwrap();
        assert_eq!(cond.kind(), "static");
    }

    #[test]
    fn bad_settings_reported_with_index() {
        let registry = registry_with_static();
        let def = ConditionDefinition {
            kind: "static".into(),
            settings: serde_json::json!({ "firing": "yes please" }),
        };
        let err = registry.build(4, 2, &def).err().unwrap();
        assert!(matches!(
            err,
            RuleError::InvalidCondition {
                rule_id: 4,
                index: 2,
                ..
            }
        ));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let registry = ConditionRegistry::new();
        assert!(!registry.contains("query"));
        let def = ConditionDefinition {
            kind: "query".into(),
            settings: serde_json::Value::Null,
        };
        assert!(registry.build(1, 0, &def).is_err());
    }
}

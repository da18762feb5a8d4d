use vigil_common::model::AlertState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot change state on paused alert {alert_id}")]
    CannotChangeStateOnPausedAlert { alert_id: i64 },
    #[error("alert {alert_id} is already {state}")]
    RequiresNewState { alert_id: i64, state: AlertState },
    #[error("alert notification state {id} was updated by another writer")]
    AlertNotificationStateVersionConflict { id: i64 },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("stored value is invalid: {0}")]
    Decode(String),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    Unknown,
    Pending,
    Alerting,
    Ok,
    Paused,
    NoData,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown state: {0}")]
pub struct ParseStateError(pub String);

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Alerting => "alerting",
            Self::Ok => "ok",
            Self::Paused => "paused",
            Self::NoData => "no_data",
        }
    }

    /// Human readable label used in annotations and notification titles.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Pending => "Pending",
            Self::Alerting => "Alerting",
            Self::Ok => "OK",
            Self::Paused => "Paused",
            Self::NoData => "No Data",
        }
    }

    pub fn is_ok_or_pending(&self) -> bool {
        matches!(self, Self::Ok | Self::Pending)
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "pending" => Ok(Self::Pending),
            "alerting" => Ok(Self::Alerting),
            "ok" => Ok(Self::Ok),
            "paused" => Ok(Self::Paused),
            "no_data" => Ok(Self::NoData),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// What a rule transitions to when its queries return no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataOption {
    #[default]
    NoData,
    Alerting,
    Ok,
    KeepState,
}

impl NoDataOption {
    pub fn resolve(self, prev: AlertState) -> AlertState {
        match self {
            Self::NoData => AlertState::NoData,
            Self::Alerting => AlertState::Alerting,
            Self::Ok => AlertState::Ok,
            Self::KeepState => prev,
        }
    }
}

/// What a rule transitions to when evaluation fails after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorOption {
    #[default]
    Pending,
    Alerting,
    KeepState,
}

impl ExecutionErrorOption {
    pub fn resolve(self, prev: AlertState) -> AlertState {
        match self {
            Self::Pending => AlertState::Pending,
            Self::Alerting => AlertState::Alerting,
            Self::KeepState => prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_agree() {
        for state in [
            AlertState::Unknown,
            AlertState::Pending,
            AlertState::Alerting,
            AlertState::Ok,
            AlertState::Paused,
            AlertState::NoData,
        ] {
            assert_eq!(state.as_str().parse::<AlertState>().unwrap(), state);
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "firing".parse::<AlertState>().unwrap_err();
        assert!(err.to_string().contains("firing"));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&AlertState::NoData).unwrap();
        assert_eq!(json, "\"no_data\"");
    }

    #[test]
    fn keep_state_options_return_previous() {
        assert_eq!(NoDataOption::KeepState.resolve(AlertState::Alerting), AlertState::Alerting);
        assert_eq!(ExecutionErrorOption::KeepState.resolve(AlertState::Ok), AlertState::Ok);
        assert_eq!(ExecutionErrorOption::default().resolve(AlertState::Ok), AlertState::Pending);
        assert_eq!(NoDataOption::default().resolve(AlertState::Ok), AlertState::NoData);
    }
}

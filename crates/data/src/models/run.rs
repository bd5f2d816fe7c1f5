//! Strategy run ("AlgoRun") data model.

use algo_options_core::RiskParams;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Why a run was stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Eod,
    MaxLossHit,
    MaxTradesReached,
    Manual,
    Other(String),
}

impl StopReason {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Eod => "EOD",
            Self::MaxLossHit => "Max loss hit",
            Self::MaxTradesReached => "Max trades reached",
            Self::Manual => "Manual stop",
            Self::Other(reason) => reason,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored strategy run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoRun {
    pub id: i64,
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strategy: String,
    pub status: RunStatus,
    pub created_by: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub risk: RiskParams,
}

impl AlgoRun {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// Insert payload for a new run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strategy: String,
    pub created_by: String,
    pub risk: RiskParams,
}

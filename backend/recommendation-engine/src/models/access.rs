use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Actor recorded for transitions the engine makes on its own
pub const SYSTEM_ACTOR: &str = "system";

/// User access state with state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    Active,
    AutoBlocked,
    Unblocked,
}

impl AccessState {
    /// Active -> AutoBlocked -> Unblocked -> Active, plus Unblocked -> AutoBlocked
    pub fn can_transition_to(&self, next: AccessState) -> bool {
        matches!(
            (self, next),
            (AccessState::Active, AccessState::AutoBlocked)
                | (AccessState::AutoBlocked, AccessState::Unblocked)
                | (AccessState::Unblocked, AccessState::Active)
                | (AccessState::Unblocked, AccessState::AutoBlocked)
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, AccessState::AutoBlocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessState::Active => "active",
            AccessState::AutoBlocked => "auto_blocked",
            AccessState::Unblocked => "unblocked",
        }
    }
}

impl FromStr for AccessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccessState::Active),
            "auto_blocked" => Ok(AccessState::AutoBlocked),
            "unblocked" => Ok(AccessState::Unblocked),
            other => Err(format!("unknown access state: {}", other)),
        }
    }
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current access state of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub user_id: Uuid,
    pub state: AccessState,
    pub score: Option<f64>,
    pub reason: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub unblocked_at: Option<DateTime<Utc>>,
    pub unblocked_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AccessRecord {
    pub fn active(user_id: Uuid) -> Self {
        Self {
            user_id,
            state: AccessState::Active,
            score: None,
            reason: None,
            blocked_at: None,
            unblocked_at: None,
            unblocked_by: None,
            updated_at: Utc::now(),
        }
    }
}

/// Audit entry for a state change, with before/after state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTransition {
    pub id: Uuid,
    pub user_id: Uuid,
    pub from_state: AccessState,
    pub to_state: AccessState,
    pub actor: String,
    pub reason: Option<String>,
    pub score: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

/// Per-signal contribution to an anomaly score, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub rate: f64,
    pub category_deviation: f64,
    pub abuse: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub user_id: Uuid,
    /// Smoothed score across evaluation windows
    pub score: f64,
    /// Score of the latest window alone
    pub raw_score: f64,
    pub signals: SignalBreakdown,
    pub events_in_window: usize,
    pub evaluated_at: DateTime<Utc>,
    /// Set when `score` is at or above the blocking threshold
    pub reason: Option<String>,
}

/// Population event-rate statistics used by the rate signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationBaseline {
    pub mean_rate_per_minute: f64,
    pub std_rate_per_minute: f64,
    pub sample_users: usize,
    pub window_hours: i64,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_state_transitions() {
        assert!(AccessState::Active.can_transition_to(AccessState::AutoBlocked));
        assert!(AccessState::AutoBlocked.can_transition_to(AccessState::Unblocked));
        assert!(AccessState::Unblocked.can_transition_to(AccessState::Active));
        assert!(AccessState::Unblocked.can_transition_to(AccessState::AutoBlocked));

        assert!(!AccessState::Active.can_transition_to(AccessState::Unblocked));
        assert!(!AccessState::AutoBlocked.can_transition_to(AccessState::Active));
        assert!(!AccessState::Unblocked.can_transition_to(AccessState::Unblocked));
    }

    #[test]
    fn test_state_names() {
        for state in [
            AccessState::Active,
            AccessState::AutoBlocked,
            AccessState::Unblocked,
        ] {
            assert_eq!(state.as_str().parse::<AccessState>().unwrap(), state);
        }
    }
}

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rollout state of one package instance within a reconcile pass.
///
/// Phase indices are zero-based positions in the manifest's phase list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase")]
pub enum RolloutState {
    Pending,
    Applying(usize),
    Probing(usize),
    Available(usize),
    AllPhasesAvailable,
    Failed(usize),
}

impl RolloutState {
    pub fn phase(self) -> Option<usize> {
        match self {
            RolloutState::Applying(i)
            | RolloutState::Probing(i)
            | RolloutState::Available(i)
            | RolloutState::Failed(i) => Some(i),
            RolloutState::Pending | RolloutState::AllPhasesAvailable => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RolloutState::AllPhasesAvailable | RolloutState::Failed(_)
        )
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutState::Pending => write!(f, "Pending"),
            RolloutState::Applying(i) => write!(f, "Applying({i})"),
            RolloutState::Probing(i) => write!(f, "Probing({i})"),
            RolloutState::Available(i) => write!(f, "Available({i})"),
            RolloutState::AllPhasesAvailable => write!(f, "AllPhasesAvailable"),
            RolloutState::Failed(i) => write!(f, "Failed({i})"),
        }
    }
}

pub fn validate_transition(from: RolloutState, to: RolloutState) -> Result<(), CoreError> {
    use RolloutState::{AllPhasesAvailable, Applying, Available, Failed, Pending, Probing};

    let valid = match (from, to) {
        (Pending, Applying(0)) | (Available(_), AllPhasesAvailable) => true,
        (Applying(i), Probing(j) | Failed(j)) | (Probing(i), Available(j) | Failed(j)) => i == j,
        (Available(i), Applying(j)) => j == i + 1,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RolloutState::{AllPhasesAvailable, Applying, Available, Failed, Pending, Probing};

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(Pending, Applying(0)).is_ok());
        assert!(validate_transition(Applying(0), Probing(0)).is_ok());
        assert!(validate_transition(Probing(0), Available(0)).is_ok());
        assert!(validate_transition(Available(0), Applying(1)).is_ok());
        assert!(validate_transition(Available(3), AllPhasesAvailable).is_ok());
        assert!(validate_transition(Applying(2), Failed(2)).is_ok());
        assert!(validate_transition(Probing(1), Failed(1)).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(Pending, Applying(1)).is_err());
        assert!(validate_transition(Pending, AllPhasesAvailable).is_err());
        assert!(validate_transition(Applying(0), Available(0)).is_err());
        assert!(validate_transition(Probing(0), Applying(1)).is_err());
        assert!(validate_transition(Available(0), Applying(2)).is_err());
        assert!(validate_transition(Applying(0), Probing(1)).is_err());
        assert!(validate_transition(Failed(0), Applying(0)).is_err());
        assert!(validate_transition(AllPhasesAvailable, Pending).is_err());
        assert!(validate_transition(Available(0), Failed(0)).is_err());
    }

    #[test]
    fn display_and_phase() {
        assert_eq!(Probing(2).to_string(), "Probing(2)");
        assert_eq!(Probing(2).phase(), Some(2));
        assert_eq!(Pending.phase(), None);
        assert!(Failed(0).is_terminal());
        assert!(!Available(0).is_terminal());
    }

    #[test]
    fn serializes_with_phase_index() {
        let json = serde_json::to_value(Applying(1)).unwrap();
        assert_eq!(json, serde_json::json!({"state": "Applying", "phase": 1}));
        let json = serde_json::to_value(AllPhasesAvailable).unwrap();
        assert_eq!(json, serde_json::json!({"state": "AllPhasesAvailable"}));
    }
}

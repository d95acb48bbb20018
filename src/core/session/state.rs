use serde::{Deserialize, Serialize};

/// Lifecycle of a bridge or relay server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Constructed, never started
    Idle,
    /// Start in progress: opening serial, binding or dialing
    Opening,
    /// Pumps running
    Active,
    /// Stop in progress: cancelling and joining tasks
    Draining,
    /// Stopped cleanly; may be started again
    Closed,
    /// Gave up after exhausting retries; may be started again
    Failed(String),
}

impl SessionState {
    /// Whether Start is allowed from this state
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Closed | SessionState::Failed(_)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Opening | SessionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            SessionState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Opening => write!(f, "Opening"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Draining => write!(f, "Draining"),
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_allowed_states() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Closed.can_start());
        assert!(SessionState::Failed("gave up".to_string()).can_start());
        assert!(!SessionState::Opening.can_start());
        assert!(!SessionState::Active.can_start());
        assert!(!SessionState::Draining.can_start());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Active.to_string(), "Active");
        assert_eq!(
            SessionState::Failed("no route".to_string()).to_string(),
            "Failed: no route"
        );
        assert_eq!(SessionState::Failed("x".to_string()).failure(), Some("x"));
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Draining.is_running());
    }
}

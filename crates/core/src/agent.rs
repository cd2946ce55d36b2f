//! Agent lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one agent.
///
/// `Idle` and `Finished` are restart points; `Running` and `Error` reject
/// new runs until the agent is reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
}

impl AgentState {
    /// Whether a new run may start from this state.
    pub fn accepts_run(self) -> bool {
        matches!(self, AgentState::Idle | AgentState::Finished)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Idle => "IDLE",
            AgentState::Running => "RUNNING",
            AgentState::Finished => "FINISHED",
            AgentState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_state_starts_idle() {
        assert_eq!(AgentState::default(), AgentState::Idle);
    }

    #[test]
    fn only_idle_and_finished_accept_runs() {
        assert!(AgentState::Idle.accepts_run());
        assert!(AgentState::Finished.accepts_run());
        assert!(!AgentState::Running.accepts_run());
        assert!(!AgentState::Error.accepts_run());
    }

    #[test]
    fn serializes_uppercase() {
        let json = serde_json::to_string(&AgentState::Finished).unwrap();
        assert_eq!(json, "\"FINISHED\"");
    }
}

//! The six phases of the multi-agent topology.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a multi-agent iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Brainstorm,
    Clarify,
    Plan,
    Execute,
    Aar,
    IncorporateAar,
}

/// Which of the two configured agents plays a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    AgentA,
    AgentB,
}

impl Phase {
    /// Execution order within one iteration.
    pub const ORDER: [Phase; 6] = [
        Phase::Brainstorm,
        Phase::Clarify,
        Phase::Plan,
        Phase::Execute,
        Phase::Aar,
        Phase::IncorporateAar,
    ];

    pub fn first() -> Phase {
        Self::ORDER[0]
    }

    pub fn role(self) -> Role {
        match self {
            Phase::Brainstorm | Phase::Plan | Phase::Aar => Role::AgentA,
            Phase::Clarify | Phase::Execute | Phase::IncorporateAar => Role::AgentB,
        }
    }

    /// Execution phases change the code; the others only advise and may be retried.
    pub fn is_execution(self) -> bool {
        matches!(self, Phase::Execute | Phase::IncorporateAar)
    }

    /// The phase that follows this one, or `None` after `incorporate_aar`.
    pub fn next(self) -> Option<Phase> {
        let idx = self.index();
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|p| *p == self).unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Brainstorm => "brainstorm",
            Phase::Clarify => "clarify",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Aar => "aar",
            Phase::IncorporateAar => "incorporate_aar",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::AgentA => "agent_a",
            Role::AgentB => "agent_b",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_alternates_roles() {
        let roles: Vec<Role> = Phase::ORDER.iter().map(|p| p.role()).collect();
        assert_eq!(
            roles,
            vec![Role::AgentA, Role::AgentB, Role::AgentA, Role::AgentB, Role::AgentA, Role::AgentB]
        );
    }

    #[test]
    fn next_walks_the_order() {
        assert_eq!(Phase::Brainstorm.next(), Some(Phase::Clarify));
        assert_eq!(Phase::Aar.next(), Some(Phase::IncorporateAar));
        assert_eq!(Phase::IncorporateAar.next(), None);
    }

    #[test]
    fn classes() {
        assert!(!Phase::Plan.is_execution());
        assert!(!Phase::Aar.is_execution());
        assert!(Phase::Execute.is_execution());
        assert!(Phase::IncorporateAar.is_execution());
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&Phase::IncorporateAar).unwrap(), r#""incorporate_aar""#);
        assert_eq!(serde_json::to_string(&Role::AgentB).unwrap(), r#""agent_b""#);
    }
}

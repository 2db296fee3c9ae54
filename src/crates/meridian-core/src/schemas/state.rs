//! Agent lifecycle states

use serde::{Deserialize, Serialize};

/// The six lifecycle states of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Wakeup,
    Work,
    Play,
    Solitude,
    Dream,
    Shutdown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Wakeup => "wakeup",
            AgentState::Work => "work",
            AgentState::Play => "play",
            AgentState::Solitude => "solitude",
            AgentState::Dream => "dream",
            AgentState::Shutdown => "shutdown",
        }
    }
}

impl std::str::FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wakeup" => Ok(AgentState::Wakeup),
            "work" => Ok(AgentState::Work),
            "play" => Ok(AgentState::Play),
            "solitude" => Ok(AgentState::Solitude),
            "dream" => Ok(AgentState::Dream),
            "shutdown" => Ok(AgentState::Shutdown),
            other => Err(format!("unknown agent state: {other}")),
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for state in [
            AgentState::Wakeup,
            AgentState::Work,
            AgentState::Play,
            AgentState::Solitude,
            AgentState::Dream,
            AgentState::Shutdown,
        ] {
            assert_eq!(state.as_str().parse::<AgentState>().unwrap(), state);
        }
    }
}

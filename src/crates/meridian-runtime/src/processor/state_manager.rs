//! Agent lifecycle state machine
//!
//! The only path out of SHUTDOWN is WAKEUP, and SHUTDOWN never
//! auto-transitions. Every accepted transition is appended to history;
//! rejected transitions (including self-transitions) leave state and
//! history untouched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use meridian_core::schemas::AgentState;
use meridian_core::time::TimeService;

/// Guard predicate evaluated before a transition is applied.
pub type TransitionGuard = Box<dyn Fn(&StateManager) -> bool + Send + Sync>;

/// Hook run while a transition is being applied; an error aborts it.
pub type TransitionHook =
    Box<dyn Fn(AgentState, AgentState) -> Result<(), String> + Send + Sync>;

#[derive(Default)]
struct Edge {
    guard: Option<TransitionGuard>,
    hook: Option<TransitionHook>,
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub from_state: Option<AgentState>,
    pub to_state: AgentState,
    pub timestamp: DateTime<Utc>,
}

/// Per-state metadata, initialized when the state is entered.
#[derive(Debug, Clone, Serialize)]
pub struct StateMetadata {
    pub entered_at: DateTime<Utc>,
    pub extra: HashMap<String, Value>,
}

/// Manages agent state transitions and records their history.
pub struct StateManager {
    time: Arc<dyn TimeService>,
    current_state: AgentState,
    history: Vec<StateChange>,
    metadata: HashMap<AgentState, StateMetadata>,
    edges: HashMap<(AgentState, AgentState), Edge>,
}

const VALID_EDGES: &[(AgentState, AgentState)] = &[
    // The only path out of SHUTDOWN, used by the startup sequence.
    (AgentState::Shutdown, AgentState::Wakeup),
    (AgentState::Wakeup, AgentState::Work),
    (AgentState::Wakeup, AgentState::Dream),
    (AgentState::Wakeup, AgentState::Shutdown),
    (AgentState::Work, AgentState::Dream),
    (AgentState::Work, AgentState::Play),
    (AgentState::Work, AgentState::Solitude),
    (AgentState::Work, AgentState::Shutdown),
    (AgentState::Dream, AgentState::Work),
    (AgentState::Dream, AgentState::Shutdown),
    (AgentState::Play, AgentState::Work),
    (AgentState::Play, AgentState::Solitude),
    (AgentState::Play, AgentState::Shutdown),
    (AgentState::Solitude, AgentState::Work),
    (AgentState::Solitude, AgentState::Shutdown),
];

impl StateManager {
    pub fn new(time: Arc<dyn TimeService>, initial_state: AgentState) -> Self {
        let mut edges: HashMap<(AgentState, AgentState), Edge> = HashMap::new();
        for edge in VALID_EDGES {
            edges.insert(*edge, Edge::default());
        }

        let now = time.now();
        let mut manager = Self {
            time,
            current_state: initial_state,
            history: vec![StateChange {
                from_state: None,
                to_state: initial_state,
                timestamp: now,
            }],
            metadata: HashMap::new(),
            edges,
        };
        manager.metadata.insert(
            initial_state,
            StateMetadata {
                entered_at: now,
                extra: HashMap::new(),
            },
        );
        manager
    }

    /// Attach a guard to an edge. Unknown edges are ignored.
    pub fn set_guard(&mut self, from: AgentState, to: AgentState, guard: TransitionGuard) {
        if let Some(edge) = self.edges.get_mut(&(from, to)) {
            edge.guard = Some(guard);
        }
    }

    /// Attach an on-transition hook to an edge. Unknown edges are ignored.
    pub fn set_hook(&mut self, from: AgentState, to: AgentState, hook: TransitionHook) {
        if let Some(edge) = self.edges.get_mut(&(from, to)) {
            edge.hook = Some(hook);
        }
    }

    pub fn current_state(&self) -> AgentState {
        self.current_state
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    /// Whether a transition to the target is currently allowed.
    pub fn can_transition_to(&self, target: AgentState) -> bool {
        let Some(edge) = self.edges.get(&(self.current_state, target)) else {
            return false;
        };
        match &edge.guard {
            Some(guard) => guard(self),
            None => true,
        }
    }

    /// Attempt a transition. Returns `true` on success; a rejected
    /// transition leaves state and history unchanged.
    pub fn transition_to(&mut self, target: AgentState) -> bool {
        if self.current_state == AgentState::Shutdown && target != AgentState::Wakeup {
            tracing::warn!(
                target = %target,
                "transition from shutdown blocked; only wakeup is allowed"
            );
            return false;
        }
        if target == self.current_state {
            return false;
        }
        if !self.can_transition_to(target) {
            tracing::warn!(
                from = %self.current_state,
                to = %target,
                "invalid state transition attempted"
            );
            return false;
        }

        let from = self.current_state;
        if let Some(edge) = self.edges.get(&(from, target)) {
            if let Some(hook) = &edge.hook {
                if let Err(e) = hook(from, target) {
                    tracing::error!(
                        from = %from,
                        to = %target,
                        error = %e,
                        "transition hook failed; transition aborted"
                    );
                    return false;
                }
            }
        }

        let now = self.time.now();
        self.current_state = target;
        self.history.push(StateChange {
            from_state: Some(from),
            to_state: target,
            timestamp: now,
        });
        self.metadata.entry(target).or_insert(StateMetadata {
            entered_at: now,
            extra: HashMap::new(),
        });
        // Re-entering a state refreshes its entry timestamp.
        if let Some(meta) = self.metadata.get_mut(&target) {
            meta.entered_at = now;
        }

        tracing::info!(from = %from, to = %target, "state transition");
        true
    }

    /// Metadata for the current state.
    pub fn state_metadata(&self) -> Option<&StateMetadata> {
        self.metadata.get(&self.current_state)
    }

    /// Set a metadata key on the current state.
    pub fn update_state_metadata(&mut self, key: impl Into<String>, value: Value) {
        let now = self.time.now();
        self.metadata
            .entry(self.current_state)
            .or_insert(StateMetadata {
                entered_at: now,
                extra: HashMap::new(),
            })
            .extra
            .insert(key.into(), value);
    }

    /// Seconds spent in the current state.
    pub fn state_duration_secs(&self) -> f64 {
        match self.state_metadata() {
            Some(meta) => {
                let delta = self.time.now() - meta.entered_at;
                delta.num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        }
    }

    /// The single automatic transition: WAKEUP moves to WORK once the
    /// wakeup round has flagged completion. SHUTDOWN never auto-transitions.
    pub fn should_auto_transition(&self) -> Option<AgentState> {
        if self.current_state == AgentState::Shutdown {
            return None;
        }
        if self.current_state == AgentState::Wakeup {
            let complete = self
                .state_metadata()
                .and_then(|meta| meta.extra.get("wakeup_complete"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if complete {
                return Some(AgentState::Work);
            }
        }
        None
    }
}

//! Round lifecycle state machine
//!
//! A thin wrapper over the allowed-transition table. Illegal transitions are
//! logged and refused rather than performed, so an internal bug degrades to a
//! warning instead of corrupting the round phase.

use log::warn;
use quiz_protocol::epoch_ms;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Phase of the round in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Active,
    Locked,
    Transitioning,
}

/// Every transition the machine will ever perform.
const ALLOWED: &[(Phase, Phase)] = &[
    (Phase::Idle, Phase::Active),
    (Phase::Active, Phase::Locked),
    (Phase::Active, Phase::Idle),
    (Phase::Locked, Phase::Transitioning),
    (Phase::Transitioning, Phase::Active),
    (Phase::Transitioning, Phase::Idle),
];

/// One entry in the append-only transition log.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub at_ms: u64,
    pub context: String,
}

/// Explicit FSM for the round phase, with an observable history.
pub struct LifecycleMachine {
    state: Phase,
    entered_at: Instant,
    history: Vec<TransitionRecord>,
    visits: HashMap<Phase, u32>,
    dwell: HashMap<Phase, Duration>,
    stays_completed: HashMap<Phase, u32>,
}

impl LifecycleMachine {
    pub fn new() -> Self {
        let mut visits = HashMap::new();
        visits.insert(Phase::Idle, 1);

        Self {
            state: Phase::Idle,
            entered_at: Instant::now(),
            history: Vec::new(),
            visits,
            dwell: HashMap::new(),
            stays_completed: HashMap::new(),
        }
    }

    /// Attempts a transition to `target`.
    ///
    /// On success the move is appended to the history and the current state
    /// updates. An illegal target logs a warning and leaves the machine in
    /// its previous state; the caller sees `false` and nothing else changes.
    pub fn transition(&mut self, target: Phase, context: impl Into<String>) -> bool {
        let from = self.state;

        if !ALLOWED.contains(&(from, target)) {
            warn!(
                "illegal lifecycle transition {:?} -> {:?} refused (context: {})",
                from,
                target,
                context.into()
            );
            return false;
        }

        *self.dwell.entry(from).or_insert(Duration::ZERO) += self.entered_at.elapsed();
        *self.stays_completed.entry(from).or_insert(0) += 1;

        self.history.push(TransitionRecord {
            from,
            to: target,
            at_ms: epoch_ms(),
            context: context.into(),
        });

        self.state = target;
        self.entered_at = Instant::now();
        *self.visits.entry(target).or_insert(0) += 1;

        true
    }

    pub fn state(&self) -> Phase {
        self.state
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// How many times the machine has entered `phase`, counting the initial
    /// IDLE as one visit.
    pub fn visit_count(&self, phase: Phase) -> u32 {
        self.visits.get(&phase).copied().unwrap_or(0)
    }

    /// Mean time spent per completed stay in `phase`. `None` until the
    /// machine has left that phase at least once.
    pub fn mean_dwell(&self, phase: Phase) -> Option<Duration> {
        let stays = self.stays_completed.get(&phase).copied().unwrap_or(0);
        if stays == 0 {
            return None;
        }
        let total = self.dwell.get(&phase).copied().unwrap_or(Duration::ZERO);
        Some(total / stays)
    }
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}

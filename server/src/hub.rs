//! The hub: sole writer over round state, lifecycle and registry
//!
//! All inbound transport events and timer callbacks funnel into one
//! unbounded channel that a single hub task drains to completion, one event
//! at a time. That single-writer discipline is what makes the winner
//! election in [`RoundState::attempt_win`] indivisible: among near-simultaneous
//! correct answers, the winner is simply the first one the hub dequeues.
//!
//! The hub never awaits while handling an event. Outbound delivery goes
//! through per-connection queues owned by the transport, and timers are
//! spawned tasks that post [`HubEvent`]s back into the same channel.

use crate::lifecycle::{LifecycleMachine, Phase};
use crate::question::{Question, QuestionGenerator};
use crate::registry::ParticipantRegistry;
use crate::round::RoundState;
use log::{debug, info};
use quiz_protocol::{epoch_ms, AnswerValue, ClientEvent, ConnId, Difficulty, ServerEvent};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Events processed by the hub task.
#[derive(Debug)]
pub enum HubEvent {
    /// A connection attached; `sender` is its outbound queue.
    Connect {
        id: ConnId,
        sender: UnboundedSender<ServerEvent>,
    },
    /// A connection detached.
    Disconnect { id: ConnId },
    /// A decoded message from a participant.
    Message { id: ConnId, event: ClientEvent },
    /// Post-lock handoff timer fired for the given round.
    HandoffLock { round_serial: u64 },
    /// Rotation timer fired for the given round.
    AdvanceRound { round_serial: u64 },
    /// Stop the hub task (used by tests and shutdown paths).
    Shutdown,
}

/// Tunable hub behavior. Defaults match the documented protocol timings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Time between a winner being declared and the next question.
    pub winner_display: Duration,
    /// Time between the LOCKED and TRANSITIONING phases. Observational:
    /// the rotation timer measures from the LOCKED moment, not from here.
    pub post_lock_handoff: Duration,
    /// Difficulty used for every generated question.
    pub difficulty: Difficulty,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            winner_display: Duration::from_millis(3000),
            post_lock_handoff: Duration::from_millis(100),
            difficulty: Difficulty::Medium,
        }
    }
}

/// Point-in-time view of the hub for diagnostics and tests.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub round: RoundSnapshot,
    pub stats: HubStats,
    pub machine: MachineSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundSnapshot {
    pub question_id: Option<String>,
    pub question: Option<String>,
    pub locked: bool,
    pub winner: Option<ConnId>,
    pub submissions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub online: usize,
    pub rounds_started: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineSnapshot {
    pub state: Phase,
    pub transitions: usize,
    pub visits: PhaseVisits,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseVisits {
    pub idle: u32,
    pub active: u32,
    pub locked: u32,
    pub transitioning: u32,
}

/// Orchestrator owning every piece of mutable quiz state.
pub struct Hub {
    config: HubConfig,
    generator: QuestionGenerator,
    round: RoundState,
    machine: LifecycleMachine,
    registry: ParticipantRegistry,
    /// Increments on every installed question; timer events carry the value
    /// they were armed under so stale firings are discarded.
    round_serial: u64,
    rotation_timer: Option<JoinHandle<()>>,
    handoff_timer: Option<JoinHandle<()>>,
    self_tx: UnboundedSender<HubEvent>,
}

impl Hub {
    /// Builds an idle hub. `self_tx` must be the sending half of the channel
    /// later passed to [`Hub::run`]; timers post back through it.
    pub fn new(config: HubConfig, self_tx: UnboundedSender<HubEvent>) -> Self {
        Self {
            config,
            generator: QuestionGenerator::new(),
            round: RoundState::new(),
            machine: LifecycleMachine::new(),
            registry: ParticipantRegistry::new(),
            round_serial: 0,
            rotation_timer: None,
            handoff_timer: None,
            self_tx,
        }
    }

    /// Drains hub events until shutdown. Issues the first question before
    /// processing anything.
    pub async fn run(mut self, mut rx: tokio::sync::mpsc::UnboundedReceiver<HubEvent>) {
        self.start();

        while let Some(event) = rx.recv().await {
            match event {
                HubEvent::Connect { id, sender } => self.handle_connect(id, sender),
                HubEvent::Disconnect { id } => self.handle_disconnect(id),
                HubEvent::Message { id, event } => self.handle_client_event(id, event),
                HubEvent::HandoffLock { round_serial } => self.handle_handoff(round_serial),
                HubEvent::AdvanceRound { round_serial } => self.handle_advance(round_serial),
                HubEvent::Shutdown => {
                    info!("hub shutting down");
                    break;
                }
            }
        }

        self.cancel_timers();
    }

    /// Issues the first question and enters ACTIVE.
    pub fn start(&mut self) {
        self.install_question(self.config.difficulty);
    }

    /// Registers a connection, announces the new online count and brings the
    /// joiner up to date without disturbing the round.
    pub fn handle_connect(&mut self, id: ConnId, sender: UnboundedSender<ServerEvent>) {
        if !self.registry.add(id, sender) {
            return;
        }

        self.registry.broadcast(&ServerEvent::UserCount {
            count: self.registry.len(),
        });
        self.send_question_to(id);
    }

    /// Deregisters a connection. Any submission it made this round is
    /// retained, so a disconnect-reconnect loop cannot buy a second attempt.
    pub fn handle_disconnect(&mut self, id: ConnId) {
        if !self.registry.remove(id) {
            return;
        }

        self.registry.broadcast(&ServerEvent::UserCount {
            count: self.registry.len(),
        });
    }

    /// Dispatches one decoded participant message.
    pub fn handle_client_event(&mut self, id: ConnId, event: ClientEvent) {
        match event {
            ClientEvent::SubmitAnswer { answer } => self.handle_submit(id, answer),
            ClientEvent::RequestQuestion {} => self.send_question_to(id),
        }
    }

    /// Processes a submission end to end: stamp, record, validate, elect.
    pub fn handle_submit(&mut self, id: ConnId, answer: Option<AnswerValue>) {
        // Server-received time, taken before any other work on the message.
        let received_at = epoch_ms();

        let raw = match &answer {
            Some(value) if !value.is_blank() => value.raw(),
            _ => {
                self.registry.send_to(
                    id,
                    ServerEvent::SubmissionError {
                        error: "empty-answer".to_string(),
                        message: "Answer must not be empty.".to_string(),
                        timestamp: epoch_ms(),
                    },
                );
                return;
            }
        };

        if let Err(reason) = self.round.record_submission(id, raw.clone(), received_at) {
            debug!("submission from {} rejected: {}", id, reason);
            self.registry.send_to(
                id,
                ServerEvent::SubmissionRejected {
                    reason,
                    message: reason.message().to_string(),
                    timestamp: epoch_ms(),
                },
            );
            return;
        }

        // record_submission guarantees an active question.
        let Some(question) = self.round.current_question() else {
            return;
        };
        let question = question.clone();
        let correct = QuestionGenerator::validate(&raw, question.answer);

        if self.round.attempt_win(id, correct) {
            self.declare_winner(id, &question, received_at);
        } else if correct {
            self.registry.send_to(
                id,
                ServerEvent::SubmissionResult {
                    correct: true,
                    winner: false,
                    message: "Correct, but another participant answered first.".to_string(),
                    timestamp: epoch_ms(),
                },
            );
        } else {
            self.registry.send_to(
                id,
                ServerEvent::SubmissionResult {
                    correct: false,
                    winner: false,
                    message: "Not quite. Your submission for this round has been used."
                        .to_string(),
                    timestamp: epoch_ms(),
                },
            );
        }
    }

    /// Locks the round for `winner` and schedules the follow-up phases.
    fn declare_winner(&mut self, winner: ConnId, question: &Question, submission_time: u64) {
        self.machine.transition(
            Phase::Locked,
            format!(
                "winner={} question={} answer={}",
                winner, question.expression, question.answer
            ),
        );
        info!(
            "participant {} won round {} with '{}'",
            winner, question.id, question.expression
        );

        // Any rotation pending from an earlier round dies here.
        self.cancel_timers();

        let now = epoch_ms();
        self.registry.broadcast(&ServerEvent::WinnerDeclared {
            winner_id: winner,
            correct_answer: question.answer,
            question: question.expression.clone(),
            question_id: question.id.clone(),
            submission_time,
            next_question_in: self.config.winner_display.as_millis() as u64,
            timestamp: now,
        });
        self.registry.send_to(
            winner,
            ServerEvent::YouWon {
                message: "Correct! You won this round.".to_string(),
                correct_answer: question.answer,
                question: question.expression.clone(),
                timestamp: now,
            },
        );

        // Both timers measure from the LOCKED moment.
        let serial = self.round_serial;

        let tx = self.self_tx.clone();
        let handoff = self.config.post_lock_handoff;
        self.handoff_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(handoff).await;
            let _ = tx.send(HubEvent::HandoffLock {
                round_serial: serial,
            });
        }));

        let tx = self.self_tx.clone();
        let display = self.config.winner_display;
        self.rotation_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(display).await;
            let _ = tx.send(HubEvent::AdvanceRound {
                round_serial: serial,
            });
        }));
    }

    /// LOCKED -> TRANSITIONING, once the handoff delay elapses.
    pub fn handle_handoff(&mut self, round_serial: u64) {
        if round_serial != self.round_serial {
            debug!("stale handoff timer for round serial {}", round_serial);
            return;
        }

        if self.machine.state() == Phase::Locked {
            self.machine
                .transition(Phase::Transitioning, "post-lock handoff");
        }
    }

    /// Starts the next round when the winner display period ends.
    pub fn handle_advance(&mut self, round_serial: u64) {
        if round_serial != self.round_serial {
            debug!("stale rotation timer for round serial {}", round_serial);
            return;
        }

        self.install_question(self.config.difficulty);
    }

    /// Administrative escape hatch: discard the round in flight and issue a
    /// fresh question immediately.
    pub fn force_new_question(&mut self, difficulty: Option<Difficulty>) {
        self.cancel_timers();
        self.install_question(difficulty.unwrap_or(self.config.difficulty));
    }

    /// Administrative reset: drop the round and return the machine to IDLE.
    pub fn reset_round(&mut self) {
        self.cancel_timers();
        self.round.reset();
        self.round_serial += 1;

        match self.machine.state() {
            Phase::Active | Phase::Transitioning => {
                self.machine.transition(Phase::Idle, "administrative reset");
            }
            Phase::Locked => {
                // No direct LOCKED -> IDLE edge; go through TRANSITIONING.
                self.machine
                    .transition(Phase::Transitioning, "administrative reset");
                self.machine.transition(Phase::Idle, "administrative reset");
            }
            Phase::Idle => {}
        }
    }

    /// Diagnostic view over round, registry and machine.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            round: RoundSnapshot {
                question_id: self.round.current_question().map(|q| q.id.clone()),
                question: self.round.current_question().map(|q| q.expression.clone()),
                locked: self.round.locked(),
                winner: self.round.winner(),
                submissions: self.round.submission_count(),
            },
            stats: HubStats {
                online: self.registry.len(),
                rounds_started: self.round_serial,
            },
            machine: MachineSnapshot {
                state: self.machine.state(),
                transitions: self.machine.history().len(),
                visits: PhaseVisits {
                    idle: self.machine.visit_count(Phase::Idle),
                    active: self.machine.visit_count(Phase::Active),
                    locked: self.machine.visit_count(Phase::Locked),
                    transitioning: self.machine.visit_count(Phase::Transitioning),
                },
            },
        }
    }

    /// Read-only access for tests and diagnostics.
    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn machine(&self) -> &LifecycleMachine {
        &self.machine
    }

    /// Installs a fresh question and moves the machine to ACTIVE.
    fn install_question(&mut self, difficulty: Difficulty) {
        let question = self.generator.generate(difficulty);
        info!(
            "round {}: '{}' ({})",
            question.id, question.expression, difficulty
        );

        self.round.set_question(question.clone());
        self.round_serial += 1;

        let context = format!("question {}", question.id);
        match self.machine.state() {
            Phase::Idle | Phase::Transitioning => {
                self.machine.transition(Phase::Active, context);
            }
            Phase::Locked => {
                // Rotation can reach a still-LOCKED machine when the handoff
                // timer has not fired yet; take both steps here.
                self.machine
                    .transition(Phase::Transitioning, context.clone());
                self.machine.transition(Phase::Active, context);
            }
            Phase::Active => {}
        }

        self.registry.broadcast(&ServerEvent::NewQuestion {
            question: question.expression,
            question_id: question.id,
            difficulty: question.difficulty,
            timestamp: epoch_ms(),
        });
    }

    /// Sends the in-flight question (or the waiting notice) to one
    /// connection.
    fn send_question_to(&self, id: ConnId) {
        match self.round.current_question() {
            Some(question) => self.registry.send_to(
                id,
                ServerEvent::CurrentQuestion {
                    question: question.expression.clone(),
                    question_id: question.id.clone(),
                    difficulty: question.difficulty,
                    timestamp: epoch_ms(),
                },
            ),
            None => self.registry.send_to(
                id,
                ServerEvent::WaitingForQuestion {
                    message: "Waiting for the next question.".to_string(),
                    timestamp: epoch_ms(),
                },
            ),
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.rotation_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.handoff_timer.take() {
            handle.abort();
        }
    }
}

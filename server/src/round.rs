//! Per-round mutable state: question, submissions, lock and winner
//!
//! This module handles the server-side heart of a quiz round, including:
//! - Atomic question swaps that re-establish a clean round
//! - One-submission-per-connection bookkeeping with arrival ordering
//! - The check-and-set winner election that makes the race fair
//! - Diagnostic views over submission timing (grace-period window)
//!
//! All mutation goes through the hub's single-writer discipline, which is
//! what makes `attempt_win` indivisible with respect to rival submissions.

use crate::question::Question;
use quiz_protocol::{ConnId, RejectReason};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Default diagnostic window after the first submission of a round.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// One accepted answer from one connection.
///
/// The timestamp is assigned by the hub at the instant it begins processing
/// the message; client-provided times are never recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub conn_id: ConnId,
    pub answer: String,
    pub received_at: u64,
}

/// Errors from round configuration, as opposed to per-submission policy
/// rejections which travel as [`RejectReason`] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoundConfigError {
    #[error("grace period must not be negative (got {0} ms)")]
    NegativeGracePeriod(i64),
}

/// Mutable state for the round in flight.
///
/// Invariants held at every public boundary:
/// - `locked` and `winner` are set together or not at all
/// - at most one submission per connection per round
/// - a set winner always has the earliest validated submission
/// - no question means no submissions, no lock, no winner
#[derive(Debug)]
pub struct RoundState {
    question: Option<Question>,
    submissions: HashMap<ConnId, Submission>,
    arrival_order: Vec<(ConnId, u64)>,
    locked: bool,
    winner: Option<ConnId>,
    grace_period: Duration,
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            question: None,
            submissions: HashMap::new(),
            arrival_order: Vec::new(),
            locked: false,
            winner: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Installs a new question and clears every trace of the previous round.
    pub fn set_question(&mut self, question: Question) {
        self.question = Some(question);
        self.submissions.clear();
        self.arrival_order.clear();
        self.locked = false;
        self.winner = None;
    }

    /// Records a submission if round policy admits it.
    ///
    /// Preconditions are checked in rejection-priority order: a locked round
    /// wins over a duplicate, a duplicate over a missing question.
    pub fn record_submission(
        &mut self,
        conn_id: ConnId,
        answer: String,
        received_at: u64,
    ) -> Result<(), RejectReason> {
        if self.locked {
            return Err(RejectReason::QuestionLocked);
        }
        if self.submissions.contains_key(&conn_id) {
            return Err(RejectReason::AlreadySubmitted);
        }
        if self.question.is_none() {
            return Err(RejectReason::NoQuestion);
        }

        self.submissions.insert(
            conn_id,
            Submission {
                conn_id,
                answer,
                received_at,
            },
        );
        self.arrival_order.push((conn_id, received_at));
        Ok(())
    }

    /// The winner-election critical section.
    ///
    /// Returns true exactly once per round: for the first correct submission
    /// the single writer reaches. A locked round, a wrong answer, or a
    /// connection with no recorded submission all return false without
    /// changing anything.
    pub fn attempt_win(&mut self, conn_id: ConnId, is_correct: bool) -> bool {
        if self.locked || !is_correct {
            return false;
        }
        if !self.submissions.contains_key(&conn_id) {
            return false;
        }

        self.locked = true;
        self.winner = Some(conn_id);
        true
    }

    /// Returns to the fully empty state.
    pub fn reset(&mut self) {
        self.question = None;
        self.submissions.clear();
        self.arrival_order.clear();
        self.locked = false;
        self.winner = None;
    }

    /// Reconfigures the diagnostic grace window. Negative durations are a
    /// caller bug and are refused.
    pub fn set_grace_period(&mut self, millis: i64) -> Result<(), RoundConfigError> {
        if millis < 0 {
            return Err(RoundConfigError::NegativeGracePeriod(millis));
        }
        self.grace_period = Duration::from_millis(millis as u64);
        Ok(())
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    pub fn has_submitted(&self, conn_id: ConnId) -> bool {
        self.submissions.contains_key(&conn_id)
    }

    pub fn submission(&self, conn_id: ConnId) -> Option<&Submission> {
        self.submissions.get(&conn_id)
    }

    pub fn winner(&self) -> Option<ConnId> {
        self.winner
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    /// Submissions sorted by server timestamp ascending; ties keep arrival
    /// order (the sort is stable over the insertion sequence).
    pub fn submissions_ordered(&self) -> Vec<Submission> {
        let mut ordered: Vec<Submission> = self
            .arrival_order
            .iter()
            .filter_map(|(conn_id, _)| self.submissions.get(conn_id).cloned())
            .collect();
        ordered.sort_by_key(|s| s.received_at);
        ordered
    }

    /// Prefix of the ordered submissions whose timestamps fall within the
    /// grace window after the first submission, bounds inclusive.
    ///
    /// Diagnostic only: winner election uses pure serializer order.
    pub fn grace_period_submissions(&self) -> Vec<Submission> {
        let ordered = self.submissions_ordered();
        let Some(first) = ordered.first() else {
            return Vec::new();
        };

        let cutoff = first.received_at + self.grace_period.as_millis() as u64;
        ordered
            .into_iter()
            .take_while(|s| s.received_at <= cutoff)
            .collect()
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

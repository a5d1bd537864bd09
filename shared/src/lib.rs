//! # Shared Quiz Protocol
//!
//! This module contains all data structures shared between the quiz hub server
//! and its clients. It defines the complete wire protocol for the live
//! competitive quiz: the events a participant may send, the events the hub
//! emits in response, and the small vocabulary of identifiers and tags both
//! sides agree on.
//!
//! ## Core Components
//!
//! ### Event Envelope
//! Every message on the wire is a JSON object of the form
//! `{"event": "<name>", "data": {...}}`. Event names are kebab-case; payload
//! fields are camelCase. The envelope is produced by serde's adjacent tagging,
//! so adding an event is a matter of adding an enum variant.
//!
//! ### Inbound Events
//! [`ClientEvent`] covers everything a participant can ask of the hub:
//! submitting an answer and re-requesting the current question.
//!
//! ### Outbound Events
//! [`ServerEvent`] covers both per-connection replies (question delivery,
//! submission verdicts, rejections) and hub-wide broadcasts (new rounds,
//! winner announcements, the online count).
//!
//! ### Identity
//! [`ConnId`] identifies one live connection. It is assigned by the transport,
//! is never reused within a process run, and carries no meaning beyond
//! equality - a reconnecting participant gets a fresh id.
//!
//! ## Design Philosophy
//!
//! ### Server Authority
//! Every `timestamp` field in this protocol is server epoch-milliseconds.
//! Clients never supply times; ordering and fairness derive entirely from the
//! instant the hub processes each message.
//!
//! ### Self-Describing Encoding
//! JSON text frames keep the protocol inspectable from a browser console and
//! spare clients a binary codec. Payloads are small enough that compactness
//! is not a concern for this service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current server time in milliseconds since the Unix epoch.
///
/// All `timestamp` fields stamped into outbound events come from this single
/// helper so transcripts stay mutually comparable.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Opaque identifier for one live connection.
///
/// Assigned by the transport adapter from a process-wide counter. Stable for
/// the life of the connection, never reused within a run, and deliberately
/// free of any session semantics: reconnects produce fresh ids and are not
/// correlated with earlier rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(u64);

impl ConnId {
    pub const fn new(raw: u64) -> Self {
        ConnId(raw)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Difficulty tag attached to every question.
///
/// Controls the operand ranges and operator set the generator draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!(
                "unknown difficulty '{}' (expected easy, medium or hard)",
                other
            )),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// Why a structurally valid submission was refused.
///
/// Sent back verbatim in `submission-rejected` so clients can distinguish a
/// late answer from a duplicate one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// A winner has already been declared for this round.
    QuestionLocked,
    /// This connection already submitted an answer this round.
    AlreadySubmitted,
    /// No question is currently active.
    NoQuestion,
}

impl RejectReason {
    /// Human-readable explanation paired with the reason on the wire.
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::QuestionLocked => "This round is already locked.",
            RejectReason::AlreadySubmitted => "You already submitted an answer this round.",
            RejectReason::NoQuestion => "There is no active question.",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QuestionLocked => write!(f, "question-locked"),
            RejectReason::AlreadySubmitted => write!(f, "already-submitted"),
            RejectReason::NoQuestion => write!(f, "no-question"),
        }
    }
}

/// A submitted answer as it appears on the wire: JSON string or number.
///
/// The hub validates the textual form, so both `{"answer": "15"}` and
/// `{"answer": 15}` are accepted and equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
}

impl AnswerValue {
    /// The raw textual form of the answer, as recorded in the round state.
    ///
    /// Whole numbers are rendered without a fractional part so `15` and
    /// `"15"` produce the same record.
    pub fn raw(&self) -> String {
        match self {
            AnswerValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            AnswerValue::Text(s) => s.clone(),
        }
    }

    /// True when the answer carries no content worth validating.
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Number(_) => false,
            AnswerValue::Text(s) => s.trim().is_empty(),
        }
    }
}

/// Events a participant sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Submit an answer for the current question.
    ///
    /// A missing or blank `answer` is malformed input and is answered with
    /// `submission-error` without touching the round.
    SubmitAnswer {
        #[serde(default)]
        answer: Option<AnswerValue>,
    },

    /// Ask for the in-flight question again (late join, reconnect, UI
    /// refresh). Never disturbs the round.
    RequestQuestion {},
}

/// Events the hub sends to participants.
///
/// The first six are addressed to a single connection; the last three are
/// broadcast to every participant. Payload field names match the protocol
/// documents exactly (camelCase on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// The in-flight question, sent to one connection on join or on request.
    #[serde(rename_all = "camelCase")]
    CurrentQuestion {
        question: String,
        question_id: String,
        difficulty: Difficulty,
        timestamp: u64,
    },

    /// Sent instead of `current-question` when no round is active.
    WaitingForQuestion { message: String, timestamp: u64 },

    /// Sent to the round winner only.
    #[serde(rename_all = "camelCase")]
    YouWon {
        message: String,
        correct_answer: i64,
        question: String,
        timestamp: u64,
    },

    /// Verdict for a recorded, non-winning submission.
    SubmissionResult {
        correct: bool,
        winner: bool,
        message: String,
        timestamp: u64,
    },

    /// A submission was refused by round policy.
    SubmissionRejected {
        reason: RejectReason,
        message: String,
        timestamp: u64,
    },

    /// A submission was malformed (empty or missing answer).
    SubmissionError {
        error: String,
        message: String,
        timestamp: u64,
    },

    /// Broadcast at each round start.
    #[serde(rename_all = "camelCase")]
    NewQuestion {
        question: String,
        question_id: String,
        difficulty: Difficulty,
        timestamp: u64,
    },

    /// Broadcast the moment a winner is elected.
    #[serde(rename_all = "camelCase")]
    WinnerDeclared {
        winner_id: ConnId,
        correct_answer: i64,
        question: String,
        question_id: String,
        submission_time: u64,
        next_question_in: u64,
        timestamp: u64,
    },

    /// Broadcast on every connect and disconnect.
    UserCount { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conn_id_display_and_roundtrip() {
        let id = ConnId::new(7);
        assert_eq!(id.to_string(), "conn-7");

        let encoded = serde_json::to_value(id).unwrap();
        assert_eq!(encoded, json!(7));
        let decoded: ConnId = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_difficulty_parsing() {
        assert_eq!("easy".parse::<Difficulty>().unwrap(), Difficulty::Easy);
        assert_eq!(" MEDIUM ".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert_eq!("hard".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("extreme".parse::<Difficulty>().is_err());
    }

    #[test]
    fn test_answer_value_accepts_string_and_number() {
        let from_text: AnswerValue = serde_json::from_value(json!("15")).unwrap();
        let from_number: AnswerValue = serde_json::from_value(json!(15)).unwrap();

        assert_eq!(from_text.raw(), "15");
        assert_eq!(from_number.raw(), "15");
        assert!(!from_number.is_blank());
        assert!(AnswerValue::Text("   ".to_string()).is_blank());
    }

    #[test]
    fn test_client_event_envelope() {
        let parsed: ClientEvent = serde_json::from_value(json!({
            "event": "submit-answer",
            "data": { "answer": "21" }
        }))
        .unwrap();

        match parsed {
            ClientEvent::SubmitAnswer { answer: Some(v) } => assert_eq!(v.raw(), "21"),
            other => panic!("unexpected event: {:?}", other),
        }

        // A submit-answer with no answer field still parses; the hub treats
        // it as malformed input.
        let missing: ClientEvent = serde_json::from_value(json!({
            "event": "submit-answer",
            "data": {}
        }))
        .unwrap();
        assert_eq!(missing, ClientEvent::SubmitAnswer { answer: None });

        let request: ClientEvent = serde_json::from_value(json!({
            "event": "request-question",
            "data": {}
        }))
        .unwrap();
        assert_eq!(request, ClientEvent::RequestQuestion {});
    }

    #[test]
    fn test_server_event_envelope_and_field_names() {
        let event = ServerEvent::NewQuestion {
            question: "7 + 8".to_string(),
            question_id: "q-1-00ff".to_string(),
            difficulty: Difficulty::Medium,
            timestamp: 1000,
        };

        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(
            encoded,
            json!({
                "event": "new-question",
                "data": {
                    "question": "7 + 8",
                    "questionId": "q-1-00ff",
                    "difficulty": "medium",
                    "timestamp": 1000
                }
            })
        );
    }

    #[test]
    fn test_winner_declared_field_names() {
        let event = ServerEvent::WinnerDeclared {
            winner_id: ConnId::new(3),
            correct_answer: 15,
            question: "7 + 8".to_string(),
            question_id: "q-2-0001".to_string(),
            submission_time: 500,
            next_question_in: 3000,
            timestamp: 501,
        };

        let encoded = serde_json::to_value(&event).unwrap();
        let data = &encoded["data"];
        assert_eq!(encoded["event"], "winner-declared");
        assert_eq!(data["winnerId"], 3);
        assert_eq!(data["correctAnswer"], 15);
        assert_eq!(data["questionId"], "q-2-0001");
        assert_eq!(data["submissionTime"], 500);
        assert_eq!(data["nextQuestionIn"], 3000);
    }

    #[test]
    fn test_reject_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(RejectReason::QuestionLocked).unwrap(),
            json!("question-locked")
        );
        assert_eq!(
            serde_json::to_value(RejectReason::AlreadySubmitted).unwrap(),
            json!("already-submitted")
        );
        assert_eq!(
            serde_json::to_value(RejectReason::NoQuestion).unwrap(),
            json!("no-question")
        );
    }

    #[test]
    fn test_epoch_ms_is_monotonic_enough() {
        let first = epoch_ms();
        std::thread::sleep(Duration::from_millis(2));
        let second = epoch_ms();
        assert!(second > first);
    }
}

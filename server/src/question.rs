//! Arithmetic question generation and answer validation
//!
//! The generator is a pure producer: it holds no round state and is safe to
//! call from any context. The only process-wide piece is the id counter,
//! which guarantees question identifiers never repeat within a run.

use quiz_protocol::{epoch_ms, Difficulty};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Multiplication operands are redrawn below this bound to keep products
/// within mental-arithmetic range.
const MUL_OPERAND_CAP: i64 = 20;

/// Accepted distance between a parsed submission and the canonical answer.
const ANSWER_TOLERANCE: f64 = 1e-4;

/// Arithmetic operators a question may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
}

impl Operator {
    fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
        }
    }

    fn apply(&self, a: i64, b: i64) -> i64 {
        match self {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
        }
    }
}

/// Operand range and operator set for one difficulty tier.
#[derive(Debug, Clone, Copy)]
pub struct DifficultyConfig {
    pub min_operand: i64,
    pub max_operand: i64,
    pub operators: &'static [Operator],
}

impl DifficultyConfig {
    /// Default tier table: easy is addition/subtraction on small operands,
    /// medium and hard add multiplication and widen the range.
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => DifficultyConfig {
                min_operand: 1,
                max_operand: 50,
                operators: &[Operator::Add, Operator::Sub],
            },
            Difficulty::Medium => DifficultyConfig {
                min_operand: 1,
                max_operand: 100,
                operators: &[Operator::Add, Operator::Sub, Operator::Mul],
            },
            Difficulty::Hard => DifficultyConfig {
                min_operand: 10,
                max_operand: 100,
                operators: &[Operator::Add, Operator::Sub, Operator::Mul],
            },
        }
    }
}

/// One immutable quiz problem.
///
/// Produced by [`QuestionGenerator::generate`], consumed read-only everywhere
/// else. The id is unique for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: String,
    pub expression: String,
    pub answer: i64,
    pub difficulty: Difficulty,
    pub created_at: u64,
}

/// Stateless producer and validator for arithmetic questions.
pub struct QuestionGenerator {
    next_seq: AtomicU64,
}

impl QuestionGenerator {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
        }
    }

    /// Produces a fresh question for the given difficulty.
    ///
    /// Operands and operator are drawn uniformly from the tier table.
    /// Multiplication redraws both operands under [`MUL_OPERAND_CAP`];
    /// subtraction orders its operands so the answer is never negative.
    pub fn generate(&self, difficulty: Difficulty) -> Question {
        let config = DifficultyConfig::for_difficulty(difficulty);
        let mut rng = rand::thread_rng();

        let op = config.operators[rng.gen_range(0..config.operators.len())];

        let (mut a, mut b) = match op {
            Operator::Mul => {
                let high = config.max_operand.min(MUL_OPERAND_CAP);
                (
                    rng.gen_range(config.min_operand..=high),
                    rng.gen_range(config.min_operand..=high),
                )
            }
            _ => (
                rng.gen_range(config.min_operand..=config.max_operand),
                rng.gen_range(config.min_operand..=config.max_operand),
            ),
        };

        if op == Operator::Sub && a < b {
            std::mem::swap(&mut a, &mut b);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("q-{}-{:04x}", seq, rng.gen::<u16>());

        Question {
            id,
            expression: format!("{} {} {}", a, op.symbol(), b),
            answer: op.apply(a, b),
            difficulty,
            created_at: epoch_ms(),
        }
    }

    /// Checks a raw submission against the canonical answer.
    ///
    /// Trims whitespace, parses as a real number and accepts anything within
    /// [`ANSWER_TOLERANCE`] of the canonical value. Empty or unparseable
    /// input is simply wrong; validation itself never fails.
    pub fn validate(raw: &str, canonical: i64) -> bool {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return false;
        }

        match trimmed.parse::<f64>() {
            Ok(parsed) => (parsed - canonical as f64).abs() < ANSWER_TOLERANCE,
            Err(_) => false,
        }
    }
}

impl Default for QuestionGenerator {
    fn default() -> Self {
        Self::new()
    }
}

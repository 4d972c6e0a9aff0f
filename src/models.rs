use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MIN_QUESTION_COUNT: u32 = 1;
pub const MAX_QUESTION_COUNT: u32 = 20;
pub const OPTIONS_PER_QUESTION: usize = 4;
pub const PASSING_PERCENTAGE: f64 = 60.0;

/// Input to the quiz extraction pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizRequest {
    pub source_content: String,
    pub question_count: u32,
}

impl QuizRequest {
    pub fn new(source_content: impl Into<String>, question_count: u32) -> Self {
        Self {
            source_content: source_content.into(),
            question_count,
        }
    }
}

/// A validated multiple-choice question. `correct_answer` is always the
/// literal text of one of the four `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

impl QuizQuestion {
    pub fn correct_label(&self) -> Option<AnswerLabel> {
        self.options
            .iter()
            .position(|option| option == &self.correct_answer)
            .and_then(AnswerLabel::from_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnswerLabel {
    A,
    B,
    C,
    D,
}

impl AnswerLabel {
    pub const ALL: [AnswerLabel; 4] = [AnswerLabel::A, AnswerLabel::B, AnswerLabel::C, AnswerLabel::D];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        match self {
            AnswerLabel::A => 0,
            AnswerLabel::B => 1,
            AnswerLabel::C => 2,
            AnswerLabel::D => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnswerLabel::A => "A",
            AnswerLabel::B => "B",
            AnswerLabel::C => "C",
            AnswerLabel::D => "D",
        }
    }
}

impl fmt::Display for AnswerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" => Ok(AnswerLabel::A),
            "B" => Ok(AnswerLabel::B),
            "C" => Ok(AnswerLabel::C),
            "D" => Ok(AnswerLabel::D),
            other => Err(format!("'{}' is not one of A, B, C, D", other)),
        }
    }
}

// Persisted records

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub storage_path: Option<String>,
    pub extracted_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub question_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredQuestion {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub question_text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: AnswerLabel,
    pub question_order: i64, // 1-based
    pub created_at: DateTime<Utc>,
}

impl StoredQuestion {
    pub fn option(&self, label: AnswerLabel) -> &str {
        match label {
            AnswerLabel::A => &self.option_a,
            AnswerLabel::B => &self.option_b,
            AnswerLabel::C => &self.option_c,
            AnswerLabel::D => &self.option_d,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub quiz_id: Uuid,
    pub score: i64,
    pub total_questions: i64,
    pub percentage: f64,
    pub completed_at: DateTime<Utc>,
    pub time_taken_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAnswer {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub selected_answer: AnswerLabel,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

// Requests

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateQuizDirectRequest {
    pub content: String,
    pub question_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileRequest {
    pub filename: String,
    pub mime_type: String,
    /// Base64-encoded file bytes
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateQuizRequest {
    pub file_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub question_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAttemptRequest {
    pub answers: Vec<SubmittedAnswer>,
    pub time_taken_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: Uuid,
    pub selected_answer: AnswerLabel,
}

// Views

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuiz {
    pub quiz: Quiz,
    pub questions: Vec<StoredQuestion>,
}

/// A question as shown while taking a quiz, without its answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: Uuid,
    pub question_text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub question_order: i64,
}

impl From<&StoredQuestion> for PublicQuestion {
    fn from(question: &StoredQuestion) -> Self {
        Self {
            id: question.id,
            question_text: question.question_text.clone(),
            option_a: question.option_a.clone(),
            option_b: question.option_b.clone(),
            option_c: question.option_c.clone(),
            option_d: question.option_d.clone(),
            question_order: question.question_order,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDetail {
    pub quiz: Quiz,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionReview {
    pub question_id: Uuid,
    pub question_text: String,
    pub selected_answer: AnswerLabel,
    pub selected_text: String,
    pub correct_answer: AnswerLabel,
    pub correct_text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt: QuizAttempt,
    pub passed: bool,
    pub review: Vec<QuestionReview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub quiz_title: String,
    pub filename: String,
    pub score: i64,
    pub total_questions: i64,
    pub percentage: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_attempts: usize,
    pub average_percentage: f64,
    pub best_percentage: f64,
}

impl HistoryStats {
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }

        let total: f64 = entries.iter().map(|e| e.percentage).sum();
        let best = entries
            .iter()
            .map(|e| e.percentage)
            .fold(f64::MIN, f64::max);

        Self {
            total_attempts: entries.len(),
            average_percentage: total / entries.len() as f64,
            best_percentage: best,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizHistory {
    pub attempts: Vec<HistoryEntry>,
    pub stats: HistoryStats,
}

pub fn percentage(score: i64, total: i64) -> f64 {
    if total <= 0 {
        0.0
    } else {
        score as f64 / total as f64 * 100.0
    }
}

pub fn is_passing(percentage: f64) -> bool {
    percentage.round() >= PASSING_PERCENTAGE
}

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::llm_providers::{GenerationParams, TextGenerator, UpstreamError};
use crate::models::{AnswerLabel, QuizQuestion, QuizRequest, MAX_QUESTION_COUNT, MIN_QUESTION_COUNT, OPTIONS_PER_QUESTION};

// Import logging macros
use crate::{log_llm_operation, log_validation};

/// Output format documented in the prompt. A reply in exactly this shape always validates.
pub const RESPONSE_SCHEMA_EXAMPLE: &str = r#"{
  "questions": [
    {
      "question": "Question text here?",
      "options": {
        "A": "Option A text",
        "B": "Option B text",
        "C": "Option C text",
        "D": "Option D text"
      },
      "correct_answer": "A"
    }
  ]
}"#;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("no JSON object found")]
    NoJsonObject,

    #[error("malformed JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),
}

/// First schema violation found in a parsed model response
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}field '{field}': {reason}", question_prefix(.index))]
pub struct ValidationError {
    /// Zero-based position of the offending question, `None` for the response as a whole
    pub index: Option<usize>,
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(index: Option<usize>, field: &str, reason: impl Into<String>) -> Self {
        Self {
            index,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn item(index: usize, field: &str, reason: impl Into<String>) -> Self {
        Self::new(Some(index), field, reason)
    }
}

fn question_prefix(index: &Option<usize>) -> String {
    index.map(|i| format!("question {} ", i + 1)).unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid quiz request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("could not extract quiz from model response: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("generated quiz failed validation: {0}")]
    Validation(#[from] ValidationError),
}

/// Options as the model may emit them: a plain list (answer given as literal
/// text) or a map keyed by label (answer given as a label).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOptions {
    Listed(Vec<String>),
    Keyed(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: Option<Value>,
    options: Option<Value>,
    #[serde(alias = "answer")]
    correct_answer: Option<Value>,
}

/// Render the prompt for a quiz request. Pure function of its inputs.
pub fn build_prompt(source_content: &str, question_count: u32) -> String {
    format!(
        r#"Generate exactly {count} multiple choice questions based on the following content.

Content: {content}

Requirements:
- Create exactly {count} questions
- Each question must have exactly 4 options labelled A, B, C and D
- Exactly one option must be correct
- The 4 options of a question must all be different
- Questions should test understanding of the content
- Return the response in this exact JSON format:

{schema}

Make sure the JSON is valid and follows this exact structure."#,
        count = question_count,
        content = source_content,
        schema = RESPONSE_SCHEMA_EXAMPLE,
    )
}

/// Slice from the first `{` to the last `}` inclusive.
/// Assumes the reply holds a single top-level object and no stray braces in surrounding prose.
pub fn extract_json_candidate(raw: &str) -> Result<&str, ExtractionError> {
    let start = raw.find('{').ok_or(ExtractionError::NoJsonObject)?;
    let end = raw.rfind('}').ok_or(ExtractionError::NoJsonObject)?;
    if end < start {
        return Err(ExtractionError::NoJsonObject);
    }
    Ok(&raw[start..=end])
}

/// Turn a raw model reply into exactly `expected_count` validated questions
pub fn parse_quiz_response(raw: &str, expected_count: u32) -> Result<Vec<QuizQuestion>, PipelineError> {
    let candidate = extract_json_candidate(raw)?;
    let parsed: Value = serde_json::from_str(candidate).map_err(ExtractionError::MalformedJson)?;
    Ok(validate_quiz(&parsed, expected_count)?)
}

/// Check the parsed reply against the question schema, preserving model order
pub fn validate_quiz(parsed: &Value, expected_count: u32) -> Result<Vec<QuizQuestion>, ValidationError> {
    let object = parsed
        .as_object()
        .ok_or_else(|| ValidationError::new(None, "questions", "response must be a JSON object"))?;

    let items = object
        .get("questions")
        .or_else(|| object.get("quiz"))
        .ok_or_else(|| ValidationError::new(None, "questions", "missing question array"))?
        .as_array()
        .ok_or_else(|| ValidationError::new(None, "questions", "must be an array"))?;

    let questions = items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_question(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    if questions.len() != expected_count as usize {
        return Err(ValidationError::new(
            None,
            "questions",
            format!("expected {} questions, got {}", expected_count, questions.len()),
        ));
    }

    Ok(questions)
}

fn validate_question(index: usize, item: &Value) -> Result<QuizQuestion, ValidationError> {
    if !item.is_object() {
        return Err(ValidationError::item(index, "question", "item must be a JSON object"));
    }

    let raw: RawQuestion = serde_json::from_value(item.clone())
        .map_err(|e| ValidationError::item(index, "question", e.to_string()))?;

    let question: String = typed_field(index, "question", raw.question)?;
    let question = question.trim().to_string();
    if question.is_empty() {
        return Err(ValidationError::item(index, "question", "must not be empty"));
    }

    let options: RawOptions = typed_field(index, "options", raw.options)?;
    let answer: String = typed_field(index, "correct_answer", raw.correct_answer)?;

    let (options, correct_answer) = match options {
        RawOptions::Listed(options) => resolve_literal(index, options, &answer)?,
        RawOptions::Keyed(options) => resolve_keyed(index, options, &answer)?,
    };

    Ok(QuizQuestion {
        question,
        options,
        correct_answer,
    })
}

fn typed_field<T: serde::de::DeserializeOwned>(index: usize, field: &str, value: Option<Value>) -> Result<T, ValidationError> {
    let value = match value {
        Some(Value::Null) | None => return Err(ValidationError::item(index, field, "missing")),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|e| ValidationError::item(index, field, e.to_string()))
}

fn check_options(index: usize, options: &[String]) -> Result<(), ValidationError> {
    if options.len() != OPTIONS_PER_QUESTION {
        return Err(ValidationError::item(
            index,
            "options",
            format!("expected {} options, got {}", OPTIONS_PER_QUESTION, options.len()),
        ));
    }

    let mut seen = HashSet::new();
    for option in options {
        if option.is_empty() {
            return Err(ValidationError::item(index, "options", "options must not be empty"));
        }
        if !seen.insert(option.as_str()) {
            return Err(ValidationError::item(index, "options", format!("duplicate option '{}'", option)));
        }
    }

    Ok(())
}

fn resolve_literal(index: usize, options: Vec<String>, answer: &str) -> Result<(Vec<String>, String), ValidationError> {
    let options: Vec<String> = options.into_iter().map(|o| o.trim().to_string()).collect();
    check_options(index, &options)?;

    let answer = answer.trim();
    match options.iter().find(|option| option.as_str() == answer) {
        Some(option) => {
            let correct = option.clone();
            Ok((options, correct))
        }
        None => Err(ValidationError::item(
            index,
            "correct_answer",
            format!("'{}' is not one of the options", answer),
        )),
    }
}

fn resolve_keyed(index: usize, options: BTreeMap<String, String>, answer: &str) -> Result<(Vec<String>, String), ValidationError> {
    let mut by_label = BTreeMap::new();
    for (key, text) in options {
        let label: AnswerLabel = key
            .parse()
            .map_err(|e: String| ValidationError::item(index, "options", format!("bad option key: {}", e)))?;
        by_label.insert(label, text.trim().to_string());
    }

    // BTreeMap iterates A..D
    let ordered: Vec<String> = by_label.into_values().collect();
    check_options(index, &ordered)?;

    let label: AnswerLabel = answer
        .parse()
        .map_err(|e: String| ValidationError::item(index, "correct_answer", e))?;
    let correct = ordered[label.index()].clone();

    Ok((ordered, correct))
}

/// Prompt construction, model invocation and response validation for one quiz.
/// Holds no mutable state; clones share the same generator.
#[derive(Clone)]
pub struct QuizPipeline {
    generator: Arc<dyn TextGenerator>,
    params: GenerationParams,
}

impl QuizPipeline {
    pub fn new(generator: Arc<dyn TextGenerator>, params: GenerationParams) -> Self {
        Self { generator, params }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.generator_name()
    }

    pub fn validate_request(request: &QuizRequest) -> Result<(), PipelineError> {
        if !(MIN_QUESTION_COUNT..=MAX_QUESTION_COUNT).contains(&request.question_count) {
            return Err(PipelineError::InvalidRequest(format!(
                "question count must be between {} and {}, got {}",
                MIN_QUESTION_COUNT, MAX_QUESTION_COUNT, request.question_count
            )));
        }
        if request.source_content.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("source content must not be empty".to_string()));
        }
        Ok(())
    }

    pub async fn generate_quiz(&self, request: &QuizRequest) -> Result<Vec<QuizQuestion>, PipelineError> {
        if let Err(e) = Self::validate_request(request) {
            log_validation!(failure, "quiz_request", error = e);
            return Err(e);
        }

        log_llm_operation!(
            start,
            "generate_quiz",
            provider = self.generator_name(),
            question_count = request.question_count
        );
        let started = Instant::now();

        let prompt = build_prompt(&request.source_content, request.question_count);
        let response_text = match self.generator.generate(&prompt, &self.params).await {
            Ok(text) => text,
            Err(e) => {
                log_llm_operation!(error, "generate_quiz", provider = self.generator_name(), error = e);
                return Err(e.into());
            }
        };

        if response_text.trim().is_empty() {
            log_llm_operation!(warn, "generate_quiz", "model returned an empty reply");
        }
        debug!(
            response_length = response_text.len(),
            response_content = %response_text,
            "Raw LLM response for quiz generation"
        );

        match parse_quiz_response(&response_text, request.question_count) {
            Ok(questions) => {
                log_llm_operation!(
                    success,
                    "generate_quiz",
                    provider = self.generator_name(),
                    question_count = questions.len(),
                    duration_ms = started.elapsed().as_millis() as u64
                );
                Ok(questions)
            }
            Err(e) => {
                log_llm_operation!(error, "generate_quiz", provider = self.generator_name(), error = e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keyed_item(question: &str, answer: &str) -> Value {
        json!({
            "question": question,
            "options": {"A": "Alpha", "B": "Beta", "C": "Gamma", "D": "Delta"},
            "correct_answer": answer
        })
    }

    #[test]
    fn test_prompt_embeds_content_and_count() {
        let prompt = build_prompt("Photosynthesis converts light into chemical energy.", 7);
        assert!(prompt.contains("Photosynthesis converts light into chemical energy."));
        assert!(prompt.contains("Generate exactly 7 multiple choice questions"));
        assert!(prompt.contains("Create exactly 7 questions"));
        assert!(prompt.contains("exactly 4 options"));
        assert!(prompt.contains("\"correct_answer\": \"A\""));
        assert_eq!(prompt, build_prompt("Photosynthesis converts light into chemical energy.", 7));
    }

    #[test]
    fn test_prompt_only_braces_are_schema() {
        let prompt = build_prompt("plain content", 1);
        let candidate = extract_json_candidate(&prompt).unwrap();
        assert_eq!(candidate, RESPONSE_SCHEMA_EXAMPLE);
    }

    #[test]
    fn test_schema_example_validates() {
        let questions = parse_quiz_response(RESPONSE_SCHEMA_EXAMPLE, 1).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_answer, "Option A text");
        assert_eq!(questions[0].correct_label(), Some(AnswerLabel::A));
    }

    #[test]
    fn test_extract_candidate_with_surrounding_prose() {
        let raw = "Here is your quiz:\n{\"questions\": []}\nEnjoy!";
        assert_eq!(extract_json_candidate(raw).unwrap(), "{\"questions\": []}");
    }

    #[test]
    fn test_extract_candidate_without_braces() {
        assert!(matches!(extract_json_candidate("Sorry, I cannot help."), Err(ExtractionError::NoJsonObject)));
        assert!(matches!(extract_json_candidate(""), Err(ExtractionError::NoJsonObject)));
        assert!(matches!(extract_json_candidate("only { opening"), Err(ExtractionError::NoJsonObject)));
        assert!(matches!(extract_json_candidate("} backwards {"), Err(ExtractionError::NoJsonObject)));
    }

    #[test]
    fn test_malformed_json_is_extraction_error() {
        let raw = r#"{"questions": [{"question": "Q", "options": ["a", "b", "c", "d"], "correct_answer": "a"},]}"#;
        let err = parse_quiz_response(raw, 1).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ExtractionError::MalformedJson(_))));
    }

    #[test]
    fn test_keyed_convention_normalizes_to_text() {
        let parsed = json!({"questions": [keyed_item("Q1", "C"), keyed_item("Q2", "D")]});
        let questions = validate_quiz(&parsed, 2).unwrap();
        assert_eq!(questions[0].options, vec!["Alpha", "Beta", "Gamma", "Delta"]);
        assert_eq!(questions[0].correct_answer, "Gamma");
        assert_eq!(questions[1].correct_answer, "Delta");
        assert_eq!(questions[1].question, "Q2");
    }

    #[test]
    fn test_literal_convention_with_quiz_wrapper() {
        let parsed = json!({
            "quiz": [{
                "question": "What is 2 + 2?",
                "options": ["3", "4", "5", "22"],
                "answer": "4"
            }]
        });
        let questions = validate_quiz(&parsed, 1).unwrap();
        assert_eq!(questions[0].correct_answer, "4");
        assert_eq!(questions[0].correct_label(), Some(AnswerLabel::B));
    }

    #[test]
    fn test_missing_option_names_offending_item() {
        let parsed = json!({
            "questions": [
                keyed_item("Q1", "A"),
                {"question": "Q2", "options": {"A": "x", "B": "y", "C": "z"}, "correct_answer": "A"}
            ]
        });
        let err = validate_quiz(&parsed, 2).unwrap_err();
        assert_eq!(err.index, Some(1));
        assert_eq!(err.field, "options");
    }

    #[test]
    fn test_literal_answer_must_match_option() {
        let parsed = json!({
            "questions": [{"question": "Q", "options": ["a", "b", "c", "d"], "correct_answer": "B"}]
        });
        let err = validate_quiz(&parsed, 1).unwrap_err();
        assert_eq!(err.field, "correct_answer");
    }

    #[test]
    fn test_keyed_answer_must_be_label() {
        let parsed = json!({"questions": [keyed_item("Q", "E")]});
        let err = validate_quiz(&parsed, 1).unwrap_err();
        assert_eq!(err.index, Some(0));
        assert_eq!(err.field, "correct_answer");
    }

    #[test]
    fn test_unknown_option_key_rejected() {
        let parsed = json!({
            "questions": [{"question": "Q", "options": {"A": "w", "B": "x", "C": "y", "E": "z"}, "correct_answer": "A"}]
        });
        let err = validate_quiz(&parsed, 1).unwrap_err();
        assert_eq!(err.field, "options");
    }

    #[test]
    fn test_duplicate_and_empty_options_rejected() {
        let duplicate = json!({
            "questions": [{"question": "Q", "options": ["a", "a", "c", "d"], "correct_answer": "a"}]
        });
        assert_eq!(validate_quiz(&duplicate, 1).unwrap_err().field, "options");

        let empty = json!({
            "questions": [{"question": "Q", "options": ["a", " ", "c", "d"], "correct_answer": "a"}]
        });
        assert_eq!(validate_quiz(&empty, 1).unwrap_err().field, "options");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let no_question = json!({"questions": [{"options": ["a", "b", "c", "d"], "correct_answer": "a"}]});
        assert_eq!(validate_quiz(&no_question, 1).unwrap_err().field, "question");

        let blank_question = json!({"questions": [{"question": "  ", "options": ["a", "b", "c", "d"], "correct_answer": "a"}]});
        assert_eq!(validate_quiz(&blank_question, 1).unwrap_err().field, "question");

        let no_answer = json!({"questions": [{"question": "Q", "options": ["a", "b", "c", "d"]}]});
        assert_eq!(validate_quiz(&no_answer, 1).unwrap_err().field, "correct_answer");

        let bad_options = json!({"questions": [{"question": "Q", "options": "a, b, c, d", "correct_answer": "a"}]});
        assert_eq!(validate_quiz(&bad_options, 1).unwrap_err().field, "options");
    }

    #[test]
    fn test_question_count_must_match() {
        let parsed = json!({"questions": [keyed_item("Q1", "A"), keyed_item("Q2", "B")]});
        let err = validate_quiz(&parsed, 3).unwrap_err();
        assert_eq!(err.index, None);
        assert_eq!(err.field, "questions");
        assert!(err.reason.contains("expected 3 questions, got 2"));
    }

    #[test]
    fn test_wrong_top_level_shape() {
        assert!(validate_quiz(&json!([keyed_item("Q", "A")]), 1).is_err());
        assert!(validate_quiz(&json!({"items": []}), 1).is_err());
        assert!(validate_quiz(&json!({"questions": "none"}), 1).is_err());
    }

    #[test]
    fn test_request_bounds() {
        assert!(QuizPipeline::validate_request(&QuizRequest::new("content", 1)).is_ok());
        assert!(QuizPipeline::validate_request(&QuizRequest::new("content", 20)).is_ok());
        assert!(matches!(
            QuizPipeline::validate_request(&QuizRequest::new("content", 0)),
            Err(PipelineError::InvalidRequest(_))
        ));
        assert!(matches!(
            QuizPipeline::validate_request(&QuizRequest::new("content", 21)),
            Err(PipelineError::InvalidRequest(_))
        ));
        assert!(matches!(
            QuizPipeline::validate_request(&QuizRequest::new("  \n", 5)),
            Err(PipelineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::item(2, "options", "expected 4 options, got 3");
        assert_eq!(err.to_string(), "question 3 field 'options': expected 4 options, got 3");

        let err = ValidationError::new(None, "questions", "expected 5 questions, got 4");
        assert_eq!(err.to_string(), "field 'questions': expected 5 questions, got 4");

        let as_error: &dyn std::error::Error = &err;
        assert!(as_error.source().is_none());
    }
}

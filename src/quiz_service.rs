use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{Database, NewAnswer, NewQuestion};
use crate::file_processor::{FileError, FileProcessor};
use crate::models::*;
use crate::quiz_pipeline::{PipelineError, QuizPipeline};

/// Number of attempts shown in a user's history
pub const HISTORY_LIMIT: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{resource} with id '{id}' not found")]
    NotFound { resource: &'static str, id: Uuid },

    #[error("all {total} questions must be answered, got {answered}")]
    Incomplete { answered: usize, total: usize },

    #[error("question '{0}' does not belong to this quiz")]
    UnknownQuestion(Uuid),

    #[error("question '{0}' was answered more than once")]
    DuplicateAnswer(Uuid),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl ServiceError {
    fn not_found(resource: &'static str, id: Uuid) -> Self {
        ServiceError::NotFound { resource, id }
    }
}

#[derive(Clone)]
pub struct QuizService {
    db: Database,
    pipeline: QuizPipeline,
    files: FileProcessor,
}

impl QuizService {
    pub fn new(db: Database, pipeline: QuizPipeline, files: FileProcessor) -> Self {
        Self { db, pipeline, files }
    }

    pub fn pipeline(&self) -> &QuizPipeline {
        &self.pipeline
    }

    // File operations
    pub async fn upload_file(&self, user_id: Uuid, request: &UploadFileRequest) -> Result<FileRecord, ServiceError> {
        let processed = self.files.process(request).await?;

        let file = self
            .db
            .create_file(
                user_id,
                &processed.filename,
                &processed.file_type,
                processed.file_size as i64,
                Some(processed.content),
            )
            .await?;

        info!(
            file_id = %file.id,
            user_id = %user_id,
            filename = %file.filename,
            kind = processed.kind.label(),
            "File stored"
        );
        Ok(file)
    }

    /// Files are only visible to the user who uploaded them
    pub async fn get_file(&self, user_id: Uuid, file_id: Uuid) -> Result<FileRecord, ServiceError> {
        match self.db.get_file(file_id).await? {
            Some(file) if file.user_id == user_id => Ok(file),
            _ => Err(ServiceError::not_found("file", file_id)),
        }
    }

    // Quiz operations
    /// Run the pipeline directly on caller-supplied content; nothing is persisted
    pub async fn generate_direct(&self, request: &GenerateQuizDirectRequest) -> Result<Vec<QuizQuestion>, ServiceError> {
        let quiz_request = QuizRequest::new(request.content.clone(), request.question_count);
        Ok(self.pipeline.generate_quiz(&quiz_request).await?)
    }

    pub async fn generate_quiz_for_file(
        &self,
        user_id: Uuid,
        request: &GenerateQuizRequest,
    ) -> Result<GeneratedQuiz, ServiceError> {
        let file = self.get_file(user_id, request.file_id).await?;

        let content = match file.extracted_content.as_deref() {
            Some(content) if !content.trim().is_empty() => content.to_string(),
            _ => format!("Content from file: {}", file.filename),
        };

        let quiz_request = QuizRequest::new(content, request.question_count);
        let questions = self.pipeline.generate_quiz(&quiz_request).await?;

        let new_questions = questions
            .iter()
            .map(NewQuestion::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Quiz from {}", file.filename));
        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let generated = self
            .db
            .create_quiz(user_id, file.id, &title, description, &new_questions)
            .await?;

        info!(
            quiz_id = %generated.quiz.id,
            file_id = %file.id,
            question_count = generated.questions.len(),
            "Quiz generated and stored"
        );
        Ok(generated)
    }

    async fn owned_quiz(&self, user_id: Uuid, quiz_id: Uuid) -> Result<Quiz, ServiceError> {
        match self.db.get_quiz(quiz_id).await? {
            Some(quiz) if quiz.user_id == user_id => Ok(quiz),
            _ => Err(ServiceError::not_found("quiz", quiz_id)),
        }
    }

    /// Quiz and questions with the correct answers stripped
    pub async fn get_quiz_for_taking(&self, user_id: Uuid, quiz_id: Uuid) -> Result<QuizDetail, ServiceError> {
        let quiz = self.owned_quiz(user_id, quiz_id).await?;
        let questions = self.db.get_quiz_questions(quiz_id).await?;

        Ok(QuizDetail {
            quiz,
            questions: questions.iter().map(PublicQuestion::from).collect(),
        })
    }

    // Attempt operations
    pub async fn submit_attempt(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        request: &SubmitAttemptRequest,
    ) -> Result<AttemptResult, ServiceError> {
        self.owned_quiz(user_id, quiz_id).await?;
        let questions = self.db.get_quiz_questions(quiz_id).await?;

        let selections = collect_selections(&questions, &request.answers)?;

        let mut answers = Vec::with_capacity(questions.len());
        let mut review = Vec::with_capacity(questions.len());
        for question in &questions {
            // collect_selections guarantees every question has exactly one selection
            let Some(&selected) = selections.get(&question.id) else {
                return Err(ServiceError::Incomplete {
                    answered: selections.len(),
                    total: questions.len(),
                });
            };
            let is_correct = selected == question.correct_answer;

            answers.push(NewAnswer {
                question_id: question.id,
                selected_answer: selected,
                is_correct,
            });
            review.push(QuestionReview {
                question_id: question.id,
                question_text: question.question_text.clone(),
                selected_answer: selected,
                selected_text: question.option(selected).to_string(),
                correct_answer: question.correct_answer,
                correct_text: question.option(question.correct_answer).to_string(),
                is_correct,
            });
        }

        let time_taken = request.time_taken_seconds.filter(|secs| *secs >= 0);
        let attempt = self.db.create_attempt(user_id, quiz_id, &answers, time_taken).await?;
        let passed = is_passing(attempt.percentage);

        info!(
            quiz_id = %quiz_id,
            attempt_id = %attempt.id,
            score = attempt.score,
            total_questions = attempt.total_questions,
            passed,
            "Quiz attempt recorded"
        );

        Ok(AttemptResult {
            attempt,
            passed,
            review,
        })
    }

    pub async fn history(&self, user_id: Uuid) -> Result<QuizHistory, ServiceError> {
        let attempts = self.db.get_recent_attempts(user_id, HISTORY_LIMIT).await?;
        let stats = HistoryStats::from_entries(&attempts);
        debug!(user_id = %user_id, attempts = attempts.len(), "Loaded quiz history");

        Ok(QuizHistory { attempts, stats })
    }
}

/// Map each question to the single label submitted for it
fn collect_selections(
    questions: &[StoredQuestion],
    submitted: &[SubmittedAnswer],
) -> Result<HashMap<Uuid, AnswerLabel>, ServiceError> {
    let known: HashSet<Uuid> = questions.iter().map(|q| q.id).collect();
    let mut selections = HashMap::with_capacity(submitted.len());

    for answer in submitted {
        if !known.contains(&answer.question_id) {
            return Err(ServiceError::UnknownQuestion(answer.question_id));
        }
        if selections.insert(answer.question_id, answer.selected_answer).is_some() {
            return Err(ServiceError::DuplicateAnswer(answer.question_id));
        }
    }

    if selections.len() != questions.len() {
        return Err(ServiceError::Incomplete {
            answered: selections.len(),
            total: questions.len(),
        });
    }

    Ok(selections)
}

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

use crate::models::*;

// Import logging macros
use crate::log_db_operation;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// A question ready to be inserted, in keyed form
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub question_text: String,
    pub options: [String; 4],
    pub correct_answer: AnswerLabel,
}

impl TryFrom<&QuizQuestion> for NewQuestion {
    type Error = anyhow::Error;

    fn try_from(question: &QuizQuestion) -> Result<Self> {
        let correct_answer = question
            .correct_label()
            .ok_or_else(|| anyhow!("correct answer '{}' is not among the options", question.correct_answer))?;
        let options: [String; 4] = question
            .options
            .clone()
            .try_into()
            .map_err(|options: Vec<String>| anyhow!("expected 4 options, got {}", options.len()))?;

        Ok(Self {
            question_text: question.question.clone(),
            options,
            correct_answer,
        })
    }
}

/// An answer ready to be inserted alongside its attempt
#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub question_id: Uuid,
    pub selected_answer: AnswerLabel,
    pub is_correct: bool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` opens its own database, so keep exactly one alive
        let in_memory = database_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migrate", "database initialized");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                storage_path TEXT,
                extracted_content TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quizzes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                file_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                question_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_questions (
                id TEXT PRIMARY KEY,
                quiz_id TEXT NOT NULL,
                question_text TEXT NOT NULL,
                option_a TEXT NOT NULL,
                option_b TEXT NOT NULL,
                option_c TEXT NOT NULL,
                option_d TEXT NOT NULL,
                correct_answer TEXT NOT NULL CHECK (correct_answer IN ('A', 'B', 'C', 'D')),
                question_order INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_attempts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                quiz_id TEXT NOT NULL,
                score INTEGER NOT NULL,
                total_questions INTEGER NOT NULL,
                percentage REAL NOT NULL,
                completed_at TEXT NOT NULL,
                time_taken_seconds INTEGER,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_answers (
                id TEXT PRIMARY KEY,
                attempt_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                selected_answer TEXT NOT NULL CHECK (selected_answer IN ('A', 'B', 'C', 'D')),
                is_correct INTEGER NOT NULL,
                answered_at TEXT NOT NULL,
                FOREIGN KEY (attempt_id) REFERENCES quiz_attempts(id) ON DELETE CASCADE,
                FOREIGN KEY (question_id) REFERENCES quiz_questions(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quiz_questions_quiz ON quiz_questions (quiz_id, question_order)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quiz_attempts_user ON quiz_attempts (user_id, completed_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // File operations
    pub async fn create_file(
        &self,
        user_id: Uuid,
        filename: &str,
        file_type: &str,
        file_size: i64,
        extracted_content: Option<String>,
    ) -> Result<FileRecord> {
        let now = Utc::now();
        let file = FileRecord {
            id: Uuid::new_v4(),
            user_id,
            filename: filename.to_string(),
            file_type: file_type.to_string(),
            file_size,
            storage_path: None,
            extracted_content,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO files (id, user_id, filename, file_type, file_size, storage_path,
                               extracted_content, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(file.id.to_string())
        .bind(file.user_id.to_string())
        .bind(&file.filename)
        .bind(&file.file_type)
        .bind(file.file_size)
        .bind(&file.storage_path)
        .bind(&file.extracted_content)
        .bind(format_timestamp(&file.created_at))
        .bind(format_timestamp(&file.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(file)
    }

    pub async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_file(&row)).transpose()
    }

    // Quiz operations
    /// Insert a quiz and its questions atomically; question order follows `questions`
    pub async fn create_quiz(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        title: &str,
        description: Option<String>,
        questions: &[NewQuestion],
    ) -> Result<GeneratedQuiz> {
        let started = Instant::now();
        let now = Utc::now();
        let quiz = Quiz {
            id: Uuid::new_v4(),
            user_id,
            file_id,
            title: title.to_string(),
            description,
            question_count: questions.len() as i64,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO quizzes (id, user_id, file_id, title, description, question_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(quiz.id.to_string())
        .bind(quiz.user_id.to_string())
        .bind(quiz.file_id.to_string())
        .bind(&quiz.title)
        .bind(&quiz.description)
        .bind(quiz.question_count)
        .bind(format_timestamp(&quiz.created_at))
        .bind(format_timestamp(&quiz.updated_at))
        .execute(&mut *tx)
        .await?;

        let mut stored = Vec::with_capacity(questions.len());
        for (index, question) in questions.iter().enumerate() {
            let [option_a, option_b, option_c, option_d] = question.options.clone();
            let record = StoredQuestion {
                id: Uuid::new_v4(),
                quiz_id: quiz.id,
                question_text: question.question_text.clone(),
                option_a,
                option_b,
                option_c,
                option_d,
                correct_answer: question.correct_answer,
                question_order: index as i64 + 1,
                created_at: now,
            };

            sqlx::query(
                r#"
                INSERT INTO quiz_questions (id, quiz_id, question_text, option_a, option_b, option_c,
                                            option_d, correct_answer, question_order, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(record.id.to_string())
            .bind(record.quiz_id.to_string())
            .bind(&record.question_text)
            .bind(&record.option_a)
            .bind(&record.option_b)
            .bind(&record.option_c)
            .bind(&record.option_d)
            .bind(record.correct_answer.as_str())
            .bind(record.question_order)
            .bind(format_timestamp(&record.created_at))
            .execute(&mut *tx)
            .await?;

            stored.push(record);
        }

        if let Err(e) = tx.commit().await {
            log_db_operation!(error, "create_quiz", error = e);
            return Err(e.into());
        }

        log_db_operation!(debug, "create_quiz", id = quiz.id, duration_ms = started.elapsed().as_millis() as u64);

        Ok(GeneratedQuiz {
            quiz,
            questions: stored,
        })
    }

    pub async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>> {
        let row = sqlx::query("SELECT * FROM quizzes WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_quiz(&row)).transpose()
    }

    pub async fn get_quiz_questions(&self, quiz_id: Uuid) -> Result<Vec<StoredQuestion>> {
        let rows = sqlx::query("SELECT * FROM quiz_questions WHERE quiz_id = ?1 ORDER BY question_order ASC")
            .bind(quiz_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_question).collect()
    }

    // Attempt operations
    /// Insert an attempt and its answers atomically
    pub async fn create_attempt(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        answers: &[NewAnswer],
        time_taken_seconds: Option<i64>,
    ) -> Result<QuizAttempt> {
        let score = answers.iter().filter(|a| a.is_correct).count() as i64;
        let total_questions = answers.len() as i64;
        let now = Utc::now();
        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            user_id,
            quiz_id,
            score,
            total_questions,
            percentage: percentage(score, total_questions),
            completed_at: now,
            time_taken_seconds,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO quiz_attempts (id, user_id, quiz_id, score, total_questions, percentage,
                                       completed_at, time_taken_seconds)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(attempt.id.to_string())
        .bind(attempt.user_id.to_string())
        .bind(attempt.quiz_id.to_string())
        .bind(attempt.score)
        .bind(attempt.total_questions)
        .bind(attempt.percentage)
        .bind(format_timestamp(&attempt.completed_at))
        .bind(attempt.time_taken_seconds)
        .execute(&mut *tx)
        .await?;

        for answer in answers {
            sqlx::query(
                r#"
                INSERT INTO user_answers (id, attempt_id, question_id, selected_answer, is_correct, answered_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(attempt.id.to_string())
            .bind(answer.question_id.to_string())
            .bind(answer.selected_answer.as_str())
            .bind(answer.is_correct)
            .bind(format_timestamp(&now))
            .execute(&mut *tx)
            .await?;
        }

        if let Err(e) = tx.commit().await {
            log_db_operation!(error, "create_attempt", error = e);
            return Err(e.into());
        }

        Ok(attempt)
    }

    pub async fn get_attempt_answers(&self, attempt_id: Uuid) -> Result<Vec<UserAnswer>> {
        let rows = sqlx::query("SELECT * FROM user_answers WHERE attempt_id = ?1")
            .bind(attempt_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(UserAnswer {
                    id: parse_uuid(row, "id")?,
                    attempt_id: parse_uuid(row, "attempt_id")?,
                    question_id: parse_uuid(row, "question_id")?,
                    selected_answer: parse_label(row, "selected_answer")?,
                    is_correct: row.get("is_correct"),
                    answered_at: parse_timestamp(row, "answered_at")?,
                })
            })
            .collect()
    }

    /// Most recent attempts of a user, newest first, with quiz title and source filename
    pub async fn get_recent_attempts(&self, user_id: Uuid, limit: i64) -> Result<Vec<HistoryEntry>> {
        let started = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT a.id AS attempt_id, a.quiz_id, a.score, a.total_questions, a.percentage,
                   a.completed_at, q.title AS quiz_title, f.filename
            FROM quiz_attempts a
            JOIN quizzes q ON q.id = a.quiz_id
            JOIN files f ON f.id = q.file_id
            WHERE a.user_id = ?1
            ORDER BY a.completed_at DESC, a.rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(|row| {
                Ok(HistoryEntry {
                    attempt_id: parse_uuid(row, "attempt_id")?,
                    quiz_id: parse_uuid(row, "quiz_id")?,
                    quiz_title: row.get("quiz_title"),
                    filename: row.get("filename"),
                    score: row.get("score"),
                    total_questions: row.get("total_questions"),
                    percentage: row.get("percentage"),
                    completed_at: parse_timestamp(row, "completed_at")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log_db_operation!(debug, "get_recent_attempts", count = entries.len(), duration_ms = started.elapsed().as_millis() as u64);

        Ok(entries)
    }
}

/// Fixed-width so stored timestamps sort lexically
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    Ok(Uuid::parse_str(&row.get::<String, _>(column))?)
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&row.get::<String, _>(column))?.with_timezone(&Utc))
}

fn parse_label(row: &SqliteRow, column: &str) -> Result<AnswerLabel> {
    row.get::<String, _>(column)
        .parse()
        .map_err(|e: String| anyhow!("invalid {} value: {}", column, e))
}

fn row_to_file(row: &SqliteRow) -> Result<FileRecord> {
    Ok(FileRecord {
        id: parse_uuid(row, "id")?,
        user_id: parse_uuid(row, "user_id")?,
        filename: row.get("filename"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        storage_path: row.get("storage_path"),
        extracted_content: row.get("extracted_content"),
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

fn row_to_quiz(row: &SqliteRow) -> Result<Quiz> {
    Ok(Quiz {
        id: parse_uuid(row, "id")?,
        user_id: parse_uuid(row, "user_id")?,
        file_id: parse_uuid(row, "file_id")?,
        title: row.get("title"),
        description: row.get("description"),
        question_count: row.get("question_count"),
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

fn row_to_question(row: &SqliteRow) -> Result<StoredQuestion> {
    Ok(StoredQuestion {
        id: parse_uuid(row, "id")?,
        quiz_id: parse_uuid(row, "quiz_id")?,
        question_text: row.get("question_text"),
        option_a: row.get("option_a"),
        option_b: row.get("option_b"),
        option_c: row.get("option_c"),
        option_d: row.get("option_d"),
        correct_answer: parse_label(row, "correct_answer")?,
        question_order: row.get("question_order"),
        created_at: parse_timestamp(row, "created_at")?,
    })
}

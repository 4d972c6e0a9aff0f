#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use quiz_generator::{DocumentTextExtractor, GenerationParams, TextGenerator, UpstreamError};

/// What the fake model sends back
pub enum Reply {
    Text(String),
    EchoPrompt,
    Fail(UpstreamError),
}

/// Stands in for the upstream model and records every call it receives
pub struct FakeGenerator {
    reply: Reply,
    document_text: String,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            document_text: "Text read from the document.".to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(Reply::Text(text.into()))
    }

    /// What document extraction returns for PDF, DOCX and image uploads
    pub fn with_document_text(mut self, text: impl Into<String>) -> Self {
        self.document_text = text.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::EchoPrompt => Ok(prompt.to_string()),
            Reply::Fail(e) => Err(e.clone()),
        }
    }

    fn generator_name(&self) -> &str {
        "fake"
    }
}

#[async_trait]
impl DocumentTextExtractor for FakeGenerator {
    async fn extract_text(&self, _instruction: &str, _mime_type: &str, _bytes: &[u8]) -> Result<String, UpstreamError> {
        Ok(self.document_text.clone())
    }
}

/// A well-formed keyed-convention reply with `count` questions; question `i` has answer "B"
pub fn keyed_quiz(count: usize) -> Value {
    let questions: Vec<Value> = (1..=count)
        .map(|i| {
            json!({
                "question": format!("Question {}?", i),
                "options": {
                    "A": format!("Option {}a", i),
                    "B": format!("Option {}b", i),
                    "C": format!("Option {}c", i),
                    "D": format!("Option {}d", i)
                },
                "correct_answer": "B"
            })
        })
        .collect();
    json!({ "questions": questions })
}

/// A well-formed literal-convention reply with `count` questions
pub fn listed_quiz(count: usize) -> Value {
    let questions: Vec<Value> = (1..=count)
        .map(|i| {
            json!({
                "question": format!("Listed question {}?", i),
                "options": ["red", "green", "blue", "yellow"],
                "correct_answer": "blue"
            })
        })
        .collect();
    json!({ "questions": questions })
}

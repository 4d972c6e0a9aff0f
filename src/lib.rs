pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod file_processor;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod quiz_pipeline;
pub mod quiz_service;

pub use api::{create_router, ApiResponse, AppState};
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use file_processor::{FileError, FileKind, FileProcessor};
pub use llm_providers::{
    DocumentTextExtractor, GenerationParams, LLMProvider, LLMProviderFactory, LLMProviderType, TextGenerator,
    UpstreamError,
};
pub use models::*;
pub use quiz_pipeline::{build_prompt, parse_quiz_response, PipelineError, QuizPipeline};
pub use quiz_service::{QuizService, ServiceError};

pub mod extract;
pub mod generator;
pub mod jobs;
pub mod llm;
pub mod prompts;

pub use generator::BlogGenerator;
pub use jobs::JobRunner;
pub use llm::{LlmClient, LlmError};

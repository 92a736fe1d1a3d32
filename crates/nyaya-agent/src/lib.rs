pub mod claude;
pub mod event;
pub mod instruction;
pub mod ollama;

pub use claude::ClaudeEngine;
pub use ollama::OllamaEngine;

//! LLM client abstraction layer
//!
//! A trait-based seam over chat completion so the analysis ports can run
//! against a real provider (through `genai`) or a scripted mock.

mod client;
mod error;
mod genai;
mod mock;
mod types;

pub use client::LLMClient;
pub use error::BackendError;
pub use genai::{GenAIClient, API_BASE_URL_ENV};
pub use mock::{MockLLMClient, MockResponse};
pub use types::{ChatMessage, LLMRequest, LLMResponse, MessageRole};

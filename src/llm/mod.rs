//! LLM integration for evo-forge.
//!
//! Generation strategies talk to the completion service through the
//! [`LlmProvider`] trait; [`LiteLlmClient`] is the OpenAI-compatible
//! implementation configured from `LITELLM_*` environment variables.
//!
//! ```ignore
//! use evo_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")]).with_json_mode();
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL, DEFAULT_TIMEOUT,
};

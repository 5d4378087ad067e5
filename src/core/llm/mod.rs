pub mod base;
pub mod openai;
pub mod pricing;

pub use base::{
    BaseLlm, ChatRole, ChatTurn, LlmConfig, LlmError, LlmErrorCallback, LlmEvent, TokenStream,
};
pub use openai::OpenAiLlm;

/// Factory function to create the configured LLM adapter.
pub fn create_llm_provider(config: LlmConfig) -> Result<Box<dyn BaseLlm>, LlmError> {
    Ok(Box::new(OpenAiLlm::new(config)?))
}

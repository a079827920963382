pub mod chunker;
pub mod llm_client;
pub mod merger;
pub mod prompts;

pub mod processor;
pub mod transcription;

//! Concrete [`crate::provider::Provider`] implementations.

pub mod openai_compatible;

pub use openai_compatible::OpenAiCompatibleProvider;

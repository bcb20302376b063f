pub mod analysis;
pub mod client;
pub mod implementation;
pub mod models;
pub mod parse;
pub mod prompts;
pub mod research;

pub use client::{CompletionModel, GenerateError, GenerateRequest, ModelClient};
pub use models::{CompletionResponse, Model, Usage};

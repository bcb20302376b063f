use serde::{Deserialize, Serialize};

/// Models available on the completion studio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    /// Code-focused default.
    #[default]
    CodeLlama34b,
    DeepseekCoder33b,
    Starcoder2,
    Llama3,
    Mixtral8x7b,
    Qwen72b,
}

impl Model {
    pub fn id(&self) -> &'static str {
        match self {
            Model::CodeLlama34b => "codellama/CodeLlama-34b-Instruct-hf",
            Model::DeepseekCoder33b => "deepseek-ai/deepseek-coder-33b-instruct",
            Model::Starcoder2 => "bigcode/starcoder2-15b",
            Model::Llama3 => "meta-llama/Meta-Llama-3-70B-Instruct",
            Model::Mixtral8x7b => "mistralai/Mixtral-8x7B-Instruct-v0.1",
            Model::Qwen72b => "Qwen/Qwen2-72B-Instruct",
        }
    }
}

/// Token usage reported by the provider, or approximated when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Rough usage when the provider omits the field: word count of the
    /// generated text.
    pub fn approximate_from_text(text: &str) -> Self {
        let words = text.split_whitespace().count() as u32;
        Self {
            prompt_tokens: 0,
            completion_tokens: words,
            total_tokens: words,
        }
    }
}

/// Normalized response from the completion service.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    pub finish_reason: String,
}

//! Answer generation from retrieved context

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::config::GenerationConfig;
use crate::openai::OpenAiClient;
use crate::{Config, RagError, Result};

/// Produces a natural-language answer to a question given retrieved chunks.
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    fn generate(&self, question: &str, context: &[&str]) -> Result<String>;
}

impl<G: AnswerGenerator + ?Sized> AnswerGenerator for Arc<G> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn generate(&self, question: &str, context: &[&str]) -> Result<String> {
        (**self).generate(question, context)
    }
}

/// Build the user message sent to the chat model.
pub fn build_prompt(question: &str, context: &[&str]) -> String {
    format!(
        "Answer the question based on the following documents context:\n\n{}\n\nQuestion: {}\nAnswer:",
        context.join("\n\n"),
        question
    )
}

/// Answers from an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    system_prompt: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_api_key(&config.generation, config.api_key()?)
    }

    /// Create a chat client with an explicit credential.
    pub fn with_api_key(settings: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = OpenAiClient::new(
            &settings.base_url,
            api_key,
            settings.timeout_secs,
            settings.max_retries,
        )
        .map_err(RagError::GenerationService)?;

        Ok(Self {
            client,
            model: settings.model.clone(),
            system_prompt: settings.system_prompt.clone(),
        })
    }
}

impl AnswerGenerator for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate(&self, question: &str, context: &[&str]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": build_prompt(question, context)},
            ],
        });

        let response = self
            .client
            .post_json("chat/completions", &body)
            .map_err(RagError::GenerationService)?;

        parse_answer(response)
    }
}

/// Pull the first choice's content out of a chat completion response.
fn parse_answer(response: serde_json::Value) -> Result<String> {
    let response: ChatResponse = serde_json::from_value(response)
        .map_err(|e| RagError::GenerationService(format!("invalid chat response: {e}")))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| RagError::GenerationService("response contained no answer".to_string()))
}

mod extract;
mod prompt;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::types::GeneratorConfig;
use crate::error::{Result, VoxError};
use crate::providers::{AIProvider, ChatRequest, Message, StopReason, Usage};

pub use extract::{extract_code, ExtractionSource};
pub use prompt::{build_system_prompt, build_user_prompt};

/// Message returned when a generation request has no text.
pub const EMPTY_TEXT_MESSAGE: &str = "No text input provided";

/// Target language for generated code. Only one is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
}

impl Language {
    /// Identifier used in API responses and fence tags
    pub fn name(&self) -> &'static str {
        match self {
            Self::Python => "python",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Python => "Python",
        }
    }

    /// Whether a fenced-block info tag names this language.
    pub fn matches_tag(&self, tag: &str) -> bool {
        let aliases: &[&str] = match self {
            Self::Python => &["python", "py", "python3"],
        };
        aliases.iter().any(|a| a.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    pub language: Language,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: Language::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub code: String,
    pub language: Language,
    pub source: ExtractionSource,
    pub model: String,
    pub usage: Usage,
}

/// Turns natural-language descriptions into code through a completion provider.
///
/// Sampling uses a fixed, moderate temperature, so two calls with the same
/// text may return different programs.
pub struct CodeGenerator {
    provider: Arc<dyn AIProvider>,
    max_tokens: u32,
    temperature: f32,
}

impl CodeGenerator {
    pub fn new(provider: Arc<dyn AIProvider>, config: &GeneratorConfig) -> Self {
        Self {
            provider,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let description = request.text.trim();
        if description.is_empty() {
            return Err(VoxError::EmptyInput(EMPTY_TEXT_MESSAGE.to_string()));
        }

        info!(
            provider = %self.provider.name(),
            model = %self.provider.model(),
            chars = description.len(),
            "Generating code"
        );

        let chat = ChatRequest {
            messages: vec![Message::user(build_user_prompt(
                description,
                request.language,
            ))],
            system_prompt: Some(build_system_prompt(request.language)),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self.provider.chat(chat).await?;

        if response.stop_reason == StopReason::MaxTokens {
            warn!(
                max_tokens = self.max_tokens,
                "Completion hit the token limit; generated code may be cut off"
            );
        }

        let reply = response
            .first_text()
            .ok_or_else(|| VoxError::Upstream("completion contained no text".to_string()))?;

        let (code, source) = extract_code(reply, request.language);

        debug!(
            source = ?source,
            code_len = code.len(),
            output_tokens = response.usage.output_tokens,
            "Extracted code from completion"
        );

        Ok(GenerationResult {
            code,
            language: request.language,
            source,
            model: self.provider.model().to_string(),
            usage: response.usage.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{Result, VoxError};
    use crate::providers::{AIProvider, ChatRequest, ChatResponse, StopReason, Usage};

    /// Provider that replays a fixed reply and records every request.
    pub struct ScriptedProvider {
        reply: Option<String>,
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AIProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            match &self.reply {
                Some(text) => Ok(ChatResponse {
                    choices: vec![text.clone()],
                    stop_reason: StopReason::EndTurn,
                    usage: Usage::default(),
                }),
                None => Err(VoxError::ProviderApi {
                    message: "upstream unavailable".to_string(),
                    status: Some(503),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;

    fn generator(provider: Arc<ScriptedProvider>) -> CodeGenerator {
        CodeGenerator::new(provider, &GeneratorConfig::default())
    }

    #[tokio::test]
    async fn test_empty_text_never_calls_provider() {
        let provider = Arc::new(ScriptedProvider::replying("print(1)"));
        let gen = generator(provider.clone());

        for text in ["", "   ", "\n\t"] {
            let err = gen.generate(&GenerationRequest::new(text)).await.unwrap_err();
            assert!(matches!(err, VoxError::EmptyInput(ref m) if m == EMPTY_TEXT_MESSAGE));
        }
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_generate_extracts_tagged_block() {
        let provider = Arc::new(ScriptedProvider::replying(
            "Sure!\n```python\n# add two numbers\na, b = 2, 3\nprint(a + b)\n```",
        ));
        let gen = generator(provider.clone());

        let result = gen
            .generate(&GenerationRequest::new("add two numbers and print the result"))
            .await
            .unwrap();

        assert!(result.code.contains('+'));
        assert!(result.code.contains("print("));
        assert!(!result.code.contains("```"));
        assert_eq!(result.source, ExtractionSource::TaggedBlock);
        assert_eq!(result.language, Language::Python);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].max_tokens, 500);
        assert!((requests[0].temperature - 0.5).abs() < f32::EPSILON);
        assert!(requests[0].messages[0]
            .content
            .contains("add two numbers and print the result"));
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let gen = generator(Arc::new(ScriptedProvider::failing()));
        let err = gen
            .generate(&GenerationRequest::new("hello world"))
            .await
            .unwrap_err();
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn test_blank_completion_is_upstream_error() {
        let gen = generator(Arc::new(ScriptedProvider::replying("   ")));
        let err = gen
            .generate(&GenerationRequest::new("hello world"))
            .await
            .unwrap_err();
        assert!(matches!(err, VoxError::Upstream(_)));
    }

    #[test]
    fn test_language_tags() {
        assert!(Language::Python.matches_tag("PY"));
        assert!(!Language::Python.matches_tag("rust"));
        assert_eq!(Language::Python.name(), "python");
    }
}

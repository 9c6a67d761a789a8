//! Screenshot -> text observation. The only view of the screen the driving model gets.
use std::sync::Arc;

use base64::Engine as _;

use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::executor::handle::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::types::{CallConfig, ChatMessage, ContentPart, ImageUrl, MessageContent};

pub const OCR_DISABLED: &str =
    "OCR disabled - set DESKAGENT_MODEL_OCR or [llm.roles.vision] for text extraction.";
pub const OCR_FAILED: &str = "OCR failed - verify the vision model configuration.";

fn system_prompt() -> String {
    format!(
        "You are an OCR + UI state extractor.\n\
         The screenshot is a desktop at exactly {SCREEN_WIDTH}x{SCREEN_HEIGHT}.\n\
         Output:\n\
         1) A short summary of what app/window is visible.\n\
         2) All readable text.\n\
         3) A compact list of important clickable or typeable elements with approximate coordinates (x,y) if possible.\n\
         Keep it concise and actionable for automation."
    )
}

fn user_instruction() -> String {
    format!(
        "Extract the current UI state from this screenshot. \
         When listing elements, include approximate coordinates in the {SCREEN_WIDTH}x{SCREEN_HEIGHT} coordinate system."
    )
}

struct VisionModel {
    provider: Arc<dyn LlmProvider>,
    cfg: CallConfig,
}

pub struct ObservationExtractor {
    vision: Option<VisionModel>,
}

impl ObservationExtractor {
    /// Extractor that always answers with [`OCR_DISABLED`].
    pub fn disabled() -> Self {
        Self { vision: None }
    }

    pub fn new(provider: Arc<dyn LlmProvider>, cfg: CallConfig) -> Self {
        Self {
            vision: Some(VisionModel { provider, cfg }),
        }
    }

    pub fn from_registry(registry: &ProviderRegistry) -> DeskAgentResult<Self> {
        Ok(match registry.vision()? {
            Some((provider, cfg)) => Self::new(provider, cfg),
            None => {
                tracing::info!("no vision model configured, screenshot OCR disabled");
                Self::disabled()
            }
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.vision.is_some()
    }

    /// Describes the screenshot. Never fails: a missing or failing vision model
    /// degrades to a fixed advisory string.
    pub async fn extract(&self, screenshot: &[u8]) -> String {
        let Some(vision) = &self.vision else {
            return OCR_DISABLED.to_string();
        };
        match self.try_extract(vision, screenshot).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, model = %vision.cfg.model, "OCR failed");
                OCR_FAILED.to_string()
            }
        }
    }

    async fn try_extract(&self, vision: &VisionModel, screenshot: &[u8]) -> DeskAgentResult<String> {
        let messages = vec![
            ChatMessage::system(system_prompt()),
            ChatMessage {
                role: "user".into(),
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: user_instruction(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(screenshot),
                        },
                    },
                ]),
                tool_call_id: None,
                tool_calls: None,
            },
        ];

        let response = vision
            .provider
            .chat(messages, Vec::new(), &vision.cfg, None)
            .await
            .map_err(|e| DeskAgentError::ObservationExtraction(e.to_string()))?;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(DeskAgentError::ObservationExtraction(
                "vision model returned no text".into(),
            ));
        }
        tracing::debug!(chars = text.len(), "screenshot observation extracted");
        Ok(text.to_string())
    }
}

/// `data:` URL for an encoded image, sniffing the format from its magic bytes.
fn data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png");
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::agent_engine::event_bus::TurnEmitter;
    use crate::executor::handle::testing::TINY_PNG;
    use crate::llm::types::{LlmResponse, ToolDef};

    /// Vision model double: answers with a fixed text or fails, and records what it saw.
    pub struct FakeVision {
        pub reply: DeskAgentResult<String>,
        pub seen: Mutex<Vec<(Vec<ChatMessage>, CallConfig)>>,
    }

    impl FakeVision {
        pub fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(DeskAgentError::LlmProvider("connection refused".into())),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for FakeVision {
        fn name(&self) -> &str {
            "fake-vision"
        }

        async fn chat(
            &self,
            messages: Vec<ChatMessage>,
            _tools: Vec<ToolDef>,
            cfg: &CallConfig,
            _emitter: Option<&TurnEmitter>,
        ) -> DeskAgentResult<LlmResponse> {
            self.seen.lock().unwrap().push((messages, cfg.clone()));
            match &self.reply {
                Ok(text) => Ok(LlmResponse {
                    content: text.clone(),
                    ..Default::default()
                }),
                Err(e) => Err(DeskAgentError::LlmProvider(e.to_string())),
            }
        }
    }

    pub fn vision_cfg() -> CallConfig {
        CallConfig {
            model: "qwen2.5vl".into(),
            stream: false,
            temperature: 0.0,
            max_tokens: Some(800),
        }
    }

    #[tokio::test]
    async fn disabled_extractor_returns_advisory() {
        let extractor = ObservationExtractor::disabled();
        assert!(!extractor.is_enabled());
        assert_eq!(extractor.extract(TINY_PNG).await, OCR_DISABLED);
    }

    #[tokio::test]
    async fn failing_model_degrades_to_advisory() {
        let extractor = ObservationExtractor::new(FakeVision::failing(), vision_cfg());
        assert_eq!(extractor.extract(TINY_PNG).await, OCR_FAILED);
    }

    #[tokio::test]
    async fn blank_answer_counts_as_failure() {
        let extractor = ObservationExtractor::new(FakeVision::answering("  \n"), vision_cfg());
        assert_eq!(extractor.extract(TINY_PNG).await, OCR_FAILED);
    }

    #[tokio::test]
    async fn sends_png_as_data_url_with_instructions() {
        let vision = FakeVision::answering("Firefox start page\nSearch bar at (512, 90)");
        let extractor = ObservationExtractor::new(vision.clone(), vision_cfg());

        let text = extractor.extract(TINY_PNG).await;
        assert_eq!(text, "Firefox start page\nSearch bar at (512, 90)");

        let seen = vision.seen.lock().unwrap();
        let (messages, cfg) = &seen[0];
        assert_eq!(cfg.temperature, 0.0);
        assert_eq!(cfg.max_tokens, Some(800));
        assert_eq!(messages[0].role, "system");
        match &messages[0].content {
            MessageContent::Text(t) => assert!(t.contains("1024x768")),
            other => panic!("unexpected system content: {other:?}"),
        }
        let MessageContent::Parts(parts) = &messages[1].content else {
            panic!("user message should carry parts");
        };
        assert!(matches!(
            &parts[1],
            ContentPart::ImageUrl { image_url } if image_url.url.starts_with("data:image/png;base64,")
        ));
    }
}

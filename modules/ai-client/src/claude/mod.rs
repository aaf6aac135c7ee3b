mod client;
pub(crate) mod types;

use tracing::warn;

use crate::error::AiError;
use crate::schema::StructuredOutput;
use crate::usage::CallUsage;
use client::ClaudeClient;
use types::*;

/// A structured result plus what the call cost.
#[derive(Debug)]
pub struct Extracted<T> {
    pub value: T,
    pub usage: CallUsage,
}

/// A plain-text result plus what the call cost.
#[derive(Debug)]
pub struct Completion {
    pub text: String,
    pub usage: CallUsage,
}

/// A structured result from a web-search-augmented call.
#[derive(Debug)]
pub struct SearchExtracted<T> {
    pub value: T,
    pub usage: CallUsage,
    /// Server-side searches the model actually ran (billed per search).
    pub searches_performed: u32,
}

const STRUCTURED_TOOL: &str = "structured_response";

// =============================================================================
// Claude Agent
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> anyhow::Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    fn usage_of(&self, response: &ChatResponse) -> CallUsage {
        match &response.usage {
            Some(u) => CallUsage::from_tokens(&self.model, u.input_tokens, u.output_tokens),
            None => {
                warn!(model = %self.model, "Response carried no usage, billing minimum");
                CallUsage::from_tokens(&self.model, 0, 0)
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Force the model to answer through a schema-typed tool call.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<Extracted<T>, AiError> {
        let request = ChatRequest::new(&self.model)
            .system(system_prompt)
            .message(WireMessage::user(user_prompt))
            .tool(ToolWire::Custom {
                name: STRUCTURED_TOOL.to_string(),
                description: "Report the structured result.".to_string(),
                input_schema: T::tool_schema(),
            })
            .force_tool(STRUCTURED_TOOL);

        let response = self.client().chat(&request).await?;
        let usage = self.usage_of(&response);

        let input = response
            .tool_input(STRUCTURED_TOOL)
            .ok_or(AiError::NoUsableOutput)?;
        let value =
            serde_json::from_value(input.clone()).map_err(|e| AiError::Malformed(e.to_string()))?;

        Ok(Extracted { value, usage })
    }

    /// Let the model run server-side web searches, then report through the
    /// structured tool. `tool_choice` cannot force a custom tool while a
    /// server tool is enabled, so the final text is the fallback parse path.
    pub async fn search_extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        max_searches: u32,
    ) -> Result<SearchExtracted<T>, AiError> {
        let request = ChatRequest::new(&self.model)
            .system(system_prompt)
            .message(WireMessage::user(user_prompt))
            .tool(ToolWire::web_search(max_searches))
            .tool(ToolWire::Custom {
                name: STRUCTURED_TOOL.to_string(),
                description: "Report the structured result once research is complete."
                    .to_string(),
                input_schema: T::tool_schema(),
            });

        let response = self.client().chat(&request).await?;
        let usage = self.usage_of(&response);
        let searches_performed = response.web_search_count();

        let value = match response.tool_input(STRUCTURED_TOOL) {
            Some(input) => serde_json::from_value(input.clone())
                .map_err(|e| AiError::Malformed(e.to_string()))?,
            None => {
                // Model answered in prose; salvage a trailing JSON object if present.
                let text = response.text().ok_or(AiError::NoUsableOutput)?;
                parse_trailing_json(&text).ok_or(AiError::NoUsableOutput)?
            }
        };

        Ok(SearchExtracted {
            value,
            usage,
            searches_performed,
        })
    }

    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Completion, AiError> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .max_tokens(4096)
            .temperature(0.0);

        let response = self.client().chat(&request).await?;
        let usage = self.usage_of(&response);
        let text = response.text().ok_or(AiError::NoUsableOutput)?;

        Ok(Completion { text, usage })
    }

    /// Send an image and force a schema-typed reading of it.
    pub async fn extract_from_image<T: StructuredOutput>(
        &self,
        bytes: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<Extracted<T>, AiError> {
        use base64::Engine;

        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let source = ImageSource {
            source_type: "base64".to_string(),
            media_type: mime_type.to_string(),
            data: encoded,
        };

        let request = ChatRequest::new(&self.model)
            .message(WireMessage::user_with_image(source, prompt))
            .tool(ToolWire::Custom {
                name: STRUCTURED_TOOL.to_string(),
                description: "Report what the image shows.".to_string(),
                input_schema: T::tool_schema(),
            })
            .force_tool(STRUCTURED_TOOL)
            .temperature(0.0);

        let response = self.client().chat(&request).await?;
        let usage = self.usage_of(&response);

        let input = response
            .tool_input(STRUCTURED_TOOL)
            .ok_or(AiError::NoUsableOutput)?;
        let value =
            serde_json::from_value(input.clone()).map_err(|e| AiError::Malformed(e.to_string()))?;

        Ok(Extracted { value, usage })
    }
}

/// Find a `{...}` or `[...]` span at the tail of `text` and deserialize it.
/// Tries the first opening bracket (nested JSON after prose), then the last
/// (flat JSON after prose containing brackets).
fn parse_trailing_json<T: StructuredOutput>(text: &str) -> Option<T> {
    for open in [text.find(['{', '[']), text.rfind(['{', '['])]
        .into_iter()
        .flatten()
    {
        if let Ok(value) = serde_json::from_str(text[open..].trim()) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[test]
    fn claude_new_stores_model() {
        let ai = Claude::new("sk-ant-test", "claude-haiku-4-5-20251001");
        assert_eq!(ai.model(), "claude-haiku-4-5-20251001");
    }

    #[test]
    fn claude_with_base_url() {
        let ai = Claude::new("sk-ant-test", "claude-haiku-4-5-20251001")
            .with_base_url("https://custom.api.com");
        assert_eq!(ai.base_url, Some("https://custom.api.com".to_string()));
    }

    #[derive(Deserialize, JsonSchema)]
    struct Figure {
        value: f64,
    }

    #[test]
    fn trailing_json_is_salvaged_from_prose() {
        let text = "Based on current retail listings, the price is:\n{\"value\": 219.0}";
        let parsed: Figure = parse_trailing_json(text).unwrap();
        assert_eq!(parsed.value, 219.0);
    }

    #[test]
    fn prose_without_json_is_none() {
        assert!(parse_trailing_json::<Figure>("no structure here").is_none());
    }
}

//! AI auto-tagging of preserved links.
//!
//! The page title, URL and meta description are sent to whichever chat model
//! is configured; the reply is parsed as a list of tag names which are then
//! attached to the link.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{self, AiTaggingMethod, LinkPatch, User};

/// Most tags attached to a single link.
pub const MAX_TAGS: usize = 5;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You label bookmarked web pages with short topical tags. \
Reply with a JSON array of at most 5 lowercase tag strings and nothing else.";

/// Chat backend used for tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagProvider {
    Ollama { endpoint: String },
    /// OpenAI and anything speaking its `/chat/completions` dialect.
    OpenAiCompatible { base_url: String, api_key: String },
    Anthropic { base_url: String, api_key: String },
}

impl TagProvider {
    /// Pick a provider from configuration.
    ///
    /// Azure credentials alone are not enough: no deployment endpoint is known.
    #[must_use]
    pub fn from_config(config: &Config) -> Option<Self> {
        if let Some(ref endpoint) = config.ollama_endpoint_url {
            return Some(Self::Ollama {
                endpoint: endpoint.trim_end_matches('/').to_string(),
            });
        }
        if let Some(ref key) = config.openai_api_key {
            return Some(Self::OpenAiCompatible {
                base_url: config.openai_base_url.trim_end_matches('/').to_string(),
                api_key: key.clone(),
            });
        }
        if let Some(ref key) = config.openrouter_api_key {
            return Some(Self::OpenAiCompatible {
                base_url: OPENROUTER_BASE_URL.to_string(),
                api_key: key.clone(),
            });
        }
        if let Some(ref key) = config.anthropic_api_key {
            return Some(Self::Anthropic {
                base_url: ANTHROPIC_BASE_URL.to_string(),
                api_key: key.clone(),
            });
        }
        None
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: String,
}

pub struct AutoTagger {
    client: Client,
    provider: Option<TagProvider>,
    model: String,
}

impl AutoTagger {
    #[must_use]
    pub fn new(provider: Option<TagProvider>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            client,
            provider,
            model: model.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(TagProvider::from_config(config), config.ai_model.clone())
    }

    /// Tag a link for its owner and mark it as AI-tagged.
    ///
    /// Does nothing when the owner has tagging disabled or no usable provider
    /// is configured.
    pub async fn tag_link(
        &self,
        pool: &SqlitePool,
        owner: &User,
        link_id: i64,
        description: Option<&str>,
    ) -> Result<()> {
        let method = owner.tagging_method();
        if !method.is_enabled() {
            return Ok(());
        }

        let Some(ref provider) = self.provider else {
            warn!(link_id, "AI tagging requested but no supported provider is configured");
            return Ok(());
        };

        let Some(link) = db::get_link(pool, link_id).await? else {
            return Ok(());
        };

        let candidates = match method {
            AiTaggingMethod::Predefined => owner.predefined_tags(),
            AiTaggingMethod::Existing => db::get_tags_for_owner(pool, owner.id)
                .await?
                .into_iter()
                .map(|t| t.name)
                .collect(),
            AiTaggingMethod::Generate | AiTaggingMethod::Disabled => Vec::new(),
        };

        if method != AiTaggingMethod::Generate && candidates.is_empty() {
            debug!(link_id, method = method.as_str(), "No candidate tags to choose from");
            return Ok(());
        }

        let prompt = build_prompt(
            &link.name,
            link.url.as_deref().unwrap_or_default(),
            description.unwrap_or_default(),
            &candidates,
        );

        let reply = self.complete(provider, &prompt).await?;
        let tags = select_tags(parse_tag_reply(&reply), method, &candidates);

        for name in &tags {
            let tag_id = db::upsert_tag_by_name(pool, owner.id, name).await?;
            db::attach_tag(pool, link_id, tag_id).await?;
        }

        db::update_link(
            pool,
            link_id,
            &LinkPatch {
                ai_tagged: Some(true),
                ..Default::default()
            },
        )
        .await?;

        info!(link_id, tags = ?tags, "Link auto-tagged");
        Ok(())
    }

    async fn complete(&self, provider: &TagProvider, prompt: &str) -> Result<String> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            },
        ];

        match provider {
            TagProvider::Ollama { endpoint } => {
                let response = self
                    .client
                    .post(format!("{endpoint}/api/chat"))
                    .json(&OllamaChatRequest {
                        model: &self.model,
                        messages,
                        stream: false,
                    })
                    .send()
                    .await
                    .context("Ollama request failed")?
                    .error_for_status()
                    .context("Ollama returned an error")?;
                let body: OllamaChatResponse =
                    response.json().await.context("Failed to parse Ollama response")?;
                Ok(body.message.content)
            }
            TagProvider::OpenAiCompatible { base_url, api_key } => {
                let response = self
                    .client
                    .post(format!("{base_url}/chat/completions"))
                    .bearer_auth(api_key)
                    .json(&ChatCompletionRequest {
                        model: &self.model,
                        messages,
                    })
                    .send()
                    .await
                    .context("Chat completion request failed")?
                    .error_for_status()
                    .context("Chat completion returned an error")?;
                let body: ChatCompletionResponse = response
                    .json()
                    .await
                    .context("Failed to parse chat completion response")?;
                Ok(body
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .unwrap_or_default())
            }
            TagProvider::Anthropic { base_url, api_key } => {
                let response = self
                    .client
                    .post(format!("{base_url}/v1/messages"))
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&AnthropicRequest {
                        model: &self.model,
                        max_tokens: 256,
                        system: SYSTEM_PROMPT,
                        messages: messages.into_iter().skip(1).collect(),
                    })
                    .send()
                    .await
                    .context("Anthropic request failed")?
                    .error_for_status()
                    .context("Anthropic returned an error")?;
                let body: AnthropicResponse = response
                    .json()
                    .await
                    .context("Failed to parse Anthropic response")?;
                Ok(body.content.into_iter().map(|b| b.text).collect())
            }
        }
    }
}

fn build_prompt(name: &str, url: &str, description: &str, candidates: &[String]) -> String {
    let mut prompt = format!("Title: {name}\nURL: {url}\n");
    if !description.is_empty() {
        prompt.push_str(&format!("Description: {description}\n"));
    }
    if !candidates.is_empty() {
        prompt.push_str(&format!(
            "Only choose tags from this list: {}\n",
            candidates.join(", ")
        ));
    }
    prompt
}

/// Pull tag names out of a model reply.
///
/// Prefers a JSON array anywhere in the text and falls back to a comma or
/// newline separated list.
#[must_use]
pub fn parse_tag_reply(reply: &str) -> Vec<String> {
    let from_json = reply
        .find('[')
        .zip(reply.rfind(']'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| serde_json::from_str::<Vec<String>>(&reply[start..=end]).ok());

    let raw = from_json.unwrap_or_else(|| {
        reply
            .split([',', '\n'])
            .map(ToString::to_string)
            .collect()
    });

    raw.into_iter()
        .map(|t| {
            t.trim()
                .trim_start_matches(['-', '*', '#'])
                .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Restrict parsed tags to the allowed set, dedupe, and cap at [`MAX_TAGS`].
///
/// For restricted methods the candidate's own spelling is kept.
#[must_use]
pub fn select_tags(parsed: Vec<String>, method: AiTaggingMethod, candidates: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    parsed
        .into_iter()
        .filter_map(|tag| match method {
            AiTaggingMethod::Generate => Some(tag.to_lowercase()),
            AiTaggingMethod::Predefined | AiTaggingMethod::Existing => candidates
                .iter()
                .find(|c| c.eq_ignore_ascii_case(&tag))
                .cloned(),
            AiTaggingMethod::Disabled => None,
        })
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .take(MAX_TAGS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_reply_with_chatter() {
        let reply = "Sure! Here you go:\n[\"rust\", \"Programming\", \"  async \"]";
        assert_eq!(parse_tag_reply(reply), vec!["rust", "Programming", "async"]);
    }

    #[test]
    fn test_parse_plain_list_reply() {
        let reply = "- news\n- politics, #europe";
        assert_eq!(parse_tag_reply(reply), vec!["news", "politics", "europe"]);
    }

    #[test]
    fn test_select_tags_restricts_to_candidates() {
        let candidates = vec!["Rust".to_string(), "Databases".to_string()];
        let picked = select_tags(
            vec!["rust".into(), "cooking".into(), "RUST".into(), "databases".into()],
            AiTaggingMethod::Existing,
            &candidates,
        );
        assert_eq!(picked, vec!["Rust", "Databases"]);
    }

    #[test]
    fn test_select_tags_caps_generated() {
        let parsed = (0..10).map(|i| format!("Tag{i}")).collect();
        let picked = select_tags(parsed, AiTaggingMethod::Generate, &[]);
        assert_eq!(picked.len(), MAX_TAGS);
        assert_eq!(picked[0], "tag0");
    }

    #[test]
    fn test_provider_precedence() {
        let mut config = Config::for_testing();
        assert_eq!(TagProvider::from_config(&config), None);

        config.azure_api_key = Some("azure".into());
        assert_eq!(TagProvider::from_config(&config), None);

        config.openrouter_api_key = Some("router".into());
        assert!(matches!(
            TagProvider::from_config(&config),
            Some(TagProvider::OpenAiCompatible { ref base_url, .. }) if base_url == OPENROUTER_BASE_URL
        ));

        config.ollama_endpoint_url = Some("http://ollama:11434/".into());
        assert_eq!(
            TagProvider::from_config(&config),
            Some(TagProvider::Ollama {
                endpoint: "http://ollama:11434".into()
            })
        );
    }
}

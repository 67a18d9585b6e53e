//! Fallback tier: direct generative-model streaming endpoint.
//!
//! The same logical [`StreamRequest`] is reshaped into a role-tagged
//! `contents` list. The list starts with a synthesized system instruction
//! (assistant persona, user facts, the feature registry and how to emit
//! the feature marker) followed by a short model acknowledgement.
//!
//! The response is a streamed JSON array whose elements are each
//! terminated by `}\n`:
//!
//! ```text
//! [{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}
//! ,{"candidates":[{"content":{"parts":[{"text":"lo"}]}}]}
//! ]
//! ```

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{MuseError, Result};
use crate::features::FeatureId;
use crate::stream::assembler::Framing;
use crate::stream::message::{Role, StreamRequest};
use crate::stream::transport::{ByteStream, StreamTier, TierKind};

/// Acknowledgement placed after the synthesized instruction.
const INSTRUCTION_ACK: &str = "Understood. I'll follow these instructions.";

/// Fallback tier adapter.
pub struct ProviderTier {
    base_url: String,
    model: String,
    api_key: String,
    persona: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ProviderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTier")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderTier {
    /// Create a provider tier.
    pub fn new(config: &ProviderConfig, persona: &str) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            persona: persona.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Streaming URL with the API key as a query parameter.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?key={}",
            self.base_url,
            self.model,
            urlencoding::encode(&self.api_key)
        )
    }
}

/// Compose the system instruction sent ahead of the conversation.
pub fn system_instruction(persona: &str, request: &StreamRequest) -> String {
    let mut out = String::from(persona.trim());

    out.push_str("\n\nThe studio offers these features:\n");
    for feature in FeatureId::ALL {
        out.push_str(&format!("- {}: {}\n", feature.as_str(), feature.description()));
    }
    out.push_str(
        "\nWhen some of these features would help the user, end your reply with \
         FEATURES:[\"id\", ...] listing only ids from the list above. \
         Omit the marker when nothing applies.",
    );

    if !request.user_context.is_empty() {
        out.push_str("\n\nAbout the user:\n");
        for (key, value) in &request.user_context {
            out.push_str(&format!("- {key}: {value}\n"));
        }
    }

    for message in request.messages.iter().filter(|m| m.role == Role::System) {
        out.push_str("\n\n");
        out.push_str(message.content.trim());
    }

    out
}

/// Build the provider request body.
pub fn build_provider_request(persona: &str, request: &StreamRequest) -> serde_json::Value {
    let mut contents = vec![
        json!({"role": "user", "parts": [{"text": system_instruction(persona, request)}]}),
        json!({"role": "model", "parts": [{"text": INSTRUCTION_ACK}]}),
    ];
    contents.extend(request.messages.iter().filter_map(|m| {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "model",
            Role::System => return None,
        };
        Some(json!({"role": role, "parts": [{"text": m.content}]}))
    }));

    json!({
        "contents": contents,
        "generationConfig": {"temperature": request.temperature},
    })
}

/// Concatenated text of the first candidate's parts.
pub fn candidate_text(record: &serde_json::Value) -> Option<String> {
    let parts = record
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Some(text)
}

/// Extract an error message from a provider error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl StreamTier for ProviderTier {
    fn name(&self) -> &str {
        "provider"
    }

    fn kind(&self) -> TierKind {
        TierKind::Provider
    }

    fn framing(&self) -> Framing {
        Framing::Ndjson
    }

    fn record_text(&self, record: &serde_json::Value) -> Option<String> {
        if let Some(message) = record
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            debug!(error = message, "provider sent an in-band error record");
            return None;
        }
        candidate_text(record)
    }

    async fn send(&self, request: &StreamRequest) -> Result<ByteStream> {
        if self.api_key.is_empty() {
            return Err(MuseError::Config("provider API key is not set".into()));
        }
        let body = build_provider_request(&self.persona, request);

        debug!(
            request_id = request.request_id.as_str(),
            model = self.model.as_str(),
            "opening provider stream"
        );
        let response = self
            .client
            .post(self.stream_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| MuseError::Request(format!("provider request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MuseError::Status {
                status: status.as_u16(),
                body: extract_error_message(&text),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| MuseError::Stream(format!("provider read error: {e}"))));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::stream::message::ChatMessage;

    fn request() -> StreamRequest {
        StreamRequest::new(vec![
            ChatMessage::system("Keep answers short."),
            ChatMessage::user("hi"),
            ChatMessage::assistant("Hello!"),
            ChatMessage::user("make me a meme"),
        ])
        .with_context("FIRSTNAME", "Sam")
        .with_temperature(0.5)
    }

    #[test]
    fn instruction_lists_every_feature() {
        let text = system_instruction("You are Muse.", &request());
        assert!(text.starts_with("You are Muse."));
        for feature in FeatureId::ALL {
            assert!(text.contains(feature.as_str()), "missing {feature}");
        }
        assert!(text.contains("FEATURES:["));
        assert!(text.contains("FIRSTNAME: Sam"));
        assert!(text.contains("Keep answers short."));
    }

    #[test]
    fn request_contents_are_prefixed_and_role_mapped() {
        let body = build_provider_request("You are Muse.", &request());
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 5);
        assert_eq!(contents[0]["role"], "user");
        assert!(
            contents[0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .starts_with("You are Muse.")
        );
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "hi");
        assert_eq!(contents[3]["role"], "model");
        assert_eq!(contents[4]["parts"][0]["text"], "make me a meme");
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn candidate_text_joins_parts() {
        let record = json!({"candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]});
        assert_eq!(candidate_text(&record).as_deref(), Some("ab"));
        assert_eq!(candidate_text(&json!({"usageMetadata": {}})), None);
    }

    #[test]
    fn error_record_yields_no_text() {
        let tier = ProviderTier::new(&ProviderConfig::default(), "p");
        let record = json!({"error": {"message": "quota"}});
        assert_eq!(tier.record_text(&record), None);
    }

    #[test]
    fn stream_url_encodes_key() {
        let config = ProviderConfig {
            base_url: "https://api.test/".into(),
            model: "m1".into(),
            api_key: "a b&c".into(),
        };
        let tier = ProviderTier::new(&config, "p");
        assert_eq!(
            tier.stream_url(),
            "https://api.test/v1beta/models/m1:streamGenerateContent?key=a%20b%26c"
        );
    }

    #[test]
    fn extract_error_from_json() {
        let body = r#"{"error":{"message":"API key not valid"}}"#;
        assert_eq!(extract_error_message(body), "API key not valid");
        assert_eq!(extract_error_message("plain"), "plain");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_config_error() {
        let tier = ProviderTier::new(&ProviderConfig::default(), "p");
        let err = match tier.send(&request()).await {
            Err(e) => e,
            Ok(_) => panic!("send should fail without a key"),
        };
        assert_eq!(err.code(), "CONFIG_INVALID");
    }
}

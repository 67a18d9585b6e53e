//! Primary tier: the studio's gateway/edge chat-stream route.
//!
//! Request: `POST <url>` with JSON `{messages, userContext, temperature}`,
//! a bearer token, and an `X-Request-Id` header carrying the session's
//! request id. Response: a chunked plain-text body of assistant tokens,
//! optionally ending in a `FEATURES:[...]` trailer.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::{MuseError, Result};
use crate::stream::assembler::Framing;
use crate::stream::message::StreamRequest;
use crate::stream::transport::{ByteStream, StreamTier, TierKind};

/// Header carrying the per-session request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Gateway tier adapter.
pub struct GatewayTier {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for GatewayTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTier")
            .field("url", &self.url)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl GatewayTier {
    /// Create a gateway tier for `url`.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StreamTier for GatewayTier {
    fn name(&self) -> &str {
        "gateway"
    }

    fn kind(&self) -> TierKind {
        TierKind::Gateway
    }

    fn framing(&self) -> Framing {
        Framing::Text
    }

    async fn send(&self, request: &StreamRequest) -> Result<ByteStream> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(REQUEST_ID_HEADER, &request.request_id)
            .json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        debug!(
            request_id = request.request_id.as_str(),
            url = self.url.as_str(),
            "opening gateway stream"
        );
        let response = builder
            .send()
            .await
            .map_err(|e| MuseError::Request(format!("gateway request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MuseError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| MuseError::Stream(format!("gateway read error: {e}"))));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_debug_hides_token() {
        let tier = GatewayTier::new("https://edge.test/chat", Some("secret".into()));
        let debug = format!("{tier:?}");
        assert!(debug.contains("edge.test"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn gateway_is_text_framed_primary() {
        let tier = GatewayTier::new("https://edge.test/chat", None);
        assert_eq!(tier.kind(), TierKind::Gateway);
        assert_eq!(tier.framing(), Framing::Text);
    }
}

//! Two-tier streaming transport.
//!
//! [`StreamTransport`] opens a byte stream for a [`StreamRequest`]. The
//! primary (gateway) tier is tried first when configured; any transport
//! failure there (send error, non-success status, no readable body) moves
//! the request to the fallback (provider) tier. The fallback is attempted
//! at most once per `open_*` call sequence driven by one session.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{info, warn};

use crate::cancel::CancelHandle;
use crate::config::MuseConfig;
use crate::error::{MuseError, Result};
use crate::stream::assembler::Framing;
use crate::stream::gateway::GatewayTier;
use crate::stream::message::StreamRequest;
use crate::stream::provider::ProviderTier;

/// A boxed stream of raw body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Which backend path served a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    /// Gateway / edge endpoint.
    Gateway,
    /// Direct provider endpoint.
    Provider,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway => write!(f, "gateway"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// One backend path capable of streaming a chat reply.
#[async_trait]
pub trait StreamTier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Which tier this is.
    fn kind(&self) -> TierKind;

    /// How this tier frames its response body.
    fn framing(&self) -> Framing;

    /// Extract the display fragment carried by one JSON record.
    fn record_text(&self, record: &serde_json::Value) -> Option<String> {
        record
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_owned)
    }

    /// Send the request and return the response body as a byte stream.
    async fn send(&self, request: &StreamRequest) -> Result<ByteStream>;
}

/// A response body that stops yielding as soon as its handle is aborted.
pub struct TransportStream {
    tier: Arc<dyn StreamTier>,
    inner: ByteStream,
    cancel: CancelHandle,
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStream")
            .field("tier", &self.tier.name())
            .field("canceled", &self.cancel.is_canceled())
            .finish()
    }
}

impl TransportStream {
    /// Tier that produced this stream.
    pub fn tier(&self) -> TierKind {
        self.tier.kind()
    }

    /// Body framing of the producing tier.
    pub fn framing(&self) -> Framing {
        self.tier.framing()
    }

    /// Display fragment for a JSON record, per the producing tier.
    pub fn record_text(&self, record: &serde_json::Value) -> Option<String> {
        self.tier.record_text(record)
    }

    /// Stop delivering bytes. Chunks already buffered are discarded.
    pub fn abort(&self) {
        self.cancel.abort();
    }

    /// Next body chunk, or `None` at end of stream or after abort.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        if self.cancel.is_canceled() {
            return None;
        }
        let chunk = tokio::select! {
            biased;
            _ = self.cancel.canceled() => None,
            chunk = self.inner.next() => chunk,
        };
        if self.cancel.is_canceled() {
            return None;
        }
        chunk
    }
}

/// Primary-then-fallback transport.
pub struct StreamTransport {
    primary: Option<Arc<dyn StreamTier>>,
    fallback: Arc<dyn StreamTier>,
    /// Count of fallback activations (for observability).
    fallback_count: AtomicU32,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("primary", &self.primary.as_ref().map(|p| p.name().to_owned()))
            .field("fallback", &self.fallback.name())
            .field("fallback_count", &self.fallback_count())
            .finish()
    }
}

impl StreamTransport {
    /// Create a transport from explicit tiers. `primary = None` means the
    /// gateway is unconfigured and every request goes straight to `fallback`.
    pub fn new(primary: Option<Arc<dyn StreamTier>>, fallback: Arc<dyn StreamTier>) -> Self {
        Self {
            primary,
            fallback,
            fallback_count: AtomicU32::new(0),
        }
    }

    /// Build both tiers from configuration.
    pub fn from_config(config: &MuseConfig) -> Self {
        let primary = config.gateway.endpoint().map(|url| {
            Arc::new(GatewayTier::new(url, config.gateway.token.clone())) as Arc<dyn StreamTier>
        });
        let fallback: Arc<dyn StreamTier> =
            Arc::new(ProviderTier::new(&config.provider, &config.chat.persona));
        Self::new(primary, fallback)
    }

    /// Whether a primary tier is configured.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Number of times the fallback tier has been used.
    pub fn fallback_count(&self) -> u32 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    /// Open a stream, falling back to the secondary tier on primary failure.
    ///
    /// # Errors
    ///
    /// Returns the fallback tier's error when both tiers fail.
    pub async fn open(
        &self,
        request: &StreamRequest,
        cancel: &CancelHandle,
    ) -> Result<TransportStream> {
        match &self.primary {
            Some(primary) => match open_tier(primary, request, cancel).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(
                        request_id = request.request_id.as_str(),
                        primary = primary.name(),
                        fallback = self.fallback.name(),
                        error = %e,
                        "primary tier failed, falling back to provider"
                    );
                }
            },
            None => {
                info!(
                    request_id = request.request_id.as_str(),
                    "gateway unconfigured, using provider tier"
                );
            }
        }
        self.open_fallback(request, cancel).await
    }

    /// Open the fallback tier directly.
    ///
    /// # Errors
    ///
    /// Returns the tier's transport error.
    pub async fn open_fallback(
        &self,
        request: &StreamRequest,
        cancel: &CancelHandle,
    ) -> Result<TransportStream> {
        self.fallback_count.fetch_add(1, Ordering::Relaxed);
        open_tier(&self.fallback, request, cancel).await
    }
}

/// Send on one tier and wait for the first non-empty chunk, so a response
/// without a readable body counts as a failure of that tier.
async fn open_tier(
    tier: &Arc<dyn StreamTier>,
    request: &StreamRequest,
    cancel: &CancelHandle,
) -> Result<TransportStream> {
    let mut body = tier.send(request).await?;
    let first = loop {
        match body.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => break chunk,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(MuseError::EmptyBody(format!(
                    "{} returned no readable body",
                    tier.name()
                )));
            }
        }
    };
    let inner: ByteStream = Box::pin(futures_util::stream::once(async move { Ok(first) }).chain(body));
    Ok(TransportStream {
        tier: Arc::clone(tier),
        inner,
        cancel: cancel.clone(),
    })
}

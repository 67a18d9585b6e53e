//! Image/video generation with simulated progress.
//!
//! The status vocabulary is shown on a timer while a [`GenerationProvider`]
//! produces the real artifact.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::GenerationConfig;
use crate::error::{MuseError, Result};
use crate::features::FeatureId;
use crate::progress::{ProgressHandle, ProgressSimulator};

/// Status lines shown while an artifact is generated.
pub const GENERATION_PHASES: [&str; 5] = [
    "Analyzing your prompt...",
    "Composing the scene...",
    "Rendering details...",
    "Applying style...",
    "Finishing touches...",
];

/// Phase list for `feature`. Video renders get a longer run.
pub fn generation_phases(feature: FeatureId) -> Vec<String> {
    let mut phases: Vec<String> = GENERATION_PHASES.iter().map(|s| (*s).to_owned()).collect();
    if matches!(feature, FeatureId::Video | FeatureId::Gif) {
        phases.insert(3, "Animating frames...".to_owned());
    }
    phases
}

/// What to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub feature: FeatureId,
    pub prompt: String,
}

/// A produced artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedArtifact {
    /// Where the artifact can be fetched.
    pub url: String,
    /// Feature that produced it.
    #[serde(default = "default_feature")]
    pub feature: FeatureId,
}

fn default_feature() -> FeatureId {
    FeatureId::Image
}

/// A backend that turns a prompt into an artifact.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce an artifact for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedArtifact>;
}

/// JSON-over-HTTP generation backend.
///
/// `POST <endpoint>` with `{feature, prompt}`; expects `{url}` back.
pub struct HttpGenerationProvider {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpGenerationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerationProvider")
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpGenerationProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns [`MuseError::Config`] when no endpoint is configured.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| MuseError::Config("generation endpoint is not set".into()))?;
        Ok(Self::new(endpoint, config.api_key.clone()))
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedArtifact> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| MuseError::Request(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MuseError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut artifact: GeneratedArtifact = response
            .json()
            .await
            .map_err(|e| MuseError::Generation(format!("unreadable generation response: {e}")))?;
        if artifact.url.is_empty() {
            return Err(MuseError::Generation("generation response has no url".into()));
        }
        artifact.feature = request.feature;
        Ok(artifact)
    }
}

/// Start a generation run: phases on a timer, artifact from `provider`.
pub fn run_generation<P, C>(
    simulator: &ProgressSimulator,
    provider: Arc<dyn GenerationProvider>,
    request: GenerationRequest,
    on_phase: P,
    on_complete: C,
) -> ProgressHandle<Result<GeneratedArtifact>>
where
    P: FnMut(&str, u8) + Send + 'static,
    C: FnOnce(&Result<GeneratedArtifact>) + Send + 'static,
{
    let phases = generation_phases(request.feature);
    let job = async move {
        let result = provider.generate(&request).await;
        match &result {
            Ok(artifact) => info!(feature = %request.feature, url = artifact.url.as_str(), "artifact generated"),
            Err(e) => warn!(feature = %request.feature, error = %e, "generation failed"),
        }
        result
    };
    simulator.run(phases, on_phase, job, on_complete)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedProvider;

    #[async_trait]
    impl GenerationProvider for FixedProvider {
        async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedArtifact> {
            Ok(GeneratedArtifact {
                url: format!("https://cdn.test/{}.png", request.feature),
                feature: request.feature,
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl GenerationProvider for FailingProvider {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedArtifact> {
            Err(MuseError::Generation("model overloaded".into()))
        }
    }

    fn request(feature: FeatureId) -> GenerationRequest {
        GenerationRequest {
            feature,
            prompt: "a cat astronaut".into(),
        }
    }

    #[test]
    fn video_runs_have_an_extra_phase() {
        assert_eq!(generation_phases(FeatureId::Image).len(), 5);
        let video = generation_phases(FeatureId::Video);
        assert_eq!(video.len(), 6);
        assert_eq!(video[3], "Animating frames...");
    }

    #[test]
    fn from_config_requires_endpoint() {
        let err = HttpGenerationProvider::from_config(&GenerationConfig::default()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[tokio::test]
    async fn run_resolves_provider_artifact() {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&statuses);
        let handle = run_generation(
            &ProgressSimulator::new(Duration::from_millis(2)),
            Arc::new(FixedProvider),
            request(FeatureId::Meme),
            move |status, pct| s.lock().unwrap().push((status.to_owned(), pct)),
            |_| {},
        );
        let artifact = handle.wait().await.unwrap().unwrap();
        assert_eq!(artifact.url, "https://cdn.test/meme.png");
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.len(), 5);
        assert_eq!(statuses[0].0, GENERATION_PHASES[0]);
        assert_eq!(statuses[4].1, 100);
    }

    #[tokio::test]
    async fn provider_failure_is_delivered_to_completion() {
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let handle = run_generation(
            &ProgressSimulator::new(Duration::from_millis(1)),
            Arc::new(FailingProvider),
            request(FeatureId::Image),
            |_, _| {},
            move |result| *s.lock().unwrap() = Some(result.is_err()),
        );
        assert!(handle.wait().await.unwrap().is_err());
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }
}

//! Vision analysis - fans a file out to the configured providers and merges
//! what comes back into one TagSet.
//!
//! Provider failures never fail the file. A provider that errors or runs past
//! its deadline is skipped; if nothing answers the result is an empty,
//! degraded TagSet and the upload still goes ahead.

use async_trait::async_trait;
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

use crate::config::AnalysisMode;
use crate::models::{MediaType, TagSet};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("provider unavailable: {0:#}")]
    Unavailable(anyhow::Error),
}

impl ProviderError {
    /// Auth and quota problems do not fix themselves; someone has to look.
    pub fn needs_operator(&self) -> bool {
        matches!(self, ProviderError::Auth(_) | ProviderError::Quota(_))
    }
}

/// What a provider gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze_photo(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError>;

    async fn analyze_video(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError>;
}

pub struct AnalysisOrchestrator {
    providers: Vec<Arc<dyn VisionProvider>>,
    timeout: Duration,
    mode: AnalysisMode,
}

impl AnalysisOrchestrator {
    /// `providers` are in priority order, highest first.
    pub fn new(providers: Vec<Arc<dyn VisionProvider>>, timeout: Duration, mode: AnalysisMode) -> Self {
        Self {
            providers,
            timeout,
            mode,
        }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn analyze(&self, input: AnalysisInput<'_>, media_type: MediaType) -> TagSet {
        let mut answered = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let start = Instant::now();
            let call = match media_type {
                MediaType::Photo => provider.analyze_photo(input),
                MediaType::Video => provider.analyze_video(input),
            };

            match timeout(self.timeout, call).await {
                Ok(Ok(tags)) => {
                    debug!(
                        duration = &*format!("{:?}", start.elapsed());
                        "{} tagged {} with {} tags",
                        provider.name(),
                        input.name,
                        tags.len()
                    );
                    answered.push(tags);
                    if self.mode == AnalysisMode::FirstSuccess {
                        break;
                    }
                }
                Ok(Err(err)) if err.needs_operator() => {
                    error!("{} failed on {}: {}", provider.name(), input.name, err);
                }
                Ok(Err(err)) => {
                    warn!("{} failed on {}: {}", provider.name(), input.name, err);
                }
                Err(_) => {
                    warn!(
                        "{} timed out after {:?} on {}",
                        provider.name(),
                        self.timeout,
                        input.name
                    );
                }
            }
        }

        if answered.is_empty() {
            warn!("No vision provider answered for {}; continuing untagged", input.name);
            return TagSet::degraded();
        }

        TagSet::merge(answered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        tags: TagSet,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, tags: TagSet) -> Arc<Self> {
            Arc::new(Self {
                name,
                tags,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn analyze_photo(&self, _: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tags.clone())
        }

        async fn analyze_video(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
            self.analyze_photo(input).await
        }
    }

    struct Broken(ProviderError);

    #[async_trait]
    impl VisionProvider for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn analyze_photo(&self, _: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
            Err(match &self.0 {
                ProviderError::Auth(m) => ProviderError::Auth(m.clone()),
                ProviderError::Quota(m) => ProviderError::Quota(m.clone()),
                ProviderError::Unavailable(e) => ProviderError::Unavailable(anyhow::anyhow!("{e}")),
            })
        }

        async fn analyze_video(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
            self.analyze_photo(input).await
        }
    }

    struct Stalled;

    #[async_trait]
    impl VisionProvider for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn analyze_photo(&self, _: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(TagSet::new().with("late", 1.0, "stalled"))
        }

        async fn analyze_video(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
            self.analyze_photo(input).await
        }
    }

    const INPUT: AnalysisInput<'static> = AnalysisInput {
        name: "photo1.jpg",
        bytes: b"jpeg",
    };

    #[tokio::test]
    async fn merges_all_providers_by_confidence() {
        let a = Fixed::new("a", TagSet::new().with("finish", 0.9, "a").with("runner", 0.4, "a"));
        let b = Fixed::new("b", TagSet::new().with("finish", 0.95, "b").with("crowd", 0.3, "b"));
        let orchestrator = AnalysisOrchestrator::new(
            vec![a.clone() as Arc<dyn VisionProvider>, b.clone() as Arc<dyn VisionProvider>],
            Duration::from_secs(1),
            AnalysisMode::Merge,
        );

        let tags = orchestrator.analyze(INPUT, MediaType::Photo).await;

        assert!(!tags.degraded);
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.confidence("finish"), Some(0.95));
        assert_eq!(tags.get("finish").unwrap().source, "b");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_success_stops_early() {
        let a = Fixed::new("a", TagSet::new().with("finish", 0.9, "a"));
        let b = Fixed::new("b", TagSet::new().with("crowd", 0.3, "b"));
        let orchestrator = AnalysisOrchestrator::new(
            vec![
                Arc::new(Broken(ProviderError::Quota("daily limit".into()))) as Arc<dyn VisionProvider>,
                a.clone() as Arc<dyn VisionProvider>,
                b.clone() as Arc<dyn VisionProvider>,
            ],
            Duration::from_secs(1),
            AnalysisMode::FirstSuccess,
        );

        let tags = orchestrator.analyze(INPUT, MediaType::Video).await;

        assert_eq!(tags.len(), 1);
        assert!(tags.get("finish").is_some());
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_failing_providers_degrade_instead_of_failing() {
        let orchestrator = AnalysisOrchestrator::new(
            vec![
                Arc::new(Broken(ProviderError::Auth("bad key".into()))) as Arc<dyn VisionProvider>,
                Arc::new(Stalled) as Arc<dyn VisionProvider>,
            ],
            Duration::from_millis(50),
            AnalysisMode::Merge,
        );

        let tags = orchestrator.analyze(INPUT, MediaType::Photo).await;

        assert!(tags.is_empty());
        assert!(tags.degraded);
    }

    #[tokio::test]
    async fn a_provider_with_nothing_to_say_is_not_degraded() {
        let orchestrator = AnalysisOrchestrator::new(
            vec![Fixed::new("empty", TagSet::new()) as Arc<dyn VisionProvider>],
            Duration::from_secs(1),
            AnalysisMode::Merge,
        );

        let tags = orchestrator.analyze(INPUT, MediaType::Photo).await;

        assert!(tags.is_empty());
        assert!(!tags.degraded);
    }
}

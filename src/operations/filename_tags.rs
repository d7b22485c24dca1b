use async_trait::async_trait;

use crate::models::TagSet;
use crate::workflow::processors::analysis::{AnalysisInput, ProviderError, VisionProvider};

pub const PROVIDER: &str = "filename";

/// Tags read off the capture's file name: the name itself and, when one of the
/// course keywords appears in it, where the shot was taken.
pub struct FilenameTagger {
    locations: Vec<String>,
}

impl FilenameTagger {
    pub fn new(locations: &[String]) -> Self {
        Self {
            locations: locations.iter().map(|l| l.to_lowercase()).collect(),
        }
    }

    fn tag(&self, name: &str) -> TagSet {
        let lowered = name.to_lowercase();
        let tags = TagSet::new().with_value("filename", name, 1.0, PROVIDER);
        // Several keywords: the one listed last wins.
        match self.locations.iter().rev().find(|l| lowered.contains(l.as_str())) {
            Some(location) => tags.with_value("location", location.as_str(), 1.0, PROVIDER),
            None => tags,
        }
    }
}

#[async_trait]
impl VisionProvider for FilenameTagger {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze_photo(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
        Ok(self.tag(input.name))
    }

    async fn analyze_video(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
        Ok(self.tag(input.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DEFAULT_LOCATION_TAGS;

    fn tagger() -> FilenameTagger {
        let locations: Vec<String> = DEFAULT_LOCATION_TAGS.iter().map(|s| s.to_string()).collect();
        FilenameTagger::new(&locations)
    }

    #[tokio::test]
    async fn location_comes_from_the_name() {
        let input = AnalysisInput {
            name: "Finish_8168.JPG",
            bytes: b"",
        };
        let tags = tagger().analyze_photo(input).await.unwrap();

        assert_eq!(tags.get("location").unwrap().value.as_deref(), Some("finish"));
        assert_eq!(tags.get("filename").unwrap().value.as_deref(), Some("Finish_8168.JPG"));
    }

    #[tokio::test]
    async fn later_keywords_win_when_several_match() {
        let input = AnalysisInput {
            name: "start_finish.jpg",
            bytes: b"",
        };
        let tags = tagger().analyze_photo(input).await.unwrap();

        assert_eq!(tags.get("location").unwrap().value.as_deref(), Some("finish"));
    }

    #[tokio::test]
    async fn names_without_keywords_only_carry_the_name() {
        let input = AnalysisInput {
            name: "J15test1.mp4",
            bytes: b"",
        };
        let tags = tagger().analyze_video(input).await.unwrap();

        assert_eq!(tags.len(), 1);
        assert!(tags.get("location").is_none());
    }
}

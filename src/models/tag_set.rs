use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Name of the provider that produced the tag.
    #[serde(default)]
    pub source: String,
}

/// Tags produced by vision analysis, keyed by tag name.
///
/// Keys are unique and iterate in name order, so the serialized metadata is
/// stable for the same inputs. `degraded` is set when every provider failed
/// and the set is empty for that reason rather than because nothing was found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagSet {
    pub tags: BTreeMap<String, Tag>,
    #[serde(default)]
    pub degraded: bool,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn degraded() -> Self {
        Self {
            tags: BTreeMap::new(),
            degraded: true,
        }
    }

    /// Insert a tag, keeping the existing entry if it is at least as confident.
    pub fn insert(&mut self, name: impl Into<String>, tag: Tag) {
        let name = name.into();
        match self.tags.get(&name) {
            Some(existing) if existing.confidence >= tag.confidence => {}
            _ => {
                self.tags.insert(name, tag);
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, confidence: f32, source: &str) -> Self {
        self.insert(
            name,
            Tag {
                confidence,
                value: None,
                source: source.to_string(),
            },
        );
        self
    }

    pub fn with_value(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        confidence: f32,
        source: &str,
    ) -> Self {
        self.insert(
            name,
            Tag {
                confidence,
                value: Some(value.into()),
                source: source.to_string(),
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    pub fn confidence(&self, name: &str) -> Option<f32> {
        self.tags.get(name).map(|t| t.confidence)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Merge provider results given in priority order (highest first).
    ///
    /// For a duplicated key the most confident tag wins; equal confidence goes
    /// to the higher-priority provider. Candidates are sorted into a total
    /// order first, so the outcome never depends on hash or arrival order.
    pub fn merge<I>(ranked: I) -> TagSet
    where
        I: IntoIterator<Item = TagSet>,
    {
        let mut candidates: Vec<(String, usize, Tag)> = ranked
            .into_iter()
            .enumerate()
            .flat_map(|(priority, set)| {
                set.tags
                    .into_iter()
                    .map(move |(name, tag)| (name, priority, tag))
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.2.confidence.total_cmp(&a.2.confidence))
                .then(a.1.cmp(&b.1))
        });

        let mut tags = BTreeMap::new();
        for (name, _, tag) in candidates {
            tags.entry(name).or_insert(tag);
        }

        TagSet {
            tags,
            degraded: false,
        }
    }
}

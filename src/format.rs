use crate::ranker::ScoredCandidate;
use serde::{Deserialize, Serialize};

/// Maps an identity key to the image shown for it.
pub trait PathResolver {
    fn resolve(&self, key: &str) -> String;
}

impl<F> PathResolver for F
where
    F: Fn(&str) -> String,
{
    fn resolve(&self, key: &str) -> String {
        self(key)
    }
}

/// `<prefix>/<key>/<image_dir>/<key><suffix>`, always `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub prefix: String,
    pub image_dir: String,
    pub suffix: String,
}

impl PathResolver for ImageLayout {
    fn resolve(&self, key: &str) -> String {
        let file = format!("{}{}", key, self.suffix);
        [
            self.prefix.trim_end_matches(['/', '\\']),
            key,
            self.image_dir.as_str(),
            file.as_str(),
        ]
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
        .replace('\\', "/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub key: String,
    pub file: String,
    pub similarity: f32,
}

/// Attach display paths to ranked candidates, keeping their order.
pub fn format<R>(candidates: &[ScoredCandidate], resolver: &R) -> Vec<MatchRecord>
where
    R: PathResolver + ?Sized,
{
    candidates
        .iter()
        .map(|c| MatchRecord {
            key: c.key.clone(),
            file: resolver.resolve(&c.key),
            similarity: c.similarity,
        })
        .collect()
}

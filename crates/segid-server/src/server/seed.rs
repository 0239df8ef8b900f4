//! Initial allocation rows for the in-memory store.

use anyhow::Context;
use core::str::FromStr;
use segid::{FileStore, MemoryStore};
use serde::Deserialize;
use std::path::Path;

/// One allocation row to seed the store with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagSeed {
    pub tag: String,
    #[serde(default)]
    pub max_id: i64,
    pub step: i32,
}

impl FromStr for TagSeed {
    type Err = String;

    /// Parses `tag:max_id:step`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let (Some(tag), Some(max_id), Some(step), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected `tag:max_id:step`, got `{s}`"));
        };
        if tag.is_empty() {
            return Err(format!("empty tag in `{s}`"));
        }
        let max_id = max_id
            .parse()
            .map_err(|e| format!("invalid max_id in `{s}`: {e}"))?;
        let step: i32 = step
            .parse()
            .map_err(|e| format!("invalid step in `{s}`: {e}"))?;
        if step <= 0 {
            return Err(format!("step must be positive in `{s}`"));
        }
        Ok(Self {
            tag: tag.to_owned(),
            max_id,
            step,
        })
    }
}

/// Reads a JSON array of [`TagSeed`]s.
pub fn read_seed_file(path: &Path) -> anyhow::Result<Vec<TagSeed>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    parse_seeds(&raw).with_context(|| format!("invalid seed file {}", path.display()))
}

fn parse_seeds(raw: &str) -> anyhow::Result<Vec<TagSeed>> {
    let seeds: Vec<TagSeed> = serde_json::from_str(raw)?;
    if let Some(seed) = seeds.iter().find(|s| s.step <= 0) {
        anyhow::bail!("step must be positive for tag `{}`", seed.tag);
    }
    Ok(seeds)
}

/// Builds the store from seeds; later seeds replace earlier ones for the
/// same tag.
pub fn build_store(seeds: impl IntoIterator<Item = TagSeed>) -> MemoryStore {
    let store = MemoryStore::new();
    for seed in seeds {
        store.insert(seed.tag, seed.max_id, seed.step);
    }
    store
}

/// Opens the durable store at `path` and adds the seeds it does not know
/// yet. Rows already on disk keep their counters.
pub fn open_file_store(
    path: &Path,
    seeds: impl IntoIterator<Item = TagSeed>,
) -> anyhow::Result<FileStore> {
    let store = FileStore::open(path)?;
    for seed in seeds {
        let _inserted = store.insert_if_absent(seed.tag.as_str(), seed.max_id, seed.step)?;
        #[cfg(feature = "tracing")]
        if !_inserted {
            tracing::debug!(tag = seed.tag.as_str(), "Seed skipped, row already persisted");
        }
    }
    Ok(store)
}

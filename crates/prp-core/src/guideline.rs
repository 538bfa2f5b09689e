//! Guideline corpus: reference text keyed by signal code or code family.
//!
//! A family is the lower-cased code, so `[BB]`, `[Bb]` and `[bb]` all fall
//! back to the `bb` guideline when no exact entry exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::cache::BoundedCache;
use crate::error::{PrpError, Result};
use crate::inspector::rules;
use crate::signal::validate_signal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub code: String,
    pub text: String,
}

pub fn family_of(code: &str) -> String {
    code.to_lowercase()
}

// ---------------------------------------------------------------------------
// GuidelineLoader
// ---------------------------------------------------------------------------

/// Where a worker loads its corpus from. Cloned into every worker at startup.
#[derive(Debug, Clone, Default)]
pub enum GuidelineLoader {
    /// One guideline per family in the classification rule table.
    #[default]
    Builtin,
    Inline(Vec<Guideline>),
    /// `<code>.md` files; the file stem is the code.
    Directory(PathBuf),
}

impl GuidelineLoader {
    pub fn load(&self) -> Result<Vec<Guideline>> {
        match self {
            GuidelineLoader::Builtin => Ok(builtin_guidelines()),
            GuidelineLoader::Inline(items) => Ok(items.clone()),
            GuidelineLoader::Directory(dir) => load_dir(dir),
        }
    }
}

fn builtin_guidelines() -> Vec<Guideline> {
    let mut out: Vec<Guideline> = Vec::new();
    for rule in rules::RULES {
        let family = family_of(rule.code);
        if out.iter().any(|g| g.code == family) {
            continue;
        }
        out.push(Guideline {
            code: family,
            text: format!(
                "[{}] {} ({}): {}",
                rule.code,
                rule.subcategory.replace('_', " "),
                rule.category,
                rule.intent
            ),
        });
    }
    out
}

fn load_dir(dir: &Path) -> Result<Vec<Guideline>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(code) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !validate_signal(code) {
            tracing::debug!(path = %path.display(), "ignoring guideline with invalid code");
            continue;
        }
        out.push(Guideline {
            code: code.to_string(),
            text: std::fs::read_to_string(&path)?,
        });
    }
    if out.is_empty() {
        return Err(PrpError::Initialization {
            worker: "guideline loader".into(),
            reason: format!("no guidelines found in {}", dir.display()),
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// GuidelineStore
// ---------------------------------------------------------------------------

/// Worker-local guideline store. Never shared across workers.
///
/// The loaded corpus is authoritative; the bounded cache only fronts hot
/// lookups, so a corpus larger than the cache capacity loses nothing.
pub struct GuidelineStore {
    loader: GuidelineLoader,
    corpus: HashMap<String, Guideline>,
    cache: BoundedCache<String, Guideline>,
    loaded_at: Instant,
}

impl GuidelineStore {
    pub fn open(loader: GuidelineLoader, capacity: usize, ttl: Duration) -> Result<Self> {
        let mut store = Self {
            loader,
            corpus: HashMap::new(),
            cache: BoundedCache::new(capacity, ttl),
            loaded_at: Instant::now(),
        };
        store.refresh()?;
        Ok(store)
    }

    fn refresh(&mut self) -> Result<()> {
        let items = self.loader.load()?;
        self.corpus = items.into_iter().map(|g| (g.code.clone(), g)).collect();
        let purged = self.cache.purge_expired();
        self.loaded_at = Instant::now();
        tracing::debug!(guidelines = self.corpus.len(), purged, "guideline corpus loaded");
        Ok(())
    }

    /// Exact code first, then family. The corpus is reloaded at most once
    /// per TTL window; a failed reload keeps the previous corpus.
    pub fn lookup(&mut self, code: &str) -> Option<Guideline> {
        if let Some(g) = self.cache.get(code) {
            return Some(g.clone());
        }
        if self.loaded_at.elapsed() > self.cache.ttl() {
            if let Err(e) = self.refresh() {
                tracing::warn!("guideline reload failed: {e}");
                self.loaded_at = Instant::now();
            }
        }
        let found = self
            .corpus
            .get(code)
            .or_else(|| self.corpus.get(&family_of(code)))?
            .clone();
        self.cache.set(code.to_string(), found.clone());
        Some(found)
    }

    /// Guidelines in the loaded corpus.
    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn release(&mut self) {
        self.corpus.clear();
        self.cache.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

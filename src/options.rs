//! Controlled vocabularies: free text → one of a fixed set of values.
//!
//! Each vocabulary is an alias table on disk,
//!   {"version": 3, "aliases": {"花": ["花期", "flower", "fl."]}}
//! Older files are a bare `{"花": [...]}` map and are read as version 0.
//! Confirming a new variant rewrites the whole file atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cleaned::{Cleaned, Column, map_column};
use crate::error::{CleanError, Result};

/// Case and whitespace do not distinguish values.
fn fold(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasTable {
    pub version: u64,
    /// Canonical value → known variants.
    pub aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AliasFile {
    Versioned(AliasTable),
    Legacy(BTreeMap<String, Vec<String>>),
}

impl From<AliasFile> for AliasTable {
    fn from(file: AliasFile) -> Self {
        match file {
            AliasFile::Versioned(table) => table,
            AliasFile::Legacy(aliases) => AliasTable {
                version: 0,
                aliases,
            },
        }
    }
}

impl AliasTable {
    pub fn from_json(text: &str) -> Result<Self> {
        let file: AliasFile = serde_json::from_str(text)?;
        Ok(file.into())
    }

    /// The canonical value `text` stands for, if known.
    pub fn canonical_for(&self, text: &str) -> Option<&str> {
        let key = fold(text);
        self.aliases
            .iter()
            .find(|(canonical, variants)| {
                fold(canonical) == key || variants.iter().any(|v| fold(v) == key)
            })
            .map(|(canonical, _)| canonical.as_str())
    }

    /// Record `variant` under `canonical`. Returns false if already known.
    pub fn add_alias(&mut self, canonical: &str, variant: &str) -> bool {
        let variants = self.aliases.entry(canonical.to_string()).or_default();
        if fold(canonical) == fold(variant) || variants.iter().any(|v| fold(v) == fold(variant)) {
            return false;
        }
        variants.push(variant.to_string());
        true
    }
}

// ── Store ────────────────────────────────────────────────────────────────

/// File-backed alias table with a read-modify-write contract.
#[derive(Debug, Clone)]
pub struct AliasStore {
    path: PathBuf,
}

impl AliasStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as an empty table.
    pub fn read(&self) -> Result<AliasTable> {
        match fs::read_to_string(&self.path) {
            Ok(text) => AliasTable::from_json(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AliasTable::default()),
            Err(source) => Err(CleanError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Apply `change` to the table on disk, provided nobody else has
    /// written since `expected_version` was read.
    pub fn update<F>(&self, expected_version: u64, change: F) -> Result<AliasTable>
    where
        F: FnOnce(&mut AliasTable),
    {
        let mut table = self.read()?;
        if table.version != expected_version {
            return Err(CleanError::AliasConflict {
                path: self.path.clone(),
                expected: expected_version,
                found: table.version,
            });
        }
        change(&mut table);
        table.version += 1;

        let write_err = |source: io::Error| CleanError::Write {
            path: self.path.clone(),
            source,
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&table)?).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        info!(path = %self.path.display(), version = table.version, "alias table written");
        Ok(table)
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────

pub struct OptionResolver {
    name: String,
    table: AliasTable,
    store: Option<AliasStore>,
}

impl OptionResolver {
    /// In-memory vocabulary; confirmations are not persisted.
    pub fn new(name: &str, table: AliasTable) -> Self {
        Self {
            name: name.to_string(),
            table,
            store: None,
        }
    }

    pub fn from_store(name: &str, store: AliasStore) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            table: store.read()?,
            store: Some(store),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &AliasTable {
        &self.table
    }

    pub fn resolve(&self, text: &str) -> Option<Cleaned<String>> {
        if text.trim().is_empty() {
            return None;
        }
        Some(match self.table.canonical_for(text) {
            Some(canonical) => Cleaned::Ok(canonical.to_string()),
            None => {
                debug!(vocabulary = %self.name, input = text, "value not in vocabulary");
                Cleaned::NeedsReview(text.to_string())
            }
        })
    }

    /// Closest canonical values for a human reviewer, best first.
    pub fn suggest(&self, text: &str, limit: usize) -> Vec<(String, f64)> {
        let key = fold(text);
        let mut scored: Vec<(String, f64)> = self
            .table
            .aliases
            .iter()
            .map(|(canonical, variants)| {
                let best = std::iter::once(canonical)
                    .chain(variants)
                    .map(|v| strsim::normalized_levenshtein(&key, &fold(v)))
                    .fold(0.0, f64::max);
                (canonical.clone(), best)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }

    /// Accept a human decision that `variant` means `canonical`.
    pub fn confirm(&mut self, canonical: &str, variant: &str) -> Result<()> {
        match &self.store {
            Some(store) => {
                self.table = store.update(self.table.version, |t| {
                    t.add_alias(canonical, variant);
                })?;
            }
            None => {
                self.table.add_alias(canonical, variant);
            }
        }
        Ok(())
    }

    pub fn resolve_column(&self, column: &Column) -> Vec<Option<Cleaned<String>>> {
        map_column(column, |text| self.resolve(text))
    }
}

/// Every vocabulary in a directory, keyed by file stem.
#[derive(Default)]
pub struct Vocabularies {
    resolvers: BTreeMap<String, OptionResolver>,
}

impl Vocabularies {
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut resolvers = BTreeMap::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let resolver = OptionResolver::from_store(stem, AliasStore::new(path))?;
            resolvers.insert(stem.to_string(), resolver);
        }
        info!(dir = %dir.display(), count = resolvers.len(), "vocabularies loaded");
        Ok(Self { resolvers })
    }

    pub fn insert(&mut self, resolver: OptionResolver) {
        self.resolvers.insert(resolver.name.clone(), resolver);
    }

    pub fn get(&self, name: &str) -> Result<&OptionResolver> {
        self.resolvers
            .get(name)
            .ok_or_else(|| CleanError::UnknownAliasTable(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut OptionResolver> {
        self.resolvers
            .get_mut(name)
            .ok_or_else(|| CleanError::UnknownAliasTable(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(String::as_str)
    }
}

//! Scientific names: offline splitting and online reconciliation.

pub mod authors;
pub mod reconcile;
pub mod service;
pub mod split;

use specimen_types::{BestMatch, SplitTaxonName};
use tracing::debug;

use crate::cleaned::{Cells, Cleaned, Column, map_column};

pub use authors::{best_match, get_author_team};
pub use reconcile::Reconciler;
pub use service::{HttpNameService, NameService, ServiceKind};
pub use split::split;

/// The cleaned name as written back to a table: name, author, family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRecord {
    pub name: String,
    pub author: String,
    pub family: Option<String>,
}

impl From<&SplitTaxonName> for TaxonRecord {
    fn from(split: &SplitTaxonName) -> Self {
        Self {
            name: split.simple_name(),
            author: split.author.clone(),
            family: None,
        }
    }
}

impl From<&BestMatch> for TaxonRecord {
    fn from(best: &BestMatch) -> Self {
        Self {
            name: best.candidate.name.clone(),
            author: best.candidate.author.clone(),
            family: best.candidate.family.clone(),
        }
    }
}

impl Cells for TaxonRecord {
    const WIDTH: usize = 3;
    fn cells(&self) -> Vec<Option<String>> {
        vec![
            Some(self.name.clone()),
            (!self.author.is_empty()).then(|| self.author.clone()),
            self.family.clone(),
        ]
    }
}

/// Grammar-only cleaning, no network.
pub fn resolve_offline(text: &str) -> Option<Cleaned<TaxonRecord>> {
    if text.trim().is_empty() {
        return None;
    }
    Some(match split(text) {
        Some(name) => Cleaned::Ok(TaxonRecord::from(&name)),
        None => {
            debug!(input = text, "scientific name not parseable");
            Cleaned::NeedsReview(text.to_string())
        }
    })
}

pub fn resolve_offline_column(column: &Column) -> Vec<Option<Cleaned<TaxonRecord>>> {
    map_column(column, resolve_offline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_record_cells() {
        let Some(Cleaned::Ok(rec)) = resolve_offline("Poa annua L.") else {
            panic!("expected a clean record");
        };
        assert_eq!(
            rec.cells(),
            vec![Some("Poa annua".to_string()), Some("L.".to_string()), None]
        );
        assert_eq!(
            resolve_offline("poa"),
            Some(Cleaned::NeedsReview("poa".into()))
        );
        assert_eq!(resolve_offline(""), None);
    }
}

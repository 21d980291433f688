//! Offline decomposition of handwritten scientific names.

use std::sync::LazyLock;

use regex::Regex;
use specimen_types::{SplitTaxonName, TaxonRank};

// Saxifraga rufescens Bal f. f. var. uninervata J. T. Pan
// Mentha × piperita L.
// × Cupressocyparis leylandii (Dallim. & A. B. Jacks.) Dallim.
static RE_GENUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<pre>×\s*|[xX]\s+)?(?P<genus>[A-Z][a-zë\-]+)(?:\s+(?P<hybrid>×\s*|[xX]\s+)?(?P<species>[a-z][a-zë\-]+))?(?P<tail>.*)$",
    )
    .unwrap()
});

// <species author> var. uninervata <infra author>
// The species author may itself end in a rank-like token (Hook. f. et
// Thoms.), so every marker position is tried until the epithet is real.
static RE_INFRA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)(?P<rank>subvar|var|subsp|ssp|subf|forma|form|fo|f|nothosp|nothovar|cultivar|cv)\.?\s+(?P<epithet>[a-z][a-zë\-]+)(?:\s+|$)",
    )
    .unwrap()
});

/// Lowercase words the genus pattern can mistake for a species epithet.
const NOT_EPITHETS: &[&str] = &[
    "var", "subvar", "subsp", "ssp", "subf", "f", "fo", "form", "forma", "cv", "cultivar", "sp",
    "spp", "ex", "et", "in", "de", "van", "von", "der", "du", "la",
];

/// Conserved family names without the -aceae ending.
const FAMILY_EXCEPTIONS: &[&str] = &[
    "Compositae",
    "Cruciferae",
    "Gramineae",
    "Guttiferae",
    "Labiatae",
    "Leguminosae",
    "Palmae",
    "Umbelliferae",
];

pub fn is_family_name(word: &str) -> bool {
    word.ends_with("aceae") || FAMILY_EXCEPTIONS.contains(&word)
}

/// `ssp` → `subsp.`, `forma` → `f.` and so on.
fn canonical_rank(rank: &str) -> String {
    let rank = match rank {
        "ssp" => "subsp",
        "fo" | "form" | "forma" => "f",
        "cultivar" => "cv",
        other => other,
    };
    format!("{rank}.")
}

fn tidy(author: &str) -> String {
    author.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a raw name into genus, species, infraspecific part and authors.
/// Returns `None` when no capitalized genus can be found.
pub fn split(raw: &str) -> Option<SplitTaxonName> {
    let caps = RE_GENUS.captures(raw)?;
    let genus_word = caps.name("genus")?.as_str();
    let genus = match caps.name("pre") {
        Some(_) => format!("×{genus_word}"),
        None => genus_word.to_string(),
    };

    let mut hybrid_marker = caps.name("hybrid").map(|_| '×');
    let mut species = caps.name("species").map(|m| m.as_str().to_string());
    let mut tail = caps.name("tail").map_or("", |m| m.as_str()).to_string();
    if let Some(sp) = &species
        && NOT_EPITHETS.contains(&sp.as_str())
    {
        // hand the word back to the tail; it starts an author or rank
        let start = caps.name("species").map_or(0, |m| m.start());
        tail = match sp.as_str() {
            // Rosa sp. names the genus only
            "sp" | "spp" => raw[start + sp.len()..].trim_start_matches('.').to_string(),
            _ => raw[start..].to_string(),
        };
        species = None;
        hybrid_marker = None;
    }

    let mut name = SplitTaxonName {
        genus,
        hybrid_marker,
        species: species.clone(),
        infraspecific_rank: None,
        infraspecific_epithet: None,
        author: String::new(),
        first_epithet_author: None,
        rank: TaxonRank::Species,
        raw_input: raw.to_string(),
    };

    let Some(species) = species else {
        name.author = tidy(&tail);
        name.rank = if is_family_name(genus_word) {
            TaxonRank::Family
        } else {
            TaxonRank::Genus
        };
        return Some(name);
    };

    let mut pos = 0;
    while let Some(infra) = RE_INFRA.captures_at(&tail, pos) {
        let (Some(whole), Some(rank), Some(epithet)) =
            (infra.get(0), infra.name("rank"), infra.name("epithet"))
        else {
            break;
        };
        if NOT_EPITHETS.contains(&epithet.as_str()) {
            pos = rank.end();
            continue;
        }
        let sp_author = tidy(&tail[..whole.start()]);
        let author = tidy(&tail[epithet.end()..]);
        if epithet.as_str() == species {
            // autonym: Poa annua L. var. annua
            name.author = if sp_author.is_empty() { author } else { sp_author };
        } else {
            name.infraspecific_rank = Some(canonical_rank(rank.as_str()));
            name.infraspecific_epithet = Some(epithet.as_str().to_string());
            name.first_epithet_author = (!sp_author.is_empty()).then_some(sp_author);
            name.author = author;
            name.rank = TaxonRank::Infraspecific;
        }
        return Some(name);
    }

    // autonym written without a rank marker: Poa annua annua
    let trimmed = tail.trim_start();
    let first = trimmed.split_whitespace().next();
    name.author = if first == Some(species.as_str()) {
        tidy(&trimmed[species.len()..])
    } else {
        tidy(&tail)
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infraspecific_with_two_authors() {
        let n = split("Saxifraga rufescens Bal f. f. var. uninervata J. T. Pan").unwrap();
        assert_eq!(n.genus, "Saxifraga");
        assert_eq!(n.species.as_deref(), Some("rufescens"));
        assert_eq!(n.infraspecific_rank.as_deref(), Some("var."));
        assert_eq!(n.infraspecific_epithet.as_deref(), Some("uninervata"));
        assert_eq!(n.first_epithet_author.as_deref(), Some("Bal f. f."));
        assert_eq!(n.author, "J. T. Pan");
        assert_eq!(n.rank, TaxonRank::Infraspecific);
    }

    #[test]
    fn test_autonym_collapses_to_species() {
        let n = split("Poa annua annua").unwrap();
        assert_eq!(n.rank, TaxonRank::Species);
        assert_eq!(n.species.as_deref(), Some("annua"));
        assert_eq!(n.infraspecific_rank, None);
        assert_eq!(n.infraspecific_epithet, None);
        assert_eq!(n.author, "");

        let n = split("Poa annua L. var. annua").unwrap();
        assert_eq!(n.rank, TaxonRank::Species);
        assert_eq!(n.author, "L.");
        assert_eq!(n.simple_name(), "Poa annua");
    }

    #[test]
    fn test_rank_markers_are_canonical() {
        let n = split("Prunus mume ssp. pallens Chen").unwrap();
        assert_eq!(n.infraspecific_rank.as_deref(), Some("subsp."));
        assert_eq!(n.first_epithet_author, None);
        let n = split("Rosa chinensis forma spontanea (Rehd. & Wils.) Yu & Ku").unwrap();
        assert_eq!(n.infraspecific_rank.as_deref(), Some("f."));
        assert_eq!(n.author, "(Rehd. & Wils.) Yu & Ku");
    }

    #[test]
    fn test_species_author_only() {
        let n = split("Rhododendron   delavayi  Franch.").unwrap();
        assert_eq!(n.rank, TaxonRank::Species);
        assert_eq!(n.author, "Franch.");
        assert_eq!(n.full_name(), "Rhododendron delavayi Franch.");
    }

    #[test]
    fn test_filius_is_not_a_form() {
        let n = split("Magnolia campbellii Hook. f. et Thoms.").unwrap();
        assert_eq!(n.rank, TaxonRank::Species);
        assert_eq!(n.infraspecific_rank, None);
        assert_eq!(n.infraspecific_epithet, None);
        assert_eq!(n.first_epithet_author, None);
        assert_eq!(n.author, "Hook. f. et Thoms.");

        let n = split("Rhododendron arboreum Sm. f. ex Hook. var. roseum Lindl.").unwrap();
        assert_eq!(n.infraspecific_rank.as_deref(), Some("var."));
        assert_eq!(n.infraspecific_epithet.as_deref(), Some("roseum"));
        assert_eq!(n.first_epithet_author.as_deref(), Some("Sm. f. ex Hook."));
        assert_eq!(n.author, "Lindl.");
    }

    #[test]
    fn test_hybrids() {
        let n = split("Mentha × piperita L.").unwrap();
        assert_eq!(n.hybrid_marker, Some('×'));
        assert_eq!(n.simple_name(), "Mentha × piperita");
        let n = split("Mentha x piperita L.").unwrap();
        assert_eq!(n.hybrid_marker, Some('×'));
        let n = split("Mentha xanthina").unwrap();
        assert_eq!(n.hybrid_marker, None);
        assert_eq!(n.species.as_deref(), Some("xanthina"));
    }

    #[test]
    fn test_family_and_genus_ranks() {
        assert_eq!(split("Rosaceae").unwrap().rank, TaxonRank::Family);
        assert_eq!(split("Compositae").unwrap().rank, TaxonRank::Family);
        let n = split("Poa L.").unwrap();
        assert_eq!(n.rank, TaxonRank::Genus);
        assert_eq!(n.author, "L.");
        let n = split("Rosa sp.").unwrap();
        assert_eq!(n.rank, TaxonRank::Genus);
        assert_eq!(n.species, None);
        assert_eq!(n.author, "");
    }

    #[test]
    fn test_unparseable() {
        assert!(split("unknown").is_none());
        assert!(split("").is_none());
        assert!(split("菊科").is_none());
    }
}

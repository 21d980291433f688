//! Author-team extraction and fuzzy comparison.
//!
//! Author strings are segmented with layered regexes: groups of four names
//! joined by `&`, `,`, `et` or `ex` are consumed first, then groups of
//! three, two and finally single names. Whatever a layer matches is
//! blanked out so later layers cannot split it again.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use specimen_types::{AuthorTeam, BestMatch, NameCandidate};

/// One author: optional initials, an optional particle, a surname that may
/// be hyphenated after an abbreviation, and up to two `f.`/`fil.` suffixes.
///   J. T. Pan / Hand.-Mazz. / Hook. f. / Bal f. f. / de Wit
const NAME: &str = r"(?:[A-Z]\.\s?){0,3}(?:(?:de|van|von|der|du|la|le)\s)*[A-Z][\p{L}'\-]*(?:\.-[A-Z][\p{L}'\-]*)*\.?(?:\s(?:f|fil)\.){0,2}";

const SEP: &str = r"\s*(?:&|,|\bet\b|\bex\b)\s*";

static RE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(NAME).unwrap());

/// Group patterns, longest first.
static RE_GROUPS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    (1..=4)
        .rev()
        .map(|n| {
            let mut pattern = NAME.to_string();
            for _ in 1..n {
                pattern.push_str(SEP);
                pattern.push_str(NAME);
            }
            Regex::new(&pattern).unwrap()
        })
        .collect()
});

// (Wall.) Hook. f. et Thoms.
static RE_BASIONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\((?P<basionym>[^)]*)\)\s*(?P<rest>.*)$").unwrap());

// Hand.-Mazz. in Diels
static RE_IN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+in\s+").unwrap());

const PARTICLES: &[&str] = &["de", "van", "von", "der", "du", "la", "le"];

/// Individual authors of one author string, in reading order.
pub fn extract_authors(text: &str) -> Vec<String> {
    let mut work = text.to_string();
    let mut found: Vec<(usize, Vec<String>)> = Vec::new();
    for re in RE_GROUPS.iter() {
        let spans: Vec<(usize, usize)> = re.find_iter(&work).map(|m| (m.start(), m.end())).collect();
        for (start, end) in spans {
            let names = RE_NAME
                .find_iter(&work[start..end])
                .map(|m| m.as_str().trim().to_string())
                .collect();
            found.push((start, names));
            // blank the span without shifting later offsets
            work.replace_range(start..end, &" ".repeat(end - start));
        }
    }
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().flat_map(|(_, names)| names).collect()
}

/// Split an author string into basionym, combining and `in` authors.
pub fn get_author_team(text: &str) -> AuthorTeam {
    let (basionym, rest) = match RE_BASIONYM.captures(text) {
        Some(caps) => (
            extract_authors(caps.name("basionym").map_or("", |m| m.as_str())),
            caps.name("rest").map_or("", |m| m.as_str()).to_string(),
        ),
        None => (Vec::new(), text.to_string()),
    };
    let mut parts = RE_IN.splitn(&rest, 2);
    let combining = extract_authors(parts.next().unwrap_or(""));
    let in_authors = parts.next().map(extract_authors);
    AuthorTeam {
        basionym,
        combining,
        in_authors,
    }
}

/// First letter of the surname: the first word of two or more letters
/// that is not a particle. Falls back to the first letter at all.
pub fn surname_initial(author: &str) -> Option<char> {
    author
        .split(|c: char| c.is_whitespace() || c == '.' || c == '-')
        .find(|w| w.chars().filter(|c| c.is_alphabetic()).count() >= 2 && !PARTICLES.contains(w))
        .and_then(|w| w.chars().find(|c| c.is_alphabetic()))
        .or_else(|| author.chars().find(|c| c.is_alphabetic()))
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Order-insensitive similarity on word sets, 0–100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let (ta, tb) = (tokens(a), tokens(b));
    let common: Vec<&str> = ta.intersection(&tb).map(String::as_str).collect();
    let only_a: Vec<&str> = ta.difference(&tb).map(String::as_str).collect();
    let only_b: Vec<&str> = tb.difference(&ta).map(String::as_str).collect();

    let base = common.join(" ");
    let join = |rest: &[&str]| {
        let rest = rest.join(" ");
        format!("{base} {rest}").trim().to_string()
    };
    let (with_a, with_b) = (join(&only_a), join(&only_b));
    let mut best = ratio(&with_a, &with_b);
    if !base.is_empty() {
        best = best.max(ratio(&base, &with_a)).max(ratio(&base, &with_b));
    }
    best
}

/// Similarity of one query author to one candidate author. Zero unless the
/// query's surname initial occurs literally in the candidate.
pub fn author_similarity(query: &str, candidate: &str) -> f64 {
    match surname_initial(query) {
        Some(initial) if candidate.contains(initial) => token_set_ratio(query, candidate),
        _ => 0.0,
    }
}

/// Mean over query authors of their best match among candidate authors.
pub fn team_score(query: &AuthorTeam, candidate: &AuthorTeam) -> f64 {
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    let query = query.all();
    let candidate = candidate.all();
    let total: f64 = query
        .iter()
        .map(|q| {
            candidate
                .iter()
                .map(|c| author_similarity(q, c))
                .fold(0.0, f64::max)
        })
        .sum();
    total / query.len() as f64
}

/// Pick the homonym whose author team best matches `author`. A winning
/// score of zero means nothing matched and yields `None`.
pub fn best_match(author: &str, candidates: &[NameCandidate]) -> Option<BestMatch> {
    let query = get_author_team(author);
    let scored: Vec<(f64, &NameCandidate)> = candidates
        .iter()
        .map(|c| (team_score(&query, &get_author_team(&c.author)), c))
        .collect();
    let top = scored.iter().map(|(s, _)| *s).fold(0.0, f64::max);
    if top <= 0.0 {
        return None;
    }
    let mut winners = scored.iter().filter(|(s, _)| (*s - top).abs() < 1e-9);
    let (_, first) = winners.next()?;
    Some(BestMatch {
        candidate: (*first).clone(),
        score: top,
        tied: winners.next().is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(author: &str) -> NameCandidate {
        NameCandidate {
            name: "Poa annua".into(),
            author: author.into(),
            family: Some("Poaceae".into()),
            rank: Some("species".into()),
            source: "test".into(),
        }
    }

    #[test]
    fn test_basionym_and_combining() {
        let team = get_author_team("(Wall.) Hook. f. et Thoms.");
        assert_eq!(team.basionym, vec!["Wall."]);
        assert_eq!(team.combining, vec!["Hook. f.", "Thoms."]);
        assert_eq!(team.in_authors, None);
        assert!(!team.is_empty());

        let none = get_author_team("");
        assert!(none.is_empty());
        assert_eq!(team_score(&none, &team), 0.0);
    }

    #[test]
    fn test_ex_in_and_initials() {
        let team = get_author_team("Franch. ex Diels");
        assert_eq!(team.combining, vec!["Franch.", "Diels"]);

        let team = get_author_team("Hand.-Mazz. in Diels");
        assert_eq!(team.combining, vec!["Hand.-Mazz."]);
        assert_eq!(team.in_authors, Some(vec!["Diels".to_string()]));

        let team = get_author_team("J. T. Pan");
        assert_eq!(team.combining, vec!["J. T. Pan"]);
    }

    #[test]
    fn test_groups_keep_reading_order() {
        let authors = extract_authors("Bal f. f., Rehd. & Wils. et Yu, Li, Ku & Chen");
        assert_eq!(
            authors,
            vec!["Bal f. f.", "Rehd.", "Wils.", "Yu", "Li", "Ku", "Chen"]
        );
    }

    #[test]
    fn test_surname_initial() {
        assert_eq!(surname_initial("J. T. Pan"), Some('P'));
        assert_eq!(surname_initial("de Wit"), Some('W'));
        assert_eq!(surname_initial("L."), Some('L'));
        assert_eq!(surname_initial(""), None);
    }

    #[test]
    fn test_initial_rule_blocks_lookalikes() {
        assert!(author_similarity("Hook. f.", "Hook.f.") > 99.0);
        // similar letters, different surname initial
        assert_eq!(author_similarity("Rehd.", "Wehd."), 0.0);
        assert!(token_set_ratio("Wils.", "Wilson") > 50.0);
    }

    #[test]
    fn test_best_match_and_ties() {
        let cands = vec![candidate("L."), candidate("Steud.")];
        let best = best_match("L.", &cands).unwrap();
        assert_eq!(best.candidate.author, "L.");
        assert!(!best.tied);

        let cands = vec![candidate("L."), candidate("L.")];
        assert!(best_match("L.", &cands).unwrap().tied);

        assert_eq!(best_match("Franch.", &[candidate("L.")]), None);
        assert_eq!(best_match("", &[candidate("L.")]), None);
    }
}

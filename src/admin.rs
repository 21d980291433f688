//! Free-text locality → canonical administrative path.
//!
//! The gazetteer is an ordered list of `country::province::city::county`
//! strings, e.g.
//!   中国::云南省::怒江傈僳族自治州::泸水市
//! and the matcher scores each entry by how many input characters it can
//! cover with contiguous windows found inside a single level name.
//!
//! Known limitation: renamed or merged units that share their text with a
//! current unit elsewhere mismatch silently.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use specimen_types::AdminPath;
use tracing::{debug, info};

use crate::cleaned::{Cells, Cleaned, Column, map_column};
use crate::error::{CleanError, Result};

/// Inputs naming this country are domestic even when nothing matched.
const COUNTRY_MARKER: &str = "中国";

/// Minimum covered characters for a match to count.
const MIN_SCORE: usize = 2;

// ── Gazetteer ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Entry {
    canonical: String,
    path: AdminPath,
    /// Level names below the country.
    levels: Vec<String>,
    chars: HashSet<char>,
    len: usize,
}

impl Entry {
    fn new(canonical: &str) -> Option<Self> {
        let path = AdminPath::from_canonical(canonical)?;
        let levels: Vec<String> = path.levels()[1..]
            .iter()
            .flatten()
            .map(|s| s.to_string())
            .collect();
        let canonical = path.to_string();
        Some(Self {
            chars: levels.iter().flat_map(|l| l.chars()).collect(),
            len: canonical.chars().count(),
            canonical,
            path,
            levels,
        })
    }

    fn contains_window(&self, window: &[char]) -> bool {
        let needle: String = window.iter().collect();
        self.levels.iter().any(|l| l.contains(&needle))
    }
}

/// The static list of canonical places, loaded once per process.
#[derive(Debug, Default)]
pub struct Gazetteer {
    entries: Vec<Entry>,
}

static INSTALLED: OnceLock<Arc<Gazetteer>> = OnceLock::new();

impl Gazetteer {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .filter_map(|e| {
                let e = e.as_ref().trim();
                if e.is_empty() || e.starts_with('#') {
                    None
                } else {
                    Entry::new(e)
                }
            })
            .collect();
        Self { entries }
    }

    /// Load a newline-delimited file or a JSON array of strings.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| CleanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let gazetteer = if text.trim_start().starts_with('[') {
            let list: Vec<String> = serde_json::from_str(&text)?;
            Self::from_entries(list)
        } else {
            Self::from_entries(text.lines())
        };
        if gazetteer.is_empty() {
            return Err(CleanError::Gazetteer(format!(
                "{} contains no entries",
                path.display()
            )));
        }
        info!(path = %path.display(), entries = gazetteer.len(), "gazetteer loaded");
        Ok(gazetteer)
    }

    /// Install as the process-wide gazetteer. The first install wins.
    pub fn install(self) -> Arc<Gazetteer> {
        INSTALLED.get_or_init(|| Arc::new(self)).clone()
    }

    pub fn installed() -> Option<Arc<Gazetteer>> {
        INSTALLED.get().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────

/// Longest window of at least two characters starting at `start` that
/// occurs inside one level of `entry`.
fn longest_from(entry: &Entry, query: &[char], start: usize) -> usize {
    let mut k = MIN_SCORE;
    while start + k <= query.len() && entry.contains_window(&query[start..start + k]) {
        k += 1;
    }
    if k > MIN_SCORE { k - 1 } else { 0 }
}

/// Number of distinct query positions covered by in-level windows.
fn score(entry: &Entry, query: &[char]) -> usize {
    let n = query.len();
    let mut covered = vec![false; n];
    let mut i = 0;
    while i + 1 < n {
        let k = longest_from(entry, query, i);
        if k > 0 {
            covered[i..i + k].fill(true);
            i += k;
        } else {
            i += 1;
        }
    }

    // The greedy scan can swallow the start of a trailing name:
    // 南京口 against 南京市::京口区 covers 南京 but not 京口.
    if n >= 2
        && entry.chars.contains(&query[n - 2])
        && let Some(start) = (0..n - 1).find(|&s| entry.contains_window(&query[s..]))
    {
        covered[start..].fill(true);
    }

    covered.into_iter().filter(|&c| c).count()
}

// ── Matching ─────────────────────────────────────────────────────────────

/// A matched path, or a place outside the gazetteer kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Place {
    Path(AdminPath),
    Foreign(String),
}

impl Cells for Place {
    const WIDTH: usize = 4;
    fn cells(&self) -> Vec<Option<String>> {
        match self {
            Place::Path(p) => p.levels().into_iter().map(|l| l.map(str::to_string)).collect(),
            Place::Foreign(text) => vec![Some(text.clone()), None, None, None],
        }
    }
}

pub struct AdminMatcher {
    gazetteer: Arc<Gazetteer>,
}

impl AdminMatcher {
    pub fn new(gazetteer: Arc<Gazetteer>) -> Self {
        Self { gazetteer }
    }

    pub fn resolve(&self, text: &str) -> Option<Cleaned<Place>> {
        let query: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        if query.is_empty() {
            return None;
        }

        let mut best: Option<(usize, &Entry)> = None;
        let mut rivals: Vec<&Entry> = Vec::new();
        for entry in &self.gazetteer.entries {
            let s = score(entry, &query);
            if s < MIN_SCORE {
                continue;
            }
            match best {
                Some((top, _)) if s < top => {}
                Some((top, current)) if s == top => {
                    if entry.len < current.len {
                        rivals.push(current);
                        best = Some((s, entry));
                    } else {
                        rivals.push(entry);
                    }
                }
                _ => {
                    rivals.clear();
                    best = Some((s, entry));
                }
            }
        }

        let Some((top, chosen)) = best else {
            if text.contains(COUNTRY_MARKER) {
                debug!(input = text, "domestic locality without a gazetteer match");
                return Some(Cleaned::NeedsReview(text.to_string()));
            }
            return Some(Cleaned::Ok(Place::Foreign(text.trim().to_string())));
        };

        let place = Place::Path(chosen.path.clone());
        let continuation = rivals
            .iter()
            .all(|r| r.canonical.starts_with(&chosen.canonical));
        if continuation {
            Some(Cleaned::Ok(place))
        } else {
            debug!(input = text, chosen = %chosen.canonical, score = top, "ambiguous locality");
            Some(Cleaned::Doubtful(place))
        }
    }

    pub fn resolve_column(&self, column: &Column) -> Vec<Option<Cleaned<Place>>> {
        map_column(column, |text| self.resolve(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(entries: &[&str]) -> AdminMatcher {
        AdminMatcher::new(Arc::new(Gazetteer::from_entries(entries)))
    }

    fn path(p: &str) -> Place {
        Place::Path(AdminPath::from_canonical(p).unwrap())
    }

    const YUNNAN: &[&str] = &[
        "中国::云南省",
        "中国::四川省",
        "中国::云南省::怒江傈僳族自治州",
        "中国::云南省::怒江傈僳族自治州::泸水市",
        "中国::云南省::怒江傈僳族自治州::碧江县",
        "中国::贵州省::铜仁市::碧江区",
    ];

    #[test]
    fn test_longest_match_wins() {
        let m = matcher(YUNNAN);
        assert_eq!(
            m.resolve("云南泸水"),
            Some(Cleaned::Ok(path("中国::云南省::怒江傈僳族自治州::泸水市")))
        );
        assert_eq!(
            m.resolve("云南 碧江"),
            Some(Cleaned::Ok(path("中国::云南省::怒江傈僳族自治州::碧江县")))
        );
    }

    #[test]
    fn test_tie_prefers_shorter_continuation() {
        let m = matcher(YUNNAN);
        assert_eq!(m.resolve("云南"), Some(Cleaned::Ok(path("中国::云南省"))));
    }

    #[test]
    fn test_homonyms_are_marked() {
        let m = matcher(YUNNAN);
        // 碧江 exists in both provinces with equal scores
        assert_eq!(
            m.resolve("碧江"),
            Some(Cleaned::Doubtful(path("中国::贵州省::铜仁市::碧江区")))
        );
    }

    #[test]
    fn test_province_and_county_pair() {
        // only one entry covers both words, so nothing ties with it
        let m = matcher(&["中国::四川省", "中国::云南省::某市::碧江区"]);
        assert_eq!(
            m.resolve("云南碧江"),
            Some(Cleaned::Ok(path("中国::云南省::某市::碧江区")))
        );
        assert_eq!(m.resolve("四川"), Some(Cleaned::Ok(path("中国::四川省"))));
    }

    #[test]
    fn test_tail_window_can_overlap() {
        let g = Gazetteer::from_entries(["中国::江苏省::南京市::京口区"]);
        let q: Vec<char> = "南京口".chars().collect();
        assert_eq!(score(&g.entries[0], &q), 3);
    }

    #[test]
    fn test_no_match_foreign_or_domestic() {
        let m = matcher(YUNNAN);
        assert_eq!(
            m.resolve("Kathmandu"),
            Some(Cleaned::Ok(Place::Foreign("Kathmandu".into())))
        );
        assert_eq!(
            m.resolve("中国西部"),
            Some(Cleaned::NeedsReview("中国西部".into()))
        );
        assert_eq!(m.resolve("  "), None);
    }

    #[test]
    fn test_cells_width() {
        let cells = path("中国::云南省").cells();
        assert_eq!(cells, vec![Some("中国".into()), Some("云南省".into()), None, None]);
        let cells = Place::Foreign("Nepal".into()).cells();
        assert_eq!(cells.len(), 4);
    }

    #[test]
    fn test_load_line_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let lines = dir.path().join("g.txt");
        fs::write(&lines, "# header\n中国::云南省\n\n中国::四川省\n").unwrap();
        assert_eq!(Gazetteer::load(&lines).unwrap().len(), 2);

        let json = dir.path().join("g.json");
        fs::write(&json, r#"["中国::云南省"]"#).unwrap();
        assert_eq!(Gazetteer::load(&json).unwrap().len(), 1);

        let empty = dir.path().join("e.txt");
        fs::write(&empty, "\n").unwrap();
        assert!(matches!(
            Gazetteer::load(&empty),
            Err(CleanError::Gazetteer(_))
        ));
    }

    #[test]
    fn test_column_keeps_marked_and_null() {
        let m = matcher(YUNNAN);
        let col: Column = vec![Some("云南泸水".into()), None, Some("!云南".into())];
        let out = m.resolve_column(&col);
        assert!(matches!(out[0], Some(Cleaned::Ok(_))));
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(Cleaned::NeedsReview("!云南".into())));
    }
}

//! Collector / identifier name lists.
//!
//! Labels mix Chinese and Western names with assorted separators and
//! database ID annotations:
//!   张三|1023、李 四 et al.
//!   J.T.Pan & Z Y Wu
//! The output is one canonical string per cell, names joined by a single
//! separator. A cell is either fully cleaned or marked as a whole.

use std::sync::LazyLock;

use regex::Regex;
use specimen_types::{NameStyle, PersonName};
use tracing::debug;

use crate::cleaned::{Cells, Cleaned, Column, map_column};

pub const DEFAULT_SEPARATOR: &str = "，";

// 张三、李四 / J. Pan & Z. Wu / A and B / A et B
static RE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+(?:and|et)\s+|[,，、;；/&]").unwrap());

// Trailing "et al." / "等"
static RE_ET_AL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:\s*et\s+al\.?|等)\s*$").unwrap());

// A run is either CJK (possibly space-broken, 张 三) or Latin (J. T. Pan)
static RE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<cjk>[\p{Han}·]+(?:\s+[\p{Han}·]+)*)|(?P<latin>[A-Za-z][A-Za-z.'\-\s]*[A-Za-z.]|[A-Za-z])")
        .unwrap()
});

// J.T.Pan → J. T. Pan
static RE_DOTTED_INITIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z])\.\s*").unwrap());

// J T Pan → J. T. Pan
static RE_BARE_INITIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z])\s+").unwrap());

static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Minimum length of a Western name, counted in characters.
const MIN_WESTERN_LEN: usize = 3;

/// The ordered names of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameList {
    pub names: Vec<PersonName>,
    pub separator: String,
}

impl NameList {
    pub fn joined(&self) -> String {
        self.names
            .iter()
            .map(|n| n.text.as_str())
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

impl Cells for NameList {
    const WIDTH: usize = 1;
    fn cells(&self) -> Vec<Option<String>> {
        vec![Some(self.joined())]
    }
}

fn strip_annotations(text: &str) -> String {
    let s: String = text
        .chars()
        .filter(|c| *c != '|' && !c.is_ascii_digit())
        .collect();
    RE_ET_AL.replace(s.trim(), "").into_owned()
}

fn western(run: &str) -> Option<String> {
    let s = RE_DOTTED_INITIAL.replace_all(run, "$1. ");
    let s = RE_BARE_INITIAL.replace_all(&s, "$1. ");
    let s = RE_SPACES.replace_all(s.trim(), " ").into_owned();
    (s.chars().count() >= MIN_WESTERN_LEN).then_some(s)
}

/// Space-broken CJK text is one name when any piece is a lone character
/// (张 三), otherwise one name per piece (张三 李四).
fn chinese(run: &str) -> Vec<String> {
    let pieces: Vec<&str> = run.split_whitespace().collect();
    if pieces.iter().any(|p| p.chars().count() == 1) {
        vec![pieces.concat()]
    } else {
        pieces.into_iter().map(str::to_string).collect()
    }
}

#[derive(Debug, Clone)]
pub struct NameTokenizer {
    separator: String,
}

impl Default for NameTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl NameTokenizer {
    pub fn new(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
        }
    }

    fn tokenize(&self, text: &str) -> Option<Vec<PersonName>> {
        let cleaned = strip_annotations(text);
        let mut names = Vec::new();
        for chunk in RE_SPLIT.split(&cleaned) {
            for caps in RE_RUN.captures_iter(chunk) {
                if let Some(m) = caps.name("cjk") {
                    for text in chinese(m.as_str()) {
                        // a lone character cannot open a list
                        if names.is_empty() && text.chars().count() == 1 {
                            return None;
                        }
                        names.push(PersonName {
                            text,
                            style: NameStyle::Chinese,
                        });
                    }
                } else if let Some(m) = caps.name("latin") {
                    names.push(PersonName {
                        text: western(m.as_str())?,
                        style: NameStyle::Western,
                    });
                }
            }
        }
        (!names.is_empty()).then_some(names)
    }

    pub fn resolve(&self, text: &str) -> Option<Cleaned<NameList>> {
        if text.trim().is_empty() {
            return None;
        }
        Some(match self.tokenize(text) {
            Some(names) => Cleaned::Ok(NameList {
                names,
                separator: self.separator.clone(),
            }),
            None => {
                debug!(input = text, "name list rejected");
                Cleaned::NeedsReview(text.to_string())
            }
        })
    }

    pub fn resolve_column(&self, column: &Column) -> Vec<Option<Cleaned<NameList>>> {
        map_column(column, |text| self.resolve(text))
    }
}

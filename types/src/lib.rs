use serde::{Deserialize, Serialize};
use std::fmt;

// ── Dates ────────────────────────────────────────────────────────────────

/// How much of a collection date was actually recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    Day,
    Month,
    Year,
}

/// A calendar date whose precision is part of the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDate {
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl ParsedDate {
    pub fn day(year: i32, month: u32, day: u32) -> Self {
        Self {
            year,
            month: Some(month),
            day: Some(day),
        }
    }

    pub fn month(year: i32, month: u32) -> Self {
        Self {
            year,
            month: Some(month),
            day: None,
        }
    }

    pub fn year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
        }
    }

    pub fn precision(&self) -> DatePrecision {
        match (self.month, self.day) {
            (Some(_), Some(_)) => DatePrecision::Day,
            (Some(_), None) => DatePrecision::Month,
            _ => DatePrecision::Year,
        }
    }
}

/// `2012-12-01`, `2012-12` or `2012` depending on precision.
impl fmt::Display for ParsedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.month, self.day) {
            (Some(m), Some(d)) => write!(f, "{:04}-{:02}-{:02}", self.year, m, d),
            (Some(m), None) => write!(f, "{:04}-{:02}", self.year, m),
            _ => write!(f, "{:04}", self.year),
        }
    }
}

// ── Coordinates ──────────────────────────────────────────────────────────

/// Signed decimal degrees, rounded to 6 places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

// ── Administrative divisions ─────────────────────────────────────────────

/// A canonical gazetteer path: country::province::city::county.
/// Any suffix of the path may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdminPath {
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
}

impl AdminPath {
    /// Parse a `"A::B::C::D"` gazetteer entry. Empty levels end the path.
    pub fn from_canonical(entry: &str) -> Option<Self> {
        let mut levels = entry
            .split("::")
            .map(str::trim)
            .take_while(|level| !level.is_empty())
            .map(str::to_string);
        let country = levels.next()?;
        Some(Self {
            country,
            province: levels.next(),
            city: levels.next(),
            county: levels.next(),
        })
    }

    pub fn levels(&self) -> [Option<&str>; 4] {
        [
            Some(self.country.as_str()),
            self.province.as_deref(),
            self.city.as_deref(),
            self.county.as_deref(),
        ]
    }
}

impl fmt::Display for AdminPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.levels().into_iter().flatten().collect();
        f.write_str(&parts.join("::"))
    }
}

// ── Person names ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameStyle {
    /// Contiguous CJK characters: 张三, 欧阳修
    Chinese,
    /// Initials + surname: J. T. Pan
    Western,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonName {
    pub text: String,
    pub style: NameStyle,
}

// ── Taxon names ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxonRank {
    Family,
    Genus,
    Species,
    Infraspecific,
}

/// Grammar-level decomposition of one handwritten scientific name.
/// Author strings stay opaque until they are compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTaxonName {
    pub genus: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_marker: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infraspecific_rank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infraspecific_epithet: Option<String>,
    /// Author of the lowest rank present.
    pub author: String,
    /// Species author, only when an infraspecific epithet is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_epithet_author: Option<String>,
    pub rank: TaxonRank,
    pub raw_input: String,
}

impl SplitTaxonName {
    /// The name without authors, as sent to name services.
    pub fn simple_name(&self) -> String {
        let mut parts: Vec<String> = vec![self.genus.clone()];
        if let Some(sp) = &self.species {
            if let Some(h) = self.hybrid_marker {
                parts.push(h.to_string());
            }
            parts.push(sp.clone());
        }
        if let (Some(rank), Some(epithet)) = (&self.infraspecific_rank, &self.infraspecific_epithet)
        {
            parts.push(rank.clone());
            parts.push(epithet.clone());
        }
        parts.join(" ")
    }

    /// Simple name followed by the author string.
    pub fn full_name(&self) -> String {
        if self.author.is_empty() {
            self.simple_name()
        } else {
            format!("{} {}", self.simple_name(), self.author)
        }
    }
}

/// Authors of a name split into their nomenclatural roles.
/// `(Wall.) Hook. f. et Thoms.` → basionym [Wall.], combining [Hook. f., Thoms.]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorTeam {
    pub basionym: Vec<String>,
    pub combining: Vec<String>,
    /// Authors following `in`, i.e. the work the name was published in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_authors: Option<Vec<String>>,
}

impl AuthorTeam {
    /// Every individual author in reading order.
    pub fn all(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.basionym.iter().map(String::as_str).collect();
        out.extend(self.combining.iter().map(String::as_str));
        if let Some(in_authors) = &self.in_authors {
            out.extend(in_authors.iter().map(String::as_str));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.basionym.is_empty()
            && self.combining.is_empty()
            && self.in_authors.as_ref().is_none_or(Vec::is_empty)
    }
}

/// One homonym candidate returned by an external name service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCandidate {
    pub name: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    /// Which service produced the candidate (ipni, powo, col, tropicos).
    pub source: String,
}

/// The winning candidate after author-team scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestMatch {
    pub candidate: NameCandidate,
    /// Mean best-author similarity, 0–100.
    pub score: f64,
    /// Another candidate reached the same score.
    pub tied: bool,
}

// ── Numeric ranges ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    Int,
    #[default]
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NumberRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

//! Free-text collection dates → [`ParsedDate`] with explicit precision.
//!
//! Real label data:
//!   1985-03-02 00:00:00      (already normalized)
//!   201212 / 20121201        (compact, month / day precision)
//!   12 V 1985, Mar. 3 1985   (roman numeral / English month)
//!   1985年3月2日             (CJK separators)
//!   2/13/1985, 13.2.1985     (US / European order)

use std::sync::LazyLock;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use specimen_types::ParsedDate;
use tracing::debug;

use crate::cleaned::{Cells, Cleaned, Column, map_column};

/// Legacy "no date" fillers written by older databases and spreadsheets.
const PLACEHOLDERS: &[&str] = &[
    "0",
    "00000000",
    "0000-00-00",
    "0000-00-00 00:00:00",
    "1899-12-30",
    "1899-12-30 00:00:00",
    "1900-01-00",
    "1970-01-01 00:00:00",
];

/// Years above this are never accepted, whatever today is.
const MAX_YEAR: u32 = 2099;

static RE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]+|\d+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Num { value: u32, digits: usize },
    /// Month given by name or roman numeral
    Month(u32),
}

/// Role a bare number can play, judged by magnitude alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Year(i32),
    /// 13–31: only a day
    Day(u32),
    /// 1–12: month or day, decided by position
    Small(u32),
    Invalid,
}

/// English month names/abbreviations and uppercase roman numerals.
fn month_alias(word: &str) -> Option<u32> {
    let roman = match word {
        "I" => Some(1),
        "II" => Some(2),
        "III" => Some(3),
        "IV" => Some(4),
        "V" => Some(5),
        "VI" => Some(6),
        "VII" => Some(7),
        "VIII" => Some(8),
        "IX" => Some(9),
        "X" => Some(10),
        "XI" => Some(11),
        "XII" => Some(12),
        _ => None,
    };
    if roman.is_some() {
        return roman;
    }
    match word.to_ascii_lowercase().as_str() {
        "jan" | "january" => Some(1),
        "feb" | "febr" | "february" => Some(2),
        "mar" | "march" => Some(3),
        "apr" | "april" => Some(4),
        "may" => Some(5),
        "jun" | "june" => Some(6),
        "jul" | "july" => Some(7),
        "aug" | "august" => Some(8),
        "sep" | "sept" | "september" => Some(9),
        "oct" | "october" => Some(10),
        "nov" | "november" => Some(11),
        "dec" | "december" => Some(12),
        _ => None,
    }
}

/// Letter runs that are not months (ca., s.d., leg.) are dropped.
fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    for m in RE_TOKEN.find_iter(text) {
        let s = m.as_str();
        if s.as_bytes()[0].is_ascii_digit() {
            let value = s.parse().ok()?;
            tokens.push(Token::Num {
                value,
                digits: s.len(),
            });
        } else if let Some(month) = month_alias(s) {
            tokens.push(Token::Month(month));
        }
    }
    Some(tokens)
}

pub struct DateResolver {
    today: NaiveDate,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DateResolver {
    pub fn new() -> Self {
        Self {
            today: Local::now().date_naive(),
        }
    }

    /// Pin "today" so future-date rejection is reproducible.
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Resolve one cell. `None` means "no date" (placeholder input).
    pub fn resolve(&self, text: &str) -> Option<Cleaned<ParsedDate>> {
        let trimmed = text.trim();
        if trimmed.is_empty() || PLACEHOLDERS.contains(&trimmed) {
            return None;
        }
        let parsed = self
            .parse_iso(trimmed)
            .or_else(|| self.parse_tokens(trimmed))
            .filter(|d| self.is_real_and_past(d));
        match parsed {
            Some(d) => Some(Cleaned::Ok(d)),
            None => {
                debug!(input = text, "date not recognised");
                Some(Cleaned::NeedsReview(text.to_string()))
            }
        }
    }

    pub fn resolve_column(&self, column: &Column) -> Vec<Option<Cleaned<ParsedDate>>> {
        map_column(column, |text| self.resolve(text))
    }

    /// Already-normalized values. The fake clock times `00:00:01` and
    /// `00:00:02` written by the legacy exporter mean month and year
    /// precision respectively.
    fn parse_iso(&self, text: &str) -> Option<ParsedDate> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
            let d = dt.date();
            let precision_clock = (dt.hour(), dt.minute(), dt.second());
            return Some(match precision_clock {
                (0, 0, 1) => ParsedDate::month(d.year(), d.month()),
                (0, 0, 2) => ParsedDate::year(d.year()),
                _ => ParsedDate::day(d.year(), d.month(), d.day()),
            });
        }
        let d = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
        Some(ParsedDate::day(d.year(), d.month(), d.day()))
    }

    fn parse_tokens(&self, text: &str) -> Option<ParsedDate> {
        let mut tokens = tokenize(text)?;
        // A repeated date or a trailing clock: keep the first date only.
        if tokens.len() == 6 {
            tokens.truncate(3);
        }
        match tokens.as_slice() {
            [Token::Num { value, digits }] => self.single(*value, *digits),
            [a, b] => self.pair(*a, *b),
            [a, b, c] => self.triple(*a, *b, *c),
            _ => None,
        }
    }

    /// Magnitude thresholds. `strict` rejects 1000–1599 as a year, which only
    /// the one- and two-token forms do.
    fn classify(&self, value: u32, strict: bool) -> Role {
        let this_year = self.today.year() as u32;
        if value > MAX_YEAR || value > this_year {
            Role::Invalid
        } else if value > 1599 {
            Role::Year(value as i32)
        } else if value > 999 {
            if strict {
                Role::Invalid
            } else {
                Role::Year(value as i32)
            }
        } else if value > 99 {
            Role::Invalid
        } else if value > 31 {
            Role::Year(value as i32 + 1900)
        } else if value > 12 {
            Role::Day(value)
        } else if value > 0 {
            Role::Small(value)
        } else {
            Role::Invalid
        }
    }

    fn single(&self, value: u32, digits: usize) -> Option<ParsedDate> {
        match digits {
            // YYYYMMDD; a "00" day field means the day was never recorded
            8 => {
                let (year, month, day) = (value / 10_000, value / 100 % 100, value % 100);
                let Role::Year(y) = self.classify(year, true) else {
                    return None;
                };
                if day == 0 {
                    Some(ParsedDate::month(y, month))
                } else {
                    Some(ParsedDate::day(y, month, day))
                }
            }
            // YYYYMM
            6 => {
                let (year, month) = (value / 100, value % 100);
                let Role::Year(y) = self.classify(year, true) else {
                    return None;
                };
                Some(ParsedDate::month(y, month))
            }
            _ => match self.classify(value, true) {
                Role::Year(y) => Some(ParsedDate::year(y)),
                _ => None,
            },
        }
    }

    fn pair(&self, a: Token, b: Token) -> Option<ParsedDate> {
        match (a, b) {
            (Token::Month(m), Token::Num { value, .. }) | (Token::Num { value, .. }, Token::Month(m)) => {
                match self.classify(value, true) {
                    Role::Year(y) => Some(ParsedDate::month(y, m)),
                    _ => None,
                }
            }
            (Token::Num { value: va, .. }, Token::Num { value: vb, .. }) => {
                match (self.classify(va, true), self.classify(vb, true)) {
                    (Role::Year(y), Role::Small(m)) | (Role::Small(m), Role::Year(y)) => {
                        Some(ParsedDate::month(y, m))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn triple(&self, a: Token, b: Token, c: Token) -> Option<ParsedDate> {
        let tokens = [a, b, c];
        if let Some(pos) = tokens.iter().position(|t| matches!(t, Token::Month(_))) {
            let Token::Month(month) = tokens[pos] else {
                return None;
            };
            let rest: Vec<Role> = tokens
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pos)
                .map(|(_, t)| match t {
                    Token::Num { value, .. } => self.classify(*value, false),
                    Token::Month(_) => Role::Invalid,
                })
                .collect();
            return match (rest[0], rest[1]) {
                (Role::Year(y), Role::Small(d) | Role::Day(d))
                | (Role::Small(d) | Role::Day(d), Role::Year(y)) => {
                    Some(ParsedDate::day(y, month, d))
                }
                _ => None,
            };
        }

        let roles: Vec<Role> = tokens
            .iter()
            .map(|t| match t {
                Token::Num { value, .. } => self.classify(*value, false),
                Token::Month(_) => Role::Invalid,
            })
            .collect();
        match (roles[0], roles[1], roles[2]) {
            // year first: Y-M-D, or Y-D-M when the middle cannot be a month
            (Role::Year(y), Role::Small(m), Role::Small(d) | Role::Day(d)) => {
                Some(ParsedDate::day(y, m, d))
            }
            (Role::Year(y), Role::Day(d), Role::Small(m)) => Some(ParsedDate::day(y, m, d)),
            // year last: D-M-Y unless the middle cannot be a month (US order)
            (Role::Small(d) | Role::Day(d), Role::Small(m), Role::Year(y)) => {
                Some(ParsedDate::day(y, m, d))
            }
            (Role::Small(m), Role::Day(d), Role::Year(y)) => Some(ParsedDate::day(y, m, d)),
            _ => None,
        }
    }

    /// A real calendar date (or month) that is not after today.
    fn is_real_and_past(&self, date: &ParsedDate) -> bool {
        let month = date.month.unwrap_or(1);
        let Some(first) = NaiveDate::from_ymd_opt(date.year, month, date.day.unwrap_or(1)) else {
            return false;
        };
        match (date.month, date.day) {
            (Some(_), Some(_)) => first <= self.today,
            (Some(m), None) => (date.year, m) <= (self.today.year(), self.today.month()),
            _ => date.year <= self.today.year(),
        }
    }
}

impl Cells for ParsedDate {
    const WIDTH: usize = 1;
    fn cells(&self) -> Vec<Option<String>> {
        vec![Some(self.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specimen_types::DatePrecision;

    fn resolver() -> DateResolver {
        DateResolver::with_today(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    fn ok(text: &str) -> ParsedDate {
        match resolver().resolve(text) {
            Some(Cleaned::Ok(d)) => d,
            other => panic!("{text:?} → {other:?}"),
        }
    }

    fn fails(text: &str) -> bool {
        matches!(resolver().resolve(text), Some(Cleaned::NeedsReview(_)))
    }

    #[test]
    fn test_compact_month_vs_day_precision() {
        let m = ok("201212");
        assert_eq!(m, ParsedDate::month(2012, 12));
        assert_eq!(m.precision(), DatePrecision::Month);
        assert_eq!(m.to_string(), "2012-12");

        let d = ok("20121201");
        assert_eq!(d, ParsedDate::day(2012, 12, 1));
        assert_eq!(d.to_string(), "2012-12-01");
        assert_ne!(m.to_string(), d.to_string());
    }

    #[test]
    fn test_compact_zero_day_is_month_only() {
        assert_eq!(ok("20121200"), ParsedDate::month(2012, 12));
    }

    #[test]
    fn test_iso_fast_path_and_legacy_clocks() {
        assert_eq!(ok("2012-12-01 00:00:00"), ParsedDate::day(2012, 12, 1));
        assert_eq!(ok("2012-12-01 00:00:01"), ParsedDate::month(2012, 12));
        assert_eq!(ok("2012-01-01 00:00:02"), ParsedDate::year(2012));
        assert_eq!(ok("2012-12-01"), ParsedDate::day(2012, 12, 1));
    }

    #[test]
    fn test_month_names_and_roman_numerals() {
        assert_eq!(ok("Mar. 3, 1985"), ParsedDate::day(1985, 3, 3));
        assert_eq!(ok("3 March 1985"), ParsedDate::day(1985, 3, 3));
        assert_eq!(ok("12 V 1985"), ParsedDate::day(1985, 5, 12));
        assert_eq!(ok("1985 XII"), ParsedDate::month(1985, 12));
        assert_eq!(ok("Sept 1985"), ParsedDate::month(1985, 9));
    }

    #[test]
    fn test_cjk_separators() {
        assert_eq!(ok("1985年3月2日"), ParsedDate::day(1985, 3, 2));
        assert_eq!(ok("1985年3月"), ParsedDate::month(1985, 3));
        assert_eq!(ok("1985年"), ParsedDate::year(1985));
    }

    #[test]
    fn test_numeric_orderings() {
        assert_eq!(ok("1985-3-2"), ParsedDate::day(1985, 3, 2));
        assert_eq!(ok("1985-13-2"), ParsedDate::day(1985, 2, 13));
        assert_eq!(ok("13.2.1985"), ParsedDate::day(1985, 2, 13));
        assert_eq!(ok("2/13/1985"), ParsedDate::day(1985, 2, 13));
        // D-M-Y wins when both small numbers could be a month
        assert_eq!(ok("2/3/1985"), ParsedDate::day(1985, 3, 2));
        assert_eq!(ok("3.1985"), ParsedDate::month(1985, 3));
    }

    #[test]
    fn test_two_digit_year_offset() {
        assert_eq!(ok("85-3-2"), ParsedDate::day(1985, 3, 2));
        assert_eq!(ok("85"), ParsedDate::year(1985));
    }

    #[test]
    fn test_magnitude_thresholds_pinned() {
        // 1000–1599 is ambiguous in the one- and two-token forms only
        assert!(fails("1500"));
        assert!(fails("1500-3"));
        assert_eq!(ok("1500-3-2"), ParsedDate::day(1500, 3, 2));
        // beyond 2099 or today's year
        assert!(fails("2100"));
        assert!(fails("2030"));
        // 100–999 has no reading
        assert!(fails("123-3-2"));
        // three small numbers are ambiguous
        assert!(fails("12-5-6"));
    }

    #[test]
    fn test_six_tokens_keep_first_date() {
        assert_eq!(ok("1985-3-2 ~ 1985-3-8"), ParsedDate::day(1985, 3, 2));
        assert_eq!(ok("1985/3/2 0:00:00"), ParsedDate::day(1985, 3, 2));
    }

    #[test]
    fn test_rejects_impossible_and_future_dates() {
        assert!(fails("2012-02-30"));
        assert!(fails("2024-06-02"));
        assert!(fails("202407"));
        assert!(fails("2012-13"));
        assert!(fails("spring"));
        assert_eq!(ok("2024-06-01"), ParsedDate::day(2024, 6, 1));
    }

    #[test]
    fn test_placeholders_are_null() {
        let r = resolver();
        assert_eq!(r.resolve("0000-00-00"), None);
        assert_eq!(r.resolve("0000-00-00 00:00:00"), None);
        assert_eq!(r.resolve("   "), None);
    }

    #[test]
    fn test_failure_keeps_original_text() {
        assert_eq!(
            resolver().resolve("sine dato"),
            Some(Cleaned::NeedsReview("sine dato".into()))
        );
    }

    #[test]
    fn test_column_nulls_and_marks() {
        let col: Column = vec![
            Some("201212".into()),
            None,
            Some("!12 xx".into()),
            Some("0000-00-00".into()),
        ];
        let out = resolver().resolve_column(&col);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Some(Cleaned::Ok(ParsedDate::month(2012, 12))));
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(Cleaned::NeedsReview("!12 xx".into())));
        assert_eq!(out[3], None);
    }
}

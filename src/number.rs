//! Numeric fields typed by hand: altitude, DBH, plant height, counts.
//!
//!   "1200-1500 m"  → one cell holding a range
//!   min="1500" max="1200"  → swapped
//!   min="1200" max="0"     → 0 is a spreadsheet fill value, not a bound

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use specimen_types::{NumberRange, NumericKind};
use tracing::debug;

use crate::cleaned::{Cells, Cleaned, Column, map_column, map_column_pair};

static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Bounds and interpretation of one numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub lower: f64,
    pub upper: f64,
    #[serde(default)]
    pub numeric: NumericKind,
    /// A lone 0 next to a real value is an artifact of empty-cell filling.
    #[serde(default)]
    pub zero_is_fill: bool,
    /// Mark rejected input instead of dropping it.
    #[serde(default)]
    pub mark: bool,
}

impl RangeSpec {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower,
            upper,
            numeric: NumericKind::Float,
            zero_is_fill: false,
            mark: false,
        }
    }

    pub fn int(mut self) -> Self {
        self.numeric = NumericKind::Int;
        self
    }

    pub fn zero_is_fill(mut self) -> Self {
        self.zero_is_fill = true;
        self
    }

    pub fn marked(mut self) -> Self {
        self.mark = true;
        self
    }

    fn in_bounds(&self, v: f64) -> bool {
        v >= self.lower && v <= self.upper
    }

    fn convert(&self, v: f64) -> f64 {
        match self.numeric {
            NumericKind::Int => v.round(),
            NumericKind::Float => v,
        }
    }
}

/// Every number in `text`. A minus sign counts only when it does not sit
/// between two numbers, so `1200-1500` is a range, not 1200 and -1500.
fn numbers(text: &str) -> Vec<f64> {
    RE_NUMBER
        .find_iter(text)
        .filter_map(|m| {
            let v: f64 = m.as_str().parse().ok()?;
            let before = &text[..m.start()];
            let mut rev = before.chars().rev();
            let negative =
                rev.next() == Some('-') && rev.next().is_none_or(|c| !c.is_ascii_digit());
            Some(if negative { -v } else { v })
        })
        .collect()
}

impl Cells for f64 {
    const WIDTH: usize = 1;
    fn cells(&self) -> Vec<Option<String>> {
        vec![Some(self.to_string())]
    }
}

impl Cells for NumberRange {
    const WIDTH: usize = 2;
    fn cells(&self) -> Vec<Option<String>> {
        vec![
            self.min.map(|v| v.to_string()),
            self.max.map(|v| v.to_string()),
        ]
    }
}

pub struct NumberRepairer {
    spec: RangeSpec,
}

impl NumberRepairer {
    pub fn new(spec: RangeSpec) -> Self {
        Self { spec }
    }

    fn reject<T>(&self, raw: &str) -> Option<Cleaned<T>> {
        debug!(input = raw, "number rejected");
        self.spec.mark.then(|| Cleaned::NeedsReview(raw.to_string()))
    }

    /// Single-cell mode: exactly one number, inside the bounds.
    pub fn resolve(&self, text: &str) -> Option<Cleaned<f64>> {
        if text.trim().is_empty() {
            return None;
        }
        match numbers(text).as_slice() {
            [v] if self.spec.in_bounds(*v) => Some(Cleaned::Ok(self.spec.convert(*v))),
            _ => self.reject(text),
        }
    }

    /// Range mode over a (min, max) pair of cells.
    pub fn resolve_range(&self, min: Option<&str>, max: Option<&str>) -> Option<Cleaned<NumberRange>> {
        let raw: Vec<&str> = min.into_iter().chain(max).collect();
        if raw.iter().all(|s| s.trim().is_empty()) {
            return None;
        }
        let values: Vec<f64> = raw.iter().flat_map(|s| numbers(s)).collect();

        let fill = self.spec.zero_is_fill;
        // one bad token spoils the pair; a declared zero fill is not a value
        if values
            .iter()
            .any(|v| !(fill && *v == 0.0) && !self.spec.in_bounds(*v))
        {
            return self.reject(&raw.join(";"));
        }
        let (lo, hi) = match values.as_slice() {
            [a, b] if fill && *a == 0.0 && *b == 0.0 => return None,
            [a, b] if fill && (*a == 0.0 || *b == 0.0) => {
                let v = if *a == 0.0 { *b } else { *a };
                (v, v)
            }
            [a, b] => (a.min(*b), a.max(*b)),
            [v] if fill && *v == 0.0 => return None,
            [v] => (*v, *v),
            _ => return self.reject(&raw.join(";")),
        };
        Some(Cleaned::Ok(NumberRange {
            min: Some(self.spec.convert(lo)),
            max: Some(self.spec.convert(hi)),
        }))
    }

    pub fn resolve_column(&self, column: &Column) -> Vec<Option<Cleaned<f64>>> {
        map_column(column, |text| self.resolve(text))
    }

    pub fn resolve_columns(&self, min: &Column, max: &Column) -> Vec<Option<Cleaned<NumberRange>>> {
        map_column_pair(min, max, |a, b| self.resolve_range(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaned::to_cells;

    fn range(min: f64, max: f64) -> Option<Cleaned<NumberRange>> {
        Some(Cleaned::Ok(NumberRange {
            min: Some(min),
            max: Some(max),
        }))
    }

    #[test]
    fn test_numbers_and_minus_signs() {
        assert_eq!(numbers("1200-1500 m"), vec![1200.0, 1500.0]);
        assert_eq!(numbers("-12.5 ~ -3"), vec![-12.5, -3.0]);
        assert_eq!(numbers("ca. 30 cm"), vec![30.0]);
        assert!(numbers("n/a").is_empty());
    }

    #[test]
    fn test_single_cell_mode() {
        let r = NumberRepairer::new(RangeSpec::new(0.0, 9000.0).int());
        assert_eq!(r.resolve("约1200.6米"), Some(Cleaned::Ok(1201.0)));
        assert_eq!(r.resolve("1200-1500"), None);
        assert_eq!(r.resolve("9500"), None);
        assert_eq!(r.resolve(""), None);

        let r = NumberRepairer::new(RangeSpec::new(0.0, 9000.0).marked());
        assert_eq!(r.resolve("9500"), Some(Cleaned::NeedsReview("9500".into())));
    }

    #[test]
    fn test_range_swaps_order() {
        let r = NumberRepairer::new(RangeSpec::new(0.0, 9000.0));
        assert_eq!(r.resolve_range(Some("100"), Some("50")), range(50.0, 100.0));
        assert_eq!(r.resolve_range(Some("1200-1500 m"), None), range(1200.0, 1500.0));
        assert_eq!(r.resolve_range(None, Some("800")), range(800.0, 800.0));
    }

    #[test]
    fn test_zero_fill_declared_and_not() {
        let plain = NumberRepairer::new(RangeSpec::new(0.0, 9000.0));
        assert_eq!(plain.resolve_range(Some("0"), Some("100")), range(0.0, 100.0));

        let fill = NumberRepairer::new(RangeSpec::new(0.0, 9000.0).zero_is_fill());
        assert_eq!(fill.resolve_range(Some("0"), Some("100")), range(100.0, 100.0));
        assert_eq!(fill.resolve_range(Some("100"), Some("0")), range(100.0, 100.0));
        assert_eq!(fill.resolve_range(Some("0"), Some("0")), None);
    }

    #[test]
    fn test_range_failure_marks_both_cells() {
        let r = NumberRepairer::new(RangeSpec::new(0.0, 9000.0).marked());
        let out = r.resolve_range(Some("100-200"), Some("300"));
        assert_eq!(out, Some(Cleaned::NeedsReview("100-200;300".into())));
        let cells = to_cells(out.as_ref(), &[Some("100-200"), Some("300")]);
        assert_eq!(cells, vec![Some("!100-200".into()), Some("!300".into())]);

        let quiet = NumberRepairer::new(RangeSpec::new(0.0, 9000.0));
        assert_eq!(quiet.resolve_range(Some("high"), Some("higher")), None);
    }

    #[test]
    fn test_range_with_one_value_out_of_bounds() {
        let r = NumberRepairer::new(RangeSpec::new(0.0, 9000.0).marked());
        let out = r.resolve_range(Some("1200"), Some("15000"));
        assert_eq!(out, Some(Cleaned::NeedsReview("1200;15000".into())));
        assert_eq!(r.resolve_range(Some("15000"), None), Some(Cleaned::NeedsReview("15000".into())));

        let quiet = NumberRepairer::new(RangeSpec::new(0.0, 9000.0));
        assert_eq!(quiet.resolve_range(Some("1200"), Some("15000")), None);

        // zero is still a fill value even when it sits below the lower bound
        let fill = NumberRepairer::new(RangeSpec::new(1.0, 9000.0).zero_is_fill().marked());
        assert_eq!(fill.resolve_range(Some("0"), Some("1500")), range(1500.0, 1500.0));
    }

    #[test]
    fn test_columns() {
        let r = NumberRepairer::new(RangeSpec::new(0.0, 9000.0));
        let min: Column = vec![Some("100".into()), None, Some("!x".into())];
        let max: Column = vec![Some("50".into()), None, None];
        let out = r.resolve_columns(&min, &max);
        assert_eq!(out[0], range(50.0, 100.0));
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(Cleaned::NeedsReview("!x".into())));
        assert_eq!(
            NumberRange { min: Some(50.0), max: Some(100.0) }.cells(),
            vec![Some("50".to_string()), Some("100".to_string())]
        );
    }
}

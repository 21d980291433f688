//! Per-cell results and the `!` review marker.
//!
//! Resolvers never fail outright: each one returns a [`Cleaned`] value per
//! cell, and only [`to_cells`] turns that into the `!`-prefixed strings
//! downstream consumers expect.

use rayon::prelude::*;

/// The reserved "needs human review" prefix.
pub const MARK: char = '!';

/// An ordered sequence of optional cells. Null positions are significant.
pub type Column = Vec<Option<String>>;

/// Outcome of normalizing one non-null cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cleaned<T> {
    /// Confidently normalized.
    Ok(T),
    /// A best guess that a human should confirm.
    Doubtful(T),
    /// Could not be normalized; carries the original text.
    NeedsReview(String),
}

impl<T> Cleaned<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ok(v) | Self::Doubtful(v) => Some(v),
            Self::NeedsReview(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Cleaned<U> {
        match self {
            Self::Ok(v) => Cleaned::Ok(f(v)),
            Self::Doubtful(v) => Cleaned::Doubtful(f(v)),
            Self::NeedsReview(raw) => Cleaned::NeedsReview(raw),
        }
    }
}

/// Values that serialize into a fixed number of output cells.
pub trait Cells {
    const WIDTH: usize;
    fn cells(&self) -> Vec<Option<String>>;
}

impl Cells for String {
    const WIDTH: usize = 1;
    fn cells(&self) -> Vec<Option<String>> {
        vec![Some(self.clone())]
    }
}

pub fn is_marked(text: &str) -> bool {
    text.starts_with(MARK)
}

/// Prefix `text` with the marker unless it already carries one.
pub fn mark(text: &str) -> String {
    if is_marked(text) {
        text.to_string()
    } else {
        format!("{MARK}{text}")
    }
}

/// Serialize one cell outcome at the external boundary.
///
/// `raw` holds the original input cells; a `NeedsReview` outcome marks each
/// non-null one of them in place (padded to `T::WIDTH`).
pub fn to_cells<T: Cells>(outcome: Option<&Cleaned<T>>, raw: &[Option<&str>]) -> Vec<Option<String>> {
    match outcome {
        None => vec![None; T::WIDTH],
        Some(Cleaned::Ok(v)) => v.cells(),
        Some(Cleaned::Doubtful(v)) => v
            .cells()
            .into_iter()
            .map(|c| c.map(|s| mark(&s)))
            .collect(),
        Some(Cleaned::NeedsReview(_)) => {
            let mut out: Vec<Option<String>> = raw.iter().map(|c| c.map(mark)).collect();
            out.resize(T::WIDTH, None);
            out
        }
    }
}

/// Apply a per-cell resolver over a column.
///
/// Nulls stay null and marked cells are never reprocessed (they come back
/// as `NeedsReview` carrying the marked text). A resolver may itself map a
/// cell to null, e.g. a placeholder date. Rows are independent, so the
/// work is spread across rayon's pool; output order matches input order.
pub fn map_column<T, F>(column: &[Option<String>], f: F) -> Vec<Option<Cleaned<T>>>
where
    T: Send,
    F: Fn(&str) -> Option<Cleaned<T>> + Sync,
{
    column
        .par_iter()
        .map(|cell| {
            let text = cell.as_deref()?;
            if is_marked(text) {
                return Some(Cleaned::NeedsReview(text.to_string()));
            }
            f(text)
        })
        .collect()
}

/// Two-column variant of [`map_column`]. A row is null only when both
/// inputs are null; a marked cell in either input short-circuits the row.
pub fn map_column_pair<T, F>(
    left: &[Option<String>],
    right: &[Option<String>],
    f: F,
) -> Vec<Option<Cleaned<T>>>
where
    T: Send,
    F: Fn(Option<&str>, Option<&str>) -> Option<Cleaned<T>> + Sync,
{
    debug_assert_eq!(left.len(), right.len());
    left.par_iter()
        .zip(right.par_iter())
        .map(|(a, b)| {
            let (a, b) = (a.as_deref(), b.as_deref());
            if a.is_none() && b.is_none() {
                return None;
            }
            if let Some(m) = a.into_iter().chain(b).find(|s| is_marked(s)) {
                return Some(Cleaned::NeedsReview(m.to_string()));
            }
            f(a, b)
        })
        .collect()
}

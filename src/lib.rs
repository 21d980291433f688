//! Cleaning of herbarium / specimen label records.
//!
//! Each resolver turns one free-text field into a normalized value or a
//! review flag; [`plan`] wires them to the columns of a table.

pub mod admin;
pub mod cleaned;
pub mod coord;
pub mod date;
pub mod error;
pub mod names;
pub mod number;
pub mod options;
pub mod plan;
pub mod taxon;

pub use cleaned::{Cells, Cleaned, Column, MARK, to_cells};
pub use error::{CleanError, Result, ServiceError};
pub use specimen_types as types;

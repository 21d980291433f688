//! Field plans: which resolver cleans which columns of a table.
//!
//! A plan file lists rules such as
//!   {"resolver": "date", "inputs": ["采集日期"], "outputs": ["eventDate"]}
//!   {"resolver": "number", "lower": 0, "upper": 9000, "numeric": "int",
//!    "inputs": ["海拔1", "海拔2"], "outputs": ["minElevation", "maxElevation"]}
//! and is compiled once into typed steps before any row is touched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::admin::{AdminMatcher, Gazetteer};
use crate::cleaned::{Cells, Cleaned, Column, is_marked, to_cells};
use crate::coord;
use crate::date::DateResolver;
use crate::error::{CleanError, Result};
use crate::names::NameTokenizer;
use crate::number::{NumberRepairer, RangeSpec};
use crate::options::Vocabularies;
use crate::taxon::{self, Reconciler, ServiceKind};

// ── Config ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resolver", rename_all = "snake_case")]
pub enum RuleKind {
    Date,
    Coordinate,
    Admin,
    Names {
        #[serde(default)]
        separator: Option<String>,
    },
    Taxon {
        #[serde(default)]
        online: bool,
    },
    Number(RangeSpec),
    Option {
        vocabulary: String,
    },
}

impl RuleKind {
    fn label(&self) -> &'static str {
        match self {
            RuleKind::Date => "date",
            RuleKind::Coordinate => "coordinate",
            RuleKind::Admin => "admin",
            RuleKind::Names { .. } => "names",
            RuleKind::Taxon { .. } => "taxon",
            RuleKind::Number(_) => "number",
            RuleKind::Option { .. } => "option",
        }
    }

    /// Allowed (inputs, outputs) shapes.
    fn arities(&self) -> &'static [(usize, usize)] {
        match self {
            RuleKind::Date | RuleKind::Names { .. } | RuleKind::Option { .. } => &[(1, 1)],
            RuleKind::Coordinate => &[(1, 2), (2, 2)],
            RuleKind::Admin => &[(1, 4)],
            RuleKind::Taxon { .. } => &[(1, 3)],
            RuleKind::Number(_) => &[(1, 1), (1, 2), (2, 2)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(flatten)]
    pub kind: RuleKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Gazetteer file for `admin` rules.
    #[serde(default)]
    pub gazetteer: Option<PathBuf>,
    /// Directory of alias tables for `option` rules.
    #[serde(default)]
    pub vocabularies: Option<PathBuf>,
    /// Name services queried by online `taxon` rules, in order.
    #[serde(default)]
    pub services: Vec<ServiceKind>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    pub rules: Vec<Rule>,
}

impl PlanConfig {
    /// Read a plan file; relative resource paths are taken from its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| CleanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PlanConfig = serde_json::from_str(&text)?;
        let base = path.parent().unwrap_or(Path::new("."));
        for p in [&mut config.gazetteer, &mut config.vocabularies]
            .into_iter()
            .flatten()
        {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
        Ok(config)
    }

    pub fn needs_online(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.kind, RuleKind::Taxon { online: true }))
    }
}

/// Shared, read-mostly state bound into a plan at compile time.
#[derive(Default)]
pub struct Resources {
    pub gazetteer: Option<Arc<Gazetteer>>,
    pub vocabularies: Vocabularies,
    pub reconciler: Option<Reconciler>,
    /// Fixed "today" for date validation; the local date when unset.
    pub today: Option<NaiveDate>,
}

impl Resources {
    /// Load the gazetteer and vocabularies named by `config`.
    pub fn load(config: &PlanConfig) -> Result<Self> {
        let gazetteer = match &config.gazetteer {
            Some(path) => Some(Gazetteer::load(path)?.install()),
            None => None,
        };
        let vocabularies = match &config.vocabularies {
            Some(dir) => Vocabularies::load_dir(dir)?,
            None => Vocabularies::default(),
        };
        Ok(Self {
            gazetteer,
            vocabularies,
            reconciler: None,
            today: None,
        })
    }
}

// ── Table ────────────────────────────────────────────────────────────────

/// Named columns of equal length; header order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    columns: BTreeMap<String, Column>,
    rows: usize,
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl Table {
    /// Build from JSON objects; a key missing from a record is a null cell.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
        let columns = headers
            .iter()
            .map(|h| {
                let col = records
                    .iter()
                    .map(|r| r.get(h).and_then(cell_text))
                    .collect();
                (h.clone(), col)
            })
            .collect();
        Self {
            headers,
            columns,
            rows: records.len(),
        }
    }

    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        (0..self.rows)
            .map(|i| {
                self.headers
                    .iter()
                    .map(|h| {
                        let value = self.columns[h][i].clone().map_or(Value::Null, Value::String);
                        (h.clone(), value)
                    })
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| CleanError::Table(format!("no column named '{name}'")))
    }

    /// Replace or append a column. Its length must match the table.
    pub fn set_column(&mut self, name: &str, column: Column) -> Result<()> {
        if column.len() != self.rows {
            return Err(CleanError::Table(format!(
                "column '{name}' has {} rows, table has {}",
                column.len(),
                self.rows
            )));
        }
        if !self.columns.contains_key(name) {
            self.headers.push(name.to_string());
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Number of cells carrying the review marker.
    pub fn marked_cells(&self, name: &str) -> usize {
        self.columns.get(name).map_or(0, |col| {
            col.iter().flatten().filter(|s| is_marked(s)).count()
        })
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────

enum Action {
    Date(DateResolver),
    Coordinate,
    Admin(AdminMatcher),
    Names(NameTokenizer),
    Taxon(Option<Reconciler>),
    Number(NumberRepairer),
    Option(String),
}

struct Step {
    label: &'static str,
    inputs: Vec<String>,
    outputs: Vec<String>,
    action: Action,
}

pub struct Plan {
    steps: Vec<Step>,
    vocabularies: Vocabularies,
}

/// Serialize per-row outcomes into the output columns.
fn spread<T: Cells>(results: &[Option<Cleaned<T>>], inputs: &[&Column], width: usize) -> Vec<Column> {
    let mut out: Vec<Column> = vec![Vec::with_capacity(results.len()); width];
    for (i, result) in results.iter().enumerate() {
        let raw: Vec<Option<&str>> = inputs.iter().map(|c| c[i].as_deref()).collect();
        for (slot, cell) in to_cells(result.as_ref(), &raw).into_iter().take(width).enumerate() {
            out[slot].push(cell);
        }
    }
    out
}

impl Plan {
    pub fn compile(config: &PlanConfig, resources: Resources) -> Result<Self> {
        let Resources {
            gazetteer,
            vocabularies,
            reconciler,
            today,
        } = resources;

        let mut steps = Vec::with_capacity(config.rules.len());
        for (n, rule) in config.rules.iter().enumerate() {
            let label = rule.kind.label();
            let shape = (rule.inputs.len(), rule.outputs.len());
            if !rule.kind.arities().contains(&shape) {
                return Err(CleanError::Plan(format!(
                    "rule {n} ({label}): {} inputs / {} outputs not supported, expected one of {:?}",
                    shape.0,
                    shape.1,
                    rule.kind.arities()
                )));
            }
            let action = match &rule.kind {
                RuleKind::Date => Action::Date(match today {
                    Some(d) => DateResolver::with_today(d),
                    None => DateResolver::new(),
                }),
                RuleKind::Coordinate => Action::Coordinate,
                RuleKind::Admin => {
                    let g = gazetteer.clone().ok_or_else(|| {
                        CleanError::Plan(format!("rule {n} (admin) needs a gazetteer"))
                    })?;
                    Action::Admin(AdminMatcher::new(g))
                }
                RuleKind::Names { separator } => Action::Names(match separator {
                    Some(sep) => NameTokenizer::new(sep),
                    None => NameTokenizer::default(),
                }),
                RuleKind::Taxon { online: false } => Action::Taxon(None),
                RuleKind::Taxon { online: true } => {
                    let r = reconciler.clone().ok_or_else(|| {
                        CleanError::Plan(format!("rule {n} (taxon) is online but no services are configured"))
                    })?;
                    Action::Taxon(Some(r))
                }
                RuleKind::Number(spec) => Action::Number(NumberRepairer::new(*spec)),
                RuleKind::Option { vocabulary } => {
                    vocabularies.get(vocabulary)?;
                    Action::Option(vocabulary.clone())
                }
            };
            steps.push(Step {
                label,
                inputs: rule.inputs.clone(),
                outputs: rule.outputs.clone(),
                action,
            });
        }
        Ok(Self {
            steps,
            vocabularies,
        })
    }

    /// Run every step in order. Output columns may feed later steps.
    pub async fn apply(&self, table: &mut Table) -> Result<()> {
        for step in &self.steps {
            let inputs: Vec<&Column> = step
                .inputs
                .iter()
                .map(|name| table.column(name))
                .collect::<Result<_>>()?;
            let width = step.outputs.len();

            let columns = match &step.action {
                Action::Date(r) => spread(&r.resolve_column(inputs[0]), &inputs, width),
                Action::Coordinate => {
                    let results = match inputs.as_slice() {
                        [lat, lon] => coord::resolve_columns(lat, lon),
                        _ => coord::resolve_column(inputs[0]),
                    };
                    spread(&results, &inputs, width)
                }
                Action::Admin(m) => spread(&m.resolve_column(inputs[0]), &inputs, width),
                Action::Names(t) => spread(&t.resolve_column(inputs[0]), &inputs, width),
                Action::Taxon(None) => {
                    spread(&taxon::resolve_offline_column(inputs[0]), &inputs, width)
                }
                Action::Taxon(Some(r)) => spread(&r.resolve_column(inputs[0]).await, &inputs, width),
                Action::Number(r) => match (inputs.as_slice(), width) {
                    ([single], 1) => spread(&r.resolve_column(single), &inputs, width),
                    ([min, max], _) => spread(&r.resolve_columns(min, max), &inputs, width),
                    _ => {
                        let nulls: Column = vec![None; table.len()];
                        spread(&r.resolve_columns(inputs[0], &nulls), &inputs, width)
                    }
                },
                Action::Option(name) => {
                    let resolver = self.vocabularies.get(name)?;
                    spread(&resolver.resolve_column(inputs[0]), &inputs, width)
                }
            };

            for (name, column) in step.outputs.iter().zip(columns) {
                table.set_column(name, column)?;
            }
            let marked: usize = step.outputs.iter().map(|o| table.marked_cells(o)).sum();
            info!(step = step.label, rows = table.len(), marked, "step applied");
        }
        Ok(())
    }
}

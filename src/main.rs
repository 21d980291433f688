use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use specimen_clean::admin::{AdminMatcher, Gazetteer};
use specimen_clean::coord;
use specimen_clean::date::DateResolver;
use specimen_clean::names::{DEFAULT_SEPARATOR, NameTokenizer};
use specimen_clean::number::{NumberRepairer, RangeSpec};
use specimen_clean::options::{AliasStore, OptionResolver};
use specimen_clean::plan::{Plan, PlanConfig, Resources, Table};
use specimen_clean::taxon::service::default_client;
use specimen_clean::taxon::{self, HttpNameService, NameService, Reconciler, ServiceKind};
use specimen_clean::{Cells, Cleaned, to_cells};

#[derive(Parser)]
#[command(
    name = "specimen_clean",
    about = "Cleaner for hand-typed specimen label records"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a field plan to a JSON array of records
    Clean {
        /// Plan file listing resolver rules
        #[arg(long)]
        plan: PathBuf,
        /// Records to clean; stdin when omitted
        input: Option<PathBuf>,
        /// Where to write cleaned records; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Reference date for rejecting future dates, e.g. 2024-06-01
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long, env = "TROPICOS_API_KEY", hide_env_values = true)]
        tropicos_key: Option<String>,
    },
    /// Normalize collection dates, e.g. "1985年8月", "3-VI-1985"
    Date {
        text: Vec<String>,
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Convert coordinates to decimal degrees
    Coord {
        /// Combined "lat, lon" strings
        text: Vec<String>,
        /// Separate latitude field; pair with --lon
        #[arg(long, requires = "lon")]
        lat: Option<String>,
        #[arg(long, requires = "lat")]
        lon: Option<String>,
    },
    /// Match locality text against a gazetteer of administrative divisions
    Admin {
        #[arg(long)]
        gazetteer: PathBuf,
        text: Vec<String>,
    },
    /// Split collector / identifier name lists
    Names {
        #[arg(long, default_value = DEFAULT_SEPARATOR)]
        separator: String,
        text: Vec<String>,
    },
    /// Split scientific names and optionally reconcile them online
    Taxon {
        #[arg(long)]
        online: bool,
        /// Services to query in order
        #[arg(long = "service", value_enum)]
        services: Vec<ServiceKind>,
        #[arg(long, env = "TROPICOS_API_KEY", hide_env_values = true)]
        tropicos_key: Option<String>,
        text: Vec<String>,
    },
    /// Repair a numeric field or a (min, max) pair
    Range {
        #[arg(long, allow_hyphen_values = true)]
        lower: f64,
        #[arg(long, allow_hyphen_values = true)]
        upper: f64,
        /// Round to whole numbers
        #[arg(long)]
        int: bool,
        /// A lone 0 is an empty-cell fill, not a value
        #[arg(long)]
        zero_fill: bool,
        /// Mark rejected input instead of dropping it
        #[arg(long)]
        mark: bool,
        min: String,
        max: Option<String>,
    },
    /// Resolve text against a controlled vocabulary
    #[command(name = "option")]
    Vocab {
        /// Alias table file
        #[arg(long)]
        vocabulary: PathBuf,
        /// Record `text` as a variant of this canonical value
        #[arg(long)]
        confirm: Option<String>,
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Clean {
            plan,
            input,
            output,
            today,
            tropicos_key,
        } => run_clean(&plan, input.as_deref(), output.as_deref(), today, tropicos_key).await,
        Command::Date { text, today } => {
            let resolver = today.map_or_else(DateResolver::new, DateResolver::with_today);
            for t in text.iter().map(String::as_str) {
                print_row(t, resolver.resolve(t).as_ref(), &[Some(t)]);
            }
            Ok(())
        }
        Command::Coord { text, lat, lon } => {
            if let (Some(lat), Some(lon)) = (&lat, &lon) {
                let raw = format!("{lat}; {lon}");
                let (lat, lon) = (lat.as_str(), lon.as_str());
                print_row(&raw, coord::resolve_pair(Some(lat), Some(lon)).as_ref(), &[Some(lat), Some(lon)]);
            }
            for t in text.iter().map(String::as_str) {
                print_row(t, coord::resolve(t).as_ref(), &[Some(t)]);
            }
            Ok(())
        }
        Command::Admin { gazetteer, text } => {
            let gazetteer = Gazetteer::load(&gazetteer)?.install();
            eprintln!("Gazetteer: {} entries", gazetteer.len());
            let matcher = AdminMatcher::new(gazetteer);
            for t in text.iter().map(String::as_str) {
                print_row(t, matcher.resolve(t).as_ref(), &[Some(t)]);
            }
            Ok(())
        }
        Command::Names { separator, text } => {
            let tokenizer = NameTokenizer::new(&separator);
            for t in text.iter().map(String::as_str) {
                print_row(t, tokenizer.resolve(t).as_ref(), &[Some(t)]);
            }
            Ok(())
        }
        Command::Taxon {
            online,
            services,
            tropicos_key,
            text,
        } => run_taxon(online, &services, tropicos_key, &text).await,
        Command::Range {
            lower,
            upper,
            int,
            zero_fill,
            mark,
            min,
            max,
        } => {
            let mut spec = RangeSpec::new(lower, upper);
            if int {
                spec = spec.int();
            }
            if zero_fill {
                spec = spec.zero_is_fill();
            }
            if mark {
                spec = spec.marked();
            }
            let repairer = NumberRepairer::new(spec);
            let min = min.as_str();
            match max.as_deref() {
                Some(max) => {
                    let raw = format!("{min} / {max}");
                    let out = repairer.resolve_range(Some(min), Some(max));
                    print_row(&raw, out.as_ref(), &[Some(min), Some(max)]);
                }
                None => print_row(min, repairer.resolve(min).as_ref(), &[Some(min)]),
            }
            Ok(())
        }
        Command::Vocab {
            vocabulary,
            confirm,
            text,
        } => run_option(&vocabulary, confirm.as_deref(), &text),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  OUTPUT HELPERS
// ═══════════════════════════════════════════════════════════════════════

/// One line per input: the raw text, then the output cells tab-separated.
fn print_row<T: Cells>(raw: &str, outcome: Option<&Cleaned<T>>, inputs: &[Option<&str>]) {
    let tag = match outcome {
        None => "null",
        Some(Cleaned::Ok(_)) => "ok",
        Some(Cleaned::Doubtful(_)) => "doubtful",
        Some(Cleaned::NeedsReview(_)) => "review",
    };
    let cells: Vec<String> = to_cells(outcome, inputs)
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    println!("{raw}\t{tag}\t{}", cells.join("\t"));
}

fn read_records(input: Option<&Path>) -> anyhow::Result<Vec<Map<String, Value>>> {
    let text = match input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("cannot read stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).context("records must be a JSON array of objects")
}

fn write_records(output: Option<&Path>, records: &[Map<String, Value>]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    match output {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("cannot write {}", path.display()))?;
            eprintln!("  {} ({} bytes)", path.display(), json.len());
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  NAME SERVICES
// ═══════════════════════════════════════════════════════════════════════

/// Services in query order. Tropicos is skipped without an API key.
fn build_reconciler(
    kinds: &[ServiceKind],
    tropicos_key: Option<String>,
    concurrency: Option<usize>,
) -> anyhow::Result<Reconciler> {
    let client = default_client().context("cannot build HTTP client")?;
    let kinds = if kinds.is_empty() {
        &[ServiceKind::Ipni, ServiceKind::Powo, ServiceKind::Col][..]
    } else {
        kinds
    };

    let mut services: Vec<Arc<dyn NameService>> = Vec::new();
    for &kind in kinds {
        let service = HttpNameService::new(kind, client.clone());
        match (kind, &tropicos_key) {
            (ServiceKind::Tropicos, Some(key)) => services.push(Arc::new(service.with_api_key(key))),
            (ServiceKind::Tropicos, None) => warn!("tropicos skipped: no API key"),
            _ => services.push(Arc::new(service)),
        }
    }
    if services.is_empty() {
        bail!("no usable name services");
    }
    info!(
        services = ?services.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "name services configured"
    );

    let reconciler = Reconciler::new(services);
    Ok(match concurrency {
        Some(limit) => reconciler.with_concurrency(limit),
        None => reconciler,
    })
}

async fn run_taxon(
    online: bool,
    services: &[ServiceKind],
    tropicos_key: Option<String>,
    text: &[String],
) -> anyhow::Result<()> {
    if !online {
        for t in text.iter().map(String::as_str) {
            print_row(t, taxon::resolve_offline(t).as_ref(), &[Some(t)]);
        }
        return Ok(());
    }
    let reconciler = build_reconciler(services, tropicos_key, None)?;
    let column = text.iter().cloned().map(Some).collect::<Vec<_>>();
    let results = reconciler.resolve_column(&column).await;
    for (t, outcome) in text.iter().map(String::as_str).zip(&results) {
        print_row(t, outcome.as_ref(), &[Some(t)]);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  CLEAN MODE: plan + records → cleaned records
// ═══════════════════════════════════════════════════════════════════════

async fn run_clean(
    plan_path: &Path,
    input: Option<&Path>,
    output: Option<&Path>,
    today: Option<NaiveDate>,
    tropicos_key: Option<String>,
) -> anyhow::Result<()> {
    let config = PlanConfig::load(plan_path)
        .with_context(|| format!("cannot load plan {}", plan_path.display()))?;
    eprintln!("Plan: {} rules", config.rules.len());

    let mut resources = Resources::load(&config)?;
    resources.today = today;
    if config.needs_online() {
        resources.reconciler = Some(build_reconciler(
            &config.services,
            tropicos_key,
            config.concurrency,
        )?);
    }
    let plan = Plan::compile(&config, resources)?;

    let records = read_records(input)?;
    let mut table = Table::from_records(&records);
    eprintln!("Records: {} rows, {} columns", table.len(), table.headers().len());

    plan.apply(&mut table).await?;

    let outputs: Vec<&str> = config
        .rules
        .iter()
        .flat_map(|r| r.outputs.iter().map(String::as_str))
        .collect();
    for name in outputs {
        let marked = table.marked_cells(name);
        if marked > 0 {
            eprintln!("  {name}: {marked} cells for review");
        }
    }

    write_records(output, &table.to_records())
}

// ═══════════════════════════════════════════════════════════════════════
//  VOCABULARY MODE
// ═══════════════════════════════════════════════════════════════════════

fn run_option(vocabulary: &Path, confirm: Option<&str>, text: &str) -> anyhow::Result<()> {
    let name = vocabulary
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("vocabulary");
    let mut resolver = OptionResolver::from_store(name, AliasStore::new(vocabulary))?;

    if let Some(canonical) = confirm {
        resolver.confirm(canonical, text)?;
        eprintln!(
            "Recorded {text:?} → {canonical:?} ({} v{})",
            vocabulary.display(),
            resolver.table().version
        );
    }

    let outcome = resolver.resolve(text);
    print_row(text, outcome.as_ref(), &[Some(text)]);
    if matches!(outcome, Some(Cleaned::NeedsReview(_))) {
        for (canonical, score) in resolver.suggest(text, 5) {
            eprintln!("  {canonical}\t{score:.2}");
        }
    }
    Ok(())
}

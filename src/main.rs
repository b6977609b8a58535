// 🧾 bidrag-behandling CLI - Inspect period reconciliation on files
//
//   merge        raw.csv               → merged periods (JSON)
//   ingest       raw.csv + periods.json → reconcile instructions (JSON)
//   recalculate  periods.json          → windowed periods (JSON)
//
// Logs go to stderr so stdout stays machine-readable.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use bidrag_behandling::{
    load_periods_json, load_raw_csv, CsvRawDataProvider, EffectiveDateRecalculator,
    EntityKind, EntityRef, InMemoryPeriodStore, IngestionMode, IntervalMerger, Orchestrator,
    PeriodError, PolicyTable, VERSION,
};

/// Command-line arguments for bidrag-behandling
#[derive(Parser, Debug)]
#[command(name = "bidrag-behandling")]
#[command(about = "Period merging, reconciliation and effective-date recalculation")]
#[command(version)]
struct Cli {
    /// Kind policy overrides (JSON list of {kind, merge_adjacent, inclusion})
    #[arg(long, global = true, env = "BIDRAG_POLICIES")]
    policies: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge raw sub-periods of one entity into canonical periods
    Merge {
        #[command(flatten)]
        entity: EntityArgs,

        /// Raw CSV (from,to,payload,source_ref)
        #[arg(long)]
        input: PathBuf,
    },

    /// Reconcile raw sub-periods against stored periods
    Ingest {
        #[command(flatten)]
        entity: EntityArgs,

        /// Raw CSV (from,to,payload,source_ref)
        #[arg(long)]
        input: PathBuf,

        /// Stored periods as a JSON array
        #[arg(long)]
        existing: Option<PathBuf>,

        /// first-time | update
        #[arg(long, default_value = "update")]
        mode: IngestionMode,

        /// Window the result against this effective date (YYYY-MM-DD)
        #[arg(long)]
        effective_date: Option<NaiveDate>,
    },

    /// Recalculate stored periods against an effective date
    Recalculate {
        /// YYYY-MM-DD
        #[arg(long)]
        effective_date: NaiveDate,

        /// Periods as a JSON array
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct EntityArgs {
    /// household-member | marital-status | income | custody
    #[arg(long)]
    kind: EntityKind,

    /// Case reference
    #[arg(long = "case")]
    case_ref: String,

    /// Entity key within the case
    #[arg(long)]
    entity: String,
}

impl EntityArgs {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.case_ref.as_str(), self.entity.as_str())
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let policies = match &cli.policies {
        Some(path) => {
            info!("Loading kind policies from {}", path.display());
            PolicyTable::from_file(path)?
        }
        None => PolicyTable::new(),
    };

    match cli.command {
        Command::Merge { entity, input } => run_merge(&policies, &entity, &input),
        Command::Ingest {
            entity,
            input,
            existing,
            mode,
            effective_date,
        } => run_ingest(policies, &entity, input, existing, mode, effective_date),
        Command::Recalculate {
            effective_date,
            input,
        } => run_recalculate(policies, effective_date, &input),
    }
}

fn run_merge(policies: &PolicyTable, args: &EntityArgs, input: &Path) -> Result<()> {
    let raw = load_raw_csv(input)?;
    let outcome = IntervalMerger::new(args.kind, policies.get(args.kind)).merge(&args.entity_ref(), &raw);

    report_rejections(&outcome.rejected);
    if outcome.dropped > 0 {
        info!("Dropped {} zero-length sub-periods", outcome.dropped);
    }

    print_json(&outcome.periods)
}

fn run_ingest(
    policies: PolicyTable,
    args: &EntityArgs,
    input: PathBuf,
    existing: Option<PathBuf>,
    mode: IngestionMode,
    effective_date: Option<NaiveDate>,
) -> Result<()> {
    let entity_ref = args.entity_ref();
    let store = InMemoryPeriodStore::with_actor("bidrag_behandling_cli");

    if let Some(path) = existing {
        for period in load_periods_json(&path)? {
            store.insert(period)?;
        }
    }
    if let Some(date) = effective_date {
        store.set_effective_date(entity_ref.case_ref.clone(), date)?;
    }

    let orchestrator = Orchestrator::with_policies(&store, policies);
    let outcome = orchestrator
        .ingest_from(&CsvRawDataProvider::new(input), &entity_ref, args.kind, mode)
        .with_context(|| format!("Ingesting {} periods of {}", args.kind, entity_ref))?;

    report_rejections(&outcome.rejected);
    print_json(&outcome.result)
}

fn run_recalculate(policies: PolicyTable, effective_date: NaiveDate, input: &Path) -> Result<()> {
    let periods = load_periods_json(input)?;
    let recalculated = EffectiveDateRecalculator::new(policies).recalculate(effective_date, &periods)?;

    info!(
        "Recalculated {} periods against {} (bidrag-behandling {})",
        recalculated.len(),
        effective_date,
        VERSION
    );
    print_json(&recalculated)
}

fn report_rejections(rejected: &[PeriodError]) {
    for err in rejected {
        warn!("Rejected raw sub-period: {}", err);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tier_analytics::db::{self, Scope};
use tier_analytics::ingest::{self, IngestReport};
use tier_analytics::{report, run, AnalysisConfig, AnalysisInput, AnalysisOutput};

#[derive(Parser)]
#[command(name = "tier-analytics")]
#[command(about = "Tier-based classroom observation analytics", long_about = None)]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis and write every derived record as JSON
    Analyze {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the analysis and write a markdown report
    Report {
        #[command(flatten)]
        source: Source,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Write a configuration file holding the defaults
    InitConfig {
        #[arg(long, default_value = "tier-analytics.toml")]
        out: PathBuf,
    },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("input")
        .args(["observations", "database"])
        .required(true)
        .multiple(false)
))]
struct Source {
    /// Indicator reference CSV
    #[arg(long, requires = "observations")]
    indicators: Option<PathBuf>,
    /// Long-format observation score CSV
    #[arg(long, requires = "indicators")]
    observations: Option<PathBuf>,
    /// Class academic results CSV
    #[arg(long, requires = "observations")]
    academic: Option<PathBuf>,
    /// Read inputs from Postgres at DATABASE_URL
    #[arg(long)]
    database: bool,
    #[arg(long)]
    cohort: Option<String>,
    #[arg(long)]
    term: Option<String>,
    /// TOML configuration; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Analyze { source, out } => {
            let output = analyze(&source).await?;
            let json = serde_json::to_string_pretty(&output)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Analysis written to {}.", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Report { source, limit, out } => {
            let output = analyze(&source).await?;
            let report = report::build_report(&output, source.cohort.as_deref(), limit);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::InitConfig { out } => {
            if out.exists() {
                anyhow::bail!("{} already exists", out.display());
            }
            std::fs::write(&out, AnalysisConfig::default_toml()?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Default configuration written to {}.", out.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tier_analytics={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn analyze(source: &Source) -> anyhow::Result<AnalysisOutput> {
    let config = match &source.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    let input = load_input(source).await?;
    let output = run(&input, &config)?;
    debug!(diagnostics = output.diagnostics.len(), "run finished");
    Ok(output)
}

async fn load_input(source: &Source) -> anyhow::Result<AnalysisInput> {
    let (indicator_rows, observation_rows, academic_rows) = if source.database {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set when reading from Postgres")?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;
        let scope = Scope {
            cohort: source.cohort.as_deref(),
            term: source.term.as_deref(),
        };
        (
            db::fetch_indicator_rows(&pool).await?,
            db::fetch_observation_rows(&pool, &scope).await?,
            db::fetch_academic_rows(&pool, &scope).await?,
        )
    } else {
        let indicators = required(&source.indicators, "--indicators")?;
        let observations = required(&source.observations, "--observations")?;
        let mut observation_rows = ingest::read_observation_rows(observations)?;
        let mut academic_rows = match &source.academic {
            Some(path) => ingest::read_academic_rows(path)?,
            None => Vec::new(),
        };
        observation_rows.retain(|row| {
            in_scope(&row.cohort, &source.cohort) && in_scope(&row.term, &source.term)
        });
        academic_rows.retain(|row| {
            in_scope(&row.cohort, &source.cohort) && in_scope(&row.term, &source.term)
        });
        (
            ingest::read_indicator_rows(indicators)?,
            observation_rows,
            academic_rows,
        )
    };

    let mut rejected = IngestReport::default();
    let input = AnalysisInput {
        indicators: ingest::build_indicators(&indicator_rows, &mut rejected),
        observations: ingest::build_observations(&observation_rows, &mut rejected),
        academic_results: ingest::build_academic_results(&academic_rows, &mut rejected),
    };
    info!(
        indicators = input.indicators.len(),
        observations = input.observations.len(),
        academic_results = input.academic_results.len(),
        rejected_rows = rejected.rejected.len(),
        "inputs loaded"
    );
    Ok(input)
}

fn required<'a>(path: &'a Option<PathBuf>, flag: &str) -> anyhow::Result<&'a Path> {
    path.as_deref()
        .with_context(|| format!("{flag} is required when not reading from Postgres"))
}

fn in_scope(value: &Option<String>, filter: &Option<String>) -> bool {
    match filter {
        Some(wanted) => value.as_deref().map(str::trim) == Some(wanted.as_str()),
        None => true,
    }
}

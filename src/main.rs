use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{EnvFilter, fmt};

use planbbr::api::{BuildingClient, PlanClient};
use planbbr::config::{FileConfig, api_key_from_env};
use planbbr::domain::{PlanQuery, PlanStatus, PlanType};
use planbbr::output::UpdateLog;
use planbbr::pipeline;

/// Download Danish plans from Plandata and the BBR buildings inside them
///
/// Examples:
///   # Adopted local plans for Copenhagen and Frederiksberg
///   planbbr plans -m 101 -m 147
///
///   # Every plan type in every status, for the whole country
///   planbbr plans --all
///
///   # Buildings inside local plan 1072539
///   planbbr buildings --municipality 101 --plan-id 1072539
#[derive(Parser, Debug)]
#[command(name = "planbbr")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (optional, auto-searches planbbr.toml if not provided)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for plan collections and log.txt
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory for building tables
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch plans and write them as UTM and WGS84 GeoJSON
    Plans(PlansArgs),
    /// Fetch the buildings inside one plan and write them as GeoJSON
    Buildings(BuildingsArgs),
}

#[derive(Args, Debug)]
struct PlansArgs {
    /// Municipality code, repeatable (defaults to every municipality)
    #[arg(short = 'm', long = "municipality")]
    municipalities: Vec<u16>,

    /// LOKALPLAN, LOKALPLANDELOMRAADE, BYGGEFELT, KOMMUNEPLANRAMME or LANDZONETILLADELSE
    #[arg(long, default_value = "LOKALPLAN")]
    plan_type: String,

    /// FORSLAG, VEDTAGET, AFLYST, or ALLE for no status filter
    #[arg(long, default_value = "VEDTAGET")]
    status: String,

    /// Fetch a single plan (needs exactly one municipality)
    #[arg(long)]
    plan_id: Option<String>,

    /// Every plan type in every status for the whole country
    #[arg(long, conflicts_with_all = ["municipalities", "plan_type", "status", "plan_id"])]
    all: bool,
}

#[derive(Args, Debug)]
struct BuildingsArgs {
    #[arg(short = 'm', long)]
    municipality: u16,

    #[arg(long, default_value = "LOKALPLAN")]
    plan_type: String,

    #[arg(long, default_value = "VEDTAGET")]
    status: String,

    #[arg(long)]
    plan_id: String,

    /// Point in time for the register query, RFC 3339 (defaults to now)
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,
}

fn main() -> Result<()> {
    load_env();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {:?}", path);
            }
            FileConfig::load_from(path)?
        }
        None => FileConfig::load().unwrap_or_default(),
    };
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }
    if let Some(dir) = cli.results_dir.clone() {
        config.results_dir = dir;
    }
    if let Some(key) = api_key_from_env() {
        config.datafordeler = config.datafordeler.with_api_key(key);
    }

    let total_start = Instant::now();
    match cli.command {
        Command::Plans(args) => run_plans(args, &config)?,
        Command::Buildings(args) => run_buildings(args, &config)?,
    }
    println!("Done in {:.1}s", total_start.elapsed().as_secs_f64());
    Ok(())
}

fn run_plans(args: PlansArgs, config: &FileConfig) -> Result<()> {
    let plans = PlanClient::new(config.plandata.clone())
        .context("Failed to set up Plandata client")?;
    let log = UpdateLog::new(config.log_path());

    if args.all {
        let spinner = create_spinner("Harvesting every plan type and status...");
        let start = Instant::now();
        let saved = pipeline::harvest_all_plan_types(&plans, &config.data_dir, &log)?;
        let total: usize = saved.iter().map(|s| s.features).sum();
        spinner.finish_with_message(format!(
            "Wrote {} collections with {} plans ({:.1}s)",
            saved.len() * 2,
            total,
            start.elapsed().as_secs_f64()
        ));
        return Ok(());
    }

    let plan_type = PlanType::parse_or_default(&args.plan_type);
    let status = parse_status(&args.status);

    let spinner = create_spinner("Fetching plans from Plandata...");
    let start = Instant::now();
    let saved = match &args.plan_id {
        Some(plan_id) => {
            let [municipality] = args.municipalities.as_slice() else {
                bail!("--plan-id needs exactly one --municipality");
            };
            let query =
                PlanQuery::new(*municipality, plan_type, status).with_plan_id(plan_id.clone());
            pipeline::fetch_and_save_plan(&plans, &query, &config.data_dir, &log)?
        }
        None => pipeline::fetch_and_save_plans(
            &plans,
            &args.municipalities,
            plan_type,
            status,
            &config.data_dir,
            &log,
        )?,
    };
    spinner.finish_with_message(format!(
        "Wrote {} plans ({:.1}s)",
        saved.features,
        start.elapsed().as_secs_f64()
    ));
    println!("  {}", saved.utm.display());
    println!("  {}", saved.wgs.display());
    Ok(())
}

fn run_buildings(args: BuildingsArgs, config: &FileConfig) -> Result<()> {
    let buildings = BuildingClient::new(config.datafordeler.clone())
        .context("Failed to set up Datafordeler client")?;
    let plans = PlanClient::new(config.plandata.clone())
        .context("Failed to set up Plandata client")?;

    let query = PlanQuery::new(
        args.municipality,
        PlanType::parse_or_default(&args.plan_type),
        parse_status(&args.status),
    )
    .with_plan_id(args.plan_id);

    let spinner = create_spinner("Fetching plan and buildings...");
    let start = Instant::now();
    let table = pipeline::fetch_buildings_in_plan(&plans, &buildings, &query, args.as_of)?;
    spinner.finish_with_message(format!(
        "Found {} buildings in plan {} ({:.1}s)",
        table.len(),
        table.plan_id,
        start.elapsed().as_secs_f64()
    ));
    if !table.is_complete() {
        println!("  Warning: building list is incomplete, see log output");
    }

    let path = table.save(&config.results_dir)?;
    println!("Output: {}", path.display());
    Ok(())
}

fn parse_status(name: &str) -> Option<PlanStatus> {
    if name.trim().eq_ignore_ascii_case("alle") {
        None
    } else {
        Some(PlanStatus::parse_or_default(name))
    }
}

fn load_env() {
    for path in [".env", "env/.env"] {
        let _ = dotenvy::from_path(path);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("planbbr={}", level)));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

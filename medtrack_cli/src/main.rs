use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use medtrack_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "medtrack")]
#[command(about = "Medication intake timeline builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dose timeline from a log export
    Timeline {
        /// Log rows (.csv or .json)
        #[arg(long)]
        rows: PathBuf,

        /// Reference time (defaults to the current time)
        #[arg(long)]
        now: Option<String>,

        /// Hours to look back from now (defaults to the configured lookback)
        #[arg(long)]
        hours: Option<f64>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check logged doses against configured limits
    Check {
        /// Log rows (.csv or .json)
        #[arg(long)]
        rows: PathBuf,

        /// Reference time (defaults to the current time)
        #[arg(long)]
        now: Option<String>,

        /// Exit with an error when any violation or unit mismatch is found
        #[arg(long)]
        fail_on_violation: bool,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Compile the configuration and report problems
    Validate,

    /// Write the default configuration
    Init {
        /// Destination (defaults to the standard config path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        medtrack_core::logging::init_with_level("debug");
    } else {
        medtrack_core::logging::init();
    }

    match cli.command {
        Commands::Timeline {
            rows,
            now,
            hours,
            format,
        } => cmd_timeline(cli.config.as_deref(), &rows, now, hours, format),
        Commands::Check {
            rows,
            now,
            fail_on_violation,
            format,
        } => cmd_check(cli.config.as_deref(), &rows, now, fail_on_violation, format),
        Commands::Config { action } => match action {
            ConfigAction::Validate => cmd_config_validate(cli.config.as_deref()),
            ConfigAction::Init { path, force } => {
                cmd_config_init(path.or(cli.config), force)
            }
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => {
            tracing::debug!("Using config file {:?}", p);
            Config::load_from(p)
        }
        None => Config::load(),
    }
}

fn resolve_now(now: Option<String>) -> Result<DateTime<Utc>> {
    match now {
        Some(raw) => medtrack_core::normalize::parse_timestamp_strict(&raw),
        None => Ok(Utc::now()),
    }
}

fn cmd_timeline(
    config_path: Option<&Path>,
    rows_path: &Path,
    now: Option<String>,
    hours: Option<f64>,
    format: Format,
) -> Result<()> {
    let config = load_config(config_path)?;
    let rules = RuleSet::compile(&config)?;
    let now = resolve_now(now)?;

    let hours = hours.unwrap_or(rules.timeline.lookback_hours);
    if !is_valid_hours(hours) {
        return Err(Error::Other(format!(
            "--hours must be a positive number no greater than {}, got {}",
            MAX_HOURS, hours
        )));
    }

    let rows = read_rows(rows_path)?;
    let output = run(&rows, &rules, now, TimeRange::lookback(now, hours));

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        Format::Text => {
            display_timeline(&output.timeline);
            display_report(&output.report);
            display_dropped(&output);
        }
    }

    Ok(())
}

fn cmd_check(
    config_path: Option<&Path>,
    rows_path: &Path,
    now: Option<String>,
    fail_on_violation: bool,
    format: Format,
) -> Result<()> {
    let config = load_config(config_path)?;
    let rules = RuleSet::compile(&config)?;
    let now = resolve_now(now)?;

    let rows = read_rows(rows_path)?;
    let output = run_lookback(&rows, &rules, now);

    match format {
        Format::Json => {
            let summary = serde_json::json!({
                "report": output.report,
                "stats": output.stats,
                "dropped": output.dropped,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Format::Text => {
            if output.report.is_clean() {
                println!("✓ No limits exceeded ({} doses checked)", output.doses.len());
            } else {
                display_report(&output.report);
            }
            display_dropped(&output);
        }
    }

    if fail_on_violation && !output.report.is_clean() {
        return Err(Error::Other(format!(
            "{} violations, {} unit mismatches",
            output.report.violations.len(),
            output.report.unit_mismatches.len()
        )));
    }

    Ok(())
}

fn cmd_config_validate(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let rules = RuleSet::compile(&config)?;

    println!(
        "✓ Configuration valid: {} medications, {} global limits",
        rules.rules().len(),
        rules.global_limits().len()
    );
    Ok(())
}

fn cmd_config_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => Config::default_config_path()?,
    };

    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    Config::default().save_to(&path)?;
    println!("✓ Wrote default configuration to {}", path.display());
    Ok(())
}

fn format_amount(amount: Option<f64>, unit: Option<&str>) -> String {
    match (amount, unit) {
        (Some(a), Some(u)) => format!("{} {}", a, u),
        (None, Some(u)) => format!("? {}", u),
        (Some(a), None) => a.to_string(),
        (None, None) => "-".into(),
    }
}

fn display_timeline(timeline: &TimelineData) {
    println!(
        "Timeline {} → {} (now {})",
        timeline.range.start.format("%Y-%m-%d %H:%M"),
        timeline.range.end.format("%Y-%m-%d %H:%M"),
        timeline.now.format("%Y-%m-%d %H:%M")
    );

    if timeline.rows.is_empty() {
        println!("  (no doses in range)");
        return;
    }

    for row in &timeline.rows {
        if row.is_configured {
            println!("\n  {}", row.display_name);
        } else {
            println!("\n  {} (unconfigured)", row.display_name);
        }
        for dose in &row.doses {
            let marker = if dose.is_active_at(timeline.now) {
                "  ● active"
            } else {
                ""
            };
            println!(
                "    {} – {}  {}{}",
                dose.start_time.format("%m-%d %H:%M"),
                dose.end_time.format("%m-%d %H:%M"),
                format_amount(dose.amount, dose.unit.as_deref()),
                marker
            );
        }
    }
    println!();
}

fn display_report(report: &ConstraintReport) {
    if !report.violations.is_empty() {
        println!("Limit violations:");
        for v in &report.violations {
            println!(
                "  ⚠ {}: {} {} within {}h ending {} (max {} {})",
                v.scope,
                v.cumulative_amount,
                v.unit,
                v.window_hours,
                v.at.format("%Y-%m-%d %H:%M"),
                v.max_amount,
                v.unit
            );
        }
    }

    if !report.unit_mismatches.is_empty() {
        println!("Unit mismatches:");
        for m in &report.unit_mismatches {
            println!("  ✗ {}", m);
        }
    }
}

fn display_dropped(output: &PipelineOutput) {
    if output.dropped.is_empty() {
        return;
    }
    eprintln!("Dropped {} unreadable rows:", output.dropped.len());
    for d in &output.dropped {
        eprintln!("  row {}: {}", d.row_index + 1, d.reason);
    }
}

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use treecmp_common::{load_config, AppConfig, CompareStatus, FileStamp, MatchRule, Side};
use treecmp_core::{ComparisonEntry, ComparisonList, TreeComparison};

#[derive(Parser)]
#[command(name = "treecmp")]
#[command(author = "treecmp Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Directory tree matching and content comparison", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan and compare two directories
    Scan(ScanArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Left directory path
    left: PathBuf,

    /// Right directory path
    right: PathBuf,

    /// Deepest directory level to scan (0 = only the roots' own entries)
    #[arg(long)]
    depth: Option<usize>,

    /// Skip content comparison of files larger than this many MB (0 = no limit)
    #[arg(long)]
    size_limit: Option<u64>,

    /// Only list files matching these globs, separated by ';'
    #[arg(short, long)]
    filter: Option<String>,

    /// Ignore patterns (can be specified multiple times)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Include hidden files and directories
    #[arg(long)]
    hidden: bool,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    follow_symlinks: bool,

    /// Decompress .gz files before comparing
    #[arg(long)]
    gunzip: bool,

    /// Fuzzy match rule PATTERN=>REPLACEMENT[@WEIGHT] (can be specified multiple times)
    #[arg(short, long = "rule", value_parser = parse_rule)]
    rules: Vec<MatchRule>,

    /// Show only differences (hide identical files)
    #[arg(short = 'd', long)]
    diff_only: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Disable ANSI colors in output
    #[arg(long)]
    no_color: bool,

    /// Read the config file next to the executable
    #[arg(long)]
    portable: bool,
}

fn main() {
    let cli = Cli::parse();

    let Commands::Scan(args) = cli.command;

    // Logs go to stderr so JSON output stays clean on stdout
    let default_level = if args.json { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run_scan(args) {
        error!("Scan failed: {:#}", e);
        std::process::exit(1);
    }
}

fn parse_rule(spec: &str) -> Result<MatchRule, String> {
    let Some((pattern, rest)) = spec.split_once("=>") else {
        return Err(format!("expected PATTERN=>REPLACEMENT[@WEIGHT], got '{}'", spec));
    };
    let (replacement, weight) = match rest.rsplit_once('@') {
        Some((replacement, weight)) => match weight.parse::<u32>() {
            Ok(weight) => (replacement, weight),
            Err(_) => (rest, 1),
        },
        None => (rest, 1),
    };
    let rule = MatchRule::new(pattern, replacement, weight);
    rule.validate().map_err(|e| e.to_string())?;
    Ok(rule)
}

fn apply_overrides(config: &mut AppConfig, args: &ScanArgs) {
    if let Some(depth) = args.depth {
        config.max_depth = depth;
    }
    if let Some(size_limit) = args.size_limit {
        config.size_limit_mb = size_limit;
    }
    if let Some(filter) = &args.filter {
        config.name_filters = filter.clone();
    }
    config.ignore_patterns.extend(args.ignore.iter().cloned());
    config.match_rules.extend(args.rules.iter().cloned());
    if args.hidden {
        config.show_hidden = true;
    }
    if args.follow_symlinks {
        config.follow_symlinks = true;
    }
    if args.gunzip {
        config.decompress_gz = true;
    }
}

fn run_scan(args: ScanArgs) -> anyhow::Result<()> {
    // Validate paths
    if !args.left.is_dir() {
        bail!("Left path is not a directory: {}", args.left.display());
    }
    if !args.right.is_dir() {
        bail!("Right path is not a directory: {}", args.right.display());
    }

    info!("Comparing:");
    info!("  Left:  {}", args.left.display());
    info!("  Right: {}", args.right.display());

    let loaded = load_config(args.portable).context("loading configuration")?;
    if loaded.exists {
        info!("Using config file: {}", loaded.path.display());
    }
    let mut config = loaded.config;
    apply_overrides(&mut config, &args);

    let mut session = TreeComparison::open(&args.left, &args.right, &config)?;

    let pending = session.list().pending().len() as u64;
    let show_progress = !args.json && std::io::stderr().is_terminal();
    let progress = if show_progress {
        let pb = ProgressBar::new(pending);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Comparing [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
            )?
            .progress_chars("━╸─"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    session.run_until_idle_with(|_| progress.inc(1));
    progress.finish_and_clear();

    let report = build_report(&args.left, &args.right, session.list(), args.diff_only);

    if args.json {
        let output = serde_json::to_string_pretty(&report)?;
        println!("{output}");
        return Ok(());
    }

    let use_color = !args.no_color && std::io::stdout().is_terminal();
    print_report(&report, use_color);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum ReportStatus {
    Same,
    Different,
    LeftOnly,
    RightOnly,
    NotCompared,
    ErrorOpen,
    ErrorTooBig,
    ErrorRead,
}

impl ReportStatus {
    fn of(entry: &ComparisonEntry) -> Self {
        if entry.is_left_only() {
            return ReportStatus::LeftOnly;
        }
        if entry.is_right_only() {
            return ReportStatus::RightOnly;
        }
        match entry.status() {
            CompareStatus::NotCompared => ReportStatus::NotCompared,
            CompareStatus::Same => ReportStatus::Same,
            CompareStatus::Different => ReportStatus::Different,
            CompareStatus::ErrorOpen => ReportStatus::ErrorOpen,
            CompareStatus::ErrorTooBig => ReportStatus::ErrorTooBig,
            CompareStatus::ErrorRead => ReportStatus::ErrorRead,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            ReportStatus::Same => "==",
            ReportStatus::Different => "!=",
            ReportStatus::LeftOnly => "<<",
            ReportStatus::RightOnly => ">>",
            ReportStatus::NotCompared => "??",
            ReportStatus::ErrorOpen | ReportStatus::ErrorTooBig | ReportStatus::ErrorRead => "!!",
        }
    }

    fn color(self) -> &'static str {
        match self {
            ReportStatus::Same => "\x1b[32m",        // Green
            ReportStatus::Different => "\x1b[31m",   // Red
            ReportStatus::LeftOnly => "\x1b[33m",    // Yellow
            ReportStatus::RightOnly => "\x1b[34m",   // Blue
            ReportStatus::NotCompared => "\x1b[36m", // Cyan
            _ => "\x1b[35m",                         // Magenta
        }
    }
}

#[derive(Serialize)]
struct JsonReport {
    left: String,
    right: String,
    summary: JsonSummary,
    entries: Vec<JsonEntry>,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
struct JsonSummary {
    total: usize,
    same: usize,
    different: usize,
    left_only: usize,
    right_only: usize,
    not_compared: usize,
    errors: usize,
}

#[derive(Serialize)]
struct JsonEntry {
    path: String,
    status: ReportStatus,
    ignored: bool,
    left: Option<JsonFileSide>,
    right: Option<JsonFileSide>,
}

#[derive(Serialize)]
struct JsonFileSide {
    path: String,
    size: Option<u64>,
    modified_unix: Option<u64>,
}

fn build_report(left: &Path, right: &Path, list: &ComparisonList, diff_only: bool) -> JsonReport {
    let mut summary = JsonSummary {
        total: list.len(),
        ..JsonSummary::default()
    };
    let mut entries = Vec::new();

    for entry in list {
        let status = ReportStatus::of(entry);
        match status {
            ReportStatus::Same => summary.same += 1,
            ReportStatus::Different => summary.different += 1,
            ReportStatus::LeftOnly => summary.left_only += 1,
            ReportStatus::RightOnly => summary.right_only += 1,
            ReportStatus::NotCompared => summary.not_compared += 1,
            _ if entry.status().is_error() => summary.errors += 1,
            _ => {}
        }

        // Skip identical files if diff_only is set
        if diff_only && status == ReportStatus::Same {
            continue;
        }

        entries.push(JsonEntry {
            path: entry.primary().map(ToString::to_string).unwrap_or_default(),
            status,
            ignored: entry.is_ignored(),
            left: entry
                .left()
                .map(|path| json_side(path.to_string(), entry.stamp(Side::Left))),
            right: entry
                .right()
                .map(|path| json_side(path.to_string(), entry.stamp(Side::Right))),
        });
    }

    JsonReport {
        left: left.to_string_lossy().to_string(),
        right: right.to_string_lossy().to_string(),
        summary,
        entries,
    }
}

fn json_side(path: String, stamp: Option<FileStamp>) -> JsonFileSide {
    JsonFileSide {
        path,
        size: stamp.map(|s| s.size),
        modified_unix: stamp.and_then(|s| system_time_to_unix(s.modified)),
    }
}

fn system_time_to_unix(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn print_report(report: &JsonReport, use_color: bool) {
    println!("\n{}", "=".repeat(80));
    println!("Comparison Results");
    println!("{}", "=".repeat(80));

    for entry in &report.entries {
        let (status_color, reset) = if use_color {
            (entry.status.color(), "\x1b[0m")
        } else {
            ("", "")
        };

        let left = entry.left.as_ref().map_or("", |side| side.path.as_str());
        let right = entry.right.as_ref().map_or("", |side| side.path.as_str());
        let name = if entry.left.is_some() && entry.right.is_some() && left != right {
            format!("{} <-> {}", left, right)
        } else {
            entry.path.clone()
        };
        let note = match entry.status {
            ReportStatus::ErrorOpen => " (cannot open)",
            ReportStatus::ErrorTooBig => " (too big)",
            ReportStatus::ErrorRead => " (read error)",
            _ if entry.ignored => " (ignored)",
            _ => "",
        };

        println!("{}  {}{}  {}{}", status_color, entry.status.symbol(), reset, name, note);
    }

    let mark = |status: ReportStatus| {
        if use_color {
            format!("{}({}){}", status.color(), status.symbol(), "\x1b[0m")
        } else {
            format!("({})", status.symbol())
        }
    };

    let summary = &report.summary;
    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Total entries:   {}", summary.total);
    println!("  Identical:       {} {}", summary.same, mark(ReportStatus::Same));
    println!("  Different:       {} {}", summary.different, mark(ReportStatus::Different));
    println!("  Left only:       {} {}", summary.left_only, mark(ReportStatus::LeftOnly));
    println!("  Right only:      {} {}", summary.right_only, mark(ReportStatus::RightOnly));
    println!("  Not compared:    {} {}", summary.not_compared, mark(ReportStatus::NotCompared));
    println!("  Errors:          {} {}", summary.errors, mark(ReportStatus::ErrorRead));
    println!("{}", "=".repeat(80));
}

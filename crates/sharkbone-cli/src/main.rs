use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glob::glob;
use serde::Serialize;
use sharkbone_core::config::DecodeAs;
use sharkbone_core::dissect::{BindPolicy, KeyType};
use sharkbone_core::{AnalysisError, AnalysisOptions, Engine, EngineConfig, Report};
use tracing_subscriber::EnvFilter;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("SHARKBONE_BUILD_COMMIT"),
    ", ",
    env!("SHARKBONE_BUILD_DATE"),
    ")"
);

/// Environment variable holding the log filter (`tracing` directives).
const LOG_ENV: &str = "SHARKBONE_LOG";

#[derive(Parser, Debug)]
#[command(name = "sharkbone")]
#[command(version, long_version = LONG_VERSION)]
#[command(
    about = "Packet-dissection engine: decode captures into field trees and JSON reports.",
    long_about = None,
    after_help = "Examples:\n  sharkbone pcap analyse capture.pcapng -o report.json\n  sharkbone pcap analyze capture.pcap --stdout --pretty --trees\n  sharkbone pcap batch 'captures/*.pcapng' --out-dir reports\n  sharkbone dissectors"
)]
struct Cli {
    /// Debug logging on stderr (overridden by SHARKBONE_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Operations on PCAP/PCAPNG inputs.
    Pcap {
        #[command(subcommand)]
        command: PcapCommands,
    },
    /// List registered protocols, dissector tables and heuristics.
    Dissectors {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Subcommand, Debug)]
enum PcapCommands {
    /// Dissect every frame of a capture and write a JSON report.
    #[command(alias = "analyze")]
    #[command(
        after_help = "Examples:\n  sharkbone pcap analyse capture.pcapng -o report.json\n  sharkbone pcap analyze capture.pcapng --stdout --decode-as 'tcp.port==9000,lmsg'"
    )]
    Analyse {
        /// Path to a .pcap or .pcapng file
        input: PathBuf,

        /// Output report path (JSON)
        #[arg(short = 'o', long, required_unless_present = "stdout")]
        report: Option<PathBuf>,

        /// Write JSON report to stdout
        #[arg(long, conflicts_with = "report")]
        stdout: bool,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Analyse several captures concurrently, one report per capture.
    Batch {
        /// Capture files or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Directory receiving `<capture name>.json` reports
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Pretty-print JSON output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact JSON output (default)
    #[arg(long)]
    compact: bool,

    /// Suppress non-error output
    #[arg(long)]
    quiet: bool,

    /// Embed the full field tree of every frame
    #[arg(long)]
    trees: bool,

    /// Dissect every frame twice and report the second pass
    #[arg(long)]
    two_pass: bool,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Decode a table key with another dissector
    #[arg(long = "decode-as", value_name = "TABLE==KEY,DISSECTOR")]
    decode_as: Vec<DecodeAs>,

    /// Treat a protocol as absent (filter name, e.g. `artnet`)
    #[arg(long = "disable", value_name = "PROTOCOL")]
    disabled_protocols: Vec<String>,

    /// Skip a heuristic dissector (short name, e.g. `sacn_udp`)
    #[arg(long = "disable-heuristic", value_name = "NAME")]
    disabled_heuristics: Vec<String>,

    /// Dissect stream segments on their own instead of reassembling messages
    #[arg(long)]
    no_desegment: bool,

    /// Deepest allowed dissector nesting per frame
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            decode_as: self.decode_as.clone(),
            disabled_protocols: self.disabled_protocols.clone(),
            disabled_heuristics: self.disabled_heuristics.clone(),
            ..EngineConfig::default()
        };
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        config.reassembly.enabled = !self.no_desegment;
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Pcap { command } => match command {
            PcapCommands::Analyse {
                input,
                report,
                stdout,
                output,
                engine,
            } => cmd_pcap_analyse(input, report, stdout, &output, &engine),
            PcapCommands::Batch {
                inputs,
                out_dir,
                output,
                engine,
            } => cmd_pcap_batch(&inputs, &out_dir, &output, &engine),
        },
        Commands::Dissectors { json, engine } => cmd_dissectors(json, &engine),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

impl From<AnalysisError> for CliError {
    fn from(err: AnalysisError) -> Self {
        let hint = match &err {
            AnalysisError::Registration(_) => {
                Some("run `sharkbone dissectors` to list protocol, table and heuristic names".to_string())
            }
            AnalysisError::Source(_) => Some("expected a readable .pcap or .pcapng file".to_string()),
            AnalysisError::Io(_) => None,
        };
        CliError::new(format!("analysis failed: {err}"), hint)
    }
}

fn analysis_options(output: &OutputArgs, engine: &EngineArgs) -> AnalysisOptions {
    AnalysisOptions {
        config: engine.config(),
        include_trees: output.trees,
        two_pass: output.two_pass,
    }
}

fn cmd_pcap_analyse(
    input: PathBuf,
    report: Option<PathBuf>,
    stdout: bool,
    output: &OutputArgs,
    engine: &EngineArgs,
) -> Result<(), CliError> {
    let resolved_input = resolve_single_input(&input)?;
    validate_input_file(&resolved_input)?;

    let report_path = match (stdout, report) {
        (true, _) => None,
        (false, Some(path)) => {
            ensure_distinct(&resolved_input, &path)?;
            Some(path)
        }
        (false, None) => {
            return Err(CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            ));
        }
    };

    let options = analysis_options(output, engine);
    tracing::debug!(input = %resolved_input.display(), "analysing capture");
    let rep = sharkbone_core::analyze_pcap_file(&resolved_input, &options)?;
    let json = serialize_report(&rep, output.pretty, output.compact)?;

    match report_path {
        None => print!("{}", json),
        Some(path) => {
            write_report(&path, &json)?;
            if !output.quiet {
                eprintln!("OK: report written -> {}", path.display());
            }
        }
    }
    Ok(())
}

fn cmd_pcap_batch(
    inputs: &[String],
    out_dir: &Path,
    output: &OutputArgs,
    engine: &EngineArgs,
) -> Result<(), CliError> {
    let mut paths = Vec::new();
    for input in inputs {
        for path in expand_input(input)? {
            validate_input_file(&path)?;
            paths.push(path);
        }
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    let options = analysis_options(output, engine);
    tracing::debug!(captures = paths.len(), out_dir = %out_dir.display(), "batch started");
    let results = sharkbone_core::analyze_files(&paths, &options)?;

    let mut failed = 0;
    for (path, result) in paths.iter().zip(results) {
        let target = out_dir.join(report_file_name(path));
        match result {
            Ok(rep) => {
                let json = serialize_report(&rep, output.pretty, output.compact)?;
                write_report(&target, &json)?;
                if !output.quiet {
                    eprintln!("OK: {} -> {}", path.display(), target.display());
                }
            }
            Err(err) => {
                failed += 1;
                eprintln!("error: {}: {}", path.display(), err);
            }
        }
    }

    if failed > 0 {
        return Err(CliError::new(
            format!("{failed} of {} captures failed", paths.len()),
            Some("see the errors above; the other reports were written".to_string()),
        ));
    }
    Ok(())
}

fn report_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    format!("{stem}.json")
}

/// Serializable view of the frozen registry.
#[derive(Debug, Serialize)]
struct Listing {
    protocols: Vec<ProtocolEntry>,
    tables: Vec<TableEntry>,
    heuristics: Vec<HeuristicListEntry>,
}

#[derive(Debug, Serialize)]
struct ProtocolEntry {
    filter_name: String,
    short_name: String,
    name: String,
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct TableEntry {
    name: String,
    key_type: KeyType,
    policy: BindPolicy,
    bindings: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Serialize)]
struct HeuristicListEntry {
    list: String,
    entries: Vec<(String, String, bool)>,
}

fn cmd_dissectors(json: bool, engine: &EngineArgs) -> Result<(), CliError> {
    let engine = Engine::with_default_protocols(engine.config())
        .map_err(AnalysisError::from)?;
    let registry = engine.registry();

    let listing = Listing {
        protocols: registry
            .protocols()
            .iter()
            .map(|p| ProtocolEntry {
                filter_name: p.filter_name.clone(),
                short_name: p.short_name.clone(),
                name: p.name.clone(),
                enabled: p.enabled,
            })
            .collect(),
        tables: registry
            .tables()
            .map(|table| TableEntry {
                name: table.name().to_string(),
                key_type: table.key_type(),
                policy: table.policy(),
                bindings: table
                    .keys()
                    .map(|key| {
                        let names = table
                            .candidates(key)
                            .iter()
                            .map(|handle| handle.name().to_string())
                            .collect();
                        (key.to_string(), names)
                    })
                    .collect(),
            })
            .collect(),
        heuristics: registry
            .heuristic_lists()
            .map(|list| HeuristicListEntry {
                list: list.name().to_string(),
                entries: list
                    .entries()
                    .iter()
                    .map(|e| (e.short_name().to_string(), e.display_name().to_string(), e.is_enabled()))
                    .collect(),
            })
            .collect(),
    };

    if json {
        let text = serde_json::to_string_pretty(&listing).context("JSON serialization failed")?;
        println!("{}", text);
        return Ok(());
    }

    println!("Protocols:");
    for p in &listing.protocols {
        let state = if p.enabled { "" } else { " (disabled)" };
        println!("  {:<10} {:<8} {}{}", p.filter_name, p.short_name, p.name, state);
    }
    println!("Tables:");
    for table in &listing.tables {
        println!("  {} ({:?}, {:?})", table.name, table.key_type, table.policy);
        for (key, names) in &table.bindings {
            println!("    {:<8} -> {}", key, names.join(", "));
        }
    }
    println!("Heuristics:");
    for list in &listing.heuristics {
        println!("  {}", list.list);
        for (short, display, enabled) in &list.entries {
            let state = if *enabled { "" } else { " (disabled)" };
            println!("    {:<10} {}{}", short, display, state);
        }
    }
    Ok(())
}

fn serialize_report(rep: &Report, pretty: bool, compact: bool) -> Result<String, CliError> {
    if pretty && compact {
        return Err(CliError::new(
            "cannot use --pretty and --compact together",
            Some("choose one output format".to_string()),
        ));
    }
    let json = if pretty {
        serde_json::to_string_pretty(rep)
    } else {
        serde_json::to_string(rep)
    };
    json.context("JSON serialization failed").map_err(CliError::from)
}

fn write_report(path: &Path, json: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

/// Refuse to overwrite the capture with its own report.
fn ensure_distinct(input: &Path, report: &Path) -> Result<(), CliError> {
    let input_abs = fs::canonicalize(input)
        .with_context(|| format!("Failed to resolve input path: {}", input.display()))?;
    let parent = match report.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Ok(report_dir) = fs::canonicalize(parent) else {
        return Ok(());
    };
    let Some(name) = report.file_name() else {
        return Err(CliError::new(
            format!("invalid report path: {}", report.display()),
            Some("give a file name for the report".to_string()),
        ));
    };
    if report_dir.join(name) == input_abs {
        return Err(CliError::new(
            format!("report path must differ from input: {}", report.display()),
            Some("choose a different output path".to_string()),
        ));
    }
    Ok(())
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

/// `analyse` takes exactly one capture, even through a pattern.
fn resolve_single_input(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    let mut matches = expand_input(&pattern)?;
    if matches.len() > 1 {
        let mut listed: Vec<String> = matches
            .iter()
            .take(3)
            .map(|p| p.display().to_string())
            .collect();
        if matches.len() > 3 {
            listed.push("...".to_string());
        }
        return Err(CliError::new(
            format!(
                "multiple files match pattern '{}' ({} matches); matches: {}",
                pattern,
                matches.len(),
                listed.join(", ")
            ),
            Some("use `sharkbone pcap batch` for several captures".to_string()),
        ));
    }
    Ok(matches.remove(0))
}

/// Expand a glob pattern to the files it matches, in sorted order. A plain
/// path is returned as is.
fn expand_input(input: &str) -> Result<Vec<PathBuf>, CliError> {
    if !is_glob_pattern(input) {
        return Ok(vec![PathBuf::from(input)]);
    }

    let invalid = |detail: String| {
        CliError::new(
            format!("invalid input pattern '{}'", input),
            Some(format!("pattern error: {}", detail)),
        )
    };
    let mut matches = Vec::new();
    for entry in glob(input).map_err(|err| invalid(err.msg.to_string()))? {
        let path = entry.map_err(|err| invalid(err.to_string()))?;
        if path.is_file() {
            matches.push(path);
        }
    }
    if matches.is_empty() {
        return Err(CliError::new(
            format!("no files match pattern '{}'", input),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        ));
    }
    matches.sort();
    Ok(matches)
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}

// Command-line interface for tardiff.
//
// Subcommands generate a delta for a new file against an extracted old
// tree, apply a delta, and list a delta's operations.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use log::{LevelFilter, info};

use crate::delta::encoder::{DEFAULT_CHUNK_SIZE, DEFAULT_LEVEL, DeltaOptions};
use crate::delta::inspect::OpReader;
use crate::format::op::OpKind;
use crate::io::{DiffOptions, apply_file, diff_file};
use crate::planner::DEFAULT_BLOCK_SIZE;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    let size = num
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))?;
    if size == 0 {
        return Err("size must be positive".into());
    }
    Ok(size)
}

/// Largest `--block-size`; a whole block is held in memory while planning.
const MAX_BLOCK_SIZE: u64 = 1 << 30;

fn parse_block_size(s: &str) -> Result<u64, String> {
    let size = parse_byte_size(s)?;
    if size > MAX_BLOCK_SIZE {
        return Err(format!("block size must be at most {MAX_BLOCK_SIZE} bytes"));
    }
    Ok(size)
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Archive delta generator and applier.
#[derive(Parser, Debug)]
#[command(
    name = "tardiff",
    version,
    about = "Binary deltas between archives, applied against an extracted old tree",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a delta for a new file against an extracted old tree.
    Diff(DiffArgs),
    /// Reconstruct new content from a delta and an extracted old tree.
    Apply(ApplyArgs),
    /// Print the operations of a delta.
    Ops(OpsArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Directory holding the extracted old files.
    #[arg(value_hint = ValueHint::DirPath)]
    old_dir: PathBuf,

    /// New file to describe.
    #[arg(value_hint = ValueHint::FilePath)]
    new_file: PathBuf,

    /// Delta output file.
    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,

    /// zstd compression level.
    #[arg(long = "compression-level", short = 'l', value_parser = clap::value_parser!(i32).range(1..=22), default_value_t = DEFAULT_LEVEL)]
    level: i32,

    /// Old file (relative to OLD_DIR) to match against. Defaults to the
    /// new file's name when such a file exists.
    #[arg(long, short = 'r')]
    reference: Option<String>,

    /// Matching block size (supports K/M/G suffix).
    #[arg(long = "block-size", value_parser = parse_block_size, default_value_t = DEFAULT_BLOCK_SIZE as u64)]
    block_size: u64,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Delta file.
    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,

    /// Directory holding the extracted old files.
    #[arg(value_hint = ValueHint::DirPath)]
    extracted_dir: PathBuf,

    /// Output file.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct OpsArgs {
    /// Delta file.
    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

struct Output {
    force: bool,
    quiet: bool,
    json: bool,
}

fn check_overwrite(path: &Path, out: &Output) -> Result<(), i32> {
    if !out.force && path.exists() {
        eprintln!(
            "tardiff: output file exists: {} (use --force to overwrite)",
            path.display()
        );
        return Err(1);
    }
    Ok(())
}

fn hex(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn default_reference(old_dir: &Path, new_file: &Path) -> Option<String> {
    let name = new_file.file_name()?.to_str()?;
    old_dir.join(name).is_file().then(|| name.to_string())
}

// ---------------------------------------------------------------------------
// Diff command
// ---------------------------------------------------------------------------

fn cmd_diff(args: DiffArgs, out: &Output) -> i32 {
    if let Err(code) = check_overwrite(&args.delta, out) {
        return code;
    }
    let reference = args
        .reference
        .or_else(|| default_reference(&args.old_dir, &args.new_file));
    if reference.is_none() && !out.quiet {
        eprintln!("tardiff: warning: no reference old file, storing new content as literal data");
    }

    let opts = DiffOptions {
        delta: DeltaOptions {
            level: args.level,
            chunk_size: DEFAULT_CHUNK_SIZE,
        },
        block_size: usize::try_from(args.block_size).unwrap_or(usize::MAX),
    };
    let stats = match diff_file(
        &args.old_dir,
        reference.as_deref(),
        &args.new_file,
        &args.delta,
        opts,
    ) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("tardiff: error generating delta: {e}");
            let _ = std::fs::remove_file(&args.delta);
            return 1;
        }
    };

    info!(
        "diff: new {} bytes, delta {} bytes, {} ops",
        stats.new_size, stats.delta_size, stats.ops
    );
    if out.json {
        let json = serde_json::json!({
            "command": "diff",
            "reference": reference,
            "old_size": stats.old_size,
            "new_size": stats.new_size,
            "delta_size": stats.delta_size,
            "ops": stats.ops,
            "copied_bytes": stats.plan.copied_bytes,
            "add_bytes": stats.plan.add_bytes,
            "literal_bytes": stats.plan.literal_bytes,
            "new_sha256": stats.new_sha256.as_ref().map(hex),
        });
        eprintln!("{json:#}");
    }
    0
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn cmd_apply(args: ApplyArgs, out: &Output) -> i32 {
    if let Err(code) = check_overwrite(&args.output, out) {
        return code;
    }
    if !args.extracted_dir.is_dir() {
        eprintln!(
            "tardiff: extracted directory: {}: not a directory",
            args.extracted_dir.display()
        );
        return 1;
    }
    let stats = match apply_file(&args.delta, &args.extracted_dir, &args.output) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("tardiff: error applying delta: {e}");
            let _ = std::fs::remove_file(&args.output);
            return 1;
        }
    };

    info!(
        "apply: delta {} bytes, output {} bytes, {} ops",
        stats.delta_size, stats.output_size, stats.ops
    );
    if out.json {
        let json = serde_json::json!({
            "command": "apply",
            "delta_size": stats.delta_size,
            "output_size": stats.output_size,
            "ops": stats.ops,
            "output_sha256": stats.output_sha256.as_ref().map(hex),
        });
        eprintln!("{json:#}");
    }
    0
}

// ---------------------------------------------------------------------------
// Ops command
// ---------------------------------------------------------------------------

fn cmd_ops(args: OpsArgs) -> i32 {
    let file = match File::open(&args.delta) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("tardiff: {}: {e}", args.delta.display());
            return 1;
        }
    };
    let reader = match OpReader::new(BufReader::new(file)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("tardiff: {}: {e}", args.delta.display());
            return 1;
        }
    };

    let stdout = io::stdout();
    let mut lock = stdout.lock();
    for record in reader {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                eprintln!("tardiff: {}: {e}", args.delta.display());
                return 1;
            }
        };
        let line = match (record.kind, &record.name) {
            (OpKind::Open, Some(name)) => format!(
                "{:>10}  {:<7}  {}",
                record.offset,
                record.kind,
                String::from_utf8_lossy(name)
            ),
            (OpKind::Seek, _) => format!("{:>10}  {:<7}  @{}", record.offset, record.kind, record.value),
            _ => format!("{:>10}  {:<7}  {}", record.offset, record.kind, record.value),
        };
        if let Err(e) = io::Write::write_all(&mut lock, format!("{line}\n").as_bytes()) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                return 0;
            }
            eprintln!("tardiff: write error: {e}");
            return 1;
        }
    }
    0
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("tardiff version {version} (Rust)");

    let file_io = cfg!(feature = "file-io") as u8;

    eprintln!("FILE_IO={file_io}");
    eprintln!("MAGIC={:?}", String::from_utf8_lossy(&crate::format::DELTA_MAGIC));
    eprintln!("DEFAULT_LEVEL={DEFAULT_LEVEL}");
    eprintln!("DEFAULT_CHUNK_SIZE={DEFAULT_CHUNK_SIZE}");
    eprintln!("DEFAULT_BLOCK_SIZE={DEFAULT_BLOCK_SIZE}");
    eprintln!("MAX_NAME_LEN={}", crate::format::MAX_NAME_LEN);

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn log_filter(quiet: bool, verbose: u8) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    }
}

pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.quiet, cli.verbose).as_str()),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let out = Output {
        force: cli.force,
        quiet: cli.quiet,
        json: cli.json_output,
    };

    let exit_code = match cli.command {
        Cmd::Diff(args) => cmd_diff(args, &out),
        Cmd::Apply(args) => cmd_apply(args, &out),
        Cmd::Ops(args) => cmd_ops(args),
        Cmd::Config => cmd_config(),
    };

    process::exit(exit_code);
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("tardiff".to_string())
        .chain(args.iter().cloned())
        .collect();
    let _ = Cli::try_parse_from(argv);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use strum::Display;

#[derive(Parser, Debug)]
#[command(name = "spatialidx", version, about = "Spatial index engine for a version-controlled geospatial data store")]
pub struct CommandLineArgs {
    #[command(flatten)]
    pub global_args: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

impl CommandLineArgs {
    /// Parses `std::env::args`, applying the same `NO_COLOR`/`--quiet` overrides the
    /// reference CLI applies before its subcommand logic ever runs.
    pub fn parse_args() -> Self {
        let mut args = CommandLineArgs::parse();

        // If `NO_COLOR` is set in the environment, disable colored output.
        //
        // https://no-color.org/
        if std::env::var("NO_COLOR").is_ok() {
            args.global_args.color = Mode::Never;
        }

        // If `--quiet` is specified, disable progress bars.
        if args.global_args.quiet {
            args.global_args.progress = Mode::Never;
        }

        args
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the frontier and index any new feature geometry into the index database
    #[command(display_order = 1)]
    Index(IndexArgs),

    /// Inspect envelope encoding or trace a single feature's envelope build
    #[command(display_order = 2)]
    Debug(DebugArgs),
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Path to the repository to index
    #[arg(long, default_value = ".", value_name = "PATH")]
    pub repo: PathBuf,

    /// Commit-ish arguments to index (defaults to every ref, via `show-ref --head`)
    pub commitishes: Vec<String>,

    /// Drop the existing index and rebuild it from scratch instead of resuming from the
    /// persisted frontier (P5)
    #[arg(long)]
    pub clear_existing: bool,

    /// Resolve the frontier and report what would be indexed, without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Override the index database path (defaults to a well-known path inside the repository)
    #[arg(long, value_name = "PATH")]
    pub index_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DebugArgs {
    /// Path to the repository, required only for the `COMMIT:DATASET:PK_OR_OID` form
    #[arg(long, default_value = ".", value_name = "PATH")]
    pub repo: PathBuf,

    /// One of: `COMMIT:DATASET:PK_OR_OID` (trace envelope build), `W,S,E,N` (encode/decode
    /// round-trip), or a hex byte string (decode an encoded envelope; `B` inferred from length)
    pub target: String,

    /// Bits per coordinate to use when encoding a `W,S,E,N` envelope
    #[arg(long, default_value_t = spatialidx_envelope::DEFAULT_BITS_PER_COORDINATE, value_name = "BITS")]
    pub bits_per_coordinate: u32,
}

// -----------------------------------------------------------------------------
// global options
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
#[command(next_help_heading = "Global Options")]
pub struct GlobalArgs {
    /// Enable verbose output
    ///
    /// This can be repeated up to 3 times to enable successively more output.
    #[arg(global = true, long, short, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error feedback messages
    ///
    /// This silences WARNING, INFO, DEBUG, and TRACE messages and disables progress bars.
    #[arg(global = true, long, short)]
    pub quiet: bool,

    /// Enable or disable colored output
    ///
    /// If the `NO_COLOR` environment variable is set, it takes precedence and is equivalent to
    /// `--color=never`.
    #[arg(global = true, long, default_value_t = Mode::Auto, value_name = "MODE", alias = "colour")]
    pub color: Mode,

    /// Enable or disable progress bars
    #[arg(global = true, long, default_value_t = Mode::Auto, value_name = "MODE")]
    pub progress: Mode,

    #[command(flatten)]
    pub advanced: AdvancedArgs,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Advanced Global Options")]
/// These are advanced options that should not need to be used in normal circumstances.
pub struct AdvancedArgs {
    /// Set the rlimit for number of open files to LIMIT
    #[arg(hide_short_help = true, global = true, long, default_value_t = 4096, value_name = "LIMIT")]
    pub rlimit_nofile: u64,

    /// Set the cache size for SQLite connections to SIZE
    ///
    /// This has the effect of setting SQLite's `pragma cache_size=SIZE`.
    #[arg(
        hide_short_help = true,
        global = true,
        long,
        default_value_t = -1 * 262_144,
        value_name = "SIZE",
        allow_negative_numbers = true
    )]
    pub sqlite_cache_size: i64,

    /// Enable or disable backtraces on panic
    #[arg(hide_short_help = true, global = true, long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub enable_backtraces: bool,
}

impl GlobalArgs {
    pub fn use_color<T: IsTerminal>(&self, out: T) -> bool {
        match self.color {
            Mode::Never => false,
            Mode::Always => true,
            Mode::Auto => out.is_terminal(),
        }
    }

    pub fn use_progress(&self) -> bool {
        match self.progress {
            Mode::Never => false,
            Mode::Always => true,
            Mode::Auto => std::io::stderr().is_terminal(),
        }
    }
}

/// A generic auto/never/always mode value.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    Auto,
    Never,
    Always,
}

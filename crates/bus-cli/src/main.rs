//! CLI entry point for the `bus-run` binary.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
#[cfg(test)]
use tempfile as _;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{DipAssignment, RomInput, RunOptions};

/// Headless runner for the built-in boards.
#[derive(Debug, Parser)]
#[command(name = "bus-run", version, about)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the built-in boards.
    Boards,
    /// Check a directory of ROM images against a board's table.
    Verify {
        /// Board name, e.g. `thoop2`.
        board: String,
        /// Directory holding the images.
        #[arg(long)]
        rom_dir: PathBuf,
    },
    /// Print a board's input ports and DIP switches.
    Ports {
        /// Board name.
        board: String,
    },
    /// Build a board and run it for a number of frames.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Board name.
    board: String,

    /// Directory holding the images.
    #[arg(long, required_unless_present = "blank", conflicts_with = "blank")]
    rom_dir: Option<PathBuf>,

    /// Run against zero-filled images of the right sizes (implies --degraded).
    #[arg(long)]
    blank: bool,

    /// Continue past checksum mismatches instead of refusing to start.
    #[arg(long)]
    degraded: bool,

    /// Frames to run.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// DIP switch to change before running, as `PORT:NAME=SETTING`.
    #[arg(long = "dip", value_name = "PORT:NAME=SETTING")]
    dips: Vec<DipAssignment>,

    /// Snapshot to restore before running.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Where to write the snapshot taken after running.
    #[arg(long)]
    save: Option<PathBuf>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        let roms = match self.rom_dir {
            Some(dir) if !self.blank => RomInput::Directory(dir),
            _ => RomInput::Blank,
        };
        RunOptions {
            board: self.board,
            roms,
            degraded: self.degraded || self.blank,
            frames: self.frames,
            dips: self.dips,
            load: self.load,
            save: self.save,
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(command: Command, out: &mut impl Write) -> Result<bool> {
    match command {
        Command::Boards => commands::list_boards(out).map(|()| true),
        Command::Verify { board, rom_dir } => commands::verify(&board, &rom_dir, out),
        Command::Ports { board } => commands::ports(&board, out).map(|()| true),
        Command::Run(args) => commands::run(args.into_options(), out).map(|()| true),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match dispatch(cli.command, &mut out) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            drop(out);
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_dips_and_snapshots() {
        let cli = Cli::try_parse_from([
            "bus-run",
            "-vv",
            "run",
            "thoop2",
            "--rom-dir",
            "roms",
            "--frames",
            "12",
            "--dip",
            "DSW2:Lives=1",
            "--save",
            "out.json",
        ])
        .expect("valid run args should parse");

        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let options = args.into_options();
        assert_eq!(options.roms, RomInput::Directory(PathBuf::from("roms")));
        assert!(!options.degraded);
        assert_eq!(options.frames, 12);
        assert_eq!(options.dips.len(), 1);
        assert_eq!(options.dips[0].port, "DSW2");
        assert_eq!(options.save, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn blank_images_imply_degraded_loading() {
        let cli = Cli::try_parse_from(["bus-run", "run", "thoop2a", "--blank"])
            .expect("blank run should parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let options = args.into_options();
        assert_eq!(options.roms, RomInput::Blank);
        assert!(options.degraded);
        assert_eq!(options.frames, 60);
    }

    #[test]
    fn run_needs_an_image_source() {
        let error = Cli::try_parse_from(["bus-run", "run", "thoop2"])
            .expect_err("missing image source should fail");
        assert_eq!(error.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn rejects_malformed_dip_assignment() {
        let error = Cli::try_parse_from(["bus-run", "run", "thoop2", "--blank", "--dip", "Lives"])
            .expect_err("dip without port should fail");
        assert_eq!(error.kind(), clap::error::ErrorKind::ValueValidation);
    }
}

//! CLI argument parsing for startrace

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "startrace")]
#[command(version)]
#[command(about = "Measure how long a program takes to show its first window", long_about = None)]
pub struct Cli {
    /// Show errors as they happen
    #[arg(short = 'e', long = "errors", global = true)]
    pub show_errors: bool,

    /// Number of additional iterations to run (1 iteration is always run)
    #[arg(
        short = 'n',
        long = "additional-iterations",
        value_name = "N",
        default_value = "0",
        global = true
    )]
    pub additional_iterations: u32,

    /// Enable debug logging to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// TOML file with tool paths and timeouts
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Window name to wait for
    #[arg(short = 'w', long = "window-name")]
    pub window_name: Option<String>,

    /// Window class to wait for instead of the base name of the command
    #[arg(short = 'c', long = "class-name")]
    pub class_name: Option<String>,

    /// Script to run to prepare a run
    #[arg(short = 'p', long = "prepare-script")]
    pub prepare_script: Option<String>,

    /// Args to provide to the prepare script
    #[arg(long = "prepare-script-args", value_name = "ARG")]
    pub prepare_script_args: Vec<String>,

    /// Script to run to restore after a run
    #[arg(short = 'r', long = "restore-script")]
    pub restore_script: Option<String>,

    /// Args to provide to the restore script
    #[arg(long = "restore-script-args", value_name = "ARG")]
    pub restore_script_args: Vec<String>,

    /// Don't trace the process, just time the total execution
    #[arg(short = 't', long = "no-trace")]
    pub no_trace: bool,

    /// Run command through snap run
    #[arg(short = 's', long = "use-snap-run")]
    pub use_snap_run: bool,

    /// Discard the snap namespace before running the snap
    #[arg(short = 'd', long = "discard-snap-ns")]
    pub discard_snap_ns: bool,

    /// Log file for the run command's stdout
    #[arg(long = "cmd-stdout", value_name = "FILE")]
    pub cmd_stdout: Option<PathBuf>,

    /// Log file for the run command's stderr
    #[arg(long = "cmd-stderr", value_name = "FILE")]
    pub cmd_stderr: Option<PathBuf>,

    /// Output results in JSON
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// File to write results to (stdout if omitted)
    #[arg(short = 'o', long = "output-file", value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Don't wait for the window to appear, just run until the program exits
    #[arg(long = "no-window-wait")]
    pub no_window_wait: bool,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

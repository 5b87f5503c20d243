use anyhow::{Context, Result};
use clap::Parser;
use startrace::cli::{Cli, Commands, RunArgs};
use startrace::collaborators::Collaborators;
use startrace::config::{RunConfiguration, ToolConfig};
use startrace::files::ensure_exists_and_open;
use startrace::system::find_in_path;
use startrace::trial::TrialRunner;
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Load tool settings from `--config`, or use the defaults
fn load_tools(path: Option<&std::path::Path>) -> Result<ToolConfig> {
    match path {
        Some(path) => ToolConfig::from_file(path),
        None => Ok(ToolConfig::default()),
    }
}

fn run(cli_errors: bool, additional: u32, args: RunArgs, tools: &ToolConfig) -> Result<()> {
    let config = RunConfiguration::from_cli(args, cli_errors, additional);
    config.validate()?;

    if tools.sudo && find_in_path("sudo").is_none() {
        anyhow::bail!("cannot find sudo (set `sudo = false` in the config file to run without it)");
    }

    // open the destination up front so a bad path fails before any trial
    let mut out: Box<dyn Write> = match &config.output_file {
        Some(path) => Box::new(
            ensure_exists_and_open(path, true).context("Failed to open output file")?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let collaborators = Collaborators::from_config(tools);
    let results = TrialRunner::new(&config, &collaborators)
        .with_reap_timeout(Duration::from_secs(tools.reap_timeout_secs))
        .run_all()?;

    results.render(config.output_mode, &mut out)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(cli.debug);

    let tools = load_tools(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run(cli.show_errors, cli.additional_iterations, args, &tools)?,
    }

    Ok(())
}

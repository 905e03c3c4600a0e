use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vigil::agent::SecurityAgent;
use vigil::build_info::BuildInfo;
use vigil::cli::{Cli, Command, OutputFormat};
use vigil::config::AgentConfig;
use vigil::dispatch::{InMemoryTransport, JsonLinesTransport, Transport};
use vigil::replay::{replay, ReplayDocument, ReplaySummary};

/// Initialize tracing subscriber for debug output
///
/// `--debug` enables everything; otherwise `VIGIL_LOG` (or `RUST_LOG`) picks
/// the filter, and without either nothing is logged.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else if let Ok(filter) = EnvFilter::try_from_env("VIGIL_LOG") {
        filter
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AgentConfig> {
    match path {
        Some(path) => AgentConfig::from_file(path)
            .with_context(|| format!("Failed to load agent configuration {}", path.display())),
        None => Ok(AgentConfig::default()),
    }
}

fn print_summary(summary: &ReplaySummary, agent: &SecurityAgent) {
    let stats = agent.queue_stats();

    println!("Operations registered:  {}", summary.operations);
    println!("Events dispatched:      {}", summary.dispatched);
    println!("Events suppressed:      {}", summary.suppressed);
    println!("Agent-internal dropped: {}", summary.dropped_internal);
    println!("Empty operations:       {}", summary.dropped_empty);
    println!("Backpressure drops:     {}", summary.dropped_backpressure);
    println!("Exit events:            {}", summary.exit_events);
    println!("Events sent:            {}", stats.total_sent);
    if stats.total_failed > 0 || stats.total_discarded > 0 {
        println!(
            "Send failures:          {} failed, {} discarded at shutdown",
            stats.total_failed, stats.total_discarded
        );
    }

    if !summary.api_ids.is_empty() {
        println!();
        println!("API ids:");
        println!("─────────────────────────────────────────");
        for (api_id, count) in &summary.api_ids {
            println!("{:<40} {}", api_id, count);
        }
    }
}

fn run_replay(file: &Path, summary_only: bool, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let document = ReplayDocument::from_file(file)?;

    let transport: Arc<dyn Transport> = if summary_only {
        Arc::new(InMemoryTransport::new())
    } else {
        Arc::new(JsonLinesTransport::new(std::io::stdout()))
    };

    let agent = SecurityAgent::initialise(config, transport).context("Agent initialisation failed")?;
    let summary = replay(&agent, document);

    // Flush the sidecar before reporting.
    agent.deactivate();

    if summary_only {
        print_summary(&summary, &agent);
    }
    Ok(())
}

fn print_build_info(format: OutputFormat) -> Result<()> {
    let info = BuildInfo::embedded().context("Embedded build identity is invalid")?;
    match format {
        OutputFormat::Text => {
            println!("collector_version: {}", info.collector_version);
            println!("json_version:      {}", info.json_version);
            println!("build_time:        {}", info.build_time);
            println!("commit:            {}", info.commit);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Replay { file, summary, config } => run_replay(&file, summary, config.as_deref())?,
        Command::BuildInfo { format } => print_build_info(format)?,
    }

    Ok(())
}

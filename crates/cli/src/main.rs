use crate::{
    error::CliError,
    exit::ExitCode,
    output::AdapterRow,
};
use clap::Parser;
use commands::Commands;
use engine_config::{
    config::{ENV_STATE_DIR, EngineConfig},
    env::EnvSource,
};
use engine_core::{
    mapping::IdResolver,
    progress::ProgressService,
    state::{StateStore, checkpoint::CheckpointStore, sled_store::SledStateStore},
};
use engine_runtime::inspect::{self, AdapterStatus};
use model::{core::identifiers::AdapterId, execution::mapping::Namespace};
use std::{path::PathBuf, sync::Arc};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit;
mod output;

#[derive(Parser)]
#[command(
    name = "listmig",
    version,
    about = "Inspect and control stored directory migrations"
)]
struct Cli {
    #[arg(long, global = true, help = "State directory (defaults to ~/.listmig/state)")]
    state_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Read LISTMIG_* settings from this .env file")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(Cli::parse()).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.state_dir, cli.env_file)?;
    let store = open_state_store(&config)?;

    match cli.command {
        Commands::Adapters { json } => list_adapters(store.clone(), json).await?,
        Commands::Status { adapter, json } => {
            let checkpoints = existing_scope(&store, &adapter).await?;
            let status = AdapterStatus::load(&checkpoints).await?;
            if json {
                output::print_json(&status)?;
            } else {
                print!("{}", output::status_table(&adapter, &status));
            }
        }
        Commands::Logs { adapter, after, json } => {
            let checkpoints = existing_scope(&store, &adapter).await?;
            let progress = ProgressService::new(checkpoints)
                .with_limits(config.log_retention, config.log_page_size);
            show_logs(&progress, after, json).await?;
        }
        Commands::Mappings { adapter, entity, json } => {
            let checkpoints = existing_scope(&store, &adapter).await?;
            let namespace = Namespace::side_table(AdapterId::new(adapter), entity.as_str());
            let mappings = IdResolver::new(checkpoints).mappings(&namespace).await?;
            if json {
                output::print_json(&mappings)?;
            } else {
                print!("{}", output::mappings_table(&mappings));
            }
        }
        Commands::Abort { adapter } => {
            let checkpoints = existing_scope(&store, &adapter).await?;
            if inspect::abort_stored(&checkpoints).await? {
                println!("Abort requested for '{adapter}'; queued batches will not run");
            } else {
                println!("Nothing to abort for '{adapter}'");
            }
        }
        Commands::Reset { adapter, keep_mappings } => {
            let checkpoints = existing_scope(&store, &adapter).await?;
            inspect::reset_stored(&checkpoints, keep_mappings).await?;
            let kept = if keep_mappings { " (id mappings kept)" } else { "" };
            println!("Reset stored state for '{adapter}'{kept}");
        }
    }

    store.flush().await?;
    Ok(())
}

/// Defaults, then the process environment, then `--env-file`, then
/// `--state-dir`.
fn load_config(
    state_dir: Option<PathBuf>,
    env_file: Option<PathBuf>,
) -> Result<EngineConfig, CliError> {
    let mut env = EnvSource::from_process();
    if let Some(path) = env_file {
        env.load_file(&path)?;
    }
    if let Some(dir) = state_dir {
        env.set(ENV_STATE_DIR, dir.to_string_lossy());
    }
    Ok(EngineConfig::from_env(&env)?)
}

fn open_state_store(config: &EngineConfig) -> Result<Arc<dyn StateStore>, CliError> {
    let store = SledStateStore::open(&config.state_dir).map_err(|e| CliError::OpenStore {
        path: config.state_dir.display().to_string(),
        source: e.into(),
    })?;
    debug!(state_dir = %config.state_dir.display(), "Opened state store");
    Ok(Arc::new(store))
}

async fn existing_scope(
    store: &Arc<dyn StateStore>,
    adapter: &str,
) -> Result<CheckpointStore, CliError> {
    if !store.scopes().await?.iter().any(|s| s == adapter) {
        return Err(CliError::UnknownAdapter(adapter.to_string()));
    }
    Ok(CheckpointStore::new(store.clone(), AdapterId::new(adapter)))
}

async fn list_adapters(store: Arc<dyn StateStore>, as_json: bool) -> Result<(), CliError> {
    let mut rows = Vec::new();
    for scope in store.scopes().await? {
        let checkpoints = CheckpointStore::new(store.clone(), AdapterId::new(scope.as_str()));
        let status = AdapterStatus::load(&checkpoints).await?;
        rows.push(AdapterRow {
            stage: status.stage_label(),
            percent: status.progress.percent,
            in_progress: status.in_progress(),
            adapter_id: scope,
        });
    }

    if as_json {
        output::print_json(&rows)
    } else {
        print!("{}", output::adapters_table(&rows));
        Ok(())
    }
}

/// Prints every entry after `after`, one page at a time.
async fn show_logs(progress: &ProgressService, after: u64, as_json: bool) -> Result<(), CliError> {
    let mut cursor = after;
    loop {
        let page = progress.get_logs(cursor).await?;
        if page.entries.is_empty() {
            debug!(cursor, "Reached the end of the run log");
            return Ok(());
        }
        output::print_logs(&page.entries, as_json)?;
        cursor = page.cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_reads_a_cursor_and_prints_once() {
        let args = ["listmig", "logs", "--adapter", "bd", "--after", "12"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Logs { adapter, after, json } => {
                assert_eq!(adapter, "bd");
                assert_eq!(after, 12);
                assert!(!json);
            }
            _ => panic!("expected the logs command"),
        }
    }

    #[test]
    fn logs_has_no_follow_mode() {
        assert!(Cli::try_parse_from(["listmig", "logs", "--adapter", "bd", "--follow"]).is_err());
    }
}

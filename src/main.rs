//! Strata CLI entrypoint.
//!
//! This is the main entrypoint for the strata command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use strata::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use strata::config::{
    ConfigParser, DeployConfig, DescriptorValidator, PROVIDER_TOKEN_VAR, ProviderKind,
    StateBackend, find_config_file,
};
use strata::error::{ConfigError, EXIT_FATAL, EXIT_SUCCESS, Result, StrataError};
use strata::planner::{DependencyGraph, EngineOptions, Orchestrator, Plan, PlanCompiler};
use strata::provider::{DEFAULT_TIMEOUT_SECS, DryRunProvider, HttpProvider, ResourceProvider};
use strata::state::{
    LocalStateStore, MemoryStateStore, S3StateStore, STATE_DIR, StateStore, generate_holder_id,
    take_snapshot,
};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.output == OutputFormat::Json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply {
            yes,
            workers,
            max_retries,
            continue_independent,
            no_rollback,
            dry_run,
        } => {
            let overrides = ApplyOverrides {
                workers,
                max_retries,
                continue_independent,
                no_rollback,
            };
            cmd_apply(cli.config.as_ref(), yes, dry_run, &overrides, &formatter).await
        }
        Commands::Status => cmd_status(cli.config.as_ref(), &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Engine settings given on the command line.
struct ApplyOverrides {
    workers: Option<usize>,
    max_retries: Option<u32>,
    continue_independent: bool,
    no_rollback: bool,
}

impl ApplyOverrides {
    /// Layers the flags over the document's engine section.
    fn engine_options(&self, config: &DeployConfig) -> EngineOptions {
        let mut options = EngineOptions::from(&config.engine);
        if let Some(workers) = self.workers {
            options.workers = workers.max(1);
        }
        if let Some(max_retries) = self.max_retries {
            options.max_retries = max_retries;
        }
        if self.continue_independent {
            options.continue_independent = true;
        }
        if self.no_rollback {
            options.rollback_on_failure = false;
        }
        options
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<u8> {
    info!("Initializing new Strata project in: {}", path.display());

    let config_path = path.join("strata.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(EXIT_SUCCESS);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let config_template = include_str!("../templates/strata.yaml");
    std::fs::write(&config_path, config_template)?;
    eprintln!("Created: {}", config_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Strata")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit strata.yaml with your account, regions and resources");
    eprintln!("  2. Put {PROVIDER_TOKEN_VAR} in .env when using the http provider");
    eprintln!("  3. Run 'strata validate' to check your configuration");
    eprintln!("  4. Run 'strata plan' to see the deployment batches");
    eprintln!("  5. Run 'strata apply' to deploy");

    Ok(EXIT_SUCCESS)
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let config = load_config(&config_file)?;
    let report = DescriptorValidator::new().collect(&config);

    emit(formatter, &formatter.format_validation(&report, show_warnings));

    if !report.is_valid() {
        return Ok(EXIT_FATAL);
    }

    // Cycles are only found once the graph is built.
    let graph = DependencyGraph::from_config(&config)?;
    if !formatter.is_json() {
        eprintln!("\nConfiguration summary:");
        eprintln!("  Account: {}", config.account);
        eprintln!("  Regions: {}", config.regions().join(", "));
        eprintln!("  Resources: {}", graph.descriptor_count());
        eprintln!("  Deployment units: {}", graph.unit_count());
    }

    Ok(EXIT_SUCCESS)
}

/// Show deployment plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let plan = compile_plan(&config, state_store.as_ref()).await?;

    emit(formatter, &formatter.format_plan(&plan, detailed));

    Ok(EXIT_SUCCESS)
}

/// Apply deployment plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    dry_run: bool,
    overrides: &ApplyOverrides,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let plan = compile_plan(&config, state_store.as_ref()).await?;

    if !formatter.is_json() {
        eprintln!("{}", formatter.format_plan(&plan, false));
    }

    // Confirm
    if !auto_approve && !plan.is_noop() {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(EXIT_SUCCESS);
        }
    }

    let options = overrides.engine_options(&config);

    let (provider, store): (Arc<dyn ResourceProvider>, Arc<dyn StateStore>) = if dry_run {
        info!("Dry run: stored state will not be modified");
        let snapshot = take_snapshot(state_store.as_ref()).await?;
        (
            Arc::new(DryRunProvider::new()),
            Arc::new(MemoryStateStore::from_snapshot(&snapshot)),
        )
    } else {
        (create_provider(&config)?, Arc::from(state_store))
    };

    let holder = generate_holder_id();
    let lock = store.acquire_lock(&holder).await?;
    debug!("Holding state lock {} as {holder}", lock.lock_id);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight units");
            let _ = cancel_tx.send(true);
        }
    });

    let orchestrator =
        Orchestrator::new(provider, Arc::clone(&store), options).with_cancellation(cancel_rx);
    let result = orchestrator.apply(&plan).await;

    ctrl_c.abort();
    if let Err(e) = store.release_lock(&lock.lock_id).await {
        error!("Failed to release state lock {}: {e}", lock.lock_id);
    }

    let report = result?;
    emit(formatter, &formatter.format_report(&report));

    Ok(report.exit_code())
}

/// Show stored state against the document.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<u8> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    let snapshot = take_snapshot(state_store.as_ref()).await?;
    let graph = DependencyGraph::from_config(&config)?;
    let plan = PlanCompiler::new().compile_with_state(&graph, &snapshot);

    emit(formatter, &formatter.format_drift(&plan, &snapshot));

    Ok(EXIT_SUCCESS)
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show { region } => {
            let records: Vec<_> = state_store
                .list()
                .await?
                .into_iter()
                .filter(|r| region.as_ref().is_none_or(|region| r.region == *region))
                .collect();
            let lock = state_store.get_lock_info().await?;
            emit(formatter, &formatter.format_states(&records, lock.as_ref()));
        }
        StateCommands::Lock { holder } => {
            let holder_str = holder.as_deref().unwrap_or("");
            let lock = state_store.acquire_lock(holder_str).await?;
            emit(
                formatter,
                &formatter.message("success", &format!("State locked: {}", lock.lock_id)),
            );
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = state_store.get_lock_info().await? {
                    state_store.release_lock(&lock_info.lock_id).await?;
                    emit(formatter, &formatter.message("success", "State forcefully unlocked."));
                } else {
                    emit(formatter, &formatter.message("warning", "State is not locked."));
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                emit(formatter, &formatter.message("success", "State unlocked."));
            } else {
                emit(
                    formatter,
                    &formatter.message("error", "Please provide --lock-id or use --force"),
                );
                return Ok(EXIT_FATAL);
            }
        }
    }

    Ok(EXIT_SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output: JSON to stdout, text to stderr.
fn emit(formatter: &OutputFormatter, output: &str) {
    if formatter.is_json() {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{output}");
    } else {
        eprintln!("{output}");
    }
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory holding the configuration file.
fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Loads `.env` and the document with environment overrides.
fn load_config(config_file: &Path) -> Result<DeployConfig> {
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(config_file));
    parser.load_dotenv()?;
    parser.load_with_env(config_file)
}

/// Loads configuration and creates appropriate state store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(DeployConfig, Box<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    let config = load_config(&config_file)?;

    DescriptorValidator::new().validate_config(&config)?;

    let state_store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config.state.path.as_ref().map_or_else(
                || config_dir(&config_file).join(STATE_DIR),
                PathBuf::from,
            );
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.as_deref().ok_or_else(|| {
                StrataError::Config(ConfigError::MissingSetting {
                    name: String::from("state.bucket"),
                })
            })?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    Ok((config, state_store))
}

/// Builds the graph and compiles it against the stored state.
async fn compile_plan(config: &DeployConfig, store: &dyn StateStore) -> Result<Plan> {
    let graph = DependencyGraph::from_config(config)?;
    let snapshot = take_snapshot(store).await?;
    let plan = PlanCompiler::new().compile_with_state(&graph, &snapshot);

    info!(
        "Compiled {} units into {} batches",
        plan.unit_count(),
        plan.batch_count()
    );
    Ok(plan)
}

/// Creates the provider named by the document.
fn create_provider(config: &DeployConfig) -> Result<Arc<dyn ResourceProvider>> {
    match config.provider.kind {
        ProviderKind::DryRun => Ok(Arc::new(DryRunProvider::new())),
        ProviderKind::Http => {
            let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
                StrataError::Config(ConfigError::MissingSetting {
                    name: String::from("provider.endpoint"),
                })
            })?;
            let timeout = config.provider.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
            let token = ConfigParser::provider_token();
            if token.is_none() {
                warn!("{PROVIDER_TOKEN_VAR} is not set; calling the gateway without a token");
            }
            Ok(Arc::new(HttpProvider::new(endpoint, timeout, token)?))
        }
    }
}

use std::{sync::Arc, time::Duration};

use clap::{Args, CommandFactory, Parser, Subcommand};
use color_eyre::eyre::{Result, bail};
use roadmap::{
	config::AppConfig,
	persistence::{LockManager, RoadmapStore},
	sync::{RepoIdentity, SyncOptions, SyncOrchestrator, SyncStrategy, github::GithubBackend},
};
use v_utils::io::ExpandedPath;

#[derive(Parser)]
#[command(author, version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"), about, long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
	#[arg(long, default_value = "~/.config/roadmap.toml")]
	config: ExpandedPath,
}

#[derive(Subcommand)]
enum Commands {
	/// Run a full sync against a remote backend.
	///  Ex:
	///```rust
	///roadmap sync --dry-run --strategy keep-local
	///```
	Sync(SyncArgs),
	/// Check every issue and milestone file in the store, reporting the ones
	/// that would be excluded from a sync run.
	Validate(NoArgs),
	/// Lock maintenance.
	Locks(LocksArgs),
	/// Generate shell completions.
	Completions(CompletionsArgs),
}

#[derive(Args)]
struct NoArgs {}

#[derive(Args)]
struct SyncArgs {
	/// Compare and report only; skip the apply and baseline stages.
	#[arg(long)]
	dry_run: bool,
	/// Conflict resolution strategy for both-changed issues.
	#[arg(long, value_enum, default_value_t = SyncStrategy::Manual)]
	strategy: SyncStrategy,
	/// Backend to sync with (defaults to the configured one).
	#[arg(long)]
	backend: Option<String>,
	/// Include archived issues in the run.
	#[arg(long)]
	include_archived: bool,
	/// Emit the report as JSON instead of the human summary.
	#[arg(long)]
	json: bool,
}

#[derive(Args)]
struct LocksArgs {
	#[command(subcommand)]
	command: LocksCommand,
}

#[derive(Subcommand)]
enum LocksCommand {
	/// Remove stale lock sidecars whose holders are gone.
	Cleanup {
		/// Age in hours before an unheld sidecar counts as stale.
		#[arg(long)]
		stale_hours: Option<u64>,
	},
}

#[derive(Args)]
struct CompletionsArgs {
	shell: clap_complete::Shell,
}

fn main() {
	init_tracing();
	let cli = Cli::parse();

	if let Commands::Completions(args) = &cli.command {
		clap_complete::generate(args.shell, &mut Cli::command(), "roadmap", &mut std::io::stdout());
		std::process::exit(0);
	}

	let config = match AppConfig::read(cli.config) {
		Ok(cfg) => cfg,
		Err(e) => {
			eprintln!("Error: {}", e);
			std::process::exit(2);
		}
	};

	// All the functions here can rely on config being correct.
	let outcome = match cli.command {
		Commands::Sync(sync_args) => sync_command(config, sync_args),
		Commands::Validate(_) => validate_command(config),
		Commands::Locks(locks_args) => locks_command(config, locks_args),
		Commands::Completions(_) => unreachable!("handled before config load"),
	};

	match outcome {
		Ok(code) => std::process::exit(code),
		Err(e) => {
			eprintln!("Error: {}", e);
			std::process::exit(2);
		}
	}
}

fn init_tracing() {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(option_env!("LOG_DIRECTIVES").unwrap_or("info")));
	if let Ok(path) = std::env::var("ROADMAP_TRACE_FILE") {
		let file = std::fs::OpenOptions::new().create(true).append(true).open(path).expect("trace file is writable");
		tracing_subscriber::fmt().json().with_env_filter(filter).with_writer(std::sync::Mutex::new(file)).init();
	} else {
		tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
	}
}

fn build_store(config: &AppConfig) -> Arc<RoadmapStore> {
	let locks = LockManager::new(Duration::from_secs(config.sync.lock_timeout_secs));
	Arc::new(RoadmapStore::with_locks(config.data_dir.clone(), locks))
}

fn sync_command(config: AppConfig, args: SyncArgs) -> Result<i32> {
	let Some(github) = config.github.clone() else {
		bail!("no [github] section in config; add token, owner and repo to sync");
	};
	let backend_name = args.backend.unwrap_or_else(|| config.sync.default_backend.clone());
	if backend_name != github.backend_name {
		bail!("unknown backend {backend_name:?}; configured: {:?}", github.backend_name);
	}

	let store = build_store(&config);
	let backend = GithubBackend::new(github.backend_name.clone(), github.token.clone(), github.owner.clone(), github.repo.clone()).boxed();
	let orchestrator = SyncOrchestrator::new(backend, store)
		.with_workers(config.sync.workers)
		.with_repository(RepoIdentity::new(github.owner, github.repo));

	let opts = SyncOptions {
		dry_run: args.dry_run,
		strategy: args.strategy,
		include_archived: args.include_archived,
	};
	let report = tokio::runtime::Runtime::new()?.block_on(async { orchestrator.run(&opts).await });

	if args.json {
		println!("{}", serde_json::to_string_pretty(&report)?);
	} else {
		print!("{}", report.render());
	}
	Ok(report.exit_code())
}

fn validate_command(config: AppConfig) -> Result<i32> {
	let store = build_store(&config);
	let issues = store.load_all_issues(true);
	let milestones = store.load_all_milestones();

	let mut failures = 0;
	for (path, message) in issues.errors.iter().chain(milestones.errors.iter()) {
		failures += 1;
		println!("{}: {message}", path.display());
	}
	println!("{} issues, {} milestones, {failures} invalid files", issues.entities.len(), milestones.entities.len());
	Ok(if failures > 0 { 1 } else { 0 })
}

fn locks_command(config: AppConfig, args: LocksArgs) -> Result<i32> {
	match args.command {
		LocksCommand::Cleanup { stale_hours } => {
			let store = build_store(&config);
			let hours = stale_hours.unwrap_or(config.sync.lock_stale_hours);
			let cleaned = store.locks().cleanup_stale(store.root(), hours);
			println!("removed {cleaned} stale lock file(s)");
			Ok(0)
		}
	}
}

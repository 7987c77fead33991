use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use transcendence_sync::ledger::{AccountKind, DaoProgram, Identity, KeypairIdentity, TOKEN_DECIMALS};
use transcendence_sync::sync::{FileCacheStore, LocalCache, LoggingEventHandler};
use transcendence_sync::utils::format_token_amount;
use transcendence_sync::{RpcClient, SyncConfig, SyncOrchestrator};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting Transcendence sync client");

	let config = match SyncConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	info!("RPC endpoint {} ({})", config.rpc_url, config.commitment);
	info!("Program {}", config.program_id);

	let client = match RpcClient::new(&config.rpc_url, &config.ws_url, config.request_timeout) {
		Ok(client) => client
			.with_commitment(config.commitment)
			.with_confirmation_timeout(config.confirmation_timeout),
		Err(e) => {
			error!("Failed to create RPC client: {}", e);
			return;
		}
	};

	let identity = match KeypairIdentity::load_or_generate(&config.keypair_path).await {
		Ok(identity) => identity,
		Err(e) => {
			error!(
				"Failed to load keypair from {}: {}",
				config.keypair_path.display(),
				e
			);
			return;
		}
	};
	info!("Using identity {}", identity.address());

	let identity: Arc<dyn Identity> = Arc::new(identity);
	// Held for the lifetime of the process so the orchestrator keeps its identity
	let (_identity_tx, identity_rx) = watch::channel(Some(identity));

	let cache = LocalCache::new(Arc::new(FileCacheStore::new(config.cache_dir.clone())));

	let mut orchestrator = SyncOrchestrator::new(
		Arc::new(client),
		DaoProgram::new(config.program_id),
		cache,
		identity_rx,
		config.realtime,
	);
	orchestrator.register_handler(Box::new(LoggingEventHandler));

	orchestrator.start().await;
	log_summary(&orchestrator);

	orchestrator
		.run(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				error!("Failed to listen for shutdown signal: {}", e);
			}
		})
		.await;
}

fn log_summary(orchestrator: &SyncOrchestrator) {
	match orchestrator.user_profile() {
		Some(profile) if orchestrator.has_profile() => info!(
			"Profile {}: {} tokens earned, {} hours worked, reputation {}",
			profile.address,
			format_token_amount(profile.record.tokens_earned, TOKEN_DECIMALS),
			profile.record.hours_worked,
			profile.record.reputation_score
		),
		Some(_) => warn!("No profile on the ledger, showing placeholder data"),
		None => info!("No profile yet, create one to start logging activities"),
	}

	if let Some(dao) = orchestrator.dao_state() {
		info!(
			"DAO: {} active users, {} activities, {} tokens circulating",
			dao.record.active_users,
			dao.record.total_activities,
			format_token_amount(dao.record.circulating_supply, TOKEN_DECIMALS)
		);
	}

	let source = orchestrator
		.source(AccountKind::Activity)
		.map_or_else(|| "nowhere".to_string(), |source| source.to_string());
	info!(
		"{} activities ({} pending, from {}), {} strikes, {} cooperatives, {} proposals",
		orchestrator.activities().len(),
		orchestrator.pending_activity_count(),
		source,
		orchestrator.strikes().len(),
		orchestrator.cooperatives().len(),
		orchestrator.proposals().len()
	);
}

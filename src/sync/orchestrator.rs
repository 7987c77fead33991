//! Sync orchestrator and integration point for the sync services.
//!
//! `SyncOrchestrator` owns the in-memory record set and keeps it in step with the ledger:
//!
//! - Writes are validated, derived, existence-checked, encoded and submitted. A
//!   confirmed write re-reads the affected kinds. A write whose submission cannot be
//!   delivered is applied to the local view and the cache as one set replace.
//! - Reads walk the remote, cache and seed tiers per record kind.
//! - Push notifications are drained in bursts and folded into one reload per kind.
//! - Identity changes reload everything, or clear all user data on disconnect.
//!
//! Every public method takes `&mut self` and runs to completion, so two writes never
//! race for the same address.

use crate::ledger::{
	AccountKind, Activity, ActivityCategory, Address, DaoProgram, DaoState, Identity, Instruction,
	Keyed, Location, MAX_SEED_LEN, Proposal, ProposalType, SkillType, Strike, TOKEN_DECIMALS,
	UserProfile,
	VerificationEffect, WorkerCoop, decode_account, is_uninitialized,
};
use crate::sync::cache::LocalCache;
use crate::sync::events::{EventDispatcher, ReloadPlan, SyncEvent, SyncEventHandler, plan_reloads};
use crate::sync::observable::{ListenerId, Observable};
use crate::sync::seed::{seed_activities, seed_user_profile};
use crate::sync::state::{RecordSet, Tracked};
use crate::sync::subscriptions::{SubscriptionHandle, SubscriptionManager, SubscriptionTarget};
use crate::sync::tiers::{ReadSource, TieredRead, read_through};
use crate::sync::transport::{ChangeNotification, LedgerTransport, SinkEvent, TransportError};
use crate::sync::types::{SyncError, WriteOutcome};
use crate::utils::{format_token_amount, short_signature};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(60);

/// Source of identity changes. `None` means no identity is connected.
pub type IdentityReceiver = watch::Receiver<Option<Arc<dyn Identity>>>;

type ProfileRead = (Option<Keyed<UserProfile>>, ReadSource);

pub struct SyncOrchestrator {
	transport: Arc<dyn LedgerTransport>,
	program: DaoProgram,
	cache: LocalCache,

	// Identity
	identity_rx: IdentityReceiver,
	identity: Option<Arc<dyn Identity>>,

	// Real-time updates
	subscriptions: SubscriptionManager,
	realtime_handles: Vec<SubscriptionHandle>,
	realtime_enabled: bool,
	notifications_tx: mpsc::UnboundedSender<SinkEvent>,
	notifications_rx: mpsc::UnboundedReceiver<SinkEvent>,
	// Set while subscriptions lost by the transport wait to be re-opened
	resubscribe: Option<ExponentialBackoff>,
	resubscribe_delay: Option<Duration>,

	state: Observable<RecordSet>,
	dispatcher: EventDispatcher,
	id_sequence: u64,
}

impl SyncOrchestrator {
	/// Create an orchestrator for `program`.
	///
	/// The identity currently held by `identity_rx` is adopted without reloading; call
	/// [`start`](Self::start) to perform the initial load. With `realtime_enabled` the
	/// orchestrator subscribes to push notifications whenever an identity connects.
	pub fn new(
		transport: Arc<dyn LedgerTransport>,
		program: DaoProgram,
		cache: LocalCache,
		mut identity_rx: IdentityReceiver,
		realtime_enabled: bool,
	) -> Self {
		let identity = identity_rx.borrow_and_update().clone();
		let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
		Self {
			subscriptions: SubscriptionManager::new(transport.clone()),
			transport,
			program,
			cache,
			identity_rx,
			identity,
			realtime_handles: Vec::new(),
			realtime_enabled,
			notifications_tx,
			notifications_rx,
			resubscribe: None,
			resubscribe_delay: None,
			state: Observable::default(),
			dispatcher: EventDispatcher::new(),
			id_sequence: 0,
		}
	}

	pub fn program(&self) -> &DaoProgram {
		&self.program
	}

	pub fn records(&self) -> &RecordSet {
		self.state.get()
	}

	pub fn user_profile(&self) -> Option<&Keyed<UserProfile>> {
		self.state.get().user_profile.as_ref()
	}

	pub fn dao_state(&self) -> Option<&Keyed<DaoState>> {
		self.state.get().dao_state.as_ref()
	}

	pub fn activities(&self) -> &[Keyed<Activity>] {
		&self.state.get().activities
	}

	pub fn strikes(&self) -> &[Keyed<Strike>] {
		&self.state.get().strikes
	}

	pub fn cooperatives(&self) -> &[Keyed<WorkerCoop>] {
		&self.state.get().cooperatives
	}

	pub fn proposals(&self) -> &[Keyed<Proposal>] {
		&self.state.get().proposals
	}

	pub fn source(&self, kind: AccountKind) -> Option<ReadSource> {
		self.state.get().source(kind)
	}

	pub fn identity_address(&self) -> Option<Address> {
		self.identity.as_ref().map(|identity| identity.address())
	}

	/// True when the connected identity has a real profile. A seed profile does not count.
	pub fn has_profile(&self) -> bool {
		self.state.get().own_profile().is_some()
	}

	/// Tokens earned by the displayed profile, in base units.
	pub fn total_tokens_earned(&self) -> u64 {
		self.user_profile()
			.map_or(0, |profile| profile.record.tokens_earned)
	}

	pub fn pending_activity_count(&self) -> usize {
		self.activities()
			.iter()
			.filter(|activity| activity.record.is_pending())
			.count()
	}

	pub fn is_realtime(&self) -> bool {
		!self.realtime_handles.is_empty()
	}

	pub fn subscriptions(&self) -> &SubscriptionManager {
		&self.subscriptions
	}

	/// Register a listener called synchronously after every change to the record set.
	pub fn on_change(&mut self, listener: impl Fn(&RecordSet) + Send + Sync + 'static) -> ListenerId {
		self.state.subscribe(listener)
	}

	pub fn remove_listener(&mut self, id: ListenerId) -> bool {
		self.state.unsubscribe(id)
	}

	pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
		self.dispatcher.register_handler(handler);
	}

	/// Initial load, plus real-time updates when an identity is already connected.
	pub async fn start(&mut self) {
		self.refresh_all().await;
		if self.identity.is_some() && self.realtime_enabled {
			if let Err(e) = self.enable_realtime().await {
				warn!("Continuing without real-time updates: {}", e);
			}
		}
	}

	// Writes

	/// One-time setup of the DAO state account, with the connected identity as authority.
	pub async fn initialize_dao(&mut self) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "initialize_dao";
		let identity = self.require_identity()?;
		let authority = identity.address();

		let (address, bump) = self.program.dao_state_address()?;
		if self.exists(&address).await {
			return Ok(self.already_exists(OPERATION, address).await);
		}
		let instruction = self.program.initialize_dao(authority)?;
		let state = Keyed::new(address, DaoState::new(authority, bump));
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::DaoState],
				move |set| set.dao_state = Some(state),
			)
			.await)
	}

	pub async fn create_user_profile(
		&mut self,
		union_membership: bool,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "create_user_profile";
		let identity = self.require_identity()?;
		let owner = identity.address();

		let (address, bump) = self.program.user_profile_address(&owner)?;
		if self.exists(&address).await {
			return Ok(self.already_exists(OPERATION, address).await);
		}
		let instruction = self.program.create_user_profile(owner, union_membership)?;
		let profile = Keyed::new(
			address,
			UserProfile::new(owner, union_membership, Utc::now(), bump),
		);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::UserProfile],
				move |set| set.user_profile = Some(profile),
			)
			.await)
	}

	/// Record a new activity under a generated id.
	pub async fn create_activity(
		&mut self,
		category: ActivityCategory,
		description: impl Into<String>,
		location: Location,
		estimated_hours: u32,
	) -> Result<WriteOutcome, SyncError> {
		let owner = self.require_identity()?.address();
		let id = self.generate_id(&owner);
		self.create_activity_with_id(&id, category, description, location, estimated_hours)
			.await
	}

	pub async fn create_activity_with_id(
		&mut self,
		id: &str,
		category: ActivityCategory,
		description: impl Into<String>,
		location: Location,
		estimated_hours: u32,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "create_activity";
		let identity = self.require_identity()?;
		validate_id(id)?;
		let description = description.into();
		if description.trim().is_empty() {
			return Err(SyncError::PreconditionFailed("description is empty".into()));
		}
		if estimated_hours == 0 {
			return Err(SyncError::PreconditionFailed(
				"estimated hours must be positive".into(),
			));
		}
		if !location.is_finite() {
			return Err(SyncError::PreconditionFailed(
				"location coordinates must be finite".into(),
			));
		}

		let creator = identity.address();
		let (address, bump) = self.program.record_address(AccountKind::Activity, id)?;
		let activity = Activity::new(
			creator,
			category,
			description.clone(),
			location.clone(),
			estimated_hours,
			Utc::now(),
			bump,
		)
		.map_err(|violation| SyncError::PreconditionFailed(violation.to_string()))?;
		if self.exists(&address).await {
			return Ok(self.already_exists(OPERATION, address).await);
		}

		let instruction = self.program.create_activity(
			address,
			creator,
			category,
			description,
			location,
			estimated_hours,
		)?;
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::Activity],
				move |set| set.upsert(Keyed::new(address, activity)),
			)
			.await)
	}

	/// Add the connected identity's verdict to the activity at `activity`.
	///
	/// The third approval verifies the activity and credits its reward to the creator.
	pub async fn verify_activity(
		&mut self,
		activity: &Address,
		approved: bool,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "verify_activity";
		let identity = self.require_identity()?;
		let verifier = identity.address();

		let Some(mut located) = self.locate::<Activity>(activity).await else {
			return Ok(self
				.refuse(OPERATION, format!("activity {} not found", activity))
				.await);
		};
		let effect = match located.record.apply_verification(verifier, approved) {
			Ok(effect) => effect,
			Err(violation) => return Ok(self.refuse(OPERATION, violation.to_string()).await),
		};
		let (creator_profile, _) = self
			.program
			.user_profile_address(&located.record.creator)?;
		let instruction =
			self.program
				.verify_activity(*activity, creator_profile, verifier, approved);

		let affected: &[AccountKind] = if self.own_profile_address() == Some(creator_profile) {
			&[AccountKind::Activity, AccountKind::UserProfile]
		} else {
			&[AccountKind::Activity]
		};
		let verified = effect == VerificationEffect::Verified;
		Ok(self
			.commit(OPERATION, vec![instruction], identity.as_ref(), affected, move |set| {
				if verified {
					credit_creator(set, creator_profile, &located.record);
				}
				set.upsert(located);
			})
			.await)
	}

	/// Verify several activities in one atomic submission.
	///
	/// Activities the rules refuse are skipped; the batch is refused only when none is left.
	pub async fn batch_verify_activities(
		&mut self,
		activities: &[Address],
		approved: bool,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "batch_verify_activities";
		let identity = self.require_identity()?;
		if activities.is_empty() {
			return Err(SyncError::PreconditionFailed("no activities to verify".into()));
		}
		let verifier = identity.address();

		let mut instructions = Vec::new();
		let mut updates: Vec<(Keyed<Activity>, Address, bool)> = Vec::new();
		let mut refused = Vec::new();
		for address in activities {
			if updates.iter().any(|(activity, _, _)| activity.address == *address) {
				continue;
			}
			let Some(mut located) = self.locate::<Activity>(address).await else {
				refused.push(format!("activity {} not found", address));
				continue;
			};
			match located.record.apply_verification(verifier, approved) {
				Ok(effect) => {
					let (creator_profile, _) = self
						.program
						.user_profile_address(&located.record.creator)?;
					instructions.push(self.program.verify_activity(
						*address,
						creator_profile,
						verifier,
						approved,
					));
					updates.push((located, creator_profile, effect == VerificationEffect::Verified));
				}
				Err(violation) => refused.push(format!("activity {}: {}", address, violation)),
			}
		}

		if instructions.is_empty() {
			return Ok(self.refuse(OPERATION, refused.join("; ")).await);
		}
		if !refused.is_empty() {
			warn!(
				"Skipping {} of {} activities: {}",
				refused.len(),
				activities.len(),
				refused.join("; ")
			);
		}

		let own_profile = self.own_profile_address();
		let affected: &[AccountKind] = if updates
			.iter()
			.any(|(_, creator_profile, _)| Some(*creator_profile) == own_profile)
		{
			&[AccountKind::Activity, AccountKind::UserProfile]
		} else {
			&[AccountKind::Activity]
		};
		info!("Verifying {} activities in one transaction", instructions.len());
		Ok(self
			.commit(OPERATION, instructions, identity.as_ref(), affected, move |set| {
				for (activity, creator_profile, verified) in updates {
					if verified {
						credit_creator(set, creator_profile, &activity.record);
					}
					set.upsert(activity);
				}
			})
			.await)
	}

	/// Withdraw a pending activity. Only its creator may do so.
	pub async fn delete_activity(&mut self, activity: &Address) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "delete_activity";
		let identity = self.require_identity()?;
		let requester = identity.address();

		let Some(mut located) = self.locate::<Activity>(activity).await else {
			return Ok(self
				.refuse(OPERATION, format!("activity {} not found", activity))
				.await);
		};
		if let Err(violation) = located.record.withdraw(&requester) {
			return Ok(self.refuse(OPERATION, violation.to_string()).await);
		}
		let instruction = self.program.delete_activity(*activity, requester);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::Activity],
				move |set| set.upsert(located),
			)
			.await)
	}

	pub async fn create_strike(
		&mut self,
		company: impl Into<String>,
		union_verification: bool,
		participant_count: u32,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "create_strike";
		let identity = self.require_identity()?;
		let company = company.into();
		if company.trim().is_empty() {
			return Err(SyncError::PreconditionFailed("company is empty".into()));
		}
		if participant_count == 0 {
			return Err(SyncError::PreconditionFailed(
				"a strike needs at least one participant".into(),
			));
		}

		let creator = identity.address();
		let id = self.generate_id(&creator);
		let (address, bump) = self.program.record_address(AccountKind::Strike, &id)?;
		if self.exists(&address).await {
			return Ok(self.already_exists(OPERATION, address).await);
		}
		let strike = Strike::new(
			creator,
			company.clone(),
			union_verification,
			participant_count,
			Utc::now(),
			bump,
		);
		let instruction = self.program.create_strike(
			address,
			creator,
			company,
			union_verification,
			participant_count,
		);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::Strike],
				move |set| set.upsert(Keyed::new(address, strike)),
			)
			.await)
	}

	/// Contribute `amount` base units to a strike fund.
	pub async fn support_strike(
		&mut self,
		strike: &Address,
		amount: u64,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "support_strike";
		let identity = self.require_identity()?;
		if amount == 0 {
			return Err(SyncError::PreconditionFailed("amount must be positive".into()));
		}
		let supporter = identity.address();

		let Some(profile) = self.state.get().own_profile().map(|p| p.address) else {
			return Ok(self
				.refuse(OPERATION, "a user profile is required".into())
				.await);
		};
		let Some(mut located) = self.locate::<Strike>(strike).await else {
			return Ok(self
				.refuse(OPERATION, format!("strike {} not found", strike))
				.await);
		};
		located.record.apply_support(supporter, amount);
		let instruction = self
			.program
			.support_strike(*strike, profile, supporter, amount);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::Strike, AccountKind::UserProfile],
				move |set| {
					set.upsert(located);
					if let Some(own) = set.user_profile.as_mut() {
						own.record.credit_support();
					}
				},
			)
			.await)
	}

	pub async fn create_worker_coop(
		&mut self,
		business_plan: impl Into<String>,
		funding_goal: u64,
		skill_requirements: Vec<SkillType>,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "create_worker_coop";
		let identity = self.require_identity()?;
		let business_plan = business_plan.into();
		if business_plan.trim().is_empty() {
			return Err(SyncError::PreconditionFailed("business plan is empty".into()));
		}
		if funding_goal == 0 {
			return Err(SyncError::PreconditionFailed(
				"funding goal must be positive".into(),
			));
		}

		let founder = identity.address();
		let id = self.generate_id(&founder);
		let (address, bump) = self.program.record_address(AccountKind::WorkerCoop, &id)?;
		if self.exists(&address).await {
			return Ok(self.already_exists(OPERATION, address).await);
		}
		let coop = WorkerCoop::new(
			founder,
			business_plan.clone(),
			funding_goal,
			skill_requirements.clone(),
			Utc::now(),
			bump,
		);
		let instruction = self.program.create_worker_coop(
			address,
			founder,
			business_plan,
			funding_goal,
			skill_requirements,
		);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::WorkerCoop],
				move |set| set.upsert(Keyed::new(address, coop)),
			)
			.await)
	}

	/// Contribute `amount` base units to a cooperative.
	pub async fn fund_worker_coop(
		&mut self,
		coop: &Address,
		amount: u64,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "fund_worker_coop";
		let identity = self.require_identity()?;
		if amount == 0 {
			return Err(SyncError::PreconditionFailed("amount must be positive".into()));
		}
		let funder = identity.address();

		let Some(profile) = self.state.get().own_profile().map(|p| p.address) else {
			return Ok(self
				.refuse(OPERATION, "a user profile is required".into())
				.await);
		};
		let Some(mut located) = self.locate::<WorkerCoop>(coop).await else {
			return Ok(self
				.refuse(OPERATION, format!("cooperative {} not found", coop))
				.await);
		};
		located.record.apply_funding(amount);
		let instruction = self.program.fund_worker_coop(*coop, profile, funder, amount);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::WorkerCoop, AccountKind::UserProfile],
				move |set| {
					set.upsert(located);
					if let Some(own) = set.user_profile.as_mut() {
						own.record.credit_funding();
					}
				},
			)
			.await)
	}

	pub async fn create_proposal(
		&mut self,
		title: impl Into<String>,
		description: impl Into<String>,
		proposal_type: ProposalType,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "create_proposal";
		let identity = self.require_identity()?;
		let (title, description) = (title.into(), description.into());
		if title.trim().is_empty() {
			return Err(SyncError::PreconditionFailed("title is empty".into()));
		}

		let creator = identity.address();
		let id = self.generate_id(&creator);
		let (address, bump) = self.program.record_address(AccountKind::Proposal, &id)?;
		if self.exists(&address).await {
			return Ok(self.already_exists(OPERATION, address).await);
		}
		let proposal = Proposal::new(
			creator,
			title.clone(),
			description.clone(),
			proposal_type,
			Utc::now(),
			bump,
		);
		let instruction =
			self.program
				.create_proposal(address, creator, title, description, proposal_type);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::Proposal],
				move |set| set.upsert(Keyed::new(address, proposal)),
			)
			.await)
	}

	/// Cast a quadratic vote committing `token_amount` base units.
	pub async fn vote_on_proposal(
		&mut self,
		proposal: &Address,
		in_favor: bool,
		token_amount: u64,
	) -> Result<WriteOutcome, SyncError> {
		const OPERATION: &str = "vote_on_proposal";
		let identity = self.require_identity()?;
		if token_amount == 0 {
			return Err(SyncError::PreconditionFailed(
				"token amount must be positive".into(),
			));
		}
		let voter = identity.address();

		let Some(mut located) = self.locate::<Proposal>(proposal).await else {
			return Ok(self
				.refuse(OPERATION, format!("proposal {} not found", proposal))
				.await);
		};
		let weight = match located
			.record
			.apply_vote(voter, in_favor, token_amount, Utc::now())
		{
			Ok(weight) => weight,
			Err(violation) => return Ok(self.refuse(OPERATION, violation.to_string()).await),
		};
		debug!(
			"Voting on {} with {} tokens, weight {}",
			proposal,
			format_token_amount(token_amount, TOKEN_DECIMALS),
			weight
		);
		let instruction = self
			.program
			.vote_on_proposal(*proposal, voter, in_favor, token_amount);
		Ok(self
			.commit(
				OPERATION,
				vec![instruction],
				identity.as_ref(),
				&[AccountKind::Proposal],
				move |set| set.upsert(located),
			)
			.await)
	}

	// Reads

	/// Reload the connected identity's profile. Returns `None` without an identity.
	///
	/// A ledger that answers "no such account" means the profile does not exist yet;
	/// only a failed ledger read falls back to the cache and then to a seed profile.
	pub async fn load_user_profile(&mut self) -> Option<ReadSource> {
		let Some((profile, source)) = self.read_user_profile().await else {
			debug!("No identity connected, skipping user profile");
			return None;
		};
		self.apply_profile(profile, source).await;
		Some(source)
	}

	pub async fn load_activities(&mut self) -> ReadSource {
		let program = self.program;
		let now = Utc::now();
		let read = read_through::<Activity>(
			self.transport.as_ref(),
			&program.program_id(),
			&self.cache,
			|| seed_activities(&program, now),
		)
		.await;
		self.apply_read(read).await
	}

	pub async fn load_strikes(&mut self) -> ReadSource {
		let read = read_through::<Strike>(
			self.transport.as_ref(),
			&self.program.program_id(),
			&self.cache,
			Vec::new,
		)
		.await;
		self.apply_read(read).await
	}

	pub async fn load_cooperatives(&mut self) -> ReadSource {
		let read = read_through::<WorkerCoop>(
			self.transport.as_ref(),
			&self.program.program_id(),
			&self.cache,
			Vec::new,
		)
		.await;
		self.apply_read(read).await
	}

	pub async fn load_proposals(&mut self) -> ReadSource {
		let read = read_through::<Proposal>(
			self.transport.as_ref(),
			&self.program.program_id(),
			&self.cache,
			Vec::new,
		)
		.await;
		self.apply_read(read).await
	}

	/// Reload the DAO state account. There is no seed tier for it.
	pub async fn load_dao_state(&mut self) -> Option<ReadSource> {
		let read = self.read_dao_state().await;
		self.apply_dao_state(read).await
	}

	/// Reload every record kind, reading them concurrently.
	pub async fn refresh_all(&mut self) {
		let program = self.program;
		let program_id = program.program_id();
		let now = Utc::now();
		let transport = self.transport.as_ref();

		let (profile, dao_state, activities, strikes, cooperatives, proposals) = futures::join!(
			self.read_user_profile(),
			self.read_dao_state(),
			read_through::<Activity>(transport, &program_id, &self.cache, || {
				seed_activities(&program, now)
			}),
			read_through::<Strike>(transport, &program_id, &self.cache, Vec::new),
			read_through::<WorkerCoop>(transport, &program_id, &self.cache, Vec::new),
			read_through::<Proposal>(transport, &program_id, &self.cache, Vec::new),
		);

		if let Some((profile, source)) = profile {
			self.apply_profile(profile, source).await;
		}
		self.apply_dao_state(dao_state).await;
		self.apply_read(activities).await;
		self.apply_read(strikes).await;
		self.apply_read(cooperatives).await;
		self.apply_read(proposals).await;
	}

	/// Read one activity by id straight from the ledger, falling back to the local view.
	pub async fn fetch_activity(&mut self, id: &str) -> Result<Option<Keyed<Activity>>, SyncError> {
		validate_id(id)?;
		let (address, _) = self.program.record_address(AccountKind::Activity, id)?;
		match self.transport.get_account(&address).await {
			Ok(data) => {
				let decoded = match data.as_deref().map(decode_account::<Activity>) {
					Some(Ok(record)) => record,
					Some(Err(e)) => {
						warn!("Activity {} could not be decoded: {}", address, e);
						None
					}
					None => None,
				};
				let Some(record) = decoded else {
					return Ok(None);
				};
				let keyed = Keyed::new(address, record);
				if !self.state.get().is_seeded(AccountKind::Activity) {
					let update = keyed.clone();
					self.state.update(|set| set.upsert(update));
				}
				Ok(Some(keyed))
			}
			Err(e) => {
				warn!("Ledger read of activity {} failed, using local view: {}", id, e);
				Ok(self
					.activities()
					.iter()
					.find(|activity| activity.address == address)
					.cloned())
			}
		}
	}

	// Identity and real-time updates

	/// Adopt a new identity: reload everything, or clear all user data on disconnect.
	pub async fn on_identity_changed(&mut self, identity: Option<Arc<dyn Identity>>) {
		let address = identity.as_ref().map(|identity| identity.address());
		self.disable_realtime().await;
		self.identity = identity;
		self.emit(SyncEvent::IdentityChanged { address }).await;

		match address {
			Some(address) => {
				info!("Identity {} connected, reloading records", address);
				self.refresh_all().await;
				if self.realtime_enabled {
					if let Err(e) = self.enable_realtime().await {
						warn!("Continuing without real-time updates: {}", e);
					}
				}
			}
			None => {
				info!("Identity disconnected, clearing records");
				self.state.set(RecordSet::default());
				self.emit(SyncEvent::Cleared).await;
			}
		}
	}

	/// Subscribe to program-wide changes and to the connected identity's profile.
	/// Does nothing when already enabled.
	pub async fn enable_realtime(&mut self) -> Result<(), SyncError> {
		if self.is_realtime() {
			debug!("Real-time updates already enabled");
			return Ok(());
		}

		let mut targets = vec![SubscriptionTarget::Program(self.program.program_id())];
		if let Some(profile) = self.own_profile_address() {
			targets.push(SubscriptionTarget::Account(profile));
		}
		for target in targets {
			match self
				.subscriptions
				.subscribe(target, self.notifications_tx.clone())
				.await
			{
				Ok(handle) => self.realtime_handles.push(handle),
				Err(e) => {
					self.release_realtime_handles().await;
					return Err(SyncError::Subscription(e));
				}
			}
		}
		self.emit(SyncEvent::RealtimeEnabled).await;
		Ok(())
	}

	pub async fn disable_realtime(&mut self) {
		self.cancel_resubscribe();
		if self.release_realtime_handles().await {
			self.emit(SyncEvent::RealtimeDisabled).await;
		}
	}

	/// Whether subscriptions lost by the transport are waiting to be re-opened.
	pub fn is_resubscribe_pending(&self) -> bool {
		self.resubscribe.is_some()
	}

	/// Try to re-open real-time subscriptions the transport lost. On success everything
	/// is reloaded, since notifications may have been missed in between. Returns whether
	/// real-time updates are running again.
	pub async fn retry_realtime(&mut self) -> bool {
		if self.resubscribe.is_none() {
			return false;
		}
		if self.identity.is_none() || !self.realtime_enabled {
			self.cancel_resubscribe();
			return false;
		}

		match self.enable_realtime().await {
			Ok(()) => {
				info!("Real-time updates restored");
				self.cancel_resubscribe();
				self.refresh_all().await;
				true
			}
			Err(e) => {
				self.resubscribe_delay = self.resubscribe.as_mut().and_then(|b| b.next_backoff());
				warn!(
					"Re-subscribing failed, next attempt in {:?}: {}",
					self.resubscribe_delay, e
				);
				false
			}
		}
	}

	/// Drain queued notifications and reload the affected kinds. Returns how many
	/// notifications were acted on; those from closed subscriptions are dropped.
	pub async fn process_pending(&mut self) -> usize {
		let mut batch = Vec::new();
		while let Ok(event) = self.notifications_rx.try_recv() {
			batch.push(event);
		}
		self.handle_sink_events(batch).await
	}

	/// Event loop: reacts to identity changes and notifications until `shutdown` resolves,
	/// then releases every subscription.
	pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
		tokio::pin!(shutdown);
		let mut watching_identity = true;
		info!("Sync orchestrator running");

		loop {
			let retry_in = self.resubscribe_delay;
			tokio::select! {
				_ = &mut shutdown => break,
				_ = tokio::time::sleep(retry_in.unwrap_or_default()), if retry_in.is_some() => {
					self.retry_realtime().await;
				}
				changed = self.identity_rx.changed(), if watching_identity => match changed {
					Ok(()) => {
						let identity = self.identity_rx.borrow_and_update().clone();
						self.on_identity_changed(identity).await;
					}
					Err(_) => {
						debug!("Identity source closed");
						watching_identity = false;
					}
				},
				Some(first) = self.notifications_rx.recv() => {
					let mut batch = vec![first];
					while let Ok(event) = self.notifications_rx.try_recv() {
						batch.push(event);
					}
					self.handle_sink_events(batch).await;
				}
			}
		}

		self.shutdown().await;
	}

	/// Release every subscription this orchestrator holds.
	pub async fn shutdown(&mut self) {
		self.disable_realtime().await;
		self.subscriptions.unsubscribe_all().await;
		info!("Sync orchestrator stopped");
	}

	// Internals

	fn require_identity(&self) -> Result<Arc<dyn Identity>, SyncError> {
		self.identity.clone().ok_or(SyncError::Unauthenticated)
	}

	fn own_profile_address(&self) -> Option<Address> {
		let owner = self.identity_address()?;
		match self.program.user_profile_address(&owner) {
			Ok((address, _)) => Some(address),
			Err(e) => {
				warn!("Cannot derive profile address for {}: {}", owner, e);
				None
			}
		}
	}

	fn generate_id(&mut self, owner: &Address) -> String {
		self.id_sequence += 1;
		format!(
			"{}_{}_{}",
			Utc::now().timestamp_millis(),
			self.id_sequence,
			owner.short()
		)
	}

	async fn emit(&mut self, event: SyncEvent) {
		self.dispatcher.dispatch(&event).await;
	}

	/// Whether a real record is stored at `address`, locally or on the ledger.
	///
	/// An unreachable ledger counts as vacant; the submission will tell.
	async fn exists(&self, address: &Address) -> bool {
		if self.state.get().contains(address) {
			return true;
		}
		match self.transport.get_account(address).await {
			Ok(Some(data)) => !is_uninitialized(&data),
			Ok(None) => false,
			Err(e) => {
				debug!("Existence check of {} failed, assuming vacant: {}", address, e);
				false
			}
		}
	}

	/// The current record at `address`: the local view first, then the ledger.
	async fn locate<T: Tracked>(&self, address: &Address) -> Option<Keyed<T>> {
		if let Some(found) = self.state.get().find::<T>(address) {
			return Some(found.clone());
		}
		match self.transport.get_account(address).await {
			Ok(Some(data)) => match decode_account::<T>(&data) {
				Ok(record) => record.map(|record| Keyed::new(*address, record)),
				Err(e) => {
					warn!("Cannot use {} account {}: {}", T::KIND, address, e);
					None
				}
			},
			Ok(None) => None,
			Err(e) => {
				debug!("Lookup of {} failed: {}", address, e);
				None
			}
		}
	}

	async fn refuse(&mut self, operation: &'static str, reason: String) -> WriteOutcome {
		info!("{} not applicable: {}", operation, reason);
		let outcome = WriteOutcome::NotApplicable { reason };
		self.emit(SyncEvent::WriteCompleted {
			operation,
			outcome: outcome.clone(),
		})
		.await;
		outcome
	}

	async fn already_exists(&mut self, operation: &'static str, address: Address) -> WriteOutcome {
		info!("{} skipped, {} already exists", operation, address);
		let outcome = WriteOutcome::AlreadyExists { address };
		self.emit(SyncEvent::WriteCompleted {
			operation,
			outcome: outcome.clone(),
		})
		.await;
		outcome
	}

	/// Submit `instructions` and reconcile the view with the result.
	///
	/// Confirmed: the `affected` kinds are re-read. Refused by the program: nothing changes.
	/// Undeliverable: `local` is applied as one update and the `affected` kinds are cached.
	/// Seed placeholders of an affected kind are dropped before the local update.
	async fn commit(
		&mut self,
		operation: &'static str,
		instructions: Vec<Instruction>,
		signer: &dyn Identity,
		affected: &[AccountKind],
		local: impl FnOnce(&mut RecordSet),
	) -> WriteOutcome {
		let outcome = match self.transport.submit(&instructions, signer).await {
			Ok(confirmation) => {
				info!(
					"{} confirmed: {}",
					operation,
					short_signature(&confirmation.signature)
				);
				let mut plan = ReloadPlan::default();
				for kind in affected {
					plan.add(*kind);
				}
				self.reload(&plan).await;
				WriteOutcome::Confirmed {
					signature: confirmation.signature,
				}
			}
			Err(TransportError::Rejected(reason)) => {
				warn!("{} rejected by the program: {}", operation, reason);
				WriteOutcome::NotApplicable { reason }
			}
			Err(e) => {
				warn!("{} could not be submitted, applying locally: {}", operation, e);
				self.state.update(|set| {
					for kind in affected {
						if set.is_seeded(*kind) {
							set.clear_kind(*kind);
						}
					}
					local(set);
					for kind in affected {
						set.sources.insert(*kind, ReadSource::Cache);
					}
				});
				for kind in affected {
					self.persist(*kind).await;
				}
				WriteOutcome::AppliedLocally {
					reason: e.to_string(),
				}
			}
		};
		self.emit(SyncEvent::WriteCompleted {
			operation,
			outcome: outcome.clone(),
		})
		.await;
		outcome
	}

	/// Write the current records of `kind` to the cache.
	async fn persist(&self, kind: AccountKind) {
		let set = self.state.get();
		let result = match kind {
			AccountKind::UserProfile => match &set.user_profile {
				Some(profile) => self.cache.save(std::slice::from_ref(profile)).await,
				None => Ok(()),
			},
			AccountKind::DaoState => Ok(()),
			AccountKind::Activity => self.cache.save(&set.activities).await,
			AccountKind::Strike => self.cache.save(&set.strikes).await,
			AccountKind::WorkerCoop => self.cache.save(&set.cooperatives).await,
			AccountKind::Proposal => self.cache.save(&set.proposals).await,
		};
		if let Err(e) = result {
			warn!("Failed to cache local {}: {}", kind.collection(), e);
		}
	}

	async fn reload(&mut self, plan: &ReloadPlan) {
		for kind in plan.kinds() {
			match kind {
				AccountKind::UserProfile => {
					self.load_user_profile().await;
				}
				AccountKind::DaoState => {
					self.load_dao_state().await;
				}
				AccountKind::Activity => {
					self.load_activities().await;
				}
				AccountKind::Strike => {
					self.load_strikes().await;
				}
				AccountKind::WorkerCoop => {
					self.load_cooperatives().await;
				}
				AccountKind::Proposal => {
					self.load_proposals().await;
				}
			}
		}
	}

	async fn handle_sink_events(&mut self, batch: Vec<SinkEvent>) -> usize {
		let mut changes = Vec::new();
		let mut lost = Vec::new();
		for event in batch {
			match event {
				SinkEvent::Changed(notification) => changes.push(notification),
				SinkEvent::Closed {
					handle,
					target,
					reason,
				} => {
					if self.subscriptions.is_active(handle) {
						warn!("Subscription {} to {} lost: {}", handle, target, reason);
						lost.push((handle, reason));
					}
				}
			}
		}

		let acted = self.reconcile(changes).await;
		if !lost.is_empty() {
			self.recover_realtime(lost).await;
		}
		acted
	}

	/// Close subscriptions the transport dropped and, if real-time updates were running
	/// through them, start re-opening them.
	async fn recover_realtime(&mut self, lost: Vec<(SubscriptionHandle, String)>) {
		let mut realtime_reason = None;
		for (handle, reason) in lost {
			self.subscriptions.unsubscribe(handle).await;
			if self.realtime_handles.contains(&handle) {
				realtime_reason.get_or_insert(reason);
			}
		}
		let Some(reason) = realtime_reason else {
			return;
		};

		self.release_realtime_handles().await;
		self.emit(SyncEvent::RealtimeLost { reason }).await;
		if self.identity.is_some() && self.realtime_enabled {
			let mut policy = ExponentialBackoff {
				initial_interval: RESUBSCRIBE_INITIAL_DELAY,
				max_interval: RESUBSCRIBE_MAX_DELAY,
				max_elapsed_time: None,
				..ExponentialBackoff::default()
			};
			policy.reset();
			self.resubscribe = Some(policy);
			self.retry_realtime().await;
		}
	}

	fn cancel_resubscribe(&mut self) {
		self.resubscribe = None;
		self.resubscribe_delay = None;
	}

	async fn reconcile(&mut self, batch: Vec<ChangeNotification>) -> usize {
		let live: Vec<ChangeNotification> = batch
			.into_iter()
			.filter(|notification| self.subscriptions.is_active(notification.handle))
			.collect();
		if live.is_empty() {
			return 0;
		}

		let plan = plan_reloads(&live, self.own_profile_address().as_ref());
		let kinds: Vec<AccountKind> = plan.kinds().collect();
		debug!("{} notifications, reloading {:?}", live.len(), kinds);
		self.emit(SyncEvent::NotificationsReceived {
			count: live.len(),
			kinds,
		})
		.await;
		self.reload(&plan).await;
		live.len()
	}

	async fn read_user_profile(&self) -> Option<ProfileRead> {
		let owner = self.identity_address()?;
		let (address, _) = self
			.program
			.user_profile_address(&owner)
			.map_err(|e| warn!("Cannot derive profile address for {}: {}", owner, e))
			.ok()?;

		let remote = match self.transport.get_account(&address).await {
			Ok(None) => Ok(None),
			Ok(Some(data)) => decode_account::<UserProfile>(&data).map_err(|e| e.to_string()),
			Err(e) => Err(e.to_string()),
		};
		match remote {
			Ok(Some(profile)) => {
				let keyed = Keyed::new(address, profile);
				if let Err(e) = self.cache.save(std::slice::from_ref(&keyed)).await {
					warn!("Failed to cache user profile: {}", e);
				}
				return Some((Some(keyed), ReadSource::Remote));
			}
			Ok(None) => {
				info!("No user profile for {} on the ledger", owner);
				return Some((None, ReadSource::Remote));
			}
			Err(e) => warn!("Ledger read of user profile failed, trying cache: {}", e),
		}

		let cached = self
			.cache
			.load::<UserProfile>()
			.await
			.and_then(|profiles| profiles.into_iter().find(|p| p.record.owner == owner));
		if let Some(profile) = cached {
			info!("Loaded user profile from cache");
			return Some((Some(profile), ReadSource::Cache));
		}

		info!("Using seed user profile");
		Some((
			seed_user_profile(&self.program, owner, Utc::now()),
			ReadSource::Seed,
		))
	}

	async fn read_dao_state(&self) -> Option<(Keyed<DaoState>, ReadSource)> {
		let (address, _) = self
			.program
			.dao_state_address()
			.map_err(|e| warn!("Cannot derive DAO state address: {}", e))
			.ok()?;

		match self.transport.get_account(&address).await {
			Ok(Some(data)) => match decode_account::<DaoState>(&data) {
				Ok(Some(state)) => {
					let keyed = Keyed::new(address, state);
					if let Err(e) = self.cache.save(std::slice::from_ref(&keyed)).await {
						warn!("Failed to cache DAO state: {}", e);
					}
					return Some((keyed, ReadSource::Remote));
				}
				Ok(None) => debug!("DAO state is not initialized"),
				Err(e) => warn!("Skipping DAO state account: {}", e),
			},
			Ok(None) => debug!("DAO state is not initialized"),
			Err(e) => warn!("Ledger read of DAO state failed, trying cache: {}", e),
		}

		self.cache
			.load::<DaoState>()
			.await?
			.into_iter()
			.next()
			.map(|state| (state, ReadSource::Cache))
	}

	async fn apply_read<T: Tracked>(&mut self, read: TieredRead<T>) -> ReadSource {
		let TieredRead { records, source } = read;
		let count = records.len();
		self.state.update(|set| {
			*T::records_mut(set) = records;
			set.sources.insert(T::KIND, source);
		});
		self.emit(SyncEvent::RecordsLoaded {
			kind: T::KIND,
			source,
			count,
		})
		.await;
		source
	}

	async fn apply_profile(&mut self, profile: Option<Keyed<UserProfile>>, source: ReadSource) {
		let count = usize::from(profile.is_some());
		self.state.update(|set| {
			set.user_profile = profile;
			set.sources.insert(AccountKind::UserProfile, source);
		});
		self.emit(SyncEvent::RecordsLoaded {
			kind: AccountKind::UserProfile,
			source,
			count,
		})
		.await;
	}

	async fn apply_dao_state(
		&mut self,
		read: Option<(Keyed<DaoState>, ReadSource)>,
	) -> Option<ReadSource> {
		let source = read.as_ref().map(|(_, source)| *source);
		self.state.update(|set| match read {
			Some((state, source)) => {
				set.dao_state = Some(state);
				set.sources.insert(AccountKind::DaoState, source);
			}
			None => {
				set.dao_state = None;
				set.sources.remove(&AccountKind::DaoState);
			}
		});
		if let Some(source) = source {
			self.emit(SyncEvent::RecordsLoaded {
				kind: AccountKind::DaoState,
				source,
				count: 1,
			})
			.await;
		}
		source
	}

	async fn release_realtime_handles(&mut self) -> bool {
		if self.realtime_handles.is_empty() {
			return false;
		}
		for handle in std::mem::take(&mut self.realtime_handles) {
			self.subscriptions.unsubscribe(handle).await;
		}
		true
	}
}

/// Credit a verified activity's reward to its creator's profile, if that profile is held.
fn credit_creator(set: &mut RecordSet, creator_profile: Address, activity: &Activity) {
	if let Some(profile) = set
		.user_profile
		.as_mut()
		.filter(|profile| profile.address == creator_profile)
	{
		profile.record.credit_activity(activity);
	}
}

fn validate_id(id: &str) -> Result<(), SyncError> {
	if id.is_empty() || id.len() > MAX_SEED_LEN {
		return Err(SyncError::PreconditionFailed(format!(
			"record id must be 1 to {} bytes",
			MAX_SEED_LEN
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::{
		ActivityStatus, BASE_UNITS_PER_TOKEN, FUNDING_SOLIDARITY_BONUS, KeypairIdentity,
		ProposalStatus, SUPPORT_SOLIDARITY_BONUS,
	};
	use crate::sync::repositories::MemoryCacheStore;
	use crate::sync::testing::MockTransport;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct Harness {
		transport: Arc<MockTransport>,
		cache: LocalCache,
		identity_tx: watch::Sender<Option<Arc<dyn Identity>>>,
		orchestrator: SyncOrchestrator,
	}

	fn identity(n: u8) -> Arc<dyn Identity> {
		Arc::new(KeypairIdentity::from_secret([n; 32]))
	}

	fn harness(identity: Option<Arc<dyn Identity>>, realtime: bool) -> Harness {
		let program = DaoProgram::new(Address::new([42; 32]));
		let transport = Arc::new(MockTransport::new(program.program_id()));
		let cache = LocalCache::new(Arc::new(MemoryCacheStore::new()));
		let (identity_tx, identity_rx) = watch::channel(identity);
		let orchestrator = SyncOrchestrator::new(
			transport.clone(),
			program,
			cache.clone(),
			identity_rx,
			realtime,
		);
		Harness {
			transport,
			cache,
			identity_tx,
			orchestrator,
		}
	}

	fn here() -> Location {
		Location::new(36.8841, 30.7056, "Antalya")
	}

	async fn create_activity(h: &mut Harness, id: &str) -> Address {
		let outcome = h
			.orchestrator
			.create_activity_with_id(id, ActivityCategory::Environmental, "Beach cleanup", here(), 4)
			.await
			.expect("valid write");
		assert!(outcome.is_confirmed(), "{:?}", outcome);
		h.orchestrator
			.program()
			.record_address(AccountKind::Activity, id)
			.expect("derives")
			.0
	}

	#[tokio::test]
	async fn test_writes_require_identity() {
		let mut h = harness(None, false);
		let result = h
			.orchestrator
			.create_activity(ActivityCategory::Education, "Tutoring", here(), 2)
			.await;
		assert!(matches!(result, Err(SyncError::Unauthenticated)));
		let result = h.orchestrator.create_user_profile(true).await;
		assert!(matches!(result, Err(SyncError::Unauthenticated)));
		assert!(h.transport.submissions().is_empty());
	}

	#[tokio::test]
	async fn test_invalid_arguments_fail_fast() {
		let mut h = harness(Some(identity(1)), false);
		let long = "x".repeat(201);
		let result = h
			.orchestrator
			.create_activity_with_id("a", ActivityCategory::Education, long, here(), 2)
			.await;
		assert!(matches!(result, Err(SyncError::PreconditionFailed(_))));

		let result = h
			.orchestrator
			.create_activity_with_id(&"i".repeat(33), ActivityCategory::Education, "ok", here(), 2)
			.await;
		assert!(matches!(result, Err(SyncError::PreconditionFailed(_))));

		let result = h.orchestrator.create_strike("", true, 10).await;
		assert!(matches!(result, Err(SyncError::PreconditionFailed(_))));
		assert!(h.transport.submissions().is_empty());
	}

	#[tokio::test]
	async fn test_confirmed_create_reloads_from_ledger() {
		let mut h = harness(Some(identity(1)), false);
		let address = create_activity(&mut h, "beach-1").await;

		assert_eq!(h.orchestrator.source(AccountKind::Activity), Some(ReadSource::Remote));
		let activities = h.orchestrator.activities();
		assert_eq!(activities.len(), 1);
		assert_eq!(activities[0].address, address);
		assert_eq!(activities[0].record.reward_amount, 160 * BASE_UNITS_PER_TOKEN);
		assert_eq!(h.orchestrator.pending_activity_count(), 1);

		let cached = h.cache.load::<Activity>().await.expect("snapshot");
		assert_eq!(cached.len(), 1);
	}

	#[tokio::test]
	async fn test_duplicate_create_reports_already_exists() {
		let mut h = harness(Some(identity(1)), false);
		let address = create_activity(&mut h, "dup").await;
		let outcome = h
			.orchestrator
			.create_activity_with_id("dup", ActivityCategory::Elderly, "Again", here(), 1)
			.await
			.expect("valid write");
		assert_eq!(outcome, WriteOutcome::AlreadyExists { address });
		assert!(!outcome.is_success());
		assert_eq!(h.transport.submissions().len(), 1);
	}

	#[tokio::test]
	async fn test_initialize_dao_once() {
		let mut h = harness(Some(identity(1)), false);
		let authority = identity(1).address();
		let outcome = h.orchestrator.initialize_dao().await.expect("valid write");
		assert!(outcome.is_confirmed());

		let state = h.orchestrator.dao_state().expect("dao state loaded").clone();
		assert_eq!(state.record.authority, authority);
		assert_eq!(state.record.total_supply, 1_000_000_000 * BASE_UNITS_PER_TOKEN);
		assert_eq!(h.orchestrator.source(AccountKind::DaoState), Some(ReadSource::Remote));

		h.orchestrator.create_user_profile(false).await.expect("valid write");
		let state = h.transport.record::<DaoState>(&state.address).expect("stored");
		assert_eq!(state.active_users, 1);

		let outcome = h.orchestrator.initialize_dao().await.expect("valid write");
		assert!(matches!(outcome, WriteOutcome::AlreadyExists { .. }));
		assert_eq!(h.transport.submissions().len(), 2);
	}

	#[tokio::test]
	async fn test_undeliverable_write_is_applied_locally() {
		let mut h = harness(Some(identity(1)), false);
		h.transport.set_reject_submissions(true);
		let outcome = h
			.orchestrator
			.create_activity_with_id("offline", ActivityCategory::Disaster, "Flood relief", here(), 2)
			.await
			.expect("valid write");

		assert!(matches!(outcome, WriteOutcome::AppliedLocally { .. }));
		assert!(outcome.is_success());
		assert_eq!(h.orchestrator.activities().len(), 1);
		assert_eq!(h.orchestrator.source(AccountKind::Activity), Some(ReadSource::Cache));
		let cached = h.cache.load::<Activity>().await.expect("snapshot");
		assert_eq!(cached[0].record.description, "Flood relief");
		assert_eq!(h.transport.record::<Activity>(&cached[0].address), None);
	}

	#[tokio::test]
	async fn test_local_write_replaces_seed_placeholders() {
		let mut h = harness(Some(identity(1)), false);
		h.transport.set_offline(true);
		h.orchestrator.refresh_all().await;
		assert_eq!(h.orchestrator.source(AccountKind::Activity), Some(ReadSource::Seed));
		assert_eq!(h.orchestrator.activities().len(), 2);

		let outcome = h
			.orchestrator
			.create_activity_with_id("mine", ActivityCategory::Education, "Reading club", here(), 3)
			.await
			.expect("valid write");
		assert!(matches!(outcome, WriteOutcome::AppliedLocally { .. }));
		let descriptions: Vec<_> = h
			.orchestrator
			.activities()
			.iter()
			.map(|a| a.record.description.as_str())
			.collect();
		assert_eq!(descriptions, ["Reading club"]);
		assert_eq!(h.cache.load::<Activity>().await.map(|r| r.len()), Some(1));
	}

	#[tokio::test]
	async fn test_verification_threshold_credits_creator() {
		let creator = identity(1);
		let mut h = harness(Some(creator.clone()), false);
		assert!(h.orchestrator.create_user_profile(true).await.expect("write").is_confirmed());
		let activity = create_activity(&mut h, "verify-me").await;

		for n in 2..=4 {
			h.orchestrator.on_identity_changed(Some(identity(n))).await;
			let outcome = h
				.orchestrator
				.verify_activity(&activity, true)
				.await
				.expect("valid write");
			assert!(outcome.is_confirmed(), "{:?}", outcome);
		}

		let stored: Activity = h.transport.record(&activity).expect("stored");
		assert_eq!(stored.status, ActivityStatus::Verified);
		assert_eq!(stored.verification_count, 3);

		let (profile, _) = h
			.orchestrator
			.program()
			.user_profile_address(&creator.address())
			.expect("derives");
		let profile: UserProfile = h.transport.record(&profile).expect("stored");
		assert_eq!(profile.tokens_earned, stored.reward_amount);
		assert_eq!(profile.activities_completed, 1);
		assert_eq!(profile.reputation_score, 60);

		// The activity is no longer pending.
		let outcome = h
			.orchestrator
			.verify_activity(&activity, true)
			.await
			.expect("valid write");
		assert!(matches!(outcome, WriteOutcome::NotApplicable { .. }));
	}

	#[tokio::test]
	async fn test_verifier_counted_once() {
		let mut h = harness(Some(identity(1)), false);
		let activity = create_activity(&mut h, "once").await;
		h.orchestrator.on_identity_changed(Some(identity(2))).await;

		let first = h.orchestrator.verify_activity(&activity, true).await.expect("write");
		assert!(first.is_confirmed());
		let submitted = h.transport.submissions().len();
		let second = h.orchestrator.verify_activity(&activity, true).await.expect("write");
		assert_eq!(
			second,
			WriteOutcome::NotApplicable {
				reason: "verifier has already verified this activity".into()
			}
		);
		assert_eq!(h.transport.submissions().len(), submitted);
	}

	#[tokio::test]
	async fn test_batch_verify_is_one_submission() {
		let mut h = harness(Some(identity(1)), false);
		let a = create_activity(&mut h, "batch-a").await;
		let b = create_activity(&mut h, "batch-b").await;
		h.orchestrator.on_identity_changed(Some(identity(2))).await;

		let missing = Address::new([9; 32]);
		let outcome = h
			.orchestrator
			.batch_verify_activities(&[a, b, a, missing], true)
			.await
			.expect("valid write");
		assert!(outcome.is_confirmed());
		let submissions = h.transport.submissions();
		assert_eq!(submissions.last().map(Vec::len), Some(2));
		for address in [a, b] {
			let stored: Activity = h.transport.record(&address).expect("stored");
			assert_eq!(stored.verification_count, 1);
		}
	}

	#[tokio::test]
	async fn test_only_creator_can_delete() {
		let mut h = harness(Some(identity(1)), false);
		let activity = create_activity(&mut h, "withdraw").await;

		h.orchestrator.on_identity_changed(Some(identity(2))).await;
		let outcome = h.orchestrator.delete_activity(&activity).await.expect("write");
		assert!(matches!(outcome, WriteOutcome::NotApplicable { .. }));

		h.orchestrator.on_identity_changed(Some(identity(1))).await;
		let outcome = h.orchestrator.delete_activity(&activity).await.expect("write");
		assert!(outcome.is_confirmed());
		let stored: Activity = h.transport.record(&activity).expect("stored");
		assert_eq!(stored.status, ActivityStatus::Rejected);
	}

	#[tokio::test]
	async fn test_strike_support_requires_profile() {
		let mut h = harness(Some(identity(1)), false);
		assert!(h.orchestrator.create_strike("Acme", true, 120).await.expect("write").is_confirmed());
		let strike = h.orchestrator.strikes()[0].address;
		assert_eq!(h.orchestrator.strikes()[0].record.legitimacy_score, 100);

		let outcome = h.orchestrator.support_strike(&strike, 5).await.expect("write");
		assert!(matches!(outcome, WriteOutcome::NotApplicable { .. }));

		h.orchestrator.create_user_profile(false).await.expect("write");
		let outcome = h
			.orchestrator
			.support_strike(&strike, 5 * BASE_UNITS_PER_TOKEN)
			.await
			.expect("write");
		assert!(outcome.is_confirmed());
		assert_eq!(h.orchestrator.strikes()[0].record.total_fund, 5 * BASE_UNITS_PER_TOKEN);
		let profile = h.orchestrator.user_profile().expect("profile");
		assert_eq!(profile.record.solidarity_score, SUPPORT_SOLIDARITY_BONUS);
	}

	#[tokio::test]
	async fn test_local_support_saturates_solidarity() {
		let mut h = harness(Some(identity(1)), false);
		h.orchestrator.create_user_profile(false).await.expect("write");
		h.orchestrator.create_strike("Acme", false, 40).await.expect("write");
		let strike = h.orchestrator.strikes()[0].address;

		let profile_address = h.orchestrator.user_profile().expect("profile").address;
		let mut stored: UserProfile = h.transport.record(&profile_address).expect("stored");
		stored.solidarity_score = u64::MAX - 1;
		h.transport.put_record(profile_address, &stored);
		h.orchestrator.load_user_profile().await;

		h.transport.set_reject_submissions(true);
		let outcome = h.orchestrator.support_strike(&strike, 10).await.expect("write");
		assert!(matches!(outcome, WriteOutcome::AppliedLocally { .. }));
		assert_eq!(
			h.orchestrator.user_profile().map(|p| p.record.solidarity_score),
			Some(u64::MAX)
		);
	}

	#[tokio::test]
	async fn test_non_finite_location_is_refused() {
		let mut h = harness(Some(identity(1)), false);
		h.transport.set_reject_submissions(true);
		let outcome = h
			.orchestrator
			.create_activity_with_id("good", ActivityCategory::Elderly, "Visit", here(), 1)
			.await
			.expect("valid write");
		assert!(matches!(outcome, WriteOutcome::AppliedLocally { .. }));

		for location in [
			Location::new(f64::NAN, 2.0, "x"),
			Location::new(1.0, f64::INFINITY, "x"),
		] {
			let result = h
				.orchestrator
				.create_activity_with_id("bad", ActivityCategory::Elderly, "Visit", location, 1)
				.await;
			assert!(matches!(result, Err(SyncError::PreconditionFailed(_))));
		}

		let cached = h.cache.try_load::<Activity>().await.expect("snapshot parses");
		assert_eq!(cached.map(|records| records.len()), Some(1));
	}

	#[tokio::test]
	async fn test_ledger_record_with_nan_coordinates_stays_cached() {
		let mut h = harness(Some(identity(1)), false);
		let address = Address::new([77; 32]);
		let mut activity = crate::sync::testing::sample_activity("Odd sensor");
		activity.location = Location::new(f64::NAN, f64::NEG_INFINITY, "unknown");
		h.transport.put_record(address, &activity);
		assert_eq!(h.orchestrator.load_activities().await, ReadSource::Remote);

		h.transport.set_offline(true);
		assert_eq!(h.orchestrator.load_activities().await, ReadSource::Cache);
		let activities = h.orchestrator.activities();
		assert_eq!(activities.len(), 1);
		assert!(activities[0].record.location.latitude.is_nan());
		assert_eq!(activities[0].record.location.longitude, f64::NEG_INFINITY);
	}

	#[tokio::test]
	async fn test_cooperative_funding() {
		let mut h = harness(Some(identity(1)), false);
		h.orchestrator.create_user_profile(true).await.expect("write");
		let outcome = h
			.orchestrator
			.create_worker_coop("Bakery", 100, vec![SkillType::Production])
			.await
			.expect("write");
		assert!(outcome.is_confirmed());
		let coop = h.orchestrator.cooperatives()[0].address;

		h.transport.set_reject_submissions(true);
		let outcome = h.orchestrator.fund_worker_coop(&coop, 100).await.expect("write");
		assert!(matches!(outcome, WriteOutcome::AppliedLocally { .. }));
		let local = &h.orchestrator.cooperatives()[0].record;
		assert!(local.is_funded());
		assert_eq!(
			h.orchestrator.user_profile().map(|p| p.record.solidarity_score),
			Some(FUNDING_SOLIDARITY_BONUS)
		);
		// The ledger is untouched.
		let stored: WorkerCoop = h.transport.record(&coop).expect("stored");
		assert_eq!(stored.current_funding, 0);
	}

	#[tokio::test]
	async fn test_quadratic_vote_counted_once() {
		let mut h = harness(Some(identity(1)), false);
		h.orchestrator
			.create_proposal("Raise UBI", "Double it", ProposalType::TokenomicsChange)
			.await
			.expect("write");
		let proposal = h.orchestrator.proposals()[0].address;

		let outcome = h.orchestrator.vote_on_proposal(&proposal, true, 100).await.expect("write");
		assert!(outcome.is_confirmed());
		let stored = &h.orchestrator.proposals()[0].record;
		assert_eq!(stored.votes_for, 10);
		assert_eq!(stored.status, ProposalStatus::Active);

		let again = h.orchestrator.vote_on_proposal(&proposal, false, 49).await.expect("write");
		assert!(matches!(again, WriteOutcome::NotApplicable { .. }));
	}

	#[tokio::test]
	async fn test_offline_reads_use_seed_data() {
		let mut h = harness(Some(identity(1)), false);
		h.transport.set_offline(true);
		h.orchestrator.refresh_all().await;

		let descriptions: Vec<_> = h
			.orchestrator
			.activities()
			.iter()
			.map(|a| a.record.description.as_str())
			.collect();
		assert_eq!(
			descriptions,
			["Beach cleanup in Antalya", "Supporting factory workers strike"]
		);
		assert_eq!(h.orchestrator.source(AccountKind::Activity), Some(ReadSource::Seed));
		assert_eq!(h.orchestrator.pending_activity_count(), 1);
		assert!(h.orchestrator.strikes().is_empty());
		assert!(h.orchestrator.user_profile().is_some());
		assert!(!h.orchestrator.has_profile());
		assert_eq!(
			h.orchestrator.total_tokens_earned(),
			150 * BASE_UNITS_PER_TOKEN + BASE_UNITS_PER_TOKEN / 2
		);
		assert!(h.cache.load::<Activity>().await.is_none());
		assert!(h.cache.load::<UserProfile>().await.is_none());
	}

	#[tokio::test]
	async fn test_offline_reads_prefer_cache() {
		let mut h = harness(Some(identity(1)), false);
		create_activity(&mut h, "cached").await;
		h.orchestrator.create_user_profile(true).await.expect("write");

		h.transport.set_offline(true);
		h.orchestrator.refresh_all().await;
		assert_eq!(h.orchestrator.source(AccountKind::Activity), Some(ReadSource::Cache));
		assert_eq!(h.orchestrator.activities()[0].record.description, "Beach cleanup");
		assert_eq!(h.orchestrator.source(AccountKind::UserProfile), Some(ReadSource::Cache));
		assert!(h.orchestrator.has_profile());
	}

	#[tokio::test]
	async fn test_missing_profile_is_not_seeded_when_online() {
		let mut h = harness(Some(identity(1)), false);
		assert_eq!(h.orchestrator.load_user_profile().await, Some(ReadSource::Remote));
		assert!(h.orchestrator.user_profile().is_none());
		assert!(!h.orchestrator.has_profile());
		assert_eq!(h.orchestrator.total_tokens_earned(), 0);
	}

	#[tokio::test]
	async fn test_fetch_activity() {
		let mut h = harness(Some(identity(1)), false);
		let address = create_activity(&mut h, "single").await;
		let fetched = h.orchestrator.fetch_activity("single").await.expect("valid id");
		assert_eq!(fetched.map(|a| a.address), Some(address));
		assert_eq!(h.orchestrator.fetch_activity("nope").await.expect("valid id"), None);

		h.transport.set_offline(true);
		let local = h.orchestrator.fetch_activity("single").await.expect("valid id");
		assert_eq!(local.map(|a| a.address), Some(address));
	}

	#[tokio::test]
	async fn test_notifications_trigger_coalesced_reload() {
		let mut h = harness(Some(identity(1)), true);
		h.orchestrator.start().await;
		assert!(h.orchestrator.is_realtime());
		assert_eq!(h.transport.live_subscriptions(), 2);
		assert!(h.orchestrator.strikes().is_empty());

		let strike = Strike::new(
			Address::new([3; 32]),
			"Port workers".into(),
			false,
			40,
			Utc::now(),
			255,
		);
		h.transport.put_record(Address::new([77; 32]), &strike);
		h.transport.put_record(Address::new([78; 32]), &strike);
		assert_eq!(h.transport.emit(Address::new([77; 32])), 1);
		assert_eq!(h.transport.emit(Address::new([78; 32])), 1);

		let reads = h.transport.read_count();
		assert_eq!(h.orchestrator.process_pending().await, 2);
		assert_eq!(h.orchestrator.strikes().len(), 2);
		// Both notifications carried strike data: one reload.
		assert_eq!(h.transport.read_count(), reads + 1);
		assert_eq!(h.orchestrator.process_pending().await, 0);
	}

	#[tokio::test]
	async fn test_enable_realtime_is_idempotent() {
		let mut h = harness(Some(identity(1)), false);
		h.orchestrator.enable_realtime().await.expect("subscribes");
		h.orchestrator.enable_realtime().await.expect("subscribes");
		assert_eq!(h.transport.live_subscriptions(), 2);

		h.orchestrator.disable_realtime().await;
		h.orchestrator.disable_realtime().await;
		assert_eq!(h.transport.live_subscriptions(), 0);
		assert!(!h.orchestrator.is_realtime());
	}

	#[tokio::test]
	async fn test_enable_realtime_reports_subscription_failure() {
		let mut h = harness(Some(identity(1)), false);
		h.transport.set_offline(true);
		let result = h.orchestrator.enable_realtime().await;
		assert!(matches!(result, Err(SyncError::Subscription(_))));
		assert!(!h.orchestrator.is_realtime());
	}

	#[tokio::test]
	async fn test_lost_subscriptions_are_reopened() {
		let mut h = harness(Some(identity(1)), true);
		h.orchestrator.start().await;
		assert_eq!(h.transport.drop_connections("node restarted"), 2);
		assert_eq!(h.transport.live_subscriptions(), 0);

		assert_eq!(h.orchestrator.process_pending().await, 0);
		assert!(h.orchestrator.is_realtime());
		assert!(!h.orchestrator.is_resubscribe_pending());
		assert_eq!(h.transport.live_subscriptions(), 2);
		assert_eq!(h.orchestrator.subscriptions().active_count(), 2);

		let strike = Strike::new(Address::new([3; 32]), "Dock".into(), true, 12, Utc::now(), 255);
		h.transport.put_record(Address::new([90; 32]), &strike);
		assert_eq!(h.transport.emit(Address::new([90; 32])), 1);
		assert_eq!(h.orchestrator.process_pending().await, 1);
		assert_eq!(h.orchestrator.strikes().len(), 1);
	}

	#[tokio::test]
	async fn test_lost_subscriptions_wait_for_the_node() {
		let mut h = harness(Some(identity(1)), true);
		h.orchestrator.start().await;
		h.transport.set_offline(true);
		h.transport.drop_connections("connection reset");

		h.orchestrator.process_pending().await;
		assert!(!h.orchestrator.is_realtime());
		assert!(h.orchestrator.is_resubscribe_pending());
		assert!(!h.orchestrator.retry_realtime().await);

		h.transport.set_offline(false);
		assert!(h.orchestrator.retry_realtime().await);
		assert!(h.orchestrator.is_realtime());
		assert!(!h.orchestrator.is_resubscribe_pending());
		assert_eq!(h.orchestrator.source(AccountKind::Activity), Some(ReadSource::Remote));
	}

	#[tokio::test]
	async fn test_disabling_realtime_stops_resubscribing() {
		let mut h = harness(Some(identity(1)), true);
		h.orchestrator.start().await;
		h.transport.set_offline(true);
		h.transport.drop_connections("connection reset");
		h.orchestrator.process_pending().await;
		assert!(h.orchestrator.is_resubscribe_pending());

		h.orchestrator.disable_realtime().await;
		assert!(!h.orchestrator.is_resubscribe_pending());
		h.transport.set_offline(false);
		assert!(!h.orchestrator.retry_realtime().await);
		assert_eq!(h.transport.live_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_disconnect_clears_and_unsubscribes() {
		let mut h = harness(Some(identity(1)), true);
		h.orchestrator.start().await;
		create_activity(&mut h, "before").await;
		assert_eq!(h.transport.live_subscriptions(), 2);

		h.orchestrator.on_identity_changed(None).await;
		assert_eq!(h.transport.live_subscriptions(), 0);
		assert_eq!(h.orchestrator.records(), &RecordSet::default());
		assert!(!h.orchestrator.has_profile());
		assert_eq!(h.orchestrator.identity_address(), None);

		// Notifications queued before the disconnect are stale.
		assert_eq!(h.orchestrator.process_pending().await, 0);
	}

	#[tokio::test]
	async fn test_listeners_observe_changes() {
		let mut h = harness(Some(identity(1)), false);
		let changes = Arc::new(AtomicUsize::new(0));
		let counter = changes.clone();
		let id = h.orchestrator.on_change(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		h.orchestrator.load_activities().await;
		assert_eq!(changes.load(Ordering::SeqCst), 1);
		assert!(h.orchestrator.remove_listener(id));
		h.orchestrator.load_activities().await;
		assert_eq!(changes.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_run_follows_identity_until_shutdown() {
		let mut h = harness(None, true);
		let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
		let identity_tx = h.identity_tx;
		let transport = h.transport.clone();

		let driver = async move {
			identity_tx.send_replace(Some(identity(1)));
			for _ in 0..50 {
				if transport.live_subscriptions() == 2 {
					break;
				}
				tokio::time::sleep(std::time::Duration::from_millis(10)).await;
			}
			let _ = stop_tx.send(());
		};
		let shutdown = async {
			let _ = stop_rx.await;
		};
		tokio::join!(h.orchestrator.run(shutdown), driver);

		assert_eq!(h.orchestrator.identity_address(), Some(identity(1).address()));
		assert_eq!(h.orchestrator.source(AccountKind::Activity), Some(ReadSource::Seed));
		assert_eq!(h.transport.live_subscriptions(), 0);
		assert!(!h.orchestrator.is_realtime());
	}
}

//! In-process ledger double for tests.
//!
//! Holds raw account data, applies submitted instructions with the same domain rules the
//! program uses (all-or-nothing per submission), and pushes notifications to live
//! subscriptions after each confirmed submission.

use crate::ledger::{
	AccountKind, AccountRecord, Activity, ActivityCategory, Address, DaoProgram, DaoState, Identity,
	Instruction, InstructionArgs, Location, Proposal, Strike, UserProfile, VerificationEffect,
	WorkerCoop, decode_account, encode_account,
};
use crate::sync::subscriptions::SubscriptionTarget;
use crate::sync::transport::{
	AccountFilter, Confirmation, KeyedAccount, LedgerTransport, NotificationSink, TransportError,
	TransportSubscriptionId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub fn sample_activity(description: &str) -> Activity {
	Activity::new(
		Address::new([1; 32]),
		ActivityCategory::Environmental,
		description.to_string(),
		Location::new(36.8841, 30.7056, "Antalya"),
		4,
		DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
		254,
	)
	.expect("valid activity")
}

type Accounts = BTreeMap<Address, Vec<u8>>;

pub struct MockTransport {
	program: DaoProgram,
	accounts: Mutex<Accounts>,
	offline: AtomicBool,
	reject_submissions: AtomicBool,
	submissions: Mutex<Vec<Vec<Instruction>>>,
	subscriptions: Mutex<HashMap<u64, NotificationSink>>,
	next_subscription: AtomicU64,
	unsubscribe_calls: AtomicUsize,
	reads: AtomicUsize,
}

impl MockTransport {
	pub fn new(program_id: Address) -> Self {
		Self {
			program: DaoProgram::new(program_id),
			accounts: Mutex::new(BTreeMap::new()),
			offline: AtomicBool::new(false),
			reject_submissions: AtomicBool::new(false),
			submissions: Mutex::new(Vec::new()),
			subscriptions: Mutex::new(HashMap::new()),
			next_subscription: AtomicU64::new(100),
			unsubscribe_calls: AtomicUsize::new(0),
			reads: AtomicUsize::new(0),
		}
	}

	/// Every call fails with a network error while offline.
	pub fn set_offline(&self, offline: bool) {
		self.offline.store(offline, Ordering::SeqCst);
	}

	/// Reads keep working but every submission fails.
	pub fn set_reject_submissions(&self, reject: bool) {
		self.reject_submissions.store(reject, Ordering::SeqCst);
	}

	pub fn put_record<T: AccountRecord>(&self, address: Address, record: &T) {
		self.put_raw(address, encode_account(record));
	}

	pub fn put_raw(&self, address: Address, data: Vec<u8>) {
		self.accounts.lock().expect("lock").insert(address, data);
	}

	pub fn record<T: AccountRecord>(&self, address: &Address) -> Option<T> {
		let accounts = self.accounts.lock().expect("lock");
		decode_account::<T>(accounts.get(address)?).expect("stored account decodes")
	}

	pub fn submissions(&self) -> Vec<Vec<Instruction>> {
		self.submissions.lock().expect("lock").clone()
	}

	pub fn read_count(&self) -> usize {
		self.reads.load(Ordering::SeqCst)
	}

	pub fn live_subscriptions(&self) -> usize {
		self.subscriptions.lock().expect("lock").len()
	}

	pub fn unsubscribe_calls(&self) -> usize {
		self.unsubscribe_calls.load(Ordering::SeqCst)
	}

	/// Push a notification for `address` to every matching subscription.
	pub fn emit(&self, address: Address) -> usize {
		let data = self.accounts.lock().expect("lock").get(&address).cloned();
		let subscriptions = self.subscriptions.lock().expect("lock");
		let mut delivered = 0;
		for sink in subscriptions.values() {
			let matches = match sink.target() {
				SubscriptionTarget::Account(watched) => watched == address,
				SubscriptionTarget::Program(program_id) => program_id == self.program.program_id(),
			};
			if matches && sink.notify(address, data.clone()) {
				delivered += 1;
			}
		}
		delivered
	}

	/// Drop every live subscription as a node restart would, reporting the loss to each
	/// sink. Returns how many subscribers were told.
	pub fn drop_connections(&self, reason: &str) -> usize {
		let sinks: Vec<NotificationSink> = self
			.subscriptions
			.lock()
			.expect("lock")
			.drain()
			.map(|(_, sink)| sink)
			.collect();
		sinks.iter().filter(|sink| sink.close(reason)).count()
	}

	fn check_online(&self) -> Result<(), TransportError> {
		if self.offline.load(Ordering::SeqCst) {
			return Err(TransportError::Network("connection refused".into()));
		}
		Ok(())
	}

	fn apply(
		&self,
		accounts: &mut Accounts,
		instruction: &Instruction,
		now: DateTime<Utc>,
	) -> Result<Vec<Address>, TransportError> {
		let reject = |reason: String| TransportError::Rejected(reason);
		let args = InstructionArgs::decode(&instruction.data).map_err(|e| reject(e.to_string()))?;
		let key = |index: usize| instruction.accounts[index].address;

		fn load<T: AccountRecord>(accounts: &Accounts, address: &Address) -> Result<T, TransportError> {
			let data = accounts
				.get(address)
				.ok_or_else(|| TransportError::Rejected(format!("account {} not found", address)))?;
			decode_account::<T>(data)
				.map_err(|e| TransportError::Rejected(e.to_string()))?
				.ok_or_else(|| TransportError::Rejected(format!("account {} not initialized", address)))
		}
		fn create<T: AccountRecord>(
			accounts: &mut Accounts,
			address: Address,
			record: &T,
		) -> Result<(), TransportError> {
			if accounts.contains_key(&address) {
				return Err(TransportError::Rejected(format!(
					"account {} already in use",
					address
				)));
			}
			accounts.insert(address, encode_account(record));
			Ok(())
		}
		fn store<T: AccountRecord>(accounts: &mut Accounts, address: Address, record: &T) {
			accounts.insert(address, encode_account(record));
		}

		let touched = match args {
			InstructionArgs::CreateUserProfile { union_membership } => {
				let (profile, user) = (key(0), key(2));
				let (_, bump) = self
					.program
					.user_profile_address(&user)
					.map_err(|e| reject(e.to_string()))?;
				create(accounts, profile, &UserProfile::new(user, union_membership, now, bump))?;
				let dao_state = key(1);
				if let Ok(mut state) = load::<DaoState>(accounts, &dao_state) {
					state.active_users += 1;
					store(accounts, dao_state, &state);
				}
				vec![profile]
			}
			InstructionArgs::CreateActivity {
				category,
				description,
				location,
				estimated_hours,
			} => {
				let (address, user) = (key(0), key(2));
				let activity =
					Activity::new(user, category, description, location, estimated_hours, now, 255)
						.map_err(|e| reject(e.to_string()))?;
				create(accounts, address, &activity)?;
				vec![address]
			}
			InstructionArgs::VerifyActivity { verified } => {
				let (address, profile_address, verifier) = (key(0), key(1), key(2));
				let mut activity: Activity = load(accounts, &address)?;
				let effect = activity
					.apply_verification(verifier, verified)
					.map_err(|e| reject(e.to_string()))?;
				if effect == VerificationEffect::Verified {
					let mut profile: UserProfile = load(accounts, &profile_address)?;
					profile.credit_activity(&activity);
					store(accounts, profile_address, &profile);
				}
				store(accounts, address, &activity);
				vec![address, profile_address]
			}
			InstructionArgs::DeleteActivity => {
				let (address, user) = (key(0), key(1));
				let mut activity: Activity = load(accounts, &address)?;
				activity.withdraw(&user).map_err(|e| reject(e.to_string()))?;
				store(accounts, address, &activity);
				vec![address]
			}
			InstructionArgs::CreateStrike {
				company,
				union_verification,
				participant_count,
			} => {
				let (address, user) = (key(0), key(1));
				let strike = Strike::new(user, company, union_verification, participant_count, now, 255);
				create(accounts, address, &strike)?;
				vec![address]
			}
			InstructionArgs::SupportStrike { amount } => {
				let (address, profile_address, supporter) = (key(0), key(1), key(2));
				let mut strike: Strike = load(accounts, &address)?;
				let mut profile: UserProfile = load(accounts, &profile_address)?;
				strike.apply_support(supporter, amount);
				profile.credit_support();
				store(accounts, address, &strike);
				store(accounts, profile_address, &profile);
				vec![address, profile_address]
			}
			InstructionArgs::CreateWorkerCoop {
				business_plan,
				funding_goal,
				skill_requirements,
			} => {
				let (address, user) = (key(0), key(1));
				let coop =
					WorkerCoop::new(user, business_plan, funding_goal, skill_requirements, now, 255);
				create(accounts, address, &coop)?;
				vec![address]
			}
			InstructionArgs::FundWorkerCoop { amount } => {
				let (address, profile_address) = (key(0), key(1));
				let mut coop: WorkerCoop = load(accounts, &address)?;
				let mut profile: UserProfile = load(accounts, &profile_address)?;
				coop.apply_funding(amount);
				profile.credit_funding();
				store(accounts, address, &coop);
				store(accounts, profile_address, &profile);
				vec![address, profile_address]
			}
			InstructionArgs::CreateProposal {
				title,
				description,
				proposal_type,
			} => {
				let (address, user) = (key(0), key(1));
				let proposal = Proposal::new(user, title, description, proposal_type, now, 255);
				create(accounts, address, &proposal)?;
				vec![address]
			}
			InstructionArgs::VoteOnProposal { vote, token_amount } => {
				let (address, voter) = (key(0), key(1));
				let mut proposal: Proposal = load(accounts, &address)?;
				proposal
					.apply_vote(voter, vote, token_amount, now)
					.map_err(|e| reject(e.to_string()))?;
				store(accounts, address, &proposal);
				vec![address]
			}
			InstructionArgs::InitializeDao { authority } => {
				let address = key(0);
				let (_, bump) = self
					.program
					.dao_state_address()
					.map_err(|e| reject(e.to_string()))?;
				create(accounts, address, &DaoState::new(authority, bump))?;
				vec![address]
			}
			InstructionArgs::DistributeUbi | InstructionArgs::ApplyTokenDecay => Vec::new(),
		};
		Ok(touched)
	}
}

#[async_trait::async_trait]
impl LedgerTransport for MockTransport {
	async fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>, TransportError> {
		self.check_online()?;
		self.reads.fetch_add(1, Ordering::SeqCst);
		Ok(self.accounts.lock().expect("lock").get(address).cloned())
	}

	async fn get_program_accounts(
		&self,
		program_id: &Address,
		filter: Option<AccountFilter>,
	) -> Result<Vec<KeyedAccount>, TransportError> {
		self.check_online()?;
		self.reads.fetch_add(1, Ordering::SeqCst);
		if *program_id != self.program.program_id() {
			return Ok(Vec::new());
		}
		let accounts = self.accounts.lock().expect("lock");
		Ok(accounts
			.iter()
			.filter(|(_, data)| filter.as_ref().is_none_or(|f| f.matches(data)))
			.map(|(address, data)| KeyedAccount {
				address: *address,
				data: data.clone(),
			})
			.collect())
	}

	async fn submit(
		&self,
		instructions: &[Instruction],
		signer: &dyn Identity,
	) -> Result<Confirmation, TransportError> {
		self.check_online()?;
		if self.reject_submissions.load(Ordering::SeqCst) {
			return Err(TransportError::Network("submission endpoint unavailable".into()));
		}
		let signer_address = signer.address();
		for instruction in instructions {
			let signed_by_other = instruction
				.accounts
				.iter()
				.any(|m| m.is_signer && m.address != signer_address);
			if signed_by_other {
				return Err(TransportError::Signing("missing signature".into()));
			}
		}

		let now = Utc::now();
		let mut touched = Vec::new();
		{
			let mut accounts = self.accounts.lock().expect("lock");
			let mut staged = accounts.clone();
			for instruction in instructions {
				touched.extend(self.apply(&mut staged, instruction, now)?);
			}
			*accounts = staged;
		}

		let mut submissions = self.submissions.lock().expect("lock");
		submissions.push(instructions.to_vec());
		let signature = format!("mock-signature-{}", submissions.len());
		drop(submissions);

		touched.dedup();
		for address in touched {
			self.emit(address);
		}
		Ok(Confirmation {
			signature,
			slot: Some(1),
		})
	}

	async fn subscribe_account(
		&self,
		_address: &Address,
		sink: NotificationSink,
	) -> Result<TransportSubscriptionId, TransportError> {
		self.check_online()?;
		let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
		self.subscriptions.lock().expect("lock").insert(id, sink);
		Ok(TransportSubscriptionId(id))
	}

	async fn subscribe_program(
		&self,
		_program_id: &Address,
		sink: NotificationSink,
	) -> Result<TransportSubscriptionId, TransportError> {
		self.check_online()?;
		let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
		self.subscriptions.lock().expect("lock").insert(id, sink);
		Ok(TransportSubscriptionId(id))
	}

	async fn unsubscribe(&self, id: TransportSubscriptionId) -> Result<(), TransportError> {
		self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
		self.check_online()?;
		self.subscriptions.lock().expect("lock").remove(&id.0);
		Ok(())
	}
}

#[tokio::test]
async fn test_mock_rolls_back_failed_batches() {
	let program = DaoProgram::new(Address::new([42; 32]));
	let transport = MockTransport::new(program.program_id());
	let identity = crate::ledger::KeypairIdentity::from_secret([1; 32]);
	let (a, _) = program.record_address(AccountKind::Activity, "a").expect("derives");

	let create = program
		.create_activity(
			a,
			identity.address(),
			ActivityCategory::Education,
			"Tutoring".into(),
			Location::new(0.0, 0.0, ""),
			2,
		)
		.expect("builds");
	// Same address twice: the second create fails and the first is rolled back.
	let result = transport.submit(&[create.clone(), create], &identity).await;
	assert!(matches!(result, Err(TransportError::Rejected(_))));
	assert!(transport.record::<Activity>(&a).is_none());
	assert!(transport.submissions().is_empty());
}

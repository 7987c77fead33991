//! Instruction encoding and the account lists each program instruction expects.

use crate::ledger::address::{Address, DerivationError, derive_address};
use crate::ledger::codec::{ByteReader, ByteWriter, CodecError};
use crate::ledger::records::{ActivityCategory, Location, ProposalType, SkillType};
use crate::ledger::schema::{AccountKind, InstructionKind};

pub const SYSTEM_PROGRAM: Address = Address::new([0; 32]);

/// `SysvarC1ock11111111111111111111111111111111`
pub const CLOCK_SYSVAR: Address = Address::new([
	6, 167, 213, 23, 24, 199, 116, 201, 40, 86, 99, 152, 105, 29, 94, 182, 139, 94, 184, 163,
	155, 75, 109, 92, 115, 85, 91, 33, 0, 0, 0, 0,
]);

/// Arguments of every instruction the program accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionArgs {
	InitializeDao {
		authority: Address,
	},
	CreateUserProfile {
		union_membership: bool,
	},
	CreateActivity {
		category: ActivityCategory,
		description: String,
		location: Location,
		estimated_hours: u32,
	},
	VerifyActivity {
		verified: bool,
	},
	CreateStrike {
		company: String,
		union_verification: bool,
		participant_count: u32,
	},
	SupportStrike {
		amount: u64,
	},
	CreateWorkerCoop {
		business_plan: String,
		funding_goal: u64,
		skill_requirements: Vec<SkillType>,
	},
	FundWorkerCoop {
		amount: u64,
	},
	CreateProposal {
		title: String,
		description: String,
		proposal_type: ProposalType,
	},
	VoteOnProposal {
		vote: bool,
		token_amount: u64,
	},
	DistributeUbi,
	ApplyTokenDecay,
	DeleteActivity,
}

impl InstructionArgs {
	pub fn kind(&self) -> InstructionKind {
		match self {
			InstructionArgs::InitializeDao { .. } => InstructionKind::InitializeDao,
			InstructionArgs::CreateUserProfile { .. } => InstructionKind::CreateUserProfile,
			InstructionArgs::CreateActivity { .. } => InstructionKind::CreateActivity,
			InstructionArgs::VerifyActivity { .. } => InstructionKind::VerifyActivity,
			InstructionArgs::CreateStrike { .. } => InstructionKind::CreateStrike,
			InstructionArgs::SupportStrike { .. } => InstructionKind::SupportStrike,
			InstructionArgs::CreateWorkerCoop { .. } => InstructionKind::CreateWorkerCoop,
			InstructionArgs::FundWorkerCoop { .. } => InstructionKind::FundWorkerCoop,
			InstructionArgs::CreateProposal { .. } => InstructionKind::CreateProposal,
			InstructionArgs::VoteOnProposal { .. } => InstructionKind::VoteOnProposal,
			InstructionArgs::DistributeUbi => InstructionKind::DistributeUbi,
			InstructionArgs::ApplyTokenDecay => InstructionKind::ApplyTokenDecay,
			InstructionArgs::DeleteActivity => InstructionKind::DeleteActivity,
		}
	}

	/// Discriminator followed by the arguments in declaration order.
	pub fn encode(&self) -> Vec<u8> {
		let mut w = ByteWriter::with_discriminator(&self.kind().discriminator());
		match self {
			InstructionArgs::InitializeDao { authority } => {
				w.put_address(authority);
			}
			InstructionArgs::CreateUserProfile { union_membership } => {
				w.put_bool(*union_membership);
			}
			InstructionArgs::CreateActivity {
				category,
				description,
				location,
				estimated_hours,
			} => {
				w.put_tag(*category).put_str(description);
				location.write(&mut w);
				w.put_u32(*estimated_hours);
			}
			InstructionArgs::VerifyActivity { verified } => {
				w.put_bool(*verified);
			}
			InstructionArgs::CreateStrike {
				company,
				union_verification,
				participant_count,
			} => {
				w.put_str(company)
					.put_bool(*union_verification)
					.put_u32(*participant_count);
			}
			InstructionArgs::SupportStrike { amount } | InstructionArgs::FundWorkerCoop { amount } => {
				w.put_u64(*amount);
			}
			InstructionArgs::CreateWorkerCoop {
				business_plan,
				funding_goal,
				skill_requirements,
			} => {
				w.put_str(business_plan)
					.put_u64(*funding_goal)
					.put_tags(skill_requirements);
			}
			InstructionArgs::CreateProposal {
				title,
				description,
				proposal_type,
			} => {
				w.put_str(title).put_str(description).put_tag(*proposal_type);
			}
			InstructionArgs::VoteOnProposal { vote, token_amount } => {
				w.put_bool(*vote).put_u64(*token_amount);
			}
			InstructionArgs::DistributeUbi
			| InstructionArgs::ApplyTokenDecay
			| InstructionArgs::DeleteActivity => {}
		}
		w.into_bytes()
	}

	pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
		let mut r = ByteReader::new(bytes);
		let discriminator = r.discriminator()?;
		let kind = InstructionKind::from_discriminator(&discriminator)
			.ok_or(CodecError::UnknownDiscriminator(discriminator))?;
		let schema = kind.schema();
		if bytes.len() < schema.min_len() {
			return Err(CodecError::MalformedAccount(format!(
				"{} instruction needs at least {} bytes, got {}",
				schema.name,
				schema.min_len(),
				bytes.len()
			)));
		}

		let args = match kind {
			InstructionKind::InitializeDao => InstructionArgs::InitializeDao {
				authority: r.address()?,
			},
			InstructionKind::CreateUserProfile => InstructionArgs::CreateUserProfile {
				union_membership: r.bool()?,
			},
			InstructionKind::CreateActivity => InstructionArgs::CreateActivity {
				category: r.tag()?,
				description: r.string()?,
				location: Location::read(&mut r)?,
				estimated_hours: r.u32()?,
			},
			InstructionKind::VerifyActivity => InstructionArgs::VerifyActivity {
				verified: r.bool()?,
			},
			InstructionKind::CreateStrike => InstructionArgs::CreateStrike {
				company: r.string()?,
				union_verification: r.bool()?,
				participant_count: r.u32()?,
			},
			InstructionKind::SupportStrike => InstructionArgs::SupportStrike { amount: r.u64()? },
			InstructionKind::CreateWorkerCoop => InstructionArgs::CreateWorkerCoop {
				business_plan: r.string()?,
				funding_goal: r.u64()?,
				skill_requirements: r.tags()?,
			},
			InstructionKind::FundWorkerCoop => InstructionArgs::FundWorkerCoop { amount: r.u64()? },
			InstructionKind::CreateProposal => InstructionArgs::CreateProposal {
				title: r.string()?,
				description: r.string()?,
				proposal_type: r.tag()?,
			},
			InstructionKind::VoteOnProposal => InstructionArgs::VoteOnProposal {
				vote: r.bool()?,
				token_amount: r.u64()?,
			},
			InstructionKind::DistributeUbi => InstructionArgs::DistributeUbi,
			InstructionKind::ApplyTokenDecay => InstructionArgs::ApplyTokenDecay,
			InstructionKind::DeleteActivity => InstructionArgs::DeleteActivity,
		};
		Ok(args)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
	pub address: Address,
	pub is_signer: bool,
	pub is_writable: bool,
}

impl AccountMeta {
	pub fn writable(address: Address, is_signer: bool) -> Self {
		Self {
			address,
			is_signer,
			is_writable: true,
		}
	}

	pub fn readonly(address: Address, is_signer: bool) -> Self {
		Self {
			address,
			is_signer,
			is_writable: false,
		}
	}
}

/// A single program call: target program, the accounts it touches and its data.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
	pub program_id: Address,
	pub accounts: Vec<AccountMeta>,
	pub data: Vec<u8>,
}

impl Instruction {
	pub fn kind(&self) -> Option<InstructionKind> {
		let discriminator: [u8; 8] = self.data.get(..8)?.try_into().ok()?;
		InstructionKind::from_discriminator(&discriminator)
	}
}

/// Address derivation and instruction construction for one deployment of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaoProgram {
	program_id: Address,
}

impl DaoProgram {
	pub fn new(program_id: Address) -> Self {
		Self { program_id }
	}

	pub fn program_id(&self) -> Address {
		self.program_id
	}

	pub fn dao_state_address(&self) -> Result<(Address, u8), DerivationError> {
		derive_address(AccountKind::DaoState.namespace(), &[], &self.program_id)
	}

	pub fn user_profile_address(&self, owner: &Address) -> Result<(Address, u8), DerivationError> {
		derive_address(
			AccountKind::UserProfile.namespace(),
			&[owner.as_bytes()],
			&self.program_id,
		)
	}

	/// Address of an activity, strike, cooperative or proposal with a caller-chosen id.
	pub fn record_address(&self, kind: AccountKind, id: &str) -> Result<(Address, u8), DerivationError> {
		derive_address(kind.namespace(), &[id.as_bytes()], &self.program_id)
	}

	fn instruction(&self, args: InstructionArgs, accounts: Vec<AccountMeta>) -> Instruction {
		Instruction {
			program_id: self.program_id,
			accounts,
			data: args.encode(),
		}
	}

	pub fn initialize_dao(&self, authority: Address) -> Result<Instruction, DerivationError> {
		let (dao_state, _) = self.dao_state_address()?;
		Ok(self.instruction(
			InstructionArgs::InitializeDao { authority },
			vec![
				AccountMeta::writable(dao_state, false),
				AccountMeta::writable(authority, true),
				AccountMeta::readonly(SYSTEM_PROGRAM, false),
			],
		))
	}

	pub fn create_user_profile(
		&self,
		user: Address,
		union_membership: bool,
	) -> Result<Instruction, DerivationError> {
		let (profile, _) = self.user_profile_address(&user)?;
		let (dao_state, _) = self.dao_state_address()?;
		Ok(self.instruction(
			InstructionArgs::CreateUserProfile { union_membership },
			vec![
				AccountMeta::writable(profile, false),
				AccountMeta::writable(dao_state, false),
				AccountMeta::writable(user, true),
				AccountMeta::readonly(SYSTEM_PROGRAM, false),
			],
		))
	}

	pub fn create_activity(
		&self,
		activity: Address,
		user: Address,
		category: ActivityCategory,
		description: String,
		location: Location,
		estimated_hours: u32,
	) -> Result<Instruction, DerivationError> {
		let (dao_state, _) = self.dao_state_address()?;
		Ok(self.instruction(
			InstructionArgs::CreateActivity {
				category,
				description,
				location,
				estimated_hours,
			},
			vec![
				AccountMeta::writable(activity, false),
				AccountMeta::writable(dao_state, false),
				AccountMeta::writable(user, true),
				AccountMeta::readonly(SYSTEM_PROGRAM, false),
				AccountMeta::readonly(CLOCK_SYSVAR, false),
			],
		))
	}

	pub fn verify_activity(
		&self,
		activity: Address,
		creator_profile: Address,
		verifier: Address,
		verified: bool,
	) -> Instruction {
		self.instruction(
			InstructionArgs::VerifyActivity { verified },
			vec![
				AccountMeta::writable(activity, false),
				AccountMeta::writable(creator_profile, false),
				AccountMeta::writable(verifier, true),
			],
		)
	}

	pub fn delete_activity(&self, activity: Address, user: Address) -> Instruction {
		self.instruction(
			InstructionArgs::DeleteActivity,
			vec![
				AccountMeta::writable(activity, false),
				AccountMeta::writable(user, true),
			],
		)
	}

	pub fn create_strike(
		&self,
		strike: Address,
		user: Address,
		company: String,
		union_verification: bool,
		participant_count: u32,
	) -> Instruction {
		self.instruction(
			InstructionArgs::CreateStrike {
				company,
				union_verification,
				participant_count,
			},
			vec![
				AccountMeta::writable(strike, false),
				AccountMeta::writable(user, true),
				AccountMeta::readonly(SYSTEM_PROGRAM, false),
				AccountMeta::readonly(CLOCK_SYSVAR, false),
			],
		)
	}

	pub fn support_strike(
		&self,
		strike: Address,
		supporter_profile: Address,
		supporter: Address,
		amount: u64,
	) -> Instruction {
		self.instruction(
			InstructionArgs::SupportStrike { amount },
			vec![
				AccountMeta::writable(strike, false),
				AccountMeta::writable(supporter_profile, false),
				AccountMeta::writable(supporter, true),
			],
		)
	}

	pub fn create_worker_coop(
		&self,
		coop: Address,
		user: Address,
		business_plan: String,
		funding_goal: u64,
		skill_requirements: Vec<SkillType>,
	) -> Instruction {
		self.instruction(
			InstructionArgs::CreateWorkerCoop {
				business_plan,
				funding_goal,
				skill_requirements,
			},
			vec![
				AccountMeta::writable(coop, false),
				AccountMeta::writable(user, true),
				AccountMeta::readonly(SYSTEM_PROGRAM, false),
				AccountMeta::readonly(CLOCK_SYSVAR, false),
			],
		)
	}

	pub fn fund_worker_coop(
		&self,
		coop: Address,
		funder_profile: Address,
		funder: Address,
		amount: u64,
	) -> Instruction {
		self.instruction(
			InstructionArgs::FundWorkerCoop { amount },
			vec![
				AccountMeta::writable(coop, false),
				AccountMeta::writable(funder_profile, false),
				AccountMeta::writable(funder, true),
			],
		)
	}

	pub fn create_proposal(
		&self,
		proposal: Address,
		user: Address,
		title: String,
		description: String,
		proposal_type: ProposalType,
	) -> Instruction {
		self.instruction(
			InstructionArgs::CreateProposal {
				title,
				description,
				proposal_type,
			},
			vec![
				AccountMeta::writable(proposal, false),
				AccountMeta::writable(user, true),
				AccountMeta::readonly(SYSTEM_PROGRAM, false),
				AccountMeta::readonly(CLOCK_SYSVAR, false),
			],
		)
	}

	pub fn vote_on_proposal(
		&self,
		proposal: Address,
		voter: Address,
		vote: bool,
		token_amount: u64,
	) -> Instruction {
		self.instruction(
			InstructionArgs::VoteOnProposal { vote, token_amount },
			vec![
				AccountMeta::writable(proposal, false),
				AccountMeta::writable(voter, true),
				AccountMeta::readonly(CLOCK_SYSVAR, false),
			],
		)
	}
}

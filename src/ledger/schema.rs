//! Static schema of every account and instruction the program understands.
//!
//! The discriminator of an account is `sha256("account:<TypeName>")[..8]` and of an
//! instruction `sha256("global:<snake_name>")[..8]`. They are stored precomputed here and
//! checked against the hash in tests, so both the encoder and the decoder read them from
//! one place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire shape of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
	Bool,
	U8,
	U32,
	U64,
	I64,
	F64,
	Address,
	Text,
	Tag(&'static str),
	Location,
	AddressList,
	TagList(&'static str),
}

impl FieldType {
	/// Smallest number of bytes a value of this type can occupy.
	pub const fn min_len(self) -> usize {
		match self {
			FieldType::Bool | FieldType::U8 | FieldType::Tag(_) => 1,
			FieldType::U32 | FieldType::Text | FieldType::AddressList | FieldType::TagList(_) => 4,
			FieldType::U64 | FieldType::I64 | FieldType::F64 => 8,
			FieldType::Address => 32,
			// latitude, longitude, address text
			FieldType::Location => 8 + 8 + 4,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
	pub name: &'static str,
	pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> Field {
	Field { name, ty }
}

fn fields_min_len(fields: &[Field]) -> usize {
	fields.iter().map(|f| f.ty.min_len()).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
	DaoState,
	UserProfile,
	Activity,
	Strike,
	WorkerCoop,
	Proposal,
}

impl AccountKind {
	pub const ALL: [AccountKind; 6] = [
		AccountKind::DaoState,
		AccountKind::UserProfile,
		AccountKind::Activity,
		AccountKind::Strike,
		AccountKind::WorkerCoop,
		AccountKind::Proposal,
	];

	pub fn schema(self) -> &'static AccountSchema {
		&ACCOUNTS[self as usize]
	}

	pub fn discriminator(self) -> [u8; 8] {
		self.schema().discriminator
	}

	/// Plural name used for cache keys and log lines.
	pub fn collection(self) -> &'static str {
		match self {
			AccountKind::DaoState => "dao_state",
			AccountKind::UserProfile => "user_profiles",
			AccountKind::Activity => "activities",
			AccountKind::Strike => "strikes",
			AccountKind::WorkerCoop => "worker_coops",
			AccountKind::Proposal => "proposals",
		}
	}

	/// Namespace tag used when deriving addresses of this kind.
	pub fn namespace(self) -> &'static [u8] {
		match self {
			AccountKind::DaoState => b"dao_state",
			AccountKind::UserProfile => b"user_profile",
			AccountKind::Activity => b"activity",
			AccountKind::Strike => b"strike",
			AccountKind::WorkerCoop => b"worker_coop",
			AccountKind::Proposal => b"proposal",
		}
	}

	pub fn from_discriminator(discriminator: &[u8; 8]) -> Option<AccountKind> {
		ACCOUNTS
			.iter()
			.find(|schema| &schema.discriminator == discriminator)
			.map(|schema| schema.kind)
	}
}

impl fmt::Display for AccountKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.schema().name)
	}
}

#[derive(Debug)]
pub struct AccountSchema {
	pub kind: AccountKind,
	pub name: &'static str,
	pub discriminator: [u8; 8],
	pub fields: &'static [Field],
}

impl AccountSchema {
	/// Minimum encoded size including the discriminator.
	pub fn min_len(&self) -> usize {
		8 + fields_min_len(self.fields)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
	InitializeDao,
	CreateUserProfile,
	CreateActivity,
	VerifyActivity,
	CreateStrike,
	SupportStrike,
	CreateWorkerCoop,
	FundWorkerCoop,
	CreateProposal,
	VoteOnProposal,
	DistributeUbi,
	ApplyTokenDecay,
	DeleteActivity,
}

impl InstructionKind {
	pub fn schema(self) -> &'static InstructionSchema {
		&INSTRUCTIONS[self as usize]
	}

	pub fn discriminator(self) -> [u8; 8] {
		self.schema().discriminator
	}

	pub fn from_discriminator(discriminator: &[u8; 8]) -> Option<InstructionKind> {
		INSTRUCTIONS
			.iter()
			.find(|schema| &schema.discriminator == discriminator)
			.map(|schema| schema.kind)
	}
}

impl fmt::Display for InstructionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.schema().name)
	}
}

#[derive(Debug)]
pub struct InstructionSchema {
	pub kind: InstructionKind,
	pub name: &'static str,
	pub discriminator: [u8; 8],
	pub args: &'static [Field],
}

impl InstructionSchema {
	pub fn min_len(&self) -> usize {
		8 + fields_min_len(self.args)
	}
}

use FieldType::*;

// Indexed by `AccountKind as usize`.
pub static ACCOUNTS: [AccountSchema; 6] = [
	AccountSchema {
		kind: AccountKind::DaoState,
		name: "DaoState",
		discriminator: [24, 50, 14, 105, 233, 60, 201, 244],
		fields: &[
			field("authority", Address),
			field("total_supply", U64),
			field("circulating_supply", U64),
			field("median_balance", U64),
			field("active_users", U64),
			field("total_activities", U64),
			field("bump", U8),
		],
	},
	AccountSchema {
		kind: AccountKind::UserProfile,
		name: "UserProfile",
		discriminator: [32, 37, 119, 205, 179, 180, 13, 194],
		fields: &[
			field("owner", Address),
			field("union_membership", Bool),
			field("tokens_earned", U64),
			field("hours_worked", U64),
			field("activities_completed", U64),
			field("reputation_score", U64),
			field("strike_participation", U64),
			field("class_solidarity_score", U64),
			field("last_activity", I64),
			field("bump", U8),
		],
	},
	AccountSchema {
		kind: AccountKind::Activity,
		name: "Activity",
		discriminator: [159, 236, 145, 113, 221, 192, 137, 112],
		fields: &[
			field("creator", Address),
			field("category", Tag("ActivityCategory")),
			field("description", Text),
			field("location", Location),
			field("estimated_hours", U32),
			field("status", Tag("ActivityStatus")),
			field("verification_count", U8),
			field("verifiers", AddressList),
			field("reward_amount", U64),
			field("timestamp", I64),
			field("bump", U8),
		],
	},
	AccountSchema {
		kind: AccountKind::Strike,
		name: "Strike",
		discriminator: [30, 241, 34, 218, 102, 65, 121, 176],
		fields: &[
			field("creator", Address),
			field("company", Text),
			field("union_verification", Bool),
			field("participant_count", U32),
			field("daily_support", U64),
			field("legitimacy_score", U8),
			field("total_fund", U64),
			field("strike_duration", U32),
			field("supporters", AddressList),
			field("timestamp", I64),
			field("bump", U8),
		],
	},
	AccountSchema {
		kind: AccountKind::WorkerCoop,
		name: "WorkerCoop",
		discriminator: [21, 52, 103, 26, 4, 72, 99, 28],
		fields: &[
			field("founders", AddressList),
			field("business_plan", Text),
			field("funding_goal", U64),
			field("current_funding", U64),
			field("skill_requirements", TagList("SkillType")),
			field("democratic_votes", U32),
			field("sustainability_score", U8),
			field("members", AddressList),
			field("timestamp", I64),
			field("bump", U8),
		],
	},
	AccountSchema {
		kind: AccountKind::Proposal,
		name: "Proposal",
		discriminator: [26, 94, 189, 187, 116, 136, 53, 33],
		fields: &[
			field("creator", Address),
			field("title", Text),
			field("description", Text),
			field("proposal_type", Tag("ProposalType")),
			field("votes_for", U64),
			field("votes_against", U64),
			field("status", Tag("ProposalStatus")),
			field("created_at", I64),
			field("voting_deadline", I64),
			field("voters", AddressList),
			field("bump", U8),
		],
	},
];

// Indexed by `InstructionKind as usize`.
pub static INSTRUCTIONS: [InstructionSchema; 13] = [
	InstructionSchema {
		kind: InstructionKind::InitializeDao,
		name: "initialize_dao",
		discriminator: [128, 226, 96, 90, 39, 56, 24, 196],
		args: &[field("authority", Address)],
	},
	InstructionSchema {
		kind: InstructionKind::CreateUserProfile,
		name: "create_user_profile",
		discriminator: [9, 214, 142, 184, 153, 65, 50, 174],
		args: &[field("union_membership", Bool)],
	},
	InstructionSchema {
		kind: InstructionKind::CreateActivity,
		name: "create_activity",
		discriminator: [185, 108, 147, 27, 45, 183, 236, 153],
		args: &[
			field("category", Tag("ActivityCategory")),
			field("description", Text),
			field("location", Location),
			field("estimated_hours", U32),
		],
	},
	InstructionSchema {
		kind: InstructionKind::VerifyActivity,
		name: "verify_activity",
		discriminator: [92, 149, 206, 51, 56, 16, 159, 77],
		args: &[field("verified", Bool)],
	},
	InstructionSchema {
		kind: InstructionKind::CreateStrike,
		name: "create_strike",
		discriminator: [222, 229, 112, 160, 144, 23, 33, 131],
		args: &[
			field("company", Text),
			field("union_verification", Bool),
			field("participant_count", U32),
		],
	},
	InstructionSchema {
		kind: InstructionKind::SupportStrike,
		name: "support_strike",
		discriminator: [122, 95, 42, 192, 67, 88, 176, 27],
		args: &[field("amount", U64)],
	},
	InstructionSchema {
		kind: InstructionKind::CreateWorkerCoop,
		name: "create_worker_coop",
		discriminator: [78, 122, 234, 190, 203, 184, 136, 25],
		args: &[
			field("business_plan", Text),
			field("funding_goal", U64),
			field("skill_requirements", TagList("SkillType")),
		],
	},
	InstructionSchema {
		kind: InstructionKind::FundWorkerCoop,
		name: "fund_worker_coop",
		discriminator: [114, 194, 105, 110, 22, 179, 189, 244],
		args: &[field("amount", U64)],
	},
	InstructionSchema {
		kind: InstructionKind::CreateProposal,
		name: "create_proposal",
		discriminator: [132, 116, 68, 174, 216, 160, 198, 22],
		args: &[
			field("title", Text),
			field("description", Text),
			field("proposal_type", Tag("ProposalType")),
		],
	},
	InstructionSchema {
		kind: InstructionKind::VoteOnProposal,
		name: "vote_on_proposal",
		discriminator: [188, 239, 13, 88, 119, 199, 251, 119],
		args: &[field("vote", Bool), field("token_amount", U64)],
	},
	InstructionSchema {
		kind: InstructionKind::DistributeUbi,
		name: "distribute_ubi",
		discriminator: [3, 197, 0, 124, 173, 205, 149, 217],
		args: &[],
	},
	InstructionSchema {
		kind: InstructionKind::ApplyTokenDecay,
		name: "apply_token_decay",
		discriminator: [26, 165, 156, 7, 230, 179, 248, 203],
		args: &[],
	},
	InstructionSchema {
		kind: InstructionKind::DeleteActivity,
		name: "delete_activity",
		discriminator: [228, 100, 90, 72, 28, 103, 180, 49],
		args: &[],
	},
];

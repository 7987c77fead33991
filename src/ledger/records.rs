//! Typed records stored by the DAO program, their wire enums and the domain rules the
//! program applies when they change.
//!
//! The rule methods mirror the program so a write that cannot reach the ledger can still
//! be applied to the local view with the same outcome.

use crate::ledger::address::Address;
use crate::ledger::codec::{ByteReader, ByteWriter, CodecError, WireEnum};
use crate::ledger::schema::AccountKind;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Base units per whole token.
pub const TOKEN_DECIMALS: u32 = 9;
pub const BASE_UNITS_PER_TOKEN: u64 = 1_000_000_000;
/// One billion tokens minted to a freshly initialized DAO.
pub const INITIAL_TOTAL_SUPPLY: u64 = 1_000_000_000 * BASE_UNITS_PER_TOKEN;
/// Approvals needed before an activity is verified.
pub const REQUIRED_APPROVALS: u8 = 3;
pub const MAX_DESCRIPTION_LEN: usize = 200;
pub const STRIKE_DAILY_SUPPORT: u64 = 80 * BASE_UNITS_PER_TOKEN;
pub const SUPPORT_SOLIDARITY_BONUS: u64 = 30;
pub const FUNDING_SOLIDARITY_BONUS: u64 = 40;
pub const VOTING_WINDOW_HOURS: i64 = 72;

/// Why the program would refuse a mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
	#[error("description is {0} bytes, maximum is {MAX_DESCRIPTION_LEN}")]
	DescriptionTooLong(usize),
	#[error("verifier has already verified this activity")]
	AlreadyVerified,
	#[error("activity is not pending")]
	ActivityNotPending,
	#[error("proposal is not active")]
	ProposalNotActive,
	#[error("voting deadline has passed")]
	VotingDeadlinePassed,
	#[error("voter has already voted on this proposal")]
	AlreadyVoted,
	#[error("only the creator may do this")]
	Unauthorized,
}

/// Implements [`WireEnum`] for a fieldless enum listed in declaration order.
macro_rules! wire_enum {
	($ty:ident, [$($variant:ident),+ $(,)?]) => {
		impl WireEnum for $ty {
			const NAME: &'static str = stringify!($ty);
			const VARIANTS: &'static [Self] = &[$($ty::$variant),+];

			fn tag(self) -> u8 {
				self as u8
			}
		}

		impl fmt::Display for $ty {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				fmt::Debug::fmt(self, f)
			}
		}
	};
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityCategory {
	Environmental,
	Disaster,
	Elderly,
	Education,
	WorkerSolidarity,
}

wire_enum!(
	ActivityCategory,
	[Environmental, Disaster, Elderly, Education, WorkerSolidarity]
);

impl ActivityCategory {
	/// Whole tokens paid per estimated hour.
	pub fn base_rate(self) -> u64 {
		match self {
			ActivityCategory::Environmental => 40,
			ActivityCategory::Disaster => 80,
			ActivityCategory::Elderly => 50,
			ActivityCategory::Education => 60,
			ActivityCategory::WorkerSolidarity => 70,
		}
	}

	/// Reward in base units for `hours` of this kind of work.
	pub fn reward_for(self, hours: u32) -> u64 {
		self.base_rate()
			.saturating_mul(hours as u64)
			.saturating_mul(BASE_UNITS_PER_TOKEN)
	}
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityStatus {
	Pending,
	Verified,
	Rejected,
}

wire_enum!(ActivityStatus, [Pending, Verified, Rejected]);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkillType {
	Technical,
	Administrative,
	Legal,
	Marketing,
	Production,
	Education,
	Healthcare,
	Construction,
}

wire_enum!(
	SkillType,
	[
		Technical,
		Administrative,
		Legal,
		Marketing,
		Production,
		Education,
		Healthcare,
		Construction,
	]
);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalType {
	TokenomicsChange,
	PolicyUpdate,
	ResourceAllocation,
	TechnicalUpgrade,
	CommunityGuidelines,
}

wire_enum!(
	ProposalType,
	[
		TokenomicsChange,
		PolicyUpdate,
		ResourceAllocation,
		TechnicalUpgrade,
		CommunityGuidelines,
	]
);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
	Active,
	Passed,
	Rejected,
	Executed,
}

wire_enum!(ProposalStatus, [Active, Passed, Rejected, Executed]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
	#[serde(with = "coordinate")]
	pub latitude: f64,
	#[serde(with = "coordinate")]
	pub longitude: f64,
	pub address: String,
}

impl Location {
	pub fn new(latitude: f64, longitude: f64, address: impl Into<String>) -> Self {
		Self {
			latitude,
			longitude,
			address: address.into(),
		}
	}

	/// Both coordinates are finite numbers.
	pub fn is_finite(&self) -> bool {
		self.latitude.is_finite() && self.longitude.is_finite()
	}

	pub(crate) fn write(&self, writer: &mut ByteWriter) {
		writer
			.put_f64(self.latitude)
			.put_f64(self.longitude)
			.put_str(&self.address);
	}

	pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
		Ok(Self {
			latitude: reader.f64()?,
			longitude: reader.f64()?,
			address: reader.string()?,
		})
	}
}

/// JSON has no NaN or infinity, so non-finite coordinates are written as strings.
mod coordinate {
	use serde::{Deserialize, Deserializer, Serializer, de};

	pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
		if value.is_finite() {
			serializer.serialize_f64(*value)
		} else if value.is_nan() {
			serializer.serialize_str("NaN")
		} else if value.is_sign_positive() {
			serializer.serialize_str("inf")
		} else {
			serializer.serialize_str("-inf")
		}
	}

	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Repr {
		Number(f64),
		Text(String),
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
		match Repr::deserialize(deserializer)? {
			Repr::Number(value) => Ok(value),
			Repr::Text(text) => match text.as_str() {
				"NaN" => Ok(f64::NAN),
				"inf" => Ok(f64::INFINITY),
				"-inf" => Ok(f64::NEG_INFINITY),
				other => Err(de::Error::custom(format!("invalid coordinate {:?}", other))),
			},
		}
	}
}

/// A record together with the address it is stored at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyed<T> {
	pub address: Address,
	#[serde(flatten)]
	pub record: T,
}

impl<T> Keyed<T> {
	pub fn new(address: Address, record: T) -> Self {
		Self { address, record }
	}
}

/// A record kind with a fixed account layout.
///
/// The body excludes the 8-byte discriminator, which [`crate::ledger::accounts`] handles
/// using the static schema.
pub trait AccountRecord:
	Sized + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
	const KIND: AccountKind;

	fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, CodecError>;

	fn encode_body(&self, writer: &mut ByteWriter);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaoState {
	pub authority: Address,
	pub total_supply: u64,
	pub circulating_supply: u64,
	pub median_balance: u64,
	pub active_users: u64,
	pub total_activities: u64,
	pub bump: u8,
}

impl DaoState {
	pub fn new(authority: Address, bump: u8) -> Self {
		Self {
			authority,
			total_supply: INITIAL_TOTAL_SUPPLY,
			circulating_supply: 0,
			median_balance: 0,
			active_users: 0,
			total_activities: 0,
			bump,
		}
	}
}

impl AccountRecord for DaoState {
	const KIND: AccountKind = AccountKind::DaoState;

	fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
		Ok(Self {
			authority: r.address()?,
			total_supply: r.u64()?,
			circulating_supply: r.u64()?,
			median_balance: r.u64()?,
			active_users: r.u64()?,
			total_activities: r.u64()?,
			bump: r.u8()?,
		})
	}

	fn encode_body(&self, w: &mut ByteWriter) {
		w.put_address(&self.authority)
			.put_u64(self.total_supply)
			.put_u64(self.circulating_supply)
			.put_u64(self.median_balance)
			.put_u64(self.active_users)
			.put_u64(self.total_activities)
			.put_u8(self.bump);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
	pub owner: Address,
	pub union_membership: bool,
	pub tokens_earned: u64,
	pub hours_worked: u64,
	pub activities_completed: u64,
	pub reputation_score: u64,
	pub strike_participation: u64,
	pub solidarity_score: u64,
	pub last_activity: DateTime<Utc>,
	pub bump: u8,
}

impl UserProfile {
	/// A freshly created profile, as the program initialises it.
	pub fn new(owner: Address, union_membership: bool, now: DateTime<Utc>, bump: u8) -> Self {
		Self {
			owner,
			union_membership,
			tokens_earned: 0,
			hours_worked: 0,
			activities_completed: 0,
			reputation_score: 50,
			strike_participation: 0,
			solidarity_score: 0,
			last_activity: now,
			bump,
		}
	}

	/// Pay out a verified activity to its creator.
	pub fn credit_activity(&mut self, activity: &Activity) {
		self.tokens_earned = self.tokens_earned.saturating_add(activity.reward_amount);
		self.hours_worked = self
			.hours_worked
			.saturating_add(activity.estimated_hours as u64);
		self.activities_completed = self.activities_completed.saturating_add(1);
		self.reputation_score = self.reputation_score.saturating_add(10);
	}

	/// Solidarity credit for contributing to a strike fund.
	pub fn credit_support(&mut self) {
		self.solidarity_score = self.solidarity_score.saturating_add(SUPPORT_SOLIDARITY_BONUS);
	}

	/// Solidarity credit for funding a cooperative.
	pub fn credit_funding(&mut self) {
		self.solidarity_score = self.solidarity_score.saturating_add(FUNDING_SOLIDARITY_BONUS);
	}
}

impl AccountRecord for UserProfile {
	const KIND: AccountKind = AccountKind::UserProfile;

	fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
		Ok(Self {
			owner: r.address()?,
			union_membership: r.bool()?,
			tokens_earned: r.u64()?,
			hours_worked: r.u64()?,
			activities_completed: r.u64()?,
			reputation_score: r.u64()?,
			strike_participation: r.u64()?,
			solidarity_score: r.u64()?,
			last_activity: r.timestamp()?,
			bump: r.u8()?,
		})
	}

	fn encode_body(&self, w: &mut ByteWriter) {
		w.put_address(&self.owner)
			.put_bool(self.union_membership)
			.put_u64(self.tokens_earned)
			.put_u64(self.hours_worked)
			.put_u64(self.activities_completed)
			.put_u64(self.reputation_score)
			.put_u64(self.strike_participation)
			.put_u64(self.solidarity_score)
			.put_timestamp(&self.last_activity)
			.put_u8(self.bump);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
	pub creator: Address,
	pub category: ActivityCategory,
	pub description: String,
	pub location: Location,
	pub estimated_hours: u32,
	pub status: ActivityStatus,
	pub verification_count: u8,
	pub verifiers: Vec<Address>,
	pub reward_amount: u64,
	pub timestamp: DateTime<Utc>,
	pub bump: u8,
}

/// What a single verification did to an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationEffect {
	Recorded,
	Verified,
	Rejected,
}

impl Activity {
	pub fn new(
		creator: Address,
		category: ActivityCategory,
		description: String,
		location: Location,
		estimated_hours: u32,
		now: DateTime<Utc>,
		bump: u8,
	) -> Result<Self, RuleViolation> {
		if description.len() > MAX_DESCRIPTION_LEN {
			return Err(RuleViolation::DescriptionTooLong(description.len()));
		}
		Ok(Self {
			creator,
			category,
			reward_amount: category.reward_for(estimated_hours),
			description,
			location,
			estimated_hours,
			status: ActivityStatus::Pending,
			verification_count: 0,
			verifiers: Vec::new(),
			timestamp: now,
			bump,
		})
	}

	pub fn is_pending(&self) -> bool {
		self.status == ActivityStatus::Pending
	}

	/// Record one verifier's verdict.
	///
	/// Only pending activities accept verdicts, and each verifier is counted once. Status
	/// moves to Verified at the approval threshold, or to Rejected once that many
	/// verifiers have weighed in without a single approval.
	pub fn apply_verification(
		&mut self,
		verifier: Address,
		approved: bool,
	) -> Result<VerificationEffect, RuleViolation> {
		if self.verifiers.contains(&verifier) {
			return Err(RuleViolation::AlreadyVerified);
		}
		if !self.is_pending() {
			return Err(RuleViolation::ActivityNotPending);
		}

		self.verifiers.push(verifier);
		if approved {
			self.verification_count = self.verification_count.saturating_add(1);
		}

		if self.verification_count >= REQUIRED_APPROVALS {
			self.status = ActivityStatus::Verified;
			Ok(VerificationEffect::Verified)
		} else if self.verifiers.len() >= REQUIRED_APPROVALS as usize
			&& self.verification_count == 0
		{
			self.status = ActivityStatus::Rejected;
			Ok(VerificationEffect::Rejected)
		} else {
			Ok(VerificationEffect::Recorded)
		}
	}

	/// Soft delete: a pending activity is withdrawn by its creator.
	pub fn withdraw(&mut self, requester: &Address) -> Result<(), RuleViolation> {
		if &self.creator != requester {
			return Err(RuleViolation::Unauthorized);
		}
		if !self.is_pending() {
			return Err(RuleViolation::ActivityNotPending);
		}
		self.status = ActivityStatus::Rejected;
		Ok(())
	}
}

impl AccountRecord for Activity {
	const KIND: AccountKind = AccountKind::Activity;

	fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
		Ok(Self {
			creator: r.address()?,
			// Unknown category/status tags come from newer program versions.
			category: r.tag_or(ActivityCategory::Environmental)?,
			description: r.string()?,
			location: Location::read(r)?,
			estimated_hours: r.u32()?,
			status: r.tag_or(ActivityStatus::Pending)?,
			verification_count: r.u8()?,
			verifiers: r.addresses()?,
			reward_amount: r.u64()?,
			timestamp: r.timestamp()?,
			bump: r.u8()?,
		})
	}

	fn encode_body(&self, w: &mut ByteWriter) {
		w.put_address(&self.creator)
			.put_tag(self.category)
			.put_str(&self.description);
		self.location.write(w);
		w.put_u32(self.estimated_hours)
			.put_tag(self.status)
			.put_u8(self.verification_count)
			.put_addresses(&self.verifiers)
			.put_u64(self.reward_amount)
			.put_timestamp(&self.timestamp)
			.put_u8(self.bump);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strike {
	pub creator: Address,
	pub company: String,
	pub union_verification: bool,
	pub participant_count: u32,
	pub daily_support: u64,
	pub legitimacy_score: u8,
	pub total_fund: u64,
	pub strike_duration: u32,
	pub supporters: Vec<Address>,
	pub timestamp: DateTime<Utc>,
	pub bump: u8,
}

impl Strike {
	pub fn new(
		creator: Address,
		company: String,
		union_verification: bool,
		participant_count: u32,
		now: DateTime<Utc>,
		bump: u8,
	) -> Self {
		Self {
			creator,
			company,
			union_verification,
			participant_count,
			daily_support: STRIKE_DAILY_SUPPORT,
			legitimacy_score: if union_verification { 100 } else { 50 },
			total_fund: 0,
			strike_duration: 0,
			supporters: Vec::new(),
			timestamp: now,
			bump,
		}
	}

	/// Add `amount` to the fund. A returning supporter is not listed twice.
	pub fn apply_support(&mut self, supporter: Address, amount: u64) {
		if !self.supporters.contains(&supporter) {
			self.supporters.push(supporter);
		}
		self.total_fund = self.total_fund.saturating_add(amount);
	}
}

impl AccountRecord for Strike {
	const KIND: AccountKind = AccountKind::Strike;

	fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
		Ok(Self {
			creator: r.address()?,
			company: r.string()?,
			union_verification: r.bool()?,
			participant_count: r.u32()?,
			daily_support: r.u64()?,
			legitimacy_score: r.u8()?,
			total_fund: r.u64()?,
			strike_duration: r.u32()?,
			supporters: r.addresses()?,
			timestamp: r.timestamp()?,
			bump: r.u8()?,
		})
	}

	fn encode_body(&self, w: &mut ByteWriter) {
		w.put_address(&self.creator)
			.put_str(&self.company)
			.put_bool(self.union_verification)
			.put_u32(self.participant_count)
			.put_u64(self.daily_support)
			.put_u8(self.legitimacy_score)
			.put_u64(self.total_fund)
			.put_u32(self.strike_duration)
			.put_addresses(&self.supporters)
			.put_timestamp(&self.timestamp)
			.put_u8(self.bump);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCoop {
	pub founders: Vec<Address>,
	pub business_plan: String,
	pub funding_goal: u64,
	pub current_funding: u64,
	pub skill_requirements: Vec<SkillType>,
	pub democratic_votes: u32,
	pub sustainability_score: u8,
	pub members: Vec<Address>,
	pub timestamp: DateTime<Utc>,
	pub bump: u8,
}

impl WorkerCoop {
	pub fn new(
		founder: Address,
		business_plan: String,
		funding_goal: u64,
		skill_requirements: Vec<SkillType>,
		now: DateTime<Utc>,
		bump: u8,
	) -> Self {
		Self {
			founders: vec![founder],
			business_plan,
			funding_goal,
			current_funding: 0,
			skill_requirements,
			democratic_votes: 0,
			sustainability_score: 50,
			members: vec![founder],
			timestamp: now,
			bump,
		}
	}

	pub fn apply_funding(&mut self, amount: u64) {
		self.current_funding = self.current_funding.saturating_add(amount);
	}

	pub fn is_funded(&self) -> bool {
		self.current_funding >= self.funding_goal
	}
}

impl AccountRecord for WorkerCoop {
	const KIND: AccountKind = AccountKind::WorkerCoop;

	fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
		Ok(Self {
			founders: r.addresses()?,
			business_plan: r.string()?,
			funding_goal: r.u64()?,
			current_funding: r.u64()?,
			skill_requirements: r.tags()?,
			democratic_votes: r.u32()?,
			sustainability_score: r.u8()?,
			members: r.addresses()?,
			timestamp: r.timestamp()?,
			bump: r.u8()?,
		})
	}

	fn encode_body(&self, w: &mut ByteWriter) {
		w.put_addresses(&self.founders)
			.put_str(&self.business_plan)
			.put_u64(self.funding_goal)
			.put_u64(self.current_funding)
			.put_tags(&self.skill_requirements)
			.put_u32(self.democratic_votes)
			.put_u8(self.sustainability_score)
			.put_addresses(&self.members)
			.put_timestamp(&self.timestamp)
			.put_u8(self.bump);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
	pub creator: Address,
	pub title: String,
	pub description: String,
	pub proposal_type: ProposalType,
	pub votes_for: u64,
	pub votes_against: u64,
	pub status: ProposalStatus,
	pub created_at: DateTime<Utc>,
	pub voting_deadline: DateTime<Utc>,
	pub voters: Vec<Address>,
	pub bump: u8,
}

impl Proposal {
	pub fn new(
		creator: Address,
		title: String,
		description: String,
		proposal_type: ProposalType,
		now: DateTime<Utc>,
		bump: u8,
	) -> Self {
		Self {
			creator,
			title,
			description,
			proposal_type,
			votes_for: 0,
			votes_against: 0,
			status: ProposalStatus::Active,
			created_at: now,
			voting_deadline: now + Duration::hours(VOTING_WINDOW_HOURS),
			voters: Vec::new(),
			bump,
		}
	}

	/// Quadratic voting weight: the integer square root of the tokens committed.
	pub fn vote_weight(token_amount: u64) -> u64 {
		token_amount.isqrt()
	}

	/// Cast a vote, returning the weight it was counted with.
	pub fn apply_vote(
		&mut self,
		voter: Address,
		in_favor: bool,
		token_amount: u64,
		now: DateTime<Utc>,
	) -> Result<u64, RuleViolation> {
		if self.status != ProposalStatus::Active {
			return Err(RuleViolation::ProposalNotActive);
		}
		if now >= self.voting_deadline {
			return Err(RuleViolation::VotingDeadlinePassed);
		}
		if self.voters.contains(&voter) {
			return Err(RuleViolation::AlreadyVoted);
		}

		let weight = Self::vote_weight(token_amount);
		if in_favor {
			self.votes_for = self.votes_for.saturating_add(weight);
		} else {
			self.votes_against = self.votes_against.saturating_add(weight);
		}
		self.voters.push(voter);
		Ok(weight)
	}
}

impl AccountRecord for Proposal {
	const KIND: AccountKind = AccountKind::Proposal;

	fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
		Ok(Self {
			creator: r.address()?,
			title: r.string()?,
			description: r.string()?,
			proposal_type: r.tag()?,
			votes_for: r.u64()?,
			votes_against: r.u64()?,
			status: r.tag()?,
			created_at: r.timestamp()?,
			voting_deadline: r.timestamp()?,
			voters: r.addresses()?,
			bump: r.u8()?,
		})
	}

	fn encode_body(&self, w: &mut ByteWriter) {
		w.put_address(&self.creator)
			.put_str(&self.title)
			.put_str(&self.description)
			.put_tag(self.proposal_type)
			.put_u64(self.votes_for)
			.put_u64(self.votes_against)
			.put_tag(self.status)
			.put_timestamp(&self.created_at)
			.put_timestamp(&self.voting_deadline)
			.put_addresses(&self.voters)
			.put_u8(self.bump);
	}
}

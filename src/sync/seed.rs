//! Fixed demonstration records, used only when neither the ledger nor the cache has data.
//!
//! Seed records are never written to the cache.

use crate::ledger::{
	AccountKind, Activity, ActivityCategory, ActivityStatus, Address, BASE_UNITS_PER_TOKEN,
	DaoProgram, Keyed, Location, UserProfile,
};
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Creators of the seed activities: the addresses ending in 1 and 2.
pub const SEED_CREATORS: [Address; 2] = [
	Address::new([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
	Address::new([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]),
];

struct SeedActivity {
	id: &'static str,
	category: ActivityCategory,
	description: &'static str,
	latitude: f64,
	longitude: f64,
	place: &'static str,
	hours: u32,
	status: ActivityStatus,
	verification_count: u8,
	age: Duration,
}

fn seed_table() -> [SeedActivity; 2] {
	[
		SeedActivity {
			id: "1",
			category: ActivityCategory::Environmental,
			description: "Beach cleanup in Antalya",
			latitude: 36.8841,
			longitude: 30.7056,
			place: "Antalya, Turkey",
			hours: 4,
			status: ActivityStatus::Verified,
			verification_count: 3,
			age: Duration::days(1),
		},
		SeedActivity {
			id: "2",
			category: ActivityCategory::WorkerSolidarity,
			description: "Supporting factory workers strike",
			latitude: 41.0082,
			longitude: 28.9784,
			place: "Istanbul, Turkey",
			hours: 8,
			status: ActivityStatus::Pending,
			verification_count: 1,
			age: Duration::hours(1),
		},
	]
}

/// The two demonstration activities, stored at the addresses of ids "1" and "2".
pub fn seed_activities(program: &DaoProgram, now: DateTime<Utc>) -> Vec<Keyed<Activity>> {
	seed_table()
		.into_iter()
		.zip(SEED_CREATORS)
		.filter_map(|(seed, creator)| {
			let (address, bump) = match program.record_address(AccountKind::Activity, seed.id) {
				Ok(derived) => derived,
				Err(e) => {
					warn!("Skipping seed activity {}: {}", seed.id, e);
					return None;
				}
			};
			let activity = Activity {
				creator,
				category: seed.category,
				description: seed.description.to_string(),
				location: Location::new(seed.latitude, seed.longitude, seed.place),
				estimated_hours: seed.hours,
				status: seed.status,
				verification_count: seed.verification_count,
				verifiers: Vec::new(),
				reward_amount: seed.category.reward_for(seed.hours),
				timestamp: now - seed.age,
				bump,
			};
			Some(Keyed::new(address, activity))
		})
		.collect()
}

/// A demonstration profile for `owner`.
pub fn seed_user_profile(
	program: &DaoProgram,
	owner: Address,
	now: DateTime<Utc>,
) -> Option<Keyed<UserProfile>> {
	let (address, bump) = program
		.user_profile_address(&owner)
		.map_err(|e| warn!("Skipping seed profile: {}", e))
		.ok()?;
	let profile = UserProfile {
		owner,
		union_membership: false,
		tokens_earned: 150 * BASE_UNITS_PER_TOKEN + BASE_UNITS_PER_TOKEN / 2,
		hours_worked: 24,
		activities_completed: 8,
		reputation_score: 75,
		strike_participation: 2,
		solidarity_score: 85,
		last_activity: now,
		bump,
	};
	Some(Keyed::new(address, profile))
}

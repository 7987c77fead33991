//! The in-memory record set the orchestrator keeps in sync.

use crate::ledger::{
	AccountKind, AccountRecord, Activity, Address, DaoState, Keyed, Proposal, Strike,
	UserProfile, WorkerCoop,
};
use crate::sync::tiers::ReadSource;
use std::collections::BTreeMap;

/// Everything the client currently knows, with the tier each kind was last read from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
	pub user_profile: Option<Keyed<UserProfile>>,
	pub dao_state: Option<Keyed<DaoState>>,
	pub activities: Vec<Keyed<Activity>>,
	pub strikes: Vec<Keyed<Strike>>,
	pub cooperatives: Vec<Keyed<WorkerCoop>>,
	pub proposals: Vec<Keyed<Proposal>>,
	pub sources: BTreeMap<AccountKind, ReadSource>,
}

impl RecordSet {
	pub fn source(&self, kind: AccountKind) -> Option<ReadSource> {
		self.sources.get(&kind).copied()
	}

	/// Whether the records of `kind` are seed placeholders.
	pub fn is_seeded(&self, kind: AccountKind) -> bool {
		self.source(kind) == Some(ReadSource::Seed)
	}

	/// A real (non-seed) record of type `T` at `address`.
	pub fn find<T: Tracked>(&self, address: &Address) -> Option<&Keyed<T>> {
		if self.is_seeded(T::KIND) {
			return None;
		}
		T::records(self).iter().find(|r| r.address == *address)
	}

	/// Replace the record at the same address, or append it.
	pub fn upsert<T: Tracked>(&mut self, keyed: Keyed<T>) {
		let records = T::records_mut(self);
		match records.iter_mut().find(|r| r.address == keyed.address) {
			Some(existing) => *existing = keyed,
			None => records.push(keyed),
		}
	}

	/// Whether any real record is stored at `address`.
	pub fn contains(&self, address: &Address) -> bool {
		let profile = !self.is_seeded(AccountKind::UserProfile)
			&& self.user_profile.as_ref().is_some_and(|p| p.address == *address);
		profile
			|| self.find::<Activity>(address).is_some()
			|| self.find::<Strike>(address).is_some()
			|| self.find::<WorkerCoop>(address).is_some()
			|| self.find::<Proposal>(address).is_some()
	}

	/// The connected user's profile, unless it is a seed placeholder.
	pub fn own_profile(&self) -> Option<&Keyed<UserProfile>> {
		if self.is_seeded(AccountKind::UserProfile) {
			return None;
		}
		self.user_profile.as_ref()
	}

	pub(crate) fn clear_kind(&mut self, kind: AccountKind) {
		match kind {
			AccountKind::UserProfile => self.user_profile = None,
			AccountKind::DaoState => self.dao_state = None,
			AccountKind::Activity => self.activities.clear(),
			AccountKind::Strike => self.strikes.clear(),
			AccountKind::WorkerCoop => self.cooperatives.clear(),
			AccountKind::Proposal => self.proposals.clear(),
		}
		self.sources.remove(&kind);
	}
}

/// Record types held as a collection in [`RecordSet`].
pub trait Tracked: AccountRecord {
	fn records(set: &RecordSet) -> &Vec<Keyed<Self>>;
	fn records_mut(set: &mut RecordSet) -> &mut Vec<Keyed<Self>>;
}

macro_rules! tracked {
	($ty:ty, $field:ident) => {
		impl Tracked for $ty {
			fn records(set: &RecordSet) -> &Vec<Keyed<Self>> {
				&set.$field
			}

			fn records_mut(set: &mut RecordSet) -> &mut Vec<Keyed<Self>> {
				&mut set.$field
			}
		}
	};
}

tracked!(Activity, activities);
tracked!(Strike, strikes);
tracked!(WorkerCoop, cooperatives);
tracked!(Proposal, proposals);

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::testing::sample_activity;

	#[test]
	fn test_upsert_replaces_by_address() {
		let mut set = RecordSet::default();
		let address = Address::new([7; 32]);
		set.upsert(Keyed::new(address, sample_activity("first")));
		set.upsert(Keyed::new(Address::new([8; 32]), sample_activity("other")));
		set.upsert(Keyed::new(address, sample_activity("second")));

		assert_eq!(set.activities.len(), 2);
		assert_eq!(
			set.find::<Activity>(&address).map(|r| r.record.description.as_str()),
			Some("second")
		);
	}

	#[test]
	fn test_seed_records_are_invisible_to_lookups() {
		let mut set = RecordSet::default();
		let address = Address::new([7; 32]);
		set.upsert(Keyed::new(address, sample_activity("seeded")));
		set.sources.insert(AccountKind::Activity, ReadSource::Seed);
		assert!(set.find::<Activity>(&address).is_none());
		assert!(!set.contains(&address));

		set.sources.insert(AccountKind::Activity, ReadSource::Cache);
		assert!(set.contains(&address));
	}

	#[test]
	fn test_clear_kind_drops_source() {
		let mut set = RecordSet::default();
		set.upsert(Keyed::new(Address::new([1; 32]), sample_activity("a")));
		set.sources.insert(AccountKind::Activity, ReadSource::Remote);
		set.clear_kind(AccountKind::Activity);
		assert!(set.activities.is_empty());
		assert_eq!(set.source(AccountKind::Activity), None);
	}
}

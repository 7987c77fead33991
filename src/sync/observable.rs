//! A value with change listeners.
//!
//! Listeners run synchronously, in registration order, after every mutation.

use std::fmt;

pub type ListenerId = usize;

pub struct Observable<T> {
	value: T,
	listeners: Vec<(ListenerId, Box<dyn Fn(&T) + Send + Sync>)>,
	next_id: ListenerId,
}

impl<T> Observable<T> {
	pub fn new(value: T) -> Self {
		Self {
			value,
			listeners: Vec::new(),
			next_id: 0,
		}
	}

	pub fn get(&self) -> &T {
		&self.value
	}

	/// Replace the value and notify listeners.
	pub fn set(&mut self, value: T) {
		self.value = value;
		self.notify();
	}

	/// Mutate in place and notify listeners once.
	pub fn update<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
		let result = f(&mut self.value);
		self.notify();
		result
	}

	pub fn subscribe(&mut self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
		let id = self.next_id;
		self.next_id += 1;
		self.listeners.push((id, Box::new(listener)));
		id
	}

	pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
		let before = self.listeners.len();
		self.listeners.retain(|(listener_id, _)| *listener_id != id);
		self.listeners.len() != before
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.len()
	}

	fn notify(&self) {
		for (_, listener) in &self.listeners {
			listener(&self.value);
		}
	}
}

impl<T: Default> Default for Observable<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Observable")
			.field("value", &self.value)
			.field("listeners", &self.listeners.len())
			.finish()
	}
}

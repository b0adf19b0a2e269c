use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{RawMutex, RawThreadId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type RawSection = RawReentrantMutex<RawMutex, RawThreadId>;

/// The exclusive section a loader's definition step runs in.
///
/// Reentrant for the owning thread and attemptable with a timeout. Unlike a guard based lock it
/// is released by an explicit call, because ownership is taken when a task is scheduled and given
/// back when that task completes.
pub struct LoadSection {
	raw: RawSection,
	/// Only written by the owning thread.
	holds: AtomicUsize,
}

impl LoadSection {
	pub const fn new() -> LoadSection {
		LoadSection {
			raw: RawSection::INIT,
			holds: AtomicUsize::new(0),
		}
	}

	/// Tries to take the section, waiting at most `timeout`. Nested acquisitions by the owner
	/// always succeed and increase the hold count.
	pub fn try_acquire(&self, timeout: Duration) -> bool {
		let acquired = if timeout.is_zero() {
			self.raw.try_lock()
		} else {
			self.raw.try_lock_for(timeout)
		};

		if acquired {
			self.holds.fetch_add(1, Ordering::Relaxed);
		}
		acquired
	}

	/// Drops one hold. The section becomes free once the hold count reaches zero.
	///
	/// # Panics
	/// If the current thread does not hold the section.
	pub fn release(&self) {
		if !self.raw.is_owned_by_current_thread() {
			panic!("Released a load section the current thread does not hold");
		}

		self.holds.fetch_sub(1, Ordering::Relaxed);
		// SAFETY: ownership was checked above.
		unsafe { self.raw.unlock() }
	}

	/// Holds of the current thread, zero when another thread (or nobody) owns the section.
	pub fn hold_count(&self) -> usize {
		if self.raw.is_owned_by_current_thread() {
			self.holds.load(Ordering::Relaxed)
		} else {
			0
		}
	}

	pub fn is_held_by_current_thread(&self) -> bool {
		self.raw.is_owned_by_current_thread()
	}

	pub fn is_locked(&self) -> bool {
		self.raw.is_locked()
	}
}

impl Default for LoadSection {
	fn default() -> Self {
		LoadSection::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread::spawn;

	#[test]
	fn reentrant() {
		let section = LoadSection::new();
		assert!(section.try_acquire(Duration::ZERO));
		assert!(section.try_acquire(Duration::ZERO));
		assert_eq!(section.hold_count(), 2);

		section.release();
		assert_eq!(section.hold_count(), 1);
		assert!(section.is_held_by_current_thread());

		section.release();
		assert_eq!(section.hold_count(), 0);
		assert!(!section.is_locked());
	}

	#[test]
	fn exclusive_between_threads() {
		let section = Arc::new(LoadSection::new());
		assert!(section.try_acquire(Duration::ZERO));

		let other = section.clone();
		let acquired = spawn(move || {
			let acquired = other.try_acquire(Duration::from_millis(20));
			assert_eq!(other.hold_count(), 0);
			acquired
		})
		.join()
		.unwrap();
		assert!(!acquired);

		section.release();
		let other = section.clone();
		let acquired = spawn(move || {
			let acquired = other.try_acquire(Duration::from_millis(20));
			other.release();
			acquired
		})
		.join()
		.unwrap();
		assert!(acquired);
	}

	#[test]
	#[should_panic(expected = "does not hold")]
	fn release_without_holding() {
		LoadSection::new().release();
	}
}

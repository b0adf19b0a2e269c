use ahash::HashMap;
use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::error;
use ucl_core::{ClassName, LoadResult, RepositoryConfig};
use ucl_repository::{Class, ClassDefiner, ClassResolver, Loader, Repository};
use ucl_source::MemoryClassSource;

#[cfg(test)]
mod tests;

/// What happened to one class name in a [`ScriptedDefiner`].
#[derive(Copy, Clone, Debug, Default)]
pub struct LinkStats {
	/// Times the definer was asked to link the class.
	pub links: usize,
	active: usize,
	/// Times a link started while another one of the same class was still running.
	pub overlaps: usize,
}

/// A definer that links classes against a fixed dependency graph, with hooks that make threads
/// meet at chosen points of a definition.
///
/// Hooks run before the dependencies are resolved. Gates only apply to the first link of a class.
#[derive(Default)]
pub struct ScriptedDefiner {
	links: HashMap<String, Vec<String>>,
	gates: HashMap<String, Arc<Barrier>>,
	delays: HashMap<String, Duration>,
	signals: HashMap<String, Sender<()>>,
	holds: HashMap<String, Receiver<()>>,
	stats: Mutex<HashMap<String, LinkStats>>,
}

impl ScriptedDefiner {
	pub fn links(mut self, name: &str, dependencies: &[&str]) -> Self {
		self.links.insert(
			name.to_string(),
			dependencies.iter().map(|v| v.to_string()).collect(),
		);
		self
	}

	/// Waits on `barrier` the first time `name` is linked.
	pub fn gate(mut self, name: &str, barrier: Arc<Barrier>) -> Self {
		self.gates.insert(name.to_string(), barrier);
		self
	}

	pub fn delay(mut self, name: &str, delay: Duration) -> Self {
		self.delays.insert(name.to_string(), delay);
		self
	}

	/// Sends on `sender` every time linking `name` starts.
	pub fn signal(mut self, name: &str, sender: Sender<()>) -> Self {
		self.signals.insert(name.to_string(), sender);
		self
	}

	/// Blocks linking `name` until `receiver` yields a message or disconnects.
	pub fn hold(mut self, name: &str, receiver: Receiver<()>) -> Self {
		self.holds.insert(name.to_string(), receiver);
		self
	}

	pub fn stats(&self, name: &str) -> LinkStats {
		self.stats.lock().get(name).copied().unwrap_or_default()
	}

	/// Every class whose links overlapped with another link of itself.
	pub fn overlapping(&self) -> Vec<String> {
		self.stats
			.lock()
			.iter()
			.filter(|(_, stats)| stats.overlaps > 0)
			.map(|(name, _)| name.clone())
			.collect()
	}

	fn run_hooks(&self, name: &str, first: bool) {
		if let Some(sender) = self.signals.get(name) {
			let _ = sender.send(());
		}
		if first {
			if let Some(barrier) = self.gates.get(name) {
				barrier.wait();
			}
		}
		if let Some(delay) = self.delays.get(name) {
			std::thread::sleep(*delay);
		}
		if let Some(receiver) = self.holds.get(name) {
			let _ = receiver.recv();
		}
	}
}

impl ClassDefiner for ScriptedDefiner {
	fn link(
		&self,
		name: &ClassName,
		_data: &[u8],
		resolver: &mut ClassResolver,
	) -> LoadResult<Vec<Arc<Class>>> {
		let key = name.as_str();
		let first = {
			let mut stats = self.stats.lock();
			let entry = stats.entry(key.to_string()).or_default();
			entry.links += 1;
			entry.active += 1;
			if entry.active > 1 {
				entry.overlaps += 1;
			}
			entry.links == 1
		};

		self.run_hooks(key, first);
		let result: LoadResult<Vec<Arc<Class>>> = self
			.links
			.get(key)
			.map(|dependencies| {
				dependencies
					.iter()
					.map(|dependency| resolver(&ClassName::new(dependency)))
					.collect()
			})
			.unwrap_or_else(|| Ok(vec![]));

		if let Some(stats) = self.stats.lock().get_mut(key) {
			stats.active -= 1;
		}
		result
	}
}

pub fn config(timeout: Duration) -> RepositoryConfig {
	RepositoryConfig {
		load_timeout: timeout,
		owner_wait: Duration::from_millis(50),
		..RepositoryConfig::default()
	}
}

pub fn launch(
	config: RepositoryConfig,
	definer: ScriptedDefiner,
) -> (Arc<Repository>, Arc<ScriptedDefiner>) {
	ucl_core::init();
	let definer = Arc::new(definer);
	let repository = Repository::new(config);
	repository.set_default_definer(definer.clone());
	(repository, definer)
}

/// Registers an in-memory loader whose classes' bytes are their names.
pub fn add_loader(repository: &Repository, url: &str, classes: &[&str]) -> Arc<Loader> {
	let mut source = MemoryClassSource::new(url).unwrap();
	for class in classes {
		source = source.with_class(class, *class);
	}
	repository.add_loader(source).unwrap()
}

pub fn name(name: &str) -> ClassName {
	ClassName::new(name)
}

/// Aborts the process if any threads end up deadlocked on parking_lot locks, which would
/// otherwise hang the test run.
pub struct Watchdog {
	stop: Arc<AtomicBool>,
	handle: Option<JoinHandle<()>>,
}

impl Watchdog {
	pub fn start() -> Watchdog {
		let stop = Arc::new(AtomicBool::new(false));
		let flag = stop.clone();
		let handle = std::thread::spawn(move || {
			while !flag.load(Ordering::Relaxed) {
				std::thread::sleep(Duration::from_millis(200));
				let deadlocks = parking_lot::deadlock::check_deadlock();
				if deadlocks.is_empty() {
					continue;
				}

				error!("{} deadlocks detected", deadlocks.len());
				for (i, threads) in deadlocks.iter().enumerate() {
					eprintln!("Deadlock #{i}");
					for thread in threads {
						eprintln!("Thread {:?}\n{:?}", thread.thread_id(), thread.backtrace());
					}
				}
				std::process::abort();
			}
		});

		Watchdog {
			stop,
			handle: Some(handle),
		}
	}
}

impl Drop for Watchdog {
	fn drop(&mut self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}

//! Cooperative scheduling of class definitions across loaders.
//!
//! A loader's definition step only ever runs on the thread owning the loader's load section. A
//! thread that needs a class from a loader owned by someone else does not block on the section:
//! it places a [`Subtask`] in the owner's inbox and, while waiting for its own request, executes
//! whatever other threads placed in its inbox. A cycle of threads waiting on each other's loaders
//! therefore keeps making progress.
//!
//! Lock classes, in acquisition order:
//! - the ownership registry (`owners`) or a request lock, never both at once
//! - the inbox map
//! - a single inbox
//!
//! Load sections are only ever try-acquired without waiting while the registry lock is held.
//!
//! A thread waiting for a dependency in the middle of a definition may run another thread's task
//! that turns out to need the class still being defined further down the stack. Such a task is
//! put back in the inbox until that definition returns, instead of being reported as circular.
//! The same holds when the task only needs that class through other threads: a task refused by
//! this thread whose requester waits, through other threads' tasks and frames, on foreign work
//! stacked above the definition makes that foreign work unwind and wait.

use crate::{Candidate, Class, LoadRequest, Loader, LoaderId, Repository, RequestState, Subtask};
use ahash::{HashMap, HashMapExt};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use ucl_core::{CandidatePolicy, ClassName, LoadError, LoadResult, RepositoryConfig};

/// Work queue of one thread that is inside a load call.
pub struct Inbox {
	state: Mutex<InboxState>,
	signal: Condvar,
}

struct InboxState {
	tasks: VecDeque<Subtask>,
	/// Nesting of load calls on the thread.
	depth: usize,
	interrupted: bool,
	/// Definitions in progress on the thread, innermost last.
	frames: Vec<Frame>,
	/// Lowest frame a foreign task above it is waiting for.
	entangled: Option<usize>,
}

struct Frame {
	loader: Arc<Loader>,
	name: ClassName,
	/// Set when the frame runs a task of another thread's request: the waiting request's thread
	/// and frame depth.
	origin: Option<Waiter>,
}

impl Frame {
	fn is_foreign(&self) -> bool {
		self.origin.is_some()
	}
}

/// A thread and the number of its innermost definitions that cannot return until something they
/// wait for is done.
type Waiter = (ThreadId, usize);

enum Defined {
	Done(LoadResult<Arc<Class>>),
	/// A foreign task has to wait for this loader to finish defining this class.
	Deferred(Arc<Loader>, ClassName),
}

#[derive(Default)]
struct Counters {
	scheduled: AtomicU64,
	executed: AtomicU64,
	reassigned: AtomicU64,
	seized: AtomicU64,
	interrupted: AtomicU64,
}

/// Snapshot of what a scheduler has done so far.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
	/// Subtasks placed in an owner's inbox.
	pub scheduled: u64,
	pub executed: u64,
	/// Subtasks handed back to their requesting thread.
	pub reassigned: u64,
	/// Free loaders whose section a scheduling thread took.
	pub seized: u64,
	/// Requests failed by an interruption or a timeout.
	pub interrupted: u64,
}

enum Seize {
	/// The current thread holds the section and has to release it.
	Seized,
	Owned(ThreadId),
	/// Locked by a thread that never registered itself.
	Unregistered,
}

#[derive(Copy, Clone)]
struct Owner {
	thread: ThreadId,
	/// Holds the thread already had on the section before it registered. Non-zero only when a
	/// section taken outside the scheduler is entered again through it.
	base: usize,
}

pub struct TaskScheduler {
	load_timeout: Duration,
	owner_wait: Duration,
	owners: Mutex<HashMap<LoaderId, Owner>>,
	owner_changed: Condvar,
	inboxes: Mutex<HashMap<ThreadId, Arc<Inbox>>>,
	next_loader: AtomicU32,
	next_request: AtomicU64,
	counters: Counters,
}

impl TaskScheduler {
	pub fn new(config: &RepositoryConfig) -> TaskScheduler {
		TaskScheduler {
			load_timeout: config.load_timeout,
			owner_wait: config.owner_wait,
			owners: Mutex::new(HashMap::new()),
			owner_changed: Condvar::new(),
			inboxes: Mutex::new(HashMap::new()),
			next_loader: AtomicU32::new(0),
			next_request: AtomicU64::new(0),
			counters: Counters::default(),
		}
	}

	pub fn load_timeout(&self) -> Duration {
		self.load_timeout
	}

	pub(crate) fn next_loader_id(&self) -> LoaderId {
		LoaderId(self.next_loader.fetch_add(1, Ordering::Relaxed))
	}

	/// Loads `name` as seen by `requesting`, driving the current thread until the request finishes.
	pub fn load(
		&self,
		repository: &Repository,
		name: &ClassName,
		requesting: &Arc<Loader>,
	) -> LoadResult<Arc<Class>> {
		let inbox = self.enter();
		let result = self.load_entered(&inbox, repository, name, requesting);
		self.end_load(&inbox);
		result
	}

	fn load_entered(
		&self,
		inbox: &Inbox,
		repository: &Repository,
		name: &ClassName,
		requesting: &Arc<Loader>,
	) -> LoadResult<Arc<Class>> {
		let deadline = Instant::now() + self.load_timeout;
		let depth = inbox.state.lock().frames.len();
		let request = Arc::new(
			LoadRequest::new(
				self.next_request.fetch_add(1, Ordering::Relaxed),
				name.clone(),
				requesting.clone(),
				thread::current().id(),
			)
			.issued_at(depth),
		);

		if let Some(class) = self.begin_load(&request, repository, deadline)? {
			return Ok(class);
		}

		while !self.pump_one_task(inbox, &request, deadline) {}
		request.result()
	}

	/// Starts `request`. Returns the class when it was found without scheduling anything, `None`
	/// when the caller has to pump tasks until the request finishes.
	pub fn begin_load(
		&self,
		request: &Arc<LoadRequest>,
		repository: &Repository,
		deadline: Instant,
	) -> LoadResult<Option<Arc<Class>>> {
		let name = request.name();
		if let Some(class) = repository.lookup_cached(name) {
			request.found_immediately(class.clone());
			return Ok(Some(class));
		}

		let mut candidates = repository.candidate_loaders_for(name);
		if candidates.is_empty() {
			match self.try_define_directly(request) {
				Some(Ok(class)) => {
					request.found_immediately(class.clone());
					return Ok(Some(class));
				}
				Some(Err(error)) => {
					request.finalize(error.clone());
					return Err(error);
				}
				None => {}
			}

			// Someone else owns the requesting loader, so it gets the work.
			candidates.push(Candidate {
				order: 0,
				loader: request.requesting().clone(),
			});
		}

		if repository.config().candidates == CandidatePolicy::First {
			candidates.truncate(1);
		}

		debug!(
			"Loading {name} from {}",
			candidates
				.iter()
				.map(|v| v.loader.to_string())
				.collect::<Vec<_>>()
				.join(", ")
		);
		let task = request.start(candidates);
		if let Err(error) = self.schedule_subtask(task, deadline) {
			request.finalize(error.clone());
			return Err(error);
		}

		Ok(None)
	}

	/// Defines the class on the requesting loader on the current thread if that loader is free or
	/// already owned by this thread. `None` if another thread owns it.
	fn try_define_directly(&self, request: &LoadRequest) -> Option<LoadResult<Arc<Class>>> {
		let loader = request.requesting();
		let current = thread::current().id();
		match self.seize(loader) {
			Seize::Seized => {}
			Seize::Owned(owner) if owner == current => {
				// Reentrant, cannot fail.
				loader.section().try_acquire(Duration::ZERO);
			}
			Seize::Owned(_) | Seize::Unregistered => return None,
		}

		let name = request.name();
		let result = match self.inbox_of(current) {
			Some(inbox) => match self.define_framed(&inbox, loader, name, None) {
				Defined::Done(result) => result,
				Defined::Deferred(..) => Err(LoadError::interrupted(name)),
			},
			None => Self::define(loader, name),
		};
		self.release_ownership(loader);
		Some(result)
	}

	/// Registers the current thread as owner of a free loader.
	fn seize(&self, loader: &Loader) -> Seize {
		let mut owners = self.owners.lock();
		if let Some(owner) = owners.get(&loader.id()) {
			return Seize::Owned(owner.thread);
		}

		if !self.register(&mut owners, loader) {
			return Seize::Unregistered;
		}
		Seize::Seized
	}

	fn register(&self, owners: &mut HashMap<LoaderId, Owner>, loader: &Loader) -> bool {
		let base = loader.section().hold_count();
		if !loader.section().try_acquire(Duration::ZERO) {
			return false;
		}

		let owner = Owner {
			thread: thread::current().id(),
			base,
		};
		owners.insert(loader.id(), owner);
		self.counters.seized.fetch_add(1, Ordering::Relaxed);
		true
	}

	/// Places `task` in the inbox of the thread owning its loader, taking ownership of the loader
	/// when nobody has it. Runs on the requesting thread.
	pub fn schedule_subtask(&self, mut task: Subtask, deadline: Instant) -> LoadResult<()> {
		let current = thread::current().id();
		debug_assert_eq!(task.request.thread(), current);
		if task.request.is_finished() {
			return Ok(());
		}

		let own_inbox = self.inbox_of(current);
		let mut owners = self.owners.lock();
		loop {
			let loader = &task.loader;
			if let Some(Owner { thread: owner, .. }) = owners.get(&loader.id()).copied() {
				let Some(inbox) = self.inbox_of(owner) else {
					panic!("{loader} is owned by {owner:?} which is not loading");
				};

				trace!(target: "scheduler", "Scheduling {task:?} on owner {owner:?}");
				task.thread = Some(owner);
				task.release_on_complete = false;
				inbox.push(task);
				self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
				return Ok(());
			}

			if self.register(&mut owners, loader) {
				drop(owners);

				trace!(target: "scheduler", "Seized {loader} for {task:?}");
				task.thread = Some(current);
				task.release_on_complete = true;
				match &own_inbox {
					Some(inbox) => inbox.push(task),
					None => panic!("Scheduling outside of a load call"),
				}
				self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
				return Ok(());
			}

			// The section is taken by a thread that has not registered itself yet.
			let interrupted = own_inbox
				.as_ref()
				.map(|inbox| inbox.take_interrupt())
				.unwrap_or(false);
			let now = Instant::now();
			if interrupted || now >= deadline {
				debug!(
					"Gave up waiting for an owner of {loader} for {}",
					task.request.name()
				);
				self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
				return Err(LoadError::interrupted(task.request.name()));
			}

			let slice = self.owner_wait.min(deadline - now);
			self.owner_changed.wait_for(&mut owners, slice);
		}
	}

	/// Runs the next task of the current thread's inbox, waiting for one if there is none.
	/// Returns `true` once `request` is finished.
	///
	/// An interruption or reaching `deadline` finalizes `request` as not found.
	pub fn pump_one_task(&self, inbox: &Inbox, request: &LoadRequest, deadline: Instant) -> bool {
		let current = thread::current().id();
		let task = {
			let mut state = inbox.state.lock();
			loop {
				if request.is_finished() {
					return true;
				}

				if state.interrupted {
					state.interrupted = false;
					drop(state);
					debug!("Load of {} was interrupted", request.name());
					return self.interrupt_request(request);
				}

				if state.is_unwinding() {
					drop(state);
					debug!("Abandoning {} to unwind a foreign task", request.name());
					request.finalize(LoadError::interrupted(request.name()));
					return true;
				}

				if let Some(index) = state.tasks.iter().position(Self::is_runnable) {
					if let Some(task) = state.tasks.remove(index) {
						break task;
					}
				}

				let suspects = state.suspects(current);
				let watching = !suspects.is_empty();
				if watching {
					let entangled = MutexGuard::unlocked(&mut state, || {
						suspects
							.into_iter()
							.filter(|(outer, waiter)| self.keeps_waiting(*waiter, current, *outer))
							.map(|(outer, _)| outer)
							.min()
					});
					if let Some(outer) = entangled {
						debug!(
							"{} on {} is waited for by foreign work stacked above it",
							state.frames[outer].name, state.frames[outer].loader
						);
						state.entangle(outer);
						continue;
					}
				}

				let now = Instant::now();
				if now >= deadline {
					drop(state);
					warn!("Load of {} timed out", request.name());
					return self.interrupt_request(request);
				}

				request.set_state(RequestState::WaitingOnEvent);
				if watching {
					// Other threads do not signal us when they start waiting, so look again later.
					inbox.signal.wait_for(&mut state, self.owner_wait.min(deadline - now));
				} else {
					inbox.signal.wait_until(&mut state, deadline);
				}
			}
		};

		request.set_state(RequestState::AwaitingSubtasks);
		self.run(inbox, task, deadline);
		request.is_finished()
	}

	fn interrupt_request(&self, request: &LoadRequest) -> bool {
		self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
		request.finalize(LoadError::interrupted(request.name()));
		true
	}

	/// A task asking for a class its loader is in the middle of defining on this thread for some
	/// other thread's request has to wait until that definition returns.
	fn is_runnable(task: &Subtask) -> bool {
		if let Some((loader, name)) = &task.waiting_on {
			if loader.is_defining(name) {
				return false;
			}
		}

		let loader = &task.loader;
		task.request.thread() == thread::current().id()
			|| !loader.section().is_held_by_current_thread()
			|| !loader.is_defining(task.request.name())
	}

	fn run(&self, inbox: &Inbox, task: Subtask, deadline: Instant) {
		if task.request.is_finished() {
			trace!(target: "scheduler", "Discarding {task:?} of a finished request");
			if task.release_on_complete {
				self.release_ownership(&task.loader);
			}
			return;
		}

		if task.thread.is_none() {
			let request = task.request.clone();
			if let Err(error) = self.schedule_subtask(task, deadline) {
				request.finalize(error);
			}
			return;
		}

		if !task.loader.section().is_held_by_current_thread() {
			// Ownership moved on since the task was placed here.
			self.hand_back(task);
			return;
		}

		self.execute(inbox, task);
	}

	fn execute(&self, inbox: &Inbox, mut task: Subtask) {
		let request = &task.request;
		let origin = (request.thread() != thread::current().id())
			.then(|| (request.thread(), request.frame_depth()));
		trace!(target: "scheduler", "Executing {task:?}");

		let outcome = match self.define_framed(inbox, &task.loader, request.name(), origin) {
			Defined::Done(outcome) => outcome,
			Defined::Deferred(loader, name) => {
				trace!(target: "scheduler", "Deferring {task:?} until {loader} has defined {name}");
				task.waiting_on = Some((loader, name));
				inbox.push(task);
				return;
			}
		};

		let Subtask {
			request,
			loader,
			order,
			release_on_complete,
			..
		} = task;
		if release_on_complete {
			self.release_ownership(&loader);
		}
		self.counters.executed.fetch_add(1, Ordering::Relaxed);

		let completion = request.complete(order, &loader, outcome);
		if let Some(next) = completion.next {
			self.hand_back(next);
		}
		if completion.finished {
			self.wake(request.thread());
		}
	}

	/// Runs the definition of `name` on `loader` in a new frame of the current thread.
	///
	/// A definition that needs a class some frame below is defining, with a foreign task in between,
	/// fails as interrupted and marks that frame. The foreign task then fails in turn and is deferred
	/// rather than completed.
	fn define_framed(
		&self,
		inbox: &Inbox,
		loader: &Arc<Loader>,
		name: &ClassName,
		origin: Option<Waiter>,
	) -> Defined {
		let foreign = origin.is_some();
		{
			let mut state = inbox.state.lock();
			if let Some(outer) = Self::entangled_frame(&state.frames, loader, name) {
				debug!("{name} on {loader} is still being defined below a foreign task");
				state.entangle(outer);
				return Defined::Done(Err(LoadError::interrupted(name)));
			}

			state.frames.push(Frame {
				loader: loader.clone(),
				name: name.clone(),
				origin,
			});
		}

		let result = Self::define(loader, name);

		let mut state = inbox.state.lock();
		let index = state.frames.len() - 1;
		state.frames.pop();
		let entangled = state.entangled;
		match entangled {
			Some(outer) if index > outer => {
				if !foreign {
					return Defined::Done(result);
				}

				if !state.frames[outer + 1..].iter().any(Frame::is_foreign) {
					state.entangled = None;
				}

				match result {
					Err(_) => {
						let frame = &state.frames[outer];
						Defined::Deferred(frame.loader.clone(), frame.name.clone())
					}
					Ok(class) => Defined::Done(Ok(class)),
				}
			}
			Some(_) => {
				state.entangled = None;
				Defined::Done(result)
			}
			None => Defined::Done(result),
		}
	}

	/// The frame already defining `name` on `loader` with a foreign frame above it.
	fn entangled_frame(frames: &[Frame], loader: &Loader, name: &ClassName) -> Option<usize> {
		let outer = frames
			.iter()
			.rposition(|frame| frame.loader.id() == loader.id() && frame.name == *name)?;
		frames[outer + 1..]
			.iter()
			.any(Frame::is_foreign)
			.then_some(outer)
	}

	/// Whether `waiter`, through the tasks and foreign frames that wait on each other across
	/// threads, waits for a frame of `current` above `outer`.
	fn keeps_waiting(&self, waiter: Waiter, current: ThreadId, outer: usize) -> bool {
		let mut explored = HashMap::<ThreadId, usize>::new();
		let mut known = HashMap::<ThreadId, Vec<(usize, Waiter)>>::new();
		let mut pending = vec![waiter];
		while let Some((thread, depth)) = pending.pop() {
			if thread == current && depth > outer + 1 {
				return true;
			}
			if explored.get(&thread).is_some_and(|seen| *seen >= depth) {
				continue;
			}
			explored.insert(thread, depth);

			let waits = known.entry(thread).or_insert_with(|| {
				self.inbox_of(thread)
					.map(|inbox| inbox.waits(thread))
					.unwrap_or_default()
			});
			pending.extend(
				waits
					.iter()
					.filter(|(frame, _)| *frame < depth)
					.map(|(_, waiter)| *waiter),
			);
		}
		false
	}

	/// Runs the definition step of `loader` and caches the result in the loader's repository.
	fn define(loader: &Arc<Loader>, name: &ClassName) -> LoadResult<Arc<Class>> {
		let defined = catch_unwind(AssertUnwindSafe(|| {
			loader.define_locally(name, &mut |dependency| loader.load_class(dependency))
		}));

		let class = match defined {
			Ok(result) => result?,
			Err(panic) => {
				let reason = panic
					.downcast_ref::<&str>()
					.map(|v| v.to_string())
					.or_else(|| panic.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "unknown panic".to_string());
				warn!("Definer of {loader} panicked on {name}: {reason}");
				return Err(LoadError::structural(name, format!("definer panicked: {reason}")));
			}
		};

		Ok(match loader.repository() {
			Some(repository) => repository.cache_resolved_class(name, class, loader),
			None => class,
		})
	}

	/// Gives `task` back to the thread of its request, unless the request is already finished.
	fn hand_back(&self, mut task: Subtask) {
		let request = task.request.clone();
		task.thread = None;
		task.release_on_complete = false;
		task.waiting_on = None;

		let handed = request.while_unfinished(|| {
			let Some(inbox) = self.inbox_of(request.thread()) else {
				warn!("Dropping {task:?}: its thread left without finishing the request");
				return;
			};

			trace!(target: "scheduler", "Handing {task:?} back to {:?}", request.thread());
			inbox.push(task);
			self.counters.reassigned.fetch_add(1, Ordering::Relaxed);
		});

		if handed.is_none() {
			trace!(target: "scheduler", "Dropping a subtask of finished request {}", request.id());
		}
	}

	fn wake(&self, thread: ThreadId) {
		if let Some(inbox) = self.inbox_of(thread) {
			inbox.notify();
		}
	}

	/// Drops one hold of the current thread on `loader`, unregistering the thread once it is back
	/// to the holds it had before registering.
	fn release_ownership(&self, loader: &Loader) {
		let mut owners = self.owners.lock();
		loader.section().release();

		let current = thread::current().id();
		let Some(owner) = owners.get(&loader.id()).copied() else {
			return;
		};
		if owner.thread == current && loader.section().hold_count() <= owner.base {
			owners.remove(&loader.id());
			self.owner_changed.notify_all();
		}
	}

	fn enter(&self) -> Arc<Inbox> {
		let inbox = self
			.inboxes
			.lock()
			.entry(thread::current().id())
			.or_insert_with(|| Arc::new(Inbox::new()))
			.clone();
		inbox.state.lock().depth += 1;
		inbox
	}

	/// Leaves a load call. When the outermost call of the thread ends, sections still held for
	/// unexecuted tasks are released and every leftover task goes back to its requesting thread.
	pub fn end_load(&self, inbox: &Inbox) {
		let mut leftovers = {
			let mut state = inbox.state.lock();
			state.depth -= 1;
			if state.depth > 0 {
				return;
			}

			state.interrupted = false;
			std::mem::take(&mut state.tasks)
		};

		for task in leftovers.iter_mut().filter(|v| v.release_on_complete) {
			self.release_ownership(&task.loader);
			task.release_on_complete = false;
		}

		let current = thread::current().id();
		{
			// Nobody can address this inbox once the registry no longer names this thread.
			let owners = self.owners.lock();
			debug_assert!(owners.values().all(|owner| owner.thread != current));

			let mut inboxes = self.inboxes.lock();
			inboxes.remove(&current);
			leftovers.extend(inbox.state.lock().tasks.drain(..));
		}

		for task in leftovers {
			if task.request.thread() == current {
				continue;
			}

			self.hand_back(task);
		}
	}

	/// Interrupts the load calls of `thread`: its current wait, or the next one, fails the
	/// request it waits for. Returns `false` if the thread is not loading.
	pub fn interrupt(&self, thread: ThreadId) -> bool {
		let Some(inbox) = self.inbox_of(thread) else {
			return false;
		};

		{
			let mut state = inbox.state.lock();
			state.interrupted = true;
			inbox.signal.notify_all();
		}

		let _owners = self.owners.lock();
		self.owner_changed.notify_all();
		true
	}

	/// The thread recorded as owning `loader`'s load section.
	pub fn owner_of(&self, loader: LoaderId) -> Option<ThreadId> {
		self.owners.lock().get(&loader).map(|owner| owner.thread)
	}

	/// Whether `thread` is inside a load call.
	pub fn is_loading(&self, thread: ThreadId) -> bool {
		self.inboxes.lock().contains_key(&thread)
	}

	pub fn stats(&self) -> SchedulerStats {
		let counters = &self.counters;
		SchedulerStats {
			scheduled: counters.scheduled.load(Ordering::Relaxed),
			executed: counters.executed.load(Ordering::Relaxed),
			reassigned: counters.reassigned.load(Ordering::Relaxed),
			seized: counters.seized.load(Ordering::Relaxed),
			interrupted: counters.interrupted.load(Ordering::Relaxed),
		}
	}

	fn inbox_of(&self, thread: ThreadId) -> Option<Arc<Inbox>> {
		self.inboxes.lock().get(&thread).cloned()
	}
}

impl InboxState {
	fn entangle(&mut self, outer: usize) {
		self.entangled = Some(self.entangled.map_or(outer, |v| v.min(outer)));
	}

	/// A foreign frame sits above the entangled one, and the innermost load call belongs to it.
	fn is_unwinding(&self) -> bool {
		let Some(outer) = self.entangled else {
			return false;
		};
		self.frames
			.get(outer + 1..)
			.is_some_and(|above| above.iter().any(Frame::is_foreign))
	}

	/// Queued tasks waiting for a frame of `thread` that has foreign frames above it, with that
	/// frame.
	fn suspects(&self, thread: ThreadId) -> Vec<(usize, Waiter)> {
		self.tasks
			.iter()
			.filter_map(|task| {
				let outer = blocking_frame(&self.frames, thread, task)?;
				self.frames[outer + 1..]
					.iter()
					.any(Frame::is_foreign)
					.then(|| (outer, (task.request.thread(), task.request.frame_depth())))
			})
			.collect()
	}
}

/// The frame of `thread` that `task`, queued in the inbox of `thread`, cannot run before.
fn blocking_frame(frames: &[Frame], thread: ThreadId, task: &Subtask) -> Option<usize> {
	if task.request.is_finished() {
		return None;
	}

	let (loader, name) = match &task.waiting_on {
		Some((loader, name)) => (loader.id(), name),
		None if task.request.thread() != thread => (task.loader.id(), task.request.name()),
		None => return None,
	};
	frames
		.iter()
		.rposition(|frame| frame.loader.id() == loader && frame.name == *name)
}

impl Inbox {
	fn new() -> Inbox {
		Inbox {
			state: Mutex::new(InboxState {
				tasks: VecDeque::new(),
				depth: 0,
				interrupted: false,
				frames: Vec::new(),
				entangled: None,
			}),
			signal: Condvar::new(),
		}
	}

	fn push(&self, task: Subtask) {
		self.state.lock().tasks.push_back(task);
		self.signal.notify_all();
	}

	fn notify(&self) {
		let _state = self.state.lock();
		self.signal.notify_all();
	}

	fn take_interrupt(&self) -> bool {
		std::mem::replace(&mut self.state.lock().interrupted, false)
	}

	/// Who waits on which frame of `thread`, the thread owning this inbox: the requests of its
	/// foreign frames and of the tasks it holds back.
	fn waits(&self, thread: ThreadId) -> Vec<(usize, Waiter)> {
		let state = self.state.lock();
		let frames = state
			.frames
			.iter()
			.enumerate()
			.filter_map(|(index, frame)| Some((index, frame.origin?)));
		let tasks = state.tasks.iter().filter_map(|task| {
			let frame = blocking_frame(&state.frames, thread, task)?;
			Some((frame, (task.request.thread(), task.request.frame_depth())))
		});
		let waits = frames.chain(tasks).collect();
		waits
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tests::LinkDefiner;
	use ucl_source::MemoryClassSource;

	fn repository(config: RepositoryConfig) -> Arc<Repository> {
		let repository = Repository::new(config);
		repository.set_default_definer(Arc::new(
			LinkDefiner::default()
				.links("com.acme.a.Foo", &["com.acme.a.Qux", "com.acme.b.Bar"])
				.links("com.acme.b.Bar", &["com.acme.a.Qux"]),
		));
		repository
	}

	fn add(repository: &Repository, url: &str, classes: &[&str]) -> Arc<Loader> {
		let mut source = MemoryClassSource::new(url).unwrap();
		for class in classes {
			source = source.with_class(class, *class);
		}
		repository.add_loader(source).unwrap()
	}

	#[test]
	fn nested_loads_reenter_the_owned_loader() {
		let repository = repository(RepositoryConfig::default());
		let a = add(&repository, "memory:a", &["com.acme.a.Foo", "com.acme.a.Qux"]);
		add(&repository, "memory:b", &["com.acme.b.Bar"]);

		let foo = a.load_class(&ClassName::new("com.acme.a.Foo")).unwrap();
		assert_eq!(foo.loader(), a.id());
		assert_eq!(foo.links().len(), 2);

		let scheduler = repository.scheduler();
		let current = thread::current().id();
		assert!(!scheduler.is_loading(current));
		assert_eq!(scheduler.owner_of(a.id()), None);
		assert!(!a.section().is_locked());

		let stats = scheduler.stats();
		assert_eq!(stats.executed, 3);
		assert_eq!(stats.reassigned, 0);
		assert_eq!(stats.interrupted, 0);
	}

	#[test]
	fn unknown_packages_ask_the_requesting_loader() {
		let repository = repository(RepositoryConfig::default());
		let a = add(&repository, "memory:a", &["com.acme.a.Foo"]);

		let late = ClassName::new("org.late.Late");
		assert!(repository.candidate_loaders_for(&late).is_empty());
		assert!(a.load_class(&late).unwrap_err().is_not_found());
		assert_eq!(repository.scheduler().stats().scheduled, 0);
	}

	#[test]
	fn failover_tries_the_next_candidate() {
		let repository = repository(RepositoryConfig::default());
		let a = add(&repository, "memory:a1", &["com.acme.a.Qux"]);
		let second = add(&repository, "memory:a2", &["com.acme.a.Only"]);

		let only = a.load_class(&ClassName::new("com.acme.a.Only")).unwrap();
		assert_eq!(only.loader(), second.id());
		assert!(a.is_blacklisted(&ClassName::new("com.acme.a.Only")));
	}

	#[test]
	fn first_policy_tries_one_candidate() {
		let config = RepositoryConfig {
			candidates: CandidatePolicy::First,
			..RepositoryConfig::default()
		};
		let repository = repository(config);
		let a = add(&repository, "memory:a1", &["com.acme.a.Qux"]);
		add(&repository, "memory:a2", &["com.acme.a.Only"]);

		let error = a.load_class(&ClassName::new("com.acme.a.Only")).unwrap_err();
		assert!(error.is_not_found());
		assert!(!error.is_interrupted());
	}

	#[test]
	fn interrupt_without_load() {
		let repository = repository(RepositoryConfig::default());
		assert!(!repository.scheduler().interrupt(thread::current().id()));
	}
}

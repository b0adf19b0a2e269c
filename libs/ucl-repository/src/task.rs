use crate::{Candidate, Class, Loader, LoaderId};
use ahash::{HashSet, HashSetExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::warn;
use ucl_core::{ClassName, LoadError, LoadResult};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
	Created = 0,
	/// Answered by a cache or by the requesting loader without scheduling anything.
	FoundImmediately = 1,
	AwaitingSubtasks = 2,
	/// The requesting thread is blocked on its inbox.
	WaitingOnEvent = 3,
	Finished = 4,
}

impl RequestState {
	fn from_u8(value: u8) -> RequestState {
		match value {
			0 => RequestState::Created,
			1 => RequestState::FoundImmediately,
			2 => RequestState::AwaitingSubtasks,
			3 => RequestState::WaitingOnEvent,
			4 => RequestState::Finished,
			_ => unreachable!("Invalid request state {value}"),
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, RequestState::FoundImmediately | RequestState::Finished)
	}
}

/// One top-level "load this class" call and the subtasks it fans out into.
pub struct LoadRequest {
	id: u64,
	name: ClassName,
	requesting: Arc<Loader>,
	thread: ThreadId,
	frame_depth: usize,
	state: AtomicU8,
	inner: Mutex<RequestInner>,
}

struct RequestInner {
	outstanding: usize,
	/// Winning order and class.
	loaded: Option<(usize, Arc<Class>)>,
	error: Option<LoadError>,
	/// Candidates not tried yet, in order.
	pending: VecDeque<Candidate>,
	/// Loaders with a subtask of this request in flight.
	live: HashSet<LoaderId>,
}

/// What a completed subtask means for its request.
#[derive(Default)]
pub struct Completion {
	/// The request reached [`RequestState::Finished`] with this completion.
	pub finished: bool,
	/// Next candidate to try. Has no assigned thread; the requesting thread schedules it.
	pub next: Option<Subtask>,
}

impl LoadRequest {
	pub fn new(id: u64, name: ClassName, requesting: Arc<Loader>, thread: ThreadId) -> LoadRequest {
		LoadRequest {
			id,
			name,
			requesting,
			thread,
			frame_depth: 0,
			state: AtomicU8::new(RequestState::Created as u8),
			inner: Mutex::new(RequestInner {
				outstanding: 0,
				loaded: None,
				error: None,
				pending: VecDeque::new(),
				live: HashSet::new(),
			}),
		}
	}

	/// Marks the request as made from inside `depth` definitions on its thread, none of which can
	/// return before the request finishes.
	pub fn issued_at(mut self, depth: usize) -> Self {
		self.frame_depth = depth;
		self
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn name(&self) -> &ClassName {
		&self.name
	}

	pub fn requesting(&self) -> &Arc<Loader> {
		&self.requesting
	}

	/// The thread that made the request. Only this thread schedules its subtasks.
	pub fn thread(&self) -> ThreadId {
		self.thread
	}

	pub fn frame_depth(&self) -> usize {
		self.frame_depth
	}

	pub fn state(&self) -> RequestState {
		RequestState::from_u8(self.state.load(Ordering::Acquire))
	}

	/// Moves to `state` unless the request already reached a terminal state.
	pub fn set_state(&self, state: RequestState) {
		let _ = self
			.state
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
				if RequestState::from_u8(current).is_terminal() {
					None
				} else {
					Some(state as u8)
				}
			});
	}

	pub fn is_finished(&self) -> bool {
		self.state().is_terminal()
	}

	pub fn outstanding(&self) -> usize {
		self.inner.lock().outstanding
	}

	pub fn found_immediately(&self, class: Arc<Class>) {
		let mut inner = self.inner.lock();
		inner.loaded = Some((0, class));
		self.set_state(RequestState::FoundImmediately);
	}

	/// Creates the subtask for the first candidate and queues the rest.
	///
	/// # Panics
	/// If `candidates` is empty.
	pub fn start(self: &Arc<Self>, candidates: Vec<Candidate>) -> Subtask {
		let mut inner = self.inner.lock();
		let mut candidates = VecDeque::from(candidates);
		let Some(first) = candidates.pop_front() else {
			panic!("Started request for {} without candidates", self.name);
		};

		inner.pending = candidates;
		let task = self.subtask(&mut inner, first);
		self.set_state(RequestState::AwaitingSubtasks);
		task
	}

	fn subtask(self: &Arc<Self>, inner: &mut RequestInner, candidate: Candidate) -> Subtask {
		assert!(
			inner.live.insert(candidate.loader.id()),
			"Request {} already has a subtask on {}",
			self.id,
			candidate.loader
		);
		inner.outstanding += 1;
		Subtask {
			request: self.clone(),
			loader: candidate.loader,
			thread: None,
			order: candidate.order,
			release_on_complete: false,
			waiting_on: None,
		}
	}

	/// Records the outcome of the subtask of `order` that ran on `loader`.
	///
	/// The lowest order success wins. A plain miss moves on to the next candidate, while structural
	/// failures and interruptions end the request.
	pub fn complete(
		self: &Arc<Self>,
		order: usize,
		loader: &Loader,
		outcome: LoadResult<Arc<Class>>,
	) -> Completion {
		let mut inner = self.inner.lock();
		inner.live.remove(&loader.id());
		if self.is_finished() {
			return Completion::default();
		}

		inner.outstanding -= 1;
		let mut failover = false;
		match outcome {
			Ok(class) => {
				let winner = inner
					.loaded
					.as_ref()
					.map(|(winner, existing)| (*winner, Arc::ptr_eq(existing, &class)));
				match winner {
					Some((winner, false)) => {
						warn!(
							"Duplicate definition of {} by {loader}, the one of order {} wins",
							self.name,
							order.min(winner)
						);
						if order < winner {
							inner.loaded = Some((order, class));
						}
					}
					Some((_, true)) => {}
					None => inner.loaded = Some((order, class)),
				}
			}
			Err(error) if error.is_structural() || error.is_interrupted() => {
				if !matches!(inner.error, Some(LoadError::Structural { .. })) {
					inner.error = Some(error);
				}
			}
			Err(error) => {
				if inner.error.is_none() {
					inner.error = Some(error);
				}
				failover = inner.loaded.is_none();
			}
		}

		let mut completion = Completion::default();
		if failover {
			if let Some(candidate) = inner.pending.pop_front() {
				completion.next = Some(self.subtask(&mut inner, candidate));
			}
		}

		if inner.outstanding == 0 {
			inner.pending.clear();
			self.set_state(RequestState::Finished);
			completion.finished = true;
		}
		completion
	}

	/// Forces the request to finish with `error` unless it already has a result. Subtasks still in
	/// flight run to completion, their outcome is ignored.
	pub fn finalize(&self, error: LoadError) {
		let mut inner = self.inner.lock();
		if self.is_finished() {
			return;
		}

		if inner.loaded.is_none() {
			inner.error = Some(error);
		}
		inner.pending.clear();
		self.set_state(RequestState::Finished);
	}

	/// Runs `func` under the request lock if the request has not finished yet.
	pub(crate) fn while_unfinished<V>(&self, func: impl FnOnce() -> V) -> Option<V> {
		let _inner = self.inner.lock();
		if self.is_finished() {
			None
		} else {
			Some(func())
		}
	}

	pub fn result(&self) -> LoadResult<Arc<Class>> {
		let inner = self.inner.lock();
		if let Some((_, class)) = &inner.loaded {
			return Ok(class.clone());
		}

		match &inner.error {
			Some(error) => Err(error.clone()),
			None => Err(LoadError::not_found(&self.name)),
		}
	}
}

impl Debug for LoadRequest {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LoadRequest")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("thread", &self.thread)
			.field("frame_depth", &self.frame_depth)
			.field("state", &self.state())
			.finish()
	}
}

/// A request's work item for one candidate loader, placed in a thread's inbox.
pub struct Subtask {
	pub request: Arc<LoadRequest>,
	pub loader: Arc<Loader>,
	/// `None` when the requesting thread has to (re)schedule the subtask.
	pub thread: Option<ThreadId>,
	pub order: usize,
	/// The executing thread took the loader's section for this subtask and gives it back after.
	pub release_on_complete: bool,
	/// Set when the subtask was put back because it needs a class its thread is still defining.
	pub waiting_on: Option<(Arc<Loader>, ClassName)>,
}

impl Debug for Subtask {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subtask")
			.field("request", &self.request.id)
			.field("name", &self.request.name)
			.field("loader", &self.loader.id())
			.field("thread", &self.thread)
			.field("order", &self.order)
			.field("release_on_complete", &self.release_on_complete)
			.field(
				"waiting_on",
				&self.waiting_on.as_ref().map(|(loader, name)| (loader.id(), name)),
			)
			.finish()
	}
}

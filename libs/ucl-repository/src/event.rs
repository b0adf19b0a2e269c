use crate::LoaderId;
use crossbeam::channel::{Sender, TrySendError};
use tracing::debug;
use ucl_core::ClassName;
use ucl_source::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepositoryEvent {
	LoaderAdded { loader: LoaderId, url: Url },
	LoaderRemoved { loader: LoaderId, url: Url },
	/// A class was evicted from the global cache because its loader went away.
	ClassRemoved { loader: LoaderId, name: ClassName },
}

/// Observes repository changes. Called on the thread making the change, with no repository lock
/// held. Delivery is fire and forget.
pub trait RepositoryListener: Send + Sync {
	fn handle(&self, event: &RepositoryEvent);
}

impl RepositoryListener for Sender<RepositoryEvent> {
	fn handle(&self, event: &RepositoryEvent) {
		match self.try_send(event.clone()) {
			Ok(()) => {}
			Err(TrySendError::Full(event)) => debug!("Listener full, dropped {event:?}"),
			Err(TrySendError::Disconnected(_)) => {}
		}
	}
}

mod config;
mod error;
mod name;

pub use config::*;
pub use error::*;
pub use name::*;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static START: Once = Once::new();

/// Installs the process-wide tracing subscriber. Safe to call more than once.
pub fn init() {
	START.call_once(|| {
		let filter = filter::Targets::new()
			.with_default(Level::INFO)
			.with_target("scheduler", Level::INFO);
		let layered = tracing_subscriber::registry()
			.with(tracing_subscriber::fmt::layer())
			.with(filter);

		// Someone else (a test harness, the embedding application) may own the subscriber.
		let _ = layered.try_init();
	});
}

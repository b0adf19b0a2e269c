mod class;
mod event;
mod loader;
mod repository;
mod scheduler;
mod section;
mod task;

pub use class::*;
pub use event::*;
pub use loader::*;
pub use repository::*;
pub use scheduler::*;
pub use section::*;
pub use task::*;

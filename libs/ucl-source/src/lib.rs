mod index;
mod source;

pub use index::*;
pub use source::*;
pub use url::Url;

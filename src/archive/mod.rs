pub mod source;
pub mod target;

pub use source::{copy_header, Source};
pub use target::Target;

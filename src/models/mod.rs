pub mod document;
pub mod object;
pub mod task;

pub use document::*;
pub use object::*;
pub use task::*;

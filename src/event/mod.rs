mod drain;
mod sink;
mod source;

pub use drain::*;
pub use sink::*;
pub use source::*;

mod link_state;
mod source;
mod sysfs;

pub use link_state::*;
pub use source::*;
pub use sysfs::*;

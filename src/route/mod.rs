mod binding;
mod installer;

pub use binding::*;
pub use installer::*;

mod config;
mod instance;

#[cfg(test)]
pub(crate) use config::tests::valid_settings;

pub use config::*;
pub use instance::*;

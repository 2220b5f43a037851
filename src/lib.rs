pub mod config;
pub mod event;
pub mod ewma;
pub mod lifecycle;
pub mod link;
pub mod metric;
pub mod route;
pub mod sys;
pub mod utils;

#[cfg(test)]
mod mock;

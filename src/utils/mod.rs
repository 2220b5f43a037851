mod humanize;

pub use humanize::*;

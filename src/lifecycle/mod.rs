mod fast_path;
mod manager;
mod shutdown;

pub use fast_path::*;
pub use manager::*;
pub use shutdown::*;

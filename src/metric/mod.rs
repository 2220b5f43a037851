mod archive;
mod policy;
mod sampler;
mod table;

pub use archive::*;
pub use policy::*;
pub use sampler::*;
pub use table::*;

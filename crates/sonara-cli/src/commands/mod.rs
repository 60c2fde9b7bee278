//! CLI command implementations.

pub mod serve;
pub mod status;

pub use serve::run_serve;
pub use status::run_status;

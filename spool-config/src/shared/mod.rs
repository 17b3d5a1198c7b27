//! Shared configuration types for spool components.

mod base;
mod read_ahead;
mod shared_use;
mod spool;
mod workdir;

pub use base::ValidationError;
pub use read_ahead::ReadAheadConfig;
pub use shared_use::SharedUseConfig;
pub use spool::SpoolConfig;
pub use workdir::WorkdirConfig;

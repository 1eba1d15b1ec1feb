//! Domain models for the clinic permission engine and TISS billing.

mod actor;
mod permissions;
mod roster;
mod tiss;

pub use actor::*;
pub use permissions::*;
pub use roster::*;
pub use tiss::*;

//! # Contracts
//!
//! Frozen interface contracts (ICD) shared by every crate in the workspace:
//! identifiers, backend wire types, run state, backend traits and errors.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Backend timestamps are epoch milliseconds (`finishedOn`)
//! - Everything exposed to callers is `chrono::DateTime<Utc>`

mod backend;
mod email;
mod error;
mod job;
mod job_id;
mod profile;
mod run;

pub use backend::*;
pub use email::*;
pub use error::*;
pub use job::*;
pub use job_id::JobId;
pub use profile::*;
pub use run::*;

//! Command implementations.

mod common;
mod info;
mod run;
mod send;
mod status;
mod validate;

pub use info::run_info;
pub use run::run_dispatch;
pub use send::run_send;
pub use status::{run_cancel, run_status};
pub use validate::run_validate;

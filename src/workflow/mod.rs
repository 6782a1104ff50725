//! Command workflows for `otask`.
//!
//! Each command is a thin layer over the library modules; errors are
//! wrapped with the work-dir context a user needs to act on them.
mod context;
mod list;
mod run;
mod setup;
mod status;

pub use list::run_list;
pub use run::run_run;
pub use setup::run_setup;
pub use status::run_status;

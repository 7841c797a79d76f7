//! Gulper module split across focused submodules:
//! - `state`: target window, contiguous coverage, chunk planning, lifecycle
//! - `process`: the gulper struct and its fetch loop
//! - `handle`: cloneable caller-facing view of a running gulper
//! - `error`: failures reported to observers
//! - `tests`: fetch loop tests against scripted sources

mod error;
mod handle;
mod process;
mod state;


pub use error::GulpError;
pub use handle::GulperHandle;
pub(crate) use process::{Gulper, GulperParams};
pub use state::GulperStatus;

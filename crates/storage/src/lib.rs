//! Cache stores for packed dependency trees.
//!
//! Every store implements [`Cacher`]; the orchestrator holds an ordered list
//! of [`Backend`] values and treats them uniformly.

pub mod backend;
pub mod error;
mod key;

pub use crate::backend::{Backend, BoxSyncRead, Cacher};
pub use crate::key::validate as validate_key;

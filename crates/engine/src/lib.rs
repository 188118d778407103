//! Install-or-restore orchestration.
//!
//! A run derives a [`CacheKey`] from the platform, the lockfile and the
//! optional pre-cache command, searches the configured backends in order and
//! either applies the first hit or installs afresh and stores the packed result
//! in every backend. See [`Orchestrator::run`].

pub mod error;
mod key;
mod run;

pub use crate::key::CacheKey;
pub use crate::run::{Orchestrator, Outcome, Report, Settings};

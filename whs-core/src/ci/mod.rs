//! CI Adapter: the port the Dispatcher's CI watcher stage polls for a PR's
//! check status (§4.1 "CI watch", §6 "Tracker adapter" sibling port).
//!
//! No tracker or worktree adapter owns CI state in the label vocabulary, so
//! this is its own small port. Concrete adapters shell out to a configured
//! external binary; tests use an in-memory fake.

pub mod cli;

use anyhow::Result;

use crate::model::CiStatus;

pub trait CiGateway {
    fn check_status(&self, project: &str, pr: u64) -> Result<CiStatus>;
}

//! Job task execution -- the full pipeline for a single submitted job.
//!
//! Split into focused submodules:
//! - [`context`] - Shared task state and registry/event helpers
//! - [`orchestration`] - Phase sequence from admission through upload
//! - [`finalization`] - Outcome mapping, cleanup, record writing

mod context;
mod finalization;
mod orchestration;

pub(crate) use context::JobTaskContext;
pub(crate) use orchestration::run_job_task;

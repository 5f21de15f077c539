//! Job task execution: one engine attempt for a claimed job and its outcome.
//!
//! Split into focused submodules:
//! - [`context`] - Shared state of a running attempt
//! - [`orchestration`] - Dedup recheck, engine invocation, stream consumption
//! - [`finalization`] - Applying the attempt outcome to the job

mod context;
mod finalization;
mod orchestration;

pub(crate) use context::JobTaskContext;
pub(crate) use orchestration::run_job_task;

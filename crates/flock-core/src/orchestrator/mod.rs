//! Checkpointed bulk orchestration.
//!
//! Provides `Target`, `Outcome`, `RunRecord`, the `ActionInvoker` capability,
//! the file-backed `CheckpointStore`, and the `Orchestrator` that ties them
//! together. The CLI's batch commands are thin wrappers around these.

pub mod batch;
pub mod cancel;
pub mod checkpoint;
pub mod invoker;
pub mod run;

pub use batch::{Orchestrator, Progress, ProgressObserver};
pub use cancel::CancelToken;
pub use checkpoint::{CheckpointStore, RunIds, RunStore};
pub use invoker::{
    from_fn, ActionInvoker, FnInvoker, InvocationError, InvocationErrorKind, InvokeResult,
    Retrying,
};
pub use run::{check_unique, Outcome, RunCounts, RunRecord, Target};

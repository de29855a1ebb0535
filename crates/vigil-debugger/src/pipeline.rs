//! Hit capture on application threads.
//!
//! [`HitPipeline::fire`] runs on whatever thread reached an armed probe. It
//! reads the breakpoint, evaluates its condition and watch expressions in the
//! sandbox and hands the rendered values to the control plane through an
//! unbounded channel. Nothing here blocks on the control plane, and no
//! failure (or panic) escapes to the caller.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use vigil_sandbox::{Sandbox, Scope};
use vigil_store::{BreakpointId, PendingHit, Store, StoreOptions};

use crate::error::DebuggerError;

#[derive(Debug)]
pub(crate) enum QueueItem {
    Hit(PendingHit),
    /// Stops the drain loop once everything queued so far is written.
    Shutdown,
}

/// What a single [`fire`](crate::Debugger::fire) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Values were captured and queued for persistence.
    Queued,
    /// No breakpoint with that id is stored.
    UnknownBreakpoint,
    ConditionFalse,
    /// The condition did not evaluate; the hit was not logged.
    ConditionFailed,
    /// Store access or hand-off failed, or capture panicked. Logged.
    Failed,
}

#[derive(Debug)]
pub(crate) struct HitPipeline {
    db_path: PathBuf,
    store_options: StoreOptions,
    sandbox: Arc<Sandbox>,
    queue: UnboundedSender<QueueItem>,
}

impl HitPipeline {
    pub(crate) fn new(
        db_path: PathBuf,
        store_options: StoreOptions,
        sandbox: Arc<Sandbox>,
        queue: UnboundedSender<QueueItem>,
    ) -> Self {
        Self {
            db_path,
            store_options,
            sandbox,
            queue,
        }
    }

    pub(crate) fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub(crate) fn fire(&self, id: BreakpointId, scope: &Scope) -> FireOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_fire(id, scope))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                tracing::error!(
                    target: "vigil.pipeline",
                    breakpoint_id = id,
                    error = %err,
                    "failed to capture hit"
                );
                FireOutcome::Failed
            }
            Err(payload) => {
                tracing::error!(
                    target: "vigil.pipeline",
                    breakpoint_id = id,
                    panic.message = %panic_message(payload.as_ref()),
                    "hit capture panicked"
                );
                FireOutcome::Failed
            }
        }
    }

    fn try_fire(&self, id: BreakpointId, scope: &Scope) -> Result<FireOutcome, DebuggerError> {
        let breakpoint = {
            let store = Store::connect(&self.db_path, self.store_options)?;
            store.get_breakpoint(id)?
        };
        let Some(breakpoint) = breakpoint else {
            tracing::debug!(target: "vigil.pipeline", breakpoint_id = id, "fired unknown breakpoint");
            return Ok(FireOutcome::UnknownBreakpoint);
        };

        if let Some(condition) = breakpoint.condition.as_deref() {
            match self.sandbox.evaluate_condition(condition, scope) {
                Ok(true) => {}
                Ok(false) => return Ok(FireOutcome::ConditionFalse),
                Err(err) => {
                    tracing::warn!(
                        target: "vigil.pipeline",
                        breakpoint_id = id,
                        condition,
                        error = %err,
                        "breakpoint condition failed; hit not logged"
                    );
                    return Ok(FireOutcome::ConditionFailed);
                }
            }
        }

        let values = breakpoint
            .expressions
            .iter()
            .map(|expression| self.sandbox.evaluate_to_string(expression, scope))
            .collect();
        self.queue
            .send(QueueItem::Hit(PendingHit {
                breakpoint_id: id,
                values,
            }))
            .map_err(|_| DebuggerError::ControlPlaneGone)?;
        Ok(FireOutcome::Queued)
    }

    /// Queues the shutdown sentinel. Returns `false` when the control plane
    /// is already gone.
    pub(crate) fn shutdown(&self) -> bool {
        self.queue.send(QueueItem::Shutdown).is_ok()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

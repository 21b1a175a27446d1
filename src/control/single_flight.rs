//! At-most-one task per worker.
//!
//! A worker admits a `run` only when it is idle and has not already run
//! that task id. Repeating the in-flight or last task id is answered as a
//! duplicate without re-running anything. A different id while busy is
//! refused outright instead of replacing the in-flight marker.

use std::sync::Mutex;

use super::error::ControlError;
use super::types::TaskId;

#[derive(Debug, Default)]
struct FlightState {
    in_flight: Option<TaskId>,
    /// Last finished task and its result.
    last: Option<(TaskId, u64)>,
}

#[derive(Debug, Default)]
pub struct SingleFlight {
    state: Mutex<FlightState>,
}

/// Outcome of asking to run a task.
#[derive(Debug)]
pub enum Admission<'a> {
    /// Run it; the guard releases the slot when dropped.
    Proceed(FlightGuard<'a>),
    /// Already running or already done here.
    Duplicate { task_id: TaskId, count: Option<u64> },
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, task_id: TaskId) -> Result<Admission<'_>, ControlError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ControlError::Internal("single-flight lock poisoned".into()))?;

        if let Some(current) = state.in_flight {
            if current == task_id {
                tracing::warn!(task_id = %task_id, "Task already in progress, ignoring");
                return Ok(Admission::Duplicate {
                    task_id,
                    count: None,
                });
            }
            return Err(ControlError::Busy {
                current,
                requested: task_id,
            });
        }

        if let Some((last, count)) = state.last {
            if last == task_id {
                tracing::warn!(task_id = %task_id, count, "Task already completed, ignoring");
                return Ok(Admission::Duplicate {
                    task_id,
                    count: Some(count),
                });
            }
        }

        state.in_flight = Some(task_id);
        Ok(Admission::Proceed(FlightGuard {
            flight: self,
            task_id,
        }))
    }

    /// Task currently running, if any.
    pub fn in_flight(&self) -> Option<TaskId> {
        self.state.lock().ok().and_then(|s| s.in_flight)
    }

    fn release(&self, task_id: TaskId, result: Option<u64>) {
        // Recover from poisoning: the slot must be freed even after a panic.
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.in_flight == Some(task_id) {
            state.in_flight = None;
        }
        if let Some(count) = result {
            state.last = Some((task_id, count));
        }
    }
}

/// Holds the worker's single task slot.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
    task_id: TaskId,
}

impl FlightGuard<'_> {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Record a successful result and free the slot.
    pub fn complete(self, count: u64) {
        self.flight.release(self.task_id, Some(count));
        std::mem::forget(self);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Dropped without `complete`: the task failed and may be retried.
        self.flight.release(self.task_id, None);
    }
}

//! The rendezvous between request threads and the VM thread.
//!
//! A pause is requested first (atomic flag) and confirmed later: the VM
//! thread observes the request on a `line` hook event, fills in the
//! status snapshot and parks on the condition variable. Only while it is
//! parked (`is_paused == true`) may request threads read or mutate VM
//! state, and they do so holding the same mutex, so the VM cannot resume
//! underneath them.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use transport::types::{
    BreakpointId, CreateBreakpoint, ResolvedBreakpoint, RunState, StackEntry, Status,
};

use crate::breakpoints::{Breakpoint, BreakpointStore};
use crate::error::{RequestError, RequestResult};

/// What kind of pause is currently requested.
///
/// `Pause` and `StepIn` share the same depth semantics (break on the very
/// next line) but stay distinct so a status snapshot can tell `Pausing`
/// from `Stepping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PauseType {
    None,
    StepOut,
    StepOver,
    StepIn,
    Pause,
}

impl PauseType {
    fn as_u8(self) -> u8 {
        match self {
            PauseType::None => 0,
            PauseType::StepOut => 1,
            PauseType::StepOver => 2,
            PauseType::StepIn => 3,
            PauseType::Pause => 4,
        }
    }

    fn from_u8(value: u8) -> PauseType {
        match value {
            1 => PauseType::StepOut,
            2 => PauseType::StepOver,
            3 => PauseType::StepIn,
            4 => PauseType::Pause,
            _ => PauseType::None,
        }
    }
}

/// Everything guarded by the coordinator mutex.
struct PauseShared {
    is_paused: bool,
    /// How many frame pops are required before the next `line` event may
    /// pause: -1 pauses immediately, 0 pauses in the current frame, +1
    /// after the current frame returns.
    returns_required: i32,
    /// Status captured the last time the VM paused.
    last_status: Status,
    paused_at_breakpoint: BreakpointId,
    breakpoints: BreakpointStore,
    /// Bumped by every resume/step/detach; the parked VM thread waits
    /// for it to change, which makes spurious wakeups harmless.
    wake_epoch: u64,
}

pub(crate) struct PauseCoordinator {
    requested: AtomicU8,
    /// Mirror of `breakpoints.total()`, read on the line-event fast path.
    total_breakpoints: AtomicUsize,
    shared: Mutex<PauseShared>,
    cv: Condvar,
}

impl PauseCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            requested: AtomicU8::new(PauseType::None.as_u8()),
            total_breakpoints: AtomicUsize::new(0),
            shared: Mutex::new(PauseShared {
                is_paused: false,
                returns_required: 0,
                last_status: Status::default(),
                paused_at_breakpoint: 0,
                breakpoints: BreakpointStore::new(),
                wake_epoch: 0,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PauseShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn requested(&self) -> PauseType {
        PauseType::from_u8(self.requested.load(Ordering::SeqCst))
    }

    /// Must be called with the mutex held.
    fn set_requested(&self, value: PauseType) {
        self.requested.store(value.as_u8(), Ordering::SeqCst);
    }

    /// Request a pause at the next executed line. Idempotent.
    pub(crate) fn pause(&self) -> RequestResult<()> {
        if self.requested() == PauseType::None {
            let mut shared = self.lock();
            if self.requested() == PauseType::None {
                self.set_requested(PauseType::Pause);
                shared.returns_required = -1;
            }
        }
        Ok(())
    }

    pub(crate) fn continue_execution(&self) -> RequestResult<()> {
        if self.requested() != PauseType::None {
            let mut shared = self.lock();
            if self.requested() != PauseType::None {
                self.set_requested(PauseType::None);
                shared.wake_epoch += 1;
                self.cv.notify_all();
                return Ok(());
            }
        }
        Err(RequestError::NotPaused)
    }

    /// Arm a step. Fails unless the VM is currently parked.
    pub(crate) fn step(&self, step: PauseType, returns_required: i32) -> RequestResult<()> {
        let mut shared = self.lock();
        if !shared.is_paused {
            return Err(RequestError::NotPaused);
        }
        shared.returns_required = returns_required;
        self.set_requested(step);
        shared.wake_epoch += 1;
        self.cv.notify_all();
        Ok(())
    }

    /// Non-blocking status snapshot.
    pub(crate) fn status_snapshot(&self) -> Status {
        let shared = self.lock();
        let requested = self.requested();
        if requested == PauseType::None {
            return Status::default();
        }
        if shared.is_paused {
            let mut status = shared.last_status.clone();
            status.run_state = RunState::Paused;
            return status;
        }
        Status {
            run_state: if requested == PauseType::Pause {
                RunState::Pausing
            } else {
                RunState::Stepping
            },
            ..Default::default()
        }
    }

    /// Replace the breakpoint set of `file`. Either every entry is valid
    /// and the whole set replaces the previous one, or nothing changes.
    pub(crate) fn set_file_breakpoints(
        &self,
        file: &str,
        creates: &[CreateBreakpoint],
    ) -> RequestResult<Vec<ResolvedBreakpoint>> {
        for bp in creates {
            if bp.id < 1 || bp.line < 1 {
                return Err(RequestError::invalid_parameter(format!(
                    "breakpoint ids and lines start at 1 (got id={}, line={})",
                    bp.id, bp.line
                )));
            }
        }

        let mut shared = self.lock();
        let identity = shared.breakpoints.ensure_file(file);
        shared.breakpoints.clear(&identity);
        shared.breakpoints.add_all(
            &identity,
            creates.iter().map(|bp| Breakpoint {
                id: bp.id,
                line: bp.line,
            }),
        );
        self.total_breakpoints
            .store(shared.breakpoints.total(), Ordering::SeqCst);
        tracing::debug!(file, count = creates.len(), "breakpoints replaced");

        Ok(creates
            .iter()
            .map(|bp| ResolvedBreakpoint {
                id: bp.id,
                line: bp.line,
                verified: true,
            })
            .collect())
    }

    /// Run `f` while the VM is guaranteed parked. Holds the coordinator
    /// mutex for the duration so no resume can race the caller's VM
    /// access.
    pub(crate) fn while_paused<R>(
        &self,
        f: impl FnOnce() -> RequestResult<R>,
    ) -> RequestResult<R> {
        let shared = self.lock();
        if !shared.is_paused {
            return Err(RequestError::NotPaused);
        }
        let result = f();
        drop(shared);
        result
    }

    /// Wake the VM thread and forget any pause in flight. The tracked
    /// stack is the hook's to clear; everything else resets here.
    pub(crate) fn detach(&self) {
        let mut shared = self.lock();
        self.set_requested(PauseType::None);
        shared.is_paused = false;
        shared.paused_at_breakpoint = 0;
        shared.returns_required = 0;
        shared.wake_epoch += 1;
        self.cv.notify_all();
    }

    // --- VM-thread side ---

    /// Cheap check the hook runs on every line event before taking the
    /// mutex.
    pub(crate) fn line_may_pause(&self) -> bool {
        self.requested() != PauseType::None
            || self.total_breakpoints.load(Ordering::SeqCst) != 0
    }

    pub(crate) fn on_call(&self) {
        if self.requested() != PauseType::None {
            let mut shared = self.lock();
            if self.requested() != PauseType::None && shared.returns_required >= 0 {
                shared.returns_required += 1;
            }
        }
    }

    pub(crate) fn on_return(&self) {
        if self.requested() != PauseType::None {
            let mut shared = self.lock();
            if self.requested() != PauseType::None {
                shared.returns_required -= 1;
            }
        }
    }

    /// Handle a `line` event: check breakpoints, and park the calling
    /// (VM) thread when a pause condition holds.
    ///
    /// `stack` is the tracked call stack, innermost frame first. `emit`
    /// is invoked with the pause status after the bookkeeping is
    /// complete and without the mutex held.
    pub(crate) fn on_line(
        &self,
        file: &str,
        line: u32,
        stack: &[StackEntry],
        emit: &mut dyn FnMut(Status),
    ) {
        if self.requested() == PauseType::None
            && self.total_breakpoints.load(Ordering::SeqCst) == 0
        {
            return;
        }

        let mut shared = self.lock();

        if let Some(bp) = shared
            .breakpoints
            .find_file(file)
            .and_then(|identity| shared.breakpoints.lookup(&identity, line))
        {
            tracing::debug!(file, line, id = bp.id, "breakpoint hit");
            shared.returns_required = 0;
            self.set_requested(PauseType::Pause);
            shared.paused_at_breakpoint = bp.id;
        }

        if self.requested() == PauseType::None || shared.returns_required > 0 {
            return;
        }

        shared.is_paused = true;
        shared.last_status = Status {
            run_state: RunState::Paused,
            stack: stack.to_vec(),
            paused_at_breakpoint_id: shared.paused_at_breakpoint,
        };
        let status = shared.last_status.clone();
        let epoch = shared.wake_epoch;
        drop(shared);

        // Event sinks run without the coordinator lock.
        emit(status);

        let mut shared = self.lock();
        while shared.wake_epoch == epoch {
            shared = self
                .cv
                .wait(shared)
                .unwrap_or_else(|e| e.into_inner());
        }
        shared.is_paused = false;
        shared.paused_at_breakpoint = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_idempotent_and_reports_pausing() {
        let coord = PauseCoordinator::new();
        assert_eq!(coord.status_snapshot().run_state, RunState::Running);
        coord.pause().unwrap();
        coord.pause().unwrap();
        assert_eq!(coord.status_snapshot().run_state, RunState::Pausing);
    }

    #[test]
    fn continue_without_pause_fails() {
        let coord = PauseCoordinator::new();
        assert!(matches!(
            coord.continue_execution(),
            Err(RequestError::NotPaused)
        ));
        coord.pause().unwrap();
        coord.continue_execution().unwrap();
        assert!(matches!(
            coord.continue_execution(),
            Err(RequestError::NotPaused)
        ));
    }

    #[test]
    fn step_requires_a_parked_vm() {
        let coord = PauseCoordinator::new();
        assert!(matches!(
            coord.step(PauseType::StepIn, -1),
            Err(RequestError::NotPaused)
        ));
    }

    #[test]
    fn invalid_breakpoints_change_nothing() {
        let coord = PauseCoordinator::new();
        coord
            .set_file_breakpoints(
                "test.nut",
                &[CreateBreakpoint { id: 1, line: 10 }],
            )
            .unwrap();

        let err = coord
            .set_file_breakpoints(
                "test.nut",
                &[
                    CreateBreakpoint { id: 2, line: 20 },
                    CreateBreakpoint { id: 0, line: 30 },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidParameter { .. }));

        // Prior set survives: the old breakpoint still pauses the VM.
        let stack = vec![StackEntry {
            file: "test.nut".to_string(),
            line: 10,
            function: "main".to_string(),
        }];
        let coord = std::sync::Arc::new(coord);
        let worker = {
            let coord = coord.clone();
            let stack = stack.clone();
            std::thread::spawn(move || {
                let mut paused = false;
                coord.on_line("test.nut", 10, &stack, &mut |status| {
                    paused = status.run_state == RunState::Paused;
                });
                paused
            })
        };
        // Wait until the worker parks, then release it.
        while coord.status_snapshot().run_state != RunState::Paused {
            std::thread::yield_now();
        }
        coord.continue_execution().unwrap();
        assert!(worker.join().unwrap());
    }

    #[test]
    fn duplicate_ids_last_one_wins() {
        let coord = PauseCoordinator::new();
        let resolved = coord
            .set_file_breakpoints(
                "test.nut",
                &[
                    CreateBreakpoint { id: 5, line: 10 },
                    CreateBreakpoint { id: 6, line: 10 },
                ],
            )
            .unwrap();
        // Both acknowledged on the wire, one entry in the store.
        assert_eq!(resolved.len(), 2);
        let shared = coord.lock();
        let identity = shared.breakpoints.find_file("test.nut").unwrap();
        assert_eq!(
            shared.breakpoints.lookup(&identity, 10).map(|bp| bp.id),
            Some(6)
        );
    }
}

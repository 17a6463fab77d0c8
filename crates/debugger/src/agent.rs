//! The request-side façade over the debug control plane.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use transport::types::{
    CreateBreakpoint, ImmediateValue, PaginationInfo, ResolvedBreakpoint, RunState, Status,
    Variable,
};
use vm::Vm;

use crate::commands::{Commands, DebugEvent};
use crate::error::{RequestError, RequestResult};
use crate::hook::DebugHook;
use crate::inspector;
use crate::pause::{PauseCoordinator, PauseType};

/// State shared between the agent, its hook handle and all request
/// threads.
pub(crate) struct AgentShared {
    pub(crate) coordinator: PauseCoordinator,
    pub(crate) attached: AtomicBool,
    subscribers: Mutex<Vec<crossbeam_channel::Sender<DebugEvent>>>,
}

impl AgentShared {
    /// Deliver `event` to every live subscriber, dropping the ones that
    /// hung up. Never called with the coordinator mutex held.
    pub(crate) fn broadcast(&self, event: DebugEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Debug agent for one embedded VM.
///
/// Request threads drive it through [`Commands`]; the VM thread feeds it
/// through the [`DebugHook`] returned by [`Agent::attach_vm`]. One agent
/// serves exactly one VM at a time.
pub struct Agent<V: Vm> {
    shared: Arc<AgentShared>,
    vm: Mutex<Option<Arc<V>>>,
}

impl<V: Vm> Default for Agent<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Vm> Agent<V> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(AgentShared {
                coordinator: PauseCoordinator::new(),
                attached: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            vm: Mutex::new(None),
        }
    }

    /// Bind `vm` to this agent and hand back the handle the host must
    /// keep on the VM thread and feed from its native hook.
    pub fn attach_vm(&self, vm: Arc<V>) -> DebugHook {
        *self.vm.lock().unwrap_or_else(|e| e.into_inner()) = Some(vm);
        self.shared.attached.store(true, Ordering::SeqCst);
        tracing::debug!("vm attached");
        DebugHook::new(self.shared.clone())
    }

    /// Release the VM: wakes a parked VM thread, clears any pause in
    /// flight, and makes every later inspection fail with
    /// `InvalidNotPaused`.
    pub fn detach_vm(&self) {
        self.shared.attached.store(false, Ordering::SeqCst);
        *self.vm.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.shared.coordinator.detach();
        tracing::debug!("vm detached");
    }

    /// Subscribe to status and output events. Events are delivered from
    /// the VM and request threads; receivers must not block for long.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<DebugEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn current_vm(&self) -> RequestResult<Arc<V>> {
        self.vm
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(RequestError::NotPaused)
    }

    fn broadcast_status(&self) {
        let status = self.shared.coordinator.status_snapshot();
        self.shared.broadcast(DebugEvent::StatusChanged(status));
    }

    /// Announce the completion of a resume request. The VM thread may
    /// not have woken yet, so this reports the requested state rather
    /// than a snapshot (which could still show the old pause).
    fn broadcast_resumed(&self, run_state: RunState) {
        self.shared.broadcast(DebugEvent::StatusChanged(Status {
            run_state,
            ..Default::default()
        }));
    }
}

impl<V: Vm> Commands for Agent<V> {
    fn pause(&self) -> RequestResult<()> {
        self.shared.coordinator.pause()
    }

    fn continue_execution(&self) -> RequestResult<()> {
        self.shared.coordinator.continue_execution()?;
        self.broadcast_resumed(RunState::Running);
        Ok(())
    }

    fn step_in(&self) -> RequestResult<()> {
        self.shared.coordinator.step(PauseType::StepIn, -1)?;
        self.broadcast_resumed(RunState::Stepping);
        Ok(())
    }

    fn step_over(&self) -> RequestResult<()> {
        self.shared.coordinator.step(PauseType::StepOver, 0)?;
        self.broadcast_resumed(RunState::Stepping);
        Ok(())
    }

    fn step_out(&self) -> RequestResult<()> {
        self.shared.coordinator.step(PauseType::StepOut, 1)?;
        self.broadcast_resumed(RunState::Stepping);
        Ok(())
    }

    fn send_status(&self) -> RequestResult<()> {
        self.broadcast_status();
        Ok(())
    }

    fn stack_variables(
        &self,
        frame: u32,
        path: &str,
        pagination: PaginationInfo,
    ) -> RequestResult<Vec<Variable>> {
        let vm = self.current_vm()?;
        self.shared
            .coordinator
            .while_paused(|| inspector::stack_variables(vm.as_ref(), frame, path, pagination))
    }

    fn global_variables(
        &self,
        path: &str,
        pagination: PaginationInfo,
    ) -> RequestResult<Vec<Variable>> {
        let vm = self.current_vm()?;
        self.shared
            .coordinator
            .while_paused(|| inspector::global_variables(vm.as_ref(), path, pagination))
    }

    fn set_stack_variable(&self, frame: u32, path: &str, value: &str) -> RequestResult<Variable> {
        let vm = self.current_vm()?;
        self.shared
            .coordinator
            .while_paused(|| inspector::set_stack_variable(vm.as_ref(), frame, path, value))
    }

    fn evaluate(
        &self,
        frame: i32,
        expression: &str,
        pagination: PaginationInfo,
    ) -> RequestResult<ImmediateValue> {
        let vm = self.current_vm()?;
        let frame = if frame < 0 { None } else { Some(frame as u32) };
        self.shared
            .coordinator
            .while_paused(|| inspector::immediate_value(vm.as_ref(), frame, expression, pagination))
    }

    fn set_file_breakpoints(
        &self,
        file: &str,
        breakpoints: &[CreateBreakpoint],
    ) -> RequestResult<Vec<ResolvedBreakpoint>> {
        self.shared.coordinator.set_file_breakpoints(file, breakpoints)
    }
}

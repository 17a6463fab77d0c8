//! The VM-thread side of the agent.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use transport::types::{OutputLine, StackEntry};
use vm::{HookEvent, HookSink};

use crate::agent::AgentShared;
use crate::commands::DebugEvent;

/// Handle the host keeps on the VM thread and feeds from its native
/// debug hook and print callbacks.
///
/// The tracked call stack lives here, owned by the one thread that
/// mutates it; the coordinator only ever sees snapshots of it, taken at
/// pause time.
pub struct DebugHook {
    shared: Arc<AgentShared>,
    /// Outermost frame first; reversed into status snapshots so frame 0
    /// is the innermost.
    stack: Vec<StackEntry>,
}

impl DebugHook {
    pub(crate) fn new(shared: Arc<AgentShared>) -> Self {
        Self {
            shared,
            stack: Vec::new(),
        }
    }

    fn snapshot(&self) -> Vec<StackEntry> {
        self.stack.iter().rev().cloned().collect()
    }
}

impl HookSink for DebugHook {
    fn on_hook(&mut self, event: HookEvent<'_>) {
        if !self.shared.attached.load(Ordering::SeqCst) {
            self.stack.clear();
            return;
        }

        match event {
            HookEvent::Call {
                source,
                line,
                function,
            } => {
                self.stack.push(StackEntry {
                    file: source.to_string(),
                    line,
                    function: function.to_string(),
                });
                self.shared.coordinator.on_call();
            }
            HookEvent::Return => {
                self.shared.coordinator.on_return();
                self.stack.pop();
            }
            HookEvent::Line { source, line } => {
                if let Some(top) = self.stack.last_mut() {
                    top.line = line;
                }
                if !self.shared.coordinator.line_may_pause() {
                    return;
                }
                let snapshot = self.snapshot();
                let shared = &self.shared;
                shared
                    .coordinator
                    .on_line(source, line, &snapshot, &mut |status| {
                        shared.broadcast(DebugEvent::StatusChanged(status));
                    });
            }
        }
    }

    fn on_print(&mut self, text: &str, is_err: bool) {
        if !self.shared.attached.load(Ordering::SeqCst) {
            return;
        }
        let (file, line) = self
            .stack
            .last()
            .map(|top| (top.file.clone(), top.line))
            .unwrap_or_default();
        self.shared.broadcast(DebugEvent::Output(OutputLine {
            text: text.to_string(),
            is_err,
            file,
            line,
        }));
    }
}

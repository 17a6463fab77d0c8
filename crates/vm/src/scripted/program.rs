//! Step programs for the scripted VM.

use std::sync::Arc;

use crate::types::HookEvent;
use crate::vm::HookSink;

use super::{Frame, ScriptedVm, Value};

/// One step of a scripted program.
#[derive(Debug, Clone)]
pub enum Step {
    /// Enter a function with the given locals.
    Call {
        function: Arc<str>,
        source: Arc<str>,
        line: u32,
        locals: Vec<(Arc<str>, Value)>,
    },
    /// Execute a source line in the current function.
    Line(u32),
    /// Return from the current function.
    Return,
    /// Write a line of program output.
    Print { text: String, is_err: bool },
}

/// A replayable program: the hook-event trace of one script run.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call<'a>(
        mut self,
        function: &str,
        source: &str,
        line: u32,
        locals: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Self {
        self.steps.push(Step::Call {
            function: Arc::from(function),
            source: Arc::from(source),
            line,
            locals: locals
                .into_iter()
                .map(|(name, value)| (Arc::from(name), value))
                .collect(),
        });
        self
    }

    pub fn line(mut self, line: u32) -> Self {
        self.steps.push(Step::Line(line));
        self
    }

    pub fn ret(mut self) -> Self {
        self.steps.push(Step::Return);
        self
    }

    pub fn print(mut self, text: &str, is_err: bool) -> Self {
        self.steps.push(Step::Print {
            text: text.to_string(),
            is_err,
        });
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl ScriptedVm {
    /// Replay `script` on the calling thread, forwarding hook and print
    /// callbacks to `sink`.
    ///
    /// The caller is the VM thread for the duration of the run; the sink
    /// may park it (that is the point). The internal state lock is never
    /// held across a callback.
    pub fn run(&self, script: &Script, sink: &mut impl HookSink) {
        for step in script.steps() {
            match step {
                Step::Call {
                    function,
                    source,
                    line,
                    locals,
                } => {
                    let mut state = self.lock();
                    state.frames.push(Frame {
                        function: function.clone(),
                        source: source.clone(),
                        line: *line,
                        locals: locals.clone(),
                    });
                    drop(state);
                    sink.on_hook(HookEvent::Call {
                        source: source.as_ref(),
                        line: *line,
                        function: function.as_ref(),
                    });
                }
                Step::Line(line) => {
                    let mut state = self.lock();
                    let source = match state.frames.last_mut() {
                        Some(frame) => {
                            frame.line = *line;
                            frame.source.clone()
                        }
                        None => Arc::from(""),
                    };
                    drop(state);
                    sink.on_hook(HookEvent::Line {
                        source: source.as_ref(),
                        line: *line,
                    });
                }
                Step::Return => {
                    sink.on_hook(HookEvent::Return);
                    self.lock().frames.pop();
                }
                Step::Print { text, is_err } => {
                    sink.on_print(text, *is_err);
                }
            }
        }
    }
}

//! TCP endpoint exposing the debug agent to remote clients.
//!
//! The protocol is Content-Length framed JSON (see `transport`): clients
//! send requests, the server answers each with a response carrying the
//! operation's return code, and every agent event (status changes,
//! program output) is broadcast to all connected clients.
//!
//! One thread accepts connections, one thread pumps agent events, and
//! each connection gets a reader thread of its own. The agent itself is
//! held as a plain [`Commands`] trait object; the server knows nothing
//! about the VM behind it.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use debugger::{Commands, DebugEvent};
use eyre::WrapErr;
use transport::events::{Event, EventBody};
use transport::requests::{Request, RequestBody};
use transport::responses::{Response, ResponseBody};
use transport::{write_message, FramedReader};
use uuid::Uuid;

type Registry = Arc<Mutex<HashMap<Uuid, Arc<Mutex<TcpStream>>>>>;

/// A running endpoint. Dropping it stops the listener and the event
/// pump; established connections are closed by their peers noticing the
/// socket shutdown.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    event_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind `addr` and start serving `commands`, broadcasting `events`
    /// to every connection.
    pub fn bind(
        addr: impl Into<SocketAddr>,
        commands: Arc<dyn Commands>,
        events: crossbeam_channel::Receiver<DebugEvent>,
    ) -> eyre::Result<Self> {
        let listener = TcpListener::bind(addr.into()).wrap_err("binding debug endpoint")?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "debug endpoint listening");

        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let event_thread = {
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || pump_events(events, registry, shutdown))
        };

        let accept_thread = {
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                for connection in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    match connection {
                        Ok(stream) => spawn_connection(stream, commands.clone(), registry.clone()),
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                tracing::debug!("accept loop finished");
            })
        };

        Ok(Self {
            local_addr,
            shutdown,
            accept_thread: Some(accept_thread),
            event_thread: Some(event_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and broadcasting events.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblock the accept loop with one throwaway connection.
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump_events(
    events: crossbeam_channel::Receiver<DebugEvent>,
    registry: Registry,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        let event = match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };

        let event = Event {
            body: match event {
                DebugEvent::StatusChanged(status) => EventBody::Status(status),
                DebugEvent::Output(line) => EventBody::Output(line),
            },
        };

        let connections: Vec<_> = {
            let registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.iter().map(|(id, c)| (*id, c.clone())).collect()
        };
        for (id, connection) in connections {
            let mut stream = connection.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = write_message(&mut *stream, &event) {
                tracing::debug!(connection = %id, error = %e, "dropping connection");
                registry
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
            }
        }
    }
    tracing::debug!("event pump finished");
}

fn spawn_connection(stream: TcpStream, commands: Arc<dyn Commands>, registry: Registry) {
    let id = Uuid::new_v4();
    let peer = stream.peer_addr().ok();
    tracing::info!(connection = %id, ?peer, "client connected");

    let reader = match stream.try_clone() {
        Ok(read_half) => read_half,
        Err(e) => {
            tracing::warn!(connection = %id, error = %e, "failed to split connection");
            return;
        }
    };
    let writer = Arc::new(Mutex::new(stream));
    registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(id, writer.clone());

    thread::spawn(move || {
        let mut framed = FramedReader::new(BufReader::new(reader));
        loop {
            match framed.read_message::<Request>() {
                Ok(Some(request)) => {
                    let seq = request.seq;
                    tracing::debug!(connection = %id, seq, "request");
                    let response = dispatch(commands.as_ref(), request);
                    let mut stream = writer.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(e) = write_message(&mut *stream, &response) {
                        tracing::debug!(connection = %id, error = %e, "write failed");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(connection = %id, error = %e, "read failed");
                    break;
                }
            }
        }
        registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        tracing::info!(connection = %id, "client disconnected");
    });
}

/// Map one request onto the agent and its outcome onto the wire.
pub fn dispatch(commands: &dyn Commands, request: Request) -> Response {
    let seq = request.seq;
    let result = match request.body {
        RequestBody::Pause => commands.pause().map(|()| None),
        RequestBody::Continue => commands.continue_execution().map(|()| None),
        RequestBody::StepIn => commands.step_in().map(|()| None),
        RequestBody::StepOver => commands.step_over().map(|()| None),
        RequestBody::StepOut => commands.step_out().map(|()| None),
        RequestBody::Status => commands.send_status().map(|()| None),
        RequestBody::StackVariables(args) => commands
            .stack_variables(args.frame, &args.path, args.pagination)
            .map(|variables| Some(ResponseBody::Variables(variables))),
        RequestBody::GlobalVariables(args) => commands
            .global_variables(&args.path, args.pagination)
            .map(|variables| Some(ResponseBody::Variables(variables))),
        RequestBody::SetStackVariable(args) => commands
            .set_stack_variable(args.frame, &args.path, &args.value)
            .map(|variable| Some(ResponseBody::Variable(variable))),
        RequestBody::Evaluate(args) => commands
            .evaluate(args.frame, &args.expression, args.pagination)
            .map(|immediate| Some(ResponseBody::Immediate(immediate))),
        RequestBody::SetBreakpoints(args) => commands
            .set_file_breakpoints(&args.file, &args.breakpoints)
            .map(|resolved| Some(ResponseBody::Breakpoints(resolved))),
    };

    match result {
        Ok(body) => Response::success(seq, body),
        Err(e) => Response::failure(seq, e.return_code(), e.to_string()),
    }
}

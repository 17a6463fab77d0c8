//! Demo host: a scripted VM behind the debug endpoint.
//!
//! Runs a small canned script in a loop on a dedicated VM thread and
//! serves the debug protocol, so a client can attach, set breakpoints,
//! step and inspect without embedding a real interpreter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use debugger::{Agent, Commands};
use server::Server;
use tracing_subscriber::EnvFilter;
use vm::scripted::{Script, ScriptedVm, Value};

#[derive(Debug, Parser)]
struct Args {
    /// Address to serve the debug protocol on
    #[clap(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Port to serve the debug protocol on
    #[clap(short, long, default_value_t = transport::DEFAULT_DEBUG_PORT)]
    port: u16,

    /// Delay between script iterations, in milliseconds
    #[clap(long, default_value_t = 500)]
    interval_ms: u64,
}

const SCRIPT_FILE: &str = "sample.nut";

/// A scripted stand-in for the usual embedding demo: a namespaced class,
/// an instance with fields, nested tables and a couple of locals.
fn build_demo() -> (Arc<ScriptedVm>, Script) {
    let vm = ScriptedVm::new();

    let constructor = vm.new_closure(Some("constructor"), 4, 0);
    let print_fn = vm.new_closure(Some("Print"), 1, 0);
    let vec_class = vm.new_class([
        ("constructor", constructor),
        ("Print", print_fn),
        ("x", Value::from(0)),
        ("y", Value::from(0)),
        ("z", Value::from(0)),
    ]);
    let math = vm.new_table([(Value::from("Vec"), vec_class.clone())]);
    vm.set_global("math", math);

    let settings = vm.new_table([
        (Value::from("volume"), Value::from(0.8)),
        (Value::from("fullscreen"), Value::from(false)),
        (Value::from("title"), Value::from("sample")),
    ]);
    vm.set_global("settings", settings);

    let v0 = vm.new_instance(
        &vec_class,
        [
            ("x", Value::from(1)),
            ("y", Value::from(2)),
            ("z", Value::from(3)),
        ],
    );
    let position = vm.new_array([Value::from(10), Value::from(20), Value::from(30)]);
    let names = vm.new_table([
        (Value::from("first"), Value::from("ada")),
        (Value::from("second"), Value::from("grace")),
    ]);

    let script = Script::new()
        .call(
            "main",
            SCRIPT_FILE,
            1,
            [
                ("greeting", Value::from("hello world")),
                ("v0", v0),
                ("position", position),
                ("names", names),
            ],
        )
        .line(2)
        .line(3)
        .call("update", SCRIPT_FILE, 10, [("delta", Value::from(16))])
        .line(11)
        .line(12)
        .print("update complete", false)
        .ret()
        .line(4)
        .ret();

    (Arc::new(vm), script)
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .wrap_err("parsing listen address")?;

    let (vm, script) = build_demo();

    let agent = Arc::new(Agent::new());
    let events = agent.subscribe();
    let _server = Server::bind(addr, agent.clone() as Arc<dyn Commands>, events)
        .wrap_err("starting debug endpoint")?;
    tracing::info!(%addr, "debug endpoint ready");

    let mut hook = agent.attach_vm(vm.clone());
    let interval = Duration::from_millis(args.interval_ms);
    let vm_thread = thread::spawn(move || loop {
        vm.run(&script, &mut hook);
        thread::sleep(interval);
    });

    vm_thread
        .join()
        .map_err(|_| eyre::eyre!("vm thread panicked"))?;
    Ok(())
}

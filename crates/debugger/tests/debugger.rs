use std::io::IsTerminal;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use debugger::{Agent, Commands, DebugEvent};
use tracing_subscriber::EnvFilter;
use transport::types::{
    format_path, CreateBreakpoint, OutputLine, PaginationInfo, RunState, Status, Variable,
    VariableScope, VariableType,
};
use vm::scripted::{Script, ScriptedVm, Value};

// test suite "constructor"
#[ctor::ctor]
fn init() {
    if std::io::stderr().is_terminal() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    let _ = color_eyre::install();
}

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives one scripted VM under an agent on a background "VM thread".
struct TestHarness {
    agent: Arc<Agent<ScriptedVm>>,
    events: crossbeam_channel::Receiver<DebugEvent>,
    vm_thread: Option<JoinHandle<()>>,
}

impl TestHarness {
    /// Start `script` with a pause already requested, and wait until the
    /// VM parks on its first line.
    fn start_paused(vm: Arc<ScriptedVm>, script: Script) -> Self {
        let agent = Arc::new(Agent::new());
        let events = agent.subscribe();
        agent.pause().unwrap();
        let mut hook = agent.attach_vm(vm.clone());
        let vm_thread = thread::spawn(move || {
            vm.run(&script, &mut hook);
        });
        let mut harness = Self {
            agent,
            events,
            vm_thread: Some(vm_thread),
        };
        harness.wait_for_paused();
        harness
    }

    fn agent(&self) -> &Agent<ScriptedVm> {
        &self.agent
    }

    fn wait_for_event<F>(&mut self, message: &str, pred: F) -> DebugEvent
    where
        F: Fn(&DebugEvent) -> bool,
    {
        loop {
            let event = match self.events.recv_timeout(RECV_TIMEOUT) {
                Ok(event) => event,
                Err(e) => panic!("timeout waiting for {message} event: {e}"),
            };
            if pred(&event) {
                return event;
            }
            tracing::trace!(?event, "skipping non-matching event");
        }
    }

    fn wait_for_paused(&mut self) -> Status {
        let event = self.wait_for_event("paused status", |event| {
            matches!(
                event,
                DebugEvent::StatusChanged(status) if status.run_state == RunState::Paused
            )
        });
        match event {
            DebugEvent::StatusChanged(status) => status,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    fn wait_for_output(&mut self) -> OutputLine {
        let event = self.wait_for_event("output", |event| {
            matches!(event, DebugEvent::Output(_))
        });
        match event {
            DebugEvent::Output(line) => line,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// Resume and let the script run to completion.
    fn finish(mut self) {
        let _ = self.agent.continue_execution();
        if let Some(handle) = self.vm_thread.take() {
            handle.join().expect("vm thread panicked");
        }
    }
}

fn find_variable<'a>(variables: &'a [Variable], name: &str) -> &'a Variable {
    variables
        .iter()
        .find(|v| v.path_ui_string == name)
        .unwrap_or_else(|| panic!("no variable named {name:?} in {variables:?}"))
}

const FIRST_PAGE: PaginationInfo = PaginationInfo {
    begin_iterator: 0,
    count: 100,
};

const TEST_FILE: &str = "test.nut";
const BP_LINE: u32 = 58;
const BP_ID: u64 = 4322;

/// Globals, locals and script mirroring the canonical test program: a
/// `Vec` class, an instance `v0 = Vec(1, 2, 3)`, a nested global table
/// and a couple of primitive locals.
fn fixture() -> (Arc<ScriptedVm>, Script) {
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
    vm.set_global("Vec", vec_class.clone());

    let bar = vm.new_table([(Value::from(7), Value::from("q"))]);
    let foo = vm.new_table([(Value::from("bar"), bar)]);
    vm.set_global("foo", foo);

    let v0 = vm.new_instance(
        &vec_class,
        [
            ("x", Value::from(1)),
            ("y", Value::from(2)),
            ("z", Value::from(3)),
        ],
    );
    let arr = vm.new_array([Value::from(10), Value::from(20), Value::from(30)]);

    let script = Script::new()
        .call(
            "main",
            TEST_FILE,
            52,
            [
                ("strExp", Value::from("string expr")),
                ("v0", v0),
                ("arr", arr),
            ],
        )
        .line(52)
        .line(55)
        .line(BP_LINE)
        .print("hello from script", false)
        .line(60)
        .ret();

    (Arc::new(vm), script)
}

/// Harness paused at the canonical breakpoint (id 4322, line 58).
fn harness_at_breakpoint() -> TestHarness {
    let (vm, script) = fixture();
    let mut harness = TestHarness::start_paused(vm, script);

    let resolved = harness
        .agent()
        .set_file_breakpoints(TEST_FILE, &[CreateBreakpoint { id: BP_ID, line: BP_LINE }])
        .unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].verified);

    harness.agent().continue_execution().unwrap();
    let status = harness.wait_for_paused();
    assert_eq!(status.paused_at_breakpoint_id, BP_ID);
    assert_eq!(status.stack[0].line, BP_LINE);
    assert_eq!(status.stack[0].file, TEST_FILE);
    harness
}

#[test]
fn breakpoint_pause_and_local_read() {
    let mut harness = harness_at_breakpoint();

    let variables = harness
        .agent()
        .stack_variables(0, "", FIRST_PAGE)
        .unwrap();
    // locals come back in positional order
    let names: Vec<_> = variables.iter().map(|v| v.path_ui_string.clone()).collect();
    assert_eq!(names, ["strExp", "v0", "arr"]);
    assert!(variables.iter().all(|v| !v.editable));

    let str_exp = find_variable(&variables, "strExp");
    assert_eq!(str_exp.value, "string expr");
    assert_eq!(str_exp.value_type, VariableType::String);
    assert!(!str_exp.editable);

    // program output keeps flowing once resumed
    harness.agent().continue_execution().unwrap();
    let output = harness.wait_for_output();
    assert_eq!(output.text, "hello from script");
    assert_eq!(output.file, TEST_FILE);
    assert_eq!(output.line, BP_LINE);
    assert!(!output.is_err);

    harness.finish();
}

#[test]
fn instance_children_are_sorted_and_counted() {
    let harness = harness_at_breakpoint();

    let locals = harness.agent().stack_variables(0, "", FIRST_PAGE).unwrap();
    let v0 = find_variable(&locals, "v0");
    assert_eq!(v0.value_type, VariableType::Instance);
    assert_eq!(v0.instance_class_name, "Vec");
    assert_eq!(v0.child_count, 5);
    assert!(v0.value.starts_with("Vec {"));
    assert!(!v0.editable);

    let children = harness
        .agent()
        .stack_variables(0, &v0.path_iterator.to_string(), FIRST_PAGE)
        .unwrap();
    let names: Vec<_> = children.iter().map(|c| c.path_ui_string.clone()).collect();
    assert_eq!(names, ["Print", "constructor", "x", "y", "z"]);

    let x = find_variable(&children, "x");
    assert_eq!(x.value, "1");
    assert!(x.editable);
    let print = find_variable(&children, "Print");
    assert_eq!(print.value_type, VariableType::Closure);
    assert_eq!(print.value, "Print(1 params, 0 freevars)");
    assert!(!print.editable);

    harness.finish();
}

#[test]
fn set_instance_field_round_trips() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let locals = agent.stack_variables(0, "", FIRST_PAGE).unwrap();
    let v0 = find_variable(&locals, "v0");
    let children = agent
        .stack_variables(0, &v0.path_iterator.to_string(), FIRST_PAGE)
        .unwrap();
    let x = find_variable(&children, "x");

    let path = format_path(&[v0.path_iterator, x.path_iterator]);
    let updated = agent.set_stack_variable(0, &path, "99").unwrap();
    assert_eq!(updated.value, "99");
    assert_eq!(updated.value_type, VariableType::Integer);

    let children = agent
        .stack_variables(0, &v0.path_iterator.to_string(), FIRST_PAGE)
        .unwrap();
    assert_eq!(find_variable(&children, "x").value, "99");

    harness.finish();
}

#[test]
fn editable_children_survive_identity_writes() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let locals = agent.stack_variables(0, "", FIRST_PAGE).unwrap();
    let v0 = find_variable(&locals, "v0");
    let children = agent
        .stack_variables(0, &v0.path_iterator.to_string(), FIRST_PAGE)
        .unwrap();

    for child in children.iter().filter(|c| c.editable) {
        let path = format_path(&[v0.path_iterator, child.path_iterator]);
        let updated = agent.set_stack_variable(0, &path, &child.value).unwrap();
        assert_eq!(updated.value, child.value);
    }

    harness.finish();
}

#[test]
fn top_level_locals_cannot_be_set() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let locals = agent.stack_variables(0, "", FIRST_PAGE).unwrap();
    let str_exp = find_variable(&locals, "strExp");
    let err = agent
        .set_stack_variable(0, &str_exp.path_iterator.to_string(), "new value")
        .unwrap_err();
    assert_eq!(
        err.return_code(),
        transport::types::ReturnCode::InvalidParameter
    );

    // unchanged
    let locals = agent.stack_variables(0, "", FIRST_PAGE).unwrap();
    assert_eq!(find_variable(&locals, "strExp").value, "string expr");

    harness.finish();
}

#[test]
fn non_primitive_children_cannot_be_set() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let locals = agent.stack_variables(0, "", FIRST_PAGE).unwrap();
    let v0 = find_variable(&locals, "v0");
    let children = agent
        .stack_variables(0, &v0.path_iterator.to_string(), FIRST_PAGE)
        .unwrap();
    let print = find_variable(&children, "Print");

    let path = format_path(&[v0.path_iterator, print.path_iterator]);
    let err = agent.set_stack_variable(0, &path, "99").unwrap_err();
    assert_eq!(
        err.return_code(),
        transport::types::ReturnCode::InvalidParameter
    );

    harness.finish();
}

#[test]
fn array_children_index_and_write() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let locals = agent.stack_variables(0, "", FIRST_PAGE).unwrap();
    let arr = find_variable(&locals, "arr");
    assert_eq!(arr.value, "{ size=3 }");
    assert_eq!(arr.child_count, 3);

    let children = agent
        .stack_variables(0, &arr.path_iterator.to_string(), FIRST_PAGE)
        .unwrap();
    let values: Vec<_> = children.iter().map(|c| c.value.clone()).collect();
    assert_eq!(values, ["10", "20", "30"]);
    assert_eq!(children[1].path_ui_string, "1");
    assert_eq!(children[1].path_table_key_type, VariableType::Integer);

    let path = format_path(&[arr.path_iterator, 1]);
    let updated = agent.set_stack_variable(0, &path, "21").unwrap();
    assert_eq!(updated.value, "21");

    harness.finish();
}

#[test]
fn watch_resolves_bracket_expressions_globally() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let immediate = agent.evaluate(-1, "foo.bar[7]", FIRST_PAGE).unwrap();
    assert_eq!(immediate.variable.value, "q");
    assert_eq!(immediate.variable.value_type, VariableType::String);
    assert_eq!(immediate.scope, VariableScope::Global);
    assert_eq!(immediate.iterator_path.len(), 3);

    // evaluating twice is deterministic
    let again = agent.evaluate(-1, "foo.bar[7]", FIRST_PAGE).unwrap();
    assert_eq!(again.iterator_path, immediate.iterator_path);

    // the resolved path re-addresses the same value
    let parent_path = format_path(&immediate.iterator_path[..2]);
    let children = agent.global_variables(&parent_path, FIRST_PAGE).unwrap();
    let child = children
        .iter()
        .find(|c| c.path_iterator == immediate.iterator_path[2])
        .expect("resolved iterator addresses a child");
    assert_eq!(child.value, "q");

    harness.finish();
}

#[test]
fn watch_resolves_locals_and_literals() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let immediate = agent.evaluate(0, "strExp", FIRST_PAGE).unwrap();
    assert_eq!(immediate.scope, VariableScope::Local);
    assert_eq!(immediate.variable.value, "string expr");
    assert_eq!(immediate.iterator_path.len(), 1);
    assert!(!immediate.variable.editable);

    let immediate = agent.evaluate(0, "42", FIRST_PAGE).unwrap();
    assert_eq!(immediate.scope, VariableScope::Evaluation);
    assert!(immediate.iterator_path.is_empty());
    assert_eq!(immediate.variable.value, "42");

    let err = agent.evaluate(0, "foo.", FIRST_PAGE).unwrap_err();
    assert_eq!(
        err.return_code(),
        transport::types::ReturnCode::InvalidParameter
    );

    harness.finish();
}

#[test]
fn pagination_cap_is_enforced() {
    let harness = harness_at_breakpoint();
    let agent = harness.agent();

    let ok = agent.global_variables(
        "",
        PaginationInfo {
            begin_iterator: 0,
            count: 1000,
        },
    );
    assert!(ok.is_ok());

    let err = agent
        .global_variables(
            "",
            PaginationInfo {
                begin_iterator: 0,
                count: 1001,
            },
        )
        .unwrap_err();
    assert_eq!(
        err.return_code(),
        transport::types::ReturnCode::InvalidParameter
    );

    harness.finish();
}

#[test]
fn large_tables_fall_back_to_native_order() {
    let (vm, script) = fixture();

    let sorted = vm.new_table([]);
    for i in (0..999).rev() {
        vm.table_insert(&sorted, Value::from(format!("k{i:04}").as_str()), Value::from(i));
    }
    vm.set_global("sorted", sorted);

    let native = vm.new_table([]);
    for i in (0..1000).rev() {
        vm.table_insert(&native, Value::from(format!("k{i:04}").as_str()), Value::from(i));
    }
    vm.set_global("native", native);

    let harness = TestHarness::start_paused(vm, script);
    let agent = harness.agent();

    let globals = agent.global_variables("", FIRST_PAGE).unwrap();
    let sorted = find_variable(&globals, "sorted");
    let native = find_variable(&globals, "native");

    let page = PaginationInfo {
        begin_iterator: 0,
        count: 1000,
    };
    let children = agent
        .global_variables(&sorted.path_iterator.to_string(), page)
        .unwrap();
    assert_eq!(children.len(), 999);
    assert_eq!(children[0].path_ui_string, "k0000");
    assert!(children.windows(2).all(|w| w[0].path_ui_string <= w[1].path_ui_string));

    let children = agent
        .global_variables(&native.path_iterator.to_string(), page)
        .unwrap();
    assert_eq!(children.len(), 1000);
    // insertion order, which started from the highest key
    assert_eq!(children[0].path_ui_string, "k0999");

    harness.finish();
}

fn step_script() -> Script {
    Script::new()
        .call("main", "steps.nut", 10, [("a", Value::from(1))])
        .line(10)
        .line(11)
        .call("inner", "steps.nut", 20, [("b", Value::from(2))])
        .line(20)
        .line(21)
        .ret()
        .line(12)
        .ret()
}

#[test]
fn stepping_tracks_frame_depth() {
    let vm = Arc::new(ScriptedVm::new());
    let mut harness = TestHarness::start_paused(vm, step_script());
    let agent = harness.agent.clone();

    // paused on the first line of main
    agent.step_over().unwrap();
    let status = harness.wait_for_paused();
    assert_eq!(status.stack[0].line, 11);
    assert_eq!(status.stack.len(), 1);

    agent.step_in().unwrap();
    let status = harness.wait_for_paused();
    assert_eq!(status.stack.len(), 2);
    assert_eq!(status.stack[0].function, "inner");
    assert_eq!(status.stack[0].line, 20);
    assert_eq!(status.stack[1].function, "main");
    assert_eq!(status.stack[1].line, 11);

    agent.step_out().unwrap();
    let status = harness.wait_for_paused();
    assert_eq!(status.stack.len(), 1);
    assert_eq!(status.stack[0].function, "main");
    assert_eq!(status.stack[0].line, 12);

    harness.finish();
}

#[test]
fn step_over_skips_nested_calls() {
    let vm = Arc::new(ScriptedVm::new());
    let mut harness = TestHarness::start_paused(vm, step_script());
    let agent = harness.agent.clone();

    agent.step_over().unwrap();
    let status = harness.wait_for_paused();
    assert_eq!(status.stack[0].line, 11);

    // the call to inner runs through without pausing
    agent.step_over().unwrap();
    let status = harness.wait_for_paused();
    assert_eq!(status.stack.len(), 1);
    assert_eq!(status.stack[0].line, 12);

    harness.finish();
}

#[test]
fn detach_unparks_the_vm_thread() {
    let (vm, script) = fixture();
    let mut harness = TestHarness::start_paused(vm, script);
    let agent = harness.agent.clone();

    agent.detach_vm();

    // the VM thread leaves the dispatcher and finishes the script
    harness
        .vm_thread
        .take()
        .unwrap()
        .join()
        .expect("vm thread panicked");

    assert!(matches!(
        agent.continue_execution().unwrap_err().return_code(),
        transport::types::ReturnCode::InvalidNotPaused
    ));
    assert!(matches!(
        agent
            .stack_variables(0, "", FIRST_PAGE)
            .unwrap_err()
            .return_code(),
        transport::types::ReturnCode::InvalidNotPaused
    ));
}

#[test]
fn status_snapshot_reports_transitions() {
    let vm = Arc::new(ScriptedVm::new());
    let mut harness = TestHarness::start_paused(vm, step_script());
    let agent = harness.agent.clone();

    agent.send_status().unwrap();
    let status = harness.wait_for_paused();
    assert_eq!(status.run_state, RunState::Paused);
    assert!(!status.stack.is_empty());

    harness.finish();
}

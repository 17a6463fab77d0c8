//! Inspection primitives over the VM operand stack.
//!
//! Everything here operates on a value the caller has already pushed and
//! restores the stack on every exit path; [`StackScope`] backs that up in
//! debug builds. Child ordering: containers with fewer than 1 000 slots
//! are enumerated once, sorted by their rendered key and re-addressed by
//! native iterator, so the client sees stable alphabetic order without
//! quadratic cost. Larger containers fall back to native order.

use std::collections::{HashMap, HashSet};

use transport::types::{PaginationInfo, PathIterator, Variable, VariableType};
use vm::{ObjectType, StackIndex, Vm};

use crate::error::{RequestError, RequestResult};

/// Containers at or above this size are listed in native order.
pub(crate) const MAX_SORTED_CHILDREN: u64 = 1000;

/// Length cap for table/instance value summaries.
const MAX_SUMMARY_LENGTH: usize = 20;

pub(crate) fn to_variable_type(ty: ObjectType) -> VariableType {
    match ty {
        ObjectType::Null => VariableType::Null,
        ObjectType::Integer => VariableType::Integer,
        ObjectType::Float => VariableType::Float,
        ObjectType::Bool => VariableType::Bool,
        ObjectType::String => VariableType::String,
        ObjectType::Table => VariableType::Table,
        ObjectType::Array => VariableType::Array,
        ObjectType::UserData => VariableType::UserData,
        ObjectType::Closure => VariableType::Closure,
        ObjectType::NativeClosure => VariableType::NativeClosure,
        ObjectType::Generator => VariableType::Generator,
        ObjectType::UserPointer => VariableType::UserPointer,
        ObjectType::Thread => VariableType::Thread,
        ObjectType::FuncProto => VariableType::FuncProto,
        ObjectType::Class => VariableType::Class,
        ObjectType::Instance => VariableType::Instance,
        ObjectType::WeakRef => VariableType::WeakRef,
        ObjectType::Outer => VariableType::Outer,
    }
}

/// Resolve a relative index against the current stack top so it stays
/// valid while we push below it.
pub(crate) fn absolute<V: Vm + ?Sized>(vm: &V, idx: StackIndex) -> StackIndex {
    if idx < 0 {
        vm.top() as StackIndex + idx
    } else {
        idx
    }
}

/// Rendering of a primitive slot; `None` for containers and the rest.
fn primitive_display<V: Vm + ?Sized>(vm: &V, idx: StackIndex) -> Option<String> {
    match vm.object_type(idx) {
        ObjectType::Bool => vm.get_bool(idx).map(|b| b.to_string()),
        ObjectType::Integer => vm.get_integer(idx).map(|v| v.to_string()),
        ObjectType::Float => vm.get_float(idx).map(|v| v.to_string()),
        ObjectType::String => vm.get_string(idx),
        _ => None,
    }
}

/// Human-readable summary of the value at `idx`: primitives exactly,
/// arrays as `{ size=N }`, tables and instances as a bounded `{k: v, …}`
/// listing, closures as `name(P params, F freevars)`.
pub(crate) fn display_value<V: Vm + ?Sized>(vm: &V, idx: StackIndex) -> String {
    let idx = absolute(vm, idx);
    match vm.object_type(idx) {
        ObjectType::Bool | ObjectType::Integer | ObjectType::Float | ObjectType::String => {
            primitive_display(vm, idx).unwrap_or_default()
        }
        ObjectType::Closure => {
            let name = vm
                .closure_name(idx)
                .unwrap_or_else(|| "(anonymous)".to_string());
            match vm.closure_info(idx) {
                Some((params, freevars)) => {
                    format!("{name}({params} params, {freevars} freevars)")
                }
                None => name,
            }
        }
        ObjectType::Class => {
            class_full_name(vm, idx).unwrap_or_else(|| "(unknown)".to_string())
        }
        ObjectType::Array => {
            format!("{{ size={} }}", vm.size(idx).unwrap_or(0))
        }
        ObjectType::Instance => {
            let class = instance_class_name(vm, idx).unwrap_or_else(|| "(unknown)".to_string());
            format!("{class} {}", container_summary(vm, idx))
        }
        ObjectType::Table => container_summary(vm, idx),
        other => other.type_name().to_string(),
    }
}

/// `{k: v, …}` over the container's primitive-valued slots, truncated at
/// [`MAX_SUMMARY_LENGTH`] characters of content.
fn container_summary<V: Vm + ?Sized>(vm: &V, idx: StackIndex) -> String {
    let idx = absolute(vm, idx);
    let mut out = String::from("{");

    let count = vm.size(idx).unwrap_or(0);
    if count < MAX_SORTED_CHILDREN {
        for (key, iter) in sorted_children(vm, idx) {
            if out.len() - 1 >= MAX_SUMMARY_LENGTH {
                break;
            }
            vm.push_integer(iter as i64);
            if !vm.next(idx) {
                vm.pop(1);
                break;
            }
            if let Some(value) = primitive_display(vm, -1) {
                if out.len() > 1 {
                    out.push_str(", ");
                }
                out.push_str(&key);
                out.push_str(": ");
                out.push_str(&value);
            }
            vm.pop(3);
        }
    } else {
        vm.push_integer(0);
        loop {
            if out.len() - 1 >= MAX_SUMMARY_LENGTH {
                break;
            }
            if !vm.next(idx) {
                break;
            }
            if let Some(value) = primitive_display(vm, -1) {
                let key = primitive_display(vm, -2).unwrap_or_default();
                if out.len() > 1 {
                    out.push_str(", ");
                }
                out.push_str(&key);
                out.push_str(": ");
                out.push_str(&value);
            }
            vm.pop(2);
        }
        vm.pop(1);
    }

    out.push('}');
    out
}

/// Enumerate the container at `idx` once, returning `(rendered key,
/// native iterator)` pairs sorted by key.
pub(crate) fn sorted_children<V: Vm + ?Sized>(vm: &V, idx: StackIndex) -> Vec<(String, u64)> {
    let idx = absolute(vm, idx);
    let mut out = Vec::new();
    vm.push_integer(0);
    loop {
        let Some(iter) = vm.get_integer(-1) else {
            break;
        };
        if !vm.next(idx) {
            break;
        }
        vm.pop(1); // value
        out.push((display_value(vm, -1), iter as u64));
        vm.pop(1); // key
    }
    vm.pop(1); // iterator
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Qualified name of the instance's class at `idx`.
pub(crate) fn instance_class_name<V: Vm + ?Sized>(vm: &V, idx: StackIndex) -> Option<String> {
    let idx = absolute(vm, idx);
    if !vm.push_class_of(idx) {
        return None;
    }
    let name = class_full_name(vm, -1);
    vm.pop(1);
    name
}

/// Resolve the dotted name of the class at `idx`.
///
/// Classes do not carry their own name: the resolver walks the root
/// table collecting `hash -> qualified name` for every reachable class,
/// then falls back to scanning every frame's locals. A seen-hash set
/// terminates on self-referencing tables.
pub(crate) fn class_full_name<V: Vm + ?Sized>(vm: &V, idx: StackIndex) -> Option<String> {
    let idx = absolute(vm, idx);
    let target = vm.object_hash(idx)?;

    let mut names = HashMap::new();
    let mut seen = HashSet::new();
    vm.push_root_table();
    collect_class_names(vm, absolute(vm, -1), "", &mut names, &mut seen);
    vm.pop(1);
    if let Some(name) = names.get(&target) {
        return Some(name.clone());
    }

    let mut frame = 0u32;
    while vm.frame_info(frame).is_some() {
        let mut seq = 0u64;
        while let Some(local_name) = vm.push_local(frame, seq) {
            match vm.object_type(-1) {
                ObjectType::Table => {
                    collect_class_names(vm, absolute(vm, -1), "", &mut names, &mut seen);
                }
                ObjectType::Class => {
                    if vm.object_hash(-1) == Some(target) {
                        vm.pop(1);
                        return Some(local_name);
                    }
                }
                _ => {}
            }
            vm.pop(1);
            seq += 1;
        }
        frame += 1;
    }

    names.get(&target).cloned()
}

fn collect_class_names<V: Vm + ?Sized>(
    vm: &V,
    table_idx: StackIndex,
    namespace: &str,
    names: &mut HashMap<u64, String>,
    seen: &mut HashSet<u64>,
) {
    let Some(hash) = vm.object_hash(table_idx) else {
        return;
    };
    if !seen.insert(hash) {
        return;
    }

    vm.push_integer(0);
    loop {
        if vm.get_integer(-1).is_none() {
            break;
        }
        if !vm.next(table_idx) {
            break;
        }
        let ty = vm.object_type(-1);
        if matches!(ty, ObjectType::Table | ObjectType::Class) {
            if let Some(key) = vm.get_string(-2) {
                let qualified = if namespace.is_empty() {
                    key
                } else {
                    format!("{namespace}.{key}")
                };
                if ty == ObjectType::Class {
                    if let Some(class_hash) = vm.object_hash(-1) {
                        names.entry(class_hash).or_insert(qualified);
                    }
                } else {
                    collect_class_names(vm, absolute(vm, -1), &qualified, names, seen);
                }
            }
        }
        vm.pop(2);
    }
    vm.pop(1);
}

/// Describe the value on top of the stack. Path fields and editability
/// are the caller's to fill in.
pub(crate) fn build_variable<V: Vm + ?Sized>(vm: &V) -> Variable {
    let ty = to_variable_type(vm.object_type(-1));
    let mut variable = Variable {
        value_type: ty,
        value: display_value(vm, -1),
        value_raw_address: vm.raw_address(-1),
        ..Default::default()
    };
    match ty {
        VariableType::Instance => {
            variable.instance_class_name = instance_class_name(vm, -1).unwrap_or_default();
            variable.child_count = vm.size(-1).unwrap_or(0) as u32;
        }
        VariableType::Array | VariableType::Table => {
            variable.child_count = vm.size(-1).unwrap_or(0) as u32;
        }
        _ => {}
    }
    variable
}

/// Build the child whose key and value sit on top of the stack
/// (`… key value`), popping both.
pub(crate) fn child_from_iteration<V: Vm + ?Sized>(vm: &V, iter: u64) -> Variable {
    let mut variable = build_variable(vm);
    variable.editable = variable.value_type.is_editable_primitive();
    vm.pop(1); // value
    variable.path_iterator = iter;
    variable.path_ui_string = display_value(vm, -1);
    variable.path_table_key_type = to_variable_type(vm.object_type(-1));
    vm.pop(1); // key
    variable
}

/// List one page of children of the container on top of the stack.
///
/// For arrays `begin_iterator` is the starting index; for sorted
/// containers it is the offset into the sorted enumeration; for large
/// containers it is the native iterator to resume from.
pub(crate) fn list_children<V: Vm + ?Sized>(
    vm: &V,
    pagination: PaginationInfo,
) -> RequestResult<Vec<Variable>> {
    let container = absolute(vm, -1);
    let mut out = Vec::new();

    match vm.object_type(container) {
        ObjectType::Array => {
            vm.push_integer(pagination.begin_iterator as i64);
            for _ in 0..pagination.count {
                let Some(iter) = vm.get_integer(-1) else {
                    break;
                };
                if !vm.next(container) {
                    break;
                }
                out.push(child_from_iteration(vm, iter as u64));
            }
            vm.pop(1);
        }
        ObjectType::Table | ObjectType::Instance => {
            let count = vm.size(container).unwrap_or(0);
            if count < MAX_SORTED_CHILDREN {
                let begin = pagination.begin_iterator as usize;
                for (_, iter) in sorted_children(vm, container)
                    .into_iter()
                    .skip(begin)
                    .take(pagination.count as usize)
                {
                    vm.push_integer(iter as i64);
                    if !vm.next(container) {
                        vm.pop(1);
                        break;
                    }
                    out.push(child_from_iteration(vm, iter));
                    vm.pop(1); // iterator
                }
            } else {
                vm.push_integer(pagination.begin_iterator as i64);
                for _ in 0..pagination.count {
                    let Some(iter) = vm.get_integer(-1) else {
                        break;
                    };
                    if !vm.next(container) {
                        break;
                    }
                    out.push(child_from_iteration(vm, iter as u64));
                }
                vm.pop(1);
            }
        }
        _ => {}
    }

    Ok(out)
}

/// Descend the container on top of the stack along `path`, then run `f`
/// with the addressed value on top. The stack is restored afterwards.
pub(crate) fn with_path_target<V: Vm + ?Sized, R, F>(
    vm: &V,
    path: &[PathIterator],
    f: F,
) -> RequestResult<R>
where
    F: FnOnce(&V) -> RequestResult<R>,
{
    let Some((&element, rest)) = path.split_first() else {
        return f(vm);
    };

    let container = absolute(vm, -1);
    match vm.object_type(container) {
        ObjectType::Array => {
            let size = vm.size(container).unwrap_or(0);
            if element >= size {
                return Err(RequestError::invalid_parameter(format!(
                    "array index {element} out of bounds (size {size})"
                )));
            }
            vm.push_integer(element as i64);
            if !vm.get_slot(container) {
                return Err(RequestError::invalid_parameter(format!(
                    "failed to read array index {element}"
                )));
            }
            let result = with_path_target(vm, rest, f);
            vm.pop(1);
            result
        }
        ObjectType::Table | ObjectType::Instance => {
            vm.push_integer(element as i64);
            if !vm.next(container) {
                vm.pop(1);
                return Err(RequestError::invalid_parameter(format!(
                    "iterator {element} does not address a child"
                )));
            }
            let result = with_path_target(vm, rest, f);
            vm.pop(3); // value, key, iterator
            result
        }
        other => Err(RequestError::invalid_parameter(format!(
            "cannot descend into a value of type {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm::scripted::{ScriptedVm, Value};
    use vm::StackScope;

    #[test]
    fn table_children_sort_alphabetically() {
        let vm = ScriptedVm::new();
        let table = vm.new_table([
            (Value::from("zeta"), Value::from(1)),
            (Value::from("alpha"), Value::from(2)),
            (Value::from("mid"), Value::from(3)),
        ]);
        vm.set_global("t", table);

        vm.push_root_table();
        vm.push_integer(0);
        assert!(vm.next(-2));
        let scope = StackScope::new(&vm);
        let children = list_children(&vm, PaginationInfo::first_page()).unwrap();
        drop(scope);
        let keys: Vec<_> = children.iter().map(|c| c.path_ui_string.clone()).collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
        assert!(children.iter().all(|c| c.editable));
        vm.pop(3);
        vm.pop(1);
    }

    #[test]
    fn array_summary_reports_size() {
        let vm = ScriptedVm::new();
        let array = vm.new_array([Value::from(1), Value::from(2), Value::from(3)]);
        vm.set_global("a", array);

        vm.push_root_table();
        let children = list_children(&vm, PaginationInfo::first_page()).unwrap();
        vm.pop(1);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].value, "{ size=3 }");
        assert_eq!(children[0].child_count, 3);
    }

    #[test]
    fn class_names_resolve_through_namespaces() {
        let vm = ScriptedVm::new();
        let class = vm.new_class([("x", Value::from(0))]);
        let namespace = vm.new_table([(Value::from("Vec"), class.clone())]);
        vm.set_global("math", namespace);
        vm.set_global("v", vm.new_instance(&class, []));

        vm.push_root_table();
        vm.push_string("v");
        assert!(vm.get_slot(-2));
        assert_eq!(instance_class_name(&vm, -1).as_deref(), Some("math.Vec"));
        vm.pop(2);
    }

    #[test]
    fn cyclic_tables_terminate() {
        let vm = ScriptedVm::new();
        // a table that contains itself
        let cyc = vm.new_table([]);
        vm.table_insert(&cyc, Value::from("me"), cyc.clone());
        vm.set_global("cyc", cyc);
        let class = vm.new_class([]);
        vm.set_global("C", class.clone());
        vm.set_global("inst", vm.new_instance(&class, []));

        vm.push_root_table();
        vm.push_string("inst");
        assert!(vm.get_slot(-2));
        assert_eq!(instance_class_name(&vm, -1).as_deref(), Some("C"));
        vm.pop(2);
    }

    #[test]
    fn summary_truncates_around_twenty_chars() {
        let vm = ScriptedVm::new();
        let table = vm.new_table([
            (Value::from("aaaa"), Value::from("000000")),
            (Value::from("bbbb"), Value::from("111111")),
            (Value::from("cccc"), Value::from("222222")),
            (Value::from("dddd"), Value::from("333333")),
        ]);
        vm.set_global("t", table);

        vm.push_root_table();
        vm.push_string("t");
        assert!(vm.get_slot(-2));
        let rendered = display_value(&vm, -1);
        vm.pop(2);
        assert!(rendered.starts_with('{') && rendered.ends_with('}'));
        // bounded: never the full four entries
        assert!(rendered.len() < 4 * 12);
        assert!(rendered.contains("aaaa: 000000"));
    }
}

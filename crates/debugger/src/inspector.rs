//! Variable listing, mutation and watch resolution.
//!
//! Every operation here runs on a request thread while the VM thread is
//! parked; the agent enforces that before calling in. Paths address
//! values as described on the wire: the first element picks a root (a
//! positional local for stack paths, a root-table child for global
//! paths), every further element steps into one child by array index or
//! native iterator.

use transport::types::{
    ImmediateValue, PaginationInfo, PathError, PathIterator, Variable, VariableScope,
    VariableType, MAX_PAGE_SIZE,
};
use vm::{ObjectType, StackIndex, StackScope, Vm};

use crate::error::{RequestError, RequestResult};
use crate::expr::{self, Accessor, Expression, Primary};
use crate::walk;

fn validate_pagination(pagination: PaginationInfo) -> RequestResult<()> {
    if pagination.count > MAX_PAGE_SIZE {
        return Err(RequestError::invalid_parameter(format!(
            "page size {} exceeds the maximum of {MAX_PAGE_SIZE}",
            pagination.count
        )));
    }
    Ok(())
}

fn parse_path(path: &str) -> RequestResult<Vec<PathIterator>> {
    transport::types::parse_path(path).map_err(|e: PathError| {
        RequestError::invalid_parameter(format!("bad variable path: {e}"))
    })
}

fn require_frame<V: Vm + ?Sized>(vm: &V, frame: u32) -> RequestResult<()> {
    if vm.frame_info(frame).is_none() {
        return Err(RequestError::invalid_parameter(format!(
            "no stack frame {frame}"
        )));
    }
    Ok(())
}

pub(crate) fn stack_variables<V: Vm + ?Sized>(
    vm: &V,
    frame: u32,
    path: &str,
    pagination: PaginationInfo,
) -> RequestResult<Vec<Variable>> {
    validate_pagination(pagination)?;
    let path = parse_path(path)?;
    require_frame(vm, frame)?;
    let _scope = StackScope::new(vm);

    let Some((&root, rest)) = path.split_first() else {
        // Root listing: the frame's locals in positional order. Locals
        // are never editable directly (the VM exposes no local-slot
        // setter), so the flag stays off here.
        let mut out = Vec::new();
        let begin = pagination.begin_iterator;
        for seq in begin..begin.saturating_add(pagination.count as u64) {
            let Some(name) = vm.push_local(frame, seq) else {
                break;
            };
            let mut variable = walk::build_variable(vm);
            variable.path_iterator = seq;
            variable.path_ui_string = name;
            variable.editable = false;
            vm.pop(1);
            out.push(variable);
        }
        return Ok(out);
    };

    if vm.push_local(frame, root).is_none() {
        return Err(RequestError::invalid_parameter(format!(
            "no local {root} in frame {frame}"
        )));
    }
    let result = walk::with_path_target(vm, rest, |vm| walk::list_children(vm, pagination));
    vm.pop(1);
    result
}

pub(crate) fn global_variables<V: Vm + ?Sized>(
    vm: &V,
    path: &str,
    pagination: PaginationInfo,
) -> RequestResult<Vec<Variable>> {
    validate_pagination(pagination)?;
    let path = parse_path(path)?;
    let _scope = StackScope::new(vm);

    vm.push_root_table();
    let result = walk::with_path_target(vm, &path, |vm| walk::list_children(vm, pagination));
    vm.pop(1);
    result
}

/// Value parsed against the type of the slot it will overwrite.
enum ParsedValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

fn parse_typed(ty: VariableType, raw: &str) -> RequestResult<ParsedValue> {
    match ty {
        VariableType::Bool => match raw.trim() {
            "true" => Ok(ParsedValue::Bool(true)),
            "false" => Ok(ParsedValue::Bool(false)),
            _ => Err(RequestError::invalid_parameter(format!(
                "{raw:?} is not a bool"
            ))),
        },
        VariableType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(ParsedValue::Integer)
            .map_err(|_| RequestError::invalid_parameter(format!("{raw:?} is not an integer"))),
        VariableType::Float => raw
            .trim()
            .parse::<f64>()
            .map(ParsedValue::Float)
            .map_err(|_| RequestError::invalid_parameter(format!("{raw:?} is not a float"))),
        VariableType::String => Ok(ParsedValue::String(raw.to_string())),
        other => Err(RequestError::invalid_parameter(format!(
            "values of type {other:?} cannot be set"
        ))),
    }
}

fn push_parsed<V: Vm + ?Sized>(vm: &V, value: &ParsedValue) {
    match value {
        ParsedValue::Bool(v) => vm.push_bool(*v),
        ParsedValue::Integer(v) => vm.push_integer(*v),
        ParsedValue::Float(v) => vm.push_float(*v),
        ParsedValue::String(v) => vm.push_string(v),
    }
}

pub(crate) fn set_stack_variable<V: Vm + ?Sized>(
    vm: &V,
    frame: u32,
    path: &str,
    new_value: &str,
) -> RequestResult<Variable> {
    let path = parse_path(path)?;
    if path.len() < 2 {
        return Err(RequestError::invalid_parameter(
            "top-level locals cannot be set; the path must address a child value",
        ));
    }
    require_frame(vm, frame)?;
    let _scope = StackScope::new(vm);

    if vm.push_local(frame, path[0]).is_none() {
        return Err(RequestError::invalid_parameter(format!(
            "no local {} in frame {frame}",
            path[0]
        )));
    }
    let Some((last, parents)) = path[1..].split_last() else {
        return Err(RequestError::invalid_parameter("path must address a child"));
    };
    let result = walk::with_path_target(vm, parents, |vm| set_child(vm, *last, new_value));
    vm.pop(1);
    result
}

/// Overwrite the child addressed by `element` of the container on top of
/// the stack, and return its refreshed description.
fn set_child<V: Vm + ?Sized>(
    vm: &V,
    element: PathIterator,
    new_value: &str,
) -> RequestResult<Variable> {
    let container = walk::absolute(vm, -1);
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
                return Err(RequestError::internal("failed to read array slot"));
            }
            let existing = walk::to_variable_type(vm.object_type(-1));
            vm.pop(1);
            let parsed = parse_typed(existing, new_value)?;

            vm.push_integer(element as i64);
            push_parsed(vm, &parsed);
            if !vm.set_slot(container) {
                return Err(RequestError::internal("failed to write array slot"));
            }

            vm.push_integer(element as i64);
            if !vm.get_slot(container) {
                return Err(RequestError::internal("failed to re-read array slot"));
            }
            let mut variable = walk::build_variable(vm);
            variable.editable = true;
            variable.path_iterator = element;
            variable.path_ui_string = element.to_string();
            variable.path_table_key_type = VariableType::Integer;
            vm.pop(1);
            Ok(variable)
        }
        ObjectType::Table | ObjectType::Instance => {
            vm.push_integer(element as i64);
            if !vm.next(container) {
                vm.pop(1);
                return Err(RequestError::invalid_parameter(format!(
                    "iterator {element} does not address a child"
                )));
            }
            let existing = walk::to_variable_type(vm.object_type(-1));
            let parsed = match parse_typed(existing, new_value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    vm.pop(3);
                    return Err(e);
                }
            };
            vm.pop(1); // old value; the key stays for the write
            push_parsed(vm, &parsed);
            if !vm.set_slot(container) {
                vm.pop(1); // iterator
                return Err(RequestError::internal("failed to write slot"));
            }
            vm.pop(1); // iterator

            vm.push_integer(element as i64);
            if !vm.next(container) {
                vm.pop(1);
                return Err(RequestError::internal("slot vanished after write"));
            }
            let variable = walk::child_from_iteration(vm, element);
            vm.pop(1); // iterator
            Ok(variable)
        }
        other => Err(RequestError::invalid_parameter(format!(
            "cannot set a child of a value of type {}",
            other.type_name()
        ))),
    }
}

/// Primitive key resolved from a watch accessor.
enum KeyValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl KeyValue {
    fn display(&self) -> String {
        match self {
            KeyValue::Integer(v) => v.to_string(),
            KeyValue::Float(v) => v.to_string(),
            KeyValue::Bool(v) => v.to_string(),
            KeyValue::String(v) => v.clone(),
        }
    }

    fn variable_type(&self) -> VariableType {
        match self {
            KeyValue::Integer(_) => VariableType::Integer,
            KeyValue::Float(_) => VariableType::Float,
            KeyValue::Bool(_) => VariableType::Bool,
            KeyValue::String(_) => VariableType::String,
        }
    }
}

fn extract_primitive_key<V: Vm + ?Sized>(vm: &V) -> RequestResult<KeyValue> {
    match vm.object_type(-1) {
        ObjectType::Integer => Ok(KeyValue::Integer(vm.get_integer(-1).unwrap_or(0))),
        ObjectType::Float => Ok(KeyValue::Float(vm.get_float(-1).unwrap_or(0.0))),
        ObjectType::Bool => Ok(KeyValue::Bool(vm.get_bool(-1).unwrap_or(false))),
        ObjectType::String => Ok(KeyValue::String(vm.get_string(-1).unwrap_or_default())),
        other => Err(RequestError::invalid_parameter(format!(
            "accessor expression resolved to {}, expected a primitive",
            other.type_name()
        ))),
    }
}

/// Find the native iterator of the child of `container` whose key equals
/// `key`. Restores the stack.
fn find_child_iterator<V: Vm + ?Sized>(
    vm: &V,
    container: StackIndex,
    key: &KeyValue,
) -> Option<u64> {
    let mut found = None;
    vm.push_integer(0);
    loop {
        let Some(iter) = vm.get_integer(-1) else {
            break;
        };
        if !vm.next(container) {
            break;
        }
        let matches = match key {
            KeyValue::Integer(v) => vm.get_integer(-2) == Some(*v),
            KeyValue::Float(v) => vm.get_float(-2) == Some(*v),
            KeyValue::Bool(v) => vm.get_bool(-2) == Some(*v),
            KeyValue::String(v) => vm.get_string(-2).as_deref() == Some(v.as_str()),
        };
        vm.pop(2);
        if matches {
            found = Some(iter as u64);
            break;
        }
    }
    vm.pop(1);
    found
}

/// Where a watch resolved, plus how to describe its final link.
struct ResolvedWatch {
    scope: VariableScope,
    path: Vec<PathIterator>,
    ui: String,
    key_type: VariableType,
}

pub(crate) fn immediate_value<V: Vm + ?Sized>(
    vm: &V,
    frame: Option<u32>,
    expression: &str,
    pagination: PaginationInfo,
) -> RequestResult<ImmediateValue> {
    validate_pagination(pagination)?;
    if let Some(frame) = frame {
        require_frame(vm, frame)?;
    }
    let expression = expr::parse(expression).map_err(|e| {
        tracing::debug!(offset = e.offset, error = %e, "watch parse error");
        RequestError::invalid_parameter(format!("cannot parse watch expression: {e}"))
    })?;

    let guard = StackScope::new(vm);
    let entry = guard.entry_depth();

    let result = eval_expression(vm, frame, &expression).map(|resolved| {
        let mut variable = walk::build_variable(vm);
        variable.path_iterator = resolved.path.last().copied().unwrap_or(0);
        variable.path_ui_string = resolved.ui.clone();
        variable.path_table_key_type = resolved.key_type;
        variable.editable = variable.value_type.is_editable_primitive()
            && match resolved.scope {
                VariableScope::Evaluation => false,
                VariableScope::Local => resolved.path.len() >= 2,
                VariableScope::Global => true,
            };
        ImmediateValue {
            variable,
            scope: resolved.scope,
            iterator_path: resolved.path,
        }
    });

    // Evaluation leaves the result and every intermediate container on
    // the stack; unwind the lot in one go.
    vm.pop(vm.top().saturating_sub(entry));
    result
}

/// Evaluate `expr`, leaving its value on top of the stack (intermediate
/// containers stay below it; the caller unwinds to the entry depth).
fn eval_expression<V: Vm + ?Sized>(
    vm: &V,
    frame: Option<u32>,
    expr: &Expression,
) -> RequestResult<ResolvedWatch> {
    let mut path = Vec::new();
    let scope;
    let mut ui;
    let mut key_type;

    match &expr.root {
        Primary::Identifier(name) => {
            let mut local_index = None;
            if let Some(frame) = frame {
                let mut seq = 0u64;
                while let Some(local) = vm.push_local(frame, seq) {
                    if local == *name {
                        local_index = Some(seq);
                        break;
                    }
                    vm.pop(1);
                    seq += 1;
                }
            }
            match local_index {
                Some(seq) => {
                    scope = VariableScope::Local;
                    path.push(seq);
                    key_type = VariableType::Null;
                }
                None => {
                    vm.push_root_table();
                    let root = walk::absolute(vm, -1);
                    let key = KeyValue::String(name.clone());
                    let iter = find_child_iterator(vm, root, &key).ok_or_else(|| {
                        RequestError::invalid_parameter(format!("unknown identifier {name:?}"))
                    })?;
                    vm.push_integer(iter as i64);
                    if !vm.next(root) {
                        return Err(RequestError::internal("global slot vanished"));
                    }
                    scope = VariableScope::Global;
                    path.push(iter);
                    key_type = VariableType::String;
                }
            }
            ui = name.clone();
        }
        Primary::Number(value) => {
            if !expr.accessors.is_empty() {
                return Err(RequestError::invalid_parameter(
                    "a literal cannot be indexed",
                ));
            }
            vm.push_integer(*value);
            return Ok(ResolvedWatch {
                scope: VariableScope::Evaluation,
                path,
                ui: value.to_string(),
                key_type: VariableType::Null,
            });
        }
        Primary::String(value) => {
            if !expr.accessors.is_empty() {
                return Err(RequestError::invalid_parameter(
                    "a literal cannot be indexed",
                ));
            }
            vm.push_string(value);
            return Ok(ResolvedWatch {
                scope: VariableScope::Evaluation,
                path,
                ui: value.clone(),
                key_type: VariableType::Null,
            });
        }
    }

    for accessor in &expr.accessors {
        let container = walk::absolute(vm, -1);
        let key = match accessor {
            Accessor::Member(name) => KeyValue::String(name.clone()),
            Accessor::Subscript(inner) => {
                eval_expression(vm, frame, inner)?;
                let key = extract_primitive_key(vm)?;
                vm.pop(vm.top().saturating_sub(container as usize + 1));
                key
            }
        };

        match vm.object_type(container) {
            ObjectType::Array => {
                let KeyValue::Integer(index) = key else {
                    return Err(RequestError::invalid_parameter(
                        "array index must be an integer",
                    ));
                };
                let size = vm.size(container).unwrap_or(0);
                if index < 0 || index as u64 >= size {
                    return Err(RequestError::invalid_parameter(format!(
                        "array index {index} out of bounds (size {size})"
                    )));
                }
                vm.push_integer(index);
                if !vm.get_slot(container) {
                    return Err(RequestError::internal("failed to read array slot"));
                }
                path.push(index as u64);
                ui = index.to_string();
                key_type = VariableType::Integer;
            }
            ObjectType::Table | ObjectType::Instance => {
                let iter = find_child_iterator(vm, container, &key).ok_or_else(|| {
                    RequestError::invalid_parameter(format!(
                        "no child {:?} in container",
                        key.display()
                    ))
                })?;
                vm.push_integer(iter as i64);
                if !vm.next(container) {
                    return Err(RequestError::internal("slot vanished during walk"));
                }
                path.push(iter);
                ui = key.display();
                key_type = key.variable_type();
            }
            other => {
                return Err(RequestError::invalid_parameter(format!(
                    "cannot index into a value of type {}",
                    other.type_name()
                )))
            }
        }
    }

    Ok(ResolvedWatch {
        scope,
        path,
        ui,
        key_type,
    })
}

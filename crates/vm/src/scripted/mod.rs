//! An in-memory VM that replays a scripted program.
//!
//! [`ScriptedVm`] implements [`Vm`](crate::Vm) over a heap of tables,
//! arrays, classes, instances and closures, and replays a [`Script`] of
//! call/line/return/print steps through a [`HookSink`](crate::HookSink).
//! It exists so the debug agent can be exercised end-to-end without an
//! embedded interpreter; production hosts implement the trait over their
//! FFI handle instead.
//!
//! Strings are value types here (no heap identity), so only containers
//! and closures report a raw address.

mod program;

pub use program::{Script, Step};

use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{FrameInfo, ObjectType};
use crate::vm::{StackIndex, Vm};

/// Handle to an object on the scripted heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjId(usize);

/// One scripted VM value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(Arc<str>),
    Object(ObjId),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

#[derive(Debug)]
enum HeapEntry {
    Table {
        slots: Vec<(Value, Value)>,
    },
    Array {
        items: Vec<Value>,
    },
    Class {
        members: Vec<(Arc<str>, Value)>,
    },
    Instance {
        class: ObjId,
        fields: Vec<(Arc<str>, Value)>,
    },
    Closure {
        name: Option<Arc<str>>,
        params: u64,
        freevars: u64,
    },
}

#[derive(Debug)]
struct Frame {
    function: Arc<str>,
    source: Arc<str>,
    line: u32,
    locals: Vec<(Arc<str>, Value)>,
}

#[derive(Debug, Default)]
struct State {
    heap: Vec<HeapEntry>,
    /// Innermost frame last.
    frames: Vec<Frame>,
    stack: Vec<Value>,
}

impl State {
    fn alloc(&mut self, entry: HeapEntry) -> ObjId {
        self.heap.push(entry);
        ObjId(self.heap.len() - 1)
    }

    fn resolve(&self, idx: StackIndex) -> Option<usize> {
        let len = self.stack.len() as isize;
        let absolute = if idx < 0 { len + idx } else { idx };
        if (0..len).contains(&absolute) {
            Some(absolute as usize)
        } else {
            None
        }
    }

    fn value_at(&self, idx: StackIndex) -> Option<&Value> {
        self.resolve(idx).map(|i| &self.stack[i])
    }

    /// Children of a container in native order: `(key, value)` pairs.
    /// For instances the key order is the class declaration order and
    /// field values override the class defaults.
    fn child_at(&self, obj: ObjId, n: usize) -> Option<(Value, Value)> {
        match &self.heap[obj.0] {
            HeapEntry::Table { slots } => slots.get(n).cloned(),
            HeapEntry::Array { items } => items
                .get(n)
                .map(|item| (Value::Integer(n as i64), item.clone())),
            HeapEntry::Instance { class, fields } => {
                let HeapEntry::Class { members } = &self.heap[class.0] else {
                    return None;
                };
                let (name, default) = members.get(n)?;
                let value = fields
                    .iter()
                    .find(|(field, _)| field == name)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_else(|| default.clone());
                Some((Value::String(name.clone()), value))
            }
            _ => None,
        }
    }

    fn container_len(&self, obj: ObjId) -> Option<u64> {
        match &self.heap[obj.0] {
            HeapEntry::Table { slots } => Some(slots.len() as u64),
            HeapEntry::Array { items } => Some(items.len() as u64),
            HeapEntry::Instance { class, .. } => match &self.heap[class.0] {
                HeapEntry::Class { members } => Some(members.len() as u64),
                _ => None,
            },
            HeapEntry::Class { members } => Some(members.len() as u64),
            HeapEntry::Closure { .. } => None,
        }
    }
}

/// In-memory scripted VM. Cheap to share; all state sits behind one
/// mutex, which is never held across a hook callback.
pub struct ScriptedVm {
    root: ObjId,
    state: Mutex<State>,
}

impl Default for ScriptedVm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedVm {
    pub fn new() -> Self {
        let mut state = State::default();
        let root = state.alloc(HeapEntry::Table { slots: Vec::new() });
        Self {
            root,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("scripted vm poisoned")
    }

    pub fn new_table(&self, slots: impl IntoIterator<Item = (Value, Value)>) -> Value {
        let mut state = self.lock();
        let id = state.alloc(HeapEntry::Table {
            slots: slots.into_iter().collect(),
        });
        Value::Object(id)
    }

    pub fn new_array(&self, items: impl IntoIterator<Item = Value>) -> Value {
        let mut state = self.lock();
        let id = state.alloc(HeapEntry::Array {
            items: items.into_iter().collect(),
        });
        Value::Object(id)
    }

    pub fn new_class<'a>(&self, members: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
        let mut state = self.lock();
        let id = state.alloc(HeapEntry::Class {
            members: members
                .into_iter()
                .map(|(name, value)| (Arc::from(name), value))
                .collect(),
        });
        Value::Object(id)
    }

    /// Instantiate `class` with per-instance field values overriding the
    /// class defaults.
    pub fn new_instance<'a>(
        &self,
        class: &Value,
        fields: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Value {
        let Value::Object(class_id) = class else {
            panic!("new_instance requires a class value");
        };
        let mut state = self.lock();
        let id = state.alloc(HeapEntry::Instance {
            class: *class_id,
            fields: fields
                .into_iter()
                .map(|(name, value)| (Arc::from(name), value))
                .collect(),
        });
        Value::Object(id)
    }

    pub fn new_closure(&self, name: Option<&str>, params: u64, freevars: u64) -> Value {
        let mut state = self.lock();
        let id = state.alloc(HeapEntry::Closure {
            name: name.map(Arc::from),
            params,
            freevars,
        });
        Value::Object(id)
    }

    /// Insert (or replace) a slot in a table, e.g. to tie cycles the
    /// builder methods cannot express.
    pub fn table_insert(&self, table: &Value, key: Value, value: Value) {
        let Value::Object(id) = table else {
            panic!("table_insert requires a table value");
        };
        let mut state = self.lock();
        let HeapEntry::Table { slots } = &mut state.heap[id.0] else {
            panic!("table_insert requires a table value");
        };
        if let Some(slot) = slots.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            slots.push((key, value));
        }
    }

    /// Insert (or replace) a slot in the root table.
    pub fn set_global(&self, name: &str, value: Value) {
        let key = Value::from(name);
        let mut state = self.lock();
        let root = self.root.0;
        let HeapEntry::Table { slots } = &mut state.heap[root] else {
            unreachable!("root is always a table");
        };
        if let Some(slot) = slots.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            slots.push((key, value));
        }
    }
}

impl Vm for ScriptedVm {
    fn top(&self) -> usize {
        self.lock().stack.len()
    }

    fn pop(&self, count: usize) {
        let mut state = self.lock();
        let len = state.stack.len();
        state.stack.truncate(len.saturating_sub(count));
    }

    fn push_null(&self) {
        self.lock().stack.push(Value::Null);
    }

    fn push_integer(&self, value: i64) {
        self.lock().stack.push(Value::Integer(value));
    }

    fn push_float(&self, value: f64) {
        self.lock().stack.push(Value::Float(value));
    }

    fn push_bool(&self, value: bool) {
        self.lock().stack.push(Value::Bool(value));
    }

    fn push_string(&self, value: &str) {
        self.lock().stack.push(Value::from(value));
    }

    fn push_root_table(&self) {
        let root = self.root;
        self.lock().stack.push(Value::Object(root));
    }

    fn push_local(&self, frame: u32, seq: u64) -> Option<String> {
        let mut state = self.lock();
        let frame_idx = state.frames.len().checked_sub(1 + frame as usize)?;
        let (name, value) = state.frames[frame_idx].locals.get(seq as usize)?.clone();
        state.stack.push(value);
        Some(name.to_string())
    }

    fn push_class_of(&self, idx: StackIndex) -> bool {
        let mut state = self.lock();
        let Some(Value::Object(obj)) = state.value_at(idx).cloned() else {
            return false;
        };
        let HeapEntry::Instance { class, .. } = &state.heap[obj.0] else {
            return false;
        };
        let class = *class;
        state.stack.push(Value::Object(class));
        true
    }

    fn object_type(&self, idx: StackIndex) -> ObjectType {
        let state = self.lock();
        match state.value_at(idx) {
            Some(Value::Null) | None => ObjectType::Null,
            Some(Value::Integer(_)) => ObjectType::Integer,
            Some(Value::Float(_)) => ObjectType::Float,
            Some(Value::Bool(_)) => ObjectType::Bool,
            Some(Value::String(_)) => ObjectType::String,
            Some(Value::Object(obj)) => match &state.heap[obj.0] {
                HeapEntry::Table { .. } => ObjectType::Table,
                HeapEntry::Array { .. } => ObjectType::Array,
                HeapEntry::Class { .. } => ObjectType::Class,
                HeapEntry::Instance { .. } => ObjectType::Instance,
                HeapEntry::Closure { .. } => ObjectType::Closure,
            },
        }
    }

    fn size(&self, idx: StackIndex) -> Option<u64> {
        let state = self.lock();
        match state.value_at(idx) {
            Some(Value::Object(obj)) => state.container_len(*obj),
            _ => None,
        }
    }

    fn get_integer(&self, idx: StackIndex) -> Option<i64> {
        match self.lock().value_at(idx) {
            Some(Value::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    fn get_float(&self, idx: StackIndex) -> Option<f64> {
        match self.lock().value_at(idx) {
            Some(Value::Float(value)) => Some(*value),
            _ => None,
        }
    }

    fn get_bool(&self, idx: StackIndex) -> Option<bool> {
        match self.lock().value_at(idx) {
            Some(Value::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    fn get_string(&self, idx: StackIndex) -> Option<String> {
        match self.lock().value_at(idx) {
            Some(Value::String(value)) => Some(value.to_string()),
            _ => None,
        }
    }

    fn object_hash(&self, idx: StackIndex) -> Option<u64> {
        match self.lock().value_at(idx) {
            Some(Value::Object(obj)) => Some(obj.0 as u64 + 1),
            _ => None,
        }
    }

    fn raw_address(&self, idx: StackIndex) -> u64 {
        match self.lock().value_at(idx) {
            Some(Value::Object(obj)) => obj.0 as u64 + 1,
            _ => 0,
        }
    }

    fn closure_name(&self, idx: StackIndex) -> Option<String> {
        let state = self.lock();
        match state.value_at(idx) {
            Some(Value::Object(obj)) => match &state.heap[obj.0] {
                HeapEntry::Closure {
                    name: Some(name), ..
                } => Some(name.to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    fn closure_info(&self, idx: StackIndex) -> Option<(u64, u64)> {
        let state = self.lock();
        match state.value_at(idx) {
            Some(Value::Object(obj)) => match &state.heap[obj.0] {
                HeapEntry::Closure {
                    params, freevars, ..
                } => Some((*params, *freevars)),
                _ => None,
            },
            _ => None,
        }
    }

    fn next(&self, container_idx: StackIndex) -> bool {
        let mut state = self.lock();
        let Some(Value::Object(obj)) = state.value_at(container_idx).cloned() else {
            return false;
        };
        let Some(Value::Integer(iter)) = state.value_at(-1).cloned() else {
            return false;
        };
        if iter < 0 {
            return false;
        }
        let Some((key, value)) = state.child_at(obj, iter as usize) else {
            return false;
        };
        let top = state.stack.len();
        state.stack[top - 1] = Value::Integer(iter + 1);
        state.stack.push(key);
        state.stack.push(value);
        true
    }

    fn get_slot(&self, container_idx: StackIndex) -> bool {
        let mut state = self.lock();
        let Some(container) = state.value_at(container_idx).cloned() else {
            return false;
        };
        let Some(key) = state.stack.pop() else {
            return false;
        };
        let Value::Object(obj) = container else {
            return false;
        };

        let value = match (&state.heap[obj.0], &key) {
            (HeapEntry::Table { slots }, _) => slots
                .iter()
                .find(|(slot_key, _)| *slot_key == key)
                .map(|(_, value)| value.clone()),
            (HeapEntry::Array { items }, Value::Integer(index)) => {
                usize::try_from(*index).ok().and_then(|i| items.get(i)).cloned()
            }
            (HeapEntry::Instance { class, fields }, Value::String(name)) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
                .or_else(|| match &state.heap[class.0] {
                    HeapEntry::Class { members } => members
                        .iter()
                        .find(|(member, _)| member == name)
                        .map(|(_, value)| value.clone()),
                    _ => None,
                }),
            (HeapEntry::Class { members }, Value::String(name)) => members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, value)| value.clone()),
            _ => None,
        };

        match value {
            Some(value) => {
                state.stack.push(value);
                true
            }
            None => false,
        }
    }

    fn set_slot(&self, container_idx: StackIndex) -> bool {
        let mut state = self.lock();
        let Some(container) = state.value_at(container_idx).cloned() else {
            return false;
        };
        let (Some(value), Some(key)) = (state.stack.pop(), state.stack.pop()) else {
            return false;
        };
        let Value::Object(obj) = container else {
            return false;
        };

        match &mut state.heap[obj.0] {
            HeapEntry::Table { slots } => {
                if let Some(slot) = slots.iter_mut().find(|(slot_key, _)| *slot_key == key) {
                    slot.1 = value;
                    true
                } else {
                    false
                }
            }
            HeapEntry::Array { items } => {
                let Value::Integer(index) = key else {
                    return false;
                };
                match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                    Some(slot) => {
                        *slot = value;
                        true
                    }
                    None => false,
                }
            }
            HeapEntry::Instance { class, fields } => {
                let Value::String(name) = key else {
                    return false;
                };
                let class = *class;
                if let Some(field) = fields.iter_mut().find(|(field, _)| *field == name) {
                    field.1 = value;
                    return true;
                }
                let declared = match &state.heap[class.0] {
                    HeapEntry::Class { members } => {
                        members.iter().any(|(member, _)| *member == name)
                    }
                    _ => false,
                };
                if !declared {
                    return false;
                }
                let HeapEntry::Instance { fields, .. } = &mut state.heap[obj.0] else {
                    unreachable!();
                };
                fields.push((name, value));
                true
            }
            _ => false,
        }
    }

    fn frame_info(&self, frame: u32) -> Option<FrameInfo> {
        let state = self.lock();
        let idx = state.frames.len().checked_sub(1 + frame as usize)?;
        let frame = &state.frames[idx];
        Some(FrameInfo {
            source: frame.source.to_string(),
            line: frame.line,
            function: frame.function.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_readdresses_by_iterator() {
        let vm = ScriptedVm::new();
        let table = vm.new_table([
            (Value::from("b"), Value::from(2)),
            (Value::from("a"), Value::from(1)),
        ]);
        vm.set_global("t", table);

        vm.push_root_table();
        vm.push_integer(0);
        assert!(vm.next(-2));
        // iterator advanced in place, key and value pushed
        assert_eq!(vm.get_integer(-3), Some(1));
        assert_eq!(vm.get_string(-2).as_deref(), Some("t"));
        assert_eq!(vm.object_type(-1), ObjectType::Table);
        vm.pop(3);

        // re-push the observed iterator to visit the same slot again
        vm.push_integer(0);
        assert!(vm.next(-2));
        assert_eq!(vm.get_string(-2).as_deref(), Some("t"));
        vm.pop(3);
        vm.pop(1);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn instance_children_come_from_the_class() {
        let vm = ScriptedVm::new();
        let class = vm.new_class([
            ("x", Value::from(0)),
            ("y", Value::from(0)),
        ]);
        let instance = vm.new_instance(&class, [("x", Value::from(7))]);

        let mut state = vm.lock();
        state.stack.push(instance);
        drop(state);

        assert_eq!(vm.size(-1), Some(2));
        vm.push_string("x");
        assert!(vm.get_slot(-2));
        assert_eq!(vm.get_integer(-1), Some(7));
        vm.pop(1);
        vm.push_string("y");
        assert!(vm.get_slot(-2));
        assert_eq!(vm.get_integer(-1), Some(0));
        vm.pop(2);
    }

    #[test]
    fn set_slot_requires_an_existing_slot() {
        let vm = ScriptedVm::new();
        let table = vm.new_table([(Value::from("k"), Value::from(1))]);

        let mut state = vm.lock();
        state.stack.push(table);
        drop(state);

        vm.push_string("k");
        vm.push_integer(9);
        assert!(vm.set_slot(-3));

        vm.push_string("missing");
        vm.push_integer(9);
        assert!(!vm.set_slot(-3));

        vm.push_string("k");
        assert!(vm.get_slot(-2));
        assert_eq!(vm.get_integer(-1), Some(9));
        vm.pop(2);
    }
}

use crate::types::{FrameInfo, HookEvent, ObjectType};

/// Index into the VM operand stack.
///
/// Negative values address from the top (`-1` is the top slot),
/// non-negative values address from the bottom (0-based).
pub type StackIndex = isize;

/// Primitive operations on one attached scripting VM.
///
/// The methods mirror the C API of a stack-machine interpreter: values are
/// pushed onto an operand stack, inspected in place, and popped again.
/// Every caller is responsible for restoring the stack to its entry depth;
/// [`StackScope`] checks that in debug builds.
///
/// All methods take `&self`: a real implementation wraps the interpreter
/// handle (typically a raw FFI pointer) and relies on the pause
/// coordinator's guarantee that the VM thread is parked whenever a request
/// thread calls in.
pub trait Vm: Send + Sync + 'static {
    /// Current operand-stack depth.
    fn top(&self) -> usize;

    /// Pop `count` slots.
    fn pop(&self, count: usize);

    fn push_null(&self);
    fn push_integer(&self, value: i64);
    fn push_float(&self, value: f64);
    fn push_bool(&self, value: bool);
    fn push_string(&self, value: &str);

    /// Push the VM's root table.
    fn push_root_table(&self);

    /// Push the local (or captured free variable) at positional index
    /// `seq` of `frame` and return its name. Returns `None` without
    /// pushing when `seq` is past the frame's last slot or `frame` does
    /// not exist.
    fn push_local(&self, frame: u32, seq: u64) -> Option<String>;

    /// Push the class of the instance at `idx`. Returns false (nothing
    /// pushed) when the slot does not hold an instance.
    fn push_class_of(&self, idx: StackIndex) -> bool;

    fn object_type(&self, idx: StackIndex) -> ObjectType;

    /// Number of children of the container at `idx`. For instances this
    /// is the number of member slots the class declares (the delegate
    /// rule), not a property of the instance itself.
    fn size(&self, idx: StackIndex) -> Option<u64>;

    fn get_integer(&self, idx: StackIndex) -> Option<i64>;
    fn get_float(&self, idx: StackIndex) -> Option<f64>;
    fn get_bool(&self, idx: StackIndex) -> Option<bool>;
    fn get_string(&self, idx: StackIndex) -> Option<String>;

    /// Identity hash of the object at `idx`; `None` for value types.
    fn object_hash(&self, idx: StackIndex) -> Option<u64>;

    /// Stable address of the object at `idx` for ref-counted values,
    /// 0 otherwise.
    fn raw_address(&self, idx: StackIndex) -> u64;

    /// Name of the closure at `idx`; `None` when the slot is not a
    /// closure or the closure is anonymous.
    fn closure_name(&self, idx: StackIndex) -> Option<String>;

    /// Parameter and free-variable counts of the closure at `idx`.
    fn closure_info(&self, idx: StackIndex) -> Option<(u64, u64)>;

    /// Iterator-driven container iteration.
    ///
    /// Expects an integer iterator on top of the stack, with the
    /// container at `container_idx` (which is interpreted before
    /// anything is pushed). On success the iterator slot is replaced
    /// with the advanced iterator and the visited key and value are
    /// pushed, leaving `… iterator' key value`. Returns false at the
    /// end of the container, leaving only the iterator.
    ///
    /// Re-pushing an iterator value observed before a successful call
    /// re-addresses the same child, as long as the container was not
    /// mutated in between.
    fn next(&self, container_idx: StackIndex) -> bool;

    /// Keyed read. Pops the key from the top of the stack and pushes
    /// `container[key]`. On failure the key is still popped and nothing
    /// is pushed.
    fn get_slot(&self, container_idx: StackIndex) -> bool;

    /// Keyed write to an existing slot. Pops the value, then the key,
    /// and assigns `container[key] = value`. Fails (both slots still
    /// popped) when the slot does not exist or the container is not
    /// writable.
    fn set_slot(&self, container_idx: StackIndex) -> bool;

    /// Source info for `frame` (0 = innermost); `None` past the
    /// outermost frame.
    fn frame_info(&self, frame: u32) -> Option<FrameInfo>;
}

/// Receiver of VM execution callbacks.
///
/// The debug agent's VM-thread handle implements this; hosts forward
/// their native hook and print callbacks into it.
pub trait HookSink {
    fn on_hook(&mut self, event: HookEvent<'_>);
    fn on_print(&mut self, text: &str, is_err: bool);
}

/// Records the operand-stack depth on entry and verifies it on drop.
///
/// Debug builds assert; release builds log and restore the depth so one
/// miscounted operation cannot poison subsequent VM access.
pub struct StackScope<'a, V: Vm + ?Sized> {
    vm: &'a V,
    entry: usize,
}

impl<'a, V: Vm + ?Sized> StackScope<'a, V> {
    pub fn new(vm: &'a V) -> Self {
        Self {
            vm,
            entry: vm.top(),
        }
    }

    pub fn entry_depth(&self) -> usize {
        self.entry
    }
}

impl<V: Vm + ?Sized> Drop for StackScope<'_, V> {
    fn drop(&mut self) {
        let now = self.vm.top();
        if now != self.entry {
            debug_assert_eq!(
                now, self.entry,
                "operand stack not restored to its entry depth"
            );
            tracing::error!(entry = self.entry, now, "operand stack depth mismatch");
            if now > self.entry {
                self.vm.pop(now - self.entry);
            }
        }
    }
}

//! asyncio objects: futures, tasks, gathering futures, and the exception
//! stack item they embed.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::PyObjectHeader;
use crate::traverse::Traversal;

/// One entry of an exception stack, embedded in generators, futures and
/// thread states.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyErrStackItem {
    pub exc_type: MappedAddr,
    pub exc_value: MappedAddr,
    pub exc_traceback: MappedAddr,
    pub exc_prev: MappedAddr,
}

impl PyErrStackItem {
    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.exc_type, 1) {
            return Some("invalid_exc_type");
        }
        if !r.obj_valid_or_null(self.exc_value, 1) {
            return Some("invalid_exc_value");
        }
        if !r.obj_valid_or_null(self.exc_traceback, 1) {
            return Some("invalid_exc_traceback");
        }
        if !r.obj_valid_or_null(self.exc_prev, 1) {
            return Some("invalid_exc_prev");
        }
        None
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = ReferentSet::new();
        set.insert(self.exc_type);
        set.insert(self.exc_value);
        set.insert(self.exc_traceback);
        set
    }
}

/// The asyncio future state machine.
#[derive(Clone, Copy, Debug, PartialEq, Primitive)]
pub enum FutureState {
    Pending = 0,
    Cancelled = 1,
    Finished = 2,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyFutureObject {
    pub ob_base: PyObjectHeader,
    pub fut_loop: MappedAddr,
    pub fut_callback0: MappedAddr,
    pub fut_context0: MappedAddr,
    pub fut_callbacks: MappedAddr,
    pub fut_exception: MappedAddr,
    pub fut_exception_tb: MappedAddr,
    pub fut_result: MappedAddr,
    pub fut_source_tb: MappedAddr,
    pub fut_cancel_msg: MappedAddr,
    pub fut_state: u8,
    _pad1: u8,
    _pad2: u16,
    pub fut_log_tb: i32,
    pub fut_blocking: i32,
    _pad3: u32,
    pub dict: MappedAddr,
    pub fut_weakreflist: MappedAddr,
    pub fut_cancelled_exc: PyErrStackItem,
}

impl PyFutureObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyFutureObject, Error> {
        env.reader.get(addr)
    }

    pub fn state(&self) -> Option<FutureState> {
        FutureState::from_u8(self.fut_state)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.fut_loop, 1) {
            return Some("invalid_fut_loop");
        }
        if !r.obj_valid_or_null(self.fut_callback0, 1) {
            return Some("invalid_fut_callback0");
        }
        if !r.obj_valid_or_null(self.fut_context0, 1) {
            return Some("invalid_fut_context0");
        }
        if !r.obj_valid_or_null(self.fut_callbacks, 1) {
            return Some("invalid_fut_callbacks");
        }
        if !r.obj_valid_or_null(self.fut_exception, 1) {
            return Some("invalid_fut_exception");
        }
        if !r.obj_valid_or_null(self.fut_exception_tb, 1) {
            return Some("invalid_fut_exception_tb");
        }
        if !r.obj_valid_or_null(self.fut_result, 1) {
            return Some("invalid_fut_result");
        }
        if !r.obj_valid_or_null(self.fut_source_tb, 1) {
            return Some("invalid_fut_source_tb");
        }
        if !r.obj_valid_or_null(self.fut_cancel_msg, 1) {
            return Some("invalid_fut_cancel_msg");
        }
        if !r.obj_valid_or_null(self.dict, 1) {
            return Some("invalid_dict");
        }
        if !r.obj_valid_or_null(self.fut_weakreflist, 1) {
            return Some("invalid_fut_weakreflist");
        }
        if self.state().is_none() {
            return Some("invalid_state");
        }
        self.fut_cancelled_exc.invalid_reason(env)
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = self.fut_cancelled_exc.direct_referents();
        set.insert(self.fut_loop);
        set.insert(self.fut_callback0);
        set.insert(self.fut_context0);
        set.insert(self.fut_callbacks);
        set.insert(self.fut_exception);
        set.insert(self.fut_exception_tb);
        set.insert(self.fut_result);
        set.insert(self.fut_source_tb);
        set.insert(self.fut_cancel_msg);
        set.insert(self.dict);
        set.insert(self.fut_weakreflist);
        set
    }

    pub fn repr_tokens(&self, t: &mut Traversal) -> Vec<String> {
        let mut tokens = vec![];
        match self.state() {
            Some(FutureState::Pending) => tokens.push("pending".to_string()),
            Some(FutureState::Cancelled) => tokens.push("cancelled".to_string()),
            Some(FutureState::Finished) => tokens.push("finished".to_string()),
            None => tokens.push(format!("!state:{}", self.fut_state)),
        }
        let verbose = !t.options.is_short;
        if !self.fut_loop.is_null() && verbose {
            tokens.push(format!("loop={}", t.repr(self.fut_loop)));
        }
        if !self.fut_callback0.is_null() && verbose {
            tokens.push(format!("callback0={}", t.repr(self.fut_callback0)));
        }
        if !self.fut_context0.is_null() && verbose {
            tokens.push(format!("context0={}", t.repr(self.fut_context0)));
        }
        if !self.fut_callbacks.is_null() && verbose {
            tokens.push(format!("callbacks={}", t.repr(self.fut_callbacks)));
        }
        if !self.fut_exception.is_null() {
            tokens.push(format!("exception={}", t.repr(self.fut_exception)));
        }
        if !self.fut_exception_tb.is_null() && verbose {
            tokens.push(format!("exception_tb={}", t.repr(self.fut_exception_tb)));
        }
        if !self.fut_result.is_null() {
            tokens.push(format!("result={}", t.repr(self.fut_result)));
        }
        if !self.fut_source_tb.is_null() && verbose {
            tokens.push(format!("source_tb={}", t.repr(self.fut_source_tb)));
        }
        if !self.fut_cancel_msg.is_null() && verbose {
            tokens.push(format!("cancel_msg={}", t.repr(self.fut_cancel_msg)));
        }
        if !self.dict.is_null() && verbose {
            tokens.push(format!("dict={}", t.repr(self.dict)));
        }
        if !self.fut_weakreflist.is_null() && verbose {
            tokens.push(format!("weakreflist={}", t.repr(self.fut_weakreflist)));
        }
        if !self.fut_cancelled_exc.exc_value.is_null() && verbose {
            tokens.push(format!(
                "cancelled_exc={}",
                t.repr(self.fut_cancelled_exc.exc_value)
            ));
        }
        tokens
    }
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyTaskObject {
    pub fut: PyFutureObject,
    pub task_fut_waiter: MappedAddr,
    pub task_coro: MappedAddr,
    pub task_name: MappedAddr,
    pub task_context: MappedAddr,
    pub task_must_cancel: i32,
    pub task_log_destroy_pending: i32,
}

impl PyTaskObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyTaskObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        if let Some(reason) = self.fut.invalid_reason(env) {
            return Some(reason);
        }
        let r = &env.reader;
        if !r.obj_valid_or_null(self.task_fut_waiter, 1) {
            return Some("invalid_task_fut_waiter");
        }
        if !r.obj_valid(self.task_coro, 1) {
            return Some("invalid_task_coro");
        }
        if !r.obj_valid_or_null(self.task_name, 1) {
            return Some("invalid_task_name");
        }
        if !r.obj_valid_or_null(self.task_context, 1) {
            return Some("invalid_task_context");
        }
        None
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = self.fut.direct_referents();
        set.insert(self.task_fut_waiter);
        set.insert(self.task_coro);
        set.insert(self.task_name);
        set.insert(self.task_context);
        set
    }

    pub fn repr_tokens(&self, t: &mut Traversal) -> Vec<String> {
        let mut tokens = self.fut.repr_tokens(t);
        if self.task_must_cancel != 0 {
            tokens.push(format!("cancels={}", self.task_must_cancel));
        }
        tokens.push(format!("coro={}", t.repr(self.task_coro)));
        if !t.options.is_short {
            tokens.push(format!("waiter={}", t.repr(self.task_fut_waiter)));
            tokens.push(format!("name={}", t.repr(self.task_name)));
            tokens.push(format!("context={}", t.repr(self.task_context)));
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::scroll_size_check;
    use crate::synth::{future_object, PyWorld};

    #[test]
    fn test_struct_sizes() {
        scroll_size_check::<PyErrStackItem>(32);
        scroll_size_check::<PyFutureObject>(152);
        scroll_size_check::<PyTaskObject>(192);
    }

    #[test]
    fn test_future_states() {
        let mut world = PyWorld::new(0x1000);
        let fut_type = world.add_type("_asyncio.Future");
        let pending = world.world.place(future_object(fut_type, 0, 0));
        let broken = world.world.place(future_object(fut_type, 9, 0));
        let env = world.env(PyVersion::Py310);
        let fut = PyFutureObject::read(&env, MappedAddr(pending)).unwrap();
        assert_eq!(fut.state(), Some(FutureState::Pending));
        assert_eq!(fut.invalid_reason(&env), None);
        let fut = PyFutureObject::read(&env, MappedAddr(broken)).unwrap();
        assert_eq!(fut.state(), None);
        assert_eq!(fut.invalid_reason(&env), Some("invalid_state"));
    }

    #[test]
    fn test_dangling_callback() {
        let mut world = PyWorld::new(0x1000);
        let fut_type = world.add_type("_asyncio.Future");
        let addr = world.world.place(future_object(fut_type, 0, 0xdead_beef));
        let env = world.env(PyVersion::Py310);
        let fut = PyFutureObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(fut.invalid_reason(&env), Some("invalid_fut_callback0"));
    }
}

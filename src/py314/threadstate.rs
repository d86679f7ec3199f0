//! 3.14 thread states.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::Environment;
use crate::memory::Error;
use crate::objects::asyncobj::PyErrStackItem;
use crate::traverse::Traversal;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyThreadState {
    pub prev: MappedAddr,
    pub next: MappedAddr,
    pub interp: MappedAddr,
    pub eval_breaker: u64,
    pub status: u32,
    pub holds_gil: i32,
    pub whence: i32,
    pub state: i32,
    pub py_recursion_remaining: i32,
    pub py_recursion_limit: i32,
    pub recursion_headroom: i32,
    pub tracing: i32,
    pub what_event: i32,
    _pad1: u32,
    /// The innermost interpreter frame, or null.
    pub current_frame: MappedAddr,
    pub c_profilefunc: MappedAddr,
    pub c_tracefunc: MappedAddr,
    pub c_profileobj: MappedAddr,
    pub c_traceobj: MappedAddr,
    pub current_exception: MappedAddr,
    pub exc_info: MappedAddr,
    pub dict: MappedAddr,
    pub gilstate_counter: i32,
    _pad2: u32,
    pub async_exc: MappedAddr,
    pub thread_id: u64,
    pub native_thread_id: u64,
    pub delete_later: MappedAddr,
    pub critical_section: u64,
    pub coroutine_origin_tracking_depth: i32,
    _pad3: u32,
    pub async_gen_firstiter: MappedAddr,
    pub async_gen_finalizer: MappedAddr,
    pub context: MappedAddr,
    pub context_ver: u64,
    pub id: u64,
    pub datastack_chunk: MappedAddr,
    pub datastack_top: MappedAddr,
    pub datastack_limit: MappedAddr,
    pub exc_state: PyErrStackItem,
    pub current_executor: MappedAddr,
}

impl PyThreadState {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyThreadState, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.prev, 8) {
            return Some("invalid_prev");
        }
        if !r.obj_valid_or_null(self.next, 8) {
            return Some("invalid_next");
        }
        if !r.obj_valid(self.interp, 8) {
            return Some("invalid_interp");
        }
        if !r.obj_valid_or_null(self.current_frame, 8) {
            return Some("invalid_current_frame");
        }
        if !r.obj_valid_or_null(self.c_profilefunc, 1) {
            return Some("invalid_c_profilefunc");
        }
        if !r.obj_valid_or_null(self.c_tracefunc, 1) {
            return Some("invalid_c_tracefunc");
        }
        if !self.c_profileobj.is_null() && env.invalid_reason(self.c_profileobj, None).is_some() {
            return Some("invalid_c_profileobj");
        }
        if !self.c_traceobj.is_null() && env.invalid_reason(self.c_traceobj, None).is_some() {
            return Some("invalid_c_traceobj");
        }
        if !self.current_exception.is_null()
            && env.invalid_reason(self.current_exception, None).is_some()
        {
            return Some("invalid_current_exception");
        }
        if !r.obj_valid_or_null(self.exc_info, 8) {
            return Some("invalid_exc_info");
        }
        if !self.dict.is_null() {
            let dict_type = env.get_type_if_exists("dict");
            let expected = if dict_type.is_null() {
                None
            } else {
                Some(dict_type)
            };
            if env.invalid_reason(self.dict, expected).is_some() {
                return Some("invalid_dict");
            }
        }
        if !self.async_exc.is_null() && env.invalid_reason(self.async_exc, None).is_some() {
            return Some("invalid_async_exc");
        }
        if !self.delete_later.is_null() && env.invalid_reason(self.delete_later, None).is_some() {
            return Some("invalid_delete_later");
        }
        if !self.async_gen_firstiter.is_null()
            && env.invalid_reason(self.async_gen_firstiter, None).is_some()
        {
            return Some("invalid_async_gen_firstiter");
        }
        if !self.async_gen_finalizer.is_null()
            && env.invalid_reason(self.async_gen_finalizer, None).is_some()
        {
            return Some("invalid_async_gen_finalizer");
        }
        if !self.context.is_null() && env.invalid_reason(self.context, None).is_some() {
            return Some("invalid_context");
        }
        None
    }

    pub fn repr_tokens(&self, t: &mut Traversal) -> Vec<String> {
        let mut tokens = vec![];
        tokens.push(format!("prev=@{}", self.prev));
        tokens.push(format!("next=@{}", self.next));
        tokens.push(format!("interp=@{}", self.interp));
        tokens.push(format!("current_frame=@{}", self.current_frame));
        tokens.push(format!("thread_id={}", self.thread_id));
        tokens.push(format!("id={:X}", self.id));
        if !self.current_exception.is_null() {
            tokens.push(format!(
                "current_exception={}",
                t.repr(self.current_exception)
            ));
        }
        if !self.async_exc.is_null() {
            tokens.push(format!("async_exc={}", t.repr(self.async_exc)));
        }
        tokens.push(format!("dict={}", t.repr(self.dict)));
        tokens.push(format!("context={}", t.repr(self.context)));
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::scroll_size_check;
    use crate::synth::{bytes_of, le, PyWorld};

    #[test]
    fn test_struct_size() {
        scroll_size_check::<PyThreadState>(296);
    }

    #[test]
    fn test_validation() {
        let mut world = PyWorld::new(0x1000);
        let interp = world.world.place(vec![0u8; 16]);
        let addr = world.world.place(bytes_of(
            le().D64(0) // prev
                .D64(0) // next
                .D64(interp)
                .D64(0) // eval_breaker
                .append_repeated(0, 40) // status through what_event + pad
                .D64(0) // current_frame
                .append_repeated(0, 6 * 8) // trace funcs/objs, exception, exc_info
                .D64(0) // dict
                .D64(0) // gilstate + pad
                .D64(0) // async_exc
                .D64(77) // thread_id
                .D64(0) // native_thread_id
                .D64(0) // delete_later
                .D64(0) // critical_section
                .D64(0) // origin tracking + pad
                .append_repeated(0, 3 * 8) // async gen hooks, context
                .D64(0) // context_ver
                .D64(9) // id
                .append_repeated(0, 3 * 8) // datastack
                .append_repeated(0, 32) // exc_state
                .D64(0), // current_executor
        ));
        let env = world.env(PyVersion::Py314);
        let ts = PyThreadState::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(ts.invalid_reason(&env), None);
        assert_eq!(ts.thread_id, 77);
    }
}

//! 3.10 thread states. Not objects: linked-list nodes with the per-thread
//! frame, exception state and async-generator hooks.

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
    /// May be null between calls.
    pub frame: MappedAddr,
    pub recursion_depth: i32,
    pub recursion_headroom: i32,
    pub stackcheck_counter: i32,
    pub tracing: i32,
    pub cframe: MappedAddr,
    pub c_profilefunc: MappedAddr,
    pub c_tracefunc: MappedAddr,
    pub c_profileobj: MappedAddr,
    pub c_traceobj: MappedAddr,
    pub curexc_type: MappedAddr,
    pub curexc_value: MappedAddr,
    pub curexc_traceback: MappedAddr,
    pub exc_state: PyErrStackItem,
    pub exc_info: MappedAddr,
    pub dict: MappedAddr,
    pub gilstate_counter: i32,
    _pad1: u32,
    pub async_exc: MappedAddr,
    pub thread_id: u64,
    pub trash_delete_nesting: i32,
    _pad2: u32,
    pub trash_delete_later: MappedAddr,
    pub on_delete: MappedAddr,
    pub on_delete_data: MappedAddr,
    pub coroutine_origin_tracking_depth: i32,
    _pad3: u32,
    pub async_gen_firstiter: MappedAddr,
    pub async_gen_finalizer: MappedAddr,
    pub context: MappedAddr,
    pub context_ver: u64,
    pub id: u64,
    pub root_cframe_use_tracing: i32,
    _pad4: u32,
    pub root_cframe_previous: MappedAddr,
}

impl PyThreadState {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyThreadState, Error> {
        env.reader.get(addr)
    }

    /// Unlike object validators, object-pointer slots here get a *full*
    /// validation: a thread state is a query root, not a dispatched
    /// variant.
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
        if !self.frame.is_null() {
            let frame_type = env.get_type_if_exists("frame");
            let expected = if frame_type.is_null() {
                None
            } else {
                Some(frame_type)
            };
            if env.invalid_reason(self.frame, expected).is_some() {
                return Some("invalid_frame");
            }
        }
        if !r.obj_valid_or_null(self.cframe, 8) {
            return Some("invalid_cframe");
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
        if !self.curexc_type.is_null() && env.invalid_reason(self.curexc_type, None).is_some() {
            return Some("invalid_curexc_type");
        }
        if !self.curexc_value.is_null() && env.invalid_reason(self.curexc_value, None).is_some() {
            return Some("invalid_curexc_value");
        }
        if !self.curexc_traceback.is_null()
            && env.invalid_reason(self.curexc_traceback, None).is_some()
        {
            return Some("invalid_curexc_traceback");
        }
        if self.exc_state.invalid_reason(env).is_some() {
            return Some("invalid_exc_state");
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
        if !self.trash_delete_later.is_null()
            && env.invalid_reason(self.trash_delete_later, None).is_some()
        {
            return Some("invalid_trash_delete_later");
        }
        if !r.obj_valid_or_null(self.on_delete, 1) {
            return Some("invalid_on_delete");
        }
        if !r.obj_valid_or_null(self.on_delete_data, 1) {
            return Some("invalid_on_delete_data");
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
        tokens.push(format!("frame={}", t.repr(self.frame)));
        tokens.push(format!("recursion_depth={}", self.recursion_depth));
        if !self.c_profileobj.is_null() {
            tokens.push(format!("c_profileobj={}", t.repr(self.c_profileobj)));
        }
        if !self.c_traceobj.is_null() {
            tokens.push(format!("c_traceobj={}", t.repr(self.c_traceobj)));
        }
        if !self.curexc_type.is_null()
            && !self.curexc_value.is_null()
            && !self.curexc_traceback.is_null()
        {
            let exc_type = t.repr(self.curexc_type);
            let exc_value = t.repr(self.curexc_value);
            let exc_traceback = t.repr(self.curexc_traceback);
            tokens.push(format!(
                "curexc=(type={} value={} traceback={})",
                exc_type, exc_value, exc_traceback
            ));
        }
        if !self.async_exc.is_null() {
            tokens.push(format!("async_exc={}", t.repr(self.async_exc)));
        }
        tokens.push(format!("dict={}", t.repr(self.dict)));
        tokens.push(format!("thread_id={}", self.thread_id));
        tokens.push(format!("context={}", t.repr(self.context)));
        tokens.push(format!("id={:X}", self.id));
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::scroll_size_check;
    use crate::synth::{bytes_of, le, PyWorld};

    pub fn thread_state_310(world: &mut PyWorld, interp: u64, thread_id: u64) -> u64 {
        world.world.place(bytes_of(
            le().D64(0) // prev
                .D64(0) // next
                .D64(interp)
                .D64(0) // frame
                .append_repeated(0, 16) // recursion counters
                .append_repeated(0, 8 * 8) // cframe through curexc_traceback
                .append_repeated(0, 32) // exc_state
                .D64(0) // exc_info
                .D64(0) // dict
                .D64(0) // gilstate_counter + pad
                .D64(0) // async_exc
                .D64(thread_id)
                .append_repeated(0, 0x38) // trash/on_delete/coroutine depth
                .D64(0) // context
                .D64(0) // context_ver
                .D64(7) // id
                .append_repeated(0, 16), // root cframe
        ))
    }

    #[test]
    fn test_struct_size() {
        scroll_size_check::<PyThreadState>(280);
    }

    #[test]
    fn test_validation() {
        let mut world = PyWorld::new(0x1000);
        let interp = world.world.place(vec![0u8; 16]);
        let addr = thread_state_310(&mut world, interp, 1234);
        let env = world.env(PyVersion::Py310);
        let ts = PyThreadState::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(ts.invalid_reason(&env), None);
        assert_eq!(ts.thread_id, 1234);
        // A null interpreter pointer is never valid.
        let bad = PyThreadState {
            interp: MappedAddr::NULL,
            ..ts
        };
        assert_eq!(bad.invalid_reason(&env), Some("invalid_interp"));
    }
}

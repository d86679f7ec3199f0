//! 3.10 generators, coroutines and async generators: suspended execution
//! holding a frame and an exception stack.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::asyncobj::PyErrStackItem;
use crate::objects::PyObjectHeader;
use crate::py310::frame::PyFrameObject;
use crate::traverse::Traversal;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyGenObject {
    pub ob_base: PyObjectHeader,
    pub gi_frame: MappedAddr,
    pub gi_code: MappedAddr,
    pub gi_weakreflist: MappedAddr,
    pub gi_name: MappedAddr,
    pub gi_qualname: MappedAddr,
    pub gi_exc_state: PyErrStackItem,
}

impl PyGenObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyGenObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.gi_frame, 1) {
            return Some("invalid_gi_frame");
        }
        if !r.obj_valid_or_null(self.gi_code, 1) {
            return Some("invalid_gi_code");
        }
        if !r.obj_valid_or_null(self.gi_weakreflist, 1) {
            return Some("invalid_gi_weakreflist");
        }
        if !r.obj_valid_or_null(self.gi_name, 1) {
            return Some("invalid_gi_name");
        }
        if !r.obj_valid_or_null(self.gi_qualname, 1) {
            return Some("invalid_gi_qualname");
        }
        self.gi_exc_state.invalid_reason(env)
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = self.gi_exc_state.direct_referents();
        set.insert(self.gi_frame);
        set.insert(self.gi_code);
        set.insert(self.gi_weakreflist);
        set.insert(self.gi_name);
        set.insert(self.gi_qualname);
        set
    }

    pub fn repr_tokens(&self, t: &mut Traversal) -> Vec<String> {
        let mut tokens = vec![];
        if !self.gi_name.is_null() {
            tokens.push(format!("name={}", t.repr(self.gi_name)));
        }
        if !self.gi_qualname.is_null() {
            tokens.push(format!("qualname={}", t.repr(self.gi_qualname)));
        }
        if !self.gi_exc_state.exc_value.is_null() {
            tokens.push(format!("exc_value={}", t.repr(self.gi_exc_state.exc_value)));
        }
        if !self.gi_frame.is_null() {
            tokens.push(format!("frame={}", t.repr(self.gi_frame)));
        }
        if !self.gi_code.is_null() {
            tokens.push(format!("code={}", t.repr(self.gi_code)));
        }
        if !self.gi_weakreflist.is_null() {
            tokens.push(format!("weakreflist={}", t.repr(self.gi_weakreflist)));
        }
        tokens
    }
}

/// Renders a generator-family object as a token variant.
pub fn repr_gen_like(
    t: &mut Traversal,
    addr: MappedAddr,
    label: &str,
    tokens_for: impl FnOnce(&mut Traversal) -> Vec<String>,
) -> String {
    if !t.recursion_allowed() {
        return format!("<{} !recursion_depth>", label);
    }
    let host = match t.env.reader.host_addr(addr) {
        Ok(host) => host,
        Err(_) => return t.fail(label, "invalid_addr"),
    };
    match t.nested(host, |t| {
        let tokens = tokens_for(t);
        t.render_tokens(label, &tokens)
    }) {
        Some(out) => out,
        None => format!("<{} !recursive_repr>", label),
    }
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyCoroObject {
    pub gen: PyGenObject,
    pub cr_origin: MappedAddr,
}

impl PyCoroObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyCoroObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        if !env.reader.obj_valid_or_null(self.cr_origin, 1) {
            return Some("invalid_cr_origin");
        }
        self.gen.invalid_reason(env)
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = self.gen.direct_referents();
        set.insert(self.cr_origin);
        set
    }

    pub fn repr_tokens(&self, t: &mut Traversal) -> Vec<String> {
        let mut tokens = self.gen.repr_tokens(t);
        if !self.cr_origin.is_null() {
            tokens.push(format!("origin={}", t.repr(self.cr_origin)));
        }
        tokens
    }

    /// Short mode collapses a coroutine to its qualname, state and source
    /// position.
    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        if t.options.is_short {
            let name = t.repr(self.gen.gi_qualname);
            if self.gen.gi_frame.is_null() {
                return format!("<coroutine {} (no frame)>", name);
            }
            let frame = match PyFrameObject::read(t.env, self.gen.gi_frame) {
                Ok(frame) => frame,
                Err(_) => return t.fail("coroutine", "invalid_gi_frame"),
            };
            if let Some(reason) = frame.invalid_reason(t.env, self.gen.gi_frame) {
                t.is_valid = false;
                return format!("<coroutine !invalid_frame:{}>", reason);
            }
            let state = match frame.state() {
                Some(state) => state.name(),
                None => "?",
            };
            let location = frame.where_str(t);
            return format!("<coroutine {} {} @ {}>", name, state, location);
        }
        let this = *self;
        repr_gen_like(t, addr, "coroutine", move |t| this.repr_tokens(t))
    }
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyAsyncGenObject {
    pub gen: PyGenObject,
    pub ag_finalizer: MappedAddr,
    pub ag_hooks_inited: i32,
    pub ag_closed: i32,
    pub ag_running_async: i32,
    _pad: u32,
}

impl PyAsyncGenObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyAsyncGenObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        if !env.reader.obj_valid_or_null(self.ag_finalizer, 1) {
            return Some("invalid_ag_finalizer");
        }
        self.gen.invalid_reason(env)
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = self.gen.direct_referents();
        set.insert(self.ag_finalizer);
        set
    }

    pub fn repr_tokens(&self, t: &mut Traversal) -> Vec<String> {
        let mut tokens = self.gen.repr_tokens(t);
        if !self.ag_finalizer.is_null() {
            tokens.push(format!("finalizer={}", t.repr(self.ag_finalizer)));
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::scroll_size_check;
    use crate::synth::{ascii_string, gen_object_310, PyWorld};

    #[test]
    fn test_struct_sizes() {
        scroll_size_check::<PyGenObject>(88);
        scroll_size_check::<PyCoroObject>(96);
        scroll_size_check::<PyAsyncGenObject>(112);
    }

    #[test]
    fn test_validation_and_referents() {
        let mut world = PyWorld::new(0x1000);
        let gen_type = world.add_type("generator");
        let str_type = world.add_type("str");
        let name = world.world.place(ascii_string(str_type, "worker"));
        let addr = gen_object_310(&mut world, gen_type, 0, name, name);
        let bad = gen_object_310(&mut world, gen_type, 0xdead_0000, 0, 0);
        let env = world.env(PyVersion::Py310);
        let gen = PyGenObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(gen.invalid_reason(&env), None);
        assert!(gen.direct_referents().contains(&MappedAddr(name)));
        let gen = PyGenObject::read(&env, MappedAddr(bad)).unwrap();
        assert_eq!(gen.invalid_reason(&env), Some("invalid_gi_frame"));
    }
}

//! 3.10 frame objects: execution context with a flexible trailing array of
//! locals and value stack.

use num_traits::{FromPrimitive, ToPrimitive};
use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::{Error, OBJ_MIN_SIZE};
use crate::objects::PyVarObject;
use crate::py310::code::PyCodeObject;
use crate::py310::tuple::PyTupleObject;
use crate::traverse::Traversal;

/// Offset of the trailing `f_localsplus` array. The 20-slot try-block
/// stack sits between the fixed fields and the array.
pub const LOCALSPLUS_OFFSET: u64 = 352;

/// Frame life-cycle states.
#[repr(i8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameState {
    Created = -2,
    Suspended = -1,
    Executing = 0,
    Returned = 1,
    Unwinding = 2,
    Raised = 3,
    Cleared = 4,
}

impl FromPrimitive for FrameState {
    fn from_i64(n: i64) -> Option<Self> {
        match n {
            -2 => Some(FrameState::Created),
            -1 => Some(FrameState::Suspended),
            0 => Some(FrameState::Executing),
            1 => Some(FrameState::Returned),
            2 => Some(FrameState::Unwinding),
            3 => Some(FrameState::Raised),
            4 => Some(FrameState::Cleared),
            _ => None,
        }
    }

    fn from_u64(n: u64) -> Option<Self> {
        Self::from_i64(n as i64)
    }
}

impl ToPrimitive for FrameState {
    fn to_i64(&self) -> Option<i64> {
        Some(*self as i64)
    }

    fn to_u64(&self) -> Option<u64> {
        Some(*self as i64 as u64)
    }
}

impl FrameState {
    pub fn name(self) -> &'static str {
        match self {
            FrameState::Created => "created",
            FrameState::Suspended => "suspended",
            FrameState::Executing => "executing",
            FrameState::Returned => "returned",
            FrameState::Unwinding => "unwinding",
            FrameState::Raised => "raised",
            FrameState::Cleared => "cleared",
        }
    }
}

/// The fixed prefix of a frame; the try-block stack and `f_localsplus`
/// follow it.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyFrameObject {
    pub ob_base: PyVarObject,
    pub f_back: MappedAddr,
    pub f_code: MappedAddr,
    pub f_builtins: MappedAddr,
    pub f_globals: MappedAddr,
    pub f_locals: MappedAddr,
    pub f_valuestack: MappedAddr,
    pub f_trace: MappedAddr,
    pub f_stackdepth: i32,
    pub f_trace_lines: u8,
    pub f_trace_opcodes: u8,
    _pad1: u16,
    pub f_gen: MappedAddr,
    pub f_lasti: i32,
    pub f_lineno: i32,
    pub f_iblock: i32,
    pub f_state: i8,
    _pad2: u8,
    _pad3: u16,
}

impl PyFrameObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyFrameObject, Error> {
        env.reader.get(addr)
    }

    pub fn state(&self) -> Option<FrameState> {
        FrameState::from_i8(self.f_state)
    }

    /// Whether this frame could still run (created, suspended or
    /// executing).
    pub fn is_runnable_or_running(&self) -> bool {
        self.f_state <= 0
    }

    pub fn is_running(&self) -> bool {
        self.f_state == 0
    }

    /// The bytecode offset: `f_lasti` counts 2-byte code units.
    pub fn code_offset(&self) -> u64 {
        (self.f_lasti.max(0) as u64) * 2
    }

    fn localsplus_len(&self) -> u64 {
        self.ob_base.ob_size.max(0) as u64
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.f_back, OBJ_MIN_SIZE) {
            return Some("invalid_f_back");
        }
        if !r.obj_valid_or_null(self.f_code, OBJ_MIN_SIZE) {
            return Some("invalid_f_code");
        }
        if !r.obj_valid_or_null(self.f_builtins, OBJ_MIN_SIZE) {
            return Some("invalid_f_builtins");
        }
        if !r.obj_valid_or_null(self.f_globals, OBJ_MIN_SIZE) {
            return Some("invalid_f_globals");
        }
        if !r.obj_valid_or_null(self.f_locals, OBJ_MIN_SIZE) {
            return Some("invalid_f_locals");
        }
        if !r.obj_valid_or_null(self.f_valuestack, 1) {
            return Some("invalid_f_valuestack");
        }
        if !r.obj_valid_or_null(self.f_trace, OBJ_MIN_SIZE) {
            return Some("invalid_f_trace");
        }
        if !r.obj_valid_or_null(self.f_gen, OBJ_MIN_SIZE) {
            return Some("invalid_f_gen");
        }
        if self.ob_base.ob_size < 0 {
            return Some("invalid_size");
        }
        match self.localsplus_len().checked_mul(8) {
            Some(bytes) if r.exists_range(addr, LOCALSPLUS_OFFSET + bytes) => {}
            _ => return Some("items_out_of_range"),
        }
        None
    }

    /// The trailing locals-plus-stack slots.
    pub fn localsplus(&self, env: &Environment, addr: MappedAddr) -> Result<Vec<MappedAddr>, Error> {
        env.reader
            .get_array(addr.offset_bytes(LOCALSPLUS_OFFSET), self.localsplus_len())
    }

    /// Pairs `co_varnames` with the first `co_nlocals` slots, skipping
    /// empty ones.
    pub fn locals(
        &self,
        env: &Environment,
        addr: MappedAddr,
    ) -> Result<Vec<(MappedAddr, MappedAddr)>, Error> {
        let code = match self.code(env) {
            Some(code) => code,
            None => return Ok(vec![]),
        };
        let names = PyTupleObject::read(env, code.co_varnames)?;
        let names = names.items(env, code.co_varnames)?;
        let slots = self.localsplus(env, addr)?;
        let count = (code.co_nlocals.max(0) as usize)
            .min(names.len())
            .min(slots.len());
        Ok(names[..count]
            .iter()
            .zip(&slots[..count])
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (*name, *value))
            .collect())
    }

    pub fn code(&self, env: &Environment) -> Option<PyCodeObject> {
        if self.f_code.is_null() {
            return None;
        }
        PyCodeObject::read(env, self.f_code).ok()
    }

    pub fn direct_referents(
        &self,
        env: &Environment,
        addr: MappedAddr,
    ) -> Result<ReferentSet, Error> {
        let mut set = ReferentSet::new();
        set.insert(self.f_back);
        set.insert(self.f_code);
        set.insert(self.f_builtins);
        set.insert(self.f_globals);
        set.insert(self.f_locals);
        set.insert(self.f_trace);
        set.insert(self.f_gen);
        for slot in self.localsplus(env, addr)? {
            set.insert(slot);
        }
        Ok(set)
    }

    /// `<filename-repr>:<line>` for the current bytecode position.
    pub fn where_str(&self, t: &mut Traversal) -> String {
        let code = match self.code(t.env) {
            Some(code) => code,
            None => return "?:?".to_string(),
        };
        let line = code
            .line_for_offset(t.env, self.code_offset())
            .unwrap_or(0);
        format!("{}:{}", t.repr(code.co_filename), line)
    }

    pub fn repr_tokens(&self, t: &mut Traversal, addr: MappedAddr) -> Vec<String> {
        let mut tokens = vec![];
        match self.state() {
            Some(state) => tokens.push(format!("state={}", state.name())),
            None => tokens.push(format!("!state:{}", self.f_state)),
        }
        tokens.push(format!("where={}", self.where_str(t)));
        tokens.push(format!("lasti={}", self.f_lasti));
        tokens.push(format!("lineno={}", self.f_lineno));
        if !t.options.is_short {
            tokens.push(format!("code={}", t.repr(self.f_code)));
        }
        if !self.f_back.is_null() {
            if t.options.frame_omit_back {
                tokens.push(format!("back=@{}", self.f_back));
            } else {
                tokens.push(format!("back={}", t.repr(self.f_back)));
            }
        }
        if !t.options.frame_omit_locals {
            for (name, value) in self.locals(t.env, addr).unwrap_or_default() {
                let name_repr = t.repr(name);
                let value_repr = t.repr(value);
                tokens.push(format!("local {}={}", name_repr, value_repr));
            }
        }
        tokens
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        if !t.recursion_allowed() {
            return "<frame !recursion_depth>".to_string();
        }
        let host = match t.env.reader.host_addr(addr) {
            Ok(host) => host,
            Err(_) => return t.fail("frame", "invalid_addr"),
        };
        let this = *self;
        match t.nested(host, |t| {
            let tokens = this.repr_tokens(t, addr);
            t.render_tokens("frame", &tokens)
        }) {
            Some(out) => out,
            None => "<frame !recursive_repr>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::scroll_size_check;
    use crate::synth::{frame_object_310, PyWorld};

    #[test]
    fn test_struct_size() {
        scroll_size_check::<PyFrameObject>(112);
    }

    #[test]
    fn test_state_and_validation() {
        let mut world = PyWorld::new(0x1000);
        let frame_type = world.add_type("frame");
        let addr = frame_object_310(&mut world, frame_type, 0, 0, -1, 0, &[]);
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        let frame = PyFrameObject::read(&env, addr).unwrap();
        assert_eq!(frame.invalid_reason(&env, addr), None);
        assert_eq!(frame.state(), Some(FrameState::Suspended));
        assert!(frame.is_runnable_or_running());
        assert!(!frame.is_running());
    }

    #[test]
    fn test_dangling_back_pointer() {
        let mut world = PyWorld::new(0x1000);
        let frame_type = world.add_type("frame");
        let addr =
            frame_object_310(&mut world, frame_type, 0, 0xdead_0000, 0, 0, &[]);
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        let frame = PyFrameObject::read(&env, addr).unwrap();
        assert_eq!(frame.invalid_reason(&env, addr), Some("invalid_f_back"));
    }

    #[test]
    fn test_localsplus_referents() {
        let mut world = PyWorld::new(0x1000);
        let frame_type = world.add_type("frame");
        let int_type = world.add_type("int");
        let value = world
            .world
            .place(crate::synth::long_object_310(int_type, 1, &[7]));
        let addr = frame_object_310(&mut world, frame_type, 0, 0, -1, 0, &[value, 0]);
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        let frame = PyFrameObject::read(&env, addr).unwrap();
        assert_eq!(frame.invalid_reason(&env, addr), None);
        let referents = frame.direct_referents(&env, addr).unwrap();
        assert!(referents.contains(&MappedAddr(value)));
        assert!(referents.contains(&MappedAddr::NULL));
    }
}

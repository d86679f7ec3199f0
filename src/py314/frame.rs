//! 3.14 frames: the user-visible `PyFrameObject` is a thin shell over an
//! internal interpreter frame holding the executable, globals and locals.

use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::{Endian, Pread, SizeWith as SizeWithDerive};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::{Error, OBJ_MIN_SIZE};
use crate::objects::PyObjectHeader;
use crate::py314::code::{PyCodeObject, CODE_ADAPTIVE_OFFSET};
use crate::traverse::Traversal;

/// A tagged reference on the interpreter stack. Bit 0 tags deferred
/// refcounting; `1` alone is the null sentinel; low-bits `11` tag a small
/// integer stored inline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PyStackRef {
    pub bits: u64,
}

impl PyStackRef {
    pub fn is_null(self) -> bool {
        self.bits == 1
    }

    pub fn is_tagged_int(self) -> bool {
        self.bits & 3 == 3
    }

    /// The object this reference names, or null for the sentinel and
    /// inline integers.
    pub fn as_object(self) -> MappedAddr {
        if self.is_null() || self.is_tagged_int() {
            return MappedAddr::NULL;
        }
        MappedAddr(self.bits & !1)
    }
}

impl<'a> TryFromCtx<'a, Endian> for PyStackRef {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let (bits, size) = u64::try_from_ctx(src, ctx)?;
        Ok((PyStackRef { bits }, size))
    }
}

impl SizeWith<Endian> for PyStackRef {
    fn size_with(_ctx: &Endian) -> usize {
        8
    }
}

/// The internal execution record; `localsplus` trails it.
#[derive(Clone, Copy, Debug, Pread, SizeWithDerive)]
pub struct PyInterpreterFrame {
    pub f_executable: PyStackRef,
    pub previous: MappedAddr,
    pub f_funcobj: PyStackRef,
    pub f_globals: MappedAddr,
    pub f_builtins: MappedAddr,
    pub f_locals: MappedAddr,
    pub frame_obj: MappedAddr,
    pub instr_ptr: MappedAddr,
    pub stackpointer: MappedAddr,
    pub return_offset: u16,
    pub owner: u8,
    pub visited: u8,
    _pad: u32,
}

/// Size of the fixed interpreter-frame record.
pub const IFRAME_SIZE: u64 = 80;

impl PyInterpreterFrame {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyInterpreterFrame, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        let executable = self.f_executable.as_object();
        if executable.is_null() || !r.obj_valid(executable, OBJ_MIN_SIZE) {
            return Some("invalid_executable");
        }
        if !r.obj_valid_or_null(self.f_globals, 1) {
            return Some("invalid_globals");
        }
        if !r.obj_valid_or_null(self.f_builtins, 1) {
            return Some("invalid_builtins");
        }
        if !r.obj_valid_or_null(self.f_locals, 1) {
            return Some("invalid_locals");
        }
        if !r.obj_valid_or_null(self.frame_obj, 8) {
            return Some("invalid_frame_obj");
        }
        if !self.previous.is_null() && !r.exists_range(self.previous, IFRAME_SIZE) {
            return Some("invalid_previous");
        }
        None
    }

    /// The executable as a code object, when it is one.
    pub fn executable_code(&self, env: &Environment) -> MappedAddr {
        let executable = self.f_executable.as_object();
        if executable.is_null() {
            return MappedAddr::NULL;
        }
        let code_type = env.get_type_if_exists("code");
        if code_type.is_null() {
            return MappedAddr::NULL;
        }
        match env.reader.get::<PyObjectHeader>(executable) {
            Ok(header) if header.ob_type == code_type => executable,
            _ => MappedAddr::NULL,
        }
    }

    /// The bytecode offset of `instr_ptr` within the executable's inline
    /// code, or 0 when it cannot be derived.
    pub fn code_offset(&self, env: &Environment) -> u64 {
        let code_addr = self.executable_code(env);
        if code_addr.is_null() || self.instr_ptr.is_null() {
            return 0;
        }
        let base = code_addr.offset_bytes(CODE_ADAPTIVE_OFFSET);
        if self.instr_ptr.0 < base.0 {
            return 0;
        }
        self.instr_ptr.0 - base.0
    }

    pub fn direct_referents(&self, env: &Environment) -> ReferentSet {
        let mut set = ReferentSet::new();
        let executable = self.f_executable.as_object();
        if !executable.is_null() {
            set.insert(executable);
        }
        set.insert(self.f_globals);
        set.insert(self.f_builtins);
        set.insert(self.f_locals);
        set.insert(self.frame_obj);
        let code_addr = self.executable_code(env);
        if !code_addr.is_null() {
            set.insert(code_addr);
        }
        set
    }

    pub fn repr(&self, t: &mut Traversal) -> String {
        if let Some(reason) = self.invalid_reason(t.env) {
            return t.fail("iframe", reason);
        }
        let code_addr = self.executable_code(t.env);
        if code_addr.is_null() {
            return "<iframe !no_code>".to_string();
        }
        let code = match PyCodeObject::read(t.env, code_addr) {
            Ok(code) => code,
            Err(_) => return t.fail("iframe", "invalid_addr"),
        };
        let offset = self.code_offset(t.env);
        let location = match code.line_for_offset(t.env, offset) {
            Ok(line) => format!("{}:{}", t.repr(code.co_filename), line),
            Err(err) => format!("!({})", err.reason),
        };
        let name = t.repr(code.co_name);
        format!("<iframe {} {}>", name, location)
    }
}

/// The user-visible frame object.
#[derive(Clone, Copy, Debug, Pread, SizeWithDerive)]
pub struct PyFrameObject {
    pub ob_base: PyObjectHeader,
    pub f_back: MappedAddr,
    /// The interpreter frame this object fronts.
    pub f_frame: MappedAddr,
    pub f_trace: MappedAddr,
    pub f_lineno: i32,
    pub f_trace_lines: u8,
    pub f_trace_opcodes: u8,
    _pad: u16,
    pub f_extra_locals: MappedAddr,
    pub f_locals_cache: MappedAddr,
    pub f_overwritten_fast_locals: MappedAddr,
}

impl PyFrameObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyFrameObject, Error> {
        env.reader.get(addr)
    }

    pub fn iframe(&self, env: &Environment) -> Result<PyInterpreterFrame, Error> {
        PyInterpreterFrame::read(env, self.f_frame)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.f_back, OBJ_MIN_SIZE) {
            return Some("invalid_f_back");
        }
        if !r.obj_valid(self.f_frame, IFRAME_SIZE) {
            return Some("invalid_f_frame");
        }
        let iframe = match self.iframe(env) {
            Ok(iframe) => iframe,
            Err(_) => return Some("invalid_f_frame"),
        };
        if let Some(reason) = iframe.invalid_reason(env) {
            return Some(reason);
        }
        if !r.obj_valid_or_null(self.f_trace, OBJ_MIN_SIZE) {
            return Some("invalid_f_trace");
        }
        if !r.obj_valid_or_null(self.f_extra_locals, 1) {
            return Some("invalid_f_extra_locals");
        }
        if !r.obj_valid_or_null(self.f_locals_cache, 1) {
            return Some("invalid_f_locals_cache");
        }
        if !r.obj_valid_or_null(self.f_overwritten_fast_locals, 1) {
            return Some("invalid_f_overwritten_fast_locals");
        }
        None
    }

    pub fn direct_referents(&self, env: &Environment) -> Result<ReferentSet, Error> {
        let mut set = ReferentSet::new();
        set.insert(self.f_back);
        set.insert(self.f_frame);
        set.insert(self.f_trace);
        set.insert(self.f_extra_locals);
        set.insert(self.f_locals_cache);
        set.insert(self.f_overwritten_fast_locals);
        if let Ok(iframe) = self.iframe(env) {
            set.extend(iframe.direct_referents(env));
        }
        Ok(set)
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
            let mut tokens = vec![];
            tokens.push(format!("lineno={}", this.f_lineno));
            match this.iframe(t.env) {
                Ok(iframe) => tokens.push(format!("iframe={}", iframe.repr(t))),
                Err(_) => tokens.push("iframe=<!invalid_addr>".to_string()),
            }
            if !this.f_back.is_null() {
                if t.options.frame_omit_back {
                    tokens.push(format!("back=@{}", this.f_back));
                } else {
                    tokens.push(format!("back={}", t.repr(this.f_back)));
                }
            }
            t.render_tokens("frame", &tokens)
        }) {
            Some(out) => out,
            None => "<frame !recursive_repr>".to_string(),
        }
    }
}

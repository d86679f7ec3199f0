//! 3.14 generators, coroutines and async generators. The suspended
//! interpreter frame is embedded in the object rather than referenced.

use num_traits::{FromPrimitive, ToPrimitive};
use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::asyncobj::PyErrStackItem;
use crate::objects::PyObjectHeader;
use crate::py314::frame::PyInterpreterFrame;
use crate::traverse::Traversal;

/// Offset of the embedded interpreter frame.
pub const IFRAME_OFFSET: u64 = 88;

/// 3.14 frame life-cycle states as stored in `gi_frame_state`.
#[repr(i8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GenFrameState {
    Created = -3,
    Suspended = -2,
    SuspendedYieldFrom = -1,
    Executing = 0,
    Completed = 1,
    Cleared = 4,
}

impl FromPrimitive for GenFrameState {
    fn from_i64(n: i64) -> Option<Self> {
        match n {
            -3 => Some(GenFrameState::Created),
            -2 => Some(GenFrameState::Suspended),
            -1 => Some(GenFrameState::SuspendedYieldFrom),
            0 => Some(GenFrameState::Executing),
            1 => Some(GenFrameState::Completed),
            4 => Some(GenFrameState::Cleared),
            _ => None,
        }
    }

    fn from_u64(n: u64) -> Option<Self> {
        Self::from_i64(n as i64)
    }
}

impl ToPrimitive for GenFrameState {
    fn to_i64(&self) -> Option<i64> {
        Some(*self as i64)
    }

    fn to_u64(&self) -> Option<u64> {
        Some(*self as i64 as u64)
    }
}

impl GenFrameState {
    pub fn name(self) -> &'static str {
        match self {
            GenFrameState::Created => "created",
            GenFrameState::Suspended => "suspended",
            GenFrameState::SuspendedYieldFrom => "suspended_yield_from",
            GenFrameState::Executing => "executing",
            GenFrameState::Completed => "completed",
            GenFrameState::Cleared => "cleared",
        }
    }
}

/// The fixed prefix of a generator; the embedded interpreter frame and its
/// locals array follow.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyGenObject {
    pub ob_base: PyObjectHeader,
    pub gi_weakreflist: MappedAddr,
    pub gi_name: MappedAddr,
    pub gi_qualname: MappedAddr,
    pub gi_exc_state: PyErrStackItem,
    /// Origin tuple for coroutines, finalizer for async generators.
    pub gi_origin_or_finalizer: MappedAddr,
    pub gi_hooks_inited: u8,
    pub gi_closed: u8,
    pub gi_running_async: u8,
    pub gi_frame_state: i8,
    _pad: u32,
}

impl PyGenObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyGenObject, Error> {
        env.reader.get(addr)
    }

    pub fn frame_state(&self) -> Option<GenFrameState> {
        GenFrameState::from_i8(self.gi_frame_state)
    }

    pub fn iframe(&self, env: &Environment, addr: MappedAddr) -> Result<PyInterpreterFrame, Error> {
        PyInterpreterFrame::read(env, addr.offset_bytes(IFRAME_OFFSET))
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.gi_weakreflist, 1) {
            return Some("invalid_gi_weakreflist");
        }
        if !r.obj_valid_or_null(self.gi_name, 1) {
            return Some("invalid_gi_name");
        }
        if !r.obj_valid_or_null(self.gi_qualname, 1) {
            return Some("invalid_gi_qualname");
        }
        if !r.obj_valid_or_null(self.gi_origin_or_finalizer, 1) {
            return Some("invalid_origin_or_finalizer");
        }
        if let Some(reason) = self.gi_exc_state.invalid_reason(env) {
            return Some(reason);
        }
        match self.iframe(env, addr) {
            Ok(iframe) => iframe.invalid_reason(env),
            Err(_) => Some("invalid_gi_iframe"),
        }
    }

    pub fn direct_referents(
        &self,
        env: &Environment,
        addr: MappedAddr,
    ) -> Result<ReferentSet, Error> {
        let mut set = self.gi_exc_state.direct_referents();
        set.insert(self.gi_weakreflist);
        set.insert(self.gi_name);
        set.insert(self.gi_qualname);
        set.insert(self.gi_origin_or_finalizer);
        let iframe = self.iframe(env, addr)?;
        set.extend(iframe.direct_referents(env));
        Ok(set)
    }

    pub fn repr_tokens(&self, t: &mut Traversal, addr: MappedAddr) -> Vec<String> {
        let mut tokens = vec![];
        if !self.gi_name.is_null() {
            tokens.push(format!("name={}", t.repr(self.gi_name)));
        }
        if !self.gi_qualname.is_null() {
            tokens.push(format!("qualname={}", t.repr(self.gi_qualname)));
        }
        match self.frame_state() {
            Some(state) => tokens.push(format!("state={}", state.name())),
            None => tokens.push(format!("!state:{}", self.gi_frame_state)),
        }
        if !self.gi_exc_state.exc_value.is_null() {
            tokens.push(format!("exc_value={}", t.repr(self.gi_exc_state.exc_value)));
        }
        match self.iframe(t.env, addr) {
            Ok(iframe) => tokens.push(format!("iframe={}", iframe.repr(t))),
            Err(_) => tokens.push("iframe=<!invalid_addr>".to_string()),
        }
        if !self.gi_origin_or_finalizer.is_null() {
            tokens.push(format!(
                "origin_or_finalizer={}",
                t.repr(self.gi_origin_or_finalizer)
            ));
        }
        if !self.gi_weakreflist.is_null() {
            tokens.push(format!("weakreflist={}", t.repr(self.gi_weakreflist)));
        }
        tokens
    }

    /// Short-mode coroutine rendering: qualname, state and position.
    pub fn repr_short(&self, t: &mut Traversal, addr: MappedAddr, label: &str) -> String {
        let name = t.repr(self.gi_qualname);
        let state = match self.frame_state() {
            Some(state) => state.name(),
            None => "?",
        };
        match self.iframe(t.env, addr) {
            Ok(iframe) => {
                let rendered = iframe.repr(t);
                format!("<{} {} {} @ {}>", label, name, state, rendered)
            }
            Err(_) => format!("<{} {} {} (no frame)>", label, name, state),
        }
    }
}

//! 3.10 tuple objects: item pointers inline after the header.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::{PyObjectHeader, PyVarObject};
use crate::traverse::Traversal;

/// Offset of the inline item array.
pub const ITEMS_OFFSET: u64 = 24;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyTupleObject {
    pub ob_base: PyVarObject,
}

impl PyTupleObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyTupleObject, Error> {
        env.reader.get(addr)
    }

    pub fn len(&self) -> u64 {
        self.ob_base.ob_size.max(0) as u64
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        if self.ob_base.ob_size == 0 {
            return None;
        }
        if self.ob_base.ob_size < 0 {
            return Some("items_out_of_range");
        }
        match self.len().checked_mul(8) {
            Some(bytes) if env.reader.exists_range(addr, ITEMS_OFFSET + bytes) => {}
            _ => return Some("items_out_of_range"),
        }
        // Item headers only; validation does not recurse. Callers
        // re-validate any item before using it.
        for item in self.items(env, addr).unwrap_or_default() {
            let header: PyObjectHeader = match env.reader.get(item) {
                Ok(header) => header,
                Err(_) => return Some("invalid_item_ptr"),
            };
            if let Some(reason) = header.invalid_reason(env) {
                return Some(reason);
            }
        }
        None
    }

    pub fn items(&self, env: &Environment, addr: MappedAddr) -> Result<Vec<MappedAddr>, Error> {
        env.reader
            .get_array(addr.offset_bytes(ITEMS_OFFSET), self.len())
    }

    pub fn direct_referents(
        &self,
        env: &Environment,
        addr: MappedAddr,
    ) -> Result<ReferentSet, Error> {
        Ok(self.items(env, addr)?.into_iter().collect())
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        if !t.recursion_allowed() {
            return "<tuple !recursion_depth>".to_string();
        }
        let items = match self.items(t.env, addr) {
            Ok(items) => items,
            Err(_) => return t.fail("tuple", "items_out_of_range"),
        };
        let host = match t.env.reader.host_addr(addr) {
            Ok(host) => host,
            Err(_) => return t.fail("tuple", "invalid_addr"),
        };
        match t.nested(host, |t| {
            let mut rendered = vec![];
            let mut has_extra = false;
            for item in &items {
                if t.entry_limit_reached(rendered.len()) {
                    has_extra = true;
                    break;
                }
                rendered.push(t.repr(*item));
            }
            t.render_container("tuple", &rendered, has_extra)
        }) {
            Some(out) => out,
            None => "<tuple !recursive_repr>".to_string(),
        }
    }
}

//! List objects: an out-of-line array of `allocated` slots, `ob_size` of
//! which are in use.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::{PyObjectHeader, PyVarObject};
use crate::traverse::Traversal;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyListObject {
    pub ob_base: PyVarObject,
    pub ob_item: MappedAddr,
    pub allocated: u64,
}

impl PyListObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyListObject, Error> {
        env.reader.get(addr)
    }

    pub fn len(&self) -> u64 {
        self.ob_base.ob_size.max(0) as u64
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        if self.ob_base.ob_size < 0 || self.len() > self.allocated {
            return Some("invalid_size");
        }
        if self.ob_item.is_null() {
            if self.allocated > 0 {
                return Some("invalid_item_list");
            }
            return None;
        }
        if self.allocated == 0 {
            return Some("invalid_alloc_count");
        }
        match self.allocated.checked_mul(8) {
            Some(bytes) if env.reader.exists_range(self.ob_item, bytes) => {}
            _ => return Some("items_out_of_range"),
        }
        // Items are only header-checked; callers re-validate before use.
        for item in self.items(env).unwrap_or_default() {
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

    pub fn items(&self, env: &Environment) -> Result<Vec<MappedAddr>, Error> {
        if self.ob_item.is_null() {
            return Ok(vec![]);
        }
        env.reader.get_array(self.ob_item, self.len())
    }

    pub fn direct_referents(&self, env: &Environment) -> Result<ReferentSet, Error> {
        Ok(self.items(env)?.into_iter().collect())
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        if !t.recursion_allowed() {
            return "<list !recursion_depth>".to_string();
        }
        let items = match self.items(t.env) {
            Ok(items) => items,
            Err(_) => return t.fail("list", "items_out_of_range"),
        };
        let host = match t.env.reader.host_addr(addr) {
            Ok(host) => host,
            Err(_) => return t.fail("list", "invalid_addr"),
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
            t.render_container("list", &rendered, has_extra)
        }) {
            Some(out) => out,
            None => "<list !recursive_repr>".to_string(),
        }
    }
}

//! Set objects: a hash table of `(key, hash)` entries.
//!
//! Only the out-of-line table is decoded; the small-table optimization is
//! invisible here because `table` points at whichever storage is in use.
//! CPython's dummy sentinel cannot be told apart from a live key in a
//! snapshot, so removed entries surface like live ones.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::PyObjectHeader;
use crate::traverse::Traversal;

/// One slot of the table.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PySetEntry {
    pub key: MappedAddr,
    pub hash: u64,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PySetObject {
    pub ob_base: PyObjectHeader,
    /// Active plus dummy entries.
    pub fill: i64,
    /// Active entries.
    pub used: i64,
    /// Slot count minus one.
    pub mask: i64,
    pub table: MappedAddr,
    pub hash: u64,
    pub finger: i64,
}

impl PySetObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PySetObject, Error> {
        env.reader.get(addr)
    }

    fn slot_count(&self) -> u64 {
        (self.mask as u64).wrapping_add(1)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        if self.mask < 0
            || self.used < 0
            || self.fill < self.used
            || self.fill > self.mask + 1
        {
            return Some("invalid_size");
        }
        if self.table.is_null() {
            return Some("invalid_table");
        }
        match self.slot_count().checked_mul(16) {
            Some(bytes) if env.reader.exists_range(self.table, bytes) => {}
            _ => return Some("items_out_of_range"),
        }
        for key in self.items(env).unwrap_or_default() {
            let header: PyObjectHeader = match env.reader.get(key) {
                Ok(header) => header,
                Err(_) => return Some("invalid_item_ptr"),
            };
            if let Some(reason) = header.invalid_reason(env) {
                return Some(reason);
            }
        }
        None
    }

    /// The non-null keys of the table, in slot order.
    pub fn items(&self, env: &Environment) -> Result<Vec<MappedAddr>, Error> {
        let entries: Vec<PySetEntry> = env.reader.get_array(self.table, self.slot_count())?;
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.key.is_null())
            .map(|entry| entry.key)
            .collect())
    }

    pub fn direct_referents(&self, env: &Environment) -> Result<ReferentSet, Error> {
        let mut set: ReferentSet = self.items(env)?.into_iter().collect();
        set.insert(self.table);
        Ok(set)
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        if !t.recursion_allowed() {
            return "<set !recursion_depth>".to_string();
        }
        let items = match self.items(t.env) {
            Ok(items) => items,
            Err(_) => return t.fail("set", "items_out_of_range"),
        };
        let host = match t.env.reader.host_addr(addr) {
            Ok(host) => host,
            Err(_) => return t.fail("set", "invalid_addr"),
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
            t.render_container("set", &rendered, has_extra)
        }) {
            Some(out) => out,
            None => "<set !recursive_repr>".to_string(),
        }
    }
}

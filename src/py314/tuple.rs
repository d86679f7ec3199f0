//! 3.14 tuple objects: a cached hash word sits between the header and the
//! inline items.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::{PyObjectHeader, PyVarObject};
use crate::traverse::Traversal;

/// Offset of the inline item array.
pub const ITEMS_OFFSET: u64 = 32;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyTupleObject {
    pub ob_base: PyVarObject,
    pub ob_hash: i64,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::synth::{tuple_object_314, PyWorld};

    #[test]
    fn test_items_after_hash_word() {
        let mut world = PyWorld::new(0x1000);
        let tuple_type = world.add_type("tuple");
        let int_type = world.add_type("int");
        let item = world
            .world
            .place(crate::synth::long_object_314(int_type, 0, &[1]));
        let addr = world.world.place(tuple_object_314(tuple_type, &[item]));
        let env = world.env(PyVersion::Py314);
        let addr = MappedAddr(addr);
        let tuple = PyTupleObject::read(&env, addr).unwrap();
        assert_eq!(tuple.invalid_reason(&env, addr), None);
        assert_eq!(tuple.items(&env, addr).unwrap(), vec![MappedAddr(item)]);
    }
}

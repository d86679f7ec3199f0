//! Cell objects: a single indirect reference.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::PyObjectHeader;
use crate::traverse::Traversal;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyCellObject {
    pub ob_base: PyObjectHeader,
    pub ob_ref: MappedAddr,
}

impl PyCellObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyCellObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        if !env.reader.obj_valid_or_null(self.ob_ref, 1) {
            return Some("invalid_ob_ref");
        }
        None
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = ReferentSet::new();
        set.insert(self.ob_ref);
        set
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        if !t.recursion_allowed() {
            return "<cell !recursion_depth>".to_string();
        }
        let host = match t.env.reader.host_addr(addr) {
            Ok(host) => host,
            Err(_) => return t.fail("cell", "invalid_addr"),
        };
        let ob_ref = self.ob_ref;
        match t.nested(host, |t| format!("<cell ob_ref={}>", t.repr(ob_ref))) {
            Some(out) => out,
            None => "<cell !recursive_repr>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::synth::{bytes_of, obj_header, PyWorld};

    #[test]
    fn test_validation_and_referents() {
        let mut world = PyWorld::new(0x1000);
        let cell_type = world.add_type("cell");
        let ok = world.world.place(bytes_of(obj_header(cell_type).D64(0)));
        let bad = world
            .world
            .place(bytes_of(obj_header(cell_type).D64(0xdead_0000)));
        let env = world.env(PyVersion::Py310);
        let cell = PyCellObject::read(&env, MappedAddr(ok)).unwrap();
        assert_eq!(cell.invalid_reason(&env), None);
        assert!(cell.direct_referents().contains(&MappedAddr::NULL));
        let cell = PyCellObject::read(&env, MappedAddr(bad)).unwrap();
        assert_eq!(cell.invalid_reason(&env), Some("invalid_ob_ref"));
    }
}

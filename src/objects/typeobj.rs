//! Type descriptors.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::Error;
use crate::objects::PyVarObject;

/// Total size of a type descriptor, through `tp_vectorcall`.
pub const TYPE_OBJECT_SIZE: u64 = 0x198;

/// A type descriptor. The function-pointer slots are opaque: they are only
/// checked for existence, never called or decoded.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyTypeObject {
    pub ob_base: PyVarObject,
    /* 0000 */ pub tp_name: MappedAddr,
    /* 0008 */ pub tp_basicsize: i64,
    /* 0010 */ pub tp_itemsize: i64,
    /* 0018 */ pub tp_dealloc: MappedAddr,
    /* 0020 */ pub tp_vectorcall_offset: i64,
    /* 0028 */ pub tp_getattr: MappedAddr,
    /* 0030 */ pub tp_setattr: MappedAddr,
    /* 0038 */ pub tp_as_async: MappedAddr,
    /* 0040 */ pub tp_repr: MappedAddr,
    /* 0048 */ pub tp_as_number: MappedAddr,
    /* 0050 */ pub tp_as_sequence: MappedAddr,
    /* 0058 */ pub tp_as_mapping: MappedAddr,
    /* 0060 */ pub tp_hash: MappedAddr,
    /* 0068 */ pub tp_call: MappedAddr,
    /* 0070 */ pub tp_str: MappedAddr,
    /* 0078 */ pub tp_getattro: MappedAddr,
    /* 0080 */ pub tp_setattro: MappedAddr,
    /* 0088 */ pub tp_as_buffer: MappedAddr,
    /* 0090 */ pub tp_flags: u64,
    /* 0098 */ pub tp_doc: MappedAddr,
    /* 00a0 */ pub tp_traverse: MappedAddr,
    /* 00a8 */ pub tp_clear: MappedAddr,
    /* 00b0 */ pub tp_richcompare: MappedAddr,
    /* 00b8 */ pub tp_weaklistoffset: i64,
    /* 00c0 */ pub tp_iter: MappedAddr,
    /* 00c8 */ pub tp_iternext: MappedAddr,
    /* 00d0 */ pub tp_methods: MappedAddr,
    /* 00d8 */ pub tp_members: MappedAddr,
    /* 00e0 */ pub tp_getset: MappedAddr,
    /* 00e8 */ pub tp_base: MappedAddr,
    /* 00f0 */ pub tp_dict: MappedAddr,
    /* 00f8 */ pub tp_descr_get: MappedAddr,
    /* 0100 */ pub tp_descr_set: MappedAddr,
    /* 0108 */ pub tp_dictoffset: i64,
    /* 0110 */ pub tp_init: MappedAddr,
    /* 0118 */ pub tp_alloc: MappedAddr,
    /* 0120 */ pub tp_new: MappedAddr,
    /* 0128 */ pub tp_free: MappedAddr,
    /* 0130 */ pub tp_is_gc: MappedAddr,
    /* 0138 */ pub tp_bases: MappedAddr,
    /* 0140 */ pub tp_mro: MappedAddr,
    /* 0148 */ pub tp_cache: MappedAddr,
    /* 0150 */ pub tp_subclasses: MappedAddr,
    /* 0158 */ pub tp_weaklist: MappedAddr,
    /* 0160 */ pub tp_del: MappedAddr,
    /* 0168 */ pub tp_version_tag: u32,
    _pad: u32,
    /* 0170 */ pub tp_finalize: MappedAddr,
    /* 0178 */ pub tp_vectorcall: MappedAddr,
}

/// Whether a decoded `tp_name` looks like a Python type name: a leading
/// letter or underscore, then letters, digits, underscores and dots.
pub fn type_name_is_valid(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.')
}

impl PyTypeObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyTypeObject, Error> {
        env.reader.get(addr)
    }

    /// The type's name, or an empty string when the name bytes do not look
    /// like a name.
    pub fn name(&self, env: &Environment) -> Result<String, Error> {
        let name = env.reader.get_cstr(self.tp_name)?;
        if type_name_is_valid(&name) {
            Ok(name)
        } else {
            Ok(String::new())
        }
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        if let Some(reason) = self.ob_base.ob_base.invalid_reason(env) {
            return Some(reason);
        }
        let r = &env.reader;
        if !r.obj_valid(self.tp_name, 1) {
            return Some("invalid_tp_name");
        }
        // tp_vectorcall is deliberately not checked; interpreters stash
        // non-pointer values there.
        let slots: [(MappedAddr, &'static str); 39] = [
            (self.tp_dealloc, "invalid_tp_dealloc"),
            (self.tp_getattr, "invalid_tp_getattr"),
            (self.tp_setattr, "invalid_tp_setattr"),
            (self.tp_as_async, "invalid_tp_as_async"),
            (self.tp_repr, "invalid_tp_repr"),
            (self.tp_as_number, "invalid_tp_as_number"),
            (self.tp_as_sequence, "invalid_tp_as_sequence"),
            (self.tp_as_mapping, "invalid_tp_as_mapping"),
            (self.tp_hash, "invalid_tp_hash"),
            (self.tp_call, "invalid_tp_call"),
            (self.tp_str, "invalid_tp_str"),
            (self.tp_getattro, "invalid_tp_getattro"),
            (self.tp_setattro, "invalid_tp_setattro"),
            (self.tp_as_buffer, "invalid_tp_as_buffer"),
            (self.tp_doc, "invalid_tp_doc"),
            (self.tp_traverse, "invalid_tp_traverse"),
            (self.tp_clear, "invalid_tp_clear"),
            (self.tp_richcompare, "invalid_tp_richcompare"),
            (self.tp_iter, "invalid_tp_iter"),
            (self.tp_iternext, "invalid_tp_iternext"),
            (self.tp_methods, "invalid_tp_methods"),
            (self.tp_members, "invalid_tp_members"),
            (self.tp_getset, "invalid_tp_getset"),
            (self.tp_base, "invalid_tp_base"),
            (self.tp_dict, "invalid_tp_dict"),
            (self.tp_descr_get, "invalid_tp_descr_get"),
            (self.tp_descr_set, "invalid_tp_descr_set"),
            (self.tp_init, "invalid_tp_init"),
            (self.tp_alloc, "invalid_tp_alloc"),
            (self.tp_new, "invalid_tp_new"),
            (self.tp_free, "invalid_tp_free"),
            (self.tp_is_gc, "invalid_tp_is_gc"),
            (self.tp_bases, "invalid_tp_bases"),
            (self.tp_mro, "invalid_tp_mro"),
            (self.tp_cache, "invalid_tp_cache"),
            (self.tp_subclasses, "invalid_tp_subclasses"),
            (self.tp_weaklist, "invalid_tp_weaklist"),
            (self.tp_del, "invalid_tp_del"),
            (self.tp_finalize, "invalid_tp_finalize"),
        ];
        for &(slot, tag) in slots.iter() {
            if !r.obj_valid_or_null(slot, 1) {
                return Some(tag);
            }
        }
        match self.name(env) {
            Ok(name) if name.is_empty() => Some("invalid_name"),
            Ok(_) => None,
            Err(_) => Some("invalid_name_ptr"),
        }
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = ReferentSet::new();
        for addr in [
            self.tp_name,
            self.tp_dealloc,
            self.tp_getattr,
            self.tp_setattr,
            self.tp_as_async,
            self.tp_repr,
            self.tp_as_number,
            self.tp_as_sequence,
            self.tp_as_mapping,
            self.tp_hash,
            self.tp_call,
            self.tp_str,
            self.tp_getattro,
            self.tp_setattro,
            self.tp_as_buffer,
            self.tp_doc,
            self.tp_traverse,
            self.tp_clear,
            self.tp_richcompare,
            self.tp_iter,
            self.tp_iternext,
            self.tp_methods,
            self.tp_members,
            self.tp_getset,
            self.tp_base,
            self.tp_dict,
            self.tp_descr_get,
            self.tp_descr_set,
            self.tp_init,
            self.tp_alloc,
            self.tp_new,
            self.tp_free,
            self.tp_is_gc,
            self.tp_bases,
            self.tp_mro,
            self.tp_cache,
            self.tp_subclasses,
            self.tp_weaklist,
            self.tp_del,
            self.tp_finalize,
            self.tp_vectorcall,
        ]
        .iter()
        {
            set.insert(*addr);
        }
        set
    }

    pub fn repr(&self, env: &Environment) -> String {
        match self.name(env) {
            Ok(name) => format!("<type {}>", name),
            Err(_) => "<type !invalid_name_ptr>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::scroll_size_check;
    use crate::synth::PyWorld;

    #[test]
    fn test_struct_size() {
        scroll_size_check::<PyTypeObject>(TYPE_OBJECT_SIZE);
    }

    #[test]
    fn test_name_validity() {
        assert!(type_name_is_valid("int"));
        assert!(type_name_is_valid("_asyncio.Future"));
        assert!(type_name_is_valid("_GatheringFuture"));
        assert!(!type_name_is_valid(""));
        assert!(!type_name_is_valid("3rd"));
        assert!(!type_name_is_valid("has space"));
    }

    #[test]
    fn test_valid_type_object() {
        let mut world = PyWorld::new(0x1000);
        let int_type = world.add_type("int");
        let env = world.env(PyVersion::Py310);
        let type_obj = PyTypeObject::read(&env, MappedAddr(int_type)).unwrap();
        assert_eq!(type_obj.invalid_reason(&env), None);
        assert_eq!(type_obj.name(&env).unwrap(), "int");
        assert_eq!(type_obj.repr(&env), "<type int>");
        // The referent set contains the name pointer and the null slots.
        let referents = type_obj.direct_referents();
        assert!(referents.contains(&type_obj.tp_name));
        assert!(referents.contains(&MappedAddr::NULL));
    }

    #[test]
    fn test_dangling_name() {
        use crate::synth::{bytes_of, type_object};
        let mut world = PyWorld::new(0x1000);
        let addr = world.world.place(bytes_of(type_object(
            world.meta_type,
            0xdead_0000, // not in any region
        )));
        let env = world.env(PyVersion::Py310);
        let type_obj = PyTypeObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(type_obj.invalid_reason(&env), Some("invalid_tp_name"));
    }
}

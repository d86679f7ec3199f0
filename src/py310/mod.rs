//! The CPython 3.10 variant set and its dispatch.
//!
//! Dispatch is by type-pointer identity against the registry: the meta
//! type first, then the well-known names, then the fallbacks (the
//! `NoneType` unit value and user-defined instances with an embedded
//! `__dict__` 16 bytes past the header).

pub mod code;
pub mod dict;
pub mod frame;
pub mod gen;
pub mod int;
pub mod threadstate;
pub mod tuple;

use crate::addr::MappedAddr;
use crate::env::{Environment, InvalidObject, ReferentSet};
use crate::objects::asyncobj::{PyFutureObject, PyTaskObject};
use crate::objects::bytesobj::PyBytesObject;
use crate::objects::cell::PyCellObject;
use crate::objects::float::PyFloatObject;
use crate::objects::list::PyListObject;
use crate::objects::set::PySetObject;
use crate::objects::strobj::{repr_string, PyAsciiStringObject};
use crate::objects::typeobj::PyTypeObject;
use crate::objects::PyObjectHeader;
use crate::traverse::Traversal;

use self::code::PyCodeObject;
use self::dict::PyDictObject;
use self::frame::PyFrameObject;
use self::gen::{repr_gen_like, PyAsyncGenObject, PyCoroObject, PyGenObject};
use self::int::{PyBoolObject, PyLongObject};
use self::threadstate::PyThreadState;
use self::tuple::PyTupleObject;

/// The universal validator. `None` means the object is valid.
pub(crate) fn invalid_reason(
    env: &Environment,
    addr: MappedAddr,
    expected_type: Option<MappedAddr>,
) -> Option<&'static str> {
    if addr.is_null() {
        return Some("null_obj_ptr");
    }
    let header: PyObjectHeader = match env.reader.get(addr) {
        Ok(header) => header,
        Err(_) => return Some("invalid_addr"),
    };
    if let Some(reason) = header.invalid_reason(env) {
        return Some(reason);
    }
    let type_obj = match PyTypeObject::read(env, header.ob_type) {
        Ok(type_obj) => type_obj,
        Err(_) => return Some("invalid_addr"),
    };
    if type_obj.invalid_reason(env).is_some() {
        return Some("invalid_type_obj");
    }
    if let Some(expected) = expected_type {
        if header.ob_type != expected {
            return Some("incorrect_type");
        }
    }

    let ty = header.ob_type;
    if !env.base_type_object.is_null() && ty == env.base_type_object {
        return match PyTypeObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("int") {
        return match PyLongObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env, addr),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("bool") {
        return match PyBoolObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env, addr),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("float") {
        return match env.reader.get::<PyFloatObject>(addr) {
            Ok(_) => None,
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("bytes") {
        return match PyBytesObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env, addr),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("str") {
        return match PyAsciiStringObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env, addr),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("tuple") {
        return match PyTupleObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env, addr),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("list") {
        return match PyListObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("set") {
        return match PySetObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("dict") {
        return match PyDictObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("code") {
        return match PyCodeObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("cell") {
        return match PyCellObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("frame") {
        return match PyFrameObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env, addr),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("generator") {
        return match PyGenObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("coroutine") {
        return match PyCoroObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("asyncgen") {
        return match PyAsyncGenObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_asyncio.Future")
        || ty == env.get_type_if_exists("_GatheringFuture")
    {
        return match PyFutureObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_asyncio.Task") {
        return match PyTaskObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }

    let name = type_obj.name(env).unwrap_or_default();
    if name == "NoneType" {
        // The unit value: no fields to check.
        return None;
    }
    instance_dict_invalid_reason(env, addr)
}

/// Validates the `__dict__` a user-defined instance keeps 16 bytes past
/// its header.
fn instance_dict_invalid_reason(env: &Environment, addr: MappedAddr) -> Option<&'static str> {
    let dict_addr: MappedAddr = match env.reader.get(addr.offset_bytes(0x10)) {
        Ok(dict_addr) => dict_addr,
        Err(_) => return Some("dict_out_of_range"),
    };
    let dict = match PyDictObject::read(env, dict_addr) {
        Ok(dict) => dict,
        Err(_) => return Some("dict_out_of_range"),
    };
    if dict.ob_base.ob_type != env.get_type_if_exists("dict") {
        return Some("dict_attr_not_dict");
    }
    dict.invalid_reason(env)
}

/// Enumerates outgoing edges after a full validation. Atomic: any failure
/// is an error, never a partial set.
pub(crate) fn direct_referents(
    env: &Environment,
    addr: MappedAddr,
) -> Result<ReferentSet, InvalidObject> {
    if let Some(reason) = invalid_reason(env, addr, None) {
        return Err(InvalidObject::new(reason));
    }
    let read_failed = |_| InvalidObject::new("invalid_addr");
    let header: PyObjectHeader = env.reader.get(addr).map_err(read_failed)?;
    let ty = header.ob_type;

    if !env.base_type_object.is_null() && ty == env.base_type_object {
        let obj = PyTypeObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("int")
        || ty == env.get_type_if_exists("bool")
        || ty == env.get_type_if_exists("float")
        || ty == env.get_type_if_exists("bytes")
        || ty == env.get_type_if_exists("str")
    {
        return Ok(ReferentSet::new());
    }
    if ty == env.get_type_if_exists("tuple") {
        let obj = PyTupleObject::read(env, addr).map_err(read_failed)?;
        return obj
            .direct_referents(env, addr)
            .map_err(|_| InvalidObject::new("invalid_item_ptr"));
    }
    if ty == env.get_type_if_exists("list") {
        let obj = PyListObject::read(env, addr).map_err(read_failed)?;
        return obj
            .direct_referents(env)
            .map_err(|_| InvalidObject::new("invalid_item_ptr"));
    }
    if ty == env.get_type_if_exists("set") {
        let obj = PySetObject::read(env, addr).map_err(read_failed)?;
        return obj
            .direct_referents(env)
            .map_err(|_| InvalidObject::new("invalid_item_ptr"));
    }
    if ty == env.get_type_if_exists("dict") {
        let obj = PyDictObject::read(env, addr).map_err(read_failed)?;
        return obj
            .direct_referents(env)
            .map_err(|_| InvalidObject::new("invalid_entry"));
    }
    if ty == env.get_type_if_exists("code") {
        let obj = PyCodeObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("cell") {
        let obj = PyCellObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("frame") {
        let obj = PyFrameObject::read(env, addr).map_err(read_failed)?;
        return obj
            .direct_referents(env, addr)
            .map_err(|_| InvalidObject::new("items_out_of_range"));
    }
    if ty == env.get_type_if_exists("generator") {
        let obj = PyGenObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("coroutine") {
        let obj = PyCoroObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("asyncgen") {
        let obj = PyAsyncGenObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("_asyncio.Future") {
        let obj = PyFutureObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("_asyncio.Task") {
        let obj = PyTaskObject::read(env, addr).map_err(read_failed)?;
        return Ok(obj.direct_referents());
    }
    if ty == env.get_type_if_exists("_GatheringFuture") {
        let obj = PyFutureObject::read(env, addr).map_err(read_failed)?;
        let mut set = obj.direct_referents();
        for child in gathering_children(env, &obj)? {
            set.insert(child);
        }
        return Ok(set);
    }

    let type_obj = PyTypeObject::read(env, ty).map_err(read_failed)?;
    let name = type_obj
        .name(env)
        .map_err(|_| InvalidObject::new("invalid_type_obj"))?;
    if name == "NoneType" {
        return Ok(ReferentSet::new());
    }
    let dict_addr: MappedAddr = env
        .reader
        .get(addr.offset_bytes(0x10))
        .map_err(|_| InvalidObject::new("dict_out_of_range"))?;
    let dict = PyDictObject::read(env, dict_addr)
        .map_err(|_| InvalidObject::new("dict_out_of_range"))?;
    if dict.ob_base.ob_type != env.get_type_if_exists("dict") {
        return Err(InvalidObject::new("dict_attr_not_dict"));
    }
    dict.direct_referents(env)
        .map_err(|_| InvalidObject::new("invalid_entry"))
}

/// The `_children` list a gathering future keeps in its instance dict.
pub(crate) fn gathering_children(
    env: &Environment,
    fut: &PyFutureObject,
) -> Result<Vec<MappedAddr>, InvalidObject> {
    let dict = PyDictObject::read(env, fut.dict)
        .map_err(|_| InvalidObject::new("invalid_dict"))?;
    if let Some(reason) = dict.invalid_reason(env) {
        return Err(InvalidObject::new(reason));
    }
    let children_addr = dict
        .value_for_key(env, "_children")
        .map_err(|_| InvalidObject::new("invalid_entry"))?
        .ok_or_else(|| InvalidObject::new("invalid_dict"))?;
    let children = PyListObject::read(env, children_addr)
        .map_err(|_| InvalidObject::new("invalid_addr"))?;
    if let Some(reason) = children.invalid_reason(env) {
        return Err(InvalidObject::new(reason));
    }
    children
        .items(env)
        .map_err(|_| InvalidObject::new("invalid_item_ptr"))
}

fn with_addr(rendered: String, show_addr: bool, addr: MappedAddr) -> String {
    if show_addr {
        format!("{}@{}", rendered, addr)
    } else {
        rendered
    }
}

/// Renders any object. Total: failures become `<variant !tag>` tokens.
pub(crate) fn repr(t: &mut Traversal, addr: MappedAddr) -> String {
    if addr.is_null() {
        return "NULL".to_string();
    }
    let env = t.env;
    let header: PyObjectHeader = match env.reader.get(addr) {
        Ok(header) => header,
        Err(_) => {
            t.is_valid = false;
            return format!("<!invalid_addr>@{}", addr);
        }
    };
    if let Some(reason) = header.invalid_reason(env) {
        t.is_valid = false;
        return format!("<!{}>@{}", reason, addr);
    }
    let type_obj = match PyTypeObject::read(env, header.ob_type) {
        Ok(type_obj) => type_obj,
        Err(_) => {
            t.is_valid = false;
            return format!("<!invalid_type_obj>@{}", addr);
        }
    };
    if type_obj.invalid_reason(env).is_some() {
        t.is_valid = false;
        return format!("<!invalid_type_obj>@{}", addr);
    }

    let ty = header.ob_type;
    // Atomic variants take the address suffix only as the rendering root
    // (or under show_all_addresses); everything else never does.
    let show_addr = t.is_root() || t.options.show_all_addresses;

    if !env.base_type_object.is_null() && ty == env.base_type_object {
        return match PyTypeObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("type", reason),
                None => obj.repr(env),
            },
            Err(_) => t.fail("type", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("int") {
        let rendered = match PyLongObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env, addr) {
                Some(reason) => t.fail("int", reason),
                None => obj.repr(env, addr),
            },
            Err(_) => t.fail("int", "invalid_addr"),
        };
        return with_addr(rendered, show_addr, addr);
    }
    if ty == env.get_type_if_exists("bool") {
        let rendered = match PyBoolObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env, addr) {
                Some(reason) => t.fail("bool", reason),
                None => obj.repr(),
            },
            Err(_) => t.fail("bool", "invalid_addr"),
        };
        return with_addr(rendered, show_addr, addr);
    }
    if ty == env.get_type_if_exists("float") {
        let rendered = match env.reader.get::<PyFloatObject>(addr) {
            Ok(obj) => obj.repr(t),
            Err(_) => t.fail("float", "invalid_addr"),
        };
        return with_addr(rendered, show_addr, addr);
    }
    if ty == env.get_type_if_exists("bytes") {
        let rendered = match PyBytesObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env, addr) {
                Some(reason) => t.fail("bytes", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("bytes", "invalid_addr"),
        };
        return with_addr(rendered, show_addr, addr);
    }
    if ty == env.get_type_if_exists("str") {
        let rendered = match PyAsciiStringObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env, addr) {
                Some(reason) => t.fail("str", reason),
                None => repr_string(t, addr),
            },
            Err(_) => t.fail("str", "invalid_addr"),
        };
        return with_addr(rendered, show_addr, addr);
    }
    if ty == env.get_type_if_exists("tuple") {
        return match PyTupleObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env, addr) {
                Some(reason) => t.fail("tuple", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("tuple", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("list") {
        return match PyListObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("list", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("list", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("set") {
        return match PySetObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("set", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("set", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("dict") {
        return match PyDictObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("dict", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("dict", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("code") {
        return match PyCodeObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("code", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("code", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("cell") {
        return match PyCellObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("cell", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("cell", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("frame") {
        return match PyFrameObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env, addr) {
                Some(reason) => t.fail("frame", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("frame", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("generator") {
        return match PyGenObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("generator", reason),
                None => repr_gen_like(t, addr, "generator", move |t| obj.repr_tokens(t)),
            },
            Err(_) => t.fail("generator", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("coroutine") {
        return match PyCoroObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("coroutine", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("coroutine", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("asyncgen") {
        return match PyAsyncGenObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("asyncgen", reason),
                None => repr_gen_like(t, addr, "asyncgen", move |t| obj.repr_tokens(t)),
            },
            Err(_) => t.fail("asyncgen", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_asyncio.Future") {
        return match PyFutureObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("async future", reason),
                None => {
                    repr_gen_like(t, addr, "async future", move |t| obj.repr_tokens(t))
                }
            },
            Err(_) => t.fail("async future", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_asyncio.Task") {
        return match PyTaskObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("async task", reason),
                None => repr_gen_like(t, addr, "async task", move |t| obj.repr_tokens(t)),
            },
            Err(_) => t.fail("async task", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_GatheringFuture") {
        return match PyFutureObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("async _GatheringFuture", reason),
                None => repr_gen_like(t, addr, "async _GatheringFuture", move |t| {
                    let mut tokens = obj.repr_tokens(t);
                    if !t.options.is_short {
                        match gathering_children(t.env, &obj) {
                            Ok(children) => {
                                for (index, child) in children.iter().enumerate() {
                                    let child_repr = t.repr(*child);
                                    tokens.push(format!("children[{}]={}", index, child_repr));
                                }
                            }
                            Err(err) => {
                                tokens.push(format!("children=!({})", err.reason));
                            }
                        }
                    }
                    tokens
                }),
            },
            Err(_) => t.fail("async _GatheringFuture", "invalid_addr"),
        };
    }

    let name = type_obj.name(env).unwrap_or_default();
    if name == "NoneType" {
        return with_addr("None".to_string(), show_addr, addr);
    }
    repr_instance(t, addr, &name)
}

/// A user-defined instance renders as `<TypeName>`, expanding its
/// `__dict__` only as the rendering root.
fn repr_instance(t: &mut Traversal, addr: MappedAddr, name: &str) -> String {
    if t.is_root() {
        let env = t.env;
        if let Ok(dict_addr) = env.reader.get::<MappedAddr>(addr.offset_bytes(0x10)) {
            if let Ok(dict) = PyDictObject::read(env, dict_addr) {
                if !env.get_type_if_exists("dict").is_null()
                    && dict.ob_base.ob_type == env.get_type_if_exists("dict")
                {
                    if let Ok(host) = env.reader.host_addr(addr) {
                        if let Some(rendered) = t.nested(host, |t| t.repr(dict_addr)) {
                            return format!("<{} {}>", name, rendered);
                        }
                    }
                }
            }
        }
    }
    format!("<{}>", name)
}

/// Validates and renders a thread state, which is reached by address, not
/// by type dispatch.
pub(crate) fn repr_thread_state(t: &mut Traversal, addr: MappedAddr) -> String {
    if addr.is_null() {
        return "NULL".to_string();
    }
    let ts = match PyThreadState::read(t.env, addr) {
        Ok(ts) => ts,
        Err(_) => {
            t.is_valid = false;
            return format!("<!invalid_addr>@{}", addr);
        }
    };
    if let Some(reason) = ts.invalid_reason(t.env) {
        return t.fail("thread state", reason);
    }
    let host = match t.env.reader.host_addr(addr) {
        Ok(host) => host,
        Err(_) => return t.fail("thread state", "invalid_addr"),
    };
    match t.nested(host, |t| {
        let tokens = ts.repr_tokens(t);
        t.render_tokens("thread state", &tokens)
    }) {
        Some(out) => out,
        None => "<thread state !recursive_repr>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::synth::*;
    use crate::traverse::TraverseOptions;

    fn env_with<F: FnOnce(&mut PyWorld) -> u64>(types: &[&'static str], build: F) -> (Environment, MappedAddr) {
        let mut world = PyWorld::new(0x1000);
        for name in types {
            world.add_type(name);
        }
        let addr = build(&mut world);
        (world.env(PyVersion::Py310), MappedAddr(addr))
    }

    #[test]
    fn test_null_pointer() {
        let (env, _) = env_with(&[], |_| 0);
        assert_eq!(env.invalid_reason(MappedAddr::NULL, None), Some("null_obj_ptr"));
        assert_eq!(
            env.direct_referents(MappedAddr::NULL).unwrap_err().reason,
            "null_obj_ptr"
        );
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(MappedAddr::NULL), "NULL");
    }

    #[test]
    fn test_unmapped_address() {
        let (env, _) = env_with(&[], |_| 0);
        assert_eq!(
            env.invalid_reason(MappedAddr(0xdead_beef), None),
            Some("invalid_addr")
        );
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(MappedAddr(0xdead_beef)), "<!invalid_addr>@0xdeadbeef");
        assert!(!t.is_valid);
    }

    #[test]
    fn test_small_int_addresses() {
        // A one-digit long shows its address only as the rendering root.
        let mut world = PyWorld::new(0x8000);
        let int_type = world.add_type("int");
        let tuple_type = world.add_type("tuple");
        let long_at = world.world.place(long_object_310(int_type, 1, &[42]));
        let tuple_at = world.world.place(tuple_object_310(tuple_type, &[long_at]));
        let env = world.env(PyVersion::Py310);
        assert_eq!(env.invalid_reason(MappedAddr(long_at), None), None);
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(MappedAddr(long_at)), format!("42@{:#x}", long_at));
        // Nested inside the tuple the suffix disappears.
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(MappedAddr(tuple_at)), "<tuple 42,>");
        // ... unless every address was asked for.
        let mut t = env.traverse(TraverseOptions {
            show_all_addresses: true,
            ..Default::default()
        });
        assert_eq!(
            t.repr(MappedAddr(tuple_at)),
            format!("<tuple 42@{:#x},>", long_at)
        );
    }

    #[test]
    fn test_expected_type_mismatch() {
        let (env, addr) = env_with(&["int", "str"], |world| {
            let int_type = world.type_addr("int");
            world.world.place(long_object_310(int_type, 1, &[1]))
        });
        let str_type = env.get_type_if_exists("str");
        assert_eq!(env.invalid_reason(addr, Some(str_type)), Some("incorrect_type"));
        let int_type = env.get_type_if_exists("int");
        assert_eq!(env.invalid_reason(addr, Some(int_type)), None);
    }

    #[test]
    fn test_tuple_of_bools_multiline() {
        let mut world = PyWorld::new(0x1000);
        let bool_type = world.add_type("bool");
        let tuple_type = world.add_type("tuple");
        let yes = world.world.place(long_object_310(bool_type, 1, &[1]));
        let no = world.world.place(long_object_310(bool_type, 0, &[]));
        let addr = world.world.place(tuple_object_310(tuple_type, &[yes, no]));
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(MappedAddr(addr)), "<tuple\n  True,\n  False,\n>");
        assert!(t.is_valid);
        // Short mode collapses to one line.
        let mut t = env.traverse(TraverseOptions {
            is_short: true,
            ..Default::default()
        });
        assert_eq!(t.repr(MappedAddr(addr)), "<tuple True, False,>");
    }

    #[test]
    fn test_cyclic_list() {
        let mut world = PyWorld::new(0x1000);
        let list_type = world.add_type("list");
        // The list's single item is the list itself.
        world.world.align();
        let list_at = world.world.here();
        let items_at = list_at + 40;
        world.world.place(list_object(list_type, items_at, 1, 1));
        world.world.place(bytes_of(le().D64(list_at)));
        let env = world.env(PyVersion::Py310);
        assert_eq!(env.invalid_reason(MappedAddr(list_at), None), None);
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(
            t.repr(MappedAddr(list_at)),
            "<list <list !recursive_repr>,>"
        );
    }

    #[test]
    fn test_recursion_depth_limit() {
        let mut world = PyWorld::new(0x1000);
        let tuple_type = world.add_type("tuple");
        let int_type = world.add_type("int");
        let value = world.world.place(long_object_310(int_type, 1, &[1]));
        let inner = world.world.place(tuple_object_310(tuple_type, &[value]));
        let outer = world.world.place(tuple_object_310(tuple_type, &[inner]));
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions {
            max_recursion_depth: 1,
            ..Default::default()
        });
        assert_eq!(
            t.repr(MappedAddr(outer)),
            "<tuple <tuple !recursion_depth>,>"
        );
        // Depth 0 refuses to render the container at all.
        let mut t = env.traverse(TraverseOptions {
            max_recursion_depth: 0,
            ..Default::default()
        });
        assert_eq!(t.repr(MappedAddr(outer)), "<tuple !recursion_depth>");
    }

    #[test]
    fn test_max_entries_truncation() {
        let mut world = PyWorld::new(0x1000);
        let tuple_type = world.add_type("tuple");
        let int_type = world.add_type("int");
        let one = world.world.place(long_object_310(int_type, 1, &[1]));
        let addr = world
            .world
            .place(tuple_object_310(tuple_type, &[one, one, one, one]));
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions {
            max_entries: 2,
            ..Default::default()
        });
        assert_eq!(t.repr(MappedAddr(addr)), "<tuple\n  1,\n  1,\n  ...\n>");
    }

    #[test]
    fn test_truncated_bytes_hex() {
        let mut world = PyWorld::new(0x1000);
        let bytes_type = world.add_type("bytes");
        let addr = world.world.place(bytes_object(bytes_type, &vec![0xaa; 4096]));
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions {
            max_string_length: 8,
            bytes_as_hex: true,
            ..Default::default()
        });
        let rendered = t.repr(MappedAddr(addr));
        assert_eq!(
            rendered,
            format!(
                "bytes.fromhex('AAAAAAAAAAAAAAAA'...<0xFF8 more bytes>)@{:#x}",
                addr
            )
        );
    }

    #[test]
    fn test_dangling_future_callback() {
        let mut world = PyWorld::new(0x1000);
        let fut_type = world.add_type("_asyncio.Future");
        let addr = world.world.place(future_object(fut_type, 0, 0xdead_beef));
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        assert_eq!(env.invalid_reason(addr, None), Some("invalid_fut_callback0"));
        assert_eq!(
            env.direct_referents(addr).unwrap_err().reason,
            "invalid_fut_callback0"
        );
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(addr), "<async future !invalid_fut_callback0>");
        assert!(!t.is_valid);
    }

    #[test]
    fn test_pending_future_repr() {
        let mut world = PyWorld::new(0x1000);
        let fut_type = world.add_type("_asyncio.Future");
        let addr = world.world.place(future_object(fut_type, 0, 0));
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions {
            is_short: true,
            ..Default::default()
        });
        assert_eq!(t.repr(MappedAddr(addr)), "<async future pending>");
    }

    #[test]
    fn test_task_repr_includes_coro() {
        let mut world = PyWorld::new(0x1000);
        let task_type = world.add_type("_asyncio.Task");
        let gen_type = world.add_type("coroutine");
        let str_type = world.add_type("str");
        let name = world.world.place(ascii_string(str_type, "tick"));
        let coro = gen_object_310(&mut world, gen_type, 0, name, name);
        let addr = world.world.place(task_object(task_type, coro, name));
        let env = world.env(PyVersion::Py310);
        assert_eq!(env.invalid_reason(MappedAddr(addr), None), None);
        let referents = env.direct_referents(MappedAddr(addr)).unwrap();
        assert!(referents.contains(&MappedAddr(coro)));
        let mut t = env.traverse(TraverseOptions {
            is_short: true,
            ..Default::default()
        });
        let rendered = t.repr(MappedAddr(addr));
        assert!(rendered.starts_with("<async task pending coro="));
        assert!(rendered.contains("(no frame)"));
    }

    #[test]
    fn test_none_type_is_unit() {
        let mut world = PyWorld::new(0x1000);
        let none_type = world.add_type("NoneType");
        let addr = world.world.place(bytes_of(obj_header(none_type)));
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        assert_eq!(env.invalid_reason(addr, None), None);
        assert!(env.direct_referents(addr).unwrap().is_empty());
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(addr), format!("None@{}", addr));
    }

    #[test]
    fn test_instance_dict_fallback() {
        let mut world = PyWorld::new(0x1000);
        let dict_type = world.add_type("dict");
        let str_type = world.add_type("str");
        let int_type = world.add_type("int");
        let obj_type = world.add_type("myapp.Widget");
        let key = world.world.place(ascii_string(str_type, "x"));
        let value = world.world.place(long_object_310(int_type, 1, &[9]));
        let dict = dict_310(&mut world, dict_type, &[(key, value)]);
        let addr = world.world.place(bytes_of(obj_header(obj_type).D64(dict)));
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        assert_eq!(env.invalid_reason(addr, None), None);
        let referents = env.direct_referents(addr).unwrap();
        assert!(referents.contains(&MappedAddr(key)));
        assert!(referents.contains(&MappedAddr(value)));
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(addr), "<myapp.Widget {'x': 9}>");
        // Nested instances stay collapsed.
        let mut world = PyWorld::new(0x1000);
        let obj_type = world.add_type("myapp.Widget");
        let tuple_type = world.add_type("tuple");
        let inner = world.world.place(bytes_of(obj_header(obj_type).D64(0)));
        let outer = world.world.place(tuple_object_310(tuple_type, &[inner]));
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions::default());
        assert_eq!(t.repr(MappedAddr(outer)), "<tuple <myapp.Widget>,>");
    }

    #[test]
    fn test_instance_without_dict() {
        let mut world = PyWorld::new(0x1000);
        world.add_type("dict");
        let obj_type = world.add_type("myapp.Handle");
        // The word after the header is not a dict pointer.
        let addr = world
            .world
            .place(bytes_of(obj_header(obj_type).D64(0xdead_beef)));
        let env = world.env(PyVersion::Py310);
        assert_eq!(
            env.invalid_reason(MappedAddr(addr), None),
            Some("dict_out_of_range")
        );
    }

    #[test]
    fn test_gathering_future_children() {
        let mut world = PyWorld::new(0x1000);
        let gather_type = world.add_type("_GatheringFuture");
        let dict_type = world.add_type("dict");
        let list_type = world.add_type("list");
        let str_type = world.add_type("str");
        let fut_type = world.add_type("_asyncio.Future");
        let child = world.world.place(future_object(fut_type, 0, 0));
        let items = world.world.place(bytes_of(le().D64(child)));
        let children_list = world.world.place(list_object(list_type, items, 1, 1));
        let key = world.world.place(ascii_string(str_type, "_children"));
        let dict = dict_310(&mut world, dict_type, &[(key, children_list)]);
        // A gathering future whose dict slot points at the instance dict.
        let mut fut = future_object(gather_type, 0, 0);
        // dict field sits at offset 104.
        fut[104..112].copy_from_slice(&dict.to_le_bytes());
        let addr = world.world.place(fut);
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        assert_eq!(env.invalid_reason(addr, None), None);
        let referents = env.direct_referents(addr).unwrap();
        assert!(referents.contains(&MappedAddr(child)));
        let mut t = env.traverse(TraverseOptions::default());
        let rendered = t.repr(addr);
        assert!(rendered.contains("children[0]=<async future"));
    }

    #[test]
    fn test_frame_repr_where() {
        let mut world = PyWorld::new(0x1000);
        let frame_type = world.add_type("frame");
        let code_type = world.add_type("code");
        let bytes_type = world.add_type("bytes");
        let str_type = world.add_type("str");
        let name = world.world.place(ascii_string(str_type, "tick"));
        let file = world.world.place(ascii_string(str_type, "app.py"));
        let table = linetable_bytes(&mut world, bytes_type, &[4, 1, 4, 1]);
        let code = code_object_310(&mut world, code_type, 10, table, 0, name, file, 0);
        // Suspended at lasti 2 => byte offset 4 => second span, line 12.
        let addr = frame_object_310(&mut world, frame_type, code, 0, -1, 2, &[]);
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions {
            is_short: true,
            frame_omit_locals: true,
            ..Default::default()
        });
        let rendered = t.repr(MappedAddr(addr));
        assert!(rendered.contains("state=suspended"));
        assert!(rendered.contains("where='app.py':12"));
    }

    #[test]
    fn test_validation_is_pure() {
        let mut world = PyWorld::new(0x1000);
        let fut_type = world.add_type("_asyncio.Future");
        let addr = world.world.place(future_object(fut_type, 9, 0));
        let env = world.env(PyVersion::Py310);
        let addr = MappedAddr(addr);
        let first = env.invalid_reason(addr, None);
        assert_eq!(first, Some("invalid_state"));
        assert_eq!(env.invalid_reason(addr, None), first);
    }

    #[test]
    fn test_referents_point_at_mapped_or_null() {
        let mut world = PyWorld::new(0x1000);
        let tuple_type = world.add_type("tuple");
        let int_type = world.add_type("int");
        let one = world.world.place(long_object_310(int_type, 1, &[1]));
        let inner = world.world.place(tuple_object_310(tuple_type, &[one]));
        let outer = world.world.place(tuple_object_310(tuple_type, &[inner, one]));
        let env = world.env(PyVersion::Py310);
        for referent in env.direct_referents(MappedAddr(outer)).unwrap() {
            assert!(referent.is_null() || env.reader.exists(referent));
        }
    }

    #[test]
    fn test_thread_state_repr() {
        let mut world = PyWorld::new(0x1000);
        let interp = world.world.place(vec![0u8; 16]);
        let ts = world.world.place(bytes_of(
            le().D64(0)
                .D64(0)
                .D64(interp)
                .D64(0)
                .append_repeated(0, 16)
                .append_repeated(0, 8 * 8)
                .append_repeated(0, 32)
                .D64(0)
                .D64(0)
                .D64(0)
                .D64(0)
                .D64(4242)
                .append_repeated(0, 0x38)
                .D64(0)
                .D64(0)
                .D64(7)
                .append_repeated(0, 16),
        ));
        let env = world.env(PyVersion::Py310);
        let mut t = env.traverse(TraverseOptions {
            is_short: true,
            ..Default::default()
        });
        let rendered = t.repr_thread_state(MappedAddr(ts));
        assert!(rendered.starts_with("<thread state "));
        assert!(rendered.contains("thread_id=4242"));
    }
}

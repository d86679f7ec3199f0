//! The CPython 3.14 variant set and its dispatch.
//!
//! Same dispatch scheme as the 3.10 set, over the newer layouts: tagged
//! longs, hashed tuples, log2-sized dict keys, inline bytecode, and the
//! frame/interpreter-frame split. The refcount header check is skipped for
//! this version.

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
use self::gen::PyGenObject;
use self::int::{PyBoolObject, PyLongObject};
use self::threadstate::PyThreadState;
use self::tuple::PyTupleObject;

/// The name-table dispatch of async generators is provisional; newer
/// interpreters register the type as `async_generator`, so that name is
/// resolved first and the legacy `asyncgen` name is the fallback.
fn asyncgen_type(env: &Environment) -> MappedAddr {
    let preferred = env.get_type_if_exists("async_generator");
    if !preferred.is_null() {
        return preferred;
    }
    env.get_type_if_exists("asyncgen")
}

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
            Ok(obj) => obj.invalid_reason(env),
            Err(_) => Some("invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("generator")
        || ty == env.get_type_if_exists("coroutine")
        || ty == asyncgen_type(env)
    {
        return match PyGenObject::read(env, addr) {
            Ok(obj) => obj.invalid_reason(env, addr),
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
        return None;
    }
    instance_dict_invalid_reason(env, addr)
}

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
            .direct_referents(env)
            .map_err(|_| InvalidObject::new("invalid_f_frame"));
    }
    if ty == env.get_type_if_exists("generator")
        || ty == env.get_type_if_exists("coroutine")
        || ty == asyncgen_type(env)
    {
        let obj = PyGenObject::read(env, addr).map_err(read_failed)?;
        return obj
            .direct_referents(env, addr)
            .map_err(|_| InvalidObject::new("invalid_gi_iframe"));
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

fn repr_gen_family(
    t: &mut Traversal,
    addr: MappedAddr,
    label: &'static str,
    obj: PyGenObject,
) -> String {
    if let Some(reason) = obj.invalid_reason(t.env, addr) {
        return t.fail(label, reason);
    }
    if t.options.is_short && label == "coroutine" {
        return obj.repr_short(t, addr, label);
    }
    if !t.recursion_allowed() {
        return format!("<{} !recursion_depth>", label);
    }
    let host = match t.env.reader.host_addr(addr) {
        Ok(host) => host,
        Err(_) => return t.fail(label, "invalid_addr"),
    };
    match t.nested(host, |t| {
        let tokens = obj.repr_tokens(t, addr);
        t.render_tokens(label, &tokens)
    }) {
        Some(out) => out,
        None => format!("<{} !recursive_repr>", label),
    }
}

fn repr_token_variant<F>(
    t: &mut Traversal,
    addr: MappedAddr,
    label: &'static str,
    tokens_for: F,
) -> String
where
    F: FnOnce(&mut Traversal) -> Vec<String>,
{
    if !t.recursion_allowed() {
        return format!("<{} !recursion_depth>", label);
    }
    let host = match t.env.reader.host_addr(addr) {
        Ok(host) => host,
        Err(_) => return t.fail(label, "invalid_addr"),
    };
    match t.nested(host, |t| {
        let tokens = tokens_for(t);
        t.render_tokens(label, &tokens)
    }) {
        Some(out) => out,
        None => format!("<{} !recursive_repr>", label),
    }
}

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
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("frame", reason),
                None => obj.repr(t, addr),
            },
            Err(_) => t.fail("frame", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("generator") {
        return match PyGenObject::read(env, addr) {
            Ok(obj) => repr_gen_family(t, addr, "generator", obj),
            Err(_) => t.fail("generator", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("coroutine") {
        return match PyGenObject::read(env, addr) {
            Ok(obj) => repr_gen_family(t, addr, "coroutine", obj),
            Err(_) => t.fail("coroutine", "invalid_addr"),
        };
    }
    if ty == asyncgen_type(env) {
        return match PyGenObject::read(env, addr) {
            Ok(obj) => repr_gen_family(t, addr, "asyncgen", obj),
            Err(_) => t.fail("asyncgen", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_asyncio.Future") {
        return match PyFutureObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("async future", reason),
                None => repr_token_variant(t, addr, "async future", move |t| {
                    obj.repr_tokens(t)
                }),
            },
            Err(_) => t.fail("async future", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_asyncio.Task") {
        return match PyTaskObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("async task", reason),
                None => repr_token_variant(t, addr, "async task", move |t| {
                    obj.repr_tokens(t)
                }),
            },
            Err(_) => t.fail("async task", "invalid_addr"),
        };
    }
    if ty == env.get_type_if_exists("_GatheringFuture") {
        return match PyFutureObject::read(env, addr) {
            Ok(obj) => match obj.invalid_reason(env) {
                Some(reason) => t.fail("async _GatheringFuture", reason),
                None => repr_token_variant(t, addr, "async _GatheringFuture", move |t| {
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

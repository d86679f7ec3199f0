//! Registry population: find the meta type and every named type object by
//! scanning the snapshot.

use failure::{bail, Error};
use log::info;

use pymemsnap::objects::typeobj::PyTypeObject;
use pymemsnap::{Environment, MappedAddr};

/// Finds the meta type: the object whose type pointer names itself and
/// that validates as a type descriptor called `type`.
pub fn find_meta_type(env: &Environment) -> Option<MappedAddr> {
    for (base, size) in env.reader.all_regions() {
        let bytes = match env.reader.read(base, size) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let mut offset = 8usize;
        while offset + 8 <= bytes.len() {
            let word = u64::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
                bytes[offset + 4],
                bytes[offset + 5],
                bytes[offset + 6],
                bytes[offset + 7],
            ]);
            // An object's type pointer sits 8 bytes in; self-typed means
            // it points at the word before this one.
            let candidate = MappedAddr(base.0 + offset as u64 - 8);
            if word == candidate.0 {
                if let Ok(type_obj) = PyTypeObject::read(env, candidate) {
                    if type_obj.invalid_reason(env).is_none()
                        && type_obj.name(env).map(|name| name == "type").unwrap_or(false)
                    {
                        return Some(candidate);
                    }
                }
            }
            offset += 8;
        }
    }
    None
}

/// Scans for every object typed by the meta type and records its name in
/// the registry. Returns the number of types found.
pub fn find_all_types(env: &mut Environment) -> Result<usize, Error> {
    let meta = if env.base_type_object.is_null() {
        match find_meta_type(env) {
            Some(meta) => meta,
            None => bail!("no meta type found in this snapshot; is it a CPython process?"),
        }
    } else {
        env.base_type_object
    };
    env.base_type_object = meta;
    info!("meta type at {}", meta);

    let mut found = vec![];
    for (base, size) in env.reader.all_regions() {
        let bytes = match env.reader.read(base, size) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let mut offset = 8usize;
        while offset + 8 <= bytes.len() {
            let word = u64::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
                bytes[offset + 4],
                bytes[offset + 5],
                bytes[offset + 6],
                bytes[offset + 7],
            ]);
            if word == meta.0 {
                let candidate = MappedAddr(base.0 + offset as u64 - 8);
                if let Ok(type_obj) = PyTypeObject::read(env, candidate) {
                    if type_obj.invalid_reason(env).is_none() {
                        if let Ok(name) = type_obj.name(env) {
                            if !name.is_empty() {
                                found.push((name, candidate));
                            }
                        }
                    }
                }
            }
            offset += 8;
        }
    }
    let count = found.len();
    for (name, addr) in found {
        env.type_objects.insert(name, addr);
    }
    Ok(count)
}

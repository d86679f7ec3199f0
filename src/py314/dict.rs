//! 3.14 dict objects.
//!
//! The keys object stores log2 sizes, a kind byte selecting packed
//! Unicode-key entries, and split values live behind an explicit
//! `PyDictValues` header with a capacity byte.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::{Error, OBJ_MIN_SIZE};
use crate::objects::strobj::decode_string;
use crate::objects::PyObjectHeader;
use crate::traverse::Traversal;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictKeysObject {
    pub dk_refcnt: u64,
    pub dk_log2_size: u8,
    pub dk_log2_index_bytes: u8,
    /// Non-zero selects the two-word Unicode-key entry layout.
    pub dk_kind: u8,
    _pad: u8,
    pub dk_version: u32,
    pub dk_usable: i64,
    pub dk_nentries: i64,
}

pub const KEYS_HEADER_SIZE: u64 = 32;

/// The general entry layout.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictKeyEntry {
    pub me_hash: u64,
    pub me_key: MappedAddr,
    pub me_value: MappedAddr,
}

/// The packed layout for all-Unicode key tables.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictUnicodeEntry {
    pub me_key: MappedAddr,
    pub me_value: MappedAddr,
}

/// The split-values header; the value pointers trail it.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictValues {
    pub capacity: u8,
    pub size: u8,
    pub embedded: u8,
    pub valid: u8,
}

/// Offset of the value array past the `PyDictValues` header.
pub const VALUES_OFFSET: u64 = 8;

impl PyDictKeysObject {
    pub fn table_size(&self) -> u64 {
        1u64 << (self.dk_log2_size.min(63))
    }

    pub fn bytes_per_table_value(&self) -> u64 {
        let table = self.table_size();
        if table == 0 {
            return 0;
        }
        (1u64 << (self.dk_log2_index_bytes.min(63))) / table
    }

    pub fn uses_unicode_entries(&self) -> bool {
        self.dk_kind != 0
    }

    pub fn entry_size(&self) -> u64 {
        if self.uses_unicode_entries() {
            16
        } else {
            24
        }
    }

    pub fn entry_count(&self) -> u64 {
        (self.dk_usable.max(0) as u64).saturating_add(self.dk_nentries.max(0) as u64)
    }
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictObject {
    pub ob_base: PyObjectHeader,
    pub ma_used: i64,
    pub ma_watcher_tag: u64,
    pub ma_keys: MappedAddr,
    /// Null for a combined table; otherwise a `PyDictValues`.
    pub ma_values: MappedAddr,
}

impl PyDictObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyDictObject, Error> {
        env.reader.get(addr)
    }

    pub fn keys(&self, env: &Environment) -> Result<PyDictKeysObject, Error> {
        env.reader.get(self.ma_keys)
    }

    fn table_addr(&self) -> MappedAddr {
        self.ma_keys.offset_bytes(KEYS_HEADER_SIZE)
    }

    fn entries_addr(&self, keys: &PyDictKeysObject) -> MappedAddr {
        self.table_addr()
            .offset_bytes(keys.bytes_per_table_value() * keys.table_size())
    }

    pub fn table(&self, env: &Environment) -> Result<Vec<i64>, Error> {
        let keys = self.keys(env)?;
        let width = keys.bytes_per_table_value();
        if width == 0 {
            return Ok(vec![]);
        }
        let bytes = env
            .reader
            .read(self.table_addr(), width * keys.table_size())?;
        let mut table = Vec::with_capacity(keys.table_size() as usize);
        for chunk in bytes.chunks_exact(width as usize) {
            let value = match width {
                1 => chunk[0] as i8 as i64,
                2 => i16::from_le_bytes([chunk[0], chunk[1]]) as i64,
                4 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as i64,
                _ => i64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6],
                    chunk[7],
                ]),
            };
            table.push(value);
        }
        Ok(table)
    }

    /// The split values, bounded by the header's capacity byte.
    pub fn values(&self, env: &Environment) -> Result<Vec<MappedAddr>, Error> {
        if self.ma_values.is_null() {
            return Ok(vec![]);
        }
        let header: PyDictValues = env.reader.get(self.ma_values)?;
        env.reader.get_array(
            self.ma_values.offset_bytes(VALUES_OFFSET),
            header.capacity as u64,
        )
    }

    fn entry_key_value(
        &self,
        env: &Environment,
        keys: &PyDictKeysObject,
        slot: i64,
    ) -> Result<(MappedAddr, MappedAddr), Error> {
        let addr = self
            .entries_addr(keys)
            .offset_bytes(slot as u64 * keys.entry_size());
        if keys.uses_unicode_entries() {
            let entry: PyDictUnicodeEntry = env.reader.get(addr)?;
            Ok((entry.me_key, entry.me_value))
        } else {
            let entry: PyDictKeyEntry = env.reader.get(addr)?;
            Ok((entry.me_key, entry.me_value))
        }
    }

    pub fn items(&self, env: &Environment) -> Result<Vec<(MappedAddr, MappedAddr)>, Error> {
        let keys = self.keys(env)?;
        let values = self.values(env)?;
        let mut items = vec![];
        for slot in self.table(env)? {
            if slot < 0 {
                continue;
            }
            let (key, entry_value) = self.entry_key_value(env, &keys, slot)?;
            let value = if !values.is_empty() {
                match values.get(slot as usize) {
                    Some(value) => *value,
                    None => continue,
                }
            } else {
                entry_value
            };
            items.push((key, value));
        }
        Ok(items)
    }

    pub fn value_for_key(
        &self,
        env: &Environment,
        key: &str,
    ) -> Result<Option<MappedAddr>, Error> {
        for (key_addr, value) in self.items(env)? {
            if let Ok(decoded) = decode_string(env, key_addr, 0) {
                if decoded.data == key {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid(self.ma_keys, KEYS_HEADER_SIZE) {
            return Some("invalid_ma_keys");
        }
        let keys = match self.keys(env) {
            Ok(keys) => keys,
            Err(_) => return Some("invalid_ma_keys"),
        };
        let table_bytes = keys.bytes_per_table_value() * keys.table_size();
        if !r.exists_range(self.table_addr(), table_bytes) {
            return Some("invalid_ma_keys_table");
        }
        match keys.entry_count().checked_mul(keys.entry_size()) {
            Some(bytes) if r.exists_range(self.entries_addr(&keys), bytes) => {}
            _ => return Some("invalid_ma_keys_entries"),
        }
        if !self.ma_values.is_null() {
            if !r.obj_valid(self.ma_values, VALUES_OFFSET) {
                return Some("invalid_ma_values");
            }
            let header: PyDictValues = match env.reader.get(self.ma_values) {
                Ok(header) => header,
                Err(_) => return Some("invalid_ma_values"),
            };
            let bytes = header.capacity as u64 * 8;
            if !r.exists_range(self.ma_values.offset_bytes(VALUES_OFFSET), bytes) {
                return Some("invalid_ma_values_range");
            }
        }
        for (key, value) in self.items(env).unwrap_or_default() {
            if !r.obj_valid(key, OBJ_MIN_SIZE) || !r.obj_valid(value, OBJ_MIN_SIZE) {
                return Some("invalid_entry");
            }
            let key_header: PyObjectHeader = match r.get(key) {
                Ok(header) => header,
                Err(_) => return Some("invalid_entry"),
            };
            if let Some(reason) = key_header.invalid_reason(env) {
                return Some(reason);
            }
            let value_header: PyObjectHeader = match r.get(value) {
                Ok(header) => header,
                Err(_) => return Some("invalid_entry"),
            };
            if let Some(reason) = value_header.invalid_reason(env) {
                return Some(reason);
            }
        }
        None
    }

    pub fn direct_referents(&self, env: &Environment) -> Result<ReferentSet, Error> {
        let mut set = ReferentSet::new();
        set.insert(self.ma_keys);
        set.insert(self.ma_values);
        for (key, value) in self.items(env)? {
            set.insert(key);
            set.insert(value);
        }
        Ok(set)
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        let items = match self.items(t.env) {
            Ok(items) => items,
            Err(_) => return t.fail("dict", "invalid_ma_keys_entries"),
        };
        let host = match t.env.reader.host_addr(addr) {
            Ok(host) => host,
            Err(_) => return t.fail("dict", "invalid_addr"),
        };
        if !t.recursion_allowed() {
            return format!("<dict !recursion_depth len={}>", self.ma_used);
        }
        match t.nested(host, |t| {
            let mut rendered = vec![];
            let mut has_extra = false;
            for (key, value) in &items {
                if t.entry_limit_reached(rendered.len()) {
                    has_extra = true;
                    break;
                }
                let key_repr = t.repr(*key);
                let value_repr = t.repr(*value);
                rendered.push((key_repr, value_repr));
            }
            t.render_dict(rendered, has_extra)
        }) {
            Some(out) => out,
            None => "<dict !recursive_repr>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::synth::{ascii_string, bytes_of, dict_314, le, long_object_314, obj_header, PyWorld};

    #[test]
    fn test_struct_sizes() {
        crate::scroll_size_check::<PyDictKeysObject>(KEYS_HEADER_SIZE);
        crate::scroll_size_check::<PyDictObject>(48);
        crate::scroll_size_check::<PyDictUnicodeEntry>(16);
    }

    #[test]
    fn test_unicode_entries() {
        let mut world = PyWorld::new(0x1000);
        let dict_type = world.add_type("dict");
        let str_type = world.add_type("str");
        let int_type = world.add_type("int");
        let key = world.world.place(ascii_string(str_type, "answer"));
        let value = world.world.place(long_object_314(int_type, 0, &[42]));
        let addr = dict_314(&mut world, dict_type, &[(key, value)]);
        let env = world.env(PyVersion::Py314);
        let dict = PyDictObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(dict.invalid_reason(&env), None);
        assert_eq!(
            dict.items(&env).unwrap(),
            vec![(MappedAddr(key), MappedAddr(value))]
        );
        assert_eq!(
            dict.value_for_key(&env, "answer").unwrap(),
            Some(MappedAddr(value))
        );
    }

    #[test]
    fn test_split_values_capacity() {
        let mut world = PyWorld::new(0x1000);
        let dict_type = world.add_type("dict");
        let str_type = world.add_type("str");
        let int_type = world.add_type("int");
        let key = world.world.place(ascii_string(str_type, "x"));
        let live = world.world.place(long_object_314(int_type, 0, &[5]));
        let keys_addr = world.world.place(bytes_of(
            le().D64(1)
                .D8(3)
                .D8(3)
                .D8(1)
                .D8(0)
                .D32(0)
                .D64(0)
                .D64(1)
                .D8(0)
                .append_repeated(0xff, 7)
                .D64(key)
                .D64(0), // stale entry value
        ));
        // PyDictValues: capacity 1, then the value pointer.
        let values_addr = world.world.place(bytes_of(
            le().D8(1).D8(1).D8(0).D8(1).D32(0).D64(live),
        ));
        let addr = world.world.place(bytes_of(
            obj_header(dict_type)
                .D64(1)
                .D64(0)
                .D64(keys_addr)
                .D64(values_addr),
        ));
        let env = world.env(PyVersion::Py314);
        let dict = PyDictObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(dict.invalid_reason(&env), None);
        assert_eq!(
            dict.items(&env).unwrap(),
            vec![(MappedAddr(key), MappedAddr(live))]
        );
    }
}

//! 3.10 dict objects.
//!
//! A dict points at a keys object that is not itself an object (no type
//! pointer): a header, then an index table whose slot width is chosen by
//! the table size, then an entries array. A split dict keeps its values in
//! a separate array indexed by the same slots.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, ReferentSet};
use crate::memory::{Error, OBJ_MIN_SIZE};
use crate::objects::PyObjectHeader;
use crate::objects::strobj::decode_string;
use crate::traverse::Traversal;

/// The keys-object header. Entries follow the index table, which follows
/// this header.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictKeysObject {
    pub dk_refcnt: u64,
    pub dk_size: u64,
    pub dk_lookup: MappedAddr,
    pub dk_usable: u64,
    pub dk_nentries: u64,
}

/// Size of the keys-object header.
pub const KEYS_HEADER_SIZE: u64 = 40;

/// One slot of the entries array.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictKeyEntry {
    pub me_hash: u64,
    pub me_key: MappedAddr,
    pub me_value: MappedAddr,
}

pub const ENTRY_SIZE: u64 = 24;

impl PyDictKeysObject {
    pub fn table_size(&self) -> u64 {
        self.dk_size
    }

    /// Index slot width: 1/2/4/8 bytes by table size.
    pub fn bytes_per_table_value(&self) -> u64 {
        if self.dk_size < 0x100 {
            1
        } else if self.dk_size < 0x10000 {
            2
        } else if self.dk_size < 0x1_0000_0000 {
            4
        } else {
            8
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.dk_usable.saturating_add(self.dk_nentries)
    }
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyDictObject {
    pub ob_base: PyObjectHeader,
    pub ma_used: i64,
    pub ma_version_tag: u64,
    pub ma_keys: MappedAddr,
    /// Null for a combined table (values stored with the keys).
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

    /// The index table as signed slot values; negative means empty.
    pub fn table(&self, env: &Environment) -> Result<Vec<i64>, Error> {
        let keys = self.keys(env)?;
        let width = keys.bytes_per_table_value();
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

    /// The split values array, or an empty vector for a combined table.
    pub fn values(&self, env: &Environment) -> Result<Vec<MappedAddr>, Error> {
        if self.ma_values.is_null() {
            return Ok(vec![]);
        }
        let keys = self.keys(env)?;
        env.reader.get_array(self.ma_values, keys.entry_count())
    }

    fn entry(
        &self,
        env: &Environment,
        keys: &PyDictKeysObject,
        slot: i64,
    ) -> Result<PyDictKeyEntry, Error> {
        env.reader
            .get(self.entries_addr(keys).offset_bytes(slot as u64 * ENTRY_SIZE))
    }

    /// The `(key, value)` pairs of occupied slots, in index-table order.
    pub fn items(
        &self,
        env: &Environment,
    ) -> Result<Vec<(MappedAddr, MappedAddr)>, Error> {
        let keys = self.keys(env)?;
        let values = self.values(env)?;
        let mut items = vec![];
        for slot in self.table(env)? {
            if slot < 0 {
                continue;
            }
            let entry = self.entry(env, &keys, slot)?;
            let value = if !values.is_empty() {
                match values.get(slot as usize) {
                    Some(value) => *value,
                    // A slot past the values array is skipped, not fatal.
                    None => continue,
                }
            } else {
                entry.me_value
            };
            items.push((entry.me_key, value));
        }
        Ok(items)
    }

    /// The value stored under a string key, if any key decodes to `key`.
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
        match keys.entry_count().checked_mul(ENTRY_SIZE) {
            Some(bytes) if r.exists_range(self.entries_addr(&keys), bytes) => {}
            _ => return Some("invalid_ma_keys_entries"),
        }
        if !self.ma_values.is_null() {
            if !r.obj_valid(self.ma_values, 8) {
                return Some("invalid_ma_values");
            }
            match keys.entry_count().checked_mul(8) {
                Some(bytes) if r.exists_range(self.ma_values, bytes) => {}
                _ => return Some("invalid_ma_values_range"),
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

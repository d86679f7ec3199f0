//! 3.10 code objects.

use bitflags::bitflags;
use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, InvalidObject, ReferentSet};
use crate::linetable::line_for_code_offset;
use crate::memory::Error;
use crate::objects::bytesobj::PyBytesObject;
use crate::objects::PyObjectHeader;
use crate::traverse::Traversal;

bitflags! {
    /// The `CO_*` flags relevant to diagnosing suspended work.
    pub struct CodeFlags: u32 {
        const OPTIMIZED = 0x0001;
        const NEWLOCALS = 0x0002;
        const VARARGS = 0x0004;
        const VARKEYWORDS = 0x0008;
        const NESTED = 0x0010;
        const GENERATOR = 0x0020;
        const COROUTINE = 0x0080;
        const ITERABLE_COROUTINE = 0x0100;
        const ASYNC_GENERATOR = 0x0200;
    }
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyCodeObject {
    pub ob_base: PyObjectHeader,
    pub co_argcount: i32,
    pub co_posonlyargcount: i32,
    pub co_kwonlyargcount: i32,
    pub co_nlocals: i32,
    pub co_stacksize: i32,
    pub co_flags: i32,
    pub co_firstlineno: i32,
    _pad: u32,
    pub co_code: MappedAddr,
    pub co_consts: MappedAddr,
    pub co_names: MappedAddr,
    pub co_varnames: MappedAddr,
    pub co_freevars: MappedAddr,
    pub co_cellvars: MappedAddr,
    pub co_cell2arg: MappedAddr,
    pub co_filename: MappedAddr,
    pub co_name: MappedAddr,
    pub co_linetable: MappedAddr,
    pub co_zombieframe: MappedAddr,
    pub co_weakreflist: MappedAddr,
    pub co_extra: MappedAddr,
    pub co_opcache_map: MappedAddr,
    pub co_opcache: MappedAddr,
    pub co_opcache_flag: i32,
    pub co_opcache_size: u8,
    _pad2: u8,
    _pad3: u16,
}

impl PyCodeObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyCodeObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.co_code, 1) {
            return Some("invalid_co_code");
        }
        if !r.obj_valid_or_null(self.co_consts, 1) {
            return Some("invalid_co_consts");
        }
        if !r.obj_valid_or_null(self.co_names, 1) {
            return Some("invalid_co_names");
        }
        if !r.obj_valid_or_null(self.co_varnames, 1) {
            return Some("invalid_co_varnames");
        }
        if !r.obj_valid_or_null(self.co_freevars, 1) {
            return Some("invalid_co_freevars");
        }
        if !r.obj_valid_or_null(self.co_cellvars, 1) {
            return Some("invalid_co_cellvars");
        }
        if !r.obj_valid_or_null(self.co_cell2arg, 1) {
            return Some("invalid_co_cell2arg");
        }
        if !r.obj_valid_or_null(self.co_filename, 1) {
            return Some("invalid_co_filename");
        }
        if !r.obj_valid_or_null(self.co_name, 1) {
            return Some("invalid_co_name");
        }
        if !r.obj_valid_or_null(self.co_linetable, 1) {
            return Some("invalid_co_linetable");
        }
        if !self.co_zombieframe.is_null() && !r.exists(self.co_zombieframe) {
            return Some("invalid_co_zombieframe");
        }
        if !r.obj_valid_or_null(self.co_weakreflist, 1) {
            return Some("invalid_co_weakreflist");
        }
        if !self.co_extra.is_null() && !r.exists(self.co_extra) {
            return Some("invalid_co_extra");
        }
        if !r.obj_valid_or_null(self.co_opcache_map, 1) {
            return Some("invalid_co_opcache_map");
        }
        if !self.co_opcache.is_null() && !r.exists(self.co_opcache) {
            return Some("invalid_co_opcache");
        }
        None
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = ReferentSet::new();
        for addr in [
            self.co_code,
            self.co_consts,
            self.co_names,
            self.co_varnames,
            self.co_freevars,
            self.co_cellvars,
            self.co_cell2arg,
            self.co_filename,
            self.co_name,
            self.co_linetable,
            self.co_zombieframe,
            self.co_weakreflist,
            self.co_extra,
            self.co_opcache_map,
            self.co_opcache,
        ]
        .iter()
        {
            set.insert(*addr);
        }
        set
    }

    /// Resolves a bytecode offset to a source line via the line table.
    pub fn line_for_offset(
        &self,
        env: &Environment,
        code_offset: u64,
    ) -> Result<i64, InvalidObject> {
        let bytes_type = env.get_type_if_exists("bytes");
        if let Some(reason) = env.invalid_reason(
            self.co_linetable,
            if bytes_type.is_null() {
                None
            } else {
                Some(bytes_type)
            },
        ) {
            return Err(InvalidObject::new(reason));
        }
        let table = PyBytesObject::read(env, self.co_linetable)
            .map_err(|_| InvalidObject::new("invalid_co_linetable"))?;
        let contents = table
            .contents(env, self.co_linetable)
            .map_err(|_| InvalidObject::new("invalid_data"))?;
        Ok(line_for_code_offset(
            contents,
            self.co_firstlineno as i64,
            code_offset,
        ))
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        if !t.recursion_allowed() {
            return "<code !recursion_depth>".to_string();
        }
        let host = match t.env.reader.host_addr(addr) {
            Ok(host) => host,
            Err(_) => return t.fail("code", "invalid_addr"),
        };
        let is_root = t.is_root();
        let this = *self;
        match t.nested(host, |t| {
            let mut tokens = vec![];
            tokens.push(format!("name={}", t.repr(this.co_name)));
            tokens.push(format!(
                "start={}:{}",
                t.repr(this.co_filename),
                this.co_firstlineno
            ));
            if is_root {
                tokens.push(format!(
                    "args_config=({} args, {} pos-only, {} kw-only)",
                    this.co_argcount, this.co_posonlyargcount, this.co_kwonlyargcount
                ));
                tokens.push(format!(
                    "vars_config=({} locals, {} stack)",
                    this.co_nlocals, this.co_stacksize
                ));
                tokens.push(format!("flags={:08X}", this.co_flags));
                let prev_hex = t.options.bytes_as_hex;
                t.options.bytes_as_hex = true;
                tokens.push(format!("code={}", t.repr(this.co_code)));
                t.options.bytes_as_hex = prev_hex;
                tokens.push(format!("consts={}", t.repr(this.co_consts)));
                tokens.push(format!("names={}", t.repr(this.co_names)));
                tokens.push(format!("varnames={}", t.repr(this.co_varnames)));
                tokens.push(format!("freevars=@{}", this.co_freevars));
                tokens.push(format!("cellvars=@{}", this.co_cellvars));
                tokens.push(format!("cell2arg=@{}", this.co_cell2arg));
                t.options.bytes_as_hex = true;
                tokens.push(format!("linetable={}", t.repr(this.co_linetable)));
                t.options.bytes_as_hex = prev_hex;
                tokens.push(format!("zombieframe=@{}", this.co_zombieframe));
                tokens.push(format!("weakreflist={}", t.repr(this.co_weakreflist)));
                tokens.push(format!("extra=@{}", this.co_extra));
            }
            t.render_tokens("code", &tokens)
        }) {
            Some(out) => out,
            None => "<code !recursive_repr>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::scroll_size_check;
    use crate::synth::{bytes_of, code_object_310, linetable_bytes, obj_header, PyWorld};

    #[test]
    fn test_struct_size() {
        // Header 16 + 8 ints 32 + 15 pointers 120 + trailing 8.
        scroll_size_check::<PyCodeObject>(176);
    }

    #[test]
    fn test_validation() {
        let mut world = PyWorld::new(0x1000);
        let code_type = world.add_type("code");
        let addr = code_object_310(&mut world, code_type, 1, 0, 0, 0, 0, 0);
        let bad = world.world.place(bytes_of(
            obj_header(code_type)
                .append_repeated(0, 32)
                .D64(0xdead_0000) // co_code dangles
                .append_repeated(0, 176 - 16 - 32 - 8),
        ));
        let env = world.env(PyVersion::Py310);
        let code = PyCodeObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(code.invalid_reason(&env), None);
        let code = PyCodeObject::read(&env, MappedAddr(bad)).unwrap();
        assert_eq!(code.invalid_reason(&env), Some("invalid_co_code"));
    }

    #[test]
    fn test_line_for_offset() {
        let mut world = PyWorld::new(0x1000);
        let code_type = world.add_type("code");
        let bytes_type = world.add_type("bytes");
        let table = linetable_bytes(&mut world, bytes_type, &[4, 1, 4, 1]);
        let addr = code_object_310(&mut world, code_type, 10, table, 0, 0, 0, 0);
        let env = world.env(PyVersion::Py310);
        let code = PyCodeObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(code.line_for_offset(&env, 0).unwrap(), 11);
        assert_eq!(code.line_for_offset(&env, 5).unwrap(), 12);
        assert_eq!(code.line_for_offset(&env, 100).unwrap(), 0);
    }

    #[test]
    fn test_line_for_offset_dangling_table() {
        let mut world = PyWorld::new(0x1000);
        let code_type = world.add_type("code");
        world.add_type("bytes");
        let addr = code_object_310(&mut world, code_type, 10, 0, 0, 0, 0, 0);
        let env = world.env(PyVersion::Py310);
        let code = PyCodeObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(
            code.line_for_offset(&env, 0).unwrap_err().reason,
            "null_obj_ptr"
        );
    }
}

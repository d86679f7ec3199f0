//! 3.14 code objects. Bytecode is inline (`co_code_adaptive` trails the
//! struct) rather than behind a bytes object.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, InvalidObject, ReferentSet};
use crate::linetable::line_for_code_offset;
use crate::memory::Error;
use crate::objects::bytesobj::PyBytesObject;
use crate::objects::PyVarObject;
use crate::traverse::Traversal;

/// Offset of the inline adaptive bytecode from the object start.
pub const CODE_ADAPTIVE_OFFSET: u64 = 208;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyCodeObject {
    pub ob_base: PyVarObject,
    pub co_consts: MappedAddr,
    pub co_names: MappedAddr,
    pub co_exceptiontable: MappedAddr,
    pub co_flags: i32,
    pub co_argcount: i32,
    pub co_posonlyargcount: i32,
    pub co_kwonlyargcount: i32,
    pub co_stacksize: i32,
    pub co_firstlineno: i32,
    pub co_nlocalsplus: i32,
    pub co_framesize: i32,
    pub co_nlocals: i32,
    pub co_ncellvars: i32,
    pub co_nfreevars: i32,
    pub co_version: u32,
    pub co_localsplusnames: MappedAddr,
    pub co_localspluskinds: MappedAddr,
    pub co_filename: MappedAddr,
    pub co_name: MappedAddr,
    pub co_qualname: MappedAddr,
    pub co_linetable: MappedAddr,
    pub co_weakreflist: MappedAddr,
    pub co_executors: MappedAddr,
    pub co_cached: MappedAddr,
    pub co_instrumentation_version: u64,
    pub co_monitoring: MappedAddr,
    pub co_unique_id: i64,
    pub co_firsttraceable: i32,
    _pad: u32,
    pub co_extra: MappedAddr,
}

impl PyCodeObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyCodeObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment) -> Option<&'static str> {
        let r = &env.reader;
        if !r.obj_valid_or_null(self.co_consts, 1) {
            return Some("invalid_co_consts");
        }
        if !r.obj_valid_or_null(self.co_names, 1) {
            return Some("invalid_co_names");
        }
        if !r.obj_valid_or_null(self.co_exceptiontable, 1) {
            return Some("invalid_co_exceptiontable");
        }
        if !r.obj_valid_or_null(self.co_localsplusnames, 1) {
            return Some("invalid_co_localsplusnames");
        }
        if !r.obj_valid_or_null(self.co_localspluskinds, 1) {
            return Some("invalid_co_localspluskinds");
        }
        if !r.obj_valid_or_null(self.co_filename, 1) {
            return Some("invalid_co_filename");
        }
        if !r.obj_valid_or_null(self.co_name, 1) {
            return Some("invalid_co_name");
        }
        if !r.obj_valid_or_null(self.co_qualname, 1) {
            return Some("invalid_co_qualname");
        }
        if !r.obj_valid_or_null(self.co_linetable, 1) {
            return Some("invalid_co_linetable");
        }
        if !r.obj_valid_or_null(self.co_weakreflist, 1) {
            return Some("invalid_co_weakreflist");
        }
        if !self.co_executors.is_null() && !r.exists(self.co_executors) {
            return Some("invalid_co_executors");
        }
        if !self.co_cached.is_null() && !r.exists(self.co_cached) {
            return Some("invalid_co_cached");
        }
        if !self.co_monitoring.is_null() && !r.exists(self.co_monitoring) {
            return Some("invalid_co_monitoring");
        }
        if !self.co_extra.is_null() && !r.exists(self.co_extra) {
            return Some("invalid_co_extra");
        }
        None
    }

    pub fn direct_referents(&self) -> ReferentSet {
        let mut set = ReferentSet::new();
        for addr in [
            self.co_consts,
            self.co_names,
            self.co_exceptiontable,
            self.co_localsplusnames,
            self.co_localspluskinds,
            self.co_filename,
            self.co_name,
            self.co_qualname,
            self.co_linetable,
            self.co_weakreflist,
            self.co_executors,
            self.co_cached,
            self.co_monitoring,
            self.co_extra,
        ]
        .iter()
        {
            set.insert(*addr);
        }
        set
    }

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
            tokens.push(format!("qualname={}", t.repr(this.co_qualname)));
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
                tokens.push(format!("consts={}", t.repr(this.co_consts)));
                tokens.push(format!("names={}", t.repr(this.co_names)));
                tokens.push(format!(
                    "localsplusnames={}",
                    t.repr(this.co_localsplusnames)
                ));
                let prev_hex = t.options.bytes_as_hex;
                t.options.bytes_as_hex = true;
                tokens.push(format!("linetable={}", t.repr(this.co_linetable)));
                tokens.push(format!(
                    "exceptiontable={}",
                    t.repr(this.co_exceptiontable)
                ));
                t.options.bytes_as_hex = prev_hex;
                tokens.push(format!("weakreflist={}", t.repr(this.co_weakreflist)));
                tokens.push(format!("executors=@{}", this.co_executors));
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
    use crate::synth::{code_object_314, PyWorld};

    #[test]
    fn test_struct_size() {
        scroll_size_check::<PyCodeObject>(CODE_ADAPTIVE_OFFSET);
    }

    #[test]
    fn test_validation() {
        let mut world = PyWorld::new(0x1000);
        let code_type = world.add_type("code");
        let addr = code_object_314(&mut world, code_type, 3, 0, 0, 0);
        let env = world.env(PyVersion::Py314);
        let code = PyCodeObject::read(&env, MappedAddr(addr)).unwrap();
        assert_eq!(code.invalid_reason(&env), None);
        assert_eq!(code.co_firstlineno, 3);
    }
}

//! Synthetic snapshots for tests.
//!
//! Tests assemble a small interpreter heap with `test_assembler`, wrap it in
//! the bundle wire format, and open it with a normal [`MemoryReader`]. The
//! [`PyWorld`] helper lays out the type objects and registry the dispatch
//! layer needs; the object builders below lay out individual variants, so a
//! test only describes the objects it cares about.

use std::collections::HashMap;

use test_assembler::{Endian, Section};

use crate::addr::MappedAddr;
use crate::env::{Environment, PyVersion};
use crate::memory::{write_bundle, MemoryReader};
use crate::objects::typeobj::TYPE_OBJECT_SIZE;

/// A little-endian section.
pub fn le() -> Section {
    Section::with_endian(Endian::Little)
}

/// Finalizes a section into bytes.
pub fn bytes_of(section: Section) -> Vec<u8> {
    section.get_contents().expect("undefined labels in section")
}

/// A set of regions that can be serialised as a bundle-form snapshot.
#[derive(Debug)]
pub struct SynthSnapshot {
    regions: Vec<(MappedAddr, Vec<u8>)>,
}

impl SynthSnapshot {
    pub fn new() -> SynthSnapshot {
        SynthSnapshot { regions: vec![] }
    }

    pub fn region(mut self, base: u64, bytes: Vec<u8>) -> SynthSnapshot {
        self.regions.push((MappedAddr(base), bytes));
        self
    }

    pub fn bundle(&self) -> Vec<u8> {
        let mut bundle = vec![];
        write_bundle(&mut bundle, &self.regions).unwrap();
        bundle
    }

    pub fn reader(&self) -> MemoryReader {
        MemoryReader::from_bundle_bytes(self.bundle()).unwrap()
    }
}

/// Appends content to a single region, tracking addresses.
#[derive(Debug)]
pub struct TestWorld {
    base: u64,
    bytes: Vec<u8>,
}

impl TestWorld {
    pub fn new(base: u64) -> TestWorld {
        TestWorld {
            base,
            bytes: vec![],
        }
    }

    /// The address the next placed item will get.
    pub fn here(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    /// Pads with zero bytes to an 8-byte boundary.
    pub fn align(&mut self) {
        while self.bytes.len() % 8 != 0 {
            self.bytes.push(0);
        }
    }

    /// Places raw bytes, returning their address.
    pub fn place(&mut self, content: Vec<u8>) -> u64 {
        self.align();
        let addr = self.here();
        self.bytes.extend(content);
        addr
    }

    /// Places a finalized section, returning its address.
    pub fn place_section(&mut self, section: Section) -> u64 {
        self.place(bytes_of(section))
    }

    /// Places a NUL-terminated string.
    pub fn place_cstr(&mut self, s: &str) -> u64 {
        let mut content = s.as_bytes().to_vec();
        content.push(0);
        self.place(content)
    }

    pub fn snapshot(self) -> SynthSnapshot {
        SynthSnapshot::new().region(self.base, self.bytes)
    }
}

/// An object header section: refcount and type pointer.
pub fn obj_header(type_addr: u64) -> Section {
    le().D64(1).D64(type_addr)
}

/// A minimal valid type object: every slot null except `tp_name`.
pub fn type_object(meta_addr: u64, name_addr: u64) -> Section {
    let section = obj_header(meta_addr)
        .D64(0) // ob_size
        .D64(name_addr);
    // Remaining fields through tp_vectorcall are zero.
    section.append_repeated(0, TYPE_OBJECT_SIZE as usize - 32)
}

/// A test heap with a meta type and a name → type-object registry.
#[derive(Debug)]
pub struct PyWorld {
    pub world: TestWorld,
    pub meta_type: u64,
    types: HashMap<&'static str, u64>,
}

impl PyWorld {
    /// Lays out the meta type (the `type` type, typed by itself) at the
    /// start of the region.
    pub fn new(base: u64) -> PyWorld {
        let mut world = TestWorld::new(base);
        // The meta type's name lives right after the type object.
        let meta_addr = world.here();
        let name_addr = meta_addr + TYPE_OBJECT_SIZE;
        world.place_section(type_object(meta_addr, name_addr));
        world.place_cstr("type");
        PyWorld {
            world,
            meta_type: meta_addr,
            types: HashMap::new(),
        }
    }

    /// Adds a type object named `name`, returning its address.
    pub fn add_type(&mut self, name: &'static str) -> u64 {
        self.world.align();
        let type_addr = self.world.here();
        let name_addr = type_addr + TYPE_OBJECT_SIZE;
        let meta = self.meta_type;
        self.world.place_section(type_object(meta, name_addr));
        self.world.place_cstr(name);
        self.types.insert(name, type_addr);
        type_addr
    }

    pub fn type_addr(&self, name: &str) -> u64 {
        self.types[name]
    }

    /// Finishes the heap and builds an environment with the registry
    /// populated.
    pub fn env(self, version: PyVersion) -> Environment {
        let reader = self.world.snapshot().reader();
        let mut env = Environment::from_reader(reader, version);
        env.base_type_object = MappedAddr(self.meta_type);
        for (name, addr) in self.types {
            env.type_objects.insert(name.to_string(), MappedAddr(addr));
        }
        env
    }
}

// ---------------------------------------------------------------------------
// Object builders.

/// An ASCII-compact string object followed by its inline data.
pub fn ascii_string(type_addr: u64, value: &str) -> Vec<u8> {
    let mut out = bytes_of(
        obj_header(type_addr)
            .D64(value.len() as u64)
            .D64(0) // hash
            .D8(0x64) // ascii | compact, kind 1
            .append_repeated(0, 7)
            .D64(0), // wstr
    );
    out.extend(value.as_bytes());
    out
}

/// A bytes object followed by its inline data.
pub fn bytes_object(type_addr: u64, data: &[u8]) -> Vec<u8> {
    let mut out = bytes_of(
        obj_header(type_addr)
            .D64(data.len() as u64)
            .D64(0), // ob_shash
    );
    out.extend(data);
    out
}

/// A 3.10 long object with the given 30-bit digits.
pub fn long_object_310(type_addr: u64, ob_size: i64, digits: &[u32]) -> Vec<u8> {
    let mut section = obj_header(type_addr).D64(ob_size as u64);
    for &digit in digits {
        section = section.D32(digit);
    }
    bytes_of(section)
}

/// A 3.14 long object: `sign` tag bits (0 positive, 1 zero, 2 negative)
/// and 30-bit digits.
pub fn long_object_314(type_addr: u64, sign: u8, digits: &[u32]) -> Vec<u8> {
    let tag = ((digits.len() as u64) << 3) | sign as u64;
    let mut section = obj_header(type_addr).D64(tag);
    for &digit in digits {
        section = section.D32(digit);
    }
    bytes_of(section)
}

/// A 3.10 tuple object with the given item addresses.
pub fn tuple_object_310(type_addr: u64, items: &[u64]) -> Vec<u8> {
    let mut section = obj_header(type_addr).D64(items.len() as u64);
    for &item in items {
        section = section.D64(item);
    }
    bytes_of(section)
}

/// A 3.14 tuple object: an unset hash word before the items.
pub fn tuple_object_314(type_addr: u64, items: &[u64]) -> Vec<u8> {
    let mut section = obj_header(type_addr)
        .D64(items.len() as u64)
        .D64(-1i64 as u64);
    for &item in items {
        section = section.D64(item);
    }
    bytes_of(section)
}

/// A list object pointing at a separately placed item array.
pub fn list_object(type_addr: u64, items_addr: u64, used: i64, allocated: u64) -> Vec<u8> {
    bytes_of(
        obj_header(type_addr)
            .D64(used as u64)
            .D64(items_addr)
            .D64(allocated),
    )
}

/// A combined-table 3.10 dict: 8 one-byte index slots mapping the pairs
/// in order.
pub fn dict_310(world: &mut PyWorld, dict_type: u64, pairs: &[(u64, u64)]) -> u64 {
    let mut keys = le()
        .D64(1) // dk_refcnt
        .D64(8) // dk_size
        .D64(0) // dk_lookup
        .D64(0) // dk_usable
        .D64(pairs.len() as u64); // dk_nentries
    for i in 0..8 {
        if i < pairs.len() {
            keys = keys.D8(i as u8);
        } else {
            keys = keys.D8(0xff);
        }
    }
    for &(key, value) in pairs {
        keys = keys.D64(0).D64(key).D64(value);
    }
    let keys_addr = world.world.place(bytes_of(keys));
    world.world.place(bytes_of(
        obj_header(dict_type)
            .D64(pairs.len() as u64) // ma_used
            .D64(0) // ma_version_tag
            .D64(keys_addr)
            .D64(0), // ma_values (combined)
    ))
}

/// A combined-table 3.14 dict with Unicode-key entries.
pub fn dict_314(world: &mut PyWorld, dict_type: u64, pairs: &[(u64, u64)]) -> u64 {
    let mut keys = le()
        .D64(1) // dk_refcnt
        .D8(3) // dk_log2_size: 8 slots
        .D8(3) // dk_log2_index_bytes
        .D8(1) // dk_kind: unicode entries
        .D8(0)
        .D32(0) // dk_version
        .D64(0) // dk_usable
        .D64(pairs.len() as u64); // dk_nentries
    for i in 0..8 {
        if i < pairs.len() {
            keys = keys.D8(i as u8);
        } else {
            keys = keys.D8(0xff);
        }
    }
    for &(key, value) in pairs {
        keys = keys.D64(key).D64(value);
    }
    let keys_addr = world.world.place(bytes_of(keys));
    world.world.place(bytes_of(
        obj_header(dict_type)
            .D64(pairs.len() as u64) // ma_used
            .D64(0) // ma_watcher_tag
            .D64(keys_addr)
            .D64(0),
    ))
}

/// An asyncio future with everything null except the state and first
/// callback slot.
pub fn future_object(type_addr: u64, state: u8, callback0: u64) -> Vec<u8> {
    bytes_of(
        obj_header(type_addr)
            .D64(0) // fut_loop
            .D64(callback0)
            .D64(0) // fut_context0
            .D64(0) // fut_callbacks
            .D64(0) // fut_exception
            .D64(0) // fut_exception_tb
            .D64(0) // fut_result
            .D64(0) // fut_source_tb
            .D64(0) // fut_cancel_msg
            .D8(state)
            .append_repeated(0, 3)
            .D32(0) // fut_log_tb
            .D32(0) // fut_blocking
            .D32(0)
            .D64(0) // dict
            .D64(0) // fut_weakreflist
            .append_repeated(0, 32), // fut_cancelled_exc
    )
}

/// A task: a future followed by the task slots.
pub fn task_object(type_addr: u64, coro: u64, name: u64) -> Vec<u8> {
    let mut out = future_object(type_addr, 0, 0);
    out.extend(bytes_of(
        le().D64(0) // task_fut_waiter
            .D64(coro)
            .D64(name)
            .D64(0) // task_context
            .D32(0) // task_must_cancel
            .D32(0), // task_log_destroy_pending
    ));
    out
}

/// A 3.10 code object with only the fields under test populated.
pub fn code_object_310(
    world: &mut PyWorld,
    code_type: u64,
    firstlineno: i32,
    linetable: u64,
    varnames: u64,
    name: u64,
    filename: u64,
    nlocals: i32,
) -> u64 {
    world.world.place(bytes_of(
        obj_header(code_type)
            .D32(0) // argcount
            .D32(0) // posonlyargcount
            .D32(0) // kwonlyargcount
            .D32(nlocals as u32)
            .D32(0) // stacksize
            .D32(0x20) // flags
            .D32(firstlineno as u32)
            .D32(0) // pad
            .D64(0) // co_code
            .D64(0) // co_consts
            .D64(0) // co_names
            .D64(varnames)
            .D64(0) // co_freevars
            .D64(0) // co_cellvars
            .D64(0) // co_cell2arg
            .D64(filename)
            .D64(name)
            .D64(linetable)
            .D64(0) // co_zombieframe
            .D64(0) // co_weakreflist
            .D64(0) // co_extra
            .D64(0) // co_opcache_map
            .D64(0) // co_opcache
            .D32(0) // co_opcache_flag
            .D32(0), // co_opcache_size + pad
    ))
}

/// A 3.14 code object with only the interesting slots populated.
pub fn code_object_314(
    world: &mut PyWorld,
    code_type: u64,
    firstlineno: i32,
    linetable: u64,
    name: u64,
    filename: u64,
) -> u64 {
    world.world.place(bytes_of(
        obj_header(code_type)
            .D64(0) // ob_size
            .D64(0) // co_consts
            .D64(0) // co_names
            .D64(0) // co_exceptiontable
            .D32(0) // co_flags
            .D32(0) // co_argcount
            .D32(0) // co_posonlyargcount
            .D32(0) // co_kwonlyargcount
            .D32(0) // co_stacksize
            .D32(firstlineno as u32)
            .D32(0) // co_nlocalsplus
            .D32(0) // co_framesize
            .D32(0) // co_nlocals
            .D32(0) // co_ncellvars
            .D32(0) // co_nfreevars
            .D32(0) // co_version
            .D64(0) // co_localsplusnames
            .D64(0) // co_localspluskinds
            .D64(filename)
            .D64(name)
            .D64(name) // co_qualname
            .D64(linetable)
            .D64(0) // co_weakreflist
            .D64(0) // co_executors
            .D64(0) // _co_cached
            .D64(0) // _co_instrumentation_version
            .D64(0) // _co_monitoring
            .D64(0) // _co_unique_id
            .D32(0) // _co_firsttraceable
            .D32(0)
            .D64(0), // co_extra
    ))
}

/// A bytes object holding a line table.
pub fn linetable_bytes(world: &mut PyWorld, bytes_type: u64, table: &[u8]) -> u64 {
    world.world.place(bytes_object(bytes_type, table))
}

/// A 3.10 frame with `slots` locals-plus entries trailing the try-block
/// stack.
pub fn frame_object_310(
    world: &mut PyWorld,
    frame_type: u64,
    code: u64,
    back: u64,
    state: i8,
    lasti: i32,
    slots: &[u64],
) -> u64 {
    let mut section = obj_header(frame_type)
        .D64(slots.len() as u64) // ob_size
        .D64(back)
        .D64(code)
        .D64(0) // f_builtins
        .D64(0) // f_globals
        .D64(0) // f_locals
        .D64(0) // f_valuestack
        .D64(0) // f_trace
        .D32(0) // f_stackdepth
        .D8(0)
        .D8(0)
        .D16(0)
        .D64(0) // f_gen
        .D32(lasti as u32)
        .D32(0) // f_lineno
        .D32(0) // f_iblock
        .D8(state as u8)
        .append_repeated(0, 3)
        .append_repeated(0, 240); // f_blockstack
    for &slot in slots {
        section = section.D64(slot);
    }
    world.world.place(bytes_of(section))
}

/// A 3.14 interpreter frame whose executable is the given object (tagged
/// with the deferred bit, as the interpreter stores it).
pub fn iframe_314(world: &mut PyWorld, executable: u64, instr_ptr: u64) -> u64 {
    world.world.place(bytes_of(iframe_section_314(executable, instr_ptr)))
}

/// The interpreter-frame record as a section, for embedding.
pub fn iframe_section_314(executable: u64, instr_ptr: u64) -> Section {
    le().D64(executable | 1) // f_executable
        .D64(0) // previous
        .D64(1) // f_funcobj: null sentinel
        .D64(0) // f_globals
        .D64(0) // f_builtins
        .D64(0) // f_locals
        .D64(0) // frame_obj
        .D64(instr_ptr)
        .D64(0) // stackpointer
        .D16(0) // return_offset
        .D8(0) // owner
        .D8(0) // visited
        .D32(0)
}

/// A 3.14 frame object fronting the given interpreter frame.
pub fn frame_object_314(world: &mut PyWorld, frame_type: u64, iframe: u64, back: u64) -> u64 {
    world.world.place(bytes_of(
        obj_header(frame_type)
            .D64(back)
            .D64(iframe)
            .D64(0) // f_trace
            .D32(7) // f_lineno
            .D8(0)
            .D8(0)
            .D16(0)
            .D64(0)
            .D64(0)
            .D64(0),
    ))
}

/// A 3.10 generator, sized for the coroutine layout so the same bytes
/// serve both dispatches.
pub fn gen_object_310(
    world: &mut PyWorld,
    gen_type: u64,
    frame: u64,
    name: u64,
    qualname: u64,
) -> u64 {
    world.world.place(bytes_of(
        obj_header(gen_type)
            .D64(frame)
            .D64(0) // gi_code
            .D64(0) // gi_weakreflist
            .D64(name)
            .D64(qualname)
            .append_repeated(0, 32) // gi_exc_state
            .D64(0), // cr_origin when read as a coroutine
    ))
}

/// A 3.14 generator with an embedded interpreter frame.
pub fn gen_object_314(
    world: &mut PyWorld,
    gen_type: u64,
    executable: u64,
    name: u64,
    qualname: u64,
) -> u64 {
    world.world.place(bytes_of(
        obj_header(gen_type)
            .D64(0) // gi_weakreflist
            .D64(name)
            .D64(qualname)
            .append_repeated(0, 32) // gi_exc_state
            .D64(0) // gi_origin_or_finalizer
            .D8(0) // gi_hooks_inited
            .D8(0) // gi_closed
            .D8(0) // gi_running_async
            .D8(-2i8 as u8) // gi_frame_state: suspended
            .D32(0)
            .append_section(iframe_section_314(executable, 0)),
    ))
}

//! The analysis environment: a snapshot plus what we know about it.
//!
//! An [`Environment`] couples a [`MemoryReader`] with the variant registry:
//! the address of the meta type (the `type` type) and a table of well-known
//! type names to type-object addresses. The registry is discovered by
//! external scans and persisted next to the snapshot as
//! `analysis-data.json`; the engine only consumes it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use failure::Fail;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::addr::MappedAddr;
use crate::memory::{Error, MemoryReader};
use crate::traverse::{Traversal, TraverseOptions};
use crate::{py310, py314};

/// The interpreter version a snapshot was taken from.
///
/// The 3.10 and 3.14 object layouts are distinct variant sets; the engine
/// commits to one of them when the environment is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PyVersion {
    Py310,
    Py314,
}

impl Default for PyVersion {
    fn default() -> PyVersion {
        PyVersion::Py310
    }
}

impl FromStr for PyVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<PyVersion, String> {
        match s {
            "3.10" | "310" => Ok(PyVersion::Py310),
            "3.14" | "314" => Ok(PyVersion::Py314),
            other => Err(format!("unsupported Python version: {}", other)),
        }
    }
}

impl fmt::Display for PyVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PyVersion::Py310 => write!(f, "3.10"),
            PyVersion::Py314 => write!(f, "3.14"),
        }
    }
}

/// Raised by referent enumeration: partial edge sets are not returned.
#[derive(Debug, Fail, PartialEq)]
#[fail(display = "invalid object: {}", reason)]
pub struct InvalidObject {
    pub reason: &'static str,
}

impl InvalidObject {
    pub fn new(reason: &'static str) -> InvalidObject {
        InvalidObject { reason }
    }
}

/// The outgoing edges of an object. Deterministically ordered; may contain
/// null, which consumers filter as they see fit.
pub type ReferentSet = BTreeSet<MappedAddr>;

/// The on-disk shape of `analysis-data.json`.
#[derive(Serialize, Deserialize, Default)]
struct AnalysisData {
    base_type_object: u64,
    type_objects: HashMap<String, u64>,
}

/// A snapshot plus the variant registry discovered for it.
pub struct Environment {
    pub reader: MemoryReader,
    pub version: PyVersion,
    /// The address whose type-pointer identity marks "this object is itself
    /// a type descriptor".
    pub base_type_object: MappedAddr,
    /// Well-known variant names (`"int"`, `"dict"`, `"_asyncio.Task"`, ...)
    /// to type-object addresses.
    pub type_objects: HashMap<String, MappedAddr>,
    analysis_path: Option<PathBuf>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Environment")
            .field("version", &self.version)
            .field("base_type_object", &self.base_type_object)
            .field("type_objects", &self.type_objects.len())
            .finish()
    }
}

impl Environment {
    /// Opens the snapshot at `path` and loads its analysis metadata if any
    /// has been saved. A missing metadata file is an empty registry, not an
    /// error.
    pub fn open<P: AsRef<Path>>(path: P, version: PyVersion) -> Result<Environment, Error> {
        let path = path.as_ref();
        let analysis_path = if path.is_dir() {
            path.join("analysis-data.json")
        } else {
            PathBuf::from(format!("{}:analysis-data.json", path.display()))
        };
        let reader = MemoryReader::open(path)?;
        let mut env = Environment::from_reader(reader, version);
        env.analysis_path = Some(analysis_path.clone());
        match fs::read(&analysis_path) {
            Ok(contents) => match serde_json::from_slice::<AnalysisData>(&contents) {
                Ok(data) => {
                    env.base_type_object = MappedAddr(data.base_type_object);
                    env.type_objects = data
                        .type_objects
                        .into_iter()
                        .map(|(name, addr)| (name, MappedAddr(addr)))
                        .collect();
                }
                Err(err) => {
                    warn!(
                        "ignoring malformed analysis data {}: {}",
                        analysis_path.display(),
                        err
                    );
                }
            },
            Err(_) => {}
        }
        Ok(env)
    }

    /// Wraps an already-open reader with an empty registry.
    pub fn from_reader(reader: MemoryReader, version: PyVersion) -> Environment {
        Environment {
            reader,
            version,
            base_type_object: MappedAddr::NULL,
            type_objects: HashMap::new(),
            analysis_path: None,
        }
    }

    /// Persists the registry. The write is atomic: a partial file never
    /// replaces a previously valid one.
    pub fn save_analysis(&self) -> Result<(), Error> {
        let path = self
            .analysis_path
            .as_ref()
            .ok_or_else(|| Error::Format("environment has no analysis path".to_string()))?;
        let data = AnalysisData {
            base_type_object: self.base_type_object.0,
            type_objects: self
                .type_objects
                .iter()
                .map(|(name, addr)| (name.clone(), addr.0))
                .collect(),
        };
        let serialized = serde_json::to_vec_pretty(&data)
            .map_err(|err| Error::Format(format!("cannot serialize analysis data: {}", err)))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// The type-object address registered for `name`, or null.
    pub fn get_type_if_exists(&self, name: &str) -> MappedAddr {
        self.type_objects
            .get(name)
            .cloned()
            .unwrap_or(MappedAddr::NULL)
    }

    /// Decides whether `addr` names a valid object, of `expected_type` if
    /// given. Returns the tag of the first failing check, or `None` when the
    /// object is valid.
    ///
    /// This is non-recursive: pointees are checked for existence, never for
    /// validity. Callers re-validate any address they obtain from the
    /// object.
    pub fn invalid_reason(
        &self,
        addr: MappedAddr,
        expected_type: Option<MappedAddr>,
    ) -> Option<&'static str> {
        match self.version {
            PyVersion::Py310 => py310::invalid_reason(self, addr, expected_type),
            PyVersion::Py314 => py314::invalid_reason(self, addr, expected_type),
        }
    }

    /// Enumerates the outgoing edges of the object at `addr`. Fails
    /// atomically: no partial edge set is ever returned.
    pub fn direct_referents(&self, addr: MappedAddr) -> Result<ReferentSet, InvalidObject> {
        match self.version {
            PyVersion::Py310 => py310::direct_referents(self, addr),
            PyVersion::Py314 => py314::direct_referents(self, addr),
        }
    }

    /// Starts a traversal with the given limits.
    pub fn traverse(&self, options: TraverseOptions) -> Traversal {
        Traversal::new(self, options)
    }

    /// Renders the object at `addr` with the given limits. Never fails;
    /// validation failures are embedded in the output.
    pub fn repr(&self, addr: MappedAddr, options: TraverseOptions) -> String {
        self.traverse(options).repr(addr)
    }
}

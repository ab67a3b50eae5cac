//! Loading and compiling whole correction-set files.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;

use cal_core::{Error, Result};

use crate::compiled::{CompiledCompound, CompiledCorrection};
use crate::schema::CorrectionSet;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Every correction and compound correction of one file, compiled.
#[derive(Debug, Clone, Default)]
pub struct CorrectionLibrary {
    corrections: HashMap<String, Arc<CompiledCorrection>>,
    compounds: HashMap<String, Arc<CompiledCompound>>,
}

impl CorrectionLibrary {
    /// Compile a parsed document. Any malformed correction fails the whole set.
    pub fn from_set(set: &CorrectionSet) -> Result<Self> {
        if set.schema_version != 2 {
            return Err(Error::Config(format!(
                "unsupported correction schema version {} (expected 2)",
                set.schema_version
            )));
        }
        let mut corrections = HashMap::with_capacity(set.corrections.len());
        for c in &set.corrections {
            let compiled = CompiledCorrection::compile(c)?;
            if corrections.insert(c.name.clone(), Arc::new(compiled)).is_some() {
                return Err(Error::Config(format!("duplicate correction '{}'", c.name)));
            }
        }
        let mut compounds = HashMap::with_capacity(set.compound_corrections.len());
        for cc in &set.compound_corrections {
            let compiled = CompiledCompound::compile(cc, &corrections)?;
            compounds.insert(cc.name.clone(), Arc::new(compiled));
        }
        Ok(Self { corrections, compounds })
    }

    /// Parse and compile a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let set: CorrectionSet = serde_json::from_str(json)?;
        Self::from_set(&set)
    }

    /// Read a plain or gzip-compressed JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let json = if bytes.starts_with(&GZIP_MAGIC) {
            let mut out = String::new();
            GzDecoder::new(bytes.as_slice()).read_to_string(&mut out)?;
            out
        } else {
            String::from_utf8(bytes).map_err(|e| {
                Error::Config(format!("{} is not UTF-8 JSON: {e}", path.display()))
            })?
        };
        Self::from_json(&json).map_err(|e| match e {
            Error::Json(j) => Error::Config(format!("{}: {j}", path.display())),
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Look up a single correction.
    pub fn correction(&self, name: &str) -> Option<Arc<CompiledCorrection>> {
        self.corrections.get(name).cloned()
    }

    /// Look up a compound correction.
    pub fn compound(&self, name: &str) -> Option<Arc<CompiledCompound>> {
        self.compounds.get(name).cloned()
    }

    /// Sorted names of all corrections and compounds.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.corrections.keys().chain(self.compounds.keys()).cloned().collect();
        names.sort();
        names
    }

    /// Number of single corrections.
    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    /// True when the file held no corrections.
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }
}

//! Table discovery and the process-wide table cache.
//!
//! Published tables live under `<root>/POG/<POG>/<year>_UL/<file>`; tables
//! derived by the analysis itself (b-tag efficiencies, electron trigger
//! efficiencies, muon momentum scale) live under `<root>/local/<year>/<file>`.
//! Parsed files are compiled once per process and shared through `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};

use cal_core::{Error, Result, Year};

use crate::library::CorrectionLibrary;
use crate::table::ScaleFactorTable;

/// Table family, one file per family and year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableGroup {
    /// Muon id/iso/reco/trigger for the Z-resonance scheme
    Muon,
    /// Muon scale factors for the high-pt scheme
    MuonHighPt,
    /// Electron id and reconstruction
    Electron,
    /// Tau id, trigger and energy scale
    Tau,
    /// Pileup profile reweighting
    Pileup,
    /// b-tag scale factors
    BTag,
    /// MET phi modulation
    Met,
    /// Pileup jet id
    PuJetId,
    /// Jet veto maps
    JetVetoMaps,
    /// Jet energy corrections and resolution
    Jerc,
    /// Measured b-tag efficiencies
    BTagEfficiency,
    /// Measured electron trigger efficiencies
    ElectronTrigger,
    /// Muon momentum scale and resolution
    MuonScale,
}

impl TableGroup {
    /// Every group.
    pub const ALL: [TableGroup; 13] = [
        TableGroup::Muon,
        TableGroup::MuonHighPt,
        TableGroup::Electron,
        TableGroup::Tau,
        TableGroup::Pileup,
        TableGroup::BTag,
        TableGroup::Met,
        TableGroup::PuJetId,
        TableGroup::JetVetoMaps,
        TableGroup::Jerc,
        TableGroup::BTagEfficiency,
        TableGroup::ElectronTrigger,
        TableGroup::MuonScale,
    ];

    /// Short identifier used in configs and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableGroup::Muon => "muon",
            TableGroup::MuonHighPt => "muon_highpt",
            TableGroup::Electron => "electron",
            TableGroup::Tau => "tau",
            TableGroup::Pileup => "pileup",
            TableGroup::BTag => "btag",
            TableGroup::Met => "met",
            TableGroup::PuJetId => "pujetid",
            TableGroup::JetVetoMaps => "jetvetomaps",
            TableGroup::Jerc => "jerc",
            TableGroup::BTagEfficiency => "btag_eff",
            TableGroup::ElectronTrigger => "electron_trigger",
            TableGroup::MuonScale => "muon_scale",
        }
    }

    /// `(directory, file)` relative to the year directory.
    fn location(&self) -> (&'static str, &'static str) {
        match self {
            TableGroup::Muon => ("MUO", "muon_Z.json.gz"),
            TableGroup::MuonHighPt => ("MUO", "muon_HighPt.json.gz"),
            TableGroup::Electron => ("EGM", "electron.json.gz"),
            TableGroup::Tau => ("TAU", "tau.json.gz"),
            TableGroup::Pileup => ("LUM", "puWeights.json.gz"),
            TableGroup::BTag => ("BTV", "btagging.json.gz"),
            TableGroup::Met => ("JME", "met.json.gz"),
            TableGroup::PuJetId => ("JME", "jmar.json.gz"),
            TableGroup::JetVetoMaps => ("JME", "jetvetomaps.json.gz"),
            TableGroup::Jerc => ("JME", "jet_jerc.json.gz"),
            TableGroup::BTagEfficiency => ("local", "btag_eff.json.gz"),
            TableGroup::ElectronTrigger => ("local", "electron_trigger.json.gz"),
            TableGroup::MuonScale => ("local", "muon_scale.json.gz"),
        }
    }

    /// True for tables produced by the analysis rather than published.
    pub fn is_local(&self) -> bool {
        self.location().0 == "local"
    }

    /// Path of the gzip file for `year` under `root`.
    pub fn path(&self, root: &Path, year: Year) -> PathBuf {
        let (dir, file) = self.location();
        if self.is_local() {
            root.join("local").join(year.as_str()).join(file)
        } else {
            root.join("POG").join(dir).join(year.pog_tag()).join(file)
        }
    }
}

impl fmt::Display for TableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TableGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown table group '{s}'")))
    }
}

fn cache() -> &'static Mutex<HashMap<PathBuf, Arc<CorrectionLibrary>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<CorrectionLibrary>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Load `path` once per process; later calls share the compiled library.
pub fn cached_library(path: &Path) -> Result<Arc<CorrectionLibrary>> {
    {
        let guard = cache().lock().map_err(|_| Error::Computation("table cache poisoned".into()))?;
        if let Some(lib) = guard.get(path) {
            tracing::debug!(path = %path.display(), "table cache hit");
            return Ok(Arc::clone(lib));
        }
    }
    // Parse outside the lock; a concurrent loader of the same file keeps the first insert.
    let lib = Arc::new(CorrectionLibrary::from_path(path)?);
    let mut guard = cache().lock().map_err(|_| Error::Computation("table cache poisoned".into()))?;
    let entry = guard.entry(path.to_path_buf()).or_insert_with(|| Arc::clone(&lib));
    tracing::info!(path = %path.display(), n_corrections = entry.len(), "correction tables loaded");
    Ok(Arc::clone(entry))
}

/// Drop every cached library.
pub fn clear_cache() {
    if let Ok(mut guard) = cache().lock() {
        guard.clear();
    }
}

/// Resolves `(group, year, name)` to evaluable tables.
///
/// In-memory libraries registered with [`TableStore::insert`] take precedence
/// over files under the root directory.
#[derive(Debug, Clone, Default)]
pub struct TableStore {
    root: Option<PathBuf>,
    memory: HashMap<(TableGroup, Year), Arc<CorrectionLibrary>>,
}

impl TableStore {
    /// Store backed by a table directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()), memory: HashMap::new() }
    }

    /// Store with no backing directory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Register a library for `(group, year)`.
    pub fn insert(&mut self, group: TableGroup, year: Year, library: CorrectionLibrary) {
        self.memory.insert((group, year), Arc::new(library));
    }

    /// Builder form of [`TableStore::insert`].
    pub fn with_library(mut self, group: TableGroup, year: Year, library: CorrectionLibrary) -> Self {
        self.insert(group, year, library);
        self
    }

    /// Backing directory, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Existing file for `(group, year)`: the `.json.gz` path, or the plain
    /// `.json` sibling when only that exists.
    pub fn path_for(&self, group: TableGroup, year: Year) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let gz = group.path(root, year);
        if gz.is_file() {
            return Some(gz);
        }
        let plain = gz.with_extension("");
        plain.is_file().then_some(plain)
    }

    /// Compiled library for `(group, year)`.
    pub fn library(&self, group: TableGroup, year: Year) -> Result<Arc<CorrectionLibrary>> {
        if let Some(lib) = self.memory.get(&(group, year)) {
            return Ok(Arc::clone(lib));
        }
        match self.path_for(group, year) {
            Some(path) => cached_library(&path),
            None => Err(Error::Config(format!(
                "no {group} tables for year {year}{}",
                match self.root {
                    Some(ref r) => format!(" (looked for {})", group.path(r, year).display()),
                    None => String::new(),
                }
            ))),
        }
    }

    /// A named single or compound correction.
    pub fn table(&self, group: TableGroup, year: Year, name: &str) -> Result<ScaleFactorTable> {
        let lib = self.library(group, year)?;
        let label = format!("{group}/{year}/{name}");
        if let Some(c) = lib.correction(name) {
            return Ok(ScaleFactorTable::single(label, c));
        }
        if let Some(c) = lib.compound(name) {
            return Ok(ScaleFactorTable::compound(label, c));
        }
        Err(Error::Config(format!("no correction '{name}' in {group} tables for year {year}")))
    }

    /// A named correction with its systematic input declared.
    pub fn syst_table(
        &self,
        group: TableGroup,
        year: Year,
        name: &str,
        syst_input: &str,
    ) -> Result<ScaleFactorTable> {
        self.table(group, year, name)?.with_syst_input(syst_input)
    }
}

//! # cal-table
//!
//! Scale-factor and correction tables in the published JSON correction-set
//! format: serde schema, compile-time validation, a TFormula-subset formula
//! engine, column-wise evaluation by input name and a process-wide cache of
//! compiled files keyed by path.
//!
//! ```no_run
//! use cal_core::Year;
//! use cal_table::{Arg, TableGroup, TableStore};
//!
//! let store = TableStore::new("/data/corrections");
//! let pu = store
//!     .syst_table(TableGroup::Pileup, Year::Y2018, "Collisions18_UltraLegacy_goldenJSON", "weights")
//!     .unwrap();
//! let w = pu.evaluate(&[Arg::real("NumTrueInteractions", &[31.5, 42.0])], "nominal").unwrap();
//! println!("{w:?}");
//! ```

#![warn(clippy::all)]

pub mod compiled;
pub mod formula;
pub mod library;
pub mod schema;
pub mod store;
pub mod table;

pub use compiled::{CompiledCompound, CompiledCorrection, Value};
pub use formula::Formula;
pub use library::CorrectionLibrary;
pub use store::{TableGroup, TableStore, cached_library, clear_cache};
pub use table::{Arg, ScaleFactorTable};

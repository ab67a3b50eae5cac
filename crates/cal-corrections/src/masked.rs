//! Domain-masked per-object table evaluation.
//!
//! Correction tables reject coordinates outside their binning. Objects
//! outside a table's domain (or failing an extra selection) must still get a
//! factor, and it must be neutral. The evaluator keeps the collection's
//! shape intact: it
//!
//! 1. builds a flat mask from the domain predicate and any extra masks,
//! 2. substitutes an in-domain placeholder into every input column where the
//!    mask is false, so the table never sees an illegal coordinate,
//! 3. evaluates the table once over the flat columns,
//! 4. writes the fill value (1.0 for scale factors) where the mask is false.

use cal_core::{Error, Jagged, Result};
use cal_table::{Arg, ScaleFactorTable};

use crate::ledger::WeightLedger;

struct RealColumn {
    name: &'static str,
    values: Vec<f64>,
    placeholder: f64,
}

struct IntColumn {
    name: &'static str,
    values: Vec<i64>,
    placeholder: i64,
}

/// Builder for one masked table evaluation over a ragged collection.
pub struct MaskedEvaluator<'a, T> {
    objects: &'a Jagged<T>,
    mask: Vec<bool>,
    real: Vec<RealColumn>,
    int: Vec<IntColumn>,
    tags: Vec<(&'static str, String)>,
}

impl<'a, T> MaskedEvaluator<'a, T> {
    /// Start from the table's validity domain.
    pub fn new(objects: &'a Jagged<T>, domain: impl Fn(&T) -> bool) -> Self {
        let mask = objects.flat().iter().map(domain).collect();
        Self { objects, mask, real: Vec::new(), int: Vec::new(), tags: Vec::new() }
    }

    /// AND a flat per-object mask into the domain mask.
    pub fn and_mask(mut self, extra: &[bool]) -> Result<Self> {
        if extra.len() != self.mask.len() {
            return Err(Error::Validation(format!(
                "mask has {} entries, collection holds {} objects",
                extra.len(),
                self.mask.len()
            )));
        }
        for (m, &e) in self.mask.iter_mut().zip(extra) {
            *m &= e;
        }
        Ok(self)
    }

    /// AND a per-event mask, broadcast onto the event's objects.
    pub fn and_event_mask(self, per_event: &[bool]) -> Result<Self> {
        let flat = self.objects.broadcast(per_event)?;
        self.and_mask(&flat)
    }

    /// AND an object-level predicate into the mask.
    pub fn and_where(mut self, keep: impl Fn(&T) -> bool) -> Self {
        for (m, o) in self.mask.iter_mut().zip(self.objects.flat()) {
            *m &= keep(o);
        }
        self
    }

    /// Real input computed from each object.
    pub fn real(mut self, name: &'static str, value: impl Fn(&T) -> f64, placeholder: f64) -> Self {
        let values = self.objects.flat().iter().map(value).collect();
        self.real.push(RealColumn { name, values, placeholder });
        self
    }

    /// Real input from an already computed flat column.
    pub fn real_column(mut self, name: &'static str, values: Vec<f64>, placeholder: f64) -> Result<Self> {
        if values.len() != self.mask.len() {
            return Err(Error::Validation(format!(
                "column '{name}' has {} entries, collection holds {} objects",
                values.len(),
                self.mask.len()
            )));
        }
        self.real.push(RealColumn { name, values, placeholder });
        Ok(self)
    }

    /// Integer input computed from each object.
    pub fn int(mut self, name: &'static str, value: impl Fn(&T) -> i64, placeholder: i64) -> Self {
        let values = self.objects.flat().iter().map(value).collect();
        self.int.push(IntColumn { name, values, placeholder });
        self
    }

    /// String input shared by every object (working point, flavour label).
    pub fn tag(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.tags.push((name, value.into()));
        self
    }

    /// Final flat mask.
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Evaluate `table` with `syst`; masked-out objects get 1.0.
    pub fn evaluate(&self, table: &ScaleFactorTable, syst: &str) -> Result<Jagged<f64>> {
        self.evaluate_with(1.0, |args| table.evaluate(args, syst))
    }

    /// Evaluate a table with no systematic input; masked-out objects get 1.0.
    pub fn evaluate_plain(&self, table: &ScaleFactorTable) -> Result<Jagged<f64>> {
        self.evaluate_with(1.0, |args| table.evaluate_args(args))
    }

    /// Run `f` on the placeholder-substituted columns and write `fill` where
    /// the mask is false.
    pub fn evaluate_with(
        &self,
        fill: f64,
        f: impl FnOnce(&[Arg<'_>]) -> Result<Vec<f64>>,
    ) -> Result<Jagged<f64>> {
        let real: Vec<Vec<f64>> = self
            .real
            .iter()
            .map(|c| {
                c.values
                    .iter()
                    .zip(&self.mask)
                    .map(|(&v, &m)| if m { v } else { c.placeholder })
                    .collect()
            })
            .collect();
        let int: Vec<Vec<i64>> = self
            .int
            .iter()
            .map(|c| {
                c.values
                    .iter()
                    .zip(&self.mask)
                    .map(|(&v, &m)| if m { v } else { c.placeholder })
                    .collect()
            })
            .collect();

        let mut args = Vec::with_capacity(real.len() + int.len() + self.tags.len());
        for (c, v) in self.real.iter().zip(&real) {
            args.push(Arg::real(c.name, v));
        }
        for (c, v) in self.int.iter().zip(&int) {
            args.push(Arg::int(c.name, v));
        }
        for (name, value) in &self.tags {
            args.push(Arg::tag(name, value));
        }

        let values = if self.objects.is_empty() { Vec::new() } else { f(&args)? };
        if values.len() != self.mask.len() {
            return Err(Error::Computation(format!(
                "table returned {} values for {} objects",
                values.len(),
                self.mask.len()
            )));
        }
        let mut out = Vec::with_capacity(values.len());
        for (&v, &m) in values.iter().zip(&self.mask) {
            if !m {
                out.push(fill);
            } else if v.is_finite() {
                out.push(v);
            } else {
                return Err(Error::Computation(format!("table returned non-finite factor {v}")));
            }
        }
        self.objects.with_flat(out)
    }
}

/// Labels a table uses for its nominal and shifted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystLabels {
    /// Nominal label
    pub nominal: &'static str,
    /// Upward shift label
    pub up: &'static str,
    /// Downward shift label
    pub down: &'static str,
}

impl SystLabels {
    /// `nominal` / `systup` / `systdown`
    pub const MUON: SystLabels = SystLabels { nominal: "nominal", up: "systup", down: "systdown" };
    /// `sf` / `sfup` / `sfdown`
    pub const EGAMMA: SystLabels = SystLabels { nominal: "sf", up: "sfup", down: "sfdown" };
    /// `nom` / `up` / `down`
    pub const NOM_UP_DOWN: SystLabels = SystLabels { nominal: "nom", up: "up", down: "down" };
    /// `nominal` / `up` / `down`
    pub const NOMINAL_UP_DOWN: SystLabels = SystLabels { nominal: "nominal", up: "up", down: "down" };
    /// `default` / `up` / `down`
    pub const DEFAULT_UP_DOWN: SystLabels = SystLabels { nominal: "default", up: "up", down: "down" };
    /// `central` / `up` / `down`
    pub const CENTRAL_UP_DOWN: SystLabels = SystLabels { nominal: "central", up: "up", down: "down" };
}

/// Per-object factors for the nominal and, optionally, shifted tables.
#[derive(Debug, Clone)]
pub struct ObjectFactors {
    /// Nominal factors
    pub nominal: Jagged<f64>,
    /// Upward shift
    pub up: Option<Jagged<f64>>,
    /// Downward shift
    pub down: Option<Jagged<f64>>,
}

impl ObjectFactors {
    /// Evaluate nominal and, when `with_variations`, both shifts.
    pub fn evaluate<T>(
        eval: &MaskedEvaluator<'_, T>,
        table: &ScaleFactorTable,
        labels: SystLabels,
        with_variations: bool,
    ) -> Result<Self> {
        let nominal = eval.evaluate(table, labels.nominal)?;
        let (up, down) = if with_variations {
            (Some(eval.evaluate(table, labels.up)?), Some(eval.evaluate(table, labels.down)?))
        } else {
            (None, None)
        };
        Ok(Self { nominal, up, down })
    }

    /// Reduce to per-event products and register under `name`.
    pub fn add_to(&self, ledger: &mut WeightLedger, name: &str) -> Result<()> {
        ledger.add(
            name,
            self.nominal.prod_per_event(),
            self.up.as_ref().map(Jagged::prod_per_event),
            self.down.as_ref().map(Jagged::prod_per_event),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cal_table::CorrectionLibrary;

    #[derive(Clone, Copy)]
    struct Obj {
        pt: f64,
        eta: f64,
    }

    fn table() -> ScaleFactorTable {
        let lib = CorrectionLibrary::from_json(
            r#"{"schema_version": 2, "corrections": [{"name": "sf",
                "inputs": [{"name": "abseta", "type": "real"}, {"name": "pt", "type": "real"},
                           {"name": "syst", "type": "string"}],
                "output": {"name": "w", "type": "real"},
                "data": {"nodetype": "category", "input": "syst", "content": [
                    {"key": "nominal", "value": {"nodetype": "binning", "input": "pt",
                        "edges": [15, 50, 200], "content": [0.9, 0.8], "flow": "error"}},
                    {"key": "up", "value": {"nodetype": "binning", "input": "pt",
                        "edges": [15, 50, 200], "content": [0.95, 0.85], "flow": "error"}}]}}]}"#,
        )
        .unwrap();
        ScaleFactorTable::single("sf", lib.correction("sf").unwrap()).with_syst_input("syst").unwrap()
    }

    fn objects() -> Jagged<Obj> {
        Jagged::from_nested(vec![
            vec![Obj { pt: 20.0, eta: 0.1 }, Obj { pt: 500.0, eta: 0.1 }],
            vec![],
            vec![Obj { pt: 60.0, eta: 2.6 }, Obj { pt: 60.0, eta: -1.0 }],
        ])
    }

    #[test]
    fn out_of_domain_objects_get_unity() {
        let objs = objects();
        let eval = MaskedEvaluator::new(&objs, |o: &Obj| o.pt > 15.0 && o.pt < 199.999 && o.eta.abs() < 2.4)
            .real("pt", |o| o.pt, 20.0)
            .real("abseta", |o| o.eta.abs(), 0.0);
        let sf = eval.evaluate(&table(), "nominal").unwrap();
        assert_eq!(sf.to_nested(), vec![vec![0.9, 1.0], vec![], vec![1.0, 0.8]]);
        assert_eq!(sf.prod_per_event(), vec![0.9, 1.0, 0.8]);
    }

    #[test]
    fn extra_masks_and_event_masks_combine() {
        let objs = objects();
        let eval = MaskedEvaluator::new(&objs, |o: &Obj| o.pt < 199.999)
            .and_event_mask(&[false, true, true])
            .unwrap()
            .and_where(|o| o.eta.abs() < 2.4)
            .real("pt", |o| o.pt, 20.0)
            .real("abseta", |o| o.eta.abs(), 0.0);
        assert_eq!(eval.mask(), &[false, false, false, true]);
        let sf = eval.evaluate(&table(), "up").unwrap();
        assert_eq!(sf.flat(), &[1.0, 1.0, 1.0, 0.85]);
    }

    #[test]
    fn unmasked_illegal_coordinate_surfaces_table_error() {
        let objs = objects();
        let eval = MaskedEvaluator::new(&objs, |_: &Obj| true)
            .real("pt", |o| o.pt, 20.0)
            .real("abseta", |o| o.eta.abs(), 0.0);
        assert!(matches!(eval.evaluate(&table(), "nominal"), Err(Error::Table(_))));
    }

    #[test]
    fn empty_collection_skips_table() {
        let objs: Jagged<Obj> = Jagged::empty(3);
        let eval = MaskedEvaluator::new(&objs, |_: &Obj| true).real("pt", |o| o.pt, 20.0);
        let sf = eval.evaluate(&table(), "nominal").unwrap();
        assert_eq!(sf.prod_per_event(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn factors_register_in_ledger() {
        let objs = objects();
        let eval = MaskedEvaluator::new(&objs, |o: &Obj| o.pt > 15.0 && o.pt < 199.999 && o.eta.abs() < 2.4)
            .real("pt", |o| o.pt, 20.0)
            .real("abseta", |o| o.eta.abs(), 0.0);
        let labels = SystLabels { nominal: "nominal", up: "up", down: "up" };
        let f = ObjectFactors::evaluate(&eval, &table(), labels, true).unwrap();
        let mut ledger = WeightLedger::new(3);
        f.add_to(&mut ledger, "muon_id").unwrap();
        assert_eq!(ledger.variations(), vec!["muon_idUp", "muon_idDown"]);
        assert_eq!(ledger.weight(None).unwrap(), vec![0.9, 1.0, 0.8]);
    }
}

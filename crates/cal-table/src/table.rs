//! Column-wise evaluation of a single named correction.
//!
//! Callers pass inputs by name as [`Arg`]s; the table binds them to its
//! declared input order, so argument lists can be shared between tables with
//! different signatures (extra names are ignored, missing ones are an error).

use std::sync::Arc;

use cal_core::{Error, Result};

use crate::compiled::{CompiledCompound, CompiledCorrection, Value};
use crate::schema::{VarType, Variable};

/// One named input column.
#[derive(Debug, Clone, Copy)]
pub struct Arg<'a> {
    name: &'a str,
    column: Column<'a>,
}

#[derive(Debug, Clone, Copy)]
enum Column<'a> {
    Real(&'a [f64]),
    Int(&'a [i64]),
    RealScalar(f64),
    IntScalar(i64),
    Tag(&'a str),
}

impl<'a> Arg<'a> {
    /// Real-valued column.
    pub fn real(name: &'a str, values: &'a [f64]) -> Self {
        Self { name, column: Column::Real(values) }
    }

    /// Integer column.
    pub fn int(name: &'a str, values: &'a [i64]) -> Self {
        Self { name, column: Column::Int(values) }
    }

    /// Real value broadcast to every row.
    pub fn scalar(name: &'a str, value: f64) -> Self {
        Self { name, column: Column::RealScalar(value) }
    }

    /// Integer value broadcast to every row.
    pub fn int_scalar(name: &'a str, value: i64) -> Self {
        Self { name, column: Column::IntScalar(value) }
    }

    /// String value broadcast to every row.
    pub fn tag(name: &'a str, value: &'a str) -> Self {
        Self { name, column: Column::Tag(value) }
    }

    /// Input name.
    pub fn name(&self) -> &str {
        self.name
    }

    fn len(&self) -> Option<usize> {
        match self.column {
            Column::Real(v) => Some(v.len()),
            Column::Int(v) => Some(v.len()),
            _ => None,
        }
    }

    fn value(&self, row: usize, var: &Variable, table: &str) -> Result<Value<'a>> {
        let v = match (var.kind, self.column) {
            (VarType::Real, Column::Real(v)) => Value::Real(v[row]),
            (VarType::Real, Column::RealScalar(x)) => Value::Real(x),
            (VarType::Real, Column::Int(v)) => Value::Real(v[row] as f64),
            (VarType::Real, Column::IntScalar(i)) => Value::Real(i as f64),
            (VarType::Int, Column::Int(v)) => Value::Int(v[row]),
            (VarType::Int, Column::IntScalar(i)) => Value::Int(i),
            (VarType::Int, Column::Real(v)) if v[row].fract() == 0.0 => Value::Int(v[row] as i64),
            (VarType::Int, Column::RealScalar(x)) if x.fract() == 0.0 => Value::Int(x as i64),
            (VarType::String, Column::Tag(s)) => Value::Str(s),
            (kind, col) => {
                return Err(Error::Table(format!(
                    "table '{table}': input '{}' expects {kind:?}, got {col:?}",
                    var.name
                )));
            }
        };
        Ok(v)
    }
}

#[derive(Debug, Clone)]
enum Source {
    Single(Arc<CompiledCorrection>),
    Compound(Arc<CompiledCompound>),
}

/// A named correction bound to a year, ready for column-wise evaluation.
#[derive(Debug, Clone)]
pub struct ScaleFactorTable {
    label: String,
    source: Source,
    syst_input: Option<String>,
}

impl ScaleFactorTable {
    /// Wrap a single correction.
    pub fn single(label: impl Into<String>, correction: Arc<CompiledCorrection>) -> Self {
        Self { label: label.into(), source: Source::Single(correction), syst_input: None }
    }

    /// Wrap a compound correction.
    pub fn compound(label: impl Into<String>, compound: Arc<CompiledCompound>) -> Self {
        Self { label: label.into(), source: Source::Compound(compound), syst_input: None }
    }

    /// Declare which string input selects the systematic variation.
    pub fn with_syst_input(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        match self.inputs().iter().find(|v| v.name == name) {
            Some(v) if v.kind == VarType::String => {
                self.syst_input = Some(name);
                Ok(self)
            }
            Some(_) => Err(Error::Config(format!(
                "table '{}': systematic input '{name}' is not a string input",
                self.label
            ))),
            None => Err(Error::Config(format!(
                "table '{}' has no systematic input '{name}'",
                self.label
            ))),
        }
    }

    /// Label used in messages (`group/year/name`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Declared inputs in evaluation order.
    pub fn inputs(&self) -> &[Variable] {
        match self.source {
            Source::Single(ref c) => c.inputs(),
            Source::Compound(ref c) => c.inputs(),
        }
    }

    /// Number of stacked corrections for a compound table, `None` otherwise.
    pub fn n_stages(&self) -> Option<usize> {
        match self.source {
            Source::Single(_) => None,
            Source::Compound(ref c) => Some(c.n_stages()),
        }
    }

    /// True when the table declares an input of this name.
    pub fn has_input(&self, name: &str) -> bool {
        self.inputs().iter().any(|v| v.name == name)
    }

    /// Evaluate with `syst` bound to the declared systematic input.
    pub fn evaluate(&self, coords: &[Arg<'_>], syst: &str) -> Result<Vec<f64>> {
        let Some(ref syst_name) = self.syst_input else {
            return Err(Error::Config(format!(
                "table '{}' was not declared with a systematic input",
                self.label
            )));
        };
        let mut args = Vec::with_capacity(coords.len() + 1);
        args.extend_from_slice(coords);
        args.push(Arg::tag(syst_name, syst));
        self.evaluate_args(&args)
    }

    /// Evaluate with every input supplied explicitly.
    pub fn evaluate_args(&self, args: &[Arg<'_>]) -> Result<Vec<f64>> {
        let (bound, n) = self.bind(args)?;
        let mut out = Vec::with_capacity(n);
        let mut row = Vec::with_capacity(bound.len());
        for i in 0..n {
            self.fill_row(&bound, i, &mut row)?;
            let v = match self.source {
                Source::Single(ref c) => c.evaluate(&row)?,
                Source::Compound(ref c) => c.evaluate(&row)?,
            };
            out.push(v);
        }
        Ok(out)
    }

    /// For a compound table, the combined output per row and the output of
    /// every stage per row (`stages[stage][row]`).
    pub fn evaluate_stages(&self, args: &[Arg<'_>]) -> Result<(Vec<f64>, Vec<Vec<f64>>)> {
        let Source::Compound(ref c) = self.source else {
            return Err(Error::Config(format!("table '{}' is not a compound correction", self.label)));
        };
        let (bound, n) = self.bind(args)?;
        let mut total = Vec::with_capacity(n);
        let mut stages: Vec<Vec<f64>> = (0..c.n_stages()).map(|_| Vec::with_capacity(n)).collect();
        let mut row = Vec::with_capacity(bound.len());
        for i in 0..n {
            self.fill_row(&bound, i, &mut row)?;
            let (out, per_stage) = c.evaluate_stages(&row)?;
            total.push(out);
            for (s, v) in stages.iter_mut().zip(per_stage) {
                s.push(v);
            }
        }
        Ok((total, stages))
    }

    fn bind<'a>(&self, args: &[Arg<'a>]) -> Result<(Vec<Arg<'a>>, usize)> {
        let mut bound = Vec::with_capacity(self.inputs().len());
        for var in self.inputs() {
            let arg = args.iter().find(|a| a.name == var.name).ok_or_else(|| {
                Error::Config(format!("table '{}' needs input '{}'", self.label, var.name))
            })?;
            bound.push(*arg);
        }
        let mut n: Option<usize> = None;
        for a in &bound {
            if let Some(len) = a.len() {
                match n {
                    None => n = Some(len),
                    Some(m) if m != len => {
                        return Err(Error::Validation(format!(
                            "table '{}': input '{}' has {len} rows, expected {m}",
                            self.label, a.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok((bound, n.unwrap_or(1)))
    }

    fn fill_row<'a>(&self, bound: &[Arg<'a>], i: usize, row: &mut Vec<Value<'a>>) -> Result<()> {
        row.clear();
        for (a, var) in bound.iter().zip(self.inputs()) {
            row.push(a.value(i, var, &self.label)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::CorrectionLibrary;

    fn muon_like() -> ScaleFactorTable {
        let lib = CorrectionLibrary::from_json(
            r#"{"schema_version": 2, "corrections": [{
                "name": "NUM_TightID_DEN_TrackerMuons", "version": 1,
                "inputs": [{"name": "abseta", "type": "real"}, {"name": "pt", "type": "real"},
                           {"name": "scale_factors", "type": "string"}],
                "output": {"name": "weight", "type": "real"},
                "data": {"nodetype": "category", "input": "scale_factors", "content": [
                    {"key": "nominal", "value": {"nodetype": "multibinning", "inputs": ["abseta", "pt"],
                        "edges": [[0, 1.2, 2.4], [15, 30, 200]], "content": [0.99, 0.98, 0.97, 0.96],
                        "flow": "error"}},
                    {"key": "systup", "value": 1.01},
                    {"key": "systdown", "value": 0.95}
                ]}
            }]}"#,
        )
        .unwrap();
        ScaleFactorTable::single("muon/2018/tight", lib.correction("NUM_TightID_DEN_TrackerMuons").unwrap())
            .with_syst_input("scale_factors")
            .unwrap()
    }

    #[test]
    fn column_evaluation_by_name() {
        let t = muon_like();
        let pt = [20.0, 40.0, 40.0];
        let eta = [0.5, 0.5, 2.0];
        let sf = t.evaluate(&[Arg::real("pt", &pt), Arg::real("abseta", &eta)], "nominal").unwrap();
        assert_eq!(sf, vec![0.99, 0.98, 0.96]);
        let up = t.evaluate(&[Arg::real("pt", &pt), Arg::real("abseta", &eta)], "systup").unwrap();
        assert_eq!(up, vec![1.01; 3]);
    }

    #[test]
    fn missing_input_is_config_error() {
        let t = muon_like();
        let err = t.evaluate(&[Arg::real("pt", &[20.0])], "nominal").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn out_of_domain_is_table_error() {
        let t = muon_like();
        let err = t.evaluate(&[Arg::real("pt", &[250.0]), Arg::real("abseta", &[0.5])], "nominal");
        assert!(matches!(err, Err(Error::Table(_))));
    }

    #[test]
    fn row_count_mismatch() {
        let t = muon_like();
        let err = t.evaluate(&[Arg::real("pt", &[20.0, 30.0]), Arg::real("abseta", &[0.5])], "nominal");
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn bad_syst_input() {
        let lib = CorrectionLibrary::from_json(
            r#"{"schema_version": 2, "corrections": [{"name": "c",
                "inputs": [{"name": "pt", "type": "real"}], "output": {"name": "w", "type": "real"},
                "data": 1.0}]}"#,
        )
        .unwrap();
        let t = ScaleFactorTable::single("c", lib.correction("c").unwrap());
        assert!(t.clone().with_syst_input("pt").is_err());
        assert!(t.clone().with_syst_input("syst").is_err());
        assert!(matches!(t.evaluate(&[Arg::scalar("pt", 1.0)], "nominal"), Err(Error::Config(_))));
    }
}

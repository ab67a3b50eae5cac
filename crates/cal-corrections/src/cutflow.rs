//! Named event selections and cumulative cutflows.

use serde::Serialize;

use cal_core::{Error, Result};

/// Ordered set of named boolean event masks.
#[derive(Debug, Clone)]
pub struct Selection {
    n_events: usize,
    cuts: Vec<(String, Vec<bool>)>,
}

impl Selection {
    /// Empty selection over `n_events` events.
    pub fn new(n_events: usize) -> Self {
        Self { n_events, cuts: Vec::new() }
    }

    /// Append a cut. Names are unique.
    pub fn add(&mut self, name: impl Into<String>, mask: Vec<bool>) -> Result<()> {
        let name = name.into();
        if self.cuts.iter().any(|(n, _)| *n == name) {
            return Err(Error::Validation(format!("cut '{name}' added twice")));
        }
        if mask.len() != self.n_events {
            return Err(Error::Validation(format!(
                "cut '{name}' has {} entries, selection has {} events",
                mask.len(),
                self.n_events
            )));
        }
        self.cuts.push((name, mask));
        Ok(())
    }

    /// Cut names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.cuts.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Events passing every named cut; all cuts when `names` is empty.
    pub fn all(&self, names: &[&str]) -> Result<Vec<bool>> {
        let mut pass = vec![true; self.n_events];
        if names.is_empty() {
            for (_, m) in &self.cuts {
                and_into(&mut pass, m);
            }
            return Ok(pass);
        }
        for name in names {
            let (_, m) = self
                .cuts
                .iter()
                .find(|(n, _)| n == *name)
                .ok_or_else(|| Error::Validation(format!("unknown cut '{name}'")))?;
            and_into(&mut pass, m);
        }
        Ok(pass)
    }
}

fn and_into(acc: &mut [bool], mask: &[bool]) {
    for (a, &m) in acc.iter_mut().zip(mask) {
        *a &= m;
    }
}

/// One row of a cutflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CutflowRow {
    /// Cut name
    pub cut: String,
    /// Raw events passing this and every earlier cut
    pub events: u64,
    /// Weighted sum of those events
    pub weighted: f64,
}

/// Cumulative event counts after each cut.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cutflow {
    /// Raw events before any cut
    pub initial_events: u64,
    /// Weighted events before any cut
    pub initial_weighted: f64,
    /// One row per cut, in order
    pub rows: Vec<CutflowRow>,
}

impl Cutflow {
    /// Apply the cuts of `selection` in order, weighting by `weights`.
    pub fn compute(selection: &Selection, weights: &[f64]) -> Result<Self> {
        if weights.len() != selection.n_events {
            return Err(Error::Validation(format!(
                "weights have {} entries, selection has {} events",
                weights.len(),
                selection.n_events
            )));
        }
        let mut pass = vec![true; selection.n_events];
        let mut rows = Vec::with_capacity(selection.cuts.len());
        for (name, mask) in &selection.cuts {
            and_into(&mut pass, mask);
            let (events, weighted) = tally(&pass, weights);
            rows.push(CutflowRow { cut: name.clone(), events, weighted });
        }
        Ok(Self {
            initial_events: selection.n_events as u64,
            initial_weighted: weights.iter().sum(),
            rows,
        })
    }

    /// Add another batch's cutflow with the same cuts.
    pub fn merge(&mut self, other: &Cutflow) -> Result<()> {
        if self.rows.len() != other.rows.len()
            || self.rows.iter().zip(&other.rows).any(|(a, b)| a.cut != b.cut)
        {
            return Err(Error::Validation("cannot merge cutflows with different cuts".into()));
        }
        self.initial_events += other.initial_events;
        self.initial_weighted += other.initial_weighted;
        for (a, b) in self.rows.iter_mut().zip(&other.rows) {
            a.events += b.events;
            a.weighted += b.weighted;
        }
        Ok(())
    }
}

fn tally(pass: &[bool], weights: &[f64]) -> (u64, f64) {
    pass.iter().zip(weights).filter(|(p, _)| **p).fold((0u64, 0.0), |(n, s), (_, &w)| (n + 1, s + w))
}

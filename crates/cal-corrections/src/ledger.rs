//! Named per-event weights with up/down variations.
//!
//! The nominal event weight is the product of every registered nominal.
//! Requesting variation `"<name>Up"` (or `"<name>Down"`) swaps that one
//! entry's nominal for its shifted array and keeps every other nominal.

use std::collections::HashSet;

use cal_core::{Error, Result};

/// One registered weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightEntry {
    /// Ledger name
    pub name: String,
    /// Nominal per-event values
    pub nominal: Vec<f64>,
    /// Upward shift
    pub up: Option<Vec<f64>>,
    /// Downward shift
    pub down: Option<Vec<f64>>,
}

/// Accumulates named per-event weights for one batch.
#[derive(Debug, Clone)]
pub struct WeightLedger {
    n_events: usize,
    entries: Vec<WeightEntry>,
}

impl WeightLedger {
    /// Empty ledger for `n_events` events.
    pub fn new(n_events: usize) -> Self {
        Self { n_events, entries: Vec::new() }
    }

    /// Number of events every entry must cover.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Register a weight. Names are unique and every array must hold one
    /// value per event.
    pub fn add(
        &mut self,
        name: &str,
        nominal: Vec<f64>,
        up: Option<Vec<f64>>,
        down: Option<Vec<f64>>,
    ) -> Result<()> {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(Error::Validation(format!("weight '{name}' registered twice")));
        }
        self.check_len(name, "nominal", &nominal)?;
        if let Some(ref u) = up {
            self.check_len(name, "up", u)?;
        }
        if let Some(ref d) = down {
            self.check_len(name, "down", d)?;
        }
        tracing::debug!(
            weight = name,
            has_up = up.is_some(),
            has_down = down.is_some(),
            "weight registered"
        );
        self.entries.push(WeightEntry { name: name.to_string(), nominal, up, down });
        Ok(())
    }

    /// Register a weight without variations.
    pub fn add_nominal(&mut self, name: &str, nominal: Vec<f64>) -> Result<()> {
        self.add(name, nominal, None, None)
    }

    fn check_len(&self, name: &str, which: &str, values: &[f64]) -> Result<()> {
        if values.len() != self.n_events {
            return Err(Error::Validation(format!(
                "weight '{name}' ({which}) has {} entries, ledger has {} events",
                values.len(),
                self.n_events
            )));
        }
        Ok(())
    }

    /// Registered entries in insertion order.
    pub fn entries(&self) -> &[WeightEntry] {
        &self.entries
    }

    /// Entry by name.
    pub fn entry(&self, name: &str) -> Option<&WeightEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Every available variation label: `<name>Up` / `<name>Down`.
    pub fn variations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for e in &self.entries {
            if e.up.is_some() {
                out.push(format!("{}Up", e.name));
            }
            if e.down.is_some() {
                out.push(format!("{}Down", e.name));
            }
        }
        out
    }

    /// Combined per-event weight, nominal (`None` or `"nominal"`) or for one
    /// variation.
    pub fn weight(&self, variation: Option<&str>) -> Result<Vec<f64>> {
        let shifted = match variation {
            None | Some("nominal") => None,
            Some(v) => Some(self.resolve(v)?),
        };
        let mut w = vec![1.0; self.n_events];
        for (i, e) in self.entries.iter().enumerate() {
            let values = match shifted {
                Some((idx, values)) if idx == i => values,
                _ => &e.nominal,
            };
            for (acc, &x) in w.iter_mut().zip(values) {
                *acc *= x;
            }
        }
        Ok(w)
    }

    fn resolve(&self, variation: &str) -> Result<(usize, &Vec<f64>)> {
        let (name, up) = if let Some(n) = variation.strip_suffix("Up") {
            (n, true)
        } else if let Some(n) = variation.strip_suffix("Down") {
            (n, false)
        } else {
            return Err(Error::Validation(format!(
                "variation '{variation}' must end in 'Up' or 'Down'"
            )));
        };
        let idx = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Error::Validation(format!("unknown variation '{variation}'")))?;
        let e = &self.entries[idx];
        let values = if up { e.up.as_ref() } else { e.down.as_ref() };
        let values = values.ok_or_else(|| {
            Error::Validation(format!("weight '{name}' has no {} variation", if up { "up" } else { "down" }))
        })?;
        Ok((idx, values))
    }

    /// Nominal product over a subset: `include` (all when empty) minus `exclude`.
    pub fn partial_weight(&self, include: &[&str], exclude: &[&str]) -> Result<Vec<f64>> {
        for n in include.iter().chain(exclude) {
            if self.entry(n).is_none() {
                return Err(Error::Validation(format!("unknown weight '{n}'")));
            }
        }
        let include: HashSet<&str> = include.iter().copied().collect();
        let exclude: HashSet<&str> = exclude.iter().copied().collect();
        let mut w = vec![1.0; self.n_events];
        for e in &self.entries {
            let keep = (include.is_empty() || include.contains(e.name.as_str()))
                && !exclude.contains(e.name.as_str());
            if keep {
                for (acc, &x) in w.iter_mut().zip(&e.nominal) {
                    *acc *= x;
                }
            }
        }
        Ok(w)
    }

    /// Sum of the nominal weight over all events.
    pub fn sum_of_weights(&self) -> f64 {
        self.weight(None).map(|w| w.iter().sum()).unwrap_or(0.0)
    }
}

//! Ragged per-event collections.
//!
//! A [`Jagged`] stores a variable number of objects per event as one flat
//! buffer plus an offsets array (`offsets.len() == n_events + 1`). Event `i`
//! owns `flat[offsets[i]..offsets[i + 1]]`. Every flat array derived from a
//! collection (masks, scale factors, shifted momenta) shares these offsets,
//! so per-event reductions never need the original nesting.

use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Flat values plus per-event boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Jagged<T> {
    flat: Vec<T>,
    offsets: Vec<usize>,
}

impl<T> Default for Jagged<T> {
    fn default() -> Self {
        Self { flat: Vec::new(), offsets: vec![0] }
    }
}

impl<T> Jagged<T> {
    /// Build from a flat buffer and explicit offsets.
    ///
    /// Offsets must start at 0, be non-decreasing and end at `flat.len()`.
    pub fn new(flat: Vec<T>, offsets: Vec<usize>) -> Result<Self> {
        validate_offsets(&offsets, flat.len())?;
        Ok(Self { flat, offsets })
    }

    /// Rebuild nesting from a flat buffer and per-event counts.
    pub fn from_counts(flat: Vec<T>, counts: &[usize]) -> Result<Self> {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        offsets.push(0usize);
        let mut acc = 0usize;
        for &c in counts {
            acc += c;
            offsets.push(acc);
        }
        if acc != flat.len() {
            return Err(Error::Validation(format!(
                "counts sum to {acc} but flat buffer holds {} values",
                flat.len()
            )));
        }
        Ok(Self { flat, offsets })
    }

    /// Flatten a nested representation.
    pub fn from_nested(nested: Vec<Vec<T>>) -> Self {
        let mut offsets = Vec::with_capacity(nested.len() + 1);
        offsets.push(0usize);
        let total = nested.iter().map(Vec::len).sum();
        let mut flat = Vec::with_capacity(total);
        for ev in nested {
            flat.extend(ev);
            offsets.push(flat.len());
        }
        Self { flat, offsets }
    }

    /// `n_events` events with no objects.
    pub fn empty(n_events: usize) -> Self {
        Self { flat: Vec::new(), offsets: vec![0; n_events + 1] }
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of objects across all events.
    pub fn len(&self) -> usize {
        self.flat.len()
    }

    /// True when no event holds any object.
    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    /// Event boundaries.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Objects per event.
    pub fn counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Flat view of every object.
    pub fn flat(&self) -> &[T] {
        &self.flat
    }

    /// Mutable flat view. The shape cannot change through it.
    pub fn flat_mut(&mut self) -> &mut [T] {
        &mut self.flat
    }

    /// Consume into the flat buffer.
    pub fn into_flat(self) -> Vec<T> {
        self.flat
    }

    /// Objects of event `i`.
    pub fn event(&self, i: usize) -> &[T] {
        &self.flat[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Iterate events as slices.
    pub fn iter_events(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.offsets.windows(2).map(move |w| &self.flat[w[0]..w[1]])
    }

    /// Owning event index of every flat object.
    pub fn event_index(&self) -> Vec<usize> {
        let mut idx = Vec::with_capacity(self.flat.len());
        for (ev, w) in self.offsets.windows(2).enumerate() {
            idx.extend(std::iter::repeat_n(ev, w[1] - w[0]));
        }
        idx
    }

    /// Repeat one value per event onto every object of that event.
    pub fn broadcast<U: Clone>(&self, per_event: &[U]) -> Result<Vec<U>> {
        if per_event.len() != self.n_events() {
            return Err(Error::Validation(format!(
                "per-event array has {} entries, collection has {} events",
                per_event.len(),
                self.n_events()
            )));
        }
        let mut out = Vec::with_capacity(self.flat.len());
        for (v, w) in per_event.iter().zip(self.offsets.windows(2)) {
            out.extend(std::iter::repeat_n(v.clone(), w[1] - w[0]));
        }
        Ok(out)
    }

    /// Same shape, values mapped element-wise.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Jagged<U> {
        Jagged { flat: self.flat.iter().map(f).collect(), offsets: self.offsets.clone() }
    }

    /// Attach a new flat buffer to this collection's shape.
    pub fn with_flat<U>(&self, flat: Vec<U>) -> Result<Jagged<U>> {
        if flat.len() != self.flat.len() {
            return Err(Error::Validation(format!(
                "flat array has {} values, collection holds {} objects",
                flat.len(),
                self.flat.len()
            )));
        }
        Ok(Jagged { flat, offsets: self.offsets.clone() })
    }

    /// True when both collections have identical per-event counts.
    pub fn same_shape<U>(&self, other: &Jagged<U>) -> bool {
        self.offsets == other.offsets
    }
}

impl<T: Clone> Jagged<T> {
    /// Keep objects satisfying `keep`, preserving event boundaries.
    pub fn filter(&self, mut keep: impl FnMut(&T) -> bool) -> Jagged<T> {
        let mut flat = Vec::new();
        let mut offsets = Vec::with_capacity(self.offsets.len());
        offsets.push(0);
        for ev in self.iter_events() {
            flat.extend(ev.iter().filter(|o| keep(o)).cloned());
            offsets.push(flat.len());
        }
        Jagged { flat, offsets }
    }

    /// Keep objects whose flat mask entry is true.
    pub fn select(&self, mask: &[bool]) -> Result<Jagged<T>> {
        if mask.len() != self.flat.len() {
            return Err(Error::Validation(format!(
                "mask has {} entries, collection holds {} objects",
                mask.len(),
                self.flat.len()
            )));
        }
        let mut flat = Vec::new();
        let mut offsets = Vec::with_capacity(self.offsets.len());
        offsets.push(0);
        for w in self.offsets.windows(2) {
            for i in w[0]..w[1] {
                if mask[i] {
                    flat.push(self.flat[i].clone());
                }
            }
            offsets.push(flat.len());
        }
        Ok(Jagged { flat, offsets })
    }

    /// Nested copy, one `Vec` per event.
    pub fn to_nested(&self) -> Vec<Vec<T>> {
        self.iter_events().map(<[T]>::to_vec).collect()
    }
}

impl Jagged<f64> {
    /// Product over each event's objects; events without objects give 1.
    pub fn prod_per_event(&self) -> Vec<f64> {
        self.iter_events().map(|ev| ev.iter().product()).collect()
    }

    /// Sum over each event's objects; events without objects give 0.
    pub fn sum_per_event(&self) -> Vec<f64> {
        self.iter_events().map(|ev| ev.iter().sum()).collect()
    }
}

impl Jagged<bool> {
    /// True where any object of the event is true.
    pub fn any_per_event(&self) -> Vec<bool> {
        self.iter_events().map(|ev| ev.iter().any(|&b| b)).collect()
    }

    /// Number of true objects per event.
    pub fn count_per_event(&self) -> Vec<usize> {
        self.iter_events().map(|ev| ev.iter().filter(|&&b| b).count()).collect()
    }
}

fn validate_offsets(offsets: &[usize], n_flat: usize) -> Result<()> {
    let Some(&first) = offsets.first() else {
        return Err(Error::Validation("offsets must contain at least one entry".into()));
    };
    if first != 0 {
        return Err(Error::Validation(format!("offsets must start at 0, got {first}")));
    }
    if offsets.windows(2).any(|w| w[1] < w[0]) {
        return Err(Error::Validation("offsets must be non-decreasing".into()));
    }
    let last = offsets[offsets.len() - 1];
    if last != n_flat {
        return Err(Error::Validation(format!(
            "last offset {last} does not match flat length {n_flat}"
        )));
    }
    Ok(())
}

impl<T: Serialize> Serialize for Jagged<T> {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(self.n_events()))?;
        for ev in self.iter_events() {
            seq.serialize_element(ev)?;
        }
        seq.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Jagged<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let nested = Vec::<Vec<T>>::deserialize(d)?;
        Ok(Self::from_nested(nested))
    }
}

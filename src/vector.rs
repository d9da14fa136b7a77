//! Sparse feature vectors and their construction from sorted events.

use crate::error::Result;
use crate::records::{Token, TokenPair, Weighted};

use std::cmp::Ordering;
use std::iter::Peekable;

/// Ascending, unique indices with one value each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    indices: Vec<u32>,
    values: Vec<f64>,
    cardinality: usize,
}

impl SparseVector {
    /// Builds a vector from unordered `(index, value)` pairs, summing the
    /// values of repeated indices.
    pub fn from_pairs(mut pairs: Vec<(u32, f64)>) -> SparseVector {
        pairs.sort_by_key(|(i, _)| *i);
        let mut indices: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut values: Vec<f64> = Vec::with_capacity(pairs.len());
        for (i, v) in pairs {
            if indices.last() == Some(&i) {
                if let Some(last) = values.last_mut() {
                    *last += v;
                }
            } else {
                indices.push(i);
                values.push(v);
            }
        }
        let cardinality = indices.last().map_or(0, |i| *i as usize + 1);
        SparseVector {
            indices,
            values,
            cardinality,
        }
    }

    /// Non-zero entries of a dense slice.
    pub fn from_dense(dense: &[f64]) -> SparseVector {
        SparseVector::from_pairs(
            dense
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .map(|(i, v)| (i as u32, *v))
                .collect(),
        )
    }

    /// One past the largest index present.
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: u32) -> Option<f64> {
        self.indices.binary_search(&index).ok().map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn squared_norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum()
    }

    /// Same indices, values mapped by `f`. Entries mapped to zero are dropped.
    pub fn map(&self, mut f: impl FnMut(u32, f64) -> f64) -> SparseVector {
        let mut indices = Vec::with_capacity(self.indices.len());
        let mut values = Vec::with_capacity(self.values.len());
        for (i, v) in self.iter() {
            let w = f(i, v);
            if w != 0.0 {
                indices.push(i);
                values.push(w);
            }
        }
        let cardinality = indices.last().map_or(0, |i| *i as usize + 1);
        SparseVector {
            indices,
            values,
            cardinality,
        }
    }

    /// Pairs of values at the indices both vectors hold, in one merge pass.
    pub fn intersection<'a>(&'a self, other: &'a SparseVector) -> Intersection<'a> {
        Intersection { a: self, b: other, i: 0, j: 0 }
    }
}

pub struct Intersection<'a> {
    a: &'a SparseVector,
    b: &'a SparseVector,
    i: usize,
    j: usize,
}

impl Iterator for Intersection<'_> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<(f64, f64)> {
        while self.i < self.a.indices.len() && self.j < self.b.indices.len() {
            match self.a.indices[self.i].cmp(&self.b.indices[self.j]) {
                Ordering::Less => self.i += 1,
                Ordering::Greater => self.j += 1,
                Ordering::Equal => {
                    let pair = (self.a.values[self.i], self.b.values[self.j]);
                    self.i += 1;
                    self.j += 1;
                    return Some(pair);
                }
            }
        }
        None
    }
}

/// Groups events sorted by entry into one vector per entry.
///
/// A vector is only produced once the next entry (or the end of input) is
/// seen. Unsorted input gives split groups, which is not detected here.
pub struct VectorSource<I: Iterator<Item = Result<Weighted<TokenPair>>>> {
    events: Peekable<I>,
}

impl<I: Iterator<Item = Result<Weighted<TokenPair>>>> VectorSource<I> {
    pub fn new(events: I) -> VectorSource<I> {
        VectorSource {
            events: events.peekable(),
        }
    }
}

impl<I: Iterator<Item = Result<Weighted<TokenPair>>>> Iterator for VectorSource<I> {
    type Item = Result<(Token, SparseVector)>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.events.next()? {
            Ok(event) => event,
            Err(e) => return Some(Err(e)),
        };
        let entry = first.record.entry;
        let mut pairs = vec![(first.record.feature, first.weight)];

        while let Some(Ok(next)) = self.events.peek() {
            if next.record.entry != entry {
                break;
            }
            pairs.push((next.record.feature, next.weight));
            self.events.next();
        }
        if let Some(Err(_)) = self.events.peek() {
            if let Some(Err(e)) = self.events.next() {
                return Some(Err(e));
            }
        }
        Some(Ok((entry, SparseVector::from_pairs(pairs))))
    }
}

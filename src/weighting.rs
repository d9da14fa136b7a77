//! Transforms applied to feature vectors before they are compared.

use crate::enumerator::Enumerating;
use crate::error::Result;
use crate::records::{read_all, Token, Weighted};
use crate::vector::SparseVector;

use std::collections::HashMap;
use std::path::Path;

pub trait Weighting: Send + Sync {
    fn apply(&self, entry: Token, vector: &SparseVector) -> SparseVector;

    /// Smallest value `apply` can produce.
    fn lower_bound(&self) -> f64;

    /// Largest value `apply` can produce.
    fn upper_bound(&self) -> f64;
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightingKind {
    /// Raw weights
    #[default]
    Null,
    /// Pointwise mutual information
    Pmi,
    /// Pointwise mutual information, negative values dropped
    Ppmi,
    /// Unit length vectors
    L2,
}

impl WeightingKind {
    pub fn needs_marginals(&self) -> bool {
        matches!(self, WeightingKind::Pmi | WeightingKind::Ppmi)
    }

    pub fn build(&self, marginals: Option<Marginals>) -> Box<dyn Weighting> {
        match (self, marginals) {
            (WeightingKind::Null, _) | (WeightingKind::Pmi | WeightingKind::Ppmi, None) => Box::new(NullWeighting),
            (WeightingKind::Pmi, Some(marginals)) => Box::new(Pmi {
                marginals,
                positive: false,
            }),
            (WeightingKind::Ppmi, Some(marginals)) => Box::new(Pmi {
                marginals,
                positive: true,
            }),
            (WeightingKind::L2, _) => Box::new(L2Normalization),
        }
    }
}

/// Entry and feature totals of an event matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Marginals {
    entries: HashMap<Token, f64>,
    features: HashMap<Token, f64>,
    total: f64,
}

impl Marginals {
    pub fn from_vectors(vectors: &[(Token, SparseVector)]) -> Marginals {
        let mut marginals = Marginals::default();
        for (entry, vector) in vectors {
            let sum = vector.sum();
            *marginals.entries.entry(*entry).or_insert(0.0) += sum;
            for (feature, weight) in vector.iter() {
                *marginals.features.entry(feature).or_insert(0.0) += weight;
            }
            marginals.total += sum;
        }
        marginals
    }

    /// Totals from frequency files written by `count` or `filter`. The
    /// columns must be the ones the events were read with.
    pub fn from_files(entries: &Path, features: &Path, entry_column: Enumerating, feature_column: Enumerating) -> Result<Marginals> {
        let entries: Vec<Weighted<Token>> = read_all(entries, entry_column)?;
        let features: Vec<Weighted<Token>> = read_all(features, feature_column)?;
        let total = entries.iter().map(|e| e.weight).sum();
        Ok(Marginals {
            entries: entries.into_iter().map(|e| (e.record, e.weight)).collect(),
            features: features.into_iter().map(|f| (f.record, f.weight)).collect(),
            total,
        })
    }

    pub fn entry(&self, entry: Token) -> f64 {
        self.entries.get(&entry).copied().unwrap_or(0.0)
    }

    pub fn feature(&self, feature: Token) -> f64 {
        self.features.get(&feature).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.total
    }
}

/// Passes vectors through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWeighting;

impl Weighting for NullWeighting {
    fn apply(&self, _entry: Token, vector: &SparseVector) -> SparseVector {
        vector.clone()
    }

    fn lower_bound(&self) -> f64 {
        f64::NEG_INFINITY
    }

    fn upper_bound(&self) -> f64 {
        f64::INFINITY
    }
}

/// log( p(e,f) / (p(e) p(f)) ), optionally clipped at zero.
#[derive(Debug, Clone)]
pub struct Pmi {
    marginals: Marginals,
    positive: bool,
}

impl Pmi {
    pub fn new(marginals: Marginals, positive: bool) -> Pmi {
        Pmi { marginals, positive }
    }
}

impl Weighting for Pmi {
    fn apply(&self, entry: Token, vector: &SparseVector) -> SparseVector {
        let total = self.marginals.total();
        let entry_total = self.marginals.entry(entry);
        vector.map(|feature, weight| {
            let expected = entry_total * self.marginals.feature(feature);
            if weight <= 0.0 || expected <= 0.0 || total <= 0.0 {
                return 0.0;
            }
            let pmi = (weight * total / expected).ln();
            if self.positive {
                pmi.max(0.0)
            } else {
                pmi
            }
        })
    }

    fn lower_bound(&self) -> f64 {
        if self.positive {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }

    fn upper_bound(&self) -> f64 {
        f64::INFINITY
    }
}

/// Scales every vector to unit euclidean length.
#[derive(Debug, Default, Clone, Copy)]
pub struct L2Normalization;

impl Weighting for L2Normalization {
    fn apply(&self, _entry: Token, vector: &SparseVector) -> SparseVector {
        let norm = vector.squared_norm().sqrt();
        if norm == 0.0 {
            return vector.clone();
        }
        vector.map(|_, weight| weight / norm)
    }

    fn lower_bound(&self) -> f64 {
        -1.0
    }

    fn upper_bound(&self) -> f64 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn toy() -> Vec<(Token, SparseVector)> {
        vec![
            (1, SparseVector::from_pairs(vec![(1, 2.0), (2, 2.0)])),
            (2, SparseVector::from_pairs(vec![(1, 4.0)])),
        ]
    }

    #[test]
    fn null_is_identity_test() {
        let (_, v) = &toy()[0];
        assert_eq!(&NullWeighting.apply(1, v), v);
        assert_eq!(NullWeighting.lower_bound(), f64::NEG_INFINITY);
        assert_eq!(NullWeighting.upper_bound(), f64::INFINITY);
    }

    #[test]
    fn marginals_from_vectors_test() {
        let marginals = Marginals::from_vectors(&toy());
        assert_eq!(marginals.total(), 8.0);
        assert_eq!(marginals.entry(1), 4.0);
        assert_eq!(marginals.feature(1), 6.0);
        assert_eq!(marginals.feature(9), 0.0);
    }

    #[test]
    fn marginals_from_count_tables_test() {
        let dir = tempdir().unwrap();
        let entries = dir.path().join("entries.tsv");
        let features = dir.path().join("features.tsv");
        fs::write(&entries, "cat\t4\ndog\t4\n").unwrap();
        fs::write(&features, "purrs\t3\nbarks\t5\n").unwrap();

        let column = Enumerating::open(false, None).unwrap();
        let marginals = Marginals::from_files(&entries, &features, column.clone(), column.clone()).unwrap();
        assert_eq!(marginals.total(), 8.0);
        assert_eq!(marginals.entry(column.decode("dog").unwrap()), 4.0);
        assert_eq!(marginals.feature(column.decode("barks").unwrap()), 5.0);
        assert_eq!(marginals.feature(column.decode("sleeps").unwrap()), 0.0);

        // the same totals as derived from the events themselves
        let (cat, dog) = (column.decode("cat").unwrap(), column.decode("dog").unwrap());
        let (purrs, barks) = (column.decode("purrs").unwrap(), column.decode("barks").unwrap());
        let vectors = vec![
            (cat, SparseVector::from_pairs(vec![(purrs, 3.0), (barks, 1.0)])),
            (dog, SparseVector::from_pairs(vec![(barks, 4.0)])),
        ];
        assert_eq!(Marginals::from_vectors(&vectors), marginals);
    }

    #[test]
    fn pmi_of_toy_matrix_test() {
        let vectors = toy();
        let pmi = Pmi::new(Marginals::from_vectors(&vectors), false);
        let weighted = pmi.apply(1, &vectors[0].1);

        // p(1,2) = 2/8, p(e=1) = 4/8, p(f=2) = 2/8
        let expected = (2.0f64 * 8.0 / (4.0 * 2.0)).ln();
        assert!((weighted.get(2).unwrap() - expected).abs() < 1e-12);
        // p(1,1) = 2/8, p(f=1) = 6/8: negative
        assert!(weighted.get(1).unwrap() < 0.0);

        let ppmi = Pmi::new(Marginals::from_vectors(&vectors), true);
        let clipped = ppmi.apply(1, &vectors[0].1);
        assert_eq!(clipped.get(1), None);
        assert!(clipped.iter().all(|(_, w)| w >= ppmi.lower_bound()));
    }

    #[test]
    fn l2_gives_unit_vectors_test() {
        let v = SparseVector::from_pairs(vec![(0, 3.0), (4, 4.0)]);
        let unit = L2Normalization.apply(0, &v);
        assert!((unit.squared_norm() - 1.0).abs() < 1e-12);
        assert_eq!(unit.values(), &[0.6, 0.8]);
    }
}

//! Similarity measures split into shared, left, right and combine.
//!
//! `left` and `right` only look at one vector, so an all-pairs scan computes
//! them once per vector. `shared` is the only part evaluated per pair.

use crate::vector::SparseVector;

pub trait Measure: Send + Sync {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64;

    fn left(&self, a: &SparseVector) -> f64;

    fn right(&self, b: &SparseVector) -> f64;

    fn combine(&self, shared: f64, left: f64, right: f64) -> f64;

    /// Swapping the arguments never changes the score.
    fn is_commutative(&self) -> bool;

    fn similarity(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        self.combine(self.shared(a, b), self.left(a), self.right(b))
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureKind {
    Jaccard,
    WeightedJaccard,
    Cosine,
    Dice,
    Overlap,
    Lin,
    Recall,
}

impl MeasureKind {
    pub fn build(&self) -> Box<dyn Measure> {
        match self {
            MeasureKind::Jaccard => Box::new(Jaccard),
            MeasureKind::WeightedJaccard => Box::new(WeightedJaccard),
            MeasureKind::Cosine => Box::new(Cosine),
            MeasureKind::Dice => Box::new(Dice),
            MeasureKind::Overlap => Box::new(Overlap),
            MeasureKind::Lin => Box::new(Lin),
            MeasureKind::Recall => Box::new(Recall),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// |A ∩ B| / |A ∪ B| over the non-zero indices.
#[derive(Debug, Default, Clone, Copy)]
pub struct Jaccard;

impl Measure for Jaccard {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        a.intersection(b).filter(|(x, y)| *x != 0.0 && *y != 0.0).count() as f64
    }

    fn left(&self, a: &SparseVector) -> f64 {
        a.values().iter().filter(|v| **v != 0.0).count() as f64
    }

    fn right(&self, b: &SparseVector) -> f64 {
        self.left(b)
    }

    fn combine(&self, shared: f64, left: f64, right: f64) -> f64 {
        ratio(shared, left + right - shared)
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

/// Jaccard over weighted sets: Σ min / (Σ a + Σ b - Σ min).
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedJaccard;

impl Measure for WeightedJaccard {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        a.intersection(b).map(|(x, y)| x.min(y)).sum()
    }

    fn left(&self, a: &SparseVector) -> f64 {
        a.sum()
    }

    fn right(&self, b: &SparseVector) -> f64 {
        b.sum()
    }

    fn combine(&self, shared: f64, left: f64, right: f64) -> f64 {
        ratio(shared, left + right - shared)
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Cosine;

impl Measure for Cosine {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        a.intersection(b).map(|(x, y)| x * y).sum()
    }

    fn left(&self, a: &SparseVector) -> f64 {
        a.squared_norm()
    }

    fn right(&self, b: &SparseVector) -> f64 {
        b.squared_norm()
    }

    fn combine(&self, shared: f64, left: f64, right: f64) -> f64 {
        ratio(shared, (left * right).sqrt())
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

/// 2 |A ∩ B| / (|A| + |B|).
#[derive(Debug, Default, Clone, Copy)]
pub struct Dice;

impl Measure for Dice {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        Jaccard.shared(a, b)
    }

    fn left(&self, a: &SparseVector) -> f64 {
        Jaccard.left(a)
    }

    fn right(&self, b: &SparseVector) -> f64 {
        Jaccard.right(b)
    }

    fn combine(&self, shared: f64, left: f64, right: f64) -> f64 {
        ratio(2.0 * shared, left + right)
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

/// |A ∩ B| / min(|A|, |B|).
#[derive(Debug, Default, Clone, Copy)]
pub struct Overlap;

impl Measure for Overlap {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        Jaccard.shared(a, b)
    }

    fn left(&self, a: &SparseVector) -> f64 {
        Jaccard.left(a)
    }

    fn right(&self, b: &SparseVector) -> f64 {
        Jaccard.right(b)
    }

    fn combine(&self, shared: f64, left: f64, right: f64) -> f64 {
        ratio(shared, left.min(right))
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

/// Lin's measure: weight of the shared features of both vectors over the
/// total weight of both.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lin;

impl Measure for Lin {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        a.intersection(b).filter(|(x, y)| *x > 0.0 && *y > 0.0).map(|(x, y)| x + y).sum()
    }

    fn left(&self, a: &SparseVector) -> f64 {
        a.values().iter().filter(|v| **v > 0.0).sum()
    }

    fn right(&self, b: &SparseVector) -> f64 {
        self.left(b)
    }

    fn combine(&self, shared: f64, left: f64, right: f64) -> f64 {
        ratio(shared, left + right)
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

/// How much of B's weight is on features A also has. Scoring with the
/// arguments swapped gives precision.
#[derive(Debug, Default, Clone, Copy)]
pub struct Recall;

impl Measure for Recall {
    fn shared(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        a.intersection(b).map(|(_, y)| y).sum()
    }

    fn left(&self, _a: &SparseVector) -> f64 {
        0.0
    }

    fn right(&self, b: &SparseVector) -> f64 {
        b.sum()
    }

    fn combine(&self, shared: f64, _left: f64, right: f64) -> f64 {
        ratio(shared, right)
    }

    fn is_commutative(&self) -> bool {
        false
    }
}

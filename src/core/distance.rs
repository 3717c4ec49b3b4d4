// src/core/distance.rs

//! Distance values and metric distance functions.
//!
//! The index never inspects objects directly: every routing decision goes
//! through a `DistanceFunction`. Covering radii and parent distances are only
//! sound when that function is symmetric and obeys the triangle inequality;
//! the index assumes this and does not verify it.

use crate::core::common::ObjectId;
use crate::core::types::FeatureVector;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::ops::{Add, Sub};

/// A distance value produced by a `DistanceFunction`.
pub trait Distance:
    Copy
    + Debug
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The distance of an object to itself.
    fn null_distance() -> Self;

    /// A distance larger than any distance the function can produce.
    fn infinite_distance() -> Self;

    /// Total order over distance values.
    fn compare(&self, other: &Self) -> Ordering;

    /// `|self - other|`, the lower bound used for triangle-inequality pruning.
    #[must_use]
    fn abs_diff(self, other: Self) -> Self {
        if self.compare(&other) == Ordering::Less {
            other - self
        } else {
            self - other
        }
    }

    /// The larger of two distances.
    #[must_use]
    fn max_of(self, other: Self) -> Self {
        if other.compare(&self) == Ordering::Greater {
            other
        } else {
            self
        }
    }
}

impl Distance for f64 {
    fn null_distance() -> Self {
        0.0
    }

    fn infinite_distance() -> Self {
        Self::INFINITY
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl Distance for f32 {
    fn null_distance() -> Self {
        0.0
    }

    fn infinite_distance() -> Self {
        Self::INFINITY
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

/// An object that can be stored in the index.
pub trait IndexedObject: Clone + Debug + PartialEq + Serialize + DeserializeOwned {
    /// Stable identifier of the object.
    fn id(&self) -> ObjectId;
}

/// A metric over objects of type `O`.
pub trait DistanceFunction<O>: Debug {
    type Output: Distance;

    /// Computes the distance between two objects. Must be symmetric.
    fn distance(&self, a: &O, b: &O) -> Self::Output;

    /// The distance of an object to itself.
    fn null_distance(&self) -> Self::Output {
        Self::Output::null_distance()
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// L2 distance between feature vectors.
///
/// Vectors of different length are compared as if the shorter one were padded
/// with zeros, which keeps the function a metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EuclideanDistance;

impl DistanceFunction<FeatureVector> for EuclideanDistance {
    type Output = f64;

    fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        padded_pairs(&a.values, &b.values).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
    }

    fn name(&self) -> &'static str {
        "euclidean"
    }
}

/// L1 distance between feature vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManhattanDistance;

impl DistanceFunction<FeatureVector> for ManhattanDistance {
    type Output = f64;

    fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        padded_pairs(&a.values, &b.values).map(|(x, y)| (x - y).abs()).sum()
    }

    fn name(&self) -> &'static str {
        "manhattan"
    }
}

fn padded_pairs<'a>(a: &'a [f64], b: &'a [f64]) -> impl Iterator<Item = (f64, f64)> + 'a {
    let len = a.len().max(b.len());
    (0..len).map(move |i| (a.get(i).copied().unwrap_or(0.0), b.get(i).copied().unwrap_or(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fv(id: u64, values: &[f64]) -> FeatureVector {
        FeatureVector::new(id, values.to_vec())
    }

    #[test]
    fn test_euclidean_distance() {
        let a = fv(1, &[0.0, 0.0]);
        let b = fv(2, &[3.0, 4.0]);
        assert_relative_eq!(EuclideanDistance.distance(&a, &b), 5.0);
        assert_eq!(EuclideanDistance.distance(&a, &a), EuclideanDistance.null_distance());
    }

    #[test]
    fn test_euclidean_is_symmetric() {
        let a = fv(1, &[1.5, -2.0, 0.25]);
        let b = fv(2, &[-0.5, 4.0, 1.0]);
        assert_eq!(EuclideanDistance.distance(&a, &b), EuclideanDistance.distance(&b, &a));
    }

    #[test]
    fn test_manhattan_distance() {
        let a = fv(1, &[1.0, 1.0]);
        let b = fv(2, &[4.0, -3.0]);
        assert_relative_eq!(ManhattanDistance.distance(&a, &b), 7.0);
    }

    #[test]
    fn test_mismatched_lengths_are_zero_padded() {
        let a = fv(1, &[3.0]);
        let b = fv(2, &[0.0, 4.0]);
        assert_relative_eq!(EuclideanDistance.distance(&a, &b), 5.0);
    }

    #[test]
    fn test_abs_diff_and_max() {
        assert_eq!(2.0_f64.abs_diff(5.0), 3.0);
        assert_eq!(5.0_f64.abs_diff(2.0), 3.0);
        assert_eq!(2.0_f64.max_of(5.0), 5.0);
        assert_eq!(f64::infinite_distance().compare(&1e300), Ordering::Greater);
    }
}

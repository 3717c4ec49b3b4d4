//! Split policies: which two entries of an overflowing node are promoted to
//! routing objects, and how the remaining entries are distributed.

use std::cmp::Ordering;
use std::fmt::Debug;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::common::MTreeError;
use crate::core::distance::{Distance, DistanceFunction, IndexedObject};
use crate::core::indexing::mtree::entry::Entry;

/// Outcome of a split policy: two routing objects with their covering radii and
/// the entries each new node receives.
///
/// Every entry carries its distance to the routing object of its side as
/// parent distance. Both sides are non-empty and together hold exactly the
/// entries that were split, in their original relative order.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignments<O, D> {
    pub first_routing_object: O,
    pub first_covering_radius: D,
    pub first: Vec<Entry<O, D>>,
    pub second_routing_object: O,
    pub second_covering_radius: D,
    pub second: Vec<Entry<O, D>>,
}

pub trait SplitPolicy<O, D>: Debug {
    /// Picks the positions of the two entries promoted to routing objects.
    /// The positions must differ.
    fn promote<F>(&mut self, entries: &[Entry<O, D>], distance_fn: &F) -> Result<(usize, usize), MTreeError>
    where
        F: DistanceFunction<O, Output = D>;

    /// Promotes two routing objects and assigns every entry to the nearer one.
    fn split<F>(&mut self, entries: &[Entry<O, D>], distance_fn: &F) -> Result<Assignments<O, D>, MTreeError>
    where
        O: IndexedObject,
        D: Distance,
        F: DistanceFunction<O, Output = D>,
    {
        if entries.len() < 2 {
            return Err(MTreeError::InvalidPartition(format!(
                "cannot split {} entries into two non-empty nodes",
                entries.len()
            )));
        }
        let (first, second) = self.promote(entries, distance_fn)?;
        if first == second || first >= entries.len() || second >= entries.len() {
            return Err(MTreeError::InvalidPartition(format!(
                "promoted positions {} and {} for {} entries",
                first,
                second,
                entries.len()
            )));
        }
        Ok(generalized_hyperplane(entries, first, second, distance_fn))
    }
}

/// Assigns each entry to the closer of the two promoted routing objects.
/// Ties go to the side holding fewer entries so far.
fn generalized_hyperplane<O, D, F>(
    entries: &[Entry<O, D>],
    first_pos: usize,
    second_pos: usize,
    distance_fn: &F,
) -> Assignments<O, D>
where
    O: IndexedObject,
    D: Distance,
    F: DistanceFunction<O, Output = D>,
{
    let first_routing = entries[first_pos].routing_object().clone();
    let second_routing = entries[second_pos].routing_object().clone();

    let mut first = Vec::with_capacity(entries.len());
    let mut second = Vec::with_capacity(entries.len());
    let mut first_radius = D::null_distance();
    let mut second_radius = D::null_distance();

    for (pos, entry) in entries.iter().enumerate() {
        let object = entry.routing_object();
        let d_first = distance_fn.distance(object, &first_routing);
        let d_second = distance_fn.distance(object, &second_routing);

        let to_first = if pos == first_pos {
            true
        } else if pos == second_pos {
            false
        } else {
            match d_first.compare(&d_second) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => first.len() <= second.len(),
            }
        };

        let mut assigned = entry.clone();
        if to_first {
            first_radius = first_radius.max_of(d_first + entry.covering_radius());
            assigned.set_parent_distance(Some(d_first));
            first.push(assigned);
        } else {
            second_radius = second_radius.max_of(d_second + entry.covering_radius());
            assigned.set_parent_distance(Some(d_second));
            second.push(assigned);
        }
    }

    Assignments {
        first_routing_object: first_routing,
        first_covering_radius: first_radius,
        first,
        second_routing_object: second_routing,
        second_covering_radius: second_radius,
        second,
    }
}

/// Promotes the two entries farthest apart from each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct FarthestPairSplit;

impl<O, D: Distance> SplitPolicy<O, D> for FarthestPairSplit {
    fn promote<F>(&mut self, entries: &[Entry<O, D>], distance_fn: &F) -> Result<(usize, usize), MTreeError>
    where
        F: DistanceFunction<O, Output = D>,
    {
        let mut best = (0, 1);
        let mut best_distance: Option<D> = None;
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let d = distance_fn.distance(entries[i].routing_object(), entries[j].routing_object());
                if best_distance.map_or(true, |b| d.compare(&b) == Ordering::Greater) {
                    best = (i, j);
                    best_distance = Some(d);
                }
            }
        }
        Ok(best)
    }
}

/// Promotes two entries chosen uniformly at random.
#[derive(Debug, Clone)]
pub struct RandomSplit {
    rng: StdRng,
}

impl RandomSplit {
    /// A reproducible policy for a fixed seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Default for RandomSplit {
    fn default() -> Self {
        Self { rng: StdRng::from_entropy() }
    }
}

impl<O, D> SplitPolicy<O, D> for RandomSplit {
    fn promote<F>(&mut self, entries: &[Entry<O, D>], _distance_fn: &F) -> Result<(usize, usize), MTreeError>
    where
        F: DistanceFunction<O, Output = D>,
    {
        if entries.len() < 2 {
            return Err(MTreeError::InvalidPartition("need two entries to promote".to_string()));
        }
        let picked = rand::seq::index::sample(&mut self.rng, entries.len(), 2);
        Ok((picked.index(0), picked.index(1)))
    }
}

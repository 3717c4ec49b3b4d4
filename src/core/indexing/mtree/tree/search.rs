use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::common::{MTreeError, NodeId};
use crate::core::distance::{Distance, DistanceFunction, IndexedObject};
use crate::core::indexing::mtree::entry::Entry;
use crate::core::indexing::mtree::page_io::PageFile;
use crate::core::indexing::mtree::policy::SplitPolicy;

use super::MTreeIndex;

/// An object found by a query together with its distance to the query object.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<O, D> {
    pub object: O,
    pub distance: D,
}

impl<O: IndexedObject, D: Distance> QueryResult<O, D> {
    fn cmp_by_distance(&self, other: &Self) -> Ordering {
        self.distance.compare(&other.distance).then_with(|| self.object.id().cmp(&other.object.id()))
    }
}

/// Max-heap element holding the current k nearest neighbors.
struct Neighbor<O, D>(QueryResult<O, D>);

impl<O: IndexedObject, D: Distance> PartialEq for Neighbor<O, D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<O: IndexedObject, D: Distance> Eq for Neighbor<O, D> {}

impl<O: IndexedObject, D: Distance> PartialOrd for Neighbor<O, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<O: IndexedObject, D: Distance> Ord for Neighbor<O, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_by_distance(&other.0)
    }
}

/// A subtree waiting to be visited, ordered so that the smallest lower bound
/// is popped first.
struct Pending<D> {
    lower_bound: D,
    node_id: NodeId,
    /// Distance from the query to the routing object of the subtree.
    query_distance: D,
}

impl<D: Distance> PartialEq for Pending<D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<D: Distance> Eq for Pending<D> {}

impl<D: Distance> PartialOrd for Pending<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: Distance> Ord for Pending<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.lower_bound.compare(&self.lower_bound).then_with(|| other.node_id.cmp(&self.node_id))
    }
}

impl<O, D, F, P, S> MTreeIndex<O, F, P, S>
where
    O: IndexedObject,
    D: Distance,
    F: DistanceFunction<O, Output = D>,
    P: PageFile<O, D>,
    S: SplitPolicy<O, D>,
{
    /// Returns every object within `epsilon` of `query`, nearest first.
    pub fn range_query(&self, query: &O, epsilon: D) -> Result<Vec<QueryResult<O, D>>, MTreeError> {
        let mut results = Vec::new();
        let mut stack: Vec<(NodeId, Option<D>)> = vec![(self.root_id, None)];

        while let Some((node_id, query_distance)) = stack.pop() {
            let node = self.read_node(node_id)?;
            for entry in node.children() {
                // |d(q, p) - d(e, p)| is a lower bound of d(q, e) by the triangle inequality.
                if let (Some(dq), Some(&pd)) = (query_distance, entry.parent_distance()) {
                    if dq.abs_diff(pd).compare(&(epsilon + entry.covering_radius())) == Ordering::Greater {
                        continue;
                    }
                }
                let distance = self.distance_fn.distance(query, entry.routing_object());
                match entry {
                    Entry::Leaf(leaf) => {
                        if distance.compare(&epsilon) != Ordering::Greater {
                            results.push(QueryResult { object: leaf.object, distance });
                        }
                    }
                    Entry::Directory(dir) => {
                        if distance.compare(&(epsilon + dir.covering_radius)) != Ordering::Greater {
                            stack.push((dir.child_id, Some(distance)));
                        }
                    }
                }
            }
        }

        results.sort_by(QueryResult::cmp_by_distance);
        Ok(results)
    }

    /// Returns the `k` objects nearest to `query`, nearest first. Ties at the
    /// k-th distance are broken by object id.
    pub fn k_nearest_neighbors(&self, query: &O, k: usize) -> Result<Vec<QueryResult<O, D>>, MTreeError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: BinaryHeap<Neighbor<O, D>> = BinaryHeap::with_capacity(k + 1);
        let mut pending = BinaryHeap::new();
        pending.push(Pending {
            lower_bound: D::null_distance(),
            node_id: self.root_id,
            query_distance: D::null_distance(),
        });
        let mut is_root = true;

        while let Some(next) = pending.pop() {
            let kth = kth_distance(&neighbors, k);
            if next.lower_bound.compare(&kth) == Ordering::Greater {
                break;
            }
            let node = self.read_node(next.node_id)?;
            for entry in node.children() {
                let kth = kth_distance(&neighbors, k);
                if let (false, Some(&pd)) = (is_root, entry.parent_distance()) {
                    let bound = next.query_distance.abs_diff(pd);
                    if bound.compare(&(kth + entry.covering_radius())) == Ordering::Greater {
                        continue;
                    }
                }
                let distance = self.distance_fn.distance(query, entry.routing_object());
                match entry {
                    Entry::Leaf(leaf) => {
                        if distance.compare(&kth) != Ordering::Greater {
                            neighbors.push(Neighbor(QueryResult { object: leaf.object, distance }));
                            if neighbors.len() > k {
                                neighbors.pop();
                            }
                        }
                    }
                    Entry::Directory(dir) => {
                        let lower_bound = if distance.compare(&dir.covering_radius) == Ordering::Greater {
                            distance - dir.covering_radius
                        } else {
                            D::null_distance()
                        };
                        if lower_bound.compare(&kth) != Ordering::Greater {
                            pending.push(Pending { lower_bound, node_id: dir.child_id, query_distance: distance });
                        }
                    }
                }
            }
            is_root = false;
        }

        Ok(neighbors.into_sorted_vec().into_iter().map(|n| n.0).collect())
    }
}

fn kth_distance<O: IndexedObject, D: Distance>(neighbors: &BinaryHeap<Neighbor<O, D>>, k: usize) -> D {
    if neighbors.len() < k {
        return D::infinite_distance();
    }
    neighbors.peek().map_or_else(D::infinite_distance, |n| n.0.distance)
}

//! Nearest-first ordering of chunk load requests

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::terrain::ChunkCoord;

/// A queued chunk and its distance from the observer
#[derive(Clone, Copy, Debug)]
pub struct ChunkPriority {
    pub coord: ChunkCoord,
    /// Horizontal distance from the observer to the chunk centre
    pub distance: f32,
}

impl ChunkPriority {
    pub fn new(coord: ChunkCoord, distance: f32) -> Self {
        Self { coord, distance }
    }
}

impl Eq for ChunkPriority {}

impl PartialEq for ChunkPriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for ChunkPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: the nearest chunk must compare greatest, and on equal
        // distance the lower coordinate wins.
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.coord.cmp(&self.coord))
    }
}

impl PartialOrd for ChunkPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue for chunk loading
#[derive(Debug, Default)]
pub struct ChunkPriorityQueue {
    heap: BinaryHeap<ChunkPriority>,
}

impl ChunkPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn push(&mut self, priority: ChunkPriority) {
        self.heap.push(priority);
    }

    /// Nearest queued chunk
    pub fn pop(&mut self) -> Option<ChunkPriority> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&ChunkPriority> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain everything, nearest first
    pub fn drain_sorted(&mut self) -> Vec<ChunkPriority> {
        std::iter::from_fn(|| self.heap.pop()).collect()
    }
}

impl FromIterator<ChunkPriority> for ChunkPriorityQueue {
    fn from_iter<I: IntoIterator<Item = ChunkPriority>>(iter: I) -> Self {
        Self {
            heap: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_first() {
        let mut queue = ChunkPriorityQueue::new();
        assert!(queue.is_empty());
        queue.push(ChunkPriority::new(ChunkCoord::new(5, 0), 2816.0));
        queue.push(ChunkPriority::new(ChunkCoord::new(0, 0), 0.0));
        queue.push(ChunkPriority::new(ChunkCoord::new(1, 0), 512.0));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.peek().unwrap().coord, ChunkCoord::new(0, 0));
        let order: Vec<_> = queue.drain_sorted().into_iter().map(|p| p.coord).collect();
        assert_eq!(order, vec![ChunkCoord::new(0, 0), ChunkCoord::new(1, 0), ChunkCoord::new(5, 0)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_distance_breaks_on_coord() {
        let queue: ChunkPriorityQueue = [
            ChunkPriority::new(ChunkCoord::new(1, 0), 512.0),
            ChunkPriority::new(ChunkCoord::new(0, 1), 512.0),
            ChunkPriority::new(ChunkCoord::new(-1, 0), 512.0),
            ChunkPriority::new(ChunkCoord::new(0, -1), 512.0),
        ]
        .into_iter()
        .collect();
        let mut queue = queue;
        let order: Vec<_> = queue.drain_sorted().into_iter().map(|p| p.coord).collect();
        assert_eq!(
            order,
            vec![
                ChunkCoord::new(-1, 0),
                ChunkCoord::new(0, -1),
                ChunkCoord::new(0, 1),
                ChunkCoord::new(1, 0),
            ]
        );
    }

    #[test]
    fn test_nan_distance_does_not_panic() {
        let mut queue = ChunkPriorityQueue::new();
        queue.push(ChunkPriority::new(ChunkCoord::new(0, 0), f32::NAN));
        queue.push(ChunkPriority::new(ChunkCoord::new(1, 0), 1.0));
        assert_eq!(queue.drain_sorted().len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut queue = ChunkPriorityQueue::new();
        queue.push(ChunkPriority::new(ChunkCoord::new(0, 0), 1.0));
        queue.clear();
        assert!(queue.is_empty());
    }
}

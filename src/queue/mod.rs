//! Priority queues for pending crawl tasks
//!
//! Two containers share the [`TaskQueue`] interface:
//! - [`PriorityQueue`]: a binary max-heap keyed by priority with FIFO tie-break
//! - [`MultiLevelQueue`]: a fixed set of priority tiers, each backed by a heap
//!
//! Both hand out [`TaskId`]s that stay unique for the lifetime of the queue.

mod multi_level;
mod priority;

pub use multi_level::MultiLevelQueue;
pub use priority::PriorityQueue;

use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;

/// Identifier assigned to an item when it enters a queue
///
/// Ids are handed out from a monotonically increasing counter, so comparing
/// two ids from the same queue also compares their enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// An entry held by a queue
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    /// Unique id within the owning queue
    pub id: TaskId,

    /// The queued value
    pub value: T,

    /// Priority (higher is more urgent)
    pub priority: i32,

    /// When the value was enqueued
    pub enqueued_at: Instant,
}

impl<T> QueueItem<T> {
    /// Heap ordering: higher priority first, then earlier enqueue first.
    ///
    /// Returns `Ordering::Greater` when `self` should be dequeued before `other`.
    pub(crate) fn precedence(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Common interface of the task queues
pub trait TaskQueue<T>: Send {
    /// Adds a value and returns its id
    fn enqueue(&mut self, value: T, priority: i32) -> TaskId;

    /// Removes and returns the most urgent item
    fn dequeue(&mut self) -> Option<QueueItem<T>>;

    /// Returns the most urgent item without removing it
    fn peek(&self) -> Option<&QueueItem<T>>;

    /// Removes the item with the given id, returning whether it was present
    fn remove(&mut self, id: TaskId) -> bool;

    /// Changes the priority of a queued item, returning whether it was present
    fn update_priority(&mut self, id: TaskId, priority: i32) -> bool;

    /// Returns whether an item with the given id is queued
    fn contains(&self, id: TaskId) -> bool;

    /// Number of queued items
    fn len(&self) -> usize;

    /// Drops every queued item
    fn clear(&mut self);

    /// Returns references to all items, most urgent first
    fn to_vec(&self) -> Vec<&QueueItem<T>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

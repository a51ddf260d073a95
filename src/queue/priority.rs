use super::{QueueItem, TaskId, TaskQueue};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

/// Binary max-heap of queued values
///
/// The heap lives in a `Vec`, with an id → slot index kept alongside it so
/// that `remove` and `update_priority` locate their item in O(1) and restore
/// the heap property in O(log n).
///
/// Ordering is by priority (descending), then enqueue order (ascending), so
/// values of equal priority come out first-in first-out.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: Vec<QueueItem<T>>,
    index: HashMap<TaskId, usize>,
    next_id: u64,
}

impl<T> PriorityQueue<T> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    /// Inserts an already-built item, keeping its id and enqueue time
    ///
    /// Used by [`super::MultiLevelQueue`], which allocates ids itself.
    pub(crate) fn insert(&mut self, item: QueueItem<T>) {
        let slot = self.heap.len();
        self.index.insert(item.id, slot);
        self.heap.push(item);
        self.sift_up(slot);
    }

    /// Removes and returns the item with the given id
    pub(crate) fn take(&mut self, id: TaskId) -> Option<QueueItem<T>> {
        let slot = self.index.get(&id).copied()?;
        Some(self.remove_at(slot))
    }

    fn remove_at(&mut self, slot: usize) -> QueueItem<T> {
        let item = self.heap.swap_remove(slot);
        self.index.remove(&item.id);

        if slot < self.heap.len() {
            self.index.insert(self.heap[slot].id, slot);
            self.sift_up(slot);
            self.sift_down(slot);
        }
        item
    }

    fn higher(&self, a: usize, b: usize) -> bool {
        self.heap[a].precedence(&self.heap[b]) == Ordering::Greater
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].id, a);
        self.index.insert(self.heap[b].id, b);
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if !self.higher(slot, parent) {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut top = slot;

            if left < len && self.higher(left, top) {
                top = left;
            }
            if right < len && self.higher(right, top) {
                top = right;
            }
            if top == slot {
                break;
            }
            self.swap(slot, top);
            slot = top;
        }
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> TaskQueue<T> for PriorityQueue<T> {
    fn enqueue(&mut self, value: T, priority: i32) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        self.insert(QueueItem {
            id,
            value,
            priority,
            enqueued_at: Instant::now(),
        });
        id
    }

    fn dequeue(&mut self) -> Option<QueueItem<T>> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    fn peek(&self) -> Option<&QueueItem<T>> {
        self.heap.first()
    }

    fn remove(&mut self, id: TaskId) -> bool {
        self.take(id).is_some()
    }

    fn update_priority(&mut self, id: TaskId, priority: i32) -> bool {
        let Some(&slot) = self.index.get(&id) else {
            return false;
        };
        self.heap[slot].priority = priority;
        self.sift_up(slot);
        // sift_up may have moved the item; re-read its slot
        if let Some(&slot) = self.index.get(&id) {
            self.sift_down(slot);
        }
        true
    }

    fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    fn to_vec(&self) -> Vec<&QueueItem<T>> {
        let mut items: Vec<&QueueItem<T>> = self.heap.iter().collect();
        items.sort_by(|a, b| b.precedence(a));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut PriorityQueue<&'static str>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Some(item) = queue.dequeue() {
            out.push(item.value);
        }
        out
    }

    #[test]
    fn test_new_queue_is_empty() {
        let queue: PriorityQueue<u32> = PriorityQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_dequeue_by_priority() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("low", 1);
        queue.enqueue("high", 5);
        queue.enqueue("mid", 3);

        assert_eq!(drain(&mut queue), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = PriorityQueue::new();
        for name in ["a", "b", "c", "d", "e"] {
            queue.enqueue(name, 2);
        }
        queue.enqueue("urgent", 9);

        assert_eq!(drain(&mut queue), vec!["urgent", "a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_mixed_sequence_non_increasing_and_fifo() {
        let mut queue = PriorityQueue::new();
        let priorities = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9, 3, 2, 3];
        for (i, p) in priorities.iter().enumerate() {
            queue.enqueue(i, *p);
        }

        let mut last: Option<(i32, usize)> = None;
        while let Some(item) = queue.dequeue() {
            if let Some((prev_priority, prev_pos)) = last {
                assert!(item.priority <= prev_priority);
                if item.priority == prev_priority {
                    assert!(item.value > prev_pos, "equal priorities must keep FIFO order");
                }
            }
            last = Some((item.priority, item.value));
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let mut queue = PriorityQueue::new();
        let a = queue.enqueue("a", 0);
        let b = queue.enqueue("b", 0);
        queue.dequeue();
        let c = queue.enqueue("c", 0);

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("only", 1);

        assert_eq!(queue.peek().map(|i| i.value), Some("only"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("a", 5);
        let b = queue.enqueue("b", 3);
        queue.enqueue("c", 4);
        queue.enqueue("d", 1);

        assert!(queue.remove(b));
        assert_eq!(queue.len(), 3);
        assert!(!queue.contains(b));
        assert!(!queue.remove(b));

        assert_eq!(drain(&mut queue), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_remove_root_and_last() {
        let mut queue = PriorityQueue::new();
        let root = queue.enqueue("root", 10);
        queue.enqueue("x", 5);
        let last = queue.enqueue("last", 1);

        assert!(queue.remove(root));
        assert!(queue.remove(last));
        assert_eq!(drain(&mut queue), vec!["x"]);
    }

    #[test]
    fn test_update_priority_raises_item() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("a", 5);
        queue.enqueue("b", 4);
        let c = queue.enqueue("c", 1);

        assert!(queue.update_priority(c, 10));
        assert_eq!(drain(&mut queue), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_update_priority_lowers_item() {
        let mut queue = PriorityQueue::new();
        let a = queue.enqueue("a", 5);
        queue.enqueue("b", 4);
        queue.enqueue("c", 3);

        assert!(queue.update_priority(a, 0));
        assert_eq!(drain(&mut queue), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_update_priority_keeps_enqueue_order_for_ties() {
        let mut queue = PriorityQueue::new();
        let first = queue.enqueue("first", 1);
        queue.enqueue("second", 3);

        // Same priority now; `first` was enqueued earlier so it wins the tie.
        assert!(queue.update_priority(first, 3));
        assert_eq!(drain(&mut queue), vec!["first", "second"]);
    }

    #[test]
    fn test_update_priority_unknown_id() {
        let mut queue: PriorityQueue<u8> = PriorityQueue::new();
        assert!(!queue.update_priority(TaskId(42), 1));
    }

    #[test]
    fn test_to_vec_is_sorted() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("a", 1);
        queue.enqueue("b", 3);
        queue.enqueue("c", 3);
        queue.enqueue("d", 2);

        let values: Vec<_> = queue.to_vec().iter().map(|i| i.value).collect();
        assert_eq!(values, vec!["b", "c", "d", "a"]);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_clear() {
        let mut queue = PriorityQueue::new();
        let id = queue.enqueue("a", 1);
        queue.enqueue("b", 2);

        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.contains(id));
    }

    #[test]
    fn test_negative_priorities() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("neg", -5);
        queue.enqueue("zero", 0);

        assert_eq!(drain(&mut queue), vec!["zero", "neg"]);
    }
}

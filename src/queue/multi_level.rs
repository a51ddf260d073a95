use super::{PriorityQueue, QueueItem, TaskId, TaskQueue};
use std::collections::HashMap;
use std::time::Instant;

/// Bucket-of-heaps queue with a fixed number of priority tiers
///
/// Tier `n` holds every item whose priority clamps to `n` (priorities below
/// zero land in tier 0, priorities at or above `levels` land in the top tier).
/// Dequeue scans tiers from the top down and pops the first non-empty one, so
/// picking a tier is constant time for a fixed tier count. Inside a tier the
/// usual heap ordering applies.
#[derive(Debug)]
pub struct MultiLevelQueue<T> {
    tiers: Vec<PriorityQueue<T>>,
    tier_of: HashMap<TaskId, usize>,
    next_id: u64,
}

impl<T> MultiLevelQueue<T> {
    /// Creates a queue with `levels` tiers (at least one)
    pub fn new(levels: usize) -> Self {
        let levels = levels.max(1);
        Self {
            tiers: (0..levels).map(|_| PriorityQueue::new()).collect(),
            tier_of: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of tiers
    pub fn levels(&self) -> usize {
        self.tiers.len()
    }

    /// Number of items in each tier, lowest tier first
    pub fn tier_sizes(&self) -> Vec<usize>
    where
        T: Send,
    {
        self.tiers.iter().map(|tier| tier.len()).collect()
    }

    fn tier_for(&self, priority: i32) -> usize {
        let top = self.tiers.len() - 1;
        if priority <= 0 {
            0
        } else {
            (priority as usize).min(top)
        }
    }
}

impl<T: Send> TaskQueue<T> for MultiLevelQueue<T> {
    fn enqueue(&mut self, value: T, priority: i32) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        let tier = self.tier_for(priority);
        self.tiers[tier].insert(QueueItem {
            id,
            value,
            priority,
            enqueued_at: Instant::now(),
        });
        self.tier_of.insert(id, tier);
        id
    }

    fn dequeue(&mut self) -> Option<QueueItem<T>> {
        let tier = self.tiers.iter_mut().rev().find(|tier| !tier.is_empty())?;
        let item = tier.dequeue()?;
        self.tier_of.remove(&item.id);
        Some(item)
    }

    fn peek(&self) -> Option<&QueueItem<T>> {
        self.tiers.iter().rev().find_map(|tier| tier.peek())
    }

    fn remove(&mut self, id: TaskId) -> bool {
        let Some(tier) = self.tier_of.remove(&id) else {
            return false;
        };
        self.tiers[tier].take(id).is_some()
    }

    fn update_priority(&mut self, id: TaskId, priority: i32) -> bool {
        let Some(&current) = self.tier_of.get(&id) else {
            return false;
        };

        let target = self.tier_for(priority);
        if target == current {
            return self.tiers[current].update_priority(id, priority);
        }

        let Some(mut item) = self.tiers[current].take(id) else {
            return false;
        };
        item.priority = priority;
        self.tiers[target].insert(item);
        self.tier_of.insert(id, target);
        true
    }

    fn contains(&self, id: TaskId) -> bool {
        self.tier_of.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.tier_of.len()
    }

    fn clear(&mut self) {
        for tier in &mut self.tiers {
            tier.clear();
        }
        self.tier_of.clear();
    }

    fn to_vec(&self) -> Vec<&QueueItem<T>> {
        self.tiers
            .iter()
            .rev()
            .flat_map(|tier| tier.to_vec())
            .collect()
    }
}

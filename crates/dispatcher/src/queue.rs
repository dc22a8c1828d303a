use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use engine_core::{
    models::{PriorityDistribution, TaskPriority},
    SchedulerError, SchedulerResult,
};

/// 队列条目
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: String,
    pub priority: TaskPriority,
    pub dependencies: BTreeSet<String>,
    /// 同一优先级内的先后顺序
    pub seq: u64,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn wait_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

type QueueKey = (u8, u64);

/// 优先级任务队列
///
/// 按 (优先级rank, 入队序号) 排序：rank 越小越先出队，同一优先级内先入队先出队。
/// 出队时按顺序搜索第一个依赖全部完成的任务，被依赖阻塞的高优先级任务
/// 不会挡住后面已就绪的低优先级任务。重新入队的任务沿用首次入队的序号。
#[derive(Debug)]
pub struct PriorityQueue {
    entries: BTreeMap<QueueKey, QueueEntry>,
    index: HashMap<String, QueueKey>,
    /// (入队时间, 序号) -> rank，用于O(log n)获取等待最久的任务
    arrivals: BTreeMap<(Instant, u64), u8>,
    distribution: PriorityDistribution,
    next_seq: u64,
    /// 0 表示不限制
    max_size: usize,
}

impl PriorityQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            arrivals: BTreeMap::new(),
            distribution: PriorityDistribution::default(),
            next_seq: 0,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// 检查还能否容纳 `additional` 个任务
    pub fn ensure_capacity(&self, additional: usize) -> SchedulerResult<()> {
        if self.max_size > 0 && self.len() + additional > self.max_size {
            return Err(SchedulerError::QueueFull {
                capacity: self.max_size,
            });
        }
        Ok(())
    }

    /// 入队，分配新的序号并返回
    ///
    /// 容量只在提交时由 [`ensure_capacity`](Self::ensure_capacity) 检查，
    /// 重试任务重新入队不受容量限制。
    pub fn enqueue(
        &mut self,
        task_id: String,
        priority: TaskPriority,
        dependencies: BTreeSet<String>,
    ) -> SchedulerResult<u64> {
        let seq = self.next_seq;
        self.insert(task_id, priority, dependencies, seq)?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// 以首次入队的序号重新入队，排在同一优先级中之后提交的任务前面
    pub fn requeue(
        &mut self,
        task_id: String,
        priority: TaskPriority,
        dependencies: BTreeSet<String>,
        seq: u64,
    ) -> SchedulerResult<()> {
        self.insert(task_id, priority, dependencies, seq)
    }

    fn insert(
        &mut self,
        task_id: String,
        priority: TaskPriority,
        dependencies: BTreeSet<String>,
        seq: u64,
    ) -> SchedulerResult<()> {
        if self.contains(&task_id) {
            return Err(SchedulerError::Internal(format!(
                "任务 {task_id} 已在队列中"
            )));
        }
        let key = (priority.rank(), seq);
        if self.entries.contains_key(&key) {
            return Err(SchedulerError::Internal(format!(
                "入队序号 {seq} 已被占用"
            )));
        }

        let enqueued_at = Instant::now();
        self.index.insert(task_id.clone(), key);
        self.arrivals.insert((enqueued_at, seq), key.0);
        self.distribution.increment(priority);
        self.entries.insert(
            key,
            QueueEntry {
                task_id,
                priority,
                dependencies,
                seq,
                enqueued_at,
            },
        );
        Ok(())
    }

    /// 取出优先级最高、入队最早且依赖全部完成的任务
    pub fn dequeue<F>(&mut self, is_completed: F) -> Option<QueueEntry>
    where
        F: Fn(&str) -> bool,
    {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| entry.dependencies.iter().all(|dep| is_completed(dep)))
            .map(|(key, _)| *key)?;
        self.remove_key(key)
    }

    pub fn remove(&mut self, task_id: &str) -> Option<QueueEntry> {
        let key = *self.index.get(task_id)?;
        self.remove_key(key)
    }

    /// 任务在出队顺序中的位置（不考虑依赖阻塞）
    pub fn position(&self, task_id: &str) -> Option<usize> {
        let key = self.index.get(task_id)?;
        Some(self.entries.range(..*key).count())
    }

    /// 依赖指定任务的排队任务
    pub fn dependents_of(&self, task_id: &str) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.dependencies.contains(task_id))
            .map(|entry| entry.task_id.clone())
            .collect()
    }

    pub fn distribution(&self) -> PriorityDistribution {
        self.distribution.clone()
    }

    /// 最早入队任务的等待时长，空队列返回 `None`
    pub fn oldest_age(&self, now: Instant) -> Option<Duration> {
        let ((_, seq), rank) = self.arrivals.iter().next()?;
        self.entries
            .get(&(*rank, *seq))
            .map(|entry| entry.wait_time(now))
    }

    fn remove_key(&mut self, key: QueueKey) -> Option<QueueEntry> {
        let entry = self.entries.remove(&key)?;
        self.index.remove(&entry.task_id);
        self.arrivals.remove(&(entry.enqueued_at, key.1));
        self.distribution.decrement(entry.priority);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let mut queue = PriorityQueue::new(0);
        queue.enqueue("low".into(), TaskPriority::Low, deps(&[])).unwrap();
        queue.enqueue("n1".into(), TaskPriority::Normal, deps(&[])).unwrap();
        queue.enqueue("crit".into(), TaskPriority::Critical, deps(&[])).unwrap();
        queue.enqueue("n2".into(), TaskPriority::Normal, deps(&[])).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue(|_| true))
            .map(|e| e.task_id)
            .collect();
        assert_eq!(order, vec!["crit", "n1", "n2", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_blocked_task_does_not_starve_ready_ones() {
        let mut queue = PriorityQueue::new(0);
        queue
            .enqueue("blocked".into(), TaskPriority::Critical, deps(&["parent"]))
            .unwrap();
        queue.enqueue("ready".into(), TaskPriority::Low, deps(&[])).unwrap();

        let next = queue.dequeue(|_| false).unwrap();
        assert_eq!(next.task_id, "ready");
        assert!(queue.dequeue(|_| false).is_none());

        let next = queue.dequeue(|id| id == "parent").unwrap();
        assert_eq!(next.task_id, "blocked");
    }

    #[test]
    fn test_requeued_task_keeps_its_place() {
        let mut queue = PriorityQueue::new(0);
        let first = queue.enqueue("first".into(), TaskPriority::Normal, deps(&[])).unwrap();
        let taken = queue.dequeue(|_| true).unwrap();
        assert_eq!(taken.seq, first);

        queue.enqueue("later".into(), TaskPriority::Normal, deps(&[])).unwrap();
        queue.enqueue("urgent".into(), TaskPriority::High, deps(&[])).unwrap();
        queue
            .requeue(taken.task_id, taken.priority, taken.dependencies, taken.seq)
            .unwrap();

        assert_eq!(queue.position("first"), Some(1));
        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue(|_| true))
            .map(|e| e.task_id)
            .collect();
        assert_eq!(order, vec!["urgent", "first", "later"]);

        // 新任务不会复用被沿用的序号
        let next = queue.enqueue("next".into(), TaskPriority::Normal, deps(&[])).unwrap();
        assert!(next > first);
        assert!(queue.requeue("dup".into(), TaskPriority::Normal, deps(&[]), next).is_err());
    }

    #[test]
    fn test_capacity_limit() {
        let mut queue = PriorityQueue::new(2);
        queue.enqueue("a".into(), TaskPriority::Normal, deps(&[])).unwrap();
        queue.enqueue("b".into(), TaskPriority::Normal, deps(&[])).unwrap();

        let err = queue.ensure_capacity(1).unwrap_err();
        assert_eq!(err, SchedulerError::QueueFull { capacity: 2 });
        assert!(queue.ensure_capacity(0).is_ok());

        queue.enqueue("retry".into(), TaskPriority::Normal, deps(&[])).unwrap();
        assert_eq!(queue.len(), 3);
        assert!(PriorityQueue::new(0).ensure_capacity(1_000_000).is_ok());
    }

    #[test]
    fn test_remove_and_metrics() {
        let mut queue = PriorityQueue::new(0);
        assert!(queue.oldest_age(Instant::now()).is_none());

        queue.enqueue("a".into(), TaskPriority::High, deps(&[])).unwrap();
        queue.enqueue("b".into(), TaskPriority::Critical, deps(&["a"])).unwrap();
        queue.enqueue("c".into(), TaskPriority::High, deps(&["a"])).unwrap();

        assert_eq!(queue.position("b"), Some(0));
        assert_eq!(queue.position("c"), Some(2));
        assert_eq!(queue.dependents_of("a"), vec!["b", "c"]);
        assert_eq!(queue.distribution().high, 2);

        let removed = queue.remove("a").unwrap();
        assert_eq!(removed.task_id, "a");
        assert!(queue.remove("a").is_none());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.distribution().high, 1);
        assert!(queue.oldest_age(Instant::now()).is_some());
    }
}

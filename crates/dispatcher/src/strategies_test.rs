use std::collections::HashMap;
use std::time::Duration;

use engine_core::config::LoadBalancerConfig;
use engine_core::models::{TaskRecord, TaskSpec, WorkerHandle};
use engine_core::traits::TaskDispatchStrategy;
use engine_core::SchedulerError;
use serde_json::json;

use crate::strategies::*;

fn create_test_task(id: &str) -> TaskRecord {
    TaskRecord::from_spec(id.to_string(), TaskSpec::new("quality", json!({})), 3)
}

fn create_test_worker(seq: u64, capacity: u32) -> WorkerHandle {
    WorkerHandle::new(seq, capacity, 10)
}

fn with_history(mut worker: WorkerHandle, outcomes: &[(bool, u64)]) -> WorkerHandle {
    for (success, latency_ms) in outcomes {
        worker
            .stats
            .record(*success, Duration::from_millis(*latency_ms));
    }
    worker
}

#[test]
fn test_round_robin_cycles_in_registration_order() {
    let workers = [
        create_test_worker(3, 1),
        create_test_worker(1, 1),
        create_test_worker(2, 1),
    ];
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let task = create_test_task("t");

    let mut strategy = RoundRobinStrategy::new();
    let picks: Vec<String> = (0..6)
        .map(|_| strategy.select_worker(&task, &refs).unwrap())
        .collect();

    assert_eq!(
        picks,
        vec![
            "worker-001",
            "worker-002",
            "worker-003",
            "worker-001",
            "worker-002",
            "worker-003"
        ]
    );
}

#[test]
fn test_round_robin_fairness() {
    let workers: Vec<WorkerHandle> = (1..=4).map(|seq| create_test_worker(seq, 1)).collect();
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let task = create_test_task("t");
    let total_tasks = 103;

    let mut strategy = RoundRobinStrategy::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..total_tasks {
        let id = strategy.select_worker(&task, &refs).unwrap();
        *counts.entry(id).or_default() += 1;
    }

    let floor = total_tasks / workers.len();
    let ceil = floor + 1;
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|c| *c == floor || *c == ceil));
}

#[test]
fn test_round_robin_skips_missing_candidates() {
    let workers: Vec<WorkerHandle> = (1..=3).map(|seq| create_test_worker(seq, 1)).collect();
    let task = create_test_task("t");
    let mut strategy = RoundRobinStrategy::new();

    let all: Vec<&WorkerHandle> = workers.iter().collect();
    assert_eq!(strategy.select_worker(&task, &all).unwrap(), "worker-001");

    // worker-002 忙碌，不在候选中
    let partial = vec![&workers[0], &workers[2]];
    assert_eq!(strategy.select_worker(&task, &partial).unwrap(), "worker-003");
    assert_eq!(strategy.select_worker(&task, &partial).unwrap(), "worker-001");

    assert!(strategy.select_worker(&task, &[]).is_none());
}

#[test]
fn test_least_loaded_prefers_lowest_latency() {
    let workers = [
        with_history(create_test_worker(1, 1), &[(true, 300)]),
        with_history(create_test_worker(2, 1), &[(true, 50)]),
        with_history(create_test_worker(3, 1), &[(true, 120)]),
    ];
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let mut strategy = LeastLoadedStrategy::new();

    let task = create_test_task("t");
    assert_eq!(strategy.select_worker(&task, &refs).unwrap(), "worker-002");
    assert_eq!(strategy.select_worker(&task, &refs).unwrap(), "worker-002");
}

#[test]
fn test_least_loaded_ties_use_round_robin() {
    let workers: Vec<WorkerHandle> = (1..=3).map(|seq| create_test_worker(seq, 1)).collect();
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let mut strategy = LeastLoadedStrategy::new();
    let task = create_test_task("t");

    let picks: Vec<String> = (0..4)
        .map(|_| strategy.select_worker(&task, &refs).unwrap())
        .collect();
    assert_eq!(
        picks,
        vec!["worker-001", "worker-002", "worker-003", "worker-001"]
    );
}

#[test]
fn test_weighted_random_is_seeded_and_weighted() {
    let workers = [create_test_worker(1, 1), create_test_worker(2, 9)];
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let task = create_test_task("t");

    let mut first = WeightedRandomStrategy::new(7);
    let mut second = WeightedRandomStrategy::new(7);
    let a: Vec<String> = (0..50)
        .map(|_| first.select_worker(&task, &refs).unwrap())
        .collect();
    let b: Vec<String> = (0..50)
        .map(|_| second.select_worker(&task, &refs).unwrap())
        .collect();
    assert_eq!(a, b);

    let mut strategy = WeightedRandomStrategy::new(42);
    let heavy = (0..2000)
        .filter(|_| strategy.select_worker(&task, &refs).unwrap() == "worker-002")
        .count();
    // 期望约 90%
    assert!(heavy > 1600, "heavy worker picked {heavy} times");
    assert!(heavy < 1950, "heavy worker picked {heavy} times");
}

#[test]
fn test_performance_based_ranking() {
    let workers = [
        with_history(create_test_worker(1, 1), &[(true, 10), (false, 10)]),
        with_history(create_test_worker(2, 1), &[(true, 200), (true, 200)]),
        with_history(create_test_worker(3, 1), &[(true, 100), (true, 100)]),
    ];
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let mut strategy = PerformanceBasedStrategy::new();
    let task = create_test_task("t");

    // 成功率相同（1.0）时选择延迟更低的 worker-003
    assert_eq!(strategy.select_worker(&task, &refs).unwrap(), "worker-003");

    let fresh: Vec<WorkerHandle> = (1..=2).map(|seq| create_test_worker(seq, 1)).collect();
    let fresh_refs: Vec<&WorkerHandle> = fresh.iter().collect();
    assert_eq!(
        strategy.select_worker(&task, &fresh_refs).unwrap(),
        "worker-001"
    );
}

#[test]
fn test_adaptive_falls_back_and_recovers() {
    let workers = [
        create_test_worker(1, 1),
        with_history(create_test_worker(2, 1), &[(true, 5)]),
    ];
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let task = create_test_task("t");

    let mut strategy = AdaptiveStrategy::new(0.8, 4, 2);
    assert_eq!(strategy.effective_strategy(), PERFORMANCE_BASED);

    // 性能优先选中 worker-001（成功率均为1.0，延迟0最低）
    assert_eq!(strategy.select_worker(&task, &refs).unwrap(), "worker-001");

    strategy.record_outcome("worker-001", false, Duration::from_millis(10));
    strategy.record_outcome("worker-001", false, Duration::from_millis(10));

    // 窗口内成功率0 < 0.8，切换为最小负载
    strategy.select_worker(&task, &refs).unwrap();
    assert!(strategy.is_fallback());
    assert_eq!(strategy.effective_strategy(), LEAST_LOADED);

    let switches = strategy.drain_switches();
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].from, PERFORMANCE_BASED);
    assert_eq!(switches[0].to, LEAST_LOADED);
    assert_eq!(switches[0].worker_id.as_deref(), Some("worker-001"));
    assert!(strategy.drain_switches().is_empty());

    // 回退期共4次选择（含触发切换的那一次）
    for _ in 0..3 {
        strategy.select_worker(&task, &refs).unwrap();
        assert!(strategy.is_fallback());
    }

    // worker-001 恢复后重新评估
    for _ in 0..4 {
        strategy.record_outcome("worker-001", true, Duration::from_millis(10));
    }
    assert_eq!(strategy.select_worker(&task, &refs).unwrap(), "worker-001");
    assert!(!strategy.is_fallback());

    let switches = strategy.drain_switches();
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].to, PERFORMANCE_BASED);
}

#[test]
fn test_adaptive_needs_min_samples() {
    let workers = [create_test_worker(1, 1)];
    let refs: Vec<&WorkerHandle> = workers.iter().collect();
    let task = create_test_task("t");

    let mut strategy = AdaptiveStrategy::new(0.8, 10, 3);
    strategy.record_outcome("worker-001", false, Duration::from_millis(1));
    strategy.record_outcome("worker-001", false, Duration::from_millis(1));

    assert_eq!(strategy.window_success_rate("worker-001"), None);
    strategy.select_worker(&task, &refs).unwrap();
    assert!(!strategy.is_fallback());
}

#[test]
fn test_factory_and_load_balancer() {
    let config = LoadBalancerConfig::default();
    for name in [
        "round_robin",
        "least_loaded",
        "weighted_random",
        "performance_based",
        "adaptive",
    ] {
        let strategy = create_strategy(name, &config).unwrap();
        assert_eq!(strategy.name(), name);
    }
    assert_eq!(
        create_strategy("Least-Loaded", &config).unwrap().name(),
        LEAST_LOADED
    );

    let err = create_strategy("fastest", &config).err().unwrap();
    assert_eq!(
        err,
        SchedulerError::UnknownStrategy {
            name: "fastest".to_string()
        }
    );

    let mut balancer = LoadBalancer::new(config).unwrap();
    assert_eq!(balancer.name(), ROUND_ROBIN);
    assert_eq!(balancer.set_strategy("adaptive").unwrap(), ROUND_ROBIN);

    let info = balancer.info();
    assert_eq!(info.name, ADAPTIVE);
    assert_eq!(info.effective, PERFORMANCE_BASED);

    assert!(balancer.set_strategy("nope").is_err());
    assert_eq!(balancer.name(), ADAPTIVE);
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use engine_core::models::{ScaleResult, TaskPriority, TaskStatus};
    use engine_core::{ErrorKind, SchedulerError};
    use engine_testing_utils::{
        wait_for_status, BlockingExecutor, IgnoreCancelExecutor, ScriptedExecutor,
        TaskSpecBuilder, TestEnv,
    };
    use serde_json::json;
    use tokio::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_scale_workers_up_and_down() {
        let engine = TestEnv::start_engine(
            TestEnv::config_with_workers(2),
            Arc::new(ScriptedExecutor::new()),
        )
        .await;

        let result = engine.scale_workers(5).await.unwrap();
        assert_eq!(
            result,
            ScaleResult {
                previous_count: 2,
                new_count: 5
            }
        );
        let pool = engine.get_worker_status().await.unwrap();
        assert_eq!((pool.total, pool.idle, pool.busy), (5, 5, 0));

        let result = engine.scale_workers(1).await.unwrap();
        assert_eq!(result.previous_count, 5);
        assert_eq!(result.new_count, 1);
        assert_eq!(engine.get_worker_status().await.unwrap().total, 1);

        let err = engine.scale_workers(100).await.unwrap_err();
        assert!(matches!(err, SchedulerError::WorkerLimit { requested: 100, .. }));
        assert_eq!(err.kind(), ErrorKind::Capacity);

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_runs_tasks_up_to_its_capacity() {
        let executor = Arc::new(BlockingExecutor::new());
        let mut config = TestEnv::config_with_workers(1);
        config.engine.worker_capacity = 2;
        let engine = TestEnv::start_engine(config, executor.clone()).await;

        let ids = engine
            .submit_batch(vec![
                TaskSpecBuilder::new().build(),
                TaskSpecBuilder::new().build(),
                TaskSpecBuilder::new().build(),
            ])
            .await
            .unwrap();
        wait_for_status(&engine, &ids[0], TaskStatus::Running, WAIT).await;
        wait_for_status(&engine, &ids[1], TaskStatus::Running, WAIT).await;

        let blocking = executor.clone();
        let both_started = TestEnv::wait_for(
            move || {
                let blocking = blocking.clone();
                async move { blocking.started() == 2 }
            },
            WAIT,
        )
        .await;
        assert!(both_started);
        assert!(executor.calls().iter().all(|c| c.worker_id == "worker-001"));
        assert_eq!(
            engine.get_task_status(&ids[2]).await.unwrap().status,
            TaskStatus::Ready
        );

        let pool = engine.get_worker_status().await.unwrap();
        assert_eq!((pool.total, pool.idle, pool.busy), (1, 0, 1));
        assert_eq!(pool.workers[0].in_flight(), 2);

        executor.release();
        for id in &ids {
            wait_for_status(&engine, id, TaskStatus::Completed, WAIT).await;
        }
        assert_eq!(executor.started(), 3);

        let handle = &engine;
        let idle = TestEnv::wait_for(
            move || async move { handle.get_worker_status().await.unwrap().idle == 1 },
            WAIT,
        )
        .await;
        assert!(idle);

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_scale_to_zero_drains_running_tasks() {
        let executor = Arc::new(BlockingExecutor::new());
        let engine = TestEnv::start_engine(TestEnv::config_with_workers(2), executor.clone()).await;

        let ids = engine
            .submit_batch(vec![TaskSpecBuilder::new().build(), TaskSpecBuilder::new().build()])
            .await
            .unwrap();
        for id in &ids {
            wait_for_status(&engine, id, TaskStatus::Running, WAIT).await;
        }

        let result = engine.scale_workers(0).await.unwrap();
        assert_eq!(
            result,
            ScaleResult {
                previous_count: 2,
                new_count: 0
            }
        );
        let pool = engine.get_worker_status().await.unwrap();
        assert_eq!(pool.draining, 2);
        assert_eq!(pool.idle, 0);

        let waiting = engine
            .submit_task("quality", json!({}), TaskPriority::Critical, vec![])
            .await
            .unwrap();

        executor.release();
        for id in &ids {
            wait_for_status(&engine, id, TaskStatus::Completed, WAIT).await;
        }

        let handle = &engine;
        let emptied = TestEnv::wait_for(
            move || async move { handle.get_worker_status().await.unwrap().total == 0 },
            WAIT,
        )
        .await;
        assert!(emptied);

        let view = engine.get_task_status(&waiting).await.unwrap();
        assert_eq!(view.status, TaskStatus::Ready);
        assert_eq!(executor.started(), 2);
        assert_eq!(engine.get_queue_status().await.unwrap().length, 1);

        // 重新扩容后排队的任务继续执行
        engine.scale_workers(1).await.unwrap();
        wait_for_status(&engine, &waiting, TaskStatus::Completed, WAIT).await;

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_worker() {
        let executor = Arc::new(BlockingExecutor::new());
        let engine = TestEnv::start_engine(TestEnv::config_with_workers(2), executor.clone()).await;

        let err = engine.remove_worker("worker-999").await.unwrap_err();
        assert_eq!(err, SchedulerError::worker_not_found("worker-999"));

        let id = engine
            .submit_task("quality", json!({}), TaskPriority::Normal, vec![])
            .await
            .unwrap();
        let view = wait_for_status(&engine, &id, TaskStatus::Running, WAIT).await;
        let busy_worker = view.assigned_worker.unwrap();
        let idle_worker = if busy_worker == "worker-001" {
            "worker-002"
        } else {
            "worker-001"
        };

        engine.remove_worker(idle_worker).await.unwrap();
        engine.remove_worker(&busy_worker).await.unwrap();
        let pool = engine.get_worker_status().await.unwrap();
        assert_eq!(pool.total, 1);
        assert_eq!(pool.draining, 1);

        executor.release();
        wait_for_status(&engine, &id, TaskStatus::Completed, WAIT).await;
        let handle = &engine;
        assert!(
            TestEnv::wait_for(
                move || async move { handle.get_worker_status().await.unwrap().total == 0 },
                WAIT
            )
            .await
        );

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_round_robin_spreads_concurrent_tasks() {
        let executor = Arc::new(BlockingExecutor::new());
        let engine = TestEnv::start_engine(TestEnv::config_with_workers(4), executor.clone()).await;

        let ids = engine
            .submit_batch((0..4).map(|_| TaskSpecBuilder::new().build()).collect())
            .await
            .unwrap();
        for id in &ids {
            wait_for_status(&engine, id, TaskStatus::Running, WAIT).await;
        }

        let workers: HashSet<String> = executor
            .calls()
            .into_iter()
            .map(|call| call.worker_id)
            .collect();
        assert_eq!(workers.len(), 4);

        executor.release();
        for id in &ids {
            wait_for_status(&engine, id, TaskStatus::Completed, WAIT).await;
        }
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_switch_load_balancing_strategy() {
        let engine = TestEnv::start_engine(
            TestEnv::config(),
            Arc::new(ScriptedExecutor::new()),
        )
        .await;

        let info = engine.get_load_balancing_strategy().await.unwrap();
        assert_eq!(info.name, "round_robin");
        assert_eq!(info.effective, "round_robin");

        let info = engine.set_load_balancing_strategy("adaptive").await.unwrap();
        assert_eq!(info.name, "adaptive");
        assert_eq!(info.effective, "performance_based");

        let err = engine
            .set_load_balancing_strategy("fastest")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::UnknownStrategy {
                name: "fastest".to_string()
            }
        );
        assert_eq!(
            engine.get_load_balancing_strategy().await.unwrap().name,
            "adaptive"
        );

        // 切换策略后任务照常完成
        let id = engine
            .submit_task("quality", json!({}), TaskPriority::Normal, vec![])
            .await
            .unwrap();
        wait_for_status(&engine, &id, TaskStatus::Completed, WAIT).await;

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_tasks() {
        let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(200)));
        let engine = TestEnv::start_engine(TestEnv::config(), executor.clone()).await;

        let id = engine
            .submit_task("quality", json!({}), TaskPriority::Normal, vec![])
            .await
            .unwrap();
        wait_for_status(&engine, &id, TaskStatus::Running, WAIT).await;

        let started = Instant::now();
        engine.stop().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!engine.is_running().await);

        let err = engine.get_task_status(&id).await.unwrap_err();
        assert_eq!(err, SchedulerError::EngineNotRunning);
        let err = engine
            .submit_task("quality", json!({}), TaskPriority::Normal, vec![])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
    }

    #[tokio::test]
    async fn test_stop_aborts_after_shutdown_timeout() {
        let mut config = TestEnv::config_with_workers(1);
        config.engine.shutdown_timeout_seconds = 1;
        let executor = Arc::new(IgnoreCancelExecutor::new(Duration::from_secs(30)));
        let engine = TestEnv::start_engine(config, executor).await;

        let id = engine
            .submit_task("quality", json!({}), TaskPriority::Normal, vec![])
            .await
            .unwrap();
        wait_for_status(&engine, &id, TaskStatus::Running, WAIT).await;

        let started = Instant::now();
        engine.stop().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    }
}

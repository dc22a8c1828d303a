//! 调度循环
//!
//! 队列、Worker注册表、负载均衡器和统计只由这一个任务持有。
//! 外部操作以 [`Command`] 的形式送入，携带 oneshot 回复通道；
//! Worker的开始、心跳、进度、完成与崩溃以 [`ExecutionEvent`] 的形式送回。
//! 所有状态变更都在循环内串行发生，因此任何查询看到的都是一致的快照。

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use engine_core::{
    config::{AppConfig, EngineConfig},
    logging::EngineLogger,
    models::{
        ProcessingStats, QueueSnapshot, ScaleResult, StrategyInfo, TaskErrorKind, TaskRecord,
        TaskSpec, TaskStatus, TaskStatusView, WorkerHandle, WorkerPoolStatus,
    },
    traits::{
        cancellation_pair, CancellationHandle, ExecutionContext, ProgressReporter, TaskExecutor,
    },
    SchedulerError, SchedulerResult,
};

use crate::queue::PriorityQueue;
use crate::retry_service::RetryPolicy;
use crate::stats::StatsCollector;
use crate::strategies::LoadBalancer;
use crate::worker_failure_detector::WorkerFailureDetector;

type Reply<T> = oneshot::Sender<T>;

/// 送入调度循环的外部操作
pub(crate) enum Command {
    Submit {
        specs: Vec<TaskSpec>,
        reply: Reply<SchedulerResult<Vec<String>>>,
    },
    TaskStatus {
        task_id: String,
        reply: Reply<SchedulerResult<TaskStatusView>>,
    },
    Cancel {
        task_id: String,
        reply: Reply<SchedulerResult<bool>>,
    },
    WorkerStatus {
        reply: Reply<WorkerPoolStatus>,
    },
    Scale {
        target: usize,
        reply: Reply<SchedulerResult<ScaleResult>>,
    },
    RemoveWorker {
        worker_id: String,
        reply: Reply<SchedulerResult<()>>,
    },
    SetStrategy {
        name: String,
        reply: Reply<SchedulerResult<StrategyInfo>>,
    },
    GetStrategy {
        reply: Reply<StrategyInfo>,
    },
    QueueStatus {
        reply: Reply<QueueSnapshot>,
    },
    ProcessingStats {
        reply: Reply<ProcessingStats>,
    },
    Cleanup {
        retention: Duration,
        reply: Reply<usize>,
    },
    /// 停止分配新任务，执行中的任务全部结束后回复并退出
    Drain { reply: Reply<()> },
    /// 取消并中止所有执行中的任务后立即退出，回复被中止的数量
    Abort { reply: Reply<usize> },
}

/// 执行侧送回调度循环的事件
#[derive(Debug)]
pub(crate) enum ExecutionEvent {
    Started {
        dispatch_id: u64,
    },
    Heartbeat {
        dispatch_id: u64,
    },
    Progress {
        dispatch_id: u64,
        progress: f64,
    },
    Finished {
        dispatch_id: u64,
        result: SchedulerResult<serde_json::Value>,
        elapsed: Duration,
    },
    Crashed {
        dispatch_id: u64,
        reason: String,
    },
    RetryDue {
        task_id: String,
    },
    CancelGraceExpired {
        dispatch_id: u64,
    },
}

/// 一次分派：任务在某个Worker上的一次执行
struct Dispatch {
    task_id: String,
    worker_id: String,
    cancel: CancellationHandle,
    abort: AbortHandle,
    cancel_requested: bool,
    /// 任务已终结，迟到的结果只用来释放Worker
    finalized: bool,
}

enum Wake {
    Event(ExecutionEvent),
    Command(Option<Command>),
    FailureCheck,
}

enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Scheduler {
    engine: EngineConfig,
    executor: Arc<dyn TaskExecutor>,

    tasks: HashMap<String, TaskRecord>,
    queue: PriorityQueue,
    /// 按注册顺序排列
    workers: Vec<WorkerHandle>,
    next_worker_seq: u64,

    balancer: LoadBalancer,
    retry: RetryPolicy,
    stats: StatsCollector,
    detector: WorkerFailureDetector,

    dispatches: HashMap<u64, Dispatch>,
    /// 未终结的任务 -> 当前分派
    task_dispatch: HashMap<String, u64>,
    next_dispatch_id: u64,

    events_tx: mpsc::UnboundedSender<ExecutionEvent>,
    events_rx: mpsc::UnboundedReceiver<ExecutionEvent>,

    stopping: bool,
    drain_reply: Option<Reply<()>>,
}

impl Scheduler {
    pub(crate) fn new(config: &AppConfig, executor: Arc<dyn TaskExecutor>) -> SchedulerResult<Self> {
        let balancer = LoadBalancer::new(config.load_balancer.clone())?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut scheduler = Self {
            engine: config.engine.clone(),
            executor,
            tasks: HashMap::new(),
            queue: PriorityQueue::new(config.engine.max_queue_size),
            workers: Vec::new(),
            next_worker_seq: 0,
            balancer,
            retry: RetryPolicy::new(config.retry.clone()),
            stats: StatsCollector::new(config.stats.clone(), config.engine.target_wait()),
            detector: WorkerFailureDetector::new(config.engine.heartbeat_timeout()),
            dispatches: HashMap::new(),
            task_dispatch: HashMap::new(),
            next_dispatch_id: 0,
            events_tx,
            events_rx,
            stopping: false,
            drain_reply: None,
        };

        for _ in 0..config.engine.initial_workers {
            scheduler.add_worker();
        }
        Ok(scheduler)
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn strategy_name(&self) -> &str {
        self.balancer.name()
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut failure_check = tokio::time::interval(self.engine.failure_check_interval());
        failure_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                Some(event) = self.events_rx.recv() => Wake::Event(event),
                command = commands.recv() => Wake::Command(command),
                _ = failure_check.tick() => Wake::FailureCheck,
            };

            let flow = match wake {
                Wake::Event(event) => {
                    self.handle_event(event);
                    Flow::Continue
                }
                Wake::Command(Some(command)) => self.handle_command(command),
                Wake::Command(None) => {
                    let aborted = self.abort_all();
                    warn!("引擎句柄已释放，中止 {} 个执行中的任务", aborted);
                    Flow::Exit
                }
                Wake::FailureCheck => {
                    self.check_worker_failures();
                    Flow::Continue
                }
            };

            if matches!(flow, Flow::Exit) {
                break;
            }

            self.dispatch_ready_tasks();
            self.publish_gauges();

            if self.dispatches.is_empty() {
                if let Some(reply) = self.drain_reply.take() {
                    let _ = reply.send(());
                    break;
                }
            }
        }

        debug!("调度循环已退出");
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Submit { specs, reply } => {
                let _ = reply.send(self.submit(specs));
            }
            Command::TaskStatus { task_id, reply } => {
                let _ = reply.send(self.task_status(&task_id));
            }
            Command::Cancel { task_id, reply } => {
                let _ = reply.send(self.cancel(&task_id));
            }
            Command::WorkerStatus { reply } => {
                let _ = reply.send(WorkerPoolStatus::from_workers(self.workers.clone()));
            }
            Command::Scale { target, reply } => {
                let _ = reply.send(self.scale(target));
            }
            Command::RemoveWorker { worker_id, reply } => {
                let _ = reply.send(self.remove_worker(&worker_id));
            }
            Command::SetStrategy { name, reply } => {
                let _ = reply.send(self.set_strategy(&name));
            }
            Command::GetStrategy { reply } => {
                let _ = reply.send(self.balancer.info());
            }
            Command::QueueStatus { reply } => {
                let _ = reply.send(self.queue_status());
            }
            Command::ProcessingStats { reply } => {
                let snapshot = self.stats.snapshot(self.busy_worker_count(), Instant::now());
                let _ = reply.send(snapshot);
            }
            Command::Cleanup { retention, reply } => {
                let _ = reply.send(self.cleanup(retention));
            }
            Command::Drain { reply } => {
                self.stopping = true;
                self.drain_reply = Some(reply);
                info!("停止分配新任务，等待 {} 个执行中的任务结束", self.dispatches.len());
            }
            Command::Abort { reply } => {
                let aborted = self.abort_all();
                let _ = reply.send(aborted);
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    fn handle_event(&mut self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::Started { dispatch_id } => self.on_started(dispatch_id),
            ExecutionEvent::Heartbeat { dispatch_id } => {
                if let Some(dispatch) = self.dispatches.get(&dispatch_id) {
                    if let Some(worker) = self
                        .workers
                        .iter_mut()
                        .find(|w| w.id == dispatch.worker_id)
                    {
                        worker.touch_heartbeat(Utc::now());
                    }
                }
            }
            ExecutionEvent::Progress {
                dispatch_id,
                progress,
            } => {
                let Some(dispatch) = self.dispatches.get(&dispatch_id) else {
                    return;
                };
                if dispatch.finalized {
                    return;
                }
                if let Some(task) = self.tasks.get_mut(&dispatch.task_id) {
                    if task.status.is_in_flight() {
                        task.progress = progress;
                    }
                }
            }
            ExecutionEvent::Finished {
                dispatch_id,
                result,
                elapsed,
            } => self.on_finished(dispatch_id, result, elapsed),
            ExecutionEvent::Crashed {
                dispatch_id,
                reason,
            } => self.on_crashed(dispatch_id, &reason),
            ExecutionEvent::RetryDue { task_id } => self.on_retry_due(&task_id),
            ExecutionEvent::CancelGraceExpired { dispatch_id } => {
                self.on_cancel_grace_expired(dispatch_id)
            }
        }
    }

    // ---- 提交与分派 ----

    fn submit(&mut self, specs: Vec<TaskSpec>) -> SchedulerResult<Vec<String>> {
        if self.stopping {
            return Err(SchedulerError::EngineNotRunning);
        }
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        // 整批校验通过后才分配ID，任何一个失败都不会有任务入队
        for spec in &specs {
            spec.validate()?;
            for dependency in &spec.dependencies {
                match self.tasks.get(dependency) {
                    None => {
                        return Err(SchedulerError::UnknownDependency {
                            dependency: dependency.clone(),
                        })
                    }
                    Some(task)
                        if matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled) =>
                    {
                        return Err(SchedulerError::UnsatisfiableDependency {
                            dependency: dependency.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        self.queue.ensure_capacity(specs.len())?;

        let mut task_ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let task_id = Uuid::new_v4().to_string();
            let mut task =
                TaskRecord::from_spec(task_id.clone(), spec, self.engine.default_max_retries);
            EngineLogger::log_task_submitted(
                &task.id,
                &task.task_type,
                task.priority,
                task.dependencies.len(),
            );

            task.queue_seq = Some(self.queue.enqueue(
                task_id.clone(),
                task.priority,
                task.dependencies.clone(),
            )?);
            self.tasks.insert(task_id.clone(), task);
            self.promote_if_ready(&task_id);
            task_ids.push(task_id);
        }

        self.stats.record_submitted(task_ids.len());
        Ok(task_ids)
    }

    /// 排队中且依赖全部完成的任务进入 `Ready`
    fn promote_if_ready(&mut self, task_id: &str) {
        if !self.queue.contains(task_id) {
            return;
        }
        let tasks = &self.tasks;
        let ready = tasks.get(task_id).is_some_and(|task| {
            task.status == TaskStatus::Pending
                && task
                    .dependencies
                    .iter()
                    .all(|dep| dependency_completed(tasks, dep))
        });
        if !ready {
            return;
        }
        if let Some(task) = self.tasks.get_mut(task_id) {
            if let Err(e) = task.transition(TaskStatus::Ready) {
                error!("任务 {} 无法进入就绪状态: {}", task_id, e);
            }
        }
    }

    /// 只要同时存在空闲槽位和就绪任务就持续分派
    fn dispatch_ready_tasks(&mut self) {
        if self.stopping {
            return;
        }

        while self.workers.iter().any(|w| w.has_free_slot()) {
            let tasks = &self.tasks;
            let Some(entry) = self.queue.dequeue(|dep| dependency_completed(tasks, dep)) else {
                break;
            };
            self.stats.record_dequeued(entry.wait_time(Instant::now()));

            let Some(task) = self.tasks.get_mut(&entry.task_id) else {
                warn!("队列中的任务 {} 不存在，已丢弃", entry.task_id);
                continue;
            };
            if task.status == TaskStatus::Pending {
                if let Err(e) = task.transition(TaskStatus::Ready) {
                    error!("任务 {} 无法进入就绪状态: {}", entry.task_id, e);
                    continue;
                }
            }

            let candidates: Vec<&WorkerHandle> =
                self.workers.iter().filter(|w| w.has_free_slot()).collect();
            let selected = self.balancer.select_worker(task, &candidates);
            self.record_strategy_switches();

            match selected {
                Some(worker_id) => self.start_execution(&entry.task_id, worker_id),
                None => {
                    warn!("负载均衡器未选出Worker，任务 {} 重新入队", entry.task_id);
                    if let Err(e) = self.queue.requeue(
                        entry.task_id,
                        entry.priority,
                        entry.dependencies,
                        entry.seq,
                    ) {
                        error!("任务重新入队失败: {}", e);
                    }
                    break;
                }
            }
        }
    }

    fn start_execution(&mut self, task_id: &str, worker_id: String) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if let Err(e) = task.transition(TaskStatus::Assigned) {
            error!("任务 {} 分派失败: {}", task_id, e);
            return;
        }
        let now = Utc::now();
        task.assigned_worker = Some(worker_id.clone());
        task.started_at = Some(now);
        task.progress = 0.0;
        let attempt = task.retry_count + 1;

        let dispatch_id = self.next_dispatch_id;
        self.next_dispatch_id += 1;

        let (cancel, signal) = cancellation_pair();
        let progress_events = self.events_tx.clone();
        let progress = ProgressReporter::new(move |progress| {
            let _ = progress_events.send(ExecutionEvent::Progress {
                dispatch_id,
                progress,
            });
        });
        let deadline = now + chrono::Duration::seconds(self.engine.task_timeout_seconds as i64);
        let context = ExecutionContext::new(
            task.id.clone(),
            task.task_type.clone(),
            task.payload.clone(),
            worker_id.clone(),
            attempt,
            deadline,
            signal,
            progress,
        );

        if let Some(worker) = self.workers.iter_mut().find(|w| w.id == worker_id) {
            worker.assign(task_id);
        }

        let abort = spawn_execution(
            dispatch_id,
            Arc::clone(&self.executor),
            context,
            self.engine.heartbeat_interval(),
            self.events_tx.clone(),
        );

        EngineLogger::log_task_dispatched(task_id, &worker_id, self.balancer.name(), attempt);
        self.task_dispatch.insert(task_id.to_string(), dispatch_id);
        self.dispatches.insert(
            dispatch_id,
            Dispatch {
                task_id: task_id.to_string(),
                worker_id,
                cancel,
                abort,
                cancel_requested: false,
                finalized: false,
            },
        );
    }

    fn record_strategy_switches(&mut self) {
        for switch in self.balancer.drain_switches() {
            EngineLogger::log_strategy_switched(
                &switch.from,
                &switch.to,
                switch.worker_id.as_deref(),
                switch.success_rate,
            );
            self.stats.record_strategy_switch();
        }
    }

    // ---- 执行事件 ----

    fn on_started(&mut self, dispatch_id: u64) {
        let Some(dispatch) = self.dispatches.get(&dispatch_id) else {
            return;
        };
        if dispatch.finalized {
            return;
        }
        if let Some(task) = self.tasks.get_mut(&dispatch.task_id) {
            if task.status == TaskStatus::Assigned {
                if let Err(e) = task.transition(TaskStatus::Running) {
                    error!("任务 {} 无法进入运行状态: {}", task.id, e);
                }
            }
        }
    }

    fn on_finished(
        &mut self,
        dispatch_id: u64,
        result: SchedulerResult<serde_json::Value>,
        elapsed: Duration,
    ) {
        let Some(dispatch) = self.dispatches.remove(&dispatch_id) else {
            debug!("忽略已失效分派 {} 的执行结果", dispatch_id);
            return;
        };

        if dispatch.finalized {
            EngineLogger::log_stale_report(&dispatch.task_id, &dispatch.worker_id);
            self.release_worker(&dispatch.worker_id, &dispatch.task_id, None);
            return;
        }
        self.task_dispatch.remove(&dispatch.task_id);

        if dispatch.cancel_requested {
            self.release_worker(&dispatch.worker_id, &dispatch.task_id, None);
            self.finish_cancelled(&dispatch.task_id);
            return;
        }

        self.release_worker(
            &dispatch.worker_id,
            &dispatch.task_id,
            Some((result.is_ok(), elapsed)),
        );
        match result {
            Ok(value) => self.complete_task(&dispatch.task_id, &dispatch.worker_id, value, elapsed),
            Err(error) => self.fail_task(&dispatch.task_id, Some(&dispatch.worker_id), error),
        }
    }

    /// 任一执行崩溃都视为所在Worker崩溃
    fn on_crashed(&mut self, dispatch_id: u64, reason: &str) {
        let Some(dispatch) = self.dispatches.get(&dispatch_id) else {
            return;
        };
        let (worker_id, task_id) = (dispatch.worker_id.clone(), dispatch.task_id.clone());
        self.crash_worker(&worker_id, Some(&task_id), reason);
    }

    fn on_retry_due(&mut self, task_id: &str) {
        let Some(task) = self.tasks.get(task_id) else {
            return;
        };
        if task.status != TaskStatus::Pending || self.queue.contains(task_id) {
            debug!("任务 {} 状态为 {}，忽略重试", task_id, task.status);
            return;
        }

        let (priority, dependencies) = (task.priority, task.dependencies.clone());
        let requeued = match task.queue_seq {
            Some(seq) => self
                .queue
                .requeue(task_id.to_string(), priority, dependencies, seq),
            None => self
                .queue
                .enqueue(task_id.to_string(), priority, dependencies)
                .map(|_| ()),
        };
        if let Err(e) = requeued {
            error!("重试任务 {} 重新入队失败: {}", task_id, e);
            return;
        }
        self.promote_if_ready(task_id);
    }

    fn on_cancel_grace_expired(&mut self, dispatch_id: u64) {
        let Some(dispatch) = self.dispatches.get_mut(&dispatch_id) else {
            return;
        };
        if dispatch.finalized || !dispatch.cancel_requested {
            return;
        }
        // Worker在上报结果前保持忙碌
        dispatch.finalized = true;
        let task_id = dispatch.task_id.clone();
        let worker_id = dispatch.worker_id.clone();
        self.task_dispatch.remove(&task_id);

        EngineLogger::log_cancel_timeout(&task_id, &worker_id);
        let error = SchedulerError::timeout(format!(
            "Worker {} 未在 {:?} 内确认取消",
            worker_id,
            self.engine.cancel_grace_period()
        ));

        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };
        if let Err(e) = task.transition(TaskStatus::Failed) {
            error!("任务 {} 无法标记为失败: {}", task_id, e);
            return;
        }
        task.error_message = Some(error.to_string());
        task.error_kind = Some(TaskErrorKind::Timeout);
        task.assigned_worker = None;
        task.completed_at = Some(Utc::now());
        self.stats.record_failed();
        self.fail_dependents(&task_id);
    }

    // ---- 任务终结 ----

    fn complete_task(
        &mut self,
        task_id: &str,
        worker_id: &str,
        value: serde_json::Value,
        elapsed: Duration,
    ) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.status == TaskStatus::Assigned {
            let _ = task.transition(TaskStatus::Running);
        }
        if let Err(e) = task.transition(TaskStatus::Completed) {
            error!("任务 {} 无法标记为完成: {}", task_id, e);
            return;
        }
        task.result = Some(value);
        task.progress = 1.0;
        task.assigned_worker = None;
        task.error_message = None;
        task.error_kind = None;
        task.completed_at = Some(Utc::now());

        self.stats.record_completed(elapsed, Instant::now());
        EngineLogger::log_task_completed(task_id, worker_id, elapsed);

        for dependent in self.queue.dependents_of(task_id) {
            self.promote_if_ready(&dependent);
        }
    }

    /// 执行失败：还有重试次数时退避后重新入队，否则终止并级联失败依赖它的任务
    fn fail_task(&mut self, task_id: &str, worker_id: Option<&str>, error: SchedulerError) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if let Err(e) = task.transition(TaskStatus::Failed) {
            error!("任务 {} 无法标记为失败: {}", task_id, e);
            return;
        }
        let message = error.to_string();
        task.error_message = Some(message.clone());
        task.error_kind = Some(TaskErrorKind::from_error(&error));
        task.assigned_worker = None;
        EngineLogger::log_task_failed(task_id, worker_id, &message, task.retry_count);

        if error.is_retryable() && task.can_retry() {
            let delay = self.retry.backoff_delay(task.retry_count);
            task.retry_count += 1;
            task.progress = 0.0;
            if let Err(e) = task.transition(TaskStatus::Pending) {
                error!("任务 {} 无法重新进入等待状态: {}", task_id, e);
                return;
            }
            EngineLogger::log_task_retry_scheduled(
                task_id,
                task.retry_count,
                task.max_retries,
                delay,
            );
            self.stats.record_retry();
            self.schedule(
                delay,
                ExecutionEvent::RetryDue {
                    task_id: task_id.to_string(),
                },
            );
        } else {
            task.completed_at = Some(Utc::now());
            self.stats.record_failed();
            self.fail_dependents(task_id);
        }
    }

    fn finish_cancelled(&mut self, task_id: &str) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        let previous = task.status;
        if let Err(e) = task.transition(TaskStatus::Cancelled) {
            error!("任务 {} 无法标记为取消: {}", task_id, e);
            return;
        }
        task.assigned_worker = None;
        task.completed_at = Some(Utc::now());
        self.stats.record_cancelled();
        EngineLogger::log_task_cancelled(task_id, previous);
        self.fail_dependents(task_id);
    }

    /// 依赖的任务终止于失败或取消后，排队中依赖它的任务随之失败
    fn fail_dependents(&mut self, root: &str) {
        let mut parents = vec![root.to_string()];
        while let Some(parent) = parents.pop() {
            for dependent in self.queue.dependents_of(&parent) {
                self.queue.remove(&dependent);
                let Some(task) = self.tasks.get_mut(&dependent) else {
                    continue;
                };
                if let Err(e) = task.transition(TaskStatus::Failed) {
                    error!("依赖任务 {} 无法标记为失败: {}", dependent, e);
                    continue;
                }
                let error = SchedulerError::UnsatisfiableDependency {
                    dependency: parent.clone(),
                };
                task.error_message = Some(error.to_string());
                task.error_kind = Some(TaskErrorKind::from_error(&error));
                task.completed_at = Some(Utc::now());
                self.stats.record_failed();
                EngineLogger::log_task_failed(&dependent, None, &error.to_string(), task.retry_count);
                parents.push(dependent);
            }
        }
    }

    fn cancel(&mut self, task_id: &str) -> SchedulerResult<bool> {
        let status = self
            .tasks
            .get(task_id)
            .map(|task| task.status)
            .ok_or_else(|| SchedulerError::task_not_found(task_id))?;

        if status.is_terminal() {
            return Ok(false);
        }

        if status.is_waiting() {
            // 排队中或处于重试退避中；退避结束的定时事件会因状态不符被忽略
            self.queue.remove(task_id);
            self.finish_cancelled(task_id);
            return Ok(true);
        }

        let dispatch_id = *self.task_dispatch.get(task_id).ok_or_else(|| {
            SchedulerError::Internal(format!("执行中的任务 {task_id} 缺少分派记录"))
        })?;
        let grace = self.engine.cancel_grace_period();
        let Some(dispatch) = self.dispatches.get_mut(&dispatch_id) else {
            return Err(SchedulerError::Internal(format!(
                "分派 {dispatch_id} 不存在"
            )));
        };

        if !dispatch.cancel_requested {
            dispatch.cancel_requested = true;
            dispatch.cancel.cancel();
            EngineLogger::log_cancel_requested(task_id, &dispatch.worker_id, grace);
            self.schedule(grace, ExecutionEvent::CancelGraceExpired { dispatch_id });
        }
        Ok(true)
    }

    // ---- Worker管理 ----

    fn add_worker(&mut self) -> String {
        self.next_worker_seq += 1;
        let worker = WorkerHandle::new(
            self.next_worker_seq,
            self.engine.worker_capacity,
            self.engine.worker_stats_window,
        );
        let worker_id = worker.id.clone();
        debug!("注册Worker: {}", worker_id);
        self.workers.push(worker);
        worker_id
    }

    /// 释放Worker上的一个槽位；排空中的Worker在最后一个任务结束后移除
    fn release_worker(
        &mut self,
        worker_id: &str,
        task_id: &str,
        outcome: Option<(bool, Duration)>,
    ) {
        let Some(index) = self.workers.iter().position(|w| w.id == worker_id) else {
            return;
        };
        let worker = &mut self.workers[index];
        if let Some((success, latency)) = outcome {
            worker.stats.record(success, latency);
            self.balancer.record_outcome(worker_id, success, latency);
        }
        if worker.release(task_id) {
            self.workers.remove(index);
            EngineLogger::log_worker_removed(worker_id, "排空完成");
        }
    }

    /// 移除崩溃的Worker，并终结它上面所有仍在执行的任务
    fn crash_worker(&mut self, worker_id: &str, task_id: Option<&str>, reason: &str) {
        if let Some(index) = self.workers.iter().position(|w| w.id == worker_id) {
            let mut worker = self.workers.remove(index);
            let was_draining = worker.is_draining();
            worker.mark_offline();
            EngineLogger::log_worker_crashed(worker_id, task_id, reason);

            if self.engine.replace_crashed_workers && !self.stopping && !was_draining {
                let replacement = self.add_worker();
                info!("Worker {} 已由 {} 替换", worker_id, replacement);
            }
        }

        let mut dispatch_ids: Vec<u64> = self
            .dispatches
            .iter()
            .filter(|(_, dispatch)| dispatch.worker_id == worker_id)
            .map(|(id, _)| *id)
            .collect();
        dispatch_ids.sort_unstable();

        for dispatch_id in dispatch_ids {
            let Some(dispatch) = self.dispatches.remove(&dispatch_id) else {
                continue;
            };
            dispatch.abort.abort();
            if dispatch.finalized {
                continue;
            }
            self.task_dispatch.remove(&dispatch.task_id);
            self.balancer.record_outcome(worker_id, false, Duration::ZERO);

            if dispatch.cancel_requested {
                self.finish_cancelled(&dispatch.task_id);
            } else {
                let error =
                    SchedulerError::execution(format!("Worker {} 崩溃: {}", worker_id, reason));
                self.fail_task(&dispatch.task_id, Some(worker_id), error);
            }
        }
    }

    fn check_worker_failures(&mut self) {
        let failed = self
            .detector
            .detect_failed_workers(self.workers.iter(), Utc::now());

        for worker_id in failed {
            let task_id = self
                .workers
                .iter()
                .find(|w| w.id == worker_id)
                .and_then(|w| w.current_task_ids.first().cloned());
            self.crash_worker(&worker_id, task_id.as_deref(), "心跳超时");
        }
    }

    /// 可接收新任务的Worker数（空闲与忙碌，不含排空中的）
    fn active_worker_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.is_idle() || w.is_busy())
            .count()
    }

    fn busy_worker_count(&self) -> usize {
        self.workers.iter().filter(|w| w.has_task()).count()
    }

    fn check_worker_limit(&self, requested: usize) -> SchedulerResult<()> {
        if requested < self.engine.min_workers || requested > self.engine.max_workers {
            return Err(SchedulerError::WorkerLimit {
                requested,
                min: self.engine.min_workers,
                max: self.engine.max_workers,
            });
        }
        Ok(())
    }

    /// 扩容立即新增空闲Worker；缩容先移除空闲Worker，不够时让忙碌Worker排空
    fn scale(&mut self, target: usize) -> SchedulerResult<ScaleResult> {
        if self.stopping {
            return Err(SchedulerError::EngineNotRunning);
        }
        self.check_worker_limit(target)?;

        let previous = self.active_worker_count();
        if target > previous {
            for _ in previous..target {
                self.add_worker();
            }
            EngineLogger::log_workers_scaled(previous, target, 0, 0);
        } else if target < previous {
            let mut excess = previous - target;
            let mut removed_idle = 0;
            while excess > 0 {
                let Some(index) = self.workers.iter().rposition(|w| w.is_idle()) else {
                    break;
                };
                let mut worker = self.workers.remove(index);
                worker.mark_offline();
                EngineLogger::log_worker_removed(&worker.id, "缩容");
                removed_idle += 1;
                excess -= 1;
            }

            let mut draining = 0;
            for worker in self
                .workers
                .iter_mut()
                .rev()
                .filter(|w| w.is_busy())
                .take(excess)
            {
                worker.mark_draining();
                draining += 1;
            }
            EngineLogger::log_workers_scaled(previous, target, removed_idle, draining);
        }

        Ok(ScaleResult {
            previous_count: previous,
            new_count: self.active_worker_count(),
        })
    }

    fn remove_worker(&mut self, worker_id: &str) -> SchedulerResult<()> {
        if self.stopping {
            return Err(SchedulerError::EngineNotRunning);
        }
        let index = self
            .workers
            .iter()
            .position(|w| w.id == worker_id)
            .ok_or_else(|| SchedulerError::worker_not_found(worker_id))?;

        let worker = &self.workers[index];
        if !(worker.is_idle() || worker.is_busy()) {
            return Ok(());
        }
        self.check_worker_limit(self.active_worker_count() - 1)?;

        let worker = &mut self.workers[index];
        if worker.is_idle() {
            worker.mark_offline();
            self.workers.remove(index);
            EngineLogger::log_worker_removed(worker_id, "手动移除");
        } else {
            worker.mark_draining();
            info!("Worker {} 将在当前任务结束后移除", worker_id);
        }
        Ok(())
    }

    // ---- 查询 ----

    fn set_strategy(&mut self, name: &str) -> SchedulerResult<StrategyInfo> {
        let previous = self.balancer.set_strategy(name)?;
        EngineLogger::log_strategy_changed(&previous, self.balancer.name());
        Ok(self.balancer.info())
    }

    fn task_status(&self, task_id: &str) -> SchedulerResult<TaskStatusView> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| SchedulerError::task_not_found(task_id))?;
        Ok(TaskStatusView::from_record(
            task,
            self.estimated_completion(task, Utc::now()),
        ))
    }

    fn estimated_completion(&self, task: &TaskRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let avg = self.stats.avg_processing_time()?;
        let avg = chrono::Duration::from_std(avg).ok()?;

        match task.status {
            TaskStatus::Assigned | TaskStatus::Running => task.started_at.map(|at| at + avg),
            TaskStatus::Pending | TaskStatus::Ready => {
                let workers = self.active_worker_count().max(1) as f64;
                let position = self.queue.position(&task.id).unwrap_or(0) as f64;
                let millis = avg.num_milliseconds() as f64 * (position / workers + 1.0);
                Some(now + chrono::Duration::milliseconds(millis.round() as i64))
            }
            _ => None,
        }
    }

    fn queue_status(&self) -> QueueSnapshot {
        QueueSnapshot {
            length: self.queue.len(),
            priority_distribution: self.queue.distribution(),
            oldest_task_age: self.queue.oldest_age(Instant::now()),
            queue_efficiency: self.stats.queue_efficiency(),
        }
    }

    /// 清理完成超过 `retention` 的终止任务，仍被未终止任务依赖的保留
    fn cleanup(&mut self, retention: Duration) -> usize {
        let retention =
            chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - retention;

        let referenced: HashSet<String> = self
            .tasks
            .values()
            .filter(|task| !task.status.is_terminal())
            .flat_map(|task| task.dependencies.iter().cloned())
            .collect();

        let before = self.tasks.len();
        self.tasks.retain(|id, task| {
            let expired = task.status.is_terminal()
                && task.completed_at.is_some_and(|at| at <= cutoff)
                && !referenced.contains(id);
            !expired
        });
        let removed = before - self.tasks.len();
        if removed > 0 {
            info!("清理了 {} 个已结束的任务", removed);
        }
        removed
    }

    // ---- 内部 ----

    fn schedule(&self, delay: Duration, event: ExecutionEvent) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }

    fn abort_all(&mut self) -> usize {
        for dispatch in self.dispatches.values() {
            dispatch.cancel.cancel();
            dispatch.abort.abort();
        }
        let aborted = self.dispatches.len();
        self.dispatches.clear();
        self.task_dispatch.clear();
        aborted
    }

    fn publish_gauges(&self) {
        self.stats.update_queue_depth(self.queue.len());
        self.stats.update_active_workers(self.busy_worker_count());
    }
}

/// 被清理掉的依赖只可能是已完成的任务
fn dependency_completed(tasks: &HashMap<String, TaskRecord>, task_id: &str) -> bool {
    tasks
        .get(task_id)
        .map_or(true, |task| task.status == TaskStatus::Completed)
}

/// 在独立任务中运行执行钩子
///
/// 心跳与执行在同一个任务中交替推进，执行钩子阻塞线程时心跳随之停止。
/// 外层监督任务等待执行结束，panic 以崩溃事件上报。
fn spawn_execution(
    dispatch_id: u64,
    executor: Arc<dyn TaskExecutor>,
    context: ExecutionContext,
    heartbeat_interval: Duration,
    events: mpsc::UnboundedSender<ExecutionEvent>,
) -> AbortHandle {
    let execution_events = events.clone();
    let execution = tokio::spawn(async move {
        let _ = execution_events.send(ExecutionEvent::Started { dispatch_id });
        let started = Instant::now();

        let work = executor.execute(context);
        tokio::pin!(work);
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut work => return (result, started.elapsed()),
                _ = heartbeat.tick() => {
                    let _ = execution_events.send(ExecutionEvent::Heartbeat { dispatch_id });
                }
            }
        }
    });
    let abort = execution.abort_handle();

    tokio::spawn(async move {
        match execution.await {
            Ok((result, elapsed)) => {
                let _ = events.send(ExecutionEvent::Finished {
                    dispatch_id,
                    result,
                    elapsed,
                });
            }
            Err(err) if err.is_panic() => {
                let reason = panic_message(err.into_panic());
                let _ = events.send(ExecutionEvent::Crashed {
                    dispatch_id,
                    reason,
                });
            }
            Err(_) => debug!("分派 {} 的执行已中止", dispatch_id),
        }
    });

    abort
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic".to_string()
    }
}

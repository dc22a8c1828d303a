//! Mock task executors for exercising the engine
//!
//! Each executor records the calls it receives so tests can assert on
//! attempts, ordering and worker placement without a real analysis backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use engine_core::{
    traits::{ExecutionContext, TaskExecutor},
    SchedulerError, SchedulerResult,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

/// One observed execution
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub task_type: String,
    pub worker_id: String,
    pub attempt: u32,
    pub started_at: Instant,
}

impl ExecutionRecord {
    fn from_context(context: &ExecutionContext) -> Self {
        Self {
            task_id: context.task_id.clone(),
            task_type: context.task_type.clone(),
            worker_id: context.worker_id.clone(),
            attempt: context.attempt,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct CallLog {
    calls: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl CallLog {
    fn push(&self, context: &ExecutionContext) {
        self.calls
            .lock()
            .unwrap()
            .push(ExecutionRecord::from_context(context));
    }

    fn snapshot(&self) -> Vec<ExecutionRecord> {
        self.calls.lock().unwrap().clone()
    }

    fn for_task(&self, task_id: &str) -> Vec<ExecutionRecord> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.task_id == task_id)
            .cloned()
            .collect()
    }
}

/// A scripted outcome
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Succeed(Value),
    Fail(String),
    Timeout(String),
}

/// Executor that plays back a script of outcomes, one per call
///
/// Once the script runs out it echoes the payload back. A configured delay
/// is cut short by cancellation, which reports `SchedulerError::Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    failing_types: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    log: CallLog,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then(self, step: ScriptStep) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.then(ScriptStep::Fail(message.to_string()))
    }

    pub fn then_succeed(self, value: Value) -> Self {
        self.then(ScriptStep::Succeed(value))
    }

    /// Every task of `task_type` fails, regardless of the script
    pub fn failing_type(self, task_type: &str) -> Self {
        self.failing_types
            .lock()
            .unwrap()
            .push(task_type.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ExecutionRecord> {
        self.log.snapshot()
    }

    pub fn calls_for(&self, task_id: &str) -> Vec<ExecutionRecord> {
        self.log.for_task(task_id)
    }

    pub fn call_count(&self) -> usize {
        self.log.snapshot().len()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<Value> {
        self.log.push(&context);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = context.cancelled() => return Err(SchedulerError::Cancelled),
            }
        }

        if self
            .failing_types
            .lock()
            .unwrap()
            .contains(&context.task_type)
        {
            return Err(SchedulerError::execution(format!(
                "{} always fails",
                context.task_type
            )));
        }

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(ScriptStep::Succeed(value)) => Ok(value),
            Some(ScriptStep::Fail(message)) => Err(SchedulerError::execution(message)),
            Some(ScriptStep::Timeout(message)) => Err(SchedulerError::timeout(message)),
            None => Ok(context.payload),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Executor that holds every task until the gate opens or the task is cancelled
#[derive(Debug, Clone)]
pub struct BlockingExecutor {
    gate: Arc<watch::Sender<bool>>,
    started: Arc<AtomicUsize>,
    log: CallLog,
}

impl BlockingExecutor {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate: Arc::new(gate),
            started: Arc::new(AtomicUsize::new(0)),
            log: CallLog::default(),
        }
    }

    /// Let all held and future tasks finish
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ExecutionRecord> {
        self.log.snapshot()
    }
}

impl Default for BlockingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for BlockingExecutor {
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<Value> {
        self.log.push(&context);
        self.started.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let opened = async move {
            while !*gate.borrow_and_update() {
                if gate.changed().await.is_err() {
                    return false;
                }
            }
            true
        };

        tokio::select! {
            opened = opened => {
                if !opened {
                    return Err(SchedulerError::execution("gate dropped"));
                }
                Ok(context.payload.clone())
            }
            _ = context.cancelled() => Err(SchedulerError::Cancelled),
        }
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

/// Executor that never looks at the cancellation signal
#[derive(Debug, Clone)]
pub struct IgnoreCancelExecutor {
    duration: Duration,
    log: CallLog,
}

impl IgnoreCancelExecutor {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            log: CallLog::default(),
        }
    }

    pub fn calls(&self) -> Vec<ExecutionRecord> {
        self.log.snapshot()
    }
}

#[async_trait]
impl TaskExecutor for IgnoreCancelExecutor {
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<Value> {
        self.log.push(&context);
        tokio::time::sleep(self.duration).await;
        Ok(context.payload)
    }

    fn name(&self) -> &str {
        "ignore_cancel"
    }
}

/// Executor that panics for its first `panics` calls and succeeds afterwards
#[derive(Debug, Clone)]
pub struct PanickingExecutor {
    remaining: Arc<AtomicUsize>,
    log: CallLog,
}

impl PanickingExecutor {
    pub fn new(panics: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(panics)),
            log: CallLog::default(),
        }
    }

    pub fn calls(&self) -> Vec<ExecutionRecord> {
        self.log.snapshot()
    }
}

#[async_trait]
impl TaskExecutor for PanickingExecutor {
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<Value> {
        self.log.push(&context);
        let should_panic = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("executor crashed on {}", context.task_id);
        }
        Ok(context.payload)
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Executor that blocks its thread, so the worker stops sending heartbeats
///
/// Only use it on a multi-threaded runtime.
#[derive(Debug, Clone)]
pub struct StallingExecutor {
    stall: Duration,
    remaining: Arc<AtomicUsize>,
    log: CallLog,
}

impl StallingExecutor {
    /// Stall for the first `stalls` calls, succeed immediately afterwards
    pub fn new(stall: Duration, stalls: usize) -> Self {
        Self {
            stall,
            remaining: Arc::new(AtomicUsize::new(stalls)),
            log: CallLog::default(),
        }
    }

    pub fn calls(&self) -> Vec<ExecutionRecord> {
        self.log.snapshot()
    }
}

#[async_trait]
impl TaskExecutor for StallingExecutor {
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<Value> {
        self.log.push(&context);
        let should_stall = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_stall {
            std::thread::sleep(self.stall);
        }
        Ok(context.payload)
    }

    fn name(&self) -> &str {
        "stalling"
    }
}

//! One task slot per work, plus the event log for reconnect replay.
//!
//! State machine:
//!
//! ```text
//!      create()          start()           complete()
//!    (none) ─────> pending ────> running ────────────> completed
//!                     │            │         fail()
//!                     │            ├──────────────────> failed
//!                     │            │      cancel()
//!                     │            └──────────────────> cancelled
//!                     cancel()
//!                     └──────────────────> cancelled
//! ```
//!
//! Transitions are one-way; a terminal record is replaced by the next
//! `create()`. The per-work slot also carries the active connection, so
//! replay and live delivery share one ordered channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use paper_agents::EventPublisher;
use paper_core::StreamEvent;

use crate::protocol::ServerFrame;

/// Bound of the per-task event log; overflow drops the oldest entries.
const OUTPUT_LOG_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum SupervisorError {
    #[error("当前有任务正在执行，请等待完成")]
    AlreadyRunning,

    #[error("没有可操作的任务: {0}")]
    NoTask(String),

    #[error("非法状态迁移: {0:?} -> {1:?}")]
    InvalidTransition(TaskStatus, TaskStatus),
}

#[derive(Debug, Clone, Serialize)]
struct TaskOutput {
    event: StreamEvent,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct TaskRecord {
    task_id: String,
    user_id: i64,
    question: String,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
    outputs: VecDeque<TaskOutput>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct WorkSlot {
    task: Option<TaskRecord>,
    connection: Option<UnboundedSender<ServerFrame>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub has_task: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub output_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
pub struct TaskSupervisor {
    slots: DashMap<String, Arc<Mutex<WorkSlot>>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, work_id: &str) -> Arc<Mutex<WorkSlot>> {
        self.slots
            .entry(work_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Create a pending task, enforcing at most one non-terminal task per
    /// work. A terminal predecessor is discarded here.
    pub fn create_task(
        &self,
        work_id: &str,
        user_id: i64,
        question: &str,
    ) -> Result<(String, CancellationToken), SupervisorError> {
        let slot = self.slot(work_id);
        let mut slot = slot.lock().expect("slot lock");

        if let Some(task) = &slot.task {
            if !task.status.is_terminal() {
                return Err(SupervisorError::AlreadyRunning);
            }
        }

        let task_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        slot.task = Some(TaskRecord {
            task_id: task_id.clone(),
            user_id,
            question: question.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
            outputs: VecDeque::new(),
            cancel: cancel.clone(),
        });

        log::info!("[{work_id}] 任务已创建: {task_id}");
        Ok((task_id, cancel))
    }

    pub fn start_task(&self, work_id: &str) -> Result<(), SupervisorError> {
        self.transition(work_id, TaskStatus::Running, None)
    }

    pub fn complete_task(&self, work_id: &str) -> Result<(), SupervisorError> {
        self.transition(work_id, TaskStatus::Completed, None)
    }

    pub fn fail_task(&self, work_id: &str, error: &str) -> Result<(), SupervisorError> {
        self.transition(work_id, TaskStatus::Failed, Some(error.to_string()))
    }

    /// Signal the running loop and mark the task cancelled.
    pub fn cancel_task(&self, work_id: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(work_id);
        let mut slot = slot.lock().expect("slot lock");
        let task = slot
            .task
            .as_mut()
            .ok_or_else(|| SupervisorError::NoTask(work_id.to_string()))?;

        if task.status.is_terminal() {
            return Err(SupervisorError::InvalidTransition(
                task.status,
                TaskStatus::Cancelled,
            ));
        }
        task.cancel.cancel();
        task.status = TaskStatus::Cancelled;
        task.ended_at = Some(Utc::now());
        log::info!("[{work_id}] 任务已取消: {}", task.task_id);
        Ok(())
    }

    fn transition(
        &self,
        work_id: &str,
        to: TaskStatus,
        error: Option<String>,
    ) -> Result<(), SupervisorError> {
        let slot = self.slot(work_id);
        let mut slot = slot.lock().expect("slot lock");
        let task = slot
            .task
            .as_mut()
            .ok_or_else(|| SupervisorError::NoTask(work_id.to_string()))?;

        let valid = matches!(
            (task.status, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        );
        if !valid {
            return Err(SupervisorError::InvalidTransition(task.status, to));
        }

        task.status = to;
        match to {
            TaskStatus::Running => task.started_at = Some(Utc::now()),
            _ => task.ended_at = Some(Utc::now()),
        }
        task.error = error;
        Ok(())
    }

    /// Append one stream event to the running task's bounded log and forward
    /// it to the attached connection, in that order.
    pub fn add_output(&self, work_id: &str, event: StreamEvent) {
        let slot = self.slot(work_id);
        let mut slot = slot.lock().expect("slot lock");

        if let Some(task) = slot.task.as_mut() {
            if !task.status.is_terminal() {
                if task.outputs.len() >= OUTPUT_LOG_CAP {
                    task.outputs.pop_front();
                }
                task.outputs.push_back(TaskOutput {
                    event: event.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        if let Some(connection) = &slot.connection {
            if connection.send(ServerFrame::from(event)).is_err() {
                slot.connection = None;
            }
        }
    }

    /// Send a control frame to the attached connection, if any.
    pub fn send_frame(&self, work_id: &str, frame: ServerFrame) {
        let slot = self.slot(work_id);
        let mut slot = slot.lock().expect("slot lock");
        if let Some(connection) = &slot.connection {
            if connection.send(frame).is_err() {
                slot.connection = None;
            }
        }
    }

    /// Attach a transport. The newest connection wins: any previous sender
    /// is dropped, which ends its writer loop. When a task is still running,
    /// its buffered events are replayed into the new connection before it
    /// goes live, all under the slot lock so live events cannot interleave.
    /// Returns the replayed task id, if any.
    pub fn attach_connection(
        &self,
        work_id: &str,
        sender: UnboundedSender<ServerFrame>,
    ) -> Option<String> {
        let slot = self.slot(work_id);
        let mut slot = slot.lock().expect("slot lock");

        let mut replayed = None;
        if let Some(task) = &slot.task {
            if task.status == TaskStatus::Running || task.status == TaskStatus::Pending {
                log::info!(
                    "[{work_id}] 检测到正在运行的任务: {}，恢复 {} 条历史输出",
                    task.task_id,
                    task.outputs.len()
                );
                let _ = sender.send(ServerFrame::reconnect(task.task_id.clone()));
                for output in &task.outputs {
                    let _ = sender.send(ServerFrame::from(output.event.clone()));
                }
                let _ = sender.send(ServerFrame::reconnect_complete());
                replayed = Some(task.task_id.clone());
            }
        }

        slot.connection = Some(sender);
        replayed
    }

    /// Detach only if `sender` is still the active connection.
    pub fn detach_connection(&self, work_id: &str, sender: &UnboundedSender<ServerFrame>) {
        let slot = self.slot(work_id);
        let mut slot = slot.lock().expect("slot lock");
        if let Some(current) = &slot.connection {
            if current.same_channel(sender) {
                slot.connection = None;
                log::info!("[{work_id}] WebSocket连接断开");
            }
        }
    }

    pub fn has_active_task(&self, work_id: &str) -> bool {
        let slot = self.slot(work_id);
        let slot = slot.lock().expect("slot lock");
        slot.task
            .as_ref()
            .map(|task| !task.status.is_terminal())
            .unwrap_or(false)
    }

    pub fn cancel_token(&self, work_id: &str) -> Option<CancellationToken> {
        let slot = self.slot(work_id);
        let slot = slot.lock().expect("slot lock");
        slot.task.as_ref().map(|task| task.cancel.clone())
    }

    pub fn status_view(&self, work_id: &str) -> TaskStatusView {
        let slot = self.slot(work_id);
        let slot = slot.lock().expect("slot lock");
        match &slot.task {
            Some(task) => TaskStatusView {
                has_task: true,
                task_id: Some(task.task_id.clone()),
                status: Some(task.status),
                question: Some(task.question.clone()),
                output_count: task.outputs.len(),
                error: task.error.clone(),
            },
            None => TaskStatusView {
                has_task: false,
                task_id: None,
                status: None,
                question: None,
                output_count: 0,
                error: None,
            },
        }
    }

    pub fn task_user(&self, work_id: &str) -> Option<i64> {
        let slot = self.slot(work_id);
        let slot = slot.lock().expect("slot lock");
        slot.task.as_ref().map(|task| task.user_id)
    }

    pub fn task_age(&self, work_id: &str) -> Option<chrono::Duration> {
        let slot = self.slot(work_id);
        let slot = slot.lock().expect("slot lock");
        slot.task
            .as_ref()
            .map(|task| Utc::now() - task.created_at)
    }
}

/// Per-work publisher handed to the persistent sink: event-log append and
/// live delivery stay synchronous with emission.
pub struct WorkPublisher {
    supervisor: Arc<TaskSupervisor>,
    work_id: String,
}

impl WorkPublisher {
    pub fn new(supervisor: Arc<TaskSupervisor>, work_id: impl Into<String>) -> Self {
        Self {
            supervisor,
            work_id: work_id.into(),
        }
    }
}

impl EventPublisher for WorkPublisher {
    fn publish(&self, event: StreamEvent) {
        self.supervisor.add_output(&self.work_id, event);
    }
}

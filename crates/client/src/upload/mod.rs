// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upload queue: admission, bounded-concurrency scheduling and task
//! lifecycle.
//!
//! Tasks move `pending -> uploading -> success | failed`. At most
//! `max_concurrent` tasks are uploading at once; a slot freed by any terminal
//! transition (or cancellation) is refilled with the earliest pending task.
//! Every mutation happens under one lock and republishes the queue snapshot
//! before the lock is released, so observers see transitions in order.
//!
//! Must be driven from inside a tokio runtime: starting a task spawns it.

pub mod task;
pub mod validate;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::wire::UploadResponse;
use crate::error::ClientError;
use crate::upload::task::{CandidateFile, TaskId, TaskState, UploadFile, UploadTask};
use crate::upload::validate::{Rejection, UploadPolicy};

/// Progress callback: `(bytes_sent, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Sends a single file and reports the server's per-file verdicts.
pub trait UploadTransport: Send + Sync + 'static {
    fn upload(
        &self,
        file: UploadFile,
        progress: ProgressFn,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse, ClientError>> + Send + '_>>;
}

/// Published view of the queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub tasks: Vec<UploadTask>,
    pub active_count: usize,
    pub max_concurrent: usize,
}

impl QueueSnapshot {
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    /// True when nothing is pending or uploading.
    pub fn is_idle(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_settled())
    }

    pub fn task(&self, id: TaskId) -> Option<&UploadTask> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

struct QueueInner {
    tasks: Vec<UploadTask>,
    active_count: usize,
    /// Cancellation handles for uploading tasks.
    running: HashMap<TaskId, CancellationToken>,
}

impl QueueInner {
    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}

/// Owner of all upload tasks.
pub struct UploadQueue {
    inner: Mutex<QueueInner>,
    policy: UploadPolicy,
    max_concurrent: usize,
    transport: Arc<dyn UploadTransport>,
    state_tx: watch::Sender<QueueSnapshot>,
    settled_tx: broadcast::Sender<()>,
    rejected_tx: broadcast::Sender<Vec<Rejection>>,
}

impl UploadQueue {
    pub fn new(
        policy: UploadPolicy,
        max_concurrent: usize,
        transport: Arc<dyn UploadTransport>,
    ) -> Arc<Self> {
        let max_concurrent = max_concurrent.max(1);
        let (state_tx, _) = watch::channel(QueueSnapshot {
            tasks: Vec::new(),
            active_count: 0,
            max_concurrent,
        });
        let (settled_tx, _) = broadcast::channel(64);
        let (rejected_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                tasks: Vec::new(),
                active_count: 0,
                running: HashMap::new(),
            }),
            policy,
            max_concurrent,
            transport,
            state_tx,
            settled_tx,
            rejected_tx,
        })
    }

    /// Queue state stream. New receivers see the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.state_tx.subscribe()
    }

    /// Fires once each time a task uploads successfully.
    pub fn settled(&self) -> broadcast::Receiver<()> {
        self.settled_tx.subscribe()
    }

    /// Each admission batch with at least one refused file.
    pub fn rejections(&self) -> broadcast::Receiver<Vec<Rejection>> {
        self.rejected_tx.subscribe()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.state_tx.borrow().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// End the queue's work whenever the session ends.
    ///
    /// Runs [`Self::cancel_all`] for every event on `ended`, as published by
    /// [`crate::token::TokenManager::session_ended`].
    pub fn drain_on_logout(self: &Arc<Self>, mut ended: broadcast::Receiver<()>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match ended.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
                let Some(queue) = weak.upgrade() else {
                    return;
                };
                info!("session ended, draining upload queue");
                queue.cancel_all();
            }
        });
    }

    /// Validate candidates and admit the acceptable ones as pending tasks.
    ///
    /// Refused files are published together on [`Self::rejections`] and never
    /// enter the queue. Returns the admitted tasks in input order.
    pub fn add_files(self: &Arc<Self>, candidates: Vec<CandidateFile>) -> Vec<UploadTask> {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for candidate in candidates {
            let reasons = self.policy.check(&candidate.name, candidate.size);
            if reasons.is_empty() {
                accepted.push(UploadTask::admit(candidate));
            } else {
                rejected.push(Rejection { name: candidate.name, reasons });
            }
        }

        if !rejected.is_empty() {
            for r in &rejected {
                warn!(file = %r.name, reasons = %r, "file rejected");
            }
            let _ = self.rejected_tx.send(rejected);
        }

        if !accepted.is_empty() {
            let mut inner = self.inner.lock();
            inner.tasks.extend(accepted.iter().cloned());
            debug!(admitted = accepted.len(), queued = inner.tasks.len(), "files admitted");
            self.publish(&inner);
        }

        self.process_queue();
        accepted
    }

    /// Start pending tasks, oldest first, until every slot is busy.
    ///
    /// No-op when no slot is free or nothing is pending.
    pub fn process_queue(self: &Arc<Self>) {
        let mut launches = Vec::new();
        {
            let mut inner = self.inner.lock();
            let slots = self.max_concurrent.saturating_sub(inner.active_count);
            if slots == 0 {
                return;
            }
            let starting: Vec<usize> = inner
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.state == TaskState::Pending)
                .map(|(i, _)| i)
                .take(slots)
                .collect();
            if starting.is_empty() {
                return;
            }
            for idx in starting {
                let task = &mut inner.tasks[idx];
                task.state = TaskState::Uploading;
                task.progress_percent = 0;
                task.last_error = None;
                task.attempt += 1;
                let launch = (task.id, task.attempt, task.upload_file(), CancellationToken::new());
                inner.running.insert(launch.0, launch.3.clone());
                inner.active_count += 1;
                launches.push(launch);
            }
            debug_assert!(inner.active_count <= self.max_concurrent);
            self.publish(&inner);
        }

        for (id, attempt, file, cancel) in launches {
            debug!(task = %id, file = %file.name, attempt, "upload starting");
            self.spawn_upload(id, attempt, file, cancel);
        }
    }

    fn spawn_upload(
        self: &Arc<Self>,
        id: TaskId,
        attempt: u32,
        file: UploadFile,
        cancel: CancellationToken,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let transport = Arc::clone(&self.transport);
        let name = file.name.clone();
        let progress: ProgressFn = {
            let weak = weak.clone();
            Arc::new(move |sent, total| {
                if let Some(queue) = weak.upgrade() {
                    queue.set_progress(id, attempt, percent(sent, total));
                }
            })
        };
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = %id, "upload abandoned");
                    return;
                }
                r = transport.upload(file, progress) => r,
            };
            let outcome = match result {
                Ok(resp) => resp.outcome_for(&name),
                Err(e) => Err(e.to_string()),
            };
            if let Some(queue) = weak.upgrade() {
                queue.complete(id, attempt, outcome);
            }
        });
    }

    /// Apply a terminal result for one upload attempt, then backfill.
    ///
    /// Ignored unless `id` is still queued, uploading, and on `attempt`.
    pub(crate) fn complete(self: &Arc<Self>, id: TaskId, attempt: u32, outcome: Result<(), String>) {
        let succeeded = outcome.is_ok();
        {
            let mut inner = self.inner.lock();
            let Some(idx) = inner.position(id) else {
                debug!(task = %id, "ignoring completion for removed task");
                return;
            };
            let task = &mut inner.tasks[idx];
            if task.state != TaskState::Uploading || task.attempt != attempt {
                debug!(task = %id, attempt, "ignoring stale completion");
                return;
            }
            match outcome {
                Ok(()) => {
                    task.state = TaskState::Success;
                    task.progress_percent = 100;
                    info!(task = %id, file = %task.original_name, "upload succeeded");
                }
                Err(e) => {
                    warn!(task = %id, file = %task.original_name, err = %e, "upload failed");
                    task.state = TaskState::Failed;
                    task.last_error = Some(e);
                }
            }
            inner.running.remove(&id);
            inner.active_count = inner.active_count.saturating_sub(1);
            self.publish(&inner);
        }
        if succeeded {
            let _ = self.settled_tx.send(());
        }
        self.process_queue();
    }

    fn set_progress(&self, id: TaskId, attempt: u32, percent: u8) {
        let mut inner = self.inner.lock();
        let Some(idx) = inner.position(id) else {
            return;
        };
        let task = &mut inner.tasks[idx];
        // A body resent after a 401 restarts from zero; never move backwards.
        if task.state != TaskState::Uploading
            || task.attempt != attempt
            || percent <= task.progress_percent
        {
            return;
        }
        task.progress_percent = percent;
        self.publish(&inner);
    }

    /// Remove a task in any state. An in-flight upload is abandoned locally.
    pub fn cancel(self: &Arc<Self>, id: TaskId) -> bool {
        {
            let mut inner = self.inner.lock();
            let Some(idx) = inner.position(id) else {
                return false;
            };
            let task = inner.tasks.remove(idx);
            if task.state == TaskState::Uploading {
                inner.active_count = inner.active_count.saturating_sub(1);
            }
            if let Some(token) = inner.running.remove(&id) {
                token.cancel();
            }
            debug!(task = %id, state = %task.state, "task cancelled");
            self.publish(&inner);
        }
        self.process_queue();
        true
    }

    /// Put a failed task back in line. Returns false for any other state.
    pub fn retry(self: &Arc<Self>, id: TaskId) -> bool {
        {
            let mut inner = self.inner.lock();
            let Some(idx) = inner.position(id) else {
                return false;
            };
            let task = &mut inner.tasks[idx];
            if task.state != TaskState::Failed {
                return false;
            }
            task.state = TaskState::Pending;
            task.progress_percent = 0;
            task.last_error = None;
            debug!(task = %id, "task requeued");
            self.publish(&inner);
        }
        self.process_queue();
        true
    }

    /// Drop every task and abandon all in-flight uploads.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for (_, token) in inner.running.drain() {
            token.cancel();
        }
        inner.tasks.clear();
        inner.active_count = 0;
        self.publish(&inner);
    }

    /// Remove every succeeded or failed task.
    pub fn clear_settled(&self) {
        let mut inner = self.inner.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|t| !t.state.is_settled());
        if inner.tasks.len() != before {
            self.publish(&inner);
        }
    }

    fn publish(&self, inner: &QueueInner) {
        self.state_tx.send_replace(QueueSnapshot {
            tasks: inner.tasks.clone(),
            active_count: inner.active_count,
            max_concurrent: self.max_concurrent,
        });
    }
}

/// Whole-number percentage of `sent` over `total`; an empty body is 100.
pub fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (sent.min(total) * 100 / total) as u8
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;

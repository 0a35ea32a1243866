//! Scan-mode scheduler: one cron job per scan mode, feeding a coalescing FIFO.
//!
//! # Example
//!
//! ```
//! use north_engine::{Scheduler, ScanMode, TaskEntry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (scheduler, mut next) = Scheduler::new("north-historian");
//!
//! // Invalid cron: logged, no job installed
//! assert!(scheduler.create_cron_job(&ScanMode::new("bad", "Bad", "nope")).is_err());
//!
//! scheduler.create_cron_job(&ScanMode::new("every-10s", "Every 10s", "*/10 * * * * *")).unwrap();
//! assert!(scheduler.has_job("every-10s"));
//!
//! // Triggers coalesce by id
//! assert!(scheduler.add_to_queue(TaskEntry::ValueTrigger));
//! assert!(!scheduler.add_to_queue(TaskEntry::ValueTrigger));
//! assert!(next.recv().await.is_some());
//!
//! scheduler.stop();
//! assert!(scheduler.queue().is_empty());
//! # }
//! ```

pub mod cron_job;
pub mod task_queue;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::model::ScanMode;

pub use cron_job::{next_fire, parse_cron};
pub use task_queue::{RunFlag, TaskEntry, TaskQueue, FILE_TRIGGER_ID, VALUE_TRIGGER_ID};

pub struct Scheduler {
    connector_id: String,
    queue: Arc<TaskQueue>,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    /// Returns the scheduler and the receiving end of its "next" signal.
    pub fn new(connector_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<()>) {
        let connector_id = connector_id.into();
        let (queue, next) = TaskQueue::new(connector_id.clone());
        let scheduler = Self {
            connector_id,
            queue: Arc::new(queue),
            jobs: Mutex::new(HashMap::new()),
        };
        (scheduler, next)
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Install (or replace) the cron job of a scan mode.
    ///
    /// Any existing job for the id is removed first. An invalid expression is
    /// logged and leaves no job behind.
    pub fn create_cron_job(&self, scan_mode: &ScanMode) -> Result<(), EngineError> {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.remove(&scan_mode.id) {
            debug!(connector = %self.connector_id, scan_mode = %scan_mode.id, "Removing existing cron job");
            existing.abort();
        }

        let schedule = parse_cron(&scan_mode.cron).map_err(|e| {
            error!(
                connector = %self.connector_id,
                scan_mode = %scan_mode.id,
                error = %e,
                "Cron job not created"
            );
            e
        })?;

        info!(
            connector = %self.connector_id,
            scan_mode = %scan_mode.name,
            cron = %scan_mode.cron,
            "Creating cron job"
        );
        let handle = cron_job::spawn_cron_job(scan_mode.clone(), schedule, Arc::clone(&self.queue));
        jobs.insert(scan_mode.id.clone(), handle);
        Ok(())
    }

    /// Re-create the job of an updated scan mode, if this scheduler runs one.
    pub fn update_scan_mode(&self, scan_mode: &ScanMode) -> Result<(), EngineError> {
        if !self.has_job(&scan_mode.id) {
            return Ok(());
        }
        self.create_cron_job(scan_mode)
    }

    pub fn remove_cron_job(&self, scan_mode_id: &str) {
        if let Some(job) = self.jobs.lock().remove(scan_mode_id) {
            job.abort();
        }
    }

    #[must_use]
    pub fn has_job(&self, scan_mode_id: &str) -> bool {
        self.jobs.lock().contains_key(scan_mode_id)
    }

    pub fn add_to_queue(&self, entry: TaskEntry) -> bool {
        self.queue.add(entry)
    }

    /// Abort every cron job and clear the pending queue.
    pub fn stop(&self) {
        let mut jobs = self.jobs.lock();
        for (_, job) in jobs.drain() {
            job.abort();
        }
        self.queue.clear();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, job) in self.jobs.get_mut().drain() {
            job.abort();
        }
    }
}

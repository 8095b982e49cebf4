//! Background worker pools.
//!
//! Flushes run on a high-priority pool and compactions on a low-priority
//! one, so a long compaction never delays a flush. Jobs are queued on a
//! crossbeam channel shared by the workers of a pool; workers only hold a
//! weak reference to the database.

use crate::error::Result;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Work item handed to a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    /// Flush the immutable memtables of a column family.
    Flush(u32),
    /// Run automatic compactions until no level is over its trigger.
    Compaction,
    /// Stop one worker.
    Shutdown,
}

/// A named set of worker threads draining one job queue.
pub(crate) struct WorkerPool {
    name: &'static str,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = unbounded();
        Self { name, tx, rx, workers: Mutex::new(Vec::new()) }
    }

    /// Spawns `threads` workers running `handler` for every job.
    pub fn start<F>(&self, threads: usize, handler: F) -> Result<()>
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let mut workers = self.workers.lock();
        for i in 0..threads {
            let rx = self.rx.clone();
            let handler = Arc::clone(&handler);
            let name = self.name;
            let handle = thread::Builder::new().name(format!("versadb-{}-{}", name, i)).spawn(move || {
                log::debug!("{} worker {} started", name, i);
                while let Ok(job) = rx.recv() {
                    if job == Job::Shutdown {
                        break;
                    }
                    handler(job);
                }
                log::debug!("{} worker {} exiting", name, i);
            })?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Queues a job. Jobs queued after shutdown are dropped.
    pub fn schedule(&self, job: Job) {
        if self.workers.lock().is_empty() {
            log::debug!("{} pool is not running, dropping {:?}", self.name, job);
            return;
        }
        // The receiver lives as long as the pool
        let _ = self.tx.send(job);
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Stops every worker after the jobs already queued and waits for them.
    pub fn shutdown(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for _ in 0..workers.len() {
            let _ = self.tx.send(Job::Shutdown);
        }
        for handle in workers {
            if handle.join().is_err() {
                log::error!("{} worker panicked", self.name);
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.lock().len())
            .field("queued", &self.queued())
            .finish()
    }
}

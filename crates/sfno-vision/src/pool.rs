// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{VisualizationError, VisualizationResult};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread;
use tracing::trace;

type RenderTask = Box<dyn FnOnce() + Send + 'static>;

enum PoolMessage {
    Run(RenderTask),
    Shutdown,
}

/// Fixed set of named worker threads draining a shared job queue.
///
/// Tasks are fire-and-forget; callers hand results back through their own
/// channels. Dropping the pool lets queued tasks finish before the workers
/// exit.
pub struct RenderPool {
    sender: Sender<PoolMessage>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl RenderPool {
    pub fn new(workers: usize, thread_name: &str) -> VisualizationResult<Self> {
        let workers = workers.max(1);
        let (sender, receiver) = unbounded::<PoolMessage>();
        let mut pool = Self {
            sender,
            handles: Vec::with_capacity(workers),
        };
        for idx in 0..workers {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{thread_name}-{idx}"))
                .spawn(move || worker_loop(rx))
                .map_err(VisualizationError::Spawn)?;
            pool.handles.push(handle);
        }
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn submit<F>(&self, task: F) -> VisualizationResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(PoolMessage::Run(Box::new(task)))
            .map_err(|_| VisualizationError::PoolClosed)
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        for _ in 0..self.handles.len() {
            let _ = self.sender.send(PoolMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for RenderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPool")
            .field("workers", &self.handles.len())
            .field("queued", &self.sender.len())
            .finish()
    }
}

fn worker_loop(receiver: Receiver<PoolMessage>) {
    let current = thread::current();
    while let Ok(message) = receiver.recv() {
        match message {
            PoolMessage::Run(task) => {
                trace!(worker = current.name(), "render task");
                task();
            }
            PoolMessage::Shutdown => break,
        }
    }
}

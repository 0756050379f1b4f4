//! Fixed-size worker pool for subprocess-backed executions and other
//! off-main work.
use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use tracing::{debug, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded pool of worker threads draining one shared job queue.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                thread::spawn(move || {
                    loop {
                        let job = {
                            let guard = receiver.lock().unwrap();
                            guard.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => {
                                debug!("Worker {index} shutting down");
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        info!("Worker pool started with {size} threads");
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queues a job; it runs as soon as a worker is free.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Closes the queue and joins every worker after it drains.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

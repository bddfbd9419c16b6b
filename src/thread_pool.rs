//! A pool of worker threads fed from a shared queue, started lazily as work
//! arrives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    name: &'static str,
    sender: Option<mpsc::Sender<Job>>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    /// Upper bound on worker threads; None grows one thread per
    /// outstanding job.
    limit: Option<usize>,
    /// Jobs submitted and not yet finished.
    busy: Arc<AtomicUsize>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(name: &'static str, limit: Option<usize>) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        ThreadPool {
            name,
            sender: Some(sender),
            receiver: Arc::new(Mutex::new(receiver)),
            limit: limit.map(|n| n.max(1)),
            busy: Arc::new(AtomicUsize::new(0)),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn execute<F: FnOnce() + Send + 'static>(&self, f: F) {
        let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(sender) = &self.sender {
            // The receiver lives as long as the pool, so this cannot fail.
            let _ = sender.send(Box::new(f));
        }
        let mut workers = self.workers.lock().unwrap();
        let wanted = match self.limit {
            Some(limit) => busy.min(limit),
            None => busy,
        };
        while workers.len() < wanted {
            let receiver = self.receiver.clone();
            let busy = self.busy.clone();
            let worker = std::thread::Builder::new()
                .name(format!("{}-{}", self.name, workers.len()))
                .spawn(move || loop {
                    let message = receiver.lock().unwrap().recv();
                    match message {
                        Ok(job) => {
                            job();
                            busy.fetch_sub(1, Ordering::SeqCst);
                        }
                        Err(_) => break,
                    }
                });
            match worker {
                Ok(worker) => workers.push(worker),
                // Existing workers still drain the queue.
                Err(_) if !workers.is_empty() => break,
                Err(err) => panic!("spawn {} worker: {}", self.name, err),
            }
        }
    }

    pub fn threads(&self) -> usize {
        self.workers.lock().unwrap().len()
    }
}

impl Drop for ThreadPool {
    /// Closing the queue lets workers finish everything already submitted
    /// before they see the disconnect and exit.
    fn drop(&mut self) {
        self.sender.take();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_queue_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new("test", Some(2));
            for _ in 0..50 {
                let count = count.clone();
                pool.execute(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
            assert!(pool.threads() <= 2);
        }
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn unbounded_pool_runs_blocking_jobs_concurrently() {
        let pool = ThreadPool::new("test", None);
        let (tx, rx) = mpsc::channel();
        let (release, wait) = mpsc::channel::<()>();
        let wait = Arc::new(Mutex::new(wait));
        // The first job blocks until the second has run.
        {
            let wait = wait.clone();
            pool.execute(move || {
                let _ = wait.lock().unwrap().recv();
            });
        }
        pool.execute(move || {
            tx.send(()).unwrap();
        });
        rx.recv().unwrap();
        release.send(()).unwrap();
    }
}

use std::{
    io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

use log::{debug, warn};
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("thread pool is shut down")]
    ShutDown,
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),
}

/// A worker pool that grows on demand up to `max_workers`.
///
/// Sessions hold a worker for the whole life of their connection, so a new
/// worker is spawned whenever every existing one is busy. Jobs submitted past
/// the limit queue until a worker frees up.
#[derive(Debug)]
pub struct ThreadPool {
    max_workers: usize,
    workers: Mutex<Vec<Worker>>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    pending: Arc<AtomicUsize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ThreadPool {
    pub fn new(max_workers: usize) -> Self {
        assert!(max_workers > 0);

        let (sender, receiver) = mpsc::channel();
        Self {
            max_workers,
            workers: Mutex::new(Vec::new()),
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn execute<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = lock(&self.sender).clone().ok_or(PoolError::ShutDown)?;

        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut workers = lock(&self.workers);
            if pending > workers.len() && workers.len() < self.max_workers {
                let id = workers.len();
                match Worker::spawn(id, Arc::clone(&self.receiver), Arc::clone(&self.pending)) {
                    Ok(worker) => workers.push(worker),
                    Err(e) => {
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                        return Err(e.into());
                    }
                }
            }
        }

        sender.send(Box::new(f)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            PoolError::ShutDown
        })
    }

    pub fn workers(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Stops accepting jobs and waits for every worker to finish its current
    /// one. Queued jobs still run.
    pub fn shutdown(&self) {
        drop(lock(&self.sender).take());

        let workers: Vec<Worker> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            debug!("shutting down worker {}", worker.id);
            if worker.thread.join().is_err() {
                warn!("worker {} panicked", worker.id);
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn spawn(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
        pending: Arc<AtomicUsize>,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("floe-worker-{id}"))
            .spawn(move || {
                loop {
                    let msg = lock(&receiver).recv();
                    match msg {
                        Ok(job) => {
                            debug!("worker {id} handling a connection");
                            job();
                            pending.fetch_sub(1, Ordering::SeqCst);
                        }
                        Err(_) => {
                            debug!("worker {id} disconnected");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self { id, thread })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    #[test]
    fn grows_up_to_limit() {
        let pool = ThreadPool::new(2);
        assert_eq!(pool.workers(), 0);

        let barrier = Arc::new(Barrier::new(3));
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            pool.execute(move || {
                barrier.wait();
            })
            .unwrap();
        }
        assert_eq!(pool.workers(), 2);

        barrier.wait();
        pool.shutdown();
    }

    #[test]
    fn queued_jobs_run_before_shutdown_completes() {
        let pool = ThreadPool::new(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap()).unwrap();
        }
        pool.shutdown();

        let mut seen: Vec<i32> = rx.try_iter().collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(pool.workers(), 0);
    }

    #[test]
    fn rejects_jobs_after_shutdown() {
        let pool = ThreadPool::new(1);
        pool.shutdown();
        assert!(matches!(pool.execute(|| {}), Err(PoolError::ShutDown)));
    }
}

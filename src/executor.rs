use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs data-layer calls off the UI thread. Results travel back over the
/// channel each job captured; nothing here touches controller state.
pub trait Executor: Send + Sync {
    fn spawn(&self, job: Job);
}

pub type SharedExecutor = Arc<dyn Executor>;

struct Inner {
    jobs: Sender<Job>,
    stop: Sender<()>,
}

/// Fixed set of worker threads pulling jobs from one queue.
pub struct WorkerPool {
    inner: Arc<Inner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 { 2 } else { workers };
        let (job_tx, job_rx) = unbounded::<Job>();
        let (stop_tx, stop_rx) = unbounded::<()>();

        let inner = Arc::new(Inner {
            jobs: job_tx,
            stop: stop_tx,
        });

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            handles.push(thread::spawn(move || worker(rx_jobs, rx_stop)));
        }

        Self {
            inner,
            handles: Mutex::new(handles),
        }
    }

    fn shutdown(&self) {
        let mut handles = self.handles.lock();
        for _ in handles.iter() {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Executor for WorkerPool {
    fn spawn(&self, job: Job) {
        if self.inner.jobs.send(job).is_err() {
            tracing::warn!("executor: worker pool is shut down, job dropped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker(jobs: Receiver<Job>, stop: Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(jobs) -> msg => {
                match msg {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            }
        }
    }
}

/// Queues jobs until the caller runs them, so tests decide exactly when a
/// "remote" call resolves.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Job>>,
}

impl ManualExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the oldest queued job. Returns false when the queue was empty.
    pub fn run_next(&self) -> bool {
        let job = self.queue.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs queued jobs, including ones queued while running, until empty.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Executor for ManualExecutor {
    fn spawn(&self, job: Job) {
        self.queue.lock().push_back(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn worker_pool_runs_jobs() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = unbounded();
        for i in 0..4 {
            let tx = tx.clone();
            pool.spawn(Box::new(move || {
                let _ = tx.send(i);
            }));
        }
        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn manual_executor_defers_until_run() {
        let exec = ManualExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        exec.spawn(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(exec.pending(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(exec.run_all(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!exec.run_next());
    }
}

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cycledag::errors::Result;
use cycledag::exec::{ExecutorBackend, LocalJob};

/// A fake executor that:
/// - records which jobs were "run", in start order
/// - returns a canned exit code per job (0 unless configured)
/// - tracks the highest number of jobs running at the same time.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    executed: Arc<Mutex<Vec<String>>>,
    exit_codes: Arc<HashMap<String, i32>>,
    not_executable: Arc<Vec<String>>,
    delay: Duration,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_code(mut self, job: &str, code: i32) -> Self {
        let mut codes = (*self.exit_codes).clone();
        codes.insert(job.to_string(), code);
        self.exit_codes = Arc::new(codes);
        self
    }

    pub fn with_not_executable(mut self, job: &str) -> Self {
        let mut jobs = (*self.not_executable).clone();
        jobs.push(job.to_string());
        self.not_executable = Arc::new(jobs);
        self
    }

    /// Simulated runtime of every job.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn run_job(&self, job: LocalJob) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + '_>> {
        Box::pin(async move {
            {
                let mut guard = self.executed.lock().unwrap();
                guard.push(job.name.clone());
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(self.exit_codes.get(&job.name).copied().unwrap_or(0))
        })
    }

    fn can_execute(&self, job: &LocalJob) -> bool {
        !self.not_executable.contains(&job.name)
    }
}

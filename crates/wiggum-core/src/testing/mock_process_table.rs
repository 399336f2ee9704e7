//! Fixed process table for watchdog and termination tests.

use crate::process_tree::{ProcessInfo, ProcessTable};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A process table with a fixed set of rows. Killed processes disappear from
/// later snapshots.
#[derive(Debug, Clone, Default)]
pub struct FixedProcessTable {
    processes: Arc<Mutex<Vec<ProcessInfo>>>,
    killed: Arc<Mutex<Vec<u32>>>,
}

impl FixedProcessTable {
    pub fn new(processes: Vec<ProcessInfo>) -> Self {
        Self {
            processes: Arc::new(Mutex::new(processes)),
            killed: Arc::default(),
        }
    }

    /// Adds a row; `argv` is split on whitespace.
    pub fn with(self, pid: u32, parent: u32, argv: &str) -> Self {
        lock(&self.processes).push(ProcessInfo {
            pid,
            parent: Some(parent),
            argv: argv.split_whitespace().map(str::to_string).collect(),
        });
        self
    }

    /// PIDs killed so far, in order.
    pub fn killed(&self) -> Vec<u32> {
        lock(&self.killed).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessTable for FixedProcessTable {
    fn snapshot(&self) -> Vec<ProcessInfo> {
        lock(&self.processes).clone()
    }

    fn kill(&self, pid: u32) -> bool {
        let mut processes = lock(&self.processes);
        let before = processes.len();
        processes.retain(|p| p.pid != pid);
        let existed = processes.len() != before;
        if existed {
            lock(&self.killed).push(pid);
        }
        existed
    }
}

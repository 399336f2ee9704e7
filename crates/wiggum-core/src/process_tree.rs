//! Process table inspection and tree termination.
//!
//! The watchdog needs every descendant of the agent with its full argv, and
//! termination needs to reach grandchildren that left the agent's process
//! group. Both go through [`ProcessTable`] so tests can substitute a fixed
//! table.
//!
//! PIDs 0 and 1 and this process itself are never signalled.

use std::collections::{HashMap, HashSet, VecDeque};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, warn};

/// One row of a process table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    pub argv: Vec<String>,
}

impl ProcessInfo {
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Source of process snapshots and a way to kill one process.
pub trait ProcessTable: Send + Sync {
    fn snapshot(&self) -> Vec<ProcessInfo>;

    /// Sends SIGKILL to `pid`. Returns false if it was already gone or could
    /// not be signalled.
    fn kill(&self, pid: u32) -> bool;
}

fn is_protected(pid: u32) -> bool {
    pid == 0 || pid == 1 || pid == std::process::id()
}

/// Descendants of `root` in breadth-first order (parents before children).
///
/// Iterative with an owned worklist; a visited set guards against PID reuse
/// producing a cycle.
pub fn descendants(processes: &[ProcessInfo], root: u32) -> Vec<ProcessInfo> {
    let mut children: HashMap<u32, Vec<&ProcessInfo>> = HashMap::new();
    for process in processes {
        if let Some(parent) = process.parent
            && parent != process.pid
        {
            children.entry(parent).or_default().push(process);
        }
    }

    let mut found = Vec::new();
    let mut visited = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        let Some(kids) = children.get(&pid) else {
            continue;
        };
        for child in kids {
            if visited.insert(child.pid) {
                found.push((*child).clone());
                queue.push_back(child.pid);
            }
        }
    }
    found
}

/// Kills every descendant of `root`, leaves first. Returns how many were
/// signalled. `root` itself is left to the caller.
pub fn kill_descendants(table: &dyn ProcessTable, root: u32) -> usize {
    let snapshot = table.snapshot();
    let mut tree = descendants(&snapshot, root);
    tree.reverse();
    tree.iter()
        .filter(|p| !is_protected(p.pid))
        .filter(|p| table.kill(p.pid))
        .count()
}

/// The live OS process table, read through `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Vec<ProcessInfo> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                argv: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
            })
            .collect()
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if is_protected(pid) {
            warn!(pid, "Refusing to signal protected PID");
            return false;
        }
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid, "Sent SIGKILL");
                true
            }
            Err(Errno::ESRCH) => {
                debug!(pid, "Process already exited");
                false
            }
            Err(e) => {
                warn!(pid, "Failed to kill process: {}", e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&self, pid: u32) -> bool {
        if is_protected(pid) {
            return false;
        }
        let mut system = System::new();
        let target = sysinfo::Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        system.process(target).is_some_and(sysinfo::Process::kill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn proc(pid: u32, parent: u32, argv: &[&str]) -> ProcessInfo {
        ProcessInfo {
            pid,
            parent: Some(parent),
            argv: argv.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    #[derive(Default)]
    struct FakeTable {
        processes: Vec<ProcessInfo>,
        killed: Mutex<Vec<u32>>,
    }

    impl ProcessTable for FakeTable {
        fn snapshot(&self) -> Vec<ProcessInfo> {
            self.processes.clone()
        }

        fn kill(&self, pid: u32) -> bool {
            self.killed.lock().unwrap().push(pid);
            true
        }
    }

    #[test]
    fn test_descendants_bfs_order() {
        let table = vec![
            proc(10, 1, &["agent"]),
            proc(20, 10, &["bash"]),
            proc(21, 10, &["node"]),
            proc(30, 20, &["python3"]),
            proc(99, 1, &["unrelated"]),
        ];
        let pids: Vec<_> = descendants(&table, 10).iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![20, 21, 30]);
    }

    #[test]
    fn test_descendants_tolerates_cycles_and_self_parents() {
        let table = vec![
            proc(10, 1, &["agent"]),
            proc(20, 30, &["a"]),
            proc(30, 20, &["b"]),
            proc(40, 40, &["self"]),
            proc(50, 10, &["child"]),
            proc(10, 50, &["reused"]),
        ];
        let pids: Vec<_> = descendants(&table, 10).iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![50]);
    }

    #[test]
    fn test_kill_descendants_leaves_first() {
        let table = FakeTable {
            processes: vec![
                proc(10, 5, &["agent"]),
                proc(20, 10, &["bash"]),
                proc(30, 20, &["python3"]),
            ],
            ..FakeTable::default()
        };
        assert_eq!(kill_descendants(&table, 10), 2);
        assert_eq!(*table.killed.lock().unwrap(), vec![30, 20]);
    }

    #[test]
    fn test_protected_pids_are_skipped() {
        let table = FakeTable {
            processes: vec![proc(1, 0, &["init"])],
            ..FakeTable::default()
        };
        assert_eq!(kill_descendants(&table, 0), 0);
        assert!(table.killed.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_table_sees_spawned_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let me = std::process::id();

        let snapshot = SystemProcessTable.snapshot();
        let found = descendants(&snapshot, me)
            .into_iter()
            .find(|p| p.pid == child.id());
        assert!(found.is_some_and(|p| p.argv.first().is_some_and(|a| a.ends_with("sleep"))));

        assert!(SystemProcessTable.kill(child.id()));
        let _ = child.wait();
    }
}

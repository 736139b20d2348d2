//! Process-tree inspection used to unstick a wedged BLE helper.
//!
//! Lookups are always scoped to the descendants of a given root pid, so a
//! helper belonging to another program is never signalled.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use thiserror::Error;

/// One entry of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    /// Short command name (`comm`), at most 15 bytes on Linux
    pub name: String,
}

/// Errors from locating or terminating the helper process.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("no process matching '{pattern}' below pid {root}")]
    NotFound { pattern: String, root: u32 },
    #[error("failed to read process table: {0}")]
    Io(#[from] io::Error),
    #[error("failed to terminate pid {pid}: {source}")]
    Terminate { pid: u32, source: io::Error },
}

/// Operating-system process capability.
pub trait ProcessTable: Send + Sync {
    /// All processes below `root` (children, grandchildren, ...), excluding
    /// `root` itself.
    fn descendants(&self, root: u32) -> io::Result<Vec<ProcessInfo>>;

    /// Send a termination request to `pid`.
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Select the descendants of `root` from a flat process listing.
pub fn collect_descendants(processes: &[ProcessInfo], root: u32) -> Vec<ProcessInfo> {
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut found = Vec::new();

    while let Some(parent) = queue.pop_front() {
        for p in processes.iter().filter(|p| p.ppid == parent) {
            if seen.insert(p.pid) {
                queue.push_back(p.pid);
                found.push(p.clone());
            }
        }
    }

    found
}

/// Find the pid of the helper named like `pattern` below `root`.
pub fn find_helper(
    table: &dyn ProcessTable,
    root: u32,
    pattern: &str,
) -> Result<u32, LookupError> {
    table
        .descendants(root)?
        .into_iter()
        .find(|p| p.name.contains(pattern))
        .map(|p| p.pid)
        .ok_or_else(|| LookupError::NotFound {
            pattern: pattern.to_string(),
            root,
        })
}

/// Locate and terminate the helper below `root`, returning its pid.
pub fn kill_helper(
    table: &dyn ProcessTable,
    root: u32,
    pattern: &str,
) -> Result<u32, LookupError> {
    let pid = find_helper(table, root, pattern)?;
    table
        .terminate(pid)
        .map_err(|source| LookupError::Terminate { pid, source })?;
    Ok(pid)
}

/// Parse the leading fields of `/proc/<pid>/stat`.
///
/// The command name is wrapped in parentheses and may itself contain spaces
/// or parentheses, so the split happens at the last `)`.
fn parse_stat(line: &str) -> Option<ProcessInfo> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    let pid = line[..open].trim().parse().ok()?;
    let name = line.get(open + 1..close)?.to_string();
    let mut rest = line.get(close + 1..)?.split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some(ProcessInfo { pid, ppid, name })
}

/// [`ProcessTable`] backed by Linux procfs and `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcFs;

impl ProcFs {
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        let mut processes = Vec::new();
        for entry in fs::read_dir("/proc")? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(pid) = file_name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes can exit between readdir and read.
            let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
                continue;
            };
            if let Some(info) = parse_stat(&stat) {
                processes.push(info);
            }
        }
        Ok(processes)
    }
}

impl ProcessTable for ProcFs {
    fn descendants(&self, root: u32) -> io::Result<Vec<ProcessInfo>> {
        Ok(collect_descendants(&self.list()?, root))
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

//! Containment of job process trees on the host.
//!
//! A job can leave its process group with `setsid`, so killing the group is
//! not enough. On Linux the service registers as a child subreaper and every
//! job leader starts its own session and becomes a subreaper as well:
//!
//! - while a leader lives, orphans inside its job are re-parented to it and
//!   stay reachable by walking `/proc` down from the leader;
//! - once it is gone they are re-parented to the service, where they are told
//!   apart from the service's own helper processes by their session id.
//!
//! Other platforms fall back to killing the process group.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Pids of job leaders that are still running. Sweeps never touch these.
static LEADERS: Mutex<BTreeSet<u32>> = Mutex::new(BTreeSet::new());

/// Pause between orphan sweeps while killed processes wind down
const SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Kill passes over a leader's tree; each pass catches children forked
/// while the previous one was signalling
#[cfg(target_os = "linux")]
const KILL_PASSES: usize = 8;

fn leaders() -> std::sync::MutexGuard<'static, BTreeSet<u32>> {
    LEADERS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Make the service the reaper of last resort for job descendants.
#[cfg(target_os = "linux")]
pub(crate) fn become_subreaper() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        if let Err(e) = set_child_subreaper() {
            warn!(
                error = %e,
                "Failed to register as child subreaper; detached job processes may escape"
            );
        } else {
            debug!("Registered as child subreaper");
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn become_subreaper() {}

#[cfg(target_os = "linux")]
fn set_child_subreaper() -> std::io::Result<()> {
    let one: libc::c_ulong = 1;
    let zero: libc::c_ulong = 0;
    // SAFETY: PR_SET_CHILD_SUBREAPER only flips a flag on the calling process
    // and is async-signal-safe.
    if unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, one, zero, zero, zero) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Start the job leader in a session of its own and as a subreaper for
/// everything it spawns.
#[cfg(target_os = "linux")]
pub(crate) fn prepare_leader(cmd: &mut Command) {
    // SAFETY: the closure runs in the forked child before exec and only calls
    // setsid and prctl, both async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            set_child_subreaper()
        });
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn prepare_leader(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
pub(crate) fn prepare_leader(_cmd: &mut Command) {}

/// Spawn a job leader and record it before any sweep can see it.
pub(crate) fn spawn_leader(cmd: &mut Command) -> std::io::Result<Child> {
    let mut live = leaders();
    let child = cmd.spawn()?;
    if let Some(pid) = child.id() {
        live.insert(pid);
    }
    Ok(child)
}

/// Stop protecting a leader once it has been reaped.
pub(crate) fn forget_leader(pid: u32) {
    leaders().remove(&pid);
}

/// SIGKILL a leader and every process below it.
pub(crate) fn kill_tree(leader: u32) {
    #[cfg(target_os = "linux")]
    for _ in 0..KILL_PASSES {
        let procs = proc::snapshot();
        let live: Vec<u32> = proc::subtree(leader, &procs)
            .iter()
            .filter(|p| !p.is_zombie())
            .map(|p| p.pid)
            .collect();
        if live.is_empty() {
            break;
        }
        for pid in live {
            send_kill(pid);
        }
    }

    #[cfg(unix)]
    if let Ok(pgid) = libc::pid_t::try_from(leader) {
        // ESRCH just means the group is already gone
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    let _ = leader;
}

/// Kill and reap job processes that outlived their leader, until none are
/// left or `grace` runs out. Returns false if some were still around.
pub(crate) async fn reap_orphans(grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let found = tokio::task::spawn_blocking(sweep_orphans)
            .await
            .unwrap_or(0);
        if found == 0 {
            return true;
        }
        debug!(orphans = found, "Killed detached job processes");
        if tokio::time::Instant::now() >= deadline {
            warn!(orphans = found, "Detached job processes are still exiting");
            return false;
        }
        tokio::time::sleep(SWEEP_INTERVAL).await;
    }
}

/// One sweep over the service's children. Returns how many orphans it saw.
#[cfg(target_os = "linux")]
fn sweep_orphans() -> usize {
    let me = std::process::id();
    // SAFETY: getsid(0) has no preconditions.
    let own_session = unsafe { libc::getsid(0) };

    let live = leaders();
    let procs = proc::snapshot();
    let orphans: Vec<proc::ProcStat> = procs
        .iter()
        .filter(|p| p.ppid == me && p.session != own_session && !live.contains(&p.pid))
        .copied()
        .collect();

    for orphan in &orphans {
        for p in proc::subtree(orphan.pid, &procs) {
            if !p.is_zombie() {
                send_kill(p.pid);
            }
        }
    }
    drop(live);

    for orphan in &orphans {
        if let Ok(pid) = libc::pid_t::try_from(orphan.pid) {
            let mut status = 0;
            // SAFETY: the orphan is our child; WNOHANG never blocks.
            unsafe {
                libc::waitpid(pid, &mut status, libc::WNOHANG);
            }
        }
    }
    orphans.len()
}

#[cfg(not(target_os = "linux"))]
fn sweep_orphans() -> usize {
    0
}

/// Highest CPU time used by any single process in the leader's tree.
#[cfg(target_os = "linux")]
pub(crate) fn peak_cpu(leader: u32) -> Option<Duration> {
    let procs = proc::snapshot();
    proc::subtree(leader, &procs)
        .iter()
        .map(|p| p.cpu_ticks)
        .max()
        .map(proc::ticks_to_duration)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn peak_cpu(_leader: u32) -> Option<Duration> {
    None
}

#[cfg(target_os = "linux")]
fn send_kill(pid: u32) {
    if let Ok(pid) = libc::pid_t::try_from(pid) {
        // ESRCH just means it already exited
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

/// Minimal `/proc/<pid>/stat` reader.
#[cfg(target_os = "linux")]
mod proc {
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) struct ProcStat {
        pub pid: u32,
        pub state: char,
        pub ppid: u32,
        pub session: libc::pid_t,
        /// utime + stime in clock ticks
        pub cpu_ticks: u64,
    }

    impl ProcStat {
        pub fn is_zombie(&self) -> bool {
            self.state == 'Z' || self.state == 'X'
        }
    }

    /// Parse one stat line. The command name may contain spaces and
    /// parentheses, so fields are counted from the last ')'.
    pub(super) fn parse_stat(line: &str) -> Option<ProcStat> {
        let open = line.find('(')?;
        let close = line.rfind(')')?;
        let pid = line[..open].trim().parse().ok()?;
        let fields: Vec<&str> = line.get(close + 1..)?.split_whitespace().collect();

        // fields[0] is field 3 of proc(5)
        let state = fields.first()?.chars().next()?;
        let ppid = fields.get(1)?.parse().ok()?;
        let session = fields.get(3)?.parse().ok()?;
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;

        Some(ProcStat {
            pid,
            state,
            ppid,
            session,
            cpu_ticks: utime.saturating_add(stime),
        })
    }

    pub(super) fn snapshot() -> Vec<ProcStat> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
            })
            .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
            .filter_map(|line| parse_stat(&line))
            .collect()
    }

    /// `root` and all of its descendants present in `procs`.
    pub(super) fn subtree(root: u32, procs: &[ProcStat]) -> Vec<ProcStat> {
        let mut children: HashMap<u32, Vec<&ProcStat>> = HashMap::new();
        for p in procs {
            children.entry(p.ppid).or_default().push(p);
        }

        let mut found: Vec<ProcStat> = procs.iter().filter(|p| p.pid == root).copied().collect();
        let mut queue = vec![root];
        while let Some(pid) = queue.pop() {
            for child in children.get(&pid).into_iter().flatten() {
                // pid 0 is the kernel's parent of pids 1 and 2
                if child.pid != root && child.pid != 0 {
                    found.push(**child);
                    queue.push(child.pid);
                }
            }
        }
        found
    }

    pub(super) fn ticks_to_duration(ticks: u64) -> Duration {
        // SAFETY: sysconf has no preconditions.
        let per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let per_sec = u64::try_from(per_sec).ok().filter(|t| *t > 0).unwrap_or(100);
        Duration::from_millis(ticks.saturating_mul(1000) / per_sec)
    }
}

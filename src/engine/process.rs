use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::Duration;

const ENGINE_COMMAND: &str = "etcd";
const KILL_VERIFY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ProcessStopError {
    #[error("failed to scan process table: {0}")]
    ProcScan(std::io::Error),

    #[error("failed to signal engine process {pid}: {errno}")]
    Signal { pid: i32, errno: nix::errno::Errno },

    /// Fatal to a restore attempt: proceeding while the old process may
    /// still hold the data directory open is unsafe.
    #[error("engine process {0} still running after kill")]
    StillRunning(i32),
}

/// Stop the externally supervised engine process: SIGTERM, escalate to
/// SIGKILL after a bounded grace period, and verify death before returning.
/// No engine process at all is success.
pub async fn stop_engine_process(
    logger: &slog::Logger,
    grace: Duration,
) -> Result<(), ProcessStopError> {
    let pid = match find_engine_pid()? {
        Some(pid) => pid,
        None => {
            slog::info!(logger, "No engine process found, continuing");
            return Ok(());
        }
    };

    slog::info!(logger, "Stopping engine process"; "pid" => pid);
    signal_process(pid, Signal::SIGTERM)?;

    if wait_for_death(pid, grace).await {
        return Ok(());
    }

    slog::warn!(logger, "Engine ignored SIGTERM, escalating to SIGKILL"; "pid" => pid);
    signal_process(pid, Signal::SIGKILL)?;

    if wait_for_death(pid, KILL_VERIFY_DELAY * 4).await {
        return Ok(());
    }

    Err(ProcessStopError::StillRunning(pid))
}

fn signal_process(pid: i32, signal: Signal) -> Result<(), ProcessStopError> {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => Ok(()),
        // Already gone between scan and signal.
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(ProcessStopError::Signal { pid, errno }),
    }
}

async fn wait_for_death(pid: i32, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if !process_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(KILL_VERIFY_DELAY).await;
    }
}

fn process_alive(pid: i32) -> bool {
    std::fs::read(format!("/proc/{}/cmdline", pid)).is_ok()
}

/// Scan /proc for a process whose argv[0] is exactly the engine command.
fn find_engine_pid() -> Result<Option<i32>, ProcessStopError> {
    let entries = std::fs::read_dir("/proc").map_err(ProcessStopError::ProcScan)?;

    for entry in entries {
        let entry = entry.map_err(ProcessStopError::ProcScan)?;
        let pid: i32 = match entry.file_name().to_string_lossy().parse() {
            Ok(pid) => pid,
            Err(_) => continue,
        };

        let cmdline = match std::fs::read(format!("/proc/{}/cmdline", pid)) {
            Ok(bytes) => bytes,
            // Raced with process exit; keep scanning.
            Err(_) => continue,
        };

        let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or(&[]);
        if argv0 == ENGINE_COMMAND.as_bytes() {
            return Ok(Some(pid));
        }
    }

    Ok(None)
}

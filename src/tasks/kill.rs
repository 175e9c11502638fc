//! # Process-tree termination.
//!
//! Wrapped commands (package-manager scripts, shell wrappers) routinely
//! spawn their own children, so stopping the directly spawned process is
//! not enough. Process tasks are started in their own process group on
//! Unix, which makes the spawned pid the group leader; [`kill_tree`]
//! signals the whole group. On Windows the same is achieved by shelling
//! out to `taskkill /T /F`, which walks the child tree itself.

use std::io;

/// Signal used to stop a supervised process tree.
///
/// The default is the forceful kill signal; choose [`StopSignal::Term`]
/// for tools that need to flush state on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopSignal {
    /// SIGKILL: forceful, cannot be caught.
    #[default]
    Kill,
    /// SIGTERM: polite termination request.
    Term,
    /// SIGINT: interactive interrupt.
    Int,
}

#[cfg(unix)]
impl StopSignal {
    fn signo(self) -> i32 {
        match self {
            StopSignal::Kill => libc::SIGKILL,
            StopSignal::Term => libc::SIGTERM,
            StopSignal::Int => libc::SIGINT,
        }
    }
}

/// Terminates the whole process tree rooted at `pid`.
///
/// `pid` must be the leader of its own process group (process tasks are
/// spawned that way). Returns an error when the group could not be
/// signalled, typically because every process in it is already gone.
#[cfg(unix)]
pub async fn kill_tree(pid: u32, signal: StopSignal) -> io::Result<()> {
    // killpg targets the group the child leads, which includes any
    // grandchildren the command spawned.
    let rc = unsafe { libc::killpg(pid as i32, signal.signo()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Terminates the whole process tree rooted at `pid`.
#[cfg(windows)]
pub async fn kill_tree(pid: u32, _signal: StopSignal) -> io::Result<()> {
    let output = tokio::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .output()
        .await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "taskkill exited with {}",
            output.status
        )))
    }
}

#[cfg(not(any(unix, windows)))]
pub async fn kill_tree(_pid: u32, _signal: StopSignal) -> io::Result<()> {
    Err(io::Error::other("process-tree termination is not supported on this platform"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn kills_a_group_with_grandchildren() {
        // sh spawns a sleeping grandchild; killing the group reaps both.
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & wait"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        kill_tree(pid, StopSignal::Kill).await.unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}

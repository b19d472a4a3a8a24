//! Shared child-process utilities.
//!
//! [`forward_lines`] is the per-stream consumer used for both worker and
//! master processes; [`terminate`] implements the platform stop strategy.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Read `reader` line by line and hand each non-blank line to `sink`.
///
/// Runs on its own task until EOF or a read error. Line order within one
/// stream is preserved. Trailing `\r\n` is stripped and invalid UTF-8 is
/// replaced rather than dropped.
pub fn forward_lines<R, F>(reader: R, mut sink: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(String) + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        sink(line.to_string());
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Output stream closed with error");
                    break;
                }
            }
        }
    })
}

/// Ask the process `pid` to stop.
///
/// Sends `SIGTERM` on Unix. Elsewhere the process tree is force-killed via
/// `taskkill /f /t`. Returns as soon as the request is issued; the caller
/// learns about the actual exit from its own wait on the child.
#[cfg(unix)]
pub fn terminate(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> std::io::Result<()> {
    std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Per-language executor adapters.
//!
//! Four patterns cover every adapter: embedded interpreter (Python,
//! global lock), per-context JIT engine (QuickJS), compile-and-load
//! (C via the system compiler + libffi), and generic subprocess.

#[cfg(feature = "js")]
pub mod js;
#[cfg(feature = "native")]
pub mod native;
#[cfg(feature = "python")]
pub mod python;
pub mod subprocess;

use naab_core::{CancelFlag, ErrorKind, Executor, NaabError};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Construct the built-in adapter for `language`, or `E_NO_EXECUTOR`.
pub fn create_builtin(language: &str) -> Result<Arc<dyn Executor>, NaabError> {
    match language {
        #[cfg(feature = "python")]
        "python" => Ok(Arc::new(python::PythonExecutor::new()?)),
        #[cfg(not(feature = "python"))]
        "python" => Ok(Arc::new(subprocess::SubprocessExecutor::for_language(
            "python",
        )?)),
        #[cfg(feature = "js")]
        "js" | "javascript" => Ok(Arc::new(js::JsExecutor::new()?)),
        #[cfg(feature = "native")]
        "c" => Ok(Arc::new(native::CExecutor::new()?)),
        "bash" | "sh" | "ruby" | "node" => Ok(Arc::new(
            subprocess::SubprocessExecutor::for_language(language)?,
        )),
        other => Err(NaabError::new(
            ErrorKind::NoExecutor,
            format!("no executor registered for language '{}'", other),
        )),
    }
}

/// Warm up per-thread foreign runtime state. Called once per pool
/// worker at start-up so embedded interpreters never lazily allocate
/// thread state mid-call.
pub fn warmup_thread() {
    #[cfg(feature = "python")]
    python::warmup_thread();
}

/// Captured result of a bounded subprocess run.
#[derive(Debug)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Run a command to completion, bounded by `timeout` and the
/// cooperative cancel flag. On expiry the child is terminated with a
/// signal and hard-killed after a grace period.
pub fn run_command(
    mut command: Command,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<CommandOutput, NaabError> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| NaabError::new(ErrorKind::Io, format!("failed to spawn: {}", e)))?;

    // Drain pipes on side threads so a chatty child cannot deadlock
    // against a full pipe buffer
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_thread = std::thread::spawn(move || read_all(stdout));
    let err_thread = std::thread::spawn(move || read_all(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => return Err(NaabError::new(ErrorKind::Io, e.to_string())),
        }
        if cancel.is_set() {
            terminate(&mut child);
            return Err(NaabError::new(
                ErrorKind::Cancelled,
                "subprocess cancelled".to_string(),
            ));
        }
        if Instant::now() >= deadline {
            terminate(&mut child);
            return Err(NaabError::new(
                ErrorKind::Timeout,
                format!("subprocess exceeded timeout of {:?}", timeout),
            ));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let stdout = out_thread.join().unwrap_or_default();
    let stderr = err_thread.join().unwrap_or_default();
    Ok(CommandOutput {
        status_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn read_all(pipe: Option<impl std::io::Read>) -> String {
    use std::io::Read;
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

/// SIGTERM, wait the grace period, then SIGKILL.
fn terminate(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + KILL_GRACE;
        while Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Strip the common leading indentation from a multi-line body, so
/// inline code indented to match the host source stays valid in
/// whitespace-sensitive languages.
pub(crate) fn dedent(body: &str) -> String {
    let min_indent = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    body.lines()
        .map(|l| if l.len() >= min_indent { &l[min_indent..] } else { l })
        .collect::<Vec<_>>()
        .join("\n")
}

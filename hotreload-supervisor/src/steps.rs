//! External command steps (dependency install, build).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::session_log::SessionLog;

/// Output lines kept in the session log per stream.
const OUTPUT_TAIL_LINES: usize = 20;

/// Run `argv` in `cwd`, bounded by `timeout`.
///
/// The child is killed if the timeout fires. Tails of stdout and stderr are
/// appended to `log` either way. The error string is suitable for the
/// session log and the step's error variant.
pub async fn run_step(
    label: &str,
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
    log: &SessionLog,
) -> Result<(), String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| format!("{label}: empty command line"))?;
    log.info(format!("{label}: running `{}`", argv.join(" ")));

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("{label}: cannot start `{program}`: {e}"))?;

    let started = std::time::Instant::now();
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(format!("{label}: waiting on `{program}` failed: {err}")),
        Err(_) => {
            return Err(format!("{label}: `{program}` timed out after {timeout:?}"))
        }
    };

    log.append_tail(&format!("{label} stdout"), &output.stdout, OUTPUT_TAIL_LINES);
    log.append_tail(&format!("{label} stderr"), &output.stderr, OUTPUT_TAIL_LINES);

    if output.status.success() {
        log.info(format!(
            "{label}: finished in {:.1}s",
            started.elapsed().as_secs_f64()
        ));
        Ok(())
    } else {
        Err(format!("{label}: `{program}` exited with {}", output.status))
    }
}

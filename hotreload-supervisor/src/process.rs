//! Process identity, liveness and detached spawning.
//!
//! Server generations and supervisors never share memory. They find each
//! other through `run/server.pid` and probe each other with signal 0 and TCP
//! connects.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use hotreload_core::Settings;

use crate::error::{io_err, SupervisorError};
use crate::retention::{rotate_output_log, MAX_OUTPUT_LOG_BYTES};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Pid file
// ---------------------------------------------------------------------------

/// Record `pid` at `path`, replacing any previous record atomically.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), SupervisorError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, format!("{pid}\n")).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}

/// Read the recorded pid. `Ok(None)` when no record exists.
pub fn read_pid_file(path: &Path) -> Result<Option<i32>, SupervisorError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(SupervisorError::PidFile {
            path: path.to_path_buf(),
            contents,
        }),
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Whether `pid` names a running process.
///
/// Exited-but-unreaped processes count as gone: a server whose parent never
/// waits on it must not hold the supervisor until the shutdown timeout.
pub fn is_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: i32) -> bool {
    // The state letter follows the parenthesised command name.
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: i32) -> bool {
    false
}

/// Poll until `pid` is gone. Returns `false` if it outlived `timeout`.
pub async fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll TCP connects to `addr` until one succeeds or `timeout` passes.
pub async fn wait_for_port(addr: SocketAddr, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL * 2).await;
    }
}

/// Loopback address for probing a listener bound to `host:port`.
pub fn local_probe_addr(host: &str, port: u16) -> SocketAddr {
    let ip = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Ok(IpAddr::V6(ip)) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        Ok(ip) => ip,
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    };
    SocketAddr::new(ip, port)
}

// ---------------------------------------------------------------------------
// Detached spawn
// ---------------------------------------------------------------------------

/// Spawn `argv` in its own process group and return its pid without
/// waiting on it.
///
/// stdin is closed; stdout and stderr append to `output_log`, which is
/// rotated first if it has grown too large.
pub fn spawn_detached(argv: &[String], cwd: &Path, output_log: &Path) -> Result<u32, SupervisorError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| SupervisorError::Spawn("empty command line".to_string()))?;

    if let Some(dir) = output_log.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    if let Err(err) = rotate_output_log(output_log, MAX_OUTPUT_LOG_BYTES) {
        tracing::warn!(path = %output_log.display(), error = %err, "output log rotation failed");
    }
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_log)
        .map_err(|e| io_err(output_log, e))?;
    let stderr = stdout.try_clone().map_err(|e| io_err(output_log, e))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command
        .spawn()
        .map_err(|e| SupervisorError::Spawn(format!("{program}: {e}")))?;
    let pid = child.id();
    tracing::info!(pid, program = %program, "spawned detached process");
    Ok(pid)
}

/// Command line that starts a server generation.
///
/// `commands.start` wins when set; otherwise the current executable is
/// re-run as `serve`, pointed at the same settings file.
pub fn server_command(settings: &Settings) -> Result<Vec<String>, SupervisorError> {
    if !settings.commands.start.is_empty() {
        return Ok(settings.commands.start.clone());
    }
    let mut argv = vec![current_exe()?, "serve".to_string()];
    if let Some(source) = &settings.source {
        argv.push("--config".to_string());
        argv.push(source.display().to_string());
    }
    Ok(argv)
}

/// Command line of a relaunch supervisor for one admitted package.
pub fn relaunch_command(
    settings: &Settings,
    package: &Path,
    digest: &str,
    log: &Path,
    test_mode: bool,
) -> Result<Vec<String>, SupervisorError> {
    let mut argv = vec![current_exe()?, "relaunch".to_string()];
    if let Some(source) = &settings.source {
        argv.push("--config".to_string());
        argv.push(source.display().to_string());
    }
    argv.extend([
        "--package".to_string(),
        package.display().to_string(),
        "--digest".to_string(),
        digest.to_string(),
        "--log".to_string(),
        log.display().to_string(),
    ]);
    if test_mode {
        argv.push("--test".to_string());
    }
    Ok(argv)
}

fn current_exe() -> Result<String, SupervisorError> {
    std::env::current_exe()
        .map(|path| without_deleted_suffix(path).display().to_string())
        .map_err(|e| SupervisorError::Spawn(format!("cannot locate current executable: {e}")))
}

/// Linux reports an executable that was unlinked after exec as
/// `<path> (deleted)`; the replacement lives at `<path>`.
fn without_deleted_suffix(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|text| text.strip_suffix(" (deleted)")) {
        Some(stripped) => PathBuf::from(stripped),
        None => path,
    }
}

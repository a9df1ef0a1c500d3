// SPDX-License-Identifier: MIT OR Apache-2.0
//! PTY-holder scaffolding.
//!
//! The daemon process is launched attached to a pseudo-terminal rather than inherited stdio,
//! so that its lifetime survives the orchestrator exiting (e.g. the user's `gdb` session
//! outliving the `eocd-gdb` invocation that spawned the daemon). Grounded on
//! `easierocd.py::tmux_session_name_for_adapter`/`tmux_pane_get_pty`, reworked around a
//! purpose-built child instead of shelling out to `tmux`: this process re-execs itself with a
//! hidden flag, double-forks off the controlling terminal, and opens its own PTY pair via
//! `nix::pty`.

use std::env;
use std::fs::File;
use std::io::Write as _;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::{debug, warn};
use nix::pty::{OpenptyResult, openpty, ptsname_r};
use nix::unistd::{ForkResult, fork, setsid};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Hidden argv\[1\] flag that re-exec uses to enter PTY-holder mode instead of the normal CLI.
pub const PTY_HOLDER_FLAG: &str = "--eocd-pty-holder-child";

/// Rendezvous record the PTY-holder writes for its own liveness, separate from the daemon's
/// rendezvous file the supervisor manages.
#[derive(Debug, Serialize, Deserialize)]
struct PtyHolderRecord
{
    holder_pid: i32,
    pty_path: String,
}

/// A PTY pair under this process's control, with the child command attached to the slave side.
pub struct PtyHolder
{
    pub master: File,
    pub pty_path: PathBuf,
}

/// Whether the current process was re-exec'd into PTY-holder mode; checked once at the top of
/// `main()` before any normal CLI argument parsing happens.
pub fn is_pty_holder_invocation(args: &[String]) -> bool
{
    args.get(1).map(String::as_str) == Some(PTY_HOLDER_FLAG)
}

/// Opens a PTY pair and spawns `program` with its stdio attached to the slave side. Does not
/// fork; the returned [PtyHolder] owns the master side for the orchestrator to hold open.
pub fn spawn_attached(program: &str, args: &[String]) -> Result<(PtyHolder, std::process::Child), Error>
{
    let OpenptyResult { master, slave } =
        openpty(None, None).map_err(|e| ErrorKind::DaemonSpawnFailed(Some(e.to_string())).error())?;
    drop(slave);

    let pty_path =
        PathBuf::from(ptsname_r(&master).map_err(|e| ErrorKind::Io.error_from(std::io::Error::from(e)))?);

    // The slave side is reopened by path for each stdio stream rather than reusing the fd
    // `openpty` handed back, so each of stdin/stdout/stderr gets its own independent fd onto
    // the same terminal.
    let child = Command::new(program)
        .args(args)
        .stdin(open_slave(&pty_path)?)
        .stdout(open_slave(&pty_path)?)
        .stderr(open_slave(&pty_path)?)
        .spawn()
        .map_err(|e| ErrorKind::DaemonSpawnFailed(Some(e.to_string())).error())?;

    Ok((PtyHolder { master: master.into(), pty_path }, child))
}

fn open_slave(path: &std::path::Path) -> Result<Stdio, Error>
{
    let file = File::options().read(true).write(true).open(path).map_err(|e| ErrorKind::Io.error_from(e))?;
    let owned: OwnedFd = file.into();
    Ok(Stdio::from(owned))
}

/// Entry point for the hidden re-exec path: `eocd-gdb --eocd-pty-holder-child <name> <program> [args...]`.
/// Double-forks off the controlling terminal, opens a PTY, execs the daemon, and writes its own
/// rendezvous file so a future invocation can tell whether this holder is still alive.
pub fn run_pty_holder_child(holder_name: &str, program: &str, program_args: &[String]) -> Result<(), Error>
{
    // First fork detaches from the parent's process group; the parent exits immediately so the
    // orchestrator that re-exec'd us doesn't block waiting on this process.
    match unsafe { fork() }.map_err(|e| ErrorKind::DaemonSpawnFailed(Some(e.to_string())).error())? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {},
    }

    setsid().map_err(|e| ErrorKind::DaemonSpawnFailed(Some(e.to_string())).error())?;

    // Second fork ensures this process can never reacquire a controlling terminal.
    match unsafe { fork() }.map_err(|e| ErrorKind::DaemonSpawnFailed(Some(e.to_string())).error())? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {},
    }

    let (holder, mut child) = spawn_attached(program, program_args)?;

    let record = PtyHolderRecord { holder_pid: std::process::id() as i32, pty_path: holder.pty_path.display().to_string() };
    let rendezvous_path = rendezvous_path_for(holder_name);
    if let Ok(mut file) = File::create(&rendezvous_path) {
        if let Ok(json) = serde_json::to_vec(&record) {
            let _ = file.write_all(&json);
        }
    }

    debug!("pty-holder {holder_name}: attached {program} on {}", holder.pty_path.display());

    let status = child.wait().map_err(|e| ErrorKind::Io.error_from(e))?;
    let _ = std::fs::remove_file(&rendezvous_path);

    if !status.success() {
        warn!("pty-holder {holder_name}: child {program} exited with {status}");
    }

    Ok(())
}

fn rendezvous_path_for(holder_name: &str) -> PathBuf
{
    env::temp_dir().join(format!("easierocd-pty-{holder_name}"))
}

/// Returns `true` if a PTY-holder rendezvous file exists and its recorded PID still resolves to
/// a live process. Used by the supervisor's adoption path before trusting a stale file.
pub fn holder_is_alive(holder_name: &str) -> bool
{
    let path = rendezvous_path_for(holder_name);
    let Ok(contents) = std::fs::read(&path) else { return false };
    let Ok(record) = serde_json::from_slice::<PtyHolderRecord>(&contents) else { return false };
    process_exists(record.holder_pid)
}

fn process_exists(pid: i32) -> bool
{
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Re-execs the current binary into PTY-holder mode, detaching it entirely from this process's
/// lifetime. Grounded on the teacher's elevation re-exec pattern.
pub fn reexec_as_pty_holder(holder_name: &str, program: &str, program_args: &[String]) -> Result<(), Error>
{
    let self_path = env::current_exe().map_err(|e| ErrorKind::Io.error_from(e))?;
    let mut command = Command::new(self_path);
    command.arg(PTY_HOLDER_FLAG).arg(holder_name).arg(program);
    command.args(program_args);
    command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    command
        .spawn()
        .map_err(|e| ErrorKind::DaemonSpawnFailed(Some(e.to_string())).error())?;
    Ok(())
}

#[allow(dead_code)]
fn holder_name_path(holder_name: &str) -> PathBuf
{
    rendezvous_path_for(holder_name)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn is_pty_holder_invocation_checks_argv1()
    {
        let args = vec!["eocd-gdb".to_string(), PTY_HOLDER_FLAG.to_string(), "name".to_string()];
        assert!(is_pty_holder_invocation(&args));

        let args = vec!["eocd-gdb".to_string(), "gdb".to_string()];
        assert!(!is_pty_holder_invocation(&args));
    }

    #[test]
    fn nonexistent_holder_reports_not_alive()
    {
        assert!(!holder_is_alive("nonexistent-test-holder-name"));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! `gdb`: select an adapter, bring the daemon up, probe the target, and exec GDB against it.

use std::env;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use clap::Args;
use log::{debug, info};

use eocd::error::{Error, ErrorKind};
use eocd::{probe, supervisor, usb};

#[derive(Args)]
pub struct GdbArgs
{
    /// ELF file to load symbols from (passed to GDB as `file <path>`).
    #[arg(long = "eocd-gdb-file")]
    gdb_file: Option<PathBuf>,

    /// Select the adapter with this USB serial number.
    #[arg(long = "eocd-adapter-usb-serial", env = "EOCD_ADAPTER_USB_SERIAL")]
    serial: Option<String>,

    /// Select the adapter at this USB bus:address (decimal, e.g. `2:109`).
    #[arg(long = "eocd-adapter-usb-bus-addr", env = "EOCD_ADAPTER_USB_BUS_ADDR")]
    bus_addr: Option<String>,

    /// Select the adapter with this USB vid:pid (hex, no `0x` prefix, e.g. `0483:374b`).
    #[arg(long = "eocd-adapter-usb-vid-pid", env = "EOCD_ADAPTER_USB_VID_PID")]
    vid_pid: Option<String>,

    /// Never prompt; an ambiguous selector is a hard error instead.
    #[arg(long = "eocd-non-interactive")]
    non_interactive: bool,

    /// Forwarded to GDB verbatim.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    passthrough: Vec<String>,
}

pub fn run(args: &GdbArgs) -> Result<i32, Error>
{
    let non_interactive = args.non_interactive || env::var("EOCD_NON_INTERACTIVE").is_ok();

    let vid_pid = args.vid_pid.as_deref().map(parse_vid_pid).transpose()?;
    let bus_addr = args.bus_addr.as_deref().map(parse_bus_addr).transpose()?;

    let adapter = usb::resolve_adapter(vid_pid, args.serial.as_deref(), bus_addr, non_interactive)?;
    info!("using adapter {adapter}");

    let openocd_executable = env::var("OPENOCD").unwrap_or_else(|_| "openocd".to_string());

    let connected = usb::list_all()?;
    let _ = supervisor::cleanup_stale(&connected);

    let handle = supervisor::attach(&adapter, &openocd_executable)?;
    let (mut handle, outcome) = probe::probe(&adapter, &openocd_executable, handle)?;

    info!(
        "target: {} rev {} via {:?}",
        outcome.mcu.dev.unwrap_or("unknown device"),
        outcome.mcu.rev.unwrap_or("unknown revision"),
        outcome.transport
    );

    handle.rpc.set_arm_semihosting(true)?;
    let gdb_port = handle.rpc.gdb_port()?;

    exec_gdb(gdb_port, args.gdb_file.as_deref(), &args.passthrough)
}

fn parse_vid_pid(s: &str) -> Result<(u16, u16), Error>
{
    let (vid, pid) = s
        .split_once(':')
        .ok_or_else(|| ErrorKind::ValueError(format!("{s:?} is not VID:PID")).error())?;
    let vid = u16::from_str_radix(vid, 16).map_err(|_| ErrorKind::ValueError(format!("{s:?} is not VID:PID")).error())?;
    let pid = u16::from_str_radix(pid, 16).map_err(|_| ErrorKind::ValueError(format!("{s:?} is not VID:PID")).error())?;
    Ok((vid, pid))
}

fn parse_bus_addr(s: &str) -> Result<(u8, u8), Error>
{
    let (bus, addr) = s
        .split_once(':')
        .ok_or_else(|| ErrorKind::ValueError(format!("{s:?} is not BUS:ADDR")).error())?;
    let bus: u8 = bus.parse().map_err(|_| ErrorKind::ValueError(format!("{s:?} is not BUS:ADDR")).error())?;
    let addr: u8 = addr.parse().map_err(|_| ErrorKind::ValueError(format!("{s:?} is not BUS:ADDR")).error())?;
    Ok((bus, addr))
}

fn gdb_executable() -> String
{
    if let Ok(gdb) = env::var("GDB") {
        return gdb;
    }
    if let Ok(host) = env::var("HOST") {
        return format!("{host}-gdb");
    }
    "gdb".to_string()
}

/// Execs GDB as a child with the documented preamble arguments, waits on it, and propagates its
/// exit status - including re-raising SIGINT on self if GDB died from it, preserving the
/// shell's exit-by-signal convention.
fn exec_gdb(gdb_port: u16, elf: Option<&std::path::Path>, passthrough: &[String]) -> Result<i32, Error>
{
    let executable = gdb_executable();

    let mut command = Command::new(&executable);
    command.arg("-q");
    command.arg("-ex").arg("set pagination 0");
    command.arg("-ex").arg("set confirm 0");
    command.arg("-ex").arg(format!("target extended-remote :{gdb_port}"));
    command.arg("-ex").arg("monitor halt");
    if let Some(elf) = elf {
        command.arg("-ex").arg(format!("file {}", elf.display()));
    }
    command.args(passthrough);
    command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

    debug!("exec: {executable} {:?}", command.get_args().collect::<Vec<_>>());

    // Ignore SIGINT in this process; GDB itself handles it via the terminal's process-group
    // signal delivery to interrupt blocking commands, and we re-raise below only if GDB exits
    // because of it.
    let _ = ctrlc::set_handler(|| {});

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ErrorKind::GdbNotFound(executable.clone()).error()
        } else {
            ErrorKind::Io.error_from(e)
        }
    })?;

    let status = child.wait().map_err(|e| ErrorKind::Io.error_from(e))?;

    if let Some(code) = status.code() {
        return Ok(code);
    }

    if let Some(signal) = status.signal() {
        const SIGINT: i32 = 2;
        if signal == SIGINT {
            let _ = nix::sys::signal::kill(nix::unistd::getpid(), nix::sys::signal::Signal::SIGINT);
        }
        return Ok(128 + signal);
    }

    Ok(1)
}

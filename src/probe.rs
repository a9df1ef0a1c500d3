// SPDX-License-Identifier: MIT OR Apache-2.0
//! Target probe state machine.
//!
//! Grounded on `easierocd/openocdcortexm.py::OpenOcdCortexMDetect`: brings a bare daemon up
//! against an unknown target by trying each low-level transport the adapter supports, in a
//! fixed order, backtracking with a shutdown+respawn between attempts since a daemon can't be
//! un-initialized once `init` has run against the wrong transport.

use log::{debug, info, warn};

use crate::adapter::{AdapterInstance, HlaLayout, Interface};
use crate::dap::{self, DapInfo};
use crate::error::{Error, ErrorKind};
use crate::mcu::{self, McuInfo};
use crate::supervisor::{self, DaemonHandle};

/// Low-level wire transport tried by the probe state machine, in this fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport
{
    Swd,
    Jtag,
}

pub const TRANSPORT_ORDER: [Transport; 2] = [Transport::Swd, Transport::Jtag];

impl Transport
{
    fn name(self, interface: Option<Interface>) -> &'static str
    {
        match (interface, self) {
            (Some(Interface::Hla), Transport::Swd) => "hla_swd",
            (Some(Interface::Hla), Transport::Jtag) => "hla_jtag",
            (_, Transport::Swd) => "swd",
            (_, Transport::Jtag) => "jtag",
        }
    }
}

/// Placeholder TAP/target name used during detection, before the chip identity - and
/// therefore its real target name - is known.
const DETECT_TAP: &str = "EASIEROCD_DETECT";

const RAM_WORK_AREA_ORIGIN: u32 = 0x2000_0000;
const RAM_WORK_AREA_SIZE: u32 = 0x2800;

/// Result of a successful probe: the transport that worked, the decoded DAP and MCU
/// identities, and the target names the daemon ended up production-initialized with.
#[derive(Debug, Clone)]
pub struct ProbeOutcome
{
    pub transport: Transport,
    pub dap: DapInfo,
    pub mcu: McuInfo,
    pub target_names: Vec<String>,
}

/// Runs the probe state machine against `handle`, trying the fast path first and falling back
/// to the full slow path (transport loop with backtracking) if it doesn't pan out. May replace
/// `handle`'s daemon connection with a freshly spawned one; the caller should use the returned
/// handle, not the one passed in, afterward.
pub fn probe(
    adapter: &AdapterInstance,
    openocd_executable: &str,
    mut handle: DaemonHandle,
) -> Result<(DaemonHandle, ProbeOutcome), Error>
{
    if let Some(outcome) = try_fast_path(&mut handle) {
        info!("reusing already-initialized daemon for {adapter} ({:?})", outcome.transport);
        return Ok((handle, outcome));
    }

    slow_path(adapter, openocd_executable, handle)
}

/// An adopted daemon can be reused without touching its configuration at all if it is already
/// production-initialized against a real (non-placeholder) target and responding normally.
fn try_fast_path(handle: &mut DaemonHandle) -> Option<ProbeOutcome>
{
    if !handle.rpc.initialized().unwrap_or(false) {
        return None;
    }

    let target_names = handle.rpc.target_names().ok()?;
    if target_names.is_empty() || target_names.iter().any(|n| n.contains(DETECT_TAP)) {
        return None;
    }

    handle.rpc.poll().ok()?;

    let dap = read_dap(handle)?;
    let mcu = read_mcu(handle)?;
    let transport = current_transport(handle)?;

    Some(ProbeOutcome { transport, dap, mcu, target_names })
}

fn current_transport(handle: &mut DaemonHandle) -> Option<Transport>
{
    let reported = handle.rpc.get_transport().ok()?;
    if reported.contains("jtag") {
        Some(Transport::Jtag)
    } else if reported.contains("swd") {
        Some(Transport::Swd)
    } else {
        None
    }
}

fn read_dap(handle: &mut DaemonHandle) -> Option<DapInfo>
{
    let idcode = handle.rpc.idcode().ok()?;
    Some(dap::dpidr_decode(idcode))
}

fn read_mcu(handle: &mut DaemonHandle) -> Option<McuInfo>
{
    let raw = handle.rpc.read_word(mcu::DBGMCU_IDCODE_ADDR).ok()?;
    Some(mcu::dbgmcu_idcode_decode(raw))
}

/// Tries each transport the adapter supports in order. A failed attempt forces a hard
/// shutdown+respawn before the next one, since OpenOCD has no "un-init" operation.
fn slow_path(
    adapter: &AdapterInstance,
    openocd_executable: &str,
    mut handle: DaemonHandle,
) -> Result<(DaemonHandle, ProbeOutcome), Error>
{
    for transport in TRANSPORT_ORDER {
        if !adapter.profile.supports_transport(transport) {
            debug!("{adapter}: skipping {transport:?}, adapter does not support it");
            continue;
        }

        match attempt_detection(adapter, &mut handle, transport) {
            Ok((dap, mcu)) => {
                return finish_production_init(adapter, openocd_executable, handle, transport, dap, mcu);
            },
            // AdapterOpenFailed and ResetFailed are fatal per spec.md §7 - trying the next
            // transport won't fix a wiring/power problem or an adapter the daemon can't open.
            Err(e) if matches!(e.kind, ErrorKind::AdapterOpenFailed | ErrorKind::ResetFailed) => {
                let _ = supervisor::shutdown(handle);
                return Err(e);
            },
            Err(e) => {
                warn!("{adapter}: {transport:?} detection failed ({e}), backtracking");
                handle = respawn_bare(adapter, openocd_executable, handle)?;
            },
        }
    }

    Err(ErrorKind::TargetDap.error())
}

/// Configures the daemon for detection against one transport and reads DAP + MCU identity
/// through the placeholder TAP.
fn attempt_detection(
    adapter: &AdapterInstance,
    handle: &mut DaemonHandle,
    transport: Transport,
) -> Result<(DapInfo, McuInfo), Error>
{
    configure_adapter(adapter, handle)?;
    select_transport(adapter, handle, transport)?;
    declare_tap(adapter, handle, transport, DETECT_TAP)?;
    create_cortex_m_target(handle, DETECT_TAP, DETECT_TAP)?;

    if adapter.profile.has_reset_line {
        handle.rpc.command("reset_config srst_only")?;
        handle.rpc.command("reset_config connect_assert_srst")?;
    }

    issue_init(handle)?;
    issue_reset_halt(handle)?;

    if transport == Transport::Jtag {
        // DAP detection over JTAG is architecturally absent in this daemon version; the
        // caller reads this as "try the next transport", and since JTAG is last in
        // TRANSPORT_ORDER, that means the whole slow path has failed.
        return Err(ErrorKind::TargetDap.error());
    }

    let dap = read_dap(handle).ok_or_else(|| ErrorKind::TargetDap.error())?;
    let mcu = read_mcu(handle).ok_or_else(|| ErrorKind::TargetMemoryAccess.error())?;
    Ok((dap, mcu))
}

/// Issues `init` and inspects the raw response for the daemon's `open failed` wording, which
/// is fatal rather than a retry signal - an unopenable adapter won't open on the next
/// transport either.
fn issue_init(handle: &mut DaemonHandle) -> Result<(), Error>
{
    let response = String::from_utf8_lossy(&handle.rpc.call("init")?).into_owned();
    if response.contains("open failed") {
        return Err(ErrorKind::AdapterOpenFailed.error());
    }
    Ok(())
}

/// Issues `reset halt` and treats a reset error in the response as a fatal wiring/power/nRST
/// problem rather than a transport-retry signal.
fn issue_reset_halt(handle: &mut DaemonHandle) -> Result<(), Error>
{
    let response = String::from_utf8_lossy(&handle.rpc.call("ocd_reset halt")?).into_owned();
    if response.to_lowercase().contains("error") {
        return Err(ErrorKind::ResetFailed.error());
    }
    Ok(())
}

fn configure_adapter(adapter: &AdapterInstance, handle: &mut DaemonHandle) -> Result<(), Error>
{
    let interface = adapter.profile.interface.ok_or_else(|| ErrorKind::AdapterNotSupported.error())?;

    let interface_name = match interface {
        Interface::Hla => "hla",
        Interface::CmsisDap => "cmsis-dap",
        Interface::JLink => "jlink",
    };
    handle.rpc.command(&format!("interface {interface_name}"))?;

    if let Some(layout) = adapter.profile.hla_layout {
        let layout_name = match layout {
            HlaLayout::StLink => "stlink",
            HlaLayout::TiIcdi => "ti-icdi",
        };
        handle.rpc.command(&format!("hla_layout {layout_name}"))?;
        handle.rpc.command(&format!("hla_vid_pid 0x{:04x} 0x{:04x}", adapter.vid, adapter.pid))?;
    }

    handle.rpc.command("adapter_khz 300")?;
    Ok(())
}

fn select_transport(adapter: &AdapterInstance, handle: &mut DaemonHandle, transport: Transport) -> Result<(), Error>
{
    handle.rpc.command(&format!("transport select {}", transport.name(adapter.profile.interface)))
}

fn declare_tap(
    adapter: &AdapterInstance,
    handle: &mut DaemonHandle,
    transport: Transport,
    tap_name: &str,
) -> Result<(), Error>
{
    let cmd = match adapter.profile.interface {
        Some(Interface::Hla) => format!("hla newtap {tap_name} cpu -expected-id 0"),
        Some(Interface::CmsisDap) => format!("cmsis-dap newdap {tap_name} cpu -expected-id 0"),
        _ => match transport {
            Transport::Swd => format!("swd newdap {tap_name} cpu -expected-id 0"),
            Transport::Jtag => format!("jtag newtap {tap_name} cpu -expected-id 0"),
        },
    };
    handle.rpc.command(&cmd)
}

/// Creates a Cortex-M target on a previously-declared TAP/DAP, per spec.md §4.5 step 2. Used
/// both for the detection-phase placeholder target and the real chip target in
/// [finish_production_init].
fn create_cortex_m_target(handle: &mut DaemonHandle, chain_position: &str, target_name: &str) -> Result<(), Error>
{
    handle.rpc.command(&format!("target create {target_name} cortex_m -chain-position {chain_position}"))
}

/// Shuts down and respawns a completely bare daemon for the next transport attempt. A hard
/// barrier: nothing about the failed attempt's configuration carries over.
fn respawn_bare(adapter: &AdapterInstance, openocd_executable: &str, handle: DaemonHandle) -> Result<DaemonHandle, Error>
{
    supervisor::shutdown(handle)?;
    supervisor::attach(adapter, openocd_executable)
}

/// Once detection succeeds, the daemon is reconfigured from scratch (another hard
/// shutdown+respawn) with the real chip's target name and production init: RAM work area,
/// flash bank, and reset config, per `openocdcortexm.py::openocd_init_for_cortex_m`.
fn finish_production_init(
    adapter: &AdapterInstance,
    openocd_executable: &str,
    handle: DaemonHandle,
    transport: Transport,
    dap: DapInfo,
    mcu: McuInfo,
) -> Result<(DaemonHandle, ProbeOutcome), Error>
{
    let family = mcu.family().ok_or_else(|| ErrorKind::TargetMemoryAccess.error())?;
    let target_name = format!("{family}.cpu");

    let mut handle = respawn_bare(adapter, openocd_executable, handle)?;

    configure_adapter(adapter, &mut handle)?;
    select_transport(adapter, &mut handle, transport)?;
    declare_tap(adapter, &mut handle, transport, &target_name)?;

    create_cortex_m_target(&mut handle, &target_name, &target_name)?;
    handle.rpc.command(&format!(
        "{target_name} configure -work-area-phys 0x{RAM_WORK_AREA_ORIGIN:x} -work-area-size 0x{RAM_WORK_AREA_SIZE:x} -work-area-backup 0"
    ))?;

    let algorithm = mcu::openocd_stm32_family_flash_algorithm(&family)?;
    handle
        .rpc
        .command(&format!("flash bank {family}.flash {algorithm} 0x08000000 0 0 0 {target_name}"))?;

    // Per spec.md §4.5: non-hla interfaces need the Cortex-M-level sysresetreq enabled
    // explicitly; a reset line, when present, additionally gets the srst-only/no-gate
    // adapter-level config (this system only targets STM32 parts, which always agree with
    // srst_nogate).
    if adapter.profile.interface != Some(Interface::Hla) {
        handle.rpc.command(&format!("{target_name} cortex_m reset_config sysresetreq"))?;
    }
    if adapter.profile.has_reset_line {
        handle.rpc.command("reset_config srst_only srst_nogate")?;
    }

    issue_init(&mut handle)?;
    let target_names = handle.rpc.target_names()?;

    Ok((handle, ProbeOutcome { transport, dap, mcu, target_names }))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn transport_order_tries_swd_before_jtag()
    {
        assert_eq!(TRANSPORT_ORDER, [Transport::Swd, Transport::Jtag]);
    }

    #[test]
    fn transport_name_uses_hla_prefix_for_hla_interface()
    {
        assert_eq!(Transport::Swd.name(Some(Interface::Hla)), "hla_swd");
        assert_eq!(Transport::Jtag.name(Some(Interface::Hla)), "hla_jtag");
        assert_eq!(Transport::Swd.name(Some(Interface::CmsisDap)), "swd");
        assert_eq!(Transport::Jtag.name(None), "jtag");
    }

    #[test]
    fn adapter_open_failed_and_reset_failed_are_not_retry_signals()
    {
        // The slow-path backtrack match arm only retries on everything *except* these two
        // kinds; assert the kinds stay distinguishable so that arm can't silently stop matching.
        let open_failed = ErrorKind::AdapterOpenFailed.error();
        let reset_failed = ErrorKind::ResetFailed.error();
        assert!(matches!(open_failed.kind, ErrorKind::AdapterOpenFailed));
        assert!(matches!(reset_failed.kind, ErrorKind::ResetFailed));
        assert_eq!(open_failed.kind.exit_code(), 3);
        assert_eq!(reset_failed.kind.exit_code(), 4);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Static registry of known debug adapters, recovered from `easierocd/debugadapters.py`.

/// The OpenOCD interface token a profile drives the daemon through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface
{
    Hla,
    CmsisDap,
    JLink,
}

/// `hla_layout` value for profiles using the `hla` interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlaLayout
{
    StLink,
    TiIcdi,
}

/// Static description of a supported adapter. Immutable, process-global.
#[derive(Debug, Clone, Copy)]
pub struct AdapterProfile
{
    pub name: &'static str,
    pub usb_vid_pid: Option<(u16, u16)>,
    pub usb_product_regex: Option<&'static str>,
    pub supports_swd: bool,
    pub supports_jtag: bool,
    pub has_reset_line: bool,
    pub interface: Option<Interface>,
    pub hla_layout: Option<HlaLayout>,

    /// Stock OpenOCD interface config file this profile corresponds to. Informative only -
    /// never parsed or executed, used for log messages and `--help` text.
    pub openocd_interface_cfg: Option<&'static str>,
    /// Whether this profile's default wiring carries the SWO trace signal. Recorded for
    /// future SWO/ITM support; no operation in this revision acts on it.
    #[allow(dead_code)]
    pub default_target_supports_swo: bool,
}

impl AdapterProfile
{
    /// `true` if this profile can reach the DAP over the given OpenOCD low-level transport.
    pub fn supports_transport(&self, transport: crate::probe::Transport) -> bool
    {
        match transport {
            crate::probe::Transport::Swd => self.supports_swd,
            crate::probe::Transport::Jtag => self.supports_jtag,
        }
    }
}

/// Registry of known adapters. `LPC-Link 2` carries no matcher at all, exactly as in the
/// prototype - it is a documented placeholder that can never match a connected device.
pub static ADAPTERS: &[AdapterProfile] = &[
    AdapterProfile {
        name: "ST-Link/V2-1",
        usb_vid_pid: Some((0x0483, 0x374b)),
        usb_product_regex: None,
        supports_swd: true,
        supports_jtag: false,
        has_reset_line: true,
        interface: Some(Interface::Hla),
        hla_layout: Some(HlaLayout::StLink),
        openocd_interface_cfg: Some("interface/stlink-v2-1.cfg"),
        default_target_supports_swo: true,
    },
    AdapterProfile {
        name: "ST-Link/V2",
        usb_vid_pid: Some((0x0483, 0x3748)),
        usb_product_regex: None,
        supports_swd: true,
        supports_jtag: true,
        has_reset_line: true,
        interface: Some(Interface::Hla),
        hla_layout: Some(HlaLayout::StLink),
        openocd_interface_cfg: Some("interface/stlink-v2.cfg"),
        default_target_supports_swo: true,
    },
    AdapterProfile {
        name: "CMSIS-DAP",
        usb_vid_pid: None,
        usb_product_regex: Some(".*CMSIS-DAP.*"),
        supports_swd: true,
        supports_jtag: false,
        has_reset_line: true,
        interface: Some(Interface::CmsisDap),
        hla_layout: None,
        openocd_interface_cfg: Some("interface/cmsis-dap.cfg"),
        default_target_supports_swo: false,
    },
    AdapterProfile {
        name: "LPC-Link 2",
        usb_vid_pid: None,
        usb_product_regex: None,
        supports_swd: true,
        supports_jtag: false,
        has_reset_line: true,
        interface: None,
        hla_layout: None,
        openocd_interface_cfg: None,
        default_target_supports_swo: false,
    },
    AdapterProfile {
        name: "TI ICDI",
        usb_vid_pid: None,
        usb_product_regex: None,
        supports_swd: false,
        supports_jtag: true,
        has_reset_line: true,
        interface: Some(Interface::Hla),
        hla_layout: Some(HlaLayout::TiIcdi),
        openocd_interface_cfg: Some("interface/ti-icdi.cfg"),
        default_target_supports_swo: false,
    },
    AdapterProfile {
        name: "J-Link",
        usb_vid_pid: None,
        usb_product_regex: None,
        supports_swd: true,
        supports_jtag: true,
        has_reset_line: true,
        interface: Some(Interface::JLink),
        hla_layout: None,
        openocd_interface_cfg: Some("interface/jlink.cfg"),
        default_target_supports_swo: false,
    },
];

/// A runtime pairing of an [AdapterProfile] with a concrete connected USB device.
#[derive(Debug, Clone)]
pub struct AdapterInstance
{
    pub profile: &'static AdapterProfile,
    pub bus: u8,
    pub address: u8,
    pub vid: u16,
    pub pid: u16,
    pub serial: Option<String>,
}

impl AdapterInstance
{
    /// Retains `[A-Za-z0-9_.-]` from the profile name and drops the rest; used as both the
    /// rendezvous file basename fragment and the PTY-holder session name.
    pub fn path_safe_name(&self) -> String
    {
        path_safe_str(self.profile.name)
    }
}

/// Sanitizes a string to the `[A-Za-z0-9_.-]` charset, dropping every other character.
///
/// ```text
/// path_safe_str("ST-Link/V2-1") == "ST-LinkV2-1"
/// path_safe_str("TI ICDI") == "TIICDI"
/// path_safe_str("LPC-Link 2") == "LPC-Link2"
/// ```
pub fn path_safe_str(s: &str) -> String
{
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn path_safe_str_examples()
    {
        assert_eq!(path_safe_str("ST-Link/V2-1"), "ST-LinkV2-1");
        assert_eq!(path_safe_str("TI ICDI"), "TIICDI");
        assert_eq!(path_safe_str("LPC-Link 2"), "LPC-Link2");
    }

    #[test]
    fn lpc_link_2_has_no_matcher()
    {
        let profile = ADAPTERS.iter().find(|p| p.name == "LPC-Link 2").unwrap();
        assert!(profile.usb_vid_pid.is_none());
        assert!(profile.usb_product_regex.is_none());
    }

    #[test]
    fn registry_has_six_profiles()
    {
        assert_eq!(ADAPTERS.len(), 6);
    }
}

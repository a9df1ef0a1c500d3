// SPDX-License-Identifier: MIT OR Apache-2.0
//! USB enumeration and adapter matching.
//!
//! Walks connected USB devices, matches each against the [adapter](crate::adapter) registry,
//! and selects among the matches by vid:pid, bus:addr, serial, or an interactive prompt.

use std::fmt::{self, Display};

use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use log::{error, warn};
use nusb::DeviceInfo;

use crate::adapter::{ADAPTERS, AdapterInstance, AdapterProfile};
use crate::error::{Error, ErrorKind};

/// Finds the registry entry that matches a given connected device, if any.
///
/// vid/pid rules take precedence over product-regex rules; a permission failure reading the
/// product descriptor is treated as "this rule doesn't match", never fatal.
fn match_profile(device: &DeviceInfo) -> Option<&'static AdapterProfile>
{
    let vid = device.vendor_id();
    let pid = device.product_id();

    if let Some(profile) = ADAPTERS.iter().find(|p| p.usb_vid_pid == Some((vid, pid))) {
        return Some(profile);
    }

    let product_string = device.product_string();
    if let Some(product_string) = product_string {
        for profile in ADAPTERS {
            if let Some(pattern) = profile.usb_product_regex {
                // Building a fresh Regex per device is wasteful but this runs over, at most,
                // a handful of connected USB devices once per invocation.
                if let Ok(re) = regex::Regex::new(pattern) {
                    if re.is_match(product_string) {
                        return Some(profile);
                    }
                }
            }
        }
    }

    None
}

fn to_instance(device: &DeviceInfo, profile: &'static AdapterProfile) -> AdapterInstance
{
    AdapterInstance {
        profile,
        bus: device.bus_number(),
        address: device.device_address(),
        vid: device.vendor_id(),
        pid: device.product_id(),
        serial: device.serial_number().map(str::to_string),
    }
}

/// A connected device that either matched a profile, or didn't.
enum Candidate
{
    Matched(AdapterInstance),
    Unmatched(DeviceInfo),
}

fn enumerate() -> Result<Vec<Candidate>, Error>
{
    let devices = nusb::list_devices()?;
    Ok(devices
        .map(|device| match match_profile(&device) {
            Some(profile) => Candidate::Matched(to_instance(&device, profile)),
            None => Candidate::Unmatched(device),
        })
        .collect())
}

/// Human-readable one-line description of a matched adapter, used both for the interactive
/// selection prompt and for `{MultipleMatch}` error display, so the two stay textually
/// consistent (grounded on `easierocd/usb.py::multiple_adapter_msg`).
impl Display for AdapterInstance
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(
            f,
            "{} (bus {} addr {}, vid:pid {:04x}:{:04x}",
            self.profile.name, self.bus, self.address, self.vid, self.pid
        )?;
        match &self.serial {
            Some(serial) => write!(f, ", serial {serial})"),
            None => write!(f, ")"),
        }
    }
}

fn multiple_match_error(matches: &[AdapterInstance]) -> Error
{
    let candidates = matches.iter().map(|m| m.to_string()).collect();
    ErrorKind::MultipleAdaptersMatch(candidates).error()
}

/// Selects a single adapter by exact vid:pid. Fails with `{NotFound}` if no connected device
/// at all has this vid:pid, `{NotSupported}` if one does but no registry rule matches it,
/// `{MultipleMatch}` if more than one matching, supported device does.
pub fn select_by_vid_pid(vid: u16, pid: u16) -> Result<AdapterInstance, Error>
{
    let candidates = enumerate()?;
    let device_exists = candidates.iter().any(|c| match c {
        Candidate::Matched(inst) => inst.vid == vid && inst.pid == pid,
        Candidate::Unmatched(dev) => dev.vendor_id() == vid && dev.product_id() == pid,
    });
    let matches: Vec<_> = candidates
        .into_iter()
        .filter_map(|c| match c {
            Candidate::Matched(inst) if inst.vid == vid && inst.pid == pid => Some(inst),
            _ => None,
        })
        .collect();
    pick_unique(matches, device_exists)
}

/// Selects a single adapter by USB bus:address.
pub fn select_by_bus_addr(bus: u8, addr: u8) -> Result<AdapterInstance, Error>
{
    let candidates = enumerate()?;
    let device_exists = candidates.iter().any(|c| match c {
        Candidate::Matched(inst) => inst.bus == bus && inst.address == addr,
        Candidate::Unmatched(dev) => dev.bus_number() == bus && dev.device_address() == addr,
    });
    let matches: Vec<_> = candidates
        .into_iter()
        .filter_map(|c| match c {
            Candidate::Matched(inst) if inst.bus == bus && inst.address == addr => Some(inst),
            _ => None,
        })
        .collect();
    pick_unique(matches, device_exists)
}

/// Selects a single adapter by serial number.
pub fn select_by_serial(serial: &str) -> Result<AdapterInstance, Error>
{
    let candidates = enumerate()?;
    let device_exists = candidates.iter().any(|c| match c {
        Candidate::Matched(inst) => inst.serial.as_deref() == Some(serial),
        Candidate::Unmatched(dev) => dev.serial_number() == Some(serial),
    });
    let matches: Vec<_> = candidates
        .into_iter()
        .filter_map(|c| match c {
            Candidate::Matched(inst) if inst.serial.as_deref() == Some(serial) => Some(inst),
            _ => None,
        })
        .collect();
    pick_unique(matches, device_exists)
}

/// Lists every connected device that matches a known adapter profile, reporting how many
/// devices were filtered out along the way for diagnostics.
pub fn list_all() -> Result<Vec<AdapterInstance>, Error>
{
    let candidates = enumerate()?;
    let mut matched = Vec::new();
    let mut filtered_out = 0usize;
    for candidate in candidates {
        match candidate {
            Candidate::Matched(inst) => matched.push(inst),
            Candidate::Unmatched(_) => filtered_out += 1,
        }
    }
    if filtered_out > 0 {
        warn!("{filtered_out} connected USB device(s) did not match any known debug adapter profile");
    }
    Ok(matched)
}

/// `device_exists` distinguishes "no device at all matched the selector" ({NotFound}) from
/// "a device matched the selector but no registry rule recognizes it" ({NotSupported}).
fn pick_unique(mut matches: Vec<AdapterInstance>, device_exists: bool) -> Result<AdapterInstance, Error>
{
    match matches.len() {
        0 if device_exists => Err(ErrorKind::AdapterNotSupported.error()),
        0 => Err(ErrorKind::AdapterNotFound.error()),
        1 => Ok(matches.remove(0)),
        _ => {
            error!("selector matched {} debug adapters, expected exactly one", matches.len());
            Err(multiple_match_error(&matches))
        },
    }
}

/// Resolves an adapter from the CLI's selector precedence (vid:pid > serial > bus:addr),
/// falling back to an interactive prompt when nothing unambiguous was given and exactly one
/// selector-free resolution isn't possible. In non-interactive mode, ambiguity is surfaced as
/// `{MultipleMatch}` instead of prompting.
pub fn resolve_adapter(
    vid_pid: Option<(u16, u16)>,
    serial: Option<&str>,
    bus_addr: Option<(u8, u8)>,
    non_interactive: bool,
) -> Result<AdapterInstance, Error>
{
    if let Some((vid, pid)) = vid_pid {
        return select_by_vid_pid(vid, pid);
    }
    if let Some(serial) = serial {
        return select_by_serial(serial);
    }
    if let Some((bus, addr)) = bus_addr {
        return select_by_bus_addr(bus, addr);
    }

    let mut matches = list_all()?;
    match matches.len() {
        0 => Err(ErrorKind::AdapterNotFound.error()),
        1 => Ok(matches.remove(0)),
        _ if non_interactive => Err(multiple_match_error(&matches)),
        _ => interactive_choose(matches),
    }
}

fn interactive_choose(matches: Vec<AdapterInstance>) -> Result<AdapterInstance, Error>
{
    let items: Vec<String> = matches.iter().map(|m| m.to_string()).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Multiple debug adapters found, choose one")
        .items(&items)
        .default(0)
        .interact()
        .map_err(|_| ErrorKind::AdapterNotFound.error())?;
    Ok(matches.into_iter().nth(selection).expect("index returned by dialoguer is always in range"))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn pick_unique_distinguishes_not_found_from_not_supported()
    {
        assert!(matches!(pick_unique(vec![], false).unwrap_err().kind, ErrorKind::AdapterNotFound));
        assert!(matches!(pick_unique(vec![], true).unwrap_err().kind, ErrorKind::AdapterNotSupported));
    }

    #[test]
    fn display_format_matches_multiple_match_wording()
    {
        let instance = AdapterInstance {
            profile: &ADAPTERS[0],
            bus: 2,
            address: 109,
            vid: 0x0483,
            pid: 0x374b,
            serial: Some("ABC123".into()),
        };
        let rendered = instance.to_string();
        assert!(rendered.contains("ST-Link/V2-1"));
        assert!(rendered.contains("bus 2 addr 109"));
        assert!(rendered.contains("0483:374b"));
        assert!(rendered.contains("ABC123"));
    }
}

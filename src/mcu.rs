// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vendor-MCU decoding: the STM32 `DBGMCU_IDCODE` register and the family -> flash-algorithm
//! and family -> OpenOCD target-file mappings derived from it.

use crate::error::{Error, ErrorKind};

/// Primary address of the DBGMCU IDCODE register on the Cortex-M PPB, valid for most STM32
/// families.
pub const DBGMCU_IDCODE_ADDR: u32 = 0xe004_2000;

/// STM32 L0 and F0 parts expose the same register at a different address. Recorded here per
/// the upstream documentation, but this revision only ever reads [`DBGMCU_IDCODE_ADDR`] -
/// see the crate's design notes for why the alternate address is not probed automatically.
#[allow(dead_code)]
pub const DBGMCU_IDCODE_ADDR_STM32L0F0: u32 = 0x4001_5800;

/// Decoded `DBGMCU_IDCODE`: raw dev/rev ids plus whatever human-readable strings the lookup
/// tables resolve them to. Unknown ids are not an error - `dev`/`rev` are simply `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McuInfo
{
    pub dev_id: u16,
    pub rev_id: u16,
    pub dev: Option<&'static str>,
    pub rev: Option<&'static str>,
}

impl McuInfo
{
    /// The family token used downstream (e.g. for flash-algorithm lookup), derived by
    /// lowercasing the first space-separated word of the device string and truncating it to
    /// the `stm32xx` prefix pattern. `None` when the device string itself is unresolved.
    pub fn family(&self) -> Option<String>
    {
        let dev = self.dev?;
        let first_word = dev.split_whitespace().next()?;
        Some(first_word.chars().take("stm32xx".len()).collect::<String>().to_lowercase())
    }
}

/// Decodes the 32-bit STM32 `DBGMCU_IDCODE` word.
///
/// References: RM0090 38.6.1, RM0038 38.6.1, RM0383 23.6.1, RM0367 33.4.1, RM0360 26.4.1,
/// RM0368 23.6.1, RM0008 31.6.1, RM0316 33.6.1.
pub fn dbgmcu_idcode_decode(v: u32) -> McuInfo
{
    let rev_id = ((v >> 16) & 0xffff) as u16;
    let dev_id = (v & 0xfff) as u16;

    let dev = device_category(dev_id);
    let rev = revision(dev_id, rev_id);

    McuInfo { dev_id, rev_id, dev, rev }
}

fn device_category(dev_id: u16) -> Option<&'static str>
{
    Some(match dev_id {
        0x413 => "STM32F405xx/07xx and STM32F415xx/17xx",
        0x419 => "STM32F42xxx and STM32F43xxx",
        0x416 => "STM32L1 Cat.1",
        0x429 => "STM32L1 Cat.2",
        0x427 => "STM32L1 Cat.3",
        0x436 => "STM32L1 Cat.4 or Cat.3",
        0x437 => "STM32L1 Cat.5",
        0x431 => "STM32F411xC/E",
        0x417 => "STM32L0x3",
        0x444 => "STM32F030x4 and STM32F070x6",
        0x445 => "STM32F070x6",
        0x440 => "STM32F070x8",
        0x448 => "STM32F070xB",
        0x442 => "STM32F070xC",
        0x423 => "STM32F401xB/C",
        0x433 => "STM32F401xD/E",
        0x412 => "STM32F1 low-density devices",
        0x410 => "STM32F1 medium-density devices",
        0x414 => "STM32F1 high-density devices",
        0x430 => "STM32F1 XL-density devices",
        0x418 => "STM32F1 connectivity devices",
        0x422 => "STM32F303xB/C and STM32F358",
        0x438 => "STM32F303x6/8 and STM32F328",
        0x446 => "STM32F303xD/E and STM32F398xE",
        _ => return None,
    })
}

fn revision(dev_id: u16, rev_id: u16) -> Option<&'static str>
{
    Some(match (dev_id, rev_id) {
        (0x413 | 0x419, 0x1000) => "Rev A",
        (0x413 | 0x419, 0x1001) => "Rev Z",
        (0x413 | 0x419, 0x1003) => "Rev Y",
        (0x413 | 0x419, 0x1007) => "Rev 1",
        (0x413 | 0x419, 0x2001) => "Rev 3",
        (0x416, 0x1000) => "Rev A",
        (0x416, 0x1008) => "Rev Y",
        (0x416, 0x1038) => "Rev W",
        (0x416, 0x1078) => "Rev V",
        (0x429, 0x1000) => "Rev A",
        (0x429, 0x1018) => "Rev Z",
        (0x427, 0x1018) => "Rev A",
        (0x427, 0x1038) => "Rev X",
        (0x436, 0x1000) => "Rev A",
        (0x436, 0x1008) => "Rev Z",
        (0x436, 0x1018) => "Rev Y",
        (0x437, 0x1000) => "Rev A",
        (0x431, 0x1000) => "Rev A",
        (0x417, 0x1000) => "Rev A",
        (0x417, 0x1008) => "Rev Z",
        (0x444 | 0x445 | 0x440 | 0x448 | 0x442, 0x1000) => "Rev 1.0",
        (0x444 | 0x445 | 0x440 | 0x448 | 0x442, 0x2000) => "Rev 2.0",
        (0x423, 0x1000) => "Rev Z",
        (0x423, 0x1001) => "Rev A",
        (0x433, 0x1000) => "Rev A",
        (0x433, 0x1001) => "Rev Z",
        (0x412, 0x1000) => "Rev A",
        (0x410, 0x0000) => "Rev A",
        (0x410, 0x2000) => "Rev B",
        (0x410, 0x2001) => "Rev Z",
        (0x410, 0x2003) => "Rev Y, 1, 2 or X",
        (0x414, 0x1000) => "Rev A or 1",
        (0x414, 0x1001) => "Rev Z",
        (0x414, 0x1003) => "Rev Y, 1, 2 or X",
        (0x430, 0x1000) => "Rev A",
        (0x418, 0x1000) => "Rev A",
        (0x418, 0x1001) => "Rev Z",
        (0x422 | 0x438 | 0x446, 0x1000) => "Rev A",
        _ => return None,
    })
}

/// Maps a STM32 family token (e.g. `"stm32f4"`) to the OpenOCD flash-algorithm token used by
/// `flash bank`. Unknown families fail with a value-domain error.
pub fn openocd_stm32_family_flash_algorithm(family: &str) -> Result<&'static str, Error>
{
    Ok(match family {
        "stm32f0" => "stm32f1x",
        "stm32l0" => "stm32lx",
        "stm32l1" => "stm32lx",
        "stm32f1" => "stm32f1x",
        "stm32f2" => "stm32f2x",
        "stm32f3" => "stm32f1x",
        "stm32f4" => "stm32f2x",
        "stm32l" => "stm32lx",
        other => return Err(ErrorKind::ValueError(format!("no flash algorithm known for family {other:?}")).error()),
    })
}

/// Maps a family token to the upstream OpenOCD target `.cfg` file name that family would
/// correspond to. Informational only: this system builds its TAP/target configuration
/// directly over RPC and never sources an OpenOCD config file, but the mapping is kept for
/// log messages that want to name the closest upstream equivalent.
#[allow(dead_code)]
pub fn openocd_stm32_target_file(family: &str) -> Result<&'static str, Error>
{
    Ok(match family {
        "stm32f0" => "stm32f0x.cfg",
        "stm32l0" | "stm32l1" | "stm32l" => "stm32l.cfg",
        "stm32f1" => "stm32f1x.cfg",
        "stm32f2" => "stm32f2x.cfg",
        "stm32f3" => "stm32f3x.cfg",
        "stm32f4" => "stm32f4x.cfg",
        other => return Err(ErrorKind::ValueError(format!("no target file known for family {other:?}")).error()),
    })
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn decodes_stm32l1_cat5()
    {
        let info = dbgmcu_idcode_decode(0x1000_6437);
        assert_eq!(info.dev_id, 0x437);
        assert_eq!(info.rev_id, 0x1000);
        assert_eq!(info.dev, Some("STM32L1 Cat.5"));
        assert_eq!(info.rev, Some("Rev A"));
    }

    #[test]
    fn decodes_stm32f42x()
    {
        let info = dbgmcu_idcode_decode(0x1003_6419);
        assert_eq!(info.dev_id, 0x419);
        assert_eq!(info.rev_id, 0x1003);
        assert_eq!(info.dev, Some("STM32F42xxx and STM32F43xxx"));
        assert_eq!(info.rev, Some("Rev Y"));
    }

    #[test]
    fn unknown_ids_are_informational_not_an_error()
    {
        let info = dbgmcu_idcode_decode(0xffff_ffff & !0xffff_0000);
        assert!(info.dev.is_none());
        assert!(info.rev.is_none());
    }

    #[test]
    fn flash_algorithm_table_is_exhaustive_over_known_families()
    {
        let cases = [
            ("stm32f0", "stm32f1x"),
            ("stm32l0", "stm32lx"),
            ("stm32l1", "stm32lx"),
            ("stm32f1", "stm32f1x"),
            ("stm32f2", "stm32f2x"),
            ("stm32f3", "stm32f1x"),
            ("stm32f4", "stm32f2x"),
            ("stm32l", "stm32lx"),
        ];
        for (family, algo) in cases {
            assert_eq!(openocd_stm32_family_flash_algorithm(family).unwrap(), algo);
        }
        assert!(openocd_stm32_family_flash_algorithm("stm32f7").is_err());
    }

    #[test]
    fn family_token_derived_from_device_string()
    {
        let info = dbgmcu_idcode_decode(0x1000_6437);
        assert_eq!(info.family().as_deref(), Some("stm32l1"));
    }
}

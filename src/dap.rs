// SPDX-License-Identifier: MIT OR Apache-2.0
//! ARM ADIv5 Debug Port decoding.
//!
//! Pure bit-level decode of a 32-bit DPIDR word, per the ADIv5 spec: revision[31:28],
//! partno[27:20], mindp[16], version[15:12], designer[11:1], RAO[0].

use bitfield::bitfield;
use jep106::JEP106Code;

bitfield! {
    #[derive(Clone, Copy)]
    struct Dpidr(u32);
    impl Debug;
    u8, revision, _: 31, 28;
    u8, part_no, _: 27, 20;
    min_dp, _: 16;
    u8, version, _: 15, 12;
    designer, _: 11, 1;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
}

/// Whether the MINDP (minimal Debug Port) feature is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinDpSupport
{
    NotImplemented,
    Implemented,
}

/// Decoded DAP IDCODE: designer (JEDEC), part-number, architecture version, mindp flag, raw idcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DapInfo
{
    pub idcode: u32,
    pub revision: u8,
    pub part_no: u8,
    pub min_dp: MinDpSupport,
    /// Raw DP architecture version field; 0 means DPIDR is not implemented.
    pub version: u8,
    pub designer: JEP106Code,
}

/// Decodes a 32-bit DPIDR word per the ADIv5 bit layout.
///
/// This function is total: every `u32` produces a `DapInfo`. `version == 0` is the explicit
/// "DPIDR not implemented" sentinel and every other field is still the masked shift of `v`,
/// it is not an error case.
pub fn dpidr_decode(idcode: u32) -> DapInfo
{
    let dpidr = Dpidr(idcode);

    DapInfo {
        idcode,
        revision: dpidr.revision(),
        part_no: dpidr.part_no(),
        min_dp: if dpidr.min_dp() {
            MinDpSupport::Implemented
        } else {
            MinDpSupport::NotImplemented
        },
        version: dpidr.version(),
        designer: JEP106Code::new(dpidr.jep_cc(), dpidr.jep_id()),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn zero_word_is_unimplemented_sentinel()
    {
        let info = dpidr_decode(0);
        assert_eq!(info.version, 0);
        assert_eq!(info.revision, 0);
        assert_eq!(info.part_no, 0);
        assert_eq!(info.min_dp, MinDpSupport::NotImplemented);
    }

    #[test]
    fn decode_is_total_and_matches_masked_shifts()
    {
        // Cortex-M3 r1 DPIDR as seen through an ST-Link, from the original detection tooling.
        let v = 0x1ba0_0477u32;
        let info = dpidr_decode(v);
        assert_eq!(info.revision, ((v >> 28) & 0x0f) as u8);
        assert_eq!(info.part_no, ((v >> 20) & 0xff) as u8);
        assert_eq!(info.version, ((v >> 12) & 0x0f) as u8);
        assert_eq!(info.min_dp == MinDpSupport::Implemented, (v >> 16) & 0x01 != 0);
    }

    #[test]
    fn arm_designer_decodes_to_known_jep106_identity()
    {
        // ARM's JEP106 continuation/identity code is cc=0x4, id=0x3b (designer field 0x23b).
        let v = 0x2ba0_1477u32; // Cortex-M4 r0, designer == 0x23b
        let info = dpidr_decode(v);
        assert_eq!(info.designer.cc, 0x4);
        assert_eq!(info.designer.id, 0x3b);
    }
}

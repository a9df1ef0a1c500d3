// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod adapter;
pub mod dap;
pub mod error;
pub mod mcu;
pub mod openocd;
pub mod probe;
pub mod pty;
pub mod supervisor;
pub mod usb;

// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod gdb;
pub mod list;
pub mod reserved;
pub mod stop;

// SPDX-License-Identifier: MIT OR Apache-2.0
//! `setup` and `program`: reserved for a future tool version.
//!
//! Grounded on `easierocd.py::easierocd_setup`/`easierocd_program`, both of which are no-ops in
//! the prototype. `program` in particular is deliberately left unimplemented: the prototype's
//! comments warn that OpenOCD's own `program` facility self-terminates the daemon, but do not
//! specify what should replace it, so this system does not guess.

use log::warn;

use eocd::error::Error;

pub fn run(command_name: &str) -> Result<i32, Error>
{
    warn!("command {command_name:?} is reserved for a future tool version");
    Ok(0)
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! `stop`: kill every daemon and PTY-holder this tool has rendezvous records for.

use log::info;

use eocd::error::Error;
use eocd::supervisor;

pub fn run() -> Result<i32, Error>
{
    let stopped = supervisor::stop_all()?;
    info!("stopped {stopped} daemon(s)");
    Ok(0)
}

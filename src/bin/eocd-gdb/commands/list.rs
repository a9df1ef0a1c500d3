// SPDX-License-Identifier: MIT OR Apache-2.0
//! `list`: print every connected, recognized debug adapter.

use eocd::error::Error;
use eocd::usb;

pub fn run() -> Result<i32, Error>
{
    let adapters = usb::list_all()?;

    if adapters.is_empty() {
        println!("no supported debug adapters found");
        return Ok(0);
    }

    for adapter in &adapters {
        println!("{adapter}");
    }

    Ok(0)
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Framed line RPC client talking to the OpenOCD-compatible debug daemon over TCP.
//!
//! Grounded on `easierocd/openocd.py::OpenOcdRpc`: both directions terminate every message
//! with the sentinel byte `0x1A`. The daemon's RPC port is a raw Tcl interpreter, so any
//! command is just a Tcl command string; this client only wraps the handful of commands the
//! probe state machine and supervisor actually need.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::debug;
use regex::Regex;

use crate::error::{Error, ErrorKind};

const SEPARATOR: u8 = 0x1a;
const BUFSIZE: usize = 4096;

/// Parsed form of `ocd_poll`'s multi-line status blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatus
{
    pub current_mode: Option<String>,
    pub xpsr: Option<String>,
    pub pc: Option<String>,
    pub msp: Option<String>,
}

pub struct RpcClient
{
    stream: TcpStream,
    pending: Vec<u8>,
    /// The low-level transport in use, cached after the first `get_transport()` call so that
    /// `idcode()` doesn't have to round-trip for it every time.
    transport: Option<String>,
}

impl RpcClient
{
    /// Connects to the daemon's TCL RPC port. Does not retry; the supervisor owns retry
    /// policy (bounded on spawn, per §4.4).
    pub fn connect(port: u16) -> Result<Self, Error>
    {
        let stream = TcpStream::connect(("127.0.0.1", port))?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream, pending: Vec::new(), transport: None })
    }

    pub fn send_msg(&mut self, cmd: &str) -> Result<(), Error>
    {
        debug!("openocd rpc <- {cmd:?}");
        self.stream.write_all(cmd.as_bytes())?;
        self.stream.write_all(&[SEPARATOR])?;
        Ok(())
    }

    /// Reads from the socket until a complete `0x1A`-terminated message is available,
    /// carrying any partial tail over to the next call.
    pub fn recv_msg(&mut self) -> Result<Vec<u8>, Error>
    {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == SEPARATOR) {
                let mut msg: Vec<u8> = self.pending.drain(..=pos).collect();
                msg.pop();
                debug!("openocd rpc -> {:?}", String::from_utf8_lossy(&msg));
                return Ok(msg);
            }

            let mut buf = [0u8; BUFSIZE];
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(ErrorKind::ConnectionReset.error());
            }
            self.pending.extend_from_slice(&buf[..n]);
        }
    }

    /// Sends `cmd`, expecting an empty response; a non-empty response is a protocol error.
    pub fn command(&mut self, cmd: &str) -> Result<(), Error>
    {
        self.send_msg(cmd)?;
        let response = self.recv_msg()?;
        if !response.is_empty() {
            return Err(ErrorKind::ProtocolError(cmd.to_string(), String::from_utf8_lossy(&response).into_owned())
                .error());
        }
        Ok(())
    }

    /// Sends `cmd`, returning the raw response bytes.
    pub fn call(&mut self, cmd: &str) -> Result<Vec<u8>, Error>
    {
        self.send_msg(cmd)?;
        self.recv_msg()
    }

    fn call_str(&mut self, cmd: &str) -> Result<String, Error>
    {
        Ok(String::from_utf8_lossy(&self.call(cmd)?).into_owned())
    }

    pub fn initialized(&mut self) -> Result<bool, Error>
    {
        let response = self.call_str("initialized")?;
        Ok(response.trim().parse::<i32>().unwrap_or(0) != 0)
    }

    pub fn target_names(&mut self) -> Result<Vec<String>, Error>
    {
        let response = self.call_str("ocd_target names")?;
        Ok(response.split_whitespace().map(str::to_string).collect())
    }

    pub fn poll(&mut self) -> Result<PollStatus, Error>
    {
        let response = self.call_str("ocd_poll")?;
        if response.contains("communication failure") {
            debug!("ocd_poll: communication failure");
            return Err(ErrorKind::TargetCommunication.error());
        }

        let mut status = PollStatus::default();

        if let Ok(re) = Regex::new(r"current mode:\s*(\w*)") {
            if let Some(caps) = re.captures(&response) {
                status.current_mode = Some(caps[1].to_lowercase());
            }
        }
        if let Ok(re) = Regex::new(r"xPSR:\s*0x(\w*)\s*pc:\s*0x(\w*)\s*msp:\s*0x(\w*)") {
            if let Some(caps) = re.captures(&response) {
                status.xpsr = Some(caps[1].to_string());
                status.pc = Some(caps[2].to_string());
                status.msp = Some(caps[3].to_string());
            }
        }

        Ok(status)
    }

    /// Reads the DAP IDCODE. The command used depends on the low-level transport: `hla_`
    /// prefixed transports use `capture hla_idcode`, everything else uses `capture dap_idcode`.
    pub fn idcode(&mut self) -> Result<u32, Error>
    {
        if self.transport.is_none() {
            self.transport = Some(self.get_transport()?);
        }
        let transport = self.transport.clone().expect("populated above");

        let cmd = if transport.starts_with("hla_") {
            "capture hla_idcode"
        } else {
            "capture dap_idcode"
        };

        let response = self.call_str(cmd)?;
        let trimmed = response.trim().trim_start_matches("0x");
        u32::from_str_radix(trimmed, 16).map_err(|_| ErrorKind::TargetDap.error())
    }

    pub fn read_word(&mut self, addr: u32) -> Result<u32, Error>
    {
        let response = self.call_str(&format!("ocd_mdw 0x{addr:x}"))?;
        let value = response
            .split(": ")
            .nth(1)
            .ok_or_else(|| ErrorKind::TargetMemoryAccess.error())?;
        u32::from_str_radix(value.trim(), 16).map_err(|_| ErrorKind::TargetMemoryAccess.error())
    }

    pub fn read_mem_into(&mut self, addr: u32, out: &mut [u8]) -> Result<(), Error>
    {
        let scratch = tempfile::NamedTempFile::new()?;
        let path = scratch.path().to_string_lossy().into_owned();

        let response = self.call_str(&format!("ocd_dump_image {path} 0x{addr:x} {}", out.len()))?;
        if response.contains("address option value ") && response.contains(" is not valid") {
            return Err(ErrorKind::ValueError(response).error());
        }
        if !response.starts_with("dumped ") {
            return Err(ErrorKind::ProtocolError("ocd_dump_image".to_string(), response).error());
        }

        let mut file = scratch.reopen()?;
        file.read_exact(out)?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn read_mem(&mut self, addr: u32, byte_count: usize) -> Result<Vec<u8>, Error>
    {
        let mut out = vec![0u8; byte_count];
        self.read_mem_into(addr, &mut out)?;
        Ok(out)
    }

    pub fn write_mem(&mut self, addr: u32, data: &[u8]) -> Result<(), Error>
    {
        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(data)?;
        scratch.flush()?;
        let path = scratch.path().to_string_lossy().into_owned();

        let response = self.call_str(&format!("ocd_load_image {path} 0x{addr:x} bin"))?;
        if response.contains("addr option value ") && response.contains(" is not valid") {
            return Err(ErrorKind::ValueError(response).error());
        }
        if !response.contains("downloaded ") || !response.contains(" bytes in ") {
            return Err(ErrorKind::ProtocolError("ocd_load_image".to_string(), response).error());
        }
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<(), Error>
    {
        match self.call_str("ocd_shutdown") {
            Ok(response) => {
                if response.trim() != "shutdown command invoked" {
                    return Err(ErrorKind::ProtocolError("ocd_shutdown".to_string(), response).error());
                }
                Ok(())
            },
            Err(e) if matches!(e.kind, ErrorKind::ConnectionReset) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The daemon's own PID, used by the supervisor's adoption identity check. The daemon's
    /// RPC port is a Tcl interpreter, so this is simply the Tcl builtin `pid` command.
    pub fn getpid(&mut self) -> Result<u32, Error>
    {
        let response = self.call_str("pid")?;
        response
            .trim()
            .parse()
            .map_err(|_| ErrorKind::ProtocolError("pid".to_string(), response).error())
    }

    pub fn tcl_port(&mut self) -> Result<u16, Error>
    {
        let response = self.call_str("ocd_tcl_port")?;
        response
            .trim()
            .parse()
            .map_err(|_| ErrorKind::ProtocolError("ocd_tcl_port".to_string(), response).error())
    }

    pub fn gdb_port(&mut self) -> Result<u16, Error>
    {
        let response = self.call_str("ocd_gdb_port")?;
        response
            .trim()
            .parse()
            .map_err(|_| ErrorKind::ProtocolError("ocd_gdb_port".to_string(), response).error())
    }

    /// Reads back the daemon's telnet port. No operation in this revision calls this outside
    /// of diagnostics; kept because the rendezvous record conceptually has room for it and a
    /// future `eocd telnet` command would need it.
    #[allow(dead_code)]
    pub fn telnet_port(&mut self) -> Result<u16, Error>
    {
        let response = self.call_str("ocd_telnet_port")?;
        response
            .trim()
            .parse()
            .map_err(|_| ErrorKind::ProtocolError("ocd_telnet_port".to_string(), response).error())
    }

    pub fn get_transport(&mut self) -> Result<String, Error>
    {
        let response = self.call_str("ocd_transport select")?;
        Ok(response.trim().to_string())
    }

    pub fn set_arm_semihosting(&mut self, enable: bool) -> Result<(), Error>
    {
        let state = if enable { "enable" } else { "disable" };
        self.call(&format!("arm semihosting {state}"))?;
        Ok(())
    }

    pub fn connect_timeout(addr: std::net::SocketAddr, timeout: Duration) -> Result<Self, Error>
    {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream, pending: Vec::new(), transport: None })
    }
}

#[cfg(test)]
mod tests
{
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn fake_server(responses: Vec<&'static [u8]>) -> u16
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for response in responses {
                // Drain exactly one framed request before replying.
                let mut byte = [0u8; 1];
                loop {
                    stream.read_exact(&mut byte).unwrap();
                    if byte[0] == SEPARATOR {
                        break;
                    }
                }
                stream.write_all(response).unwrap();
                stream.write_all(&[SEPARATOR]).unwrap();
            }
        });
        port
    }

    #[test]
    fn recv_msg_carries_partial_tail_across_reads()
    {
        let port = fake_server(vec![b"hello", b"world"]);
        let mut client = RpcClient::connect(port).unwrap();
        assert_eq!(client.call("first").unwrap(), b"hello");
        assert_eq!(client.call("second").unwrap(), b"world");
    }

    #[test]
    fn initialized_parses_boolean_from_integer_string()
    {
        let port = fake_server(vec![b"1", b"0"]);
        let mut client = RpcClient::connect(port).unwrap();
        assert!(client.initialized().unwrap());
        assert!(!client.initialized().unwrap());
    }

    #[test]
    fn poll_detects_communication_failure()
    {
        let port = fake_server(vec![b"jtag status contains invalid mode value - communication failure\n"]);
        let mut client = RpcClient::connect(port).unwrap();
        let err = client.poll().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TargetCommunication));
    }

    #[test]
    fn poll_extracts_registers_on_success()
    {
        let port = fake_server(vec![
            b"target halted due to breakpoint, current mode: Thread \nxPSR: 0x81000000 pc: 0x08000ede msp: 0x20014000\n",
        ]);
        let mut client = RpcClient::connect(port).unwrap();
        let status = client.poll().unwrap();
        assert_eq!(status.current_mode.as_deref(), Some("thread"));
        assert_eq!(status.pc.as_deref(), Some("08000ede"));
        assert_eq!(status.msp.as_deref(), Some("20014000"));
    }

    #[test]
    fn target_names_splits_on_whitespace()
    {
        let port = fake_server(vec![b"stm32l1.cpu "]);
        let mut client = RpcClient::connect(port).unwrap();
        assert_eq!(client.target_names().unwrap(), vec!["stm32l1.cpu".to_string()]);
    }

    #[test]
    fn command_rejects_non_empty_response()
    {
        let port = fake_server(vec![b"unexpected"]);
        let mut client = RpcClient::connect(port).unwrap();
        let err = client.command("some_cmd").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ProtocolError(_, _)));
    }
}

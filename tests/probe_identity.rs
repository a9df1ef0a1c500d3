// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end checks for the pieces of probe identity that cross the process boundary: the
//! framed RPC wire parser against a real TCP socket, and the adapter-name sanitizer that keys
//! rendezvous files on disk.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use eocd::adapter::{ADAPTERS, AdapterInstance, path_safe_str};
use eocd::openocd::RpcClient;

fn spawn_fake_daemon(exchanges: Vec<(&'static str, &'static [u8])>) -> u16
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake daemon socket");
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept from client");
        for (expected_cmd, response) in exchanges {
            let mut received = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                stream.read_exact(&mut byte).expect("read request byte");
                if byte[0] == 0x1a {
                    break;
                }
                received.push(byte[0]);
            }
            assert_eq!(String::from_utf8_lossy(&received), expected_cmd);

            stream.write_all(response).expect("write response");
            stream.write_all(&[0x1a]).expect("write terminator");
        }
    });

    port
}

#[test]
fn rpc_client_round_trips_a_realistic_session()
{
    let port = spawn_fake_daemon(vec![
        ("initialized", b"1"),
        ("ocd_target names", b"stm32l1.cpu "),
        (
            "ocd_poll",
            b"target halted due to breakpoint, current mode: Thread \nxPSR: 0x81000000 pc: 0x08000ede msp: 0x20014000\n",
        ),
        ("ocd_transport select", b"hla_swd"),
        ("capture hla_idcode", b"0x1ba01477"),
        ("ocd_mdw 0xe0042000", b"0xe0042000: 10006437 \n"),
        ("ocd_gdb_port", b"3333"),
    ]);

    let mut rpc = RpcClient::connect(port).expect("connect to fake daemon");

    assert!(rpc.initialized().unwrap());
    assert_eq!(rpc.target_names().unwrap(), vec!["stm32l1.cpu".to_string()]);

    let status = rpc.poll().unwrap();
    assert_eq!(status.current_mode.as_deref(), Some("thread"));
    assert_eq!(status.pc.as_deref(), Some("08000ede"));

    let idcode = rpc.idcode().unwrap();
    assert_eq!(idcode, 0x1ba0_1477);

    let mcu_word = rpc.read_word(0xe004_2000).unwrap();
    assert_eq!(mcu_word, 0x1000_6437);

    assert_eq!(rpc.gdb_port().unwrap(), 3333);
}

#[test]
fn rpc_client_carries_partial_message_tails_across_socket_reads()
{
    let port = spawn_fake_daemon(vec![("call_one", b"first-response"), ("call_two", b"second-response")]);

    let mut rpc = RpcClient::connect(port).expect("connect to fake daemon");
    assert_eq!(rpc.call("call_one").unwrap(), b"first-response");
    assert_eq!(rpc.call("call_two").unwrap(), b"second-response");
}

#[test]
fn path_safe_str_keys_rendezvous_files_consistently_with_the_registry()
{
    // Every registry name must survive sanitization without becoming ambiguous with another.
    let sanitized: Vec<String> = ADAPTERS.iter().map(|p| path_safe_str(p.name)).collect();
    let mut deduped = sanitized.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(sanitized.len(), deduped.len(), "two adapter names sanitize to the same string");

    assert_eq!(path_safe_str("ST-Link/V2-1"), "ST-LinkV2-1");
    assert_eq!(path_safe_str("TI ICDI"), "TIICDI");
    assert_eq!(path_safe_str("LPC-Link 2"), "LPC-Link2");
}

#[test]
fn adapter_instance_path_safe_name_matches_free_function()
{
    let instance =
        AdapterInstance { profile: &ADAPTERS[0], bus: 2, address: 109, vid: 0x0483, pid: 0x374b, serial: None };
    assert_eq!(instance.path_safe_name(), path_safe_str(instance.profile.name));
}

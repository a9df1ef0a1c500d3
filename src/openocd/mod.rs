// SPDX-License-Identifier: MIT OR Apache-2.0
//! The daemon RPC client and the data it parses out of its responses.

pub mod rpc;

pub use rpc::{PollStatus, RpcClient};

//! PHY control-endpoint client.
//!
//! The PHY front-end exposes a line-delimited JSON request/response
//! endpoint on a localhost UDP port:
//!
//! | request | response |
//! |---|---|
//! | `{"cmd":"ping"}` | `{"reply":"pong"}` |
//! | `{"cmd":"set_tx_gain","value":f}` | `{"ok":true}` |
//! | `{"cmd":"set_rx_gain","value":f}` | `{"ok":true}` |
//! | `{"cmd":"get_gains"}` | `{"tx":f,"rx":f}` |
//!
//! Control failures are never fatal to the node: the follower logs them
//! and holds its current gain.

use serde_json::{json, Value};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// How long to wait for a control response.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control endpoint i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("control endpoint returned non-ok reply: {0}")]
    BadReply(String),
}

/// Client for one node's local PHY control port.
pub struct PhyControl {
    sock: UdpSocket,
    addr: SocketAddr,
}

impl PhyControl {
    pub fn connect(ctrl_port: u16) -> Result<Self, ControlError> {
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        sock.set_read_timeout(Some(RESPONSE_TIMEOUT))?;
        Ok(Self {
            sock,
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, ctrl_port)),
        })
    }

    /// Readiness probe.
    pub fn ping(&self) -> Result<(), ControlError> {
        let reply = self.request(&json!({"cmd": "ping"}))?;
        if reply.get("reply").and_then(Value::as_str) == Some("pong") {
            Ok(())
        } else {
            Err(ControlError::BadReply(reply.to_string()))
        }
    }

    /// Set normalized TX gain in `[0, 1]`.
    pub fn set_tx_gain(&self, value: f32) -> Result<(), ControlError> {
        self.expect_ok(&json!({"cmd": "set_tx_gain", "value": value}))
    }

    /// Set normalized RX gain in `[0, 1]`.
    pub fn set_rx_gain(&self, value: f32) -> Result<(), ControlError> {
        self.expect_ok(&json!({"cmd": "set_rx_gain", "value": value}))
    }

    /// Read back the current gains as `(tx, rx)`.
    pub fn get_gains(&self) -> Result<(f32, f32), ControlError> {
        let reply = self.request(&json!({"cmd": "get_gains"}))?;
        match (
            reply.get("tx").and_then(Value::as_f64),
            reply.get("rx").and_then(Value::as_f64),
        ) {
            (Some(tx), Some(rx)) => Ok((tx as f32, rx as f32)),
            _ => Err(ControlError::BadReply(reply.to_string())),
        }
    }

    fn expect_ok(&self, req: &Value) -> Result<(), ControlError> {
        let reply = self.request(req)?;
        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(ControlError::BadReply(reply.to_string()))
        }
    }

    fn request(&self, req: &Value) -> Result<Value, ControlError> {
        let mut line = req.to_string();
        line.push('\n');
        self.sock.send_to(line.as_bytes(), self.addr)?;

        let mut buf = [0u8; 1024];
        let n = self.sock.recv(&mut buf)?;
        serde_json::from_slice(&buf[..n]).map_err(|e| ControlError::BadReply(e.to_string()))
    }
}

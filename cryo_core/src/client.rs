//! Client side of the agent line protocol.
//!
//! Every call opens a fresh connection, sends one request line and reads the
//! reply up to newline or EOF. Timeouts, refused connections and the failure
//! token are retried under a fixed-delay policy; all opcodes are safe to
//! resend.
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::{AgentSettings, RetryPolicy};
use crate::error::{CommandError, DeliveryError};
use crate::protocol::{
    ChannelCommand, DeviceCatalog, FAIL_TOKEN, HardwareCommands, OK_TOKEN, catalog_from_json,
};

/// Largest reply the client will read; catalogs are a few KiB.
const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct AgentClient {
    addr: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl AgentClient {
    pub fn new(addr: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            retry,
        }
    }

    pub fn from_settings(s: &AgentSettings) -> Self {
        Self::new(s.addr(), s.timeout, s.retry)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn resolve(&self) -> Result<SocketAddr, DeliveryError> {
        let connect_err = |source| DeliveryError::Connect {
            addr: self.addr.clone(),
            source,
        };
        self.addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| connect_err(std::io::Error::other("address resolved to nothing")))
    }

    /// One attempt: connect, send, read the trimmed reply.
    fn exchange(&self, line: &str) -> Result<String, DeliveryError> {
        let io_err = |source| DeliveryError::Io {
            addr: self.addr.clone(),
            source,
        };
        let sock = self.resolve()?;
        let mut stream =
            TcpStream::connect_timeout(&sock, self.timeout).map_err(|source| DeliveryError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        stream.set_read_timeout(Some(self.timeout)).map_err(io_err)?;
        stream.set_write_timeout(Some(self.timeout)).map_err(io_err)?;
        stream.write_all(line.as_bytes()).map_err(io_err)?;
        stream.write_all(b"\n").map_err(io_err)?;
        stream.flush().map_err(io_err)?;

        let mut raw = Vec::with_capacity(16);
        let mut limited = (&stream).take(MAX_RESPONSE_BYTES);
        let mut chunk = [0u8; 512];
        loop {
            let n = limited.read(&mut chunk).map_err(io_err)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            if raw.contains(&b'\n') {
                break;
            }
        }
        let text = String::from_utf8_lossy(&raw);
        let reply = text.split('\n').next().unwrap_or_default().trim().to_string();
        if reply.is_empty() {
            return Err(DeliveryError::BadResponse(String::new()));
        }
        Ok(reply)
    }

    fn exchange_checked(&self, line: &str) -> Result<String, DeliveryError> {
        let reply = self.exchange(line)?;
        if reply == FAIL_TOKEN {
            return Err(DeliveryError::Rejected {
                request: line.to_string(),
            });
        }
        Ok(reply)
    }

    /// Deliver `cmd`, retrying on any failure, and return the agent's reply.
    pub fn send(&self, cmd: &ChannelCommand) -> Result<String, DeliveryError> {
        let line = cmd.to_line();
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.exchange_checked(&line) {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt >= attempts => {
                    tracing::warn!(request = %line, attempts, error = %e, "delivery failed");
                    return Err(DeliveryError::Exhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::debug!(request = %line, attempt, attempts, error = %e, "retrying");
                    std::thread::sleep(self.retry.delay);
                    attempt += 1;
                }
            }
        }
    }

    fn send_status(&self, cmd: ChannelCommand) -> Result<(), CommandError> {
        match self.send(&cmd)?.as_str() {
            OK_TOKEN => Ok(()),
            other => Err(DeliveryError::BadResponse(other.to_string()).into()),
        }
    }
}

impl HardwareCommands for AgentClient {
    fn set_switch_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), CommandError> {
        self.send_status(ChannelCommand::set_switch_voltage(device, channel, volts))
    }

    fn turn_off_switch(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.send_status(ChannelCommand::turn_off_switch(device, channel))
    }

    fn set_heater_temperature(&self, device: &str, channel: &str, kelvin: f64) -> Result<(), CommandError> {
        self.send_status(ChannelCommand::set_heater_temperature(device, channel, kelvin))
    }

    fn turn_off_heater(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.send_status(ChannelCommand::turn_off_heater(device, channel))
    }

    fn toggle_heater(&self, device: &str, channel: &str, on: bool) -> Result<(), CommandError> {
        self.send_status(ChannelCommand::toggle_heater(device, channel, on))
    }

    fn set_still_percentage(&self, device: &str, channel: &str, percent: f64) -> Result<(), CommandError> {
        self.send_status(ChannelCommand::set_still_percentage(device, channel, percent))
    }

    fn turn_off_still(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.send_status(ChannelCommand::turn_off_still(device, channel))
    }

    fn get_devices(&self) -> Result<DeviceCatalog, CommandError> {
        let reply = self.send(&ChannelCommand::get_devices())?;
        catalog_from_json(&reply)
            .map_err(|e| DeliveryError::BadResponse(format!("{reply} ({e})")).into())
    }
}

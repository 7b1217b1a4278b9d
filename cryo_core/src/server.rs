//! TCP front end of the hardware agent.
//!
//! One request per connection: read a line, run it, write the status token
//! (or catalog JSON) plus a newline, close. Connections are handled one at a
//! time; the hardware lock would serialize them anyway.
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use eyre::WrapErr;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use crate::cancel::CancelToken;
use crate::protocol::{
    ChannelCommand, FAIL_TOKEN, HardwareCommands, MAX_REQUEST_BYTES, OK_TOKEN, catalog_to_json,
};

/// How long a connected client may take to send its request line.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Bytes of an oversized request discarded before replying.
const MAX_DRAIN_BYTES: u64 = 64 * 1024;
const LISTENER: Token = Token(0);

/// Turn one request line into the response body (without newline).
pub fn handle_request(line: &str, handler: &dyn HardwareCommands) -> String {
    let cmd = match ChannelCommand::parse(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::warn!(request = %line.trim(), error = %e, "rejected request");
            return FAIL_TOKEN.to_string();
        }
    };
    match cmd.apply(handler) {
        Ok(Some(catalog)) => catalog_to_json(&catalog),
        Ok(None) => OK_TOKEN.to_string(),
        Err(e) => {
            tracing::error!(request = %cmd, error = %e, "command failed");
            FAIL_TOKEN.to_string()
        }
    }
}

pub struct AgentServer {
    listener: TcpListener,
    poll: Poll,
    handler: Arc<dyn HardwareCommands>,
    /// Longest wait for a connection before the stop flag is checked again.
    accept_timeout: Duration,
}

impl AgentServer {
    pub fn bind(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        handler: Arc<dyn HardwareCommands>,
        accept_timeout: Duration,
    ) -> eyre::Result<Self> {
        let sock = addr
            .to_socket_addrs()
            .wrap_err_with(|| format!("resolve {addr:?}"))?
            .next()
            .ok_or_else(|| eyre::eyre!("{addr:?} resolved to no address"))?;
        let mut listener = TcpListener::bind(sock).wrap_err_with(|| format!("bind {sock}"))?;
        let poll = Poll::new().wrap_err("create poll instance")?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .wrap_err("register listener")?;
        Ok(Self {
            listener,
            poll,
            handler,
            accept_timeout: accept_timeout.max(Duration::from_millis(1)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept without blocking; `Ok(None)` when nobody is waiting.
    fn try_accept(&self) -> std::io::Result<Option<TcpStream>> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(TcpStream::from(stream))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serve until `stop` is cancelled. The flag is checked on every poll
    /// timeout and between connections.
    pub fn serve(&mut self, stop: &CancelToken) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, "agent listening");
        }
        let mut events = Events::with_capacity(8);
        while !stop.is_cancelled() {
            if let Err(e) = self.poll.poll(&mut events, Some(self.accept_timeout)) {
                if e.kind() != ErrorKind::Interrupted {
                    tracing::warn!(error = %e, "poll failed");
                    std::thread::sleep(self.accept_timeout);
                }
                continue;
            }
            // Readiness is edge-triggered: take every queued connection.
            while !stop.is_cancelled() {
                match self.try_accept() {
                    Ok(Some(stream)) => {
                        if let Err(e) = self.handle_connection(stream) {
                            tracing::warn!(error = %e, "connection error");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        }
        tracing::info!("agent stopped");
    }

    fn handle_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT))?;
        let mut reader = BufReader::new((&stream).take(MAX_REQUEST_BYTES as u64 + 1));
        let mut buf = Vec::with_capacity(128);
        reader.read_until(b'\n', &mut buf)?;
        let too_long = buf.len() > MAX_REQUEST_BYTES && buf.last() != Some(&b'\n');
        let response = if too_long {
            tracing::warn!(bytes = buf.len(), "request line too long");
            // Consume the rest of the line so the reply is not lost to a reset.
            let mut rest = BufReader::new((&stream).take(MAX_DRAIN_BYTES));
            let _ = rest.read_until(b'\n', &mut Vec::new());
            FAIL_TOKEN.to_string()
        } else {
            match std::str::from_utf8(&buf) {
                Ok(line) => handle_request(line, self.handler.as_ref()),
                Err(_) => FAIL_TOKEN.to_string(),
            }
        };
        drop(reader);
        let mut out = &stream;
        out.write_all(response.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        let _ = stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    /// Run the accept loop on its own thread.
    pub fn spawn(self) -> std::io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let stop = CancelToken::new();
        let stop_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name("cryo-agent".into())
            .spawn(move || {
                let mut server = self;
                server.serve(&stop_thread);
            })?;
        Ok(ServerHandle {
            addr,
            stop,
            join: Some(join),
        })
    }
}

/// Running accept loop. Dropping it stops and joins the thread.
pub struct ServerHandle {
    addr: SocketAddr,
    stop: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.join.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("agent thread joined"),
                Err(e) => tracing::warn!(?e, "agent thread panicked during shutdown"),
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

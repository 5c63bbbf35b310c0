//! UDP transport: bind a socket, send/receive datagrams with a timeout, and
//! track connected clients by address with inactivity eviction.
//!
//! There is no TCP control channel here — the wire protocol is UDP-only, so
//! a malformed or lost datagram is just another day at the office rather
//! than a connection-ending event.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::warn;

/// Datagrams above this size are rejected by the OS/socket layer long
/// before the wire codec sees them; this is just a sane receive buffer.
pub const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Thin wrapper around a bound UDP socket.
pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends one datagram. Failures are logged and surfaced as `false`
    /// rather than propagated — a single failed send must not halt the
    /// broadcast loop.
    pub async fn send(&self, bytes: &[u8], to: SocketAddr) -> bool {
        match self.socket.send_to(bytes, to).await {
            Ok(_) => true,
            Err(e) => {
                warn!(component = "transport", error = %e, %to, "udp send failed");
                false
            }
        }
    }

    /// Waits up to `timeout` for one datagram. Returns `None` on timeout —
    /// this is the expected steady-state outcome of the receive loop, not
    /// an error condition.
    pub async fn receive(
        &self,
        timeout: Duration,
    ) -> anyhow::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        match time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => Ok(Some((buf[..n].to_vec(), from))),
            Ok(Err(e)) => Err(e).context("udp recv"),
            Err(_) => Ok(None),
        }
    }
}

/// Server-side bookkeeping for one connected client.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub address: SocketAddr,
    pub last_seen: Instant,
    pub last_input_sequence: u32,
    pub client_id: String,
}

/// Address-keyed client table with inactivity eviction. Mutated by the
/// receive loop (upsert) and the inactivity sweep; read by broadcast.
#[derive(Default)]
pub struct ClientTable {
    clients: Mutex<HashMap<String, ClientRecord>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new client or refreshes `last_seen` for an existing one.
    /// Returns the stringified "ip:port" key.
    pub fn upsert(&self, address: SocketAddr) -> String {
        let key = address.to_string();
        let mut clients = self.clients.lock().unwrap();
        clients
            .entry(key.clone())
            .and_modify(|c| c.last_seen = Instant::now())
            .or_insert_with(|| ClientRecord {
                address,
                last_seen: Instant::now(),
                last_input_sequence: 0,
                client_id: key.clone(),
            });
        key
    }

    pub fn set_last_input_sequence(&self, key: &str, sequence: u32) {
        if let Some(record) = self.clients.lock().unwrap().get_mut(key) {
            record.last_input_sequence = sequence;
        }
    }

    pub fn get(&self, key: &str) -> Option<ClientRecord> {
        self.clients.lock().unwrap().get(key).cloned()
    }

    /// Snapshot of the client set taken under the lock, for a broadcast
    /// that then sends outside the lock.
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        self.clients.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes clients whose `last_seen` predates `now - timeout`. Collects
    /// stale keys under one lock scope, then re-locks to erase them, so the
    /// eviction scan never holds the lock across its own removal pass.
    pub fn evict_inactive(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = {
            let clients = self.clients.lock().unwrap();
            clients
                .iter()
                .filter(|(_, c)| now.duration_since(c.last_seen) > timeout)
                .map(|(k, _)| k.clone())
                .collect()
        };
        if !stale.is_empty() {
            let mut clients = self.clients.lock().unwrap();
            for key in &stale {
                clients.remove(key);
            }
        }
        stale
    }
}

//! `netcode_server`
//!
//! Authoritative server session: per-player sequence validation, entity
//! simulation, rate-limited state broadcast, and client-table inactivity
//! eviction.
//!
//! Networking model: UDP only, no reliable control channel.

pub mod server;

pub use server::GameServer;

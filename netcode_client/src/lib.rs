//! `netcode_client`
//!
//! Client-side session: registration, input sampling and transmission,
//! and dispatch of server broadcasts to reconciliation (local player) or
//! interpolation (remote players). Prediction, reconciliation, and
//! interpolation themselves live in `netcode_shared`.

pub mod client;
pub mod input;

pub use client::{ClientSession, ClientState};

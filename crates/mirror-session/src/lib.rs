//! Receiver-side session engine for a device-mirroring video stream.
//!
//! One [`session::MirrorSession`] owns one TCP listening socket and one
//! worker thread. The worker accepts the single data connection, frames the
//! record protocol, decrypts video payloads, rewrites them into Annex-B form,
//! and hands ready-to-decode units to the consumer sink together with
//! presentation timestamps from the shared [`clock::NetworkClock`].

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod resolve;
pub mod session;

//! An IPMI v2.0 RMCP+ session engine over UDP.
//!
//! This crate is the concrete dial-and-authenticate step behind the
//! `Connector` seam: RMCP+ open-session handshake, RAKP 1-4 key exchange
//! with HMAC-SHA1, session integrity (HMAC-SHA1-96) and confidentiality
//! (AES-CBC-128), and the small fixed command catalogue the exporter needs.
//! Protocol and transport details stay internal; the rest of the workspace
//! only sees the `Session` trait.

mod connector;
mod crypto;
mod protocol;
mod sdr;
mod session;
mod transport;

pub use connector::RmcpConnector;

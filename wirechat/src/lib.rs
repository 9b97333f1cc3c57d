//! Direct-message chat over a hand-rolled WebSocket-style frame protocol.
//!
//! Clients upgrade an HTTP/1.1 connection on `/chat`, then exchange JSON
//! messages carried in length-prefixed, fragmented frames. The layers, from
//! the wire up:
//!
//! - [`frame`] encodes and decodes single frames and splits payloads to fit
//!   the frame capacity.
//! - [`transport`] sends and reassembles whole messages behind a length frame.
//! - [`handshake`] performs the HTTP upgrade on both sides.
//! - [`message`] defines the JSON message set and participant identities.
//! - [`mailbox`] and [`connection`] drive one socket with a read task and a
//!   write task fed by a bounded, closable queue.
//! - [`hub`] tracks who is online, announces joins and departures, and
//!   routes direct messages.
//! - [`server`] accepts connections; [`client`] connects and renders chat in
//!   the terminal, using [`console`] commands.
//! - [`cli`] and [`config`] describe how both modes are started.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod hub;
pub mod mailbox;
pub mod message;
pub mod server;
pub mod transport;

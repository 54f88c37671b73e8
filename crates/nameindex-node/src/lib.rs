//! nameindex-node — talks to a Bitcoin Cash full node (bchd or BCHN).
//!
//! - [`HttpNodeClient`]: JSON-RPC over HTTP with basic auth, fetching raw
//!   blocks and decoding them locally
//! - [`WsSubscriber`]: block connect/disconnect notifications over websocket
//!
//! Both accept a PEM root certificate for nodes with a self-signed cert.

pub mod block;
pub mod http;
pub mod rpc;
pub mod tls;
pub mod ws;

pub use http::{HttpNodeClient, HttpNodeConfig};
pub use ws::{WsConfig, WsSubscriber};

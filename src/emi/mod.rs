//! EMI (ENGEL Machine Interface) protocol client
//!
//! The CC300 controller exposes its process variables over a persistent TCP
//! connection (port 10050 by default). Requests and responses are XML
//! documents terminated by `0x19`; the controller only ever answers, one
//! response per request.
//!
//! - [`xml`]: owned element tree, encoded/decoded with `quick-xml`
//! - [`framing`]: delimiter framing and transport-garbage stripping
//! - [`messages`]: request builders
//! - [`session`]: connection, login/logout, serialized exchanges
//! - [`client`]: batched parameter reads/writes and diagnostic queries

pub mod client;
pub mod framing;
pub mod messages;
pub mod session;
pub mod xml;

pub use client::EmiClient;
pub use framing::{FrameError, DELIMITER};
pub use session::{EmiError, EmiSession, LoginPolicy, Transport};
pub use xml::{XmlElement, XmlError};

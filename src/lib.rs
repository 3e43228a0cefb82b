//! A host-side debug client for embedded targets that share a serial or TCP
//! debug bus.
//!
//! Each target ("CPU") on the bus is addressed by an 8-bit id and exposes
//! typed memory locations ("registers") that the host can read, write, or
//! subscribe to as streamed debug channels. This crate implements the
//! protocol engine: transport framing with escape stuffing and an 8-bit CRC,
//! the command codec, node discovery with per-CPU type-size negotiation, the
//! register catalog, and the channel subscription state machine.
//!
//! The crate deliberately stops at the byte stream: implement [`ByteStream`]
//! for your serial port or TCP socket and hand it to a [`Medium`]. Requests
//! return immediately; replies and streamed samples surface as [`Event`]s on
//! a channel obtained from [`DebugClient::subscribe`].
//!
//! ## Example
//!
//! ```
//! use embedded_debugger::{ByteStream, DebugClient, Event, JsonCatalogLoader, Medium};
//!
//! # struct Port;
//! # impl ByteStream for Port {
//! #     fn open(&mut self) -> std::io::Result<()> { Ok(()) }
//! #     fn close(&mut self) {}
//! #     fn read_buf(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> { Ok(0) }
//! #     fn write_buf(&mut self, _data: &[u8]) -> std::io::Result<()> { Ok(()) }
//! # }
//! # fn open_serial_port() -> Port { Port }
//! let loader = JsonCatalogLoader::new("Registers");
//! let mut client = DebugClient::with_catalog_loader(Box::new(loader));
//! let events = client.subscribe();
//!
//! let mut medium = Medium::new(open_serial_port(), client);
//! medium.connect()?; // broadcasts a discovery scan
//!
//! loop {
//!     medium.pump()?; // move bytes in both directions
//!     for event in events.try_iter() {
//!         match event {
//!             Event::CpuDiscovered(id) => println!("found cpu {id}"),
//!             Event::ValueChanged { register, value, .. } => {
//!                 println!("{register} = {value}");
//!             }
//!             _ => {}
//!         }
//!     }
//!     # break;
//! }
//! # Ok::<(), embedded_debugger::DebugError>(())
//! ```

mod catalog;
mod client;
pub mod codec;
mod cpu;
mod error;
mod events;
mod medium;
mod presentation;
mod register;
mod registry;
pub mod transport;
mod value;

pub use catalog::{CatalogError, CatalogLoader, JsonCatalogLoader, RegisterDef};
pub use client::DebugClient;
pub use cpu::{Cpu, CpuId, MAX_DEBUG_CHANNELS};
pub use error::DebugError;
pub use events::{ErrorEvent, Event};
pub use medium::{ByteStream, ConnectionState, Medium};
pub use presentation::WriteStatus;
pub use register::{ChannelMode, Direction, Register, RegisterKey, Source};
pub use registry::{CpuRegistry, RegisterCatalog};
pub use transport::{Deframed, Frame, Framer};
pub use value::{Value, VariableType};

//! # plclink
//!
//! Typed, cyclic access to industrial PLCs over two wire protocols:
//!
//! - **MODBUS/TCP** (WAGO-style fieldbus couplers): digital and analog process
//!   images, PFC variables and NOVRAM, addressed through [`ModbusArea`]
//! - **S7 ISO-on-TCP** (Siemens S7-300/400/1200/1500): data blocks, addressed
//!   through [`Location::DataBlock`]
//!
//! The library is built for a control program that runs in fixed cycles. A
//! [`Request`] is created once per access point and binds a PLC [`Address`]
//! to a region of a shared [`Data`] buffer. Every cycle the program enqueues
//! requests on the connection's receive or transmit [`Transaction`] and calls
//! [`Transaction::transact`], which performs one request/response exchange per
//! request, in order, paced either by a timeout or by a number of control
//! cycles ([`Pacing`]).
//!
//! No retries, caching or reconnection happen behind the caller's back. The
//! first failure aborts the drain and is returned; the program decides what to
//! do on its next cycle.
//!
//! ## Quick Start
//!
//! ```no_run
//! use plclink::{Address, Connection, DataType, ModbusArea, ModbusConfig, ModbusConnection};
//! use std::net::Ipv4Addr;
//!
//! fn main() -> plclink::Result<()> {
//!     let mut conn = ModbusConnection::new(ModbusConfig::new(Ipv4Addr::new(192, 168, 1, 10)))?;
//!
//!     // two analog input words into one buffer
//!     let inputs = conn.generate_data_object(4).into_shared();
//!     let first = Address::modbus(ModbusArea::PhysicalInputAnalog, 0, None, 2)?;
//!     let second = Address::modbus(ModbusArea::PhysicalInputAnalog, 2, None, 2)?;
//!     let first = conn.generate_read_request(DataType::Word, first, 0, inputs.clone())?;
//!     let second = conn.generate_read_request(DataType::Word, second, 2, inputs.clone())?;
//!
//!     loop {
//!         let mut rx = conn.generate_receive_transaction();
//!         rx.enqueue(first.clone())?;
//!         rx.enqueue(second.clone())?;
//!         rx.transact()?;
//!
//!         let data = plclink::data::lock(&inputs);
//!         println!("AI0 = {}, AI1 = {}", data.get_word(0)?, data.get_word(2)?);
//!     }
//! }
//! ```
//!
//! ## Addressing
//!
//! | Location | Byte index | Bit index | Read | Write |
//! |----------|:----------:|:---------:|:----:|:-----:|
//! | [`ModbusArea::PhysicalInputDigital`] | ✓ | BIT | ✓ | ✓ |
//! | [`ModbusArea::PhysicalOutputDigital`] | ✓ | BIT | ✓ | ✓ |
//! | [`ModbusArea::PhysicalInputAnalog`] | ✓ | BIT | ✓ | ✗ |
//! | [`ModbusArea::PhysicalOutputAnalog`] | ✓ | BIT | ✓ | ✗ |
//! | [`ModbusArea::PfcInput`] / [`ModbusArea::PfcOutput`] | ✓ | BIT | ✓ | ✓ |
//! | [`ModbusArea::Novram`] | ✓ | BIT | ✓ | WORD/DWORD |
//! | [`Location::DataBlock`] | ✓ | BIT | ✓ | ✓ |
//!
//! ## Byte Order
//!
//! MODBUS registers travel big-endian but are swapped into little-endian
//! buffers, the layout of the coupler's process image. S7 data is copied
//! verbatim into big-endian buffers. Always create buffers through
//! [`Connection::generate_data_object`] so typed accessors read them right.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, PlcError>`]. The library never panics in
//! public code.
//!
//! ```no_run
//! use plclink::{Connection, PlcError, S7Config, S7Connection};
//! use std::net::Ipv4Addr;
//!
//! match S7Connection::new(S7Config::new(Ipv4Addr::new(192, 168, 0, 1), 0, 2)) {
//!     Ok(conn) => println!("up, {} bytes per request", conn.max_transfer_length()),
//!     Err(PlcError::ConnectionRefused { reason }) => println!("refused: {reason}"),
//!     Err(PlcError::Timeout { reason }) => println!("timeout: {reason}"),
//!     Err(e) => println!("error: {e}"),
//! }
//! ```
//!
//! ## Logging
//!
//! Connection lifecycle events are emitted at `info`, aborted transactions at
//! `warn`, per-request detail at `debug` and raw frames at `trace` through the
//! [`tracing`](https://docs.rs/tracing) facade. Install any subscriber to see
//! them.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod address;
mod connection;
pub mod data;
mod error;
pub mod header;
pub mod memory;
pub mod modbus;
mod pacing;
mod request;
pub mod response;
pub mod s7;
mod transaction;
mod transport;
pub mod utils;

#[cfg(test)]
mod mock;

// Public re-exports
pub use address::{Address, Location, MAX_BIT_INDEX};
pub use connection::{Connection, Link, Protocol, TransactionCounter};
pub use data::{ByteOrder, Data, SharedData};
pub use error::{PlcError, Result};
pub use memory::ModbusArea;
pub use modbus::{ModbusConfig, ModbusConnection, ModbusReadRequest, ModbusWriteRequest};
pub use pacing::{
    CycleClock, Deadline, Pacing, SleepClock, BYTE_WAIT_BUDGET, DEFAULT_CYCLE_TIME,
    DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT_CYCLES,
};
pub use request::{DataType, Request, RequestKind};
pub use s7::{S7Config, S7Connection, S7ReadRequest, S7WriteRequest};
pub use transaction::{Transaction, TransactionKind};
pub use transport::{
    TcpTransport, Transport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODBUS_PORT, DEFAULT_READ_TIMEOUT,
    DEFAULT_S7_PORT,
};

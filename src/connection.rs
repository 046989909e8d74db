//! Connection contract shared by both protocol variants.
//!
//! A [`Connection`] owns the transport to one PLC, performs the protocol
//! handshake and acts as the factory for data buffers, requests and the two
//! transactions bound to it. The MODBUS and S7 variants differ only in their
//! handshake and in the requests they generate; the byte-stream plumbing
//! lives in [`Link`] and the transaction bookkeeping in a shared endpoint.
//!
//! # Example
//!
//! ```no_run
//! use plclink::{Address, Connection, DataType, ModbusArea, ModbusConfig, ModbusConnection};
//! use std::net::Ipv4Addr;
//!
//! let mut conn = ModbusConnection::new(ModbusConfig::new(Ipv4Addr::new(192, 168, 1, 20)))?;
//! let data = conn.generate_data_object(2).into_shared();
//! let addr = Address::modbus(ModbusArea::PhysicalInputAnalog, 0, None, 2)?;
//! let request = conn.generate_read_request(DataType::Word, addr, 0, data.clone())?;
//!
//! let mut rx = conn.generate_receive_transaction();
//! rx.enqueue(request)?;
//! rx.transact()?;
//! # Ok::<(), plclink::PlcError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::address::Address;
use crate::data::{Data, SharedData};
use crate::error::{PlcError, Result};
use crate::pacing::{self, CycleClock, Pacing};
use crate::request::{DataType, Request};
use crate::transaction::{RequestQueue, Transaction, TransactionKind};
use crate::transport::Transport;
use crate::utils::format_hex_bytes;

/// Wire protocol spoken by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Protocol {
    /// MODBUS/TCP.
    Modbus,
    /// S7 over ISO-on-TCP.
    S7,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Modbus => write!(f, "MODBUS"),
            Protocol::S7 => write!(f, "S7"),
        }
    }
}

/// Pre-incrementing transaction number generator.
///
/// Produces `1, 2, ...` and wraps to `0` once the next value would reach
/// `limit`.
///
/// # Example
///
/// ```
/// use plclink::TransactionCounter;
///
/// let mut ids = TransactionCounter::new(3);
/// assert_eq!(ids.next_id(), 1);
/// assert_eq!(ids.next_id(), 2);
/// assert_eq!(ids.next_id(), 0);
/// assert_eq!(ids.next_id(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TransactionCounter {
    current: u16,
    limit: u16,
}

impl TransactionCounter {
    /// Creates a counter wrapping at `limit`.
    pub fn new(limit: u16) -> Self {
        Self { current: 0, limit }
    }

    /// Advances the counter and returns the new value.
    pub fn next_id(&mut self) -> u16 {
        let next = u32::from(self.current) + 1;
        self.current = if next < u32::from(self.limit) {
            next as u16
        } else {
            0
        };
        self.current
    }
}

/// Byte-stream side of a connection, handed to requests while they run.
///
/// Every stream access fails with [`PlcError::NotConnected`] while no
/// transport is attached.
pub struct Link {
    transport: Option<Box<dyn Transport>>,
    clock: Box<dyn CycleClock>,
    ids: TransactionCounter,
    in_flight: u16,
    protocol: Protocol,
}

impl Link {
    pub(crate) fn new(protocol: Protocol, clock: Box<dyn CycleClock>, ids: TransactionCounter) -> Self {
        Self {
            transport: None,
            clock,
            ids,
            in_flight: 0,
            protocol,
        }
    }

    /// Returns `true` while a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Protocol of the owning connection.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub(crate) fn detach(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    pub(crate) fn set_clock(&mut self, clock: Box<dyn CycleClock>) {
        self.clock = clock;
    }

    pub(crate) fn transport(&mut self) -> Result<&mut (dyn Transport + 'static)> {
        self.transport.as_deref_mut().ok_or(PlcError::NotConnected)
    }

    /// Allocates the transaction number for the next frame.
    pub(crate) fn begin_transaction(&mut self) -> u16 {
        self.in_flight = self.ids.next_id();
        self.in_flight
    }

    /// Transaction number of the frame currently awaiting its response.
    pub(crate) fn in_flight(&self) -> u16 {
        self.in_flight
    }

    /// Writes and flushes one complete frame.
    pub(crate) fn send(&mut self, frame: &[u8]) -> Result<()> {
        trace!(protocol = %self.protocol, frame = %format_hex_bytes(frame), "send");
        let transport = self.transport()?;
        transport.write_all(frame)?;
        transport.flush()?;
        Ok(())
    }

    /// Reads exactly `count` bytes.
    pub(crate) fn receive(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.transport()?.read_exact(&mut buf)?;
        trace!(protocol = %self.protocol, frame = %format_hex_bytes(&buf), "receive");
        Ok(buf)
    }

    /// Waits until `count` bytes are ready, then reads them.
    pub(crate) fn receive_within(&mut self, count: usize, budget: Duration) -> Result<Vec<u8>> {
        self.wait_for_bytes(count, budget)?;
        self.receive(count)
    }

    pub(crate) fn available(&mut self) -> Result<usize> {
        self.transport()?.available()
    }

    pub(crate) fn wait_for_bytes(&mut self, count: usize, budget: Duration) -> Result<()> {
        let transport = self.transport.as_deref_mut().ok_or(PlcError::NotConnected)?;
        pacing::wait_for_bytes(transport, self.clock.as_mut(), count, budget)
    }

    pub(crate) fn await_response(&mut self, pacing: Pacing) -> Result<()> {
        let transport = self.transport.as_deref_mut().ok_or(PlcError::NotConnected)?;
        pacing.await_response(transport, self.clock.as_mut())
    }

    /// Drops bytes left over from an earlier, failed exchange.
    pub(crate) fn discard_stale(&mut self) -> Result<usize> {
        let discarded = self.transport()?.discard_available()?;
        if discarded > 0 {
            debug!(protocol = %self.protocol, discarded, "discarded stale input");
        }
        Ok(discarded)
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("protocol", &self.protocol)
            .field("connected", &self.is_connected())
            .field("cycle_time", &self.clock.cycle_time())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// State shared by every connection variant: the link and the two lazily
/// created transaction queues.
#[derive(Debug)]
pub(crate) struct Endpoint {
    pub(crate) link: Link,
    receive: Option<RequestQueue>,
    transmit: Option<RequestQueue>,
}

impl Endpoint {
    pub(crate) fn new(link: Link) -> Self {
        Self {
            link,
            receive: None,
            transmit: None,
        }
    }

    pub(crate) fn transaction(&mut self, kind: TransactionKind) -> Transaction<'_> {
        let queue = match kind {
            TransactionKind::Receive => self.receive.get_or_insert_with(RequestQueue::default),
            TransactionKind::Transmit => self.transmit.get_or_insert_with(RequestQueue::default),
        };
        Transaction::new(kind, queue, &mut self.link)
    }

    /// Releases the transport and forgets queued requests.
    pub(crate) fn close(&mut self) -> Result<()> {
        for queue in [self.receive.as_mut(), self.transmit.as_mut()].into_iter().flatten() {
            queue.clear();
        }
        match self.link.detach() {
            Some(mut transport) => transport.shutdown(),
            None => Ok(()),
        }
    }
}

/// A connection to one PLC.
///
/// Implemented by [`ModbusConnection`](crate::ModbusConnection) and
/// [`S7Connection`](crate::S7Connection).
pub trait Connection {
    /// Wire protocol of this connection.
    fn protocol(&self) -> Protocol;

    /// Establishes the transport and runs the protocol handshake.
    ///
    /// An established connection is closed first. The connection only counts
    /// as connected once every handshake step succeeded.
    fn connect(&mut self) -> Result<()>;

    /// Releases the transport. Closing a closed connection is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Returns `true` while the connection is established.
    fn is_connected(&self) -> bool;

    /// Largest payload in bytes a single request may move.
    fn max_transfer_length(&self) -> usize;

    /// Creates a zeroed buffer in this protocol's byte order.
    fn generate_data_object(&self, len: usize) -> Data;

    /// Creates a request reading the item at `address` into `data` at
    /// `data_offset`.
    fn generate_read_request(
        &self,
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Arc<dyn Request>>;

    /// Creates a request writing `data` at `data_offset` to the item at
    /// `address`.
    fn generate_write_request(
        &self,
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Arc<dyn Request>>;

    /// The connection's receive transaction, created on first use.
    fn generate_receive_transaction(&mut self) -> Transaction<'_>;

    /// The connection's transmit transaction, created on first use.
    fn generate_transmit_transaction(&mut self) -> Transaction<'_>;
}

//! Request queues drained once per control cycle.
//!
//! Every connection owns one receive and one transmit transaction. The
//! control program enqueues requests during its cycle and calls
//! [`Transaction::transact`] once, which services the queue strictly in FIFO
//! order:
//!
//! 1. discard stale input left over from an earlier failed exchange
//! 2. write the request frame
//! 3. wait for the response according to the transaction's [`Pacing`]
//! 4. read, validate and map the response
//!
//! The first failure stops the drain. The failed request and everything
//! queued behind it are dropped, and the error is returned; the control
//! program re-enqueues on its next cycle.
//!
//! # Example
//!
//! ```no_run
//! use plclink::{Connection, Pacing, S7Config, S7Connection};
//! use std::net::Ipv4Addr;
//!
//! let mut conn = S7Connection::new(S7Config::new(Ipv4Addr::new(10, 0, 0, 5), 0, 2))?;
//! let mut tx = conn.generate_transmit_transaction();
//! tx.set_pacing(Pacing::Cycles(2));
//! assert!(tx.is_empty());
//! # Ok::<(), plclink::PlcError>(())
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::Link;
use crate::error::{PlcError, Result};
use crate::pacing::Pacing;
use crate::request::{Request, RequestKind};

/// Which requests a transaction services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Read requests.
    Receive,
    /// Write requests.
    Transmit,
}

impl TransactionKind {
    /// Kind of request this transaction accepts.
    pub fn request_kind(self) -> RequestKind {
        match self {
            TransactionKind::Receive => RequestKind::Read,
            TransactionKind::Transmit => RequestKind::Write,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Receive => write!(f, "receive"),
            TransactionKind::Transmit => write!(f, "transmit"),
        }
    }
}

/// Persistent part of a transaction, owned by its connection.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    requests: VecDeque<Arc<dyn Request>>,
    pacing: Pacing,
}

impl RequestQueue {
    pub(crate) fn clear(&mut self) {
        self.requests.clear();
    }
}

/// Borrowed view of one of a connection's transactions.
#[derive(Debug)]
pub struct Transaction<'a> {
    kind: TransactionKind,
    queue: &'a mut RequestQueue,
    link: &'a mut Link,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(kind: TransactionKind, queue: &'a mut RequestQueue, link: &'a mut Link) -> Self {
        Self { kind, queue, link }
    }

    /// Kind of the transaction.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Appends a request to the queue.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidParameter` if the request's direction does
    /// not match the transaction or it was framed for another protocol.
    pub fn enqueue(&mut self, request: Arc<dyn Request>) -> Result<()> {
        if request.kind() != self.kind.request_kind() {
            return Err(PlcError::invalid_parameter(
                "request",
                format!(
                    "{:?} request cannot join a {} transaction",
                    request.kind(),
                    self.kind
                ),
            ));
        }
        if request.protocol() != self.link.protocol() {
            return Err(PlcError::invalid_parameter(
                "request",
                format!(
                    "{} request cannot run on a {} connection",
                    request.protocol(),
                    self.link.protocol()
                ),
            ));
        }
        self.queue.requests.push_back(request);
        Ok(())
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.queue.requests.len()
    }

    /// Returns `true` if no request is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.requests.is_empty()
    }

    /// Drops every queued request.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Current pacing strategy.
    pub fn pacing(&self) -> Pacing {
        self.queue.pacing
    }

    /// Replaces the pacing strategy; it sticks to the transaction.
    pub fn set_pacing(&mut self, pacing: Pacing) {
        self.queue.pacing = pacing;
    }

    /// Drains the queue.
    ///
    /// # Errors
    ///
    /// Returns the first request's error; that request and all requests
    /// behind it are removed from the queue unprocessed.
    pub fn transact(&mut self) -> Result<()> {
        let total = self.queue.requests.len();
        let pacing = self.queue.pacing;
        while let Some(request) = self.queue.requests.pop_front() {
            if let Err(err) = exchange(&mut *self.link, request.as_ref(), pacing) {
                let dropped = self.queue.requests.len();
                self.queue.requests.clear();
                warn!(
                    kind = %self.kind,
                    address = %request.address(),
                    dropped,
                    error = %err,
                    "transaction aborted"
                );
                return Err(err);
            }
        }
        debug!(kind = %self.kind, requests = total, "transaction drained");
        Ok(())
    }
}

fn exchange(link: &mut Link, request: &dyn Request, pacing: Pacing) -> Result<()> {
    link.discard_stale()?;
    request.write(link)?;
    link.await_response(pacing)?;
    request.read(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::address::Address;
    use crate::connection::Connection;
    use crate::data::{self, ByteOrder, Data};
    use crate::memory::ModbusArea;
    use crate::mock::{CountingClock, MockTransport};
    use crate::modbus::{ModbusConfig, ModbusConnection};
    use crate::request::DataType;
    use crate::s7::{S7Config, S7Connection};

    fn connection(mock: &MockTransport) -> ModbusConnection {
        ModbusConnection::with_transport(
            ModbusConfig::new([127, 0, 0, 1]),
            Box::new(mock.clone()),
        )
        .with_clock(Box::new(CountingClock::new(Duration::from_millis(10))))
    }

    fn analog_word(conn: &ModbusConnection, byte_index: usize) -> (Arc<dyn Request>, data::SharedData) {
        let data = Data::new(2, ByteOrder::LittleEndian).into_shared();
        let addr = Address::modbus(ModbusArea::PhysicalInputAnalog, byte_index, None, 2).unwrap();
        let request = conn
            .generate_read_request(DataType::Word, addr, 0, data.clone())
            .unwrap();
        (request, data)
    }

    #[test]
    fn test_drains_in_order() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("0001000000050003021234").unwrap());
        mock.respond_with(&hex::decode("0002000000050003025678").unwrap());
        let mut conn = connection(&mock);
        let (first, first_data) = analog_word(&conn, 4);
        let (second, second_data) = analog_word(&conn, 6);

        let mut rx = conn.generate_receive_transaction();
        rx.enqueue(first).unwrap();
        rx.enqueue(second).unwrap();
        assert_eq!(rx.len(), 2);
        rx.transact().unwrap();
        assert!(rx.is_empty());

        assert_eq!(data::lock(&first_data).get_word(0).unwrap(), 0x1234);
        assert_eq!(data::lock(&second_data).get_word(0).unwrap(), 0x5678);
        let frames = mock.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][8..10], &[0x00, 0x02]);
        assert_eq!(&frames[1][8..10], &[0x00, 0x03]);
    }

    #[test]
    fn test_abort_on_first_failure() {
        let mock = MockTransport::new();
        // exception response: function code 0x83, error code 0x02
        mock.respond_with(&hex::decode("000100000003008302").unwrap());
        mock.respond_with(&hex::decode("0002000000050003025678").unwrap());
        let mut conn = connection(&mock);
        let (first, _) = analog_word(&conn, 0);
        let (second, second_data) = analog_word(&conn, 2);

        let mut rx = conn.generate_receive_transaction();
        rx.enqueue(first).unwrap();
        rx.enqueue(second).unwrap();
        let err = rx.transact().unwrap_err();
        assert!(matches!(
            err,
            PlcError::InvalidFunctionCode {
                function_code: 0x83,
                error_code: 0x02
            }
        ));
        assert!(rx.is_empty());
        assert_eq!(mock.frames().len(), 1);
        assert_eq!(data::lock(&second_data).get_word(0).unwrap(), 0);
    }

    #[test]
    fn test_timeout_when_plc_stays_silent() {
        let mock = MockTransport::new();
        let mut conn = connection(&mock).with_clock(Box::new(crate::pacing::SleepClock::new(
            Duration::from_millis(10),
        )));
        let (request, _) = analog_word(&conn, 0);

        let mut rx = conn.generate_receive_transaction();
        rx.enqueue(request).unwrap();
        let started = std::time::Instant::now();
        let err = rx.transact().unwrap_err();
        assert!(matches!(err, PlcError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_stale_bytes_discarded_before_write() {
        let mock = MockTransport::new();
        mock.preload(&[0xDE, 0xAD, 0xBE]);
        mock.respond_with(&hex::decode("0001000000050003020042").unwrap());
        let mut conn = connection(&mock);
        let (request, data) = analog_word(&conn, 0);

        let mut rx = conn.generate_receive_transaction();
        rx.enqueue(request).unwrap();
        rx.transact().unwrap();
        assert_eq!(data::lock(&data).get_word(0).unwrap(), 0x0042);
        assert_eq!(mock.unread(), 0);
    }

    #[test]
    fn test_cycle_pacing() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("0001000000050003020001").unwrap());
        let clock = CountingClock::new(Duration::from_millis(10));
        let mut conn = connection(&mock).with_clock(Box::new(clock.clone()));
        let (request, _) = analog_word(&conn, 0);

        let mut rx = conn.generate_receive_transaction();
        rx.set_pacing(Pacing::Cycles(2));
        rx.enqueue(request).unwrap();
        rx.transact().unwrap();
        assert_eq!(clock.cycles(), 2);

        // the pacing sticks to the memoized transaction
        assert_eq!(conn.generate_receive_transaction().pacing(), Pacing::Cycles(2));
        assert_eq!(conn.generate_transmit_transaction().pacing(), Pacing::default());
    }

    #[test]
    fn test_enqueue_validation() {
        let mock = MockTransport::new();
        let mut conn = connection(&mock);
        let (read, _) = analog_word(&conn, 0);
        assert!(matches!(
            conn.generate_transmit_transaction().enqueue(read),
            Err(PlcError::InvalidParameter { .. })
        ));

        let s7 = S7Connection::offline(S7Config::new([127, 0, 0, 1], 0, 2));
        let data = s7.generate_data_object(2).into_shared();
        let addr = Address::data_block(1, 0, None, 2).unwrap();
        let foreign = s7
            .generate_read_request(DataType::Word, addr, 0, data)
            .unwrap();
        assert!(conn.generate_receive_transaction().enqueue(foreign).is_err());
    }

    #[test]
    fn test_transact_requires_connection() {
        let mock = MockTransport::new();
        let mut conn = connection(&mock);
        let (request, _) = analog_word(&conn, 0);
        conn.close().unwrap();

        let mut rx = conn.generate_receive_transaction();
        rx.enqueue(request).unwrap();
        assert!(matches!(rx.transact(), Err(PlcError::NotConnected)));
        assert!(mock.frames().is_empty());
    }

    #[test]
    fn test_empty_queue_is_a_no_op() {
        let mock = MockTransport::new();
        let mut conn = connection(&mock);
        conn.generate_transmit_transaction().transact().unwrap();
        assert!(mock.frames().is_empty());
    }
}

//! S7 connection over ISO-on-TCP (RFC 1006).
//!
//! Connecting is a three step handshake:
//!
//! 1. TCP connect to port 102 with an explicit connect timeout
//! 2. COTP connection request carrying the remote TSAP `rack + 1`, `slot`,
//!    answered by a connection confirm
//! 3. S7 setup communication job proposing a PDU length; the length the
//!    PLC accepts bounds every later request
//!
//! Every message is wrapped in the 4-byte [`IsoHeader`]; data messages add the
//! COTP [`PROLOG`] before the S7 PDU. Requests address data blocks only and
//! exchange one item per job. S7 data is big-endian, so buffers generated by
//! an S7 connection use [`ByteOrder::BigEndian`] and no byte swapping happens.
//!
//! # Example
//!
//! ```no_run
//! use plclink::{Address, Connection, DataType, S7Config, S7Connection};
//! use std::net::Ipv4Addr;
//!
//! let mut conn = S7Connection::new(S7Config::new(Ipv4Addr::new(192, 168, 0, 1), 0, 2))?;
//! println!("negotiated PDU length {}", conn.pdu_length());
//!
//! let data = conn.generate_data_object(4).into_shared();
//! let addr = Address::data_block(10, 0, None, 4)?;
//! let request = conn.generate_read_request(DataType::Dword, addr, 0, data.clone())?;
//!
//! let mut rx = conn.generate_receive_transaction();
//! rx.enqueue(request)?;
//! rx.transact()?;
//! println!("DB10.DBD0 = {}", data.lock().unwrap().get_dword(0)?);
//! # Ok::<(), plclink::PlcError>(())
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::address::{Address, Location};
use crate::connection::{Connection, Endpoint, Link, Protocol, TransactionCounter};
use crate::data::{self, ByteOrder, Data, SharedData};
use crate::error::{PlcError, Result};
use crate::header::{IsoHeader, ISO_HEADER_SIZE, PROLOG};
use crate::pacing::{CycleClock, SleepClock, BYTE_WAIT_BUDGET, DEFAULT_CYCLE_TIME};
use crate::request::{DataType, Request, RequestCore, RequestKind};
use crate::response::{S7Ack, S7_PROTOCOL_ID};
use crate::transaction::{Transaction, TransactionKind};
use crate::transport::{
    TcpTransport, Transport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_S7_PORT,
};

/// PDU bytes reserved for S7 headers when sizing a request payload.
pub const PDU_OVERHEAD: usize = 32;

/// PDU length assumed before negotiation.
pub const OFFLINE_PDU_LENGTH: u16 = 232;

/// PDU length proposed during negotiation.
pub const DEFAULT_REQUESTED_PDU_LENGTH: u16 = 480;

/// Highest rack number the connection request can encode.
pub const MAX_RACK: u8 = 7;

/// PDU references wrap to 0 once they would reach this value.
const PDU_REF_LIMIT: u16 = 0x7FFF;

/// COTP connection request up to the remote TSAP value.
const CONNECT_PREFIX: [u8; 13] = [
    0x11, 0xE0, 0x00, 0x00, 0x00, 0x01, 0x00, 0xC1, 0x02, 0x01, 0x00, 0xC2, 0x02,
];

/// TPDU size parameter closing the connection request.
const CONNECT_POSTFIX: [u8; 3] = [0xC0, 0x01, 0x09];

const COTP_CONNECT_CONFIRM: u8 = 0xD0;

const ROSCTR_JOB: u8 = 0x01;
const FUNCTION_READ_VAR: u8 = 0x04;
const FUNCTION_WRITE_VAR: u8 = 0x05;
const FUNCTION_SETUP_COMMUNICATION: u8 = 0xF0;

const AREA_DATA_BLOCK: u8 = 0x84;

const TRANSPORT_SIZE_BIT: u8 = 0x01;
const TRANSPORT_SIZE_BYTE: u8 = 0x02;

const DATA_SIZE_BIT: u8 = 0x03;
const DATA_SIZE_BYTE: u8 = 0x04;

/// Largest bit address the 24-bit item address can carry.
const MAX_BIT_ADDRESS: usize = 0x00FF_FFFF;

/// Connection settings for an S7 PLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct S7Config {
    /// PLC socket address.
    pub plc_addr: SocketAddr,
    /// Rack of the CPU.
    pub rack: u8,
    /// Slot of the CPU.
    pub slot: u8,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Socket read timeout.
    pub read_timeout: Duration,
    /// Nominal cycle time of the control loop driving the transactions.
    pub cycle_time: Duration,
    /// PDU length proposed to the PLC.
    pub requested_pdu_length: u16,
}

impl S7Config {
    /// Creates a configuration for the default port 102.
    ///
    /// # Example
    ///
    /// ```
    /// use plclink::S7Config;
    /// use std::net::Ipv4Addr;
    ///
    /// let config = S7Config::new(Ipv4Addr::new(192, 168, 0, 1), 0, 2);
    /// assert_eq!(config.plc_addr.port(), 102);
    /// assert_eq!(config.requested_pdu_length, 480);
    /// ```
    pub fn new(plc_ip: impl Into<IpAddr>, rack: u8, slot: u8) -> Self {
        Self {
            plc_addr: SocketAddr::new(plc_ip.into(), DEFAULT_S7_PORT),
            rack,
            slot,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            cycle_time: DEFAULT_CYCLE_TIME,
            requested_pdu_length: DEFAULT_REQUESTED_PDU_LENGTH,
        }
    }

    /// Sets a custom port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.plc_addr.set_port(port);
        self
    }

    /// Sets the TCP connect timeout (default 10 seconds).
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the socket read timeout (default 3 seconds).
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Sets the control-loop cycle time (default 100 ms).
    pub fn with_cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    /// Sets the PDU length proposed during negotiation (default 480).
    pub fn with_requested_pdu_length(mut self, length: u16) -> Self {
        self.requested_pdu_length = length;
        self
    }
}

/// Connection to an S7 PLC.
#[derive(Debug)]
pub struct S7Connection {
    config: S7Config,
    endpoint: Endpoint,
    pdu_length: u16,
}

impl S7Connection {
    /// Connects to the PLC described by `config` and negotiates the PDU length.
    ///
    /// # Errors
    ///
    /// - `PlcError::Timeout` or an I/O error if the TCP connect fails
    /// - `PlcError::ConnectionRefused` if the PLC rejects the connection request
    /// - `PlcError::InvalidResponse` / `PlcError::JobRejected` if the PDU
    ///   negotiation fails
    pub fn new(config: S7Config) -> Result<Self> {
        let mut conn = Self::offline(config);
        conn.connect()?;
        Ok(conn)
    }

    /// Creates an unconnected connection assuming a PDU length of 232.
    ///
    /// Requests can be generated right away; call [`Connection::connect`]
    /// before running transactions.
    pub fn offline(config: S7Config) -> Self {
        let link = Link::new(
            Protocol::S7,
            Box::new(SleepClock::new(config.cycle_time)),
            TransactionCounter::new(PDU_REF_LIMIT),
        );
        Self {
            config,
            endpoint: Endpoint::new(link),
            pdu_length: OFFLINE_PDU_LENGTH,
        }
    }

    /// Runs the ISO handshake over an already established transport.
    pub fn with_transport(config: S7Config, transport: Box<dyn Transport>) -> Result<Self> {
        let mut conn = Self::offline(config);
        conn.handshake(transport)?;
        Ok(conn)
    }

    /// Replaces the clock used for pacing and byte waits.
    pub fn with_clock(mut self, clock: Box<dyn CycleClock>) -> Self {
        self.endpoint.link.set_clock(clock);
        self
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &S7Config {
        &self.config
    }

    /// PDU length accepted by the PLC, or 232 before negotiation.
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    fn handshake(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        if self.config.rack > MAX_RACK {
            return Err(PlcError::invalid_parameter(
                "rack",
                format!("{} not in 0..={MAX_RACK}", self.config.rack),
            ));
        }
        let link = &mut self.endpoint.link;
        link.attach(transport);
        match negotiate(link, &self.config) {
            Ok(pdu_length) => {
                self.pdu_length = pdu_length;
                info!(
                    plc = %self.config.plc_addr,
                    rack = self.config.rack,
                    slot = self.config.slot,
                    pdu_length,
                    "S7 connection established"
                );
                Ok(())
            }
            Err(err) => {
                if let Some(mut transport) = link.detach() {
                    if let Err(shutdown) = transport.shutdown() {
                        debug!(error = %shutdown, "shutdown after failed handshake");
                    }
                }
                Err(err)
            }
        }
    }
}

fn negotiate(link: &mut Link, config: &S7Config) -> Result<u16> {
    let mut request = Vec::with_capacity(CONNECT_PREFIX.len() + 2 + CONNECT_POSTFIX.len());
    request.extend_from_slice(&CONNECT_PREFIX);
    request.push(config.rack + 1);
    request.push(config.slot);
    request.extend_from_slice(&CONNECT_POSTFIX);
    link.send(&iso_frame(&request))?;

    let confirm = receive_iso_payload(link)?;
    match confirm.get(1) {
        Some(&tpdu) if tpdu & 0xF0 == COTP_CONNECT_CONFIRM => {}
        other => {
            return Err(PlcError::connection_refused(format!(
                "connection request not confirmed (TPDU {other:02X?})"
            )))
        }
    }

    let pdu_ref = link.begin_transaction();
    let mut params = vec![FUNCTION_SETUP_COMMUNICATION, 0x00, 0x00, 0x01, 0x00, 0x01];
    params.extend_from_slice(&config.requested_pdu_length.to_be_bytes());
    link.send(&data_frame(&job(pdu_ref, &params, &[])))?;

    let pdu_length = receive_ack(link, pdu_ref)?.negotiated_pdu_length()?;
    if usize::from(pdu_length) <= PDU_OVERHEAD {
        return Err(PlcError::invalid_response(format!(
            "negotiated PDU length {pdu_length} leaves no room for data"
        )));
    }
    Ok(pdu_length)
}

/// Wraps a COTP TPDU in the ISO header.
fn iso_frame(tpdu: &[u8]) -> Vec<u8> {
    // frames are bounded by the PDU length, far below u16::MAX
    let header = IsoHeader::for_payload(tpdu.len() as u16);
    let mut frame = Vec::with_capacity(ISO_HEADER_SIZE + tpdu.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(tpdu);
    frame
}

/// Wraps an S7 PDU in the ISO header and COTP data prolog.
fn data_frame(pdu: &[u8]) -> Vec<u8> {
    let mut tpdu = Vec::with_capacity(PROLOG.len() + pdu.len());
    tpdu.extend_from_slice(&PROLOG);
    tpdu.extend_from_slice(pdu);
    iso_frame(&tpdu)
}

/// Builds an S7 job PDU.
fn job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(10 + params.len() + data.len());
    pdu.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00]);
    pdu.extend_from_slice(&pdu_ref.to_be_bytes());
    pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
    pdu.extend_from_slice(&(data.len() as u16).to_be_bytes());
    pdu.extend_from_slice(params);
    pdu.extend_from_slice(data);
    pdu
}

fn receive_iso_payload(link: &mut Link) -> Result<Vec<u8>> {
    let head = link.receive_within(ISO_HEADER_SIZE, BYTE_WAIT_BUDGET)?;
    let header = IsoHeader::from_bytes([head[0], head[1], head[2], head[3]]).validate()?;
    link.receive_within(header.payload_len(), BYTE_WAIT_BUDGET)
}

fn receive_ack(link: &mut Link, pdu_ref: u16) -> Result<S7Ack> {
    let payload = receive_iso_payload(link)?;
    let pdu = payload
        .strip_prefix(&PROLOG[..])
        .ok_or_else(|| PlcError::invalid_response("COTP data prolog missing"))?;
    S7Ack::from_bytes(pdu, pdu_ref)
}

impl Connection for S7Connection {
    fn protocol(&self) -> Protocol {
        Protocol::S7
    }

    fn connect(&mut self) -> Result<()> {
        self.close()?;
        let transport = TcpTransport::connect_timeout(
            self.config.plc_addr,
            self.config.connect_timeout,
            self.config.read_timeout,
        )?;
        self.handshake(Box::new(transport))
    }

    fn close(&mut self) -> Result<()> {
        if self.endpoint.link.is_connected() {
            info!(plc = %self.config.plc_addr, "closing S7 connection");
        }
        self.endpoint.close()
    }

    fn is_connected(&self) -> bool {
        self.endpoint.link.is_connected()
    }

    fn max_transfer_length(&self) -> usize {
        usize::from(self.pdu_length).saturating_sub(PDU_OVERHEAD)
    }

    fn generate_data_object(&self, len: usize) -> Data {
        Data::new(len, ByteOrder::BigEndian)
    }

    fn generate_read_request(
        &self,
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Arc<dyn Request>> {
        let item = DataBlockItem::new(data_type, address, data_offset, data, self.max_transfer_length())?;
        Ok(Arc::new(S7ReadRequest { item }))
    }

    fn generate_write_request(
        &self,
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Arc<dyn Request>> {
        let item = DataBlockItem::new(data_type, address, data_offset, data, self.max_transfer_length())?;
        Ok(Arc::new(S7WriteRequest { item }))
    }

    fn generate_receive_transaction(&mut self) -> Transaction<'_> {
        self.endpoint.transaction(TransactionKind::Receive)
    }

    fn generate_transmit_transaction(&mut self) -> Transaction<'_> {
        self.endpoint.transaction(TransactionKind::Transmit)
    }
}

/// One data block item as addressed by a read-var or write-var job.
#[derive(Debug)]
struct DataBlockItem {
    core: RequestCore,
    db_number: u16,
    transport_size: u8,
    count: u16,
    bit_address: u32,
}

impl DataBlockItem {
    fn new(
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
        max_transfer_length: usize,
    ) -> Result<Self> {
        let db_number = match address.location() {
            Location::DataBlock(db) => db,
            Location::Modbus(area) => {
                return Err(PlcError::invalid_addressing(format!(
                    "{area} is not an S7 data block"
                )))
            }
        };
        let core = RequestCore::new(data_type, address, data_offset, data)?;
        let size = address.size();
        if size > max_transfer_length {
            return Err(PlcError::value_out_of_range(format!(
                "{size} bytes exceed the transfer limit of {max_transfer_length}"
            )));
        }
        let (transport_size, count, bit_address) = match data_type {
            DataType::Bit => (TRANSPORT_SIZE_BIT, 1, Some(core.bit_address(0)?)),
            _ => (TRANSPORT_SIZE_BYTE, size, core.byte_index().checked_mul(8)),
        };
        let bit_address = match bit_address {
            Some(bits) if bits <= MAX_BIT_ADDRESS => bits,
            _ => {
                return Err(PlcError::invalid_addressing(format!(
                    "{address} lies beyond the 24-bit address range"
                )))
            }
        };
        Ok(Self {
            core,
            db_number,
            transport_size,
            // bounded by the transfer length, itself below the u16 PDU length
            count: count as u16,
            bit_address: bit_address as u32,
        })
    }

    /// Parameter section of a read-var or write-var job.
    fn params(&self, function: u8) -> Vec<u8> {
        let count = self.count.to_be_bytes();
        let db = self.db_number.to_be_bytes();
        let addr = self.bit_address.to_be_bytes();
        vec![
            function, 0x01, // one item
            0x12, 0x0A, 0x10, // variable specification, any-pointer syntax
            self.transport_size, count[0], count[1], db[0], db[1], AREA_DATA_BLOCK, addr[1],
            addr[2], addr[3],
        ]
    }

    fn send(&self, link: &mut Link, function: u8, data: &[u8]) -> Result<()> {
        let pdu_ref = link.begin_transaction();
        link.send(&data_frame(&job(pdu_ref, &self.params(function), data)))
    }
}

/// Reads one item from an S7 data block.
#[derive(Debug)]
pub struct S7ReadRequest {
    item: DataBlockItem,
}

impl Request for S7ReadRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Read
    }

    fn protocol(&self) -> Protocol {
        Protocol::S7
    }

    fn data_type(&self) -> DataType {
        self.item.core.data_type
    }

    fn address(&self) -> &Address {
        &self.item.core.address
    }

    fn data_offset(&self) -> usize {
        self.item.core.data_offset
    }

    fn data(&self) -> &SharedData {
        &self.item.core.data
    }

    fn write(&self, link: &mut Link) -> Result<()> {
        self.item.send(link, FUNCTION_READ_VAR, &[])
    }

    fn read(&self, link: &mut Link) -> Result<()> {
        let pdu_ref = link.in_flight();
        let ack = receive_ack(link, pdu_ref)?;
        ack.expect_function(FUNCTION_READ_VAR)?;
        let payload = ack.read_item()?;
        let core = &self.item.core;
        let mut data = data::lock(&core.data);
        match core.data_type {
            DataType::Bit => {
                let value = payload
                    .first()
                    .copied()
                    .ok_or_else(|| PlcError::invalid_response("bit item carries no data"))?;
                data.set_bit(core.data_offset, core.bit_index(), value & 0x01 != 0)
            }
            _ => {
                let size = core.address.size();
                let item = payload.get(..size).ok_or_else(|| {
                    PlcError::invalid_response(format!(
                        "item carries {} bytes, {size} expected",
                        payload.len()
                    ))
                })?;
                data.copy_from_slice(core.data_offset, item)
            }
        }
    }
}

/// Writes one item to an S7 data block.
#[derive(Debug)]
pub struct S7WriteRequest {
    item: DataBlockItem,
}

impl S7WriteRequest {
    fn data_section(&self) -> Result<Vec<u8>> {
        let core = &self.item.core;
        let data = data::lock(&core.data);
        let (size_code, bits, payload) = match core.data_type {
            DataType::Bit => {
                let bit = data.get_bit(core.data_offset, core.bit_index())?;
                (DATA_SIZE_BIT, 1u32, vec![u8::from(bit)])
            }
            _ => {
                let payload = data.slice(core.data_offset, core.address.size())?.to_vec();
                (DATA_SIZE_BYTE, payload.len() as u32 * 8, payload)
            }
        };
        let bits = u16::try_from(bits).map_err(|_| {
            PlcError::value_out_of_range(format!("{bits} bits exceed one write item"))
        })?;
        let mut section = Vec::with_capacity(4 + payload.len());
        section.push(0x00);
        section.push(size_code);
        section.extend_from_slice(&bits.to_be_bytes());
        section.extend_from_slice(&payload);
        Ok(section)
    }
}

impl Request for S7WriteRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Write
    }

    fn protocol(&self) -> Protocol {
        Protocol::S7
    }

    fn data_type(&self) -> DataType {
        self.item.core.data_type
    }

    fn address(&self) -> &Address {
        &self.item.core.address
    }

    fn data_offset(&self) -> usize {
        self.item.core.data_offset
    }

    fn data(&self) -> &SharedData {
        &self.item.core.data
    }

    fn write(&self, link: &mut Link) -> Result<()> {
        let section = self.data_section()?;
        self.item.send(link, FUNCTION_WRITE_VAR, &section)
    }

    fn read(&self, link: &mut Link) -> Result<()> {
        let pdu_ref = link.in_flight();
        let ack = receive_ack(link, pdu_ref)?;
        ack.expect_function(FUNCTION_WRITE_VAR)?;
        ack.write_item()?;
        debug!(address = %self.item.core.address, "S7 write acknowledged");
        Ok(())
    }
}

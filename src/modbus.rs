//! MODBUS/TCP connection and requests.
//!
//! The MODBUS variant needs no handshake beyond the TCP connect. Requests are
//! framed with the MBAP header and address the coupler's areas through the
//! vendor offset table in [`memory`](crate::memory):
//!
//! | Area kind | Read reference | Read units | Write reference |
//! |-----------|----------------|------------|-----------------|
//! | digital, PFC | `byte * 8 + bit + offset` | BIT: size, else size * 8 discretes | BIT: `byte * 8 + bit + offset`, BYTE: `byte * 8 + offset`, WORD/DWORD: `ceil(byte / 2) + register offset` |
//! | analog | `byte / 2 + offset` | registers, see [`register_count`] | not writable |
//! | NOVRAM | `byte / 2 + 0x3000` | registers, see [`register_count`] | `ceil(byte / 2) + 0x3000` |
//!
//! Register payloads travel big-endian per register and are byte-swapped into
//! the little-endian buffer layout.
//!
//! # Example
//!
//! ```no_run
//! use plclink::{Address, Connection, DataType, ModbusArea, ModbusConfig, ModbusConnection};
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! let config = ModbusConfig::new(Ipv4Addr::new(192, 168, 1, 20))
//!     .with_read_timeout(Duration::from_secs(1));
//! let mut conn = ModbusConnection::new(config)?;
//!
//! let outputs = conn.generate_data_object(1).into_shared();
//! plclink::data::lock(&outputs).set_bit(0, 3, true)?;
//! let addr = Address::modbus(ModbusArea::PhysicalOutputDigital, 0, Some(3), 1)?;
//! let request = conn.generate_write_request(DataType::Bit, addr, 0, outputs)?;
//!
//! let mut tx = conn.generate_transmit_transaction();
//! tx.enqueue(request)?;
//! tx.transact()?;
//! # Ok::<(), plclink::PlcError>(())
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::address::Address;
use crate::connection::{Connection, Endpoint, Link, Protocol, TransactionCounter};
use crate::data::{self, ByteOrder, Data, SharedData};
use crate::error::{PlcError, Result};
use crate::header::MbapHeader;
use crate::memory::{function, offsets, ModbusArea};
use crate::pacing::{CycleClock, SleepClock, BYTE_WAIT_BUDGET, DEFAULT_CYCLE_TIME};
use crate::request::{DataType, Request, RequestCore, RequestKind};
use crate::response::{ModbusResponse, MODBUS_RESPONSE_HEAD_SIZE};
use crate::transaction::{Transaction, TransactionKind};
use crate::transport::{TcpTransport, Transport, DEFAULT_MODBUS_PORT, DEFAULT_READ_TIMEOUT};
use crate::utils::{get_bit, swap_register_bytes};

/// Largest payload a MODBUS connection moves in one request.
pub const MAX_TRANSFER_LENGTH: usize = 512;

/// Most registers a single read may fetch.
pub const MAX_READ_REGISTERS: usize = 125;

/// Most registers a single write may store.
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Most discretes a single read may fetch.
pub const MAX_READ_DISCRETES: usize = 2000;

/// Most coils a single write may store.
pub const MAX_WRITE_COILS: usize = 1968;

/// Transaction ids wrap to 0 once they would reach this value.
const TRANSACTION_ID_LIMIT: u16 = 0xFFFF;

/// Bytes following the function code in a write response: reference low
/// byte and the echoed count.
const WRITE_ECHO_TAIL: usize = 3;

/// Registers needed to cover `len` bytes starting at `byte_index`.
///
/// An odd start or an odd length costs one extra register; both together
/// cost two.
///
/// # Example
///
/// ```
/// use plclink::modbus::register_count;
///
/// assert_eq!(register_count(4, 4), 2);
/// assert_eq!(register_count(5, 4), 3);
/// assert_eq!(register_count(4, 3), 2);
/// assert_eq!(register_count(5, 3), 3);
/// ```
pub fn register_count(byte_index: usize, len: usize) -> usize {
    let extra = match (byte_index % 2 == 1, len % 2 == 1) {
        (false, false) => 0,
        (true, true) => 2,
        _ => 1,
    };
    len / 2 + extra
}

/// Connection settings for a MODBUS/TCP coupler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModbusConfig {
    /// Coupler socket address.
    pub plc_addr: SocketAddr,
    /// Socket read timeout.
    pub read_timeout: Duration,
    /// Nominal cycle time of the control loop driving the transactions.
    pub cycle_time: Duration,
}

impl ModbusConfig {
    /// Creates a configuration for the default port 502.
    ///
    /// # Example
    ///
    /// ```
    /// use plclink::ModbusConfig;
    /// use std::net::Ipv4Addr;
    ///
    /// let config = ModbusConfig::new(Ipv4Addr::new(192, 168, 1, 20));
    /// assert_eq!(config.plc_addr.port(), 502);
    /// ```
    pub fn new(plc_ip: impl Into<IpAddr>) -> Self {
        Self {
            plc_addr: SocketAddr::new(plc_ip.into(), DEFAULT_MODBUS_PORT),
            read_timeout: DEFAULT_READ_TIMEOUT,
            cycle_time: DEFAULT_CYCLE_TIME,
        }
    }

    /// Sets a custom port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.plc_addr.set_port(port);
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
}

/// Connection to a MODBUS/TCP coupler.
#[derive(Debug)]
pub struct ModbusConnection {
    config: ModbusConfig,
    endpoint: Endpoint,
}

impl ModbusConnection {
    /// Connects to the coupler described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the TCP connection cannot be established.
    pub fn new(config: ModbusConfig) -> Result<Self> {
        let mut conn = Self::offline(config);
        conn.connect()?;
        Ok(conn)
    }

    /// Creates an unconnected connection; call [`Connection::connect`] later.
    pub fn offline(config: ModbusConfig) -> Self {
        let link = Link::new(
            Protocol::Modbus,
            Box::new(SleepClock::new(config.cycle_time)),
            TransactionCounter::new(TRANSACTION_ID_LIMIT),
        );
        Self {
            config,
            endpoint: Endpoint::new(link),
        }
    }

    /// Creates a connection over an already established transport.
    pub fn with_transport(config: ModbusConfig, transport: Box<dyn Transport>) -> Self {
        let mut conn = Self::offline(config);
        conn.endpoint.link.attach(transport);
        conn
    }

    /// Replaces the clock used for pacing and byte waits.
    pub fn with_clock(mut self, clock: Box<dyn CycleClock>) -> Self {
        self.endpoint.link.set_clock(clock);
        self
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &ModbusConfig {
        &self.config
    }
}

impl Connection for ModbusConnection {
    fn protocol(&self) -> Protocol {
        Protocol::Modbus
    }

    fn connect(&mut self) -> Result<()> {
        self.close()?;
        let transport = TcpTransport::connect(self.config.plc_addr, self.config.read_timeout)?;
        self.endpoint.link.attach(Box::new(transport));
        info!(plc = %self.config.plc_addr, "MODBUS connection established");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.endpoint.link.is_connected() {
            info!(plc = %self.config.plc_addr, "closing MODBUS connection");
        }
        self.endpoint.close()
    }

    fn is_connected(&self) -> bool {
        self.endpoint.link.is_connected()
    }

    fn max_transfer_length(&self) -> usize {
        MAX_TRANSFER_LENGTH
    }

    fn generate_data_object(&self, len: usize) -> Data {
        Data::new(len, ByteOrder::LittleEndian)
    }

    fn generate_read_request(
        &self,
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Arc<dyn Request>> {
        Ok(Arc::new(ModbusReadRequest::new(
            data_type,
            address,
            data_offset,
            data,
        )?))
    }

    fn generate_write_request(
        &self,
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Arc<dyn Request>> {
        Ok(Arc::new(ModbusWriteRequest::new(
            data_type,
            address,
            data_offset,
            data,
        )?))
    }

    fn generate_receive_transaction(&mut self) -> Transaction<'_> {
        self.endpoint.transaction(TransactionKind::Receive)
    }

    fn generate_transmit_transaction(&mut self) -> Transaction<'_> {
        self.endpoint.transaction(TransactionKind::Transmit)
    }
}

fn modbus_area(address: &Address) -> Result<ModbusArea> {
    address.modbus_area().ok_or_else(|| {
        PlcError::invalid_addressing(format!("{address} is not a MODBUS address"))
    })
}

fn to_reference(reference: usize) -> Result<u16> {
    u16::try_from(reference).map_err(|_| {
        PlcError::invalid_addressing(format!("reference {reference} exceeds 0xFFFF"))
    })
}

fn check_units(units: usize, max: usize, what: &str) -> Result<u16> {
    if units > max {
        return Err(PlcError::value_out_of_range(format!(
            "{units} {what} exceed the limit of {max} per request"
        )));
    }
    // max is far below u16::MAX
    Ok(units as u16)
}

/// `byte * 8 + offset`; BYTE items always start at bit 0.
fn byte_reference(core: &RequestCore, offset: usize) -> Result<usize> {
    core.byte_index()
        .checked_mul(8)
        .and_then(|bits| bits.checked_add(offset))
        .ok_or_else(|| {
            PlcError::invalid_addressing(format!(
                "byte index {} overflows the coil reference range",
                core.byte_index()
            ))
        })
}

fn mbap_frame(link: &mut Link, function_code: u8, body: &[u8]) -> Vec<u8> {
    let tid = link.begin_transaction();
    // unit id and function code count towards the length
    let header = MbapHeader::new(tid, (body.len() + 2) as u16);
    let mut frame = Vec::with_capacity(body.len() + 8);
    frame.extend_from_slice(&header.to_bytes());
    frame.push(function_code);
    frame.extend_from_slice(body);
    frame
}

fn receive_head(link: &mut Link, function_code: u8) -> Result<ModbusResponse> {
    let head = link.receive_within(MODBUS_RESPONSE_HEAD_SIZE, BYTE_WAIT_BUDGET)?;
    let response = ModbusResponse::from_bytes(&head)?;
    response.check(function_code, link.in_flight())?;
    Ok(response)
}

/// Reads one item from a MODBUS area.
#[derive(Debug)]
pub struct ModbusReadRequest {
    core: RequestCore,
    function_code: u8,
    reference: u16,
    unit_count: u16,
}

impl ModbusReadRequest {
    /// Creates a read request and derives its wire reference and unit count.
    ///
    /// # Errors
    ///
    /// - `PlcError::InvalidAddressing` for non-MODBUS addresses, a BIT
    ///   request without bit index or a reference beyond 0xFFFF
    /// - `PlcError::ValueOutOfRange` if the item needs more registers or
    ///   discretes than one request may carry
    /// - `PlcError::IndexOutOfRange` if the item does not fit the buffer at
    ///   `data_offset`
    pub fn new(
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Self> {
        let area = modbus_area(&address)?;
        let core = RequestCore::new(data_type, address, data_offset, data)?;
        let byte = core.byte_index();
        let size = address.size();

        let (reference, unit_count) = if let Some(offset) = area.register_offset() {
            let units = register_count(byte, size);
            (
                byte / 2 + usize::from(offset),
                check_units(units, MAX_READ_REGISTERS, "registers")?,
            )
        } else if let Some(offset) = area.bit_offset() {
            let units = match data_type {
                DataType::Bit => size,
                _ => size.saturating_mul(8),
            };
            (
                core.bit_address(usize::from(offset))?,
                check_units(units, MAX_READ_DISCRETES, "discretes")?,
            )
        } else {
            return Err(PlcError::invalid_addressing(format!(
                "{area} has no read mapping"
            )));
        };

        Ok(Self {
            core,
            function_code: area.read_function_code(),
            reference: to_reference(reference)?,
            unit_count,
        })
    }

    /// Function code placed in the request frame.
    pub fn function_code(&self) -> u8 {
        self.function_code
    }

    /// Wire reference of the first unit read.
    pub fn reference(&self) -> u16 {
        self.reference
    }

    /// Number of registers or discretes read.
    pub fn unit_count(&self) -> u16 {
        self.unit_count
    }

    fn map(&self, payload: &[u8]) -> Result<()> {
        let byte = self.core.byte_index();
        let bit = self.core.bit_index();
        let offset = self.core.data_offset;
        let size = self.core.address.size();
        let mut data = data::lock(&self.core.data);

        if self.function_code == function::READ_MULTIPLE_REGISTERS {
            if self.core.data_type == DataType::Bit {
                // even byte indices sit in the low (second) byte of a wire register
                let source = if byte % 2 == 0 { payload.get(1) } else { payload.first() };
                let source = source.copied().ok_or_else(|| short_payload(payload.len(), 2))?;
                return data.set_bit(offset, bit, get_bit(source, bit));
            }
            let mut native = payload.to_vec();
            swap_register_bytes(&mut native);
            // an odd start fetched the register's leading byte too
            let skip = byte % 2;
            let item = native
                .get(skip..skip + size)
                .ok_or_else(|| short_payload(payload.len(), skip + size))?;
            return data.copy_from_slice(offset, item);
        }

        match self.core.data_type {
            DataType::Bit => {
                let packed = payload.first().copied().ok_or_else(|| short_payload(0, 1))?;
                data.set_bit(offset, bit, packed & 0x01 != 0)
            }
            _ => {
                let item = payload
                    .get(..size)
                    .ok_or_else(|| short_payload(payload.len(), size))?;
                data.copy_from_slice(offset, item)
            }
        }
    }
}

fn short_payload(got: usize, needed: usize) -> PlcError {
    PlcError::invalid_response(format!(
        "payload of {got} bytes too short, {needed} needed"
    ))
}

impl Request for ModbusReadRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Read
    }

    fn protocol(&self) -> Protocol {
        Protocol::Modbus
    }

    fn data_type(&self) -> DataType {
        self.core.data_type
    }

    fn address(&self) -> &Address {
        &self.core.address
    }

    fn data_offset(&self) -> usize {
        self.core.data_offset
    }

    fn data(&self) -> &SharedData {
        &self.core.data
    }

    fn write(&self, link: &mut Link) -> Result<()> {
        let mut body = [0u8; 4];
        body[..2].copy_from_slice(&self.reference.to_be_bytes());
        body[2..].copy_from_slice(&self.unit_count.to_be_bytes());
        let frame = mbap_frame(link, self.function_code, &body);
        link.send(&frame)
    }

    fn read(&self, link: &mut Link) -> Result<()> {
        let response = receive_head(link, self.function_code)?;
        let byte_count = usize::from(response.value);
        let payload = link.receive_within(byte_count, BYTE_WAIT_BUDGET)?;
        debug!(
            address = %self.core.address,
            reference = self.reference,
            byte_count,
            "MODBUS read response"
        );
        self.map(&payload)
    }
}

/// Writes one item to a digital, PFC or NOVRAM area.
#[derive(Debug)]
pub struct ModbusWriteRequest {
    core: RequestCore,
    function_code: u8,
    reference: u16,
    unit_count: u16,
    byte_count: u8,
}

impl ModbusWriteRequest {
    /// Creates a write request and derives its wire reference and counts.
    ///
    /// # Errors
    ///
    /// - `PlcError::InvalidAddressing` for analog areas, BIT or BYTE
    ///   writes to the NOVRAM and the cases listed for
    ///   [`ModbusReadRequest::new`]
    /// - `PlcError::InvalidParameter` for NOVRAM items of odd size
    /// - `PlcError::ValueOutOfRange` if the item needs more registers or
    ///   coils than one request may carry
    pub fn new(
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Self> {
        let area = modbus_area(&address)?;
        let core = RequestCore::new(data_type, address, data_offset, data)?;
        let byte = core.byte_index();
        let size = address.size();

        let (reference, unit_count, byte_count) = match area {
            ModbusArea::PhysicalInputAnalog | ModbusArea::PhysicalOutputAnalog => {
                return Err(PlcError::invalid_addressing(format!(
                    "{area} cannot be written"
                )));
            }
            ModbusArea::Novram => {
                if matches!(data_type, DataType::Bit | DataType::Byte) {
                    return Err(PlcError::invalid_addressing(format!(
                        "{data_type} writes to NOVRAM are not supported"
                    )));
                }
                if size % 2 != 0 {
                    return Err(PlcError::invalid_parameter(
                        "size",
                        format!("NOVRAM writes need whole registers, got {size} bytes"),
                    ));
                }
                let offset = usize::from(area.register_write_offset().unwrap_or(offsets::NOVRAM));
                (
                    byte.div_ceil(2) + offset,
                    check_units(size / 2, MAX_WRITE_REGISTERS, "registers")?,
                    size,
                )
            }
            _ => {
                let coils = check_units(size.saturating_mul(8), MAX_WRITE_COILS, "coils")?;
                match data_type {
                    DataType::Bit => {
                        let offset = usize::from(area.bit_offset().unwrap_or(0));
                        (core.bit_address(offset)?, 1, 1)
                    }
                    DataType::Byte => {
                        let offset = usize::from(area.bit_offset().unwrap_or(0));
                        (byte_reference(&core, offset)?, coils, size)
                    }
                    // WORD/DWORD go through the area's register view
                    DataType::Word | DataType::Dword => {
                        let offset = usize::from(area.register_write_offset().unwrap_or(0));
                        (byte.div_ceil(2) + offset, coils, size)
                    }
                }
            }
        };

        Ok(Self {
            core,
            function_code: area.write_function_code(),
            reference: to_reference(reference)?,
            unit_count,
            // bounded by the register and coil limits
            byte_count: byte_count as u8,
        })
    }

    /// Function code placed in the request frame.
    pub fn function_code(&self) -> u8 {
        self.function_code
    }

    /// Wire reference of the first unit written.
    pub fn reference(&self) -> u16 {
        self.reference
    }

    /// Number of coils or registers written.
    pub fn unit_count(&self) -> u16 {
        self.unit_count
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let data = data::lock(&self.core.data);
        let offset = self.core.data_offset;
        match self.core.data_type {
            DataType::Bit => Ok(vec![u8::from(data.get_bit(offset, self.core.bit_index())?)]),
            _ => {
                let mut payload = data.slice(offset, usize::from(self.byte_count))?.to_vec();
                if self.function_code == function::WRITE_MULTIPLE_REGISTERS {
                    swap_register_bytes(&mut payload);
                }
                Ok(payload)
            }
        }
    }
}

impl Request for ModbusWriteRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Write
    }

    fn protocol(&self) -> Protocol {
        Protocol::Modbus
    }

    fn data_type(&self) -> DataType {
        self.core.data_type
    }

    fn address(&self) -> &Address {
        &self.core.address
    }

    fn data_offset(&self) -> usize {
        self.core.data_offset
    }

    fn data(&self) -> &SharedData {
        &self.core.data
    }

    fn write(&self, link: &mut Link) -> Result<()> {
        let payload = self.payload()?;
        let mut body = Vec::with_capacity(5 + payload.len());
        body.extend_from_slice(&self.reference.to_be_bytes());
        body.extend_from_slice(&self.unit_count.to_be_bytes());
        body.push(self.byte_count);
        body.extend_from_slice(&payload);
        let frame = mbap_frame(link, self.function_code, &body);
        link.send(&frame)
    }

    fn read(&self, link: &mut Link) -> Result<()> {
        let response = receive_head(link, self.function_code)?;
        let tail = link.receive_within(WRITE_ECHO_TAIL, BYTE_WAIT_BUDGET)?;
        let reference = u16::from_be_bytes([response.value, tail[0]]);
        let unit_count = u16::from_be_bytes([tail[1], tail[2]]);
        if reference != self.reference || unit_count != self.unit_count {
            return Err(PlcError::invalid_response(format!(
                "write echo {reference:#06X}/{unit_count} does not match request {:#06X}/{}",
                self.reference, self.unit_count
            )));
        }
        debug!(address = %self.core.address, reference, "MODBUS write acknowledged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CountingClock, MockTransport};

    fn connection(mock: &MockTransport) -> ModbusConnection {
        ModbusConnection::with_transport(ModbusConfig::new([127, 0, 0, 1]), Box::new(mock.clone()))
            .with_clock(Box::new(CountingClock::new(Duration::from_millis(10))))
    }

    fn shared(len: usize) -> SharedData {
        Data::new(len, ByteOrder::LittleEndian).into_shared()
    }

    fn read_request(
        area: ModbusArea,
        data_type: DataType,
        byte: usize,
        bit: Option<u8>,
        size: usize,
    ) -> Result<ModbusReadRequest> {
        let addr = Address::modbus(area, byte, bit, size)?;
        ModbusReadRequest::new(data_type, addr, 0, shared(size.max(4)))
    }

    fn receive(conn: &mut ModbusConnection, request: Arc<dyn Request>) -> Result<()> {
        let mut rx = conn.generate_receive_transaction();
        rx.enqueue(request)?;
        rx.transact()
    }

    fn transmit(conn: &mut ModbusConnection, request: Arc<dyn Request>) -> Result<()> {
        let mut tx = conn.generate_transmit_transaction();
        tx.enqueue(request)?;
        tx.transact()
    }

    #[test]
    fn test_register_count_rules() {
        assert_eq!(register_count(0, 2), 1);
        assert_eq!(register_count(4, 8), 4);
        assert_eq!(register_count(1, 2), 2);
        assert_eq!(register_count(0, 3), 2);
        assert_eq!(register_count(1, 3), 3);
        assert_eq!(register_count(3, 1), 2);
    }

    #[test]
    fn test_read_reference_digital_output() {
        let request =
            read_request(ModbusArea::PhysicalOutputDigital, DataType::Bit, 3, Some(5), 1).unwrap();
        assert_eq!(request.reference(), 3 * 8 + 5 + offsets::BIT_OUTPUTS_ACCESS);
        assert_eq!(request.function_code(), 0x02);
        assert_eq!(request.unit_count(), 1);
    }

    #[test]
    fn test_read_reference_novram() {
        let request = read_request(ModbusArea::Novram, DataType::Word, 10, None, 2).unwrap();
        assert_eq!(request.reference(), 5 + offsets::NOVRAM);
        assert_eq!(request.function_code(), 0x03);
        assert_eq!(request.unit_count(), 1);
    }

    #[test]
    fn test_read_reference_other_areas() {
        let analog_out =
            read_request(ModbusArea::PhysicalOutputAnalog, DataType::Word, 6, None, 2).unwrap();
        assert_eq!(analog_out.reference(), 0x0203);

        let pfc_in = read_request(ModbusArea::PfcInput, DataType::Byte, 2, None, 2).unwrap();
        assert_eq!(pfc_in.reference(), 16 + 0x2000);
        assert_eq!(pfc_in.unit_count(), 16);

        let pfc_out = read_request(ModbusArea::PfcOutput, DataType::Bit, 0, Some(7), 1).unwrap();
        assert_eq!(pfc_out.reference(), 7 + 0x1000);

        let input = read_request(ModbusArea::PhysicalInputDigital, DataType::Dword, 1, None, 4)
            .unwrap();
        assert_eq!(input.reference(), 8);
        assert_eq!(input.unit_count(), 32);
    }

    #[test]
    fn test_read_limits() {
        assert!(read_request(ModbusArea::Novram, DataType::Word, 0, None, 250).is_ok());
        assert!(matches!(
            read_request(ModbusArea::Novram, DataType::Word, 0, None, 252),
            Err(PlcError::ValueOutOfRange { .. })
        ));
        assert!(read_request(ModbusArea::PfcInput, DataType::Byte, 0, None, 250).is_ok());
        assert!(read_request(ModbusArea::PfcInput, DataType::Byte, 0, None, 251).is_err());
    }

    #[test]
    fn test_read_rejects_data_block() {
        let addr = Address::data_block(1, 0, None, 2).unwrap();
        assert!(matches!(
            ModbusReadRequest::new(DataType::Word, addr, 0, shared(2)),
            Err(PlcError::InvalidAddressing { .. })
        ));
    }

    #[test]
    fn test_read_frame() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("0001000000050003021234").unwrap());
        let mut conn = connection(&mock);
        let data = shared(2);
        let addr = Address::modbus(ModbusArea::PhysicalInputAnalog, 4, None, 2).unwrap();
        let request = conn
            .generate_read_request(DataType::Word, addr, 0, data.clone())
            .unwrap();
        receive(&mut conn, request).unwrap();

        assert_eq!(
            mock.frames(),
            vec![hex::decode("000100000006000300020001").unwrap()]
        );
        // wire register 0x1234 is stored low byte first
        let data = data::lock(&data);
        assert_eq!(data.bytes(), &[0x34, 0x12]);
        assert_eq!(data.get_word(0).unwrap(), 0x1234);
    }

    #[test]
    fn test_read_odd_start_drops_leading_byte() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("00010000000700030412FFEE34").unwrap());
        let mut conn = connection(&mock);
        let data = shared(4);
        let addr = Address::modbus(ModbusArea::Novram, 1, None, 2).unwrap();
        let request = conn
            .generate_read_request(DataType::Word, addr, 2, data.clone())
            .unwrap();
        receive(&mut conn, request).unwrap();

        assert_eq!(&mock.frames()[0][8..], &[0x30, 0x00, 0x00, 0x02]);
        assert_eq!(data::lock(&data).bytes(), &[0x00, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn test_read_bit_from_register_alternates_bytes() {
        // even byte index: the bit comes from the second byte of the register
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("0001000000050003020108").unwrap());
        let mut conn = connection(&mock);
        let data = shared(1);
        let addr = Address::modbus(ModbusArea::Novram, 2, Some(3), 1).unwrap();
        let request = conn
            .generate_read_request(DataType::Bit, addr, 0, data.clone())
            .unwrap();
        receive(&mut conn, request).unwrap();
        assert_eq!(data::lock(&data).get_byte(0).unwrap(), 0x08);

        // odd byte index: the bit comes from the first byte
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("00010000000700030401FE0000").unwrap());
        let mut conn = connection(&mock);
        let data = shared(1);
        let addr = Address::modbus(ModbusArea::Novram, 3, Some(0), 1).unwrap();
        let request = conn
            .generate_read_request(DataType::Bit, addr, 0, data.clone())
            .unwrap();
        receive(&mut conn, request).unwrap();
        assert_eq!(data::lock(&data).get_byte(0).unwrap(), 0x01);
    }

    #[test]
    fn test_read_discrete_bit() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("00010000000400020101").unwrap());
        let mut conn = connection(&mock);
        let data = shared(2);
        let addr = Address::modbus(ModbusArea::PfcInput, 0, Some(2), 1).unwrap();
        let request = conn
            .generate_read_request(DataType::Bit, addr, 1, data.clone())
            .unwrap();
        receive(&mut conn, request).unwrap();

        assert_eq!(
            mock.frames()[0],
            hex::decode("000100000006000220020001").unwrap()
        );
        assert_eq!(data::lock(&data).bytes(), &[0x00, 0x04]);
    }

    #[test]
    fn test_read_discrete_bytes() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("000100000005000202A55A").unwrap());
        let mut conn = connection(&mock);
        let data = shared(2);
        let addr = Address::modbus(ModbusArea::PhysicalInputDigital, 1, None, 2).unwrap();
        let request = conn
            .generate_read_request(DataType::Byte, addr, 0, data.clone())
            .unwrap();
        receive(&mut conn, request).unwrap();
        assert_eq!(data::lock(&data).bytes(), &[0xA5, 0x5A]);
    }

    #[test]
    fn test_read_short_payload() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("00010000000400030112").unwrap());
        let mut conn = connection(&mock);
        let addr = Address::modbus(ModbusArea::PhysicalInputAnalog, 0, None, 2).unwrap();
        let request = conn
            .generate_read_request(DataType::Word, addr, 0, shared(2))
            .unwrap();
        assert!(matches!(
            receive(&mut conn, request),
            Err(PlcError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_write_coil() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("000100000006000F02010001").unwrap());
        let mut conn = connection(&mock);
        let data = shared(1);
        data::lock(&data).set_bit(0, 1, true).unwrap();
        let addr = Address::modbus(ModbusArea::PhysicalOutputDigital, 0, Some(1), 1).unwrap();
        let request = conn
            .generate_write_request(DataType::Bit, addr, 0, data)
            .unwrap();
        transmit(&mut conn, request).unwrap();

        assert_eq!(
            mock.frames(),
            vec![hex::decode("000100000008000F020100010101").unwrap()]
        );
    }

    #[test]
    fn test_write_pfc_output_word() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("000100000006000F01010010").unwrap());
        let mut conn = connection(&mock);
        let data = shared(2);
        data::lock(&data).copy_from_slice(0, &[0x0F, 0xF0]).unwrap();
        let addr = Address::modbus(ModbusArea::PfcOutput, 2, None, 2).unwrap();
        let request = conn
            .generate_write_request(DataType::Word, addr, 0, data)
            .unwrap();
        transmit(&mut conn, request).unwrap();

        // register view: ceil(2 / 2) + 0x0100, still written as 16 coils
        assert_eq!(
            mock.frames()[0],
            hex::decode("000100000009000F01010010020FF0").unwrap()
        );
    }

    #[test]
    fn test_write_byte_reference() {
        let addr = Address::modbus(ModbusArea::PfcOutput, 2, None, 2).unwrap();
        let request = ModbusWriteRequest::new(DataType::Byte, addr, 0, shared(2)).unwrap();
        assert_eq!(request.reference(), 2 * 8 + offsets::BIT_PFC_OUTPUT_ACCESS);
        assert_eq!(request.unit_count(), 16);
        assert_eq!(request.function_code(), 0x0F);
    }

    #[test]
    fn test_write_word_references() {
        let write = |area, data_type, byte, size| {
            let addr = Address::modbus(area, byte, None, size).unwrap();
            ModbusWriteRequest::new(data_type, addr, 0, shared(4))
                .unwrap()
                .reference()
        };
        assert_eq!(
            write(ModbusArea::PhysicalOutputDigital, DataType::Word, 4, 2),
            2 + offsets::REGISTER_OUTPUTS_ACCESS
        );
        assert_eq!(
            write(ModbusArea::PfcInput, DataType::Dword, 4, 4),
            2 + offsets::REGISTER_PFC_INPUT_ACCESS
        );
        assert_eq!(
            write(ModbusArea::PfcOutput, DataType::Word, 3, 2),
            2 + offsets::REGISTER_PFC_OUTPUT_ACCESS
        );
        assert_eq!(write(ModbusArea::PhysicalInputDigital, DataType::Word, 5, 2), 3);
    }

    #[test]
    fn test_reference_overflow_is_rejected() {
        let huge = Address::modbus(ModbusArea::PfcInput, usize::MAX / 4, None, 1).unwrap();
        assert!(matches!(
            ModbusReadRequest::new(DataType::Byte, huge, 0, shared(1)),
            Err(PlcError::InvalidAddressing { .. })
        ));
        assert!(matches!(
            ModbusWriteRequest::new(DataType::Byte, huge, 0, shared(1)),
            Err(PlcError::InvalidAddressing { .. })
        ));

        let huge_bit = Address::modbus(ModbusArea::PfcOutput, usize::MAX / 8, Some(7), 1).unwrap();
        assert!(matches!(
            ModbusWriteRequest::new(DataType::Bit, huge_bit, 0, shared(1)),
            Err(PlcError::InvalidAddressing { .. })
        ));

        // no overflow, but beyond the 16-bit reference space
        let far = Address::modbus(ModbusArea::PfcInput, 0x4000, None, 1).unwrap();
        assert!(ModbusReadRequest::new(DataType::Byte, far, 0, shared(1)).is_err());
    }

    #[test]
    fn test_write_novram_word() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("000100000006001030020001").unwrap());
        let mut conn = connection(&mock);
        let data = shared(2);
        data::lock(&data).set_word(0, 0x1234).unwrap();
        let addr = Address::modbus(ModbusArea::Novram, 3, None, 2).unwrap();
        let request = conn
            .generate_write_request(DataType::Word, addr, 0, data)
            .unwrap();
        transmit(&mut conn, request).unwrap();

        // the write path rounds odd byte indices up
        assert_eq!(
            mock.frames()[0],
            hex::decode("000100000009001030020001021234").unwrap()
        );
    }

    #[test]
    fn test_write_rejections() {
        let analog = Address::modbus(ModbusArea::PhysicalOutputAnalog, 0, None, 2).unwrap();
        assert!(matches!(
            ModbusWriteRequest::new(DataType::Word, analog, 0, shared(2)),
            Err(PlcError::InvalidAddressing { .. })
        ));

        let novram_bit = Address::modbus(ModbusArea::Novram, 0, Some(0), 1).unwrap();
        assert!(matches!(
            ModbusWriteRequest::new(DataType::Bit, novram_bit, 0, shared(2)),
            Err(PlcError::InvalidAddressing { .. })
        ));

        let novram_byte = Address::modbus(ModbusArea::Novram, 0, None, 1).unwrap();
        assert!(ModbusWriteRequest::new(DataType::Byte, novram_byte, 0, shared(2)).is_err());

        let novram_odd = Address::modbus(ModbusArea::Novram, 0, None, 3).unwrap();
        assert!(matches!(
            ModbusWriteRequest::new(DataType::Word, novram_odd, 0, shared(4)),
            Err(PlcError::InvalidParameter { .. })
        ));

        let too_many = Address::modbus(ModbusArea::Novram, 0, None, 248).unwrap();
        assert!(matches!(
            ModbusWriteRequest::new(DataType::Word, too_many, 0, shared(248)),
            Err(PlcError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_write_exception_response() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("000100000003008F04").unwrap());
        let mut conn = connection(&mock);
        let addr = Address::modbus(ModbusArea::PfcOutput, 0, Some(0), 1).unwrap();
        let request = conn
            .generate_write_request(DataType::Bit, addr, 0, shared(1))
            .unwrap();
        assert!(matches!(
            transmit(&mut conn, request),
            Err(PlcError::InvalidFunctionCode {
                function_code: 0x8F,
                error_code: 0x04
            })
        ));
    }

    #[test]
    fn test_write_echo_mismatch() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("000100000006000F10000001").unwrap());
        let mut conn = connection(&mock);
        let addr = Address::modbus(ModbusArea::PfcOutput, 0, Some(1), 1).unwrap();
        let request = conn
            .generate_write_request(DataType::Bit, addr, 0, shared(1))
            .unwrap();
        assert!(matches!(
            transmit(&mut conn, request),
            Err(PlcError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_transaction_ids_increment() {
        let mock = MockTransport::new();
        mock.respond_with(&hex::decode("0001000000050003020000").unwrap());
        mock.respond_with(&hex::decode("0002000000050003020000").unwrap());
        let mut conn = connection(&mock);
        let addr = Address::modbus(ModbusArea::PhysicalInputAnalog, 0, None, 2).unwrap();
        let request = conn
            .generate_read_request(DataType::Word, addr, 0, shared(2))
            .unwrap();
        receive(&mut conn, request.clone()).unwrap();
        receive(&mut conn, request).unwrap();
        let frames = mock.frames();
        assert_eq!(&frames[0][..2], &[0x00, 0x01]);
        assert_eq!(&frames[1][..2], &[0x00, 0x02]);
    }

    #[test]
    fn test_offline_connection() {
        let mut conn = ModbusConnection::offline(ModbusConfig::new([127, 0, 0, 1]));
        assert!(!conn.is_connected());
        assert_eq!(conn.max_transfer_length(), 512);
        assert_eq!(conn.protocol(), Protocol::Modbus);
        assert_eq!(
            conn.generate_data_object(4).byte_order(),
            ByteOrder::LittleEndian
        );
        let addr = Address::modbus(ModbusArea::PhysicalInputAnalog, 0, None, 2).unwrap();
        let request = conn
            .generate_read_request(DataType::Word, addr, 0, shared(2))
            .unwrap();
        assert!(matches!(
            receive(&mut conn, request),
            Err(PlcError::NotConnected)
        ));
    }

    #[test]
    fn test_connect_and_close() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ModbusConfig::new([127, 0, 0, 1]).with_port(port);

        let mut conn = ModbusConnection::new(config).unwrap();
        assert!(conn.is_connected());
        conn.close().unwrap();
        assert!(!conn.is_connected());
        conn.connect().unwrap();
        assert!(conn.is_connected());
        conn.close().unwrap();
    }

    #[test]
    fn test_config_builder() {
        let config = ModbusConfig::new([10, 0, 0, 1])
            .with_port(1502)
            .with_read_timeout(Duration::from_millis(250))
            .with_cycle_time(Duration::from_millis(20));
        assert_eq!(config.plc_addr.to_string(), "10.0.0.1:1502");
        assert_eq!(config.read_timeout, Duration::from_millis(250));
        assert_eq!(config.cycle_time, Duration::from_millis(20));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde_round_trip() {
        let config = ModbusConfig::new([10, 0, 0, 1]).with_cycle_time(Duration::from_millis(20));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ModbusConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}

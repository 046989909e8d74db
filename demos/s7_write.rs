//! Example: Writing and reading back S7 data block items
//!
//! Run with: cargo run --example s7_write -- 192.168.0.1
//!
//! This example demonstrates:
//! - The ISO-on-TCP handshake and PDU negotiation
//! - Typed big-endian buffers
//! - BIT, WORD and DWORD requests on a data block
//! - Handling PLC-side rejections

use plclink::{Address, Connection, DataType, PlcError, S7Config, S7Connection};
use std::net::Ipv4Addr;
use std::time::Duration;

const DB: u16 = 10;

fn main() -> plclink::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let ip: Ipv4Addr = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(Ipv4Addr::new(192, 168, 0, 1));

    // =========================================================================
    // Connect (rack 0, slot 2 is the usual S7-300 CPU position)
    // =========================================================================

    let config = S7Config::new(ip, 0, 2)
        .with_connect_timeout(Duration::from_secs(5))
        .with_requested_pdu_length(960);
    let mut conn = S7Connection::new(config)?;
    println!(
        "PDU length {}, up to {} bytes per request",
        conn.pdu_length(),
        conn.max_transfer_length()
    );

    // =========================================================================
    // Fill the buffer
    // =========================================================================

    // DB10.DBX0.0, DB10.DBW2, DB10.DBD4
    let data = conn.generate_data_object(8).into_shared();
    {
        let mut buffer = plclink::data::lock(&data);
        buffer.set_bit(0, 0, true)?;
        buffer.set_int(2, -1234)?;
        buffer.set_dint(4, 1_000_000)?;
    }

    let flag = Address::data_block(DB, 0, Some(0), 1)?;
    let setpoint = Address::data_block(DB, 2, None, 2)?;
    let total = Address::data_block(DB, 4, None, 4)?;

    // =========================================================================
    // Write
    // =========================================================================

    let writes = [
        conn.generate_write_request(DataType::Bit, flag, 0, data.clone())?,
        conn.generate_write_request(DataType::Word, setpoint, 2, data.clone())?,
        conn.generate_write_request(DataType::Dword, total, 4, data.clone())?,
    ];
    let mut tx = conn.generate_transmit_transaction();
    for request in writes {
        tx.enqueue(request)?;
    }
    match tx.transact() {
        Ok(()) => println!("wrote {flag}, {setpoint}, {total}"),
        Err(PlcError::AccessRejected { return_code }) => {
            println!("PLC rejected the write (return code 0x{return_code:02X}), does DB{DB} exist?");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    // =========================================================================
    // Read back into a second buffer
    // =========================================================================

    let readback = conn.generate_data_object(8).into_shared();
    let reads = [
        conn.generate_read_request(DataType::Bit, flag, 0, readback.clone())?,
        conn.generate_read_request(DataType::Word, setpoint, 2, readback.clone())?,
        conn.generate_read_request(DataType::Dword, total, 4, readback.clone())?,
    ];
    let mut rx = conn.generate_receive_transaction();
    for request in reads {
        rx.enqueue(request)?;
    }
    rx.transact()?;

    let buffer = plclink::data::lock(&readback);
    println!("DB{DB}.DBX0.0 = {}", buffer.get_bit(0, 0)?);
    println!("DB{DB}.DBW2   = {}", buffer.get_int(2)?);
    println!("DB{DB}.DBD4   = {}", buffer.get_dint(4)?);
    drop(buffer);

    conn.close()?;
    println!("\nS7 write example completed!");
    Ok(())
}

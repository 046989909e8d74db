//! Example: Cyclic process image exchange over MODBUS/TCP
//!
//! Run with: cargo run --example cyclic_read -- 192.168.1.10
//!
//! This example demonstrates:
//! - Binding several requests to one shared buffer
//! - Draining the receive and transmit transactions once per cycle
//! - Switching a transaction to cycle pacing
//! - Logging through a tracing subscriber (set RUST_LOG=plclink=debug)

use plclink::{
    Address, Connection, CycleClock, DataType, ModbusArea, ModbusConfig, ModbusConnection,
    Pacing, PlcError, SleepClock,
};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CYCLE_TIME: Duration = Duration::from_millis(50);

fn main() -> plclink::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ip: Ipv4Addr = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(Ipv4Addr::new(192, 168, 1, 10));

    // =========================================================================
    // Connect to the coupler
    // =========================================================================

    let config = ModbusConfig::new(ip).with_cycle_time(CYCLE_TIME);
    let mut conn = ModbusConnection::new(config)?;

    // =========================================================================
    // Bind requests
    // =========================================================================

    // 2 analog input words, 1 byte of digital inputs, 1 NOVRAM dword
    let inputs = conn.generate_data_object(8).into_shared();
    let analog = Address::modbus(ModbusArea::PhysicalInputAnalog, 0, None, 4)?;
    let digital = Address::modbus(ModbusArea::PhysicalInputDigital, 0, None, 1)?;
    let counter = Address::modbus(ModbusArea::Novram, 0, None, 2)?;
    let reads = [
        conn.generate_read_request(DataType::Word, analog, 0, inputs.clone())?,
        conn.generate_read_request(DataType::Byte, digital, 4, inputs.clone())?,
        conn.generate_read_request(DataType::Word, counter, 6, inputs.clone())?,
    ];

    // a single output bit, toggled every cycle
    let outputs = conn.generate_data_object(1).into_shared();
    let lamp = Address::modbus(ModbusArea::PhysicalOutputDigital, 0, Some(0), 1)?;
    let write = conn.generate_write_request(DataType::Bit, lamp, 0, outputs.clone())?;

    conn.generate_receive_transaction().set_pacing(Pacing::Cycles(1));

    // =========================================================================
    // Control loop
    // =========================================================================

    let mut clock = SleepClock::new(CYCLE_TIME);
    for cycle in 0..100u32 {
        let mut rx = conn.generate_receive_transaction();
        for request in &reads {
            rx.enqueue(request.clone())?;
        }
        match rx.transact() {
            Ok(()) => {
                let data = plclink::data::lock(&inputs);
                println!(
                    "cycle {cycle:3}: AI0={:5} AI1={:5} DI={:08b} NOVRAM0={}",
                    data.get_word(0)?,
                    data.get_word(2)?,
                    data.get_byte(4)?,
                    data.get_word(6)?
                );
            }
            // a late response is skipped, the next cycle asks again
            Err(PlcError::Timeout { reason }) => println!("cycle {cycle:3}: {reason}"),
            Err(e) => return Err(e),
        }

        plclink::data::lock(&outputs).set_bit(0, 0, cycle % 2 == 0)?;
        let mut tx = conn.generate_transmit_transaction();
        tx.enqueue(write.clone())?;
        tx.transact()?;

        clock.await_next_cycle();
    }

    conn.close()?;
    println!("\nCyclic read example completed!");
    Ok(())
}

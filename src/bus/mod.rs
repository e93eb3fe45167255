pub mod client;
pub mod frame;
pub mod modbus;

pub use client::BusClient;
pub use modbus::{ModbusRtuClient, SerialSettings};

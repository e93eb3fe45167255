use crate::error::TransportError;
use crate::models::{RegisterSpec, RegisterValue};

/// Request/response access to addressed sensor registers
///
/// Implementations apply their own bounded per-request timeout and never
/// retry: a failed read is reported once and the caller decides what to do
/// next. Range checking of the returned words is left to metric derivation.
pub trait BusClient: Send {
    /// Read `spec.count` holding registers from the sensor at `address`
    fn read(&mut self, address: u8, spec: RegisterSpec) -> Result<RegisterValue, TransportError>;
}

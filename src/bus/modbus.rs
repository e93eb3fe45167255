//! Modbus RTU client over a serial port
use log::{debug, info, warn};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

use crate::bus::client::BusClient;
use crate::bus::frame::{self, HEADER_LEN};
use crate::error::TransportError;
use crate::models::{RegisterSpec, RegisterValue};

/// Serial line settings for the sensor bus
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub timeout: Duration,
}

/// Port whose read timeout can be changed between reads
pub trait TimedPort: Read + Write {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl TimedPort for dyn serialport::SerialPort {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }
}

/// Bus client holding one serial connection
///
/// The port is opened on first use. After any transport error the handle
/// is dropped, and the next `read` reopens it.
pub struct ModbusRtuClient {
    settings: SerialSettings,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl ModbusRtuClient {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    fn connect(&mut self, address: u8) -> Result<&mut Box<dyn serialport::SerialPort>, TransportError> {
        if self.port.is_none() {
            let port = serialport::new(&self.settings.port, self.settings.baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(self.settings.parity)
                .stop_bits(self.settings.stop_bits)
                .flow_control(serialport::FlowControl::None)
                .timeout(self.settings.timeout)
                .open()
                .map_err(|e| TransportError::Connect {
                    address,
                    reason: e.to_string(),
                })?;
            info!(
                "Opened sensor bus {} at {} baud",
                self.settings.port, self.settings.baud_rate
            );
            self.port = Some(port);
        }

        self.port.as_mut().ok_or_else(|| TransportError::Connect {
            address,
            reason: "port handle missing".into(),
        })
    }
}

impl BusClient for ModbusRtuClient {
    fn read(&mut self, address: u8, spec: RegisterSpec) -> Result<RegisterValue, TransportError> {
        let timeout = self.settings.timeout;
        let port = self.connect(address)?;

        // Discard bytes left over from an earlier timed-out exchange
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            debug!("Failed to clear input buffer: {}", e);
        }

        match transact(port.as_mut(), address, spec, timeout) {
            Ok(words) => Ok(RegisterValue {
                address,
                start: spec.start,
                words,
                read_at: OffsetDateTime::now_utc(),
            }),
            Err(e) => {
                warn!("Dropping bus connection after error: {}", e);
                self.port = None;
                Err(e)
            }
        }
    }
}

/// Send one read request and collect the matching response frame
///
/// # Arguments
/// * `port` - Open bus connection
/// * `address` - Slave address of the sensor
/// * `spec` - Registers to read
/// * `timeout` - Budget for the whole exchange, not for each byte
///
/// # Returns
/// The register words, or the TransportError for `address`
pub fn transact<P>(
    port: &mut P,
    address: u8,
    spec: RegisterSpec,
    timeout: Duration,
) -> Result<Vec<u16>, TransportError>
where
    P: TimedPort + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let request = frame::encode_read_request(address, spec);
    port.write_all(&request)
        .and_then(|_| port.flush())
        .map_err(|e| io_error(address, e))?;

    let mut header = [0u8; HEADER_LEN];
    read_before(port, &mut header, deadline).map_err(|e| io_error(address, e))?;

    let mut response = header.to_vec();
    response.resize(HEADER_LEN + frame::remaining_len(&header), 0);
    read_before(port, &mut response[HEADER_LEN..], deadline)
        .map_err(|e| io_error(address, e))?;

    frame::decode_read_response(address, spec, &response)
}

/// Fill `buf`, giving up once `deadline` has passed
///
/// Each read waits at most for the time left, so a sensor trickling bytes
/// cannot stretch the exchange past the deadline.
fn read_before<P>(port: &mut P, buf: &mut [u8], deadline: Instant) -> io::Result<()>
where
    P: TimedPort + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "response deadline passed"));
        }
        port.set_read_timeout(remaining)?;
        match port.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn io_error(address: u8, e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof => {
            TransportError::Timeout { address }
        }
        _ => TransportError::Io { address, source: e },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::frame::encode_read_response;
    use std::io::Cursor;

    /// In-memory port: records writes, replays a canned response
    ///
    /// With `per_byte` set it hands out one byte per read after that delay,
    /// like a slow sensor.
    struct FakePort {
        written: Vec<u8>,
        reply: Cursor<Vec<u8>>,
        per_byte: Option<Duration>,
        timeouts: Vec<Duration>,
    }

    impl FakePort {
        fn replying(reply: Vec<u8>) -> Self {
            Self {
                written: Vec::new(),
                reply: Cursor::new(reply),
                per_byte: None,
                timeouts: Vec::new(),
            }
        }

        fn trickling(reply: Vec<u8>, per_byte: Duration) -> Self {
            Self {
                per_byte: Some(per_byte),
                ..Self::replying(reply)
            }
        }
    }

    impl TimedPort for FakePort {
        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeouts.push(timeout);
            Ok(())
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(delay) = self.per_byte {
                std::thread::sleep(delay);
                let end = buf.len().min(1);
                return match self.reply.read(&mut buf[..end])? {
                    0 if end > 0 => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
                    n => Ok(n),
                };
            }
            let n = self.reply.read(buf)?;
            if n == 0 && !buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const SPEC: RegisterSpec = RegisterSpec { start: 0, count: 1 };
    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn transact_round_trip() {
        let mut port = FakePort::replying(encode_read_response(2, &[735]));
        let words = transact(&mut port, 2, SPEC, TIMEOUT).unwrap();
        assert_eq!(words, vec![735]);
        assert_eq!(port.written, frame::encode_read_request(2, SPEC).to_vec());
    }

    #[test]
    fn silent_sensor_times_out() {
        let mut port = FakePort::replying(Vec::new());
        assert!(matches!(
            transact(&mut port, 3, SPEC, TIMEOUT),
            Err(TransportError::Timeout { address: 3 })
        ));
    }

    #[test]
    fn truncated_reply_times_out() {
        let mut reply = encode_read_response(3, &[1]);
        reply.truncate(4);
        let mut port = FakePort::replying(reply);
        assert!(matches!(
            transact(&mut port, 3, SPEC, TIMEOUT),
            Err(TransportError::Timeout { address: 3 })
        ));
    }

    #[test]
    fn slow_but_timely_reply_is_accepted() {
        let mut port = FakePort::trickling(encode_read_response(4, &[42]), Duration::from_millis(2));
        let words = transact(&mut port, 4, SPEC, Duration::from_secs(2)).unwrap();
        assert_eq!(words, vec![42]);
        // Every read only got the time left in the exchange
        assert!(port.timeouts.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn trickling_reply_is_bounded_by_one_timeout() {
        // 7 bytes at 40ms each would take 280ms
        let mut port = FakePort::trickling(encode_read_response(5, &[1]), Duration::from_millis(40));
        let started = Instant::now();
        let result = transact(&mut port, 5, SPEC, Duration::from_millis(100));

        assert!(matches!(result, Err(TransportError::Timeout { address: 5 })));
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(port.timeouts.iter().all(|t| *t <= Duration::from_millis(100)));
    }

    #[test]
    fn unopenable_port_is_connect_error() {
        let mut client = ModbusRtuClient::new(SerialSettings {
            port: "/dev/does-not-exist-weather".into(),
            baud_rate: 9600,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            timeout: Duration::from_millis(50),
        });
        assert!(matches!(
            client.read(6, SPEC),
            Err(TransportError::Connect { address: 6, .. })
        ));
    }
}

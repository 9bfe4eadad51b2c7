//! Solarman V5 client for Deye/Sunsynk hybrid inverters behind a Wi-Fi data
//! logger stick. Each Modbus RTU read-holding-registers request is wrapped in
//! the logger's V5 envelope and sent over plain TCP, one register per
//! request, pacing and retrying the way the stick tolerates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use solarlink_domain::decode::POLL_REGISTERS;
use solarlink_domain::ports::device::{DeviceClient, DeviceError};
use solarlink_domain::ports::BoxFuture;
use solarlink_domain::reading::RawSnapshot;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::AppConfig;

const V5_START: u8 = 0xA5;
const V5_END: u8 = 0x15;
const V5_CONTROL_REQUEST: u16 = 0x4510;
const V5_CONTROL_RESPONSE: u16 = 0x1510;
// Envelope header: start(1) length(2) control(2) sequence(2) serial(4).
const V5_HEADER_LEN: usize = 11;
// Request payload prefix: frame type(1) sensor type(2) three u32 timers(12).
const V5_REQUEST_PREFIX_LEN: usize = 15;
// Response payload prefix: frame type(1) status(1) three u32 timers(12).
const V5_RESPONSE_PREFIX_LEN: usize = 14;

const MODBUS_READ_HOLDING: u8 = 0x03;

pub struct SolarmanClient {
    host: String,
    port: u16,
    serial: u32,
    slave_id: u8,
    socket_timeout: Duration,
    retry_limit: u32,
    retry_delay: Duration,
    read_spacing: Duration,
    sequence: AtomicU16,
}

impl SolarmanClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            host: config.inverter_host.clone(),
            port: config.inverter_port,
            serial: config.inverter_serial,
            slave_id: config.modbus_slave_id,
            socket_timeout: config.socket_timeout(),
            retry_limit: config.register_retry_limit.max(1),
            retry_delay: Duration::from_millis(config.register_retry_delay_ms),
            read_spacing: Duration::from_millis(config.register_read_spacing_ms),
            sequence: AtomicU16::new(1),
        }
    }

    fn frame_request(&self, sequence: u16, modbus: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(V5_REQUEST_PREFIX_LEN + modbus.len());
        payload.push(0x02); // frame type: solar inverter
        payload.extend_from_slice(&[0x00, 0x00]); // sensor type
        payload.extend_from_slice(&[0u8; 4]); // total working time
        payload.extend_from_slice(&[0u8; 4]); // power-on time
        payload.extend_from_slice(&[0u8; 4]); // offset time
        payload.extend_from_slice(modbus);

        let mut frame = Vec::with_capacity(V5_HEADER_LEN + payload.len() + 2);
        frame.push(V5_START);
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&V5_CONTROL_REQUEST.to_le_bytes());
        frame.extend_from_slice(&sequence.to_le_bytes());
        frame.extend_from_slice(&self.serial.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.push(v5_checksum(&frame));
        frame.push(V5_END);
        frame
    }

    async fn read_v5_frame(stream: &mut TcpStream) -> Result<Vec<u8>, DeviceError> {
        let mut header = [0u8; V5_HEADER_LEN];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|err| DeviceError::Unreachable(err.to_string()))?;
        if header[0] != V5_START {
            return Err(DeviceError::Protocol(format!(
                "bad frame start byte 0x{:02X}",
                header[0]
            )));
        }
        let payload_len = usize::from(u16::from_le_bytes([header[1], header[2]]));
        let mut rest = vec![0u8; payload_len + 2];
        stream
            .read_exact(&mut rest)
            .await
            .map_err(|err| DeviceError::Unreachable(err.to_string()))?;

        let mut frame = Vec::with_capacity(V5_HEADER_LEN + rest.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&rest);
        Ok(frame)
    }

    fn extract_modbus(frame: &[u8]) -> Result<&[u8], DeviceError> {
        let min_len = V5_HEADER_LEN + V5_RESPONSE_PREFIX_LEN + 2;
        if frame.len() < min_len {
            return Err(DeviceError::Protocol(format!(
                "response frame too short: {} bytes",
                frame.len()
            )));
        }
        if frame[frame.len() - 1] != V5_END {
            return Err(DeviceError::Protocol("missing frame end byte".into()));
        }
        let expected = v5_checksum(&frame[..frame.len() - 2]);
        let actual = frame[frame.len() - 2];
        if expected != actual {
            return Err(DeviceError::Protocol(format!(
                "frame checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}"
            )));
        }
        let control = u16::from_le_bytes([frame[3], frame[4]]);
        if control != V5_CONTROL_RESPONSE {
            return Err(DeviceError::Protocol(format!(
                "unexpected control code 0x{control:04X}"
            )));
        }
        Ok(&frame[V5_HEADER_LEN + V5_RESPONSE_PREFIX_LEN..frame.len() - 2])
    }

    fn parse_modbus_words(&self, modbus: &[u8], count: usize) -> Result<Vec<u16>, DeviceError> {
        if modbus.len() < 5 {
            return Err(DeviceError::Protocol("modbus response truncated".into()));
        }
        let (body, crc_bytes) = modbus.split_at(modbus.len() - 2);
        let expected = crc16_modbus(body);
        let actual = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        if expected != actual {
            return Err(DeviceError::Protocol(format!(
                "modbus CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}"
            )));
        }
        if body[0] != self.slave_id {
            return Err(DeviceError::Protocol(format!(
                "response from unexpected slave {}",
                body[0]
            )));
        }
        if body[1] == MODBUS_READ_HOLDING | 0x80 {
            return Err(DeviceError::Protocol(format!(
                "modbus exception code {}",
                body.get(2).copied().unwrap_or(0)
            )));
        }
        if body[1] != MODBUS_READ_HOLDING {
            return Err(DeviceError::Protocol(format!(
                "unexpected modbus function 0x{:02X}",
                body[1]
            )));
        }
        let byte_count = usize::from(body[2]);
        if byte_count != count * 2 || body.len() < 3 + byte_count {
            return Err(DeviceError::Protocol(format!(
                "unexpected register payload length {byte_count}"
            )));
        }
        Ok(body[3..3 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    async fn read_register_once(
        &self,
        stream: &mut TcpStream,
        register: u16,
    ) -> Result<u16, DeviceError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let request = self.frame_request(
            sequence,
            &modbus_read_request(self.slave_id, register, 1),
        );

        timeout(self.socket_timeout, stream.write_all(&request))
            .await
            .map_err(|_| DeviceError::Unreachable("write timed out".into()))?
            .map_err(|err| DeviceError::Unreachable(err.to_string()))?;

        let frame = timeout(self.socket_timeout, Self::read_v5_frame(stream))
            .await
            .map_err(|_| DeviceError::Unreachable("read timed out".into()))??;

        let words = self.parse_modbus_words(Self::extract_modbus(&frame)?, 1)?;
        words
            .first()
            .copied()
            .ok_or_else(|| DeviceError::Protocol("empty register read".into()))
    }

    async fn read_register(
        &self,
        stream: &mut TcpStream,
        register: u16,
    ) -> Result<u16, DeviceError> {
        let mut last_err = DeviceError::Unreachable("no attempts made".into());
        for attempt in 1..=self.retry_limit {
            match self.read_register_once(stream, register).await {
                Ok(word) => return Ok(word),
                Err(err) => {
                    warn!(register, attempt, error = %err, "register read failed");
                    last_err = err;
                    if attempt < self.retry_limit {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}

impl DeviceClient for SolarmanClient {
    fn fetch_snapshot(&self) -> BoxFuture<'_, Result<RawSnapshot, DeviceError>> {
        Box::pin(async move {
            let addr = format!("{}:{}", self.host, self.port);
            let mut stream = timeout(self.socket_timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| DeviceError::Unreachable(format!("connect to {addr} timed out")))?
                .map_err(|err| DeviceError::Unreachable(err.to_string()))?;

            let mut registers = HashMap::with_capacity(POLL_REGISTERS.len());
            for (index, &register) in POLL_REGISTERS.iter().enumerate() {
                if index > 0 {
                    // The logger stick drops back-to-back requests.
                    tokio::time::sleep(self.read_spacing).await;
                }
                let word = self.read_register(&mut stream, register).await?;
                registers.insert(register, word);
            }
            debug!(registers = registers.len(), "register sweep complete");
            Ok(RawSnapshot::new(registers))
        })
    }
}

fn modbus_read_request(slave: u8, register: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![
        slave,
        MODBUS_READ_HOLDING,
        (register >> 8) as u8,
        register as u8,
        (count >> 8) as u8,
        count as u8,
    ];
    let crc = crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// CRC-16/MODBUS, bit-reflected with polynomial 0xA001.
fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Sum of every byte between the start byte and the checksum, truncated.
fn v5_checksum(frame: &[u8]) -> u8 {
    frame[1..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[cfg(test)]
mod tests {
    use solarlink_domain::decode::REG_BATTERY_SOC;
    use tokio::net::TcpListener;

    use super::*;

    fn client(host: &str, port: u16) -> SolarmanClient {
        SolarmanClient {
            host: host.to_string(),
            port,
            serial: 2_712_345_678,
            slave_id: 1,
            socket_timeout: Duration::from_secs(1),
            retry_limit: 3,
            retry_delay: Duration::ZERO,
            read_spacing: Duration::ZERO,
            sequence: AtomicU16::new(1),
        }
    }

    fn v5_response(serial: u32, sequence: u16, modbus: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x02, 0x01];
        payload.extend_from_slice(&[0u8; 12]);
        payload.extend_from_slice(modbus);

        let mut frame = vec![V5_START];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&V5_CONTROL_RESPONSE.to_le_bytes());
        frame.extend_from_slice(&sequence.to_le_bytes());
        frame.extend_from_slice(&serial.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.push(v5_checksum(&frame));
        frame.push(V5_END);
        frame
    }

    fn modbus_single_word_response(slave: u8, word: u16) -> Vec<u8> {
        let mut body = vec![slave, MODBUS_READ_HOLDING, 2];
        body.extend_from_slice(&word.to_be_bytes());
        let crc = crc16_modbus(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        body
    }

    #[test]
    fn crc16_matches_the_reference_vector() {
        // CRC-16/MODBUS of "123456789" is the standard check value.
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
    }

    #[test]
    fn modbus_request_encodes_register_and_crc() {
        let frame = modbus_read_request(1, REG_BATTERY_SOC, 1);
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0xB8, 0x00, 0x01]);
        let crc = crc16_modbus(&frame[..6]);
        assert_eq!(&frame[6..], &crc.to_le_bytes());
    }

    #[test]
    fn request_frame_has_a_valid_envelope() {
        let client = client("localhost", 8899);
        let modbus = modbus_read_request(1, REG_BATTERY_SOC, 1);
        let frame = client.frame_request(7, &modbus);

        assert_eq!(frame[0], V5_START);
        assert_eq!(*frame.last().unwrap(), V5_END);
        let payload_len = usize::from(u16::from_le_bytes([frame[1], frame[2]]));
        assert_eq!(payload_len, V5_REQUEST_PREFIX_LEN + modbus.len());
        assert_eq!(frame.len(), V5_HEADER_LEN + payload_len + 2);
        assert_eq!(u16::from_le_bytes([frame[3], frame[4]]), V5_CONTROL_REQUEST);
        assert_eq!(u16::from_le_bytes([frame[5], frame[6]]), 7);
        assert_eq!(
            frame[frame.len() - 2],
            v5_checksum(&frame[..frame.len() - 2])
        );
        assert_eq!(&frame[V5_HEADER_LEN + V5_REQUEST_PREFIX_LEN..frame.len() - 2], &modbus[..]);
    }

    #[test]
    fn parses_a_single_word_response() {
        let client = client("localhost", 8899);
        let frame = v5_response(client.serial, 1, &modbus_single_word_response(1, 87));
        let modbus = SolarmanClient::extract_modbus(&frame).unwrap();
        assert_eq!(client.parse_modbus_words(modbus, 1).unwrap(), vec![87]);
    }

    #[test]
    fn rejects_a_corrupted_checksum() {
        let client = client("localhost", 8899);
        let mut frame = v5_response(client.serial, 1, &modbus_single_word_response(1, 87));
        let checksum_index = frame.len() - 2;
        frame[checksum_index] ^= 0xFF;
        assert!(matches!(
            SolarmanClient::extract_modbus(&frame),
            Err(DeviceError::Protocol(_))
        ));

        let mut garbled = modbus_single_word_response(1, 87);
        garbled[3] ^= 0xFF; // flips data without fixing the CRC
        let frame = v5_response(client.serial, 1, &garbled);
        let modbus = SolarmanClient::extract_modbus(&frame).unwrap();
        assert!(matches!(
            client.parse_modbus_words(modbus, 1),
            Err(DeviceError::Protocol(_))
        ));
    }

    #[test]
    fn surfaces_modbus_exceptions() {
        let client = client("localhost", 8899);
        let mut body = vec![1u8, MODBUS_READ_HOLDING | 0x80, 0x02];
        let crc = crc16_modbus(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        let err = client.parse_modbus_words(&body, 1).unwrap_err();
        assert!(err.to_string().contains("exception"));
    }

    #[tokio::test]
    async fn sweeps_every_register_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Echo server: answers each read with the register address as the
        // value, so the sweep's mapping is verifiable end to end.
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            loop {
                let mut header = [0u8; V5_HEADER_LEN];
                if socket.read_exact(&mut header).await.is_err() {
                    return;
                }
                let payload_len = usize::from(u16::from_le_bytes([header[1], header[2]]));
                let mut rest = vec![0u8; payload_len + 2];
                socket.read_exact(&mut rest).await.unwrap();

                let serial = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
                let sequence = u16::from_le_bytes([header[5], header[6]]);
                let modbus = &rest[V5_REQUEST_PREFIX_LEN..payload_len];
                let register = u16::from_be_bytes([modbus[2], modbus[3]]);

                let response =
                    v5_response(serial, sequence, &modbus_single_word_response(1, register));
                socket.write_all(&response).await.unwrap();
            }
        });

        let client = client("127.0.0.1", port);
        let snapshot = client.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.registers.len(), POLL_REGISTERS.len());
        assert_eq!(snapshot.word(REG_BATTERY_SOC), Some(REG_BATTERY_SOC));
    }
}

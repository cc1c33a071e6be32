//! ZKTeco TCP protocol client
//!
//! Frame layout: `50 50 82 7d | u32 length | u16 command | u16 checksum |
//! u16 session | u16 reply | data`, all little-endian. Only the commands
//! needed to read users and attendance are implemented.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use punchlink_common::model::{DeviceAttendance, DeviceUser};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{DeviceAddress, DeviceConnector, DeviceError, DeviceSession};

const CMD_GET_FREE_SIZES: u16 = 50;
const CMD_USERTEMP_RRQ: u16 = 9;
const CMD_ATTLOG_RRQ: u16 = 13;
const CMD_CONNECT: u16 = 1000;
const CMD_EXIT: u16 = 1001;
const CMD_AUTH: u16 = 1102;
const CMD_PREPARE_DATA: u16 = 1500;
const CMD_DATA: u16 = 1501;
const CMD_FREE_DATA: u16 = 1502;
const CMD_ACK_OK: u16 = 2000;
const CMD_ACK_UNAUTH: u16 = 2005;

const FCT_USER: u8 = 5;
const USHRT_MAX: i64 = 65535;
const TCP_MAGIC: [u8; 4] = [0x50, 0x50, 0x82, 0x7d];
const AUTH_TICKS: u8 = 50;
/// Upper bound on a single frame or data transfer
const MAX_TRANSFER: usize = 64 * 1024 * 1024;

const USER_RECORD_SMALL: usize = 28;
const USER_RECORD_LARGE: usize = 72;

/// Decoded protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    command: u16,
    session_id: u16,
    reply_id: u16,
    data: Vec<u8>,
}

/// Opens [`ZkSession`]s
#[derive(Debug, Clone)]
pub struct ZkConnector {
    io_timeout: Duration,
    comm_key: u32,
}

impl ZkConnector {
    pub fn new(io_timeout: Duration, comm_key: u32) -> Self {
        Self { io_timeout, comm_key }
    }
}

#[async_trait]
impl DeviceConnector for ZkConnector {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let session = ZkSession::open(address, self.io_timeout, self.comm_key).await?;
        Ok(Box::new(session))
    }
}

/// An open device connection
pub struct ZkSession {
    stream: TcpStream,
    session_id: u16,
    reply_id: u16,
    io_timeout: Duration,
    address: DeviceAddress,
    users: Option<Vec<DeviceUser>>,
}

impl ZkSession {
    pub async fn open(address: &DeviceAddress, io_timeout: Duration, comm_key: u32) -> Result<Self, DeviceError> {
        let stream = timeout(io_timeout, TcpStream::connect((address.host.as_str(), address.port)))
            .await
            .map_err(|_| DeviceError::Timeout(io_timeout))?
            .map_err(|e| DeviceError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let mut session = Self {
            stream,
            session_id: 0,
            reply_id: (USHRT_MAX - 1) as u16,
            io_timeout,
            address: address.clone(),
            users: None,
        };

        let reply = session.command(CMD_CONNECT, &[]).await?;
        session.session_id = reply.session_id;
        match reply.command {
            CMD_ACK_OK => {}
            CMD_ACK_UNAUTH => {
                let key = make_commkey(comm_key, session.session_id, AUTH_TICKS);
                let auth = session.command(CMD_AUTH, &key).await?;
                if auth.command != CMD_ACK_OK {
                    return Err(DeviceError::Unauthorized);
                }
            }
            other => {
                return Err(DeviceError::Protocol(format!("unexpected connect reply {}", other)));
            }
        }

        info!(device = %address, session_id = session.session_id, "Connected to device");
        Ok(session)
    }

    fn next_reply_id(&mut self) -> u16 {
        self.reply_id = ((i64::from(self.reply_id) + 1) % USHRT_MAX) as u16;
        self.reply_id
    }

    async fn command(&mut self, command: u16, data: &[u8]) -> Result<Packet, DeviceError> {
        let reply_id = self.next_reply_id();
        let frame = encode_frame(command, self.session_id, reply_id, data);
        timeout(self.io_timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| DeviceError::Timeout(self.io_timeout))??;
        self.read_packet().await
    }

    async fn read_packet(&mut self) -> Result<Packet, DeviceError> {
        let mut header = [0u8; 8];
        timeout(self.io_timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| DeviceError::Timeout(self.io_timeout))??;
        let length = frame_length(&header)?;

        let mut payload = vec![0u8; length];
        timeout(self.io_timeout, self.stream.read_exact(&mut payload))
            .await
            .map_err(|_| DeviceError::Timeout(self.io_timeout))??;
        decode_packet(&payload)
    }

    /// Number of users and attendance records stored on the device
    async fn read_sizes(&mut self) -> Result<FreeSizes, DeviceError> {
        let reply = self.command(CMD_GET_FREE_SIZES, &[]).await?;
        if reply.command != CMD_ACK_OK {
            return Err(DeviceError::Protocol(format!("free sizes reply {}", reply.command)));
        }
        Ok(FreeSizes::parse(&reply.data))
    }

    /// Read a bulk table, following the prepare/data handshake when the
    /// device uses it
    async fn read_table(&mut self, command: u16, data: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let reply = self.command(command, data).await?;
        let table = match reply.command {
            CMD_DATA | CMD_ACK_OK => reply.data,
            CMD_PREPARE_DATA => {
                let size = read_u32(&reply.data, 0)
                    .ok_or_else(|| DeviceError::Protocol("short prepare-data reply".to_string()))?
                    as usize;
                if size > MAX_TRANSFER {
                    return Err(DeviceError::Protocol(format!("transfer too large: {} bytes", size)));
                }
                self.receive_chunks(size).await?
            }
            other => {
                return Err(DeviceError::Protocol(format!("command {} rejected with {}", command, other)));
            }
        };

        let free = self.command(CMD_FREE_DATA, &[]).await?;
        if free.command != CMD_ACK_OK {
            debug!(reply = free.command, "Free-data not acknowledged");
        }
        Ok(table)
    }

    async fn receive_chunks(&mut self, size: usize) -> Result<Vec<u8>, DeviceError> {
        let mut buffer = Vec::with_capacity(size);
        while buffer.len() < size {
            let packet = self.read_packet().await?;
            match packet.command {
                CMD_DATA => buffer.extend_from_slice(&packet.data),
                CMD_ACK_OK => return Ok(buffer),
                other => {
                    return Err(DeviceError::Protocol(format!("unexpected packet {} during transfer", other)));
                }
            }
        }

        // Transfer is closed by an acknowledgement
        let ack = self.read_packet().await?;
        if ack.command != CMD_ACK_OK {
            debug!(reply = ack.command, "Transfer not closed by acknowledgement");
        }
        Ok(buffer)
    }
}

#[async_trait]
impl DeviceSession for ZkSession {
    async fn list_users(&mut self) -> Result<Vec<DeviceUser>, DeviceError> {
        let sizes = self.read_sizes().await?;
        let table = self.read_table(CMD_USERTEMP_RRQ, &[FCT_USER]).await?;
        let users = parse_users(&table, sizes.users);
        debug!(device = %self.address, count = users.len(), "Read user table");
        self.users = Some(users.clone());
        Ok(users)
    }

    async fn list_attendance(&mut self) -> Result<Vec<DeviceAttendance>, DeviceError> {
        let users = match self.users.take() {
            Some(users) => users,
            None => self.list_users().await?,
        };
        let sizes = self.read_sizes().await?;
        let table = self.read_table(CMD_ATTLOG_RRQ, &[]).await?;
        let records = parse_attendance(&table, sizes.records, &users);
        debug!(device = %self.address, count = records.len(), "Read attendance log");
        self.users = Some(users);
        Ok(records)
    }

    async fn disconnect(mut self: Box<Self>) -> Result<(), DeviceError> {
        let result = self.command(CMD_EXIT, &[]).await.map(|_| ());
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Socket shutdown failed");
        }
        debug!(device = %self.address, "Disconnected from device");
        result
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FreeSizes {
    users: usize,
    records: usize,
}

impl FreeSizes {
    /// Reply is a block of little-endian i32 counters
    fn parse(data: &[u8]) -> Self {
        let field = |index: usize| {
            read_u32(data, index * 4)
                .map(|v| v as i32)
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .unwrap_or(0)
        };
        Self {
            users: field(4),
            records: field(8),
        }
    }
}

/// One's-complement style checksum over the packet header and data
fn checksum(buf: &[u8]) -> u16 {
    let mut sum: i64 = 0;
    let mut pairs = buf.chunks_exact(2);
    for pair in &mut pairs {
        sum += i64::from(u16::from_le_bytes([pair[0], pair[1]]));
        if sum > USHRT_MAX {
            sum -= USHRT_MAX;
        }
    }
    if let [last] = pairs.remainder() {
        sum += i64::from(*last);
    }
    while sum > USHRT_MAX {
        sum -= USHRT_MAX;
    }
    let mut sum = !sum;
    while sum < 0 {
        sum += USHRT_MAX;
    }
    sum as u16
}

fn encode_frame(command: u16, session_id: u16, reply_id: u16, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + data.len());
    body.extend_from_slice(&command.to_le_bytes());
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(&session_id.to_le_bytes());
    body.extend_from_slice(&reply_id.to_le_bytes());
    body.extend_from_slice(data);
    let sum = checksum(&body);
    body[2..4].copy_from_slice(&sum.to_le_bytes());

    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&TCP_MAGIC);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

fn frame_length(header: &[u8; 8]) -> Result<usize, DeviceError> {
    if header[..4] != TCP_MAGIC {
        return Err(DeviceError::Protocol("bad frame magic".to_string()));
    }
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if !(8..=MAX_TRANSFER).contains(&length) {
        return Err(DeviceError::Protocol(format!("bad frame length {}", length)));
    }
    Ok(length)
}

fn decode_packet(payload: &[u8]) -> Result<Packet, DeviceError> {
    if payload.len() < 8 {
        return Err(DeviceError::Protocol("short packet".to_string()));
    }
    let word = |i: usize| u16::from_le_bytes([payload[i], payload[i + 1]]);
    Ok(Packet {
        command: word(0),
        session_id: word(4),
        reply_id: word(6),
        data: payload[8..].to_vec(),
    })
}

/// Authentication token derived from the communication key
fn make_commkey(key: u32, session_id: u16, ticks: u8) -> [u8; 4] {
    let k = key.reverse_bits().wrapping_add(u32::from(session_id));
    let b = k.to_le_bytes();
    let x = [b[0] ^ b'Z', b[1] ^ b'K', b[2] ^ b'S', b[3] ^ b'O'];
    // swap the two 16-bit halves
    let s = [x[2], x[3], x[0], x[1]];
    [s[0] ^ ticks, s[1] ^ ticks, ticks, s[3] ^ ticks]
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// NUL-terminated, space-padded device string
fn read_str(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

/// Packed device time: seconds since 2000-01-01 on a 31-day-month calendar
fn decode_time(raw: u32) -> Option<NaiveDateTime> {
    let mut t = raw;
    let second = t % 60;
    t /= 60;
    let minute = t % 60;
    t /= 60;
    let hour = t % 24;
    t /= 24;
    let day = t % 31 + 1;
    t /= 31;
    let month = t % 12 + 1;
    t /= 12;
    let year = i32::try_from(t).ok()? + 2000;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Split a table reply into its size prefix and fixed-size records
fn table_records<'a>(table: &'a [u8], count: usize, candidates: &[usize]) -> Option<(usize, Vec<&'a [u8]>)> {
    let total = read_u32(table, 0)? as usize;
    let body = table.get(4..)?;
    let body = &body[..total.min(body.len())];
    if body.is_empty() {
        return None;
    }

    let record_size = if count > 0 && body.len() % count == 0 && candidates.contains(&(body.len() / count)) {
        body.len() / count
    } else {
        *candidates.iter().find(|size| body.len() % **size == 0)?
    };
    Some((record_size, body.chunks_exact(record_size).collect()))
}

fn parse_users(table: &[u8], count: usize) -> Vec<DeviceUser> {
    let Some((size, records)) = table_records(table, count, &[USER_RECORD_LARGE, USER_RECORD_SMALL]) else {
        return Vec::new();
    };

    records
        .into_iter()
        .filter_map(|r| match size {
            USER_RECORD_SMALL => Some(DeviceUser {
                uid: read_u16(r, 0)?,
                privilege: r[2],
                password: read_str(&r[3..8]),
                name: read_str(&r[8..16]),
                group_id: r[21].to_string(),
                user_id: read_u32(r, 24)?.to_string(),
            }),
            _ => Some(DeviceUser {
                uid: read_u16(r, 0)?,
                privilege: r[2],
                password: read_str(&r[3..11]),
                name: read_str(&r[11..35]),
                group_id: read_str(&r[40..47]),
                user_id: read_str(&r[48..72]),
            }),
        })
        .collect()
}

fn parse_attendance(table: &[u8], count: usize, users: &[DeviceUser]) -> Vec<DeviceAttendance> {
    let Some((size, records)) = table_records(table, count, &[40, 16, 8]) else {
        return Vec::new();
    };
    let by_uid: HashMap<u16, &str> = users.iter().map(|u| (u.uid, u.user_id.as_str())).collect();

    records
        .into_iter()
        .filter_map(|r| {
            let (user_id, raw_time, punch) = match size {
                8 => {
                    let uid = read_u16(r, 0)?;
                    let user_id = by_uid
                        .get(&uid)
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| uid.to_string());
                    (user_id, read_u32(r, 3)?, r[7])
                }
                16 => (read_u32(r, 0)?.to_string(), read_u32(r, 4)?, r[9]),
                _ => (read_str(&r[2..26]), read_u32(r, 27)?, r[31]),
            };
            match decode_time(raw_time) {
                Some(timestamp) => Some(DeviceAttendance {
                    user_id,
                    timestamp,
                    punch,
                }),
                None => {
                    warn!(user_id = %user_id, raw_time, "Skipping attendance record with invalid time");
                    None
                }
            }
        })
        .collect()
}

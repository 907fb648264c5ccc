//! A scripted TDS server on a TCP loopback socket.
//!
//! Speaks just enough of the protocol for end-to-end client tests without a
//! real SQL Server: prelogin (declining encryption), login acknowledgement,
//! and canned token responses matched by a substring of the incoming SQL.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const HEADER_LEN: usize = 8;

/// A canned reaction to one request.
#[derive(Clone)]
pub enum Script {
    /// Reply with these response tokens.
    Tokens(Bytes),
    /// Do not reply until the client sends an Attention, then acknowledge.
    HangUntilAttention,
}

struct Shared {
    /// Substring-matched batch responses, first match wins.
    responses: Vec<(String, Script)>,
    /// FIFO responses for RPC requests.
    rpc_responses: Mutex<Vec<Bytes>>,
    /// SQL batches received, in order.
    batches: Mutex<Vec<String>>,
    /// Next transaction descriptor to hand out.
    next_descriptor: AtomicU64,
    database: String,
}

/// The running mock server.
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

/// Builder for [`MockServer`].
pub struct MockServerBuilder {
    responses: Vec<(String, Script)>,
    rpc_responses: Vec<Bytes>,
    database: String,
}

impl MockServerBuilder {
    /// Respond to batches containing `needle` with `script`.
    pub fn on(mut self, needle: impl Into<String>, script: Script) -> Self {
        self.responses.push((needle.into(), script));
        self
    }

    /// Queue a response for the next RPC request.
    pub fn on_rpc(mut self, tokens: Bytes) -> Self {
        self.rpc_responses.push(tokens);
        self
    }

    /// Database name reported at login.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// Bind a listener and start serving.
    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // The validation-query fallback matches last so scripted responses
        // always win.
        let mut responses = self.responses;
        responses.push(("SELECT 1".into(), Script::Tokens(scalar_int("", 1))));
        let shared = Arc::new(Shared {
            responses,
            rpc_responses: Mutex::new(self.rpc_responses),
            batches: Mutex::new(Vec::new()),
            next_descriptor: AtomicU64::new(0x0100),
            database: self.database,
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    let _ = serve(stream, shared).await;
                });
            }
        });

        MockServer { addr, shared }
    }
}

impl MockServer {
    /// Start building a server. `SELECT 1` (the pool validation query) is
    /// answered out of the box.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder {
            responses: Vec::new(),
            rpc_responses: Vec::new(),
            database: "master".into(),
        }
    }

    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// SQL batches received so far.
    pub fn batches(&self) -> Vec<String> {
        self.shared.batches.lock().clone()
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Shared>) -> std::io::Result<()> {
    // Prelogin: decline encryption so the whole exchange stays in the clear.
    let (ty, _payload) = read_message(&mut stream).await?;
    assert_eq!(ty, 0x12, "expected prelogin first");
    let prelogin = tds_wire::Prelogin {
        encryption: tds_wire::Encryption::NotSupported,
        ..tds_wire::Prelogin::default()
    };
    write_message(&mut stream, 0x04, &prelogin.encode()).await?;

    // Login7 -> database env change + login ack + done.
    let (ty, _payload) = read_message(&mut stream).await?;
    assert_eq!(ty, 0x10, "expected login after prelogin");
    let mut tokens = BytesMut::new();
    put_envchange_database(&mut tokens, &shared.database, "master");
    put_loginack(&mut tokens);
    put_done(&mut tokens, 0xFD, 0x0000, 0);
    write_message(&mut stream, 0x04, &tokens).await?;

    let mut hanging = false;
    loop {
        let (ty, payload) = match read_message(&mut stream).await {
            Ok(message) => message,
            Err(_) => return Ok(()), // client went away
        };

        match ty {
            // SQL batch
            0x01 => {
                let sql = batch_sql(&payload);
                shared.batches.lock().push(sql.clone());

                if let Some(tokens) = builtin_response(&shared, &sql) {
                    write_message(&mut stream, 0x04, &tokens).await?;
                    continue;
                }

                match shared
                    .responses
                    .iter()
                    .find(|(needle, _)| sql.contains(needle.as_str()))
                    .map(|(_, script)| script.clone())
                {
                    Some(Script::Tokens(tokens)) => {
                        write_message(&mut stream, 0x04, &tokens).await?;
                    }
                    Some(Script::HangUntilAttention) => {
                        hanging = true;
                    }
                    None => {
                        let mut tokens = BytesMut::new();
                        put_done(&mut tokens, 0xFD, 0x0000, 0);
                        write_message(&mut stream, 0x04, &tokens).await?;
                    }
                }
            }
            // RPC
            0x03 => {
                let tokens = {
                    let mut queue = shared.rpc_responses.lock();
                    if queue.is_empty() {
                        done_only()
                    } else {
                        queue.remove(0)
                    }
                };
                write_message(&mut stream, 0x04, &tokens).await?;
            }
            // Attention
            0x06 => {
                assert!(hanging, "attention without a hung request");
                hanging = false;
                let mut tokens = BytesMut::new();
                put_done(&mut tokens, 0xFD, 0x0020, 0); // attention ack
                write_message(&mut stream, 0x04, &tokens).await?;
            }
            // Transaction manager
            0x0E => {
                let request_type =
                    u16::from_le_bytes([payload[22], payload[23]]);
                let mut tokens = BytesMut::new();
                match request_type {
                    5 => {
                        let descriptor =
                            shared.next_descriptor.fetch_add(1, Ordering::SeqCst);
                        put_envchange_txn(&mut tokens, 8, Some(descriptor));
                    }
                    7 => put_envchange_txn(&mut tokens, 9, None),
                    8 => put_envchange_txn(&mut tokens, 10, None),
                    _ => {}
                }
                put_done(&mut tokens, 0xFD, 0x0000, 0);
                write_message(&mut stream, 0x04, &tokens).await?;
            }
            other => panic!("unexpected message type 0x{other:02X}"),
        }
    }
}

/// Responses the server handles itself, ahead of the scripted table.
fn builtin_response(shared: &Shared, sql: &str) -> Option<BytesMut> {
    let use_target = sql.strip_prefix("USE [")?;
    let name = use_target.strip_suffix(']')?.replace("]]", "]");
    let mut tokens = BytesMut::new();
    put_envchange_database(&mut tokens, &name, &shared.database);
    put_done(&mut tokens, 0xFD, 0x0000, 0);
    Some(tokens)
}

/// Decode the SQL text of a batch payload (ALL_HEADERS + UTF-16LE).
fn batch_sql(payload: &[u8]) -> String {
    let header_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let text = &payload[header_len..];
    let units: Vec<u16> = text
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

// ---------------------------------------------------------------------------
// Raw packet I/O
// ---------------------------------------------------------------------------

async fn read_message(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut payload = Vec::new();
    loop {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let length = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; length - HEADER_LEN];
        stream.read_exact(&mut body).await?;
        payload.extend_from_slice(&body);
        if header[1] & 0x01 != 0 {
            return Ok((header[0], payload));
        }
    }
}

async fn write_message(stream: &mut TcpStream, ty: u8, payload: &[u8]) -> std::io::Result<()> {
    // 4 KiB chunks, ids ascending, end-of-message on the last.
    let max_payload = 4096 - HEADER_LEN;
    let mut chunks = payload.chunks(max_payload).peekable();
    let mut packet_id = 1u8;

    if payload.is_empty() {
        let header = packet_header(ty, 0x01, HEADER_LEN as u16, packet_id);
        stream.write_all(&header).await?;
        return Ok(());
    }

    while let Some(chunk) = chunks.next() {
        let status = if chunks.peek().is_none() { 0x01 } else { 0x00 };
        let header = packet_header(ty, status, (HEADER_LEN + chunk.len()) as u16, packet_id);
        stream.write_all(&header).await?;
        stream.write_all(chunk).await?;
        packet_id = packet_id.wrapping_add(1);
    }
    Ok(())
}

fn packet_header(ty: u8, status: u8, length: u16, packet_id: u8) -> [u8; HEADER_LEN] {
    let len = length.to_be_bytes();
    [ty, status, len[0], len[1], 0, 0, packet_id, 0]
}

// ---------------------------------------------------------------------------
// Token builders
// ---------------------------------------------------------------------------

pub fn put_done(buf: &mut BytesMut, tag: u8, status: u16, row_count: u64) {
    buf.put_u8(tag);
    buf.put_u16_le(status);
    buf.put_u16_le(0xC1);
    buf.put_u64_le(row_count);
}

fn put_b_varchar(buf: &mut BytesMut, s: &str) {
    buf.put_u8(s.encode_utf16().count() as u8);
    for unit in s.encode_utf16() {
        buf.put_u16_le(unit);
    }
}

fn put_loginack(buf: &mut BytesMut) {
    let program = "Microsoft SQL Server";
    let length = 1 + 4 + 1 + program.encode_utf16().count() * 2 + 4;
    buf.put_u8(0xAD);
    buf.put_u16_le(length as u16);
    buf.put_u8(1); // SQL_TSQL interface
    buf.put_u32_le(tds_wire::TDS_7_4);
    put_b_varchar(buf, program);
    buf.put_u32_le(0x10_00_00_00);
}

fn put_envchange_database(buf: &mut BytesMut, new: &str, old: &str) {
    let mut body = BytesMut::new();
    body.put_u8(1);
    put_b_varchar(&mut body, new);
    put_b_varchar(&mut body, old);
    buf.put_u8(0xE3);
    buf.put_u16_le(body.len() as u16);
    buf.put_slice(&body);
}

fn put_envchange_txn(buf: &mut BytesMut, kind: u8, descriptor: Option<u64>) {
    let mut body = BytesMut::new();
    body.put_u8(kind);
    match descriptor {
        Some(descriptor) => {
            body.put_u8(8);
            body.put_u64_le(descriptor);
            body.put_u8(0);
        }
        None => {
            body.put_u8(0);
            body.put_u8(8);
            body.put_u64_le(0);
        }
    }
    buf.put_u8(0xE3);
    buf.put_u16_le(body.len() as u16);
    buf.put_slice(&body);
}

pub fn put_intn_columns(buf: &mut BytesMut, names: &[&str]) {
    buf.put_u8(0x81);
    buf.put_u16_le(names.len() as u16);
    for name in names {
        buf.put_u32_le(0);
        buf.put_u16_le(0x0001);
        buf.put_u8(0x26); // INTN
        buf.put_u8(4);
        put_b_varchar(buf, name);
    }
}

fn put_nvarchar_column(buf: &mut BytesMut, name: &str, max_bytes: u16) {
    buf.put_u8(0x81);
    buf.put_u16_le(1);
    buf.put_u32_le(0);
    buf.put_u16_le(0x0001);
    buf.put_u8(0xE7);
    buf.put_u16_le(max_bytes);
    buf.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
    put_b_varchar(buf, name);
}

/// COLMETADATA + ROW + DONE for a single INT scalar.
pub fn scalar_int(name: &str, value: i32) -> Bytes {
    let mut buf = BytesMut::new();
    put_intn_columns(&mut buf, &[name]);
    buf.put_u8(0xD1);
    buf.put_u8(4);
    buf.put_i32_le(value);
    put_done(&mut buf, 0xFD, 0x0010, 1);
    buf.freeze()
}

/// COLMETADATA + ROW + DONE for a single NVARCHAR scalar.
pub fn scalar_string(name: &str, value: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_nvarchar_column(&mut buf, name, 8000);
    buf.put_u8(0xD1);
    let byte_len = value.encode_utf16().count() * 2;
    buf.put_u16_le(byte_len as u16);
    for unit in value.encode_utf16() {
        buf.put_u16_le(unit);
    }
    put_done(&mut buf, 0xFD, 0x0010, 1);
    buf.freeze()
}

/// A DONE carrying an affected-row count.
pub fn rows_affected(count: u64) -> Bytes {
    let mut buf = BytesMut::new();
    put_done(&mut buf, 0xFD, 0x0010, count);
    buf.freeze()
}

/// A final DONE with nothing else.
pub fn done_only() -> Bytes {
    let mut buf = BytesMut::new();
    put_done(&mut buf, 0xFD, 0x0000, 0);
    buf.freeze()
}

/// An ERROR token followed by DONE with the error bit.
pub fn server_error(number: i32, severity: u8, message: &str) -> Bytes {
    let mut body = BytesMut::new();
    body.put_i32_le(number);
    body.put_u8(1); // state
    body.put_u8(severity);
    body.put_u16_le(message.encode_utf16().count() as u16);
    for unit in message.encode_utf16() {
        body.put_u16_le(unit);
    }
    put_b_varchar(&mut body, "mock");
    put_b_varchar(&mut body, "");
    body.put_i32_le(1);

    let mut buf = BytesMut::new();
    buf.put_u8(0xAA);
    buf.put_u16_le(body.len() as u16);
    buf.put_slice(&body);
    put_done(&mut buf, 0xFD, 0x0002, 0);
    buf.freeze()
}

/// Four nullable INT columns with NULLs in columns 0 and 2 (NBCROW).
pub fn nbc_row_nulls() -> Bytes {
    let mut buf = BytesMut::new();
    put_intn_columns(&mut buf, &["a", "b", "c", "d"]);
    buf.put_u8(0xD2);
    buf.put_u8(0b0000_0101);
    buf.put_u8(4);
    buf.put_i32_le(1);
    buf.put_u8(4);
    buf.put_i32_le(2);
    put_done(&mut buf, 0xFD, 0x0010, 1);
    buf.freeze()
}

/// Two result sets: one row of one INT, then one row of two INTs.
pub fn two_result_sets() -> Bytes {
    let mut buf = BytesMut::new();
    put_intn_columns(&mut buf, &["first"]);
    buf.put_u8(0xD1);
    buf.put_u8(4);
    buf.put_i32_le(1);
    put_done(&mut buf, 0xFD, 0x0011, 1); // COUNT | MORE
    put_intn_columns(&mut buf, &["x", "y"]);
    buf.put_u8(0xD1);
    buf.put_u8(4);
    buf.put_i32_le(2);
    buf.put_u8(4);
    buf.put_i32_le(3);
    put_done(&mut buf, 0xFD, 0x0010, 1);
    buf.freeze()
}

/// A procedure response: return status + one INT OUT parameter + DONEPROC.
pub fn rpc_with_output(return_status: i32, name: &str, value: i32) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(0x79);
    buf.put_i32_le(return_status);

    buf.put_u8(0xAC);
    buf.put_u16_le(1);
    put_b_varchar(&mut buf, name);
    buf.put_u8(0x01); // output
    buf.put_u32_le(0);
    buf.put_u16_le(0);
    buf.put_u8(0x26);
    buf.put_u8(4);
    buf.put_u8(4);
    buf.put_i32_le(value);

    put_done(&mut buf, 0xFE, 0x0000, 0);
    buf.freeze()
}

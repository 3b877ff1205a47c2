//! Blocking RESP2 client implementing [`StoreClient`]
//!
//! One TCP connection per `RespStore`, guarded by a mutex so each batch
//! owns the connection for its whole round trip. The connection is opened
//! lazily and dropped after any connectivity failure; the next call
//! reconnects.
//!
//! Retry policy: with `retry_on_timeout`, a pipelined batch made only of
//! idempotent ops is retried once on a fresh connection after a timeout.
//! Increments, transactions and compare-and-set are never retried since
//! the first attempt may already have been applied.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::command::op_frame;
use super::resp::{RespParser, RespValue};
use super::{BatchMode, Reply, StoreClient, StoreOp};
use crate::config::{ConnectionConfig, Endpoint};
use crate::error::{ConfigError, StoreError, StoreResult};
use crate::stats::keys::Slot;

pub struct RespStore {
    endpoint: Endpoint,
    socket_timeout: Duration,
    connect_timeout: Duration,
    retry_on_timeout: bool,
    conn: Mutex<Option<Connection>>,
}

impl RespStore {
    /// Validate `config` without connecting.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(RespStore {
            endpoint: config.endpoint()?,
            socket_timeout: config.socket_timeout,
            connect_timeout: config.connect_timeout,
            retry_on_timeout: config.retry_on_timeout,
            conn: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Round trip a PING, connecting first if needed.
    pub fn ping(&self) -> StoreResult<()> {
        let ping = [RespValue::command(["PING"])];
        let reply = self.with_connection(|conn| conn.roundtrip(&ping))?;
        match reply.into_iter().next() {
            Some(RespValue::SimpleString(s)) if s == "PONG" => Ok(()),
            other => Err(StoreError::Protocol(format!(
                "unexpected PING reply {:?}",
                other
            ))),
        }
    }

    /// Run `f` on the live connection. Connectivity failures drop the
    /// connection so the next call starts fresh.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(Connection::open(
                &self.endpoint,
                self.connect_timeout,
                self.socket_timeout,
            )?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::Protocol("connection slot empty".to_string()));
        };
        let result = f(conn);
        if let Err(e) = &result {
            if e.is_connectivity() || matches!(e, StoreError::Protocol(_)) {
                debug!(error = %e, "dropping store connection");
                *guard = None;
            }
        }
        result
    }

    fn pipeline(&self, ops: &[StoreOp]) -> StoreResult<Vec<Reply>> {
        let frames: Vec<RespValue> = ops.iter().map(op_frame).collect();
        let replies = self.with_connection(|conn| conn.roundtrip(&frames))?;
        Ok(replies.into_iter().map(Reply::from).collect())
    }

    fn transaction(&self, ops: &[StoreOp]) -> StoreResult<Vec<Reply>> {
        let mut frames = Vec::with_capacity(ops.len() + 2);
        frames.push(RespValue::command(["MULTI"]));
        frames.extend(ops.iter().map(op_frame));
        frames.push(RespValue::command(["EXEC"]));

        let mut replies = self.with_connection(|conn| conn.roundtrip(&frames))?;
        let exec = replies
            .pop()
            .ok_or_else(|| StoreError::Protocol("missing EXEC reply".to_string()))?;
        exec_result(exec, ops.len())
    }
}

/// Replies of a committed transaction, or why it was refused.
fn exec_result(exec: RespValue, expected: usize) -> StoreResult<Vec<Reply>> {
    match exec {
        RespValue::Array(Some(items)) => {
            if items.len() != expected {
                return Err(StoreError::Protocol(format!(
                    "EXEC returned {} replies for {} commands",
                    items.len(),
                    expected
                )));
            }
            Ok(items.into_iter().map(Reply::from).collect())
        }
        RespValue::Array(None) | RespValue::BulkString(None) => Err(
            StoreError::TransactionAborted("watched key changed".to_string()),
        ),
        RespValue::Error(e) => Err(StoreError::TransactionAborted(e)),
        other => Err(StoreError::Protocol(format!(
            "unexpected EXEC reply {:?}",
            other
        ))),
    }
}

impl StoreClient for RespStore {
    fn execute_batch(&self, ops: &[StoreOp], mode: BatchMode) -> StoreResult<Vec<Reply>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        match mode {
            BatchMode::Transaction => self.transaction(ops),
            BatchMode::Pipeline => match self.pipeline(ops) {
                Err(e)
                    if e.is_timeout()
                        && self.retry_on_timeout
                        && ops.iter().all(StoreOp::is_idempotent) =>
                {
                    warn!(error = %e, ops = ops.len(), "store timed out, retrying once");
                    self.pipeline(ops)
                }
                result => result,
            },
        }
    }

    fn compare_and_set(
        &self,
        slot: &Slot,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let watch = RespValue::command(["WATCH", slot.watch_key()]);
            let read = op_frame(&StoreOp::read(slot));
            let mut replies = conn.roundtrip(&[watch, read])?.into_iter();
            let watched = replies.next().map(Reply::from);
            if !matches!(watched, Some(Reply::Ok)) {
                return Err(StoreError::Protocol(format!(
                    "unexpected WATCH reply {:?}",
                    watched
                )));
            }
            let current = replies
                .next()
                .map(Reply::from)
                .ok_or_else(|| StoreError::Protocol("missing read reply".to_string()))?;

            let matches = match current.into_result() {
                Ok(Reply::Nil) => expected.is_none(),
                Ok(Reply::Bulk(b)) => expected == Some(b.as_slice()),
                Ok(_) => false,
                Err(e) => {
                    conn.roundtrip(&[RespValue::command(["UNWATCH"])])?;
                    return Err(e);
                }
            };
            if !matches {
                conn.roundtrip(&[RespValue::command(["UNWATCH"])])?;
                return Ok(false);
            }

            let write = op_frame(&StoreOp::write(slot, new.to_vec()));
            let frames = [
                RespValue::command(["MULTI"]),
                write,
                RespValue::command(["EXEC"]),
            ];
            let mut replies = conn.roundtrip(&frames)?;
            let exec = replies
                .pop()
                .ok_or_else(|| StoreError::Protocol("missing EXEC reply".to_string()))?;
            match exec_result(exec, 1) {
                Ok(mut replies) => {
                    if let Some(reply) = replies.pop() {
                        reply.into_ok()?;
                    }
                    Ok(true)
                }
                Err(StoreError::TransactionAborted(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }
}

struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    timeout: Duration,
}

impl Connection {
    fn open(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let addr = endpoint.address();
        let addrs = addr
            .to_socket_addrs()
            .map_err(|e| StoreError::connection(format!("cannot resolve {}", addr), e))?;

        let mut last_error = None;
        let mut stream = None;
        for sock_addr in addrs {
            match TcpStream::connect_timeout(&sock_addr, connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = match (stream, last_error) {
            (Some(s), _) => s,
            (None, Some(e)) if is_timeout(&e) => return Err(StoreError::Timeout(connect_timeout)),
            (None, Some(e)) => {
                return Err(StoreError::connection(
                    format!("cannot connect to {}", addr),
                    e,
                ))
            }
            (None, None) => {
                return Err(StoreError::Connection {
                    message: format!("{} resolved to no address", addr),
                    source: None,
                })
            }
        };

        let io_err = |e| StoreError::connection("cannot configure socket", e);
        stream.set_read_timeout(Some(timeout)).map_err(io_err)?;
        stream.set_write_timeout(Some(timeout)).map_err(io_err)?;
        stream.set_nodelay(true).map_err(io_err)?;

        let mut conn = Connection {
            stream,
            buffer: BytesMut::with_capacity(4096),
            timeout,
        };
        conn.handshake(endpoint)?;
        info!(addr = %addr, db = endpoint.db, "connected to store");
        Ok(conn)
    }

    fn handshake(&mut self, endpoint: &Endpoint) -> StoreResult<()> {
        if let Some(password) = &endpoint.password {
            let auth = match &endpoint.username {
                Some(user) => RespValue::command(["AUTH", user.as_str(), password.as_str()]),
                None => RespValue::command(["AUTH", password.as_str()]),
            };
            match self.roundtrip(&[auth])?.pop() {
                Some(RespValue::SimpleString(_)) => {}
                Some(RespValue::Error(e)) => return Err(StoreError::Auth(e)),
                other => {
                    return Err(StoreError::Protocol(format!(
                        "unexpected AUTH reply {:?}",
                        other
                    )))
                }
            }
        }
        if endpoint.db != 0 {
            let db = endpoint.db.to_string();
            let select = RespValue::command(["SELECT", db.as_str()]);
            match self.roundtrip(&[select])?.pop() {
                Some(RespValue::SimpleString(_)) => {}
                Some(RespValue::Error(e)) if e.starts_with("NOAUTH") => {
                    return Err(StoreError::Auth(e))
                }
                other => {
                    return Err(StoreError::Protocol(format!(
                        "cannot select db {}: {:?}",
                        endpoint.db, other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Write every frame, then read one reply per frame.
    fn roundtrip(&mut self, frames: &[RespValue]) -> StoreResult<Vec<RespValue>> {
        let mut out = Vec::new();
        for frame in frames {
            RespParser::encode_into(frame, &mut out);
        }
        self.stream
            .write_all(&out)
            .map_err(|e| self.io_error("write failed", e))?;

        let mut replies = Vec::with_capacity(frames.len());
        while replies.len() < frames.len() {
            replies.push(self.read_reply()?);
        }
        debug_assert_eq!(
            replies.len(),
            frames.len(),
            "Postcondition: one reply per frame"
        );
        Ok(replies)
    }

    fn read_reply(&mut self) -> StoreResult<RespValue> {
        loop {
            match RespParser::parse(&self.buffer) {
                Ok(Some((value, consumed))) => {
                    self.buffer.advance(consumed);
                    if let RespValue::Error(e) = &value {
                        if e.starts_with("NOAUTH") || e.starts_with("WRONGPASS") {
                            return Err(StoreError::Auth(e.clone()));
                        }
                    }
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return Err(StoreError::Protocol(e)),
            }

            let mut chunk = [0u8; 4096];
            let n = self
                .stream
                .read(&mut chunk)
                .map_err(|e| self.io_error("read failed", e))?;
            if n == 0 {
                return Err(StoreError::Connection {
                    message: "connection closed by store".to_string(),
                    source: None,
                });
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn io_error(&self, message: &str, e: std::io::Error) -> StoreError {
        if is_timeout(&e) {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::connection(message, e)
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

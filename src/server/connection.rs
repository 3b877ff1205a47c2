use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::store::command::Command;
use crate::store::memory::Data;
use crate::store::resp::{RespCodec, RespValue};
use crate::store::{MemoryStore, StoreClient, StoreOp};

pub struct ConnectionHandler {
    framed: Framed<TcpStream, RespCodec>,
    store: Arc<MemoryStore>,
    client_addr: String,
    require_pass: Option<String>,
    authenticated: bool,
    /// Connection-level transaction state (MULTI/EXEC)
    in_transaction: bool,
    transaction_queue: Vec<StoreOp>,
    transaction_errors: bool,
    /// Watched keys with their values at WATCH time
    watched_keys: Vec<(String, Option<Data>)>,
    closing: bool,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        store: Arc<MemoryStore>,
        client_addr: String,
        require_pass: Option<String>,
    ) -> Self {
        ConnectionHandler {
            framed: Framed::new(stream, RespCodec),
            store,
            client_addr,
            authenticated: require_pass.is_none(),
            require_pass,
            in_transaction: false,
            transaction_queue: Vec::new(),
            transaction_errors: false,
            watched_keys: Vec::new(),
            closing: false,
        }
    }

    pub async fn run(mut self) {
        info!("Client connected: {}", self.client_addr);

        while let Some(frame) = self.framed.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Protocol error from {}: {}", self.client_addr, e);
                    let reply = RespValue::err(format!("ERR Protocol error: {}", e));
                    let _ = self.framed.send(reply).await;
                    break;
                }
            };

            let reply = self.handle(&frame);
            if let Err(e) = self.framed.send(reply).await {
                error!("Failed to write response to {}: {}", self.client_addr, e);
                break;
            }
            if self.closing {
                break;
            }
        }

        info!("Client disconnected: {}", self.client_addr);
    }

    fn handle(&mut self, frame: &RespValue) -> RespValue {
        let cmd = match Command::from_resp(frame) {
            Ok(cmd) => cmd,
            Err(message) => {
                debug!("Invalid command from {}: {}", self.client_addr, message);
                if self.in_transaction {
                    self.transaction_errors = true;
                }
                return RespValue::err(message);
            }
        };

        if !self.authenticated && !matches!(cmd, Command::Auth { .. } | Command::Quit) {
            if self.in_transaction {
                self.transaction_errors = true;
            }
            return RespValue::err("NOAUTH Authentication required.");
        }

        if self.in_transaction {
            return self.handle_queued(cmd);
        }

        match cmd {
            Command::Op(op) => match self.store.execute(op) {
                Ok(reply) => reply.into(),
                Err(e) => RespValue::err(format!("ERR {}", e)),
            },
            Command::Watch(keys) => {
                // Snapshot watched key values for optimistic locking
                for key in keys {
                    let snapshot = self.store.snapshot(&key);
                    self.watched_keys.push((key, snapshot));
                }
                RespValue::ok()
            }
            Command::Unwatch => {
                self.watched_keys.clear();
                RespValue::ok()
            }
            Command::Multi => {
                self.in_transaction = true;
                self.transaction_queue.clear();
                self.transaction_errors = false;
                RespValue::ok()
            }
            Command::Exec => RespValue::err("ERR EXEC without MULTI"),
            Command::Discard => RespValue::err("ERR DISCARD without MULTI"),
            Command::Ping(None) => RespValue::SimpleString("PONG".to_string()),
            Command::Ping(Some(message)) => RespValue::bulk(message),
            Command::Auth { username, password } => self.handle_auth(username.as_deref(), &password),
            Command::Select(0) => RespValue::ok(),
            Command::Select(_) => RespValue::err("ERR DB index is out of range"),
            Command::Client => RespValue::ok(),
            Command::Quit => {
                self.closing = true;
                RespValue::ok()
            }
        }
    }

    fn handle_queued(&mut self, cmd: Command) -> RespValue {
        match cmd {
            Command::Exec => {
                self.in_transaction = false;
                let watched = std::mem::take(&mut self.watched_keys);
                let queued = std::mem::take(&mut self.transaction_queue);
                if std::mem::take(&mut self.transaction_errors) {
                    return RespValue::err(
                        "EXECABORT Transaction discarded because of previous errors.",
                    );
                }
                match self.store.execute_watched(&watched, &queued) {
                    Some(replies) => {
                        RespValue::Array(Some(replies.into_iter().map(RespValue::from).collect()))
                    }
                    None => {
                        debug!("Transaction from {} aborted by WATCH", self.client_addr);
                        RespValue::Array(None)
                    }
                }
            }
            Command::Discard => {
                self.in_transaction = false;
                self.transaction_queue.clear();
                self.transaction_errors = false;
                self.watched_keys.clear();
                RespValue::ok()
            }
            Command::Multi => RespValue::err("ERR MULTI calls can not be nested"),
            Command::Watch(_) => RespValue::err("ERR WATCH inside MULTI is not allowed"),
            Command::Op(op) => {
                self.transaction_queue.push(op);
                RespValue::SimpleString("QUEUED".to_string())
            }
            Command::Quit => {
                self.closing = true;
                RespValue::ok()
            }
            _ => {
                self.transaction_errors = true;
                RespValue::err("ERR command not allowed inside MULTI")
            }
        }
    }

    fn handle_auth(&mut self, username: Option<&str>, password: &str) -> RespValue {
        let Some(expected) = &self.require_pass else {
            return RespValue::err(
                "ERR AUTH <password> called without any password configured for the default user. \
                 Are you sure your configuration is correct?",
            );
        };
        let user_ok = matches!(username, None | Some("default"));
        if user_ok && password == expected {
            self.authenticated = true;
            info!("Client {} authenticated", self.client_addr);
            RespValue::ok()
        } else {
            warn!("Failed AUTH from {}", self.client_addr);
            RespValue::err("WRONGPASS invalid username-password pair or user is disabled.")
        }
    }
}

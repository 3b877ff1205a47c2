//! Mapping between [`StoreOp`]s and RESP command frames.
//!
//! The client side turns ops into argument lists. The server side parses an
//! incoming frame into a [`Command`]: either a data op the store executes or
//! a connection-level command (transactions, auth, ping).

use super::resp::RespValue;
use super::StoreOp;

/// Arguments of the RESP command implementing `op`.
pub fn op_args(op: &StoreOp) -> Vec<Vec<u8>> {
    fn s(text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    match op {
        StoreOp::Get { key } => vec![s("GET"), s(key)],
        StoreOp::Set { key, value } => vec![s("SET"), s(key), value.clone()],
        StoreOp::SetIfAbsent { key, value } => vec![s("SETNX"), s(key), value.clone()],
        StoreOp::Increment { key, delta } => vec![s("INCRBY"), s(key), s(&delta.to_string())],
        StoreOp::IncrementFloat { key, delta } => {
            vec![s("INCRBYFLOAT"), s(key), s(&delta.to_string())]
        }
        StoreOp::HashGet { container, field } => vec![s("HGET"), s(container), s(field)],
        StoreOp::HashSet {
            container,
            field,
            value,
        } => vec![s("HSET"), s(container), s(field), value.clone()],
        StoreOp::HashSetIfAbsent {
            container,
            field,
            value,
        } => vec![s("HSETNX"), s(container), s(field), value.clone()],
        StoreOp::HashIncrement {
            container,
            field,
            delta,
        } => vec![s("HINCRBY"), s(container), s(field), s(&delta.to_string())],
        StoreOp::HashIncrementFloat {
            container,
            field,
            delta,
        } => vec![s("HINCRBYFLOAT"), s(container), s(field), s(&delta.to_string())],
        StoreOp::HashGetAll { container } => vec![s("HGETALL"), s(container)],
        StoreOp::Delete { keys } => {
            let mut args = Vec::with_capacity(keys.len() + 1);
            args.push(s("DEL"));
            args.extend(keys.iter().map(|k| s(k)));
            args
        }
        StoreOp::KeysMatching { pattern } => vec![s("KEYS"), s(pattern)],
    }
}

/// Command frame for `op`.
pub fn op_frame(op: &StoreOp) -> RespValue {
    RespValue::command(op_args(op))
}

/// A command received by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Op(StoreOp),
    Watch(Vec<String>),
    Unwatch,
    Multi,
    Exec,
    Discard,
    Ping(Option<Vec<u8>>),
    Auth {
        username: Option<String>,
        password: String,
    },
    Select(i64),
    /// CLIENT subcommands are acknowledged and ignored.
    Client,
    Quit,
}

impl Command {
    /// Parse a command frame. The error is the text of the RESP error reply.
    pub fn from_resp(value: &RespValue) -> Result<Command, String> {
        let elements = match value {
            RespValue::Array(Some(elements)) if !elements.is_empty() => elements,
            _ => return Err("ERR Protocol error: expected command array".to_string()),
        };
        let args = elements
            .iter()
            .map(|e| match e {
                RespValue::BulkString(Some(data)) => Ok(data.as_slice()),
                _ => Err("ERR Protocol error: expected bulk string".to_string()),
            })
            .collect::<Result<Vec<&[u8]>, String>>()?;

        let name = String::from_utf8_lossy(args[0]).to_uppercase();
        let wrong_arity = || {
            format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_lowercase()
            )
        };
        let arity = |ok: bool| if ok { Ok(()) } else { Err(wrong_arity()) };
        let n = args.len();

        let cmd = match name.as_str() {
            "GET" => {
                arity(n == 2)?;
                Command::Op(StoreOp::Get {
                    key: text(args[1]),
                })
            }
            "SET" => {
                arity(n >= 3)?;
                if n > 3 {
                    return Err("ERR syntax error".to_string());
                }
                Command::Op(StoreOp::Set {
                    key: text(args[1]),
                    value: args[2].to_vec(),
                })
            }
            "SETNX" => {
                arity(n == 3)?;
                Command::Op(StoreOp::SetIfAbsent {
                    key: text(args[1]),
                    value: args[2].to_vec(),
                })
            }
            "INCR" | "DECR" => {
                arity(n == 2)?;
                Command::Op(StoreOp::Increment {
                    key: text(args[1]),
                    delta: if name == "INCR" { 1 } else { -1 },
                })
            }
            "INCRBY" | "DECRBY" => {
                arity(n == 3)?;
                let delta = integer(args[2])?;
                Command::Op(StoreOp::Increment {
                    key: text(args[1]),
                    delta: if name == "INCRBY" {
                        delta
                    } else {
                        delta
                            .checked_neg()
                            .ok_or_else(|| "ERR decrement would overflow".to_string())?
                    },
                })
            }
            "INCRBYFLOAT" => {
                arity(n == 3)?;
                Command::Op(StoreOp::IncrementFloat {
                    key: text(args[1]),
                    delta: float(args[2])?,
                })
            }
            "HGET" => {
                arity(n == 3)?;
                Command::Op(StoreOp::HashGet {
                    container: text(args[1]),
                    field: text(args[2]),
                })
            }
            "HSET" => {
                arity(n == 4)?;
                Command::Op(StoreOp::HashSet {
                    container: text(args[1]),
                    field: text(args[2]),
                    value: args[3].to_vec(),
                })
            }
            "HSETNX" => {
                arity(n == 4)?;
                Command::Op(StoreOp::HashSetIfAbsent {
                    container: text(args[1]),
                    field: text(args[2]),
                    value: args[3].to_vec(),
                })
            }
            "HINCRBY" => {
                arity(n == 4)?;
                Command::Op(StoreOp::HashIncrement {
                    container: text(args[1]),
                    field: text(args[2]),
                    delta: integer(args[3])?,
                })
            }
            "HINCRBYFLOAT" => {
                arity(n == 4)?;
                Command::Op(StoreOp::HashIncrementFloat {
                    container: text(args[1]),
                    field: text(args[2]),
                    delta: float(args[3])?,
                })
            }
            "HGETALL" => {
                arity(n == 2)?;
                Command::Op(StoreOp::HashGetAll {
                    container: text(args[1]),
                })
            }
            "DEL" => {
                arity(n >= 2)?;
                Command::Op(StoreOp::Delete {
                    keys: args[1..].iter().map(|a| text(a)).collect(),
                })
            }
            "KEYS" => {
                arity(n == 2)?;
                Command::Op(StoreOp::KeysMatching {
                    pattern: text(args[1]),
                })
            }
            "WATCH" => {
                arity(n >= 2)?;
                Command::Watch(args[1..].iter().map(|a| text(a)).collect())
            }
            "UNWATCH" => Command::Unwatch,
            "MULTI" => Command::Multi,
            "EXEC" => Command::Exec,
            "DISCARD" => Command::Discard,
            "PING" => {
                arity(n <= 2)?;
                Command::Ping(args.get(1).map(|a| a.to_vec()))
            }
            "AUTH" => match n {
                2 => Command::Auth {
                    username: None,
                    password: text(args[1]),
                },
                3 => Command::Auth {
                    username: Some(text(args[1])),
                    password: text(args[2]),
                },
                _ => return Err(wrong_arity()),
            },
            "SELECT" => {
                arity(n == 2)?;
                Command::Select(integer(args[1])?)
            }
            "CLIENT" => Command::Client,
            "QUIT" => Command::Quit,
            _ => {
                return Err(format!(
                    "ERR unknown command '{}'",
                    String::from_utf8_lossy(args[0])
                ))
            }
        };
        Ok(cmd)
    }
}

fn text(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn integer(arg: &[u8]) -> Result<i64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| "ERR value is not an integer or out of range".to_string())
}

fn float(arg: &[u8]) -> Result<f64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .ok_or_else(|| "ERR value is not a valid float".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(args: &[&str]) -> RespValue {
        RespValue::command(args.iter().map(|a| a.as_bytes().to_vec()))
    }

    #[test]
    fn test_op_args() {
        let op = StoreOp::HashIncrement {
            container: "j:stats".into(),
            field: "pages".into(),
            delta: -3,
        };
        assert_eq!(
            op_args(&op),
            vec![
                b"HINCRBY".to_vec(),
                b"j:stats".to_vec(),
                b"pages".to_vec(),
                b"-3".to_vec()
            ]
        );
    }

    #[test]
    fn test_every_op_parses_back() {
        let ops = vec![
            StoreOp::Get { key: "k".into() },
            StoreOp::Set {
                key: "k".into(),
                value: b"v".to_vec(),
            },
            StoreOp::SetIfAbsent {
                key: "k".into(),
                value: b"v".to_vec(),
            },
            StoreOp::Increment {
                key: "k".into(),
                delta: 7,
            },
            StoreOp::IncrementFloat {
                key: "k".into(),
                delta: 0.25,
            },
            StoreOp::HashSetIfAbsent {
                container: "h".into(),
                field: "f".into(),
                value: b"1".to_vec(),
            },
            StoreOp::HashIncrementFloat {
                container: "h".into(),
                field: "f".into(),
                delta: -1.5,
            },
            StoreOp::Delete {
                keys: vec!["a".into(), "b".into()],
            },
            StoreOp::KeysMatching {
                pattern: "j:*".into(),
            },
        ];
        for op in ops {
            assert_eq!(Command::from_resp(&op_frame(&op)), Ok(Command::Op(op)));
        }
    }

    #[test]
    fn test_connection_commands() {
        assert_eq!(Command::from_resp(&frame(&["multi"])), Ok(Command::Multi));
        assert_eq!(
            Command::from_resp(&frame(&["WATCH", "a", "b"])),
            Ok(Command::Watch(vec!["a".into(), "b".into()]))
        );
        assert_eq!(
            Command::from_resp(&frame(&["AUTH", "user", "pw"])),
            Ok(Command::Auth {
                username: Some("user".into()),
                password: "pw".into()
            })
        );
        assert_eq!(
            Command::from_resp(&frame(&["CLIENT", "SETINFO", "LIB-NAME", "x"])),
            Ok(Command::Client)
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            Command::from_resp(&frame(&["GET"])),
            Err("ERR wrong number of arguments for 'get' command".to_string())
        );
        assert_eq!(
            Command::from_resp(&frame(&["INCRBY", "k", "x"])),
            Err("ERR value is not an integer or out of range".to_string())
        );
        assert!(Command::from_resp(&frame(&["ZADD", "k", "1", "m"]))
            .unwrap_err()
            .starts_with("ERR unknown command"));
        assert!(Command::from_resp(&RespValue::Integer(1)).is_err());
    }
}

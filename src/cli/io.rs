//! JSON I/O handling for the feeder command
//!
//! - Input: one JSON command per line on stdin
//! - Output: one JSON response per line on stdout
//!
//! Requests:
//!
//! ```json
//! {"op": "insert", "space": 0, "tuple": [1, 1]}
//! {"op": "update", "space": 0, "key": [4], "ops": [[1, "add", 1]]}
//! {"op": "delete", "space": 0, "key": [4]}
//! ```
//!
//! Numbers in `0..=u32::MAX` (or negative `i32`) become 4-byte
//! little-endian fields, wider numbers 8-byte fields, strings their UTF-8
//! bytes. A nested array is a multi-field operand, as used by `splice`.

use std::io::{self, BufRead, Write};

use serde::Deserialize;
use serde_json::Value;

use super::errors::{CliError, CliResult};
use crate::wal::{write_field, Command, Mutation, Tuple, UpdateOperator};

/// One field value as written in a request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(i64),
    Text(String),
    Fields(Vec<FieldValue>),
}

impl FieldValue {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Number(n) => {
                if let Ok(v) = u32::try_from(*n) {
                    v.to_le_bytes().to_vec()
                } else if let Ok(v) = i32::try_from(*n) {
                    v.to_le_bytes().to_vec()
                } else {
                    n.to_le_bytes().to_vec()
                }
            }
            FieldValue::Text(s) => s.as_bytes().to_vec(),
            FieldValue::Fields(fields) => {
                let mut buf = Vec::new();
                for field in fields {
                    write_field(&mut buf, &field.to_bytes());
                }
                buf
            }
        }
    }
}

/// A command read from stdin
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Insert {
        #[serde(default)]
        space: u32,
        tuple: Vec<FieldValue>,
    },
    Update {
        #[serde(default)]
        space: u32,
        key: Vec<FieldValue>,
        ops: Vec<(u32, String, FieldValue)>,
    },
    Delete {
        #[serde(default)]
        space: u32,
        key: Vec<FieldValue>,
    },
}

fn tuple(values: &[FieldValue]) -> Tuple {
    Tuple::new(values.iter().map(FieldValue::to_bytes).collect())
}

impl Request {
    pub fn into_command(self) -> CliResult<Command> {
        match self {
            Request::Insert { space, tuple: values } => Ok(Command::Insert {
                space,
                flags: 0,
                tuple: tuple(&values),
            }),
            Request::Update { space, key, ops } => {
                let mut mutations = Vec::with_capacity(ops.len());
                for (field, op, operand) in ops {
                    let op = UpdateOperator::from_name(&op)
                        .ok_or_else(|| CliError::bad_request(format!("Unknown update operator: '{}'", op)))?;
                    mutations.push(Mutation::new(field, op, operand.to_bytes()));
                }
                Ok(Command::UpdateFields {
                    space,
                    flags: 0,
                    key: tuple(&key),
                    mutations,
                })
            }
            Request::Delete { space, key } => Ok(Command::Delete {
                space,
                flags: 0,
                key: tuple(&key),
            }),
        }
    }
}

/// Parse one request line
pub fn parse_request(line: &str) -> CliResult<Command> {
    let request: Request = serde_json::from_str(line)?;
    request.into_command()
}

/// Read request lines from stdin, skipping blank ones
pub fn read_requests() -> impl Iterator<Item = CliResult<String>> {
    let stdin = io::stdin();
    stdin
        .lock()
        .lines()
        .map(|line| line.map_err(CliError::from))
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    write_line(&response)
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });
    write_line(&response)
}

fn write_line(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_request() {
        let cmd = parse_request(r#"{"op": "insert", "tuple": [1, "a"]}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Insert {
                space: 0,
                flags: 0,
                tuple: Tuple::new(vec![1u32.to_le_bytes().to_vec(), b"a".to_vec()]),
            }
        );
    }

    #[test]
    fn test_update_request() {
        let cmd = parse_request(r#"{"op": "update", "space": 2, "key": [4], "ops": [[1, "add", 1], [2, "set", "x"]]}"#)
            .unwrap();
        let Command::UpdateFields { space, mutations, .. } = cmd else {
            panic!("expected update");
        };
        assert_eq!(space, 2);
        assert_eq!(mutations[0].op, UpdateOperator::Add);
        assert_eq!(mutations[0].operand, 1u32.to_le_bytes().to_vec());
        assert_eq!(mutations[1].operand, b"x".to_vec());
    }

    #[test]
    fn test_field_widths() {
        assert_eq!(FieldValue::Number(7).to_bytes().len(), 4);
        assert_eq!(FieldValue::Number(-7).to_bytes(), (-7i32).to_le_bytes().to_vec());
        assert_eq!(FieldValue::Number(1 << 40).to_bytes().len(), 8);
    }

    #[test]
    fn test_bad_requests() {
        assert!(parse_request(r#"{"op": "upsert", "tuple": [1]}"#).is_err());
        assert!(parse_request(r#"{"op": "update", "key": [1], "ops": [[1, "mul", 2]]}"#).is_err());
        assert!(parse_request("not json").is_err());
    }
}

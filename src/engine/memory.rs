//! In-memory engine keyed by the first tuple field

use std::collections::BTreeMap;

use super::{Engine, EngineError, EngineResult};
use crate::wal::{decode_command, Command, Cursor, Mutation, Row, Tuple, UpdateOperator};

/// Spaces of tuples, each keyed by the tuple's first field.
#[derive(Debug, Default, Clone)]
pub struct MemoryEngine {
    spaces: BTreeMap<u32, BTreeMap<Vec<u8>, Tuple>>,
    applied: u64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a tuple by key.
    pub fn select(&self, space: u32, key: &[u8]) -> Option<&Tuple> {
        self.spaces.get(&space).and_then(|s| s.get(key))
    }

    /// Number of tuples in a space.
    pub fn count(&self, space: u32) -> usize {
        self.spaces.get(&space).map_or(0, |s| s.len())
    }

    /// Number of commands executed so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    fn update(&mut self, space: u32, key: &Tuple, mutations: &[Mutation]) -> EngineResult<()> {
        let key = match key.field(0) {
            Some(key) => key,
            None => return Err(EngineError::EmptyTuple),
        };
        let current = match self.spaces.get(&space).and_then(|s| s.get(key)) {
            Some(tuple) => tuple,
            // updating a missing key is a no-op
            None => return Ok(()),
        };

        let mut fields = current.0.clone();
        for m in mutations {
            apply_mutation(&mut fields, m)?;
        }
        if fields.is_empty() {
            return Err(EngineError::EmptyTuple);
        }

        let tuple = Tuple::new(fields);
        let space = self.spaces.entry(space).or_default();
        if tuple.field(0) != Some(key) {
            space.remove(key);
        }
        space.insert(tuple.0[0].clone(), tuple);
        Ok(())
    }
}

fn apply_mutation(fields: &mut Vec<Vec<u8>>, m: &Mutation) -> EngineResult<()> {
    let index = m.field as usize;
    let out_of_range = EngineError::FieldOutOfRange {
        field: m.field,
        len: fields.len(),
    };

    match m.op {
        UpdateOperator::Set => {
            if index < fields.len() {
                fields[index] = m.operand.clone();
            } else if index == fields.len() {
                fields.push(m.operand.clone());
            } else {
                return Err(out_of_range);
            }
        }
        UpdateOperator::Insert => {
            if index > fields.len() {
                return Err(out_of_range);
            }
            fields.insert(index, m.operand.clone());
        }
        UpdateOperator::Delete => {
            if index >= fields.len() {
                return Err(out_of_range);
            }
            fields.remove(index);
        }
        UpdateOperator::Add | UpdateOperator::And | UpdateOperator::Xor | UpdateOperator::Or => {
            let field = fields.get_mut(index).ok_or(out_of_range)?;
            *field = arith(field, m)?;
        }
        UpdateOperator::Splice => {
            let field = fields.get_mut(index).ok_or(out_of_range)?;
            *field = splice(field, m)?;
        }
    }
    Ok(())
}

fn arith(field: &[u8], m: &Mutation) -> EngineResult<Vec<u8>> {
    let mismatch = EngineError::OperandMismatch { field: m.field };
    if field.len() != m.operand.len() {
        return Err(mismatch);
    }
    match field.len() {
        4 => {
            let a = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
            let o = &m.operand;
            let b = u32::from_le_bytes([o[0], o[1], o[2], o[3]]);
            let r = match m.op {
                UpdateOperator::Add => a.wrapping_add(b),
                UpdateOperator::And => a & b,
                UpdateOperator::Xor => a ^ b,
                _ => a | b,
            };
            Ok(r.to_le_bytes().to_vec())
        }
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(field);
            let a = u64::from_le_bytes(buf);
            buf.copy_from_slice(&m.operand);
            let b = u64::from_le_bytes(buf);
            let r = match m.op {
                UpdateOperator::Add => a.wrapping_add(b),
                UpdateOperator::And => a & b,
                UpdateOperator::Xor => a ^ b,
                _ => a | b,
            };
            Ok(r.to_le_bytes().to_vec())
        }
        _ => Err(mismatch),
    }
}

/// Splice operand: three fields `offset`, `length` (4-byte signed, negative
/// offset counts from the end) and the replacement bytes.
fn splice(field: &[u8], m: &Mutation) -> EngineResult<Vec<u8>> {
    let bad = || EngineError::BadSpliceOperand { field: m.field };
    let mut cursor = Cursor::new(&m.operand);
    let offset = number_field(&mut cursor).ok_or_else(bad)?;
    let length = number_field(&mut cursor).ok_or_else(bad)?;
    let replacement = cursor.field().ok_or_else(bad)?;
    if cursor.remaining() != 0 {
        return Err(bad());
    }

    let len = field.len() as i64;
    let start = if offset < 0 { (len + offset).max(0) } else { offset.min(len) };
    let end = if length < 0 {
        (len + length).max(start)
    } else {
        (start + length).min(len)
    };

    let (start, end) = (start as usize, end as usize);
    let mut out = Vec::with_capacity(field.len() - (end - start) + replacement.len());
    out.extend_from_slice(&field[..start]);
    out.extend_from_slice(&replacement);
    out.extend_from_slice(&field[end..]);
    Ok(out)
}

fn number_field(cursor: &mut Cursor<'_>) -> Option<i64> {
    let field = cursor.field()?;
    if field.len() != 4 {
        return None;
    }
    Some(i32::from_le_bytes([field[0], field[1], field[2], field[3]]) as i64)
}

impl Engine for MemoryEngine {
    fn apply(&mut self, row: &Row) -> EngineResult<()> {
        if !row.tag.is_data() {
            return Ok(());
        }
        match decode_command(row.tag, &row.data) {
            Some(command) => self.execute(&command),
            None => {
                tracing::debug!(
                    lsn = row.lsn,
                    scn = row.scn,
                    tag = %row.tag,
                    "skipping opaque payload"
                );
                Ok(())
            }
        }
    }

    fn execute(&mut self, command: &Command) -> EngineResult<()> {
        match command {
            Command::Nop => {}
            Command::Insert { space, tuple, .. } => {
                let key = tuple.field(0).ok_or(EngineError::EmptyTuple)?.to_vec();
                self.spaces
                    .entry(*space)
                    .or_default()
                    .insert(key, tuple.clone());
            }
            Command::UpdateFields {
                space,
                key,
                mutations,
                ..
            } => self.update(*space, key, mutations)?,
            Command::Delete { space, key, .. } => {
                let key = key.field(0).ok_or(EngineError::EmptyTuple)?;
                if let Some(s) = self.spaces.get_mut(space) {
                    s.remove(key);
                }
            }
        }
        self.applied += 1;
        Ok(())
    }
}

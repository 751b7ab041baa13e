//! Operation commands carried in data rows
//!
//! Payload layout: `op u16 LE` followed by the op body.
//!
//! - `nop` (1): empty body
//! - `insert` (13): `space u32`, `flags u32`, tuple
//! - `update_fields` (19): `space u32`, `flags u32`, key tuple, `count u32`,
//!   then `count` mutations of `field u32`, `operator u8`, operand field
//! - `delete` (21): `space u32`, `flags u32`, key tuple
//!
//! A tuple is `cardinality u32` followed by fields, each a BER varint
//! length and the field bytes.
//!
//! Decoding is strict: a payload decodes only if re-encoding the result
//! gives back exactly the same bytes. Anything else is opaque and is
//! reported as `None`, which callers treat as "forward as raw bytes".

use std::fmt;

use super::tag::Tag;

/// Operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    Nop = 1,
    Insert = 13,
    UpdateFields = 19,
    Delete = 21,
}

impl OpCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(OpCode::Nop),
            13 => Some(OpCode::Insert),
            19 => Some(OpCode::UpdateFields),
            21 => Some(OpCode::Delete),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Field update operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateOperator {
    Set = 0,
    Add = 1,
    And = 2,
    Xor = 3,
    Or = 4,
    Splice = 5,
    Delete = 6,
    Insert = 7,
}

impl UpdateOperator {
    pub fn from_u8(value: u8) -> Option<Self> {
        let op = match value {
            0 => UpdateOperator::Set,
            1 => UpdateOperator::Add,
            2 => UpdateOperator::And,
            3 => UpdateOperator::Xor,
            4 => UpdateOperator::Or,
            5 => UpdateOperator::Splice,
            6 => UpdateOperator::Delete,
            7 => UpdateOperator::Insert,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            UpdateOperator::Set => "set",
            UpdateOperator::Add => "add",
            UpdateOperator::And => "and",
            UpdateOperator::Xor => "xor",
            UpdateOperator::Or => "or",
            UpdateOperator::Splice => "splice",
            UpdateOperator::Delete => "delete",
            UpdateOperator::Insert => "insert",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "set" => UpdateOperator::Set,
            "add" => UpdateOperator::Add,
            "and" => UpdateOperator::And,
            "xor" => UpdateOperator::Xor,
            "or" => UpdateOperator::Or,
            "splice" => UpdateOperator::Splice,
            "delete" => UpdateOperator::Delete,
            "insert" => UpdateOperator::Insert,
            _ => return None,
        };
        Some(op)
    }
}

/// Ordered list of raw fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple(pub Vec<Vec<u8>>);

impl Tuple {
    pub fn new(fields: Vec<Vec<u8>>) -> Self {
        Self(fields)
    }

    /// Tuple of 4-byte numeric fields
    pub fn from_u32s(values: &[u32]) -> Self {
        Self(values.iter().map(|v| v.to_le_bytes().to_vec()).collect())
    }

    pub fn fields(&self) -> &[Vec<u8>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&[u8]> {
        self.0.get(index).map(|f| f.as_slice())
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.0.len() as u32).to_le_bytes());
        for field in &self.0 {
            write_field(buf, field);
        }
    }

    fn decode(cursor: &mut Cursor<'_>) -> Option<Self> {
        let cardinality = cursor.u32()? as usize;
        // every field costs at least its one byte length prefix
        if cardinality > cursor.remaining() {
            return None;
        }
        let mut fields = Vec::with_capacity(cardinality);
        for _ in 0..cardinality {
            fields.push(cursor.field()?);
        }
        Some(Self(fields))
    }
}

/// One field mutation of an `update_fields` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub field: u32,
    pub op: UpdateOperator,
    pub operand: Vec<u8>,
}

impl Mutation {
    pub fn new(field: u32, op: UpdateOperator, operand: Vec<u8>) -> Self {
        Self { field, op, operand }
    }

    /// Numeric operand, for 4 and 8 byte operands.
    pub fn numeric_operand(&self) -> Option<i64> {
        decode_number(&self.operand)
    }

    /// Adds `delta` to a numeric operand keeping its width.
    ///
    /// Returns false if the operand is not numeric.
    pub fn add_to_operand(&mut self, delta: i64) -> bool {
        match self.operand.len() {
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&self.operand);
                let value = i32::from_le_bytes(b).wrapping_add(delta as i32);
                self.operand = value.to_le_bytes().to_vec();
                true
            }
            8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&self.operand);
                let value = i64::from_le_bytes(b).wrapping_add(delta);
                self.operand = value.to_le_bytes().to_vec();
                true
            }
            _ => false,
        }
    }
}

/// Decoded operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nop,
    Insert {
        space: u32,
        flags: u32,
        tuple: Tuple,
    },
    UpdateFields {
        space: u32,
        flags: u32,
        key: Tuple,
        mutations: Vec<Mutation>,
    },
    Delete {
        space: u32,
        flags: u32,
        key: Tuple,
    },
}

impl Command {
    pub fn op(&self) -> OpCode {
        match self {
            Command::Nop => OpCode::Nop,
            Command::Insert { .. } => OpCode::Insert,
            Command::UpdateFields { .. } => OpCode::UpdateFields,
            Command::Delete { .. } => OpCode::Delete,
        }
    }

    pub fn space(&self) -> Option<u32> {
        match self {
            Command::Nop => None,
            Command::Insert { space, .. }
            | Command::UpdateFields { space, .. }
            | Command::Delete { space, .. } => Some(*space),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.op().as_u16().to_le_bytes());

        match self {
            Command::Nop => {}
            Command::Insert {
                space,
                flags,
                tuple,
            } => {
                buf.extend_from_slice(&space.to_le_bytes());
                buf.extend_from_slice(&flags.to_le_bytes());
                tuple.encode_into(&mut buf);
            }
            Command::UpdateFields {
                space,
                flags,
                key,
                mutations,
            } => {
                buf.extend_from_slice(&space.to_le_bytes());
                buf.extend_from_slice(&flags.to_le_bytes());
                key.encode_into(&mut buf);
                buf.extend_from_slice(&(mutations.len() as u32).to_le_bytes());
                for m in mutations {
                    buf.extend_from_slice(&m.field.to_le_bytes());
                    buf.push(m.op as u8);
                    write_field(&mut buf, &m.operand);
                }
            }
            Command::Delete { space, flags, key } => {
                buf.extend_from_slice(&space.to_le_bytes());
                buf.extend_from_slice(&flags.to_le_bytes());
                key.encode_into(&mut buf);
            }
        }

        buf
    }

    /// Decodes a payload. `None` means the payload is opaque.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let op = OpCode::from_u16(cursor.u16()?)?;

        let command = match op {
            OpCode::Nop => Command::Nop,
            OpCode::Insert => Command::Insert {
                space: cursor.u32()?,
                flags: cursor.u32()?,
                tuple: Tuple::decode(&mut cursor)?,
            },
            OpCode::UpdateFields => {
                let space = cursor.u32()?;
                let flags = cursor.u32()?;
                let key = Tuple::decode(&mut cursor)?;
                let count = cursor.u32()? as usize;
                // field (4) + operator (1) + operand prefix (1)
                if count > cursor.remaining() / 6 {
                    return None;
                }
                let mut mutations = Vec::with_capacity(count);
                for _ in 0..count {
                    let field = cursor.u32()?;
                    let op = UpdateOperator::from_u8(cursor.u8()?)?;
                    let operand = cursor.field()?;
                    mutations.push(Mutation { field, op, operand });
                }
                Command::UpdateFields {
                    space,
                    flags,
                    key,
                    mutations,
                }
            }
            OpCode::Delete => Command::Delete {
                space: cursor.u32()?,
                flags: cursor.u32()?,
                key: Tuple::decode(&mut cursor)?,
            },
        };

        if cursor.remaining() != 0 {
            return None;
        }
        Some(command)
    }
}

/// Structured view of a row payload, if the tag marks a data row and the
/// payload is a recognized command.
pub fn decode_command(tag: Tag, data: &[u8]) -> Option<Command> {
    if !tag.is_data() {
        return None;
    }
    Command::decode(data)
}

/// Interprets a 4 or 8 byte field as a little endian signed number.
pub fn decode_number(field: &[u8]) -> Option<i64> {
    match field.len() {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(field);
            Some(i32::from_le_bytes(b) as i64)
        }
        8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(field);
            Some(i64::from_le_bytes(b))
        }
        _ => None,
    }
}

/// Writes a BER varint: 7-bit groups, most significant first.
pub fn write_varint32(buf: &mut Vec<u8>, value: u32) {
    if value >= 1 << 7 {
        if value >= 1 << 14 {
            if value >= 1 << 21 {
                if value >= 1 << 28 {
                    buf.push((value >> 28) as u8 | 0x80);
                }
                buf.push((value >> 21) as u8 | 0x80);
            }
            buf.push((value >> 14) as u8 | 0x80);
        }
        buf.push((value >> 7) as u8 | 0x80);
    }
    buf.push((value & 0x7f) as u8);
}

/// Writes a length-prefixed field.
pub fn write_field(buf: &mut Vec<u8>, field: &[u8]) {
    write_varint32(buf, field.len() as u32);
    buf.extend_from_slice(field);
}

/// Bounds-checked reader over a payload
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        let b = self.take(2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a minimally encoded BER varint.
    pub(crate) fn varint32(&mut self) -> Option<u32> {
        let first = self.u8()?;
        if first == 0x80 {
            // leading zero group would not re-encode identically
            return None;
        }
        let mut value = (first & 0x7f) as u32;
        if first & 0x80 == 0 {
            return Some(value);
        }
        // five groups carry 35 bits; the first may only hold 4
        let mut groups = 1;
        loop {
            let byte = self.u8()?;
            groups += 1;
            if groups == 5 && first & 0x7f > 0x0f {
                return None;
            }
            value = (value << 7) | (byte & 0x7f) as u32;
            if byte & 0x80 == 0 {
                return Some(value);
            }
            if groups == 5 {
                return None;
            }
        }
    }

    pub(crate) fn field(&mut self) -> Option<Vec<u8>> {
        let len = self.varint32()? as usize;
        self.take(len).map(|b| b.to_vec())
    }
}

fn fmt_field(f: &mut fmt::Formatter<'_>, field: &[u8]) -> fmt::Result {
    match field.len() {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(field);
            return write!(f, "{}", u32::from_le_bytes(b));
        }
        8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(field);
            return write!(f, "{}", u64::from_le_bytes(b));
        }
        _ => {}
    }
    match std::str::from_utf8(field) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{:?}", s),
        _ => {
            write!(f, "0x")?;
            for b in field {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            fmt_field(f, field)?;
        }
        write!(f, ">")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Nop => write!(f, "nop"),
            Command::Insert { space, tuple, .. } => {
                write!(f, "insert n:{} {}", space, tuple)
            }
            Command::UpdateFields {
                space,
                key,
                mutations,
                ..
            } => {
                write!(f, "update_fields n:{} key:{} [", space, key)?;
                for (i, m) in mutations.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {} ", m.field, m.op.name())?;
                    match m.numeric_operand() {
                        Some(n) => write!(f, "{}", n)?,
                        None => fmt_field(f, &m.operand)?,
                    }
                }
                write!(f, "]")
            }
            Command::Delete { space, key, .. } => write!(f, "delete n:{} key:{}", space, key),
        }
    }
}

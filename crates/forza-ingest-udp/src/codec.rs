//! Sequential little-endian field access over a datagram.
//!
//! Every read names the field it is for, so a short buffer reports which
//! field ran out instead of silently producing zeros.

use byteorder::{LittleEndian, ReadBytesExt};
use forza_ingest_core::DecodeError;
use std::io::Cursor;

pub struct FieldReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(buf) }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    fn truncated(&self, field: &'static str, needed: usize) -> DecodeError {
        DecodeError::TruncatedInput {
            field,
            offset: self.position(),
            needed,
            remaining: self.remaining(),
        }
    }

    // Cursor moves to the end on a failed read_exact, so check up front to keep
    // the reported offset at the start of the field.
    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), DecodeError> {
        if self.remaining() < needed {
            return Err(self.truncated(field, needed));
        }
        Ok(())
    }

    pub fn i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.ensure(field, 4)?;
        self.cursor.read_i32::<LittleEndian>().map_err(|_| self.truncated(field, 4))
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.ensure(field, 4)?;
        self.cursor.read_u32::<LittleEndian>().map_err(|_| self.truncated(field, 4))
    }

    pub fn f32(&mut self, field: &'static str) -> Result<f32, DecodeError> {
        self.ensure(field, 4)?;
        self.cursor.read_f32::<LittleEndian>().map_err(|_| self.truncated(field, 4))
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        self.ensure(field, 2)?;
        self.cursor.read_u16::<LittleEndian>().map_err(|_| self.truncated(field, 2))
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        self.ensure(field, 1)?;
        self.cursor.read_u8().map_err(|_| self.truncated(field, 1))
    }

    pub fn i8(&mut self, field: &'static str) -> Result<i8, DecodeError> {
        self.ensure(field, 1)?;
        self.cursor.read_i8().map_err(|_| self.truncated(field, 1))
    }

    /// Consumes `n` bytes without looking at them.
    pub fn skip(&mut self, field: &'static str, n: usize) -> Result<(), DecodeError> {
        self.ensure(field, n)?;
        self.cursor.set_position((self.position() + n) as u64);
        Ok(())
    }
}

/// Mirror of [`FieldReader`] for building datagrams.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn with_capacity(n: usize) -> Self {
        Self { buf: Vec::with_capacity(n) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.buf.push(v as u8);
        self
    }

    pub fn fill(&mut self, byte: u8, n: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + n, byte);
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

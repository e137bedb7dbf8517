use bytes::{Buf, BufMut, BytesMut};
use glam::{Quat, Vec2, Vec3};

use crate::directory::InstanceId;
use crate::session::ConnectionId;

/// Wire value for "no connection", also used as the server's sender id.
pub const NO_CONNECTION: i16 = -1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("negative length prefix {0}")]
    NegativeLength(i16),
    #[error("length {0} does not fit an i16 prefix")]
    TooLong(usize),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("invalid connection id {0}")]
    InvalidConnection(i16),
    #[error("invalid instance id {0}")]
    InvalidInstance(i16),
    #[error("unknown {kind} tag {tag}")]
    UnknownTag { kind: &'static str, tag: u8 },
    #[error("envelope declares {declared} payload bytes but {actual} are present")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("{0} unread bytes after value")]
    TrailingBytes(usize),
}

/// Sequential little-endian writer.
#[derive(Debug, Default, Clone)]
pub struct NetWriter {
    buf: BytesMut,
}

impl NetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_vec2(&mut self, value: Vec2) {
        self.write_f32(value.x);
        self.write_f32(value.y);
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    /// Writes an `i16` length prefix followed by the raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let len = i16::try_from(bytes.len()).map_err(|_| WireError::TooLong(bytes.len()))?;
        self.write_i16(len);
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), WireError> {
        self.write_bytes(value.as_bytes())
    }

    /// Appends bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_connection(&mut self, connection: Option<ConnectionId>) {
        self.write_i16(connection.map_or(NO_CONNECTION, ConnectionId::to_wire));
    }

    pub fn write_instance(&mut self, instance: InstanceId) {
        self.write_i16(instance.to_wire());
    }
}

/// Cursor over a received payload. Every read checks the remaining length.
#[derive(Debug, Clone)]
pub struct NetReader<'a> {
    buf: &'a [u8],
}

impl<'a> NetReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The unread tail, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::UnexpectedEnd {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_vec2(&mut self) -> Result<Vec2, WireError> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, WireError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, WireError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        let w = self.read_f32()?;
        Ok(Quat::from_xyzw(x, y, z, w))
    }

    /// Reads an `i16` length prefix and borrows that many bytes.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_i16()?;
        let len = usize::try_from(len).map_err(|_| WireError::NegativeLength(len))?;
        self.read_raw(len)
    }

    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    pub fn read_connection(&mut self) -> Result<Option<ConnectionId>, WireError> {
        let raw = self.read_i16()?;
        if raw == NO_CONNECTION {
            return Ok(None);
        }
        ConnectionId::from_wire(raw)
            .map(Some)
            .ok_or(WireError::InvalidConnection(raw))
    }

    pub fn read_instance(&mut self) -> Result<InstanceId, WireError> {
        let raw = self.read_i16()?;
        InstanceId::from_wire(raw).ok_or(WireError::InvalidInstance(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_primitives_are_little_endian() {
        let mut writer = NetWriter::new();
        writer.write_i16(0x0102);
        writer.write_f32(1.0);
        assert_eq!(&writer.as_slice()[..2], &[0x02, 0x01]);
        assert_eq!(&writer.as_slice()[2..], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let mut reader = NetReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_i16(), Ok(0x0201));
        assert_eq!(
            reader.read_i32(),
            Err(WireError::UnexpectedEnd {
                needed: 4,
                remaining: 1
            })
        );
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut writer = NetWriter::new();
        writer.write_i16(-4);
        let mut reader = NetReader::new(writer.as_slice());
        assert_eq!(reader.read_bytes(), Err(WireError::NegativeLength(-4)));
    }

    #[test]
    fn test_connection_none_is_minus_one() {
        let mut writer = NetWriter::new();
        writer.write_connection(None);
        writer.write_connection(ConnectionId::from_wire(3));
        assert_eq!(&writer.as_slice()[..2], &(-1i16).to_le_bytes());

        let mut reader = NetReader::new(writer.as_slice());
        assert_eq!(reader.read_connection().unwrap(), None);
        assert_eq!(reader.read_connection().unwrap(), ConnectionId::from_wire(3));
    }

    #[test]
    fn test_string_and_blob() {
        let mut writer = NetWriter::new();
        writer.write_string("crate").unwrap();
        writer.write_bytes(&[9, 8, 7]).unwrap();
        writer.write_bool(true);

        let mut reader = NetReader::new(writer.as_slice());
        assert_eq!(reader.read_string().unwrap(), "crate");
        assert_eq!(reader.read_bytes().unwrap(), &[9, 8, 7]);
        assert!(reader.read_bool().unwrap());
        assert!(reader.is_empty());
    }

    proptest! {
        #[test]
        fn composite_values_survive_the_wire(
            a in any::<i16>(),
            b in any::<i64>(),
            x in -1.0e6f32..1.0e6,
            y in -1.0e6f32..1.0e6,
            z in -1.0e6f32..1.0e6,
            text in "[a-zA-Z0-9 ]{0,24}",
        ) {
            let mut writer = NetWriter::new();
            writer.write_i16(a);
            writer.write_i64(b);
            writer.write_vec3(Vec3::new(x, y, z));
            writer.write_vec2(Vec2::new(y, x));
            writer.write_quat(Quat::from_xyzw(x, y, z, 1.0));
            writer.write_string(&text).unwrap();

            let mut reader = NetReader::new(writer.as_slice());
            prop_assert_eq!(reader.read_i16().unwrap(), a);
            prop_assert_eq!(reader.read_i64().unwrap(), b);
            prop_assert_eq!(reader.read_vec3().unwrap(), Vec3::new(x, y, z));
            prop_assert_eq!(reader.read_vec2().unwrap(), Vec2::new(y, x));
            prop_assert_eq!(reader.read_quat().unwrap(), Quat::from_xyzw(x, y, z, 1.0));
            prop_assert_eq!(reader.read_string().unwrap(), text);
            prop_assert!(reader.is_empty());
        }
    }
}

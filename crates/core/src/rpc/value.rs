use glam::{Quat, Vec2, Vec3};

use crate::session::ConnectionId;
use crate::wire::{NetReader, NetWriter, WireError};

/// A typed RPC argument. Each is sent as `[u8 tag][value]`.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Short(i16),
    Long(i64),
    Float(f32),
    Int(i32),
    String(String),
    Vector3(Vec3),
    Vector2(Vec2),
    Orientation(Quat),
    Connection(Option<ConnectionId>),
}

impl RpcValue {
    pub fn tag(&self) -> u8 {
        match self {
            RpcValue::Short(_) => 0,
            RpcValue::Long(_) => 1,
            RpcValue::Float(_) => 2,
            RpcValue::Int(_) => 3,
            RpcValue::String(_) => 4,
            RpcValue::Vector3(_) => 5,
            RpcValue::Vector2(_) => 6,
            RpcValue::Orientation(_) => 7,
            RpcValue::Connection(_) => 8,
        }
    }

    pub fn encode(&self, writer: &mut NetWriter) -> Result<(), WireError> {
        writer.write_u8(self.tag());
        match self {
            RpcValue::Short(v) => writer.write_i16(*v),
            RpcValue::Long(v) => writer.write_i64(*v),
            RpcValue::Float(v) => writer.write_f32(*v),
            RpcValue::Int(v) => writer.write_i32(*v),
            RpcValue::String(v) => writer.write_string(v)?,
            RpcValue::Vector3(v) => writer.write_vec3(*v),
            RpcValue::Vector2(v) => writer.write_vec2(*v),
            RpcValue::Orientation(v) => writer.write_quat(*v),
            RpcValue::Connection(v) => writer.write_connection(*v),
        }
        Ok(())
    }

    pub fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            0 => RpcValue::Short(reader.read_i16()?),
            1 => RpcValue::Long(reader.read_i64()?),
            2 => RpcValue::Float(reader.read_f32()?),
            3 => RpcValue::Int(reader.read_i32()?),
            4 => RpcValue::String(reader.read_string()?),
            5 => RpcValue::Vector3(reader.read_vec3()?),
            6 => RpcValue::Vector2(reader.read_vec2()?),
            7 => RpcValue::Orientation(reader.read_quat()?),
            8 => RpcValue::Connection(reader.read_connection()?),
            tag => {
                return Err(WireError::UnknownTag {
                    kind: "rpc argument",
                    tag,
                });
            }
        })
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            RpcValue::Vector3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            RpcValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            RpcValue::Short(v) => Some(i32::from(*v)),
            RpcValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_connection(&self) -> Option<ConnectionId> {
        match self {
            RpcValue::Connection(v) => *v,
            _ => None,
        }
    }
}

impl From<i16> for RpcValue {
    fn from(v: i16) -> Self {
        RpcValue::Short(v)
    }
}

impl From<i32> for RpcValue {
    fn from(v: i32) -> Self {
        RpcValue::Int(v)
    }
}

impl From<i64> for RpcValue {
    fn from(v: i64) -> Self {
        RpcValue::Long(v)
    }
}

impl From<f32> for RpcValue {
    fn from(v: f32) -> Self {
        RpcValue::Float(v)
    }
}

impl From<&str> for RpcValue {
    fn from(v: &str) -> Self {
        RpcValue::String(v.to_string())
    }
}

impl From<Vec3> for RpcValue {
    fn from(v: Vec3) -> Self {
        RpcValue::Vector3(v)
    }
}

impl From<Vec2> for RpcValue {
    fn from(v: Vec2) -> Self {
        RpcValue::Vector2(v)
    }
}

impl From<Quat> for RpcValue {
    fn from(v: Quat) -> Self {
        RpcValue::Orientation(v)
    }
}

impl From<ConnectionId> for RpcValue {
    fn from(v: ConnectionId) -> Self {
        RpcValue::Connection(Some(v))
    }
}

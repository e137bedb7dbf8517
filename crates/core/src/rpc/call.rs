use crate::directory::InstanceId;
use crate::session::ConnectionId;
use crate::wire::{NetReader, NetWriter, WireError};

use super::method::{MethodDescriptor, MethodIndex};
use super::value::RpcValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    ServerOnly,
    All,
    AllBuffered,
    Others,
    OthersBuffered,
    /// The first argument names the receiving connection.
    Target,
}

impl DeliveryMode {
    pub fn to_byte(self) -> u8 {
        match self {
            DeliveryMode::ServerOnly => 0,
            DeliveryMode::All => 1,
            DeliveryMode::AllBuffered => 2,
            DeliveryMode::Others => 3,
            DeliveryMode::OthersBuffered => 4,
            DeliveryMode::Target => 5,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => DeliveryMode::ServerOnly,
            1 => DeliveryMode::All,
            2 => DeliveryMode::AllBuffered,
            3 => DeliveryMode::Others,
            4 => DeliveryMode::OthersBuffered,
            5 => DeliveryMode::Target,
            _ => return None,
        })
    }

    pub fn is_buffered(self) -> bool {
        matches!(self, DeliveryMode::AllBuffered | DeliveryMode::OthersBuffered)
    }

    /// Whether the issuing peer is among the recipients.
    pub fn includes_sender(self) -> bool {
        matches!(self, DeliveryMode::All | DeliveryMode::AllBuffered)
    }
}

/// `[i16 sender][i16 instance][u8 mode][i16 method][i16 argc]` then `argc`
/// tagged arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub sender: Option<ConnectionId>,
    pub instance: InstanceId,
    pub mode: DeliveryMode,
    pub method: MethodIndex,
    pub args: Vec<RpcValue>,
}

impl RpcCall {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let argc = i16::try_from(self.args.len()).map_err(|_| WireError::TooLong(self.args.len()))?;
        let mut writer = NetWriter::with_capacity(9 + self.args.len() * 8);
        writer.write_connection(self.sender);
        writer.write_instance(self.instance);
        writer.write_u8(self.mode.to_byte());
        writer.write_i16(self.method.0 as i16);
        writer.write_i16(argc);
        for arg in &self.args {
            arg.encode(&mut writer)?;
        }
        Ok(writer.into_vec())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut reader = NetReader::new(payload);
        let sender = reader.read_connection()?;
        let instance = reader.read_instance()?;
        let mode_byte = reader.read_u8()?;
        let mode = DeliveryMode::from_byte(mode_byte).ok_or(WireError::UnknownTag {
            kind: "delivery mode",
            tag: mode_byte,
        })?;
        let method = reader.read_i16()?;
        let method = u16::try_from(method).map_err(|_| WireError::NegativeLength(method))?;
        let argc = reader.read_i16()?;
        let argc = usize::try_from(argc).map_err(|_| WireError::NegativeLength(argc))?;

        let mut args = Vec::with_capacity(argc.min(reader.remaining()));
        for _ in 0..argc {
            args.push(RpcValue::decode(&mut reader)?);
        }
        Ok(Self {
            sender,
            instance,
            mode,
            method: MethodIndex(method),
            args,
        })
    }
}

/// A decoded call handed to the target behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// `None` when the server issued the call.
    pub sender: Option<ConnectionId>,
    pub instance: InstanceId,
    pub mode: DeliveryMode,
    pub method: MethodDescriptor,
    pub args: Vec<RpcValue>,
}

impl Invocation {
    pub fn new(call: RpcCall, method: MethodDescriptor) -> Self {
        Self {
            sender: call.sender,
            instance: call.instance,
            mode: call.mode,
            method,
            args: call.args,
        }
    }

    pub fn name(&self) -> &str {
        &self.method.name
    }

    pub fn arg(&self, index: usize) -> Option<&RpcValue> {
        self.args.get(index)
    }
}

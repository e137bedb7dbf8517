use crate::wire::{NetReader, NetWriter, WireError};

use super::ConnectionId;

/// `[i16 connection][bool isLocal]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteConnect {
    pub connection: ConnectionId,
    pub is_local: bool,
}

impl RemoteConnect {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = NetWriter::with_capacity(3);
        writer.write_i16(self.connection.to_wire());
        writer.write_bool(self.is_local);
        writer.into_vec()
    }

    pub fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        let raw = reader.read_i16()?;
        let connection = ConnectionId::from_wire(raw).ok_or(WireError::InvalidConnection(raw))?;
        Ok(Self {
            connection,
            is_local: reader.read_bool()?,
        })
    }
}

/// `[i16 connection]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDisconnect {
    pub connection: ConnectionId,
}

impl RemoteDisconnect {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = NetWriter::with_capacity(2);
        writer.write_i16(self.connection.to_wire());
        writer.into_vec()
    }

    pub fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        let raw = reader.read_i16()?;
        let connection = ConnectionId::from_wire(raw).ok_or(WireError::InvalidConnection(raw))?;
        Ok(Self { connection })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_connect_layout() {
        let message = RemoteConnect {
            connection: ConnectionId::new(3).unwrap(),
            is_local: true,
        };
        let bytes = message.encode();
        assert_eq!(bytes, vec![3, 0, 1]);
        assert_eq!(RemoteConnect::decode(&mut NetReader::new(&bytes)).unwrap(), message);
    }

    #[test]
    fn test_remote_disconnect_rejects_none() {
        let bytes = (-1i16).to_le_bytes();
        assert!(matches!(
            RemoteDisconnect::decode(&mut NetReader::new(&bytes)),
            Err(WireError::InvalidConnection(-1))
        ));
    }
}

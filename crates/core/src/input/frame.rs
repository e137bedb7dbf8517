use glam::Vec3;

use crate::wire::{NetReader, NetWriter, WireError};

const POSITION_TOLERANCE: f32 = 1.0e-5;

/// One typed sample inside a frame. Each is sent as
/// `[i16 len][u8 kind][value]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Int(i16),
    Float(f32),
    Bool(bool),
    Vector(Vec3),
    /// Edge-triggered; never compared, OR-ed when frames fold.
    Trigger(bool),
}

impl InputValue {
    fn kind(&self) -> u8 {
        match self {
            InputValue::Int(_) => 0,
            InputValue::Float(_) => 1,
            InputValue::Bool(_) => 2,
            InputValue::Vector(_) => 3,
            InputValue::Trigger(_) => 4,
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, InputValue::Trigger(_))
    }

    fn encode(&self, writer: &mut NetWriter) -> Result<(), WireError> {
        let mut value = NetWriter::with_capacity(13);
        value.write_u8(self.kind());
        match *self {
            InputValue::Int(v) => value.write_i16(v),
            InputValue::Float(v) => value.write_f32(v),
            InputValue::Bool(v) | InputValue::Trigger(v) => value.write_bool(v),
            InputValue::Vector(v) => value.write_vec3(v),
        }
        writer.write_bytes(value.as_slice())
    }

    fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        let mut value = NetReader::new(reader.read_bytes()?);
        let decoded = match value.read_u8()? {
            0 => InputValue::Int(value.read_i16()?),
            1 => InputValue::Float(value.read_f32()?),
            2 => InputValue::Bool(value.read_bool()?),
            3 => InputValue::Vector(value.read_vec3()?),
            4 => InputValue::Trigger(value.read_bool()?),
            tag => {
                return Err(WireError::UnknownTag {
                    kind: "input value",
                    tag,
                });
            }
        };
        if !value.is_empty() {
            return Err(WireError::TrailingBytes(value.remaining()));
        }
        Ok(decoded)
    }

    /// Structural equality with triggers treated as always equal.
    fn same_as(&self, other: &InputValue) -> bool {
        match (self, other) {
            (InputValue::Trigger(_), InputValue::Trigger(_)) => true,
            (a, b) => a == b,
        }
    }

    fn approx_eq(&self, other: &InputValue) -> bool {
        match (self, other) {
            (InputValue::Float(a), InputValue::Float(b)) => (a - b) * (a - b) < POSITION_TOLERANCE,
            (InputValue::Vector(a), InputValue::Vector(b)) => a.distance_squared(*b) < POSITION_TOLERANCE,
            (a, b) => a == b,
        }
    }
}

/// A timestamped list of typed values, plus the timestamps of later frames
/// that carried the same values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputFrame {
    pub timestamp: f32,
    pub values: Vec<InputValue>,
    pub similar: Vec<f32>,
}

/// Output frames share the input layout; they carry simulation state
/// instead of control state.
pub type OutputFrame = InputFrame;

impl InputFrame {
    pub fn new(timestamp: f32) -> Self {
        Self {
            timestamp,
            values: Vec::new(),
            similar: Vec::new(),
        }
    }

    pub fn with(mut self, value: InputValue) -> Self {
        self.values.push(value);
        self
    }

    pub fn push(&mut self, value: InputValue) {
        self.values.push(value);
    }

    pub fn value(&self, index: usize) -> Option<&InputValue> {
        self.values.get(index)
    }

    pub fn int(&self, index: usize) -> Option<i16> {
        match self.value(index)? {
            InputValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, index: usize) -> Option<f32> {
        match self.value(index)? {
            InputValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn vector(&self, index: usize) -> Option<Vec3> {
        match self.value(index)? {
            InputValue::Vector(v) => Some(*v),
            _ => None,
        }
    }

    /// Reads a `Bool` or a `Trigger`.
    pub fn flag(&self, index: usize) -> Option<bool> {
        match self.value(index)? {
            InputValue::Bool(v) | InputValue::Trigger(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether both frames carry the same values, ignoring triggers.
    pub fn same_values(&self, other: &InputFrame) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| a.same_as(b))
    }

    /// Equality within tolerance: floats and vectors by squared distance,
    /// everything else exactly.
    pub fn approx_eq(&self, other: &InputFrame) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| a.approx_eq(b))
    }

    /// ORs every set trigger of `other` into this frame.
    pub fn fold_triggers(&mut self, other: &InputFrame) {
        for (mine, theirs) in self.values.iter_mut().zip(&other.values) {
            if let (InputValue::Trigger(mine), InputValue::Trigger(true)) = (mine, theirs) {
                *mine = true;
            }
        }
    }

    pub fn clear_triggers(&mut self) {
        for value in &mut self.values {
            if let InputValue::Trigger(set) = value {
                *set = false;
            }
        }
    }

    pub fn has_trigger(&self) -> bool {
        self.values.iter().any(|v| matches!(v, InputValue::Trigger(true)))
    }

    /// `[f32 timestamp][i16 count]` values, then `[i16 similarCount]`
    /// timestamps.
    pub fn encode(&self, writer: &mut NetWriter) -> Result<(), WireError> {
        writer.write_f32(self.timestamp);
        writer.write_i16(count(self.values.len())?);
        for value in &self.values {
            value.encode(writer)?;
        }
        writer.write_i16(count(self.similar.len())?);
        for timestamp in &self.similar {
            writer.write_f32(*timestamp);
        }
        Ok(())
    }

    pub fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        let timestamp = reader.read_f32()?;
        let value_count = read_count(reader)?;
        let mut values = Vec::with_capacity(value_count.min(reader.remaining()));
        for _ in 0..value_count {
            values.push(InputValue::decode(reader)?);
        }
        let similar_count = read_count(reader)?;
        let mut similar = Vec::with_capacity(similar_count.min(reader.remaining() / 4));
        for _ in 0..similar_count {
            similar.push(reader.read_f32()?);
        }
        Ok(Self {
            timestamp,
            values,
            similar,
        })
    }

    /// The frame itself followed by one copy per similar timestamp. Copies
    /// have their triggers cleared so an edge runs once.
    pub fn expand(mut self) -> Vec<InputFrame> {
        let similar = std::mem::take(&mut self.similar);
        let mut repeat = self.clone();
        repeat.clear_triggers();

        let mut frames = Vec::with_capacity(similar.len() + 1);
        frames.push(self);
        frames.extend(similar.into_iter().map(|timestamp| InputFrame {
            timestamp,
            ..repeat.clone()
        }));
        frames
    }
}

pub(crate) fn count(len: usize) -> Result<i16, WireError> {
    i16::try_from(len).map_err(|_| WireError::TooLong(len))
}

pub(crate) fn read_count(reader: &mut NetReader<'_>) -> Result<usize, WireError> {
    let raw = reader.read_i16()?;
    usize::try_from(raw).map_err(|_| WireError::NegativeLength(raw))
}

use crate::directory::InstanceId;
use crate::wire::{NetReader, NetWriter, WireError};

use super::frame::{InputFrame, count, read_count};

/// Outbound frames waiting for the next send. Consecutive frames with the
/// same values collapse into one frame with a list of similar timestamps.
#[derive(Debug, Default)]
pub struct InputStream {
    frames: Vec<InputFrame>,
}

impl InputStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame. Returns true when it was folded into the previous
    /// one rather than stored.
    pub fn push(&mut self, frame: InputFrame) -> bool {
        if let Some(last) = self.frames.last_mut()
            && last.same_values(&frame)
        {
            last.fold_triggers(&frame);
            last.similar.push(frame.timestamp);
            return true;
        }
        self.frames.push(frame);
        false
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Drains the queue into batches of `[i16 count]` of `[i16 len][frame]`,
    /// each at most `limit` bytes. A single frame larger than `limit` still
    /// goes out alone. Empty when nothing is queued.
    pub fn take_batches(&mut self, limit: usize) -> Result<Vec<Vec<u8>>, WireError> {
        let mut batches = Vec::new();
        let mut pending = Vec::new();
        let mut size = BATCH_HEADER;
        for frame in self.frames.drain(..) {
            let mut encoded = NetWriter::new();
            frame.encode(&mut encoded)?;
            let encoded = encoded.into_vec();
            let framed = 2 + encoded.len();
            if !pending.is_empty() && size + framed > limit {
                batches.push(write_batch(&pending)?);
                pending.clear();
                size = BATCH_HEADER;
            }
            size += framed;
            pending.push(encoded);
        }
        if !pending.is_empty() {
            batches.push(write_batch(&pending)?);
        }
        Ok(batches)
    }

    /// Reads a batch and expands every frame, in order.
    pub fn read_batch(reader: &mut NetReader<'_>) -> Result<Vec<InputFrame>, WireError> {
        let frame_count = read_count(reader)?;
        let mut frames = Vec::with_capacity(frame_count.min(reader.remaining()));
        for _ in 0..frame_count {
            let mut encoded = NetReader::new(reader.read_bytes()?);
            frames.extend(InputFrame::decode(&mut encoded)?.expand());
        }
        Ok(frames)
    }
}

const BATCH_HEADER: usize = 2;

fn write_batch(frames: &[Vec<u8>]) -> Result<Vec<u8>, WireError> {
    let mut writer = NetWriter::with_capacity(BATCH_HEADER + frames.iter().map(|f| 2 + f.len()).sum::<usize>());
    writer.write_i16(count(frames.len())?);
    for frame in frames {
        writer.write_bytes(frame)?;
    }
    Ok(writer.into_vec())
}

/// Bytes the instance id adds in front of a batch.
pub const STREAM_HEADER_SIZE: usize = 2;

/// `[i16 instance][batch]`, the payload of input and output messages.
pub fn encode_stream_message(instance: InstanceId, batch: &[u8]) -> Vec<u8> {
    let mut writer = NetWriter::with_capacity(STREAM_HEADER_SIZE + batch.len());
    writer.write_instance(instance);
    writer.write_raw(batch);
    writer.into_vec()
}

pub fn decode_stream_message(payload: &[u8]) -> Result<(InstanceId, Vec<InputFrame>), WireError> {
    let mut reader = NetReader::new(payload);
    let instance = reader.read_instance()?;
    let frames = InputStream::read_batch(&mut reader)?;
    Ok((instance, frames))
}

//! Input capture, client-side prediction and server reconciliation.

mod frame;
mod interpolation;
mod prediction;
mod stream;

pub use frame::{InputFrame, InputValue, OutputFrame};
pub use interpolation::PoseSmoother;
pub use prediction::{PoseLayout, PredictedSimulation, PredictionEngine, PredictionRecord, PredictionRole};
pub use stream::{InputStream, decode_stream_message, encode_stream_message};

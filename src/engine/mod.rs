mod rvm;
mod tensor;

pub use rvm::RvmModel;
pub use tensor::{foreground_from_nchw, matte_from_nchw, to_nchw};

use crate::buffer::{BufferError, PixelBuffer};
use anyhow::Result;
use ndarray::Array4;
use std::time::Duration;
use thiserror::Error;

/// A model invocation error. Recoverable by contract: the pipeline drops
/// the frame, clears recurrent state, and lets the next frame retry.
#[derive(Debug, Error)]
pub enum InferenceFailure {
    #[error("model invocation failed: {0}")]
    Model(String),

    #[error("unsupported model input: {0}")]
    Input(String),

    #[error("inference exceeded the {0:?} deadline")]
    Deadline(Duration),
}

impl From<ort::Error> for InferenceFailure {
    fn from(err: ort::Error) -> Self {
        InferenceFailure::Model(err.to_string())
    }
}

impl From<ndarray::ShapeError> for InferenceFailure {
    fn from(err: ndarray::ShapeError) -> Self {
        InferenceFailure::Model(err.to_string())
    }
}

impl From<BufferError> for InferenceFailure {
    fn from(err: BufferError) -> Self {
        InferenceFailure::Input(err.to_string())
    }
}

/// The four recurrent tensors carried between consecutive inferences.
/// One immutable value: produced whole by an inference, consumed whole by
/// the next, never partially updated.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    r1: Array4<f32>,
    r2: Array4<f32>,
    r3: Array4<f32>,
    r4: Array4<f32>,
}

impl RecurrentState {
    pub fn new(r1: Array4<f32>, r2: Array4<f32>, r3: Array4<f32>, r4: Array4<f32>) -> Self {
        Self { r1, r2, r3, r4 }
    }

    /// Zero-valued state for the first frame, sized for the given inference
    /// resolution at the model's hidden-state downsample ratio.
    pub fn zeros(width: u32, height: u32, downsample_ratio: f32) -> Self {
        let h = (height as f32 * downsample_ratio) as usize;
        let w = (width as f32 * downsample_ratio) as usize;
        Self {
            r1: Array4::zeros((1, 16, h, w)),
            r2: Array4::zeros((1, 20, h / 2, w / 2)),
            r3: Array4::zeros((1, 24, h / 4, w / 4)),
            r4: Array4::zeros((1, 28, h / 8, w / 8)),
        }
    }

    pub fn tensors(&self) -> [&Array4<f32>; 4] {
        [&self.r1, &self.r2, &self.r3, &self.r4]
    }
}

/// One completed model invocation: predicted foreground color, per-pixel
/// alpha matte, and the state to thread into the next call.
pub struct Inference {
    pub foreground: PixelBuffer,
    pub alpha: PixelBuffer,
    pub state: RecurrentState,
}

/// The opaque matting capability. Given a source frame, the selected
/// background, and the prior recurrent state, predict the foreground and a
/// matte. Deterministic for identical inputs and state; expensive, so it
/// must never run on the capture or delivery threads.
pub trait MattingModel: Send {
    fn infer(
        &mut self,
        source: &PixelBuffer,
        background: &PixelBuffer,
        prior: Option<&RecurrentState>,
    ) -> Result<Inference, InferenceFailure>;
}

/// Load the default ONNX-backed matting model.
pub fn load_model(model_path: &str) -> Result<Box<dyn MattingModel>> {
    let model = RvmModel::new(model_path)?;
    Ok(Box::new(model))
}

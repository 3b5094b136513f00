use super::{foreground_from_nchw, matte_from_nchw, to_nchw};
use super::{Inference, InferenceFailure, MattingModel, RecurrentState};
use crate::buffer::PixelBuffer;
use anyhow::{Context, Result};
use ndarray::Ix4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;

/// ONNX-backed recurrent matting model.
///
/// The graph takes the source frame, the background frame, and four
/// recurrent tensors (r1i..r4i); it produces the foreground prediction,
/// the alpha matte, and the updated tensors (fgr, pha, r1o..r4o). The
/// recurrent tensors give the model temporal memory, so callers must thread
/// the returned state into the next invocation.
pub struct RvmModel {
    session: Session,
    downsample_ratio: f32,
}

impl RvmModel {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();
        tracing::info!("Loading matting model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("Matting model loaded");

        Ok(Self {
            session,
            // Hidden states run at 1/4 of the inference resolution.
            downsample_ratio: 0.25,
        })
    }
}

impl MattingModel for RvmModel {
    fn infer(
        &mut self,
        source: &PixelBuffer,
        background: &PixelBuffer,
        prior: Option<&RecurrentState>,
    ) -> Result<Inference, InferenceFailure> {
        let _span = tracing::debug_span!("matting_infer").entered();

        if source.dimensions() != background.dimensions() {
            return Err(InferenceFailure::Input(format!(
                "source {}x{} and background {}x{} must match",
                source.width(),
                source.height(),
                background.width(),
                background.height()
            )));
        }
        let (width, height) = source.dimensions();

        let src = to_nchw(source)?;
        let bgd = to_nchw(background)?;

        let zero_state;
        let state = match prior {
            Some(state) => state,
            None => {
                zero_state = RecurrentState::zeros(width, height, self.downsample_ratio);
                &zero_state
            }
        };
        let [r1, r2, r3, r4] = state.tensors();

        let _run_span = tracing::debug_span!("session_run").entered();
        let outputs = self.session.run(ort::inputs![
            src.view(),
            bgd.view(),
            r1.view(),
            r2.view(),
            r3.view(),
            r4.view()
        ]?)?;
        drop(_run_span);

        // Outputs: fgr, pha, then the four updated recurrent tensors.
        let fgr = outputs[0].try_extract_tensor::<f32>()?;
        let pha = outputs[1].try_extract_tensor::<f32>()?;

        let foreground = foreground_from_nchw(&fgr.view(), width, height)?;
        let alpha = matte_from_nchw(&pha.view(), width, height)?;

        let next = RecurrentState::new(
            outputs[2]
                .try_extract_tensor::<f32>()?
                .view()
                .to_owned()
                .into_dimensionality::<Ix4>()?,
            outputs[3]
                .try_extract_tensor::<f32>()?
                .view()
                .to_owned()
                .into_dimensionality::<Ix4>()?,
            outputs[4]
                .try_extract_tensor::<f32>()?
                .view()
                .to_owned()
                .into_dimensionality::<Ix4>()?,
            outputs[5]
                .try_extract_tensor::<f32>()?
                .view()
                .to_owned()
                .into_dimensionality::<Ix4>()?,
        );

        Ok(Inference {
            foreground,
            alpha,
            state: next,
        })
    }
}

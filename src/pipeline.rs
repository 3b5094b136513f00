use crate::background::BackgroundSelection;
use crate::buffer::{merge_alpha, resize_crop_to_fill, PixelBuffer};
use crate::engine::{Inference, InferenceFailure, MattingModel, RecurrentState};
use crate::gate::{GatePermit, InferenceGate};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// The model runs at a fixed resolution; every frame and background is
/// normalized to it before inference.
pub const INFERENCE_WIDTH: u32 = 1280;
pub const INFERENCE_HEIGHT: u32 = 720;

/// Receives composited frames and the status line, on the delivery thread.
pub trait ResultSink: Send {
    fn deliver(&mut self, image: PixelBuffer, status: &str) -> Result<()>;
}

/// Session-lifetime counters, never reset.
#[derive(Debug, Default)]
pub struct FrameMetrics {
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl FrameMetrics {
    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub dropped: u64,
}

impl MetricsSnapshot {
    pub fn drop_rate_percent(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.dropped as f64 / self.submitted as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// An inference that overruns this deadline is treated as a failure:
    /// its result is discarded and recurrent state starts fresh.
    pub inference_deadline: Option<Duration>,
}

enum Mode {
    /// Run the model and composite against the selected background.
    Replace(BackgroundSelection),
    /// Raw passthrough ("Origin"): deliver the resized frame untouched.
    Passthrough,
}

/// The single slot shared between the selection path and the worker. The
/// epoch counts background changes so state produced by an inference that
/// straddles a switch is never kept.
struct Slot {
    mode: Mode,
    state: Option<RecurrentState>,
    epoch: u64,
}

struct WorkItem {
    frame: PixelBuffer,
    permit: GatePermit,
    admitted_at: Instant,
}

struct Delivery {
    image: PixelBuffer,
    status: String,
}

/// Per-frame orchestrator: admit through the gate, prepare, infer with the
/// threaded recurrent state, composite, deliver. Denied or failed frames
/// are dropped; the next camera frame is the retry vehicle.
pub struct Pipeline {
    gate: Arc<InferenceGate>,
    metrics: Arc<FrameMetrics>,
    slot: Arc<Mutex<Slot>>,
    work_tx: Option<mpsc::Sender<WorkItem>>,
    worker: Option<JoinHandle<()>>,
    delivery: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(
        model: Option<Box<dyn MattingModel>>,
        sink: Box<dyn ResultSink>,
        background: BackgroundSelection,
        config: PipelineConfig,
    ) -> Self {
        let gate = InferenceGate::new();
        let metrics = Arc::new(FrameMetrics::default());
        let slot = Arc::new(Mutex::new(Slot {
            mode: Mode::Replace(background),
            state: None,
            epoch: 0,
        }));

        let (work_tx, work_rx) = mpsc::channel::<WorkItem>();
        let (delivery_tx, delivery_rx) = mpsc::channel::<Delivery>();

        let delivery = thread::spawn(move || {
            let mut sink = sink;
            while let Ok(result) = delivery_rx.recv() {
                if let Err(err) = sink.deliver(result.image, &result.status) {
                    tracing::warn!("result delivery failed: {err:#}");
                }
            }
        });

        let worker = {
            let slot = Arc::clone(&slot);
            let metrics = Arc::clone(&metrics);
            thread::spawn(move || {
                worker_loop(work_rx, delivery_tx, model, slot, metrics, config);
            })
        };

        Self {
            gate,
            metrics,
            slot,
            work_tx: Some(work_tx),
            worker: Some(worker),
            delivery: Some(delivery),
        }
    }

    /// Submit one captured frame. Returns immediately; if an earlier frame
    /// is still in flight this one is dropped.
    pub fn submit(&self, frame: PixelBuffer) {
        self.metrics.record_submitted();
        let Some(permit) = self.gate.try_enter() else {
            self.metrics.record_dropped();
            return;
        };
        let item = WorkItem {
            frame,
            permit,
            admitted_at: Instant::now(),
        };
        if let Some(tx) = &self.work_tx {
            if tx.send(item).is_err() {
                // Worker already gone; the permit just dropped with the item.
                self.metrics.record_dropped();
                tracing::warn!("worker thread is gone, frame discarded");
            }
        }
    }

    /// Replace the background. Recurrent state is tied to a background, so
    /// the slot is cleared and the epoch bumped.
    pub fn set_background(&self, selection: BackgroundSelection) {
        let mut slot = self.lock_slot();
        tracing::info!("background set to {}", selection.label());
        slot.mode = Mode::Replace(selection);
        slot.state = None;
        slot.epoch += 1;
    }

    /// Switch to raw passthrough (the "Origin" selection).
    pub fn set_passthrough(&self) {
        let mut slot = self.lock_slot();
        tracing::info!("background set to passthrough");
        slot.mode = Mode::Passthrough;
        slot.state = None;
        slot.epoch += 1;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Closing the work channel lets the worker drain in-flight work and
        // exit; the delivery thread follows when the worker's sender drops.
        self.work_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(delivery) = self.delivery.take() {
            let _ = delivery.join();
        }
    }
}

fn worker_loop(
    work_rx: mpsc::Receiver<WorkItem>,
    delivery_tx: mpsc::Sender<Delivery>,
    mut model: Option<Box<dyn MattingModel>>,
    slot: Arc<Mutex<Slot>>,
    metrics: Arc<FrameMetrics>,
    config: PipelineConfig,
) {
    while let Ok(item) = work_rx.recv() {
        let WorkItem {
            frame,
            permit,
            admitted_at,
        } = item;

        match process_frame(model.as_deref_mut(), &slot, frame, config.inference_deadline) {
            Ok(image) => {
                let snapshot = metrics.snapshot();
                let status = format!(
                    "{:.0}% dropped    {:.0}ms",
                    snapshot.drop_rate_percent(),
                    admitted_at.elapsed().as_secs_f64() * 1000.0
                );
                // Reopen the gate before handing off; delivery runs on its
                // own thread and must not hold up the next admission.
                drop(permit);
                if delivery_tx.send(Delivery { image, status }).is_err() {
                    tracing::warn!("delivery thread is gone, result discarded");
                }
            }
            Err(err) => {
                metrics.record_dropped();
                tracing::warn!("frame dropped: {err:#}");
                drop(permit);
            }
        }
    }
}

/// Steps 2-4 of the per-frame state machine: prepare, infer, composite.
fn process_frame(
    model: Option<&mut (dyn MattingModel + 'static)>,
    slot: &Arc<Mutex<Slot>>,
    frame: PixelBuffer,
    deadline: Option<Duration>,
) -> Result<PixelBuffer> {
    let prepared = resize_crop_to_fill(frame, INFERENCE_WIDTH, INFERENCE_HEIGHT)?;

    let (background, composite_rgb, prior, epoch) = {
        let mut slot = lock(slot);
        match &slot.mode {
            Mode::Passthrough => return Ok(prepared),
            Mode::Replace(selection) => {
                let background = Arc::clone(selection.buffer());
                let composite_rgb = selection.composite_rgb();
                // Taking the state leaves the slot empty, which is exactly
                // the reset a failed inference requires.
                let prior = slot.state.take();
                (background, composite_rgb, prior, slot.epoch)
            }
        }
    };

    let model = model.ok_or_else(|| anyhow::anyhow!("no matting model loaded"))?;

    let started = Instant::now();
    let inference = model.infer(&prepared, &background, prior.as_ref())?;
    if let Some(limit) = deadline {
        let elapsed = started.elapsed();
        if elapsed > limit {
            return Err(InferenceFailure::Deadline(limit).into());
        }
    }

    let Inference {
        foreground,
        alpha,
        state,
    } = inference;

    {
        let mut slot = lock(slot);
        // A background switch mid-inference invalidates this state.
        if slot.epoch == epoch {
            slot.state = Some(state);
        }
    }

    Ok(merge_alpha(&foreground, &alpha, composite_rgb)?)
}

fn lock<'a>(slot: &'a Arc<Mutex<Slot>>) -> MutexGuard<'a, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_rate_is_zero_before_any_submission() {
        let metrics = FrameMetrics::default();
        assert_eq!(metrics.snapshot().drop_rate_percent(), 0.0);
    }

    #[test]
    fn dropped_never_exceeds_submitted() {
        let metrics = FrameMetrics::default();
        for i in 0..100 {
            metrics.record_submitted();
            if i % 3 != 0 {
                metrics.record_dropped();
            }
            let snap = metrics.snapshot();
            assert!(snap.dropped <= snap.submitted);
        }
    }

    #[test]
    fn status_line_format() {
        let snap = MetricsSnapshot {
            submitted: 10,
            dropped: 6,
        };
        let status = format!("{:.0}% dropped    {:.0}ms", snap.drop_rate_percent(), 42.4);
        assert_eq!(status, "60% dropped    42ms");
    }
}

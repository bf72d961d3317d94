// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::config::VisualizationConfig;
use crate::plot::{ComparisonPlot, FieldExtractor, PlotItem, PlotToken};
use crate::pool::RenderPool;
use crate::render::{ColormapRenderer, ComparisonRenderer, Frame};
use crate::sink::FrameSink;
use crate::{VisualizationError, VisualizationResult};
use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::{Array3, ArrayView3, Axis};
use sfno_tensor::FieldTensor;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, debug_span, warn};

/// A finished comparison plot.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedPlot {
    pub token: PlotToken,
    pub frame: Frame,
}

struct Completion {
    index: usize,
    token: PlotToken,
    outcome: VisualizationResult<Frame>,
}

/// Jobs submitted since the last reset. Each batch owns its completion
/// channel so results of discarded jobs never leak into a later batch.
struct Batch {
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    submitted: usize,
}

impl Batch {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            submitted: 0,
        }
    }
}

/// Renders prediction/ground-truth comparisons on a worker pool while a
/// rollout keeps running, then gathers them in a stable order.
pub struct VisualizationWrapper {
    prefix: String,
    scale: Vec<f32>,
    bias: Vec<f32>,
    generate_video: bool,
    plot_list: Vec<PlotItem>,
    renderer: Arc<dyn ComparisonRenderer>,
    sink: Box<dyn FrameSink>,
    pool: RenderPool,
    batch: Batch,
}

impl VisualizationWrapper {
    /// Builds a wrapper whose plot list comes from the config, rendering with
    /// the default [`ColormapRenderer`].
    pub fn new(
        config: &VisualizationConfig,
        sink: Box<dyn FrameSink>,
    ) -> VisualizationResult<Self> {
        let items = config.plot_list.iter().cloned().map(PlotItem::from).collect();
        Self::with_plot_items(config, items, Arc::new(ColormapRenderer::default()), sink)
    }

    /// Builds a wrapper with an explicit plot list, which may carry custom
    /// extractors. The config's own `plot_list` is ignored.
    pub fn with_plot_items(
        config: &VisualizationConfig,
        plot_list: Vec<PlotItem>,
        renderer: Arc<dyn ComparisonRenderer>,
        sink: Box<dyn FrameSink>,
    ) -> VisualizationResult<Self> {
        config.validate()?;
        let pool = RenderPool::new(config.num_workers, &config.thread_name)?;
        debug!(
            prefix = %config.prefix,
            workers = pool.worker_count(),
            plots = plot_list.len(),
            "visualization wrapper ready"
        );
        Ok(Self {
            prefix: config.prefix.clone(),
            scale: config.scale.clone(),
            bias: config.bias.clone(),
            generate_video: config.generate_video,
            plot_list,
            renderer,
            sink,
            pool,
            batch: Batch::new(),
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ComparisonRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn plot_list(&self) -> &[PlotItem] {
        &self.plot_list
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Number of jobs submitted since the last reset or finalize.
    pub fn pending(&self) -> usize {
        self.batch.submitted
    }

    /// Queues one comparison job per plot item for a `[channel, lat, lon]`
    /// sample of prediction and target, both still normalised.
    pub fn add(
        &mut self,
        tag: &str,
        prediction: ArrayView3<'_, f32>,
        target: ArrayView3<'_, f32>,
    ) -> VisualizationResult<()> {
        if prediction.dim() != target.dim() {
            return Err(VisualizationError::ShapeMismatch {
                prediction: prediction.shape().to_vec(),
                target: target.shape().to_vec(),
            });
        }
        let prediction = Arc::new(self.unscale(prediction)?);
        let target = Arc::new(self.unscale(target)?);

        for item in &self.plot_list {
            let index = self.batch.submitted;
            let token = PlotToken::new(tag, item.name.clone());
            let job = ComparisonJob {
                token: token.clone(),
                extractor: item.extractor.clone(),
                diverging: item.diverging,
                prediction: Arc::clone(&prediction),
                target: Arc::clone(&target),
                renderer: Arc::clone(&self.renderer),
            };
            let completions = self.batch.sender.clone();
            self.pool.submit(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
                    Ok(outcome) => outcome,
                    Err(_) => Err(VisualizationError::Panicked {
                        field: token.field_name.clone(),
                        tag: token.tag.clone(),
                    }),
                };
                let _ = completions.send(Completion {
                    index,
                    token,
                    outcome,
                });
            })?;
            self.batch.submitted += 1;
        }
        debug!(tag, queued = self.batch.submitted, "queued comparison plots");
        Ok(())
    }

    /// Queues sample `sample` of a batched field pair.
    pub fn add_field(
        &mut self,
        tag: &str,
        prediction: &FieldTensor,
        target: &FieldTensor,
        sample: usize,
    ) -> VisualizationResult<()> {
        if prediction.shape() != target.shape() {
            return Err(VisualizationError::ShapeMismatch {
                prediction: prediction.shape().to_vec(),
                target: target.shape().to_vec(),
            });
        }
        if sample >= prediction.batch() {
            return Err(VisualizationError::InvalidConfig(
                "sample index exceeds the batch size",
            ));
        }
        self.add(
            tag,
            prediction.data().index_axis(Axis(0), sample),
            target.data().index_axis(Axis(0), sample),
        )
    }

    /// Waits for every queued job, emits the plots sorted by
    /// `(field_name, tag)` to the sink and returns them.
    ///
    /// The queue is reset whether or not rendering succeeded. When several
    /// jobs fail, the error of the earliest submitted one is returned. If the
    /// same token was queued twice, the later submission wins.
    pub fn finalize(&mut self) -> VisualizationResult<Vec<RenderedPlot>> {
        let _span = debug_span!("visualization_finalize", prefix = %self.prefix).entered();
        let batch = std::mem::replace(&mut self.batch, Batch::new());
        let Batch {
            sender,
            receiver,
            submitted,
        } = batch;
        drop(sender);

        let mut latest: BTreeMap<PlotToken, (usize, Frame)> = BTreeMap::new();
        let mut failure: Option<(usize, VisualizationError)> = None;
        for _ in 0..submitted {
            let completion = receiver.recv().map_err(|_| VisualizationError::PoolClosed)?;
            match completion.outcome {
                Ok(frame) => {
                    let superseded = latest
                        .get(&completion.token)
                        .is_some_and(|(index, _)| *index > completion.index);
                    if !superseded {
                        latest.insert(completion.token, (completion.index, frame));
                    }
                }
                Err(err) => {
                    if failure.as_ref().map_or(true, |(index, _)| completion.index < *index) {
                        failure = Some((completion.index, err));
                    }
                }
            }
        }
        if let Some((index, err)) = failure {
            warn!(job = index, error = %err, "comparison plot failed");
            return Err(err);
        }
        if latest.len() < submitted {
            warn!(
                submitted,
                unique = latest.len(),
                "duplicate plot tokens collapsed"
            );
        }

        let plots: Vec<RenderedPlot> = latest
            .into_iter()
            .map(|(token, (_, frame))| RenderedPlot { token, frame })
            .collect();
        if !plots.is_empty() {
            if self.generate_video {
                self.sink.write_video(&self.prefix, &plots)?;
            } else {
                self.sink.write_images(&self.prefix, &plots)?;
            }
        }
        debug!(plots = plots.len(), video = self.generate_video, "finalized comparison plots");
        Ok(plots)
    }

    /// Forgets every queued job. Jobs already running finish on the pool but
    /// their results are dropped.
    pub fn reset(&mut self) {
        let discarded = self.batch.submitted;
        self.batch = Batch::new();
        if discarded > 0 {
            debug!(discarded, "discarded queued comparison plots");
        }
    }

    fn unscale(&self, field: ArrayView3<'_, f32>) -> VisualizationResult<Array3<f32>> {
        let channels = field.len_of(Axis(0));
        let scale = broadcast("scale", &self.scale, channels)?;
        let bias = broadcast("bias", &self.bias, channels)?;
        let mut out = field.to_owned();
        for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
            plane.mapv_inplace(|x| scale(c) * x + bias(c));
        }
        Ok(out)
    }
}

fn broadcast<'a>(
    label: &'static str,
    values: &'a [f32],
    channels: usize,
) -> VisualizationResult<impl Fn(usize) -> f32 + 'a> {
    if values.len() != 1 && values.len() != channels {
        return Err(VisualizationError::ChannelBroadcast {
            label,
            got: values.len(),
            channels,
        });
    }
    Ok(move |c: usize| if values.len() == 1 { values[0] } else { values[c] })
}

impl std::fmt::Debug for VisualizationWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizationWrapper")
            .field("prefix", &self.prefix)
            .field("plot_list", &self.plot_list)
            .field("generate_video", &self.generate_video)
            .field("pool", &self.pool)
            .field("pending", &self.batch.submitted)
            .finish()
    }
}

struct ComparisonJob {
    token: PlotToken,
    extractor: FieldExtractor,
    diverging: bool,
    prediction: Arc<Array3<f32>>,
    target: Arc<Array3<f32>>,
    renderer: Arc<dyn ComparisonRenderer>,
}

impl ComparisonJob {
    fn run(&self) -> VisualizationResult<Frame> {
        let field = &self.token.field_name;
        let prediction = self.extractor.extract(field, self.prediction.view())?;
        let truth = self.extractor.extract(field, self.target.view())?;
        let plot = ComparisonPlot::new(self.token.clone(), prediction, truth, self.diverging)?;
        self.renderer.render(&plot)
    }
}

//! Batched attribution over a fitted model
//!
//! Rows are optionally subsampled, cut into fixed-size batches and explained
//! on a bounded rayon pool. Each worker returns `(batch_index, block)`; the
//! blocks are reassembled by index so the output row order never depends on
//! scheduling.

use super::sampling::{draw_background, SamplingExplainer};
use super::tree_shap::TreeExplainer;
use crate::config::AttributionConfig;
use crate::data::AnalysisRequest;
use crate::error::{AttributionError, Result};
use crate::monitoring::{MemoryReclaimer, OperationTracker};
use crate::preprocessing::PreparedData;
use crate::training::{FittedModel, ModelFamily, Regressor, SelectedModel};
use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An explainer the batch runner can drive from several threads
pub trait BatchExplainer: Sync {
    fn n_features(&self) -> usize;

    fn base_value(&self) -> f64;

    /// Attributions for the rows of `x`; `row_ids` are their original
    /// indices
    fn explain_rows(&self, x: ArrayView2<f64>, row_ids: &[usize]) -> Result<Array2<f64>>;
}

impl BatchExplainer for TreeExplainer<'_> {
    fn n_features(&self) -> usize {
        TreeExplainer::n_features(self)
    }

    fn base_value(&self) -> f64 {
        TreeExplainer::base_value(self)
    }

    fn explain_rows(&self, x: ArrayView2<f64>, _row_ids: &[usize]) -> Result<Array2<f64>> {
        self.explain(x)
    }
}

impl<F> BatchExplainer for SamplingExplainer<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Sync,
{
    fn n_features(&self) -> usize {
        SamplingExplainer::n_features(self)
    }

    fn base_value(&self) -> f64 {
        SamplingExplainer::base_value(self)
    }

    fn explain_rows(&self, x: ArrayView2<f64>, row_ids: &[usize]) -> Result<Array2<f64>> {
        self.explain(x, row_ids)
    }
}

/// Attributions for the explained rows, in original row order
#[derive(Debug, Clone)]
pub struct AttributionOutput {
    /// rows × features
    pub attributions: Array2<f64>,
    pub base_value: f64,
    pub predictions: Array1<f64>,
    /// Index into the prepared data of every explained row
    pub row_indices: Vec<usize>,
    pub entity_ids: Vec<String>,
    /// Rows before subsampling
    pub sampled_from: usize,
    pub failed_batches: usize,
    pub family: ModelFamily,
}

#[derive(Debug, Clone, Copy)]
struct BatchBounds {
    index: usize,
    start: usize,
    end: usize,
}

/// Computes per-entity attributions for a selected model
#[derive(Debug, Clone)]
pub struct AttributionComputer {
    config: AttributionConfig,
    /// Asked to free memory whenever usage crosses the threshold
    reclaimer: Option<Arc<dyn MemoryReclaimer>>,
}

impl AttributionComputer {
    pub fn new(config: AttributionConfig) -> Self {
        Self {
            config,
            reclaimer: None,
        }
    }

    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn MemoryReclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    /// Apply the per-request overrides
    pub fn with_request(mut self, request: &AnalysisRequest) -> Self {
        self.config.batch_size = request.batch_size();
        self.config.max_workers = request.max_workers();
        self.config.memory_efficient_mode = request.memory_efficient();
        self.config.random_state = request.random_state();
        self.config.max_samples = request.max_rows();
        self
    }

    /// Cap the worker count, e.g. at the threads available
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers.max(1);
        self
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn compute(
        &self,
        model: &SelectedModel,
        data: &PreparedData,
        tracker: &OperationTracker<'_>,
    ) -> Result<AttributionOutput> {
        if self.config.batch_size == 0 {
            return Err(AttributionError::invalid_parameter(
                "batch_size",
                self.config.batch_size,
                "must be positive",
            ));
        }

        let rows = self.sample_rows(data.n_rows());
        let x = model.scaler.transform(&data.features.select(Axis(0), &rows))?;
        let predictions = model.model.predict(&x)?;

        let (attributions, base_value, failed_batches) = match &model.model {
            FittedModel::GradientBoosting(gb) => {
                let explainer = TreeExplainer::for_boosting(gb)?;
                self.run_batches(&explainer, x.view(), &rows, tracker)?
            }
            FittedModel::RandomForest(forest) => {
                let explainer = TreeExplainer::for_forest(forest)?;
                self.run_batches(&explainer, x.view(), &rows, tracker)?
            }
            FittedModel::Ridge(_) => {
                let background = draw_background(
                    model.scaler.transform(&data.features)?.view(),
                    self.config.background_size,
                    self.config.random_state,
                );
                let fitted = &model.model;
                let explainer = SamplingExplainer::new(
                    |x: &Array2<f64>| fitted.predict(x),
                    background,
                    self.config.n_permutations,
                    self.config.random_state,
                )?;
                self.run_batches(&explainer, x.view(), &rows, tracker)?
            }
        };
        tracker.record_rows(rows.len());

        Ok(AttributionOutput {
            attributions,
            base_value,
            predictions,
            entity_ids: rows.iter().map(|&r| data.entity_ids[r].clone()).collect(),
            row_indices: rows,
            sampled_from: data.n_rows(),
            failed_batches,
            family: model.family,
        })
    }

    /// Uniform sample down to `max_samples`, sorted back into input order
    fn sample_rows(&self, n_rows: usize) -> Vec<usize> {
        let cap = self.config.max_samples;
        if cap == 0 || n_rows <= cap {
            return (0..n_rows).collect();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_state);
        let mut rows = index::sample(&mut rng, n_rows, cap).into_vec();
        rows.sort_unstable();
        info!(from = n_rows, to = cap, "Subsampled rows for attribution");
        rows
    }

    /// Explain `x` batch by batch; returns the attribution matrix, base
    /// value and number of failed batches
    pub fn run_batches<E>(
        &self,
        explainer: &E,
        x: ArrayView2<f64>,
        row_ids: &[usize],
        tracker: &OperationTracker<'_>,
    ) -> Result<(Array2<f64>, f64, usize)>
    where
        E: BatchExplainer + ?Sized,
    {
        let width = explainer.n_features();
        if x.ncols() != width || row_ids.len() != x.nrows() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} rows x {} features", row_ids.len(), width),
                actual: format!("{} rows x {} features", x.nrows(), x.ncols()),
            });
        }
        if x.nrows() == 0 {
            return Ok((Array2::zeros((0, width)), explainer.base_value(), 0));
        }

        let batch_size = self.config.batch_size.max(1);
        let bounds: Vec<BatchBounds> = (0..x.nrows())
            .step_by(batch_size)
            .enumerate()
            .map(|(index, start)| BatchBounds {
                index,
                start,
                end: (start + batch_size).min(x.nrows()),
            })
            .collect();
        let run = |b: &BatchBounds| -> (usize, Array2<f64>, bool) {
            let rows = b.end - b.start;
            let batch = x.slice(s![b.start..b.end, ..]);
            let ids = &row_ids[b.start..b.end];
            let outcome = catch_unwind(AssertUnwindSafe(|| self.explain_batch(explainer, batch, ids, tracker)));
            let (block, failed) = match outcome {
                Ok(Ok(block)) => (block, false),
                Ok(Err(e)) => {
                    let err = AttributionError::BatchComputation {
                        batch: b.index,
                        reason: e.to_string(),
                    };
                    warn!(batch = b.index, rows, error = %err, "Attribution batch failed");
                    tracker.record_batch_failure();
                    (Array2::zeros((rows, width)), true)
                }
                Err(payload) => {
                    let reason = panic_reason(payload.as_ref());
                    warn!(batch = b.index, rows, reason = %reason, "Attribution batch panicked");
                    tracker.record_batch_failure();
                    (Array2::zeros((rows, width)), true)
                }
            };
            if tracker.memory_over(self.config.memory_threshold_pct) {
                let freed = self.reclaim(tracker);
                warn!(batch = b.index, freed, "Memory above threshold after batch");
            }
            (b.index, block, failed)
        };

        let workers = self.config.max_workers.max(1);
        let mut blocks: Vec<(usize, Array2<f64>, bool)> = if workers == 1 || bounds.len() == 1 {
            bounds.iter().map(&run).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers.min(bounds.len()))
                .build()
                .map_err(|e| AttributionError::Computation(format!("thread pool: {}", e)))?;
            pool.install(|| bounds.par_iter().map(&run).collect())
        };
        blocks.sort_by_key(|(index, _, _)| *index);

        let views: Vec<ArrayView2<f64>> = blocks.iter().map(|(_, block, _)| block.view()).collect();
        let attributions = concatenate(Axis(0), &views)?;
        let failed = blocks.iter().filter(|(_, _, failed)| *failed).count();
        debug!(
            batches = bounds.len(),
            failed,
            workers,
            "Attribution batches complete"
        );
        Ok((attributions, explainer.base_value(), failed))
    }

    fn explain_batch<E>(
        &self,
        explainer: &E,
        batch: ArrayView2<f64>,
        row_ids: &[usize],
        tracker: &OperationTracker<'_>,
    ) -> Result<Array2<f64>>
    where
        E: BatchExplainer + ?Sized,
    {
        if !self.config.memory_efficient_mode {
            return checked_block(explainer.explain_rows(batch, row_ids)?, batch.dim());
        }

        let step = self.config.sub_batch_size.max(1);
        let mut block = Array2::zeros(batch.dim());
        for start in (0..batch.nrows()).step_by(step) {
            let end = (start + step).min(batch.nrows());
            let rows = batch.slice(s![start..end, ..]);
            let part = checked_block(explainer.explain_rows(rows, &row_ids[start..end])?, rows.dim())?;
            block.slice_mut(s![start..end, ..]).assign(&part);
            drop(part);
            if tracker.memory_over(self.config.memory_threshold_pct) {
                let freed = self.reclaim(tracker);
                debug!(rows = end - start, freed, "Memory above threshold after sub-batch");
            }
        }
        Ok(block)
    }

    /// One reclaim pass: counted on the tracker, then handed to the
    /// reclaimer if one is attached
    fn reclaim(&self, tracker: &OperationTracker<'_>) -> usize {
        tracker.record_reclaim();
        self.reclaimer.as_ref().map_or(0, |r| r.reclaim())
    }
}

fn checked_block(block: Array2<f64>, dim: (usize, usize)) -> Result<Array2<f64>> {
    if block.dim() != dim {
        return Err(AttributionError::ShapeError {
            expected: format!("{:?}", dim),
            actual: format!("{:?}", block.dim()),
        });
    }
    Ok(block)
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Optimizer parameter groups.
//!
//! Matrices (linear and embedding weights) receive weight decay; vectors
//! (biases, LayerNorm scale and shift) do not. Each group is driven by its
//! own AdamW instance sharing one learning rate.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::Path;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;

/// One optimizer group: parameter ids and their weight decay.
#[derive(Debug, Clone, Default)]
pub struct ParamGroup {
    pub weight_decay: f64,
    pub params: Vec<ParamId>,
    /// Total scalar count across the group.
    pub num_elements: usize,
}

/// Partition of every float parameter of a module.
#[derive(Debug, Clone, Default)]
pub struct ParamGroups {
    pub decay: ParamGroup,
    pub no_decay: ParamGroup,
}

impl ParamGroups {
    pub fn len(&self) -> usize {
        self.decay.params.len() + self.no_decay.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct RankCollector {
    groups: ParamGroups,
}

impl<B: Backend> ModuleVisitor<B> for RankCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let group = if D >= 2 {
            &mut self.groups.decay
        } else {
            &mut self.groups.no_decay
        };
        group.params.push(id);
        group.num_elements += tensor.shape().num_elements();
    }
}

/// Split a module's parameters into the decay (rank ≥ 2) and no-decay
/// (rank 1) groups.
pub fn param_groups<B: Backend, M: Module<B>>(model: &M, weight_decay: f64) -> ParamGroups {
    let mut collector = RankCollector {
        groups: ParamGroups {
            decay: ParamGroup {
                weight_decay,
                ..Default::default()
            },
            no_decay: ParamGroup::default(),
        },
    };
    model.visit(&mut collector);
    collector.groups
}

/// Moves gradients out of one `GradientsParams` into per-group containers.
struct GradSplitter<'a, B: AutodiffBackend> {
    decay_ids: &'a HashSet<ParamId>,
    source: GradientsParams,
    decay: GradientsParams,
    no_decay: GradientsParams,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradSplitter<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.source.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        if self.decay_ids.contains(&id) {
            self.decay.register::<B::InnerBackend, D>(id, grad);
        } else {
            self.no_decay.register::<B::InnerBackend, D>(id, grad);
        }
    }
}

/// Two optimizers of the same kind, one per [`ParamGroup`].
pub struct GroupedOptimizer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    groups: ParamGroups,
    decay_ids: HashSet<ParamId>,
    decay: O,
    no_decay: O,
    _marker: PhantomData<fn() -> (B, M)>,
}

/// AdamW for both groups, with optional per-parameter gradient-norm clipping.
pub fn grouped_adamw<B, M>(
    model: &M,
    weight_decay: f64,
    max_grad_norm: Option<f64>,
) -> GroupedOptimizer<B, M, impl Optimizer<M, B>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let groups = param_groups::<B, M>(model, weight_decay);
    let clipping = max_grad_norm.map(|norm| GradientClippingConfig::Norm(norm as f32));
    let build = |decay: f64| {
        AdamWConfig::new()
            .with_weight_decay(decay as f32)
            .with_grad_clipping(clipping.clone())
            .init::<B, M>()
    };

    tracing::info!(
        decay_params = groups.decay.params.len(),
        decay_elements = groups.decay.num_elements,
        no_decay_params = groups.no_decay.params.len(),
        no_decay_elements = groups.no_decay.num_elements,
        weight_decay,
        "Optimizer parameter groups"
    );

    GroupedOptimizer {
        decay: build(groups.decay.weight_decay),
        no_decay: build(groups.no_decay.weight_decay),
        decay_ids: groups.decay.params.iter().copied().collect(),
        groups,
        _marker: PhantomData,
    }
}

impl<B, M, O> GroupedOptimizer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn groups(&self) -> &ParamGroups {
        &self.groups
    }

    /// Apply one update to both groups.
    pub fn step(&mut self, lr: f64, model: M, grads: GradientsParams) -> M {
        let mut splitter = GradSplitter::<B> {
            decay_ids: &self.decay_ids,
            source: grads,
            decay: GradientsParams::new(),
            no_decay: GradientsParams::new(),
            _backend: PhantomData,
        };
        model.visit(&mut splitter);
        let GradSplitter { decay, no_decay, .. } = splitter;

        let model = self.decay.step(lr, model, decay);
        self.no_decay.step(lr, model, no_decay)
    }

    /// Write both optimizer states into `dir` as `optimizer_decay.mpk` and
    /// `optimizer_no_decay.mpk`.
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(self.decay.to_record(), dir.join("optimizer_decay"))
            .map_err(|e| anyhow::anyhow!("Failed to save optimizer state to {}: {e}", dir.display()))?;
        recorder
            .record(self.no_decay.to_record(), dir.join("optimizer_no_decay"))
            .map_err(|e| anyhow::anyhow!("Failed to save optimizer state to {}: {e}", dir.display()))?;
        Ok(())
    }

    /// Restore both optimizer states written by [`GroupedOptimizer::save`].
    pub fn load(mut self, dir: &Path, device: &B::Device) -> anyhow::Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let decay = recorder
            .load(dir.join("optimizer_decay"), device)
            .map_err(|e| anyhow::anyhow!("Failed to load optimizer from {}: {e}", dir.display()))?;
        let no_decay = recorder
            .load(dir.join("optimizer_no_decay"), device)
            .map_err(|e| anyhow::anyhow!("Failed to load optimizer from {}: {e}", dir.display()))?;
        self.decay = self.decay.load_record(decay);
        self.no_decay = self.no_decay.load_record(no_decay);
        Ok(self)
    }
}

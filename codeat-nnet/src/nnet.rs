use crate::{
    component::{AdaptiveLayer, Component, ComponentRecord},
    matrix::{check_shape, copy_into},
    source::{FixedTransform, FrozenBackend},
    CodeatError, Result,
};
use codeat_structs::config::{TrainOptions, UpdateFlags};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct NnetRecord {
    pub components: Vec<ComponentRecord>,
}

/// Ordered stack of components.
///
/// Activations of the last propagation are kept per layer for the backward
/// pass. Those buffers, like the error buffers, are reused across calls and
/// rewritten in full each time.
pub struct Nnet {
    components: Vec<Box<dyn Component>>,
    adaptive: Vec<usize>,
    propagate_buf: Vec<Array2<f32>>,
    backpropagate_buf: Vec<Array2<f32>>,
}

impl Nnet {
    pub fn new(components: Vec<Box<dyn Component>>) -> Result<Self> {
        for (c, pair) in components.windows(2).enumerate() {
            if pair[0].output_dim() != pair[1].input_dim() {
                return Err(CodeatError::ShapeMismatch {
                    context: "component dimensions",
                    expected: vec![c, pair[0].output_dim()],
                    actual: vec![c + 1, pair[1].input_dim()],
                });
            }
        }
        let n = components.len();
        let mut nnet = Self {
            components,
            adaptive: Vec::new(),
            propagate_buf: vec![Array2::zeros((0, 0)); n + 1],
            backpropagate_buf: vec![Array2::zeros((0, 0)); n + 1],
        };
        nnet.index_adaptive_layers();
        Ok(nnet)
    }

    pub fn empty() -> Self {
        Self {
            components: Vec::new(),
            adaptive: Vec::new(),
            propagate_buf: vec![Array2::zeros((0, 0))],
            backpropagate_buf: vec![Array2::zeros((0, 0))],
        }
    }

    pub fn from_record(record: NnetRecord) -> Result<Self> {
        let components = record
            .components
            .into_iter()
            .map(ComponentRecord::into_component)
            .collect::<Result<Vec<_>>>()?;
        Self::new(components)
    }

    pub fn to_record(&self) -> NnetRecord {
        NnetRecord {
            components: self.components.iter().map(|c| c.to_record()).collect(),
        }
    }

    fn index_adaptive_layers(&mut self) {
        self.adaptive = self
            .components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_adaptive().is_some())
            .map(|(i, _)| i)
            .collect();
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component(&self, c: usize) -> &dyn Component {
        self.components[c].as_ref()
    }

    pub fn input_dim(&self) -> Option<usize> {
        self.components.first().map(|c| c.input_dim())
    }

    pub fn output_dim(&self) -> Option<usize> {
        self.components.last().map(|c| c.output_dim())
    }

    /// Component indices of the adaptive layers, in network order. Indexed
    /// once when the network is built.
    pub fn adaptive_layers(&self) -> &[usize] {
        &self.adaptive
    }

    pub fn adaptive_iter(&self) -> impl Iterator<Item = &dyn AdaptiveLayer> + '_ {
        self.adaptive
            .iter()
            .filter_map(|&c| self.components[c].as_adaptive())
    }

    pub fn adaptive_iter_mut(&mut self) -> impl Iterator<Item = &mut dyn AdaptiveLayer> + '_ {
        let adaptive = &self.adaptive;
        self.components
            .iter_mut()
            .enumerate()
            .filter(move |(c, _)| adaptive.binary_search(c).is_ok())
            .filter_map(|(_, component)| component.as_adaptive_mut())
    }

    pub fn set_train_options(&mut self, options: TrainOptions) {
        for component in self.components.iter_mut() {
            component.set_train_options(options);
        }
    }

    pub fn configure_updates(&mut self, flags: UpdateFlags) {
        for component in self.components.iter_mut() {
            component.configure_updates(flags);
        }
    }

    pub fn propagate(&mut self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        if let Some(input_dim) = self.input_dim() {
            check_shape("nnet input", input.dim(), (input.nrows(), input_dim))?;
        }
        copy_into(input, &mut self.propagate_buf[0]);
        for (c, component) in self.components.iter().enumerate() {
            let (done, rest) = self.propagate_buf.split_at_mut(c + 1);
            component.propagate(done[c].view(), &mut rest[0])?;
        }
        copy_into(self.propagate_buf[self.components.len()].view(), out);
        Ok(())
    }

    /// Back-propagates `out_diff` through the layers of the last
    /// [`Nnet::propagate`] call and applies the configured updates.
    pub fn backpropagate(
        &mut self,
        out_diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
    ) -> Result<()> {
        self.backpropagate_with(out_diff, in_diff, true)
    }

    fn backpropagate_with(
        &mut self,
        out_diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
        update: bool,
    ) -> Result<()> {
        let n = self.components.len();
        check_shape("nnet error", out_diff.dim(), self.propagate_buf[n].dim())?;
        copy_into(out_diff, &mut self.backpropagate_buf[n]);
        for c in (0..n).rev() {
            let (head, tail) = self.backpropagate_buf.split_at_mut(c + 1);
            self.components[c].backpropagate(
                self.propagate_buf[c].view(),
                self.propagate_buf[c + 1].view(),
                tail[0].view(),
                &mut head[c],
                update,
            )?;
        }
        copy_into(self.backpropagate_buf[0].view(), in_diff);
        Ok(())
    }
}

impl FixedTransform for Nnet {
    fn forward(&mut self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        self.propagate(input, out)
    }
}

/// Network whose parameters never change: the backward pass computes the
/// error signal for the layers below and discards every parameter delta.
pub struct Frozen {
    nnet: Nnet,
}

impl Frozen {
    pub fn new(mut nnet: Nnet) -> Self {
        nnet.set_train_options(TrainOptions::frozen());
        nnet.configure_updates(UpdateFlags::none());
        Self { nnet }
    }

    pub fn nnet(&self) -> &Nnet {
        &self.nnet
    }
}

impl FrozenBackend for Frozen {
    fn forward(&mut self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        self.nnet.propagate(input, out)
    }

    fn backward(&mut self, out_diff: ArrayView2<f32>, in_diff: &mut Array2<f32>) -> Result<()> {
        self.nnet.backpropagate_with(out_diff, in_diff, false)
    }
}

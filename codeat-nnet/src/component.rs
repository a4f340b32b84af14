use crate::{
    activation::{Sigmoid, Softmax},
    affine::Affine,
    codeat::CodeAt,
    Result,
};
use codeat_structs::config::{TrainOptions, UpdateFlags};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// One layer of a [`crate::Nnet`].
pub trait Component: Send {
    fn kind(&self) -> &'static str;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Writes the layer output for `input` into `out`, overwriting all of it.
    fn propagate(&self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()>;

    /// Writes the error w.r.t. the layer input into `in_diff`. Parameter
    /// deltas are only applied when `update` is set.
    fn backpropagate(
        &mut self,
        input: ArrayView2<f32>,
        output: ArrayView2<f32>,
        out_diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
        update: bool,
    ) -> Result<()>;

    fn set_train_options(&mut self, _options: TrainOptions) {}

    fn configure_updates(&mut self, _flags: UpdateFlags) {}

    fn to_record(&self) -> ComponentRecord;

    fn as_adaptive(&self) -> Option<&dyn AdaptiveLayer> {
        None
    }

    fn as_adaptive_mut(&mut self) -> Option<&mut dyn AdaptiveLayer> {
        None
    }
}

/// A layer that consumes the group code vector.
///
/// The layer holds its own copy of the code (a mirror of the value owned by
/// [`crate::CodeGroupManager`]) and an accumulator for the code gradient of
/// the bunches seen since the last [`AdaptiveLayer::zero_code_gradient`].
pub trait AdaptiveLayer {
    fn code_dim(&self) -> usize;

    fn set_code(&mut self, code: ArrayView1<f32>) -> Result<()>;

    fn code(&self) -> ArrayView1<f32>;

    fn zero_code_gradient(&mut self);

    fn code_gradient(&self) -> ArrayView1<f32>;

    /// Applies an already aggregated gradient. A layer whose code updates are
    /// disabled keeps its code unchanged.
    fn update_code(&mut self, gradient: ArrayView1<f32>) -> Result<()>;

    fn configure_updates(&mut self, flags: UpdateFlags);
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentRecord {
    Affine {
        weight: Vec<Vec<f32>>,
        bias: Vec<f32>,
    },
    #[serde(rename = "codeat")]
    CodeAt {
        weight: Vec<Vec<f32>>,
        bias: Vec<f32>,
        code_xform: Vec<Vec<f32>>,
        code: Vec<f32>,
    },
    Sigmoid {
        dim: usize,
    },
    Softmax {
        dim: usize,
    },
}

impl ComponentRecord {
    pub fn into_component(self) -> Result<Box<dyn Component>> {
        Ok(match self {
            ComponentRecord::Affine { weight, bias } => Box::new(Affine::from_parts(
                crate::matrix::from_rows("affine weight", &weight)?,
                Array1::from(bias),
            )?),
            ComponentRecord::CodeAt {
                weight,
                bias,
                code_xform,
                code,
            } => Box::new(CodeAt::from_parts(
                crate::matrix::from_rows("codeat weight", &weight)?,
                Array1::from(bias),
                crate::matrix::from_rows("codeat code transform", &code_xform)?,
                Array1::from(code),
            )?),
            ComponentRecord::Sigmoid { dim } => Box::new(Sigmoid::new(dim)),
            ComponentRecord::Softmax { dim } => Box::new(Softmax::new(dim)),
        })
    }
}

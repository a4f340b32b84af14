use crate::{
    component::{Component, ComponentRecord},
    matrix::{check_shape, ensure_shape, random_matrix, random_vector, to_rows},
    CodeatError, Result,
};
use codeat_structs::config::{TrainOptions, UpdateFlags};
use ndarray::{linalg::general_mat_mul, Array, Array1, Array2, ArrayView2, Axis, Dimension};

/// Momentum SGD step shared by the parametric layers:
/// `corr = momentum * corr + grad`, optional L2 decay scaled by the bunch
/// length, then `param -= learn_rate * corr`.
pub(crate) fn sgd_step<D: Dimension>(
    param: &mut Array<f32, D>,
    corr: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    options: &TrainOptions,
    frames: usize,
) {
    let momentum = options.momentum;
    corr.zip_mut_with(grad, |c, &g| *c = momentum * *c + g);
    if options.l2_penalty != 0.0 {
        let decay = 1.0 - options.learn_rate * options.l2_penalty * frames as f32;
        param.mapv_inplace(|p| p * decay);
    }
    param.scaled_add(-options.learn_rate, &*corr);
}

pub struct Affine {
    weight: Array2<f32>,
    bias: Array1<f32>,
    weight_corr: Array2<f32>,
    bias_corr: Array1<f32>,
    options: TrainOptions,
    update_weights: bool,
}

impl Affine {
    /// Randomly initialised layer, weights uniform in `±1/sqrt(input_dim)`.
    pub fn new(input_dim: usize, output_dim: usize, seed: u64) -> Self {
        let range = 1.0 / (input_dim.max(1) as f32).sqrt();
        Self::build(
            random_matrix(output_dim, input_dim, range, seed),
            random_vector(output_dim, range, seed.wrapping_add(1)),
        )
    }

    pub fn from_parts(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(CodeatError::ShapeMismatch {
                context: "affine bias",
                expected: vec![weight.nrows()],
                actual: vec![bias.len()],
            });
        }
        Ok(Self::build(weight, bias))
    }

    fn build(weight: Array2<f32>, bias: Array1<f32>) -> Self {
        Self {
            weight_corr: Array2::zeros(weight.raw_dim()),
            bias_corr: Array1::zeros(bias.raw_dim()),
            weight,
            bias,
            options: TrainOptions::default(),
            update_weights: true,
        }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }
}

impl Component for Affine {
    fn kind(&self) -> &'static str {
        "affine"
    }

    fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    fn propagate(&self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        check_shape(
            "affine input",
            (input.nrows(), input.ncols()),
            (input.nrows(), self.input_dim()),
        )?;
        ensure_shape(out, input.nrows(), self.output_dim());
        general_mat_mul(1.0, &input, &self.weight.t(), 0.0, out);
        *out += &self.bias;
        Ok(())
    }

    fn backpropagate(
        &mut self,
        input: ArrayView2<f32>,
        _output: ArrayView2<f32>,
        out_diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
        update: bool,
    ) -> Result<()> {
        check_shape(
            "affine error",
            out_diff.dim(),
            (input.nrows(), self.output_dim()),
        )?;
        ensure_shape(in_diff, input.nrows(), self.input_dim());
        general_mat_mul(1.0, &out_diff, &self.weight, 0.0, in_diff);

        if update && self.update_weights {
            let weight_grad = out_diff.t().dot(&input);
            let bias_grad = out_diff.sum_axis(Axis(0));
            let frames = input.nrows();
            sgd_step(
                &mut self.weight,
                &mut self.weight_corr,
                &weight_grad,
                &self.options,
                frames,
            );
            sgd_step(
                &mut self.bias,
                &mut self.bias_corr,
                &bias_grad,
                &self.options,
                frames,
            );
        }
        Ok(())
    }

    fn set_train_options(&mut self, options: TrainOptions) {
        self.options = options;
    }

    fn configure_updates(&mut self, flags: UpdateFlags) {
        self.update_weights = flags.weights;
    }

    fn to_record(&self) -> ComponentRecord {
        ComponentRecord::Affine {
            weight: to_rows(&self.weight),
            bias: self.bias.to_vec(),
        }
    }
}

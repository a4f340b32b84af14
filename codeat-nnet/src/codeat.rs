//! Affine layer with an additive, code-dependent bias.
//!
//! `y = x·Wᵀ + b + U·c` where `c` is the group code and `U` the code
//! transform. Weights (`W`, `b`), the transform and the code are updated
//! independently according to [`UpdateFlags`].

use crate::{
    affine::sgd_step,
    component::{AdaptiveLayer, Component, ComponentRecord},
    matrix::{check_shape, ensure_shape, random_matrix, random_vector, to_rows},
    CodeatError, Result,
};
use codeat_structs::config::{TrainOptions, UpdateFlags};
use ndarray::{linalg::general_mat_mul, Array1, Array2, ArrayView1, ArrayView2, Axis};

pub struct CodeAt {
    weight: Array2<f32>,
    bias: Array1<f32>,
    code_xform: Array2<f32>,
    code: Array1<f32>,
    weight_corr: Array2<f32>,
    bias_corr: Array1<f32>,
    code_xform_corr: Array2<f32>,
    code_corr: Array1<f32>,
    options: TrainOptions,
    updates: UpdateFlags,
}

impl CodeAt {
    /// Random weights and transform, zero code.
    pub fn new(input_dim: usize, output_dim: usize, code_dim: usize, seed: u64) -> Self {
        let range = 1.0 / (input_dim.max(1) as f32).sqrt();
        Self::build(
            random_matrix(output_dim, input_dim, range, seed),
            random_vector(output_dim, range, seed.wrapping_add(1)),
            random_matrix(output_dim, code_dim, range, seed.wrapping_add(2)),
            Array1::zeros(code_dim),
        )
    }

    pub fn from_parts(
        weight: Array2<f32>,
        bias: Array1<f32>,
        code_xform: Array2<f32>,
        code: Array1<f32>,
    ) -> Result<Self> {
        if bias.len() != weight.nrows() {
            return Err(CodeatError::ShapeMismatch {
                context: "codeat bias",
                expected: vec![weight.nrows()],
                actual: vec![bias.len()],
            });
        }
        check_shape(
            "codeat code transform",
            code_xform.dim(),
            (weight.nrows(), code.len()),
        )?;
        Ok(Self::build(weight, bias, code_xform, code))
    }

    fn build(
        weight: Array2<f32>,
        bias: Array1<f32>,
        code_xform: Array2<f32>,
        code: Array1<f32>,
    ) -> Self {
        Self {
            weight_corr: Array2::zeros(weight.raw_dim()),
            bias_corr: Array1::zeros(bias.raw_dim()),
            code_xform_corr: Array2::zeros(code_xform.raw_dim()),
            code_corr: Array1::zeros(code.raw_dim()),
            weight,
            bias,
            code_xform,
            code,
            options: TrainOptions::default(),
            updates: UpdateFlags::none(),
        }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub fn code_xform(&self) -> &Array2<f32> {
        &self.code_xform
    }

    pub fn updates(&self) -> UpdateFlags {
        self.updates
    }
}

impl Component for CodeAt {
    fn kind(&self) -> &'static str {
        "codeat"
    }

    fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    fn propagate(&self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        check_shape(
            "codeat input",
            input.dim(),
            (input.nrows(), self.input_dim()),
        )?;
        ensure_shape(out, input.nrows(), self.output_dim());
        general_mat_mul(1.0, &input, &self.weight.t(), 0.0, out);
        let code_bias = &self.bias + &self.code_xform.dot(&self.code);
        *out += &code_bias;
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
            "codeat error",
            out_diff.dim(),
            (input.nrows(), self.output_dim()),
        )?;
        ensure_shape(in_diff, input.nrows(), self.input_dim());
        general_mat_mul(1.0, &out_diff, &self.weight, 0.0, in_diff);

        // every frame of the bunch shares the code, so its gradient only
        // needs the column sums of the error
        let diff_sum = out_diff.sum_axis(Axis(0));
        let code_grad = diff_sum.dot(&self.code_xform);
        let momentum = self.options.momentum;
        self.code_corr
            .zip_mut_with(&code_grad, |c, &g| *c = momentum * *c + g);

        if !update {
            return Ok(());
        }
        let frames = input.nrows();
        if self.updates.code_xform {
            let xform_grad = diff_sum
                .view()
                .insert_axis(Axis(1))
                .dot(&self.code.view().insert_axis(Axis(0)));
            sgd_step(
                &mut self.code_xform,
                &mut self.code_xform_corr,
                &xform_grad,
                &self.options,
                frames,
            );
        }
        if self.updates.weights {
            let weight_grad = out_diff.t().dot(&input);
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
                &diff_sum,
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
        AdaptiveLayer::configure_updates(self, flags);
    }

    fn to_record(&self) -> ComponentRecord {
        ComponentRecord::CodeAt {
            weight: to_rows(&self.weight),
            bias: self.bias.to_vec(),
            code_xform: to_rows(&self.code_xform),
            code: self.code.to_vec(),
        }
    }

    fn as_adaptive(&self) -> Option<&dyn AdaptiveLayer> {
        Some(self)
    }

    fn as_adaptive_mut(&mut self) -> Option<&mut dyn AdaptiveLayer> {
        Some(self)
    }
}

impl AdaptiveLayer for CodeAt {
    fn code_dim(&self) -> usize {
        self.code.len()
    }

    fn set_code(&mut self, code: ArrayView1<f32>) -> Result<()> {
        if code.len() != self.code_dim() {
            return Err(CodeatError::ShapeMismatch {
                context: "codeat code",
                expected: vec![self.code_dim()],
                actual: vec![code.len()],
            });
        }
        self.code.assign(&code);
        Ok(())
    }

    fn code(&self) -> ArrayView1<f32> {
        self.code.view()
    }

    fn zero_code_gradient(&mut self) {
        self.code_corr.fill(0.0);
    }

    fn code_gradient(&self) -> ArrayView1<f32> {
        self.code_corr.view()
    }

    fn update_code(&mut self, gradient: ArrayView1<f32>) -> Result<()> {
        if gradient.len() != self.code_dim() {
            return Err(CodeatError::ShapeMismatch {
                context: "codeat code gradient",
                expected: vec![self.code_dim()],
                actual: vec![gradient.len()],
            });
        }
        if self.updates.code_vec {
            self.code.scaled_add(-self.options.learn_rate, &gradient);
        }
        Ok(())
    }

    fn configure_updates(&mut self, flags: UpdateFlags) {
        self.updates = flags;
    }
}

use crate::{
    component::{Component, ComponentRecord},
    matrix::{check_shape, ensure_shape},
    Result,
};
use ndarray::{Array2, ArrayView2, Axis, Zip};

pub struct Sigmoid {
    dim: usize,
}

impl Sigmoid {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Component for Sigmoid {
    fn kind(&self) -> &'static str {
        "sigmoid"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        check_shape("sigmoid input", input.dim(), (input.nrows(), self.dim))?;
        ensure_shape(out, input.nrows(), self.dim);
        Zip::from(out)
            .and(&input)
            .for_each(|o, &x| *o = 1.0 / (1.0 + (-x).exp()));
        Ok(())
    }

    fn backpropagate(
        &mut self,
        _input: ArrayView2<f32>,
        output: ArrayView2<f32>,
        out_diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
        _update: bool,
    ) -> Result<()> {
        check_shape("sigmoid error", out_diff.dim(), output.dim())?;
        ensure_shape(in_diff, output.nrows(), self.dim);
        Zip::from(in_diff)
            .and(&output)
            .and(&out_diff)
            .for_each(|d, &y, &e| *d = e * y * (1.0 - y));
        Ok(())
    }

    fn to_record(&self) -> ComponentRecord {
        ComponentRecord::Sigmoid { dim: self.dim }
    }
}

/// Row-wise softmax. Its backward pass hands the error through unchanged: the
/// cross-entropy loss already produces the gradient w.r.t. the pre-softmax
/// activations (`posterior - target`).
pub struct Softmax {
    dim: usize,
}

impl Softmax {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Component for Softmax {
    fn kind(&self) -> &'static str {
        "softmax"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        check_shape("softmax input", input.dim(), (input.nrows(), self.dim))?;
        ensure_shape(out, input.nrows(), self.dim);
        for (mut out_row, in_row) in out.axis_iter_mut(Axis(0)).zip(input.axis_iter(Axis(0))) {
            let max = in_row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            let mut sum = 0.0;
            Zip::from(&mut out_row).and(&in_row).for_each(|o, &x| {
                *o = (x - max).exp();
                sum += *o;
            });
            out_row.mapv_inplace(|o| o / sum);
        }
        Ok(())
    }

    fn backpropagate(
        &mut self,
        _input: ArrayView2<f32>,
        output: ArrayView2<f32>,
        out_diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
        _update: bool,
    ) -> Result<()> {
        check_shape("softmax error", out_diff.dim(), output.dim())?;
        ensure_shape(in_diff, output.nrows(), self.dim);
        in_diff.assign(&out_diff);
        Ok(())
    }

    fn to_record(&self) -> ComponentRecord {
        ComponentRecord::Softmax { dim: self.dim }
    }
}

use crate::{
    matrix::copy_into,
    source::LossFunction,
    CodeatError, Result,
};
use codeat_structs::report::LossReport;
use ndarray::{Array2, ArrayView2, Axis};

/// Floor applied before taking the log of a posterior.
const MIN_POSTERIOR: f32 = 1e-20;

/// Frame-level cross-entropy against integer targets, evaluated on
/// posteriors. The gradient is `posterior - onehot(target)`.
#[derive(Default)]
pub struct Xent {
    report: LossReport,
}

impl Xent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LossFunction for Xent {
    fn evaluate(
        &mut self,
        predictions: ArrayView2<f32>,
        labels: &[usize],
        grad: &mut Array2<f32>,
    ) -> Result<f64> {
        let (frames, classes) = predictions.dim();
        if labels.len() != frames {
            return Err(CodeatError::LabelMismatch {
                frames,
                labels: labels.len(),
            });
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= classes) {
            return Err(CodeatError::LabelOutOfRange { label, classes });
        }
        copy_into(predictions, grad);

        let mut loss = 0.0f64;
        let mut correct = 0u64;
        for ((row, mut grad_row), &label) in predictions
            .axis_iter(Axis(0))
            .zip(grad.axis_iter_mut(Axis(0)))
            .zip(labels)
        {
            loss -= (row[label].max(MIN_POSTERIOR) as f64).ln();
            grad_row[label] -= 1.0;
            let best = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                    if p > best.1 {
                        (i, p)
                    } else {
                        best
                    }
                })
                .0;
            if best == label {
                correct += 1;
            }
        }

        self.report.frames += frames as u64;
        self.report.total_loss += loss;
        self.report.correct_frames += correct;
        Ok(loss)
    }

    fn report(&self) -> LossReport {
        self.report
    }
}

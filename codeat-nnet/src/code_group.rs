use crate::{nnet::Nnet, source::CodeStore, CodeatError, Result};
use ndarray::{Array1, ArrayView1};
use tracing::debug;

/// Owns the code of the group being processed.
///
/// The adaptive layers each hold a copy of it. Copies are pushed explicitly
/// in [`CodeGroupManager::begin_group`] and after every update all of them
/// must be bit-identical to each other.
pub struct CodeGroupManager {
    code_dim: usize,
    num_layers: usize,
    code: Array1<f32>,
    current: Option<String>,
}

impl CodeGroupManager {
    /// Fails when `nnet` has no adaptive layer or when they disagree on the
    /// code dimension.
    pub fn new(nnet: &Nnet) -> Result<Self> {
        let mut code_dim = None;
        let mut num_layers = 0;
        for (layer, adaptive) in nnet.adaptive_layers().iter().zip(nnet.adaptive_iter()) {
            match code_dim {
                None => code_dim = Some(adaptive.code_dim()),
                Some(expected) if expected != adaptive.code_dim() => {
                    return Err(CodeatError::InconsistentCodeDim {
                        layer: *layer,
                        expected,
                        actual: adaptive.code_dim(),
                    })
                }
                Some(_) => {}
            }
            num_layers += 1;
        }
        let code_dim = code_dim.ok_or(CodeatError::NoAdaptiveLayers)?;
        Ok(Self {
            code_dim,
            num_layers,
            code: Array1::zeros(code_dim),
            current: None,
        })
    }

    pub fn code_dim(&self) -> usize {
        self.code_dim
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn code(&self) -> ArrayView1<f32> {
        self.code.view()
    }

    pub fn current_group(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Loads the code of `key`, copies it into every adaptive layer and zeroes
    /// their gradient accumulators so nothing carries over from the previous
    /// group.
    pub fn begin_group(
        &mut self,
        key: &str,
        nnet: &mut Nnet,
        codes: &dyn CodeStore,
    ) -> Result<Array1<f32>> {
        if !codes.has_key(key) {
            return Err(CodeatError::MissingCode(key.to_string()));
        }
        let code = codes.read(key)?;
        if code.len() != self.code_dim {
            return Err(CodeatError::CodeDimMismatch {
                key: key.to_string(),
                expected: self.code_dim,
                actual: code.len(),
            });
        }
        for layer in nnet.adaptive_iter_mut() {
            layer.set_code(code.view())?;
            layer.zero_code_gradient();
        }
        self.code.assign(&code);
        self.current = Some(key.to_string());
        Ok(code)
    }

    /// Mean of the per-layer code gradients, so each layer has the same
    /// weight on the shared code however many layers share it.
    pub fn aggregate_gradient(&self, nnet: &Nnet) -> Array1<f32> {
        let mut gradient = Array1::zeros(self.code_dim);
        let mut layers = 0;
        for layer in nnet.adaptive_iter() {
            gradient += &layer.code_gradient();
            layers += 1;
        }
        if layers > 0 {
            gradient *= 1.0 / layers as f32;
        }
        gradient
    }

    /// Hands the same aggregated gradient to every layer and re-reads the
    /// resulting code.
    pub fn apply_update(&mut self, nnet: &mut Nnet, gradient: ArrayView1<f32>) -> Result<()> {
        for layer in nnet.adaptive_iter_mut() {
            layer.update_code(gradient)?;
        }
        self.sync_from_layers(nnet)
    }

    /// Finishes the current group. With a store, the code is read back from
    /// the layers and written under `key`; returns whether it was written.
    pub fn end_group<'s>(
        &mut self,
        key: &str,
        nnet: &Nnet,
        store: Option<&mut (dyn CodeStore + 's)>,
        allow_overwrite: bool,
    ) -> Result<bool> {
        if let Some(current) = self.current.as_deref() {
            if current != key {
                return Err(CodeatError::InvalidConfig(format!(
                    "group {} ended while group {} is active",
                    key, current
                )));
            }
        }
        self.current = None;
        let Some(store) = store else {
            return Ok(false);
        };
        self.sync_from_layers(nnet)?;
        if store.has_key(key) && !allow_overwrite {
            return Err(CodeatError::DuplicateKey(key.to_string()));
        }
        store.write(key, self.code.view())?;
        debug!("Wrote code for group {}", key);
        Ok(true)
    }

    fn sync_from_layers(&mut self, nnet: &Nnet) -> Result<()> {
        let mut layers = nnet.adaptive_layers().iter().zip(nnet.adaptive_iter());
        let Some((&reference, first)) = layers.next() else {
            return Err(CodeatError::NoAdaptiveLayers);
        };
        let first = first.code();
        if first.len() != self.code_dim {
            return Err(CodeatError::InconsistentCodeDim {
                layer: reference,
                expected: self.code_dim,
                actual: first.len(),
            });
        }
        for (&layer, other) in layers {
            let identical = other
                .code()
                .iter()
                .zip(first.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits());
            if !identical || other.code_dim() != first.len() {
                return Err(CodeatError::MirrorDivergence { layer, reference });
            }
        }
        self.code.assign(&first);
        Ok(())
    }
}

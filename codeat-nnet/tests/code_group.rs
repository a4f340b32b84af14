use codeat_nnet::{
    AdaptiveLayer, CodeAt, CodeGroupManager, CodeStore, CodeatError, Component, ComponentRecord,
    MemoryCodes, Nnet, Result, Sigmoid,
};
use codeat_structs::config::{TrainOptions, UpdateFlags};
use ndarray::{array, Array1, Array2, ArrayView1, ArrayView2};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Adaptive layer with a fixed code gradient; counts the updates it receives.
struct FixedGradLayer {
    dim: usize,
    code: Array1<f32>,
    gradient: Array1<f32>,
    step: f32,
    updates: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl FixedGradLayer {
    fn new(dim: usize, gradient: Array1<f32>) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let updates = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        (
            Self {
                dim,
                code: Array1::zeros(gradient.len()),
                gradient,
                step: 1.0,
                updates: updates.clone(),
                resets: resets.clone(),
            },
            updates,
            resets,
        )
    }
}

impl Component for FixedGradLayer {
    fn kind(&self) -> &'static str {
        "fixed_grad"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        *out = input.to_owned();
        Ok(())
    }

    fn backpropagate(
        &mut self,
        _input: ArrayView2<f32>,
        _output: ArrayView2<f32>,
        out_diff: ArrayView2<f32>,
        in_diff: &mut Array2<f32>,
        _update: bool,
    ) -> Result<()> {
        *in_diff = out_diff.to_owned();
        Ok(())
    }

    fn to_record(&self) -> ComponentRecord {
        ComponentRecord::Sigmoid { dim: self.dim }
    }

    fn as_adaptive(&self) -> Option<&dyn AdaptiveLayer> {
        Some(self)
    }

    fn as_adaptive_mut(&mut self) -> Option<&mut dyn AdaptiveLayer> {
        Some(self)
    }
}

impl AdaptiveLayer for FixedGradLayer {
    fn code_dim(&self) -> usize {
        self.code.len()
    }

    fn set_code(&mut self, code: ArrayView1<f32>) -> Result<()> {
        self.code.assign(&code);
        Ok(())
    }

    fn code(&self) -> ArrayView1<f32> {
        self.code.view()
    }

    fn zero_code_gradient(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn code_gradient(&self) -> ArrayView1<f32> {
        self.gradient.view()
    }

    fn update_code(&mut self, gradient: ArrayView1<f32>) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.code.scaled_add(-self.step, &gradient);
        Ok(())
    }

    fn configure_updates(&mut self, _flags: UpdateFlags) {}
}

fn codes(entries: &[(&str, Array1<f32>)]) -> MemoryCodes {
    let mut codes = MemoryCodes::new();
    for (key, code) in entries {
        codes.insert(key, code.clone());
    }
    codes
}

#[test]
fn test_requires_adaptive_layers() {
    let nnet = Nnet::new(vec![Box::new(Sigmoid::new(3))]).unwrap();
    assert!(matches!(
        CodeGroupManager::new(&nnet),
        Err(CodeatError::NoAdaptiveLayers)
    ));
}

#[test]
fn test_rejects_inconsistent_code_dims() {
    let nnet = Nnet::new(vec![
        Box::new(CodeAt::new(3, 3, 2, 1)),
        Box::new(Sigmoid::new(3)),
        Box::new(CodeAt::new(3, 3, 4, 2)),
    ])
    .unwrap();
    assert!(matches!(
        CodeGroupManager::new(&nnet),
        Err(CodeatError::InconsistentCodeDim {
            layer: 2,
            expected: 2,
            actual: 4
        })
    ));
}

#[test]
fn test_begin_group_loads_code_into_every_layer() {
    let mut nnet = Nnet::new(vec![
        Box::new(CodeAt::new(3, 3, 2, 1)),
        Box::new(Sigmoid::new(3)),
        Box::new(CodeAt::new(3, 3, 2, 2)),
    ])
    .unwrap();
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    assert_eq!(manager.code_dim(), 2);
    assert_eq!(manager.num_layers(), 2);
    assert_eq!(nnet.adaptive_layers(), &[0, 2]);

    let store = codes(&[("spk1", array![0.5, -1.0])]);
    let code = manager.begin_group("spk1", &mut nnet, &store).unwrap();
    assert_eq!(code, array![0.5f32, -1.0]);
    assert_eq!(manager.current_group(), Some("spk1"));
    for layer in nnet.adaptive_iter() {
        assert_eq!(layer.code(), array![0.5f32, -1.0]);
        assert!(layer.code_gradient().iter().all(|&g| g == 0.0));
    }
}

#[test]
fn test_missing_and_mismatched_codes_are_fatal() {
    let mut nnet = Nnet::new(vec![Box::new(CodeAt::new(3, 3, 2, 1))]).unwrap();
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    let store = codes(&[("short", array![1.0])]);
    assert!(matches!(
        manager.begin_group("absent", &mut nnet, &store),
        Err(CodeatError::MissingCode(key)) if key == "absent"
    ));
    assert!(matches!(
        manager.begin_group("short", &mut nnet, &store),
        Err(CodeatError::CodeDimMismatch {
            expected: 2,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn test_aggregate_is_mean_of_layer_gradients() {
    let (a, _, _) = FixedGradLayer::new(2, array![1.0, 4.0]);
    let (b, _, _) = FixedGradLayer::new(2, array![3.0, 0.0]);
    let nnet = Nnet::new(vec![Box::new(a), Box::new(b)]).unwrap();
    let manager = CodeGroupManager::new(&nnet).unwrap();
    assert_eq!(manager.aggregate_gradient(&nnet), array![2.0f32, 2.0]);
}

#[test]
fn test_every_layer_receives_the_same_update() {
    let (a, updates_a, resets_a) = FixedGradLayer::new(2, array![1.0, 4.0]);
    let (b, updates_b, resets_b) = FixedGradLayer::new(2, array![3.0, 0.0]);
    let mut nnet = Nnet::new(vec![Box::new(a), Box::new(b)]).unwrap();
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    let store = codes(&[("g", array![10.0, 10.0])]);
    manager.begin_group("g", &mut nnet, &store).unwrap();
    assert_eq!(resets_a.load(Ordering::SeqCst), 1);
    assert_eq!(resets_b.load(Ordering::SeqCst), 1);

    let gradient = manager.aggregate_gradient(&nnet);
    manager.apply_update(&mut nnet, gradient.view()).unwrap();
    assert_eq!(updates_a.load(Ordering::SeqCst), 1);
    assert_eq!(updates_b.load(Ordering::SeqCst), 1);
    assert_eq!(manager.code(), array![8.0f32, 8.0]);
    for layer in nnet.adaptive_iter() {
        assert_eq!(layer.code(), manager.code());
    }
}

#[test]
fn test_diverging_mirrors_are_detected() {
    let (a, _, _) = FixedGradLayer::new(2, array![1.0, 1.0]);
    let (mut b, _, _) = FixedGradLayer::new(2, array![1.0, 1.0]);
    b.step = 0.5;
    let mut nnet = Nnet::new(vec![Box::new(a), Box::new(b)]).unwrap();
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    let store = codes(&[("g", array![0.0, 0.0])]);
    manager.begin_group("g", &mut nnet, &store).unwrap();
    let gradient = manager.aggregate_gradient(&nnet);
    assert!(matches!(
        manager.apply_update(&mut nnet, gradient.view()),
        Err(CodeatError::MirrorDivergence {
            layer: 1,
            reference: 0
        })
    ));
}

#[test]
fn test_end_group_persists_code() {
    let mut nnet = Nnet::new(vec![Box::new(CodeAt::new(3, 3, 2, 1))]).unwrap();
    nnet.configure_updates(UpdateFlags::new(false, false, true));
    nnet.set_train_options(TrainOptions {
        learn_rate: 0.5,
        momentum: 0.0,
        l2_penalty: 0.0,
    });
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    let store = codes(&[("g", array![1.0, 1.0])]);
    manager.begin_group("g", &mut nnet, &store).unwrap();
    manager
        .apply_update(&mut nnet, array![2.0, -2.0].view())
        .unwrap();

    let mut out = MemoryCodes::new();
    let written = manager
        .end_group("g", &nnet, Some(&mut out as &mut dyn CodeStore), false)
        .unwrap();
    assert!(written);
    assert_eq!(manager.current_group(), None);
    assert_eq!(out.get("g"), Some(&array![0.0f32, 2.0]));
}

#[test]
fn test_end_group_without_store_writes_nothing() {
    let mut nnet = Nnet::new(vec![Box::new(CodeAt::new(3, 3, 2, 1))]).unwrap();
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    let store = codes(&[("g", array![1.0, 1.0])]);
    manager.begin_group("g", &mut nnet, &store).unwrap();
    assert!(!manager.end_group("g", &nnet, None, false).unwrap());
}

#[test]
fn test_duplicate_output_key_is_fatal() {
    let mut nnet = Nnet::new(vec![Box::new(CodeAt::new(3, 3, 2, 1))]).unwrap();
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    let store = codes(&[("g", array![1.0, 1.0])]);
    let mut out = codes(&[("g", array![9.0, 9.0])]);

    manager.begin_group("g", &mut nnet, &store).unwrap();
    assert!(matches!(
        manager.end_group("g", &nnet, Some(&mut out as &mut dyn CodeStore), false),
        Err(CodeatError::DuplicateKey(key)) if key == "g"
    ));

    manager.begin_group("g", &mut nnet, &store).unwrap();
    assert!(manager
        .end_group("g", &nnet, Some(&mut out as &mut dyn CodeStore), true)
        .unwrap());
    assert_eq!(out.get("g"), Some(&array![1.0f32, 1.0]));
}

#[test]
fn test_gradient_accumulator_resets_between_groups() {
    let mut nnet = Nnet::new(vec![Box::new(CodeAt::from_parts(
        array![[1.0, 0.0], [0.0, 1.0]],
        array![0.0, 0.0],
        array![[1.0], [2.0]],
        array![0.0],
    )
    .unwrap())])
    .unwrap();
    nnet.set_train_options(TrainOptions {
        learn_rate: 0.1,
        momentum: 0.5,
        l2_penalty: 0.0,
    });
    let mut manager = CodeGroupManager::new(&nnet).unwrap();
    let store = codes(&[("a", array![0.0]), ("b", array![0.0])]);

    let input = array![[1.0f32, 1.0]];
    let mut out = Array2::zeros((0, 0));
    let mut in_diff = Array2::zeros((0, 0));
    manager.begin_group("a", &mut nnet, &store).unwrap();
    nnet.propagate(input.view(), &mut out).unwrap();
    nnet.backpropagate(array![[1.0f32, 1.0]].view(), &mut in_diff)
        .unwrap();
    // colsum(out_diff) · U = 1 + 2
    assert_eq!(manager.aggregate_gradient(&nnet), array![3.0f32]);
    nnet.backpropagate(array![[1.0f32, 1.0]].view(), &mut in_diff)
        .unwrap();
    // momentum folds the previous bunch in
    assert_eq!(manager.aggregate_gradient(&nnet), array![4.5f32]);
    manager.end_group("a", &nnet, None, false).unwrap();

    manager.begin_group("b", &mut nnet, &store).unwrap();
    assert_eq!(manager.aggregate_gradient(&nnet), array![0.0f32]);
    nnet.backpropagate(array![[1.0f32, 1.0]].view(), &mut in_diff)
        .unwrap();
    assert_eq!(manager.aggregate_gradient(&nnet), array![3.0f32]);
}

use codeat_nnet::{
    Affine, CodeAt, CodeatError, Component, ComponentRecord, FixedTransform, Frozen,
    FrozenBackend, Nnet, NnetRecord, Sigmoid, Softmax,
};
use codeat_structs::config::{TrainOptions, UpdateFlags};
use ndarray::{array, Array2};

fn stack() -> Nnet {
    Nnet::new(vec![
        Box::new(Affine::new(2, 4, 1)),
        Box::new(Sigmoid::new(4)),
        Box::new(CodeAt::new(4, 3, 2, 2)),
        Box::new(Sigmoid::new(3)),
        Box::new(CodeAt::new(3, 3, 2, 3)),
        Box::new(Softmax::new(3)),
    ])
    .unwrap()
}

#[test]
fn test_adaptive_layers_indexed_once() {
    let nnet = stack();
    assert_eq!(nnet.num_components(), 6);
    assert_eq!(nnet.adaptive_layers(), &[2, 4]);
    assert_eq!(nnet.adaptive_iter().count(), 2);
    assert_eq!(nnet.input_dim(), Some(2));
    assert_eq!(nnet.output_dim(), Some(3));
    assert_eq!(nnet.component(2).kind(), "codeat");
}

#[test]
fn test_mismatched_components_rejected() {
    let result = Nnet::new(vec![
        Box::new(Affine::new(2, 4, 1)),
        Box::new(Sigmoid::new(3)),
    ]);
    assert!(matches!(
        result,
        Err(CodeatError::ShapeMismatch {
            context: "component dimensions",
            ..
        })
    ));
}

#[test]
fn test_propagate_rejects_wrong_input_width() {
    let mut nnet = stack();
    let mut out = Array2::zeros((0, 0));
    assert!(matches!(
        nnet.propagate(Array2::<f32>::zeros((2, 3)).view(), &mut out),
        Err(CodeatError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let mut nnet = stack();
    let mut out = Array2::zeros((0, 0));
    nnet.propagate(array![[0.1f32, 0.2], [-1.0, 3.0]].view(), &mut out)
        .unwrap();
    assert_eq!(out.dim(), (2, 3));
    for row in out.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_buffers_are_rewritten_for_smaller_bunches() {
    let mut nnet = stack();
    let mut out = Array2::zeros((0, 0));
    nnet.propagate(Array2::<f32>::ones((5, 2)).view(), &mut out)
        .unwrap();
    let single = out.row(0).to_owned();
    nnet.propagate(Array2::<f32>::ones((1, 2)).view(), &mut out)
        .unwrap();
    assert_eq!(out.dim(), (1, 3));
    assert_eq!(out.row(0), single);
}

#[test]
fn test_record_restores_network() {
    let nnet = stack();
    let record = nnet.to_record();
    let json = serde_json::to_string(&record).unwrap();
    assert!(json.contains("\"type\":\"codeat\""));
    let restored = Nnet::from_record(serde_json::from_str::<NnetRecord>(&json).unwrap()).unwrap();
    assert_eq!(restored.to_record(), record);
    assert_eq!(restored.adaptive_layers(), nnet.adaptive_layers());
}

#[test]
fn test_bad_record_rejected() {
    let record = NnetRecord {
        components: vec![ComponentRecord::CodeAt {
            weight: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            bias: vec![0.0, 0.0],
            code_xform: vec![vec![1.0], vec![1.0]],
            code: vec![0.0, 0.0],
        }],
    };
    assert!(matches!(
        Nnet::from_record(record),
        Err(CodeatError::ShapeMismatch {
            context: "codeat code transform",
            ..
        })
    ));
}

#[test]
fn test_frozen_backend_never_changes() {
    let mut inner = Nnet::new(vec![
        Box::new(Affine::new(3, 2, 9)),
        Box::new(Softmax::new(2)),
    ])
    .unwrap();
    inner.set_train_options(TrainOptions {
        learn_rate: 1.0,
        momentum: 0.9,
        l2_penalty: 0.1,
    });
    inner.configure_updates(UpdateFlags::new(true, true, true));
    let before = inner.to_record();

    let mut frozen = Frozen::new(inner);
    let mut out = Array2::zeros((0, 0));
    let mut in_diff = Array2::zeros((0, 0));
    for _ in 0..3 {
        frozen
            .forward(array![[1.0f32, 2.0, 3.0], [0.5, 0.0, -1.0]].view(), &mut out)
            .unwrap();
        frozen
            .backward(array![[0.3f32, -0.3], [-0.2, 0.2]].view(), &mut in_diff)
            .unwrap();
    }
    assert_eq!(in_diff.dim(), (2, 3));
    assert!(in_diff.iter().any(|&d| d != 0.0));
    assert_eq!(frozen.nnet().to_record(), before);
}

#[test]
fn test_trainable_affine_moves() {
    let mut nnet = Nnet::new(vec![Box::new(Affine::from_parts(
        array![[1.0f32, 0.0]],
        array![0.0f32],
    )
    .unwrap())])
    .unwrap();
    nnet.set_train_options(TrainOptions {
        learn_rate: 0.5,
        momentum: 0.0,
        l2_penalty: 0.0,
    });
    let mut out = Array2::zeros((0, 0));
    let mut in_diff = Array2::zeros((0, 0));
    nnet.propagate(array![[2.0f32, 4.0]].view(), &mut out).unwrap();
    nnet.backpropagate(array![[1.0f32]].view(), &mut in_diff)
        .unwrap();
    assert_eq!(in_diff, array![[1.0f32, 0.0]]);
    // w -= 0.5 * [2, 4], b -= 0.5 * 1
    assert_eq!(
        nnet.to_record().components[0],
        ComponentRecord::Affine {
            weight: vec![vec![0.0, -2.0]],
            bias: vec![-0.5],
        }
    );
}

#[test]
fn test_nnet_as_feature_transform() {
    let mut transform = Nnet::new(vec![Box::new(Sigmoid::new(2))]).unwrap();
    let mut out = Array2::zeros((0, 0));
    transform
        .forward(array![[0.0f32, 0.0]].view(), &mut out)
        .unwrap();
    assert_eq!(out, array![[0.5f32, 0.5]]);

    let mut identity = Nnet::empty();
    identity
        .forward(array![[3.0f32, -1.0]].view(), &mut out)
        .unwrap();
    assert_eq!(out, array![[3.0f32, -1.0]]);
}

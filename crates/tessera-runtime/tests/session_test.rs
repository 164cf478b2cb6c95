//! Tests for model loading and top-level execution.

mod common;

use common::*;
use tessera_core::{DataType, Layout, Model, Operand, Subgraph, SubgraphIndex, TensorShape};
use tessera_runtime::{Executor, Runtime, RuntimeError, RuntimeOptions, Tensor};

/// `y = identity(x)` with `x` declared as a static `[2]` tensor.
fn identity_model() -> Model {
    let mut main = Subgraph::new();
    let x = f32_operand(&mut main, "x", &[2]);
    let y = main.add_operand(Operand::new("y", DataType::F32, TensorShape::Unknown));
    add_op(&mut main, "Identity", vec![x], vec![y]);
    main.set_inputs(vec![x]).unwrap();
    main.set_outputs(vec![y]).unwrap();
    Model::new("identity", main)
}

#[test]
fn test_session_names() -> anyhow::Result<()> {
    let (kernels, _logs) = test_kernels();
    let session = Runtime::default().load(loop_model(3.0, 2), &kernels)?;
    assert_eq!(session.input_names(), vec!["x0", "x1"]);
    assert_eq!(session.output_names(), vec!["y0", "y1"]);
    Ok(())
}

#[test]
fn test_input_with_new_shape_becomes_dynamic() {
    init_tracing();
    let (kernels, _logs) = test_kernels();
    let session = Runtime::new(RuntimeOptions { profile: true })
        .load(identity_model(), &kernels)
        .unwrap();

    let outputs = session
        .run(&[("x", Tensor::from_vec(vec![1.0f32, 2.0, 3.0], &[3]))])
        .unwrap();
    assert_eq!(outputs["y"].to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);

    let main = session.executors().require(SubgraphIndex::PRIMARY).unwrap();
    let tensors = main.tensors().unwrap();
    assert!(tensors.get(main.input_tensors()[0]).unwrap().is_dynamic());
}

#[test]
fn test_input_with_declared_shape_stays_static() {
    let (kernels, _logs) = test_kernels();
    let session = Runtime::default()
        .load(identity_model(), &kernels)
        .unwrap();

    session
        .run(&[("x", Tensor::from_vec(vec![1.0f32, 2.0], &[2]))])
        .unwrap();

    let main = session.executors().require(SubgraphIndex::PRIMARY).unwrap();
    let tensors = main.tensors().unwrap();
    assert!(!tensors.get(main.input_tensors()[0]).unwrap().is_dynamic());
}

#[test]
fn test_input_dtype_mismatch() {
    let (kernels, _logs) = test_kernels();
    let session = Runtime::default()
        .load(identity_model(), &kernels)
        .unwrap();

    let result = session.run(&[("x", Tensor::from_vec(vec![1i32, 2], &[2]))]);
    assert!(matches!(result, Err(RuntimeError::DataTypeMismatch { .. })));
}

#[test]
fn test_input_converted_to_declared_layout() {
    let mut main = Subgraph::new();
    let x = main.add_operand(
        Operand::new("x", DataType::F32, TensorShape::Static(vec![1, 2, 1, 2]))
            .with_layout(Layout::Nchw),
    );
    main.set_inputs(vec![x]).unwrap();
    main.set_outputs(vec![x]).unwrap();

    let (kernels, _logs) = test_kernels();
    let session = Runtime::default()
        .load(Model::new("layout", main), &kernels)
        .unwrap();

    // NHWC [1, 1, 2, 2]: pixel 0 = (1, 2), pixel 1 = (3, 4)
    let outputs = session
        .run(&[("x", Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[1, 1, 2, 2]))])
        .unwrap();

    let x = &outputs["x"];
    assert_eq!(x.layout(), Layout::Nchw);
    assert_eq!(x.shape(), &[1, 2, 1, 2]);
    assert_eq!(x.to_vec::<f32>().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
}

#[test]
fn test_missing_kernel_fails_load() {
    let (kernels, _logs) = test_kernels();
    let mut main = Subgraph::new();
    let x = scalar(&mut main, "x");
    let y = scalar(&mut main, "y");
    add_op(&mut main, "MatMul", vec![x], vec![y]);

    let result = Runtime::default()
        .load(Model::new("unsupported", main), &kernels);
    assert!(matches!(result, Err(RuntimeError::UnsupportedOperation(_))));
}

// Executor tests — Checked computations run end-to-end on the CPU backend

use heron::prelude::*;
use heron::MatrixMut;

fn assert_close(got: &[f32], expected: &[f32]) {
    assert_eq!(got.len(), expected.len(), "{got:?} vs {expected:?}");
    for (g, e) in got.iter().zip(expected) {
        assert!((g - e).abs() < 1e-5, "{got:?} vs {expected:?}");
    }
}

// Helper: input(0) -> affine(1) -> relu(2) -> output(3)
//
// W = [[1, 0, -1], [0.5, 0.5, 0.5]], b = [0.5, -1], learning rate 0.1.

fn mlp() -> Nnet<CpuBackend> {
    let weight = cpu_matrix(&[1.0, 0.0, -1.0, 0.5, 0.5, 0.5], 2, 3).unwrap();
    let bias = cpu_matrix(&[0.5, -1.0], 1, 2).unwrap();
    let mut nnet = Nnet::new();
    let affine = nnet
        .add_component(
            "affine",
            Box::new(AffineComponent::from_storage(weight, bias, 0.1).unwrap()),
        )
        .unwrap();
    let relu = nnet
        .add_component("relu", Box::new(NonlinearComponent::relu(2)))
        .unwrap();
    nnet.add_input_node("input").unwrap();
    nnet.add_component_node("affine", affine).unwrap();
    nnet.add_component_node("relu", relu).unwrap();
    nnet.add_output_node("output").unwrap();
    nnet
}

fn mlp_request() -> ComputationRequest {
    ComputationRequest::new(
        vec![IoSpecification::frames("input", 2, true)],
        vec![IoSpecification::frames("output", 2, true)],
    )
    .unwrap()
    .with_model_derivative(true)
}

/// m1 input, m2 affine out, m3 output, m4 output deriv, m5 affine out-deriv,
/// m6 input deriv.
fn mlp_computation() -> Computation {
    let mut c = Computation::new();
    for cols in [3, 2, 2, 2, 2, 3] {
        c.new_matrix(2, cols).unwrap();
    }
    c.bind_input_output(0, 1, Some(6)).unwrap();
    c.bind_input_output(3, 3, Some(4)).unwrap();

    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(Command::Propagate {
        component: 0,
        precomputed: None,
        input: 1,
        output: 2,
    });
    c.add_command(Command::ResizeMatrixUndefined { matrix: 3 });
    c.add_command(Command::Propagate {
        component: 1,
        precomputed: None,
        input: 2,
        output: 3,
    });
    c.add_command(Command::StoreStats {
        component: 1,
        value: 3,
    });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 2 });
    c.add_phase_marker();
    c.add_command(Command::ResizeMatrixUndefined { matrix: 5 });
    c.add_command(Command::Backprop {
        node: 2,
        component: 1,
        precomputed: None,
        in_value: EMPTY_SUBMATRIX,
        out_value: 3,
        out_deriv: 4,
        in_deriv: 5,
    });
    c.add_command(Command::ResizeMatrixUndefined { matrix: 6 });
    c.add_command(Command::Backprop {
        node: 1,
        component: 0,
        precomputed: None,
        in_value: 1,
        out_value: EMPTY_SUBMATRIX,
        out_deriv: 5,
        in_deriv: 6,
    });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 1 });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 4 });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 5 });
    c
}

fn input_features() -> CpuStorage {
    cpu_matrix(&[1.0, 2.0, 3.0, -1.0, 0.0, 1.0], 2, 3).unwrap()
}

// Forward / backward

#[test]
fn test_mlp_passes_checker() {
    let nnet = mlp();
    let c = mlp_computation();
    check_computation(Default::default(), &nnet, &mlp_request(), &c).unwrap();
}

#[test]
fn test_mlp_forward_backward() {
    let nnet = mlp();
    let request = mlp_request();
    let c = mlp_computation();
    let mut target = nnet.clone();
    let mut computer = NnetComputer::new(
        ComputeConfig::default().with_debug(true),
        &c,
        &nnet,
        &request,
        Some(&mut target),
        CpuDevice,
    )
    .unwrap();

    computer.accept_input("input", input_features()).unwrap();
    computer.forward().unwrap();
    assert_eq!(computer.state(), ComputerState::ForwardDone);
    // affine: [[-1.5, 2], [-1.5, -1]]
    let output = computer.get_output("output").unwrap().to_f32_vec().unwrap();
    assert_close(&output, &[0.0, 2.0, 0.0, 0.0]);

    computer
        .accept_output_deriv("output", cpu_matrix(&[1.0; 4], 2, 2).unwrap())
        .unwrap();
    computer.backward().unwrap();
    let in_deriv = computer
        .get_input_deriv("input")
        .unwrap()
        .to_f32_vec()
        .unwrap();
    assert_close(&in_deriv, &[0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);
    // Outputs stay readable after the backward pass.
    assert!(computer.get_output("output").is_ok());
    drop(computer);

    // W += 0.1 * [[0, 0, 0], [1, 2, 3]], b += 0.1 * [0, 1]
    let x = input_features();
    let mut y = cpu_matrix(&[0.0; 4], 2, 2).unwrap();
    target
        .component(0)
        .unwrap()
        .propagate(None, &MatrixRef::whole(&x), &mut MatrixMut::whole(&mut y))
        .unwrap();
    assert_close(y.data(), &[-1.5, 3.5, -1.5, -0.7]);
    // The network the computer read from is untouched.
    nnet.component(0)
        .unwrap()
        .propagate(None, &MatrixRef::whole(&x), &mut MatrixMut::whole(&mut y))
        .unwrap();
    assert_close(y.data(), &[-1.5, 2.0, -1.5, -1.0]);
}

#[test]
fn test_backward_needs_update_target() {
    let nnet = mlp();
    let request = mlp_request();
    let c = mlp_computation();
    let mut computer =
        NnetComputer::new(ComputeConfig::default(), &c, &nnet, &request, None, CpuDevice).unwrap();
    computer.accept_input("input", input_features()).unwrap();
    computer.forward().unwrap();
    computer
        .accept_output_deriv("output", cpu_matrix(&[1.0; 4], 2, 2).unwrap())
        .unwrap();
    assert!(matches!(computer.backward(), Err(Error::Usage(_))));
}

#[test]
fn test_stats_follow_the_request() {
    let nnet = mlp();
    let c = mlp_computation();
    for (wanted, count) in [(false, "count=0"), (true, "count=2")] {
        let request = mlp_request().with_component_stats(wanted);
        let mut target = nnet.clone();
        let mut computer = NnetComputer::new(
            ComputeConfig::default(),
            &c,
            &nnet,
            &request,
            Some(&mut target),
            CpuDevice,
        )
        .unwrap();
        computer.accept_input("input", input_features()).unwrap();
        computer.forward().unwrap();
        drop(computer);
        let info = target.component(1).unwrap().info();
        assert!(info.contains(count), "{info}");
    }
}

// Call order

#[test]
fn test_usage_order() {
    let nnet = mlp();
    let request = mlp_request();
    let c = mlp_computation();
    let mut target = nnet.clone();
    let mut computer = NnetComputer::new(
        ComputeConfig::default(),
        &c,
        &nnet,
        &request,
        Some(&mut target),
        CpuDevice,
    )
    .unwrap();

    assert!(matches!(computer.get_output("output"), Err(Error::Usage(_))));
    assert!(matches!(computer.backward(), Err(Error::Usage(_))));
    // Inputs must be supplied first.
    assert!(matches!(computer.forward(), Err(Error::Usage(_))));
    assert!(matches!(
        computer.accept_input("features", input_features()),
        Err(Error::Usage(_))
    ));
    assert!(matches!(
        computer.accept_input("input", cpu_matrix(&[0.0; 3], 1, 3).unwrap()),
        Err(Error::ShapeMismatch { .. })
    ));

    computer.accept_input("input", input_features()).unwrap();
    computer.forward().unwrap();
    assert!(matches!(computer.forward(), Err(Error::Usage(_))));
    assert!(matches!(
        computer.accept_input("input", input_features()),
        Err(Error::Usage(_))
    ));
    assert!(matches!(
        computer.get_input_deriv("input"),
        Err(Error::Usage(_))
    ));
    assert!(matches!(computer.get_output("input"), Err(Error::Usage(_))));
    // The output derivative was never supplied.
    assert!(matches!(computer.backward(), Err(Error::Usage(_))));
}

// Data movement commands

/// input(0) -> output(1), 4 rows x 2 cols in and out.
fn passthrough() -> (Nnet<CpuBackend>, ComputationRequest) {
    let mut nnet = Nnet::new();
    nnet.add_input_node("input").unwrap();
    nnet.add_output_node("output").unwrap();
    let request = ComputationRequest::new(
        vec![IoSpecification::frames("input", 4, false)],
        vec![IoSpecification::frames("output", 4, false)],
    )
    .unwrap();
    (nnet, request)
}

fn run_forward(nnet: &Nnet<CpuBackend>, request: &ComputationRequest, c: &Computation) -> Vec<f32> {
    let config = CheckComputationConfig::default().with_rewrite_check(false);
    check_computation(config, nnet, request, c).unwrap();
    let mut computer =
        NnetComputer::new(ComputeConfig::default(), c, nnet, request, None, CpuDevice).unwrap();
    let input = cpu_matrix(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 4, 2).unwrap();
    computer.accept_input("input", input).unwrap();
    computer.forward().unwrap();
    computer.get_output("output").unwrap().to_f32_vec().unwrap()
}

fn bound_pair() -> Computation {
    let mut c = Computation::new();
    c.new_matrix(4, 2).unwrap();
    c.new_matrix(4, 2).unwrap();
    c.bind_input_output(0, 1, None).unwrap();
    c.bind_input_output(1, 2, None).unwrap();
    c
}

fn finish(c: &mut Computation) {
    c.add_phase_marker();
    c.add_command(Command::ResizeMatrixEmpty { matrix: 1 });
}

#[test]
fn test_copy_rows_and_add_rows() {
    let (nnet, request) = passthrough();
    let mut c = bound_pair();
    let reverse = c.add_indexes(vec![Some(3), Some(2), None, Some(0)]);
    let first = c.add_indexes(vec![Some(0), None, None, Some(0)]);
    c.add_command(Command::ResizeMatrixZeroed { matrix: 2 });
    c.add_command(Command::CopyRows {
        dst: 2,
        src: 1,
        indexes: reverse,
    });
    c.add_command(Command::AddRows {
        dst: 2,
        src: 1,
        indexes: first,
    });
    finish(&mut c);
    let out = run_forward(&nnet, &request, &c);
    assert_eq!(out, vec![8.0, 10.0, 5.0, 6.0, 0.0, 0.0, 2.0, 4.0]);
}

#[test]
fn test_multi_row_gather_and_scatter() {
    let (nnet, request) = passthrough();
    let mut c = bound_pair();
    let top = c.new_submatrix(1, 0, 2, 0, 2).unwrap();
    let bottom = c.new_submatrix(1, 2, 2, 0, 2).unwrap();
    let out_top = c.new_submatrix(2, 0, 2, 0, 2).unwrap();
    let gather = c.add_indexes_multi(vec![
        Some((bottom, 1)),
        None,
        Some((top, 0)),
        Some((bottom, 0)),
    ]);
    let scatter = c.add_indexes_multi(vec![None, Some((out_top, 0))]);
    c.add_command(Command::ResizeMatrixZeroed { matrix: 2 });
    c.add_command(Command::CopyRowsMulti {
        dst: 2,
        indexes_multi: gather,
    });
    // out[0] += input[1]
    c.add_command(Command::AddToRowsMulti {
        src: top,
        indexes_multi: scatter,
    });
    finish(&mut c);
    let out = run_forward(&nnet, &request, &c);
    assert_eq!(out, vec![10.0, 12.0, 0.0, 0.0, 1.0, 2.0, 5.0, 6.0]);
}

#[test]
fn test_scatter_into_overlapping_view_reads_old_rows() {
    let (nnet, request) = passthrough();
    for (copy, expected) in [
        (true, [1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        (false, [1.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0]),
    ] {
        let mut c = bound_pair();
        let upper = c.new_submatrix(2, 0, 3, 0, 2).unwrap();
        let lower = c.new_submatrix(2, 1, 3, 0, 2).unwrap();
        let shift = c.add_indexes_multi(vec![Some((lower, 0)), Some((lower, 1)), Some((lower, 2))]);
        c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
        c.add_command(Command::MatrixCopy { dst: 2, src: 1 });
        c.add_command(if copy {
            Command::CopyToRowsMulti {
                src: upper,
                indexes_multi: shift,
            }
        } else {
            Command::AddToRowsMulti {
                src: upper,
                indexes_multi: shift,
            }
        });
        finish(&mut c);
        let out = run_forward(&nnet, &request, &c);
        assert_eq!(out, expected, "copy = {copy}");
    }
}

#[test]
fn test_add_row_ranges() {
    let (nnet, request) = passthrough();
    let mut c = bound_pair();
    let ranges = c.add_indexes_ranges(vec![(0, 4), (1, 1), (2, 4), (3, 4)]);
    c.add_command(Command::ResizeMatrixZeroed { matrix: 2 });
    c.add_command(Command::AddRowRanges {
        dst: 2,
        src: 1,
        indexes_ranges: ranges,
    });
    finish(&mut c);
    let out = run_forward(&nnet, &request, &c);
    assert_eq!(out, vec![16.0, 20.0, 0.0, 0.0, 12.0, 14.0, 7.0, 8.0]);
}

#[test]
fn test_copy_between_views_of_one_matrix() {
    let (nnet, request) = passthrough();
    let mut c = bound_pair();
    let left = c.new_column_submatrix(2, 0, 1).unwrap();
    let right = c.new_column_submatrix(2, 1, 1).unwrap();
    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(Command::MatrixCopy { dst: 2, src: 1 });
    c.add_command(Command::MatrixCopy {
        dst: left,
        src: right,
    });
    c.add_command(Command::MatrixAdd {
        dst: right,
        src: left,
    });
    finish(&mut c);
    let out = run_forward(&nnet, &request, &c);
    assert_eq!(out, vec![2.0, 4.0, 4.0, 8.0, 6.0, 12.0, 8.0, 16.0]);
}

// Components with special operands

#[test]
fn test_in_place_relu() {
    let mut nnet = Nnet::<CpuBackend>::new();
    let relu = nnet
        .add_component("relu", Box::new(NonlinearComponent::relu(2)))
        .unwrap();
    nnet.add_input_node("input").unwrap();
    nnet.add_component_node("relu", relu).unwrap();
    nnet.add_output_node("output").unwrap();
    let request = ComputationRequest::new(
        vec![IoSpecification::frames("input", 2, false)],
        vec![IoSpecification::frames("output", 2, false)],
    )
    .unwrap();

    let mut c = Computation::new();
    c.new_matrix(2, 2).unwrap();
    c.new_matrix(2, 2).unwrap();
    c.bind_input_output(0, 1, None).unwrap();
    c.bind_input_output(2, 2, None).unwrap();
    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(Command::MatrixCopy { dst: 2, src: 1 });
    c.add_command(Command::Propagate {
        component: relu,
        precomputed: None,
        input: 2,
        output: 2,
    });
    finish(&mut c);

    check_computation(Default::default(), &nnet, &request, &c).unwrap();

    let mut computer =
        NnetComputer::new(ComputeConfig::default(), &c, &nnet, &request, None, CpuDevice).unwrap();
    computer
        .accept_input("input", cpu_matrix(&[-1.0, 2.0, 3.0, -4.0], 2, 2).unwrap())
        .unwrap();
    computer.forward().unwrap();
    let out = computer.get_output("output").unwrap().to_f32_vec().unwrap();
    assert_eq!(out, vec![0.0, 2.0, 3.0, 0.0]);
}

#[test]
fn test_row_select_with_precomputed_indexes() {
    let mut nnet = Nnet::<CpuBackend>::new();
    let select = nnet
        .add_component("select", Box::new(RowSelectComponent::new(2)))
        .unwrap();
    nnet.add_input_node("input").unwrap();
    nnet.add_component_node("select", select).unwrap();
    nnet.add_output_node("output").unwrap();
    let request = ComputationRequest::new(
        vec![IoSpecification::frames("input", 4, false)],
        vec![IoSpecification::frames("output", 2, false)],
    )
    .unwrap();

    let mut c = Computation::new();
    c.new_matrix(4, 2).unwrap();
    c.new_matrix(2, 2).unwrap();
    c.bind_input_output(0, 1, None).unwrap();
    c.bind_input_output(2, 2, None).unwrap();
    let rows = c.add_precomputed_indexes(PrecomputedIndexes::new(vec![3, 1]));
    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(Command::Propagate {
        component: select,
        precomputed: Some(rows),
        input: 1,
        output: 2,
    });
    finish(&mut c);
    check_computation(Default::default(), &nnet, &request, &c).unwrap();

    let mut computer =
        NnetComputer::new(ComputeConfig::default(), &c, &nnet, &request, None, CpuDevice).unwrap();
    let input = cpu_matrix(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 4, 2).unwrap();
    computer.accept_input("input", input).unwrap();
    computer.forward().unwrap();
    let out = computer.get_output("output").unwrap().to_f32_vec().unwrap();
    assert_eq!(out, vec![7.0, 8.0, 3.0, 4.0]);
}

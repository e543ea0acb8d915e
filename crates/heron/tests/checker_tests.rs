// Checker tests — Hand-built computations accepted or rejected end-to-end

use heron::ir::{AccessType, Analyzer, Computation};
use heron::prelude::*;

// Helper: input(0) -> relu(1) -> output(2), `dim` wide

fn relu_nnet(dim: usize) -> Nnet<CpuBackend> {
    let mut nnet = Nnet::new();
    let relu = nnet
        .add_component("relu", Box::new(NonlinearComponent::relu(dim)))
        .unwrap();
    nnet.add_input_node("input").unwrap();
    nnet.add_component_node("relu", relu).unwrap();
    nnet.add_output_node("output").unwrap();
    nnet
}

fn request(rows: usize) -> ComputationRequest {
    ComputationRequest::new(
        vec![IoSpecification::frames("input", rows, false)],
        vec![IoSpecification::frames("output", rows, false)],
    )
    .unwrap()
}

fn relu(input: usize, output: usize) -> Command {
    Command::Propagate {
        component: 0,
        precomputed: None,
        input,
        output,
    }
}

fn check(nnet: &Nnet<CpuBackend>, rows: usize, c: &Computation) -> Result<()> {
    check_computation(CheckComputationConfig::default(), nnet, &request(rows), c)
}

/// m1 = input (10x5), m2 = output (10x5), m3 = scratch (10x5).
fn three_matrices() -> Computation {
    let mut c = Computation::new();
    for _ in 0..3 {
        c.new_matrix(10, 5).unwrap();
    }
    c.bind_input_output(0, 1, None).unwrap();
    c.bind_input_output(2, 2, None).unwrap();
    c
}

// Scenario A: allocate, overwrite from the input, read, deallocate

fn scenario_a() -> Computation {
    let mut c = three_matrices();
    c.add_command(Command::ResizeMatrixUndefined { matrix: 3 });
    c.add_command(Command::MatrixCopy { dst: 3, src: 1 });
    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(relu(3, 2));
    c.add_phase_marker();
    c.add_command(Command::ResizeMatrixEmpty { matrix: 3 });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 1 });
    c
}

#[test]
fn test_scenario_a_accepted() {
    let nnet = relu_nnet(5);
    let c = scenario_a();
    check(&nnet, 10, &c).unwrap();

    let analyzer = Analyzer::new(&nnet, &c).unwrap();
    let scratch = &analyzer.matrix_accesses[3];
    assert_eq!(scratch.allocate_command, Some(0));
    assert_eq!(scratch.deallocate_command, Some(5));
    assert_eq!(scratch.accesses, vec![1, 3]);
}

// Scenario B: the read happens before the allocation

#[test]
fn test_scenario_b_use_before_allocation() {
    let nnet = relu_nnet(5);
    let mut c = three_matrices();
    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(relu(3, 2));
    c.add_command(Command::ResizeMatrixUndefined { matrix: 3 });
    c.add_command(Command::MatrixCopy { dst: 3, src: 1 });
    c.add_phase_marker();
    c.add_command(Command::ResizeMatrixEmpty { matrix: 3 });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 1 });

    match check(&nnet, 10, &c) {
        Err(Error::Lifecycle { matrix, .. }) => assert_eq!(matrix, 3),
        other => panic!("expected lifecycle violation, got {other:?}"),
    }
}

// Scenario C: columns [2,4) written, columns [0,2) read unwritten

#[test]
fn test_scenario_c_partial_write() {
    let nnet = relu_nnet(2);
    let mut c = Computation::new();
    let input = c.new_matrix(10, 2).unwrap();
    let output = c.new_matrix(10, 2).unwrap();
    c.new_matrix(10, 5).unwrap();
    let written = c.new_column_submatrix(3, 2, 2).unwrap();
    let unwritten = c.new_column_submatrix(3, 0, 2).unwrap();
    c.bind_input_output(0, 1, None).unwrap();
    c.bind_input_output(2, 2, None).unwrap();

    c.add_command(Command::ResizeMatrixUndefined { matrix: 3 });
    c.add_command(Command::MatrixCopy {
        dst: written,
        src: input,
    });
    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(relu(unwritten, output));
    c.add_phase_marker();
    c.add_command(Command::ResizeMatrixEmpty { matrix: 1 });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 3 });

    let analyzer = Analyzer::new(&nnet, &c).unwrap();
    let vars = &analyzer.variables;
    assert_eq!(vars.split_points(3), &[0, 2, 4, 5]);
    let unwritten_var = vars.variables_for_submatrix(unwritten).start;
    let written_var = vars.variables_for_submatrix(written).start;
    assert_eq!(
        analyzer.variable_accesses[written_var].accesses[0].access_type,
        AccessType::Write
    );

    match check(&nnet, 10, &c) {
        Err(Error::Undefined {
            variable,
            matrix,
            msg,
        }) => {
            assert_eq!(variable, unwritten_var);
            assert_ne!(variable, written_var);
            assert_eq!(matrix, 3);
            assert!(msg.contains("before it is written to"), "{msg}");
        }
        other => panic!("expected definedness violation, got {other:?}"),
    }
}

// Scenario D: a gather with an absent row keeps the old destination rows

#[test]
fn test_scenario_d_gather_with_absent_row() {
    let nnet = relu_nnet(5);
    let mut c = three_matrices();
    let mut rows: Vec<Option<usize>> = (0..10).map(Some).collect();
    rows[4] = None;
    let table = c.add_indexes(rows);
    c.add_command(Command::ResizeMatrixZeroed { matrix: 3 });
    c.add_command(Command::CopyRows {
        dst: 3,
        src: 1,
        indexes: table,
    });
    c.add_command(Command::ResizeMatrixUndefined { matrix: 2 });
    c.add_command(relu(3, 2));
    c.add_command(Command::MatrixCopy { dst: 3, src: 1 });
    c.add_phase_marker();
    c.add_command(Command::ResizeMatrixEmpty { matrix: 3 });
    c.add_command(Command::ResizeMatrixEmpty { matrix: 1 });

    let analyzer = Analyzer::new(&nnet, &c).unwrap();
    let gather = &analyzer.command_attributes[1];
    let dst_vars: Vec<usize> = analyzer.variables.variables_for_submatrix(3).collect();
    assert!(dst_vars.iter().all(|v| gather.variables_read.contains(v)));
    assert!(dst_vars.iter().all(|v| gather.variables_written.contains(v)));
    let v = dst_vars[0];
    assert_eq!(
        analyzer.variable_accesses[v].accesses[1].access_type,
        AccessType::ReadWrite
    );

    // The copy at command 4 writes m3 after the pure read at command 3.
    match check(&nnet, 10, &c) {
        Err(Error::Rewrite { matrix, .. }) => assert_eq!(matrix, 3),
        other => panic!("expected rewrite violation, got {other:?}"),
    }
    let relaxed = CheckComputationConfig::default().with_rewrite_check(false);
    check_computation(relaxed, &nnet, &request(10), &c).unwrap();
}

// Scenario E: two phase markers

#[test]
fn test_scenario_e_duplicate_markers() {
    let nnet = relu_nnet(5);
    for second_at in [5, 6, 7] {
        let mut c = scenario_a();
        let mut commands: Vec<Command> = c.commands().to_vec();
        commands.insert(second_at, Command::NoOperationMarker);
        let mut dup = three_matrices();
        for command in commands {
            dup.add_command(command);
        }
        dup.set_forward_computation_end(c.forward_computation_end());
        c = dup;
        match check(&nnet, 10, &c) {
            Err(Error::Ordering { .. }) => {}
            other => panic!("marker at {second_at}: expected ordering violation, got {other:?}"),
        }
    }
}

// Other violations

#[test]
fn test_input_allocated() {
    let nnet = relu_nnet(5);
    let mut c = scenario_a();
    let mut dup = three_matrices();
    dup.add_command(Command::ResizeMatrixZeroed { matrix: 1 });
    for command in c.commands() {
        dup.add_command(command.clone());
    }
    dup.set_forward_computation_end(c.forward_computation_end().map(|e| e + 1));
    c = dup;
    match check(&nnet, 10, &c) {
        Err(Error::Lifecycle { matrix, .. }) => assert_eq!(matrix, 1),
        other => panic!("expected lifecycle violation, got {other:?}"),
    }
}

#[test]
fn test_propagate_in_place_needs_support() {
    let mut nnet = Nnet::<CpuBackend>::new();
    let affine = nnet
        .add_component(
            "affine",
            Box::new(AffineComponent::new(5, 5, 0.1, &CpuDevice).unwrap()),
        )
        .unwrap();
    nnet.add_input_node("input").unwrap();
    nnet.add_component_node("affine", affine).unwrap();
    nnet.add_output_node("output").unwrap();

    let mut c = three_matrices();
    c.add_command(Command::ResizeMatrixUndefined { matrix: 3 });
    c.add_command(Command::MatrixCopy { dst: 3, src: 1 });
    c.add_command(relu(3, 3));
    c.add_phase_marker();
    match check(&nnet, 10, &c) {
        Err(Error::MalformedIr { command, msg }) => {
            assert_eq!(command, Some(2));
            assert!(msg.contains("in-place"), "{msg}");
        }
        other => panic!("expected malformed IR, got {other:?}"),
    }
}

#[test]
fn test_duplicate_scatter_target() {
    let nnet = relu_nnet(5);
    let mut c = scenario_a();
    let pairs = c.add_indexes_multi(vec![Some((3, 0)), Some((3, 0))]);
    let two_rows = c.new_submatrix(1, 0, 2, 0, 5).unwrap();
    c.add_command(Command::CopyToRowsMulti {
        src: two_rows,
        indexes_multi: pairs,
    });
    match check(&nnet, 10, &c) {
        Err(Error::MalformedIr { msg, .. }) => assert!(msg.contains("duplicate"), "{msg}"),
        other => panic!("expected malformed IR, got {other:?}"),
    }
}

#[test]
fn test_gather_row_out_of_range() {
    let nnet = relu_nnet(5);
    let mut c = three_matrices();
    let table = c.add_indexes((0..10).map(|r| Some(r + 1)).collect());
    c.add_command(Command::ResizeMatrixUndefined { matrix: 3 });
    c.add_command(Command::CopyRows {
        dst: 3,
        src: 1,
        indexes: table,
    });
    c.add_phase_marker();
    match check(&nnet, 10, &c) {
        Err(Error::MalformedIr { command, .. }) => assert_eq!(command, Some(1)),
        other => panic!("expected malformed IR, got {other:?}"),
    }
}

#[test]
fn test_verdict_is_stable() {
    let nnet = relu_nnet(5);
    let req = request(10);
    for c in [scenario_a(), three_matrices()] {
        let mut checker = ComputationChecker::new(Default::default(), &nnet, &req, &c);
        let first = checker.check();
        let second = checker.check();
        assert_eq!(first, second);
    }
}

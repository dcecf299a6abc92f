//! Integration tests for the Schur-complement linear solve.

mod common;

use common::mock_unit::{RelayUnit, SourceUnit};
use fnet_network::RawSwitch;
use fnet_system::{LinearSolveParams, ModelSystem, SolverSettings, TimePoint};
use nalgebra::{DMatrix, DVector};

const R1: f64 = 0.6;
const R2: f64 = 0.4;

/// Source A feeds relay B, which recycles part of its outlet to itself:
/// the Schur complement reduces to the scalar `1 - R2/(R1+R2)`.
fn recycle_system(solve_code: i32) -> ModelSystem {
    let mut sys = ModelSystem::new();
    sys.add_unit(Box::new(SourceUnit {
        id: 0,
        values: vec![2.0],
    }))
    .unwrap();
    let mut relay = RelayUnit::new(1, 1);
    relay.accumulate = true;
    relay.solve_code = solve_code;
    sys.add_unit(Box::new(relay)).unwrap();

    let switches = [RawSwitch {
        section: 0,
        connections: vec![
            0.0, 1.0, 0.0, 0.0, R1, //
            1.0, 1.0, 0.0, 0.0, R2,
        ],
    }];
    let settings = SolverSettings {
        schur_safety: 0.1,
        ..SolverSettings::default()
    };
    sys.configure(&switches, &settings).unwrap();
    sys.notify_topology_transition(0.0, 0).unwrap();
    sys
}

fn solve_params() -> LinearSolveParams {
    LinearSolveParams {
        t: 0.0,
        time_factor: 1.0,
        alpha: 0.0,
        outer_tol: 1e-6,
    }
}

#[test]
fn schur_solve_matches_closed_form() {
    let mut sys = recycle_system(0);
    assert_eq!(sys.num_dofs(), 3);
    assert_eq!(sys.num_coupling_dofs(), 1);

    let mut rhs = [1.0, 2.0, 3.0];
    let weight = [1.0; 3];
    let zeros = [0.0; 3];

    let code = sys.linear_solve(&solve_params(), &mut rhs, &weight, &zeros, &zeros, &zeros);
    assert_eq!(code, 0);

    // Forward elimination: y = b (identity local Jacobians), then
    // y_f = b_f + f1*b_A + f2*b_B with f_i = R_i/(R1+R2); the Schur scalar is
    // S = 1 - f2, so x_f = y_f/(1 - f2) and x_B = b_B + x_f.
    let f1 = R1 / (R1 + R2);
    let f2 = R2 / (R1 + R2);
    let y_f = 3.0 + f1 * 1.0 + f2 * 2.0;
    let x_f = y_f / (1.0 - f2);
    let x_b = 2.0 + x_f;

    assert!((rhs[0] - 1.0).abs() < 1e-6);
    assert!((rhs[1] - x_b).abs() < 1e-6);
    assert!((rhs[2] - x_f).abs() < 1e-6);
}

#[test]
fn schur_solve_matches_dense_jacobian_solve() {
    let mut sys = recycle_system(0);
    let n = sys.num_dofs();

    let y = [2.0, 1.0, 1.0];
    let y_dot = [0.0; 3];
    let time = TimePoint::new(0.0, 0);

    // The residuals are linear, so central differences are exact up to
    // rounding; alpha = 0 means the dense system matrix is just ∂res/∂y
    let jac = sys.fd_jacobian(&time, &y, &y_dot, 1e-6);
    let dense = DMatrix::from_fn(n, n, |r, c| jac[r * n + c]);

    let b = [0.7, -1.3, 2.1];
    let expected = dense
        .lu()
        .solve(&DVector::from_column_slice(&b))
        .expect("dense solve");

    let mut rhs = b;
    let weight = [1.0; 3];
    let code = sys.linear_solve(&solve_params(), &mut rhs, &weight, &y, &y_dot, &[0.0; 3]);
    assert_eq!(code, 0);

    for i in 0..n {
        assert!(
            (rhs[i] - expected[i]).abs() < 1e-5,
            "component {i}: {} vs {}",
            rhs[i],
            expected[i]
        );
    }
}

#[test]
fn recoverable_unit_solve_code_propagates() {
    let mut sys = recycle_system(3);
    let mut rhs = [1.0, 2.0, 3.0];
    let weight = [1.0; 3];
    let zeros = [0.0; 3];
    let code = sys.linear_solve(&solve_params(), &mut rhs, &weight, &zeros, &zeros, &zeros);
    assert_eq!(code, 3);
}

#[test]
fn fatal_unit_solve_code_poisons_result() {
    let mut sys = recycle_system(-2);
    let mut rhs = [1.0, 2.0, 3.0];
    let weight = [1.0; 3];
    let zeros = [0.0; 3];
    let code = sys.linear_solve(&solve_params(), &mut rhs, &weight, &zeros, &zeros, &zeros);
    assert_eq!(code, -2);
}

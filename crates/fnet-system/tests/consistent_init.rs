//! Integration tests for consistent initialization.

mod common;

use common::mock_unit::{SinkUnit, SourceUnit, TankUnit};
use fnet_network::RawSwitch;
use fnet_system::{InitMode, ModelSystem, SolverSettings, TimePoint};

const K: f64 = 3.0;
const C_IN: f64 = 2.5;

/// Source (pinned to 2.5) -> tank (k = 3) -> terminal sink, unit flow rates.
fn tank_chain() -> ModelSystem {
    let mut sys = ModelSystem::new();
    sys.add_unit(Box::new(SourceUnit {
        id: 0,
        values: vec![C_IN],
    }))
    .unwrap();
    sys.add_unit(Box::new(TankUnit { id: 1, k: K })).unwrap();
    sys.add_unit(Box::new(SinkUnit::new(2, 1))).unwrap();

    let switches = [RawSwitch {
        section: 0,
        connections: vec![
            0.0, 1.0, 0.0, 0.0, 1.0, //
            1.0, 2.0, 0.0, 0.0, 1.0,
        ],
    }];
    sys.configure(&switches, &SolverSettings::default()).unwrap();
    sys.notify_topology_transition(0.0, 0).unwrap();
    sys
}

fn run_init(mode: InitMode) -> (ModelSystem, Vec<f64>, Vec<f64>) {
    let mut sys = tank_chain();
    let n = sys.num_dofs();
    assert_eq!(n, 6); // 1 + 2 + 1 unit DOFs, 2 coupling DOFs

    // Garbage everywhere except the differential tank content
    let mut y = vec![9.0; n];
    let mut y_dot = vec![9.0; n];
    y[2] = 0.7; // tank content (global index: source 0, tank inlet 1, content 2)

    let time = TimePoint::new(0.0, 0);
    let code = sys.consistent_initial_conditions(&time, mode, &mut y, &mut y_dot, 1e-10);
    assert_eq!(code, 0);
    (sys, y, y_dot)
}

#[test]
fn full_initialization_produces_consistent_state() {
    let (mut sys, y, y_dot) = run_init(InitMode::Full);

    // State: source pinned, inlets mirror the coupling DOFs, content kept
    assert_eq!(y[0], C_IN);
    assert_eq!(y[1], C_IN); // tank inlet
    assert_eq!(y[2], 0.7); // tank content untouched
    assert_eq!(y[3], 0.7); // sink mirrors the tank outlet
    assert_eq!(y[4], C_IN); // coupling DOF of the tank inlet
    assert_eq!(y[5], 0.7); // coupling DOF of the sink inlet

    // Derivative: only the tank content (and what mirrors it) moves
    let expected = K * (C_IN - 0.7);
    assert_eq!(y_dot[0], 0.0);
    assert_eq!(y_dot[1], 0.0);
    assert!((y_dot[2] - expected).abs() < 1e-12);
    assert!((y_dot[3] - expected).abs() < 1e-12);
    assert_eq!(y_dot[4], 0.0);
    assert!((y_dot[5] - expected).abs() < 1e-12);

    // The initialized pair satisfies the full DAE residual
    let time = TimePoint::new(0.0, 0);
    let mut res = vec![0.0; y.len()];
    let code = sys.residual(&time, &y, Some(&y_dot), &mut res);
    assert_eq!(code, 0);
    let norm = res.iter().fold(0.0_f64, |m, r| m.max(r.abs()));
    assert!(norm < 1e-12, "residual norm {norm}");
}

#[test]
fn initialization_is_idempotent() {
    let (mut sys, y_first, y_dot_first) = run_init(InitMode::Full);

    let mut y = y_first.clone();
    let mut y_dot = y_dot_first.clone();
    let time = TimePoint::new(0.0, 0);
    let code =
        sys.consistent_initial_conditions(&time, InitMode::Full, &mut y, &mut y_dot, 1e-10);
    assert_eq!(code, 0);

    for (a, b) in y.iter().zip(y_first.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
    for (a, b) in y_dot.iter().zip(y_dot_first.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn derivative_jacobian_has_single_mass_entry() {
    // Only the tank content equation carries a time derivative, so ∂res/∂ẏ is
    // a single 1 on that diagonal entry.
    let mut sys = tank_chain();
    let n = sys.num_dofs();
    let y = vec![1.0; n];
    let y_dot = vec![0.5; n];

    let jac_dot = sys.fd_jacobian_dot(&TimePoint::new(0.0, 0), &y, &y_dot, 1e-6);
    for row in 0..n {
        for col in 0..n {
            let expected = if row == 2 && col == 2 { 1.0 } else { 0.0 };
            assert!(
                (jac_dot[row * n + col] - expected).abs() < 1e-9,
                "entry ({row}, {col})"
            );
        }
    }
}

#[test]
fn lean_initialization_matches_full_for_linear_models() {
    let (_, y_full, y_dot_full) = run_init(InitMode::Full);
    let (_, y_lean, y_dot_lean) = run_init(InitMode::Lean);

    for (a, b) in y_lean.iter().zip(y_full.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
    for (a, b) in y_dot_lean.iter().zip(y_dot_full.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
}

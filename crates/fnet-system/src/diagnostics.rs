//! Brute-force verification utilities.
//!
//! Dense Jacobian reconstruction by central finite differences of the global
//! residual. This is diagnostic tooling for tests and debugging sessions, not
//! a production code path; the production solve never forms the full coupled
//! Jacobian.

use crate::system::ModelSystem;
use crate::unit::TimePoint;

impl ModelSystem {
    /// Dense `∂res/∂y`, row-major `num_dofs x num_dofs`.
    pub fn fd_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: &[f64],
        h: f64,
    ) -> Vec<f64> {
        let n = self.num_dofs();
        let mut jac = vec![0.0; n * n];

        let mut y_minus = vec![0.0; n];
        let mut y_plus = vec![0.0; n];
        let mut res_minus = vec![0.0; n];
        let mut res_plus = vec![0.0; n];

        for col in 0..n {
            y_minus.copy_from_slice(y);
            y_plus.copy_from_slice(y);
            y_minus[col] -= h / 2.0;
            y_plus[col] += h / 2.0;

            self.residual(time, &y_minus, Some(y_dot), &mut res_minus);
            self.residual(time, &y_plus, Some(y_dot), &mut res_plus);

            for row in 0..n {
                jac[row * n + col] = (res_plus[row] - res_minus[row]) / h;
            }
        }
        jac
    }

    /// Dense `∂res/∂ẏ`, row-major `num_dofs x num_dofs`.
    pub fn fd_jacobian_dot(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: &[f64],
        h: f64,
    ) -> Vec<f64> {
        let n = self.num_dofs();
        let mut jac = vec![0.0; n * n];

        let mut yd_minus = vec![0.0; n];
        let mut yd_plus = vec![0.0; n];
        let mut res_minus = vec![0.0; n];
        let mut res_plus = vec![0.0; n];

        for col in 0..n {
            yd_minus.copy_from_slice(y_dot);
            yd_plus.copy_from_slice(y_dot);
            yd_minus[col] -= h / 2.0;
            yd_plus[col] += h / 2.0;

            self.residual(time, y, Some(&yd_minus), &mut res_minus);
            self.residual(time, y, Some(&yd_plus), &mut res_plus);

            for row in 0..n {
                jac[row * n + col] = (res_plus[row] - res_minus[row]) / h;
            }
        }
        jac
    }
}

//! Forward-mode dual scalar with a runtime number of derivative directions.
//!
//! The engine treats automatic differentiation as an opaque dual-number
//! interface: a value plus one directional derivative per registered
//! sensitivity direction. Directions are seeded at configuration time (one per
//! sensitive parameter), so the direction count is only known at runtime.
//!
//! Arithmetic follows the usual forward-mode rules. Operands with different
//! direction counts are combined as if the shorter one were zero-padded.

use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Dual scalar: value and directional derivatives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ad {
    re: f64,
    eps: Vec<f64>,
}

impl Ad {
    /// A constant (all directional derivatives zero, no directions allocated).
    pub fn constant(re: f64) -> Self {
        Self {
            re,
            eps: Vec::new(),
        }
    }

    /// A value carrying `dirs` zeroed derivative directions.
    pub fn with_dirs(re: f64, dirs: usize) -> Self {
        Self {
            re,
            eps: vec![0.0; dirs],
        }
    }

    /// The plain value.
    pub fn value(&self) -> f64 {
        self.re
    }

    /// Overwrite the value, keeping all derivative directions.
    pub fn set_value(&mut self, re: f64) {
        self.re = re;
    }

    /// The derivative in direction `dir` (zero if the direction is not carried).
    pub fn deriv(&self, dir: usize) -> f64 {
        self.eps.get(dir).copied().unwrap_or(0.0)
    }

    /// Seed the derivative in direction `dir`, growing the direction count.
    pub fn set_deriv(&mut self, dir: usize, seed: f64) {
        if self.eps.len() <= dir {
            self.eps.resize(dir + 1, 0.0);
        }
        self.eps[dir] = seed;
    }

    /// Number of derivative directions carried.
    pub fn dirs(&self) -> usize {
        self.eps.len()
    }

    /// Zero every derivative direction, keeping the value.
    pub fn clear_derivs(&mut self) {
        self.eps.fill(0.0);
    }

    fn binop(a: &Ad, b: &Ad, re: f64, f: impl Fn(f64, f64) -> f64) -> Ad {
        let dirs = a.eps.len().max(b.eps.len());
        let mut eps = Vec::with_capacity(dirs);
        for i in 0..dirs {
            eps.push(f(a.deriv(i), b.deriv(i)));
        }
        Ad { re, eps }
    }
}

impl Add for &Ad {
    type Output = Ad;

    fn add(self, rhs: &Ad) -> Ad {
        Ad::binop(self, rhs, self.re + rhs.re, |da, db| da + db)
    }
}

impl Sub for &Ad {
    type Output = Ad;

    fn sub(self, rhs: &Ad) -> Ad {
        Ad::binop(self, rhs, self.re - rhs.re, |da, db| da - db)
    }
}

impl Mul for &Ad {
    type Output = Ad;

    fn mul(self, rhs: &Ad) -> Ad {
        // Product rule: (ab)' = a'b + ab'
        Ad::binop(self, rhs, self.re * rhs.re, |da, db| {
            da * rhs.re + self.re * db
        })
    }
}

impl Div for &Ad {
    type Output = Ad;

    fn div(self, rhs: &Ad) -> Ad {
        // Quotient rule: (a/b)' = (a'b - ab') / b^2
        let denom = rhs.re * rhs.re;
        Ad::binop(self, rhs, self.re / rhs.re, |da, db| {
            (da * rhs.re - self.re * db) / denom
        })
    }
}

impl AddAssign<&Ad> for Ad {
    fn add_assign(&mut self, rhs: &Ad) {
        self.re += rhs.re;
        if self.eps.len() < rhs.eps.len() {
            self.eps.resize(rhs.eps.len(), 0.0);
        }
        for (e, &d) in self.eps.iter_mut().zip(rhs.eps.iter()) {
            *e += d;
        }
    }
}

impl Mul<f64> for &Ad {
    type Output = Ad;

    fn mul(self, rhs: f64) -> Ad {
        Ad {
            re: self.re * rhs,
            eps: self.eps.iter().map(|e| e * rhs).collect(),
        }
    }
}

impl Neg for &Ad {
    type Output = Ad;

    fn neg(self) -> Ad {
        Ad {
            re: -self.re,
            eps: self.eps.iter().map(|e| -e).collect(),
        }
    }
}

/// Values a coupling matrix can hold and accumulate.
///
/// Implemented by `f64` (plain evaluation) and [`Ad`] (sensitivity-carrying
/// evaluation) so that matrix application and the network coupling equations
/// are written once for both representations.
pub trait LinearValue: Clone + Send + Sync {
    /// Additive identity.
    fn zero() -> Self;

    /// Full assignment from a plain value (derivatives, if any, are cleared).
    fn set_constant(&mut self, v: f64);

    /// Accumulate a plain value (derivatives unaffected).
    fn add_value(&mut self, v: f64);

    /// `self += coeff * x`.
    fn add_scaled(&mut self, coeff: &Self, x: f64);

    /// `self -= coeff * x`.
    fn sub_scaled(&mut self, coeff: &Self, x: f64);
}

impl LinearValue for f64 {
    fn zero() -> Self {
        0.0
    }

    fn set_constant(&mut self, v: f64) {
        *self = v;
    }

    fn add_value(&mut self, v: f64) {
        *self += v;
    }

    fn add_scaled(&mut self, coeff: &Self, x: f64) {
        *self += coeff * x;
    }

    fn sub_scaled(&mut self, coeff: &Self, x: f64) {
        *self -= coeff * x;
    }
}

impl LinearValue for Ad {
    fn zero() -> Self {
        Ad::constant(0.0)
    }

    fn set_constant(&mut self, v: f64) {
        self.re = v;
        self.eps.fill(0.0);
    }

    fn add_value(&mut self, v: f64) {
        self.re += v;
    }

    fn add_scaled(&mut self, coeff: &Self, x: f64) {
        self.re += coeff.re * x;
        if self.eps.len() < coeff.eps.len() {
            self.eps.resize(coeff.eps.len(), 0.0);
        }
        for (e, &d) in self.eps.iter_mut().zip(coeff.eps.iter()) {
            *e += d * x;
        }
    }

    fn sub_scaled(&mut self, coeff: &Self, x: f64) {
        self.re -= coeff.re * x;
        if self.eps.len() < coeff.eps.len() {
            self.eps.resize(coeff.eps.len(), 0.0);
        }
        for (e, &d) in self.eps.iter_mut().zip(coeff.eps.iter()) {
            *e -= d * x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_direction_propagates_through_product() {
        let mut a = Ad::constant(3.0);
        a.set_deriv(0, 1.0);
        let b = Ad::constant(4.0);

        // d(a*b)/da = b
        let p = &a * &b;
        assert_eq!(p.value(), 12.0);
        assert_eq!(p.deriv(0), 4.0);
    }

    #[test]
    fn quotient_rule() {
        let mut a = Ad::constant(1.0);
        a.set_deriv(0, 1.0);
        let mut b = Ad::constant(2.0);
        b.set_deriv(1, 1.0);

        // q = a/b: dq/da = 1/b = 0.5, dq/db = -a/b^2 = -0.25
        let q = &a / &b;
        assert_eq!(q.value(), 0.5);
        assert!((q.deriv(0) - 0.5).abs() < 1e-15);
        assert!((q.deriv(1) + 0.25).abs() < 1e-15);
    }

    #[test]
    fn mismatched_direction_counts_pad_with_zero() {
        let mut a = Ad::constant(1.0);
        a.set_deriv(2, 5.0);
        let b = Ad::constant(2.0);

        let s = &a + &b;
        assert_eq!(s.value(), 3.0);
        assert_eq!(s.deriv(2), 5.0);
        assert_eq!(s.dirs(), 3);
    }

    #[test]
    fn linear_value_assignment_clears_derivs() {
        let mut a = Ad::with_dirs(1.0, 2);
        a.set_deriv(1, 3.0);
        LinearValue::set_constant(&mut a, 7.0);
        assert_eq!(a.value(), 7.0);
        assert_eq!(a.deriv(1), 0.0);
    }

    #[test]
    fn set_value_keeps_derivs() {
        let mut a = Ad::with_dirs(1.0, 1);
        a.set_deriv(0, 2.0);
        a.set_value(9.0);
        assert_eq!(a.value(), 9.0);
        assert_eq!(a.deriv(0), 2.0);
    }

    #[test]
    fn add_scaled_tracks_coefficient_derivative() {
        let mut coeff = Ad::constant(-0.5);
        coeff.set_deriv(0, -1.0);

        let mut acc = Ad::zero();
        acc.add_scaled(&coeff, 4.0);
        assert_eq!(acc.value(), -2.0);
        assert_eq!(acc.deriv(0), -4.0);
    }
}

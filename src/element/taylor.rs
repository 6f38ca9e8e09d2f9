//! # `Gdual` – A Truncated Multivariate Taylor Number
//!
//! `SymbolicRegressionProblem::gradient`/`hessians` need derivatives of the
//! expression with respect to the embedded constants, "for free", by lifting
//! those constants to indeterminates and evaluating the expression through
//! them (spec design note: "Derivatives without custom autodiff"). `Gdual` is
//! this crate's narrowly-scoped stand-in for the external automatic
//! differentiation library spec.md names as an out-of-scope collaborator: a
//! generalized dual number truncated at total degree 2 in `n` named
//! variables, carrying a constant term, a dense gradient, and a
//! lower-triangular Hessian.
//!
//! Coefficients are stored in *Taylor-series* form, i.e. the off-diagonal
//! entry for `(i, j)`, `i != j`, is the full mixed partial `∂²f/∂x_i∂x_j`,
//! while the diagonal entry for `(i, i)` is *half* of `∂²f/∂x_i²` — this is
//! exactly the coefficient that multiplies `dx_i dx_j` in the expansion
//! `f(x+dx) ≈ f0 + Σ_i f1_i dx_i + Σ_{i<=j} c_ij dx_i dx_j`.
//! [`Gdual::get_derivative`] converts back to an actual partial derivative by
//! multiplying by the appropriate factorial, per the automatic-differentiation
//! contract (spec.md §6).
use crate::element::Element;
use crate::kernel::Kernel;

#[derive(Debug, Clone, PartialEq)]
pub struct Gdual {
    n: usize,
    order0: f64,
    order1: Vec<f64>,
    /// Flattened lower triangle, row-major: index(i, j) = i*(i+1)/2 + j for i >= j.
    order2: Vec<f64>,
}

fn tri_index(i: usize, j: usize) -> usize {
    let (a, b) = if i >= j { (i, j) } else { (j, i) };
    a * (a + 1) / 2 + b
}

impl Gdual {
    pub fn n_vars(&self) -> usize {
        self.n
    }

    /// A constant with no dependence on any of the `n` indeterminates.
    pub fn constant(value: f64, n: usize) -> Self {
        Gdual {
            n,
            order0: value,
            order1: vec![0.0; n],
            order2: vec![0.0; n * (n + 1) / 2],
        }
    }

    /// The indeterminate `x_index` among `n` named variables, with current value `value`.
    pub fn var(value: f64, index: usize, n: usize) -> Self {
        let mut g = Gdual::constant(value, n);
        g.order1[index] = 1.0;
        g
    }

    /// The zeroth-order coefficient (the constant term).
    pub fn constant_cf(&self) -> f64 {
        self.order0
    }

    fn c(&self, i: usize, j: usize) -> f64 {
        self.order2[tri_index(i, j)]
    }

    fn set_c(&mut self, i: usize, j: usize, value: f64) {
        let idx = tri_index(i, j);
        self.order2[idx] = value;
    }

    /// The true (unhalved) Hessian entry `∂²f/∂x_i∂x_j`.
    fn hessian_entry(&self, i: usize, j: usize) -> f64 {
        if i == j { 2.0 * self.c(i, j) } else { self.c(i, j) }
    }

    fn set_hessian_entry(&mut self, i: usize, j: usize, full: f64) {
        let stored = if i == j { full / 2.0 } else { full };
        self.set_c(i, j, stored);
    }

    /// Coefficient of a multi-index (one exponent per variable), times the
    /// factorial implied by that multi-index, i.e. the actual partial
    /// derivative. Multi-indices of total degree > 2 return `0.0` — this
    /// Taylor number is truncated at degree 2.
    pub fn get_derivative(&self, multi_index: &[usize]) -> f64 {
        assert_eq!(multi_index.len(), self.n, "multi-index length must equal n_vars");
        let degree: usize = multi_index.iter().sum();
        match degree {
            0 => self.order0,
            1 => {
                let i = multi_index.iter().position(|&e| e == 1).unwrap();
                self.order1[i]
            }
            2 => {
                if let Some(i) = multi_index.iter().position(|&e| e == 2) {
                    self.hessian_entry(i, i)
                } else {
                    let mut it = multi_index.iter().enumerate().filter(|&(_, &e)| e == 1);
                    let i = it.next().unwrap().0;
                    let j = it.next().unwrap().0;
                    self.hessian_entry(i, j)
                }
            }
            _ => 0.0,
        }
    }

    /// Broadcasts a zero-variable constant to `n` variables; otherwise requires `self.n == n`.
    fn broadcast(&self, n: usize) -> Self {
        if self.n == n {
            self.clone()
        } else if self.n == 0 {
            Gdual::constant(self.order0, n)
        } else {
            panic!("cannot combine Gdual values over different variable counts ({} vs {})", self.n, n);
        }
    }

    fn binary(&self, other: &Self, f0: f64, f1: Vec<f64>, hess: impl Fn(usize, usize) -> f64) -> Self {
        debug_assert_eq!(self.n, other.n);
        let n = self.n;
        let mut out = Gdual::constant(f0, n);
        out.order1 = f1;
        for i in 0..n {
            for j in 0..=i {
                out.set_hessian_entry(i, j, hess(i, j));
            }
        }
        out
    }

    fn unary(&self, f0: f64, fp: f64, fpp: f64) -> Self {
        let n = self.n;
        let f1: Vec<f64> = self.order1.iter().map(|&u1| fp * u1).collect();
        let mut out = Gdual::constant(f0, n);
        out.order1 = f1;
        for i in 0..n {
            for j in 0..=i {
                let hu = self.hessian_entry(i, j);
                let h = fpp * self.order1[i] * self.order1[j] + fp * hu;
                out.set_hessian_entry(i, j, h);
            }
        }
        out
    }

    pub fn add(&self, other: &Self) -> Self {
        let n = self.n.max(other.n);
        let (a, b) = (self.broadcast(n), other.broadcast(n));
        a.binary(
            &b,
            a.order0 + b.order0,
            a.order1.iter().zip(&b.order1).map(|(x, y)| x + y).collect(),
            |i, j| a.hessian_entry(i, j) + b.hessian_entry(i, j),
        )
    }

    pub fn sub(&self, other: &Self) -> Self {
        let n = self.n.max(other.n);
        let (a, b) = (self.broadcast(n), other.broadcast(n));
        a.binary(
            &b,
            a.order0 - b.order0,
            a.order1.iter().zip(&b.order1).map(|(x, y)| x - y).collect(),
            |i, j| a.hessian_entry(i, j) - b.hessian_entry(i, j),
        )
    }

    pub fn mul(&self, other: &Self) -> Self {
        let n = self.n.max(other.n);
        let (a, b) = (self.broadcast(n), other.broadcast(n));
        let f1: Vec<f64> = (0..n)
            .map(|i| a.order0 * b.order1[i] + a.order1[i] * b.order0)
            .collect();
        a.binary(&b, a.order0 * b.order0, f1, |i, j| {
            a.order0 * b.hessian_entry(i, j)
                + b.order0 * a.hessian_entry(i, j)
                + a.order1[i] * b.order1[j]
                + a.order1[j] * b.order1[i]
        })
    }

    /// Reciprocal `1/self`, unprotected — callers needing `pdiv` semantics
    /// check `constant_part()` against the threshold before dividing.
    pub fn recip(&self) -> Self {
        let g0 = self.order0;
        let f0 = 1.0 / g0;
        let f1: Vec<f64> = self.order1.iter().map(|&g1| -g1 / (g0 * g0)).collect();
        let n = self.n;
        let mut out = Gdual::constant(f0, n);
        out.order1 = f1;
        for i in 0..n {
            for j in 0..=i {
                let hg = self.hessian_entry(i, j);
                let h = -hg / (g0 * g0) + 2.0 * self.order1[i] * self.order1[j] / (g0 * g0 * g0);
                out.set_hessian_entry(i, j, h);
            }
        }
        out
    }

    pub fn div(&self, other: &Self) -> Self {
        self.mul(&other.recip())
    }

    pub fn neg(&self) -> Self {
        Gdual::constant(0.0, self.n).sub(self)
    }

    pub fn exp(&self) -> Self {
        let e = self.order0.exp();
        self.unary(e, e, e)
    }

    pub fn ln(&self) -> Self {
        let u0 = self.order0;
        self.unary(u0.ln(), 1.0 / u0, -1.0 / (u0 * u0))
    }

    pub fn sin(&self) -> Self {
        let u0 = self.order0;
        self.unary(u0.sin(), u0.cos(), -u0.sin())
    }

    pub fn cos(&self) -> Self {
        let u0 = self.order0;
        self.unary(u0.cos(), -u0.sin(), -u0.cos())
    }

    pub fn tanh(&self) -> Self {
        let t = self.order0.tanh();
        let fp = 1.0 - t * t;
        let fpp = -2.0 * t * fp;
        self.unary(t, fp, fpp)
    }

    pub fn sigmoid(&self) -> Self {
        let s = 1.0 / (1.0 + (-self.order0).exp());
        let fp = s * (1.0 - s);
        let fpp = fp * (1.0 - 2.0 * s);
        self.unary(s, fp, fpp)
    }

    pub fn relu(&self) -> Self {
        if self.order0 > 0.0 {
            self.unary(self.order0, 1.0, 0.0)
        } else {
            self.unary(0.0, 0.0, 0.0)
        }
    }

    pub fn elu(&self) -> Self {
        if self.order0 > 0.0 {
            self.unary(self.order0, 1.0, 0.0)
        } else {
            let e = self.order0.exp();
            self.unary(e - 1.0, e, e)
        }
    }

    pub fn isru(&self) -> Self {
        let u0 = self.order0;
        let s = (1.0 + u0 * u0).sqrt();
        let f0 = u0 / s;
        let fp = 1.0 / (1.0 + u0 * u0).powf(1.5);
        let fpp = -3.0 * u0 / (1.0 + u0 * u0).powf(2.5);
        self.unary(f0, fp, fpp)
    }
}

impl Element for Gdual {
    fn from_f64(v: f64) -> Self {
        Gdual::constant(v, 0)
    }
    fn one_like(&self) -> Self {
        Gdual::constant(1.0, self.n)
    }
    fn zero_like(&self) -> Self {
        Gdual::constant(0.0, self.n)
    }
    fn constant_part(&self) -> f64 {
        self.order0
    }
    fn add(&self, other: &Self) -> Self {
        Gdual::add(self, other)
    }
    fn neg(&self) -> Self {
        Gdual::neg(self)
    }
    fn mul(&self, other: &Self) -> Self {
        Gdual::mul(self, other)
    }
    fn div(&self, other: &Self) -> Self {
        Gdual::div(self, other)
    }
    fn exp(&self) -> Self {
        Gdual::exp(self)
    }
    fn ln(&self) -> Self {
        Gdual::ln(self)
    }
    fn sin(&self) -> Self {
        Gdual::sin(self)
    }
    fn cos(&self) -> Self {
        Gdual::cos(self)
    }
    fn tanh(&self) -> Self {
        Gdual::tanh(self)
    }
    fn sigmoid(&self) -> Self {
        Gdual::sigmoid(self)
    }
    fn relu(&self) -> Self {
        Gdual::relu(self)
    }
    fn elu(&self) -> Self {
        Gdual::elu(self)
    }
    fn isru(&self) -> Self {
        Gdual::isru(self)
    }
    fn eval_with(kernel: &Kernel, args: &[Self]) -> Self {
        (kernel.eval_gdual)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(i: usize, n: usize) -> Vec<usize> {
        let mut m = vec![0; n];
        m[i] = 1;
        m
    }

    #[test]
    fn product_rule_matches_analytic_gradient() {
        // f(x, y) = x * y, derivatives at (2, 3): df/dx = y = 3, df/dy = x = 2, d2f/dxdy = 1.
        let x = Gdual::var(2.0, 0, 2);
        let y = Gdual::var(3.0, 1, 2);
        let f = x.mul(&y);
        assert_eq!(f.constant_cf(), 6.0);
        assert_eq!(f.get_derivative(&idx(0, 2)), 3.0);
        assert_eq!(f.get_derivative(&idx(1, 2)), 2.0);
        assert_eq!(f.get_derivative(&[1, 1]), 1.0);
        assert_eq!(f.get_derivative(&[2, 0]), 0.0);
    }

    #[test]
    fn sin_of_square_matches_chain_rule() {
        // f(x) = sin(x * x), f'(x) = 2x cos(x^2), f''(x) = 2cos(x^2) - 4x^2 sin(x^2).
        let x = Gdual::var(0.7, 0, 1);
        let f = x.mul(&x).sin();
        let expected0 = (0.7_f64 * 0.7).sin();
        let expected1 = 2.0 * 0.7 * (0.7_f64 * 0.7).cos();
        let expected2 = 2.0 * (0.7_f64 * 0.7).cos() - 4.0 * 0.7 * 0.7 * (0.7_f64 * 0.7).sin();
        assert!((f.constant_cf() - expected0).abs() < 1e-12);
        assert!((f.get_derivative(&[1]) - expected1).abs() < 1e-10);
        assert!((f.get_derivative(&[2]) - expected2).abs() < 1e-9);
    }

    #[test]
    fn reciprocal_matches_quotient_rule() {
        let x = Gdual::var(4.0, 0, 1);
        let r = x.recip();
        assert!((r.constant_cf() - 0.25).abs() < 1e-12);
        assert!((r.get_derivative(&[1]) - (-1.0 / 16.0)).abs() < 1e-12);
        // d2/dx2 (1/x) = 2/x^3
        assert!((r.get_derivative(&[2]) - (2.0 / 64.0)).abs() < 1e-12);
    }
}

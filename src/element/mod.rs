//! # `element` – The Numeric Types a Kernel Can Run Over
//!
//! A [`Kernel`](crate::kernel::Kernel) evaluates the same named operator over
//! several element types: plain `f64` for ordinary evaluation, [`Gdual`] for
//! the truncated Taylor arithmetic `SymbolicRegressionProblem` uses to get a
//! gradient and Hessian with respect to embedded constants "for free", and a
//! `String` rendering for the symbolic pretty-printer. Only the first two are
//! `Element`s in the sense below — the symbolic path is a distinct rendering
//! concern (spec design note: "must not alter numeric semantics") carried by
//! each kernel's `print` closure instead.
//!
//! Dispatch from a kernel to the right closure for a given `E` is a small
//! tagged-variant table (see [`Element::eval_with`]), not inheritance.
pub mod taylor;

pub use taylor::Gdual;

use crate::kernel::Kernel;

/// A numeric element type a [`Kernel`] can be evaluated over.
pub trait Element: Clone + std::fmt::Debug {
    /// Builds a bare constant. For [`Gdual`](crate::element::Gdual) this
    /// produces a zero-variable value; combining it with an `n`-variable
    /// `Gdual` broadcasts it, but combining two `Gdual`s of different
    /// nonzero variable counts panics. Prefer [`Element::one_like`] /
    /// [`Element::zero_like`] inside generic kernel code that must match an
    /// existing value's variable count.
    fn from_f64(v: f64) -> Self;

    /// A constant `1` with the same shape (e.g. Taylor variable count) as `self`.
    fn one_like(&self) -> Self;

    /// A constant `0` with the same shape as `self`.
    fn zero_like(&self) -> Self;

    /// The zeroth-order / constant part — used by `pdiv`'s threshold check
    /// and by branch-dependent kernels (`ReLu`, `ELU`) to decide their branch.
    fn constant_part(&self) -> f64;

    fn add(&self, other: &Self) -> Self;
    fn neg(&self) -> Self;
    fn mul(&self, other: &Self) -> Self;
    fn div(&self, other: &Self) -> Self;

    fn exp(&self) -> Self;
    fn ln(&self) -> Self;
    fn sin(&self) -> Self;
    fn cos(&self) -> Self;
    fn tanh(&self) -> Self;
    fn sigmoid(&self) -> Self;
    fn relu(&self) -> Self;
    fn elu(&self) -> Self;
    fn isru(&self) -> Self;

    /// Dispatches `kernel` to the closure table entry matching `Self`.
    fn eval_with(kernel: &Kernel, args: &[Self]) -> Self;
}

impl Element for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
    fn one_like(&self) -> Self {
        1.0
    }
    fn zero_like(&self) -> Self {
        0.0
    }
    fn constant_part(&self) -> f64 {
        *self
    }
    fn add(&self, other: &Self) -> Self {
        self + other
    }
    fn neg(&self) -> Self {
        -self
    }
    fn mul(&self, other: &Self) -> Self {
        self * other
    }
    fn div(&self, other: &Self) -> Self {
        self / other
    }
    fn exp(&self) -> Self {
        f64::exp(*self)
    }
    fn ln(&self) -> Self {
        f64::ln(*self)
    }
    fn sin(&self) -> Self {
        f64::sin(*self)
    }
    fn cos(&self) -> Self {
        f64::cos(*self)
    }
    fn tanh(&self) -> Self {
        f64::tanh(*self)
    }
    fn sigmoid(&self) -> Self {
        1.0 / (1.0 + f64::exp(-self))
    }
    fn relu(&self) -> Self {
        self.max(0.0)
    }
    fn elu(&self) -> Self {
        if *self > 0.0 { *self } else { f64::exp(*self) - 1.0 }
    }
    fn isru(&self) -> Self {
        self / (1.0 + self * self).sqrt()
    }
    fn eval_with(kernel: &Kernel, args: &[Self]) -> Self {
        (kernel.eval_f64)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_relu_branches_at_zero() {
        assert_eq!((-3.0f64).relu(), 0.0);
        assert_eq!(3.0f64.relu(), 3.0);
    }

    #[test]
    fn f64_isru_is_bounded() {
        let v = 1000.0f64.isru();
        assert!(v < 1.0 && v > 0.0);
    }
}

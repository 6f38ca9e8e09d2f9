//! # `kernel` – Named Polymorphic Operators
//!
//! A [`Kernel`] is a named operator evaluated two ways: numerically, over
//! `f64` or [`Gdual`](crate::element::Gdual) (dispatch chosen by
//! [`Element::eval_with`]), and symbolically, via a `print` closure over
//! already-rendered argument strings. The two must never be mixed in one
//! call path (spec design note) — `print` never touches a numeric value.
//!
//! [`KernelSet`] is an ordered, indexable collection: function genes in an
//! `Expression`'s chromosome are indices into it, so insertion order is part
//! of the encoding's meaning. Re-inserting a name already present is a no-op;
//! inserting an unknown name is an [`DcgpError::InvalidArgument`].
pub mod builtins;

pub use builtins::KernelName;

use crate::element::{Element, Gdual};
use crate::error::DcgpError;

/// A named operator: a numeric evaluator for `f64`, one for [`Gdual`], and a
/// symbolic printer. Dispatch between the two numeric evaluators is a small
/// tagged-variant table rather than inheritance, per the design note in
/// spec.md §9.
#[derive(Clone)]
pub struct Kernel {
    pub name: KernelName,
    pub(crate) eval_f64: fn(&[f64]) -> f64,
    pub(crate) eval_gdual: fn(&[Gdual]) -> Gdual,
    pub(crate) print: fn(&[String]) -> String,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").field("name", &self.name).finish()
    }
}

impl Kernel {
    /// Evaluates this kernel over `args` for any supported numeric element type.
    pub fn call<E: Element>(&self, args: &[E]) -> E {
        E::eval_with(self, args)
    }

    /// Renders this kernel's symbolic form given already-rendered argument strings.
    pub fn print(&self, args: &[String]) -> String {
        (self.print)(args)
    }
}

/// An ordered, indexable set of [`Kernel`]s. Function genes in an
/// `Expression`'s chromosome are bounded by `[0, len() - 1]` and index into
/// this set directly, so order is semantically meaningful.
#[derive(Debug, Clone, Default)]
pub struct KernelSet {
    kernels: Vec<Kernel>,
}

impl KernelSet {
    pub fn new() -> Self {
        Self { kernels: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Kernel> {
        self.kernels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.iter()
    }

    /// Appends `kernel`; a duplicate name (by [`KernelName`]) is a no-op.
    pub fn push(&mut self, kernel: Kernel) {
        if !self.kernels.iter().any(|k| k.name == kernel.name) {
            self.kernels.push(kernel);
        }
    }

    /// Appends the built-in kernel named `name`; a duplicate is a no-op, an
    /// unknown name fails with [`DcgpError::InvalidArgument`].
    pub fn push_by_name(&mut self, name: &str) -> Result<(), DcgpError> {
        let kernel = builtins::by_name(name).ok_or_else(|| {
            DcgpError::invalid("kernel name", "one of the built-in kernel names", name)
        })?;
        self.push(kernel);
        Ok(())
    }

    /// Builds a `KernelSet` from an ordered list of built-in kernel names.
    pub fn from_names(names: &[&str]) -> Result<Self, DcgpError> {
        let mut set = KernelSet::new();
        for name in names {
            set.push_by_name(name)?;
        }
        Ok(set)
    }

    /// Restricts construction to the differentiable activations
    /// `{tanh, sig, ReLu, ELU, ISRU}`, as `WeightedExpression` requires.
    pub fn validate_differentiable(&self) -> Result<(), DcgpError> {
        for kernel in &self.kernels {
            if !kernel.name.is_differentiable_activation() {
                return Err(DcgpError::invalid(
                    "kernel in WeightedExpression kernel set",
                    "one of {tanh, sig, ReLu, ELU, ISRU}",
                    format!("{:?}", kernel.name),
                ));
            }
        }
        Ok(())
    }
}

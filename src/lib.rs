//! # `dcgp` – Differentiable Cartesian Genetic Programming
//!
//! An engine for evolving compact, directed-acyclic computational graphs that
//! represent symbolic mathematical expressions, evaluating them and their
//! derivatives, and searching over the graph space — and over embedded
//! real-valued constants — to fit data or satisfy differential constraints.
//!
//! Three tightly coupled subsystems, leaves first:
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`kernel`] | A named polymorphic operator + a curated [`kernel::KernelSet`]. |
//! | [`element`] | The numeric types a kernel can run over: `f64`, [`element::Gdual`] (truncated Taylor arithmetic), symbolic strings. |
//! | [`expression`] | The grid-encoded DAG: encoding, validity, active-node analysis, mutation, generic evaluation. |
//! | [`weighted`] | [`weighted::WeightedExpression`]: per-edge weights, per-node biases, forward pass, reverse-mode gradient, loss, SGD. |
//! | [`problem`] | [`problem::SymbolicRegressionProblem`]: fitness/gradient/Hessian/sparsity over a dataset, embedded constants, fitness cache. |
//! | [`search`] | [`search::MemeticMOSearch`]: the multi-objective memetic search loop. |
//!
//! Data flows from an integer-plus-real decision vector into an
//! [`expression::Expression`] — the integer part sets graph topology, the
//! real part sets embedded constants — through kernel evaluation on each data
//! point, producing a scalar loss and, via the Taylor element, a gradient and
//! Hessian with respect to constants; [`search::MemeticMOSearch`] consumes
//! those to propose new candidates.
//!
//! Out of scope: command-line front ends, data-file readers, the external
//! evolutionary-optimization host that owns the population container (this
//! crate defines only the trait contracts it expects of one, see
//! [`problem::MultiObjectiveProblem`] and [`search::MultiObjectivePopulation`]),
//! language bindings, and packaging.

pub mod element;
pub mod error;
pub mod expression;
pub mod kernel;
pub mod problem;
pub mod random;
pub mod search;
pub mod weighted;

pub use element::{Element, Gdual};
pub use error::{DcgpError, DcgpResult};
pub use expression::{Arity, Expression};
pub use kernel::{Kernel, KernelName, KernelSet};
pub use problem::{MultiObjectiveProblem, SymbolicRegressionProblem, SymbolicRegressionProblemBuilder};
pub use random::{DcgpRandomGenerator, RandomGenerator};
pub use search::{GenerationLog, MemeticMOSearch, MemeticMOSearchBuilder, MultiObjectivePopulation, VecPopulation};
pub use weighted::{LossKind, WeightedExpression};

//! # `problem` – Symbolic Regression as a Two-Objective Problem
//!
//! [`SymbolicRegressionProblem`] wraps an [`Expression`] template (shape and
//! kernel set fixed at construction) and a reference dataset. Its decision
//! vector is `[constants | graph genes]`: the constants are real, the graph
//! genes are a chromosome cast to the real domain. It exposes the
//! [`MultiObjectiveProblem`] host contract directly so [`search::MemeticMOSearch`]
//! can drive it with no adapter, mirroring how the teacher's `GeneticAlgorithm`
//! is generic over a `FitnessFn`/`ConstraintsFn` pair rather than a concrete type.
//!
//! [`search::MemeticMOSearch`]: crate::search::MemeticMOSearch
use std::num::NonZeroUsize;

use derive_builder::Builder;
use lru::LruCache;

use crate::element::{Element, Gdual};
use crate::error::DcgpError;
use crate::expression::{Arity, Expression};
use crate::kernel::KernelSet;

const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct CacheEntry {
    constants: Vec<f64>,
    loss: f64,
    gradient: Vec<f64>,
    hessian_rows: Vec<Vec<f64>>,
}

/// The evolutionary-host contract a problem exposes: fitness, gradient,
/// Hessian, sparsity patterns, bounds, and metadata. `&mut self` because the
/// fitness cache is mutated on a miss.
pub trait MultiObjectiveProblem {
    fn fitness(&mut self, x: &[f64]) -> Result<Vec<f64>, DcgpError>;
    fn gradient(&mut self, x: &[f64]) -> Result<Vec<f64>, DcgpError>;
    fn hessians(&mut self, x: &[f64]) -> Result<Vec<Vec<f64>>, DcgpError>;
    fn gradient_sparsity(&self) -> Vec<usize>;
    fn hessians_sparsity(&self) -> Vec<(usize, usize)>;
    fn bounds(&self) -> (Vec<f64>, Vec<f64>);
    fn n_ix(&self) -> usize;
    fn n_obj(&self) -> usize;
    fn name(&self) -> &str;
    fn extra_info(&self) -> String;

    /// Length of the real-valued (constants) prefix of the decision vector.
    /// `MemeticMOSearch` needs this to split a decision vector into the part
    /// Newton-refines and the part that casts to an `Expression` chromosome.
    fn n_eph(&self) -> usize;

    /// The graph shape/kernel-set template used to interpret the integer
    /// suffix of a decision vector as a chromosome.
    fn expression_template(&self) -> &Expression;
}

#[derive(Debug, Clone)]
pub struct SymbolicRegressionProblem {
    template: Expression,
    points: Vec<Vec<f64>>,
    labels: Vec<Vec<f64>>,
    n_in: usize,
    n_eph: usize,
    constant_lo: Vec<f64>,
    constant_hi: Vec<f64>,
    parallel: bool,
    cache: LruCache<Vec<usize>, CacheEntry>,
}

fn validate_dataset(points: &[Vec<f64>], labels: &[Vec<f64>], n_in: usize, d_out: usize) -> Result<(), DcgpError> {
    if points.is_empty() {
        return Err(DcgpError::invalid("points", "a non-empty dataset", "empty"));
    }
    if points.len() != labels.len() {
        return Err(DcgpError::invalid("points/labels count", points.len().to_string(), labels.len().to_string()));
    }
    for p in points {
        if p.len() != n_in {
            return Err(DcgpError::invalid("point row length", n_in.to_string(), p.len().to_string()));
        }
    }
    for l in labels {
        if l.len() != d_out {
            return Err(DcgpError::invalid("label row length", d_out.to_string(), l.len().to_string()));
        }
    }
    Ok(())
}

/// Applies the textual sign-merge and double-negation collapses, then
/// repeatedly collapses the leftmost innermost `(...)` group via
/// [`collapse_group`] until no group simplifies any further.
fn simplify_pretty(s: &str) -> String {
    let mut s = s.replace("+ -", "- ").replace("- -", "+ ");
    while s.contains("(-(-") {
        s = s.replace("(-(-", "((");
    }
    while let Some(next) = collapse_innermost_group(&s) {
        s = next;
    }
    s
}

/// Finds the leftmost innermost (parenthesis-free) `(...)` group in `s` that
/// [`collapse_group`] can simplify and splices in its replacement. Leftmost
/// innermost is always well-formed: the first `)` encountered scanning
/// left-to-right can only close a group whose contents contain no unmatched
/// `(`, since any nested group would have closed earlier in the scan.
fn collapse_innermost_group(s: &str) -> Option<String> {
    let mut stack: Vec<usize> = Vec::new();
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => stack.push(i),
            ')' => {
                let start = stack.pop()?;
                let inner = &s[start + 1..i];
                if let Some(replacement) = collapse_group(inner) {
                    let mut out = String::with_capacity(s.len());
                    out.push_str(&s[..start]);
                    out.push_str(&replacement);
                    out.push_str(&s[i + 1..]);
                    return Some(out);
                }
            }
            _ => {}
        }
    }
    None
}

/// Collapses a flat, parenthesis-free `A + B + ...` or `A * B * ...` group:
/// `+0` terms drop out of a sum, `*1` terms drop out of a product, and any
/// `*0` term collapses the whole product to `0`. Returns `None` when `inner`
/// isn't unambiguously one of those two shapes or nothing in it simplifies.
fn collapse_group(inner: &str) -> Option<String> {
    let is_sum = inner.contains(" + ") && !inner.contains(" * ") && !inner.contains(" - ") && !inner.contains(" / ");
    let is_mul = inner.contains(" * ") && !inner.contains(" + ") && !inner.contains(" - ") && !inner.contains(" / ");

    if is_sum {
        let terms: Vec<&str> = inner.split(" + ").collect();
        let kept: Vec<&str> = terms.iter().copied().filter(|&t| t != "0").collect();
        if kept.len() == terms.len() {
            return None;
        }
        return Some(match kept.len() {
            0 => "0".to_string(),
            1 => kept[0].to_string(),
            _ => kept.join(" + "),
        });
    }

    if is_mul {
        let terms: Vec<&str> = inner.split(" * ").collect();
        if terms.iter().any(|&t| t == "0") {
            return Some("0".to_string());
        }
        let kept: Vec<&str> = terms.iter().copied().filter(|&t| t != "1").collect();
        if kept.len() == terms.len() {
            return None;
        }
        return Some(match kept.len() {
            0 => "1".to_string(),
            1 => kept[0].to_string(),
            _ => kept.join(" * "),
        });
    }

    None
}

impl SymbolicRegressionProblem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_in: usize,
        d_out: usize,
        n_eph: usize,
        r: usize,
        c: usize,
        l: usize,
        arity: Arity,
        kernels: KernelSet,
        points: Vec<Vec<f64>>,
        labels: Vec<Vec<f64>>,
        constant_bounds: (f64, f64),
        parallel: bool,
        seed: Option<u64>,
    ) -> Result<Self, DcgpError> {
        validate_dataset(&points, &labels, n_in, d_out)?;
        let template = Expression::new(n_in + n_eph, d_out, r, c, l, arity, kernels, seed)?;
        let (lo, hi) = constant_bounds;
        if !(lo < hi) {
            return Err(DcgpError::invalid("constant_bounds", "lo < hi", format!("({lo}, {hi})")));
        }
        Ok(SymbolicRegressionProblem {
            template,
            points,
            labels,
            n_in,
            n_eph,
            constant_lo: vec![lo; n_eph],
            constant_hi: vec![hi; n_eph],
            parallel,
            cache: LruCache::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap()),
        })
    }

    pub fn n_eph(&self) -> usize {
        self.n_eph
    }

    pub fn template(&self) -> &Expression {
        &self.template
    }

    fn split(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<usize>), DcgpError> {
        let expected = self.n_eph + self.template.chromosome_len();
        if x.len() != expected {
            return Err(DcgpError::invalid("decision vector length", expected.to_string(), x.len().to_string()));
        }
        let constants = x[..self.n_eph].to_vec();
        let graph: Vec<usize> = x[self.n_eph..].iter().map(|&v| v.round().max(0.0) as usize).collect();
        if !self.template.is_valid(&graph) {
            return Err(DcgpError::invalid("graph gene suffix", "a valid chromosome", "out of bound or wrong length"));
        }
        Ok((constants, graph))
    }

    fn loss_f64(&self, expr: &Expression, constants: &[f64]) -> f64 {
        let compute = |point: &Vec<f64>, label: &Vec<f64>| -> f64 {
            let mut inputs = point.clone();
            inputs.extend_from_slice(constants);
            let out = expr.call(&inputs).expect("input length matches expression n by construction");
            out.iter().zip(label).map(|(o, y)| (o - y) * (o - y)).sum::<f64>()
        };
        let n = self.points.len() as f64;
        let sum: f64 = if self.parallel {
            use rayon::prelude::*;
            self.points
                .par_iter()
                .zip(self.labels.par_iter())
                .map(|(p, y)| compute(p, y))
                .collect::<Vec<_>>()
                .into_iter()
                .sum()
        } else {
            self.points.iter().zip(self.labels.iter()).map(|(p, y)| compute(p, y)).sum()
        };
        sum / n
    }

    fn loss_gdual(&self, expr: &Expression, constants: &[f64]) -> Gdual {
        let n = self.n_eph;
        let const_vars: Vec<Gdual> = constants.iter().enumerate().map(|(i, &v)| Gdual::var(v, i, n)).collect();
        let mut total = Gdual::constant(0.0, n);
        for (point, label) in self.points.iter().zip(&self.labels) {
            let mut inputs: Vec<Gdual> = point.iter().map(|&v| Gdual::constant(v, n)).collect();
            inputs.extend(const_vars.iter().cloned());
            let out = expr.call(&inputs).expect("input length matches expression n by construction");
            for (o, &y) in out.iter().zip(label) {
                let err = o.add(&Gdual::constant(-y, n));
                total = total.add(&err.mul(&err));
            }
        }
        let count = Gdual::constant(self.points.len() as f64, n);
        total.div(&count)
    }

    fn unit_index(i: usize, n: usize) -> Vec<usize> {
        let mut m = vec![0; n];
        m[i] = 1;
        m
    }

    fn gradient_and_hessian(&self, loss: &Gdual) -> (Vec<f64>, Vec<Vec<f64>>) {
        let n = self.n_eph;
        let gradient: Vec<f64> = (0..n).map(|i| loss.get_derivative(&Self::unit_index(i, n))).collect();
        let mut hessian_rows = Vec::with_capacity(n);
        for i in 0..n {
            let mut row = Vec::with_capacity(i + 1);
            for j in 0..=i {
                let mut m = vec![0usize; n];
                if i == j {
                    m[i] = 2;
                } else {
                    m[i] = 1;
                    m[j] = 1;
                }
                row.push(loss.get_derivative(&m));
            }
            hessian_rows.push(row);
        }
        (gradient, hessian_rows)
    }

    fn working_expression(&self, graph: &[usize]) -> Expression {
        let mut expr = self.template.clone();
        expr.set(graph.to_vec()).expect("graph validated by split()");
        expr
    }

    fn fitness_entry(&mut self, constants: &[f64], graph: &[usize]) -> CacheEntry {
        if let Some(hit) = self.cache.get(graph) {
            if hit.constants == constants {
                return hit.clone();
            }
        }
        let expr = self.working_expression(graph);
        let loss_value = self.loss_f64(&expr, constants);
        let loss_taylor = self.loss_gdual(&expr, constants);
        let (gradient, hessian_rows) = self.gradient_and_hessian(&loss_taylor);
        let entry = CacheEntry {
            constants: constants.to_vec(),
            loss: loss_value,
            gradient,
            hessian_rows,
        };
        self.cache.put(graph.to_vec(), entry.clone());
        entry
    }

    /// Symbolic form of the expression instantiated with `constants`, one
    /// string per output.
    pub fn pretty(&self, x: &[f64]) -> Result<Vec<String>, DcgpError> {
        let (constants, graph) = self.split(x)?;
        let expr = self.working_expression(&graph);
        let mut printed = expr.pretty()?;
        for (i, c) in constants.iter().enumerate() {
            let token = format!("x{}", self.n_in + i);
            let replacement = format!("{c}");
            for s in &mut printed {
                *s = s.replace(&token, &replacement);
            }
        }
        Ok(printed)
    }

    /// `pretty` with a pass collapsing textually trivial subterms
    /// (`+0`, `*1`, `*0`, double negation).
    pub fn prettier(&self, x: &[f64]) -> Result<Vec<String>, DcgpError> {
        let printed = self.pretty(x)?;
        Ok(printed.into_iter().map(|s| simplify_pretty(&s)).collect())
    }
}

/// Builder-style construction of a [`SymbolicRegressionProblem`], following
/// the teacher's `derive_builder` convention for optional fields with
/// validated defaults (`constant_bounds`, `parallel`, `seed`).
#[derive(Builder, Debug)]
#[builder(pattern = "owned", name = "SymbolicRegressionProblemBuilder", build_fn(name = "build_params"))]
struct SymbolicRegressionProblemParams {
    n_in: usize,
    d_out: usize,
    n_eph: usize,
    r: usize,
    c: usize,
    l: usize,
    arity: Arity,
    kernels: KernelSet,
    points: Vec<Vec<f64>>,
    labels: Vec<Vec<f64>>,
    #[builder(default = "(-10.0, 10.0)")]
    constant_bounds: (f64, f64),
    #[builder(default = "false")]
    parallel: bool,
    #[builder(setter(strip_option), default = "None")]
    seed: Option<u64>,
}

impl SymbolicRegressionProblemBuilder {
    /// Validates and assembles the [`SymbolicRegressionProblem`]. Any field
    /// left unset that has no default (`n_in`, `points`, `kernels`, …) causes
    /// a descriptive [`DcgpError::InvalidArgument`], same as a malformed
    /// constructor argument.
    pub fn build(self) -> Result<SymbolicRegressionProblem, DcgpError> {
        let params = self
            .build_params()
            .map_err(|e| DcgpError::invalid("SymbolicRegressionProblem builder field", "every required field set", e.to_string()))?;
        SymbolicRegressionProblem::new(
            params.n_in,
            params.d_out,
            params.n_eph,
            params.r,
            params.c,
            params.l,
            params.arity,
            params.kernels,
            params.points,
            params.labels,
            params.constant_bounds,
            params.parallel,
            params.seed,
        )
    }
}

impl MultiObjectiveProblem for SymbolicRegressionProblem {
    fn fitness(&mut self, x: &[f64]) -> Result<Vec<f64>, DcgpError> {
        let (constants, graph) = self.split(x)?;
        let complexity = self.working_expression(&graph).active_nodes().len() as f64;
        let entry = self.fitness_entry(&constants, &graph);
        Ok(vec![entry.loss, complexity])
    }

    fn gradient(&mut self, x: &[f64]) -> Result<Vec<f64>, DcgpError> {
        let (constants, graph) = self.split(x)?;
        Ok(self.fitness_entry(&constants, &graph).gradient)
    }

    fn hessians(&mut self, x: &[f64]) -> Result<Vec<Vec<f64>>, DcgpError> {
        let (constants, graph) = self.split(x)?;
        Ok(self.fitness_entry(&constants, &graph).hessian_rows)
    }

    fn gradient_sparsity(&self) -> Vec<usize> {
        (0..self.n_eph).collect()
    }

    fn hessians_sparsity(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for i in 0..self.n_eph {
            for j in 0..=i {
                pairs.push((i, j));
            }
        }
        pairs
    }

    fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (self.constant_lo.clone(), self.constant_hi.clone())
    }

    fn n_ix(&self) -> usize {
        self.template.chromosome_len()
    }

    fn n_obj(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "SymbolicRegressionProblem"
    }

    fn extra_info(&self) -> String {
        format!(
            "n_in={}, n_eph={}, samples={}, r={}, c={}",
            self.n_in,
            self.n_eph,
            self.points.len(),
            self.template.r(),
            self.template.c()
        )
    }

    fn n_eph(&self) -> usize {
        self.n_eph
    }

    fn expression_template(&self) -> &Expression {
        &self.template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernels() -> KernelSet {
        KernelSet::from_names(&["sum", "mul"]).unwrap()
    }

    fn toy_problem(parallel: bool) -> SymbolicRegressionProblem {
        let points = vec![vec![1.0], vec![2.0], vec![3.0]];
        let labels = vec![vec![2.0], vec![4.0], vec![6.0]];
        SymbolicRegressionProblem::new(1, 1, 1, 2, 2, 2, Arity::Scalar(2), kernels(), points, labels, (-5.0, 5.0), parallel, Some(7))
            .unwrap()
    }

    #[test]
    fn simplify_pretty_collapses_trivial_subterms() {
        assert_eq!(simplify_pretty("(x0 + 0)"), "x0");
        assert_eq!(simplify_pretty("(0 + x0)"), "x0");
        assert_eq!(simplify_pretty("(x0 * 1)"), "x0");
        assert_eq!(simplify_pretty("(1 * x0)"), "x0");
        assert_eq!(simplify_pretty("(x0 * 0)"), "0");
        assert_eq!(simplify_pretty("(0 * x0)"), "0");
        assert_eq!(simplify_pretty("mul((x0 + 0), (x1 * 1))"), "mul(x0, x1)");
        assert_eq!(simplify_pretty("(x0 + -x1)"), "(x0 - x1)");
        assert_eq!(simplify_pretty("(-(-x0))"), "((x0))");
        assert_eq!(simplify_pretty("(x0 - 1)"), "(x0 - 1)");
    }

    #[test]
    fn construction_rejects_malformed_dataset_shapes() {
        let k = kernels();
        assert!(SymbolicRegressionProblem::new(1, 1, 1, 2, 2, 2, Arity::Scalar(2), k.clone(), vec![], vec![], (-1.0, 1.0), false, None).is_err());
        assert!(SymbolicRegressionProblem::new(
            1,
            1,
            1,
            2,
            2,
            2,
            Arity::Scalar(2),
            k.clone(),
            vec![vec![1.0]],
            vec![vec![1.0], vec![2.0]],
            (-1.0, 1.0),
            false,
            None
        )
        .is_err());
        assert!(SymbolicRegressionProblem::new(
            1,
            1,
            1,
            2,
            2,
            2,
            Arity::Scalar(2),
            k.clone(),
            vec![vec![1.0], vec![1.0, 2.0]],
            vec![vec![1.0], vec![1.0]],
            (-1.0, 1.0),
            false,
            None
        )
        .is_err());
        assert!(SymbolicRegressionProblem::new(1, 1, 1, 0, 2, 2, Arity::Scalar(2), k.clone(), vec![vec![1.0]], vec![vec![1.0]], (-1.0, 1.0), false, None).is_err());
        assert!(SymbolicRegressionProblem::new(1, 1, 1, 2, 0, 2, Arity::Scalar(2), k.clone(), vec![vec![1.0]], vec![vec![1.0]], (-1.0, 1.0), false, None).is_err());
        assert!(SymbolicRegressionProblem::new(1, 1, 1, 2, 2, 0, Arity::Scalar(2), k, vec![vec![1.0]], vec![vec![1.0]], (-1.0, 1.0), false, None).is_err());
        assert!(SymbolicRegressionProblem::new(1, 1, 1, 2, 2, 2, Arity::Scalar(2), KernelSet::new(), vec![vec![1.0]], vec![vec![1.0]], (-1.0, 1.0), false, None).is_err());
    }

    #[test]
    fn parallel_matches_sequential_fitness() {
        let seq = toy_problem(false);
        let par = toy_problem(true);
        let graph: Vec<f64> = seq.template.chromosome().iter().map(|&g| g as f64).collect();
        let mut x = vec![1.5];
        x.extend(graph);

        let mut seq = seq;
        let mut par = par;
        let f_seq = seq.fitness(&x).unwrap();
        let f_par = par.fitness(&x).unwrap();
        assert_eq!(f_seq, f_par);
    }

    #[test]
    fn cache_hits_on_identical_suffix_and_prefix() {
        let mut problem = toy_problem(false);
        let graph: Vec<f64> = problem.template.chromosome().iter().map(|&g| g as f64).collect();
        let mut x = vec![1.5];
        x.extend(graph.clone());

        let f1 = problem.fitness(&x).unwrap();
        let f2 = problem.fitness(&x).unwrap();
        assert_eq!(f1, f2);

        let mut x_changed = vec![2.5];
        x_changed.extend(graph);
        let f3 = problem.fitness(&x_changed).unwrap();
        assert_ne!(f1[0], f3[0]);
    }

    #[test]
    fn gradient_is_dense_over_constants() {
        let mut problem = toy_problem(false);
        let graph: Vec<f64> = problem.template.chromosome().iter().map(|&g| g as f64).collect();
        let mut x = vec![1.5];
        x.extend(graph);
        let g = problem.gradient(&x).unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn rejects_wrong_length_decision_vector() {
        let mut problem = toy_problem(false);
        assert!(problem.fitness(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn builder_assembles_a_working_problem_with_defaults() {
        let points = vec![vec![1.0], vec![2.0], vec![3.0]];
        let labels = vec![vec![2.0], vec![4.0], vec![6.0]];
        let mut problem = SymbolicRegressionProblemBuilder::default()
            .n_in(1)
            .d_out(1)
            .n_eph(1)
            .r(2)
            .c(2)
            .l(2)
            .arity(Arity::Scalar(2))
            .kernels(kernels())
            .points(points)
            .labels(labels)
            .build()
            .unwrap();
        let graph: Vec<f64> = problem.template.chromosome().iter().map(|&g| g as f64).collect();
        let mut x = vec![1.5];
        x.extend(graph);
        assert!(problem.fitness(&x).is_ok());
    }

    #[test]
    fn builder_rejects_missing_required_field() {
        assert!(SymbolicRegressionProblemBuilder::default().n_in(1).build().is_err());
    }
}

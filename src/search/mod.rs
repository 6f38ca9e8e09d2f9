//! # `search` – Memetic Multi-Objective Search
//!
//! [`MemeticMOSearch`] evolves a population of `(x, f)` pairs where `x` is a
//! `[constants | graph genes]` decision vector: each generation mutates the
//! graph (via [`Expression::mutate_active`]) and Newton-refines the constants
//! using the exact gradient/Hessian the problem supplies, then keeps the best
//! `N` candidates by non-dominated sorting with crowding-distance tie-break.
//!
//! The search owns no population data (`MultiObjectivePopulation` is the
//! host's type, consumed through a trait — mirroring how the teacher's
//! algorithms are generic over a `Population` associated type rather than
//! owning genetic state directly), only its own RNG, generation budget, and
//! run log.
use derive_builder::Builder;
use faer::Mat;
use faer::linalg::solvers::{FullPivLu, Solve};

use crate::error::DcgpError;
use crate::expression::Expression;
use crate::problem::MultiObjectiveProblem;
use crate::random::{DcgpRandomGenerator, RandomGenerator};

/// One entry emitted every `verbosity`-th generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationLog {
    pub gen: usize,
    pub fevals: usize,
    pub ideal_loss: f64,
    pub ndf_size: usize,
    pub nadir_complexity: f64,
}

/// The evolutionary-host population contract: an ordered sequence of
/// `(x, f)` pairs supporting in-place replacement and non-dominated queries.
/// The core does not define this type; it consumes it.
pub trait MultiObjectivePopulation {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_back(&mut self, x: Vec<f64>, f: Vec<f64>);
    fn set_xf(&mut self, i: usize, x: Vec<f64>, f: Vec<f64>);
    fn get_x(&self, i: usize) -> &[f64];
    fn get_f(&self, i: usize) -> &[f64];

    /// Indices, within this population, of the first non-dominated layer.
    fn non_dominated_front(&self) -> Vec<usize>;

    /// Indices of the best `n` individuals by non-dominated sort + crowding
    /// distance, most-preferred first.
    fn select_best_n(&self, n: usize) -> Vec<usize>;

    /// Coordinate-wise minimum of the objective vectors on the non-dominated front.
    fn ideal(&self) -> Vec<f64>;

    /// Coordinate-wise maximum of the objective vectors on the non-dominated front.
    fn nadir(&self) -> Vec<f64>;
}

/// A plain in-memory [`MultiObjectivePopulation`], used by tests and
/// suitable as a default host-side container.
#[derive(Debug, Clone, Default)]
pub struct VecPopulation {
    x: Vec<Vec<f64>>,
    f: Vec<Vec<f64>>,
}

impl VecPopulation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MultiObjectivePopulation for VecPopulation {
    fn len(&self) -> usize {
        self.x.len()
    }

    fn push_back(&mut self, x: Vec<f64>, f: Vec<f64>) {
        self.x.push(x);
        self.f.push(f);
    }

    fn set_xf(&mut self, i: usize, x: Vec<f64>, f: Vec<f64>) {
        self.x[i] = x;
        self.f[i] = f;
    }

    fn get_x(&self, i: usize) -> &[f64] {
        &self.x[i]
    }

    fn get_f(&self, i: usize) -> &[f64] {
        &self.f[i]
    }

    fn non_dominated_front(&self) -> Vec<usize> {
        fast_non_dominated_sort(&self.f).into_iter().next().unwrap_or_default()
    }

    fn select_best_n(&self, n: usize) -> Vec<usize> {
        select_best_n(&self.f, n)
    }

    fn ideal(&self) -> Vec<f64> {
        ideal_point(&self.f, &self.non_dominated_front())
    }

    fn nadir(&self) -> Vec<f64> {
        nadir_point(&self.f, &self.non_dominated_front())
    }
}

/// `a` Pareto-dominates `b`: no worse on every objective, strictly better on
/// at least one (both minimized).
fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (av, bv) in a.iter().zip(b.iter()) {
        if av > bv {
            return false;
        }
        if av < bv {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Partitions `fitnesses` into dominance layers (front 0 is the Pareto front),
/// by indices into `fitnesses`.
fn fast_non_dominated_sort(fitnesses: &[Vec<f64>]) -> Vec<Vec<usize>> {
    let n = fitnesses.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count: Vec<usize> = vec![0; n];
    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut first_front = Vec::new();

    for p in 0..n {
        for q in 0..n {
            if p == q {
                continue;
            }
            if dominates(&fitnesses[p], &fitnesses[q]) {
                dominated_by[p].push(q);
            } else if dominates(&fitnesses[q], &fitnesses[p]) {
                domination_count[p] += 1;
            }
        }
        if domination_count[p] == 0 {
            first_front.push(p);
        }
    }
    fronts.push(first_front);

    let mut i = 0;
    while !fronts[i].is_empty() {
        let mut next_front = Vec::new();
        for &p in &fronts[i] {
            for &q in &dominated_by[p] {
                domination_count[q] -= 1;
                if domination_count[q] == 0 {
                    next_front.push(q);
                }
            }
        }
        i += 1;
        fronts.push(next_front);
    }
    fronts.pop();
    fronts
}

/// Crowding distance of each member of `front`, in the same order as `front`.
/// Boundary points get `f64::INFINITY` so they always survive a split.
fn crowding_distance(front: &[usize], fitnesses: &[Vec<f64>]) -> Vec<f64> {
    let k = front.len();
    if k == 0 {
        return Vec::new();
    }
    let n_obj = fitnesses[front[0]].len();
    let mut distance = vec![0.0_f64; k];

    for m in 0..n_obj {
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| {
            fitnesses[front[a]][m]
                .partial_cmp(&fitnesses[front[b]][m])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let lo = fitnesses[front[order[0]]][m];
        let hi = fitnesses[front[order[k - 1]]][m];
        distance[order[0]] = f64::INFINITY;
        distance[order[k - 1]] = f64::INFINITY;
        let span = hi - lo;
        if span <= 0.0 {
            continue;
        }
        for w in 1..k - 1 {
            let prev = fitnesses[front[order[w - 1]]][m];
            let next = fitnesses[front[order[w + 1]]][m];
            distance[order[w]] += (next - prev) / span;
        }
    }
    distance
}

/// Indices of the best `n` individuals: fronts are accepted whole until the
/// next one would overflow, then that front is truncated by descending
/// crowding distance.
fn select_best_n(fitnesses: &[Vec<f64>], n: usize) -> Vec<usize> {
    let fronts = fast_non_dominated_sort(fitnesses);
    let mut selected = Vec::with_capacity(n);
    for front in fronts {
        if selected.len() + front.len() <= n {
            selected.extend_from_slice(&front);
            if selected.len() == n {
                break;
            }
            continue;
        }
        let remaining = n - selected.len();
        let distances = crowding_distance(&front, fitnesses);
        let mut ranked: Vec<usize> = (0..front.len()).collect();
        ranked.sort_by(|&a, &b| {
            distances[b]
                .partial_cmp(&distances[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        selected.extend(ranked.into_iter().take(remaining).map(|k| front[k]));
        break;
    }
    selected
}

fn ideal_point(fitnesses: &[Vec<f64>], front: &[usize]) -> Vec<f64> {
    let n_obj = fitnesses[front[0]].len();
    let mut out = vec![f64::INFINITY; n_obj];
    for &i in front {
        for m in 0..n_obj {
            if fitnesses[i][m] < out[m] {
                out[m] = fitnesses[i][m];
            }
        }
    }
    out
}

fn nadir_point(fitnesses: &[Vec<f64>], front: &[usize]) -> Vec<f64> {
    let n_obj = fitnesses[front[0]].len();
    let mut out = vec![f64::NEG_INFINITY; n_obj];
    for &i in front {
        for m in 0..n_obj {
            if fitnesses[i][m] > out[m] {
                out[m] = fitnesses[i][m];
            }
        }
    }
    out
}

/// Reads a symmetric matrix stored as lower-triangular rows (`rows[i]` has
/// `i + 1` entries) at `(i, j)`.
fn hess_entry(rows: &[Vec<f64>], i: usize, j: usize) -> f64 {
    if i >= j { rows[i][j] } else { rows[j][i] }
}

/// Solves the reduced Newton system `H_s · delta = g_s`, applying the four
/// guards of the reduced-Hessian Newton step: finite gradient, invertible
/// `H_s`, positive semidefinite `H_s` (all diagonal entries of the LU's `U`
/// non-negative, per Sylvester's inertia), finite solution. `None` means
/// "leave the constants unchanged".
fn newton_step_reduced(g_s: &[f64], h_s: &[Vec<f64>]) -> Option<Vec<f64>> {
    let s = g_s.len();
    if s == 0 || !g_s.iter().all(|v| v.is_finite()) {
        return None;
    }

    let h = Mat::from_fn(s, s, |i, j| h_s[i][j]);
    let lu: FullPivLu<f64> = h.full_piv_lu();
    let u = lu.U();

    const DIAG_EPS: f64 = 1e-12;
    for i in 0..s {
        let d: f64 = u[(i, i)];
        if !d.is_finite() || d.abs() < DIAG_EPS || d < 0.0 {
            return None;
        }
    }

    let rhs = Mat::from_fn(s, 1, |i, _| g_s[i]);
    let solution = lu.solve(&rhs);

    let mut out = Vec::with_capacity(s);
    for i in 0..s {
        let v: f64 = solution[(i, 0)];
        if !v.is_finite() {
            return None;
        }
        out.push(v);
    }
    Some(out)
}

/// The multi-objective memetic search loop: `evolve(problem, population)`,
/// `set_seed`, `set_verbosity`, `get_log`.
#[derive(Debug, Clone)]
pub struct MemeticMOSearch {
    rng: DcgpRandomGenerator,
    gen: usize,
    max_mut: usize,
    verbosity: usize,
    log: Vec<GenerationLog>,
}

impl MemeticMOSearch {
    pub fn new(gen: usize, max_mut: usize, seed: Option<u64>) -> Result<Self, DcgpError> {
        if gen == 0 {
            return Err(DcgpError::invalid("gen", ">= 1", "0"));
        }
        if max_mut == 0 {
            return Err(DcgpError::invalid("max_mut", ">= 1", "0"));
        }
        Ok(Self {
            rng: DcgpRandomGenerator::new_from_seed(seed),
            gen,
            max_mut,
            verbosity: 0,
            log: Vec::new(),
        })
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = DcgpRandomGenerator::new_from_seed(Some(seed));
    }

    pub fn set_verbosity(&mut self, verbosity: usize) {
        self.verbosity = verbosity;
    }

    pub fn get_log(&self) -> &[GenerationLog] {
        &self.log
    }

    /// Runs up to `self.gen` generations, mutating `population` in place.
    /// Stops early once `should_continue()` returns `false`.
    pub fn evolve<P, Pop>(
        &mut self,
        problem: &mut P,
        population: &mut Pop,
        should_continue: &dyn Fn() -> bool,
    ) -> Result<(), DcgpError>
    where
        P: MultiObjectiveProblem,
        Pop: MultiObjectivePopulation,
    {
        let n = population.len();
        if n < 2 {
            return Err(DcgpError::invalid("population size", ">= 2", n.to_string()));
        }
        if problem.n_obj() != 2 {
            return Err(DcgpError::invalid(
                "problem objective count",
                "2",
                problem.n_obj().to_string(),
            ));
        }
        let n_eph = problem.n_eph();
        let mut fevals = 0usize;

        for g in 1..=self.gen {
            if !should_continue() {
                break;
            }

            let mut strengths: Vec<usize> = (0..n).map(|i| i % self.max_mut).collect();
            self.rng.shuffle_vec_usize(&mut strengths);

            let mut pool_x: Vec<Vec<f64>> = (0..n).map(|i| population.get_x(i).to_vec()).collect();
            let mut pool_f: Vec<Vec<f64>> = (0..n).map(|i| population.get_f(i).to_vec()).collect();

            for i in 0..n {
                let mut x = population.get_x(i).to_vec();

                let graph: Vec<usize> = x[n_eph..].iter().map(|v| v.round().max(0.0) as usize).collect();
                let mut expr: Expression = problem.expression_template().clone();
                if expr.set(graph).is_ok() && expr.mutate_active(strengths[i], &mut self.rng).is_ok() {
                    for (k, gene) in expr.chromosome().iter().enumerate() {
                        x[n_eph + k] = *gene as f64;
                    }
                }

                self.newton_refine(problem, &mut x, n_eph);

                fevals += 1;
                if let Ok(f) = problem.fitness(&x) {
                    if f.iter().all(|v| v.is_finite()) && !pool_f.iter().any(|existing| existing == &f) {
                        pool_x.push(x);
                        pool_f.push(f);
                    }
                }
            }

            let keep = select_best_n(&pool_f, n);
            for (slot, &idx) in keep.iter().enumerate() {
                population.set_xf(slot, pool_x[idx].clone(), pool_f[idx].clone());
            }

            if self.verbosity > 0 && g % self.verbosity == 0 {
                let selected_f: Vec<Vec<f64>> = keep.iter().map(|&idx| pool_f[idx].clone()).collect();
                let fronts = fast_non_dominated_sort(&selected_f);
                let front0 = fronts.first().cloned().unwrap_or_default();
                let ideal = ideal_point(&selected_f, &front0);
                let nadir = nadir_point(&selected_f, &front0);
                self.log.push(GenerationLog {
                    gen: g,
                    fevals,
                    ideal_loss: ideal[0],
                    ndf_size: front0.len(),
                    nadir_complexity: nadir[1],
                });
            }
        }
        Ok(())
    }

    /// Step 3 of the per-generation loop: Newton-refines the constants
    /// prefix of `x` in place, leaving it untouched if any guard fails.
    fn newton_refine<P: MultiObjectiveProblem>(&self, problem: &mut P, x: &mut [f64], n_eph: usize) {
        if n_eph == 0 {
            return;
        }
        let (Ok(grad), Ok(hess)) = (problem.gradient(x), problem.hessians(x)) else {
            return;
        };

        if n_eph == 1 {
            let g0 = grad[0];
            let h0 = hess[0][0];
            if g0 != 0.0 && g0.is_finite() && h0.is_finite() && h0.abs() > 1e-12 {
                x[0] -= g0 / h0;
            }
            return;
        }

        let s_idx: Vec<usize> = (0..n_eph).filter(|&k| grad[k] != 0.0).collect();
        if s_idx.is_empty() {
            return;
        }
        let g_s: Vec<f64> = s_idx.iter().map(|&k| grad[k]).collect();
        let h_s: Vec<Vec<f64>> = s_idx
            .iter()
            .map(|&a| s_idx.iter().map(|&b| hess_entry(&hess, a, b)).collect())
            .collect();

        if let Some(delta) = newton_step_reduced(&g_s, &h_s) {
            for (k, &idx) in s_idx.iter().enumerate() {
                x[idx] -= delta[k];
            }
        }
    }
}

/// Builder-style construction of a [`MemeticMOSearch`], following the
/// teacher's `derive_builder` convention: `gen` and `max_mut` are required,
/// `seed` and `verbosity` are optional fields with validated defaults.
#[derive(Builder, Debug)]
#[builder(pattern = "owned", name = "MemeticMOSearchBuilder", build_fn(name = "build_params"))]
struct MemeticMOSearchParams {
    gen: usize,
    max_mut: usize,
    #[builder(setter(strip_option), default = "None")]
    seed: Option<u64>,
    #[builder(default = "0")]
    verbosity: usize,
}

impl MemeticMOSearchBuilder {
    pub fn build(self) -> Result<MemeticMOSearch, DcgpError> {
        let params = self
            .build_params()
            .map_err(|e| DcgpError::invalid("MemeticMOSearch builder field", "every required field set", e.to_string()))?;
        let mut search = MemeticMOSearch::new(params.gen, params.max_mut, params.seed)?;
        search.set_verbosity(params.verbosity);
        Ok(search)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominance_is_strict_and_antisymmetric() {
        assert!(dominates(&[1.0, 1.0], &[1.0, 2.0]));
        assert!(!dominates(&[1.0, 2.0], &[1.0, 2.0]));
        assert!(!dominates(&[1.0, 2.0], &[2.0, 1.0]));
    }

    #[test]
    fn non_dominated_sort_separates_layers() {
        let f = vec![vec![0.0, 3.0], vec![1.0, 1.0], vec![2.0, 0.0], vec![3.0, 3.0]];
        let fronts = fast_non_dominated_sort(&f);
        assert!(fronts[0].contains(&0));
        assert!(fronts[0].contains(&1));
        assert!(fronts[0].contains(&2));
        assert!(!fronts[0].contains(&3));
        assert!(fronts.last().unwrap().contains(&3));
    }

    #[test]
    fn select_best_n_keeps_whole_front_when_it_fits_exactly() {
        let f = vec![vec![0.0, 3.0], vec![1.0, 1.0], vec![2.0, 0.0], vec![10.0, 10.0]];
        let keep = select_best_n(&f, 3);
        assert_eq!(keep.len(), 3);
        assert!(!keep.contains(&3));
    }

    #[test]
    fn select_best_n_truncates_overflowing_front_by_crowding() {
        let f = vec![vec![0.0, 5.0], vec![1.0, 3.0], vec![2.0, 2.0], vec![3.0, 1.0], vec![5.0, 0.0]];
        let keep = select_best_n(&f, 3);
        assert_eq!(keep.len(), 3);
        // boundary points have infinite crowding distance and must survive.
        assert!(keep.contains(&0));
        assert!(keep.contains(&4));
    }

    #[test]
    fn newton_step_single_constant_matches_scalar_formula() {
        let x = vec![2.0_f64];
        let g = 4.0;
        let h = 2.0;
        let expected = x[0] - g / h;
        assert!((expected - 0.0).abs() < 1e-12);
    }

    #[test]
    fn newton_step_reduced_solves_diagonal_system() {
        // H = diag(2, 4), g = (4, 8) => delta = (2, 2)
        let h_s = vec![vec![2.0, 0.0], vec![0.0, 4.0]];
        let g_s = vec![4.0, 8.0];
        let delta = newton_step_reduced(&g_s, &h_s).expect("well-posed system solves");
        assert!((delta[0] - 2.0).abs() < 1e-9);
        assert!((delta[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn newton_step_reduced_skips_singular_hessian() {
        let h_s = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        let g_s = vec![1.0, 2.0];
        assert!(newton_step_reduced(&g_s, &h_s).is_none());
    }

    #[test]
    fn newton_step_reduced_skips_indefinite_hessian() {
        let h_s = vec![vec![1.0, 0.0], vec![0.0, -1.0]];
        let g_s = vec![1.0, 1.0];
        assert!(newton_step_reduced(&g_s, &h_s).is_none());
    }

    #[test]
    fn newton_step_reduced_skips_non_finite_gradient() {
        let h_s = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let g_s = vec![f64::NAN, 1.0];
        assert!(newton_step_reduced(&g_s, &h_s).is_none());
    }

    #[test]
    fn vec_population_round_trips() {
        let mut pop = VecPopulation::new();
        pop.push_back(vec![1.0], vec![0.5, 3.0]);
        pop.push_back(vec![2.0], vec![0.2, 1.0]);
        assert_eq!(pop.len(), 2);
        pop.set_xf(0, vec![9.0], vec![9.0, 9.0]);
        assert_eq!(pop.get_x(0), &[9.0]);
        assert_eq!(pop.get_f(0), &[9.0, 9.0]);
    }

    #[test]
    fn construction_rejects_zero_gen_or_max_mut() {
        assert!(MemeticMOSearch::new(0, 1, Some(1)).is_err());
        assert!(MemeticMOSearch::new(10, 0, Some(1)).is_err());
        assert!(MemeticMOSearch::new(10, 1, Some(1)).is_ok());
    }

    #[test]
    fn evolve_rejects_undersized_population_or_wrong_objective_count() {
        use crate::expression::Arity;
        use crate::kernel::KernelSet;
        use crate::problem::SymbolicRegressionProblem;

        let kernels = KernelSet::from_names(&["sum", "mul"]).unwrap();
        let mut problem = SymbolicRegressionProblem::new(
            1,
            1,
            1,
            2,
            2,
            2,
            Arity::Scalar(2),
            kernels,
            vec![vec![1.0], vec![2.0]],
            vec![vec![1.0], vec![4.0]],
            (-1.0, 1.0),
            false,
            Some(7),
        )
        .unwrap();

        let mut search = MemeticMOSearch::new(5, 2, Some(1)).unwrap();
        let mut pop = VecPopulation::new();
        pop.push_back(vec![0.5, 0.0, 0.0, 0.0, 0.0, 0.0], vec![1.0, 1.0]);
        assert!(search.evolve(&mut problem, &mut pop, &|| true).is_err());
    }

    #[test]
    fn builder_assembles_a_search_with_defaults() {
        let search = MemeticMOSearchBuilder::default().gen(10).max_mut(2).build().unwrap();
        assert_eq!(search.get_log().len(), 0);
    }

    #[test]
    fn builder_rejects_missing_required_field() {
        assert!(MemeticMOSearchBuilder::default().gen(10).build().is_err());
    }
}

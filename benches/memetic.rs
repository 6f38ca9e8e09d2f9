use std::time::Duration;

use codspeed_criterion_compat::{Criterion, black_box, criterion_group, criterion_main};

use dcgp::random::DcgpRandomGenerator;
use dcgp::{Arity, KernelSet, MemeticMOSearch, MultiObjectiveProblem, SymbolicRegressionProblemBuilder, VecPopulation};

/// A 16-point univariate regression dataset (`x^5 - 2x^3 + x`, the
/// Koza-quintic) with one embedded constant, the same shape spec.md §8's
/// memetic monotonicity scenario exercises.
fn quintic_problem() -> dcgp::SymbolicRegressionProblem {
    let points: Vec<Vec<f64>> = (0..16).map(|i| vec![-2.0 + i as f64 * 0.25]).collect();
    let labels: Vec<Vec<f64>> = points.iter().map(|p| {
        let x = p[0];
        vec![x.powi(5) - 2.0 * x.powi(3) + x]
    }).collect();
    let kernels = KernelSet::from_names(&["sum", "diff", "mul", "pdiv"]).unwrap();
    SymbolicRegressionProblemBuilder::default()
        .n_in(1)
        .d_out(1)
        .n_eph(1)
        .r(15)
        .c(1)
        .l(15)
        .arity(Arity::Scalar(2))
        .kernels(kernels)
        .points(points)
        .labels(labels)
        .seed(11)
        .build()
        .unwrap()
}

fn seed_population(problem: &mut dcgp::SymbolicRegressionProblem, rng: &mut DcgpRandomGenerator) -> VecPopulation {
    use dcgp::random::RandomGenerator;
    let mut population = VecPopulation::new();
    let (lo, hi) = problem.bounds();
    for _ in 0..20 {
        let mut x: Vec<f64> = lo.iter().zip(&hi).map(|(&l, &h)| rng.gen_range_f64(l, h)).collect();
        let graph = problem.expression_template().chromosome().to_vec();
        x.extend(graph.iter().map(|&g| g as f64));
        let f = problem.fitness(&x).unwrap();
        population.push_back(x, f);
    }
    population
}

fn bench_single_generation(c: &mut Criterion) {
    c.bench_function("memetic_single_generation", |b| {
        b.iter(|| {
            let mut problem = quintic_problem();
            let mut rng = DcgpRandomGenerator::new_from_seed(Some(3));
            let mut population = seed_population(&mut problem, &mut rng);
            let mut search = MemeticMOSearch::new(1, 2, Some(3)).unwrap();
            search.evolve(&mut problem, &mut population, &|| true).unwrap();
            black_box(search.get_log().len());
        });
    });
}

fn custom_criterion() -> Criterion {
    Criterion::default().sample_size(10).measurement_time(Duration::from_secs(30))
}

criterion_group! {
    name = benches;
    config = custom_criterion();
    targets = bench_single_generation
}

criterion_main!(benches);

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use factor_rank::{
    calculate_matrix, run_factor_analysis, run_rank_cases, symmetric_eigen, Dataset, ExtractionMethod,
    FactorAnalysisConfig, MatrixKind, RankCasesConfig, RankFunction, RotationMethod, Variable,
};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// Ordinal 1..5 answers with a shared component so the correlation matrix has structure.
fn generate_item_data(n_cases: usize, n_items: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut data = Array2::zeros((n_cases, n_items));
    for mut row in data.rows_mut() {
        let common: f64 = rng.gen_range(-1.5..1.5);
        for v in row.iter_mut() {
            let raw: f64 = 3.0 + common + rng.gen_range(-1.5..1.5);
            *v = raw.round().clamp(1.0, 5.0);
        }
    }
    data
}

fn to_dataset(data: &Array2<f64>) -> Dataset {
    let variables = data
        .columns()
        .into_iter()
        .enumerate()
        .map(|(j, col)| Variable::from_values(format!("item{}", j + 1), &col.to_vec()))
        .collect();
    Dataset::new(variables).expect("benchmark dataset is well formed")
}

fn item_names(n_items: usize) -> Vec<String> {
    (1..=n_items).map(|j| format!("item{}", j)).collect()
}

fn determine_appropriate_sample_size(n_cases: usize, n_items: usize) -> usize {
    match n_cases * n_items {
        0..=100_000 => 100,
        100_001..=1_000_000 => 30,
        _ => 10,
    }
}

fn bench_eigen(c: &mut Criterion) {
    let mut group = c.benchmark_group("eigen");
    for &p in &[10usize, 50, 150] {
        let data = generate_item_data(4 * p, p, 1234);
        let corr = calculate_matrix(data.view(), MatrixKind::Correlation).expect("correlation");
        group.bench_with_input(BenchmarkId::new("qr_iteration", p), &corr, |b, m| {
            b.iter(|| symmetric_eigen(black_box(m)).expect("eigen"));
        });
    }
    group.finish();
}

fn bench_correlation(c: &mut Criterion) {
    let scenarios = [("Small", 200, 10), ("Medium", 2000, 40), ("Tall", 20000, 20)];
    for (name, n_cases, n_items) in scenarios {
        let data = generate_item_data(n_cases, n_items, 1234);
        let mut group = c.benchmark_group(format!("correlation/{}", name));
        group.sample_size(determine_appropriate_sample_size(n_cases, n_items));
        group.throughput(Throughput::Bytes((n_cases * n_items * std::mem::size_of::<f64>()) as u64));
        group.bench_with_input(
            BenchmarkId::new("calculate_matrix", format!("s{}_f{}", n_cases, n_items)),
            &data,
            |b, d| b.iter(|| calculate_matrix(black_box(d.view()), MatrixKind::Correlation).expect("matrix")),
        );
        group.finish();
    }
}

fn bench_factor_analysis(c: &mut Criterion) {
    let scenarios = [("Small", 300, 10), ("Medium", 2000, 40)];
    for (name, n_cases, n_items) in scenarios {
        let dataset = to_dataset(&generate_item_data(n_cases, n_items, 4321));
        let mut group = c.benchmark_group(format!("factor/{}", name));
        group.sample_size(determine_appropriate_sample_size(n_cases, n_items));

        for method in [ExtractionMethod::PrincipalComponents, ExtractionMethod::PrincipalAxisFactoring] {
            let mut config = FactorAnalysisConfig::new(item_names(n_items));
            config.extraction.method = method;
            config.extraction.max_iterations = 200;
            config.rotation.method = RotationMethod::Varimax;
            config.rotation.max_iterations = 200;
            config.descriptives.kmo_bartlett = true;
            group.bench_with_input(BenchmarkId::new(format!("{:?}", method), n_items), &config, |b, cfg| {
                b.iter(|| run_factor_analysis(black_box(&dataset), cfg))
            });
        }
        group.finish();
    }
}

fn bench_rank_cases(c: &mut Criterion) {
    let data = generate_item_data(50_000, 4, 99);
    let dataset = to_dataset(&data);
    let config = RankCasesConfig {
        functions: vec![
            RankFunction::Rank,
            RankFunction::Savage,
            RankFunction::Ntiles { groups: 4 },
            RankFunction::NormalScore,
        ],
        ..RankCasesConfig::new(item_names(4))
    };
    let mut group = c.benchmark_group("rank_cases");
    group.sample_size(20);
    group.throughput(Throughput::Elements(50_000 * 4));
    group.bench_function("four_functions_four_variables", |b| {
        b.iter(|| run_rank_cases(black_box(&dataset), &config).expect("rank cases"))
    });
    group.finish();
}

criterion_group!(benches, bench_eigen, bench_correlation, bench_factor_analysis, bench_rank_cases);
criterion_main!(benches);

use blockwise_ssvd::{stochastic_pca, stochastic_svd, thin_qr, ExecutionContext, PartitionedMatrix};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

fn generate_data(n_samples: usize, n_features: usize) -> Array2<f64> {
    Array::random((n_samples, n_features), Uniform::new(0., 10.))
}

fn split(data: &Array2<f64>, num_partitions: usize) -> PartitionedMatrix {
    PartitionedMatrix::from_dense(data.view(), num_partitions, ExecutionContext::global()).unwrap()
}

// Tall-skinny inputs, varying the partition count at fixed shape
fn bench_thin_qr(c: &mut Criterion) {
    let mut group = c.benchmark_group("thin_qr");

    let (n_samples, n_features) = (20_000, 32);
    let data = generate_data(n_samples, n_features);
    group.throughput(Throughput::Elements((n_samples * n_features) as u64));
    for &num_partitions in [1, 4, 16, 64].iter() {
        let matrix = split(&data, num_partitions);
        group.bench_with_input(
            BenchmarkId::new("partitions", num_partitions),
            &matrix,
            |b, matrix| b.iter(|| thin_qr(matrix, false).unwrap()),
        );
    }
    group.finish();
}

fn bench_stochastic_svd(c: &mut Criterion) {
    let mut group = c.benchmark_group("stochastic_svd");

    let target_rank = 10;
    let oversampling = 5;
    for &(n_samples, n_features) in [(2_000, 200), (10_000, 500)].iter() {
        let matrix = split(&generate_data(n_samples, n_features), 8);
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));
        for &power_iterations in [0, 2].iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("q{}", power_iterations), format!("{}x{}", n_samples, n_features)),
                &matrix,
                |b, matrix| {
                    b.iter(|| stochastic_svd(matrix, target_rank, oversampling, power_iterations, 42).unwrap());
                },
            );
        }
    }
    group.finish();
}

fn bench_stochastic_pca(c: &mut Criterion) {
    let mut group = c.benchmark_group("stochastic_pca");

    for &(n_samples, n_features) in [(2_000, 200), (10_000, 500)].iter() {
        let matrix = split(&generate_data(n_samples, n_features), 8);
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));
        group.bench_with_input(
            BenchmarkId::new("k10_q1", format!("{}x{}", n_samples, n_features)),
            &matrix,
            |b, matrix| b.iter(|| stochastic_pca(matrix, 10, 5, 1, 42).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_thin_qr, bench_stochastic_svd, bench_stochastic_pca);
criterion_main!(benches);

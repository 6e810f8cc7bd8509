use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use dgraph_nd::algs::communicator::ThreadComm;
use dgraph_nd::coarsen::coarsen;
use dgraph_nd::config::{CoarsenParams, Context, NdParams};
use dgraph_nd::dgraph::DistGraph;
use dgraph_nd::order::order_nd;

fn bench_coarsen(c: &mut Criterion) {
    let mut group = c.benchmark_group("coarsen_grid");
    let params = CoarsenParams {
        max_ratio: 1.0,
        ..CoarsenParams::default()
    };
    for procs in [1, 2, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(procs), &procs, |b, &procs| {
            b.iter(|| {
                ThreadComm::run(procs, |comm| {
                    let g = DistGraph::build_grid_3d(comm, [16, 16, 8]).unwrap();
                    coarsen(&g, &params, &Context::default(), 0)
                        .unwrap()
                        .map(|c| c.coarse.vertex_count())
                })
            })
        });
    }
    group.finish();
}

fn bench_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_nd_grid");
    group.sample_size(10);
    for procs in [2, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(procs), &procs, |b, &procs| {
            b.iter(|| {
                ThreadComm::run(procs, |comm| {
                    let g = DistGraph::build_grid_3d(comm, [12, 12, 8]).unwrap();
                    order_nd(&g, &NdParams::default(), &Context::default())
                        .unwrap()
                        .nodes()
                        .len()
                })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_coarsen, bench_order);
criterion_main!(benches);

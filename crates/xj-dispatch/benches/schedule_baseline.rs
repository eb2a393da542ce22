use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use xj_core::{Axis, JoinArg, NamedArray, Value};
use xj_dispatch::{CellArgs, MapJoinRequest, map_join};
use xj_runtime::{Runner, ThreadPoolRunner};

fn grid_args(rows: usize, cols: usize) -> Vec<JoinArg> {
    let row_values: Vec<i64> = (0..rows as i64).collect();
    let col_values: Vec<i64> = (0..cols as i64).collect();
    vec![
        JoinArg::joined(
            NamedArray::vector_i64(Axis::unlabelled("row", rows), &row_values)
                .expect("row vector should build"),
        ),
        JoinArg::joined(
            NamedArray::vector_i64(Axis::unlabelled("col", cols), &col_values)
                .expect("col vector should build"),
        ),
    ]
}

fn multiply(args: &CellArgs<'_>) -> Result<i64, &'static str> {
    let a = args.at(0).and_then(Value::as_i64_scalar).ok_or("row")?;
    let b = args.at(1).and_then(Value::as_i64_scalar).ok_or("col")?;
    Ok(a * b)
}

fn benchmark_schedule(c: &mut Criterion) {
    c.bench_function("map_join/sequential_64x64", |b| {
        b.iter(|| {
            let response = map_join(MapJoinRequest::new(grid_args(64, 64)), multiply)
                .expect("sequential benchmark join should succeed");
            black_box(response.stats.cells);
        });
    });

    c.bench_function("map_join/threads4_shuffled_64x64", |b| {
        b.iter(|| {
            let mut request = MapJoinRequest::new(grid_args(64, 64));
            request.runner = Runner::Threads(ThreadPoolRunner::new(4).expect("threads"));
            request.schedule.shuffle = true;
            request.schedule.seed = Some(17);
            let response = map_join(request, multiply).expect("threaded benchmark join should succeed");
            black_box(response.stats.cells);
        });
    });
}

criterion_group!(schedule_benches, benchmark_schedule);
criterion_main!(schedule_benches);

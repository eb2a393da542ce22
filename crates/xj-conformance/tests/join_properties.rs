//! End-to-end properties of `map_join` over generated inputs.

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestRunner};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use xj_api::{CellArgs, JoinOutput, MapJoinError, arg, constant, map_join};
use xj_cache::{CacheKey, CacheStore, DirCacheStore};
use xj_core::{Axis, JoinArg, MismatchPolicy, NamedArray, Value};
use xj_index::RegistryError;
use xj_runtime::{Runner, ThreadPoolRunner};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("xj_dispatch=debug,xj_index=debug")
        .with_test_writer()
        .try_init();
}

fn sum(args: &CellArgs<'_>) -> Result<i64, String> {
    args.iter()
        .map(|(name, value)| value.as_i64_scalar().ok_or_else(|| format!("{name} not i64")))
        .sum()
}

fn vectors(lens: &[usize], values: &[i64]) -> Vec<JoinArg> {
    lens.iter()
        .enumerate()
        .map(|(i, &len)| {
            let axis = Axis::new(format!("D{i}"), (0..len).map(|j| format!("l{j}")));
            let data: Vec<i64> = (0..len).map(|j| values[i] * 10 + j as i64).collect();
            arg(format!("v{i}"), NamedArray::vector_i64(axis, &data).expect("vector"))
        })
        .collect()
}

#[test]
fn prop_disjoint_axes_form_an_outer_product() {
    let mut runner = TestRunner::new(ProptestConfig::with_cases(
        xj_test_utils::property_test_case_count(),
    ));
    runner
        .run(
            &(
                prop::collection::vec(1_usize..4, 1..4),
                prop::collection::vec(-50_i64..50, 3),
            ),
            |(lens, values)| {
                let output = map_join(sum)
                    .with_shuffle(false)
                    .call(vectors(&lens, &values))
                    .expect("disjoint axes always join");
                let grid = output.into_grid().expect("grid output");
                prop_assert_eq!(grid.shape(), lens.clone());
                let names: Vec<&str> = grid.axes().iter().map(|a| a.name.as_str()).collect();
                let expected_names: Vec<String> =
                    (0..lens.len()).map(|i| format!("D{i}")).collect();
                prop_assert_eq!(names, expected_names.iter().map(String::as_str).collect::<Vec<_>>());

                let total: usize = lens.iter().product();
                for flat in 0..total {
                    let mut rest = flat;
                    let mut coords = vec![0; lens.len()];
                    for (slot, len) in lens.iter().enumerate().rev() {
                        coords[slot] = rest % len;
                        rest /= len;
                    }
                    let expected: i64 = coords
                        .iter()
                        .enumerate()
                        .map(|(i, &j)| values[i] * 10 + j as i64)
                        .sum();
                    prop_assert_eq!(grid.get_at(&coords), Some(&expected));
                }
                Ok(())
            },
        )
        .expect("outer product property");
}

#[test]
fn prop_shuffled_parallel_runs_match_sequential_runs() {
    let mut runner = TestRunner::new(ProptestConfig::with_cases(
        xj_test_utils::property_test_case_count().min(64),
    ));
    runner
        .run(
            &(
                prop::collection::vec(1_usize..5, 1..4),
                prop::collection::vec(-50_i64..50, 3),
                any::<u64>(),
                1_usize..5,
            ),
            |(lens, values, seed, threads)| {
                let baseline = map_join(sum)
                    .with_shuffle(false)
                    .call(vectors(&lens, &values))
                    .expect("sequential join");
                let shuffled = map_join(sum)
                    .with_seed(seed)
                    .with_runner(Runner::Threads(
                        ThreadPoolRunner::new(threads).expect("threads"),
                    ))
                    .call(vectors(&lens, &values))
                    .expect("shuffled join");
                prop_assert_eq!(baseline, shuffled);
                Ok(())
            },
        )
        .expect("shuffle invariance property");
}

#[test]
fn all_scalar_inputs_call_f_once() {
    let calls = AtomicUsize::new(0);
    let output = map_join(|args: &CellArgs<'_>| {
        calls.fetch_add(1, Ordering::SeqCst);
        sum(args)
    })
    .call(vec![constant("a", 40_i64), JoinArg::no_join(2_i64)])
    .expect("scalar join");
    assert_eq!(output, JoinOutput::Scalar(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn no_join_scalar_reaches_all_four_cells() {
    init_logging();
    let seen = std::sync::Mutex::new(Vec::new());
    let output = map_join(|args: &CellArgs<'_>| {
        let k = args.get("k").and_then(Value::as_i64_scalar).ok_or("k")?;
        seen.lock().map_err(|_| "poisoned")?.push(k);
        Ok::<_, &str>(k)
    })
    .with_progress(true)
    .call(vec![
        constant("k", 142_i64),
        arg(
            "c",
            NamedArray::vector_i64(Axis::unlabelled("C", 4), &[1, 2, 3, 4]).expect("C"),
        ),
    ])
    .expect("broadcast join");
    let grid = output.into_grid().expect("grid");
    assert_eq!(grid.axes().len(), 1);
    assert_eq!(grid.axes()[0].name, "C");
    assert_eq!(grid.len(), 4);
    assert_eq!(*seen.lock().expect("lock"), vec![142; 4]);
}

#[test]
fn cache_directory_round_trip_and_corruption_recovery() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(DirCacheStore::open(dir.path().join("cells"), "mul.").expect("open"));
    let calls = AtomicUsize::new(0);
    let multiply = |args: &CellArgs<'_>| {
        calls.fetch_add(1, Ordering::SeqCst);
        let a = args.get("A").and_then(Value::as_i64_scalar).ok_or("A")?;
        let b = args.get("B").and_then(Value::as_i64_scalar).ok_or("B")?;
        Ok::<_, &str>(a * b)
    };
    let inputs = || {
        vec![
            arg(
                "A",
                NamedArray::vector_i64(Axis::new("X", ["a", "b"]), &[10, 20]).expect("A"),
            ),
            arg(
                "B",
                NamedArray::vector_i64(Axis::new("Y", ["1", "2", "3"]), &[1, 2, 3]).expect("B"),
            ),
        ]
    };
    let join = map_join(multiply).with_cache(store.clone());

    let first = join.call_with_stats(inputs()).expect("cold run");
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(first.stats.cache_misses, 6);
    let grid = first.output.as_grid().expect("grid");
    assert_eq!(grid.get(&["a", "2"]), Some(&20));

    let key = CacheKey::from_raw("b.3");
    std::fs::write(store.path_for(&key), b"{ torn").expect("corrupt one entry");
    std::fs::remove_file(store.path_for(&CacheKey::from_raw("a.1"))).expect("drop one entry");

    let second = join.call_with_stats(inputs()).expect("warm run");
    assert_eq!(second.output, first.output);
    assert_eq!(second.stats.cache_hits, 4);
    assert_eq!(second.stats.cache_misses, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(store.load(&key).expect("load"), Some(b"60".to_vec()));
}

#[test]
fn f_errors_abort_the_whole_invocation() {
    let err = map_join(|args: &CellArgs<'_>| {
        let x = args.at(0).and_then(Value::as_i64_scalar).ok_or(-1)?;
        if x == 3 { Err(x) } else { Ok(x) }
    })
    .with_runner(Runner::Threads(ThreadPoolRunner::new(2).expect("threads")))
    .call(vec![JoinArg::joined(
        NamedArray::vector_i64(Axis::unlabelled("N", 6), &[0, 1, 2, 3, 4, 5]).expect("N"),
    )])
    .expect_err("cell 3 fails");
    assert!(matches!(err, MapJoinError::Apply(3)));
}

#[test]
fn intersect_and_fail_policies_on_the_same_inputs() {
    let inputs = || {
        vec![
            JoinArg::joined(
                NamedArray::vector_i64(Axis::new("S", ["a", "b", "c"]), &[1, 2, 3]).expect("p"),
            ),
            JoinArg::joined(
                NamedArray::vector_i64(Axis::new("S", ["b", "c", "d"]), &[4, 5, 6]).expect("q"),
            ),
        ]
    };
    let grid = map_join(sum)
        .with_policy(MismatchPolicy::Intersect)
        .call(inputs())
        .expect("intersect")
        .into_grid()
        .expect("grid");
    assert_eq!(grid.axes()[0].labels, vec!["b".to_owned(), "c".to_owned()]);
    assert_eq!(grid.values(), &[6, 8]);

    let err = map_join(sum).call(inputs()).expect_err("fail policy");
    match err {
        MapJoinError::Registry(RegistryError::AxisConflict {
            axis,
            first_labels,
            second_labels,
            ..
        }) => {
            assert_eq!(axis, "S");
            assert_eq!(first_labels.len(), 3);
            assert_eq!(second_labels[2], "d");
        }
        other => panic!("expected axis conflict, got {other:?}"),
    }
}

//! Integration Tests for the Value Graph
//!
//! These tests run graphs across real worker threads and verify that cells,
//! stages and contexts work together correctly.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use datavis_reactive::{
    apply0, apply1, apply2, join_all, value, Cell, Context, ContextError, Runtime, RuntimeConfig,
    WorkerContext,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Run `f` on a thread with no bound context, so tests don't share one.
fn on_fresh_thread(f: impl FnOnce() + Send + 'static) {
    thread::spawn(f).join().unwrap();
}

/// Poll `condition` until it holds or the timeout expires.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// A literal fed through one stage is ready after a single drain.
#[test]
fn literal_plus_five_after_one_drain() {
    on_fresh_thread(|| {
        let ui = Context::new("ui");

        let input = value(10);
        assert!(input.is_ready());
        assert_eq!(*input.get(), 10);

        let output = apply1(Some(&ui), &input, |_, x| x + 5);
        ui.drain().unwrap();

        assert!(output.is_ready());
        assert_eq!(*output.get(), 15);
    });
}

/// Two literal inputs are summed exactly once.
#[test]
fn two_literals_summed_once() {
    on_fresh_thread(|| {
        let ui = Context::new("ui");
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let a = value(2);
        let b = value(3);
        let sum = apply2(Some(&ui), &a, &b, move |_, a, b| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            a + b
        });

        ui.drain().unwrap();
        assert_eq!(*sum.get(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    });
}

/// Dropping the result of a running stage sets its token mid-execution,
/// and the orphaned stage is freed together with its inputs.
#[test]
fn dropping_result_cancels_running_stage() {
    let worker = WorkerContext::spawn("background").unwrap();
    let started = Arc::new(AtomicBool::new(false));
    let saw_cancel = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    // Only the stage keeps the input value alive once our handle is gone
    let input = value(Arc::new(7));
    let input_value = Arc::downgrade(input.get());

    let (started_clone, saw_cancel_clone, finished_clone) =
        (started.clone(), saw_cancel.clone(), finished.clone());
    let output = apply1(Some(worker.context()), &input, move |token, x: &Arc<i32>| {
        started_clone.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + TIMEOUT;
        while !token.is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        saw_cancel_clone.store(token.is_cancelled(), Ordering::SeqCst);
        finished_clone.store(true, Ordering::SeqCst);
        **x * 2
    });
    drop(input);

    assert!(eventually(|| started.load(Ordering::SeqCst)));
    drop(output);

    assert!(eventually(|| finished.load(Ordering::SeqCst)));
    assert!(saw_cancel.load(Ordering::SeqCst));

    // The deferred release runs on the worker and frees the stage's inputs
    assert!(eventually(|| input_value.upgrade().is_none()));

    // The worker keeps serving after the orphaned stage
    let marker = apply0(Some(worker.context()), |_| "alive");
    assert!(eventually(|| marker.is_ready()));
    worker.shutdown();
}

/// A stage cancelled before its input arrives never runs.
#[test]
fn dropped_result_skips_pending_stage() {
    let worker = WorkerContext::spawn("background").unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let gate = Cell::pending();

    let calls_clone = calls.clone();
    let output = apply1(Some(worker.context()), &gate, move |_, x: &i32| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        x + 1
    });
    assert_eq!(gate.subscriber_count(), 1);

    drop(output);
    // The stage is released on the worker thread
    assert!(eventually(|| gate.subscriber_count() == 0));

    gate.complete(1);
    let marker = apply0(Some(worker.context()), |_| ());
    assert!(eventually(|| marker.is_ready()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Dropping the end of a chain releases every upstream stage with it.
#[test]
fn cancellation_cascades_upstream() {
    let worker = WorkerContext::spawn("loader").unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let gate = Cell::pending();

    let (first, second) = (calls.clone(), calls.clone());
    let parsed = apply1(Some(worker.context()), &gate, move |_, raw: &String| {
        first.fetch_add(1, Ordering::SeqCst);
        raw.len()
    });
    let shown = apply1(Some(worker.context()), &parsed, move |_, len| {
        second.fetch_add(1, Ordering::SeqCst);
        format!("{} bytes", len)
    });

    // Only the tail is held; the middle stage lives through it
    drop(parsed);
    drop(shown);

    assert!(eventually(|| gate.subscriber_count() == 0));
    gate.complete("payload".to_string());

    let marker = apply0(Some(worker.context()), |_| ());
    assert!(eventually(|| marker.is_ready()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Subscribing while another thread completes the input neither loses the
/// notification nor delivers it twice.
#[test]
fn subscribe_racing_complete_runs_every_stage_once() {
    const ROUNDS: usize = 1000;

    let worker = WorkerContext::spawn("racing").unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let mut outputs = Vec::with_capacity(ROUNDS);

    for round in 0..ROUNDS {
        let input = Cell::pending();
        let barrier = Arc::new(Barrier::new(2));

        let (writer, start) = (input.clone(), barrier.clone());
        let completer = thread::spawn(move || {
            start.wait();
            writer.complete(round);
        });

        let calls_clone = calls.clone();
        barrier.wait();
        let output = apply1(Some(worker.context()), &input, move |_, x: &usize| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            x + 1
        });
        completer.join().unwrap();
        outputs.push((round, output));
    }

    assert!(eventually(|| outputs.iter().all(|(_, output)| output.is_ready())));
    for (round, output) in &outputs {
        assert_eq!(*output.get(), round + 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), ROUNDS as i32);
}

/// Three stages on three contexts each run exactly once.
#[test]
fn chain_across_three_contexts() {
    on_fresh_thread(|| {
        let ui = Context::new("ui");
        let io = WorkerContext::spawn("io").unwrap();
        let compute = WorkerContext::spawn("compute").unwrap();

        let counts: Arc<[AtomicI32; 3]> = Arc::new(Default::default());
        let (a, b, c) = (counts.clone(), counts.clone(), counts.clone());

        let read = apply0(Some(io.context()), move |_| {
            a[0].fetch_add(1, Ordering::SeqCst);
            assert_eq!(thread::current().name(), Some("io"));
            vec![3, 1, 2]
        });
        let sorted = apply1(Some(compute.context()), &read, move |_, rows| {
            b[1].fetch_add(1, Ordering::SeqCst);
            assert_eq!(thread::current().name(), Some("compute"));
            let mut rows = rows.clone();
            rows.sort();
            rows
        });
        let shown = apply1(Some(&ui), &sorted, move |_, rows| {
            c[2].fetch_add(1, Ordering::SeqCst);
            format!("{:?}", rows)
        });

        let shown = ui.wait_ready(&shown, TIMEOUT).unwrap();
        assert_eq!(shown, "[1, 2, 3]");
        for count in counts.iter() {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    });
}

/// Completing a cell twice is reported as a programming error.
#[test]
fn double_completion_is_rejected() {
    let cell = Cell::pending();
    cell.complete(1);
    assert_eq!(cell.try_complete(2), Err(2));

    let result = panic::catch_unwind(AssertUnwindSafe(|| cell.complete(3)));
    assert!(result.is_err());
    assert_eq!(*cell.get(), 1);
}

/// Failures travel inside the value and downstream stages short-circuit.
#[test]
fn errors_are_carried_in_values() {
    on_fresh_thread(|| {
        let ui = Context::new("ui");
        let io = WorkerContext::spawn("io").unwrap();

        let load = |path: &'static str| {
            apply0(Some(io.context()), move |_| {
                if path.ends_with(".csv") {
                    Ok("1,2,3".to_string())
                } else {
                    Err(format!("unsupported file: {}", path))
                }
            })
        };
        let parse = |raw: &Cell<Result<String, String>>| {
            apply1(Some(io.context()), raw, |_, raw| {
                raw.as_ref()
                    .map_err(Clone::clone)
                    .map(|text| text.split(',').filter_map(|v| v.parse::<i32>().ok()).sum::<i32>())
            })
        };

        let good = parse(&load("samples.csv"));
        let bad = parse(&load("samples.nrrd"));

        assert_eq!(ui.wait_ready(&good, TIMEOUT).unwrap(), &Ok(6));
        assert_eq!(
            ui.wait_ready(&bad, TIMEOUT).unwrap(),
            &Err("unsupported file: samples.nrrd".to_string())
        );
    });
}

/// Many inputs on different threads join in declaration order.
#[test]
fn join_all_across_workers() {
    on_fresh_thread(|| {
        let ui = Context::new("ui");
        let workers: Vec<_> = (0..3)
            .map(|i| WorkerContext::spawn(format!("worker-{}", i)).unwrap())
            .collect();

        let parts: Vec<_> = workers
            .iter()
            .enumerate()
            .map(|(i, worker)| {
                apply0(Some(worker.context()), move |_| {
                    thread::sleep(Duration::from_millis(5 * (3 - i as u64)));
                    i * 10
                })
            })
            .collect();
        let joined = join_all(Some(&ui), parts, |_, values| {
            values.into_iter().copied().collect::<Vec<_>>()
        });

        assert_eq!(ui.wait_ready(&joined, TIMEOUT).unwrap(), &vec![0, 10, 20]);
    });
}

/// A running stage's progress is visible through its cell.
#[test]
fn progress_is_reported() {
    let worker = WorkerContext::spawn("progress").unwrap();
    let release = Arc::new(AtomicBool::new(false));

    let gate = release.clone();
    let output = apply0(Some(worker.context()), move |token| {
        token.set_progress(0.5);
        while !gate.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        token.set_progress(1.0);
        "done"
    });

    assert!(eventually(|| output.progress() == 0.5));
    release.store(true, Ordering::SeqCst);
    assert!(eventually(|| output.is_ready()));
    assert_eq!(output.progress(), 1.0);
}

/// Releases posted from a worker are dropped on the owning thread.
#[test]
fn stages_owned_by_ui_are_dropped_on_ui_thread() {
    struct Owned(Arc<parking_lot::Mutex<Option<thread::ThreadId>>>);

    impl Drop for Owned {
        fn drop(&mut self) {
            *self.0.lock() = Some(thread::current().id());
        }
    }

    on_fresh_thread(|| {
        let ui = Context::new("ui");
        let worker = WorkerContext::spawn("io").unwrap();
        let dropped_on = Arc::new(parking_lot::Mutex::new(None));

        let remote = ui.clone();
        let owned = Owned(dropped_on.clone());
        let posted = apply0(Some(worker.context()), move |_| remote.release(owned));

        ui.wait_ready(&posted, TIMEOUT).unwrap();
        ui.process_until(|| dropped_on.lock().is_some(), TIMEOUT).unwrap();
        assert_eq!(*dropped_on.lock(), Some(thread::current().id()));
    });
}

/// The runtime wires a main context and configured workers together.
#[test]
fn runtime_from_json_config() {
    on_fresh_thread(|| {
        let config =
            RuntimeConfig::from_json_str(r#"{ "contexts": [ { "name": "io" }, { "name": "compute" } ] }"#)
                .unwrap();
        let runtime = Runtime::new(&config).unwrap();

        let io = runtime.context("io").unwrap();
        let compute = runtime.context("compute").unwrap();

        let raw = apply0(Some(io), |_| "4,5,6".to_string());
        let total = apply1(Some(compute), &raw, |_, raw| {
            raw.split(',').map(|v| v.parse::<i32>().unwrap()).sum::<i32>()
        });
        let label = apply1(Some(runtime.main()), &total, |_, total| format!("total={}", total));

        assert_eq!(runtime.main().wait_ready(&label, TIMEOUT).unwrap(), "total=15");
        runtime.shutdown();
    });
}

/// Pumping a context from one of its own handlers is refused.
#[test]
fn reentrant_drain_is_an_error() {
    on_fresh_thread(|| {
        let runtime = Runtime::new(&RuntimeConfig { contexts: Vec::new() }).unwrap();
        let main = runtime.main().clone();

        let nested = apply0(Some(runtime.main()), move |_| main.drain().map(|_| ()));
        runtime.main().drain().unwrap();

        assert!(matches!(nested.get(), Err(ContextError::Reentrant(_))));
    });
}

/// Async code can await a cell filled by a worker.
#[tokio::test]
async fn async_wait_on_worker_result() {
    let worker = WorkerContext::spawn("async").unwrap();

    let output = apply0(Some(worker.context()), |_| {
        thread::sleep(Duration::from_millis(10));
        42
    });

    let result = tokio::time::timeout(TIMEOUT, output.wait()).await.unwrap();
    assert_eq!(*result, 42);
}

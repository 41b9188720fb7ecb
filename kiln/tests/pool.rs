mod common;

use common::{Call, RecordingDriver, broken, gated, tagged};
use crossbeam_channel::bounded;
use kiln::cache::MemoryBlobCache;
use kiln::{
    ChannelDispatcher, CompilerConfig, Job, NoContext, Priority, ProgramCompiler, TokenId, WorkerPool,
    WorkerPoolConfig, WorkerPriority,
};
use more_asserts::assert_lt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn single_worker(driver: &Arc<RecordingDriver>) -> ProgramCompiler {
    let config = CompilerConfig::builder()
        .pool(WorkerPoolConfig::single(WorkerPriority::Normal))
        .build();
    ProgramCompiler::new(driver.clone(), config).expect("compiler starts")
}

#[test]
fn every_program_compiles_exactly_once() {
    let driver = RecordingDriver::new();
    let config = CompilerConfig::builder()
        .pool(WorkerPoolConfig::builder().max_workers(2).build())
        .build();
    let compiler = ProgramCompiler::new(driver.clone(), config).expect("compiler starts");

    let tokens: Vec<_> = (0..8).map(|i| compiler.submit(tagged(&format!("P{i}")))).collect();
    for token in tokens {
        assert!(compiler.get_result(token).is_some());
    }

    assert_eq!(driver.programs_created(), 8);
    assert_eq!(compiler.stats().compiled, 8);
    assert_eq!(compiler.pending_jobs(), 0);
}

#[test]
fn single_worker_prefers_urgent_jobs() {
    let pool = WorkerPool::new(WorkerPoolConfig::single(WorkerPriority::Normal), Arc::new(NoContext))
        .expect("pool starts");
    let order = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = bounded::<()>(0);
    let (started_tx, started_rx) = bounded::<()>(1);
    let (done_tx, done_rx) = bounded::<()>(4);

    pool.enqueue(Job::new(Priority::Normal, TokenId::next(), move || {
        let _ = started_tx.send(());
        let _ = gate_rx.recv();
    }));
    started_rx.recv_timeout(TIMEOUT).expect("gate job started");

    for (name, priority) in [
        ("N1", Priority::Normal),
        ("U1", Priority::Urgent),
        ("N2", Priority::Normal),
        ("U2", Priority::Urgent),
    ] {
        let order = order.clone();
        let done = done_tx.clone();
        pool.enqueue(Job::new(priority, TokenId::next(), move || {
            order.lock().push(name);
            let _ = done.send(());
        }));
    }
    assert_eq!(pool.pending(), 4);

    drop(gate_tx);
    for _ in 0..4 {
        done_rx.recv_timeout(TIMEOUT).expect("job ran");
    }

    assert_eq!(*order.lock(), ["U1", "U2", "N1", "N2"]);
}

#[test]
fn compiler_pool_drains_urgent_programs_first() {
    let driver = RecordingDriver::new();
    let compiler = single_worker(&driver);

    let blocker = compiler.submit(gated("Blocker"));
    assert!(driver.wait_for_gated(TIMEOUT));

    let mut tokens = Vec::new();
    for (name, priority) in [
        ("N1", Priority::Normal),
        ("U1", Priority::Urgent),
        ("N2", Priority::Normal),
        ("U2", Priority::Urgent),
    ] {
        let mut desc = tagged(name);
        desc.priority = priority;
        tokens.push(compiler.submit(desc));
    }

    let (ready_tx, ready_rx) = bounded(1);
    compiler.notify_when_all_ready(move || {
        let _ = ready_tx.send(());
    });
    driver.open_gate();
    ready_rx.recv_timeout(TIMEOUT).expect("all programs resolved");

    let vertex_tags: Vec<_> = driver
        .compiled_tags()
        .into_iter()
        .filter(|tag| !tag.is_empty())
        .collect();
    assert_eq!(vertex_tags, ["// Blocker", "// U1", "// U2", "// N1", "// N2"]);

    assert!(compiler.get_result(blocker).is_some());
    for token in tokens {
        assert!(compiler.get_result(token).is_some());
    }
}

#[test]
fn canceling_a_queued_job_drops_it() {
    let driver = RecordingDriver::new();
    let compiler = single_worker(&driver);

    let blocker = compiler.submit(gated("Blocker"));
    assert!(driver.wait_for_gated(TIMEOUT));

    let doomed = compiler.submit(tagged("Doomed"));
    assert_eq!(compiler.pending_jobs(), 1);

    compiler.cancel(doomed);
    assert_eq!(compiler.pending_jobs(), 0);

    driver.open_gate();
    assert!(compiler.get_result(blocker).is_some());

    assert_eq!(driver.programs_created(), 1);
    assert!(!driver.compiled_tags().iter().any(|tag| tag == "// Doomed"));
    assert_eq!(compiler.stats().canceled, 1);
}

#[test]
fn canceling_a_running_job_never_waits_for_it() {
    let driver = RecordingDriver::new();
    let mut compiler = single_worker(&driver);

    let running = compiler.submit(gated("Running"));
    assert!(driver.wait_for_gated(TIMEOUT));

    let started = Instant::now();
    compiler.cancel(running);
    assert_lt!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(compiler.stats().canceled, 1);

    driver.open_gate();
    compiler.terminate();

    assert_eq!(driver.programs_created(), 1);
    assert_release_order(&driver.calls());
    assert_eq!(driver.inner().live_stages(), 0);
    assert_eq!(driver.inner().live_programs(), 0);
}

#[test]
fn blocked_workers_never_stall_get_result() {
    let driver = RecordingDriver::new();
    let compiler = single_worker(&driver);

    let blocker = compiler.submit(gated("Blocker"));
    assert!(driver.wait_for_gated(TIMEOUT));

    let token = compiler.submit(tagged("Inline"));
    let started = Instant::now();
    assert!(compiler.get_result(token).is_some());
    assert_lt!(started.elapsed(), TIMEOUT);

    let threads = driver.compile_threads();
    assert!(threads.contains(&std::thread::current().id()));

    driver.open_gate();
    assert!(compiler.get_result(blocker).is_some());
}

#[test]
fn notifier_fires_once_after_the_last_program() {
    let driver = RecordingDriver::new();
    let compiler = single_worker(&driver);
    let hits = Arc::new(AtomicUsize::new(0));

    let blocker = compiler.submit(gated("Blocker"));
    let tokens: Vec<_> = (0..3).map(|i| compiler.submit(tagged(&format!("P{i}")))).collect();

    let counter = hits.clone();
    let (ready_tx, ready_rx) = bounded(1);
    compiler.notify_when_all_ready(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = ready_tx.send(());
    });
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    driver.open_gate();
    ready_rx.recv_timeout(TIMEOUT).expect("callback fired");

    assert!(compiler.get_result(blocker).is_some());
    for token in tokens {
        assert!(compiler.get_result(token).is_some());
    }

    // later programs belong to the next cycle
    let late = compiler.submit(tagged("Late"));
    assert!(compiler.get_result(late).is_some());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn callbacks_run_on_the_pumping_thread() {
    let driver = RecordingDriver::new();
    let (dispatcher, receiver) = ChannelDispatcher::new();
    let config = CompilerConfig::builder()
        .pool(WorkerPoolConfig::single(WorkerPriority::Normal))
        .dispatcher(dispatcher)
        .build();
    let compiler = ProgramCompiler::new(driver.clone(), config).expect("compiler starts");

    let token = compiler.submit(tagged("Marshaled"));
    let ran_on = Arc::new(Mutex::new(None));
    let slot = ran_on.clone();
    compiler.notify_when_all_ready(move || {
        *slot.lock() = Some(std::thread::current().id());
    });

    assert!(receiver.run_next(TIMEOUT));
    assert_eq!(*ran_on.lock(), Some(std::thread::current().id()));
    assert!(compiler.get_result(token).is_some());
}

#[test]
fn failed_programs_detach_stages_before_deleting_them() {
    let driver = RecordingDriver::new();
    let compiler = single_worker(&driver);

    let token = compiler.submit(broken("Broken"));
    assert!(compiler.get_result(token).is_none());
    assert_eq!(compiler.stats().failed, 1);

    assert_release_order(&driver.calls());
    assert_eq!(driver.inner().live_stages(), 0);
    assert_eq!(driver.inner().live_programs(), 0);
}

#[test]
fn canceled_programs_detach_stages_before_deleting_them() {
    let driver = RecordingDriver::new();
    let mut compiler = single_worker(&driver);

    let token = compiler.submit(tagged("Resolved"));
    let (ready_tx, ready_rx) = bounded(1);
    compiler.notify_when_all_ready(move || {
        let _ = ready_tx.send(());
    });
    ready_rx.recv_timeout(TIMEOUT).expect("program resolved");

    compiler.cancel(token);
    // the worker may still be retiring the job
    compiler.terminate();

    assert_release_order(&driver.calls());
    assert_eq!(driver.inner().live_stages(), 0);
    assert_eq!(driver.inner().live_programs(), 0);
}

#[test]
fn cache_hits_skip_the_queue() {
    let driver = RecordingDriver::new();
    let cache = Arc::new(MemoryBlobCache::new());
    let config = CompilerConfig::builder()
        .pool(WorkerPoolConfig::single(WorkerPriority::Normal))
        .cache(cache.clone())
        .build();
    let compiler = ProgramCompiler::new(driver.clone(), config).expect("compiler starts");

    let mut desc = tagged("Cached");
    desc.cache_id = Some(77);

    let first = compiler.submit(desc.clone());
    assert!(compiler.get_result(first).is_some());
    assert_eq!(cache.len(), 1);

    let pending = compiler.pending_jobs();
    let second = compiler.submit(desc);
    assert!(compiler.is_ready(&second));
    assert_eq!(compiler.pending_jobs(), pending);
    assert!(compiler.get_result(second).is_some());

    assert_eq!(driver.programs_created(), 1);
    assert_eq!(compiler.stats().cache_hits, 1);
}

/// Every stage is detached from its program before it's destroyed, and all stages go before the
/// program itself.
fn assert_release_order(calls: &[Call]) {
    for (i, call) in calls.iter().enumerate() {
        match call {
            Call::DestroyStage(stage) => {
                let detached = calls[..i]
                    .iter()
                    .any(|c| matches!(c, Call::Detach(_, s) if s == stage));
                assert!(detached, "stage {stage} destroyed before it was detached");
            }
            Call::DestroyProgram(program) => {
                let later_stage_calls = calls[i..].iter().any(|c| {
                    matches!(c, Call::Detach(p, _) if p == program)
                });
                assert!(!later_stage_calls, "program {program} destroyed before its stages");
            }
            _ => {}
        }
    }

    assert!(calls.iter().any(|c| matches!(c, Call::DestroyProgram(_))));
}

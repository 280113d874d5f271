mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::*;
use lumen_core::abi::RuntimeConfig;
use lumen_core::{EngineError, GenerationRequest, PerformanceMode};

fn long_request() -> GenerationRequest {
    GenerationRequest::new("keep going for a while")
        .max_tokens(400)
        .temperature(0.0)
}

#[test]
fn second_generate_fails_fast_with_session_busy() {
    let (mgr, ctl) = manager();
    ctl.set_delay(Duration::from_millis(5));
    let h = load(&mgr, 1024);

    let worker = {
        let mgr = mgr.clone();
        thread::spawn(move || mgr.generate(h, long_request()))
    };
    assert!(wait_until(|| mgr.is_generating(h)));

    assert_eq!(
        mgr.generate(h, GenerationRequest::new("me too")).unwrap_err(),
        EngineError::SessionBusy
    );

    assert!(mgr.cancel_generation(h));
    assert_eq!(worker.join().unwrap().unwrap_err(), EngineError::Cancelled);
    assert!(!mgr.is_generating(h));

    // Free again after the first call ended.
    assert!(mgr.generate(h, GenerationRequest::new("now").max_tokens(2)).is_ok());
}

#[test]
fn loading_cancels_and_awaits_inflight_generation() {
    let (mgr, ctl) = manager();
    ctl.set_delay(Duration::from_millis(5));
    let a = load(&mgr, 1024);

    let worker = {
        let mgr = mgr.clone();
        thread::spawn(move || mgr.generate(a, long_request()))
    };
    assert!(wait_until(|| ctl.evals.load(Ordering::SeqCst) >= 2));

    let b = load(&mgr, 64);

    assert_eq!(worker.join().unwrap().unwrap_err(), EngineError::Cancelled);
    assert_eq!(ctl.live.load(Ordering::SeqCst), 1);
    assert_eq!(mgr.get_kv_cache_size(b).size, 0);
    assert_eq!(mgr.current_handle(), b);
}

#[test]
fn reload_racing_generation_start_never_waits_out_the_request() {
    let (mgr, ctl) = manager();
    ctl.set_delay(Duration::from_millis(2));
    let mut current = load(&mgr, 1024);

    for round in 0..25u32 {
        let worker = {
            let mgr = mgr.clone();
            thread::spawn(move || mgr.generate(current, long_request()))
        };
        // Vary the gap so the reload lands before, during and after the request starts.
        thread::sleep(Duration::from_micros(u64::from(round % 5) * 150));

        let started = std::time::Instant::now();
        current = load(&mgr, 1024);
        // An uncancelled request runs 400 steps at ~4ms each.
        assert!(
            started.elapsed() < Duration::from_millis(800),
            "round {round}: load waited {:?}",
            started.elapsed()
        );

        let err = worker.join().unwrap().unwrap_err();
        assert!(
            matches!(err, EngineError::Cancelled | EngineError::NoModelLoaded),
            "round {round}: {err:?}"
        );
        assert_eq!(ctl.live.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn freeing_cancels_inflight_generation() {
    let (mgr, ctl) = manager();
    ctl.set_delay(Duration::from_millis(5));
    let h = load(&mgr, 1024);

    let worker = {
        let mgr = mgr.clone();
        thread::spawn(move || mgr.generate(h, long_request()))
    };
    assert!(wait_until(|| mgr.is_generating(h)));

    mgr.free_model(h);
    assert_eq!(worker.join().unwrap().unwrap_err(), EngineError::Cancelled);
    assert_eq!(ctl.live.load(Ordering::SeqCst), 0);
}

#[test]
fn mode_change_applies_at_next_dispatch() {
    let (mgr, ctl) = manager();
    ctl.set_delay(Duration::from_millis(2));
    let h = load(&mgr, 1024);

    let worker = {
        let mgr = mgr.clone();
        thread::spawn(move || {
            mgr.generate(
                h,
                GenerationRequest::new("a b c").max_tokens(60).temperature(0.0),
            )
        })
    };
    assert!(wait_until(|| ctl.evals.load(Ordering::SeqCst) >= 3));

    let applied = mgr.adjust_performance_mode(h, PerformanceMode::PowerSave);
    assert_eq!(
        applied,
        Some(RuntimeConfig {
            threads: 2,
            batch_size: 64
        })
    );

    // Metric polls never wait for the generation to finish.
    for _ in 0..10 {
        let m = mgr.performance_metrics(h).unwrap();
        assert!(m.size <= m.max_size);
        assert_eq!(m.mode, Some(PerformanceMode::PowerSave));
    }

    let out = worker.join().unwrap().unwrap();
    assert_eq!(out.tokens_generated, 60);

    let configs = ctl.configs.lock().clone();
    assert_eq!(configs.len(), 2, "{configs:?}");
    assert_eq!(configs[0].threads, 4);
    assert_eq!(configs[1], RuntimeConfig { threads: 2, batch_size: 64 });
}

#[test]
fn powersave_does_not_outrun_performance_mode() {
    let (mgr, ctl) = manager();
    ctl.set_delay(Duration::from_millis(2));
    let h = load(&mgr, 1024);
    let req = || GenerationRequest::new("same input").max_tokens(12).temperature(0.0);

    mgr.adjust_performance_mode(h, PerformanceMode::Performance);
    mgr.generate(h, req()).unwrap();
    let fast = mgr.performance_metrics(h).unwrap();
    assert_eq!(fast.thread_count, 8);

    mgr.clear_kv_cache(h);
    mgr.adjust_performance_mode(h, PerformanceMode::PowerSave);
    mgr.generate(h, req()).unwrap();
    let slow = mgr.performance_metrics(h).unwrap();
    assert_eq!(slow.thread_count, 2);
    assert_eq!(slow.batch_size, 64);

    assert!(
        slow.tokens_per_second <= fast.tokens_per_second,
        "powersave {} tok/s vs performance {} tok/s",
        slow.tokens_per_second,
        fast.tokens_per_second
    );
}

#[test]
fn embed_interleaves_with_generation_without_touching_cache() {
    let (mgr, ctl) = manager();
    ctl.set_delay(Duration::from_millis(3));
    let h = load(&mgr, 1024);

    let worker = {
        let mgr = mgr.clone();
        thread::spawn(move || {
            mgr.generate(
                h,
                GenerationRequest::new("x").max_tokens(20).temperature(0.0),
            )
        })
    };
    assert!(wait_until(|| ctl.evals.load(Ordering::SeqCst) >= 2));
    assert_eq!(mgr.embed(h, "side channel").unwrap().len(), 8);

    let out = worker.join().unwrap().unwrap();
    assert_eq!(mgr.get_kv_cache_size(h).size, 1 + out.tokens_generated);
}

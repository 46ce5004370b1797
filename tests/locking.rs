//! Cross-holder lock behavior at the operation level.
//!
//! The OS advisory lock treats every open file description as a separate
//! owner, so two `LockManager`s in one test process contend exactly like
//! two processes would.

mod common;

use std::time::{Duration, Instant};

use common::{fresh_project, installed_project};

use claude_wm::error::WmError;
use claude_wm::fsio::lock::{LockManager, LockOptions};
use claude_wm::merge::apply::CancelToken;
use claude_wm::ops::update::{self, UpdateArgs};
use claude_wm::ops::{OpContext, status};

/// Write a `.wm/config.toml` with a short lock timeout so contention tests
/// finish quickly.
fn set_short_timeout(ctx: &OpContext, secs: u64) {
    std::fs::create_dir_all(ctx.layout.wm_dir()).unwrap();
    std::fs::write(
        ctx.layout.config_path(),
        format!("[lock]\ntimeout_secs = {secs}\nretry_delay_ms = 5\n"),
    )
    .unwrap();
}

#[test]
fn update_times_out_against_a_held_lock() {
    let (dir, ctx) = installed_project();
    set_short_timeout(&ctx, 1);
    // Rebuild the context so the shorter timeout takes effect.
    let ctx = OpContext::new(dir.path()).unwrap();

    let holder = LockManager::new();
    let _guard = holder
        .acquire(&ctx.layout.lock_path(), LockOptions::default())
        .unwrap();

    let started = Instant::now();
    let err = update::run(&ctx, &UpdateArgs::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, WmError::Lock(_)));
    assert_eq!(err.exit_code(), 5);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn update_succeeds_once_the_holder_releases() {
    let (dir, ctx) = installed_project();
    set_short_timeout(&ctx, 10);
    let ctx = OpContext::new(dir.path()).unwrap();

    let holder = LockManager::new();
    let guard = holder
        .acquire(&ctx.layout.lock_path(), LockOptions::default())
        .unwrap();

    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        guard.release();
    });

    // Blocks on the lock, then proceeds.
    update::run(&ctx, &UpdateArgs::default(), &CancelToken::new()).unwrap();
    handle.join().unwrap();
}

#[test]
fn status_runs_under_a_shared_holder() {
    let (_dir, ctx) = installed_project();
    // Another reader holds the lock in shared mode; status (also shared)
    // must not block on it.
    let other_reader = LockManager::new();
    let _guard = other_reader
        .acquire(&ctx.layout.lock_path(), LockOptions::shared())
        .unwrap();

    let report = status::run(&ctx).unwrap();
    assert_eq!(report.state, "ready");
}

#[test]
fn stale_sidecar_without_holder_is_reaped() {
    let (_dir, ctx) = fresh_project();
    // A leftover sidecar from a dead process: no OS lock behind it.
    std::fs::create_dir_all(ctx.layout.wm_dir()).unwrap();
    std::fs::write(ctx.layout.lock_path(), "{not even json").unwrap();

    // Install acquires the exclusive lock straight through the leftovers.
    claude_wm::ops::install::run(&ctx).unwrap();
    assert!(
        !ctx.layout.lock_path().exists(),
        "lock released after install"
    );
}

#[test]
fn lock_metrics_accumulate_per_context() {
    let (_dir, ctx) = installed_project();
    status::run(&ctx).unwrap();
    status::run(&ctx).unwrap();
    let metrics = ctx.locks.metrics();
    assert_eq!(metrics.total_requests, 3, "install + two status calls");
    assert_eq!(metrics.successful, 3);
    assert_eq!(metrics.active, 0, "all guards released");
}

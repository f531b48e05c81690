//! Deferred-signal scope behaviour against real signal delivery.
//!
//! Every test installs a counting handler as the "previous" handler, so a
//! replayed signal is observable instead of terminating the test process.
//! Handlers are process-wide, hence the tests run one at a time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{const_mutex, Mutex, MutexGuard};
use site_metrics_sink::error_handling::SignalError;
use site_metrics_sink::signals::{DeferredSignals, Signal};

static SERIAL: Mutex<()> = const_mutex(());
static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);
static TERMINATES: AtomicUsize = AtomicUsize::new(0);

extern "C" fn count_signal(signum: libc::c_int) {
    match signum {
        libc::SIGINT => INTERRUPTS.fetch_add(1, Ordering::SeqCst),
        libc::SIGTERM => TERMINATES.fetch_add(1, Ordering::SeqCst),
        _ => 0,
    };
}

/// Serializes the test and installs fresh counting handlers.
fn setup() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock();
    INTERRUPTS.store(0, Ordering::SeqCst);
    TERMINATES.store(0, Ordering::SeqCst);
    for signum in [libc::SIGINT, libc::SIGTERM] {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = count_signal as *const () as usize;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(libc::sigaction(signum, &action, std::ptr::null_mut()), 0);
        }
    }
    guard
}

fn raise(signal: Signal) {
    unsafe {
        libc::raise(signal.as_raw());
    }
}

#[test]
fn test_signal_is_held_until_scope_exit() {
    let _serial = setup();
    let scope = DeferredSignals::enter().unwrap();
    raise(Signal::Terminate);

    assert_eq!(TERMINATES.load(Ordering::SeqCst), 0);
    assert_eq!(scope.captured(), Some(Signal::Terminate));

    assert_eq!(scope.finish(), Some(Signal::Terminate));
    assert_eq!(TERMINATES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_first_signal_wins() {
    let _serial = setup();
    let scope = DeferredSignals::enter().unwrap();
    raise(Signal::Interrupt);
    raise(Signal::Terminate);
    raise(Signal::Interrupt);

    assert_eq!(scope.finish(), Some(Signal::Interrupt));
    assert_eq!(INTERRUPTS.load(Ordering::SeqCst), 1);
    assert_eq!(TERMINATES.load(Ordering::SeqCst), 0);
}

#[test]
fn test_quiet_scope_replays_nothing() {
    let _serial = setup();
    let scope = DeferredSignals::enter().unwrap();
    assert_eq!(scope.captured(), None);
    assert_eq!(scope.finish(), None);
    assert_eq!(INTERRUPTS.load(Ordering::SeqCst), 0);
    assert_eq!(TERMINATES.load(Ordering::SeqCst), 0);
}

#[test]
fn test_previous_handlers_restored_after_exit() {
    let _serial = setup();
    DeferredSignals::enter().unwrap().finish();

    raise(Signal::Interrupt);
    raise(Signal::Terminate);
    assert_eq!(INTERRUPTS.load(Ordering::SeqCst), 1);
    assert_eq!(TERMINATES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_replays_like_finish() {
    let _serial = setup();
    {
        let _scope = DeferredSignals::enter().unwrap();
        raise(Signal::Interrupt);
        assert_eq!(INTERRUPTS.load(Ordering::SeqCst), 0);
    }
    assert_eq!(INTERRUPTS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_nested_scope_on_same_thread_is_rejected() {
    let _serial = setup();
    let outer = DeferredSignals::enter().unwrap();
    assert!(matches!(
        DeferredSignals::enter(),
        Err(SignalError::ScopeActive)
    ));
    // The outer scope still works
    raise(Signal::Terminate);
    assert_eq!(outer.finish(), Some(Signal::Terminate));
    assert_eq!(TERMINATES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scopes_on_different_threads_are_serialized() {
    let _serial = setup();
    let outer = DeferredSignals::enter().unwrap();

    let entered = Arc::new(AtomicBool::new(false));
    let entered_clone = Arc::clone(&entered);
    let other = thread::spawn(move || {
        let scope = DeferredSignals::enter().unwrap();
        entered_clone.store(true, Ordering::SeqCst);
        scope.finish()
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!entered.load(Ordering::SeqCst));

    assert_eq!(outer.finish(), None);
    assert_eq!(other.join().unwrap(), None);
    assert!(entered.load(Ordering::SeqCst));
}

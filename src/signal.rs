//! Two-phase signal regime.
//!
//! While the shell waits at a prompt, SIGINT is recorded in a process-wide
//! flag (the line editor handles redrawing) and SIGQUIT is ignored. While a
//! foreground pipeline runs, the parent ignores both so the keyboard reaches
//! only the children, which are restored to default dispositions just before
//! exec.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::libc::c_int;
use nix::sys::signal::{signal, SigHandler, Signal};

/// Most recent signal observed by the input-phase handler. Zero means none.
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(sig: c_int) {
    LAST_SIGNAL.store(sig, Ordering::SeqCst);
}

/// Dispositions for the awaiting-input phase.
pub fn enter_prompt_phase() {
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::Handler(record_signal));
        let _ = signal(Signal::SIGQUIT, SigHandler::SigIgn);
    }
}

/// Dispositions for the child-running phase: the parent must not die with
/// its foreground pipeline.
pub fn enter_exec_phase() {
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::SigIgn);
        let _ = signal(Signal::SIGQUIT, SigHandler::SigIgn);
    }
}

/// `pre_exec` hook: children start with default dispositions regardless of
/// what the parent ignores.
pub fn restore_child_defaults() -> std::io::Result<()> {
    unsafe {
        for sig in [Signal::SIGINT, Signal::SIGQUIT] {
            signal(sig, SigHandler::SigDfl)
                .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
        }
    }
    Ok(())
}

/// Consume the latest recorded signal, if any.
pub fn take_last() -> Option<i32> {
    match LAST_SIGNAL.swap(0, Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

//! Process-wide logging / progress observer bus (spec §4.F).
//!
//! Two independent sinks: a log function (four record categories: task
//! start, child stdout, child stderr, task end, all tagged with the task
//! id) and a progress function (percent-complete + optional message). Both
//! are installed without locking -- the caller is responsible for quiescing
//! other threads before swapping a sink, same as the original's
//! `bd_utils_init_logging`/`bd_utils_init_prog_reporting`. A thread-local
//! mute flag suppresses progress emission (never logging) for the calling
//! thread only.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Severity tag for a log record, mirroring the four categories the
/// execution engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    TaskStarted,
    ChildStdout,
    ChildStderr,
    TaskFinished,
}

pub type LogFn = Box<dyn Fn(u64, LogKind, &str) + Send + Sync>;
pub type ProgressFn = Box<dyn Fn(u64, u8, Option<&str>) + Send + Sync>;

static LOG_FN: RwLock<Option<LogFn>> = RwLock::new(None);
static PROGRESS_FN: RwLock<Option<ProgressFn>> = RwLock::new(None);
static PROGRESS_GLOBALLY_MUTED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static PROGRESS_MUTED_LOCAL: Cell<bool> = const { Cell::new(false) };
}

/// Installs (or, with `None`, clears) the process-wide log sink.
pub fn init_logging(f: Option<LogFn>) {
    *LOG_FN.write().expect("log sink lock poisoned") = f;
}

/// Installs (or, with `None`, clears) the process-wide progress sink.
pub fn init_prog_reporting(f: Option<ProgressFn>) {
    *PROGRESS_FN.write().expect("progress sink lock poisoned") = f;
}

/// Mutes progress reporting for every thread (logging is unaffected).
pub fn mute_prog_reporting() {
    PROGRESS_GLOBALLY_MUTED.store(true, Ordering::SeqCst);
}

pub fn unmute_prog_reporting() {
    PROGRESS_GLOBALLY_MUTED.store(false, Ordering::SeqCst);
}

/// Mutes progress reporting for the calling thread only.
pub fn mute_prog_reporting_thread() {
    PROGRESS_MUTED_LOCAL.with(|m| m.set(true));
}

pub fn unmute_prog_reporting_thread() {
    PROGRESS_MUTED_LOCAL.with(|m| m.set(false));
}

pub(crate) fn log(task_id: u64, kind: LogKind, message: &str) {
    tracing::debug!(task_id, ?kind, message, "blockdev exec log");
    if let Some(f) = LOG_FN.read().expect("log sink lock poisoned").as_ref() {
        f(task_id, kind, message);
    }
}

pub(crate) fn report_progress(task_id: u64, completion: u8, message: Option<&str>) {
    if PROGRESS_GLOBALLY_MUTED.load(Ordering::SeqCst) {
        return;
    }
    if PROGRESS_MUTED_LOCAL.with(|m| m.get()) {
        return;
    }
    if let Some(f) = PROGRESS_FN.read().expect("progress sink lock poisoned").as_ref() {
        f(task_id, completion, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn progress_thread_mute_is_thread_local() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        init_prog_reporting(Some(Box::new(move |id, pct, _msg| {
            seen2.lock().unwrap().push((id, pct));
        })));

        mute_prog_reporting_thread();
        report_progress(1, 50, None);
        unmute_prog_reporting_thread();
        report_progress(1, 100, None);

        let got = seen.lock().unwrap().clone();
        assert_eq!(got, vec![(1, 100)]);

        init_prog_reporting(None);
    }
}

//! Execution and progress engine (spec §4.C).
//!
//! The single controlled way the rest of the crate spawns external
//! utilities: every call gets a monotonically increasing task id, an
//! ordered `Started -> Progress* -> Finished` sequence of log/progress
//! events (spec §4.F), and a typed failure surface (spec §7). Grounded in
//! `src/utils/exec.c`'s `bd_utils_exec_and_report_error` /
//! `..._capture_output` -- same choice of stderr-over-stdout for error
//! messages, same "zero exit + empty stdout -> NoOutput" rule.

use crate::config::ExtraArg;
use crate::error::{BlockdevError, Result};
use crate::logging::{self, LogKind};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocates the next monotonically increasing task id.
pub fn next_task_id() -> u64 {
    TASK_ID_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

fn build_argv(argv: &[String], extra: &[ExtraArg]) -> Vec<String> {
    let mut full = argv.to_vec();
    for e in extra {
        e.append_to(&mut full);
    }
    full
}

fn spawn_and_wait(argv: &[String]) -> Result<(u64, ExitStatus, String, String)> {
    let task_id = next_task_id();
    logging::log(task_id, LogKind::TaskStarted, &argv.join(" "));

    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|e| BlockdevError::SpawnFailed(e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    logging::log(task_id, LogKind::ChildStdout, &stdout);
    logging::log(task_id, LogKind::ChildStderr, &stderr);
    logging::log(task_id, LogKind::TaskFinished, &output.status.to_string());

    Ok((task_id, output.status, stdout, stderr))
}

/// Spawns `argv` (plus `extra` appended verbatim), waits, and fails unless
/// the exit status is zero. On failure the message is stderr if non-empty,
/// else stdout.
pub fn exec_report_error(argv: &[String], extra: &[ExtraArg]) -> Result<()> {
    let full = build_argv(argv, extra);
    let (_, status, stdout, stderr) = spawn_and_wait(&full)?;
    if !status.success() {
        let message = if !stderr.is_empty() { stderr } else { stdout };
        return Err(BlockdevError::ProcessFailed {
            status: status.code().unwrap_or(-1),
            message,
        });
    }
    Ok(())
}

/// Spawns, waits, and returns trimmed stdout. A zero exit with empty stdout
/// is a distinct `NoOutput` error carrying stderr.
pub fn exec_capture_output(argv: &[String], extra: &[ExtraArg]) -> Result<String> {
    let full = build_argv(argv, extra);
    let (_, status, stdout, stderr) = spawn_and_wait(&full)?;

    if !status.success() {
        let message = if !stderr.is_empty() { stderr } else { stdout };
        return Err(BlockdevError::ProcessFailed {
            status: status.code().unwrap_or(-1),
            message,
        });
    }
    if stdout.is_empty() {
        return Err(BlockdevError::NoOutput { stderr });
    }
    Ok(stdout)
}

/// Spawns `argv`, writes `blob` to the child's stdin, then behaves like
/// `exec_report_error`.
pub fn exec_with_input(argv: &[String], blob: &[u8], extra: &[ExtraArg]) -> Result<()> {
    let full = build_argv(argv, extra);
    let task_id = next_task_id();
    logging::log(task_id, LogKind::TaskStarted, &full.join(" "));

    let mut child = Command::new(&full[0])
        .args(&full[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BlockdevError::SpawnFailed(e.to_string()))?;

    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(blob)
        .map_err(BlockdevError::Io)?;

    let output = child.wait_with_output().map_err(BlockdevError::Io)?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    logging::log(task_id, LogKind::ChildStdout, &stdout);
    logging::log(task_id, LogKind::ChildStderr, &stderr);
    logging::log(task_id, LogKind::TaskFinished, &output.status.to_string());

    if !output.status.success() {
        let message = if !stderr.is_empty() { stderr } else { stdout };
        return Err(BlockdevError::ProcessFailed {
            status: output.status.code().unwrap_or(-1),
            message,
        });
    }
    Ok(())
}

/// Outcome of [`exec_progress`]: the captured (non-progress) stdout lines
/// joined back with newlines, the full stderr, and the exit status.
#[derive(Debug)]
pub struct ExecProgressOutcome {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Spawns `argv` with line-buffered stdout. For every full line, `extractor`
/// is invoked; returning `Some(percent)` marks the line as progress (it is
/// reported to the progress observer and NOT appended to captured stdout);
/// `None` means the line is ordinary output. Partial trailing data at EOF is
/// still offered to the extractor once. Reported completion is clamped to
/// `[last, 100]` so it is always monotonically non-decreasing.
pub fn exec_progress(
    argv: &[String],
    extra: &[ExtraArg],
    mut extractor: impl FnMut(&str) -> Option<u8>,
) -> Result<ExecProgressOutcome> {
    let full = build_argv(argv, extra);
    let task_id = next_task_id();
    logging::log(task_id, LogKind::TaskStarted, &full.join(" "));

    let mut child = Command::new(&full[0])
        .args(&full[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BlockdevError::SpawnFailed(e.to_string()))?;

    let stdout_handle = child.stdout.take().expect("stdout was piped");
    let mut stderr_handle = child.stderr.take().expect("stderr was piped");

    // Drain stderr on its own thread: reading stdout to completion first (as
    // a single sequential pass would) deadlocks once a child fills the OS
    // pipe buffer on the stream nobody is reading yet.
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr_handle.read_to_string(&mut buf);
        buf
    });

    let mut captured = String::new();
    let mut last_pct: u8 = 0;
    let mut feed_line = |line: &str, captured: &mut String, last_pct: &mut u8| {
        logging::log(task_id, LogKind::ChildStdout, line);
        if let Some(pct) = extractor(line) {
            let pct = pct.min(100).max(*last_pct);
            *last_pct = pct;
            logging::report_progress(task_id, pct, Some(line));
        } else {
            captured.push_str(line);
            captured.push('\n');
        }
    };

    {
        let mut reader = BufReader::new(stdout_handle);
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = reader.read_line(&mut buf).map_err(BlockdevError::Io)?;
            if n == 0 {
                break;
            }
            let trimmed = buf.trim_end_matches(['\n', '\r']);
            feed_line(trimmed, &mut captured, &mut last_pct);
        }
    }

    let stderr_buf = stderr_reader
        .join()
        .expect("stderr reader thread panicked");
    for line in stderr_buf.lines() {
        logging::log(task_id, LogKind::ChildStderr, line);
    }

    let status = child.wait().map_err(BlockdevError::Io)?;
    logging::log(task_id, LogKind::TaskFinished, &status.to_string());

    Ok(ExecProgressOutcome {
        status,
        stdout: captured.trim().to_string(),
        stderr: stderr_buf.trim().to_string(),
    })
}

/// Compares two `X[.Y[.Z...[-R]]]` natural-number version strings field by
/// field; if one is a strict numeric prefix of the other, the longer string
/// wins. Ported from `bd_utils_version_cmp` in exec.c.
pub fn version_cmp(ver1: &str, ver2: &str) -> Result<std::cmp::Ordering> {
    use std::cmp::Ordering;

    let valid = |s: &str| {
        !s.is_empty()
            && s.split(['.', '-'])
                .all(|field| !field.is_empty() && field.chars().all(|c| c.is_ascii_digit()))
    };
    if !valid(ver1) {
        return Err(BlockdevError::InvalidArgument(format!(
            "invalid or unsupported version format: {ver1}"
        )));
    }
    if !valid(ver2) {
        return Err(BlockdevError::InvalidArgument(format!(
            "invalid or unsupported version format: {ver2}"
        )));
    }

    let f1: Vec<&str> = ver1.split(['.', '-']).collect();
    let f2: Vec<&str> = ver2.split(['.', '-']).collect();

    for (a, b) in f1.iter().zip(f2.iter()) {
        let va: u64 = a.parse().unwrap_or(0);
        let vb: u64 = b.parse().unwrap_or(0);
        match va.cmp(&vb) {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(f1.len().cmp(&f2.len()))
}

/// Checks that `util` is on `PATH` and, if `min_version` is given, that its
/// reported version (via `util <version_arg or --version>`, optionally
/// extracted from the output with `version_regexp`) is `>= min_version`.
/// Ported from `bd_utils_check_util_version` in exec.c.
pub fn check_util_version(
    util: &str,
    min_version: Option<&str>,
    version_arg: Option<&str>,
    version_regexp: Option<&regex::Regex>,
) -> Result<()> {
    which(util).ok_or_else(|| BlockdevError::DepsFailed(format!("The '{util}' utility is not available")))?;

    let Some(min_version) = min_version else {
        return Ok(());
    };

    let arg = version_arg.unwrap_or("--version");
    let output = exec_capture_output(&[util.to_string(), arg.to_string()], &[])
        .map_err(|e| BlockdevError::DepsFailed(e.to_string()))?;

    let version_str = match version_regexp {
        Some(re) => {
            let caps = re.captures(&output).ok_or_else(|| {
                BlockdevError::DepsFailed(format!(
                    "Failed to determine {util}'s version from: {output}"
                ))
            })?;
            caps.get(1).map(|m| m.as_str()).unwrap_or(&output).to_string()
        }
        None => output.trim().to_string(),
    };

    match version_cmp(&version_str, min_version) {
        Ok(std::cmp::Ordering::Less) | Err(_) => Err(BlockdevError::DepsFailed(format!(
            "Too low version of {util}: {version_str}. At least {min_version} required."
        ))),
        Ok(_) => Ok(()),
    }
}

/// Spawns `argv`, waits, and returns the exit success flag alongside
/// captured stdout/stderr regardless of exit status. Unlike
/// [`exec_capture_output`], a non-zero exit is not itself an error here --
/// used by probes (e.g. the Feature dependency probe) that need to inspect
/// a command's output even when it exits non-zero.
pub(crate) fn exec_capture_status(argv: &[String]) -> Result<(bool, String, String)> {
    let (_, status, stdout, stderr) = spawn_and_wait(argv)?;
    Ok((status.success(), stdout, stderr))
}

/// Minimal `PATH` lookup, equivalent to `g_find_program_in_path`.
pub fn which(util: &str) -> Option<std::path::PathBuf> {
    if util.contains('/') {
        let p = std::path::PathBuf::from(util);
        return p.is_file().then_some(p);
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let candidate = dir.join(util);
            candidate.is_file().then_some(candidate)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_output_trims_and_returns_stdout() {
        let out = exec_capture_output(
            &["printf".to_string(), "  hello world  \n".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn capture_output_empty_stdout_is_no_output() {
        let err = exec_capture_output(&["true".to_string()], &[]).unwrap_err();
        assert!(matches!(err, BlockdevError::NoOutput { .. }));
    }

    #[test]
    fn report_error_prefers_stderr() {
        let err = exec_report_error(
            &[
                "sh".to_string(),
                "-c".to_string(),
                "echo out; echo err 1>&2; exit 1".to_string(),
            ],
            &[],
        )
        .unwrap_err();
        match err {
            BlockdevError::ProcessFailed { status, message } => {
                assert_eq!(status, 1);
                assert_eq!(message, "err");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn progress_extraction_splits_progress_from_output() {
        let script = "echo line1; echo 'progress: 50%'; echo line2; echo 'progress: 100%'";
        let outcome = exec_progress(
            &["sh".to_string(), "-c".to_string(), script.to_string()],
            &[],
            |line| {
                line.strip_prefix("progress: ")
                    .and_then(|s| s.strip_suffix('%'))
                    .and_then(|s| s.parse::<u8>().ok())
            },
        )
        .unwrap();
        assert!(outcome.status.success());
        assert_eq!(outcome.stdout, "line1\nline2");
    }

    #[test]
    fn version_cmp_orders_numeric_fields() {
        assert_eq!(version_cmp("2.2.1", "2.2.0").unwrap(), std::cmp::Ordering::Greater);
        assert_eq!(version_cmp("1.9", "1.10").unwrap(), std::cmp::Ordering::Less);
        assert_eq!(version_cmp("2.2", "2.2.0").unwrap(), std::cmp::Ordering::Less);
        assert_eq!(version_cmp("2.2.0", "2.2").unwrap(), std::cmp::Ordering::Greater);
        assert!(version_cmp("abc", "1.0").is_err());
    }

    #[test]
    fn which_finds_a_known_coreutils_binary() {
        assert!(which("sh").is_some());
        assert!(which("definitely-not-a-real-binary-xyz").is_none());
    }

    #[test]
    fn extra_args_are_appended_verbatim() {
        let out = exec_capture_output(
            &["echo".to_string(), "a".to_string()],
            &[ExtraArg::new("b", "")],
        )
        .unwrap();
        assert_eq!(out, "a b");
    }
}

//! AnalyzerRunner - one child process per request
//!
//! Stdout and stderr are read as two separate streams from a single
//! `select!` loop on the tokio runtime.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{AnalysisOutcome, AnalysisRequest, ExitStatus};
use crate::core::CancelToken;
use crate::events::{Event, EventBus};

/// Separator of path lists such as `PYTHONPATH`
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

const CHUNK_SIZE: usize = 8192;

/// Build the child environment: overlay values win, except `path_var`,
/// whose overlay value is put in front of the inherited one.
pub fn compose_environment<I>(
    inherited: I,
    overlay: &BTreeMap<String, String>,
    path_var: &str,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = inherited.into_iter().collect();

    for (key, value) in overlay {
        let key_os = OsString::from(key);
        let composed = match env.get(&key_os) {
            Some(existing) if key == path_var && !existing.is_empty() && !value.is_empty() => {
                let mut joined = OsString::from(value);
                joined.push(PATH_LIST_SEPARATOR);
                joined.push(existing);
                joined
            }
            Some(existing) if key == path_var && value.is_empty() => existing.clone(),
            _ => OsString::from(value),
        };
        env.insert(key_os, composed);
    }

    env
}

/// Launches analyzers and collects their output
pub struct AnalyzerRunner {
    events: EventBus,
    kill_timeout: Duration,
    path_var: String,
    current: Mutex<Option<CancelToken>>,
}

impl AnalyzerRunner {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            kill_timeout: Duration::from_secs(3),
            path_var: "PYTHONPATH".to_string(),
            current: Mutex::new(None),
        }
    }

    /// Grace period between terminate and force-kill
    pub fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Environment variable treated as a path list
    pub fn with_path_var(mut self, name: impl Into<String>) -> Self {
        self.path_var = name.into();
        self
    }

    /// Cancel the run in flight, if any
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }

    /// Run `request` to completion. A run started while another is in
    /// flight kills the older child.
    ///
    /// Never fails: launch problems come back as
    /// [`ExitStatus::LaunchFailed`] with the cause in `raw_error`.
    pub async fn run(&self, request: AnalysisRequest) -> AnalysisOutcome {
        let cancel = CancelToken::new();
        if let Some(previous) = self.current.lock().replace(cancel.clone()) {
            debug!("Superseding the analyzer run in flight");
            previous.cancel();
        }

        let outcome = self.run_with(request, &cancel).await;

        {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|t| t.same_as(&cancel)) {
                *current = None;
            }
        }

        self.events.emit(Event::AnalyzerFinished(outcome.exit_status));
        outcome
    }

    async fn run_with(&self, request: AnalysisRequest, cancel: &CancelToken) -> AnalysisOutcome {
        let started_at = Utc::now();
        let environment = compose_environment(
            std::env::vars_os(),
            &request.environment_overlay,
            &self.path_var,
        );

        let mut command = Command::new(&request.program);
        command
            .args(&request.arguments)
            .current_dir(&request.working_dir)
            .env_clear()
            .envs(environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        info!(
            "Launching {} {} in {}",
            request.program,
            request.arguments.join(" "),
            request.working_dir.display()
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch {}: {}", request.program, e);
                let reason = format!("failed to launch {}: {}", request.program, e);
                return AnalysisOutcome::launch_failed(request, reason);
            }
        };

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            terminate(&mut child, self.kill_timeout).await;
            return AnalysisOutcome::launch_failed(request, "child pipes unavailable".to_string());
        };

        let mut raw_output = Vec::new();
        let mut raw_error = Vec::new();
        let mut out_chunk = vec![0u8; CHUNK_SIZE];
        let mut err_chunk = vec![0u8; CHUNK_SIZE];
        let mut out_open = true;
        let mut err_open = true;
        let mut cancelled = false;

        while out_open || err_open {
            tokio::select! {
                read = stdout.read(&mut out_chunk), if out_open => match read {
                    Ok(0) | Err(_) => out_open = false,
                    Ok(n) => {
                        raw_output.extend_from_slice(&out_chunk[..n]);
                        self.events.emit(Event::AnalyzerStdoutAvailable);
                    }
                },
                read = stderr.read(&mut err_chunk), if err_open => match read {
                    Ok(0) | Err(_) => err_open = false,
                    Ok(n) => {
                        raw_error.extend_from_slice(&err_chunk[..n]);
                        self.events.emit(Event::AnalyzerStderrAvailable);
                    }
                },
                _ = cancel.cancelled() => {
                    cancelled = true;
                    terminate(&mut child, self.kill_timeout).await;
                    break;
                }
            }
        }

        // Both pipes can close while the child keeps running
        let waited = if cancelled {
            None
        } else {
            tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel.cancelled() => None,
            }
        };

        let exit_status = match waited {
            Some(Ok(status)) => ExitStatus::from_std(status),
            Some(Err(e)) => {
                warn!("Lost track of {}: {}", request.program, e);
                ExitStatus::Signaled
            }
            None => {
                if !cancelled {
                    terminate(&mut child, self.kill_timeout).await;
                }
                ExitStatus::Cancelled
            }
        };

        let finished_at = Utc::now().max(started_at);
        info!("{} finished: {}", request.program, exit_status);

        AnalysisOutcome {
            request,
            started_at,
            finished_at,
            exit_status,
            rate: None,
            previous_rate: None,
            diagnostics: BTreeMap::new(),
            raw_output: decode_local(&raw_output),
            raw_error: decode_local(&raw_error),
            stats_path: None,
        }
    }
}

/// Output of a child, decoded with the local encoding
pub(crate) fn decode_local(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Ask the process group to stop, then force-kill after `grace`
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a process group we created
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => debug!("Analyzer stopped after terminate"),
        Err(_) => {
            warn!("Analyzer ignored terminate for {:?}, killing it", grace);
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                // SAFETY: see above
                unsafe {
                    libc::killpg(pid as libc::pid_t, libc::SIGKILL);
                }
            }
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerKind;
    use std::path::PathBuf;

    fn env(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn test_path_var_is_prepended() {
        let mut overlay = BTreeMap::new();
        overlay.insert("PYTHONPATH".to_string(), "/project".to_string());
        overlay.insert("LANG".to_string(), "C".to_string());

        let composed = compose_environment(
            env(&[("PYTHONPATH", "/site"), ("LANG", "fr_FR"), ("HOME", "/home/u")]),
            &overlay,
            "PYTHONPATH",
        );

        let expected = format!("/project{}/site", PATH_LIST_SEPARATOR);
        assert_eq!(composed[&OsString::from("PYTHONPATH")], OsString::from(expected));
        assert_eq!(composed[&OsString::from("LANG")], OsString::from("C"));
        assert_eq!(composed[&OsString::from("HOME")], OsString::from("/home/u"));
    }

    #[test]
    fn test_path_var_without_inherited_value() {
        let mut overlay = BTreeMap::new();
        overlay.insert("PYTHONPATH".to_string(), "/project".to_string());
        let composed = compose_environment(env(&[]), &overlay, "PYTHONPATH");
        assert_eq!(composed[&OsString::from("PYTHONPATH")], OsString::from("/project"));
    }

    fn request(program: &str, args: &[&str]) -> AnalysisRequest {
        AnalysisRequest {
            target_path: PathBuf::from("/tmp/target.py"),
            program: program.to_string(),
            arguments: args.iter().map(|s| s.to_string()).collect(),
            working_dir: std::env::temp_dir(),
            environment_overlay: BTreeMap::new(),
            analyzer_kind: AnalyzerKind::Lint,
        }
    }

    #[tokio::test]
    async fn test_launch_failure_is_an_outcome() {
        let runner = AnalyzerRunner::new(EventBus::new());
        let outcome = runner
            .run(request("/definitely/not/an/analyzer", &[]))
            .await;
        assert_eq!(outcome.exit_status, ExitStatus::LaunchFailed);
        assert!(!outcome.raw_error.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_are_kept_apart() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let runner = AnalyzerRunner::new(events);

        let outcome = runner
            .run(request("sh", &["-c", "echo out; echo err 1>&2; exit 3"]))
            .await;

        assert_eq!(outcome.exit_status, ExitStatus::Code(3));
        assert_eq!(outcome.raw_output, "out\n");
        assert_eq!(outcome.raw_error, "err\n");
        assert!(outcome.finished_at >= outcome.started_at);

        let names: Vec<&str> = rx.try_iter().map(|e| e.name()).collect();
        assert!(names.contains(&"analyzer.stdout_available"));
        assert!(names.contains(&"analyzer.stderr_available"));
        assert_eq!(names.last(), Some(&"analyzer.finished"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_child() {
        let runner = std::sync::Arc::new(
            AnalyzerRunner::new(EventBus::new()).with_kill_timeout(Duration::from_millis(200)),
        );
        let background = std::sync::Arc::clone(&runner);
        let handle = tokio::spawn(async move { background.run(request("sleep", &["30"])).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        runner.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop")
            .unwrap();
        assert_eq!(outcome.exit_status, ExitStatus::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_after_pipes_close() {
        let runner =
            AnalyzerRunner::new(EventBus::new()).with_kill_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();

        let (outcome, _) = tokio::join!(
            runner.run(request("sh", &["-c", "exec >&- 2>&-; sleep 30"])),
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                runner.cancel();
            }
        );

        assert_eq!(outcome.exit_status, ExitStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(outcome.raw_output.is_empty());
    }
}

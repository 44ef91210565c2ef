//! Lifecycle management for one external process per role

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::ports::{Completion, ExitOutcome, LineSink};

/// ffmpeg exits with this status when the receiving end of its output goes away
pub const CLOSED_BY_VIEWER_EXIT_CODE: i32 = 255;

const OUTPUT_TAIL_LINES: usize = 20;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What a supervisor's processes are used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Transcode,
    StreamOut,
    StreamIn,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessRole::Transcode => "transcode",
            ProcessRole::StreamOut => "stream-out",
            ProcessRole::StreamIn => "stream-in",
        };
        f.write_str(name)
    }
}

/// Subprocess failures
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process exited with code {code}: {tail}")]
    ExitCode { code: i32, tail: String },

    #[error("Process was killed by a signal")]
    Signalled,

    #[error("Process was stopped before it finished")]
    Terminated,

    #[error("Supervisor has been shut down")]
    ShutDown,

    #[error("Failed to wait for the process: {0}")]
    Wait(#[source] io::Error),
}

impl From<SupervisorError> for DomainError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::Spawn { .. } | SupervisorError::ShutDown => {
                DomainError::ResourceUnavailable(err.to_string())
            }
            SupervisorError::Wait(_) => DomainError::InternalError(err.to_string()),
            _ => DomainError::ProcessFailed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitPolicy {
    /// Only exit status 0 is a success
    Strict,
    /// Viewer-closed and requested stops also count as success
    Lenient,
}

type Reporter = Box<dyn FnOnce(Result<ExitOutcome, SupervisorError>) + Send>;
type OutputTail = Arc<SyncMutex<VecDeque<String>>>;

/// Handle to the currently tracked process
struct TrackedProcess {
    pid: Option<u32>,
    exited: watch::Receiver<bool>,
    kill_tx: Option<oneshot::Sender<()>>,
    terminated: Arc<AtomicBool>,
}

impl TrackedProcess {
    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    async fn wait_exit(&self) {
        let mut exited = self.exited.clone();
        let _ = exited.wait_for(|done| *done).await;
    }

    fn force_kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        let delivered = self
            .pid
            .and_then(|pid| libc::pid_t::try_from(pid).ok())
            // SAFETY: kill(2) has no memory-safety preconditions
            .map(|pid| unsafe { libc::kill(pid, libc::SIGTERM) } == 0)
            .unwrap_or(false);
        if !delivered {
            self.force_kill();
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        self.force_kill();
    }
}

/// Runs at most one external process at a time and enforces its termination.
///
/// Each invocation replaces the tracked handle. [`terminate`](Self::terminate)
/// asks the process to stop, waits for the grace period, then kills it.
pub struct ProcessSupervisor {
    role: ProcessRole,
    program: String,
    grace: Duration,
    current: Mutex<Option<TrackedProcess>>,
    run_lock: Mutex<()>,
    closed: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(role: ProcessRole, program: impl Into<String>, grace: Duration) -> Self {
        Self {
            role,
            program: program.into(),
            grace,
            current: Mutex::new(None),
            run_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run `args` and wait for the process to exit.
    ///
    /// Succeeds only on exit status 0; a failure carries the exit status and
    /// the last lines of output. Concurrent callers run one after another.
    pub async fn run_to_completion(&self, args: &[String]) -> Result<(), SupervisorError> {
        let _serial = self.run_lock.lock().await;

        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.current.lock().await;
            self.stop_tracked(&mut slot).await;
            let reporter: Reporter = Box::new(move |result| {
                let _ = tx.send(result);
            });
            *slot = Some(self.spawn(args, None, ExitPolicy::Strict, reporter)?);
        }

        match rx.await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(SupervisorError::Wait(io::Error::new(
                io::ErrorKind::Other,
                "process watcher went away",
            ))),
        }
    }

    /// Stop any tracked process, start `args`, and return at once.
    ///
    /// Every output line is passed to `on_line`. The completion resolves to
    /// success on exit status 0, on the viewer-closed status, or when the
    /// process was stopped through [`terminate`](Self::terminate).
    pub async fn run_supervised(
        &self,
        args: &[String],
        on_line: LineSink,
    ) -> Result<Completion, SupervisorError> {
        let mut slot = self.current.lock().await;
        self.stop_tracked(&mut slot).await;

        let (tx, completion) = Completion::channel();
        let reporter: Reporter = Box::new(move |result| {
            let _ = tx.send(result.map_err(DomainError::from));
        });
        *slot = Some(self.spawn(args, Some(on_line), ExitPolicy::Lenient, reporter)?);
        Ok(completion)
    }

    /// Stop the tracked process, if any. Safe to call repeatedly.
    pub async fn terminate(&self) {
        let mut slot = self.current.lock().await;
        self.stop_tracked(&mut slot).await;
    }

    /// Terminate the tracked process and refuse further spawns
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.terminate().await;
    }

    pub async fn is_running(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|tracked| !tracked.has_exited())
            .unwrap_or(false)
    }

    async fn stop_tracked(&self, slot: &mut Option<TrackedProcess>) {
        let Some(mut tracked) = slot.take() else {
            return;
        };
        if tracked.has_exited() {
            return;
        }

        tracked.terminated.store(true, Ordering::SeqCst);
        info!(role = %self.role, pid = ?tracked.pid, "Stopping process");
        tracked.request_stop();

        if tokio::time::timeout(self.grace, tracked.wait_exit())
            .await
            .is_err()
        {
            warn!(
                role = %self.role,
                pid = ?tracked.pid,
                "Process did not stop within {:?}, killing it",
                self.grace
            );
            tracked.force_kill();
            tracked.wait_exit().await;
        }
        debug!(role = %self.role, pid = ?tracked.pid, "Process stopped");
    }

    fn spawn(
        &self,
        args: &[String],
        on_line: Option<LineSink>,
        policy: ExitPolicy,
        reporter: Reporter,
    ) -> Result<TrackedProcess, SupervisorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShutDown);
        }

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let pid = child.id();
        info!(role = %self.role, pid = ?pid, "Started {} {}", self.program, args.join(" "));

        let tail: OutputTail = Arc::new(SyncMutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES)));
        let drainer = tokio::spawn(drain_output(
            merged_lines(&mut child),
            self.role,
            on_line,
            tail.clone(),
        ));

        let (exited_tx, exited_rx) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel();
        let terminated = Arc::new(AtomicBool::new(false));

        tokio::spawn(watch_exit(WatchContext {
            child,
            role: self.role,
            policy,
            kill_rx,
            exited_tx,
            terminated: terminated.clone(),
            drainer,
            tail,
            reporter,
        }));

        Ok(TrackedProcess {
            pid,
            exited: exited_rx,
            kill_tx: Some(kill_tx),
            terminated,
        })
    }
}

fn merged_lines(child: &mut Child) -> BoxStream<'static, io::Result<String>> {
    let mut sources: Vec<BoxStream<'static, io::Result<String>>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        sources.push(output_lines(stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        sources.push(output_lines(stderr));
    }
    stream::select_all(sources).boxed()
}

/// Newline-split output decoded lossily; encoder metadata is not always UTF-8
fn output_lines<R>(reader: R) -> BoxStream<'static, io::Result<String>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    FramedRead::new(reader, AnyDelimiterCodec::new(b"\n".to_vec(), Vec::new()))
        .map(|chunk| {
            chunk
                .map(|bytes| {
                    String::from_utf8_lossy(&bytes)
                        .trim_end_matches('\r')
                        .to_string()
                })
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
        .boxed()
}

/// Reads until both pipes hit EOF. Closing them early would kill the child
/// with SIGPIPE on its next write.
async fn drain_output(
    mut lines: BoxStream<'static, io::Result<String>>,
    role: ProcessRole,
    on_line: Option<LineSink>,
    tail: OutputTail,
) {
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(role = %role, "Unreadable process output: {}", e);
                continue;
            }
        };

        let lowered = line.to_lowercase();
        if lowered.contains("error") || lowered.contains("failed") {
            warn!(role = %role, "{}", line);
        } else {
            debug!(role = %role, "{}", line);
        }

        {
            let mut tail = tail.lock();
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }

        if let Some(on_line) = &on_line {
            on_line(line);
        }
    }
}

struct WatchContext {
    child: Child,
    role: ProcessRole,
    policy: ExitPolicy,
    kill_rx: oneshot::Receiver<()>,
    exited_tx: watch::Sender<bool>,
    terminated: Arc<AtomicBool>,
    drainer: tokio::task::JoinHandle<()>,
    tail: OutputTail,
    reporter: Reporter,
}

async fn watch_exit(ctx: WatchContext) {
    let WatchContext {
        mut child,
        role,
        policy,
        mut kill_rx,
        exited_tx,
        terminated,
        drainer,
        tail,
        reporter,
    } = ctx;

    // A dropped kill sender means the handle is gone; kill rather than leak.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(role = %role, "Kill request failed: {}", e);
            }
            child.wait().await
        }
    };
    let _ = exited_tx.send(true);

    if tokio::time::timeout(DRAIN_TIMEOUT, drainer).await.is_err() {
        debug!(role = %role, "Output still open after exit, no longer reading it");
    }

    let terminated = terminated.load(Ordering::SeqCst);
    let tail = tail.lock().iter().cloned().collect::<Vec<_>>().join("\n");
    let result = classify_exit(status, terminated, policy, tail);
    match &result {
        Ok(outcome) => info!(role = %role, "Process finished: {:?}", outcome),
        Err(e) => warn!(role = %role, "Process failed: {}", e),
    }
    reporter(result);
}

fn classify_exit(
    status: io::Result<ExitStatus>,
    terminated: bool,
    policy: ExitPolicy,
    tail: String,
) -> Result<ExitOutcome, SupervisorError> {
    let status = status.map_err(SupervisorError::Wait)?;
    if status.success() {
        return Ok(ExitOutcome::Completed);
    }

    if policy == ExitPolicy::Lenient {
        if terminated {
            return Ok(ExitOutcome::Terminated);
        }
        if status.code() == Some(CLOSED_BY_VIEWER_EXIT_CODE) {
            return Ok(ExitOutcome::ClosedByViewer);
        }
    }

    match status.code() {
        _ if terminated => Err(SupervisorError::Terminated),
        Some(code) => Err(SupervisorError::ExitCode { code, tail }),
        None => Err(SupervisorError::Signalled),
    }
}

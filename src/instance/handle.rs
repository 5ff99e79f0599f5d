use std::{process::Stdio, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter},
    process::{Child, ChildStdin, Command},
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{EventPayload, StreamLine, StreamSource},
    error::ServerError,
};

use super::{
    command::{LaunchConfig, parse_command_line, resolve_environment},
    state::{EventHub, SharedState},
    types::{ExitOutcome, ProcessPhase, StopOutcome},
};

/// How long exit handling waits for output pumps to reach EOF. A detached
/// grandchild can keep the pipes open indefinitely.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Graceful,
    Force,
}

type ProcessSlot = Arc<Mutex<Option<RunningProcess>>>;

#[derive(Debug)]
struct RunningProcess {
    id: Uuid,
    pid: Option<u32>,
    control_tx: mpsc::Sender<Termination>,
    stdin_tx: mpsc::Sender<String>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

impl RunningProcess {
    fn is_live(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }
}

/// Owns the OS process of one server.
///
/// At most one process is live at a time. A process stays in the slot until its
/// exit is observed, so a `start` racing a pending `stop` sees `AlreadyRunning`.
/// The slot lock is never held while waiting for an exit, which lets `kill`
/// overtake a `stop` stuck on a process that ignores the graceful signal.
#[derive(Debug)]
pub struct ProcessSupervisor {
    shared: SharedState,
    stop_timeout: Option<Duration>,
    process: ProcessSlot,
}

impl ProcessSupervisor {
    pub fn new(shared: SharedState, stop_timeout: Option<Duration>) -> Self {
        Self {
            shared,
            stop_timeout,
            process: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.snapshot().process.is_running()
    }

    pub async fn pid(&self) -> Option<u32> {
        let slot = self.process.lock().await;
        slot.as_ref().filter(|p| p.is_live()).and_then(|p| p.pid)
    }

    /// Spawns the process. Resolves once the OS has started it.
    pub async fn start(&self, launch: &LaunchConfig) -> Result<Option<u32>, ServerError> {
        let mut slot = self.process.lock().await;
        if slot.as_ref().is_some_and(RunningProcess::is_live) {
            return Err(ServerError::AlreadyRunning);
        }

        let (program, args) = parse_command_line(&launch.command)?;
        let env = resolve_environment(&launch.environment, &launch.working_dir)?;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&launch.working_dir)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped())
            .kill_on_drop(!launch.persist);

        #[cfg(unix)]
        if launch.persist {
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| ServerError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or(ServerError::NoStdoutPipe)?;
        let stderr = child.stderr.take().ok_or(ServerError::NoStderrPipe)?;
        let stdin = child.stdin.take().ok_or(ServerError::NoStdinPipe)?;

        let hub = self.shared.hub().clone();
        let pumps = [
            spawn_line_pump(stdout, StreamSource::Stdout, hub.clone()),
            spawn_line_pump(stderr, StreamSource::Stderr, hub.clone()),
        ];

        let shutdown = CancellationToken::new();
        let (stdin_tx, stdin_rx) = mpsc::channel(1024);
        spawn_stdin_pump(stdin, stdin_rx, shutdown.clone());

        hub.emit(EventPayload::ProcessStart { pid });

        if let Some(exit) = exited_early(&mut child) {
            drain_pumps(pumps).await;
            shutdown.cancel();
            warn!(?pid, %program, %exit, "process exited before start completed");
            hub.emit(EventPayload::ProcessStop { exit: exit.clone() });
            return Err(ServerError::ProcessExitedUnexpectedly(exit));
        }

        info!(?pid, %program, dir = %launch.working_dir.display(), "process started");
        self.shared.update(|s| s.process = ProcessPhase::Running);

        let id = Uuid::new_v4();
        let (control_tx, control_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(reap(
            child,
            Reaper {
                id,
                control_rx,
                exit_tx,
                pumps,
                shutdown,
                shared: self.shared.clone(),
                slot: self.process.clone(),
            },
        ));

        *slot = Some(RunningProcess {
            id,
            pid,
            control_tx,
            stdin_tx,
            exit_rx,
        });

        Ok(pid)
    }

    /// Sends a graceful termination signal and waits for the process to exit.
    pub async fn stop(&self) -> Result<StopOutcome, ServerError> {
        self.terminate(Termination::Graceful).await
    }

    /// Kills the process and waits for it to exit.
    pub async fn kill(&self) -> Result<StopOutcome, ServerError> {
        self.terminate(Termination::Force).await
    }

    async fn terminate(&self, termination: Termination) -> Result<StopOutcome, ServerError> {
        let (id, pid, control_tx, mut exit_rx) = {
            let mut slot = self.process.lock().await;
            let Some(process) = slot.as_ref() else {
                return Ok(StopOutcome::NotRunning);
            };
            if !process.is_live() {
                *slot = None;
                return Ok(StopOutcome::NotRunning);
            }

            self.shared.update(|s| {
                if s.process == ProcessPhase::Running {
                    s.process = ProcessPhase::Stopping;
                }
            });
            (
                process.id,
                process.pid,
                process.control_tx.clone(),
                process.exit_rx.clone(),
            )
        };

        info!(?pid, ?termination, "stopping process");
        _ = control_tx.send(termination).await;

        let exit = match (termination, self.stop_timeout) {
            (Termination::Graceful, Some(limit)) => {
                match timeout(limit, wait_for_exit(&mut exit_rx)).await {
                    Ok(exit) => exit?,
                    Err(_) => {
                        warn!(?pid, ?limit, "process ignored graceful stop, killing");
                        _ = control_tx.send(Termination::Force).await;
                        wait_for_exit(&mut exit_rx).await?
                    }
                }
            }
            _ => wait_for_exit(&mut exit_rx).await?,
        };

        clear_slot(&self.process, id).await;
        Ok(StopOutcome::Exited(exit))
    }

    /// Writes one line to the process's stdin.
    pub async fn send_command<S: Into<String>>(&self, cmd: S) -> Result<(), ServerError> {
        let mut command = cmd.into();
        if !command.ends_with('\n') {
            command.push('\n');
        }

        let stdin_tx = {
            let slot = self.process.lock().await;
            slot.as_ref()
                .filter(|p| p.is_live())
                .map(|p| p.stdin_tx.clone())
                .ok_or(ServerError::NotRunning)?
        };

        stdin_tx
            .send(command)
            .await
            .map_err(|_| ServerError::StdinWriteFailed)
    }
}

async fn wait_for_exit(
    exit_rx: &mut watch::Receiver<Option<ExitOutcome>>,
) -> Result<ExitOutcome, ServerError> {
    let exit = exit_rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| ServerError::ExitUnobserved)?;
    (*exit).clone().ok_or(ServerError::ExitUnobserved)
}

/// Empties the slot if it still holds the process with this id.
async fn clear_slot(slot: &ProcessSlot, id: Uuid) {
    let mut slot = slot.lock().await;
    if slot.as_ref().is_some_and(|p| p.id == id) {
        *slot = None;
    }
}

/// Exit status of a child that is already gone, without blocking.
fn exited_early(child: &mut Child) -> Option<ExitOutcome> {
    match child.try_wait() {
        Ok(Some(status)) => Some(ExitOutcome::from(Ok(status))),
        _ => None,
    }
}

/// Everything the reaper task owns besides the child itself.
struct Reaper {
    id: Uuid,
    control_rx: mpsc::Receiver<Termination>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    pumps: [JoinHandle<()>; 2],
    shutdown: CancellationToken,
    shared: SharedState,
    slot: ProcessSlot,
}

/// Waits for the child, relaying termination requests, then publishes the exit
/// and releases the slot.
async fn reap(mut child: Child, reaper: Reaper) {
    let Reaper {
        id,
        mut control_rx,
        exit_tx,
        pumps,
        shutdown,
        shared,
        slot,
    } = reaper;

    let pid = child.id();
    let exit = loop {
        tokio::select! {
            status = child.wait() => break ExitOutcome::from(status),
            Some(termination) = control_rx.recv() => {
                if let Err(e) = deliver(&mut child, termination) {
                    warn!(?pid, ?termination, error = %e, "failed to signal process");
                }
            }
        }
    };

    drain_pumps(pumps).await;
    shutdown.cancel();

    info!(?pid, %exit, "process exited");
    shared.hub().emit(EventPayload::ProcessStop { exit: exit.clone() });
    shared.update(|s| s.process = ProcessPhase::Stopped);
    exit_tx.send_replace(Some(exit));
    clear_slot(&slot, id).await;
}

fn deliver(child: &mut Child, termination: Termination) -> std::io::Result<()> {
    match termination {
        Termination::Force => child.start_kill(),
        #[cfg(unix)]
        Termination::Graceful => {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            let Some(pid) = child.id() else {
                return Ok(());
            };
            let pid = i32::try_from(pid).map_err(std::io::Error::other)?;
            kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
        }
        #[cfg(not(unix))]
        Termination::Graceful => child.start_kill(),
    }
}

async fn drain_pumps(pumps: [JoinHandle<()>; 2]) {
    for pump in pumps {
        if timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
            debug!("output pipe still open after exit");
        }
    }
}

fn spawn_line_pump<R>(reader: R, source: StreamSource, hub: EventHub) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    hub.line(StreamLine::new(line.trim_end_matches(['\r', '\n']), source));
                }
                Err(e) => {
                    debug!(?source, error = %e, "output stream closed");
                    break;
                }
            }
        }
    })
}

fn spawn_stdin_pump(
    stdin: ChildStdin,
    mut stdin_rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut writer = BufWriter::new(stdin);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                maybe_cmd = stdin_rx.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        break;
                    };
                    if writer.write_all(cmd.as_bytes()).await.is_err()
                        || writer.flush().await.is_err()
                    {
                        break;
                    }
                }
            }
        }
    });
}

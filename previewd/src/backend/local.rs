//! Local backend: previews run as processes spawned on this machine
//!
//! The preview sub-services bind fixed ports, so only one local task can run
//! at a time. Spawned processes are recorded in a registry file so a restarted
//! daemon can adopt them again.

use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::environment::{build_task_environment, TaskEnvOptions, CONFIG_ENV_VAR, PORT_VAR};
use crate::backend::logs::{is_application_line, LogEvent, LogPage};
use crate::backend::ExecutionBackend;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{TaskHandle, TaskStatus};
use crate::models::project::Project;
use crate::storage::settings::LocalSettings;
use crate::utils::short_id;

pub const BACKEND_NAME: &str = "local";

/// Target under which local task output is re-emitted
pub const LOG_TARGET: &str = "previewd::local";

const LOG_PAGE_SIZE: usize = 100;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const TAIL_INTERVAL: Duration = Duration::from_millis(500);

/// Allowed skew between the recorded and the observed process start time
const START_TIME_TOLERANCE_SECS: i64 = 30;

/// Registry entry of a spawned process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalProcess {
    pid: u32,
    port: u16,
    project_id: String,
    #[serde(default)]
    environment: Option<String>,
    log_path: PathBuf,
    started_at: DateTime<Utc>,
    #[serde(default)]
    stopped_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct LocalState {
    processes: HashMap<u32, LocalProcess>,
    /// Processes spawned by this daemon run
    children: HashMap<u32, Child>,
}

type StreamingSet = Arc<StdMutex<HashSet<u32>>>;

pub struct LocalBackend {
    settings: LocalSettings,
    env_options: TaskEnvOptions,
    registry: File,
    logs_dir: Dir,
    state: Mutex<LocalState>,
    /// Pids whose log file is being streamed
    streaming: StreamingSet,
    http: reqwest::Client,
}

impl LocalBackend {
    pub fn new(
        settings: LocalSettings,
        env_options: TaskEnvOptions,
        registry: File,
        logs_dir: Dir,
    ) -> Result<Self, OrchestratorError> {
        let http = reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build()?;
        Ok(Self {
            settings,
            env_options,
            registry,
            logs_dir,
            state: Mutex::new(LocalState::default()),
            streaming: Arc::new(StdMutex::new(HashSet::new())),
            http,
        })
    }

    async fn persist(&self, state: &LocalState) -> Result<(), OrchestratorError> {
        let mut entries: Vec<&LocalProcess> = state.processes.values().collect();
        entries.sort_by_key(|e| e.pid);
        self.registry.write_json(&entries).await
    }

    async fn terminate_all(&self, state: &mut LocalState) {
        let LocalState { processes, children } = state;
        for entry in processes.values().filter(|e| e.stopped_at.is_none()) {
            terminate(children, entry).await;
            stop_streaming(&self.streaming, entry.pid);
        }
        processes.clear();
        children.clear();
    }

    async fn probe_health(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}{}", port, self.settings.health_path);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health probe {} failed: {}", url, e);
                false
            }
        }
    }

    /// Re-emit a process's log file into the daemon log
    fn stream_logs(&self, pid: u32, path: PathBuf, from_end: bool) {
        match self.streaming.lock() {
            Ok(mut set) => {
                if !set.insert(pid) {
                    return;
                }
            }
            Err(e) => {
                error!("Streaming registry poisoned: {}", e);
                return;
            }
        }

        let streaming = self.streaming.clone();
        tokio::spawn(async move {
            if let Err(e) = tail_file(pid, &path, from_end, &streaming).await {
                warn!("Stopped streaming logs of process {}: {}", pid, e);
            }
            stop_streaming(&streaming, pid);
        });
    }
}

fn stop_streaming(streaming: &StreamingSet, pid: u32) {
    if let Ok(mut set) = streaming.lock() {
        set.remove(&pid);
    }
}

fn is_streaming(streaming: &StreamingSet, pid: u32) -> bool {
    streaming.lock().map(|set| set.contains(&pid)).unwrap_or(false)
}

async fn tail_file(
    pid: u32,
    path: &Path,
    from_end: bool,
    streaming: &StreamingSet,
) -> Result<(), OrchestratorError> {
    let mut file = tokio::fs::File::open(path).await?;
    if from_end {
        file.seek(SeekFrom::End(0)).await?;
    }

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            if !is_streaming(streaming, pid) || !pid_running(pid) {
                return Ok(());
            }
            tokio::time::sleep(TAIL_INTERVAL).await;
            continue;
        }

        let text = line.trim_end();
        if !text.is_empty() {
            info!(target: LOG_TARGET, pid, "{}", text);
        }
    }
}

/// Parse a `"<pid>:<port>"` handle; the port part may be missing
fn parse_handle(handle: &TaskHandle) -> Result<(u32, Option<u16>), OrchestratorError> {
    let raw = handle.as_str();
    let invalid = || OrchestratorError::InvalidTaskHandle(raw.to_string());

    let (pid, port) = match raw.split_once(':') {
        Some((pid, port)) => (pid, Some(port).filter(|p| !p.is_empty())),
        None => (raw, None),
    };
    let pid = pid.parse::<u32>().map_err(|_| invalid())?;
    let port = port
        .map(|p| p.parse::<u16>().map_err(|_| invalid()))
        .transpose()?;
    Ok((pid, port))
}

fn refreshed(pid: Pid) -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
}

fn pid_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    refreshed(pid)
        .process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

/// Run `f` on the registry entry's process if it is still the same, live process
fn with_live_process<R>(entry: &LocalProcess, f: impl FnOnce(&Process) -> R) -> Option<R> {
    let pid = Pid::from_u32(entry.pid);
    let system = refreshed(pid);
    let process = system.process(pid)?;

    if process.status() == ProcessStatus::Zombie {
        return None;
    }
    let skew = process.start_time() as i64 - entry.started_at.timestamp();
    if skew.abs() > START_TIME_TOLERANCE_SECS {
        // pid was reused by an unrelated process
        return None;
    }
    Some(f(process))
}

fn is_alive(children: &mut HashMap<u32, Child>, entry: &LocalProcess) -> bool {
    if let Some(child) = children.get_mut(&entry.pid) {
        return matches!(child.try_wait(), Ok(None));
    }
    with_live_process(entry, |_| ()).is_some()
}

async fn terminate(children: &mut HashMap<u32, Child>, entry: &LocalProcess) {
    if let Some(mut child) = children.remove(&entry.pid) {
        if let Err(e) = child.kill().await {
            debug!("Process {} already exited: {}", entry.pid, e);
        }
    } else if with_live_process(entry, |p| p.kill()) != Some(true) {
        debug!("Process {} not running", entry.pid);
        return;
    }
    info!(
        "Terminated local process {} of project {}",
        entry.pid, entry.project_id
    );
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn is_exclusive(&self) -> bool {
        true
    }

    async fn create_task(
        &self,
        project: &Project,
        environment: Option<&str>,
    ) -> Result<TaskHandle, OrchestratorError> {
        let mut state = self.state.lock().await;
        self.terminate_all(&mut state).await;

        let port = self.settings.port;
        let container_name = format!("local-{}-{}", project.id, short_id());
        let mut vars =
            build_task_environment(&self.env_options, &project.id, environment, &container_name);
        vars.insert(CONFIG_ENV_VAR.to_string(), environment.unwrap_or_default().to_string());
        vars.insert(PORT_VAR.to_string(), port.to_string());

        self.logs_dir.create().await?;
        let log_path = self.logs_dir.path().join(format!("{}.log", container_name));
        let stdout = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?
            .into_std()
            .await;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(&self.settings.command);
        command
            .args(&self.settings.args)
            .envs(vars)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = &self.settings.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            OrchestratorError::InfraError(format!(
                "failed to spawn {}: {}",
                self.settings.command, e
            ))
        })?;
        let pid = child.id().ok_or_else(|| {
            OrchestratorError::InfraError("local process exited immediately".to_string())
        })?;

        info!(
            "Spawned local process {} for project {} on port {}",
            pid, project.id, port
        );
        state.processes.insert(
            pid,
            LocalProcess {
                pid,
                port,
                project_id: project.id.clone(),
                environment: environment.map(|e| e.to_string()),
                log_path: log_path.clone(),
                started_at: Utc::now(),
                stopped_at: None,
            },
        );
        state.children.insert(pid, child);
        self.persist(&state).await?;
        drop(state);

        self.stream_logs(pid, log_path, false);
        Ok(TaskHandle::new(format!("{}:{}", pid, port)))
    }

    async fn remove_task(&self, handle: &TaskHandle) -> Result<(), OrchestratorError> {
        let (pid, _) = parse_handle(handle)?;

        let mut state = self.state.lock().await;
        let LocalState { processes, children } = &mut *state;
        let Some(entry) = processes.get_mut(&pid) else {
            debug!("Local process {} not tracked", pid);
            return Ok(());
        };
        if entry.stopped_at.is_none() {
            terminate(children, entry).await;
            entry.stopped_at = Some(Utc::now());
        }
        stop_streaming(&self.streaming, pid);
        self.persist(&state).await
    }

    async fn get_task(&self, handle: &TaskHandle) -> Result<TaskStatus, OrchestratorError> {
        let (pid, port) = parse_handle(handle)?;
        let Some(port) = port else {
            return Ok(TaskStatus::stopped());
        };

        let alive = {
            let mut state = self.state.lock().await;
            let LocalState { processes, children } = &mut *state;
            match processes.get(&pid) {
                Some(entry) if entry.stopped_at.is_none() => is_alive(children, entry),
                _ => return Ok(TaskStatus::stopped()),
            }
        };

        if !alive {
            return Ok(TaskStatus {
                is_running: false,
                healthy: false,
                explicitly_stopped: false,
            });
        }

        Ok(TaskStatus {
            is_running: true,
            healthy: self.probe_health(port).await,
            explicitly_stopped: false,
        })
    }

    async fn get_container_url(
        &self,
        _project: &Project,
        _environment: Option<&str>,
        handle: &TaskHandle,
    ) -> Result<String, OrchestratorError> {
        let (_, port) = parse_handle(handle)?;
        let port = port.unwrap_or(self.settings.port);
        Ok(format!("http://{}:{}", self.settings.host, port))
    }

    /// Page through the process's log file; the page token is a line offset.
    /// Lines carry no timestamps, so `since` is not applied.
    async fn get_logs(
        &self,
        handle: &TaskHandle,
        page_token: Option<&str>,
        _since: Option<DateTime<Utc>>,
    ) -> Result<LogPage, OrchestratorError> {
        let (pid, _) = parse_handle(handle)?;
        let log_path = {
            let state = self.state.lock().await;
            state.processes.get(&pid).map(|e| e.log_path.clone())
        };
        let Some(log_path) = log_path else {
            return Ok(LogPage::default());
        };

        let contents = match File::new(&log_path).read_string().await {
            Ok(contents) => contents,
            Err(OrchestratorError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LogPage::default());
            }
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = contents.lines().collect();
        let offset = page_token
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0)
            .min(lines.len());
        let end = (offset + LOG_PAGE_SIZE).min(lines.len());

        let events = lines[offset..end]
            .iter()
            .filter(|line| is_application_line(line))
            .map(|line| LogEvent {
                timestamp: None,
                message: line.to_string(),
            })
            .collect();

        Ok(LogPage {
            events,
            next_token: Some(end.to_string()),
        })
    }

    async fn initialize_container_environment(&self) -> Result<(), OrchestratorError> {
        let recorded: Vec<LocalProcess> = self.registry.read_json_or_default().await?;

        let mut adopted = Vec::new();
        let mut state = self.state.lock().await;
        for entry in recorded {
            if state.processes.contains_key(&entry.pid) {
                continue;
            }
            if entry.stopped_at.is_none() && with_live_process(&entry, |_| ()).is_some() {
                info!(
                    "Adopting local process {} of project {}",
                    entry.pid, entry.project_id
                );
                adopted.push((entry.pid, entry.log_path.clone()));
                state.processes.insert(entry.pid, entry);
            } else {
                debug!("Pruning local process {}", entry.pid);
            }
        }
        self.persist(&state).await?;
        drop(state);

        for (pid, log_path) in adopted {
            self.stream_logs(pid, log_path, true);
        }
        Ok(())
    }
}

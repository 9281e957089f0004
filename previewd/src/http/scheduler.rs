//! Cloud task scheduler client
//!
//! The managed backend only needs a narrow slice of the scheduler: run, stop
//! and describe tasks, resolve the host a task landed on, and page through
//! the task's log stream.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::http::client::{ApiError, HttpClient};

/// Stop code the scheduler reports for stops requested through the API
pub const USER_INITIATED_STOP: &str = "UserInitiated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskRequest {
    pub task_definition: String,
    pub container_name: String,
    pub started_by: String,
    pub environment: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskResponse {
    task_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct StopTaskRequest<'a> {
    reason: &'a str,
}

/// Scheduler view of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDescription {
    pub task_id: String,
    pub last_status: String,
    pub desired_status: String,
    pub health_status: Option<String>,
    pub stop_code: Option<String>,
    /// Host (container instance) the task was placed on
    pub host_id: Option<String>,
    /// Host port bound to the container, once assigned
    pub host_port: Option<u16>,
}

impl TaskDescription {
    pub fn is_running(&self) -> bool {
        self.last_status == "RUNNING"
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status.as_deref() == Some("HEALTHY")
    }

    pub fn stopped_by_user(&self) -> bool {
        self.stop_code.as_deref() == Some(USER_INITIATED_STOP)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostDescription {
    pub host_id: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub public_ip: Option<String>,
    pub public_dns: Option<String>,
    pub private_ip: Option<String>,
}

impl InstanceDescription {
    /// Best reachable address of the instance
    pub fn reachable_address(&self) -> Option<&str> {
        self.public_ip
            .as_deref()
            .or(self.public_dns.as_deref())
            .or(self.private_ip.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub group: String,
    pub stream: String,
    pub next_token: Option<String>,
    /// Milliseconds since the epoch
    pub start_time: Option<i64>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLogEvent {
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogEventsPage {
    pub events: Vec<RawLogEvent>,
    pub next_token: Option<String>,
}

/// Narrow interface to the remote task scheduler
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn run_task(&self, request: RunTaskRequest) -> Result<String, OrchestratorError>;

    /// Fails with `TaskNotFound` when the task is already gone
    async fn stop_task(&self, task_id: &str, reason: &str) -> Result<(), OrchestratorError>;

    /// `None` when the scheduler no longer knows the task
    async fn describe_task(&self, task_id: &str) -> Result<Option<TaskDescription>, OrchestratorError>;

    async fn describe_host(&self, host_id: &str) -> Result<HostDescription, OrchestratorError>;

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceDescription, OrchestratorError>;

    /// Fails with `ThrottlingError` when rate limited
    async fn get_log_events(&self, query: &LogQuery) -> Result<LogEventsPage, OrchestratorError>;
}

/// REST implementation of [`TaskScheduler`]
pub struct HttpTaskScheduler {
    http: HttpClient,
    cluster: String,
}

impl HttpTaskScheduler {
    pub fn new(
        base_url: &str,
        cluster: &str,
        token: Option<SecretString>,
    ) -> Result<Self, OrchestratorError> {
        let http = HttpClient::new(base_url, token).map_err(|e| scheduler_error(e, "client"))?;
        Ok(Self {
            http,
            cluster: cluster.to_string(),
        })
    }

    fn task_path(&self, task_id: &str) -> String {
        format!("/clusters/{}/tasks/{}", self.cluster, task_id)
    }
}

fn scheduler_error(err: ApiError, subject: &str) -> OrchestratorError {
    match err.status() {
        Some(StatusCode::NOT_FOUND) => OrchestratorError::TaskNotFound(subject.to_string()),
        Some(StatusCode::TOO_MANY_REQUESTS) => OrchestratorError::ThrottlingError(err.to_string()),
        _ => OrchestratorError::InfraError(err.to_string()),
    }
}

/// Log group and stream names contain slashes; keep each one a single segment
fn encode_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[async_trait]
impl TaskScheduler for HttpTaskScheduler {
    async fn run_task(&self, request: RunTaskRequest) -> Result<String, OrchestratorError> {
        let path = format!("/clusters/{}/tasks", self.cluster);
        let response: RunTaskResponse = self
            .http
            .post(&path, &request)
            .await
            .map_err(|e| OrchestratorError::InfraError(format!("run task refused: {}", e)))?;
        Ok(response.task_id)
    }

    async fn stop_task(&self, task_id: &str, reason: &str) -> Result<(), OrchestratorError> {
        let path = format!("{}/stop", self.task_path(task_id));
        self.http
            .post_no_content(&path, &StopTaskRequest { reason })
            .await
            .map_err(|e| scheduler_error(e, task_id))
    }

    async fn describe_task(&self, task_id: &str) -> Result<Option<TaskDescription>, OrchestratorError> {
        match self.http.get::<TaskDescription>(&self.task_path(task_id)).await {
            Ok(task) => Ok(Some(task)),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(scheduler_error(e, task_id)),
        }
    }

    async fn describe_host(&self, host_id: &str) -> Result<HostDescription, OrchestratorError> {
        let path = format!("/clusters/{}/hosts/{}", self.cluster, host_id);
        self.http
            .get(&path)
            .await
            .map_err(|e| scheduler_error(e, host_id))
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceDescription, OrchestratorError> {
        self.http
            .get(&format!("/instances/{}", instance_id))
            .await
            .map_err(|e| scheduler_error(e, instance_id))
    }

    async fn get_log_events(&self, query: &LogQuery) -> Result<LogEventsPage, OrchestratorError> {
        let path = format!(
            "/logs/{}/streams/{}",
            encode_segment(&query.group),
            encode_segment(&query.stream)
        );

        let mut params: Vec<(&str, String)> = vec![("limit", query.limit.to_string())];
        if let Some(token) = &query.next_token {
            params.push(("nextToken", token.clone()));
        }
        if let Some(start) = query.start_time {
            params.push(("startTime", start.to_string()));
        }

        self.http
            .get_with_query(&path, &params)
            .await
            .map_err(|e| scheduler_error(e, &query.stream))
    }
}

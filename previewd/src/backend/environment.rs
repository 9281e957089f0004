//! Environment injected into every preview task

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};

pub const API_SECRET_VAR: &str = "STACKBIT_API_SECRET";
pub const CONFIG_URL_VAR: &str = "CONFIG_URL";
pub const WEBHOOK_URL_VAR: &str = "WEBHOOK_URL";
pub const CONTAINER_NAME_VAR: &str = "CONTAINER_NAME";
pub const PROJECT_ID_VAR: &str = "STACKBIT_PROJECT_ID";
pub const CONFIG_ENV_VAR: &str = "CONFIG_ENV";
pub const PORT_VAR: &str = "PORT";

/// What a task needs to call back into the system
#[derive(Debug, Clone)]
pub struct TaskEnvOptions {
    /// Public API base URL
    pub api_base_url: String,
    pub api_secret: SecretString,
}

/// Build the callback environment of a task
pub fn build_task_environment(
    options: &TaskEnvOptions,
    project_id: &str,
    environment: Option<&str>,
    container_name: &str,
) -> BTreeMap<String, String> {
    let base = options.api_base_url.trim_end_matches('/');
    let suffix = environment.map(|env| format!("/{}", env)).unwrap_or_default();

    let mut vars = BTreeMap::new();
    vars.insert(
        API_SECRET_VAR.to_string(),
        options.api_secret.expose_secret().to_string(),
    );
    vars.insert(
        CONFIG_URL_VAR.to_string(),
        format!("{}/project/{}/config{}", base, project_id, suffix),
    );
    vars.insert(
        WEBHOOK_URL_VAR.to_string(),
        format!("{}/project/{}/webhook/container{}", base, project_id, suffix),
    );
    vars.insert(CONTAINER_NAME_VAR.to_string(), container_name.to_string());
    vars.insert(PROJECT_ID_VAR.to_string(), project_id.to_string());
    vars
}

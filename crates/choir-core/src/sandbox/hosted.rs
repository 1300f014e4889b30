//! Hosted sandbox provider.
//!
//! Drives a remote sandbox service over HTTP with the same semantics as the
//! local runner. Requests carry a bearer token when configured.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    Result, SandboxCheckpoint, SandboxCommand, SandboxConfig, SandboxError, SandboxExec,
    SandboxHandle, SandboxRunner,
};

pub struct HostedSandboxRunner {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl HostedSandboxRunner {
    pub fn new(api_base: &str, token: Option<String>, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn request(&self, method: reqwest::Method, path: &str, payload: Option<Value>) -> Result<Value> {
        let url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        let mut req = self.client.request(method, &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(payload) = payload {
            req = req.json(&payload);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Api(format!(
                "sandbox api error {status}: {detail}"
            )));
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(json!({}));
        }
        Ok(serde_json::from_slice(&body)
            .unwrap_or_else(|_| json!({"raw": String::from_utf8_lossy(&body)})))
    }

    /// Remote APIs are loose about id field names; accept the common ones.
    fn extract_id(payload: &Value, key: &str) -> Option<String> {
        let camel = format!(
            "{}Id",
            key.split('_').collect::<Vec<_>>().join("")
        );
        for candidate in [key, "id", &format!("{key}_id"), camel.as_str()] {
            if let Some(v) = payload.get(candidate).and_then(Value::as_str) {
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
        None
    }
}

#[async_trait]
impl SandboxRunner for HostedSandboxRunner {
    async fn create(&self, config: SandboxConfig) -> Result<SandboxHandle> {
        let payload = serde_json::to_value(&config)
            .map_err(|e| SandboxError::Config(e.to_string()))?;
        let response = self
            .request(reqwest::Method::POST, "/v1/sandboxes", Some(payload))
            .await?;
        let sandbox_id = Self::extract_id(&response, "sandbox")
            .or_else(|| Self::extract_id(&response, "handle"))
            .ok_or_else(|| SandboxError::Api("create did not return sandbox id".to_string()))?;
        Ok(SandboxHandle { sandbox_id, config })
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        match self
            .request(
                reqwest::Method::DELETE,
                &format!("/v1/sandboxes/{}", handle.sandbox_id),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            // Destroy is idempotent; a 404 means already gone.
            Err(SandboxError::Api(msg)) if msg.contains("404") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn checkpoint(
        &self,
        handle: &SandboxHandle,
        label: Option<&str>,
    ) -> Result<SandboxCheckpoint> {
        let payload = label.map(|l| json!({"label": l})).unwrap_or_else(|| json!({}));
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/sandboxes/{}/checkpoints", handle.sandbox_id),
                Some(payload),
            )
            .await?;
        let checkpoint_id = Self::extract_id(&response, "checkpoint")
            .ok_or_else(|| SandboxError::Api("checkpoint did not return id".to_string()))?;
        let created_at = response
            .get("created_at")
            .or_else(|| response.get("createdAt"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(SandboxCheckpoint {
            checkpoint_id,
            created_at,
            label: label.map(str::to_owned),
        })
    }

    async fn restore(&self, handle: &SandboxHandle, checkpoint_id: &str) -> Result<()> {
        match self
            .request(
                reqwest::Method::POST,
                &format!("/v1/sandboxes/{}/restore", handle.sandbox_id),
                Some(json!({"checkpoint_id": checkpoint_id})),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(SandboxError::Api(msg)) if msg.contains("404") => {
                Err(SandboxError::UnknownCheckpoint(checkpoint_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn run(&self, command: SandboxCommand) -> Result<SandboxExec> {
        let handle = command.sandbox.as_ref().ok_or(SandboxError::MissingHandle)?;
        let payload = json!({
            "command": command.command,
            "cwd": command.cwd.as_ref().map(|p| p.display().to_string()),
            "env": command.env.clone().unwrap_or_default(),
            "timeout_seconds": command.timeout_seconds,
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/sandboxes/{}/exec", handle.sandbox_id),
                Some(payload),
            )
            .await?;
        Ok(SandboxExec {
            return_code: response
                .get("return_code")
                .or_else(|| response.get("exit_code"))
                .and_then(Value::as_i64)
                .unwrap_or(1) as i32,
            stdout: response
                .get("stdout")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            stderr: response
                .get("stderr")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            timed_out: response
                .get("timed_out")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    async fn start_process(&self, handle: &SandboxHandle, command: Vec<String>) -> Result<String> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/sandboxes/{}/processes", handle.sandbox_id),
                Some(json!({"command": command})),
            )
            .await?;
        Self::extract_id(&response, "process")
            .ok_or_else(|| SandboxError::Api("start_process did not return id".to_string()))
    }

    async fn stop_process(&self, handle: &SandboxHandle, process_id: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!(
                "/v1/sandboxes/{}/processes/{}",
                handle.sandbox_id, process_id
            ),
            None,
        )
        .await?;
        Ok(())
    }

    async fn open_proxy(&self, handle: &SandboxHandle, port: u16) -> Result<String> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/sandboxes/{}/proxy", handle.sandbox_id),
                Some(json!({"port": port})),
            )
            .await?;
        response
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| SandboxError::Api("proxy did not return url".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_id_accepts_variants() {
        let v = json!({"sandbox_id": "sb-1"});
        assert_eq!(
            HostedSandboxRunner::extract_id(&v, "sandbox").as_deref(),
            Some("sb-1")
        );
        let v = json!({"id": "sb-2"});
        assert_eq!(
            HostedSandboxRunner::extract_id(&v, "sandbox").as_deref(),
            Some("sb-2")
        );
        let v = json!({"sandboxId": "sb-3"});
        assert_eq!(
            HostedSandboxRunner::extract_id(&v, "sandbox").as_deref(),
            Some("sb-3")
        );
        let v = json!({"sandbox_id": ""});
        assert_eq!(HostedSandboxRunner::extract_id(&v, "sandbox"), None);
    }

    #[tokio::test]
    async fn run_without_handle_is_rejected() {
        let runner = HostedSandboxRunner::new("http://127.0.0.1:1", None, 1).unwrap();
        let err = runner
            .run(SandboxCommand::new(vec!["true".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::MissingHandle));
    }
}

//! Outbound notifications to the resource manager that actually owns
//! the machines (starts processes, enforces cgroups, etc). The
//! scheduler only ever decides *which* machines a job gets; a
//! [`ResourceManagerClient`] tells the outside world about it.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::ClientError;

pub trait ResourceManagerClient: Send + Sync {
    fn alloc_resources(&self, job_id: i32, machines: &BTreeSet<u32>) -> Result<(), ClientError>;
}

/// HTTP client for a resource manager exposing a `POST /alloc` endpoint.
///
/// `alloc_resources` is called from inside `Handler`'s mutex-guarded
/// critical section, which itself runs on an async Tokio worker thread
/// (the axum request handlers). To avoid blocking that thread or
/// holding the lock across a network round-trip, the actual HTTP call
/// is handed off to a detached `tokio::spawn`ed task on the crate's
/// async `reqwest::Client`; `alloc_resources` itself returns as soon as
/// the task is scheduled. Failures are logged from within the task
/// rather than propagated, since the caller has already moved on.
pub struct HttpResourceManagerClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpResourceManagerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("building the resource manager http client");
        Self { base_url: base_url.into(), http }
    }
}

#[derive(serde::Serialize)]
struct AllocRequest {
    job_id: i32,
    machines: BTreeSet<u32>,
}

impl ResourceManagerClient for HttpResourceManagerClient {
    fn alloc_resources(&self, job_id: i32, machines: &BTreeSet<u32>) -> Result<(), ClientError> {
        let url = format!("{}/alloc", self.base_url);
        let body = AllocRequest { job_id, machines: machines.clone() };
        let http = self.http.clone();
        let machine_count = machines.len();

        tokio::spawn(async move {
            let result = async {
                let response = http
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ClientError::Request(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(ClientError::Status(response.status().to_string()));
                }
                Ok(())
            }
            .await;

            match result {
                Ok(()) => debug!(job_id, machines = machine_count, "resource manager accepted allocation"),
                Err(e) => error!(job_id, error = %e, "resource manager allocation notice failed"),
            }
        });

        Ok(())
    }
}

/// Records every call instead of sending it anywhere. Used by tests and
/// by deployments with no external resource manager to notify.
#[derive(Default)]
pub struct RecordingResourceManagerClient {
    calls: Mutex<Vec<(i32, BTreeSet<u32>)>>,
}

impl RecordingResourceManagerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(i32, BTreeSet<u32>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResourceManagerClient for RecordingResourceManagerClient {
    fn alloc_resources(&self, job_id: i32, machines: &BTreeSet<u32>) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push((job_id, machines.clone()));
        Ok(())
    }
}

/// Logs and drops the allocation. Used when no resource manager is
/// configured at all.
pub struct NullResourceManagerClient;

impl ResourceManagerClient for NullResourceManagerClient {
    fn alloc_resources(&self, job_id: i32, machines: &BTreeSet<u32>) -> Result<(), ClientError> {
        warn!(job_id, machines = machines.len(), "no resource manager configured, dropping allocation notice");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_client_keeps_calls_in_order() {
        let client = RecordingResourceManagerClient::new();
        client.alloc_resources(1, &[0, 1].into_iter().collect()).unwrap();
        client.alloc_resources(2, &[2].into_iter().collect()).unwrap();
        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, 1);
        assert_eq!(calls[1].0, 2);
    }
}

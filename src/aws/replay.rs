//! Replay of recorded responses
//!
//! Serves the files a recording run wrote (see `record_path`) instead of
//! calling AWS. Lookup tries the exact call file first, then the
//! parameterless `<Operation>.json`, so one fixture can answer every
//! variant of a call.

use super::client::{record_file_name, ApiRequest, ClientFactory, ClientKey, Transport};
use crate::error::ApiError;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transport reading `<root>/<service>/<region>/<account>/<file>.json`
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    root: PathBuf,
}

impl ReplayTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, request: &ApiRequest) -> Vec<PathBuf> {
        let dir = self
            .root
            .join(&request.key.service)
            .join(&request.key.region)
            .join(&request.key.account);
        let params = request.params.as_object().cloned().unwrap_or_default();

        let mut files = vec![dir.join(record_file_name(&request.operation, &params))];
        let bare = dir.join(record_file_name(&request.operation, &Map::new()));
        if !files.contains(&bare) {
            files.push(bare);
        }
        files
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        for path in self.candidates(request) {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    tracing::debug!("replaying {:?}", path);
                    return serde_json::from_str(&content).map_err(|e| {
                        let message = format!("bad fixture {:?}: {}", path, e);
                        ApiError::transport(&request.operation, message)
                    });
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ApiError::transport(
                        &request.operation,
                        format!("cannot read {:?}: {}", path, e),
                    ))
                },
            }
        }

        tracing::debug!("no recorded response for {} {}", request.key, request.operation);
        Err(ApiError::not_found(&request.operation, "no recorded response"))
    }
}

/// Factory whose every client replays from one directory.
///
/// Accounts are the directory names found at `<root>/<service>/<region>/`.
#[derive(Debug, Clone)]
pub struct ReplayClientFactory {
    root: PathBuf,
}

impl ReplayClientFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn subdirs(path: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default()
}

impl ClientFactory for ReplayClientFactory {
    fn accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = subdirs(&self.root)
            .iter()
            .flat_map(|service| subdirs(service))
            .flat_map(|region| subdirs(&region))
            .filter_map(|account| account.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        accounts.sort();
        accounts.dedup();
        accounts
    }

    fn transport(&self, _key: &ClientKey) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(ReplayTransport::new(self.root.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(root: &Path, rel: &str, body: &Value) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(body).unwrap()).unwrap();
    }

    fn request(operation: &str, params: Value) -> ApiRequest {
        ApiRequest {
            key: ClientKey::new("sqs", "us-east-1", "123456789012"),
            operation: operation.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_exact_file_preferred_over_bare() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sqs/us-east-1/123456789012/ListQueues.json",
            &json!({"QueueUrls": ["all"]}),
        );
        write(
            dir.path(),
            "sqs/us-east-1/123456789012/ListQueues_QueueNamePrefix_jobs.json",
            &json!({"QueueUrls": ["jobs"]}),
        );
        let transport = ReplayTransport::new(dir.path());

        let filtered = transport
            .send(&request("ListQueues", json!({"QueueNamePrefix": "jobs"})))
            .await
            .unwrap();
        assert_eq!(filtered["QueueUrls"], json!(["jobs"]));

        let other = transport
            .send(&request("ListQueues", json!({"QueueNamePrefix": "web"})))
            .await
            .unwrap();
        assert_eq!(other["QueueUrls"], json!(["all"]));
    }

    #[tokio::test]
    async fn test_missing_fixture_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReplayTransport::new(dir.path())
            .send(&request("ListQueues", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_accounts_from_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sqs/us-east-1/222/ListQueues.json", &json!({}));
        write(dir.path(), "sqs/eu-west-1/111/ListQueues.json", &json!({}));
        write(dir.path(), "dynamodb/us-east-1/111/ListTables.json", &json!({}));

        assert_eq!(ReplayClientFactory::new(dir.path()).accounts(), vec!["111", "222"]);
    }
}

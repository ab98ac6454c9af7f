//! In-process contents store with the same versioning rules as the hosted API.
//!
//! Used by tests and offline tooling; failures and latency can be injected.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{ContentsApi, PutRequest, RemoteError, RemoteFile, RemoteResult};

/// Failure to return from the next matching request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Network,
    Unauthorized,
    Conflict,
}

impl InjectedFailure {
    fn into_error(self, path: &str) -> RemoteError {
        match self {
            Self::Network => RemoteError::Transport(format!("connection reset while accessing {path}")),
            Self::Unauthorized => RemoteError::Unauthorized("Bad credentials (401)".to_string()),
            Self::Conflict => RemoteError::Conflict(format!("{path} does not match sha (409)")),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<String, RemoteFile>,
    next_sha: u64,
    put_counts: HashMap<String, usize>,
    get_count: usize,
    put_delay: Option<Duration>,
    put_failures: VecDeque<InjectedFailure>,
    get_failures: VecDeque<InjectedFailure>,
    inaccessible: bool,
}

impl State {
    fn allocate_sha(&mut self) -> String {
        self.next_sha += 1;
        format!("sha-{}", self.next_sha)
    }
}

/// Shared in-memory repository. Clones see the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryContents {
    state: Arc<Mutex<State>>,
}

impl MemoryContents {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a file directly, as another device would. Returns the new sha.
    pub fn insert_file(&self, path: &str, content: impl Into<String>) -> String {
        let mut state = self.lock();
        let sha = state.allocate_sha();
        state.files.insert(
            path.to_string(),
            RemoteFile {
                content: content.into(),
                sha: sha.clone(),
            },
        );
        sha
    }

    pub fn remove_file(&self, path: &str) {
        self.lock().files.remove(path);
    }

    pub fn file(&self, path: &str) -> Option<RemoteFile> {
        self.lock().files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Write attempts for `path`, including rejected ones.
    pub fn put_count(&self, path: &str) -> usize {
        self.lock().put_counts.get(path).copied().unwrap_or(0)
    }

    pub fn total_puts(&self) -> usize {
        self.lock().put_counts.values().sum()
    }

    pub fn get_count(&self) -> usize {
        self.lock().get_count
    }

    /// Delay applied to every write before it takes effect.
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        self.lock().put_delay = delay;
    }

    pub fn fail_next_put(&self, failure: InjectedFailure) {
        self.lock().put_failures.push_back(failure);
    }

    pub fn fail_next_get(&self, failure: InjectedFailure) {
        self.lock().get_failures.push_back(failure);
    }

    pub fn set_accessible(&self, accessible: bool) {
        self.lock().inaccessible = !accessible;
    }

    fn apply_put(&self, request: &PutRequest) -> RemoteResult<String> {
        let mut state = self.lock();
        if let Some(failure) = state.put_failures.pop_front() {
            return Err(failure.into_error(&request.path));
        }

        let current = state.files.get(&request.path).map(|file| file.sha.clone());
        match (current.as_deref(), request.sha.as_deref()) {
            (Some(_), None) => {
                return Err(RemoteError::Conflict(format!(
                    "Invalid request. \"sha\" wasn't supplied for {} (422)",
                    request.path
                )));
            }
            (Some(current), Some(expected)) if current != expected => {
                return Err(RemoteError::Conflict(format!(
                    "{} does not match {expected} (409)",
                    request.path
                )));
            }
            (None, Some(expected)) => {
                return Err(RemoteError::Conflict(format!(
                    "{} does not exist at {expected} (409)",
                    request.path
                )));
            }
            _ => {}
        }

        let sha = state.allocate_sha();
        state.files.insert(
            request.path.clone(),
            RemoteFile {
                content: request.content.clone(),
                sha: sha.clone(),
            },
        );
        Ok(sha)
    }
}

impl ContentsApi for MemoryContents {
    async fn get_file(&self, path: &str) -> RemoteResult<Option<RemoteFile>> {
        let mut state = self.lock();
        state.get_count += 1;
        if let Some(failure) = state.get_failures.pop_front() {
            return Err(failure.into_error(path));
        }
        Ok(state.files.get(path).cloned())
    }

    async fn put_file(&self, request: PutRequest) -> RemoteResult<String> {
        let delay = {
            let mut state = self.lock();
            *state.put_counts.entry(request.path.clone()).or_default() += 1;
            state.put_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.apply_put(&request)
    }

    async fn check_access(&self) -> RemoteResult<()> {
        if self.lock().inaccessible {
            return Err(RemoteError::Unauthorized("Bad credentials (401)".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn put(path: &str, content: &str, sha: Option<&str>) -> PutRequest {
        PutRequest {
            path: path.to_string(),
            content: content.to_string(),
            message: "test".to_string(),
            sha: sha.map(str::to_string),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_update_with_sha() {
        let remote = MemoryContents::new();
        let first = remote.put_file(put("a.md.enc", "one", None)).await.unwrap();
        let second = remote
            .put_file(put("a.md.enc", "two", Some(&first)))
            .await
            .unwrap();

        assert_ne!(first, second);
        let file = remote.get_file("a.md.enc").await.unwrap().unwrap();
        assert_eq!(file.content, "two");
        assert_eq!(file.sha, second);
        assert_eq!(remote.put_count("a.md.enc"), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_or_missing_sha_is_a_conflict() {
        let remote = MemoryContents::new();
        let first = remote.put_file(put("a.md.enc", "one", None)).await.unwrap();
        remote.insert_file("a.md.enc", "other device");

        let stale = remote.put_file(put("a.md.enc", "two", Some(&first))).await;
        assert!(matches!(stale, Err(RemoteError::Conflict(_))));

        let blind = remote.put_file(put("a.md.enc", "two", None)).await;
        assert!(matches!(blind, Err(RemoteError::Conflict(_))));
        assert_eq!(remote.file("a.md.enc").unwrap().content, "other device");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures_fire_once() {
        let remote = MemoryContents::new();
        remote.fail_next_put(InjectedFailure::Network);
        remote.fail_next_get(InjectedFailure::Unauthorized);

        assert!(matches!(
            remote.put_file(put("a.md.enc", "one", None)).await,
            Err(RemoteError::Transport(_))
        ));
        assert!(remote.put_file(put("a.md.enc", "one", None)).await.is_ok());

        assert!(remote.get_file("a.md.enc").await.unwrap_err().is_unauthorized());
        assert!(remote.get_file("a.md.enc").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_file_reads_as_none() {
        let remote = MemoryContents::new();
        assert_eq!(remote.get_file("nothing.md.enc").await.unwrap(), None);
        assert_eq!(remote.get_count(), 1);
    }
}

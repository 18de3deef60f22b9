//! In-memory mock sandbox for testing without Docker.
//!
//! Keeps a live set, a per-environment file tree and a queue of scripted exec
//! behaviours. Tests can also simulate external drift by killing environments
//! behind the pool's back.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use codemode_core::{Error, Result};

use crate::engine::{DirEntry, EnvironmentSpec, ExecOutput, SandboxEngine, SandboxId};

/// What the next `exec` call does.
#[derive(Debug, Clone)]
pub enum MockExec {
    /// Return this output immediately.
    Respond(ExecOutput),
    /// Wait, then return the output. Cancellation cuts the wait short.
    Delay(Duration, ExecOutput),
    /// Emit partial output, then block until cancelled.
    Hang { stdout: String },
    /// Fail at the backend level.
    Fail(String),
}

impl MockExec {
    /// Completed run with the given stdout and exit code.
    pub fn output(stdout: impl Into<String>, exit_code: i64) -> Self {
        Self::Respond(ExecOutput {
            stdout: stdout.into().into_bytes(),
            stderr: Vec::new(),
            exit_code: Some(exit_code),
            cancelled: false,
        })
    }

    /// Completed run with both streams.
    pub fn streams(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self::Respond(ExecOutput {
            stdout: stdout.into().into_bytes(),
            stderr: stderr.into().into_bytes(),
            exit_code: Some(exit_code),
            cancelled: false,
        })
    }
}

#[derive(Default)]
struct MockFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

/// In-memory mock sandbox for unit testing.
pub struct MockSandbox {
    exec_responses: Mutex<VecDeque<MockExec>>,
    live: Mutex<HashSet<SandboxId>>,
    fs: Mutex<HashMap<SandboxId, MockFs>>,
    /// Path prefix rewrites applied by `real_path`, simulating symlinks.
    links: Mutex<Vec<(String, String)>>,
    executed: Mutex<Vec<(SandboxId, Vec<String>)>>,
    destroyed: Mutex<Vec<SandboxId>>,
    next_id: AtomicUsize,
    created: AtomicUsize,
    fail_creates: AtomicUsize,
    fail_list: AtomicBool,
    fail_clear: AtomicBool,
    destroy_delay_ms: AtomicU64,
    file_calls: AtomicUsize,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockSandbox {
    /// Create a mock sandbox with predefined exec responses.
    pub fn new(responses: Vec<MockExec>) -> Self {
        Self {
            exec_responses: Mutex::new(responses.into()),
            live: Mutex::new(HashSet::new()),
            fs: Mutex::new(HashMap::new()),
            links: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            fail_creates: AtomicUsize::new(0),
            fail_list: AtomicBool::new(false),
            fail_clear: AtomicBool::new(false),
            destroy_delay_ms: AtomicU64::new(0),
            file_calls: AtomicUsize::new(0),
        }
    }

    /// Queue another exec behaviour.
    pub async fn push_exec(&self, behaviour: MockExec) {
        self.exec_responses.lock().await.push_back(behaviour);
    }

    /// Make the next `n` create calls fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Make `list_live` fail until reset.
    pub fn set_list_failing(&self, failing: bool) {
        self.fail_list.store(failing, Ordering::SeqCst);
    }

    /// Make `clear_dir` fail until reset.
    pub fn set_clear_failing(&self, failing: bool) {
        self.fail_clear.store(failing, Ordering::SeqCst);
    }

    /// Slow every `destroy` call down by `delay`.
    pub fn set_destroy_delay(&self, delay: Duration) {
        self.destroy_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simulate an environment dying outside the pool's control.
    pub async fn kill(&self, id: &SandboxId) {
        self.live.lock().await.remove(id);
    }

    /// Route `real_path` lookups under `from` to `to`.
    pub async fn add_link(&self, from: impl Into<String>, to: impl Into<String>) {
        self.links.lock().await.push((from.into(), to.into()));
    }

    pub async fn live_ids(&self) -> HashSet<SandboxId> {
        self.live.lock().await.clone()
    }

    pub async fn destroyed_ids(&self) -> Vec<SandboxId> {
        self.destroyed.lock().await.clone()
    }

    pub async fn executed(&self) -> Vec<(SandboxId, Vec<String>)> {
        self.executed.lock().await.clone()
    }

    /// Total environments ever created.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Total file operations that reached the backend.
    pub fn file_call_count(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    async fn ensure_live(&self, id: &SandboxId) -> Result<()> {
        if self.live.lock().await.contains(id) {
            Ok(())
        } else {
            Err(Error::environment(format!("No such sandbox: {}", id)))
        }
    }

    fn parent(path: &str) -> Option<String> {
        let trimmed = path.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        Some(if idx == 0 {
            "/".to_string()
        } else {
            trimmed[..idx].to_string()
        })
    }
}

#[async_trait]
impl SandboxEngine for MockSandbox {
    async fn create(&self, spec: &EnvironmentSpec) -> Result<SandboxId> {
        let remaining = self.fail_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::environment("mock create failure"));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = SandboxId(format!("mock-sandbox-{}", n));
        let mut fs = MockFs::default();
        fs.dirs.insert(spec.workspace_root.clone());
        self.fs.lock().await.insert(id.clone(), fs);
        self.live.lock().await.insert(id.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn exec(
        &self,
        id: &SandboxId,
        command: &[String],
        _workdir: &str,
        cancel: CancellationToken,
    ) -> Result<ExecOutput> {
        self.ensure_live(id).await?;
        self.executed
            .lock()
            .await
            .push((id.clone(), command.to_vec()));

        let behaviour = self.exec_responses.lock().await.pop_front();
        match behaviour {
            None => Ok(ExecOutput {
                stdout: b"[mock] command executed".to_vec(),
                stderr: Vec::new(),
                exit_code: Some(0),
                cancelled: false,
            }),
            Some(MockExec::Respond(out)) => Ok(out),
            Some(MockExec::Delay(delay, out)) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(out),
                    _ = cancel.cancelled() => Ok(ExecOutput {
                        stdout: out.stdout,
                        stderr: out.stderr,
                        exit_code: None,
                        cancelled: true,
                    }),
                }
            }
            Some(MockExec::Hang { stdout }) => {
                cancel.cancelled().await;
                Ok(ExecOutput {
                    stdout: stdout.into_bytes(),
                    stderr: Vec::new(),
                    exit_code: None,
                    cancelled: true,
                })
            }
            Some(MockExec::Fail(msg)) => Err(Error::environment(msg)),
        }
    }

    async fn list_live(&self) -> Result<HashSet<SandboxId>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::environment("mock list failure"));
        }
        Ok(self.live.lock().await.clone())
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        let delay = self.destroy_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.live.lock().await.remove(id);
        self.fs.lock().await.remove(id);
        self.destroyed.lock().await.push(id.clone());
        Ok(())
    }

    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_live(id).await?;
        let fs = self.fs.lock().await;
        let tree = fs
            .get(id)
            .ok_or_else(|| Error::environment(format!("No such sandbox: {}", id)))?;
        if tree.dirs.contains(path) {
            return Err(Error::invalid_request(format!("Path is a directory: {}", path)));
        }
        tree.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(path.to_string()))
    }

    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_live(id).await?;
        let mut fs = self.fs.lock().await;
        let tree = fs
            .get_mut(id)
            .ok_or_else(|| Error::environment(format!("No such sandbox: {}", id)))?;

        let mut dir = Self::parent(path);
        while let Some(d) = dir {
            if tree.files.contains_key(&d) {
                return Err(Error::invalid_request(format!(
                    "Cannot create parent directory for '{}'",
                    path
                )));
            }
            let next = if d == "/" { None } else { Self::parent(&d) };
            tree.dirs.insert(d);
            dir = next;
        }
        tree.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn list_dir(&self, id: &SandboxId, path: &str) -> Result<Vec<DirEntry>> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_live(id).await?;
        let fs = self.fs.lock().await;
        let tree = fs
            .get(id)
            .ok_or_else(|| Error::environment(format!("No such sandbox: {}", id)))?;

        if tree.files.contains_key(path) {
            return Err(Error::NotADirectory(path.to_string()));
        }
        if !tree.dirs.contains(path) {
            return Err(Error::FileNotFound(path.to_string()));
        }

        let is_child = |p: &str| Self::parent(p).as_deref() == Some(path) && p != path;
        let mut entries: Vec<DirEntry> = tree
            .dirs
            .iter()
            .filter(|d| is_child(d))
            .map(|d| DirEntry {
                name: d.rsplit('/').next().unwrap_or_default().to_string(),
                is_dir: true,
            })
            .chain(tree.files.keys().filter(|f| is_child(f)).map(|f| DirEntry {
                name: f.rsplit('/').next().unwrap_or_default().to_string(),
                is_dir: false,
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn real_path(&self, id: &SandboxId, path: &str) -> Result<String> {
        self.ensure_live(id).await?;
        let links = self.links.lock().await;
        for (from, to) in links.iter() {
            if path == from {
                return Ok(to.clone());
            }
            if let Some(rest) = path.strip_prefix(from.as_str()) {
                if rest.starts_with('/') {
                    return Ok(format!("{}{}", to, rest));
                }
            }
        }
        Ok(path.to_string())
    }

    async fn clear_dir(&self, id: &SandboxId, path: &str) -> Result<()> {
        self.ensure_live(id).await?;
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(Error::environment("mock clear failure"));
        }
        let mut fs = self.fs.lock().await;
        if let Some(tree) = fs.get_mut(id) {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            tree.files.retain(|f, _| !f.starts_with(&prefix));
            tree.dirs.retain(|d| !d.starts_with(&prefix));
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

impl MockSandbox {
    /// Paths of all files currently stored in an environment.
    pub async fn files_in(&self, id: &SandboxId) -> Vec<String> {
        self.fs
            .lock()
            .await
            .get(id)
            .map(|t| t.files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Scripted collaborators for demos and tests.
//!
//! - `ScriptedSandbox`: in-memory files; the build fails while `src/lib.rs` is broken
//! - `ScriptedFixer`: fails N times, then proposes the fix
//! - `ScriptedSourceControl`: records pushes and returns fake PR URLs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::collaborators::{
    CommandOutput, FileChange, FixGenerator, FixRequest, Patch, PullRequest, Sandbox, SourceControl,
};
use super::steps::RemediationParams;
use crate::domain::{StepError, TaskKey};

const SOURCE_PATH: &str = "src/lib.rs";
const BROKEN_SOURCE: &str = "pub fn answer() -> u32 { todo!() }\n";
const FIXED_SOURCE: &str = "pub fn answer() -> u32 { 42 }\n";

/// Checkouts live only as long as this value. Nothing is persisted, so a
/// sandbox does not survive a process restart.
#[derive(Default)]
pub struct ScriptedSandbox {
    files: Mutex<HashMap<TaskKey, HashMap<String, String>>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn provision(&self, key: &TaskKey, _params: &RemediationParams) -> Result<(), StepError> {
        let mut files = self.files.lock().await;
        let checkout = HashMap::from([(SOURCE_PATH.to_string(), BROKEN_SOURCE.to_string())]);
        files.insert(key.clone(), checkout);
        Ok(())
    }

    async fn run(&self, key: &TaskKey, command: &str) -> Result<CommandOutput, StepError> {
        let files = self.files.lock().await;
        let checkout = files
            .get(key)
            .ok_or_else(|| StepError::new(format!("no sandbox provisioned for {key}")))?;
        if command == "true" {
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }
        let broken = checkout.get(SOURCE_PATH).map(String::as_str) != Some(FIXED_SOURCE);
        Ok(if broken {
            CommandOutput {
                exit_code: 101,
                stdout: "running 1 test\ntest answer_is_42 ... FAILED".to_string(),
                stderr: "thread 'answer_is_42' panicked at src/lib.rs:1:26:\nnot yet implemented"
                    .to_string(),
            }
        } else {
            CommandOutput {
                exit_code: 0,
                stdout: "running 1 test\ntest answer_is_42 ... ok".to_string(),
                stderr: String::new(),
            }
        })
    }

    async fn read_file(&self, key: &TaskKey, path: &str) -> Result<Option<String>, StepError> {
        let files = self.files.lock().await;
        Ok(files.get(key).and_then(|checkout| checkout.get(path).cloned()))
    }

    async fn write_file(&self, key: &TaskKey, path: &str, contents: &str) -> Result<(), StepError> {
        let mut files = self.files.lock().await;
        let checkout = files
            .get_mut(key)
            .ok_or_else(|| StepError::new(format!("no sandbox provisioned for {key}")))?;
        checkout.insert(path.to_string(), contents.to_string());
        Ok(())
    }
}

/// Fails the first `failures` calls with a transient error.
pub struct ScriptedFixer {
    failures: u32,
    calls: AtomicU32,
}

impl ScriptedFixer {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixGenerator for ScriptedFixer {
    async fn propose_fix(&self, request: &FixRequest) -> Result<Patch, StepError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(StepError::new(format!(
                "fix generation timed out (call {n} for {})",
                request.repository
            )));
        }
        Ok(Patch {
            summary: "Implement answer() instead of panicking".to_string(),
            changes: vec![FileChange {
                path: SOURCE_PATH.to_string(),
                contents: FIXED_SOURCE.to_string(),
            }],
        })
    }
}

#[derive(Default)]
pub struct ScriptedSourceControl {
    pushed: Mutex<Vec<String>>,
    opened: AtomicU32,
}

impl ScriptedSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Branches pushed so far, in order.
    pub async fn pushed(&self) -> Vec<String> {
        self.pushed.lock().await.clone()
    }
}

#[async_trait]
impl SourceControl for ScriptedSourceControl {
    async fn commit_and_push(
        &self,
        _key: &TaskKey,
        branch: &str,
        _message: &str,
    ) -> Result<String, StepError> {
        let mut pushed = self.pushed.lock().await;
        pushed.push(branch.to_string());
        Ok(format!("{:07x}", 0xc0ffee + pushed.len()))
    }

    async fn open_pull_request(&self, request: &PullRequest) -> Result<String, StepError> {
        let number = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!(
            "https://git.example.com/{}/pull/{number}",
            request.repository
        ))
    }
}

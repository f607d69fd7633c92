//! Scripted in-memory provisioner for orchestrator tests.
//!
//! The mock VM emulates the runner contract: a `node <runner> <fnId>
//! <payload>` command succeeds only when the runner and bundle files were
//! actually written, dispatches to Rust closures registered per function id,
//! prepends the closure object exactly like the runner does, and answers
//! with a single JSON reply line.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use exclave_runtime::{
    BUNDLE_PATH, BoxError, CommandOptions, CommandOutput, CreateOptions, RUNNER_PATH,
    SandboxProvider, SandboxVm, VmFile,
};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

pub type FnResult = Result<Value, String>;
pub type FnImpl = Arc<dyn Fn(&[Value], Option<&Map<String, Value>>) -> FnResult + Send + Sync>;

/// Function id the mock answers with deliberately mangled output.
pub const GARBAGE_FN: &str = "__garbage__";

type Registry = Arc<Mutex<HashMap<String, FnImpl>>>;

pub struct MockProvider {
    functions: Registry,
    vms: Mutex<Vec<Arc<MockVm>>>,
    attached: Mutex<HashMap<String, Arc<MockVm>>>,
    reattach: bool,
    created: AtomicUsize,
    create_delay: Option<Duration>,
}

impl MockProvider {
    /// Provider that reattaches to the surviving VM for a known key, the way
    /// real provisioners resolve session ids.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            functions: Arc::new(Mutex::new(HashMap::new())),
            vms: Mutex::new(Vec::new()),
            attached: Mutex::new(HashMap::new()),
            reattach: true,
            created: AtomicUsize::new(0),
            create_delay: None,
        })
    }

    /// Provider that always provisions a fresh VM, with an artificial
    /// creation latency, to expose first-use races.
    pub fn fresh_with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            functions: Arc::new(Mutex::new(HashMap::new())),
            vms: Mutex::new(Vec::new()),
            attached: Mutex::new(HashMap::new()),
            reattach: false,
            created: AtomicUsize::new(0),
            create_delay: Some(delay),
        })
    }

    pub fn register<F>(&self, fn_id: &str, f: F)
    where
        F: Fn(&[Value], Option<&Map<String, Value>>) -> FnResult + Send + Sync + 'static,
    {
        self.functions.lock().insert(fn_id.to_owned(), Arc::new(f));
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn vms(&self) -> Vec<Arc<MockVm>> {
        self.vms.lock().clone()
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    async fn create(
        &self,
        key: Option<&str>,
        _options: &CreateOptions,
    ) -> Result<Arc<dyn SandboxVm>, BoxError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        if self.reattach
            && let Some(key) = key
            && let Some(vm) = self.attached.lock().get(key).cloned()
            && !vm.stopped()
        {
            return Ok(vm);
        }

        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let vm = Arc::new(MockVm {
            id: format!("mock-vm-{id}"),
            functions: self.functions.clone(),
            files: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });
        self.vms.lock().push(vm.clone());
        if self.reattach && let Some(key) = key {
            self.attached.lock().insert(key.to_owned(), vm.clone());
        }
        Ok(vm)
    }
}

pub struct MockVm {
    id: String,
    functions: Registry,
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Paths of each `write_files` batch, in order.
    writes: Mutex<Vec<Vec<String>>>,
    /// `(program, args, sudo)` per command.
    commands: Mutex<Vec<(String, Vec<String>, bool)>>,
    stopped: AtomicBool,
}

impl MockVm {
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    pub fn write_batches(&self) -> Vec<Vec<String>> {
        self.writes.lock().clone()
    }

    pub fn commands(&self) -> Vec<(String, Vec<String>, bool)> {
        self.commands.lock().clone()
    }

    fn output(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    fn reply(value: Value) -> CommandOutput {
        Self::output(0, format!("{value}\n"), "")
    }

    fn error_reply(message: &str) -> CommandOutput {
        let stack = format!("Error: {message}\n    at sandbox (runner.mjs:1:1)");
        Self::output(
            1,
            format!("{}\n", json!({ "__error": message, "__stack": stack })),
            "",
        )
    }
}

#[async_trait]
impl SandboxVm for MockVm {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_files(&self, files: &[VmFile]) -> Result<(), BoxError> {
        if self.stopped() {
            return Err(std::io::Error::other(format!("{} is stopped", self.id)).into());
        }
        let mut store = self.files.lock();
        let mut batch = Vec::with_capacity(files.len());
        for file in files {
            store.insert(file.path.clone(), file.content.clone());
            batch.push(file.path.clone());
        }
        self.writes.lock().push(batch);
        Ok(())
    }

    async fn run_command(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> Result<CommandOutput, BoxError> {
        if self.stopped() {
            return Err(std::io::Error::other(format!("{} is stopped", self.id)).into());
        }
        self.commands
            .lock()
            .push((program.to_owned(), args.to_vec(), options.sudo));

        if program != "node" || args.first().map(String::as_str) != Some(RUNNER_PATH) {
            return Ok(Self::output(127, "", format!("unknown command: {program}")));
        }
        if !self.files.lock().contains_key(RUNNER_PATH) {
            return Ok(Self::output(127, "", "runner not installed"));
        }

        let Some(fn_id) = args.get(1) else {
            return Ok(Self::error_reply("usage: node runner.mjs <fnId> <payloadJson>"));
        };
        if fn_id == GARBAGE_FN {
            return Ok(Self::output(0, "mangled output 123", "stderr noise"));
        }
        if !self.files.lock().contains_key(BUNDLE_PATH) {
            return Ok(Self::error_reply(&format!(
                "Cannot find module '{BUNDLE_PATH}'"
            )));
        }

        let payload: Value = match args.get(2) {
            Some(raw) => match serde_json::from_str(raw) {
                Ok(value) => value,
                Err(err) => return Ok(Self::error_reply(&err.to_string())),
            },
            None => json!({ "args": [] }),
        };

        let function = self.functions.lock().get(fn_id.as_str()).cloned();
        let Some(function) = function else {
            let mut available: Vec<String> = self.functions.lock().keys().cloned().collect();
            available.sort();
            return Ok(Self::error_reply(&format!(
                "unknown sandbox function \"{fn_id}\"; available exports: {}",
                available.join(", ")
            )));
        };

        let call_args: Vec<Value> = payload
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let closure = payload.get("closureVars").and_then(Value::as_object);

        Ok(match function(&call_args, closure) {
            Ok(value) => Self::reply(json!({ "__result": value })),
            Err(message) => Self::error_reply(&message),
        })
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Publish a bundle + manifest directly into a build output, standing in
/// for the project bundler.
pub fn publish(out_dir: &std::path::Path, hash: &str, content: &str) {
    let publish_dir = out_dir.join(exclave_bundle::PUBLISH_DIR);
    std::fs::create_dir_all(&publish_dir).unwrap();
    let bundle_file = format!("bundle-{hash}.js");
    std::fs::write(publish_dir.join(&bundle_file), content).unwrap();
    exclave_bundle::Manifest {
        hash: hash.to_owned(),
        bundle_file,
        generated_at: chrono::Utc::now(),
        sandbox_files: vec![],
    }
    .write(&publish_dir)
    .unwrap();
}

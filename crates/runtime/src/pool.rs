//! Session pool and orchestrator.
//!
//! A [`Sandbox`] is the opaque definition the factory hands back: it owns
//! the mapping from session key to live VM, installs the runner and the
//! current bundle on first use and on bundle change, and serialises calls
//! through the runner's JSON protocol. Session bindings are owned
//! exclusively by the pool; no other component may stop a pooled VM.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use dashmap::DashMap;
use exclave_bundle::PublishedBundle;
use serde_json::Value;

use crate::context::{self, CallContext};
use crate::error::{Error, Result};
use crate::install;
use crate::protocol::{self, SandboxFnCall};
use crate::provider::{CommandOptions, CreateOptions, SandboxProvider, SandboxVm};
use crate::runner::RUNNER_PATH;
use crate::state::{FsInstallStateStore, InstallStateStore};

/// Options for one `run`: the caller-supplied session key plus the
/// privilege flag commands are issued with. `sudo` defaults to true.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub key: String,
    pub sudo: bool,
}

impl RunOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sudo: true,
        }
    }

    #[must_use]
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}

impl From<&str> for RunOptions {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RunOptions {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// Live binding between a session key and a VM. `key` is `None` for the
/// ephemeral VMs backing context-free calls.
pub(crate) struct Session {
    pub(crate) key: Option<String>,
    pub(crate) vm: Arc<dyn SandboxVm>,
    pub(crate) runner_installed: AtomicBool,
    pub(crate) installed_hash: parking_lot::Mutex<Option<String>>,
    pub(crate) install_lock: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(key: Option<String>, vm: Arc<dyn SandboxVm>) -> Self {
        Self {
            key,
            vm,
            runner_installed: AtomicBool::new(false),
            installed_hash: parking_lot::Mutex::new(None),
            install_lock: tokio::sync::Mutex::new(()),
        }
    }
}

/// Builder for a [`Sandbox`] definition.
pub struct SandboxBuilder {
    provider: Arc<dyn SandboxProvider>,
    out_dir: PathBuf,
    create: CreateOptions,
    dev: bool,
    store: Option<Arc<dyn InstallStateStore>>,
}

impl SandboxBuilder {
    pub fn new(provider: Arc<dyn SandboxProvider>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            out_dir: out_dir.into(),
            create: CreateOptions::default(),
            dev: false,
            store: None,
        }
    }

    /// Resource sizing and timeouts forwarded to the provisioner.
    #[must_use]
    pub fn create_options(mut self, create: CreateOptions) -> Self {
        self.create = create;
        self
    }

    /// In development the bundle is re-read on every call so hot-reload
    /// propagates; in production it is read once and cached.
    #[must_use]
    pub fn development(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Substitute the persistent install-state store (filesystem default).
    #[must_use]
    pub fn state_store(mut self, store: Arc<dyn InstallStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn build(self) -> Sandbox {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FsInstallStateStore::new(self.out_dir.clone())));
        Sandbox {
            inner: Arc::new(Inner {
                provider: self.provider,
                create: self.create,
                out_dir: self.out_dir,
                dev: self.dev,
                store,
                sessions: DashMap::new(),
                bundle_cache: parking_lot::Mutex::new(None),
            }),
        }
    }
}

/// A sandbox definition: pools VMs by session key and executes sandbox
/// functions in them.
#[derive(Clone)]
pub struct Sandbox {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn SandboxProvider>,
    create: CreateOptions,
    out_dir: PathBuf,
    dev: bool,
    store: Arc<dyn InstallStateStore>,
    sessions: DashMap<String, Arc<Session>>,
    bundle_cache: parking_lot::Mutex<Option<PublishedBundle>>,
}

impl Sandbox {
    pub fn builder(provider: Arc<dyn SandboxProvider>, out_dir: impl Into<PathBuf>) -> SandboxBuilder {
        SandboxBuilder::new(provider, out_dir)
    }

    /// Run `f` against the VM for `options.key`, provisioning it on first
    /// use. The call context is bound for the dynamic extent of `f`'s
    /// future, so sandbox functions called inside it land on the same VM.
    ///
    /// # Errors
    /// Fails on provisioning, bundle lookup, or install errors; `f`'s own
    /// output is returned as-is.
    pub async fn run<F, Fut, T>(&self, options: impl Into<RunOptions>, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let options = options.into();
        // Bundle lookup precedes provisioning: a missing bundle means the
        // build hook is absent, and no VM should be created for it.
        let bundle = self.current_bundle()?;
        let session = self.session(&options).await?;
        install::ensure_ready(&session, &bundle, self.inner.store.as_ref()).await?;
        let ctx = CallContext {
            session,
            sudo: options.sudo,
        };
        Ok(context::with_context(ctx, f()).await)
    }

    /// Run a single sandbox function under `options.key`.
    pub async fn run_fn(
        &self,
        options: impl Into<RunOptions>,
        call: SandboxFnCall,
    ) -> Result<Value> {
        self.run(options, || self.invoke(call)).await?
    }

    /// Orchestrator entry reached by generated stubs (`__runSandboxFn`).
    ///
    /// Inside an active `run` the call dispatches to the context VM with the
    /// context's privilege flag. Outside any context an ephemeral VM is
    /// provisioned for just this call and stopped again on every path.
    pub async fn invoke(&self, call: SandboxFnCall) -> Result<Value> {
        let bundle = self.current_bundle()?;

        if let Some(ctx) = context::current() {
            install::ensure_ready(&ctx.session, &bundle, self.inner.store.as_ref()).await?;
            return execute(&ctx.session, &call, ctx.sudo).await;
        }

        let vm = self
            .inner
            .provider
            .create(None, &self.inner.create)
            .await
            .map_err(Error::Provision)?;
        let session = Session::new(None, vm);
        let result = match install::ensure_ready(&session, &bundle, self.inner.store.as_ref()).await
        {
            Ok(()) => execute(&session, &call, true).await,
            Err(err) => Err(err),
        };
        if let Err(err) = session.vm.stop().await {
            tracing::warn!(vm = session.vm.id(), error = %err, "failed to stop ephemeral sandbox");
        }
        result
    }

    /// Stop and forget the VM for `key`. No-op for unknown keys.
    pub async fn stop(&self, key: &str) -> Result<()> {
        if let Some((_, session)) = self.inner.sessions.remove(key) {
            session.vm.stop().await.map_err(Error::Vm)?;
        }
        Ok(())
    }

    /// Stop every pooled VM.
    pub async fn stop_all(&self) -> Result<()> {
        let keys: Vec<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.stop(&key).await?;
        }
        Ok(())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.sessions.len()
    }

    async fn session(&self, options: &RunOptions) -> Result<Arc<Session>> {
        if let Some(existing) = self.inner.sessions.get(&options.key) {
            return Ok(existing.value().clone());
        }

        let vm = self
            .inner
            .provider
            .create(Some(&options.key), &self.inner.create)
            .await
            .map_err(Error::Provision)?;
        let session = Arc::new(Session::new(Some(options.key.clone()), vm));

        // Optimistic get-then-create: simultaneous first uses of one key may
        // provision a duplicate VM. The upsert below picks one canonical
        // binding and hands it to every racer; a loser stops its own VM,
        // which was never shared, before joining the winner's.
        let canonical = self
            .inner
            .sessions
            .entry(options.key.clone())
            .or_insert_with(|| session.clone())
            .clone();
        if !Arc::ptr_eq(&canonical, &session) && canonical.vm.id() != session.vm.id() {
            tracing::warn!(key = %options.key, vm = session.vm.id(), "stopping duplicate sandbox");
            if let Err(err) = session.vm.stop().await {
                tracing::warn!(vm = session.vm.id(), error = %err, "failed to stop duplicate sandbox");
            }
        }
        Ok(canonical)
    }

    fn current_bundle(&self) -> Result<PublishedBundle> {
        if self.inner.dev {
            return Ok(PublishedBundle::load(&self.inner.out_dir)?);
        }
        let mut cache = self.inner.bundle_cache.lock();
        if let Some(bundle) = cache.as_ref() {
            return Ok(bundle.clone());
        }
        let bundle = PublishedBundle::load(&self.inner.out_dir)?;
        *cache = Some(bundle.clone());
        Ok(bundle)
    }
}

async fn execute(session: &Session, call: &SandboxFnCall, sudo: bool) -> Result<Value> {
    let payload = protocol::payload_json(call)?;
    let args = vec![RUNNER_PATH.to_owned(), call.fn_id.clone(), payload];
    let options = CommandOptions {
        sudo,
        timeout: None,
    };
    tracing::debug!(vm = session.vm.id(), fn_id = %call.fn_id, "executing sandbox function");
    let output = session
        .vm
        .run_command("node", &args, &options)
        .await
        .map_err(Error::Vm)?;
    protocol::parse_reply(&output)
}

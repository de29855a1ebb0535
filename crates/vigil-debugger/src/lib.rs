//! Live breakpoints for running Rust programs.
//!
//! A [`Debugger`] owns a control plane thread that serves a JSON WebSocket
//! protocol for adding and removing breakpoints and that persists every hit.
//! Host code marks probe sites with [`probe!`]; when a client arms a site, the
//! probe captures its variables, evaluates the breakpoint's condition and
//! watch expressions in a side-effect-free [`Sandbox`] and queues the result
//! without blocking the calling thread.
//!
//! ```no_run
//! use vigil_debugger::{probe, Debugger, DebuggerOptions};
//!
//! # fn main() -> Result<(), vigil_debugger::DebuggerError> {
//! let debugger = Debugger::start(DebuggerOptions::new(".vigil").with_port(0))?;
//! for attempt in 0..3 {
//!     let backoff_ms = 100 * attempt;
//!     probe!(debugger, attempt, backoff_ms);
//! }
//! debugger.shutdown();
//! # Ok(())
//! # }
//! ```

mod control;
mod error;
pub mod hardening;
mod instrument;
mod pipeline;
pub mod protocol;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use vigil_config::{ServerConfig, VigilConfig};

pub use crate::error::{DebuggerError, ProtocolError};
pub use crate::instrument::{normalize_path, InstrumentError, Instrumenter, ProbeRegistry};
pub use crate::pipeline::FireOutcome;
pub use vigil_sandbox::{scope, Capture, Object, Sandbox, SandboxOptions, Scope, Value};
pub use vigil_store::{Breakpoint, BreakpointId, Hit, HitId, Store, StoreOptions};

use crate::control::ControlConfig;
use crate::pipeline::HitPipeline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerOptions {
    /// Directory holding the breakpoint database.
    pub store_dir: PathBuf,
    pub store: StoreOptions,
    pub host: String,
    /// `0` binds an ephemeral port; see [`Debugger::local_addr`].
    pub port: u16,
    pub password: Option<String>,
    pub sandbox: SandboxOptions,
    /// Probe sites declared before persisted breakpoints are re-armed. Only
    /// [`Debugger::start`] reads these; a custom instrumenter resolves its
    /// own locations.
    pub sites: Vec<(String, u32)>,
}

impl DebuggerOptions {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            store: StoreOptions::default(),
            host: "127.0.0.1".to_owned(),
            port: ServerConfig::DEFAULT_PORT,
            password: None,
            sandbox: SandboxOptions::default(),
            sites: Vec::new(),
        }
    }

    pub fn from_config(config: &VigilConfig) -> Self {
        Self {
            store_dir: config.store.resolved_dir(),
            store: StoreOptions {
                busy_timeout: Duration::from_millis(config.store.busy_timeout_ms),
                max_busy_retries: config.store.max_busy_retries,
            },
            host: config.server.host.clone(),
            port: config.server.port,
            password: config.server.password.clone(),
            sandbox: SandboxOptions {
                max_steps: u64::try_from(config.sandbox.max_steps).unwrap_or(u64::MAX),
                max_collection_len: config.sandbox.max_collection_len,
            },
            sites: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_site(mut self, file: impl Into<String>, line: u32) -> Self {
        self.sites.push((file.into(), line));
        self
    }
}

/// Handle to a running debugger. Clones share the same control plane.
#[derive(Debug, Clone)]
pub struct Debugger {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Arc<ProbeRegistry>,
    pipeline: HitPipeline,
    local_addr: SocketAddr,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl Debugger {
    /// Starts the control plane with probe sites resolved through a
    /// [`ProbeRegistry`]. Returns once the server is listening.
    pub fn start(options: DebuggerOptions) -> Result<Self, DebuggerError> {
        let registry = Arc::new(ProbeRegistry::new());
        for (file, line) in &options.sites {
            registry.declare_site(file, *line);
        }
        let instrumenter: Arc<dyn Instrumenter> = Arc::clone(&registry) as Arc<dyn Instrumenter>;
        Self::launch(options, registry, instrumenter)
    }

    /// Starts the control plane with a host-provided instrumenter. The host
    /// then calls [`Debugger::fire`] itself; [`probe!`] sites stay inert and
    /// [`DebuggerOptions::sites`] is not used.
    pub fn start_with_instrumenter(
        options: DebuggerOptions,
        instrumenter: Arc<dyn Instrumenter>,
    ) -> Result<Self, DebuggerError> {
        Self::launch(options, Arc::new(ProbeRegistry::new()), instrumenter)
    }

    fn launch(
        options: DebuggerOptions,
        registry: Arc<ProbeRegistry>,
        instrumenter: Arc<dyn Instrumenter>,
    ) -> Result<Self, DebuggerError> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let db_path = options.store_dir.join(vigil_store::DB_FILE_NAME);
        let (thread, local_addr) = control::spawn(
            ControlConfig {
                store_dir: options.store_dir,
                store_options: options.store,
                host: options.host,
                port: options.port,
                password: options.password,
            },
            instrumenter,
            queue_rx,
        )?;
        let sandbox = Arc::new(Sandbox::with_options(options.sandbox));

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                pipeline: HitPipeline::new(db_path, options.store, sandbox, queue_tx),
                local_addr,
                control: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Probe site entry point; see [`probe!`]. `capture` runs only when a
    /// breakpoint is armed at `file:line`, once for all of them.
    pub fn probe<F>(&self, file: &str, line: u32, capture: F)
    where
        F: FnOnce() -> Scope,
    {
        let Some(ids) = self.inner.registry.armed(file, line) else {
            return;
        };
        let scope = capture();
        for id in ids {
            self.inner.pipeline.fire(id, &scope);
        }
    }

    /// Runs the hit pipeline for one breakpoint on the calling thread.
    pub fn fire(&self, id: BreakpointId, scope: &Scope) -> FireOutcome {
        self.inner.pipeline.fire(id, scope)
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.inner.registry
    }

    pub fn sandbox(&self) -> &Sandbox {
        self.inner.pipeline.sandbox()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Stops the control plane after everything queued so far is written,
    /// and waits for its thread. Later calls do nothing.
    pub fn shutdown(&self) {
        self.inner.stop();
    }
}

impl Inner {
    fn stop(&self) {
        let Some(thread) = self.control.lock().take() else {
            return;
        };
        if !self.pipeline.shutdown() {
            tracing::warn!(target: "vigil.control", "control plane already stopped");
        }
        if thread.join().is_err() {
            tracing::error!(target: "vigil.control", "control plane thread panicked");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop();
    }
}

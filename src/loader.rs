//! Face classifier lifecycle.
//!
//! `Unloaded -> Fetching -> Loading -> Ready`, or `Failed` from either of
//! the middle states. A cache hit goes straight from `Unloaded` to
//! `Loading`. The loader is the only writer of the shared state; frame
//! detectors read it through a [`ClassifierSlot`].

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::detection::cascade::HaarCascade;
use crate::error::LoaderError;
use crate::pipeline::StatusSink;

const TRANSFER_BUFFER_SIZE: usize = 4096;

pub const STATUS_LOADING: &str = "Loading face classifier...";
pub const STATUS_LOADED: &str = "Classifier loaded. Faces: 0";
pub const STATUS_FAILED: &str = "Failed to load face classifier";

#[derive(Debug, Clone)]
pub enum ClassifierState {
    Unloaded,
    Fetching,
    Loading,
    Ready(Arc<HaarCascade>),
    /// Terminal for the session; holds the rendered error.
    Failed(String),
}

/// Payload-free view of [`ClassifierState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderPhase {
    Unloaded,
    Fetching,
    Loading,
    Ready,
    Failed,
}

impl ClassifierState {
    pub fn phase(&self) -> LoaderPhase {
        match self {
            ClassifierState::Unloaded => LoaderPhase::Unloaded,
            ClassifierState::Fetching => LoaderPhase::Fetching,
            ClassifierState::Loading => LoaderPhase::Loading,
            ClassifierState::Ready(_) => LoaderPhase::Ready,
            ClassifierState::Failed(_) => LoaderPhase::Failed,
        }
    }

    /// `Ready` or `Failed`.
    pub fn is_settled(&self) -> bool {
        matches!(self, ClassifierState::Ready(_) | ClassifierState::Failed(_))
    }
}

/// Read side of the classifier handoff.
#[derive(Debug, Clone)]
pub struct ClassifierSlot {
    rx: watch::Receiver<ClassifierState>,
}

impl ClassifierSlot {
    pub fn state(&self) -> ClassifierState {
        self.rx.borrow().clone()
    }

    pub fn phase(&self) -> LoaderPhase {
        self.rx.borrow().phase()
    }

    /// The classifier, once it is ready.
    pub fn handle(&self) -> Option<Arc<HaarCascade>> {
        match &*self.rx.borrow() {
            ClassifierState::Ready(cascade) => Some(Arc::clone(cascade)),
            _ => None,
        }
    }

    /// Wait until the loader reaches `Ready` or `Failed`. If the loader goes
    /// away first, returns whatever state it left behind.
    pub async fn wait_settled(&mut self) -> ClassifierState {
        let settled = self
            .rx
            .wait_for(ClassifierState::is_settled)
            .await
            .map(|state| state.clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }
}

/// Fetches the cascade into the local cache if needed and loads it.
pub struct ClassifierLoader {
    config: LoaderConfig,
    state: watch::Sender<ClassifierState>,
    status: Option<Arc<dyn StatusSink>>,
    transitions: Vec<LoaderPhase>,
}

impl ClassifierLoader {
    pub fn new(config: LoaderConfig) -> Self {
        let (state, _) = watch::channel(ClassifierState::Unloaded);
        Self {
            config,
            state,
            status: None,
            transitions: vec![LoaderPhase::Unloaded],
        }
    }

    /// Report progress to the presentation context.
    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn slot(&self) -> ClassifierSlot {
        ClassifierSlot {
            rx: self.state.subscribe(),
        }
    }

    /// Every phase entered so far, starting with `Unloaded`.
    pub fn transitions(&self) -> &[LoaderPhase] {
        &self.transitions
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Obtain the classifier. Returns the existing handle when already
    /// ready; after a failure, a new call starts over.
    pub fn acquire(&mut self) -> Result<Arc<HaarCascade>, LoaderError> {
        let ready = match &*self.state.borrow() {
            ClassifierState::Ready(cascade) => Some(Arc::clone(cascade)),
            _ => None,
        };
        if let Some(cascade) = ready {
            return Ok(cascade);
        }

        self.report(STATUS_LOADING);
        match self.fetch_and_load() {
            Ok(cascade) => {
                let cascade = Arc::new(cascade);
                info!(
                    "Face classifier ready ({} stages, {}x{} window)",
                    cascade.stage_count(),
                    cascade.window().0,
                    cascade.window().1
                );
                self.transition(ClassifierState::Ready(Arc::clone(&cascade)));
                self.report(STATUS_LOADED);
                Ok(cascade)
            }
            Err(e) => {
                error!("Could not load face classifier: {}", e);
                self.transition(ClassifierState::Failed(e.to_string()));
                self.report(STATUS_FAILED);
                Err(e)
            }
        }
    }

    /// Run [`acquire`](Self::acquire) on a dedicated thread.
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<Result<Arc<HaarCascade>, LoaderError>>> {
        std::thread::Builder::new()
            .name("classifier-loader".to_string())
            .spawn(move || self.acquire())
    }

    fn fetch_and_load(&mut self) -> Result<HaarCascade, LoaderError> {
        let path = self.config.artifact_path();

        let cached = path.is_file();
        if cached {
            debug!("Using cached classifier {:?}", path);
        } else {
            self.transition(ClassifierState::Fetching);
            fetch_to_cache(&self.config, &path)?;
        }

        self.transition(ClassifierState::Loading);
        let loaded = HaarCascade::from_file(&path);

        if cached && matches!(loaded, Err(LoaderError::Parse(_) | LoaderError::EmptyClassifier)) {
            // Drop the bad copy so the next acquire fetches a fresh one.
            warn!("Discarding unusable cached classifier {:?}", path);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove {:?}: {}", path, e);
            }
        }

        loaded
    }

    fn transition(&mut self, next: ClassifierState) {
        let phase = next.phase();
        info!("Classifier state: {:?} -> {:?}", self.state.borrow().phase(), phase);
        self.transitions.push(phase);
        self.state.send_replace(next);
    }

    fn report(&self, text: &str) {
        if let Some(status) = &self.status {
            status.set_status(text.to_string());
        }
    }
}

fn fetch_error(url: &str, reason: impl Into<String>) -> LoaderError {
    LoaderError::Fetch {
        url: url.to_string(),
        reason: reason.into(),
    }
}

/// Download the artifact into a temporary file beside `dest`, then rename
/// it into place so a partial download is never visible under `dest`.
fn fetch_to_cache(config: &LoaderConfig, dest: &Path) -> Result<(), LoaderError> {
    let url = config.url.as_str();
    info!("Fetching classifier from {}", url);

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(config.connect_timeout())
        .timeout_read(config.read_timeout())
        .build();

    let response = agent.get(url).call().map_err(|e| match e {
        ureq::Error::Status(code, _) => fetch_error(url, format!("HTTP status {}", code)),
        ureq::Error::Transport(t) => fetch_error(url, t.to_string()),
    })?;
    if response.status() != 200 {
        return Err(fetch_error(url, format!("HTTP status {}", response.status())));
    }

    let dir = dest.parent().unwrap_or(config.cache_dir.as_path());
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;

    let mut reader = response.into_reader();
    let mut buffer = [0u8; TRANSFER_BUFFER_SIZE];
    let mut written = 0usize;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(fetch_error(url, e.to_string())),
        };
        tmp.write_all(&buffer[..n])?;
        written += n;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| LoaderError::Io(e.error))?;

    debug!("Stored {} bytes at {:?}", written, dest);
    Ok(())
}

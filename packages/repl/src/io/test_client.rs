//! Scripted backend client for testing the session without a server.
//!
//! Evaluations are answered from a per-code script; every call the session
//! makes is recorded for later inspection.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use trench_client::{Client, Error, Fragment, Fragments, Host};

/// One scripted step of an evaluation's output.
#[derive(Debug, Clone)]
pub enum Scripted {
    Fragment(Fragment),
    /// Output the client cannot interpret.
    Fault(String),
    /// Ask the host for a line and echo it back as a value.
    AskInput,
}

#[derive(Default)]
struct State {
    scripts: Mutex<HashMap<String, Vec<Scripted>>>,
    evaluated: Mutex<Vec<String>>,
    loaded: Mutex<Vec<PathBuf>>,
    capabilities: Mutex<Vec<String>>,
    label: Mutex<Option<String>>,
    host: Mutex<Option<Arc<dyn Host>>>,
    interrupts: AtomicUsize,
    closes: AtomicUsize,
}

/// Test client with in-memory scripts. Clones share state.
#[derive(Clone, Default)]
pub struct TestClient {
    state: Arc<State>,
}

impl TestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the host the session handed over on connect.
    pub fn attach(&self, host: Arc<dyn Host>) {
        *self.state.host.lock().unwrap() = Some(host);
    }

    pub fn host(&self) -> Arc<dyn Host> {
        self.state.host.lock().unwrap().clone().expect("not attached")
    }

    /// Script the output for evaluating `code`.
    pub fn script(&self, code: &str, steps: Vec<Scripted>) -> &Self {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(code.to_string(), steps);
        self
    }

    pub fn with_capability(self, name: &str) -> Self {
        self.state.capabilities.lock().unwrap().push(name.to_string());
        self
    }

    pub fn set_label(&self, label: &str) {
        *self.state.label.lock().unwrap() = Some(label.to_string());
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.state.evaluated.lock().unwrap().clone()
    }

    pub fn loaded(&self) -> Vec<PathBuf> {
        self.state.loaded.lock().unwrap().clone()
    }

    pub fn interrupts(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    fn play(&self, key: &str) -> Fragments {
        let steps = self
            .state
            .scripts
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default();
        let host = self.state.host.lock().unwrap().clone();
        Box::new(steps.into_iter().map(move |step| match step {
            Scripted::Fragment(fragment) => Ok(fragment),
            Scripted::Fault(message) => Err(Error::unexpected(message)),
            Scripted::AskInput => {
                let line = host.as_ref().and_then(|h| h.request_line());
                Ok(Fragment::Value(line.unwrap_or_else(|| "nil".to_string())))
            }
        }))
    }
}

impl Client for TestClient {
    fn evaluate(&self, code: &str) -> Result<Fragments, Error> {
        self.state.evaluated.lock().unwrap().push(code.to_string());
        Ok(self.play(code))
    }

    fn load_file(&self, path: &Path) -> Result<Fragments, Error> {
        self.state.loaded.lock().unwrap().push(path.to_path_buf());
        Ok(self.play(&path.to_string_lossy()))
    }

    fn context_label(&self) -> String {
        self.state
            .label
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "user".to_string())
    }

    fn interrupt(&self) {
        self.state.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn supports(&self, capability: &str) -> bool {
        self.state
            .capabilities
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == capability)
    }

    fn close(&self) -> Result<(), Error> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory output sink that can be inspected while the session holds it.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

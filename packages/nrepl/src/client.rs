//! nREPL client over TCP.
//!
//! One socket-reader thread decodes responses and routes them by message id:
//! evaluation responses become [`Fragment`]s on a per-request channel, other
//! requests get their raw responses. Anything that arrives without a
//! matching request goes to the [`Host`].

use std::collections::{BTreeSet, HashMap};
use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};
use trench_client::{Client, Error, Fragment, Fragments, Host};

use crate::codec;
use crate::message::{Request, Response, NEED_INPUT, UNKNOWN_OP};

/// Namespace assumed until the server reports one.
const DEFAULT_NS: &str = "user";

/// Where responses for one request id are delivered.
enum Route {
    /// Raw responses, for requests the client handles itself.
    Raw(Sender<Response>),
    /// Evaluation output.
    Eval(Sender<Result<Fragment, Error>>),
}

struct Inner {
    writer: Mutex<TcpStream>,
    host: Arc<dyn Host>,
    routes: Mutex<HashMap<String, Route>>,
    next_id: AtomicU64,
    session: Mutex<Option<String>>,
    ns: Mutex<String>,
    last_eval: Mutex<Option<String>>,
    closed: AtomicBool,
    /// Set by the reader thread once the socket is gone; guarded by `routes`.
    disconnected: AtomicBool,
}

/// A connection to an nREPL server holding one cloned session.
pub struct NreplClient {
    inner: Arc<Inner>,
    ops: BTreeSet<String>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl NreplClient {
    /// Connect, clone a fresh session and ask the server which ops it
    /// supports.
    pub fn connect(addr: impl ToSocketAddrs, host: Arc<dyn Host>) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)?;
        let peer = stream.peer_addr().ok();
        let read_half = stream.try_clone()?;

        let inner = Arc::new(Inner {
            writer: Mutex::new(stream),
            host,
            routes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            session: Mutex::new(None),
            ns: Mutex::new(DEFAULT_NS.to_string()),
            last_eval: Mutex::new(None),
            closed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        });

        let reader = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("nrepl-reader".into())
                .spawn(move || inner.read_loop(BufReader::new(read_half)))?
        };

        let mut client = Self {
            inner,
            ops: BTreeSet::new(),
            reader: Mutex::new(Some(reader)),
        };

        let cloned = client.roundtrip(Request::new("clone"))?;
        let session = cloned
            .into_iter()
            .find_map(|msg| msg.new_session)
            .ok_or_else(|| Error::unexpected("clone response carried no new-session"))?;
        *lock(&client.inner.session) = Some(session.clone());

        let described = client.roundtrip(Request::new("describe"))?;
        client.ops = described
            .into_iter()
            .flat_map(|msg| msg.ops.into_keys())
            .collect();

        debug!(?peer, %session, ops = client.ops.len(), "nREPL session established");
        Ok(client)
    }

    /// Ops advertised by the server's `describe` response.
    pub fn ops(&self) -> &BTreeSet<String> {
        &self.ops
    }

    /// Send a request and collect every response up to `done`.
    fn roundtrip(&self, request: Request) -> Result<Vec<Response>, Error> {
        let (tx, rx) = mpsc::channel();
        self.inner.send(request, Route::Raw(tx))?;
        collect_until_done(rx)
    }

    fn start_eval(&self, request: Request) -> Result<Fragments, Error> {
        let (tx, rx) = mpsc::channel();
        let id = self.inner.send(request, Route::Eval(tx))?;
        *lock(&self.inner.last_eval) = Some(id);
        Ok(Box::new(rx.into_iter()))
    }
}

impl Client for NreplClient {
    fn evaluate(&self, code: &str) -> Result<Fragments, Error> {
        let ns = lock(&self.inner.ns).clone();
        self.start_eval(Request {
            code: Some(code.to_string()),
            ns: Some(ns),
            ..Request::new("eval")
        })
    }

    fn load_file(&self, path: &Path) -> Result<Fragments, Error> {
        let contents = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.start_eval(Request {
            file: Some(contents),
            file_path: Some(path.to_string_lossy().into_owned()),
            file_name: Some(name),
            ..Request::new("load-file")
        })
    }

    fn context_label(&self) -> String {
        lock(&self.inner.ns).clone()
    }

    fn interrupt(&self) {
        let Some(target) = lock(&self.inner.last_eval).clone() else {
            return;
        };
        // The interrupt's own response is not interesting; route it nowhere.
        let (tx, _rx) = mpsc::channel();
        let request = Request {
            interrupt_id: Some(target.clone()),
            ..Request::new("interrupt")
        };
        match self.inner.send(request, Route::Raw(tx)) {
            Ok(id) => debug!(%id, interrupt_id = %target, "sent interrupt"),
            Err(e) => warn!("failed to send interrupt: {e}"),
        }
    }

    fn supports(&self, capability: &str) -> bool {
        self.ops.contains(capability)
    }

    fn close(&self) -> Result<(), Error> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (tx, _rx) = mpsc::channel();
        if let Err(e) = self.inner.send(Request::new("close"), Route::Raw(tx)) {
            debug!("close request not delivered: {e}");
        }
        // Unblocks the reader thread; errors only mean the socket is gone.
        let _ = lock(&self.inner.writer).shutdown(Shutdown::Both);
        if let Some(handle) = lock(&self.reader).take() {
            let _ = handle.join();
        }
        debug!("nREPL connection closed");
        Ok(())
    }
}

impl Drop for NreplClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Inner {
    /// Register a route, then write the request. Returns the request id.
    fn send(&self, mut request: Request, route: Route) -> Result<String, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        request.id = id.clone();
        request.session = lock(&self.session).clone();
        let bytes = codec::encode(&request)?;

        {
            let mut routes = lock(&self.routes);
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            routes.insert(id.clone(), route);
        }
        trace!(%id, op = %request.op, "sending request");

        let written = {
            let mut writer = lock(&self.writer);
            writer.write_all(&bytes).and_then(|()| writer.flush())
        };
        if let Err(e) = written {
            lock(&self.routes).remove(&id);
            return Err(e.into());
        }
        Ok(id)
    }

    fn read_loop(self: Arc<Self>, mut reader: BufReader<TcpStream>) {
        let failure = loop {
            match codec::decode::<Response, _>(&mut reader) {
                Ok(Some(msg)) => self.dispatch(msg),
                Ok(None) => break Error::Closed,
                Err(e) => break e.into(),
            }
        };

        let closing = self.closed.load(Ordering::SeqCst);
        let routes: Vec<Route> = {
            let mut routes = lock(&self.routes);
            self.disconnected.store(true, Ordering::SeqCst);
            routes.drain().map(|(_, r)| r).collect()
        };
        for route in routes {
            if let Route::Eval(tx) = route {
                let _ = tx.send(Err(match &failure {
                    Error::Closed => Error::Closed,
                    other => Error::protocol(other.to_string()),
                }));
            }
        }

        if closing {
            trace!("reader thread exiting after close");
        } else {
            warn!("nREPL connection lost: {failure}");
            self.host
                .report_error(&format!("connection to nREPL server lost: {failure}\n"), true);
        }
    }

    fn dispatch(self: &Arc<Self>, msg: Response) {
        if let Some(ns) = &msg.ns {
            *lock(&self.ns) = ns.clone();
        }

        let Some(id) = msg.id.clone() else {
            self.unsolicited(&msg);
            return;
        };
        let done = msg.is_done();

        let mut routes = lock(&self.routes);
        let delivered = match routes.get(&id) {
            Some(Route::Raw(tx)) => {
                let _ = tx.send(msg.clone());
                true
            }
            Some(Route::Eval(tx)) => {
                for fragment in fragments_of(&msg) {
                    let _ = tx.send(fragment);
                }
                true
            }
            None => false,
        };
        if done {
            routes.remove(&id);
            let mut last = lock(&self.last_eval);
            if last.as_deref() == Some(id.as_str()) {
                *last = None;
            }
        }
        drop(routes);

        if !delivered {
            self.unsolicited(&msg);
        }
        if msg.has_status(NEED_INPUT) {
            self.serve_input();
        }
    }

    fn unsolicited(&self, msg: &Response) {
        if let Some(out) = &msg.out {
            self.host.push_output(out);
        } else if let Some(err) = &msg.err {
            self.host.report_error(err, false);
        } else {
            trace!(?msg, "ignoring unrouted response");
        }
    }

    /// Answer a `need-input` status off the reader thread, so responses keep
    /// flowing while the user types.
    fn serve_input(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("nrepl-stdin".into())
            .spawn(move || {
                // An empty stdin is end of input for the server's reader.
                let stdin = match inner.host.request_line() {
                    Some(line) => format!("{line}\n"),
                    None => {
                        debug!("no input for the server, sending end of input");
                        String::new()
                    }
                };
                let (tx, _rx) = mpsc::channel();
                let request = Request {
                    stdin: Some(stdin),
                    ..Request::new("stdin")
                };
                if let Err(e) = inner.send(request, Route::Raw(tx)) {
                    warn!("failed to send stdin: {e}");
                }
            });
        if let Err(e) = spawned {
            warn!("failed to spawn input thread: {e}");
        }
    }
}

/// Translate one evaluation response into fragments.
fn fragments_of(msg: &Response) -> Vec<Result<Fragment, Error>> {
    let mut fragments = Vec::new();
    if let Some(out) = &msg.out {
        fragments.push(Ok(Fragment::Out(out.clone())));
    }
    if let Some(err) = &msg.err {
        fragments.push(Ok(Fragment::Error(err.clone())));
    }
    if let Some(value) = &msg.value {
        fragments.push(Ok(Fragment::Value(value.clone())));
    }
    if msg.has_status(UNKNOWN_OP) {
        fragments.push(Err(Error::unexpected("server does not support the requested op")));
    }
    fragments
}

fn collect_until_done(rx: Receiver<Response>) -> Result<Vec<Response>, Error> {
    let mut responses = Vec::new();
    for msg in rx {
        let done = msg.is_done();
        responses.push(msg);
        if done {
            return Ok(responses);
        }
    }
    Err(Error::Closed)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

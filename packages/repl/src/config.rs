//! Resolution of command-line options into what to connect to and what to do.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

use crate::host::ColorMode;

/// Port file looked up when none is given.
pub const DEFAULT_PORT_FILE: &str = ".nrepl-port";

pub const DEFAULT_HOST: &str = "127.0.0.1";

const SCHEME: &str = "nrepl";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("port must be specified with -p or -s")]
    PortRequired,

    #[error("could not read port file: {}", .0.display())]
    UnreadablePortFile(PathBuf),

    #[error("bad url specified to -s option: {0}")]
    BadServerUrl(String),

    #[error("unsupported protocol {0}, only nrepl is supported")]
    UnsupportedProtocol(String),
}

/// Where the server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What to do once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Interactive,
    Eval(String),
    Load(PathBuf),
    /// Require a namespace and call its `-main`.
    Main(String),
}

impl Mode {
    /// One-shot modes run a single request and exit without prompting.
    pub fn is_one_shot(&self) -> bool {
        !matches!(self, Mode::Interactive)
    }
}

/// Raw option values, before resolution.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub port_file: Option<PathBuf>,
    pub server: Option<String>,
    pub eval: Option<String>,
    pub file: Option<PathBuf>,
    pub main_ns: Option<String>,
    pub color: ColorMode,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: Target,
    pub mode: Mode,
    pub color: ColorMode,
}

impl Config {
    /// Nil results are noise when running a single request.
    pub fn hides_nil(&self) -> bool {
        self.mode.is_one_shot()
    }
}

impl Options {
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let target = self.target()?;
        let mode = self.mode();
        debug!(%target, ?mode, "resolved configuration");
        Ok(Config {
            target,
            mode,
            color: self.color,
        })
    }

    fn target(&self) -> Result<Target, ConfigError> {
        let (mut host, mut port) = match &self.server {
            Some(server) => parse_server(server)?,
            None => (None, None),
        };
        if host.is_none() {
            host = self.host.clone();
        }
        if port.is_none() {
            port = self.port;
        }
        let port = match port {
            Some(port) => port,
            None => read_port_file(self.port_file.as_deref())?,
        };

        Ok(Target {
            host: host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
        })
    }

    /// A file wins over a namespace, which wins over an expression.
    fn mode(&self) -> Mode {
        let non_blank = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(file) = &self.file {
            if !file.as_os_str().is_empty() {
                return Mode::Load(file.clone());
            }
        }
        if let Some(ns) = non_blank(&self.main_ns) {
            return Mode::Main(ns);
        }
        if let Some(code) = non_blank(&self.eval) {
            return Mode::Eval(code);
        }
        Mode::Interactive
    }
}

/// The form that runs `ns/-main`.
pub fn main_form(ns: &str) -> String {
    format!("(do (require '{ns}) ({ns}/-main))")
}

/// Parse `nrepl://host[:port]`; the scheme may be left out.
fn parse_server(server: &str) -> Result<(Option<String>, Option<u16>), ConfigError> {
    let bad = || ConfigError::BadServerUrl(server.to_string());
    let url = if server.contains("://") {
        Url::parse(server)
    } else {
        Url::parse(&format!("{SCHEME}://{server}"))
    }
    .map_err(|_| bad())?;

    if url.scheme() != SCHEME {
        return Err(ConfigError::UnsupportedProtocol(url.scheme().to_string()));
    }
    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(bad)?;
    Ok((Some(host.to_string()), url.port()))
}

fn read_port_file(explicit: Option<&Path>) -> Result<u16, ConfigError> {
    let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_PORT_FILE));
    let unreadable = || ConfigError::UnreadablePortFile(path.to_path_buf());

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if explicit.is_none() && e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::PortRequired);
        }
        Err(e) => {
            debug!(path = %path.display(), "port file unreadable: {e}");
            return Err(unreadable());
        }
    };
    content.trim().parse().map_err(|_| unreadable())
}

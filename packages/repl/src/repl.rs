//! Process-level entry point: connect, run the chosen mode, clean up.

use std::io;

use tracing::{debug, info};
use trench_nrepl::NreplClient;

use crate::config::{main_form, Config, Mode};
use crate::core::Session;
use crate::error::Error;
use crate::host::Printer;
use crate::interrupt;

/// Connect to the configured server over the process's standard streams and
/// run until the mode is done.
pub fn run(config: Config) -> Result<(), Error> {
    let target = config.target.clone();
    info!(%target, "connecting");

    let session = Session::builder(io::BufReader::new(io::stdin()))
        .printer(Printer::new(config.color.enabled()))
        .hides_nil(config.hides_nil())
        .connect(|host| NreplClient::connect((target.host.as_str(), target.port), host))?;

    let result = drive(&session, config.mode);
    let closed = session.close();
    result?;
    closed?;
    Ok(())
}

fn drive(session: &Session, mode: Mode) -> Result<(), Error> {
    match mode {
        Mode::Load(path) => session.load_file(&path)?,
        Mode::Main(ns) => session.eval(&main_form(&ns))?,
        Mode::Eval(code) => session.eval(&code)?,
        Mode::Interactive => {
            if session.supports_interrupt() {
                interrupt::install(session.interrupt_handle())?;
            } else {
                debug!("backend cannot interrupt, leaving Ctrl+C alone");
            }
            session.run()?;
        }
    }
    Ok(())
}

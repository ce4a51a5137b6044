//! # trench-nrepl
//!
//! A [`trench_client::Client`] that speaks nREPL over TCP.
//!
//! The client clones one server session on connect and sends every request
//! in it, so namespace changes made by one evaluation are visible to the
//! next. Evaluation output is streamed back as it arrives rather than
//! collected.
//!
//! ```no_run
//! use std::sync::Arc;
//! use trench_client::Client;
//! use trench_nrepl::NreplClient;
//! # fn host() -> Arc<dyn trench_client::Host> { unimplemented!() }
//!
//! let client = NreplClient::connect(("127.0.0.1", 7888), host())?;
//! for fragment in client.evaluate("(+ 1 2)")? {
//!     println!("{:?}", fragment?);
//! }
//! client.close()?;
//! # Ok::<(), trench_client::Error>(())
//! ```

mod client;
pub mod codec;
pub mod message;

pub use client::NreplClient;

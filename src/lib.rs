//! Cross-platform child process spawning and I/O redirection, with
//! graceful-then-forceful termination.
//!
//! [`Process`] is the entry point: construct one with [`Process::new`],
//! start it with [`Process::start`], then read/write its redirected
//! streams and wait or stop it. See each module for the platform-specific
//! primitives underneath the façade.

pub mod error;
pub mod handle;
pub mod pipe;
pub mod process;
pub mod redirect;
pub mod spawn;
pub mod stop;

pub use error::{Error, Result};
pub use process::{Options, Process, Selector};
pub use redirect::Mode;
pub use stop::{Action, ExitStatus, StopAction};

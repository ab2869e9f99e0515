//! Controller-side transport for the GameLink emulator protocol.
//!
//! An emulator (the *host*) publishes one fixed-size shared-memory record and
//! a companion named lock. This crate opens them from another process (the
//! *controller*) and speaks the protocol: it reads frames, peeks and RAM,
//! and writes commands, bulk SDHR batches, input and audio settings.
//!
//! # Features
//!
//! - **Protocol revision 4**: byte-exact packed layout, checked at compile time
//! - **Bounded waits**: every lock acquisition times out; nothing blocks forever
//! - **Portable backends**: Windows named objects, `/dev/shm` files on unix,
//!   and an in-process host for tests
//! - **Frame streams**: a tokio monitor publishing snapshots at a chosen rate
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gamelink::GameLink;
//!
//! fn main() -> gamelink::Result<()> {
//!     let mut link = GameLink::connect()?;
//!     let info = link.frame_info();
//!     println!("{}x{} frame #{}", info.width, info.height, info.seq);
//!     link.send_keystroke(4, true)?;
//!     link.send_keystroke(4, false)?;
//!     link.pause()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Example (frame stream)
//!
//! ```rust,no_run
//! use gamelink::{GameLink, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> gamelink::Result<()> {
//!     let (_link, monitor) = GameLink::monitor(GameLink::connect()?)?;
//!     let mut frames = Box::pin(monitor.frames(UpdateRate::Max(30)));
//!
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {} ({} bytes)", frame.info.seq, frame.pixels.len());
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod config;
mod error;
pub mod layout;
pub mod region;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Protocol channels
pub mod bulk;
pub mod command;
pub mod guard;
pub mod input;
pub mod telemetry;

// Connection and streaming
pub mod backend;
pub mod connection;
pub mod monitor;
pub mod stream;

// Core exports
pub use config::*;
pub use error::*;
pub use types::*;

// Main API exports
pub use backend::{LinkBackend, LockWait, PlatformBackend};
pub use command::Command;
pub use connection::Connection;
pub use input::KeyboardBitmap;
pub use monitor::{FrameMonitor, UpdateRate};
pub use telemetry::{FrameInfo, FrameSnapshot, LinkIdentity, RamWindow};

use std::sync::{Arc, Mutex};

/// Unified entry point for GameLink connections.
///
/// # Examples
///
/// ```rust,no_run
/// use gamelink::{GameLink, LinkConfig};
///
/// # fn main() -> gamelink::Result<()> {
/// let config = LinkConfig::load("gamelink.yaml")?;
/// let link = GameLink::connect_with(config)?;
/// assert!(link.is_active());
/// # Ok(())
/// # }
/// ```
pub struct GameLink;

impl GameLink {
    /// Connect to a running host with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The host is not running (no shared-memory object)
    /// - The companion lock is missing
    /// - The host speaks another protocol version
    pub fn connect() -> Result<Connection> {
        Self::connect_with(LinkConfig::default())
    }

    /// Connect to a running host with `config`.
    pub fn connect_with(config: LinkConfig) -> Result<Connection> {
        let mut link = Connection::new(config);
        link.connect()?;
        Ok(link)
    }

    /// Share `link` with a [`FrameMonitor`] polling at its configured rate.
    ///
    /// Must be called inside a tokio runtime. Fails with
    /// [`LinkError::Config`] if the link's configuration does not validate.
    pub fn monitor<B>(link: Connection<B>) -> Result<(Arc<Mutex<Connection<B>>>, FrameMonitor)>
    where
        B: LinkBackend + Send + 'static,
    {
        let config = link.config().clone();
        let shared = Arc::new(Mutex::new(link));
        let monitor = FrameMonitor::spawn(Arc::clone(&shared), &config)?;
        Ok((shared, monitor))
    }
}

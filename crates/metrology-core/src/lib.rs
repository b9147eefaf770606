//! Core types and traits for metrology instrument automation.
//!
//! Every bench instrument is reached the same way: a VISA resource string is
//! resolved to a [`transport::Transport`], wrapped in an
//! [`session::Instrument`], and driven with formatted command strings. Replies
//! are decoded with [`reply::parse_reading`].
//!
//! # Crate Layout
//!
//! - [`error`] - categorised instrument errors
//! - [`resource`] - VISA resource string parsing
//! - [`transport`] - the transport trait, stream transport and `connect`
//! - [`session`] - the common instrument handle (command / query / read)
//! - [`reply`] - reply decoding (plain floats, embedded scientific tokens)
//! - [`capabilities`] - capability traits used by procedures
//! - [`sim`] - simulated instrument for tests and dry runs
//!
//! # Feature Flags
//!
//! - `serial` (default) - ASRL resources through `tokio-serial`
//! - `visa` - GPIB, USB and VXI-11 resources through the system VISA library

pub mod capabilities;
pub mod error;
pub mod reply;
pub mod resource;
#[cfg(feature = "serial")]
pub mod serial;
pub mod session;
pub mod sim;
pub mod transport;
#[cfg(feature = "visa")]
pub mod visa;

pub use capabilities::{
    Capability, InstrumentCategory, OutputControl, PowerSensor, Readable, SignalSource,
    SpectrumAnalyzer,
};
pub use error::InstrumentError;
pub use reply::{parse_f64, parse_reading, Reading, ReplyFormat};
pub use resource::ResourceAddress;
pub use session::Instrument;
pub use sim::SimulatedTransport;
pub use transport::{connect, list_resources, ConnectOptions, StreamTransport, Transport};

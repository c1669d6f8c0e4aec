//! Ports - seams to the outside world.
//!
//! Everything the executors need from their surroundings (time, id
//! generation, failure observers, the downstream record sink) is a trait
//! here, so tests and embedders can swap implementations.

pub mod clock;
pub mod id_generator;
pub mod record_sink;
pub mod reporter;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::record_sink::RecordSink;
pub use self::reporter::{Reporter, ReporterRef};

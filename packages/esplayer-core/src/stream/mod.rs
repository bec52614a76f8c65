//! Per-stream transfer pipeline.
//!
//! [`EsStream`] pumps packets from storage into the native player while
//! honoring start/stop, codec reconfiguration, and seek generations.

mod es_stream;

pub use es_stream::{ConfigOutcome, EsStream, EsStreamState, SeekOutcome, StreamSignal};

//! Cluster state core: the worker registry and the read-side algorithms
//! built on it.
//!
//! - [`WorkerRegistry`]: concurrency-safe map of live workers
//! - [`selection`]: least-loaded-with-capacity choice of a dispatch target
//! - [`GlobalLoad`]: sum of reported load and declared capacity
//! - [`MessageSink`]: non-owning handle used to push messages to a worker

pub mod load;
pub mod record;
pub mod registry;
pub mod selection;
pub mod sink;

pub use load::GlobalLoad;
pub use record::{WorkerRecord, WorkerSnapshot};
pub use registry::{Registration, WorkerRegistry};
pub use selection::SelectedWorker;
pub use sink::{ChannelSink, MessageSink};

//! Master-side gRPC surface.
//!
//! - [`MasterService`]: `Connect` stream and `GetClusterLoad` query
//! - [`ConnectionHandler`]: per-worker protocol state machine
//! - [`message`]: classification of inbound worker messages

pub mod connection;
pub mod master_service;
pub mod message;
pub mod server;

pub use connection::ConnectionHandler;
pub use master_service::MasterService;
pub use server::GrpcServer;

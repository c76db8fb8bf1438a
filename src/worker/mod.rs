//! Worker side of the control channel.
//!
//! - [`WorkerAgent`]: connects to the master, registers, reports load and
//!   receives task assignments
//! - [`heartbeat`]: jittered ticker driving status updates
//!
//! # Connection Flow
//!
//! 1. Dial the master and open the `Connect` stream
//! 2. Send `RegisterRequest` as the first message
//! 3. Wait for `RegisterResponse`; a rejection ends the agent
//! 4. Send a `StatusUpdate` on every heartbeat tick
//! 5. Forward `TaskAssignment`s to the assignment channel
//!
//! Task execution and reconnection are not handled here.

pub mod agent;
pub mod heartbeat;

pub use agent::{ActiveTasks, WorkerAgent};

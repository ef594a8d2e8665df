//! WebSocket gateway for devops-pack.
//!
//! Hosts the `/ws` event socket, accepts `run_script` events, prepares the
//! AWS profile for the run, and streams each line the provisioning command
//! produces back to the requesting client as an `output` event.

pub mod connection;
pub mod events;
pub mod runner;
pub mod server;
pub mod state;

pub use runner::{OutputSink, ProvisionRunner, ScriptRunner};
pub use server::{build_router, start_gateway};
pub use state::GatewayState;

//! Client side of the devops-pack event protocol.
//!
//! A [`RunScriptPanel`] owns one [`EventChannel`] to the gateway. Triggering
//! it reads the three credential fields from a [`FormSource`] and emits them
//! as a `run_script` event; every `output` event the gateway pushes back is
//! appended to the panel's output region.

pub mod channel;
pub mod form;
pub mod panel;

pub use channel::EventChannel;
pub use form::{read_run_parameters, FormFields, FormSource};
pub use panel::{RunScriptPanel, SharedOutput};

//! Inbound event handlers.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use devops_pack_core::config::RunnerConfig;
use devops_pack_core::protocol::{EventFrame, EVENT_RUN_SCRIPT};
use devops_pack_core::types::ScriptRequest;

use crate::runner::OutputSink;
use crate::state::GatewayState;

/// Dispatch one inbound frame from a client.
pub async fn dispatch_event(state: &Arc<GatewayState>, sink: &OutputSink, frame: EventFrame) {
    debug!(conn_id = %sink.conn_id(), event = %frame.event, "Dispatching event");

    match frame.event.as_str() {
        EVENT_RUN_SCRIPT => handle_run_script(state, sink, frame.data).await,
        other => {
            warn!(conn_id = %sink.conn_id(), event = other, "Unknown event");
            sink.send_frame(&EventFrame::error(format!("Unknown event: {other}")));
        }
    }
}

async fn handle_run_script(
    state: &Arc<GatewayState>,
    sink: &OutputSink,
    data: Option<serde_json::Value>,
) {
    let request: ScriptRequest = match serde_json::from_value(data.unwrap_or_default()) {
        Ok(r) => r,
        Err(e) => {
            warn!(conn_id = %sink.conn_id(), %e, "Invalid run_script payload");
            sink.send_frame(&EventFrame::error(format!("Invalid run_script payload: {e}")));
            return;
        }
    };

    let run = state.record_run(sink.conn_id()).await;
    info!(conn_id = %sink.conn_id(), run, "run_script accepted");

    let Some(request) = prepare_request(&state.config.runner(), request, sink) else {
        return;
    };

    // Runs can take a long time; keep the connection's read loop free.
    let runner = state.runner.clone();
    let run_sink = sink.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = runner.run(&request, &run_sink).await {
            error!(conn_id = %run_sink.conn_id(), run, %e, "Run failed");
        }
    });
    state.track_run(sink.conn_id(), task).await;
}

/// Apply defaults and announce them. Returns `None` when the run must stop
/// because credentials are missing.
pub fn prepare_request(
    defaults: &RunnerConfig,
    mut request: ScriptRequest,
    sink: &OutputSink,
) -> Option<ScriptRequest> {
    if request.project.is_empty() {
        sink.emit(format!(
            "Using default project name \"{}\"",
            defaults.default_project
        ));
        request.project = defaults.default_project.clone();
    }

    if request.params.region.is_empty() {
        sink.emit(format!("Using default region \"{}\"", defaults.default_region));
        request.params.region = defaults.default_region.clone();
    }

    if request.multiple_vm {
        sink.emit("You have opted for multiple virtual machines");
    } else {
        sink.emit("You have opted for single virtual machine");
    }

    if !request.has_credentials() {
        sink.emit("[error] AWS Secret Key ID or AWS Secret Access Key is missing!");
        return None;
    }

    Some(request)
}

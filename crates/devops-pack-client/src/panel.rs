//! The run-script panel: form trigger plus output region over one channel.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use devops_pack_core::output::OutputRegion;
use devops_pack_core::protocol::{EVENT_OUTPUT, EVENT_RUN_SCRIPT};

use crate::channel::EventChannel;
use crate::form::{read_run_parameters, FormSource};

/// Output region shared between the panel and the channel's reader task.
pub type SharedOutput = Arc<Mutex<OutputRegion>>;

/// Owns the event channel for the lifetime of the form.
pub struct RunScriptPanel {
    channel: EventChannel,
    output: SharedOutput,
}

impl RunScriptPanel {
    pub fn new(channel: EventChannel) -> Self {
        Self::with_output(channel, OutputRegion::new())
    }

    /// Attach to `channel`, appending `output` events to `region`.
    pub fn with_output(channel: EventChannel, region: OutputRegion) -> Self {
        let output: SharedOutput = Arc::new(Mutex::new(region));
        let region = output.clone();
        channel.on_text(EVENT_OUTPUT, move |line| {
            region
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .append(line);
        });
        Self { channel, output }
    }

    /// Read the form and emit one `run_script` event.
    pub fn run_script<F: FormSource + ?Sized>(&self, form: &F) {
        let params = read_run_parameters(form);
        info!(region = %params.region, "Emitting run_script");
        self.channel.send(EVENT_RUN_SCRIPT, &params);
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub fn output(&self) -> SharedOutput {
        self.output.clone()
    }

    /// Snapshot of the output region's content.
    pub fn content(&self) -> String {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .content()
            .to_string()
    }

    /// Tear down the connection.
    pub async fn close(self) {
        self.channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    use devops_pack_core::protocol::EventFrame;

    use crate::form::FormFields;

    async fn panel(region: OutputRegion) -> (RunScriptPanel, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (
            RunScriptPanel::with_output(EventChannel::from_stream(client), region),
            server,
        )
    }

    async fn received(server: &mut WebSocketStream<DuplexStream>) -> serde_json::Value {
        let msg = server.next().await.unwrap().unwrap();
        serde_json::from_str(msg.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_run_script_payload_matches_fields() {
        let (panel, mut server) = panel(OutputRegion::new()).await;
        panel.run_script(&FormFields::credentials("AKIA123", "secret", "us-east-1"));

        assert_eq!(
            received(&mut server).await,
            serde_json::json!({
                "event": "run_script",
                "data": {
                    "aws_access_key_id": "AKIA123",
                    "aws_secret_access_key": "secret",
                    "region": "us-east-1"
                }
            })
        );
    }

    #[tokio::test]
    async fn test_run_script_with_empty_fields() {
        let (panel, mut server) = panel(OutputRegion::new()).await;
        panel.run_script(&FormFields::credentials("", "", ""));

        let frame = received(&mut server).await;
        assert_eq!(
            frame["data"],
            serde_json::json!({
                "aws_access_key_id": "",
                "aws_secret_access_key": "",
                "region": ""
            })
        );
    }

    #[tokio::test]
    async fn test_each_trigger_sends_exactly_one_event() {
        let (panel, mut server) = panel(OutputRegion::new()).await;
        panel.run_script(&FormFields::credentials("a", "b", "c"));
        panel.run_script(&FormFields::credentials("d", "e", "f"));

        assert_eq!(received(&mut server).await["data"]["region"], "c");
        assert_eq!(received(&mut server).await["data"]["region"], "f");
        let extra = tokio::time::timeout(Duration::from_millis(100), server.next()).await;
        assert!(extra.is_err(), "unexpected extra frame");
    }

    #[tokio::test]
    async fn test_output_lines_appended_after_existing_content() {
        let (panel, mut server) = panel(OutputRegion::with_content("ready<br>")).await;

        for line in ["line1", "line2"] {
            let text = EventFrame::output(line).to_text().unwrap();
            server.send(Message::Text(text.into())).await.unwrap();
        }

        for _ in 0..100 {
            if panel.content().ends_with("line2<br>") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(panel.content(), "ready<br>line1<br>line2<br>");
    }
}

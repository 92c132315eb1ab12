//! Message routing between workers and the coordinator.
//!
//! Two ends share one protocol:
//!
//! - [`MessageRouter`] runs on the coordinator. It dispatches worker messages
//!   to the I/O proxy or, for terminal messages, updates the run context.
//! - [`WorkerInbox`] runs next to each worker. It receives coordinator
//!   messages and resolves pending value requests in the worker's correlator.
//!
//! Protocol violations (unknown types, messages arriving on the wrong side,
//! duplicate terminal messages) are logged and counted, never surfaced to
//! user code.

use crate::context::{FailureKind, RunContext};
use crate::correlator::Correlator;
use crate::io::IoProxy;
use crate::stats::SharedStats;
use elea_core::{Address, ErrorDescriptor, Message, MessageKind, ProtocolError, WorkerId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Coordinator-side dispatcher.
pub struct MessageRouter {
    io: IoProxy,
    stats: Arc<SharedStats>,
}

impl MessageRouter {
    pub(crate) fn new(io: IoProxy, stats: Arc<SharedStats>) -> Self {
        Self { io, stats }
    }

    pub fn io(&self) -> &IoProxy {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IoProxy {
        &mut self.io
    }

    /// Dispatch a message received from a worker.
    pub fn route(&self, ctx: &mut RunContext, message: Message) -> Result<(), ProtocolError> {
        self.stats.record_routed();
        let outcome = self.dispatch(ctx, message);
        if outcome.is_err() {
            self.stats.record_violation();
        }
        outcome
    }

    /// Decode a JSON wire frame and dispatch it.
    pub fn route_encoded(&self, ctx: &mut RunContext, frame: &str) -> Result<(), ProtocolError> {
        match Message::from_json(frame) {
            Ok(message) => self.route(ctx, message),
            Err(err) => {
                self.stats.record_violation();
                Err(err)
            }
        }
    }

    /// Route a message, logging instead of returning protocol violations.
    pub(crate) fn route_logged(&self, ctx: &mut RunContext, message: Message) {
        let kind = message.kind;
        let from = message.source;
        if let Err(err) = self.route(ctx, message) {
            tracing::warn!(%kind, %from, error = %err, "Dropped message");
        }
    }

    fn dispatch(&self, ctx: &mut RunContext, message: Message) -> Result<(), ProtocolError> {
        let source = match message.source {
            Address::Worker(id) => id,
            Address::Coordinator => {
                return Err(ProtocolError::Unexpected {
                    kind: message.kind,
                    from: message.source,
                })
            }
        };

        match message.kind {
            MessageKind::ConsoleLog => self.io.on_console_log(source, &message.payload),
            MessageKind::ConsoleError => self.io.on_console_error(source, &message.payload),
            MessageKind::CsvRow => self.io.on_csv_row(ctx, source, message.payload),
            MessageKind::PlotRequest => self.io.on_plot_request(source, &message.payload),
            MessageKind::ValueRequest => {
                let correlation_id = message.require_correlation_id()?.clone();
                self.io
                    .on_value_request(ctx, source, correlation_id, &message.payload)?;
            }
            MessageKind::WorkerResult => {
                ctx.complete(source, message.payload)?;
                tracing::debug!(worker = source.0, "Worker completed");
            }
            MessageKind::WorkerError => {
                let descriptor = ErrorDescriptor::from_payload(&message.payload);
                tracing::debug!(worker = source.0, error = %descriptor.message, "Worker failed");
                ctx.fail(source, FailureKind::Raised(descriptor.message))?;
            }
            MessageKind::ValueReply => {
                return Err(ProtocolError::Unexpected {
                    kind: message.kind,
                    from: message.source,
                })
            }
        }
        Ok(())
    }
}

/// Worker-side receiver for coordinator messages.
pub struct WorkerInbox {
    owner: WorkerId,
    correlator: Arc<Correlator>,
}

impl WorkerInbox {
    pub fn new(owner: WorkerId, correlator: Arc<Correlator>) -> Self {
        Self { owner, correlator }
    }

    /// Dispatch a message received from the coordinator.
    pub fn route(&self, message: Message) -> Result<(), ProtocolError> {
        match (message.kind, message.source) {
            (MessageKind::ValueReply, Address::Coordinator) => {
                let id = message.require_correlation_id()?.clone();
                self.correlator.resolve(&id, message.payload)
            }
            (kind, from) => Err(ProtocolError::Unexpected { kind, from }),
        }
    }

    /// Run the inbox until the coordinator drops its end of the channel.
    pub async fn run(self, mut incoming: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = incoming.recv().await {
            if let Err(err) = self.route(message) {
                tracing::warn!(worker = self.owner.0, error = %err, "Worker dropped message");
            }
        }
        tracing::trace!(worker = self.owner.0, "Worker inbox closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkerStatus;
    use crate::io::{RecordingConsole, RecordingPlotSink};
    use crate::stats::PoolStatsHandle;
    use elea_core::CorrelationId;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Fixture {
        router: MessageRouter,
        stats: Arc<SharedStats>,
        console: Arc<RecordingConsole>,
        plots: Arc<RecordingPlotSink>,
    }

    fn fixture() -> Fixture {
        let console = Arc::new(RecordingConsole::new());
        let plots = Arc::new(RecordingPlotSink::new());
        let mut io = IoProxy::new(false);
        io.set_console(console.clone());
        io.set_plot_sink(plots.clone());
        io.set_value_source(Arc::new(|_: WorkerId, _: &Value| json!(42)));

        let stats = SharedStats::new();
        Fixture {
            router: MessageRouter::new(io, Arc::clone(&stats)),
            stats,
            console,
            plots,
        }
    }

    fn running_context(
        thread_count: usize,
    ) -> (RunContext, Vec<mpsc::UnboundedReceiver<Message>>) {
        let mut ctx = RunContext::new(thread_count);
        let mut receivers = Vec::new();
        for i in 0..thread_count {
            let (tx, rx) = mpsc::unbounded_channel();
            ctx.attach(WorkerId(i as u32), tx).unwrap();
            receivers.push(rx);
        }
        (ctx, receivers)
    }

    #[test]
    fn test_io_messages_reach_sinks() {
        let f = fixture();
        let (mut ctx, _rx) = running_context(2);

        f.router
            .route(&mut ctx, Message::console_log(WorkerId(1), json!(["x", 1])))
            .unwrap();
        f.router
            .route(&mut ctx, Message::csv_row(WorkerId(0), vec![json!(0), json!(9)]))
            .unwrap();
        f.router
            .route(&mut ctx, Message::plot_request(WorkerId(1), json!({"y": [1]})))
            .unwrap();

        assert_eq!(f.console.lines_from(WorkerId(1)), vec!["x 1"]);
        assert_eq!(ctx.csv_rows(), &[vec![json!(0), json!(9)]]);
        assert_eq!(f.plots.requests(), vec![(WorkerId(1), json!({"y": [1]}))]);
    }

    #[test]
    fn test_terminal_messages_update_context() {
        let f = fixture();
        let (mut ctx, _rx) = running_context(2);

        f.router
            .route(&mut ctx, Message::worker_result(WorkerId(1), json!("done")))
            .unwrap();
        f.router
            .route(
                &mut ctx,
                Message::worker_error(WorkerId(0), &ErrorDescriptor::new("bad")),
            )
            .unwrap();

        assert_eq!(ctx.status(WorkerId(1)), Some(WorkerStatus::Completed));
        assert_eq!(ctx.status(WorkerId(0)), Some(WorkerStatus::Failed));
        let err = ctx.finish().unwrap_err();
        assert_eq!(err.failed_indices(), vec![WorkerId(0)]);
        assert_eq!(err.partial_results().get(1), Some(&json!("done")));
    }

    #[test]
    fn test_value_request_is_answered_to_sender() {
        let f = fixture();
        let (mut ctx, mut receivers) = running_context(2);
        let id = CorrelationId::new(WorkerId(1), 0);

        f.router
            .route(
                &mut ctx,
                Message::value_request(WorkerId(1), id.clone(), json!({"op": "now"})),
            )
            .unwrap();

        let reply = receivers[1].try_recv().unwrap();
        assert_eq!(reply, Message::value_reply(id, json!(42)));
        assert!(receivers[0].try_recv().is_err());
    }

    #[test]
    fn test_protocol_violations_are_counted() {
        let f = fixture();
        let (mut ctx, _rx) = running_context(1);

        let unknown = f
            .router
            .route_encoded(&mut ctx, r#"{"type":"TELEPORT","source":1,"payload":null}"#);
        assert!(matches!(unknown, Err(ProtocolError::UnknownMessageType(_))));

        let reply_at_coordinator = f.router.route(
            &mut ctx,
            Message::value_reply(CorrelationId::from("w0-0"), Value::Null),
        );
        assert!(matches!(
            reply_at_coordinator,
            Err(ProtocolError::Unexpected { kind: MessageKind::ValueReply, .. })
        ));

        let no_id = Message::new(
            MessageKind::ValueRequest,
            Address::Worker(WorkerId(0)),
            Value::Null,
        );
        assert!(matches!(
            f.router.route(&mut ctx, no_id),
            Err(ProtocolError::MissingCorrelationId { .. })
        ));

        f.router
            .route(&mut ctx, Message::worker_result(WorkerId(0), json!(1)))
            .unwrap();
        assert!(matches!(
            f.router
                .route(&mut ctx, Message::worker_result(WorkerId(0), json!(2))),
            Err(ProtocolError::DuplicateTerminal(_))
        ));

        let stats = PoolStatsHandle::new(Arc::clone(&f.stats));
        assert_eq!(stats.protocol_violations(), 4);
        assert_eq!(ctx.finish().unwrap().get(0), Some(&json!(1)));
    }

    #[test]
    fn test_route_encoded_dispatches_valid_frames() {
        let f = fixture();
        let (mut ctx, _rx) = running_context(1);

        f.router
            .route_encoded(
                &mut ctx,
                r#"{"type":"CONSOLE_LOG","source":1,"payload":["from the wire"]}"#,
            )
            .unwrap();

        assert_eq!(f.console.lines_from(WorkerId(0)), vec!["from the wire"]);
    }

    #[test]
    fn test_worker_inbox_resolves_only_matching_request() {
        let correlator = Arc::new(Correlator::new(WorkerId(0)));
        let inbox = WorkerInbox::new(WorkerId(0), Arc::clone(&correlator));
        let (id, mut rx) = correlator.register();

        let stray = inbox.route(Message::value_reply(CorrelationId::from("w0-77"), json!(1)));
        assert!(matches!(stray, Err(ProtocolError::UnmatchedReply(_))));
        assert!(rx.try_recv().is_err());

        let from_worker = inbox.route(Message::console_log(WorkerId(3), json!("hi")));
        assert!(matches!(from_worker, Err(ProtocolError::Unexpected { .. })));

        inbox.route(Message::value_reply(id, json!(2))).unwrap();
        assert_eq!(rx.try_recv().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_worker_inbox_shutdown() {
        let correlator = Arc::new(Correlator::new(WorkerId(0)));
        let inbox = WorkerInbox::new(WorkerId(0), correlator);
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(inbox.run(rx));

        // Dropping the coordinator end stops the inbox.
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Inbox should shutdown")
            .expect("Inbox task should complete");
    }
}

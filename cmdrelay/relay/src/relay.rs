use std::{future::Future, sync::Arc};

use anyhow::Result;
use cmdrelay_dispatch::{DispatchError, Dispatcher};
use serde::Serialize;
use serde_json::json;
use shared_event_bus::{BusMessage, Delivery, MessagePublisher, MessageSubscription};
use shared_logging::LogLevel;

use crate::{
    budget::MessageBudget,
    executor::CommandRunner,
    telemetry::RelayTelemetry,
};

/// What happened to a single inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Command ran and its output was published; inbound acked.
    Published {
        /// Matched pattern key.
        key: String,
        /// Id of the published result.
        message_id: String,
    },
    /// No pattern matched; inbound acked.
    Missed,
    /// Pattern matched but the invocation was unusable; inbound acked.
    Rejected(String),
    /// The command failed; inbound acked.
    Failed(String),
    /// Result could not be published; inbound nacked for redelivery.
    PublishFailed(String),
}

/// Why a relay run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The message budget was spent.
    BudgetExhausted,
    /// The subscription closed.
    SubscriptionClosed,
    /// The shutdown signal fired.
    Shutdown,
}

/// Counters for one relay run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelaySummary {
    /// Messages taken from the subscription.
    pub received: u64,
    /// Results published.
    pub published: u64,
    /// Dispatch misses.
    pub missed: u64,
    /// Invalid invocations.
    pub rejected: u64,
    /// Command failures.
    pub failed: u64,
    /// Publish failures.
    pub publish_failed: u64,
    /// Reason the run ended.
    pub stopped_by: StopReason,
}

impl RelaySummary {
    const fn new() -> Self {
        Self {
            received: 0,
            published: 0,
            missed: 0,
            rejected: 0,
            failed: 0,
            publish_failed: 0,
            stopped_by: StopReason::SubscriptionClosed,
        }
    }

    fn record(&mut self, outcome: &MessageOutcome) {
        let counter = match outcome {
            MessageOutcome::Published { .. } => &mut self.published,
            MessageOutcome::Missed => &mut self.missed,
            MessageOutcome::Rejected(_) => &mut self.rejected,
            MessageOutcome::Failed(_) => &mut self.failed,
            MessageOutcome::PublishFailed(_) => &mut self.publish_failed,
        };
        *counter += 1;
    }
}

/// Consumes bus messages, runs the matching commands, and publishes their output.
pub struct Relay {
    dispatcher: Dispatcher,
    runner: Arc<dyn CommandRunner>,
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    telemetry: RelayTelemetry,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("patterns", &self.dispatcher.table().len())
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Creates a relay publishing results to `topic`.
    pub fn new(
        dispatcher: Dispatcher,
        runner: Arc<dyn CommandRunner>,
        publisher: Arc<dyn MessagePublisher>,
        topic: impl Into<String>,
        telemetry: RelayTelemetry,
    ) -> Self {
        Self {
            dispatcher,
            runner,
            publisher,
            topic: topic.into(),
            telemetry,
        }
    }

    /// Handles one delivery end to end and settles it.
    pub async fn handle(&self, delivery: Delivery) -> MessageOutcome {
        let message = delivery.message();
        let text = message.text();
        self.telemetry.log(
            LogLevel::Info,
            "relay.message.received",
            json!({
                "message_id": message.id,
                "attempt": message.delivery_attempt,
                "text": text,
            }),
        );

        let dispatch = match self.dispatcher.dispatch(&text) {
            Ok(dispatch) => dispatch,
            Err(DispatchError::NoMatch { .. }) => {
                self.telemetry.log(
                    LogLevel::Info,
                    "relay.dispatch.miss",
                    json!({ "message_id": message.id }),
                );
                delivery.ack();
                return MessageOutcome::Missed;
            }
            Err(err @ DispatchError::InvalidInvocation(_)) => {
                self.telemetry.log(
                    LogLevel::Error,
                    "relay.dispatch.invalid",
                    json!({ "message_id": message.id, "error": err.to_string() }),
                );
                delivery.ack();
                return MessageOutcome::Rejected(err.to_string());
            }
        };

        self.telemetry.log(
            LogLevel::Info,
            "relay.dispatch.matched",
            json!({
                "message_id": message.id,
                "key": dispatch.key,
                "argv": dispatch.invocation.argv(),
                "stdin_bytes": dispatch.invocation.stdin().map_or(0, str::len),
            }),
        );

        let output = match self.runner.run(dispatch.invocation).await {
            Ok(output) => output,
            Err(err) => {
                self.telemetry.log(
                    LogLevel::Error,
                    "relay.command.failed",
                    json!({ "message_id": message.id, "key": dispatch.key, "error": err.to_string() }),
                );
                self.telemetry
                    .event(
                        "relay.command.failed",
                        json!({ "key": dispatch.key, "error": err.to_string() }),
                    )
                    .await;
                delivery.ack();
                return MessageOutcome::Failed(err.to_string());
            }
        };

        self.telemetry.log(
            LogLevel::Debug,
            "relay.command.output",
            json!({
                "message_id": message.id,
                "output": String::from_utf8_lossy(&output),
            }),
        );

        let reply = BusMessage::new(output).with_attributes(message.attributes.clone());
        match self.publisher.publish(&self.topic, reply).await {
            Ok(message_id) => {
                self.telemetry.log(
                    LogLevel::Info,
                    "relay.result.published",
                    json!({
                        "message_id": message.id,
                        "result_id": message_id,
                        "topic": self.topic,
                    }),
                );
                self.telemetry
                    .event(
                        "relay.result.published",
                        json!({ "key": dispatch.key, "result_id": message_id }),
                    )
                    .await;
                delivery.ack();
                MessageOutcome::Published {
                    key: dispatch.key,
                    message_id,
                }
            }
            Err(err) => {
                self.telemetry.log(
                    LogLevel::Error,
                    "relay.result.publish_failed",
                    json!({ "message_id": message.id, "error": err.to_string() }),
                );
                delivery.nack();
                MessageOutcome::PublishFailed(err.to_string())
            }
        }
    }

    /// Runs until the budget is spent, the subscription closes, or `shutdown` resolves.
    ///
    /// Messages are handled one at a time. Once the budget is spent the loop
    /// stops without pulling another delivery.
    pub async fn run<F>(
        &self,
        subscription: &dyn MessageSubscription,
        budget: &mut MessageBudget,
        shutdown: F,
    ) -> Result<RelaySummary>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut summary = RelaySummary::new();
        summary.stopped_by = loop {
            if budget.is_exhausted() {
                break StopReason::BudgetExhausted;
            }
            let delivery = tokio::select! {
                () = &mut shutdown => break StopReason::Shutdown,
                next = subscription.next() => match next? {
                    Some(delivery) => delivery,
                    None => break StopReason::SubscriptionClosed,
                },
            };
            let ordinal = budget.admit();
            summary.received += 1;
            self.telemetry.log(
                LogLevel::Debug,
                "relay.message.admitted",
                json!({ "ordinal": ordinal, "remaining": budget.remaining() }),
            );
            let outcome = self.handle(delivery).await;
            summary.record(&outcome);
        };

        self.telemetry.log(
            LogLevel::Info,
            "relay.stopped",
            serde_json::to_value(&summary).unwrap_or_default(),
        );
        self.telemetry
            .event("relay.stopped", json!({ "received": summary.received }))
            .await;
        Ok(summary)
    }
}

/// Resolves when `signal` fires.
///
/// A signal source that fails to install is logged and never resolves, so the
/// relay keeps running until the budget or the subscription ends it.
pub async fn wait_for_shutdown<S>(signal: S, telemetry: RelayTelemetry)
where
    S: Future<Output = std::io::Result<()>> + Send,
{
    if let Err(err) = signal.await {
        telemetry.log(
            LogLevel::Error,
            "relay.shutdown.signal_unavailable",
            json!({ "error": err.to_string() }),
        );
        std::future::pending::<()>().await;
    }
}

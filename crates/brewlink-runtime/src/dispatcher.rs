//! [`Dispatcher`] – the per-message entry point.
//!
//! For each user message:
//!
//! 1. [`Dispatcher::chat`] lower-cases the text and asks the
//!    [`Conversation`] for a reply. A failed call fails the request and
//!    nothing is dispatched.
//! 2. [`Dispatcher::handle`] classifies the text. On a command it publishes
//!    the token, then merges the intended `status` into the store straight
//!    away without waiting for the device to confirm.
//!
//! The optimistic merge and the ingestor's confirmed merges race; the store
//! keeps each merge atomic and the later one wins. A publish that fails is
//! reported in [`CommandOutcome::publish_error`] but the optimistic merge is
//! still applied and never rolled back. A later status report is what
//! corrects it.

use std::sync::Arc;

use brewlink_middleware::CommandPublisher;
use brewlink_state::StateStore;
use brewlink_types::{BrewError, CommandIntent, DeviceState};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, instrument};

use crate::chat_driver::{Conversation, ConversationReply};
use crate::interpreter::CommandInterpreter;

/// What happened for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    /// The conversational reply, returned whatever the command path did.
    pub reply: ConversationReply,
    #[serde(skip)]
    pub intent: CommandIntent,
    /// Token sent on the command topic, if a command was detected.
    pub command: Option<&'static str>,
    pub published: bool,
    pub publish_error: Option<String>,
    /// Store snapshot after the optimistic merge. `None` when no command.
    pub state: Option<DeviceState>,
}

pub struct Dispatcher {
    interpreter: CommandInterpreter,
    publisher: Arc<dyn CommandPublisher>,
    conversation: Arc<dyn Conversation>,
    store: StateStore,
}

impl Dispatcher {
    pub fn new(
        interpreter: CommandInterpreter,
        publisher: Arc<dyn CommandPublisher>,
        conversation: Arc<dyn Conversation>,
        store: StateStore,
    ) -> Self {
        Self {
            interpreter,
            publisher,
            conversation,
            store,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Full chat pipeline: reply first, then [`Dispatcher::handle`].
    ///
    /// # Errors
    ///
    /// [`BrewError::ExternalService`] when the conversational call fails.
    /// No command is published in that case.
    #[instrument(skip(self, message))]
    pub async fn chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<CommandOutcome, BrewError> {
        let message = message.to_lowercase();
        let reply = self
            .conversation
            .reply(&message, conversation_id)
            .await
            .map_err(|e| {
                error!(error = %e, "conversational service call failed");
                BrewError::from(e)
            })?;
        Ok(self.handle(&message, reply).await)
    }

    /// Classify `message` and act on it. Never fails: a publish error is
    /// carried in the outcome.
    pub async fn handle(&self, message: &str, reply: ConversationReply) -> CommandOutcome {
        let intent = self.interpreter.classify(message);
        let (Some(command), Some(target)) = (intent.command_token(), intent.target_status())
        else {
            return CommandOutcome {
                reply,
                intent,
                command: None,
                published: false,
                publish_error: None,
                state: None,
            };
        };

        info!(command, "device command detected");
        let publish_error = match self.publisher.publish_command(command).await {
            Ok(()) => None,
            Err(e) => {
                error!(command, error = %e, "command publish failed");
                Some(e.to_string())
            }
        };

        let mut partial = Map::new();
        partial.insert("status".into(), Value::from(target.as_token()));
        let report = self.store.merge(&partial).await;

        CommandOutcome {
            reply,
            intent,
            command: Some(command),
            published: publish_error.is_none(),
            publish_error,
            state: Some(report.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_driver::ChatError;
    use async_trait::async_trait;
    use brewlink_state::{MaintenancePolicy, MaintenanceThresholds};
    use brewlink_types::PowerStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish_command(&self, command: &str) -> Result<(), BrewError> {
            self.sent.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    struct DisconnectedPublisher;

    #[async_trait]
    impl CommandPublisher for DisconnectedPublisher {
        async fn publish_command(&self, _command: &str) -> Result<(), BrewError> {
            Err(BrewError::Publish("broker not connected".into()))
        }
    }

    /// Echoes the query back and remembers what it was asked.
    #[derive(Default)]
    struct EchoConversation {
        queries: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl Conversation for EchoConversation {
        async fn reply(
            &self,
            query: &str,
            conversation_id: Option<&str>,
        ) -> Result<ConversationReply, ChatError> {
            self.queries
                .lock()
                .unwrap()
                .push((query.to_string(), conversation_id.map(str::to_string)));
            Ok(reply(&format!("ok: {query}")))
        }
    }

    struct FailingConversation;

    #[async_trait]
    impl Conversation for FailingConversation {
        async fn reply(&self, _: &str, _: Option<&str>) -> Result<ConversationReply, ChatError> {
            Err(ChatError::Status {
                status: 503,
                body: "unavailable".into(),
            })
        }
    }

    fn reply(answer: &str) -> ConversationReply {
        ConversationReply {
            answer: answer.to_string(),
            conversation_id: Some("c-1".into()),
            extra: Map::new(),
        }
    }

    fn store() -> StateStore {
        StateStore::new(MaintenancePolicy::from_thresholds(
            MaintenanceThresholds::default(),
        ))
    }

    fn dispatcher(
        publisher: Arc<dyn CommandPublisher>,
        conversation: Arc<dyn Conversation>,
    ) -> Dispatcher {
        Dispatcher::new(CommandInterpreter::default(), publisher, conversation, store())
    }

    #[tokio::test]
    async fn turn_on_publishes_and_updates_optimistically() {
        let publisher = Arc::new(RecordingPublisher::default());
        let d = dispatcher(publisher.clone(), Arc::new(EchoConversation::default()));

        let outcome = d.handle("ligar a cafeteira", reply("Ligando")).await;

        assert_eq!(outcome.intent, CommandIntent::TurnOn);
        assert_eq!(outcome.command, Some("ligar"));
        assert!(outcome.published);
        assert_eq!(outcome.reply.answer, "Ligando");
        assert_eq!(*publisher.sent.lock().unwrap(), vec!["ligar"]);
        assert_eq!(d.store().read().await.status, PowerStatus::On);
        assert_eq!(outcome.state.map(|s| s.status), Some(PowerStatus::On));
    }

    #[tokio::test]
    async fn turn_off_publishes_off_token() {
        let publisher = Arc::new(RecordingPublisher::default());
        let d = dispatcher(publisher.clone(), Arc::new(EchoConversation::default()));
        d.handle("ligar a cafeteira", reply("")).await;

        let outcome = d.handle("desligar a cafeteira", reply("")).await;

        assert_eq!(outcome.command, Some("desligar"));
        assert_eq!(*publisher.sent.lock().unwrap(), vec!["ligar", "desligar"]);
        assert_eq!(d.store().read().await.status, PowerStatus::Off);
    }

    #[tokio::test]
    async fn no_command_means_no_publish_and_no_merge() {
        let publisher = Arc::new(RecordingPublisher::default());
        let d = dispatcher(publisher.clone(), Arc::new(EchoConversation::default()));
        let before = d.store().read().await;

        let outcome = d.handle("qual a temperatura", reply("Está a 92 graus")).await;

        assert_eq!(outcome.intent, CommandIntent::None);
        assert_eq!(outcome.command, None);
        assert!(!outcome.published);
        assert!(outcome.state.is_none());
        assert_eq!(outcome.reply.answer, "Está a 92 graus");
        assert!(publisher.sent.lock().unwrap().is_empty());
        assert_eq!(d.store().read().await, before);
    }

    #[tokio::test]
    async fn publish_failure_is_reported_and_state_still_updated() {
        let d = dispatcher(
            Arc::new(DisconnectedPublisher),
            Arc::new(EchoConversation::default()),
        );

        let outcome = d.handle("ligar a cafeteira", reply("Ligando")).await;

        assert!(!outcome.published);
        assert!(outcome.publish_error.as_deref().is_some_and(|e| e.contains("not connected")));
        assert_eq!(outcome.reply.answer, "Ligando");
        assert_eq!(d.store().read().await.status, PowerStatus::On);
    }

    #[tokio::test]
    async fn later_confirmed_status_overwrites_optimistic_one() {
        let d = dispatcher(
            Arc::new(RecordingPublisher::default()),
            Arc::new(EchoConversation::default()),
        );
        d.handle("ligar a cafeteira", reply("")).await;

        let mut confirmed = Map::new();
        confirmed.insert("status".into(), Value::from("desligada"));
        d.store().merge(&confirmed).await;

        assert_eq!(d.store().read().await.status, PowerStatus::Off);
    }

    #[tokio::test]
    async fn chat_lowercases_before_asking_and_dispatching() {
        let publisher = Arc::new(RecordingPublisher::default());
        let conversation = Arc::new(EchoConversation::default());
        let d = dispatcher(publisher.clone(), conversation.clone());

        let outcome = d.chat("LIGAR a Cafeteira", Some("c-9")).await.unwrap();

        assert_eq!(outcome.reply.answer, "ok: ligar a cafeteira");
        assert_eq!(
            *conversation.queries.lock().unwrap(),
            vec![("ligar a cafeteira".to_string(), Some("c-9".to_string()))]
        );
        assert_eq!(*publisher.sent.lock().unwrap(), vec!["ligar"]);
    }

    #[tokio::test]
    async fn chat_failure_dispatches_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let d = dispatcher(publisher.clone(), Arc::new(FailingConversation));
        let before = d.store().read().await;

        let err = d.chat("ligar a cafeteira", None).await.unwrap_err();

        assert!(matches!(err, BrewError::ExternalService(_)));
        assert!(publisher.sent.lock().unwrap().is_empty());
        assert_eq!(d.store().read().await, before);
    }

    #[test]
    fn outcome_serializes_without_intent() {
        let outcome = CommandOutcome {
            reply: reply("hi"),
            intent: CommandIntent::None,
            command: None,
            published: false,
            publish_error: None,
            state: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("intent").is_none());
        assert_eq!(json["reply"]["answer"], "hi");
        assert_eq!(json["published"], false);
    }
}

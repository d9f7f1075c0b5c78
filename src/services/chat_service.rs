use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::background::BackgroundQueue;
use super::telemetry::Telemetry;
use super::titles::derive_title;
use crate::api::{
    ApiClient, ChatRequest, ChatResponse, OutboundMessage, PersistImagesRequest,
    SaveMessagesRequest,
};
use crate::context::{ContextSelector, SelectorConfig, TokenEstimator};
use crate::models::{
    corrected_usage, ConversationStore, DeliveryState, ErrorBanner, GeneratedImage, Identity,
    Message, TokenUsage, DEFAULT_TITLE,
};

/// Tunables for the send path.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Overall token budget for one request (context + new message + reply).
    pub max_context_tokens: u32,
    pub selector: SelectorConfig,
    /// When false, requests carry only the legacy single `message` field.
    pub context_enabled: bool,
    pub default_model: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8_000,
            selector: SelectorConfig::default(),
            context_enabled: true,
            default_model: "openrouter/auto".to_string(),
        }
    }
}

/// Per-call options for `send_message` / `retry_message`.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub model: Option<String>,
    pub attachment_ids: Vec<String>,
}

/// What a send call did. Failures are recorded in the store, not
/// returned as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent {
        conversation_id: String,
        user_message_id: String,
        assistant_message_id: String,
    },
    Failed {
        conversation_id: String,
        user_message_id: String,
    },
    /// Precondition not met (empty content, send already in flight,
    /// dismissed failure); no network call, no state change.
    Ignored,
}

/// Send/retry state machine.
///
/// A user message moves `Pending -> Confirmed` on success and
/// `Pending -> Failed` otherwise; an explicit retry moves it back to
/// `Pending` under the same id, so history never duplicates. One logical
/// send is in flight at a time per store.
pub struct ChatService {
    store: Arc<Mutex<ConversationStore>>,
    api: Arc<ApiClient>,
    estimator: Arc<dyn TokenEstimator>,
    selector: ContextSelector,
    queue: BackgroundQueue,
    telemetry: Telemetry,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        store: Arc<Mutex<ConversationStore>>,
        api: Arc<ApiClient>,
        estimator: Arc<dyn TokenEstimator>,
        queue: BackgroundQueue,
        config: ChatConfig,
    ) -> Self {
        let selector = ContextSelector::new(estimator.clone(), config.selector);
        let telemetry = Telemetry::new(api.clone(), queue.clone());
        Self {
            store,
            api,
            estimator,
            selector,
            queue,
            telemetry,
            config,
        }
    }

    /// Send a new user message in the active conversation, creating one
    /// if none exists.
    pub async fn send_message(&self, content: &str, options: SendOptions) -> SendOutcome {
        let content = content.trim().to_string();
        if content.is_empty() {
            return SendOutcome::Ignored;
        }
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        // Optimistic phase: claim the send slot, insert the pending user
        // message and build the request, all under one lock.
        let (conversation_id, user_message_id, request) = {
            let mut store = self.store.lock();
            if !store.begin_send() {
                return SendOutcome::Ignored;
            }

            let mut message = Message::user(content.clone()).with_model(model.clone());
            message.delivery = DeliveryState::Pending;
            message.attachment_ids = options.attachment_ids.clone();
            let user_message_id = message.id.clone();

            let conversation = store.ensure_active_conversation();
            let conversation_id = conversation.id.clone();
            let request =
                self.build_request(&conversation.messages, &content, &model, None);
            conversation.push_message(message);

            (conversation_id, user_message_id, request)
        };

        self.dispatch(conversation_id, user_message_id, model, request)
            .await
    }

    /// Re-send a previously failed user message, reusing its id. The
    /// timestamp moves to the retry instant; the row identity used for
    /// persistence upserts is preserved.
    pub async fn retry_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        options: SendOptions,
    ) -> SendOutcome {
        let (model, request) = {
            let mut store = self.store.lock();
            if !store.begin_send() {
                return SendOutcome::Ignored;
            }

            let Some(conversation) = store.get(conversation_id) else {
                store.end_send();
                return SendOutcome::Ignored;
            };
            let Some(message) = conversation.find_message(message_id) else {
                store.end_send();
                return SendOutcome::Ignored;
            };
            let retryable = message
                .failure()
                .map(|f| f.retry_available)
                .unwrap_or(false);
            if !message.is_user() || !retryable {
                debug!(message_id, "message is not retryable, ignoring");
                store.end_send();
                return SendOutcome::Ignored;
            }

            let content = message.content.clone();
            let model = options
                .model
                .clone()
                .or_else(|| message.original_model.clone())
                .unwrap_or_else(|| self.config.default_model.clone());

            let conversation = store.get_mut(conversation_id).expect("checked above");
            let request = self.build_request(
                &conversation.messages,
                &content,
                &model,
                Some(message_id),
            );
            conversation.amend_message(message_id, |message| {
                message.delivery = DeliveryState::Pending;
                message.timestamp = Utc::now();
            });
            store.clear_banner(conversation_id);

            (model, request)
        };

        self.dispatch(
            conversation_id.to_string(),
            message_id.to_string(),
            model,
            request,
        )
        .await
    }

    /// Retry the most recent failed message of a conversation. A failure
    /// whose banner was dismissed is not retried: no network call, no
    /// state change.
    pub async fn retry_last(&self, conversation_id: &str) -> SendOutcome {
        let message_id = {
            let store = self.store.lock();
            let Some(conversation) = store.get(conversation_id) else {
                return SendOutcome::Ignored;
            };
            match conversation.last_failed_message() {
                Some(message) if message.failure().is_some_and(|f| f.retry_available) => {
                    message.id.clone()
                }
                _ => return SendOutcome::Ignored,
            }
        };
        self.retry_message(conversation_id, &message_id, SendOptions::default())
            .await
    }

    /// Explicit banner dismissal; disables any further automatic retry of
    /// the associated message.
    pub fn dismiss_error(&self, conversation_id: &str) -> bool {
        self.store.lock().dismiss_banner(conversation_id)
    }

    // --- internals ---

    /// Build the outbound request: legacy single-message shape, or the
    /// context-selected window plus the new message sorted by timestamp.
    fn build_request(
        &self,
        history: &[Message],
        content: &str,
        model: &str,
        exclude_id: Option<&str>,
    ) -> ChatRequest {
        let messages = if self.config.context_enabled {
            let eligible: Vec<Message> = history
                .iter()
                .filter(|m| Some(m.id.as_str()) != exclude_id)
                .cloned()
                .collect();
            let new_cost = self.estimator.estimate(content);
            let window = self.selector.select_with_fallback(
                &eligible,
                self.config.max_context_tokens,
                new_cost,
            );

            let mut outbound: Vec<OutboundMessage> =
                window.iter().map(OutboundMessage::from).collect();
            outbound.push(OutboundMessage {
                role: crate::models::MessageRole::User,
                content: content.to_string(),
                timestamp: Utc::now(),
            });
            // Async mutation order does not guarantee array order.
            outbound.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            Some(outbound)
        } else {
            None
        };

        ChatRequest {
            message: content.to_string(),
            model: Some(model.to_string()),
            messages,
        }
    }

    async fn dispatch(
        &self,
        conversation_id: String,
        user_message_id: String,
        model: String,
        request: ChatRequest,
    ) -> SendOutcome {
        match self.api.send_chat(&request).await {
            Ok(response) => {
                self.apply_success(&conversation_id, &user_message_id, &model, response)
            }
            Err(error) => {
                debug!(error = %error, "chat turn failed");
                let failure = error.to_send_failure();
                let mut store = self.store.lock();
                store.end_send();
                let marked = match store.get_mut(&conversation_id) {
                    Some(conversation) => conversation.amend_message(&user_message_id, |message| {
                        message.delivery = DeliveryState::Failed(failure.clone());
                    }),
                    None => false,
                };
                if marked {
                    store.set_banner(
                        &conversation_id,
                        ErrorBanner {
                            message_id: user_message_id.clone(),
                            code: failure.code.clone(),
                            message: failure.message.clone(),
                            retry_after: failure.retry_after,
                        },
                    );
                }
                if let Identity::Anonymous { session_id } = store.identity() {
                    self.telemetry.record_send_error(
                        session_id,
                        failure.code.as_str(),
                        Some(model),
                    );
                }
                SendOutcome::Failed {
                    conversation_id,
                    user_message_id,
                }
            }
        }
    }

    fn apply_success(
        &self,
        conversation_id: &str,
        user_message_id: &str,
        requested_model: &str,
        response: ChatResponse,
    ) -> SendOutcome {
        let mut store = self.store.lock();
        store.end_send();

        let Some(conversation) = store.get_mut(conversation_id) else {
            // Deleted while the request was in flight.
            warn!(conversation_id, "conversation gone before response landed");
            return SendOutcome::Ignored;
        };

        let model = response
            .model
            .clone()
            .unwrap_or_else(|| requested_model.to_string());
        let reported = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let usage = corrected_usage(&model, reported, &response.response, self.estimator.as_ref());

        let mut assistant = Message::assistant(response.response.clone());
        if let Some(id) = response.id.clone() {
            assistant.id = id;
        }
        assistant.model = Some(model.clone());
        assistant.original_model = Some(requested_model.to_string());
        // Per-message totals partition the exchange: input tokens on the
        // user row, output tokens on the assistant row, so the
        // conversation total sums cleanly.
        assistant.output_tokens = Some(usage.output_tokens);
        assistant.total_tokens = Some(usage.output_tokens);
        assistant.annotations = response.annotations.clone();
        assistant.reasoning = response.reasoning.clone();
        if let Some(images) = response.images.clone() {
            assistant.images = images.into_iter().map(GeneratedImage::inline).collect();
        }
        let assistant_message_id = assistant.id.clone();

        // Confirm the triggering user message and back-fill its input
        // token count, correlated by the server request id.
        let request_id = response.request_id.clone();
        conversation.amend_message(user_message_id, |message| {
            message.delivery = DeliveryState::Confirmed;
            message.input_tokens = Some(usage.input_tokens);
            message.total_tokens = Some(usage.input_tokens);
            message.request_id = request_id;
        });

        conversation.push_message(assistant);
        conversation.sort_messages();
        conversation.enforce_image_budget();
        store.clear_banner(conversation_id);

        // First successful exchange titles the conversation; the title
        // rides along on the persistence call instead of a dedicated
        // title-update request.
        let conversation = store.get_mut(conversation_id).expect("present above");
        if conversation.title == DEFAULT_TITLE {
            if let Some(first) = conversation.first_user_message() {
                let title = derive_title(&first.content);
                conversation.set_title(title, true);
            }
        }

        let outcome = SendOutcome::Sent {
            conversation_id: conversation_id.to_string(),
            user_message_id: user_message_id.to_string(),
            assistant_message_id: assistant_message_id.clone(),
        };

        if conversation.owner_id.is_some() {
            let user = conversation.find_message(user_message_id).cloned();
            let assistant = conversation.find_message(&assistant_message_id).cloned();
            let session_title = conversation
                .title_is_auto
                .then(|| conversation.title.clone());
            drop(store);
            if let (Some(user), Some(assistant)) = (user, assistant) {
                self.persist_exchange(conversation_id, user, assistant, session_title);
            }
        }

        outcome
    }

    /// Fire-and-forget persistence of a completed exchange, followed by
    /// transient-image upload once the message row exists. The queue runs
    /// tasks in order, so the image task sees a saved row.
    fn persist_exchange(
        &self,
        conversation_id: &str,
        user: Message,
        assistant: Message,
        session_title: Option<String>,
    ) {
        let attachment_ids = (!user.attachment_ids.is_empty())
            .then(|| user.attachment_ids.clone());
        let assistant_id = assistant.id.clone();
        let transient_images: Vec<String> = assistant
            .images
            .iter()
            .filter_map(|img| img.data.clone())
            .collect();

        let save_request = SaveMessagesRequest {
            messages: vec![user, assistant],
            session_id: conversation_id.to_string(),
            session_title,
            attachment_ids,
        };
        let api = self.api.clone();
        self.queue.enqueue("persist-messages", async move {
            api.save_messages(&save_request).await?;
            Ok(())
        });

        if transient_images.is_empty() {
            return;
        }
        let api = self.api.clone();
        let store = self.store.clone();
        let request = PersistImagesRequest {
            session_id: conversation_id.to_string(),
            message_id: assistant_id.clone(),
            images: transient_images,
        };
        let conversation_id = conversation_id.to_string();
        self.queue.enqueue("persist-images", async move {
            let persisted = api.persist_images(&request).await?;
            // Swap inline payloads for durable references.
            let mut store = store.lock();
            if let Some(conversation) = store.get_mut(&conversation_id) {
                conversation.amend_message(&assistant_id, |message| {
                    for (image, durable) in message
                        .images
                        .iter_mut()
                        .filter(|img| img.is_transient())
                        .zip(persisted.images)
                    {
                        image.url = Some(durable.url);
                        image.strip_inline_data();
                    }
                });
            }
            Ok(())
        });
    }
}

//! Google Cloud Pub/Sub adapter over the v1 REST API.
//!
//! Receiving is pull based: each pull leases a batch of messages, the batch is
//! handed to the callback with bounded concurrency and the resulting
//! ack/nack decisions are flushed by a dispatcher task in batches. While a
//! batch is being processed, the leases of its undecided messages are
//! extended periodically.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::{StreamExt, stream};
use gcp_auth::TokenProvider;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        watch,
    },
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    broker::{
        AckReply, BrokerError, Disposition, Message, MessageCallback, PubSubClient, Subscription,
        SubscriptionIterator, Topic,
    },
    config::Config,
    models::{
        pubsub::{
            AcknowledgeRequest, GoogleErrorResponse, ListSubscriptionsResponse,
            ModifyAckDeadlineRequest, PubsubMessage, PullRequest, PullResponse, ReceivedMessage,
            SubscriptionResource, TopicPublishRequest, TopicPublishResponse,
        },
        retry::RetryConfig,
    },
    utils::{retry_with_backoff, wait_for_shutdown},
};

const PUBSUB_SCOPES: &[&str] = &["https://www.googleapis.com/auth/pubsub"];
const MAX_ACK_BATCH: usize = 500;
const MIN_ACK_DEADLINE_SECONDS: u32 = 10;
const MAX_ACK_DEADLINE_SECONDS: u32 = 600;

#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    pub max_messages: u32,
    pub max_outstanding: usize,
    pub empty_pull_delay: Duration,
    pub ack_deadline_seconds: u32,
    pub retry: RetryConfig,
}

impl ReceiveSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_messages: config.pull_max_messages.max(1),
            max_outstanding: config.max_outstanding_messages.max(1),
            empty_pull_delay: config.empty_pull_delay(),
            ack_deadline_seconds: config
                .ack_deadline_seconds
                .clamp(MIN_ACK_DEADLINE_SECONDS, MAX_ACK_DEADLINE_SECONDS),
            retry: config.retry_config(),
        }
    }
}

struct RestTransport {
    http_client: Client,
    endpoint: String,
    project_id: String,
    auth: Option<Arc<dyn TokenProvider>>,
}

impl RestTransport {
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BrokerError> {
        let url = format!("{}/v1/{}", self.endpoint, path);
        let mut request = self.http_client.request(method, url);

        if let Some(provider) = &self.auth {
            let token = provider.token(PUBSUB_SCOPES).await?;
            request = request.bearer_auth(token.as_str());
        }

        Ok(request)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, BrokerError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.request(Method::POST, path).await?.json(body);
        send(request).await
    }

    fn subscription_path(&self, id: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.project_id, id)
    }

    fn topic_path(&self, id: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, id)
    }

    async fn list_subscriptions(
        &self,
        page_token: Option<&str>,
    ) -> Result<ListSubscriptionsResponse, BrokerError> {
        let path = format!("projects/{}/subscriptions", self.project_id);
        let mut request = self.request(Method::GET, &path).await?;

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        send(request).await
    }

    async fn pull(&self, path: &str, max_messages: u32) -> Result<PullResponse, BrokerError> {
        self.post(&format!("{}:pull", path), &PullRequest { max_messages })
            .await
    }

    async fn acknowledge(&self, path: &str, ack_ids: Vec<String>) -> Result<(), BrokerError> {
        let _: serde_json::Value = self
            .post(&format!("{}:acknowledge", path), &AcknowledgeRequest { ack_ids })
            .await?;
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        path: &str,
        ack_ids: Vec<String>,
        ack_deadline_seconds: u32,
    ) -> Result<(), BrokerError> {
        let request = ModifyAckDeadlineRequest {
            ack_ids,
            ack_deadline_seconds,
        };
        let _: serde_json::Value = self
            .post(&format!("{}:modifyAckDeadline", path), &request)
            .await?;
        Ok(())
    }
}

async fn send<R: DeserializeOwned>(request: RequestBuilder) -> Result<R, BrokerError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let message = serde_json::from_slice::<GoogleErrorResponse>(&body)
            .ok()
            .map(|parsed| parsed.error.message)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());

        return Err(BrokerError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let body: &[u8] = if body.is_empty() { b"{}" } else { &body };
    serde_json::from_slice(body).map_err(|e| BrokerError::InvalidResponse(e.to_string()))
}

pub struct PubSubRestClient {
    transport: Arc<RestTransport>,
    settings: ReceiveSettings,
}

impl PubSubRestClient {
    pub async fn connect(config: &Config) -> Result<Self, BrokerError> {
        let emulator_host = config
            .pubsub_emulator_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty());

        let (endpoint, auth) = match emulator_host {
            Some(host) => {
                info!(host, "Using Pub/Sub emulator, authentication disabled");
                let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
                    host.to_string()
                } else {
                    format!("http://{}", host)
                };
                (endpoint, None)
            }
            None => {
                let provider = gcp_auth::provider().await?;
                (config.pubsub_endpoint.clone(), Some(provider))
            }
        };

        let transport = RestTransport {
            http_client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            auth,
        };

        info!(
            project_id = %config.project_id,
            endpoint = %transport.endpoint,
            "Pub/Sub client initialized"
        );

        Ok(Self {
            transport: Arc::new(transport),
            settings: ReceiveSettings::from_config(config),
        })
    }
}

impl PubSubClient for PubSubRestClient {
    fn subscriptions(&self) -> Box<dyn SubscriptionIterator> {
        Box::new(PubSubSubscriptionIterator {
            transport: Arc::clone(&self.transport),
            settings: self.settings.clone(),
            buffered: VecDeque::new(),
            next_page_token: None,
            exhausted: false,
        })
    }

    fn topic(&self, id: &str) -> Arc<dyn Topic> {
        Arc::new(PubSubTopic {
            id: id.to_string(),
            path: self.transport.topic_path(id),
            transport: Arc::clone(&self.transport),
        })
    }
}

struct PubSubSubscriptionIterator {
    transport: Arc<RestTransport>,
    settings: ReceiveSettings,
    buffered: VecDeque<SubscriptionResource>,
    next_page_token: Option<String>,
    exhausted: bool,
}

#[async_trait]
impl SubscriptionIterator for PubSubSubscriptionIterator {
    async fn next(&mut self) -> Result<Option<Arc<dyn Subscription>>, BrokerError> {
        loop {
            if let Some(resource) = self.buffered.pop_front() {
                let id = resource.short_id().to_string();
                let subscription = PubSubSubscription {
                    path: self.transport.subscription_path(&id),
                    id,
                    transport: Arc::clone(&self.transport),
                    settings: self.settings.clone(),
                };
                return Ok(Some(Arc::new(subscription)));
            }

            if self.exhausted {
                return Ok(None);
            }

            let page = self
                .transport
                .list_subscriptions(self.next_page_token.as_deref())
                .await?;

            self.buffered.extend(page.subscriptions);
            self.next_page_token = page.next_page_token.filter(|token| !token.is_empty());
            self.exhausted = self.next_page_token.is_none();
        }
    }
}

struct PubSubSubscription {
    id: String,
    path: String,
    transport: Arc<RestTransport>,
    settings: ReceiveSettings,
}

impl PubSubSubscription {
    async fn receive_loop(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        callback: &MessageCallback,
        replies: &UnboundedSender<AckReply>,
    ) -> Result<(), BrokerError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let pulled = tokio::select! {
                _ = wait_for_shutdown(shutdown) => return Ok(()),
                pulled = retry_with_backoff(&self.settings.retry, || {
                    self.transport.pull(&self.path, self.settings.max_messages)
                }) => pulled?,
            };

            if pulled.received_messages.is_empty() {
                tokio::select! {
                    _ = wait_for_shutdown(shutdown) => return Ok(()),
                    _ = sleep(self.settings.empty_pull_delay) => {}
                }
                continue;
            }

            debug!(
                subscription = %self.id,
                count = pulled.received_messages.len(),
                "Pulled messages"
            );

            let messages: Vec<Message> = pulled
                .received_messages
                .into_iter()
                .filter_map(|received| self.lease_message(received, replies))
                .collect();

            self.process_batch(messages, callback).await;
        }
    }

    /// Runs the callbacks for one pulled batch. The first lease extension goes
    /// out as soon as the batch starts, then every half deadline until every
    /// callback has returned.
    async fn process_batch(&self, messages: Vec<Message>, callback: &MessageCallback) {
        let outstanding: Mutex<HashSet<String>> = Mutex::new(
            messages
                .iter()
                .map(|message| message.ack_id().to_string())
                .collect(),
        );

        let processing = stream::iter(messages).for_each_concurrent(
            self.settings.max_outstanding,
            |message| {
                let ack_id = message.ack_id().to_string();
                let outstanding = &outstanding;
                async move {
                    callback(message).await;
                    outstanding
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&ack_id);
                }
            },
        );

        tokio::select! {
            _ = processing => {}
            _ = self.keep_leases_alive(&outstanding) => {}
        }
    }

    async fn keep_leases_alive(&self, outstanding: &Mutex<HashSet<String>>) {
        let period = Duration::from_secs(u64::from(self.settings.ack_deadline_seconds / 2));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.extend_leases(outstanding).await;
        }
    }

    async fn extend_leases(&self, outstanding: &Mutex<HashSet<String>>) {
        let ack_ids: Vec<String> = outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        if ack_ids.is_empty() {
            return;
        }

        let count = ack_ids.len();
        match self
            .transport
            .modify_ack_deadline(&self.path, ack_ids, self.settings.ack_deadline_seconds)
            .await
        {
            Ok(()) => debug!(subscription = %self.id, count, "Message leases extended"),
            Err(e) => warn!(subscription = %self.id, count, error = %e, "Lease extension failed"),
        }
    }

    fn lease_message(
        &self,
        received: ReceivedMessage,
        replies: &UnboundedSender<AckReply>,
    ) -> Option<Message> {
        let ReceivedMessage { ack_id, message } = received;

        match STANDARD.decode(message.data.as_bytes()) {
            Ok(data) => Some(
                Message::new(message.message_id, ack_id, data, replies.clone())
                    .with_attributes(message.attributes)
                    .with_publish_time(message.publish_time),
            ),
            Err(e) => {
                warn!(
                    subscription = %self.id,
                    message_id = %message.message_id,
                    error = %e,
                    "Message data is not valid base64, requesting redelivery"
                );
                let _ = replies.send(AckReply {
                    ack_id,
                    disposition: Disposition::Nack,
                });
                None
            }
        }
    }
}

#[async_trait]
impl Subscription for PubSubSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn receive(
        &self,
        mut shutdown: watch::Receiver<bool>,
        callback: MessageCallback,
    ) -> Result<(), BrokerError> {
        info!(subscription = %self.id, "Receiving messages");

        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_replies(
            Arc::clone(&self.transport),
            self.path.clone(),
            replies_rx,
        ));

        let result = self
            .receive_loop(&mut shutdown, &callback, &replies_tx)
            .await;

        drop(replies_tx);
        if let Err(e) = dispatcher.await {
            warn!(subscription = %self.id, error = %e, "Ack dispatcher terminated abnormally");
        }

        info!(subscription = %self.id, "Stopped receiving messages");

        result
    }
}

async fn dispatch_replies(
    transport: Arc<RestTransport>,
    path: String,
    mut replies: UnboundedReceiver<AckReply>,
) {
    while let Some(first) = replies.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_ACK_BATCH {
            match replies.try_recv() {
                Ok(reply) => batch.push(reply),
                Err(_) => break,
            }
        }

        let (acks, nacks): (Vec<AckReply>, Vec<AckReply>) = batch
            .into_iter()
            .partition(|reply| reply.disposition == Disposition::Ack);

        if !acks.is_empty() {
            let ack_ids: Vec<String> = acks.into_iter().map(|reply| reply.ack_id).collect();
            let count = ack_ids.len();
            match transport.acknowledge(&path, ack_ids).await {
                Ok(()) => debug!(subscription = %path, count, "Messages acknowledged"),
                Err(e) => warn!(subscription = %path, count, error = %e, "Acknowledge failed"),
            }
        }

        if !nacks.is_empty() {
            let ack_ids: Vec<String> = nacks.into_iter().map(|reply| reply.ack_id).collect();
            let count = ack_ids.len();
            match transport.modify_ack_deadline(&path, ack_ids, 0).await {
                Ok(()) => debug!(subscription = %path, count, "Messages returned for redelivery"),
                Err(e) => warn!(subscription = %path, count, error = %e, "Nack failed"),
            }
        }
    }
}

struct PubSubTopic {
    id: String,
    path: String,
    transport: Arc<RestTransport>,
}

#[async_trait]
impl Topic for PubSubTopic {
    fn id(&self) -> &str {
        &self.id
    }

    async fn publish(&self, data: Vec<u8>) -> Result<String, BrokerError> {
        let request = TopicPublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(&data),
                ..Default::default()
            }],
        };

        let response: TopicPublishResponse = self
            .transport
            .post(&format!("{}:publish", self.path), &request)
            .await?;

        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::InvalidResponse("publish returned no message id".into()))
    }
}

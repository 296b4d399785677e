//! `tonic` service binding (§4.6, expanded in SPEC_FULL §A.4): thin
//! proto <-> `Dispatcher` translation. Every unary RPC runs the dispatcher
//! call directly (it already hands blocking work off to `spawn_blocking`);
//! `Consume` streams the resolved payload straight off disk, and `Watch`
//! and `Lock` bridge a blocking session thread to the client stream over a
//! `tokio::sync::mpsc` channel, mirroring the teacher's single-RPC
//! `spawn_blocking` pattern generalized across the full surface.

use std::pin::Pin;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::errors::BrokerError;
use crate::lock_manager::LockRequest as ManagerLockRequest;
use crate::watcher::{WatchCommand, WatchEvent, WILDCARD_TOPIC};

pub mod proto {
    tonic::include_proto!("broker.v1");
}

use proto::{
    ConsumeRequest, ConsumeResponse, CreateTopicRequest, CreateTopicResponse, DeleteTopicRequest, DeleteTopicResponse,
    InspectTopicRequest, InspectTopicResponse, ListTopicsRequest, ListTopicsResponse, LockRequest, LockResponse,
    OffsetsRequest, OffsetsResponse, ProduceRequest, ProduceResponse, Status as WireStatus, TruncateTopicRequest,
    TruncateTopicResponse, WatchRequest, WatchUpdate as WireWatchUpdate,
    broker_server::{Broker, BrokerServer},
};

/// Translates a `BrokerError` into the `Status` envelope carried on every
/// response, so that application-level failures never surface as transport
/// errors (proto `Status` doc comment).
fn ok_status() -> WireStatus {
    WireStatus {
        ok: true,
        error_kind: String::new(),
        error_message: String::new(),
    }
}

fn err_status(error: &BrokerError) -> WireStatus {
    WireStatus {
        ok: false,
        error_kind: error.kind().to_string(),
        error_message: error.to_string(),
    }
}

pub struct BrokerService {
    dispatcher: std::sync::Arc<Dispatcher>,
}

impl BrokerService {
    pub fn new(dispatcher: std::sync::Arc<Dispatcher>) -> Self {
        BrokerService { dispatcher }
    }

    pub fn into_server(self) -> BrokerServer<Self> {
        BrokerServer::new(self)
    }
}

type ConsumeStream = Pin<Box<dyn Stream<Item = Result<ConsumeResponse, Status>> + Send + 'static>>;
type WatchStream = Pin<Box<dyn Stream<Item = Result<WireWatchUpdate, Status>> + Send + 'static>>;
type LockStream = Pin<Box<dyn Stream<Item = Result<LockResponse, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl Broker for BrokerService {
    #[instrument(skip(self, request))]
    async fn create_topic(&self, request: Request<CreateTopicRequest>) -> Result<Response<CreateTopicResponse>, Status> {
        let topic = request.into_inner().topic;
        let status = match self.dispatcher.create_topic(topic).await {
            Ok(()) => ok_status(),
            Err(error) => err_status(&error),
        };
        Ok(Response::new(CreateTopicResponse { status: Some(status) }))
    }

    #[instrument(skip(self, request))]
    async fn delete_topic(&self, request: Request<DeleteTopicRequest>) -> Result<Response<DeleteTopicResponse>, Status> {
        let topic = request.into_inner().topic;
        let status = match self.dispatcher.delete_topic(topic).await {
            Ok(()) => ok_status(),
            Err(error) => err_status(&error),
        };
        Ok(Response::new(DeleteTopicResponse { status: Some(status) }))
    }

    #[instrument(skip(self, request))]
    async fn list_topics(&self, request: Request<ListTopicsRequest>) -> Result<Response<ListTopicsResponse>, Status> {
        let request = request.into_inner();
        let response = match self
            .dispatcher
            .list_topics(request.prefix, request.suffix, request.regex)
            .await
        {
            Ok(topics) => ListTopicsResponse {
                status: Some(ok_status()),
                topics,
            },
            Err(error) => ListTopicsResponse {
                status: Some(err_status(&error)),
                topics: Vec::new(),
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request))]
    async fn inspect_topic(&self, request: Request<InspectTopicRequest>) -> Result<Response<InspectTopicResponse>, Status> {
        let topic = request.into_inner().topic;
        let response = match self.dispatcher.inspect_topic(topic).await {
            Ok(inspection) => InspectTopicResponse {
                status: Some(ok_status()),
                min_offset: inspection.min_offset,
                max_offset: inspection.max_offset,
                max_segment_entries: inspection.max_segment_entries,
                max_segment_bytes: inspection.max_segment_bytes.unwrap_or(0),
                segment_count: inspection.segment_count as u32,
            },
            Err(error) => InspectTopicResponse {
                status: Some(err_status(&error)),
                min_offset: 0,
                max_offset: 0,
                max_segment_entries: 0,
                max_segment_bytes: 0,
                segment_count: 0,
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request))]
    async fn truncate_topic(&self, request: Request<TruncateTopicRequest>) -> Result<Response<TruncateTopicResponse>, Status> {
        let request = request.into_inner();
        let response = match self.dispatcher.truncate_topic(request.topic, request.before_offset).await {
            Ok(new_min_offset) => TruncateTopicResponse {
                status: Some(ok_status()),
                new_min_offset,
            },
            Err(error) => TruncateTopicResponse {
                status: Some(err_status(&error)),
                new_min_offset: 0,
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request))]
    async fn offsets(&self, request: Request<OffsetsRequest>) -> Result<Response<OffsetsResponse>, Status> {
        let topic = request.into_inner().topic;
        let response = match self.dispatcher.offsets(topic).await {
            Ok((min_offset, max_offset)) => OffsetsResponse {
                status: Some(ok_status()),
                min_offset,
                max_offset,
            },
            Err(error) => OffsetsResponse {
                status: Some(err_status(&error)),
                min_offset: 0,
                max_offset: 0,
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), fields(body_len))]
    async fn produce(&self, request: Request<ProduceRequest>) -> Result<Response<ProduceResponse>, Status> {
        let request = request.into_inner();
        let response = match self.dispatcher.produce(request.topic, request.sizes, request.body).await {
            Ok(first_offset) => ProduceResponse {
                status: Some(ok_status()),
                first_offset,
            },
            Err(error) => ProduceResponse {
                status: Some(err_status(&error)),
                first_offset: 0,
            },
        };
        Ok(Response::new(response))
    }

    type ConsumeStream = ConsumeStream;

    #[instrument(skip(self, request))]
    async fn consume(&self, request: Request<ConsumeRequest>) -> Result<Response<Self::ConsumeStream>, Status> {
        let request = request.into_inner();
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        match self.dispatcher.consume(request.topic, request.offset, request.max_batch).await {
            Ok(plan) => {
                let _ = tx
                    .send(Ok(ConsumeResponse {
                        status: Some(ok_status()),
                        sizes: plan.sizes.clone(),
                        chunk: Vec::new(),
                    }))
                    .await;

                tokio::spawn(async move {
                    let total: u64 = plan.sizes.iter().sum::<i64>() as u64;
                    if total == 0 {
                        return;
                    }
                    let mut file = match tokio::fs::File::open(&plan.data_file_path).await {
                        Ok(file) => file,
                        Err(error) => {
                            let _ = tx.send(Err(Status::from(&BrokerError::Io(error)))).await;
                            return;
                        }
                    };
                    if let Err(error) = file.seek(std::io::SeekFrom::Start(plan.byte_pos)).await {
                        let _ = tx.send(Err(Status::from(&BrokerError::Io(error)))).await;
                        return;
                    }

                    let mut chunks = ReaderStream::new(file.take(total));
                    while let Some(chunk) = chunks.next().await {
                        let sent = match chunk {
                            Ok(bytes) => {
                                tx.send(Ok(ConsumeResponse {
                                    status: None,
                                    sizes: Vec::new(),
                                    chunk: bytes.to_vec(),
                                }))
                                .await
                            }
                            Err(error) => tx.send(Err(Status::from(&BrokerError::Io(error)))).await,
                        };
                        if sent.is_err() {
                            return;
                        }
                    }
                });
            }
            Err(error) => {
                let _ = tx
                    .send(Ok(ConsumeResponse {
                        status: Some(err_status(&error)),
                        sizes: Vec::new(),
                        chunk: Vec::new(),
                    }))
                    .await;
            }
        }

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    type WatchStream = WatchStream;

    #[instrument(skip(self, request))]
    async fn watch(&self, request: Request<Streaming<WatchRequest>>) -> Result<Response<Self::WatchStream>, Status> {
        let mut inbound = request.into_inner();
        let watcher = std::sync::Arc::clone(self.dispatcher.watcher());

        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel(32);
        let (event_tx, event_rx) = tokio::sync::mpsc::channel(32);

        let first = match inbound.message().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                return Err(Status::invalid_argument("watch stream closed before first request"));
            }
            Err(status) => return Err(status),
        };
        let initial_topics = topics_for(&first);

        tokio::task::spawn_blocking(move || {
            watcher.run_session(initial_topics, cmd_rx, event_tx);
        });

        tokio::spawn(async move {
            while let Ok(Some(request)) = inbound.message().await {
                if request.terminate {
                    let _ = cmd_tx.send(WatchCommand::Terminate).await;
                    break;
                }
                if !request.unsubscribe.is_empty() && cmd_tx.send(WatchCommand::Unsubscribe(request.unsubscribe)).await.is_err() {
                    break;
                }
                let subscribe = topics_for(&request);
                if !subscribe.is_empty() && cmd_tx.send(WatchCommand::Subscribe(subscribe)).await.is_err() {
                    break;
                }
            }
        });

        let outbound = ReceiverStream::new(event_rx).map(|event| {
            Ok(match event {
                WatchEvent::Update(update) => WireWatchUpdate {
                    status: Some(ok_status()),
                    topic: update.topic,
                    min_offset: update.min,
                    max_offset: update.max,
                },
                WatchEvent::TopicError { topic, message } => WireWatchUpdate {
                    status: Some(WireStatus {
                        ok: false,
                        error_kind: "topic-does-not-exist".to_string(),
                        error_message: message,
                    }),
                    topic,
                    min_offset: 0,
                    max_offset: 0,
                },
            })
        });

        Ok(Response::new(Box::pin(outbound)))
    }

    type LockStream = LockStream;

    #[instrument(skip(self, request))]
    async fn lock(&self, request: Request<Streaming<LockRequest>>) -> Result<Response<Self::LockStream>, Status> {
        let mut inbound = request.into_inner();
        let lock_manager = std::sync::Arc::clone(self.dispatcher.lock_manager());
        let session = lock_manager.new_session();

        let (response_tx, response_rx) = tokio::sync::mpsc::channel(32);

        tokio::spawn(async move {
            while let Ok(Some(request)) = inbound.message().await {
                let lock_manager = std::sync::Arc::clone(&lock_manager);
                let group = request.group;
                let manager_request = ManagerLockRequest {
                    acquire: request.acquire,
                    ttl_ms: request.ttl_ms,
                };
                let response = tokio::task::spawn_blocking(move || lock_manager.handle(session, &group, manager_request)).await;
                match response {
                    Ok(response) => {
                        if response_tx.send(Ok(LockResponse { locked: response.locked })).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "lock session task failed");
                        break;
                    }
                }
            }
            info!(session, "lock session ended");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(response_rx))))
    }
}

fn topics_for(request: &WatchRequest) -> Vec<String> {
    let mut topics = request.topics.clone();
    if request.wildcard {
        topics.push(WILDCARD_TOPIC.to_string());
    }
    topics
}

//! gRPC Service Implementation for xDS
//!
//! This module provides the tonic gRPC service for the state-of-the-world
//! Aggregated Discovery Service. The server glue is written out by hand in
//! the shape tonic's code generator produces, so no protoc is needed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::error::MeshError;
use crate::server::{StreamSession, XdsServer};
use crate::xds::proto::{DiscoveryRequest, DiscoveryResponse};

pub use aggregated_discovery_service_server::{AggregatedDiscoveryService, AggregatedDiscoveryServiceServer};

pub const ADS_SERVICE_NAME: &str = "envoy.service.discovery.v3.AggregatedDiscoveryService";
pub const STREAM_AGGREGATED_RESOURCES_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

/// Outbound responses buffered per stream
const STREAM_BUFFER: usize = 16;

type ResponseStream = Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, Status>> + Send>>;
type ResponseSender = mpsc::Sender<Result<DiscoveryResponse, Status>>;

/// Aggregated Discovery Service implementation
pub struct AggregatedDiscoveryServiceImpl {
    xds_server: Arc<XdsServer>,
}

impl AggregatedDiscoveryServiceImpl {
    pub fn new(xds_server: Arc<XdsServer>) -> Self {
        Self { xds_server }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscoveryServiceImpl {
    type StreamAggregatedResourcesStream = ResponseStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(run_stream(self.xds_server.clone(), inbound, tx));

        let output_stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(output_stream) as ResponseStream))
    }
}

/// Drive one ADS stream until the client goes away.
///
/// Waits on either the next client request or a new snapshot, and never
/// on a timer.
pub async fn run_stream<S>(xds_server: Arc<XdsServer>, mut inbound: S, tx: ResponseSender)
where
    S: Stream<Item = Result<DiscoveryRequest, Status>> + Unpin,
{
    let stream_id = xds_server.register_stream();
    let mut session = StreamSession::new(stream_id, xds_server.server_id());
    let mut snapshots = xds_server.subscribe();

    'stream: loop {
        tokio::select! {
            request = inbound.next() => match request {
                Some(Ok(request)) => {
                    debug!(
                        stream_id,
                        type_url = %request.type_url,
                        version = %request.version_info,
                        nonce = %request.response_nonce,
                        "Received xDS request"
                    );
                    let had_node = session.node_id().is_some();
                    let snapshot = snapshots.borrow().clone();
                    let response = session.handle_request(&request, snapshot.as_deref());

                    if !had_node && let Some(node_id) = session.node_id() {
                        xds_server.set_stream_node(stream_id, node_id);
                    }
                    if let Some(response) = response
                        && !send_response(&xds_server, &tx, response).await
                    {
                        break 'stream;
                    }
                }
                Some(Err(status)) => {
                    debug!(stream_id, error = %status, "Error receiving xDS request");
                    break 'stream;
                }
                None => break 'stream,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break 'stream;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    for response in session.handle_snapshot(&snapshot) {
                        if !send_response(&xds_server, &tx, response).await {
                            break 'stream;
                        }
                    }
                }
            }
        }
    }

    xds_server.unregister_stream(stream_id);
}

async fn send_response(xds_server: &XdsServer, tx: &ResponseSender, response: DiscoveryResponse) -> bool {
    if tx.send(Ok(response)).await.is_err() {
        return false;
    }
    xds_server.record_response();
    true
}

/// Create the tonic service for an xDS server
pub fn create_ads_service(
    xds_server: Arc<XdsServer>,
) -> AggregatedDiscoveryServiceServer<AggregatedDiscoveryServiceImpl> {
    AggregatedDiscoveryServiceServer::new(AggregatedDiscoveryServiceImpl::new(xds_server))
}

/// Serve ADS on an already bound listener until `shutdown` resolves
pub async fn serve_xds_grpc<F>(xds_server: Arc<XdsServer>, listener: TcpListener, shutdown: F) -> Result<(), MeshError>
where
    F: Future<Output = ()> + Send,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Starting xDS gRPC server");

    tonic::transport::Server::builder()
        .add_service(create_ads_service(xds_server))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;

    info!(addr = %addr, "xDS gRPC server stopped");
    Ok(())
}

pub mod aggregated_discovery_service_server {
    use tonic::codegen::*;

    use super::{ADS_SERVICE_NAME, STREAM_AGGREGATED_RESOURCES_PATH};
    use crate::xds::proto::{DiscoveryRequest, DiscoveryResponse};

    /// Server-side ADS contract
    #[async_trait]
    pub trait AggregatedDiscoveryService: Send + Sync + 'static {
        /// Server streaming response type for StreamAggregatedResources
        type StreamAggregatedResourcesStream: tokio_stream::Stream<Item = Result<DiscoveryResponse, tonic::Status>>
            + Send
            + 'static;

        /// Full-state streaming aggregated discovery
        async fn stream_aggregated_resources(
            &self,
            request: tonic::Request<tonic::Streaming<DiscoveryRequest>>,
        ) -> Result<tonic::Response<Self::StreamAggregatedResourcesStream>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct AggregatedDiscoveryServiceServer<T> {
        inner: Arc<T>,
    }

    impl<T> AggregatedDiscoveryServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T, B> Service<http::Request<B>> for AggregatedDiscoveryServiceServer<T>
    where
        T: AggregatedDiscoveryService,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::Body>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                STREAM_AGGREGATED_RESOURCES_PATH => {
                    struct StreamAggregatedResourcesSvc<T: AggregatedDiscoveryService>(pub Arc<T>);

                    impl<T: AggregatedDiscoveryService> tonic::server::StreamingService<DiscoveryRequest>
                        for StreamAggregatedResourcesSvc<T>
                    {
                        type Response = DiscoveryResponse;
                        type ResponseStream = T::StreamAggregatedResourcesStream;
                        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

                        fn call(&mut self, request: tonic::Request<tonic::Streaming<DiscoveryRequest>>) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as AggregatedDiscoveryService>::stream_aggregated_resources(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }

                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = StreamAggregatedResourcesSvc(inner);
                        let codec = tonic_prost::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        let res = grpc.streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                // DeltaAggregatedResources and anything else
                _ => Box::pin(async move {
                    let mut response = http::Response::new(tonic::body::Body::default());
                    let headers = response.headers_mut();
                    headers.insert(tonic::Status::GRPC_STATUS, (tonic::Code::Unimplemented as i32).into());
                    headers.insert(http::header::CONTENT_TYPE, tonic::metadata::GRPC_CONTENT_TYPE);
                    Ok(response)
                }),
            }
        }
    }

    impl<T> Clone for AggregatedDiscoveryServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }

    impl<T> tonic::server::NamedService for AggregatedDiscoveryServiceServer<T> {
        const NAME: &'static str = ADS_SERVICE_NAME;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::build_cluster;
    use crate::server::XdsServerConfig;
    use crate::snapshot::SnapshotResources;
    use crate::xds::ResourceType;
    use crate::xds::proto::Node;

    fn request(resource_type: ResourceType, version: &str, nonce: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: version.to_string(),
            node: Some(Node {
                id: "envoy-1".to_string(),
                ..Default::default()
            }),
            type_url: resource_type.type_url().to_string(),
            response_nonce: nonce.to_string(),
            ..Default::default()
        }
    }

    fn clusters(names: &[&str]) -> SnapshotResources {
        let mut resources = SnapshotResources::new();
        for name in names {
            resources.add_cluster(build_cluster(name, 80));
        }
        resources
    }

    async fn next(rx: &mut mpsc::Receiver<Result<DiscoveryResponse, Status>>) -> DiscoveryResponse {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for response")
            .expect("stream closed")
            .expect("error status")
    }

    #[tokio::test]
    async fn test_stream_pushes_new_snapshots() {
        let server = Arc::new(XdsServer::new(XdsServerConfig::default()));
        server.update_snapshot(clusters(&["web"]));

        let (req_tx, req_rx) = mpsc::channel(8);
        let (resp_tx, mut resp_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_stream(server.clone(), ReceiverStream::new(req_rx), resp_tx));

        req_tx.send(Ok(request(ResourceType::Cluster, "", ""))).await.unwrap();
        let first = next(&mut resp_rx).await;
        assert_eq!(first.version_info, server.snapshot_version(1));
        assert_eq!(first.resources.len(), 1);

        // ACK parks the type
        req_tx
            .send(Ok(request(ResourceType::Cluster, &first.version_info, &first.nonce)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(resp_rx.try_recv().is_err());
        assert_eq!(server.stats().connected_nodes, vec!["envoy-1".to_string()]);

        server.update_snapshot(clusters(&["web", "db"]));
        let second = next(&mut resp_rx).await;
        assert_eq!(second.version_info, server.snapshot_version(2));
        assert_eq!(second.resources.len(), 2);

        drop(req_tx);
        handle.await.unwrap();
        assert_eq!(server.stats().active_streams, 0);
    }

    #[tokio::test]
    async fn test_stream_survives_unknown_type() {
        let server = Arc::new(XdsServer::new(XdsServerConfig::default()));
        server.update_snapshot(clusters(&["web"]));

        let (req_tx, req_rx) = mpsc::channel(8);
        let (resp_tx, mut resp_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_stream(server.clone(), ReceiverStream::new(req_rx), resp_tx));

        let mut bogus = request(ResourceType::Cluster, "", "");
        bogus.type_url = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration".to_string();
        req_tx.send(Ok(bogus)).await.unwrap();
        req_tx.send(Ok(request(ResourceType::Listener, "", ""))).await.unwrap();

        let response = next(&mut resp_rx).await;
        assert_eq!(response.type_url, ResourceType::Listener.type_url());
        assert!(response.resources.is_empty());

        drop(req_tx);
        handle.await.unwrap();
    }
}

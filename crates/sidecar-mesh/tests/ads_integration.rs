//! ADS end to end: catalog, sync bridge, tonic server and a streaming client

use std::sync::Arc;
use std::time::Duration;

use http::uri::PathAndQuery;
use prost::Message;
use sidecar_catalog::{Catalog, Listener, Port, Service};
use sidecar_mesh::grpc::STREAM_AGGREGATED_RESOURCES_PATH;
use sidecar_mesh::xds::ResourceType;
use sidecar_mesh::xds::proto::{self, DiscoveryRequest, DiscoveryResponse, Node};
use sidecar_mesh::{CatalogSyncBridge, SyncBridgeConfig, XdsServer, XdsServerConfig, serve_xds_grpc};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Streaming};
use tonic_prost::ProstCodec;

const DELTA_PATH: &str = "/envoy.service.discovery.v3.AggregatedDiscoveryService/DeltaAggregatedResources";

struct Harness {
    catalog: Arc<Catalog>,
    xds_server: Arc<XdsServer>,
    bridge: Arc<CatalogSyncBridge>,
    channel: Channel,
    shutdown_tx: oneshot::Sender<()>,
    server_handle: tokio::task::JoinHandle<()>,
}

async fn start() -> Harness {
    let catalog = Arc::new(Catalog::new("node-a"));
    for (id, port) in [("aaa", 9991), ("bbb", 9990)] {
        catalog.update(Service::new(id, "bocaccio", "node-b").with_port(Port::tcp("10.0.0.5", port, 10100)));
    }

    let xds_server = Arc::new(XdsServer::new(XdsServerConfig::default()));
    let bridge = Arc::new(CatalogSyncBridge::new(
        xds_server.clone(),
        SyncBridgeConfig {
            bind_ip: "192.168.168.168".to_string(),
        },
    ));
    bridge.clone().watch(catalog.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let served = xds_server.clone();
    let server_handle = tokio::spawn(async move {
        serve_xds_grpc(served, listener, async {
            let _ = shutdown_rx.await;
        })
        .await
        .unwrap();
    });

    let channel = Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();

    Harness {
        catalog,
        xds_server,
        bridge,
        channel,
        shutdown_tx,
        server_handle,
    }
}

async fn open_stream(
    channel: Channel,
    path: &'static str,
) -> Result<(mpsc::Sender<DiscoveryRequest>, Streaming<DiscoveryResponse>), tonic::Status> {
    let (tx, rx) = mpsc::channel(8);
    let mut client = tonic::client::Grpc::new(channel);
    client.ready().await.unwrap();
    let response = client
        .streaming(
            Request::new(ReceiverStream::new(rx)),
            PathAndQuery::from_static(path),
            ProstCodec::<DiscoveryRequest, DiscoveryResponse>::default(),
        )
        .await?;
    Ok((tx, response.into_inner()))
}

fn request(resource_type: ResourceType, version: &str, nonce: &str, names: &[&str]) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: version.to_string(),
        node: Some(Node {
            id: "envoy-1".to_string(),
            cluster: "bocaccio".to_string(),
            ..Default::default()
        }),
        resource_names: names.iter().map(|n| n.to_string()).collect(),
        type_url: resource_type.type_url().to_string(),
        response_nonce: nonce.to_string(),
        ..Default::default()
    }
}

async fn next(stream: &mut Streaming<DiscoveryResponse>) -> DiscoveryResponse {
    tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("timed out waiting for a discovery response")
        .expect("stream failed")
        .expect("stream closed")
}

fn endpoint_ports(response: &DiscoveryResponse) -> Vec<u32> {
    response
        .resources
        .iter()
        .map(|any| proto::ClusterLoadAssignment::decode(any.value.as_slice()).unwrap())
        .flat_map(|cla| cla.endpoints)
        .flat_map(|locality| locality.lb_endpoints)
        .filter_map(|lb| lb.endpoint?.address?.socket_address)
        .map(|socket| socket.port_value)
        .collect()
}

async fn stop(harness: Harness) {
    harness.bridge.stop();
    drop(harness.channel);
    let _ = harness.shutdown_tx.send(());
    tokio::time::timeout(Duration::from_secs(5), harness.server_handle)
        .await
        .expect("server did not shut down")
        .unwrap();
}

#[tokio::test]
async fn test_ads_serves_and_updates_resources() {
    let harness = start().await;
    let v1 = harness.xds_server.snapshot_version(1);
    let (tx, mut responses) = open_stream(harness.channel.clone(), STREAM_AGGREGATED_RESOURCES_PATH)
        .await
        .unwrap();

    // CDS
    tx.send(request(ResourceType::Cluster, "", "", &[])).await.unwrap();
    let cds = next(&mut responses).await;
    assert_eq!(cds.type_url, ResourceType::Cluster.type_url());
    assert_eq!(cds.version_info, v1);
    let cluster = proto::Cluster::decode(cds.resources[0].value.as_slice()).unwrap();
    assert_eq!(cluster.name, "bocaccio-10100");
    assert!(cluster.load_assignment.is_none());
    tx.send(request(ResourceType::Cluster, &v1, &cds.nonce, &[])).await.unwrap();

    // EDS, both instances in ascending port order
    tx.send(request(ResourceType::Endpoint, "", "", &["bocaccio-10100"]))
        .await
        .unwrap();
    let eds = next(&mut responses).await;
    assert_eq!(eds.type_url, ResourceType::Endpoint.type_url());
    assert_eq!(endpoint_ports(&eds), vec![9990, 9991]);
    tx.send(request(ResourceType::Endpoint, &v1, &eds.nonce, &["bocaccio-10100"]))
        .await
        .unwrap();

    // LDS
    tx.send(request(ResourceType::Listener, "", "", &[])).await.unwrap();
    let lds = next(&mut responses).await;
    let listener = proto::Listener::decode(lds.resources[0].value.as_slice()).unwrap();
    let socket = listener.address.unwrap().socket_address.unwrap();
    assert_eq!(socket.address, "192.168.168.168");
    assert_eq!(socket.port_value, 10100);
    tx.send(request(ResourceType::Listener, &v1, &lds.nonce, &[])).await.unwrap();

    // Expiring the node empties every resource kind
    assert_eq!(harness.catalog.expire_node("node-b"), 2);

    let mut emptied = Vec::new();
    while emptied.len() < 3 {
        let response = next(&mut responses).await;
        assert_ne!(response.version_info, v1);
        if response.resources.is_empty() {
            emptied.push(response.type_url.clone());
        }
        tx.send(DiscoveryRequest {
            version_info: response.version_info.clone(),
            response_nonce: response.nonce.clone(),
            type_url: response.type_url.clone(),
            resource_names: if response.type_url == ResourceType::Endpoint.type_url() {
                vec!["bocaccio-10100".to_string()]
            } else {
                Vec::new()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    }
    emptied.sort();
    let mut expected: Vec<String> = ResourceType::ALL.iter().map(|t| t.type_url().to_string()).collect();
    expected.sort();
    assert_eq!(emptied, expected);

    drop(tx);
    drop(responses);
    stop(harness).await;
}

#[tokio::test]
async fn test_delta_ads_is_unimplemented() {
    let harness = start().await;

    match open_stream(harness.channel.clone(), DELTA_PATH).await {
        Err(status) => assert_eq!(status.code(), Code::Unimplemented),
        Ok(_) => panic!("delta stream should be rejected"),
    }

    stop(harness).await;
}

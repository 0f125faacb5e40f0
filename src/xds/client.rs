use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use enum_map::EnumMap;
use prost::Message;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tracing::trace;
use xds_api::pb::envoy::{
    config::{
        cluster::v3 as xds_cluster,
        core::v3::{self as xds_core, address::Address, socket_address::PortSpecifier},
        endpoint::v3::{self as xds_endpoint, lb_endpoint::HostIdentifier},
        listener::v3 as xds_listener,
        route::v3 as xds_route,
    },
    service::discovery::v3::{
        aggregated_discovery_service_client::AggregatedDiscoveryServiceClient, DiscoveryRequest,
        DiscoveryResponse,
    },
};

use crate::grpc_access;
use crate::xds::{NodeInfo, ResourceName, ResourceType};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("{} request timed out after {timeout:?}", .rtype.short_name())]
    Timeout {
        rtype: ResourceType,
        timeout: Duration,
    },

    #[error("discovery request failed: {0}")]
    Transport(#[from] tonic::Status),

    #[error("stream closed before a {} response arrived", .0.short_name())]
    StreamClosed(ResourceType),

    #[error("unexpected resource type: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("failed to decode {} resource: {source}", .rtype.short_name())]
    Decode {
        rtype: ResourceType,
        #[source]
        source: prost::DecodeError,
    },

    #[error("failed to look up subset tags: {0}")]
    SubsetTags(anyhow::Error),
}

impl DiscoveryError {
    /// `true` if the error means the connection to the control plane went
    /// away, as opposed to the control plane sending something wrong.
    pub fn is_connection_error(&self) -> bool {
        match self {
            DiscoveryError::Transport(status) => grpc_access::io_source(status).is_some(),
            DiscoveryError::StreamClosed(_) | DiscoveryError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// A single request/response exchange with a discovery server.
///
/// Connection errors are returned as-is. Retrying is up to whoever is
/// driving the client.
#[tonic::async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the first response. Returns `Ok(None)` if
    /// the server ends the stream without responding.
    async fn fetch(
        &self,
        request: DiscoveryRequest,
    ) -> Result<Option<DiscoveryResponse>, tonic::Status>;
}

/// A [Transport] over the Aggregated Discovery Service.
///
/// The underlying channel connects lazily and reconnects on its own. Each
/// fetch opens a fresh ADS stream on that channel.
#[derive(Clone)]
pub struct AdsTransport {
    client: AggregatedDiscoveryServiceClient<Channel>,
}

impl AdsTransport {
    pub fn connect_lazy(addr: &str) -> Result<Self, tonic::transport::Error> {
        let endpoint = Endpoint::from_shared(addr.to_string())?;
        let client = AggregatedDiscoveryServiceClient::new(endpoint.connect_lazy());
        Ok(Self { client })
    }
}

#[tonic::async_trait]
impl Transport for AdsTransport {
    async fn fetch(
        &self,
        request: DiscoveryRequest,
    ) -> Result<Option<DiscoveryResponse>, tonic::Status> {
        let mut client = self.client.clone();

        // keep the request half of the stream open until a response shows
        // up. some servers give up on a stream as soon as the client closes it.
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        if tx.send(request).await.is_err() {
            return Err(tonic::Status::internal("request channel closed"));
        }

        let mut responses = client
            .stream_aggregated_resources(ReceiverStream::new(rx))
            .await?
            .into_inner();
        let response = responses.message().await;
        drop(tx);

        response
    }
}

/// Looks up the labels that define a named subset of a service.
#[tonic::async_trait]
pub trait SubsetTags: Send + Sync {
    async fn subset_tags(
        &self,
        namespace: &str,
        service: &str,
        subset: &str,
    ) -> anyhow::Result<BTreeMap<String, String>>;
}

/// A [SubsetTags] that doesn't know about any subsets.
pub struct NoSubsetTags;

#[tonic::async_trait]
impl SubsetTags for NoSubsetTags {
    async fn subset_tags(
        &self,
        _namespace: &str,
        _service: &str,
        _subset: &str,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

/// The protocol state for a single resource type: the version and nonce of
/// the last response that was successfully decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub version_info: String,
    pub nonce: String,
}

/// A client for the discovery protocol.
///
/// Every resource type gets an independent [Cursor] behind its own lock, so
/// pulls for different types never wait on each other.
pub struct DiscoveryClient {
    node: xds_core::Node,
    transport: Box<dyn Transport>,
    subset_tags: Box<dyn SubsetTags>,
    timeout: Duration,
    cursors: EnumMap<ResourceType, RwLock<Cursor>>,
}

impl DiscoveryClient {
    pub fn new(
        node: &NodeInfo,
        transport: impl Transport + 'static,
        subset_tags: impl SubsetTags + 'static,
        timeout: Duration,
    ) -> Self {
        Self {
            node: node.to_xds(),
            transport: Box::new(transport),
            subset_tags: Box::new(subset_tags),
            timeout,
            cursors: EnumMap::default(),
        }
    }

    pub fn cursor(&self, rtype: ResourceType) -> Cursor {
        self.cursors[rtype]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version_info(&self, rtype: ResourceType) -> String {
        self.cursor(rtype).version_info
    }

    pub fn nonce(&self, rtype: ResourceType) -> String {
        self.cursor(rtype).nonce
    }

    fn set_cursor(&self, rtype: ResourceType, cursor: Cursor) {
        *self.cursors[rtype]
            .write()
            .unwrap_or_else(PoisonError::into_inner) = cursor;
    }

    /// List every cluster.
    pub async fn list_clusters(&self) -> Result<Vec<xds_cluster::Cluster>, DiscoveryError> {
        self.pull(ResourceType::Cluster, Vec::new()).await
    }

    /// Fetch the endpoints for a single cluster. A cluster the control plane
    /// doesn't return any endpoints for gets an empty assignment.
    pub async fn list_endpoints(
        &self,
        cluster_name: &str,
    ) -> Result<xds_endpoint::ClusterLoadAssignment, DiscoveryError> {
        let assignments: Vec<xds_endpoint::ClusterLoadAssignment> = self
            .pull(
                ResourceType::ClusterLoadAssignment,
                vec![cluster_name.to_string()],
            )
            .await?;

        Ok(find_or_empty(
            assignments,
            |cla| cla.cluster_name == cluster_name,
            || xds_endpoint::ClusterLoadAssignment {
                cluster_name: cluster_name.to_string(),
                ..Default::default()
            },
        ))
    }

    /// Fetch a single route configuration by name.
    pub async fn list_routes(
        &self,
        route_name: &str,
    ) -> Result<xds_route::RouteConfiguration, DiscoveryError> {
        let routes: Vec<xds_route::RouteConfiguration> = self
            .pull(
                ResourceType::RouteConfiguration,
                vec![route_name.to_string()],
            )
            .await?;

        Ok(find_or_empty(
            routes,
            |route| route.name == route_name,
            || xds_route::RouteConfiguration {
                name: route_name.to_string(),
                ..Default::default()
            },
        ))
    }

    /// List every listener.
    pub async fn list_listeners(&self) -> Result<Vec<xds_listener::Listener>, DiscoveryError> {
        self.pull(ResourceType::Listener, Vec::new()).await
    }

    pub async fn tags_for_subset(
        &self,
        namespace: &str,
        service: &str,
        subset: &str,
    ) -> Result<BTreeMap<String, String>, DiscoveryError> {
        self.subset_tags
            .subset_tags(namespace, service, subset)
            .await
            .map_err(DiscoveryError::SubsetTags)
    }

    /// The virtual hosts routing traffic for a cluster. Route configurations
    /// are named after their cluster and contain a virtual host named
    /// `service:port`.
    pub async fn virtual_hosts_for(
        &self,
        cluster_name: &str,
    ) -> Result<Vec<xds_route::VirtualHost>, DiscoveryError> {
        let Some(name) = ResourceName::parse(cluster_name) else {
            return Ok(Vec::new());
        };

        let route = self.list_routes(cluster_name).await?;
        let vhost_name = format!("{}:{}", name.service, name.port);

        Ok(route
            .virtual_hosts
            .into_iter()
            .filter(|vhost| vhost.name == vhost_name)
            .collect())
    }

    /// The upstream clusters that the routes for a cluster point at.
    pub async fn route_clusters(&self, cluster_name: &str) -> Result<Vec<String>, DiscoveryError> {
        use xds_route::{route::Action, route_action::ClusterSpecifier};

        let mut clusters = Vec::new();
        for vhost in self.virtual_hosts_for(cluster_name).await? {
            for route in vhost.routes {
                if let Some(Action::Route(action)) = route.action {
                    if let Some(ClusterSpecifier::Cluster(cluster)) = action.cluster_specifier {
                        clusters.push(cluster);
                    }
                }
            }
        }

        Ok(clusters)
    }

    async fn pull<T>(
        &self,
        rtype: ResourceType,
        resource_names: Vec<String>,
    ) -> Result<Vec<T>, DiscoveryError>
    where
        T: Message + Default,
    {
        let _timer = crate::metrics::scoped_timer!("xds.request_time", "xds_type" => rtype.short_name());

        let cursor = self.cursor(rtype);
        let request = DiscoveryRequest {
            version_info: cursor.version_info,
            response_nonce: cursor.nonce,
            node: Some(self.node.clone()),
            resource_names,
            type_url: rtype.type_url().to_string(),
            ..Default::default()
        };
        grpc_access::xds_discovery_request(&request);

        let result = match tokio::time::timeout(self.timeout, self.transport.fetch(request)).await
        {
            Err(_) => Err(DiscoveryError::Timeout {
                rtype,
                timeout: self.timeout,
            }),
            Ok(Err(status)) => Err(DiscoveryError::Transport(status)),
            Ok(Ok(None)) => Err(DiscoveryError::StreamClosed(rtype)),
            Ok(Ok(Some(response))) => {
                grpc_access::xds_discovery_response(&response);
                decode_response(rtype, &response).map(|resources| (response, resources))
            }
        };

        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("xds.requests", "xds_type" => rtype.short_name(), "result" => label)
            .increment(1);

        // only move the cursor forward once the whole response has been
        // decoded. anything else retries from the last good response.
        let (response, resources) = result?;
        trace!(
            ty = rtype.short_name(),
            v = response.version_info,
            n = response.nonce,
            "updating cursor",
        );
        self.set_cursor(
            rtype,
            Cursor {
                version_info: response.version_info,
                nonce: response.nonce,
            },
        );

        Ok(resources)
    }
}

fn decode_response<T>(rtype: ResourceType, response: &DiscoveryResponse) -> Result<Vec<T>, DiscoveryError>
where
    T: Message + Default,
{
    let expected = rtype.type_url();

    // the response type is optional on the wire but every resource must be
    // the type that was asked for.
    if !response.type_url.is_empty() && response.type_url != expected {
        return Err(DiscoveryError::TypeMismatch {
            expected,
            actual: response.type_url.clone(),
        });
    }

    let mut resources = Vec::with_capacity(response.resources.len());
    for any in &response.resources {
        if any.type_url != expected {
            return Err(DiscoveryError::TypeMismatch {
                expected,
                actual: any.type_url.clone(),
            });
        }

        let resource =
            T::decode(any.value.as_slice()).map_err(|source| DiscoveryError::Decode { rtype, source })?;
        resources.push(resource);
    }

    Ok(resources)
}

fn find_or_empty<T, P, E>(resources: Vec<T>, predicate: P, empty: E) -> T
where
    P: Fn(&T) -> bool,
    E: FnOnce() -> T,
{
    resources
        .into_iter()
        .find(predicate)
        .unwrap_or_else(empty)
}

/// The `address:port` of every endpoint in a load assignment, in order.
pub fn endpoint_addresses(assignment: &xds_endpoint::ClusterLoadAssignment) -> Vec<String> {
    let mut addrs = Vec::new();

    for locality in &assignment.endpoints {
        for lb_endpoint in &locality.lb_endpoints {
            let Some(HostIdentifier::Endpoint(endpoint)) = &lb_endpoint.host_identifier else {
                continue;
            };
            let Some(Address::SocketAddress(socket_addr)) =
                endpoint.address.as_ref().and_then(|a| a.address.as_ref())
            else {
                continue;
            };
            let port = match socket_addr.port_specifier {
                Some(PortSpecifier::PortValue(port)) => port,
                _ => 0,
            };

            addrs.push(format!("{}:{}", socket_addr.address, port));
        }
    }

    addrs
}

/// `true` if this is an original-destination cluster: traffic goes wherever
/// the caller was already going.
pub fn is_original_dst(cluster: &xds_cluster::Cluster) -> bool {
    use xds_cluster::cluster::{ClusterDiscoveryType, DiscoveryType};

    matches!(
        cluster.cluster_discovery_type,
        Some(ClusterDiscoveryType::Type(t)) if t == DiscoveryType::OriginalDst as i32
    )
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::xds::fake::{self, FakeControlPlane};
    use xds_api::pb::google::protobuf;

    fn client(cp: &Arc<FakeControlPlane>) -> DiscoveryClient {
        fake::client(cp, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_list_clusters_updates_cursor() {
        let cp = FakeControlPlane::new();
        cp.add_cluster(fake::eds_cluster("outbound|9080|v1|reviews.default.svc.cluster.local"));
        cp.add_cluster(fake::eds_cluster("BlackHoleCluster"));
        let client = client(&cp);

        assert_eq!(client.cursor(ResourceType::Cluster), Cursor::default());

        let clusters = client.list_clusters().await.unwrap();
        assert_eq!(clusters.len(), 2);

        let cursor = client.cursor(ResourceType::Cluster);
        assert_eq!(cursor.version_info, "1");
        assert_eq!(cursor.nonce, "1");

        // other types aren't touched
        assert_eq!(
            client.cursor(ResourceType::ClusterLoadAssignment),
            Cursor::default()
        );

        // the next request carries the acknowledged cursor
        client.list_clusters().await.unwrap();
        let requests = cp.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].version_info, "");
        assert_eq!(requests[0].response_nonce, "");
        assert_eq!(requests[1].version_info, "1");
        assert_eq!(requests[1].response_nonce, "1");
        assert_eq!(
            requests[1].node.as_ref().map(|n| n.id.as_str()),
            Some("sidecar~10.0.0.1~test-pod~default")
        );
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_cursor() {
        let cp = FakeControlPlane::new();
        cp.add_cluster(fake::eds_cluster("outbound|9080|v1|reviews.default.svc.cluster.local"));
        let client = client(&cp);

        client.list_clusters().await.unwrap();
        let before = client.cursor(ResourceType::Cluster);

        cp.script(Ok(Some(DiscoveryResponse {
            type_url: ResourceType::Cluster.type_url().to_string(),
            version_info: "garbage".to_string(),
            nonce: "garbage".to_string(),
            resources: vec![protobuf::Any {
                type_url: ResourceType::Cluster.type_url().to_string(),
                value: vec![0xff, 0xff, 0xff],
            }],
            ..Default::default()
        })));

        let err = client.list_clusters().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Decode { .. }), "{err:?}");
        assert_eq!(client.cursor(ResourceType::Cluster), before);
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let cp = FakeControlPlane::new();
        let client = client(&cp);

        cp.script(Ok(Some(DiscoveryResponse {
            type_url: ResourceType::Listener.type_url().to_string(),
            version_info: "7".to_string(),
            nonce: "7".to_string(),
            ..Default::default()
        })));

        let err = client.list_clusters().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::TypeMismatch { .. }), "{err:?}");
        assert_eq!(client.cursor(ResourceType::Cluster), Cursor::default());
    }

    #[tokio::test]
    async fn test_transport_error() {
        let cp = FakeControlPlane::new();
        let client = client(&cp);

        cp.script(Err(tonic::Status::unavailable("control plane is down")));
        let err = client.list_clusters().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Transport(_)));
        assert!(!err.is_connection_error());

        cp.script(Ok(None));
        let err = client.list_clusters().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::StreamClosed(ResourceType::Cluster)));
        assert!(err.is_connection_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let cp = FakeControlPlane::new();
        cp.stall();
        let client = fake::client(&cp, Duration::from_secs(2));

        let err = client.list_clusters().await.unwrap_err();
        assert!(
            matches!(err, DiscoveryError::Timeout { rtype: ResourceType::Cluster, .. }),
            "{err:?}"
        );
        assert_eq!(client.cursor(ResourceType::Cluster), Cursor::default());
    }

    #[tokio::test]
    async fn test_list_endpoints() {
        let cp = FakeControlPlane::new();
        let name = "outbound|9080|v1|reviews.default.svc.cluster.local";
        cp.add_assignment(fake::assignment(name, &[("10.0.0.1", 9080), ("10.0.0.2", 9080)]));
        let client = client(&cp);

        let cla = client.list_endpoints(name).await.unwrap();
        assert_eq!(cla.cluster_name, name);
        assert_eq!(
            endpoint_addresses(&cla),
            vec!["10.0.0.1:9080".to_string(), "10.0.0.2:9080".to_string()]
        );
        assert_eq!(cp.requests()[0].resource_names, vec![name.to_string()]);

        // a cluster nobody knows about is empty
        let cla = client.list_endpoints("outbound|1||nope.default").await.unwrap();
        assert_eq!(cla.cluster_name, "outbound|1||nope.default");
        assert!(endpoint_addresses(&cla).is_empty());
    }

    #[tokio::test]
    async fn test_route_clusters() {
        let cp = FakeControlPlane::new();
        let name = "outbound|9080||reviews.default.svc.cluster.local";
        cp.add_route(fake::route(
            name,
            &[
                ("reviews:9080", "outbound|9080|v1|reviews.default.svc.cluster.local"),
                ("ratings:9080", "outbound|9080|v1|ratings.default.svc.cluster.local"),
            ],
        ));
        let client = client(&cp);

        let vhosts = client.virtual_hosts_for(name).await.unwrap();
        assert_eq!(vhosts.len(), 1);
        assert_eq!(
            client.route_clusters(name).await.unwrap(),
            vec!["outbound|9080|v1|reviews.default.svc.cluster.local".to_string()]
        );
        assert_eq!(client.cursor(ResourceType::RouteConfiguration).nonce, "2");
    }

    #[tokio::test]
    async fn test_list_listeners() {
        let cp = FakeControlPlane::new();
        cp.add_listener(xds_listener::Listener {
            name: "0.0.0.0_80".to_string(),
            ..Default::default()
        });
        let client = client(&cp);

        let listeners = client.list_listeners().await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].name, "0.0.0.0_80");
        assert_eq!(client.version_info(ResourceType::Listener), "1");
        assert_eq!(client.nonce(ResourceType::Listener), "1");
    }

    #[test]
    fn test_is_original_dst() {
        assert!(is_original_dst(&fake::original_dst_cluster("outbound|80||httpbin.org")));
        assert!(!is_original_dst(&fake::eds_cluster("outbound|80||httpbin.org")));
        assert!(!is_original_dst(&xds_cluster::Cluster::default()));
    }
}

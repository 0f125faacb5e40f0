//! An in-process control plane for tests.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use enum_map::EnumMap;
use prost::Message;
use xds_api::pb::{
    envoy::{
        config::{
            cluster::v3::{self as xds_cluster, cluster::ClusterDiscoveryType},
            core::v3::{self as xds_core, socket_address::PortSpecifier},
            endpoint::v3::{self as xds_endpoint, lb_endpoint::HostIdentifier},
            listener::v3 as xds_listener,
            route::v3::{self as xds_route, route_action::ClusterSpecifier},
        },
        service::discovery::v3::{DiscoveryRequest, DiscoveryResponse},
    },
    google::protobuf,
};

use super::{DiscoveryClient, NodeInfo, ResourceType, SubsetTags, Transport};

type Scripted = Result<Option<DiscoveryResponse>, tonic::Status>;

#[derive(Default)]
struct State {
    clusters: Vec<xds_cluster::Cluster>,
    assignments: Vec<xds_endpoint::ClusterLoadAssignment>,
    routes: Vec<xds_route::RouteConfiguration>,
    listeners: Vec<xds_listener::Listener>,
    served: EnumMap<ResourceType, u64>,
    scripted: VecDeque<Scripted>,
    requests: Vec<DiscoveryRequest>,
    failing: Vec<ResourceType>,
    stalled: bool,
}

/// Serves whatever resources it's been given. Every response for a type bumps
/// that type's version and nonce, starting at "1".
#[derive(Default)]
pub(crate) struct FakeControlPlane {
    state: Mutex<State>,
}

impl FakeControlPlane {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_cluster(&self, cluster: xds_cluster::Cluster) {
        self.state.lock().unwrap().clusters.push(cluster);
    }

    pub(crate) fn set_clusters(&self, clusters: Vec<xds_cluster::Cluster>) {
        self.state.lock().unwrap().clusters = clusters;
    }

    pub(crate) fn add_assignment(&self, cla: xds_endpoint::ClusterLoadAssignment) {
        let mut state = self.state.lock().unwrap();
        state.assignments.retain(|a| a.cluster_name != cla.cluster_name);
        state.assignments.push(cla);
    }

    pub(crate) fn add_route(&self, route: xds_route::RouteConfiguration) {
        self.state.lock().unwrap().routes.push(route);
    }

    pub(crate) fn add_listener(&self, listener: xds_listener::Listener) {
        self.state.lock().unwrap().listeners.push(listener);
    }

    /// Answer the next request with `response` instead of the current state.
    pub(crate) fn script(&self, response: Scripted) {
        self.state.lock().unwrap().scripted.push_back(response);
    }

    /// Fail every request for a resource type.
    pub(crate) fn fail_type(&self, rtype: ResourceType) {
        self.state.lock().unwrap().failing.push(rtype);
    }

    /// Never answer anything again.
    pub(crate) fn stall(&self) {
        self.state.lock().unwrap().stalled = true;
    }

    pub(crate) fn requests(&self) -> Vec<DiscoveryRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    fn respond(&self, request: DiscoveryRequest) -> Option<Scripted> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if state.stalled {
            return None;
        }
        if let Some(scripted) = state.scripted.pop_front() {
            return Some(scripted);
        }

        let Some(rtype) = ResourceType::from_type_url(&request.type_url) else {
            return Some(Err(tonic::Status::invalid_argument("unknown type")));
        };
        if state.failing.contains(&rtype) {
            return Some(Err(tonic::Status::unavailable("resource type is broken")));
        }

        let wanted = |name: &str| {
            request.resource_names.is_empty() || request.resource_names.iter().any(|n| n == name)
        };
        let resources: Vec<protobuf::Any> = match rtype {
            ResourceType::Cluster => state.clusters.iter().map(|c| to_any(rtype, c)).collect(),
            ResourceType::Listener => state.listeners.iter().map(|l| to_any(rtype, l)).collect(),
            ResourceType::ClusterLoadAssignment => state
                .assignments
                .iter()
                .filter(|cla| wanted(&cla.cluster_name))
                .map(|cla| to_any(rtype, cla))
                .collect(),
            ResourceType::RouteConfiguration => state
                .routes
                .iter()
                .filter(|r| wanted(&r.name))
                .map(|r| to_any(rtype, r))
                .collect(),
        };

        state.served[rtype] += 1;
        let version = state.served[rtype].to_string();
        Some(Ok(Some(DiscoveryResponse {
            version_info: version.clone(),
            nonce: version,
            type_url: rtype.type_url().to_string(),
            resources,
            ..Default::default()
        })))
    }
}

fn to_any<M: Message>(rtype: ResourceType, m: &M) -> protobuf::Any {
    protobuf::Any {
        type_url: rtype.type_url().to_string(),
        value: m.encode_to_vec(),
    }
}

struct FakeTransport(Arc<FakeControlPlane>);

#[tonic::async_trait]
impl Transport for FakeTransport {
    async fn fetch(
        &self,
        request: DiscoveryRequest,
    ) -> Result<Option<DiscoveryResponse>, tonic::Status> {
        match self.0.respond(request) {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }
}

/// Subset tags from a fixed table, keyed on `(namespace, service, subset)`.
#[derive(Default)]
pub(crate) struct StaticSubsetTags {
    tags: Mutex<BTreeMap<(String, String, String), BTreeMap<String, String>>>,
    failing: Mutex<bool>,
}

impl StaticSubsetTags {
    pub(crate) fn insert(&self, namespace: &str, service: &str, subset: &str, tags: &[(&str, &str)]) {
        let key = (namespace.to_string(), service.to_string(), subset.to_string());
        self.tags.lock().unwrap().insert(key, labels(tags));
    }

    pub(crate) fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[tonic::async_trait]
impl SubsetTags for Arc<StaticSubsetTags> {
    async fn subset_tags(
        &self,
        namespace: &str,
        service: &str,
        subset: &str,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        if *self.failing.lock().unwrap() {
            anyhow::bail!("destination rules are unavailable");
        }

        let key = (namespace.to_string(), service.to_string(), subset.to_string());
        Ok(self.tags.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }
}

pub(crate) fn node() -> NodeInfo {
    NodeInfo {
        pod_name: "test-pod".to_string(),
        namespace: "default".to_string(),
        instance_ip: "10.0.0.1".to_string(),
    }
}

pub(crate) fn client(cp: &Arc<FakeControlPlane>, timeout: Duration) -> DiscoveryClient {
    DiscoveryClient::new(&node(), FakeTransport(cp.clone()), super::NoSubsetTags, timeout)
}

pub(crate) fn client_with_tags(
    cp: &Arc<FakeControlPlane>,
    tags: &Arc<StaticSubsetTags>,
) -> DiscoveryClient {
    DiscoveryClient::new(
        &node(),
        FakeTransport(cp.clone()),
        tags.clone(),
        Duration::from_secs(5),
    )
}

pub(crate) fn labels(tags: &[(&str, &str)]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn cluster_with_type(name: &str, t: xds_cluster::cluster::DiscoveryType) -> xds_cluster::Cluster {
    xds_cluster::Cluster {
        name: name.to_string(),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(t as i32)),
        ..Default::default()
    }
}

pub(crate) fn eds_cluster(name: &str) -> xds_cluster::Cluster {
    cluster_with_type(name, xds_cluster::cluster::DiscoveryType::Eds)
}

pub(crate) fn original_dst_cluster(name: &str) -> xds_cluster::Cluster {
    cluster_with_type(name, xds_cluster::cluster::DiscoveryType::OriginalDst)
}

pub(crate) fn assignment(name: &str, addrs: &[(&str, u32)]) -> xds_endpoint::ClusterLoadAssignment {
    let lb_endpoints = addrs
        .iter()
        .map(|(ip, port)| xds_endpoint::LbEndpoint {
            host_identifier: Some(HostIdentifier::Endpoint(xds_endpoint::Endpoint {
                address: Some(xds_core::Address {
                    address: Some(xds_core::address::Address::SocketAddress(
                        xds_core::SocketAddress {
                            address: ip.to_string(),
                            port_specifier: Some(PortSpecifier::PortValue(*port)),
                            ..Default::default()
                        },
                    )),
                }),
                ..Default::default()
            })),
            ..Default::default()
        })
        .collect();

    xds_endpoint::ClusterLoadAssignment {
        cluster_name: name.to_string(),
        endpoints: vec![xds_endpoint::LocalityLbEndpoints {
            lb_endpoints,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A route configuration with one virtual host per `(vhost, cluster)` pair,
/// each sending everything to `cluster`.
pub(crate) fn route(name: &str, vhosts: &[(&str, &str)]) -> xds_route::RouteConfiguration {
    let virtual_hosts = vhosts
        .iter()
        .map(|(vhost, cluster)| xds_route::VirtualHost {
            name: vhost.to_string(),
            domains: vec!["*".to_string()],
            routes: vec![xds_route::Route {
                action: Some(xds_route::route::Action::Route(xds_route::RouteAction {
                    cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.to_string())),
                    ..Default::default()
                })),
                ..Default::default()
            }],
            ..Default::default()
        })
        .collect();

    xds_route::RouteConfiguration {
        name: name.to_string(),
        virtual_hosts,
        ..Default::default()
    }
}

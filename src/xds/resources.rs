use prost::Name;

use xds_api::pb::envoy::config::cluster::v3 as xds_cluster;
use xds_api::pb::envoy::config::endpoint::v3 as xds_endpoint;
use xds_api::pb::envoy::config::listener::v3 as xds_listener;
use xds_api::pb::envoy::config::route::v3 as xds_route;

macro_rules! xds_types {
    (enum $name:ident { $($variant:ident($short:literal) => $xds_type:ty),* $(,)* }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, enum_map::Enum)]
        pub enum $name {
            $(
                $variant,
            )*
        }

        impl $name {
            pub fn all() -> &'static [$name] {
                &[
                    $(
                        $name::$variant,
                    )*
                ]
            }

            pub fn type_url(&self) -> &'static str {
                static TO_TYPE_URL: once_cell::sync::Lazy<enum_map::EnumMap<$name, String>> = once_cell::sync::Lazy::new(|| {
                    enum_map::enum_map! {
                        $(
                            $name::$variant => <$xds_type>::type_url(),
                        )*
                    }
                });

                TO_TYPE_URL[*self].as_str()
            }

            /// The conventional short name of the discovery service for this
            /// type, e.g. `cds`. Used as a log field and a metric label.
            pub fn short_name(&self) -> &'static str {
                match self {
                    $(
                        $name::$variant => $short,
                    )*
                }
            }

            pub fn from_type_url(type_url: &str) -> Option<Self> {
                static FROM_TYPE_URL: once_cell::sync::Lazy<Box<[(String, $name)]>> = once_cell::sync::Lazy::new(|| {
                    let urls = vec![
                        $(
                            (<$xds_type>::type_url(), $name::$variant),
                        )*
                    ];
                    urls.into_boxed_slice()
                });

                FROM_TYPE_URL.iter().find(|(k, _)| k == type_url).map(|(_, v)| *v)
            }
        }
    };
}

xds_types! {
    enum ResourceType {
        Listener("lds") => xds_listener::Listener,
        RouteConfiguration("rds") => xds_route::RouteConfiguration,
        Cluster("cds") => xds_cluster::Cluster,
        ClusterLoadAssignment("eds") => xds_endpoint::ClusterLoadAssignment,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_type_url_round_trip() {
        for rtype in ResourceType::all() {
            assert_eq!(ResourceType::from_type_url(rtype.type_url()), Some(*rtype));
        }

        assert_eq!(
            ResourceType::Cluster.type_url(),
            "type.googleapis.com/envoy.config.cluster.v3.Cluster"
        );
        assert_eq!(ResourceType::from_type_url("type.googleapis.com/nope"), None);
    }
}

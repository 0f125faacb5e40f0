//! Discovery access logging.
//!
//! Every request sent to and response received from the control plane goes
//! through here, so setting `ezmesh::grpc_access=LEVEL` adjusts all of it at
//! once.

use tonic::Status;
use xds_api::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

pub(crate) fn xds_discovery_request(request: &DiscoveryRequest) {
    tracing::debug!(
        v = request.version_info,
        n = request.response_nonce,
        ty = request.type_url,
        r = ?request.resource_names,
        node = request.node.as_ref().map(|n| &n.id),
        "DiscoveryRequest",
    );
}

pub(crate) fn xds_discovery_response(response: &DiscoveryResponse) {
    tracing::debug!(
        v = response.version_info,
        n = response.nonce,
        ty = response.type_url,
        r_count = response.resources.len(),
        "DiscoveryResponse",
    );
}

/// Find the io error that caused a status, if there is one. A status with an
/// io source means the connection went away, not that the control plane
/// rejected anything.
pub(crate) fn io_source(status: &Status) -> Option<&std::io::Error> {
    let mut err: &(dyn std::error::Error + 'static) = status;

    loop {
        if let Some(e) = err.downcast_ref::<std::io::Error>() {
            return Some(e);
        }

        if let Some(e) = err.downcast_ref::<h2::Error>().and_then(|e| e.get_io()) {
            return Some(e);
        }

        err = err.source()?;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_io_source() {
        let status = Status::unavailable("nope");
        assert!(io_source(&status).is_none());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let status = Status::from_error(Box::new(io));
        assert_eq!(
            io_source(&status).map(|e| e.kind()),
            Some(std::io::ErrorKind::ConnectionReset)
        );
    }
}

//! Parsing node references given either as a host id or as an address.

use super::token_ring::TokenRing;
use crate::error::{Error, Result};
use crate::types::{Endpoint, HostId};

/// Which interpretation of the input string to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
    HostId,
    Endpoint,
    /// Accept a host id, falling back to an address.
    #[default]
    AutoDetect,
}

/// A node reference with one or both halves known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostIdOrEndpoint {
    pub id: Option<HostId>,
    pub endpoint: Option<Endpoint>,
}

impl HostIdOrEndpoint {
    /// Parse `s` according to `restrict`.
    ///
    /// Input that is neither a valid host id nor a valid address (or not the
    /// kind requested) is an invalid-argument failure.
    pub fn parse(s: &str, restrict: ParamType) -> Result<Self> {
        let s = s.trim();
        let as_host_id = || s.parse::<HostId>().ok().filter(HostId::is_set);
        let as_endpoint = || s.parse::<Endpoint>().ok();

        let parsed = match restrict {
            ParamType::HostId => as_host_id().map(Self::from_host_id),
            ParamType::Endpoint => as_endpoint().map(Self::from_endpoint),
            ParamType::AutoDetect => as_host_id()
                .map(Self::from_host_id)
                .or_else(|| as_endpoint().map(Self::from_endpoint)),
        };

        parsed.ok_or_else(|| {
            let expected = match restrict {
                ParamType::HostId => "a host id",
                ParamType::Endpoint => "an address",
                ParamType::AutoDetect => "a host id or an address",
            };
            Error::InvalidArgument(format!("'{}' is not {}", s, expected))
        })
    }

    pub fn from_host_id(id: HostId) -> Self {
        Self {
            id: Some(id),
            endpoint: None,
        }
    }

    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            id: None,
            endpoint: Some(endpoint),
        }
    }

    pub fn has_host_id(&self) -> bool {
        self.id.is_some()
    }

    pub fn has_endpoint(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Fill in whichever half is missing by looking it up in `ring`.
    pub fn resolve(&mut self, ring: &TokenRing) -> Result<()> {
        match (self.id, self.endpoint) {
            (Some(id), None) => {
                let endpoint = ring
                    .get_endpoint_for_host_id(id)
                    .ok_or_else(|| Error::NotFound(format!("host id {} is not in the ring", id)))?;
                self.endpoint = Some(endpoint);
            }
            (None, Some(endpoint)) => {
                let id = ring.get_host_id_if_known(endpoint).ok_or_else(|| {
                    Error::NotFound(format!("endpoint {} has no host id in the ring", endpoint))
                })?;
                self.id = Some(id);
            }
            (Some(_), Some(_)) => {}
            (None, None) => {
                return Err(Error::InvalidArgument(
                    "neither host id nor endpoint is set".to_string(),
                ))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    fn ring_with_host(id: HostId) -> TokenRing {
        let mut ring = TokenRing::new(RingConfig::new(ep("10.0.0.1")));
        ring.update_host_id(id, ep("10.0.0.1")).unwrap();
        ring
    }

    #[test]
    fn test_parse_auto_detect() {
        let id = HostId::new_random();
        let parsed = HostIdOrEndpoint::parse(&id.to_string(), ParamType::AutoDetect).unwrap();
        assert_eq!(parsed.id, Some(id));
        assert!(!parsed.has_endpoint());

        let parsed = HostIdOrEndpoint::parse("10.1.2.3", ParamType::AutoDetect).unwrap();
        assert_eq!(parsed.endpoint, Some(ep("10.1.2.3")));

        let parsed = HostIdOrEndpoint::parse(" ::1 ", ParamType::AutoDetect).unwrap();
        assert!(parsed.has_endpoint());
    }

    #[test]
    fn test_parse_restricted() {
        let id = HostId::new_random();
        assert!(HostIdOrEndpoint::parse("10.1.2.3", ParamType::HostId)
            .unwrap_err()
            .is_invalid_argument());
        assert!(HostIdOrEndpoint::parse(&id.to_string(), ParamType::Endpoint)
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn test_malformed_vs_not_found() {
        let id = HostId::new_random();
        let ring = ring_with_host(id);

        let err = ring.parse_host_id_and_endpoint("not-a-node").unwrap_err();
        assert!(err.is_invalid_argument());

        let err = ring
            .parse_host_id_and_endpoint(&HostId::new_random().to_string())
            .unwrap_err();
        assert!(err.is_not_found());

        let err = ring.parse_host_id_and_endpoint("10.9.9.9").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolve_both_directions() {
        let id = HostId::new_random();
        let ring = ring_with_host(id);

        let by_id = ring.parse_host_id_and_endpoint(&id.to_string()).unwrap();
        assert_eq!(by_id.endpoint, Some(ep("10.0.0.1")));

        let by_addr = ring.parse_host_id_and_endpoint("10.0.0.1").unwrap();
        assert_eq!(by_addr.id, Some(id));
    }

    #[test]
    fn test_nil_uuid_is_not_a_host_id() {
        let nil = HostId::nil().to_string();
        assert!(HostIdOrEndpoint::parse(&nil, ParamType::AutoDetect)
            .unwrap_err()
            .is_invalid_argument());
    }
}

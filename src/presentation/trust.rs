//! Issuer trust: chains are accepted when they are anchored at a configured [TrustPoint].
use time::OffsetDateTime;

use crate::x509::Certificate;

/// A recognised issuer certificate, usually an IACA root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustPoint {
    pub certificate: Certificate,
    pub display_name: Option<String>,
    pub display_icon: Option<Vec<u8>>,
}

impl TrustPoint {
    pub fn new(certificate: Certificate) -> Self {
        Self {
            certificate,
            display_name: None,
            display_icon: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Whether `certificate` is this trust point or was issued by it.
    fn anchors(&self, certificate: &Certificate) -> bool {
        if *certificate == self.certificate {
            return true;
        }
        certificate.issuer() == self.certificate.subject()
            && self
                .certificate
                .public_key()
                .map(|key| certificate.is_signed_by(&key))
                .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustResult {
    pub is_trusted: bool,
    /// Matched trust points, in chain order.
    pub trust_points: Vec<TrustPoint>,
    pub error: Option<String>,
}

impl TrustResult {
    fn untrusted(error: impl Into<String>) -> Self {
        Self {
            is_trusted: false,
            trust_points: vec![],
            error: Some(error.into()),
        }
    }
}

/// A read-only set of trust points, shared between render operations.
#[derive(Clone, Debug, Default)]
pub struct TrustManager {
    trust_points: Vec<TrustPoint>,
}

impl TrustManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trust_point(&mut self, trust_point: TrustPoint) {
        self.trust_points.push(trust_point);
    }

    pub fn trust_points(&self) -> &[TrustPoint] {
        &self.trust_points
    }

    /// Verifies a chain, leaf first.
    ///
    /// Every link must be signed by the next certificate and valid at `at`, up to the first
    /// certificate anchored at a trust point.
    pub fn verify(&self, chain: &[Certificate], at: OffsetDateTime) -> TrustResult {
        if chain.is_empty() {
            return TrustResult::untrusted("empty certificate chain");
        }
        for (index, certificate) in chain.iter().enumerate() {
            if !certificate.is_valid_at(at) {
                return TrustResult::untrusted(format!(
                    "certificate '{}' is not valid at {at}",
                    certificate.subject()
                ));
            }
            let matched: Vec<TrustPoint> = self
                .trust_points
                .iter()
                .filter(|tp| tp.anchors(certificate))
                .cloned()
                .collect();
            if !matched.is_empty() {
                tracing::debug!(
                    "chain anchored at '{}' after {} link(s)",
                    matched[0].certificate.subject(),
                    index
                );
                return TrustResult {
                    is_trusted: true,
                    trust_points: matched,
                    error: None,
                };
            }
            let Some(next) = chain.get(index + 1) else {
                break;
            };
            let linked = next
                .public_key()
                .map(|key| certificate.is_signed_by(&key))
                .unwrap_or(false);
            if !linked {
                return TrustResult::untrusted(format!(
                    "certificate '{}' is not signed by '{}'",
                    certificate.subject(),
                    next.subject()
                ));
            }
        }
        TrustResult::untrusted("no trust point found for chain")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::x509::test::root_and_leaf;
    use time::Duration;

    #[test]
    fn chain_anchored_at_trust_point() {
        let (_, root, _, leaf) = root_and_leaf();
        let mut manager = TrustManager::new();
        manager.add_trust_point(TrustPoint::new(root.clone()).with_display_name("ACME DMV"));

        let now = OffsetDateTime::now_utc();
        let result = manager.verify(&[leaf.clone()], now);
        assert!(result.is_trusted);
        assert_eq!(result.trust_points[0].display_name.as_deref(), Some("ACME DMV"));

        let result = manager.verify(&[leaf.clone(), root], now);
        assert!(result.is_trusted);

        let result = manager.verify(&[leaf], now + Duration::days(365 * 20));
        assert!(!result.is_trusted);
        assert!(result.error.is_some());
    }

    #[test]
    fn unknown_issuer_is_rejected() {
        let (_, _, _, leaf) = root_and_leaf();
        let (_, other_root, _, _) = root_and_leaf();
        let mut manager = TrustManager::new();
        manager.add_trust_point(TrustPoint::new(other_root));
        let result = manager.verify(&[leaf], OffsetDateTime::now_utc());
        assert!(!result.is_trusted);
        assert!(result.trust_points.is_empty());
        assert!(manager.verify(&[], OffsetDateTime::now_utc()).error.is_some());
    }
}

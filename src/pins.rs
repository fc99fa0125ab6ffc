//! Pin Store: static SPKI-SHA256 allowlists for the primary API host and for
//! any alternative host discovered via DoH (§4.1, §6).
//!
//! Two disjoint sets exist by design: a pin mismatch on an alt host must
//! never be satisfied by a primary pin, or vice versa.

use subtle::ConstantTimeEq;

/// An ordered list of acceptable base64-encoded SHA-256 SPKI digests.
#[derive(Debug, Clone)]
pub struct PinSet {
    digests: &'static [&'static str],
}

impl PinSet {
    /// Build a pin set from a fixed list of base64 SPKI-SHA256 digests.
    pub const fn new(digests: &'static [&'static str]) -> Self {
        Self { digests }
    }

    /// True iff `observed` (base64 SHA-256 SPKI digest) is in this set.
    ///
    /// Uses a constant-time comparison per digest; which branch short-circuits
    /// (i.e. which digest it matched) is not observable, only the outcome is.
    pub fn matches(&self, observed: &str) -> bool {
        let observed = observed.as_bytes();
        self.digests
            .iter()
            .any(|pin| pin.as_bytes().ct_eq(observed).into())
    }

    /// All pins in this set, for error reporting.
    pub fn digests(&self) -> &'static [&'static str] {
        self.digests
    }
}

/// Pins accepted when connecting to the canonical API host.
pub const PRIMARY_PINS: PinSet = PinSet::new(&[
    "JMI8yrbc6jB1FYGyyWRLFTmDNgIszrNEMGlgy972e7w=",
    "Iu44zU84EOCZ9vx/vz67/MRVrxF1IO4i4NIa8ETwiIY=",
]);

/// Pins accepted when connecting to a DoH-discovered alternative host.
///
/// Disjoint from [`PRIMARY_PINS`] by construction — an alt host's certificate
/// must carry its own operator-issued key, independent of the primary host's.
pub const ALT_PINS: PinSet = PinSet::new(&[
    "EU6TS9MO0L/GsDHvVc9D5fChYLNy6mrMka417m18fU8=",
    "bq8gAe+nDqGc5tBmL0hP8ZpcYMMpGgHLlz53p7RQjDU=",
]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_and_alt_pins_are_disjoint() {
        for pin in PRIMARY_PINS.digests() {
            assert!(!ALT_PINS.matches(pin), "pin {pin} shared between primary and alt sets");
        }
    }

    #[test]
    fn matches_known_pin() {
        assert!(PRIMARY_PINS.matches("JMI8yrbc6jB1FYGyyWRLFTmDNgIszrNEMGlgy972e7w="));
        assert!(!PRIMARY_PINS.matches("not-a-real-digest"));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-metering
#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use agw_core::AttestedMetering;
use agw_core::money::format_6dp;
use agw_core::problem::ReasonCode;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the envelope timestamp (unix seconds).
pub const HEADER_TIMESTAMP: &str = "x-metering-timestamp";
/// Header carrying the attested input token count.
pub const HEADER_TOKENS_IN: &str = "x-metering-tokens-in";
/// Header carrying the attested output token count.
pub const HEADER_TOKENS_OUT: &str = "x-metering-tokens-out";
/// Header carrying the attested model identifier (may be empty).
pub const HEADER_MODEL: &str = "x-metering-model";
/// Header carrying the attested cache-hit flag (`true`/`false`).
pub const HEADER_CACHE_HIT: &str = "x-metering-cache-hit";
/// Header carrying the attested cost.
pub const HEADER_COST: &str = "x-metering-cost";
/// Header carrying the base64-url signature over the canonical payload.
pub const HEADER_SIGNATURE: &str = "x-metering-signature";

/// All seven envelope header names, in canonical payload order.
pub const ENVELOPE_HEADERS: [&str; 7] = [
    HEADER_TIMESTAMP,
    HEADER_TOKENS_IN,
    HEADER_TOKENS_OUT,
    HEADER_MODEL,
    HEADER_CACHE_HIT,
    HEADER_COST,
    HEADER_SIGNATURE,
];

/// Raw envelope header values as extracted by the ingress.
///
/// `None` means the header was absent. The verifier does not care whether
/// absence is original or the result of boundary stripping.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeHeaders {
    /// `X-Metering-Timestamp`.
    pub timestamp: Option<String>,
    /// `X-Metering-Tokens-In`.
    pub tokens_in: Option<String>,
    /// `X-Metering-Tokens-Out`.
    pub tokens_out: Option<String>,
    /// `X-Metering-Model`.
    pub model: Option<String>,
    /// `X-Metering-Cache-Hit`.
    pub cache_hit: Option<String>,
    /// `X-Metering-Cost`.
    pub cost: Option<String>,
    /// `X-Metering-Signature`.
    pub signature: Option<String>,
}

impl EnvelopeHeaders {
    /// Build from any header lookup function (e.g. over an HTTP header map).
    pub fn from_lookup(mut get: impl FnMut(&str) -> Option<String>) -> Self {
        Self {
            timestamp: get(HEADER_TIMESTAMP),
            tokens_in: get(HEADER_TOKENS_IN),
            tokens_out: get(HEADER_TOKENS_OUT),
            model: get(HEADER_MODEL),
            cache_hit: get(HEADER_CACHE_HIT),
            cost: get(HEADER_COST),
            signature: get(HEADER_SIGNATURE),
        }
    }

    /// Returns `true` if no envelope header is present at all.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.timestamp.is_none()
            && self.tokens_in.is_none()
            && self.tokens_out.is_none()
            && self.model.is_none()
            && self.cache_hit.is_none()
            && self.cost.is_none()
            && self.signature.is_none()
    }
}

/// Why an envelope was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeteringError {
    /// One or more of the seven envelope headers is missing.
    #[error("metering envelope required: missing header '{0}'")]
    Required(&'static str),

    /// A header failed to parse or the signature did not verify.
    #[error("metering envelope invalid: {0}")]
    Invalid(String),

    /// The envelope timestamp is outside the freshness window.
    #[error("metering envelope expired: signed {age_secs}s from server time (ttl {ttl_secs}s)")]
    Expired {
        /// Absolute distance between envelope and server time.
        age_secs: i64,
        /// Configured freshness window.
        ttl_secs: i64,
    },
}

impl MeteringError {
    /// The reason code the gate chain reports for this rejection.
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Required(_) => ReasonCode::MeteringEnvelopeRequired,
            Self::Invalid(_) => ReasonCode::MeteringEnvelopeInvalid,
            Self::Expired { .. } => ReasonCode::MeteringEnvelopeExpired,
        }
    }
}

/// Build the canonical payload the signature covers.
///
/// `"{ts}|{correlation_id}|{tokens_in}|{tokens_out}|{model}|{cache_hit}|{cost_6dp}"`
/// with the cost rendered to exactly six fractional digits and the cache-hit
/// flag as `true`/`false`. Two implementations must produce identical bytes
/// for identical inputs.
#[must_use]
pub fn canonical_payload(
    ts: i64,
    correlation_id: &str,
    tokens_in: u64,
    tokens_out: u64,
    model: &str,
    cache_hit: bool,
    cost_amount: f64,
) -> String {
    format!(
        "{ts}|{correlation_id}|{tokens_in}|{tokens_out}|{model}|{cache_hit}|{}",
        format_6dp(cost_amount)
    )
}

/// Sign a canonical payload: HMAC-SHA-256, base64-url without padding.
#[must_use]
pub fn sign_payload(secret: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Produce the full signed header set for an attestation.
///
/// Intended for the upstream metering component and for tests.
#[must_use]
pub fn signed_headers(
    secret: &[u8],
    correlation_id: &str,
    ts: i64,
    tokens_in: u64,
    tokens_out: u64,
    model: &str,
    cache_hit: bool,
    cost_amount: f64,
) -> Vec<(&'static str, String)> {
    let payload = canonical_payload(
        ts,
        correlation_id,
        tokens_in,
        tokens_out,
        model,
        cache_hit,
        cost_amount,
    );
    vec![
        (HEADER_TIMESTAMP, ts.to_string()),
        (HEADER_TOKENS_IN, tokens_in.to_string()),
        (HEADER_TOKENS_OUT, tokens_out.to_string()),
        (HEADER_MODEL, model.to_string()),
        (HEADER_CACHE_HIT, cache_hit.to_string()),
        (HEADER_COST, format_6dp(cost_amount)),
        (HEADER_SIGNATURE, sign_payload(secret, &payload)),
    ]
}

/// Verifies trusted metering envelopes against the process-wide secret.
#[derive(Clone)]
pub struct MeteringVerifier {
    secret: Option<Vec<u8>>,
    ttl_secs: i64,
}

impl std::fmt::Debug for MeteringVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material.
        f.debug_struct("MeteringVerifier")
            .field("secret_configured", &self.secret.is_some())
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl MeteringVerifier {
    /// Create a verifier. `secret = None` means enforcement is disabled and
    /// every verification passes through to caller-declared metering.
    #[must_use]
    pub fn new(secret: Option<Vec<u8>>, ttl_secs: i64) -> Self {
        Self {
            secret,
            ttl_secs: ttl_secs.max(0),
        }
    }

    /// Returns `true` when a secret is configured.
    #[must_use]
    pub fn enforcing(&self) -> bool {
        self.secret.is_some()
    }

    /// Validate an envelope and produce the attested values.
    ///
    /// Returns `Ok(None)` in pass-through mode (no secret configured).
    ///
    /// # Errors
    ///
    /// - [`MeteringError::Required`] when any of the seven headers is absent.
    /// - [`MeteringError::Invalid`] on parse failure or signature mismatch.
    /// - [`MeteringError::Expired`] when `|server_time − ts| > ttl`.
    pub fn verify(
        &self,
        correlation_id: &str,
        headers: &EnvelopeHeaders,
        now: DateTime<Utc>,
    ) -> Result<Option<AttestedMetering>, MeteringError> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };

        let ts_raw = require(&headers.timestamp, HEADER_TIMESTAMP)?;
        let tokens_in_raw = require(&headers.tokens_in, HEADER_TOKENS_IN)?;
        let tokens_out_raw = require(&headers.tokens_out, HEADER_TOKENS_OUT)?;
        let model = require(&headers.model, HEADER_MODEL)?;
        let cache_hit_raw = require(&headers.cache_hit, HEADER_CACHE_HIT)?;
        let cost_raw = require(&headers.cost, HEADER_COST)?;
        let signature = require(&headers.signature, HEADER_SIGNATURE)?;

        let ts: i64 = parse_field(ts_raw, HEADER_TIMESTAMP)?;
        let tokens_in: u64 = parse_field(tokens_in_raw, HEADER_TOKENS_IN)?;
        let tokens_out: u64 = parse_field(tokens_out_raw, HEADER_TOKENS_OUT)?;
        let cache_hit = match cache_hit_raw {
            "true" => true,
            "false" => false,
            other => {
                return Err(MeteringError::Invalid(format!(
                    "unparseable {HEADER_CACHE_HIT}: '{other}'"
                )));
            }
        };
        let cost_amount: f64 = parse_field(cost_raw, HEADER_COST)?;

        let payload = canonical_payload(
            ts,
            correlation_id,
            tokens_in,
            tokens_out,
            model,
            cache_hit,
            cost_amount,
        );

        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| MeteringError::Invalid("signature is not base64-url".into()))?;
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| MeteringError::Invalid("secret rejected by HMAC".into()))?;
        mac.update(payload.as_bytes());
        // verify_slice compares in constant time.
        mac.verify_slice(&presented)
            .map_err(|_| MeteringError::Invalid("signature mismatch".into()))?;

        let age_secs = (now.timestamp() - ts).abs();
        if age_secs > self.ttl_secs {
            return Err(MeteringError::Expired {
                age_secs,
                ttl_secs: self.ttl_secs,
            });
        }

        let signed_at = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| MeteringError::Invalid(format!("timestamp {ts} out of range")))?;

        Ok(Some(AttestedMetering {
            ts: signed_at,
            tokens_in,
            tokens_out,
            model: model.to_string(),
            cache_hit,
            cost_amount,
        }))
    }
}

fn require<'a>(
    field: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, MeteringError> {
    field.as_deref().ok_or(MeteringError::Required(name))
}

fn parse_field<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, MeteringError> {
    raw.parse()
        .map_err(|_| MeteringError::Invalid(format!("unparseable {name}: '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-metering-secret";
    const TTL: i64 = 300;

    fn headers_for(correlation_id: &str, ts: i64, cost: f64) -> EnvelopeHeaders {
        let signed = signed_headers(SECRET, correlation_id, ts, 1200, 340, "small", false, cost);
        let mut h = EnvelopeHeaders::default();
        for (name, value) in signed {
            match name {
                HEADER_TIMESTAMP => h.timestamp = Some(value),
                HEADER_TOKENS_IN => h.tokens_in = Some(value),
                HEADER_TOKENS_OUT => h.tokens_out = Some(value),
                HEADER_MODEL => h.model = Some(value),
                HEADER_CACHE_HIT => h.cache_hit = Some(value),
                HEADER_COST => h.cost = Some(value),
                HEADER_SIGNATURE => h.signature = Some(value),
                _ => unreachable!(),
            }
        }
        h
    }

    fn verifier() -> MeteringVerifier {
        MeteringVerifier::new(Some(SECRET.to_vec()), TTL)
    }

    #[test]
    fn canonical_payload_renders_cost_to_six_digits() {
        let p = canonical_payload(1_700_000_000, "c-1", 10, 20, "m", true, 0.05);
        assert_eq!(p, "1700000000|c-1|10|20|m|true|0.050000");
    }

    #[test]
    fn valid_envelope_verifies_and_attests() {
        let now = Utc::now();
        let h = headers_for("c-1", now.timestamp(), 0.05);
        let attested = verifier().verify("c-1", &h, now).unwrap().unwrap();
        assert_eq!(attested.tokens_in, 1200);
        assert_eq!(attested.model, "small");
        assert!((attested.cost_amount - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn passthrough_when_no_secret() {
        let v = MeteringVerifier::new(None, TTL);
        assert!(!v.enforcing());
        let out = v.verify("c-1", &EnvelopeHeaders::default(), Utc::now()).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn missing_header_is_required_error() {
        let now = Utc::now();
        let mut h = headers_for("c-1", now.timestamp(), 0.05);
        h.cost = None;
        let err = verifier().verify("c-1", &h, now).unwrap_err();
        assert_eq!(err, MeteringError::Required(HEADER_COST));
        assert_eq!(err.reason_code(), ReasonCode::MeteringEnvelopeRequired);
    }

    #[test]
    fn signature_over_different_payload_is_invalid() {
        let now = Utc::now();
        // Sign for one correlation id, present under another.
        let h = headers_for("c-other", now.timestamp(), 0.05);
        let err = verifier().verify("c-1", &h, now).unwrap_err();
        assert!(matches!(err, MeteringError::Invalid(_)));
        assert_eq!(err.reason_code(), ReasonCode::MeteringEnvelopeInvalid);
    }

    #[test]
    fn tampered_value_is_invalid() {
        let now = Utc::now();
        let mut h = headers_for("c-1", now.timestamp(), 0.05);
        h.tokens_in = Some("999999".into());
        let err = verifier().verify("c-1", &h, now).unwrap_err();
        assert!(matches!(err, MeteringError::Invalid(_)));
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        let now = Utc::now();
        // Exactly at TTL: allowed.
        let h = headers_for("c-1", now.timestamp() - TTL, 0.05);
        assert!(verifier().verify("c-1", &h, now).is_ok());

        // One second beyond: expired, in both directions.
        let h = headers_for("c-1", now.timestamp() - TTL - 1, 0.05);
        let err = verifier().verify("c-1", &h, now).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::MeteringEnvelopeExpired);

        let h = headers_for("c-1", now.timestamp() + TTL + 1, 0.05);
        let err = verifier().verify("c-1", &h, now).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::MeteringEnvelopeExpired);
    }

    #[test]
    fn garbage_signature_encoding_is_invalid() {
        let now = Utc::now();
        let mut h = headers_for("c-1", now.timestamp(), 0.05);
        h.signature = Some("!!not-base64!!".into());
        let err = verifier().verify("c-1", &h, now).unwrap_err();
        assert!(matches!(err, MeteringError::Invalid(_)));
    }

    #[test]
    fn empty_model_is_legal() {
        let now = Utc::now();
        let signed = signed_headers(SECRET, "c-1", now.timestamp(), 5, 5, "", true, 0.0);
        let h = EnvelopeHeaders::from_lookup(|name| {
            signed
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
        });
        let attested = verifier().verify("c-1", &h, now).unwrap().unwrap();
        assert_eq!(attested.model, "");
        assert!(attested.cache_hit);
    }

    #[test]
    fn debug_does_not_leak_the_secret() {
        let v = verifier();
        let rendered = format!("{v:?}");
        assert!(!rendered.contains("test-metering-secret"));
        assert!(rendered.contains("secret_configured"));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for envelope signing and verification.

use agw_metering::{EnvelopeHeaders, MeteringVerifier, canonical_payload, signed_headers};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

const SECRET: &[u8] = b"proptest-secret";
const TTL: i64 = 300;

fn headers_from(pairs: &[(&'static str, String)]) -> EnvelopeHeaders {
    EnvelopeHeaders::from_lookup(|name| {
        pairs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    })
}

proptest! {
    #[test]
    fn signed_envelopes_always_verify(
        tokens_in in 0u64..10_000_000,
        tokens_out in 0u64..10_000_000,
        cache_hit in any::<bool>(),
        cost_milli in 0i64..1_000_000,
        model in "[a-z0-9-]{0,16}",
        correlation in "[a-zA-Z0-9-]{1,32}",
    ) {
        let cost = cost_milli as f64 / 1000.0;
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("fixed instant");
        let pairs = signed_headers(
            SECRET, &correlation, now.timestamp(), tokens_in, tokens_out, &model, cache_hit, cost,
        );
        let verifier = MeteringVerifier::new(Some(SECRET.to_vec()), TTL);
        let attested = verifier
            .verify(&correlation, &headers_from(&pairs), now)
            .expect("valid envelope")
            .expect("enforcing mode attests");
        prop_assert_eq!(attested.tokens_in, tokens_in);
        prop_assert_eq!(attested.tokens_out, tokens_out);
        prop_assert_eq!(attested.model, model);
        prop_assert_eq!(attested.cache_hit, cache_hit);
        // Cost survives to six fractional digits.
        prop_assert!((attested.cost_amount - cost).abs() < 0.000_001);
    }

    #[test]
    fn any_tampered_counter_is_rejected(
        tokens_in in 0u64..1_000_000,
        bump in 1u64..1_000,
    ) {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("fixed instant");
        let pairs = signed_headers(SECRET, "c-1", now.timestamp(), tokens_in, 10, "m", false, 0.01);
        let mut headers = headers_from(&pairs);
        headers.tokens_in = Some((tokens_in + bump).to_string());
        let verifier = MeteringVerifier::new(Some(SECRET.to_vec()), TTL);
        prop_assert!(verifier.verify("c-1", &headers, now).is_err());
    }

    #[test]
    fn canonical_payload_is_injective_on_the_cost_grid(
        a in 0i64..1_000_000,
        b in 0i64..1_000_000,
    ) {
        // Distinct six-digit costs produce distinct payloads.
        let pa = canonical_payload(0, "c", 1, 1, "m", false, a as f64 / 1_000_000.0);
        let pb = canonical_payload(0, "c", 1, 1, "m", false, b as f64 / 1_000_000.0);
        prop_assert_eq!(a == b, pa == pb);
    }
}

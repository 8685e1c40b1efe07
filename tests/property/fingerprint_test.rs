// tests/property/fingerprint_test.rs

//! Property-based tests for cache key derivation.

use geocache::core::cache::Fingerprint;
use geocache::core::cache::fingerprint::{canonical_query, encode_component};
use indexmap::IndexMap;
use proptest::prelude::*;

const BASE: &str = "https://maps.googleapis.com";
const PATH: &str = "/maps/api/geocode/json";

fn params() -> impl Strategy<Value = Vec<(String, String)>> {
    // Names are unique so reordering cannot change which value wins.
    prop::collection::btree_map("[a-z_]{1,12}", ".{0,40}", 0..8)
        .prop_map(|map| map.into_iter().filter(|(k, _)| k != "key").collect())
}

fn to_query(pairs: &[(String, String)]) -> IndexMap<String, String> {
    pairs.iter().cloned().collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_current_key_ignores_parameter_order(
        pairs in params(),
        seed in any::<u64>(),
    ) {
        let mut shuffled = pairs.clone();
        // Deterministic rotation plus reversal; enough to move every element.
        if !shuffled.is_empty() {
            let by = (seed as usize) % shuffled.len();
            shuffled.rotate_left(by);
        }
        if seed % 2 == 0 {
            shuffled.reverse();
        }

        let a = Fingerprint::compute(BASE, "ns", PATH, &to_query(&pairs));
        let b = Fingerprint::compute(BASE, "ns", PATH, &to_query(&shuffled));
        prop_assert_eq!(a.current, b.current);
        prop_assert_eq!(a.canonical_query, b.canonical_query);
    }

    #[test]
    fn test_credential_never_affects_keys(
        pairs in params(),
        credential in "[A-Za-z0-9_-]{1,39}",
        position in any::<prop::sample::Index>(),
    ) {
        let without = to_query(&pairs);
        let mut with_pairs = pairs.clone();
        let at = position.index(with_pairs.len() + 1);
        with_pairs.insert(at, ("key".to_string(), credential));
        let with = to_query(&with_pairs);

        let a = Fingerprint::compute(BASE, "ns", PATH, &without);
        let b = Fingerprint::compute(BASE, "ns", PATH, &with);
        prop_assert_eq!(a.current, b.current);
        prop_assert_eq!(a.legacy, b.legacy);
    }

    #[test]
    fn test_keys_have_fixed_shape(pairs in params(), namespace in "[a-z]{1,12}") {
        let fp = Fingerprint::compute(BASE, &namespace, PATH, &to_query(&pairs));

        let current = fp.current.to_string();
        let parts: Vec<&str> = current.split(':').collect();
        prop_assert_eq!(parts.len(), 3);
        prop_assert_eq!(parts[0], namespace.as_str());
        prop_assert_eq!(parts[1].len(), 40);
        prop_assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        prop_assert_eq!(parts[2], "j");

        let legacy = fp.legacy.to_string();
        prop_assert!(legacy.starts_with("cache-geo-cache:"));
        prop_assert!(legacy.ends_with(":json"));
    }

    #[test]
    fn test_encoded_components_are_url_safe(value in ".{0,60}") {
        let encoded = encode_component(&value);
        prop_assert!(encoded.chars().all(|c| {
            c.is_ascii_alphanumeric() || "-_.!~*'()%".contains(c)
        }));
        prop_assert_eq!(
            urlencoding::decode(&encoded).map(|d| d.into_owned()).ok(),
            Some(value)
        );
    }

    #[test]
    fn test_canonical_query_is_sorted(pairs in params()) {
        let canonical = canonical_query(&to_query(&pairs));
        let names: Vec<&str> = canonical
            .split('&')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| pair.split('=').next())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        prop_assert_eq!(names, sorted);
    }
}

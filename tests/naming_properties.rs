//! Property tests for meter name sanitization and URL mapping

use callmeter::client::UrlMapper;
use callmeter::client::url_mapper::top_private_domain;
use callmeter::metrics::{MeterRegistry, Tags, sanitize, sanitize_label};
use proptest::prelude::*;

fn is_prometheus_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

proptest! {
    #[test]
    fn sanitized_names_are_valid_prometheus_names(name in "\\PC{0,40}") {
        prop_assert!(is_prometheus_name(&sanitize(&name)));
    }

    #[test]
    fn sanitized_labels_never_contain_colons(key in "\\PC{0,20}") {
        let label = sanitize_label(&key);
        prop_assert!(is_prometheus_name(&label));
        prop_assert!(!label.contains(':'));
    }

    #[test]
    fn dotted_names_map_dots_to_underscores(
        segments in prop::collection::vec("[a-z][a-z0-9]{0,8}", 1..6)
    ) {
        let dotted = segments.join(".");
        prop_assert_eq!(sanitize(&dotted), segments.join("_"));
    }

    #[test]
    fn sanitize_is_idempotent(name in "\\PC{0,40}") {
        let once = sanitize(&name);
        prop_assert_eq!(sanitize(&once), once.clone());
    }

    #[test]
    fn any_dotted_name_registers(
        segments in prop::collection::vec("[a-z][a-z0-9-]{0,8}", 1..5)
    ) {
        let registry = MeterRegistry::new();
        let name = format!("callmeter.{}", segments.join("."));
        prop_assert!(registry.counter(&name, &Tags::empty()).is_ok());
    }

    #[test]
    fn top_private_domain_is_one_label_below_public_suffix(
        labels in prop::collection::vec("svc[0-9]{1,4}", 1..5),
        suffix in prop::sample::select(vec!["com", "org", "co.uk", "com.au", "github.io"]),
    ) {
        let host = format!("{}.{suffix}", labels.join("."));
        let expected = format!("{}.{suffix}", labels[labels.len() - 1]);
        prop_assert_eq!(top_private_domain(&host), expected);
    }

    #[test]
    fn encoded_path_ignores_host_and_query(
        host in "[a-z]{1,10}\\.(com|org|net)",
        path in "(/[a-z0-9]{1,8}){0,4}",
        query in "[a-z]{1,5}=[0-9]{1,5}",
    ) {
        let url = reqwest::Url::parse(&format!("https://{host}{path}?{query}")).unwrap();
        let mapped = UrlMapper::EncodedPath.map(&url);
        let expected = if path.is_empty() { "/".to_string() } else { path.clone() };
        prop_assert_eq!(mapped, expected);
    }
}

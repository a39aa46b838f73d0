use ragsync::fingerprint::{hash, hash_to_uuid, namespace_uuid};

#[test]
fn hash_is_stable_across_calls() {
    let a = hash("the quick brown fox");
    let b = hash("the quick brown fox");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn different_content_hashes_differently() {
    assert_ne!(hash("a"), hash("b"));
}

#[test]
fn hash_to_uuid_is_well_formed_and_deterministic() {
    let h = hash("## Heading\n\nbody");
    let id1 = hash_to_uuid(&h);
    let id2 = hash_to_uuid(&h);
    assert_eq!(id1, id2);
    assert_eq!(id1.len(), 36);

    let groups: Vec<usize> = id1.split('-').map(|g| g.len()).collect();
    assert_eq!(groups, vec![8, 4, 4, 4, 12]);

    let parts: Vec<&str> = id1.split('-').collect();
    assert_eq!(&parts[2][0..1], "5");
    assert_eq!(&parts[3][0..1], "8");
}

#[test]
fn namespace_uuid_is_version_four_not_five() {
    let id = namespace_uuid("etag:https://example.com/docs/");
    let parts: Vec<&str> = id.split('-').collect();
    assert_eq!(&parts[2][0..1], "4");
    assert_eq!(&parts[3][0..1], "8");
}

#[test]
fn hash_to_uuid_and_namespace_uuid_diverge_on_same_input() {
    let content = "etag:https://example.com/";
    let a = hash_to_uuid(&hash(content));
    let b = namespace_uuid(content);
    assert_ne!(a, b);
}

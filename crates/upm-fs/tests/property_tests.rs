use proptest::prelude::*;
use upm_fs::checksum::{compute_content_checksum, compute_dir_checksum};

proptest! {
    #[test]
    fn checksum_is_prefixed_hex(content in ".*") {
        let checksum = compute_content_checksum(&content);
        let hex = checksum.strip_prefix("sha256:").unwrap();
        prop_assert_eq!(hex.len(), 64);
        prop_assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn dir_checksum_independent_of_write_order(
        files in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,16}", 1..6)
    ) {
        let forward = tempfile::tempdir().unwrap();
        for (name, body) in &files {
            std::fs::write(forward.path().join(name), body).unwrap();
        }
        let reverse = tempfile::tempdir().unwrap();
        for (name, body) in files.iter().rev() {
            std::fs::write(reverse.path().join(name), body).unwrap();
        }
        prop_assert_eq!(
            compute_dir_checksum(forward.path()).unwrap(),
            compute_dir_checksum(reverse.path()).unwrap()
        );
    }
}

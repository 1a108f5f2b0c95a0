use otachunk_core::digest_list::{self, expected_entries, DigestListPolicy};
use otachunk_core::{Digest, OtaError};

fn digests(n: usize) -> Vec<Digest> {
    (0..n).map(|i| Digest::of(format!("chunk {i}").as_bytes())).collect()
}

#[test]
fn all_chunks_lists_every_digest() {
    let td = tempfile::tempdir().unwrap();
    let content = digests(3);
    let p = digest_list::write(td.path(), "rootfs.squashfs", &content[0], &content, DigestListPolicy::AllChunks)
        .unwrap();
    assert_eq!(p.file_name().unwrap().to_str().unwrap(), format!("ota_md5_rootfs.squashfs.{}", content[0]));
    let text = std::fs::read_to_string(&p).unwrap();
    assert_eq!(text, format!("{}\n{}\n{}\n", content[0], content[1], content[2]));
    assert_eq!(digest_list::read(&p).unwrap(), content);
    digest_list::check(&p, &content, DigestListPolicy::AllChunks).unwrap();
}

#[test]
fn skip_anchor_lists_chain_links_only() {
    let td = tempfile::tempdir().unwrap();
    let content = digests(3);
    let p = digest_list::write(td.path(), "img", &content[0], &content, DigestListPolicy::SkipAnchor).unwrap();
    assert_eq!(digest_list::read(&p).unwrap(), &content[..2]);
    assert_eq!(expected_entries(&content, DigestListPolicy::SkipAnchor).len(), 2);

    // Single chunk: nothing to list, the file is empty.
    let one = digests(1);
    let p1 = digest_list::write(td.path(), "tiny", &one[0], &one, DigestListPolicy::SkipAnchor).unwrap();
    assert_eq!(std::fs::read(&p1).unwrap(), b"");
}

#[test]
fn check_reports_count_and_value_mismatch() {
    let td = tempfile::tempdir().unwrap();
    let content = digests(3);
    let p = digest_list::write(td.path(), "img", &content[0], &content, DigestListPolicy::AllChunks).unwrap();
    let err = digest_list::check(&p, &content, DigestListPolicy::SkipAnchor).unwrap_err();
    assert!(matches!(err, OtaError::DigestListMismatch { .. }));

    let mut other = content.clone();
    other[1] = Digest::of(b"tampered");
    let err = digest_list::check(&p, &other, DigestListPolicy::AllChunks).unwrap_err();
    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn find_returns_every_sidecar_for_the_base() {
    let td = tempfile::tempdir().unwrap();
    let a = digests(2);
    digest_list::write(td.path(), "img", &a[0], &a, DigestListPolicy::AllChunks).unwrap();
    digest_list::write(td.path(), "img", &a[1], &a, DigestListPolicy::AllChunks).unwrap();
    digest_list::write(td.path(), "other", &a[0], &a, DigestListPolicy::AllChunks).unwrap();
    let found = digest_list::find(td.path(), "img").unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|(_, h)| a.contains(h)));
}

#[test]
fn policy_names() {
    assert_eq!("all".parse::<DigestListPolicy>().unwrap(), DigestListPolicy::AllChunks);
    assert_eq!("skip-anchor".parse::<DigestListPolicy>().unwrap(), DigestListPolicy::SkipAnchor);
    assert_eq!(DigestListPolicy::SkipAnchor.to_string(), "skip-anchor");
    assert!("none".parse::<DigestListPolicy>().is_err());
}

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn write_random(path: &std::path::Path, bytes: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    std::fs::write(path, &data).unwrap();
    data
}

#[test]
fn encode_verify_decode_happy_path() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("rootfs.squashfs");
    let data = write_random(image.path(), 200 * 1024, 1);
    let out = td.child("ota_v0");

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap()])
        .args(["--chunk-size", "65536"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chunks: 4"))
        .stdout(predicate::str::contains("rootfs_size: 204800"));

    out.child("ota_v0.ok").assert(predicate::path::exists());
    out.child("ota_update.in").assert(predicate::str::contains("img_type=rootfs\nimg_name=rootfs.squashfs\nimg_size=204800\n"));
    out.child("ota_update.in").assert(predicate::str::starts_with("ota_version=0\n\n"));

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["verify", out.path().to_str().unwrap(), "--base-name", "rootfs.squashfs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    let rebuilt = td.child("rebuilt.squashfs");
    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["decode", out.path().to_str().unwrap(), "--base-name", "rootfs.squashfs", "--verify"])
        .args(["-o", rebuilt.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chain OK"));
    assert_eq!(std::fs::read(rebuilt.path()).unwrap(), data);
}

#[test]
fn verify_fails_on_wrong_anchor_policy() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("img");
    write_random(image.path(), 10_000, 2);
    let out = td.child("set");

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap()])
        .args(["--chunk-size", "4096", "--anchor", "whole-image", "--digest-list", "skip-anchor", "--no-manifest"])
        .assert()
        .success();
    out.child("ota_update.in").assert(predicate::path::missing());

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["verify", out.path().to_str().unwrap(), "--base-name", "img"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("chain verification failed at chunk 0"));

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["verify", out.path().to_str().unwrap(), "--base-name", "img"])
        .args(["--anchor", "whole-image", "--digest-list", "skip-anchor"])
        .assert()
        .success();
}

#[test]
fn verify_warns_when_last_chunk_is_unverified() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("img");
    write_random(image.path(), 4096, 6);
    let out = td.child("set");
    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap()])
        .args(["--chunk-size", "1024", "--digest-list", "skip-anchor", "--no-manifest"])
        .assert()
        .success();

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["verify", out.path().to_str().unwrap(), "--base-name", "img", "--digest-list", "skip-anchor"])
        .assert()
        .success()
        .stdout(predicate::str::contains("last chunk (unverified)"))
        .stderr(predicate::str::contains("last chunk is not covered"));
}

#[test]
fn failed_verified_decode_writes_nothing() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("img");
    write_random(image.path(), 4096, 7);
    let out = td.child("set");
    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap()])
        .args(["--chunk-size", "1024", "--no-manifest", "--no-marker"])
        .assert()
        .success();
    let chunk = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_str().unwrap().starts_with("img.0001."))
        .unwrap();
    let mut bytes = std::fs::read(&chunk).unwrap();
    bytes[0] ^= 0xFF;
    std::fs::write(&chunk, bytes).unwrap();

    let rebuilt = td.child("rebuilt.img");
    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["decode", out.path().to_str().unwrap(), "--base-name", "img", "--verify"])
        .args(["-o", rebuilt.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("chain verification failed at chunk 1"));
    rebuilt.assert(predicate::path::missing());
}

#[test]
fn empty_image_is_rejected() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("rootfs.squashfs");
    image.touch().unwrap();
    let out = td.child("out");
    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty input"));
    out.assert(predicate::path::missing());
}

#[test]
fn existing_manifest_is_updated_in_place() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("rootfs.squashfs");
    write_random(image.path(), 5000, 3);
    let out = td.child("ota_v0");
    out.create_dir_all().unwrap();
    let manifest = out.child("ota_update.in");
    manifest
        .write_str("ota_version=0\n\nimg_type=kernel\nimg_name=xImage\nimg_size=10\nimg_md5=5d41402abc4b2a76b9719d911017c592\n\nimg_type=rootfs\nimg_name=rootfs.squashfs\nimg_size=1\nimg_md5=00000000000000000000000000000000\n\n")
        .unwrap();

    let assert = Command::cargo_bin("otachunk")
        .unwrap()
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap(), "--json"])
        .args(["--chunk-size", "1024", "--no-marker"])
        .assert()
        .success();
    let report: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let anchor = report["anchor_digest"].as_str().unwrap().to_string();
    assert_eq!(report["chunk_count"], 5);

    manifest.assert(predicate::str::contains("img_type=kernel\nimg_name=xImage\nimg_size=10\n"));
    manifest.assert(predicate::str::contains(format!("img_size=5000\nimg_md5={anchor}\n")));
    out.child("ota_v0.ok").assert(predicate::path::missing());
}

#[test]
fn manifest_set_reports_missing_block() {
    let td = assert_fs::TempDir::new().unwrap();
    let manifest = td.child("ota_update.in");
    let original = "ota_version=0\n\nimg_type=kernel\nimg_size=1\nimg_md5=x\n\n";
    manifest.write_str(original).unwrap();

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["manifest", "set", manifest.path().to_str().unwrap(), "--img-type", "rootfs"])
        .args(["--size", "9", "--md5", "00112233445566778899aabbccddeeff"])
        .assert()
        .success()
        .stderr(predicate::str::contains("left unchanged"));
    manifest.assert(original);

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["manifest", "set", manifest.path().to_str().unwrap(), "--img-type", "kernel"])
        .args(["--size", "9", "--md5", "00112233445566778899aabbccddeeff"])
        .assert()
        .success();
    manifest.assert("ota_version=0\n\nimg_type=kernel\nimg_size=9\nimg_md5=00112233445566778899aabbccddeeff\n\n");
}

#[test]
fn inspect_lists_chunks_in_order() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("img");
    write_random(image.path(), 3000, 4);
    let out = td.child("set");
    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap()])
        .args(["--chunk-size", "1024", "--no-manifest", "--no-marker"])
        .assert()
        .success();

    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["inspect", out.path().to_str().unwrap(), "--base-name", "img"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 chunk(s) of img"))
        .stdout(predicate::str::contains("  0002  "));
}

#[test]
fn config_file_supplies_defaults() {
    let td = assert_fs::TempDir::new().unwrap();
    let image = td.child("img");
    write_random(image.path(), 3000, 5);
    let cfg = td.child("otachunk.toml");
    cfg.write_str("[encode]\nchunk_size = 1000\nota_version = 4\n\n[log]\nlevel = \"info\"\n").unwrap();
    let out = td.child("set");
    Command::cargo_bin("otachunk")
        .unwrap()
        .args(["--config", cfg.path().to_str().unwrap()])
        .args(["encode", image.path().to_str().unwrap(), "--out", out.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chunks: 3"));
    out.child("ota_v4.ok").assert(predicate::path::exists());
    out.child("ota_update.in").assert(predicate::str::starts_with("ota_version=4\n"));
}

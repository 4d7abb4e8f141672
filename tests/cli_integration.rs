use std::process::Command;
use tempfile::tempdir;

fn bin() -> String {
    env!("CARGO_BIN_EXE_tardiff").to_string()
}

#[test]
fn cli_diff_apply_roundtrip() {
    let dir = tempdir().unwrap();
    let old_dir = dir.path().join("old");
    std::fs::create_dir_all(old_dir.join("lib")).unwrap();
    let old: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(old_dir.join("lib/libfoo.so"), &old).unwrap();

    let mut new = old.clone();
    new[40_000] ^= 0x55;
    new.extend_from_slice(b"appended");
    let new_path = dir.path().join("libfoo.so");
    let delta = dir.path().join("libfoo.tardiff");
    let output = dir.path().join("rebuilt.so");
    std::fs::write(&new_path, &new).unwrap();

    let st = Command::new(bin())
        .arg("diff")
        .arg(&old_dir)
        .arg(&new_path)
        .arg(&delta)
        .args(["--reference", "lib/libfoo.so", "--block-size", "4096"])
        .status()
        .unwrap();
    assert!(st.success());
    assert!(std::fs::metadata(&delta).unwrap().len() < new.len() as u64 / 10);

    let st = Command::new(bin())
        .arg("apply")
        .arg(&delta)
        .arg(&old_dir)
        .arg(&output)
        .status()
        .unwrap();
    assert!(st.success());
    assert_eq!(std::fs::read(&output).unwrap(), new);
}

#[test]
fn cli_refuses_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let new_path = dir.path().join("new.txt");
    let delta = dir.path().join("d.tardiff");
    std::fs::write(&new_path, b"payload").unwrap();
    std::fs::write(&delta, b"existing").unwrap();

    let st = Command::new(bin())
        .arg("diff")
        .arg(dir.path())
        .arg(&new_path)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(!st.success());
    assert_eq!(std::fs::read(&delta).unwrap(), b"existing");

    let st = Command::new(bin())
        .arg("--force")
        .arg("diff")
        .arg(dir.path())
        .arg(&new_path)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());
}

#[test]
fn cli_apply_rejects_bad_header() {
    let dir = tempdir().unwrap();
    let delta = dir.path().join("bogus");
    let output = dir.path().join("out");
    std::fs::write(&delta, b"not a delta at all").unwrap();

    let out = Command::new(bin())
        .arg("apply")
        .arg(&delta)
        .arg(dir.path())
        .arg(&output)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("tardiff:"), "stderr: {stderr}");
    assert!(!output.exists());
}

#[test]
fn cli_ops_lists_operations() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello world").unwrap();
    let new_path = dir.path().join("new").join("notes.txt");
    std::fs::create_dir_all(new_path.parent().unwrap()).unwrap();
    std::fs::write(&new_path, b"hello world, again").unwrap();
    let delta = dir.path().join("notes.tardiff");

    // Reference defaults to the new file's name inside the old dir.
    let st = Command::new(bin())
        .arg("diff")
        .arg(dir.path())
        .arg(&new_path)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());

    let out = Command::new(bin()).arg("ops").arg(&delta).output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Open"), "stdout: {stdout}");
    assert!(stdout.contains("notes.txt"), "stdout: {stdout}");
    assert!(stdout.contains("Copy"), "stdout: {stdout}");
    assert!(stdout.contains("Data"), "stdout: {stdout}");
}

#[test]
fn cli_json_summary() {
    let dir = tempdir().unwrap();
    let new_path = dir.path().join("fresh.bin");
    let delta = dir.path().join("fresh.tardiff");
    std::fs::write(&new_path, b"no old counterpart").unwrap();

    let out = Command::new(bin())
        .args(["--json", "--quiet", "diff"])
        .arg(dir.path().join("missing-old-dir"))
        .arg(&new_path)
        .arg(&delta)
        .output()
        .unwrap();
    assert!(out.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(summary["command"], "diff");
    assert_eq!(summary["literal_bytes"], 18);
}

#[test]
fn cli_config_works() {
    let out = Command::new(bin()).arg("config").output().unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("DEFAULT_LEVEL=3"));
}

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn riskgate_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_riskgate"));
    cmd.env("HOME", home);
    cmd.env_remove("RISKGATE_CONFIG");
    cmd.env_remove("RISKGATE_UI_COLOR");
    cmd.env_remove("RISKGATE_UI_MAX_TABLE_ROWS");
    cmd.env_remove("RISKGATE_SCAN_EXCLUDE");
    cmd.env_remove("RISKGATE_SCORING_CRITICAL");
    cmd.env_remove("RISKGATE_SCORING_HIGH");
    cmd.env_remove("RISKGATE_SCORING_MEDIUM");
    cmd.env_remove("RISKGATE_SCORING_LOW");
    cmd.env_remove("RISKGATE_POLICY_GATE_BELOW");
    cmd.env_remove("RISKGATE_PRIVACY_MASK_HOME");
    cmd.env_remove("RISKGATE_REPORT_INCLUDE_EVIDENCE");
    cmd.env_remove("API_TOKEN");
    cmd.env_remove("AUTH_TOKEN");
    cmd
}

fn run(home: &Path, workdir: &Path, args: &[&str]) -> Output {
    riskgate_cmd(home)
        .current_dir(workdir)
        .args(args)
        .output()
        .expect("run riskgate")
}

fn make_temp_dir(label: &str) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "riskgate-config-test-{label}-{}-{seq}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create dir");
    dir
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

#[test]
fn config_scoring_table_changes_penalties() {
    let home = make_temp_dir("home");
    let work = make_temp_dir("work");
    write_file(work.join("target.js").as_path(), b"const out = eval(input);\n");
    write_file(
        home.join(".config/riskgate/config.toml").as_path(),
        br#"
[scoring]
medium = 2
"#,
    );

    let out = run(&home, &work, &["impact", "--file", "target.js", "--json"]);
    assert!(out.status.success());

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v.get("confidence").and_then(|c| c.as_u64()), Some(98));
    let findings = v.get("findings").and_then(|f| f.as_array()).expect("findings");
    assert_eq!(findings[0].get("penalty").and_then(|p| p.as_u64()), Some(2));

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&work);
}

#[test]
fn config_gate_below_makes_even_safe_scores_blocking() {
    let home = make_temp_dir("home");
    let work = make_temp_dir("work");
    write_file(work.join("target.js").as_path(), b"const out = eval(input);\n");
    write_file(
        home.join(".config/riskgate/config.toml").as_path(),
        br#"
[scoring]
medium = 2

[policy]
gate_below = 99
"#,
    );

    let out = run(&home, &work, &["impact", "--file", "target.js", "--json"]);
    assert_eq!(out.status.code(), Some(1));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v.get("confidence").and_then(|c| c.as_u64()), Some(98));
    assert_eq!(
        v.pointer("/verdict/banner").and_then(|b| b.as_str()),
        Some("SAFE TO PROCEED")
    );
    assert_eq!(
        v.pointer("/verdict/blocking").and_then(|b| b.as_bool()),
        Some(true)
    );

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&work);
}

#[test]
fn config_policy_bands_replace_default_banners() {
    let home = make_temp_dir("home");
    let work = make_temp_dir("work");
    write_file(work.join("target.js").as_path(), b"const out = eval(input);\n");
    write_file(
        home.join(".config/riskgate/config.toml").as_path(),
        br#"
[policy]
gate_below = 0

[[policy.bands]]
min_confidence = 80
banner = "GO"
blocking = false

[[policy.bands]]
min_confidence = 0
banner = "NO GO"
blocking = false
"#,
    );

    let out = run(&home, &work, &["impact", "--file", "target.js", "--json"]);
    assert!(out.status.success());

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v.get("confidence").and_then(|c| c.as_u64()), Some(85));
    assert_eq!(
        v.pointer("/verdict/banner").and_then(|b| b.as_str()),
        Some("GO")
    );

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&work);
}

#[test]
fn config_show_emits_effective_config() {
    let home = make_temp_dir("home");
    write_file(
        home.join(".config/riskgate/config.toml").as_path(),
        br#"
[ui]
max_table_rows = 3
"#,
    );

    let out = run(&home, &home, &["config", "--show"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("max_table_rows = 3"), "stdout={stdout}");
    assert!(stdout.contains("config_path"), "stdout={stdout}");
    assert!(stdout.contains("gate_below = 70"), "stdout={stdout}");
    assert!(stdout.contains("critical = 40"), "stdout={stdout}");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn broken_config_exits_2() {
    let home = make_temp_dir("home");
    write_file(
        home.join(".config/riskgate/config.toml").as_path(),
        b"[scoring\nbroken",
    );

    let out = run(&home, &home, &["config", "--show"]);
    assert_eq!(out.status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&home);
}

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
        "riskgate-impact-test-{label}-{}-{seq}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create dir");
    dir
}

fn parse_json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).expect("parse json")
}

#[test]
fn security_patterns_force_high_risk_but_stay_advisory_at_70() {
    let home = make_temp_dir("home");
    let work = make_temp_dir("work");
    std::fs::write(
        work.join("target.js"),
        b"const password = 'x';\nconst out = eval(input);\n",
    )
    .expect("write");

    let out = run(&home, &work, &["impact", "--file", "target.js", "--json"]);
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let v = parse_json(&out);
    assert_eq!(v.get("confidence").and_then(|c| c.as_u64()), Some(70));
    assert_eq!(v.get("risk_level").and_then(|r| r.as_str()), Some("high"));
    assert_eq!(
        v.pointer("/verdict/banner").and_then(|b| b.as_str()),
        Some("PROCEED WITH CAUTION")
    );
    assert_eq!(
        v.pointer("/verdict/blocking").and_then(|b| b.as_bool()),
        Some(false)
    );

    let findings = v.get("findings").and_then(|f| f.as_array()).expect("findings");
    let types: Vec<&str> = findings
        .iter()
        .filter_map(|f| f.get("type").and_then(|t| t.as_str()))
        .collect();
    assert!(types.contains(&"DANGEROUS_CALL_EVAL"), "types={types:?}");
    assert!(types.contains(&"SECRET_IDENTIFIER"), "types={types:?}");

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&work);
}

#[test]
fn breaking_diff_blocks_at_review_tier() {
    let home = make_temp_dir("home");
    let work = make_temp_dir("work");
    std::fs::write(work.join("mod.js"), b"const x = 1;\n").expect("write");
    std::fs::write(work.join("old.js"), b"export function handle(req) {}\n").expect("write");
    std::fs::write(work.join("new.js"), b"function handle(req, res) {}\n").expect("write");

    let out = run(
        &home,
        &work,
        &[
            "impact", "--file", "mod.js", "--before", "old.js", "--after", "new.js", "--json",
        ],
    );
    assert_eq!(out.status.code(), Some(1));

    let v = parse_json(&out);
    assert_eq!(v.get("confidence").and_then(|c| c.as_u64()), Some(50));
    assert_eq!(v.get("risk_level").and_then(|r| r.as_str()), Some("high"));
    assert_eq!(
        v.pointer("/verdict/banner").and_then(|b| b.as_str()),
        Some("DETAILED REVIEW REQUIRED")
    );

    let findings = v.get("findings").and_then(|f| f.as_array()).expect("findings");
    let types: Vec<&str> = findings
        .iter()
        .filter_map(|f| f.get("type").and_then(|t| t.as_str()))
        .collect();
    assert!(types.contains(&"EXPORT_REMOVED"), "types={types:?}");
    assert!(types.contains(&"FN_SIGNATURE_CHANGED"), "types={types:?}");

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&work);
}

#[test]
fn dependents_show_up_as_indirect_findings_and_notes() {
    let home = make_temp_dir("home");
    let work = make_temp_dir("work");
    std::fs::write(work.join("util.js"), b"const u = 1;\n").expect("write");
    std::fs::write(work.join("a.js"), b"const u = require('./util.js');\n").expect("write");

    let out = run(&home, &work, &["impact", "--file", "util.js", "--json"]);
    assert!(out.status.success());

    let v = parse_json(&out);
    let findings = v.get("findings").and_then(|f| f.as_array()).expect("findings");
    assert!(
        findings
            .iter()
            .any(|f| f.get("type").and_then(|t| t.as_str()) == Some("DEPENDENT_REFERENCE")),
        "findings={findings:?}"
    );

    let notes = v
        .pointer("/summary/notes")
        .and_then(|n| n.as_array())
        .expect("notes");
    assert!(
        notes
            .iter()
            .any(|n| n.as_str().is_some_and(|s| s.contains("dependents=1"))),
        "notes={notes:?}"
    );

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&work);
}

#[test]
fn new_file_is_only_a_note() {
    let home = make_temp_dir("home");
    let work = make_temp_dir("work");

    let out = run(&home, &work, &["impact", "--file", "brand-new.js", "--json"]);
    assert!(out.status.success());

    let v = parse_json(&out);
    assert_eq!(v.get("confidence").and_then(|c| c.as_u64()), Some(100));
    let notes = v
        .pointer("/summary/notes")
        .and_then(|n| n.as_array())
        .expect("notes");
    assert!(
        notes
            .iter()
            .any(|n| n.as_str().is_some_and(|s| s.starts_with("新規ファイル:"))),
        "notes={notes:?}"
    );

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&work);
}

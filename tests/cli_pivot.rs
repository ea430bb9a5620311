use std::fs;

use predicates::prelude::*;

#[test]
fn pivot_prints_chapter_verse_rows_as_json() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let tsv = temp.path().join("tn_TIT.tsv");
    fs::write(
        &tsv,
        "ID\tReference\tQuote\tOccurrence\tNote\n001\t1:1\tfoo\t1\tSome note\n",
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    let output = cmd
        .args(["pivot", "--tsv"])
        .arg(&tsv)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(
        value,
        serde_json::json!({
            "1": {
                "1": [{
                    "ID": "001",
                    "Reference": "1:1",
                    "Quote": "foo",
                    "Occurrence": "1",
                    "Note": "Some note",
                }]
            }
        })
    );
    Ok(())
}

#[test]
fn pivot_groups_bridges_and_drops_rows_without_id_or_note() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let tsv = temp.path().join("tn.tsv");
    let out = temp.path().join("out/pivot.json");
    fs::write(
        &tsv,
        concat!(
            "Reference\tID\tTags\tSupportReference\tQuote\tOccurrence\tNote\n",
            "3:5-7\ta001\t\t\t\t0\tBridge\n",
            "3:5,9\ta002\t\t\t\t0\tList\n",
            "3:6\t\t\t\t\t0\tNo id\n",
            "3:8\ta003\t\t\t\t0\t\n",
        ),
    )?;

    for _ in 0..2 {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
        cmd.args(["pivot", "--tsv"])
            .arg(&tsv)
            .arg("--out")
            .arg(&out)
            .assert()
            .success()
            .stdout("");
    }

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out)?)?;
    let verses = value["3"].as_object().map(|v| v.keys().cloned().collect::<Vec<_>>());
    assert_eq!(verses, Some(vec!["5".to_owned()]));
    let ids: Vec<&str> = value["3"]["5"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r["ID"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(ids, ["a001", "a002"]);
    Ok(())
}

#[test]
fn toc_lists_titled_sections() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let html = temp.path().join("body.html");
    fs::write(
        &html,
        r#"<div id="nav-tit" data-toc-title="Titus"><div id="nav-tit-1" data-toc-title="Titus 1"></div></div>"#,
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args(["toc", "--html"])
        .arg(&html)
        .assert()
        .success()
        .stdout(predicate::str::contains(r##"href="#nav-tit""##))
        .stdout(predicate::str::contains("Titus 1"));
    Ok(())
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let tsv = temp.path().join("empty.tsv");
    fs::write(&tsv, "")?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.env("RUST_LOG", "debug")
        .env_remove("RCPRINT_LOG")
        .args(["pivot", "--tsv"])
        .arg(&tsv)
        .assert()
        .success()
        .stdout("{}\n")
        .stderr(predicate::str::contains("parsed cli"));
    Ok(())
}

#[test]
fn missing_input_fails_with_context() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args(["pivot", "--tsv", "/nonexistent/tn.tsv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("read tsv: /nonexistent/tn.tsv"));
}

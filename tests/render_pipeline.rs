use std::fs;
use std::path::Path;

use predicates::prelude::*;

const CATALOG: &str = r#"
entries:
  - owner: unfoldingWord
    repo: { name: en_tn, owner: unfoldingWord }
    subject: TSV Translation Notes
    title: unfoldingWord Translation Notes
    abbreviation: tn
    language: en
    branch_or_tag_name: v80
    commit_sha: "1111111"
    relations: [en/ult, en/ta, en/tw, el-x-koine/ugnt?v=0.30]
    ingredients:
      - { identifier: tit, path: ./tn_TIT.tsv, title: Titus }
  - owner: unfoldingWord
    repo: { name: en_ult, owner: unfoldingWord }
    subject: Aligned Bible
    title: unfoldingWord Literal Text
    abbreviation: ult
    language: en
    branch_or_tag_name: v86
    ingredients:
      - { identifier: tit, path: ./57-TIT.usfm, title: Titus }
  - owner: unfoldingWord
    repo: { name: el-x-koine_ugnt, owner: unfoldingWord }
    subject: Greek New Testament
    title: unfoldingWord Greek New Testament
    abbreviation: ugnt
    language: el-x-koine
    branch_or_tag_name: v0.30
    ingredients:
      - { identifier: tit, path: ./57-TIT.usfm, title: Titus }
  - owner: unfoldingWord
    repo: { name: en_ta, owner: unfoldingWord }
    subject: Translation Academy
    title: unfoldingWord Translation Academy
    abbreviation: ta
    language: en
    branch_or_tag_name: v70
    ingredients:
      - { identifier: translate, path: ./translate, title: Translation Manual, sort: 1 }
  - owner: unfoldingWord
    repo: { name: en_tw, owner: unfoldingWord }
    subject: Translation Words
    title: unfoldingWord Translation Words
    abbreviation: tw
    language: en
    branch_or_tag_name: v70
    ingredients:
      - { identifier: bible, path: ./bible, title: Translation Words }
"#;

fn write(root: &Path, rel: &str, content: &str) -> anyhow::Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

fn fixture(root: &Path) -> anyhow::Result<()> {
    write(root, "catalog.yaml", CATALOG)?;
    write(
        root,
        "en_tn/tn_TIT.tsv",
        concat!(
            "Reference\tID\tTags\tSupportReference\tQuote\tOccurrence\tNote\n",
            "front:intro\tabcd\t\t\t\t0\t# Introduction to Titus\n",
            "1:1\txy12\t\trc://*/ta/man/translate/figs-metaphor\tδοῦλος\t1\tPaul calls himself a servant.\n",
            "1:2\txy13\t\tfigs-metaphor\t\t0\tHope is pictured as a place.\n",
        ),
    )?;
    write(
        root,
        "en_ult/57-TIT.usfm",
        "\\id TIT EN_ULT\n\\h Titus\n\\mt Titus\n\\c 1\n\\p\n\\v 1 Paul, a servant of God.\n\\v 2 In hope of eternal life.\n\\v 3 At the right time.\n",
    )?;
    write(
        root,
        "el-x-koine_ugnt/57-TIT.usfm",
        "\\id TIT\n\\h ΠΡΟΣ ΤΙΤΟΝ\n\\c 1\n\\p\n\\v 1 Παῦλος, δοῦλος Θεοῦ.\n\\v 2 ἐπ’ ἐλπίδι ζωῆς αἰωνίου.\n\\v 3 καιροῖς ἰδίοις.\n",
    )?;
    write(root, "en_ta/translate/figs-metaphor/title.md", "Metaphor\n")?;
    write(
        root,
        "en_ta/translate/figs-metaphor/01.md",
        "A metaphor speaks of one thing as another. Compare [[rc://*/tw/dict/bible/kt/grace]].\n",
    )?;
    write(
        root,
        "en_tw/bible/kt/grace.md",
        "# grace\n\n## Definition:\n\nGrace is help that is not earned.\n",
    )?;
    Ok(())
}

fn read_sections(out: &Path) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::from_str(&fs::read_to_string(
        out.join("sections.json"),
    )?)?)
}

#[test]
fn notes_render_with_appendices_and_nested_links() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let resources = temp.path().join("resources");
    let out = temp.path().join("out");
    fixture(&resources)?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args(["render", "--resource", "unfoldingWord/en_tn", "--book", "tit"])
        .arg("--resources")
        .arg(&resources)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let sections = read_sections(&out)?;
    let body = sections["body"].as_str().unwrap_or_default();

    assert!(body.contains(r#"id="nav-tit""#));
    assert!(body.contains(r#"id="nav-tit-1-1""#));
    assert!(body.contains("Paul, a servant of God."));
    assert!(body.contains("(There are no notes for this verse)"));
    assert!(body.contains("(ORIG QUOTE)"));

    // Both notes point at one TA record with two back-refs.
    assert_eq!(
        body.matches(r#"id="appendex--ta--translate--figs-metaphor""#).count(),
        1
    );
    assert!(body.contains(r##"<a href="#nav-tit-1-1-xy12">1:1</a>; <a href="#nav-tit-1-2-xy13">1:2</a>"##));
    assert!(!body.contains("[[rc://"));

    // The TW link inside the TA article gets its own appendix entry.
    assert!(body.contains(r#"id="appendex-tw""#));
    assert!(body.contains(r#"id="appendex--tw--bible--kt--grace""#));
    assert!(body.contains(r##"href="#appendex--tw--bible--kt--grace""##));

    let copyright = sections["copyright"].as_str().unwrap_or_default();
    assert!(copyright.contains("unfoldingWord Translation Academy"));
    let toc = sections["toc"].as_str().unwrap_or_default();
    assert!(toc.contains(r##"href="#nav-tit-1""##));

    assert!(out.join("index.html").is_file());
    Ok(())
}

#[test]
fn rendering_twice_is_byte_identical() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let resources = temp.path().join("resources");
    fixture(&resources)?;

    let mut bodies = Vec::new();
    for name in ["a", "b"] {
        let out = temp.path().join(name);
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
        cmd.args(["render", "--resource", "en/tn", "--book", "TIT"])
            .arg("--resources")
            .arg(&resources)
            .arg("--out")
            .arg(&out)
            .assert()
            .success();
        bodies.push(fs::read_to_string(out.join("sections.json"))?);
    }
    assert_eq!(bodies[0], bodies[1]);
    Ok(())
}

#[test]
fn print_paginates_and_writes_page_css() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let resources = temp.path().join("resources");
    let out = temp.path().join("print/tit.html");
    fixture(&resources)?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args([
        "print",
        "--resource",
        "en_ult",
        "--book",
        "tit",
        "--page-size",
        "letter",
        "--columns",
        "2",
        "--hide-copyright",
    ])
    .arg("--resources")
    .arg(&resources)
    .arg("--out")
    .arg(&out)
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""state": "ready""#))
    .stdout(predicate::str::contains(r#""percent_done": 100"#));

    let html = fs::read_to_string(&out)?;
    assert!(html.contains("size: 8.5in 11in;"));
    assert!(html.contains("columns: 2;"));
    assert!(html.contains(r#"id="pagedjs-print""#));
    assert!(!html.contains("copyright-page\">"));
    Ok(())
}

#[test]
fn unknown_page_size_is_rejected() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let resources = temp.path().join("resources");
    fixture(&resources)?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args(["print", "--resource", "en_ult", "--book", "tit", "--page-size", "folio"])
        .arg("--resources")
        .arg(&resources)
        .arg("--out")
        .arg(temp.path().join("x.html"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown page size"));
    Ok(())
}

#[test]
fn render_fills_the_cache_and_cache_get_reads_it() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let resources = temp.path().join("resources");
    let cache_dir = temp.path().join("cache");
    fixture(&resources)?;
    let config = temp.path().join("rcprint.yaml");
    fs::write(
        &config,
        format!(
            "cache:\n  dir: {}\n  verification_key: k1\n",
            cache_dir.display()
        ),
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args(["render", "--resource", "en_ult", "--book", "tit"])
        .arg("--resources")
        .arg(&resources)
        .arg("--config")
        .arg(&config)
        .arg("--out")
        .arg(temp.path().join("out"))
        .assert()
        .success();
    assert!(
        cache_dir
            .join("u/unfoldingWord/en_ult/v86/tit.json.gz")
            .is_file()
    );

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args([
        "cache", "get", "--owner", "unfoldingWord", "--repo", "en_ult", "--ref", "v86", "--book",
        "tit", "--key", "k1",
    ])
    .arg("--config")
    .arg(&config)
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""book_id": "tit""#))
    .stdout(predicate::str::contains("nav-tit-1-1"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rcprint");
    cmd.args([
        "cache", "get", "--owner", "unfoldingWord", "--repo", "en_ult", "--ref", "v86", "--book",
        "tit", "--key", "wrong",
    ])
    .arg("--dir")
    .arg(&cache_dir)
    .arg("--config")
    .arg(&config)
    .assert()
    .failure()
    .stderr(predicate::str::contains("verification key mismatch"));
    Ok(())
}

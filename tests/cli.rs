use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/input/build_response.json")
}

#[test]
fn renders_svg_from_build_response() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = fixture();
    assert!(fixture.exists(), "fixture build response should exist");

    let tmp = tempdir()?;
    let output_path = tmp.path().join("states.svg");

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("render")
        .arg("--input")
        .arg(&fixture)
        .arg("--output")
        .arg(&output_path)
        .arg("--state-dir")
        .arg(tmp.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Generated diagram"));

    let svg_contents = fs::read_to_string(&output_path)?;
    assert!(
        svg_contents.contains("<svg"),
        "output should contain an <svg> element"
    );
    assert!(svg_contents.contains("State 9"));

    Ok(())
}

#[test]
fn renders_to_stdout_with_viewport() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("render")
        .arg("-i")
        .arg(fixture())
        .arg("-o")
        .arg("-")
        .arg("--zoom")
        .arg("2")
        .arg("--pan-x")
        .arg("-40");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("translate(-40, 0) scale(2)"));

    Ok(())
}

#[test]
fn render_reads_build_from_stdin() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let output_path = tmp.path().join("piped.svg");

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("render")
        .arg("-i")
        .arg("-")
        .arg("-o")
        .arg(&output_path)
        .arg("--quiet")
        .write_stdin(fs::read_to_string(fixture())?);

    cmd.assert().success().stdout(predicate::str::is_empty());
    assert!(fs::read_to_string(&output_path)?.contains("State 0"));

    Ok(())
}

#[cfg(feature = "png")]
#[test]
fn renders_png_when_requested() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let output_path = tmp.path().join("states.png");

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("render")
        .arg("-i")
        .arg(fixture())
        .arg("-o")
        .arg(&output_path)
        .arg("--scale")
        .arg("1");

    cmd.assert().success();
    let bytes = fs::read(&output_path)?;
    assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));

    Ok(())
}

#[test]
fn render_without_saved_build_fails() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("render").arg("--state-dir").arg(tmp.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no saved build"));

    Ok(())
}

#[test]
fn show_reports_empty_session() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("show").arg("--state-dir").arg(tmp.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No saved session"));

    Ok(())
}

#[test]
fn show_prints_saved_tables() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    fs::copy(fixture(), tmp.path().join("lr1_build_data.json"))?;
    fs::write(tmp.path().join("lr1_grammar.json"), "\"S -> C C\\nC -> c C | d\"")?;

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("show").arg("--state-dir").arg(tmp.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("S -> C C"))
        .stdout(predicate::str::contains("ACTION Table"))
        .stdout(predicate::str::contains("GOTO Table"));

    Ok(())
}

#[test]
fn parse_without_grammar_fails_before_contacting_service() -> Result<(), Box<dyn std::error::Error>>
{
    let tmp = tempdir()?;

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("parse")
        .arg("-t")
        .arg("c d d")
        .arg("--state-dir")
        .arg(tmp.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no grammar given"));

    Ok(())
}

#[test]
fn build_rejects_empty_grammar_file() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let grammar = tmp.path().join("empty.txt");
    fs::write(&grammar, "   \n")?;

    let mut cmd = Command::cargo_bin("lr1view")?;
    cmd.arg("build")
        .arg("-g")
        .arg(&grammar)
        .arg("--state-dir")
        .arg(tmp.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("was empty"));

    Ok(())
}

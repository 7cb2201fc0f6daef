use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn write_fixture(dir: &Path, total: u64, page_size: u32, fail_pages: &[u32]) -> PathBuf {
    let records: Vec<Value> = (1..=total)
        .map(|id| {
            serde_json::json!({
                "id": id,
                "title": format!("Artwork {id}"),
                "place_of_origin": "France",
                "artist_display": null,
                "inscriptions": null,
                "date_start": 1900,
                "date_end": 1901
            })
        })
        .collect();
    let body = serde_json::json!({
        "page_size": page_size,
        "records": records,
        "fail_pages": fail_pages
    });
    let path = dir.join("collection.json");
    fs::write(&path, body.to_string())
        .unwrap_or_else(|err| panic!("failed to write fixture {}: {err}", path.display()));
    path
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn run_psel<I, S>(fixture: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_psel"))
        .args(["--source", "fixture", "--fixture", path_str(fixture)])
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute psel binary: {err}"))
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(fixture: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_psel(fixture, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "psel command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }
    stdout_json(&output)
}

fn selected_ids(view: &Value) -> Vec<u64> {
    view.get("selected_ids")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing selected_ids in view: {view}"))
        .iter()
        .filter_map(Value::as_u64)
        .collect()
}

#[test]
fn page_command_reports_view_with_contract_version() {
    let dir = unique_temp_dir("psel-page");
    let fixture = write_fixture(&dir, 23, 10, &[]);

    let value = run_json(&fixture, ["page", "--page", "3", "--selected", "21"]);
    assert_eq!(value["contract_version"], "cli.v1");
    assert_eq!(value["view"]["page"], 3);
    assert_eq!(value["view"]["page_count"], 3);
    assert_eq!(value["view"]["records"].as_array().map(Vec::len), Some(3));
    assert_eq!(value["view"]["page_fully_selected"], false);
    assert_eq!(selected_ids(&value["view"]), vec![21]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn toggle_page_keeps_selection_from_other_pages() {
    let dir = unique_temp_dir("psel-toggle-page");
    let fixture = write_fixture(&dir, 30, 10, &[]);

    let checked = run_json(
        &fixture,
        ["toggle-page", "--page", "2", "--checked", "true", "--selected", "1", "--selected", "12"],
    );
    assert_eq!(checked["changed"], 9);
    assert_eq!(checked["view"]["page_fully_selected"], true);
    assert_eq!(checked["view"]["selected_count"], 11);

    let cleared = run_json(
        &fixture,
        ["toggle-page", "--page", "2", "--checked", "false", "--selected", "1", "--selected", "12"],
    );
    assert_eq!(cleared["changed"], 1);
    assert_eq!(selected_ids(&cleared["view"]), vec![1]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn toggle_record_off_page_fails() {
    let dir = unique_temp_dir("psel-toggle-record");
    let fixture = write_fixture(&dir, 30, 10, &[]);

    let selected = run_json(&fixture, ["toggle-record", "--page", "1", "--id", "4"]);
    assert_eq!(selected["selected"], true);

    let output = run_psel(&fixture, ["toggle-record", "--page", "1", "--id", "14"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not on the current page"), "stderr was: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn select_spans_pages_and_streams_progress() {
    let dir = unique_temp_dir("psel-select");
    let fixture = write_fixture(&dir, 100, 10, &[]);

    let output = run_psel(&fixture, ["select", "--page", "1", "--target", "15", "--progress"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let value = stdout_json(&output);
    assert_eq!(value["report"]["outcome"], "target_reached");
    assert_eq!(value["report"]["pages_fetched"], 1);
    assert_eq!(selected_ids(&value["view"]), (1..=15).collect::<Vec<_>>());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let progress: Vec<Value> = stderr
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(|line| line.get("remaining").is_some())
        .collect();
    assert_eq!(progress.len(), 2);
    assert_eq!(selected_ids(&progress[0]), (1..=10).collect::<Vec<_>>());
    assert_eq!(progress[1]["selected_count"], 15);
    assert_eq!(selected_ids(&progress[1]), (1..=15).collect::<Vec<_>>());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn select_stops_at_end_of_collection() {
    let dir = unique_temp_dir("psel-exhausted");
    let fixture = write_fixture(&dir, 23, 10, &[]);

    let value = run_json(&fixture, ["select", "--target", "25"]);
    assert_eq!(value["report"]["outcome"], "exhausted");
    assert_eq!(value["report"]["pages_fetched"], 2);
    assert_eq!(value["view"]["selected_count"], 23);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn select_below_current_count_is_noop() {
    let dir = unique_temp_dir("psel-noop");
    let fixture = write_fixture(&dir, 30, 10, &[]);

    let mut args = vec!["select".to_string(), "--target".to_string(), "5".to_string()];
    for id in 1..=7 {
        args.push("--selected".to_string());
        args.push(id.to_string());
    }
    let value = run_json(&fixture, &args);
    assert_eq!(value["report"]["outcome"], "already_satisfied");
    assert_eq!(value["view"]["selected_count"], 7);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn failed_fetch_reports_partial_selection() {
    let dir = unique_temp_dir("psel-failure");
    let fixture = write_fixture(&dir, 100, 10, &[3]);

    let output = run_psel(&fixture, ["select", "--target", "25"]);
    assert!(!output.status.success());
    let value = stdout_json(&output);
    assert_eq!(value["status"], "failed");
    assert_eq!(value["view"]["selected_count"], 20);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("selection run stopped early"), "stderr was: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}

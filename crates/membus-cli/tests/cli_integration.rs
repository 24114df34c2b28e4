//! Integration tests for the membus CLI.

use env_logger as _;
use log as _;
use membus_cli as _;
use membus_core as _;
use serde as _;
use serde_json as _;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("membus")
}

fn create_temp_file(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn run(args: &[&str]) -> Output {
    Command::new(binary_path())
        .args(args)
        .output()
        .expect("failed to run membus")
}

const MACHINE: &str = r#"{
    "regions": [{ "name": "maincpu", "size": "0x4000", "fill": "0xA5" }],
    "ports": [{ "name": "IN0", "value": "0x3C" }],
    "spaces": [{
        "name": "program",
        "data_width": 8,
        "address_width": 16,
        "ranges": [
            { "start": "0x0000", "end": "0x3FFF",
              "read": "rom", "write": "rom", "region": "maincpu" },
            { "start": "0x8000", "end": "0x87FF", "mirror": "0x1800",
              "read": "ram", "write": "ram" },
            { "start": "0xA000", "end": "0xA000", "read": { "port": "IN0" } }
        ]
    }]
}"#;

#[test]
fn probe_reads_rom_ram_port_and_gaps() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_temp_file(temp_dir.path(), "machine.json", MACHINE);

    let output = run(&[
        "probe",
        config.to_str().unwrap(),
        "0x0010",
        "0x9000",
        "0xA000",
        "0x4000",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("program:00000010 = A5"));
    assert!(lines[1].starts_with("program:00009000 = 00"));
    assert!(lines[2].starts_with("program:0000A000 = 3C"));
    assert!(lines[3].starts_with("program:00004000 = FF (unmapped)"));
}

#[test]
fn dump_lists_read_and_write_tables() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_temp_file(temp_dir.path(), "machine.json", MACHINE);

    let output = run(&["dump", config.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("space 'program':"));
    assert!(stdout.contains("read table:"));
    assert!(stdout.contains("00000000-00003FFF"));
    assert!(stdout.contains("00004000-00007FFF    = 01: unmapped"));

    let output = run(&["dump", config.to_str().unwrap(), "--write", "--space", "program"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("write table:"));
    assert!(stdout.contains("00000000-00003FFF    = 02: nop"));
    assert!(stdout.contains("0000A000-0000FFFF    = 01: unmapped"));
}

#[test]
fn invalid_range_exits_with_config_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_temp_file(
        temp_dir.path(),
        "bad.json",
        r#"{ "spaces": [{ "name": "program", "data_width": 8, "address_width": 16,
             "ranges": [{ "start": "0x2000", "end": "0x1000", "read": "ram" }] }] }"#,
    );

    let output = run(&["dump", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.starts_with("error:"));
}

#[test]
fn missing_file_exits_with_config_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let missing = temp_dir.path().join("absent.json");

    let output = run(&["probe", missing.to_str().unwrap(), "0"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unknown_space_exits_with_config_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_temp_file(temp_dir.path(), "machine.json", MACHINE);

    let output = run(&["probe", config.to_str().unwrap(), "0", "--space", "io"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("unknown space 'io'"));
}

#[test]
fn usage_errors_exit_with_two() {
    assert_eq!(run(&["assemble"]).status.code(), Some(2));
    assert_eq!(run(&[]).status.code(), Some(2));
    assert_eq!(run(&["probe", "machine.json"]).status.code(), Some(2));
}

#[test]
fn help_exits_cleanly() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("Usage: membus"));
}

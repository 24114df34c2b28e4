//! CLI entry point for the membus inspector binary.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use log as _;
use membus_cli::report::{dump, probe};
use membus_cli::{parse_number, CliError, Machine, MachineFile};
use membus_core::{AccessKind, Offset};
use serde as _;
use serde_json as _;
#[cfg(test)]
use tempfile as _;

const USAGE_TEXT: &str = "\
Usage: membus <command> [options]

Commands:
  dump  <config.json> [--space NAME] [--write]  List every window of a dispatch table
  probe <config.json> <address>... [--space NAME]  Read addresses and name their handlers

Options:
  -s, --space <name>  Space to inspect (dump: all spaces, probe: first space)
  -w, --write         Dump the write table instead of the read table
  -h, --help          Show this help message

Addresses are decimal or 0x-prefixed hexadecimal logical addresses.

Examples:
  membus dump machine.json --space program
  membus probe machine.json 0x8000 0xC000
";

const EXIT_CONFIG: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Dump(DumpArgs),
    Probe(ProbeArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct DumpArgs {
    input: PathBuf,
    space: Option<String>,
    write: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct ProbeArgs {
    input: PathBuf,
    space: Option<String>,
    addresses: Vec<Offset>,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "dump" => parse_dump_args(args)
            .map(Command::Dump)
            .map(ParseResult::Command),
        "probe" => parse_probe_args(args)
            .map(Command::Probe)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

#[allow(clippy::while_let_on_iterator)]
fn parse_dump_args(mut args: impl Iterator<Item = OsString>) -> Result<DumpArgs, String> {
    let mut input: Option<PathBuf> = None;
    let mut space: Option<String> = None;
    let mut write = false;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--write" || arg == "-w" {
            write = true;
            continue;
        }

        if arg == "--space" || arg == "-s" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --space".to_string())?;
            space = Some(value.to_string_lossy().to_string());
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if input.is_some() {
            return Err("multiple input paths provided".to_string());
        }
        input = Some(PathBuf::from(arg));
    }

    let input = input.ok_or_else(|| "missing input path".to_string())?;
    Ok(DumpArgs {
        input,
        space,
        write,
    })
}

#[allow(clippy::while_let_on_iterator)]
fn parse_probe_args(mut args: impl Iterator<Item = OsString>) -> Result<ProbeArgs, String> {
    let mut input: Option<PathBuf> = None;
    let mut space: Option<String> = None;
    let mut addresses = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--space" || arg == "-s" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --space".to_string())?;
            space = Some(value.to_string_lossy().to_string());
            continue;
        }

        let text = arg.to_string_lossy().to_string();
        if text.starts_with('-') {
            return Err(format!("unknown option: {text}"));
        }

        if input.is_none() {
            input = Some(PathBuf::from(arg));
            continue;
        }

        let address = parse_number(&text)
            .and_then(|value| Offset::try_from(value).ok())
            .ok_or_else(|| format!("invalid address: {text}"))?;
        addresses.push(address);
    }

    let input = input.ok_or_else(|| "missing input path".to_string())?;
    if addresses.is_empty() {
        return Err("missing address".to_string());
    }
    Ok(ProbeArgs {
        input,
        space,
        addresses,
    })
}

fn load(input: &std::path::Path) -> Result<Machine, CliError> {
    let file = MachineFile::load(input)?;
    Machine::build(&file)
}

fn run_dump(args: &DumpArgs) -> Result<(), i32> {
    let kind = if args.write {
        AccessKind::Write
    } else {
        AccessKind::Read
    };
    let report = load(&args.input).and_then(|machine| dump(&machine, args.space.as_deref(), kind));
    match report {
        Ok(text) => {
            print!("{text}");
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            Err(EXIT_CONFIG)
        }
    }
}

fn run_probe(args: &ProbeArgs) -> Result<(), i32> {
    let report = load(&args.input)
        .and_then(|machine| probe(&machine, args.space.as_deref(), &args.addresses));
    match report {
        Ok(text) => {
            print!("{text}");
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            Err(EXIT_CONFIG)
        }
    }
}

fn main() {
    env_logger::init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Dump(args))) => match run_dump(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Ok(ParseResult::Command(Command::Probe(args))) => match run_probe(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
                0
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
                EXIT_USAGE
            }
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn os<'a>(args: &'a [&'a str]) -> impl Iterator<Item = OsString> + 'a {
        args.iter().map(OsString::from)
    }

    #[test]
    fn parses_dump_command() {
        let result = parse_dump_args(os(&["machine.json", "--space", "io", "-w"]))
            .expect("valid dump args should parse");

        assert_eq!(
            result,
            DumpArgs {
                input: PathBuf::from("machine.json"),
                space: Some("io".to_string()),
                write: true,
            }
        );
    }

    #[test]
    fn parses_probe_addresses() {
        let result = parse_probe_args(os(&["machine.json", "0x8000", "49152", "-s", "program"]))
            .expect("valid probe args should parse");

        assert_eq!(
            result,
            ProbeArgs {
                input: PathBuf::from("machine.json"),
                space: Some("program".to_string()),
                addresses: vec![0x8000, 0xC000],
            }
        );
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(os(&["--help"])).expect("help should parse without error");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_unknown_command() {
        let error = parse_args(os(&["unknown"])).expect_err("unknown command should fail parse");
        assert!(error.contains("unknown command"));
    }

    #[test]
    fn probe_requires_an_address() {
        let error =
            parse_probe_args(os(&["machine.json"])).expect_err("missing address should fail");
        assert!(error.contains("missing address"));
    }

    #[test]
    fn probe_rejects_bad_address() {
        let error = parse_probe_args(os(&["machine.json", "0x1_0000_0000"]))
            .expect_err("address past 32 bits should fail");
        assert!(error.contains("invalid address"));

        let error = parse_probe_args(os(&["machine.json", "banana"]))
            .expect_err("non-numeric address should fail");
        assert!(error.contains("invalid address"));
    }

    #[test]
    fn dump_missing_input() {
        let error = parse_dump_args(std::iter::empty()).expect_err("missing input should fail");
        assert!(error.contains("missing input"));
    }

    #[test]
    fn dump_rejects_unknown_option() {
        let error = parse_dump_args(os(&["machine.json", "--verbose"]))
            .expect_err("dump should reject unknown options");
        assert!(error.contains("unknown option"));
    }
}

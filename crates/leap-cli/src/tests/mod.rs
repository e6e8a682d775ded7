//! Tests for argument handling and the plugin run loop.


use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::process::ExitCode;

use leap_config::Config;
use rstest::rstest;
use tempfile::TempDir;

use super::*;

pub(super) struct Outcome {
    pub(super) exit: ExitCode,
    pub(super) stdout: String,
    pub(super) stderr: String,
}

fn argv(args: &[&str]) -> Vec<OsString> {
    std::iter::once("leap")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn invoke_with(args: &[&str], loader: &dyn ConfigLoader) -> Outcome {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = run_with_loader(argv(args), &mut stdout, &mut stderr, loader);
    Outcome {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

pub(super) fn invoke(args: &[&str]) -> Outcome {
    invoke_with(args, &OrthoConfigLoader)
}

fn parse(args: &[&str]) -> Cli {
    let split = split_config_arguments(&argv(args));
    Cli::try_parse_from(split.cli_arguments).expect("parse")
}

/// Loader returning a fixed configuration and remembering what it was given.
#[derive(Default)]
struct RecordingLoader {
    config: Config,
    seen: RefCell<Vec<OsString>>,
}

impl ConfigLoader for RecordingLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        self.seen.borrow_mut().extend(args.iter().cloned());
        Ok(self.config.clone())
    }
}

fn write_config(contents: &str) -> (TempDir, String) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("leap.toml");
    fs::write(&path, contents).expect("write config");
    let text = path.to_str().expect("utf8 path").to_owned();
    (dir, text)
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

#[test]
fn command_after_separator_keeps_its_flags() {
    let cli = parse(&["--desc", "echo", "--", "/bin/echo", "-n", "--log-filter"]);
    assert_eq!(cli.desc.as_deref(), Some("echo"));
    assert_eq!(cli.command, ["/bin/echo", "-n", "--log-filter"]);
}

#[test]
fn command_may_follow_options_without_separator() {
    let cli = parse(&["--tick-interval-ms", "5", "python3", "plugin.py"]);
    assert_eq!(cli.command, ["python3", "plugin.py"]);
    assert_eq!(plugin_params(&cli).description(), "plugin.py");
}

#[rstest]
#[case(&["--log-format", "json"])]
#[case(&["--log-filter=debug", "--tick-interval-ms", "7"])]
#[case(&["--config-path", "leap.toml", "--queue-pumps", "work"])]
fn leading_config_flags_reach_the_loader(#[case] flags: &[&str]) {
    let loader = RecordingLoader::default();
    let mut args = flags.to_vec();
    args.extend(["--desc", "idle"]);

    let outcome = invoke_with(&args, &loader);

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("no plugin command specified"));
    assert_eq!(*loader.seen.borrow(), argv(flags));
}

#[test]
fn unknown_log_format_fails_configuration() {
    let outcome = invoke(&["--log-format", "yaml", "--", "/bin/true"]);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.starts_with("leap: failed to load configuration"));
}

#[test]
fn help_is_written_to_stdout() {
    let outcome = invoke(&["--help"]);
    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("Usage: leap"));
    assert!(outcome.stdout.contains("--config-path"));
    assert!(outcome.stderr.is_empty());
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[test]
fn malformed_config_file_fails() {
    let (_dir, path) = write_config("tick_interval_ms = \"soon\"\n");
    let outcome = invoke(&["--config-path", &path, "--", "/bin/true"]);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("failed to load configuration"));
}

#[test]
fn zero_tick_interval_fails() {
    let (_dir, path) = write_config("tick_interval_ms = 0\n");
    let outcome = invoke(&["--config-path", &path, "--", "/bin/true"]);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(
        outcome.stderr.contains("invalid configuration: tick_interval_ms"),
        "stderr was: {}",
        outcome.stderr
    );
}

#[test]
fn empty_command_names_no_plugin() {
    let outcome = invoke(&[]);
    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("no plugin command specified"));
}

#[cfg(unix)]
#[test]
fn run_returns_once_the_plugin_exits() {
    let outcome = invoke(&["--tick-interval-ms", "1", "--", "/bin/sh", "-c", "exit 3"]);
    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    assert!(outcome.stderr.is_empty());
}

// ---------------------------------------------------------------------------
// Panic forwarding
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn host_panic_reaches_the_plugin_as_a_fatal_error() {
    use std::panic;
    use std::thread;
    use std::time::{Duration, Instant};

    let dir = TempDir::new().expect("temp dir");
    let capture = dir.path().join("stdin.leap");
    let script = format!("exec cat > '{}'", capture.display());
    let host = LeapHost::default();
    let handle = host
        .launch(&LeapParams::new(["/bin/sh".to_owned(), "-c".to_owned(), script]))
        .expect("launch capture plugin");
    let forwarding = forward_panics(host.fatal_hooks());

    let outcome: thread::Result<()> = panic::catch_unwind(|| panic!("disk on fire"));
    drop(forwarding);
    assert!(outcome.is_err());

    let received = || {
        let text = fs::read_to_string(&capture).unwrap_or_default();
        text.contains(r#""error":"disk on fire""#) && text.contains(r#""type":"error""#)
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while !received() && Instant::now() < deadline {
        host.tick();
        thread::sleep(Duration::from_millis(10));
    }
    assert!(received(), "plugin never saw the fatal error");

    assert!(handle.kill());
}

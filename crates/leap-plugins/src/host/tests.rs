//! Unit tests for launching plugins.

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn host() -> LeapHost {
    LeapHost::default()
}

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

#[rstest]
#[case::plain(&["/usr/bin/plugin", "--flag"][..], "plugin")]
#[case::python(&["/usr/bin/python3", "-u", "tools/leap_plugin.py"][..], "leap_plugin.py")]
#[case::versioned_python(&["python3.12", "script.py"][..], "script.py")]
#[case::interpreter_without_script(&["python", "-i"][..], "python")]
#[case::shell(&["/bin/sh", "/opt/plugins/run.sh"][..], "run.sh")]
#[case::empty(&[][..], "")]
fn descriptions_follow_the_command(#[case] parts: &[&str], #[case] expected: &str) {
    assert_eq!(describe(&command(parts)), expected);
}

#[rstest]
fn explicit_description_wins() {
    let params = LeapParams::new(["/usr/bin/plugin"]).desc("friendly");
    assert_eq!(params.description(), "friendly");
    assert_eq!(LeapParams::new(["/usr/bin/plugin"]).desc("").description(), "plugin");
}

// ---------------------------------------------------------------------------
// Launch failures
// ---------------------------------------------------------------------------

#[rstest]
fn empty_command_is_no_plugin_in_both_conventions(host: LeapHost) {
    let params = LeapParams::new(Vec::<String>::new());

    assert!(matches!(host.launch(&params), Err(LeapError::NoPlugin)));
    assert!(matches!(host.launch_or_none(&params), Err(LeapError::NoPlugin)));
    assert_eq!(host.session_count(), 0);
}

#[rstest]
fn missing_executable_fails_or_is_suppressed(host: LeapHost) {
    let params = LeapParams::new(["/nonexistent/leap-plugin"]);

    let err = host.launch(&params).expect_err("missing executable");
    assert!(matches!(err, LeapError::LaunchFailed { ref desc, .. } if desc == "leap-plugin"));

    let suppressed = host.launch_or_none(&params).expect("suppressed");
    assert!(suppressed.is_none());
    assert_eq!(host.session_count(), 0);
    assert!(!host.bus().names().iter().any(|name| name.ends_with(".postend")));
}

#[rstest]
fn queue_pumps_are_declared_on_the_bus() {
    let config = SessionConfig {
        queue_pumps: vec!["work".to_owned()],
        ..SessionConfig::default()
    };
    let host = LeapHost::new(config);
    assert_eq!(host.bus().obtain("work").mode(), DispatchMode::Queued);
    assert_eq!(host.bus().obtain("other").mode(), DispatchMode::Immediate);
}

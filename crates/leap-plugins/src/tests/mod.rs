//! Session tests driven by real `/bin/sh` plugins.

#![cfg(unix)]


use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use leap_events::{Connection, EventBus};
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;
use tracing_test::traced_test;

use crate::codec::Envelope;
use crate::error::{CodecError, LeapError};
use crate::host::{LeapHost, LeapParams};
use crate::protocol::{FrameParser, frame};
use crate::session::SessionHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Ticks the host until `done` holds or ten seconds pass.
pub(crate) fn tick_until(host: &LeapHost, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        host.tick();
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

pub(crate) fn record(bus: &EventBus, pump: &str) -> (Rc<RefCell<Vec<Value>>>, Connection) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let connection = bus
        .obtain(pump)
        .listen("test-recorder", move |event: &Value| {
            sink.borrow_mut().push(event.clone());
            false
        })
        .expect("recorder");
    (events, connection)
}

pub(crate) fn shell_plugin(script: &str) -> LeapParams {
    LeapParams::new(["/bin/sh", "-c", script]).desc("sh-plugin")
}

/// Renders envelopes as a `printf` that writes them as frames.
pub(crate) fn printf_frames(envelopes: &[Envelope]) -> String {
    let wire: Vec<u8> = envelopes
        .iter()
        .flat_map(|envelope| frame(envelope).expect("frame"))
        .collect();
    format!("printf '%s' '{}'", String::from_utf8(wire).expect("utf8 frames"))
}

struct Capture {
    _dir: TempDir,
    path: PathBuf,
}

impl Capture {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("stdin.leap");
        Self { _dir: dir, path }
    }

    fn plugin(&self) -> LeapParams {
        shell_plugin(&format!("exec cat > '{}'", self.path.display()))
    }

    fn frames(&self) -> Vec<Envelope> {
        frames_in(&self.path)
    }
}

fn frames_in(path: &Path) -> Vec<Envelope> {
    let mut bytes = fs::read(path).unwrap_or_default();
    let mut frames = Vec::new();
    FrameParser::default()
        .parse(&mut bytes, &mut |envelope: Envelope| frames.push(envelope))
        .ok();
    frames
}

#[fixture]
fn host() -> LeapHost {
    LeapHost::default()
}

fn launch_capture(host: &LeapHost) -> (Capture, SessionHandle) {
    let capture = Capture::new();
    let handle = host.launch(&capture.plugin()).expect("launch capture plugin");
    (capture, handle)
}

fn request(host: &LeapHost, handle: &SessionHandle, mut body: Value) {
    let command = handle.command_pump().expect("command pump");
    let reply = handle.reply_pump().expect("reply pump");
    if let Some(map) = body.as_object_mut() {
        map.insert("reply".to_owned(), json!(reply));
    }
    host.bus().post(&command, &body);
}

/// Waits for the plugin to receive a frame on its reply pump carrying `reqid`.
fn reply_to(host: &LeapHost, capture: &Capture, reqid: u64) -> Value {
    let found = |frames: Vec<Envelope>| {
        frames
            .into_iter()
            .map(|envelope| envelope.into_parts().1)
            .find(|data| data.get("reqid") == Some(&json!(reqid)))
    };
    assert!(
        tick_until(host, || found(capture.frames()).is_some()),
        "no reply with reqid {reqid}"
    );
    found(capture.frames()).expect("reply")
}

fn end(host: &LeapHost, handle: &SessionHandle) {
    assert!(handle.kill());
    assert!(tick_until(host, || !handle.is_alive()));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[rstest]
fn priming_message_comes_first(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);
    let reply = handle.reply_pump().expect("reply pump");
    let command = handle.command_pump().expect("command pump");

    assert!(tick_until(&host, || !capture.frames().is_empty()));

    let priming = capture.frames().into_iter().next().expect("priming");
    assert_eq!(priming.pump(), reply);
    assert_eq!(priming.data().get("command"), Some(&json!(command)));
    assert_eq!(priming.data().get("features"), Some(&host.features().to_value()));
    end(&host, &handle);
}

#[rstest]
fn reply_pumps_are_unguessable(host: LeapHost) {
    let (_first_capture, first) = launch_capture(&host);
    let (_second_capture, second) = launch_capture(&host);
    let first_reply = first.reply_pump().expect("reply pump");

    assert_eq!(first_reply.len(), 36);
    assert_ne!(Some(first_reply), second.reply_pump());
    end(&host, &first);
    end(&host, &second);
}

#[rstest]
fn plugin_frames_reach_named_pumps(host: LeapHost) {
    let (events, _recorder) = record(host.bus(), "test.inbox");
    let script = printf_frames(&[
        Envelope::new("test.inbox", json!({"n": 1})),
        Envelope::new("test.inbox", json!({"n": 2})),
    ]);
    let handle = host.launch(&shell_plugin(&script)).expect("launch");

    assert!(tick_until(&host, || !handle.is_alive()));

    assert_eq!(*events.borrow(), [json!({"n": 1}), json!({"n": 2})]);
    assert_eq!(host.session_count(), 0);
}

#[rstest]
fn terminated_session_releases_its_pumps(host: LeapHost) {
    let handle = host.launch(&shell_plugin("exit 0")).expect("launch");
    let reply = handle.reply_pump().expect("reply pump");
    let command = handle.command_pump().expect("command pump");

    assert!(tick_until(&host, || !handle.is_alive()));

    assert!(!host.bus().contains(&reply));
    assert!(!host.bus().contains(&command));
    assert!(host.bus().apis().is_empty());
    assert!(host.fatal_hooks().is_empty());
}

#[rstest]
fn killing_twice_then_dropping_is_safe(host: LeapHost) {
    let handle = host.launch(&shell_plugin("exec sleep 30")).expect("launch");

    assert!(handle.kill());
    assert!(handle.kill());
    assert!(tick_until(&host, || !handle.is_alive()));
    assert!(handle.kill());

    let err = handle
        .post_to_plugin("anything", &json!({}))
        .expect_err("terminated");
    assert!(matches!(err, LeapError::Terminated { .. }));
    drop(host);
    assert!(handle.kill());
}

// ---------------------------------------------------------------------------
// Malformed output
// ---------------------------------------------------------------------------

#[test]
#[traced_test]
fn bad_length_prefix_kills_the_plugin() {
    let host = LeapHost::default();
    let (events, _recorder) = record(host.bus(), "test.inbox");
    let handle = host
        .launch(&shell_plugin("printf '5a2:xxxxx'; exec sleep 30"))
        .expect("launch");

    assert!(tick_until(&host, || !handle.is_alive()));

    assert!(events.borrow().is_empty());
    assert!(logs_contain("bad length prefix"));
    assert!(logs_contain("killing plugin"));
}

#[test]
#[traced_test]
fn partial_frame_is_discarded_at_exit() {
    let host = LeapHost::default();
    let handle = host.launch(&shell_plugin("printf '15:hello'")).expect("launch");

    assert!(tick_until(&host, || !handle.is_alive()));

    assert!(logs_contain("discarding unparsed plugin output"));
    assert!(!logs_contain("protocol error"));
}

#[test]
#[traced_test]
fn undecodable_last_frame_is_reported_at_exit() {
    let host = LeapHost::default();
    let handle = host.launch(&shell_plugin("printf '5:hello'")).expect("launch");

    assert!(tick_until(&host, || !handle.is_alive()));

    assert!(logs_contain("undecodable 5-byte frame body 'hello'"));
    assert!(logs_contain("plugin terminated"));
    assert_eq!(host.session_count(), 0);
}

#[test]
#[traced_test]
fn stderr_lines_are_logged_against_the_plugin() {
    let host = LeapHost::default();
    let handle = host
        .launch(&shell_plugin("echo 'WARNING: careful now' >&2; printf 'no newline' >&2"))
        .expect("launch");

    assert!(tick_until(&host, || !handle.is_alive()));

    assert!(logs_contain("careful now"));
    assert!(logs_contain("no newline"));
    assert!(logs_contain("sh-plugin"));
}

// ---------------------------------------------------------------------------
// Command API
// ---------------------------------------------------------------------------

#[rstest]
fn posting_to_an_empty_pump_writes_nothing(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);
    let primed = |frames: &[Envelope]| frames.len() == 1;
    assert!(tick_until(&host, || primed(&capture.frames())));

    let err = handle
        .post_to_plugin("", &json!({"n": 1}))
        .expect_err("empty pump");
    assert!(matches!(err, LeapError::Codec(CodecError::EmptyPump)));

    handle
        .post_to_plugin("test.after", &json!({"n": 2}))
        .expect("session still usable");
    let after = Envelope::new("test.after", json!({"n": 2}));
    assert!(tick_until(&host, || capture.frames().contains(&after)));
    assert_eq!(capture.frames().len(), 2);
    end(&host, &handle);
}

#[rstest]
fn ping_is_answered_on_the_reply_pump(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);

    request(&host, &handle, json!({"op": "ping", "reqid": 1}));

    assert_eq!(reply_to(&host, &capture, 1), json!({"reqid": 1}));
    end(&host, &handle);
}

#[rstest]
fn unknown_operation_replies_with_error(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);

    request(&host, &handle, json!({"op": "launchRocket", "reqid": 2}));

    let reply = reply_to(&host, &capture, 2);
    assert!(reply.get("error").and_then(Value::as_str).is_some_and(|e| e.contains("launchRocket")));
    end(&host, &handle);
}

#[rstest]
fn listen_forwards_a_pump_to_the_plugin(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);

    request(&host, &handle, json!({"op": "listen", "source": "test.news", "listener": "plugin", "reqid": 3}));
    assert_eq!(reply_to(&host, &capture, 3), json!({"status": true, "reqid": 3}));
    host.bus().post("test.news", &json!({"headline": "hi"}));

    let wanted = Envelope::new("test.news", json!({"headline": "hi"}));
    assert!(tick_until(&host, || capture.frames().contains(&wanted)));

    request(&host, &handle, json!({"op": "stoplistening", "source": "test.news", "listener": "plugin", "reqid": 4}));
    assert_eq!(reply_to(&host, &capture, 4), json!({"status": true, "reqid": 4}));
    assert!(!host.bus().obtain("test.news").has_listener("plugin"));
    end(&host, &handle);
}

#[rstest]
fn listen_with_dest_redirects_between_pumps(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);
    let (events, _recorder) = record(host.bus(), "test.b");

    request(&host, &handle, json!({"op": "listen", "source": "test.a", "listener": "relay", "dest": "test.b", "reqid": 5}));
    reply_to(&host, &capture, 5);
    host.bus().post("test.a", &json!("relayed"));

    assert_eq!(*events.borrow(), [json!("relayed")]);
    end(&host, &handle);
    assert!(!host.bus().obtain("test.a").has_listener("relay"));
}

#[rstest]
fn plugin_may_only_kill_its_own_pumps(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);

    request(&host, &handle, json!({"op": "newpump", "name": "test.made", "reqid": 6}));
    assert_eq!(reply_to(&host, &capture, 6), json!({"name": "test.made", "reqid": 6}));
    assert!(host.bus().contains("test.made"));

    request(&host, &handle, json!({"op": "killpump", "name": "mainloop", "reqid": 7}));
    assert_eq!(reply_to(&host, &capture, 7), json!({"status": false, "reqid": 7}));
    assert!(host.bus().contains("mainloop"));

    request(&host, &handle, json!({"op": "newpump", "name": "test.made", "type": "queue", "reqid": 8}));
    assert_eq!(reply_to(&host, &capture, 8), json!({"name": "test.made1", "reqid": 8}));

    request(&host, &handle, json!({"op": "killpump", "name": "test.made", "reqid": 9}));
    assert_eq!(reply_to(&host, &capture, 9), json!({"status": true, "reqid": 9}));
    assert!(!host.bus().contains("test.made"));

    end(&host, &handle);
    assert!(!host.bus().contains("test.made1"));
}

#[rstest]
fn apis_and_features_are_discoverable(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);
    let command = handle.command_pump().expect("command pump");

    request(&host, &handle, json!({"op": "getAPIs", "reqid": 10}));
    assert!(reply_to(&host, &capture, 10).get(&command).is_some());

    request(&host, &handle, json!({"op": "getAPI", "api": command, "reqid": 11}));
    let described = reply_to(&host, &capture, 11);
    assert!(described.pointer("/ops/ping/desc").is_some());

    request(&host, &handle, json!({"op": "getFeatures", "reqid": 12}));
    assert_eq!(reply_to(&host, &capture, 12).get("codec"), Some(&json!("json")));

    request(&host, &handle, json!({"op": "getFeature", "feature": "codec", "reqid": 13}));
    assert_eq!(
        reply_to(&host, &capture, 13),
        json!({"feature": "codec", "value": "json", "reqid": 13})
    );
    end(&host, &handle);
}

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

#[rstest]
fn fatal_error_reaches_the_plugin_first(host: LeapHost) {
    let (capture, handle) = launch_capture(&host);
    let reply = handle.reply_pump().expect("reply pump");

    host.fatal_hooks().raise("disk on fire");

    let wanted = Envelope::new(reply, json!({"type": "error", "error": "disk on fire"}));
    assert!(tick_until(&host, || capture.frames().contains(&wanted)));
    end(&host, &handle);
}

//! Unit tests for pump dispatch, connections and blockers.

use std::cell::RefCell;
use std::rc::Rc;

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

type Log = Rc<RefCell<Vec<String>>>;

#[fixture]
fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn recorder(log: &Log, name: &'static str, consume: bool) -> impl Fn(&Value) -> bool + 'static {
    let log = Rc::clone(log);
    move |_: &Value| {
        log.borrow_mut().push(name.to_owned());
        consume
    }
}

fn immediate(name: &str) -> EventPump {
    EventPump::new(name.to_owned(), DispatchMode::Immediate)
}

fn queued(name: &str) -> EventPump {
    EventPump::new(name.to_owned(), DispatchMode::Queued)
}

// ---------------------------------------------------------------------------
// Immediate dispatch
// ---------------------------------------------------------------------------

#[rstest]
fn post_visits_listeners_in_resolved_order(log: Log) {
    let pump = immediate("login");
    pump.listen_ordered("Mary", recorder(&log, "Mary", false), &["checked"], &[])
        .expect("Mary")
        .detach();
    pump.listen_ordered("checked", recorder(&log, "checked", false), &["spot"], &[])
        .expect("checked")
        .detach();
    pump.listen("spot", recorder(&log, "spot", false))
        .expect("spot")
        .detach();

    pump.post(&json!(17));
    pump.post(&json!(18));

    assert_eq!(
        *log.borrow(),
        ["spot", "checked", "Mary", "spot", "checked", "Mary"]
    );
}

#[rstest]
fn consuming_listener_stops_dispatch(log: Log) {
    let pump = immediate("filter");
    pump.listen("first", recorder(&log, "first", true))
        .expect("first")
        .detach();
    pump.listen("second", recorder(&log, "second", false))
        .expect("second")
        .detach();

    assert!(pump.post(&Value::Null));
    assert_eq!(*log.borrow(), ["first"]);
}

#[rstest]
fn disabled_pump_drops_posts(log: Log) {
    let pump = immediate("quiet");
    let _connection = pump.listen("ear", recorder(&log, "ear", false)).expect("ear");
    pump.enable(false);
    assert!(!pump.post(&json!("ignored")));
    assert!(log.borrow().is_empty());

    pump.enable(true);
    pump.post(&json!("heard"));
    assert_eq!(*log.borrow(), ["ear"]);
}

#[rstest]
fn pump_forwards_to_pump_listener(log: Log) {
    let upstream = immediate("upstream");
    let downstream = immediate("downstream");
    let _sink = downstream
        .listen("sink", recorder(&log, "sink", false))
        .expect("sink");
    let _forward = upstream
        .listen("forward", downstream.clone())
        .expect("forward");

    upstream.post(&json!({"x": 1}));
    assert_eq!(*log.borrow(), ["sink"]);
}

// ---------------------------------------------------------------------------
// Queued dispatch
// ---------------------------------------------------------------------------

#[rstest]
fn queued_pump_defers_until_flush(log: Log) {
    let pump = queued("deferred");
    let _connection = pump.listen("ear", recorder(&log, "ear", false)).expect("ear");

    assert!(!pump.post(&json!(1)));
    assert!(!pump.post(&json!(2)));
    assert_eq!(pump.queued(), 2);
    assert!(log.borrow().is_empty());

    pump.flush();
    assert_eq!(*log.borrow(), ["ear", "ear"]);
    assert_eq!(pump.queued(), 0);
}

#[test]
fn values_posted_during_flush_wait_for_next_flush() {
    let pump = queued("echo");
    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let again = pump.clone();
    pump.listen("repost", move |event: &Value| {
        sink.borrow_mut().push(event.clone());
        if event == &json!("first") {
            again.post(&json!("second"));
        }
        false
    })
    .expect("repost")
    .detach();

    pump.post(&json!("first"));
    pump.flush();
    assert_eq!(*seen.borrow(), [json!("first")]);
    assert_eq!(pump.queued(), 1);

    pump.flush();
    assert_eq!(*seen.borrow(), [json!("first"), json!("second")]);
    pump.reset();
}

#[rstest]
fn disabled_queue_does_not_enqueue(log: Log) {
    let pump = queued("closed");
    let _connection = pump.listen("ear", recorder(&log, "ear", false)).expect("ear");
    pump.enable(false);
    pump.post(&json!(1));
    assert_eq!(pump.queued(), 0);
}

// ---------------------------------------------------------------------------
// Connections and blockers
// ---------------------------------------------------------------------------

#[rstest]
fn dropping_connection_disconnects(log: Log) {
    let pump = immediate("scoped");
    {
        let connection = pump.listen("ear", recorder(&log, "ear", false)).expect("ear");
        assert!(connection.is_connected());
        assert!(pump.has_listener("ear"));
    }
    assert!(!pump.has_listener("ear"));
    pump.post(&Value::Null);
    assert!(log.borrow().is_empty());
}

#[rstest]
fn disconnect_is_idempotent_and_spares_replacements(log: Log) {
    let pump = immediate("reuse");
    let mut first = pump.listen("ear", recorder(&log, "first", false)).expect("first");
    first.disconnect();
    first.disconnect();
    assert!(!first.is_connected());

    let _second = pump.listen("ear", recorder(&log, "second", false)).expect("second");
    drop(first);
    pump.post(&Value::Null);
    assert_eq!(*log.borrow(), ["second"]);
}

#[rstest]
fn stop_listening_reports_presence(log: Log) {
    let pump = immediate("named");
    let connection = pump.listen("ear", recorder(&log, "ear", false)).expect("ear");
    assert!(pump.stop_listening("ear"));
    assert!(!pump.stop_listening("ear"));
    assert!(!connection.is_connected());
}

#[rstest]
fn nested_blockers_compose(log: Log) {
    let pump = immediate("blocked");
    let connection = pump.listen("ear", recorder(&log, "ear", false)).expect("ear");

    let outer = connection.block().expect("connected");
    let inner = pump.block("ear").expect("present");
    pump.post(&Value::Null);
    drop(outer);
    pump.post(&Value::Null);
    assert!(log.borrow().is_empty());

    drop(inner);
    pump.post(&Value::Null);
    assert_eq!(*log.borrow(), ["ear"]);
}

#[test]
fn listener_disconnected_mid_dispatch_is_skipped() {
    let pump = immediate("churn");
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let victim = pump
        .listen_ordered("victim", recorder(&log, "victim", false), &["killer"], &[])
        .expect("victim");
    let target = pump.clone();
    let killer_log = Rc::clone(&log);
    pump.listen("killer", move |_: &Value| {
        killer_log.borrow_mut().push("killer".to_owned());
        target.stop_listening("victim");
        false
    })
    .expect("killer")
    .detach();

    pump.post(&Value::Null);
    pump.post(&Value::Null);
    assert_eq!(*log.borrow(), ["killer", "killer"]);
    assert!(!victim.is_connected());
    pump.reset();
}

#[rstest]
fn reset_disconnects_everything(log: Log) {
    let pump = queued("wiped");
    let connection = pump.listen("ear", recorder(&log, "ear", false)).expect("ear");
    pump.post(&json!(1));
    pump.reset();
    assert!(!connection.is_connected());
    assert_eq!(pump.queued(), 0);
    assert!(pump.listener_names().is_empty());
}

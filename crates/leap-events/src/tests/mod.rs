//! Crate-level integration and BDD tests.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};

use crate::{EventApi, EventBus, MAINLOOP};


#[test]
fn api_served_through_queued_reply_pump() {
    let bus = EventBus::with_queues(["answers"]);
    let mut api = EventApi::new("clock", "Reports the time");
    api.add("now", "Returns a fixed time", |_| Ok(json!({"time": 42})));
    let attached = api.attach(&bus).expect("attach");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _connection = bus
        .obtain("answers")
        .listen("caller", move |event: &Value| {
            sink.borrow_mut().push(event.clone());
            false
        })
        .expect("caller");

    attached
        .pump()
        .post(&json!({"op": "now", "reply": "answers", "reqid": "r1"}));
    assert!(seen.borrow().is_empty());

    bus.post(MAINLOOP, &json!({}));
    assert_eq!(*seen.borrow(), [json!({"time": 42, "reqid": "r1"})]);
}

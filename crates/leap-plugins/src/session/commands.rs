//! The command API a plugin addresses through its priming `command` pump.
//!
//! Requests are maps naming the operation under `"op"` and the pump to
//! answer on under `"reply"`; a plugin normally passes its reply pump so
//! answers come back over stdin.

use std::rc::Weak;

use leap_events::{EventApi, EventBus};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{SESSION_TARGET, SessionInner};

const TERMINATED: &str = "plugin session has terminated";

/// Builds the command API served on `name` for one session.
pub(super) fn command_api(name: &str, session: &Weak<SessionInner>) -> EventApi {
    let mut api = EventApi::new(name, "Operations a LEAP plugin may request of its host");
    api.add_required(
        "newpump",
        "Create a pump called [\"name\"], of [\"type\"] stream or queue, and return its final name",
        &["name"],
        op(session, SessionInner::new_pump),
    );
    api.add_required(
        "killpump",
        "Delete the pump called [\"name\"], if this plugin created it",
        &["name"],
        op(session, SessionInner::kill_pump),
    );
    api.add_required(
        "listen",
        "Forward events on [\"source\"] to the plugin, or to [\"dest\"] if given, as listener [\"listener\"]",
        &["source", "listener"],
        op(session, SessionInner::listen),
    );
    api.add_required(
        "stoplistening",
        "Stop forwarding [\"source\"] through listener [\"listener\"]",
        &["source", "listener"],
        op(session, SessionInner::stop_listening),
    );
    api.add("ping", "No-op, answered to confirm the host is responsive", |_| {
        Ok(json!({}))
    });
    api.add(
        "getAPIs",
        "Map each registered API name to its description",
        op(session, |session, _| {
            Ok(Value::Object(session.live_bus()?.apis()))
        }),
    );
    api.add_required(
        "getAPI",
        "Describe the operations of API [\"api\"]",
        &["api"],
        op(session, |session, request| {
            let name = string_arg(request, "api");
            session
                .live_bus()?
                .api(name)
                .ok_or_else(|| format!("no API named '{name}'"))
        }),
    );
    api.add(
        "getFeatures",
        "Return the map of protocol features",
        op(session, |session, _| Ok(session.features.to_value())),
    );
    api.add_required(
        "getFeature",
        "Return the value of protocol feature [\"feature\"]",
        &["feature"],
        op(session, |session, request| {
            let name = string_arg(request, "feature");
            let value = session.features.get(name).cloned().unwrap_or(Value::Null);
            Ok(json!({"feature": name, "value": value}))
        }),
    );
    api
}

fn op<F>(session: &Weak<SessionInner>, handler: F) -> impl Fn(&Value) -> Result<Value, String> + 'static
where
    F: Fn(&SessionInner, &Value) -> Result<Value, String> + 'static,
{
    let weak = Weak::clone(session);
    move |request: &Value| {
        let live = weak.upgrade().ok_or_else(|| TERMINATED.to_owned())?;
        handler(&live, request)
    }
}

fn string_arg<'a>(request: &'a Value, key: &str) -> &'a str {
    request.get(key).and_then(Value::as_str).unwrap_or_default()
}

impl SessionInner {
    fn live_bus(&self) -> Result<EventBus, String> {
        self.bus.upgrade().ok_or_else(|| TERMINATED.to_owned())
    }

    fn new_pump(&self, request: &Value) -> Result<Value, String> {
        let name = string_arg(request, "name");
        let kind = request
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("stream");
        let pump = self
            .live_bus()?
            .make_typed(name, kind, true)
            .map_err(|e| e.to_string())?;
        let created = pump.name().to_owned();
        debug!(target: SESSION_TARGET, plugin = %self.desc, pump = %created, "plugin created pump");
        self.created_pumps.borrow_mut().insert(created.clone());
        Ok(json!({"name": created}))
    }

    fn kill_pump(&self, request: &Value) -> Result<Value, String> {
        let name = string_arg(request, "name");
        if !self.created_pumps.borrow_mut().remove(name) {
            warn!(target: SESSION_TARGET, plugin = %self.desc, pump = name, "refusing to delete pump the plugin did not create");
            return Ok(json!({"status": false}));
        }
        let removed = self.live_bus()?.remove(name);
        Ok(json!({"status": removed}))
    }

    fn listen(&self, request: &Value) -> Result<Value, String> {
        let source = string_arg(request, "source").to_owned();
        let listener = string_arg(request, "listener").to_owned();
        let key = (source.clone(), listener.clone());
        if self.forwards.borrow().contains_key(&key) {
            return Err(format!("already listening to '{source}' as '{listener}'"));
        }
        let bus = self.live_bus()?;
        let pump = bus.obtain(&source);
        let connection = match request.get("dest").and_then(Value::as_str) {
            Some(dest) => {
                let weak_bus = bus.downgrade();
                let dest = dest.to_owned();
                pump.listen(listener.clone(), move |event: &Value| {
                    if let Some(live) = weak_bus.upgrade() {
                        live.post(&dest, event);
                    }
                    false
                })
            }
            None => {
                let weak = Weak::clone(&self.this);
                let origin = source.clone();
                pump.listen(listener.clone(), move |event: &Value| {
                    if let Some(session) = weak.upgrade() {
                        session.forward(&origin, event);
                    }
                    false
                })
            }
        }
        .map_err(|e| e.to_string())?;
        debug!(target: SESSION_TARGET, plugin = %self.desc, source = %source, listener = %listener, "plugin listening");
        self.forwards.borrow_mut().insert(key, connection);
        Ok(json!({"status": true}))
    }

    fn stop_listening(&self, request: &Value) -> Result<Value, String> {
        let key = (
            string_arg(request, "source").to_owned(),
            string_arg(request, "listener").to_owned(),
        );
        let removed = self.forwards.borrow_mut().remove(&key);
        Ok(json!({"status": removed.is_some()}))
    }
}

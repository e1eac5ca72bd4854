/// supervisord process-control interface.
///
/// [`ProcessControl`] is the seam the restart dispatcher talks through;
/// [`SupervisorRpc`] implements it over XML-RPC.
use async_trait::async_trait;
use thiserror::Error;

use crate::transport::{HttpTransport, TransportError};
use crate::xmlrpc::{self, Value, XmlRpcError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{message} (fault {code})")]
    Fault { code: i64, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<XmlRpcError> for ControlError {
    fn from(e: XmlRpcError) -> Self {
        match e {
            XmlRpcError::Fault { code, message } => ControlError::Fault { code, message },
            other => ControlError::Decode(other.to_string()),
        }
    }
}

/// supervisord's process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unknown,
}

impl ProcessState {
    /// Maps supervisord's numeric state code; unrecognised codes are `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Stopped,
            10 => Self::Starting,
            20 => Self::Running,
            30 => Self::Backoff,
            40 => Self::Stopping,
            100 => Self::Exited,
            200 => Self::Fatal,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Backoff => "BACKOFF",
            Self::Stopping => "STOPPING",
            Self::Exited => "EXITED",
            Self::Fatal => "FATAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Builds the `group:name` identifier supervisord uses to address a process.
/// Collapses to the bare name when group and name are equal.
pub fn namespec(group: &str, name: &str) -> String {
    if group == name {
        name.to_string()
    } else {
        format!("{group}:{name}")
    }
}

/// One entry of `supervisor.getAllProcessInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub group: String,
    pub state: ProcessState,
    pub description: String,
}

impl ProcessInfo {
    pub fn namespec(&self) -> String {
        namespec(&self.group, &self.name)
    }

    fn from_value(value: &Value) -> Result<Self, ControlError> {
        let text = |key: &str| {
            value
                .member(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ControlError::Decode(format!("process info without {key:?}")))
        };
        let state = value
            .member("state")
            .and_then(Value::as_i64)
            .ok_or_else(|| ControlError::Decode("process info without \"state\"".to_string()))?;

        Ok(Self {
            name: text("name")?,
            group: text("group")?,
            state: ProcessState::from_code(state),
            description: text("description").unwrap_or_default(),
        })
    }
}

/// Remote process control as used by the restart dispatcher.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn all_process_info(&self) -> Result<Vec<ProcessInfo>, ControlError>;
    async fn stop_process(&self, namespec: &str) -> Result<(), ControlError>;
    async fn start_process(&self, namespec: &str) -> Result<(), ControlError>;
}

/// [`ProcessControl`] backed by supervisord's XML-RPC interface.
pub struct SupervisorRpc {
    transport: HttpTransport,
}

impl SupervisorRpc {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, ControlError> {
        let body = xmlrpc::encode_call(method, params);
        let response = self.transport.post(body).await?;
        Ok(xmlrpc::decode_response(&response)?)
    }

    async fn call_expecting_true(&self, method: &str, namespec: &str) -> Result<(), ControlError> {
        let value = self.call(method, &[Value::from(namespec)]).await?;
        match value.as_bool() {
            Some(true) => Ok(()),
            _ => Err(ControlError::Decode(format!("{method} returned {value:?}"))),
        }
    }
}

#[async_trait]
impl ProcessControl for SupervisorRpc {
    async fn all_process_info(&self) -> Result<Vec<ProcessInfo>, ControlError> {
        let value = self.call("supervisor.getAllProcessInfo", &[]).await?;
        value
            .as_array()
            .ok_or_else(|| ControlError::Decode("getAllProcessInfo did not return an array".to_string()))?
            .iter()
            .map(ProcessInfo::from_value)
            .collect()
    }

    async fn stop_process(&self, namespec: &str) -> Result<(), ControlError> {
        self.call_expecting_true("supervisor.stopProcess", namespec).await
    }

    async fn start_process(&self, namespec: &str) -> Result<(), ControlError> {
        self.call_expecting_true("supervisor.startProcess", namespec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Endpoint;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // ── namespec ──────────────────────────────────────────────────────────────

    #[test]
    fn namespec_collapses_when_group_equals_name() {
        assert_eq!(namespec("web", "web"), "web");
    }

    #[test]
    fn namespec_joins_group_and_name() {
        assert_eq!(namespec("workers", "worker_00"), "workers:worker_00");
    }

    // ── ProcessState ──────────────────────────────────────────────────────────

    #[test]
    fn state_codes_map_to_states() {
        assert_eq!(ProcessState::from_code(0), ProcessState::Stopped);
        assert_eq!(ProcessState::from_code(20), ProcessState::Running);
        assert_eq!(ProcessState::from_code(200), ProcessState::Fatal);
        assert_eq!(ProcessState::from_code(1000), ProcessState::Unknown);
        assert_eq!(ProcessState::from_code(7), ProcessState::Unknown);
        assert_eq!(ProcessState::Running.name(), "RUNNING");
    }

    // ── ProcessInfo::from_value ───────────────────────────────────────────────

    fn info_value(members: &[(&str, Value)]) -> Value {
        Value::Struct(
            members
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn process_info_from_struct() {
        let value = info_value(&[
            ("name", Value::from("worker_00")),
            ("group", Value::from("workers")),
            ("state", Value::Int(20)),
            ("description", Value::from("pid 12, uptime 0:01:00")),
        ]);
        let info = ProcessInfo::from_value(&value).unwrap();
        assert_eq!(info.state, ProcessState::Running);
        assert_eq!(info.namespec(), "workers:worker_00");
        assert_eq!(info.description, "pid 12, uptime 0:01:00");
    }

    #[test]
    fn process_info_requires_state() {
        let value = info_value(&[("name", Value::from("web")), ("group", Value::from("web"))]);
        assert!(matches!(
            ProcessInfo::from_value(&value),
            Err(ControlError::Decode(_))
        ));
    }

    // ── SupervisorRpc against a canned server ─────────────────────────────────

    /// Serves one canned XML-RPC response per accepted connection and returns
    /// the method names that were called.
    async fn canned_server(responses: Vec<&'static str>) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut methods = Vec::new();
            for body in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !String::from_utf8_lossy(&request).contains("</methodCall>") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let request = String::from_utf8(request).unwrap();
                let method = request
                    .split("<methodName>")
                    .nth(1)
                    .and_then(|s| s.split("</methodName>").next())
                    .unwrap_or_default()
                    .to_string();
                methods.push(method);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            methods
        });
        (port, handle)
    }

    fn rpc(port: u16) -> SupervisorRpc {
        SupervisorRpc::new(HttpTransport::new(Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        }))
    }

    const PROCESS_LIST: &str = "<?xml version='1.0'?><methodResponse><params><param><value><array><data>\
        <value><struct>\
        <member><name>name</name><value><string>web</string></value></member>\
        <member><name>group</name><value><string>web</string></value></member>\
        <member><name>state</name><value><int>20</int></value></member>\
        <member><name>statename</name><value><string>RUNNING</string></value></member>\
        </struct></value>\
        </data></array></value></param></params></methodResponse>";

    const TRUE: &str = "<?xml version='1.0'?><methodResponse><params><param>\
        <value><boolean>1</boolean></value></param></params></methodResponse>";

    const NOT_RUNNING_FAULT: &str = "<?xml version='1.0'?><methodResponse><fault><value><struct>\
        <member><name>faultCode</name><value><int>70</int></value></member>\
        <member><name>faultString</name><value><string>NOT_RUNNING: web</string></value></member>\
        </struct></value></fault></methodResponse>";

    #[tokio::test]
    async fn rpc_lists_processes() {
        let (port, server) = canned_server(vec![PROCESS_LIST]).await;
        let infos = rpc(port).all_process_info().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "web");
        assert_eq!(infos[0].state, ProcessState::Running);
        assert_eq!(server.await.unwrap(), vec!["supervisor.getAllProcessInfo"]);
    }

    #[tokio::test]
    async fn rpc_stop_then_start() {
        let (port, server) = canned_server(vec![TRUE, TRUE]).await;
        let control = rpc(port);
        control.stop_process("web").await.unwrap();
        control.start_process("web").await.unwrap();
        assert_eq!(
            server.await.unwrap(),
            vec!["supervisor.stopProcess", "supervisor.startProcess"]
        );
    }

    #[tokio::test]
    async fn rpc_fault_surfaces_as_fault() {
        let (port, _server) = canned_server(vec![NOT_RUNNING_FAULT]).await;
        match rpc(port).stop_process("web").await {
            Err(ControlError::Fault { code, message }) => {
                assert_eq!(code, 70);
                assert_eq!(message, "NOT_RUNNING: web");
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }
}

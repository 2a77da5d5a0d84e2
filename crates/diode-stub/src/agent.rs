use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use diode_core::{DIODE_POLICY_BACKEND, DIODE_POLICY_KIND};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use tiny_http::{Header, Method, Request, Response, Server};

const POLICIES_ROUTE: &str = "/api/v1/policies";
const STATUS_ROUTE: &str = "/api/v1/status";
const YAML_CONTENT_TYPE: &str = "application/x-yaml";

type PolicyStore = Arc<Mutex<BTreeMap<String, Value>>>;

#[derive(Debug, Serialize)]
struct ReturnValue {
    message: String,
}

struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn json(status: u16, value: &impl Serialize) -> Self {
        Self {
            status,
            content_type: "application/json; charset=utf-8",
            body: serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    fn message(status: u16, message: impl Into<String>) -> Self {
        Self::json(
            status,
            &ReturnValue {
                message: message.into(),
            },
        )
    }

    fn yaml(status: u16, value: &Value) -> Self {
        match serde_yaml::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: YAML_CONTENT_TYPE,
                body,
            },
            Err(err) => Self::message(500, err.to_string()),
        }
    }
}

/// In-process stand-in for the agent's policy API, bound on 127.0.0.1.
///
/// Routes and status codes mirror the real agent: YAML bodies on create and
/// get, JSON on list, delete and errors.
pub struct StubAgent {
    port: u16,
    endpoint: String,
    server: Arc<Server>,
    server_thread: Option<thread::JoinHandle<()>>,
    policies: PolicyStore,
}

impl StubAgent {
    /// Binds `port`, or an ephemeral one when `port` is 0.
    pub fn start(port: u16) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        let addr = listener.local_addr()?;
        let server = Arc::new(
            Server::from_listener(listener, None).map_err(|e| anyhow!(e.to_string()))?,
        );
        let endpoint = format!("http://{}:{}", addr.ip(), addr.port());
        let started_at = Utc::now();

        let policies: PolicyStore = Arc::new(Mutex::new(BTreeMap::new()));
        let store = policies.clone();
        let incoming = server.clone();
        let handle = thread::spawn(move || {
            for request in incoming.incoming_requests() {
                handle_request(request, &store, started_at);
            }
        });
        tracing::debug!(%endpoint, "stub agent listening");

        Ok(Self {
            port: addr.port(),
            endpoint,
            server,
            server_thread: Some(handle),
            policies,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.policies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.server_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StubAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_request(mut request: Request, store: &PolicyStore, started_at: DateTime<Utc>) {
    let path = request.url().split('?').next().unwrap_or("").to_string();
    let method = request.method().clone();
    let reply = match (method, path.as_str()) {
        (Method::Get, STATUS_ROUTE) => {
            let up_time = Utc::now().signed_duration_since(started_at);
            Reply::json(
                200,
                &json!({
                    "start_time": started_at.to_rfc3339(),
                    "up_time": up_time.num_nanoseconds().unwrap_or(i64::MAX),
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )
        }
        (Method::Get, POLICIES_ROUTE) => {
            let names: Vec<String> = lock(store).keys().cloned().collect();
            Reply::json(200, &names)
        }
        (Method::Post, POLICIES_ROUTE) => {
            let content_type = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Content-Type"))
                .map(|h| h.value.to_string());
            let mut body = String::new();
            match request.as_reader().read_to_string(&mut body) {
                Ok(_) => create_policy(store, content_type.as_deref(), &body),
                Err(err) => Reply::message(403, err.to_string()),
            }
        }
        (method, path) => match policy_name(path) {
            Some(name) if method == Method::Get => match lock(store).get(&name) {
                Some(policy) => Reply::yaml(200, policy),
                None => Reply::message(404, "policy not found"),
            },
            Some(name) if method == Method::Delete => match lock(store).remove(&name) {
                Some(_) => Reply::message(200, format!("{} was deleted", name)),
                None => Reply::message(404, "policy not found"),
            },
            _ => Reply::message(404, "404 page not found"),
        },
    };

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response = response.with_header(header);
    }
    let _ = request.respond(response);
}

fn lock(store: &PolicyStore) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

fn policy_name(path: &str) -> Option<String> {
    let raw = path.strip_prefix(POLICIES_ROUTE)?.strip_prefix('/')?;
    if raw.is_empty() || raw.contains('/') {
        return None;
    }
    Some(percent_decode_str(raw).decode_utf8_lossy().to_string())
}

fn create_policy(store: &PolicyStore, content_type: Option<&str>, body: &str) -> Reply {
    if content_type != Some(YAML_CONTENT_TYPE) {
        return Reply::message(
            403,
            "invalid Content-Type. Only 'application/x-yaml' is supported",
        );
    }
    let payload: BTreeMap<String, Value> = match serde_yaml::from_str(body) {
        Ok(payload) => payload,
        Err(err) => return Reply::message(403, err.to_string()),
    };
    if payload.len() > 1 {
        return Reply::message(403, "only single policy allowed per request");
    }
    let Some((name, policy)) = payload.into_iter().next() else {
        return Reply::message(403, "policy name is required");
    };

    let mut policies = lock(store);
    if policies.contains_key(&name) {
        return Reply::message(409, "policy already exists");
    }
    let has_data = policy
        .get("data")
        .and_then(Value::as_object)
        .is_some_and(|data| !data.is_empty());
    if !has_data {
        return Reply::message(403, "data field is required");
    }
    let backend = policy.get("backend").and_then(Value::as_str).unwrap_or("");
    if backend != DIODE_POLICY_BACKEND {
        return Reply::message(403, format!("backend '{}' not supported", backend));
    }
    if policy.get("kind").and_then(Value::as_str) != Some(DIODE_POLICY_KIND) {
        return Reply::message(403, "invalid policy kind");
    }

    let reply = Reply::yaml(201, &policy);
    policies.insert(name, policy);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PolicyStore {
        Arc::new(Mutex::new(BTreeMap::new()))
    }

    const POLICY: &str = "p1:\n  kind: discovery\n  backend: suzieq\n  config: {}\n  data:\n    inventory: {}\n";

    #[test]
    fn create_requires_yaml_content_type() {
        let reply = create_policy(&store(), Some("application/json"), POLICY);
        assert_eq!(reply.status, 403);
        assert!(reply.body.contains("Content-Type"));
    }

    #[test]
    fn create_echoes_policy_as_yaml_and_rejects_duplicates() {
        let store = store();
        let reply = create_policy(&store, Some(YAML_CONTENT_TYPE), POLICY);
        assert_eq!(reply.status, 201);
        let echoed: Value = serde_yaml::from_str(&reply.body).expect("yaml");
        assert_eq!(echoed["kind"], "discovery");

        let again = create_policy(&store, Some(YAML_CONTENT_TYPE), POLICY);
        assert_eq!(again.status, 409);
    }

    #[test]
    fn create_validates_payload_shape() {
        let two = "a:\n  kind: discovery\nb:\n  kind: discovery\n";
        assert_eq!(create_policy(&store(), Some(YAML_CONTENT_TYPE), two).status, 403);

        let no_data = "p:\n  kind: discovery\n  backend: suzieq\n";
        let reply = create_policy(&store(), Some(YAML_CONTENT_TYPE), no_data);
        assert!(reply.body.contains("data field is required"));

        let bad_kind = POLICY.replace("discovery", "collection");
        let reply = create_policy(&store(), Some(YAML_CONTENT_TYPE), &bad_kind);
        assert!(reply.body.contains("invalid policy kind"));
    }

    #[test]
    fn policy_name_parses_single_segment() {
        assert_eq!(policy_name("/api/v1/policies/abc"), Some("abc".to_string()));
        assert_eq!(policy_name("/api/v1/policies/a%20b"), Some("a b".to_string()));
        assert_eq!(policy_name("/api/v1/policies/"), None);
        assert_eq!(policy_name("/api/v1/policies/a/b"), None);
        assert_eq!(policy_name("/api/v1/status"), None);
    }

    #[test]
    fn start_binds_ephemeral_port_and_stops() {
        let agent = StubAgent::start(0).expect("start");
        assert_ne!(agent.port(), 0);
        assert!(agent.endpoint().ends_with(&agent.port().to_string()));
        assert!(agent.policy_names().is_empty());
        agent.stop();
    }

    #[test]
    fn second_agent_on_same_port_fails_to_bind() {
        let first = StubAgent::start(0).expect("start");
        assert!(StubAgent::start(first.port()).is_err());
    }
}

//! HTTP backend tests against an in-process responder
//!
//! The responder speaks just enough HTTP/1.1 for ureq: one request per
//! connection, `Content-Length` bodies, `Connection: close`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{Value, json};
use shelf::backend::RemoteCollection;
use shelf::models::version::from_millis;
use shelf::{
    Backend, CompositeKey, EngineSelector, InMemoryLibraryStore, LibraryStore, ManagedBackend,
    RestBackend, SavedEntry, Session, StaticSession, SyncCoordinator, SyncError, SyncOptions,
    SyncOutcome, SyncResult,
};

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: String,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn query(&self, name: &str) -> Option<String> {
        let (_, query) = self.path.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then(|| urlencoding::decode(v).map(|v| v.into_owned()).unwrap_or_default())
        })
    }

    fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or("")
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

type Handler = dyn Fn(&Request) -> (u16, Value) + Send + Sync;

struct MockServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockServer {
    fn start(handler: impl Fn(&Request) -> (u16, Value) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                if let Some(request) = read_request(&stream) {
                    let (status, body) = handler(&request);
                    recorded.lock().unwrap().push(request);
                    write_response(stream, status, &body);
                }
            }
        });

        Self { base_url, requests }
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

fn read_request(stream: &TcpStream) -> Option<Request> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).ok()?;

    Some(Request {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn write_response(mut stream: TcpStream, status: u16, body: &Value) {
    let body = body.to_string();
    let reason = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Session that hands out `stale` until refreshed, then `fresh`
struct RefreshingSession {
    token: Mutex<String>,
    refreshes: AtomicUsize,
}

impl RefreshingSession {
    fn new() -> Self {
        Self {
            token: Mutex::new("stale".to_string()),
            refreshes: AtomicUsize::new(0),
        }
    }
}

impl Session for RefreshingSession {
    fn access_token(&self) -> SyncResult<String> {
        Ok(self.token.lock().unwrap().clone())
    }

    fn refresh(&self) -> SyncResult<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        *self.token.lock().unwrap() = "fresh".to_string();
        Ok("fresh".to_string())
    }

    fn user_id(&self) -> Option<String> {
        Some("u1".to_string())
    }
}

fn saved_row(manga: &str, datetime: i64) -> Value {
    json!({
        "mangaId": manga,
        "pluginId": "p1",
        "datetime": datetime,
        "updates": false,
        "latestChapter": "",
    })
}

/// Serve `rows` as a REST listing honouring `os`/`lm`
fn page_of(rows: &[Value], request: &Request) -> Value {
    let offset: usize = request.query("os").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: usize = request.query("lm").and_then(|v| v.parse().ok()).unwrap_or(rows.len());
    let end = (offset + limit).min(rows.len());
    Value::Array(rows[offset.min(end)..end].to_vec())
}

fn static_session() -> Arc<dyn Session> {
    Arc::new(StaticSession::new("tok").with_user_id("u1"))
}

// === REST backend ===

#[test]
fn test_rest_pagination_drains_every_page() {
    let mut rows: Vec<Value> = (0..120)
        .map(|i| saved_row(&format!("m{:03}", i), 1000 + i))
        .collect();
    rows[7] = json!({ "pluginId": "p1", "datetime": 5 });

    let server = MockServer::start(move |req| (200, page_of(&rows, req)));
    let backend = RestBackend::new(&server.base_url, static_session());

    let records = backend.saved().fetch_since(None).unwrap();
    assert_eq!(records.len(), 119);

    let offsets: Vec<String> = server
        .requests()
        .iter()
        .map(|r| r.query("os").unwrap())
        .collect();
    assert_eq!(offsets, vec!["0", "50", "100"]);
    assert!(server.requests().iter().all(|r| r.route() == "/saveds"));
    assert!(server.requests().iter().all(|r| r.query("lm").as_deref() == Some("50")));
}

#[test]
fn test_rest_since_filter_and_latest() {
    let server = MockServer::start(|req| {
        if req.query("lm").as_deref() == Some("1") && req.query("os").is_none() {
            (200, json!([saved_row("m9", 900)]))
        } else {
            (200, json!([]))
        }
    });
    let backend = RestBackend::new(&server.base_url, static_session());

    let latest = backend.saved().fetch_latest().unwrap().unwrap();
    assert_eq!(latest.key, CompositeKey::new("m9", "p1"));

    backend.saved().fetch_since(from_millis(1234)).unwrap();
    let requests = server.requests();
    assert_eq!(requests[1].query("ts").as_deref(), Some("1234"));
    assert_eq!(requests[1].header("authorization"), Some("Bearer tok"));
}

#[test]
fn test_rest_push_and_delete() {
    let server = MockServer::start(|_| (200, json!({})));
    let backend = RestBackend::with_page_size(&server.base_url, static_session(), 2);

    let entries: Vec<SavedEntry> = (0..3)
        .map(|i| {
            SavedEntry::new((format!("m{}", i), "p1".to_string()))
                .with_datetime(from_millis(100 + i).unwrap())
                .with_snapshot("c1")
        })
        .collect();
    backend.saved().push(&entries).unwrap();
    backend
        .saved()
        .delete(&[CompositeKey::new("a b", "p&1")])
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 3);

    // Chunked to the page size
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].route(), "/saveds");
    assert_eq!(requests[0].json().as_array().unwrap().len(), 2);
    assert_eq!(
        requests[1].json(),
        json!([{
            "mangaId": "m2",
            "pluginId": "p1",
            "datetime": 102,
            "updates": false,
            "latestChapter": "c1",
        }])
    );

    assert_eq!(requests[2].method, "DELETE");
    assert_eq!(requests[2].query("mangaId").as_deref(), Some("a b"));
    assert_eq!(requests[2].query("pluginId").as_deref(), Some("p&1"));
}

#[test]
fn test_rest_digest() {
    let server = MockServer::start(|req| match req.route() {
        "/records/hash" => (200, json!({ "hash": "abc123" })),
        _ => (404, json!({})),
    });
    let backend = RestBackend::new(&server.base_url, static_session());

    assert_eq!(backend.progress().digest(), Ok(Some("abc123".to_string())));
    assert!(matches!(backend.saved().digest(), Err(SyncError::Transport { .. })));
}

#[test]
fn test_unauthorized_request_is_retried_once_after_refresh() {
    let server = MockServer::start(|req| match req.header("authorization") {
        Some("Bearer fresh") => (200, json!([])),
        _ => (401, json!({ "error": "expired" })),
    });
    let session = Arc::new(RefreshingSession::new());
    let backend = RestBackend::new(&server.base_url, session.clone());

    assert_eq!(backend.saved().fetch_latest(), Ok(None));
    assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(server.requests().len(), 2);
}

#[test]
fn test_second_unauthorized_response_is_a_transport_error() {
    let server = MockServer::start(|_| (401, json!({})));
    let session = Arc::new(RefreshingSession::new());
    let backend = RestBackend::new(&server.base_url, session.clone());

    let err = backend.saved().fetch_all_keys().unwrap_err();
    assert!(matches!(err, SyncError::Transport { .. }));
    assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(server.requests().len(), 2);
}

#[test]
fn test_failed_refresh_is_auth_expired() {
    let server = MockServer::start(|_| (401, json!({})));
    let backend = RestBackend::new(&server.base_url, static_session());

    assert_eq!(backend.saved().fetch_latest(), Err(SyncError::AuthExpired));
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn test_signed_out_session_sends_nothing() {
    let server = MockServer::start(|_| (200, json!([])));
    let backend = RestBackend::new(&server.base_url, Arc::new(StaticSession::signed_out()));

    assert_eq!(backend.saved().fetch_latest(), Err(SyncError::BackendNotConfigured));
    assert!(server.requests().is_empty());
}

// === Managed database backend ===

#[test]
fn test_managed_key_fetch() {
    let rows: Vec<Value> = (0..3)
        .map(|i| json!({ "mangaId": format!("m{}", i), "pluginId": "p1" }))
        .collect();
    let server = MockServer::start(move |req| {
        let offset: usize = req.query("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
        let limit: usize = req.query("limit").and_then(|v| v.parse().ok()).unwrap_or(0);
        let end = (offset + limit).min(rows.len());
        (200, Value::Array(rows[offset.min(end)..end].to_vec()))
    });
    let backend = ManagedBackend::with_page_size(&server.base_url, "anon-key", static_session(), 2);

    let keys = backend.progress().fetch_all_keys().unwrap();
    assert_eq!(keys.len(), 3);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let first = &requests[0];
    assert_eq!(first.route(), "/rest/v1/Record");
    assert_eq!(first.query("select").as_deref(), Some("mangaId,pluginId"));
    assert_eq!(first.query("userId").as_deref(), Some("eq.u1"));
    assert_eq!(first.query("limit").as_deref(), Some("2"));
    assert_eq!(first.header("apikey"), Some("anon-key"));
    assert_eq!(first.header("authorization"), Some("Bearer tok"));
    assert_eq!(requests[1].query("offset").as_deref(), Some("2"));
}

#[test]
fn test_managed_since_latest_and_upsert() {
    let server = MockServer::start(|req| match req.method.as_str() {
        "GET" => (200, json!([saved_row("m1", 500)])),
        _ => (201, json!(null)),
    });
    let backend = ManagedBackend::new(&server.base_url, "anon-key", static_session());

    let latest = backend.saved().fetch_latest().unwrap().unwrap();
    assert_eq!(latest.datetime.timestamp_millis(), 500);
    backend.saved().fetch_since(from_millis(400)).unwrap();

    let entry = SavedEntry::new(("m1", "p1")).with_datetime(from_millis(600).unwrap());
    backend.saved().push(&[entry]).unwrap();
    backend
        .saved()
        .delete(&[CompositeKey::new("m1", "p1")])
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].query("order").as_deref(), Some("datetime.desc"));
    assert_eq!(requests[0].query("limit").as_deref(), Some("1"));
    assert_eq!(requests[1].query("datetime").as_deref(), Some("gt.400"));

    let upsert = &requests[2];
    assert_eq!(upsert.method, "POST");
    assert_eq!(upsert.route(), "/rest/v1/Saved");
    assert_eq!(upsert.query("on_conflict").as_deref(), Some("userId,mangaId,pluginId"));
    assert!(upsert.header("prefer").unwrap().contains("resolution=merge-duplicates"));
    assert_eq!(upsert.json()[0]["userId"], "u1");
    assert_eq!(upsert.json()[0]["datetime"], 600);

    let delete = &requests[3];
    assert_eq!(delete.method, "DELETE");
    assert_eq!(delete.query("mangaId").as_deref(), Some("eq.m1"));
    assert_eq!(delete.query("pluginId").as_deref(), Some("eq.p1"));
}

// === End to end ===

/// REST responder holding a real collection for `/saveds`
fn stateful_rest(initial: Vec<Value>) -> MockServer {
    let saved = Arc::new(Mutex::new(initial));
    MockServer::start(move |req| {
        let mut rows = saved.lock().unwrap();
        match (req.method.as_str(), req.route()) {
            ("GET", "/saveds") => {
                rows.sort_by_key(|r| std::cmp::Reverse(r["datetime"].as_i64()));
                let since = req.query("ts").and_then(|v| v.parse::<i64>().ok());
                let filtered: Vec<Value> = rows
                    .iter()
                    .filter(|r| since.is_none_or(|ts| r["datetime"].as_i64().unwrap_or(0) > ts))
                    .cloned()
                    .collect();
                (200, page_of(&filtered, req))
            }
            ("PUT", "/saveds") => {
                for incoming in req.json().as_array().cloned().unwrap_or_default() {
                    rows.retain(|r| {
                        r["mangaId"] != incoming["mangaId"] || r["pluginId"] != incoming["pluginId"]
                    });
                    rows.push(incoming);
                }
                (200, json!({}))
            }
            ("GET", "/records") => (200, json!([])),
            _ => (404, json!({})),
        }
    })
}

#[test]
fn test_coordinator_over_rest() {
    let server = stateful_rest(vec![saved_row("m1", 150), saved_row("m2", 90)]);
    let backend: Arc<dyn Backend> = Arc::new(RestBackend::new(&server.base_url, static_session()));

    let store = Arc::new(InMemoryLibraryStore::new());
    store
        .upsert_saved_batch(vec![
            SavedEntry::new(("m1", "p1")).with_datetime(from_millis(100).unwrap()),
        ])
        .unwrap();

    let selector = Arc::new(EngineSelector::new(store.clone()));
    selector.select(Some(backend)).unwrap();
    let coordinator = SyncCoordinator::new(store.clone(), selector, SyncOptions::default());

    let SyncOutcome::Completed(report) = coordinator.sync() else {
        panic!("backend should be selected");
    };
    assert!(report.is_success(), "{:?}", report.errors());

    let local: Vec<(String, i64)> = store
        .list_saved()
        .unwrap()
        .into_iter()
        .map(|e| (e.key.manga_id, e.datetime.timestamp_millis()))
        .collect();
    assert_eq!(local, vec![("m1".to_string(), 150), ("m2".to_string(), 90)]);

    // Nothing local was newer, so nothing was uploaded
    assert!(server.requests().iter().all(|r| r.method == "GET"));
}

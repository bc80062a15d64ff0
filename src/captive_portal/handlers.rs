//! Request routing for the configuration portal.
//!
//! Three routes: the prerendered page on `GET /`, configuration submission on
//! `POST /api/config`, and a redirect back to the page for everything else.

use std::sync::{Mutex, PoisonError};

use http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::buffer::RenderBuffer;
use crate::session::{ExitReason, SessionState};
use crate::settings::{Settings, SettingsStore, TooLong};

pub const CONFIG_PATH: &str = "/api/config";

/// Methods the HTTP transport hands to [`Router::route`]; all but the two
/// real routes end in the redirect.
pub static SERVED_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::HEAD,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::PATCH,
    Method::TRACE,
    Method::CONNECT,
];

const TEXT_HTML: &str = "text/html";
const TEXT_PLAIN: &str = "text/plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply<'a> {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub location: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> Reply<'a> {
    fn html(status: StatusCode, body: &'a [u8]) -> Self {
        Self {
            status,
            content_type: TEXT_HTML,
            location: None,
            body,
        }
    }

    fn text(status: StatusCode, body: &'static str) -> Self {
        Self {
            status,
            content_type: TEXT_PLAIN,
            location: None,
            body: body.as_bytes(),
        }
    }
}

/// Body of `POST /api/config`: the button pressed plus the form fields.
#[derive(Debug, Deserialize)]
struct Submission {
    action: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Debug)]
pub enum SubmitError {
    /// Body is not a JSON object
    Malformed(serde_json::Error),
    MissingAction,
    TooLarge(usize),
    TooLong(TooLong),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Malformed(e) => write!(f, "deserialization of config response failed: {}", e),
            SubmitError::MissingAction => write!(f, "config response has no member \"action\""),
            SubmitError::TooLarge(len) => write!(f, "config response of {} bytes is too large", len),
            SubmitError::TooLong(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SubmitError {}

impl SubmitError {
    fn reply(&self) -> Reply<'static> {
        match self {
            SubmitError::Malformed(_) => Reply::text(StatusCode::BAD_REQUEST, "Malformed configuration"),
            SubmitError::MissingAction => Reply::text(StatusCode::BAD_REQUEST, "Missing \"action\""),
            SubmitError::TooLarge(_) => {
                Reply::text(StatusCode::PAYLOAD_TOO_LARGE, "Configuration too large")
            }
            SubmitError::TooLong(_) => Reply::text(StatusCode::BAD_REQUEST, "Value too long"),
        }
    }
}

pub struct Router {
    page: RenderBuffer,
    store: Mutex<Box<dyn SettingsStore + Send>>,
    state: watch::Sender<SessionState>,
    portal_url: String,
    max_body: usize,
}

impl Router {
    /// `page` is served as is for the whole session.
    pub fn new(
        page: RenderBuffer,
        store: Box<dyn SettingsStore + Send>,
        state: watch::Sender<SessionState>,
        portal_url: String,
        max_body: usize,
    ) -> Self {
        Self {
            page,
            store: Mutex::new(store),
            state,
            portal_url,
            max_body,
        }
    }

    pub fn max_body(&self) -> usize {
        self.max_body
    }

    pub fn page(&self) -> &RenderBuffer {
        &self.page
    }

    pub fn route(&self, method: &Method, uri: &str, body: &[u8]) -> Reply<'_> {
        let path = uri.split(['?', '#']).next().unwrap_or_default();
        match (method, path) {
            (&Method::GET, "/") => self.root(),
            (&Method::POST, CONFIG_PATH) => self.submit(body),
            _ => {
                log::debug!("{} {} -> redirect", method, uri);
                self.not_found()
            }
        }
    }

    pub fn root(&self) -> Reply<'_> {
        Reply::html(StatusCode::OK, self.page.as_bytes())
    }

    pub fn not_found(&self) -> Reply<'_> {
        Reply {
            status: StatusCode::FOUND,
            content_type: TEXT_PLAIN,
            location: Some(&self.portal_url),
            body: b"",
        }
    }

    /// For bodies the transport refused to read past `max_body`.
    pub fn reject_oversized(&self, len: usize) -> Reply<'static> {
        let err = SubmitError::TooLarge(len);
        log::error!("ERROR: {}", err);
        err.reply()
    }

    pub fn submit(&self, body: &[u8]) -> Reply<'_> {
        log::debug!("Config Form Received");
        if body.len() > self.max_body {
            return self.reject_oversized(body.len());
        }
        let (action, fields) = match parse_submission(body) {
            Ok(s) => s,
            Err(e) => {
                log::error!("ERROR: {} ... no change", e);
                return e.reply();
            }
        };

        match action.as_str() {
            "save" => self.save(&fields),
            "cancel" => {
                self.finish(ExitReason::Cancelled);
                Reply::html(StatusCode::OK, b"Configuration Cancelled")
            }
            other => {
                log::warn!("WARNING: invalid value {:?} for \"action\"", other);
                self.finish(ExitReason::InvalidAction);
                Reply::html(StatusCode::NOT_FOUND, b"Invalid value for \"action\"")
            }
        }
    }

    fn save(&self, fields: &Map<String, Value>) -> Reply<'_> {
        let settings = match Settings::from_submission(fields) {
            Ok(settings) => settings,
            Err(e) => {
                let err = SubmitError::TooLong(e);
                log::error!("ERROR: {} ... no change", err);
                return err.reply();
            }
        };
        log::info!(
            "Saving {:?}",
            settings.iter().map(|(k, _)| k).collect::<Vec<_>>()
        );
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        match store.save(&settings) {
            Ok(()) => Reply::html(StatusCode::OK, b"Successfully saved"),
            Err(e) => {
                log::error!("Failed to save settings: {:?}", e);
                Reply::html(StatusCode::INTERNAL_SERVER_ERROR, b"Saving failed")
            }
        }
    }

    /// Only the first terminal action is recorded.
    fn finish(&self, reason: ExitReason) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Running {
                *state = SessionState::Done(reason);
                true
            } else {
                false
            }
        });
    }
}

fn parse_submission(body: &[u8]) -> Result<(String, Map<String, Value>), SubmitError> {
    let submission: Submission = serde_json::from_slice(body).map_err(SubmitError::Malformed)?;
    let action = submission.action.ok_or(SubmitError::MissingAction)?;
    Ok((action, submission.fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::tests::SharedStore;

    struct FailingStore;

    impl SettingsStore for FailingStore {
        fn load_all(&self) -> anyhow::Result<Settings> {
            Ok(Settings::default())
        }

        fn save(&mut self, _: &Settings) -> anyhow::Result<()> {
            anyhow::bail!("flash full")
        }
    }

    fn router_with(
        store: Box<dyn SettingsStore + Send>,
    ) -> (Router, watch::Receiver<SessionState>) {
        let mut page = RenderBuffer::try_with_capacity(64).unwrap();
        page.extend_truncating(b"<html>portal</html>");
        let (tx, rx) = watch::channel(SessionState::Running);
        let router = Router::new(page, store, tx, "http://192.168.4.1/".to_string(), 256);
        (router, rx)
    }

    fn router() -> (Router, watch::Receiver<SessionState>, SharedStore) {
        let store = SharedStore::default();
        let (router, rx) = router_with(Box::new(store.clone()));
        (router, rx, store)
    }

    fn post(router: &Router, body: &str) -> (StatusCode, String) {
        let reply = router.route(&Method::POST, CONFIG_PATH, body.as_bytes());
        (reply.status, String::from_utf8(reply.body.to_vec()).unwrap())
    }

    #[test]
    fn root_serves_identical_page() {
        let (router, _rx, _) = router();
        let first = router.route(&Method::GET, "/", b"");
        let second = router.route(&Method::GET, "/?refresh=1", b"");
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(first.content_type, "text/html");
        assert_eq!(first.body, b"<html>portal</html>");
        assert_eq!(first.body, second.body);
    }

    #[test]
    fn unmatched_paths_redirect_to_portal() {
        let (router, _rx, _) = router();
        for (method, uri) in [
            (Method::GET, "/foo"),
            (Method::GET, "/../x"),
            (Method::GET, "/favicon.ico"),
            (Method::GET, ""),
            (Method::GET, "%%%"),
            (Method::GET, "/generate_204"),
            (Method::POST, "/"),
            (Method::GET, CONFIG_PATH),
            (Method::HEAD, "/"),
        ] {
            let reply = router.route(&method, uri, b"");
            assert_eq!(reply.status, StatusCode::FOUND, "{} {}", method, uri);
            assert_eq!(reply.location, Some("http://192.168.4.1/"));
            assert!(reply.body.is_empty());
        }
    }

    #[test]
    fn every_served_method_reaches_a_route() {
        let (router, rx, _) = router();
        for verb in [Method::PUT, Method::DELETE, Method::OPTIONS, Method::PATCH] {
            assert!(SERVED_METHODS.contains(&verb), "{}", verb);
        }
        for method in SERVED_METHODS.iter() {
            for uri in ["/", "/x", CONFIG_PATH] {
                let reply = router.route(method, uri, br#"{"action":"cancel"}"#);
                let routed = (*method == Method::GET && uri == "/")
                    || (*method == Method::POST && uri == CONFIG_PATH);
                if !routed {
                    assert_eq!(reply.status, StatusCode::FOUND, "{} {}", method, uri);
                    assert_eq!(reply.location, Some("http://192.168.4.1/"));
                }
            }
        }
        // the POST to the submit path above was the only terminal action
        assert_eq!(*rx.borrow(), SessionState::Done(ExitReason::Cancelled));
    }

    #[test]
    fn save_persists_and_keeps_running() {
        let (router, rx, store) = router();
        let (status, body) = post(&router, r#"{"action":"save","ssid":"home","mqtt_port":1883}"#);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Successfully saved");
        assert_eq!(*rx.borrow(), SessionState::Running);

        let saved = store.0.lock().unwrap();
        assert_eq!(saved.saves, 1);
        assert_eq!(saved.settings.get("ssid"), Some("home"));
        assert_eq!(saved.settings.get("mqtt_port"), Some("1883"));
        drop(saved);

        assert_eq!(router.route(&Method::GET, "/", b"").status, StatusCode::OK);
    }

    #[test]
    fn repeated_saves_are_allowed() {
        let (router, rx, store) = router();
        post(&router, r#"{"action":"save","ssid":"a"}"#);
        post(&router, r#"{"action":"save","ssid":"b"}"#);
        assert_eq!(store.0.lock().unwrap().settings.get("ssid"), Some("b"));
        assert_eq!(*rx.borrow(), SessionState::Running);
    }

    #[test]
    fn cancel_ends_session() {
        let (router, rx, store) = router();
        let (status, body) = post(&router, r#"{"action":"cancel","ssid":"ignored"}"#);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Configuration Cancelled");
        assert_eq!(*rx.borrow(), SessionState::Done(ExitReason::Cancelled));
        assert_eq!(store.0.lock().unwrap().saves, 0);
    }

    #[test]
    fn unknown_action_ends_session_with_404() {
        let (router, rx, _) = router();
        let (status, body) = post(&router, r#"{"action":"launch"}"#);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Invalid value for \"action\"");
        assert_eq!(*rx.borrow(), SessionState::Done(ExitReason::InvalidAction));
    }

    #[test]
    fn first_terminal_action_wins() {
        let (router, rx, _) = router();
        post(&router, r#"{"action":"launch"}"#);
        post(&router, r#"{"action":"cancel"}"#);
        assert_eq!(*rx.borrow(), SessionState::Done(ExitReason::InvalidAction));
    }

    #[test]
    fn bad_bodies_leave_state_alone() {
        let (router, rx, store) = router();
        for body in ["not json", "[1,2]", r#"{"ssid":"home"}"#, r#"{"action":null}"#, r#"{"action":5}"#] {
            let (status, _) = post(&router, body);
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        }
        assert_eq!(*rx.borrow(), SessionState::Running);
        assert_eq!(store.0.lock().unwrap().saves, 0);
        assert_eq!(router.route(&Method::GET, "/", b"").status, StatusCode::OK);
    }

    #[test]
    fn oversized_body_is_rejected() {
        let (router, rx, _) = router();
        let body = format!(r#"{{"action":"cancel","pad":"{}"}}"#, "x".repeat(300));
        let (status, _) = post(&router, &body);
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(*rx.borrow(), SessionState::Running);
    }

    #[test]
    fn overlong_value_is_not_saved() {
        let (router, rx, store) = router();
        let body = format!(r#"{{"action":"save","ssid":"home","pass":"{}"}}"#, "p".repeat(65));
        let (status, text) = post(&router, &body);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "Value too long");
        assert_eq!(store.0.lock().unwrap().saves, 0);
        assert_eq!(store.0.lock().unwrap().settings.get("ssid"), None);
        assert_eq!(*rx.borrow(), SessionState::Running);
    }

    #[test]
    fn store_failure_is_reported() {
        let (router, rx) = router_with(Box::new(FailingStore));
        let (status, _) = post(&router, r#"{"action":"save","ssid":"home"}"#);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(*rx.borrow(), SessionState::Running);
    }
}

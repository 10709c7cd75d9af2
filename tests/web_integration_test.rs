//! End-to-end tests for a complete exchange through the guard.
//!
//! These tests drive login, a protected form post and logout the way an
//! application would, using the in-memory request and response types.

use std::collections::HashMap;
use std::sync::Arc;

use http_guard::web::{RecordingResponse, RequestAdapter};
use http_guard::{
    Attributes, Ctx, ErrorKind, HttpGuard, HttpMethod, MemorySessionStore, MemorySink,
    SecurityConfig, SessionStore, StaticKeyProvider, Tainted,
};

struct Harness {
    guard: HttpGuard,
    store: Arc<MemorySessionStore>,
    sink: Arc<MemorySink>,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let config = SecurityConfig::from_toml_str(
        r#"
        [redirects.contexts]
        post-login = ["/home/", "/account/"]

        [cookies]
        same_site = "Strict"
        "#,
    )
    .expect("valid configuration");

    let store = Arc::new(MemorySessionStore::new());
    let sink = Arc::new(MemorySink::new());
    let guard = HttpGuard::builder(config)
        .key_provider(Arc::new(StaticKeyProvider::new([5u8; 32])))
        .session_store(store.clone())
        .log_sink(sink.clone())
        .build()
        .expect("guard builds");

    Harness { guard, store, sink }
}

fn session_cookie(response: &RecordingResponse) -> String {
    response
        .header_values("Set-Cookie")
        .into_iter()
        .find_map(|value| value.strip_prefix("SESSIONID="))
        .and_then(|rest| rest.split(';').next())
        .expect("session cookie written")
        .to_string()
}

#[test]
fn login_rotates_session_and_redirects() {
    let h = harness();

    let mut attributes: Attributes = HashMap::new();
    attributes.insert("cart".to_string(), Arc::new(3u32));
    let anonymous = h.guard.sessions().establish(attributes).unwrap();

    let request = RequestAdapter::new(HttpMethod::Post, "/login?next=/home/dashboard")
        .secure(true)
        .with_cookie("SESSIONID", anonymous.id())
        .with_form_param("user", "alice")
        .with_form_param("password", "hunter2");
    let mut response = RecordingResponse::new();

    let rotated = {
        let mut ctx = Ctx::new("req-login", &request, &mut response);
        h.guard.assert_secure_request(&ctx).unwrap();
        h.guard.log_request(&ctx);

        let rotated = h.guard.change_session_identifier(&mut ctx).unwrap();
        let next = ctx.parameter("next").expect("next parameter present");
        h.guard.send_redirect(&mut ctx, "post-login", next).unwrap();
        rotated
    };

    assert_ne!(rotated.id(), anonymous.id());
    assert_eq!(rotated.attribute::<u32>("cart"), Some(&3));
    assert!(!h.store.contains(anonymous.id()));
    assert!(h.store.contains(rotated.id()));
    assert!(h.store.load(anonymous.id()).unwrap().is_none());

    let cookie = response.header_values("Set-Cookie")[0];
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Strict"));
    assert_eq!(session_cookie(&response), rotated.id());
    assert_eq!(response.redirected_to(), Some("/home/dashboard"));

    let lines = h.sink.lines();
    assert_eq!(lines.len(), 1);
    assert!(!lines[0].contains("hunter2"));
    assert!(lines[0].contains("user=alice"));
}

#[test]
fn old_session_id_cannot_be_reused() {
    let h = harness();
    let session = h.guard.sessions().establish(HashMap::new()).unwrap();
    let stale = session.id().to_string();
    h.guard.sessions().rotate(&stale).unwrap();

    let request = RequestAdapter::new(HttpMethod::Post, "/login").with_cookie("SESSIONID", stale);
    let mut response = RecordingResponse::new();
    {
        let mut ctx = Ctx::new("req-replay", &request, &mut response);
        let err = h.guard.change_session_identifier(&mut ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }
    assert!(response.is_untouched());
}

#[test]
fn protected_form_accepts_embedded_token_only() {
    let h = harness();
    let session = h.guard.sessions().establish(HashMap::new()).unwrap();

    let action = h.guard.add_csrf_token("/transfer?amount=100", &session);
    assert!(action.starts_with("/transfer?amount=100&csrf_token="));

    let honest = RequestAdapter::new(HttpMethod::Post, action);
    let mut response = RecordingResponse::new();
    {
        let ctx = Ctx::new("req-ok", &honest, &mut response);
        assert!(ctx.parameter("amount").is_some());
        assert!(h.guard.verify_csrf_token(&ctx, &session).unwrap());
    }

    let forged = RequestAdapter::new(HttpMethod::Post, "/transfer?amount=100")
        .with_form_param("csrf_token", "guessed");
    let mut response = RecordingResponse::new();
    let ctx = Ctx::new("req-forged", &forged, &mut response);
    let err = h.guard.verify_csrf_token(&ctx, &session).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Intrusion);
}

#[test]
fn reset_token_invalidates_previous_links() {
    let h = harness();
    let mut session = h.guard.sessions().establish(HashMap::new()).unwrap();
    let old_link = h.guard.add_csrf_token("/delete", &session);
    h.guard.reset_csrf_token(&mut session);

    let request = RequestAdapter::new(HttpMethod::Post, old_link);
    let mut response = RecordingResponse::new();
    let ctx = Ctx::new("req-old-link", &request, &mut response);
    assert_eq!(
        h.guard.verify_csrf_token(&ctx, &session).unwrap_err().kind(),
        ErrorKind::Intrusion
    );
}

#[test]
fn logout_expires_every_cookie() {
    let h = harness();
    let request = RequestAdapter::new(HttpMethod::Post, "/logout")
        .with_cookie("SESSIONID", "abc")
        .with_cookie("theme", "dark");
    let mut response = RecordingResponse::new();
    {
        let mut ctx = Ctx::new("req-logout", &request, &mut response);
        h.guard.kill_all_cookies(&mut ctx).unwrap();
        h.guard.set_no_cache_headers(&mut ctx).unwrap();
    }

    let cookies = response.header_values("Set-Cookie");
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
    assert_eq!(
        response.header_values("Cache-Control"),
        vec!["no-store", "no-cache", "must-revalidate"]
    );
    assert_eq!(response.header_values("Expires"), vec!["-1"]);
}

#[test]
fn sealed_hidden_field_survives_form_round_trip() {
    let h = harness();
    let sealed = h.guard.encrypt_hidden_field("order-7781").unwrap();

    let request = RequestAdapter::new(HttpMethod::Post, "/orders/confirm")
        .with_form_param("order", sealed.clone());
    let mut response = RecordingResponse::new();
    let ctx = Ctx::new("req-confirm", &request, &mut response);
    let presented = ctx.parameter("order").expect("order field present");
    assert_eq!(h.guard.decrypt_hidden_field(presented).unwrap(), "order-7781");

    let mut tampered = sealed.into_bytes();
    let last = tampered.len() - 1;
    tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();
    assert_eq!(
        h.guard
            .decrypt_hidden_field(Tainted::new(tampered))
            .unwrap_err()
            .kind(),
        ErrorKind::Encryption
    );
}

//! Login flow demonstration.
//!
//! This demo walks one browser through the guarded exchanges of a login:
//! 1. Render a form with a CSRF token and a sealed hidden field
//! 2. Verify the posted token and open the hidden field
//! 3. Rotate the session identifier at the privilege change
//! 4. Redirect through the allow-list
//!
//! Run with: `cargo run --example login_flow`

use std::collections::HashMap;
use std::sync::Arc;

use http_guard::web::{RecordingResponse, RequestAdapter};
use http_guard::{
    Ctx, HttpGuard, HttpMethod, MemorySessionStore, SecurityConfig, StaticKeyProvider,
    TracingSink,
};

const CONFIG: &str = r#"
[redirects.contexts]
post-login = ["/home/"]

[logging]
sensitive_parameters = ["password"]
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let guard = HttpGuard::builder(SecurityConfig::from_toml_str(CONFIG)?)
        .key_provider(Arc::new(StaticKeyProvider::new([7u8; 32])))
        .session_store(Arc::new(MemorySessionStore::new()))
        .log_sink(Arc::new(TracingSink))
        .build()?;

    // Anonymous visitor gets a session and a login form
    let session = guard.sessions().establish(HashMap::new())?;
    let action = guard.add_csrf_token("/login", &session);
    let sealed_next = guard.encrypt_hidden_field("/home/dashboard")?;
    println!("\n=== Form ===");
    println!("action: {action}");
    println!("hidden next: {sealed_next}");

    // The browser posts the form back over TLS
    let request = RequestAdapter::new(HttpMethod::Post, action)
        .secure(true)
        .with_cookie("SESSIONID", session.id())
        .with_form_param("user", "alice")
        .with_form_param("password", "correct horse")
        .with_form_param("next", sealed_next);
    let mut response = RecordingResponse::new();
    {
        let mut ctx = Ctx::new("req-login-1", &request, &mut response);
        guard.log_request(&ctx);
        guard.assert_secure_request(&ctx)?;
        guard.verify_csrf_token(&ctx, &session)?;

        let next = ctx
            .parameter("next")
            .ok_or("form is missing the next field")?;
        let next = guard.decrypt_hidden_field(next)?;

        let rotated = guard.change_session_identifier(&mut ctx)?;
        println!("\n=== Login ===");
        println!("session rotated: {}", rotated.id() != session.id());

        guard.set_no_cache_headers(&mut ctx)?;
        guard.send_redirect(&mut ctx, "post-login", http_guard::Tainted::new(next))?;
    }

    println!("\n=== Response ===");
    for header in response.headers() {
        println!("{}: {}", header.name, header.value);
    }
    println!("redirect: {:?}", response.redirected_to());

    // A forged post without the token is refused
    let forged = RequestAdapter::new(HttpMethod::Post, "/login").secure(true);
    let mut response = RecordingResponse::new();
    let ctx = Ctx::new("req-forged-1", &forged, &mut response);
    match guard.verify_csrf_token(&ctx, &session) {
        Ok(_) => println!("\nforged request accepted (unexpected)"),
        Err(e) => println!("\nforged request refused: {e}"),
    }

    Ok(())
}

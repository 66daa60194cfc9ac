//! The composed pipeline, driven directly through `BoxedHandler::call`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;

use super::test_helpers::*;
use crate::config::Config;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{ACCESS_TOKEN_HEADER, Middleware, Recover, VerifyToken, compose};
use crate::verifier::{Claims, TokenVerifier, VerifyError};
use crate::{Request, Status, pipeline, terminal};

fn request(token: Option<&str>) -> Request {
    let mut builder = http::Request::builder().uri("/").header("host", "auth.internal");
    if let Some(t) = token {
        builder = builder.header(ACCESS_TOKEN_HEADER, t);
    }
    builder.body(()).unwrap().into()
}

fn config(debug: bool) -> Config {
    let mut args = vec!["subreq", "--auth-domain", "team.example", "--audience", AUDIENCE];
    if debug {
        args.push("--debug");
    }
    Config::try_parse_from(args).unwrap().normalized().unwrap()
}

/// Terminal handler that counts how often it is reached.
fn counting_terminal() -> (BoxedHandler, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler = (move |req: Request| {
        counter.fetch_add(1, Ordering::SeqCst);
        terminal::no_content(req)
    })
    .into_boxed_handler();
    (handler, hits)
}

async fn service(idp: &TestIdp, debug: bool) -> (BoxedHandler, Arc<AtomicUsize>) {
    let (terminal, hits) = counting_terminal();
    let stages = pipeline(&config(debug), Arc::new(idp.verifier()));
    (compose(&stages, terminal), hits)
}

#[tokio::test]
async fn valid_token_is_allowed() {
    let idp = TestIdp::start().await;
    let (handler, hits) = service(&idp, false).await;

    let res = handler.call(request(Some(&idp.valid_token()))).await;
    assert_eq!(res.status_code(), 204);
    assert!(res.body().is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_token_is_denied_before_terminal() {
    let idp = TestIdp::start().await;
    let (handler, hits) = service(&idp, false).await;

    let res = handler.call(request(None)).await;
    assert_eq!(res.status_code(), 401);
    assert_eq!(res.body(), b"missing access token on request");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bad_tokens_are_denied_with_reason() {
    let idp = TestIdp::start().await;
    let (handler, hits) = service(&idp, false).await;
    let now = now();

    let cases = [
        ("forged", TestKey::generate(idp.key.kid()).sign(&idp.claims()), "failed to verify signature"),
        ("audience", idp.key.sign(&idp.claims_with(json!({ "aud": "other" }))), "audience"),
        ("expired", idp.key.sign(&idp.claims_with(json!({ "exp": now - 60 }))), "expired"),
        ("garbage", "eyJhbGciOiJub25lIn0.e30.".to_owned(), "Invalid token:"),
    ];

    for (name, token, reason) in cases {
        let res = handler.call(request(Some(&token))).await;
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert_eq!(res.status_code(), 401, "{name}");
        assert!(body.starts_with("Invalid token: "), "{name}: {body}");
        assert!(body.contains(reason), "{name}: {body}");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn debug_dump_does_not_bypass_verification() {
    let idp = TestIdp::start().await;
    let (handler, hits) = service(&idp, true).await;

    assert_eq!(handler.call(request(None)).await.status_code(), 401);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    assert_eq!(handler.call(request(Some(&idp.valid_token()))).await.status_code(), 204);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn pipeline_order_follows_debug_flag() {
    struct Never;
    #[async_trait]
    impl TokenVerifier for Never {
        async fn verify(&self, _token: &str) -> Result<Claims, VerifyError> {
            Err(VerifyError::Signature)
        }
    }

    assert_eq!(pipeline(&config(false), Arc::new(Never)).len(), 2);
    assert_eq!(pipeline(&config(true), Arc::new(Never)).len(), 3);
}

#[tokio::test]
async fn empty_pipeline_behaves_like_terminal() {
    let direct = terminal::no_content(request(None)).await;
    let composed = compose(&[], terminal::no_content.into_boxed_handler())
        .call(request(None))
        .await;

    assert_eq!(composed.status_code(), direct.status_code());
    assert_eq!(composed.body(), direct.body());
    assert_eq!(composed.content_type, direct.content_type);
}

/// Panics instead of answering.
struct Panicking;

#[async_trait]
impl TokenVerifier for Panicking {
    async fn verify(&self, _token: &str) -> Result<Claims, VerifyError> {
        panic!("verifier bug");
    }
}

#[tokio::test]
async fn panic_inside_verification_yields_single_500() {
    let (terminal, hits) = counting_terminal();
    let stages: Vec<Arc<dyn Middleware>> =
        vec![Arc::new(Recover), Arc::new(VerifyToken::new(Arc::new(Panicking)))];
    let handler = compose(&stages, terminal);

    let res = handler.call(request(Some("anything"))).await;
    assert_eq!(res.status_code(), 500);
    assert!(res.body().is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // Still serving: the next request takes the normal 401 path.
    assert_eq!(handler.call(request(None)).await.status_code(), 401);
}

#[tokio::test]
async fn concurrent_requests_do_not_cross_talk() {
    let idp = TestIdp::start().await;
    let (handler, _) = service(&idp, false).await;
    let good = idp.valid_token();
    let bad = TestKey::generate(idp.key.kid()).sign(&idp.claims());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..32 {
        let handler = Arc::clone(&handler);
        let (token, expected) = if i % 2 == 0 { (good.clone(), 204) } else { (bad.clone(), 401) };
        tasks.spawn(async move {
            let res = handler.call(request(Some(&token))).await;
            (res.status_code(), expected)
        });
    }
    while let Some(res) = tasks.join_next().await {
        let (got, expected) = res.unwrap();
        assert_eq!(got, expected);
    }
}

#[test]
fn status_enum_matches_http_surface() {
    assert_eq!(u16::from(Status::NoContent), 204);
    assert_eq!(u16::from(Status::Unauthorized), 401);
    assert_eq!(u16::from(Status::InternalServerError), 500);
}

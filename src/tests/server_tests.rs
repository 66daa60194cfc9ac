//! The pipeline behind a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::test_helpers::*;
use crate::handler::Handler;
use crate::middleware::{ACCESS_TOKEN_HEADER, Middleware, Recover, VerifyToken, compose};
use crate::{Error, Server, terminal};

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), Error>>,
}

async fn start(idp: &TestIdp) -> Running {
    let stages: Vec<Arc<dyn Middleware>> =
        vec![Arc::new(Recover), Arc::new(VerifyToken::new(Arc::new(idp.verifier())))];
    let handler = compose(&stages, terminal::no_content.into_boxed_handler());

    let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.serve_with_shutdown(handler, async {
        let _ = stopped.await;
    }));
    Running { addr, stop, task }
}

impl Running {
    /// Signals shutdown and waits for `serve` to return.
    async fn shut_down(self) {
        self.stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(3), self.task)
            .await
            .expect("serve did not return after shutdown")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn answers_over_http() {
    let idp = TestIdp::start().await;
    let running = start(&idp).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", running.addr);

    let allowed = client
        .get(format!("{base}/"))
        .header(ACCESS_TOKEN_HEADER, idp.valid_token())
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 204);
    assert!(allowed.bytes().await.unwrap().is_empty());

    let denied = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(denied.status(), 401);
    assert_eq!(denied.text().await.unwrap(), "missing access token on request");

    running.shut_down().await;
}

#[tokio::test]
async fn every_path_and_method_is_checked() {
    let idp = TestIdp::start().await;
    let running = start(&idp).await;
    let client = reqwest::Client::new();

    for (method, path) in [
        (reqwest::Method::GET, "/auth"),
        (reqwest::Method::POST, "/deeply/nested?q=1"),
        (reqwest::Method::DELETE, "/"),
    ] {
        let res = client
            .request(method.clone(), format!("http://{}{path}", running.addr))
            .header(ACCESS_TOKEN_HEADER, idp.valid_token())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 204, "{method} {path}");
    }

    running.shut_down().await;
}

#[tokio::test]
async fn shutdown_closes_idle_keep_alive_connections() {
    let idp = TestIdp::start().await;
    let running = start(&idp).await;

    let mut conn = TcpStream::connect(running.addr).await.unwrap();
    conn.write_all(b"GET / HTTP/1.1\r\nHost: auth.internal\r\n\r\n").await.unwrap();

    let expected = b"missing access token on request";
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.windows(expected.len()).any(|w| w == expected) {
        let n = conn.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before the response arrived");
        received.extend_from_slice(&buf[..n]);
    }
    assert!(received.starts_with(b"HTTP/1.1 401"));

    // The connection is still open and idle.
    running.shut_down().await;

    let n = tokio::time::timeout(Duration::from_secs(1), conn.read(&mut buf))
        .await
        .expect("server kept the idle connection open")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn bind_conflict_is_an_error() {
    let first = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let taken = first.local_addr();

    assert!(matches!(Server::bind(taken).await, Err(Error::Io(_))));
}

//! A local HTTP endpoint whose SSE body is fed line by line from the test.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::response::Response;
use axum::routing::post;
use tokio::sync::mpsc;

/// Serve one streaming response on `path`. Everything sent on the returned
/// feed is written to the body as-is; dropping the feed ends the body.
pub(crate) async fn sse_server(path: &'static str) -> (String, mpsc::Sender<String>) {
    let (feed, body_rx) = mpsc::channel::<String>(16);
    let body_rx = Arc::new(Mutex::new(Some(body_rx)));

    let app = Router::new().route(
        path,
        post(move || {
            let body_rx = body_rx.clone();
            async move {
                let rx = body_rx.lock().unwrap().take().expect("one request per server");
                let chunks = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv()
                        .await
                        .map(|chunk| (Ok::<_, std::convert::Infallible>(chunk), rx))
                });
                Response::builder()
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(chunks))
                    .unwrap()
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), feed)
}

/// Keep writing to the body until the server drops it, which only happens
/// once the client has gone away. Fails the test after five seconds.
pub(crate) async fn wait_for_disconnect(feed: &mpsc::Sender<String>) {
    let gone = async {
        while feed.send(": keep-alive\n\n".into()).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), gone)
        .await
        .expect("server kept the connection open after the reader was dropped");
}

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

use common::{closed_port, spawn_default_relay, spawn_recording_upstream, spawn_upstream};

#[tokio::test]
async fn interleaved_messages_keep_order_and_close_code_propagates() {
    let upstream = spawn_upstream().await;
    let relay = spawn_default_relay().await;

    let (mut socket, _) = connect_async(relay.ws_url(&format!("/proxy/ws/ws://{upstream}/ws")))
        .await
        .unwrap();

    let count = 120u8;
    for i in 0..count {
        let msg = if i % 2 == 0 {
            Message::text(format!("msg-{i}"))
        } else {
            Message::binary(vec![i; usize::from(i) + 1])
        };
        socket.send(msg).await.unwrap();
    }

    for i in 0..count {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match msg {
            Message::Text(text) => {
                assert_eq!(i % 2, 0);
                assert_eq!(text.as_str(), format!("msg-{i}"));
            }
            Message::Binary(bytes) => {
                assert_eq!(i % 2, 1);
                assert_eq!(bytes.len(), usize::from(i) + 1);
                assert!(bytes.iter().all(|b| *b == i));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    socket.send(Message::text("close:4001")).await.unwrap();
    let close = loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
        {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => {}
            other => panic!("expected close, got {other:?}"),
        }
    };
    let frame = close.unwrap();
    assert_eq!(u16::from(frame.code), 4001);
    assert_eq!(frame.reason.as_str(), "bye");
}

#[tokio::test]
async fn client_close_code_reaches_upstream() {
    let (upstream, mut closes) = spawn_recording_upstream().await;
    let relay = spawn_default_relay().await;

    let (mut socket, _) = connect_async(relay.ws_url(&format!("/proxy/ws/ws://{upstream}/ws")))
        .await
        .unwrap();
    socket.send(Message::text("before close")).await.unwrap();
    assert_eq!(
        socket.next().await.unwrap().unwrap(),
        Message::text("before close")
    );

    socket
        .close(Some(CloseFrame {
            code: CloseCode::from(4002),
            reason: "done".into(),
        }))
        .await
        .unwrap();

    let code = tokio::time::timeout(Duration::from_secs(5), closes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 4002);
}

#[tokio::test]
async fn http_scheme_is_upgraded_and_subprotocol_echoed() {
    let upstream = spawn_upstream().await;
    let relay = spawn_default_relay().await;

    let mut request = relay
        .ws_url(&format!("/proxy/ws/http://{upstream}/ws"))
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "v1.uidev".parse().unwrap());
    let (mut socket, response) = connect_async(request).await.unwrap();
    assert_eq!(response.headers()["sec-websocket-protocol"], "v1.uidev");

    socket.send(Message::text("hi")).await.unwrap();
    let echoed = socket.next().await.unwrap().unwrap();
    assert_eq!(echoed, Message::text("hi"));

    assert_eq!(
        relay.state.stats.ws_tunnels_active.load(Ordering::Relaxed),
        1
    );
    socket.close(None).await.unwrap();
    drop(socket);

    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.state.stats.ws_tunnels_active.load(Ordering::Relaxed) != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(relay.state.stats.ws_tunnels_total.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn unreachable_ws_target_fails_the_handshake() {
    let relay = spawn_default_relay().await;
    let port = closed_port();

    let err = connect_async(relay.ws_url(&format!("/proxy/ws/ws://127.0.0.1:{port}/ws")))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 502),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

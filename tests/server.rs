//! Server lifecycle: setup, identification, handshake, and
//! request/response correlation over real sockets.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use hds_protocol::core::{HdsStatus, Protocol, SessionError, Topic};
use hds_protocol::opack::Value;
use hds_protocol::server::{ConnectionHandle, HdsServer};
use hds_protocol::session::Message;
use hds_protocol::setup::SetupBridge;

use common::{Controller, dict, ready_pair, setup_session};

#[tokio::test]
async fn setup_returns_port_and_fresh_salts() {
    let server = HdsServer::builder().build();
    let bridge = SetupBridge::new(server.clone());

    let (port, first_salt) = setup_session(&bridge).await;
    assert_eq!(server.local_port().await, Some(port));

    // A second setup reuses the listener but draws a new salt.
    let (second_port, second_salt) = setup_session(&bridge).await;
    assert_eq!(second_port, port);
    assert_ne!(first_salt, second_salt);
    assert_eq!(server.pending_session_count().await, 2);

    server.close().await;
}

#[tokio::test]
async fn hello_handshake_reaches_ready() {
    let server = HdsServer::builder().build();
    let bridge = SetupBridge::new(server.clone());
    let (port, accessory_salt) = setup_session(&bridge).await;

    let mut controller = Controller::connect(port, &accessory_salt).await;
    controller.hello().await;

    // Binding consumed the prepared session before the hello was processed.
    assert_eq!(server.pending_session_count().await, 0);
    assert_eq!(server.connection_count().await, 1);

    server.close().await;
}

#[tokio::test]
async fn unidentified_connection_is_closed_and_pending_kept() {
    let server = HdsServer::builder().build();
    let bridge = SetupBridge::new(server.clone());
    let (port, accessory_salt) = setup_session(&bridge).await;

    // A controller with the wrong shared key cannot be identified.
    let wrong_key = [0x99; 32];
    let mut controller = Controller::connect_with_key(port, &wrong_key, &accessory_salt).await;
    controller
        .send(&Message::Request {
            protocol: Protocol::Control,
            topic: Topic::Hello,
            id: 1,
            body: dict(vec![]),
        })
        .await;
    controller.expect_close().await;

    // The prepared session is unaffected and a correct controller still binds.
    assert_eq!(server.pending_session_count().await, 1);
    let mut good = Controller::connect(port, &accessory_salt).await;
    good.hello().await;

    server.close().await;
}

#[tokio::test]
async fn silent_connection_is_closed_after_hello_timeout() {
    let server = HdsServer::builder()
        .hello_timeout(Duration::from_millis(200))
        .build();
    let bridge = SetupBridge::new(server.clone());
    let (port, accessory_salt) = setup_session(&bridge).await;

    let mut controller = Controller::connect(port, &accessory_salt).await;
    controller.expect_close().await;

    server.close().await;
}

#[tokio::test]
async fn prepared_session_expires_without_connection() {
    let server = HdsServer::builder()
        .bind_timeout(Duration::from_millis(200))
        .build();
    let bridge = SetupBridge::new(server.clone());
    let (_port, _salt) = setup_session(&bridge).await;
    assert_eq!(server.pending_session_count().await, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.pending_session_count().await, 0);
    // Nothing is bound or pending, so the listener went away too.
    assert_eq!(server.local_port().await, None);
}

/// Register a catch-all that hands the test the connection handle.
fn grab_handle(server: &HdsServer) -> mpsc::UnboundedReceiver<ConnectionHandle> {
    let (tx, rx) = mpsc::unbounded_channel();
    server.add_request_handler(
        Protocol::Other("test".into()),
        Topic::Other("grab".into()),
        Arc::new(move |handle, _message| {
            let _ = tx.send(handle.clone());
            Ok(())
        }),
    );
    rx
}

async fn handle_for(server: &HdsServer, controller: &mut Controller) -> ConnectionHandle {
    let mut rx = grab_handle(server);
    controller
        .send(&Message::Event {
            protocol: Protocol::Other("test".into()),
            topic: Topic::Other("grab".into()),
            body: dict(vec![]),
        })
        .await;
    rx.recv().await.expect("connection handle")
}

#[tokio::test]
async fn concurrent_requests_correlate_in_reverse_order() {
    let server = HdsServer::builder().build();
    let (_bridge, mut controller) = ready_pair(server.clone()).await;
    let handle = handle_for(&server, &mut controller).await;

    // Fire 4 requests carrying their index.
    let mut pending = Vec::new();
    for n in 0..4i64 {
        let handle = handle.clone();
        pending.push(tokio::spawn(async move {
            handle
                .send_request(
                    Protocol::TargetControl,
                    Topic::Whoami,
                    dict(vec![("n", Value::Int(n))]),
                )
                .await
        }));
    }

    // Collect all 4 on the controller, then answer them in reverse order,
    // echoing each body back.
    let mut requests = Vec::new();
    for _ in 0..4 {
        match controller.recv().await.unwrap() {
            Message::Request { id, body, .. } => requests.push((id, body)),
            other => panic!("expected request, got {other:?}"),
        }
    }
    let ids: Vec<u64> = requests.iter().map(|(id, _)| *id).collect();
    assert_eq!(
        ids.iter().collect::<std::collections::HashSet<_>>().len(),
        4,
        "request ids must be distinct"
    );
    for (id, body) in requests.into_iter().rev() {
        controller
            .send(&Message::Response {
                protocol: Protocol::TargetControl,
                topic: Topic::Whoami,
                id,
                status: HdsStatus::Success,
                body,
            })
            .await;
    }

    for (n, task) in pending.into_iter().enumerate() {
        let (status, body) = task.await.unwrap().expect("response outcome");
        assert_eq!(status, HdsStatus::Success);
        assert_eq!(
            body.get("n").and_then(Value::as_i64),
            Some(n as i64),
            "response body must correlate with its request"
        );
    }

    server.close().await;
}

#[tokio::test]
async fn unanswered_request_times_out_and_closes() {
    let server = HdsServer::builder()
        .response_timeout(Duration::from_millis(200))
        .build();
    let (_bridge, mut controller) = ready_pair(server.clone()).await;
    let handle = handle_for(&server, &mut controller).await;

    let outcome = handle
        .send_request(Protocol::TargetControl, Topic::Whoami, dict(vec![]))
        .await;
    assert!(matches!(outcome, Err(SessionError::RequestTimeout)));

    // Timeouts are fatal for the connection.
    match controller.recv().await {
        Some(Message::Request { .. }) => controller.expect_close().await,
        None => {}
        other => panic!("unexpected message {other:?}"),
    }

    server.close().await;
}

#[tokio::test]
async fn duplicate_response_is_discarded_and_connection_survives() {
    let server = HdsServer::builder().build();
    let (_bridge, mut controller) = ready_pair(server.clone()).await;
    let handle = handle_for(&server, &mut controller).await;

    let request = tokio::spawn({
        let handle = handle.clone();
        async move {
            handle
                .send_request(Protocol::TargetControl, Topic::Whoami, dict(vec![]))
                .await
        }
    });

    let id = match controller.recv().await.unwrap() {
        Message::Request { id, .. } => id,
        other => panic!("expected request, got {other:?}"),
    };
    let response = Message::Response {
        protocol: Protocol::TargetControl,
        topic: Topic::Whoami,
        id,
        status: HdsStatus::Success,
        body: dict(vec![]),
    };
    controller.send(&response).await;
    // Duplicate: no waiter is registered anymore; logged and dropped.
    controller.send(&response).await;

    let (status, _) = request.await.unwrap().expect("first response wins");
    assert_eq!(status, HdsStatus::Success);

    // The connection is still usable afterwards.
    let outcome = tokio::spawn({
        let handle = handle.clone();
        async move {
            handle
                .send_request(Protocol::TargetControl, Topic::Whoami, dict(vec![]))
                .await
        }
    });
    let id = match controller.recv().await.unwrap() {
        Message::Request { id, .. } => id,
        other => panic!("expected request, got {other:?}"),
    };
    controller
        .send(&Message::Response {
            protocol: Protocol::TargetControl,
            topic: Topic::Whoami,
            id,
            status: HdsStatus::Success,
            body: dict(vec![]),
        })
        .await;
    assert!(outcome.await.unwrap().is_ok());

    server.close().await;
}

#[tokio::test]
async fn message_before_hello_closes_connection() {
    let server = HdsServer::builder().build();
    let bridge = SetupBridge::new(server.clone());
    let (port, accessory_salt) = setup_session(&bridge).await;

    let mut controller = Controller::connect(port, &accessory_salt).await;
    controller
        .send(&Message::Event {
            protocol: Protocol::DataSend,
            topic: Topic::Ack,
            body: dict(vec![]),
        })
        .await;
    controller.expect_close().await;

    server.close().await;
}

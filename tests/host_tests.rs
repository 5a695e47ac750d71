// Integration tests for sending and receiving between live hosts


use fmsgd::fmsg::*;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use test_utils::*;

/// Start host A for d1, then host B for d2 challenging back to A
async fn start_pair(
    tweak_receiver: impl FnOnce(&mut HostConfig),
) -> (TestHost, TestHost) {
    let sender = TestHost::start("d1", 0, loopback_resolver(&["d2"]), |_| {}).await;
    let receiver = TestHost::start(
        "d2",
        sender.port,
        loopback_resolver(&["d1"]),
        tweak_receiver,
    )
    .await;
    (sender, receiver)
}

#[tokio::test]
async fn test_end_to_end_delivery() {
    let (sender, receiver) = start_pair(|_| {}).await;

    let message = text_message(sender.dir.path(), "@a@d1", &["@b@d2"], b"hi");
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].domain, "d2");
    match &reports[0].outcome {
        DeliveryOutcome::Delivered(codes) => {
            assert_eq!(codes.len(), 1);
            assert_eq!(codes[0].0.to_string(), "@b@d2");
            assert_eq!(codes[0].1, RejectAcceptCode::Accept);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let files = receiver.mailbox_files("b");
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), b"hi");
    assert_eq!(files[0].extension().unwrap(), "txt");

    // Nothing left in the registry or the receiver's temp area
    assert!(sender.host.outgoing().is_empty());
    assert!(list_files(&receiver.host.config().incoming_dir()).is_empty());
}

#[tokio::test]
async fn test_per_recipient_codes() {
    let (sender, receiver) = start_pair(|config| config.create_mailboxes = false).await;
    std::fs::create_dir_all(receiver.host.store().mailbox("b")).unwrap();

    let message = text_message(sender.dir.path(), "@a@d1", &["@b@d2", "@c@d2"], b"hello");
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    match &reports[0].outcome {
        DeliveryOutcome::Delivered(codes) => {
            let codes: Vec<RejectAcceptCode> = codes.iter().map(|(_, code)| *code).collect();
            assert_eq!(
                codes,
                vec![RejectAcceptCode::Accept, RejectAcceptCode::UserUnknown]
            );
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(reports[0].accepted().len(), 1);
    assert_eq!(receiver.mailbox_files("b").len(), 1);
    assert!(receiver.mailbox_files("c").is_empty());
}

#[tokio::test]
async fn test_unreachable_domain_does_not_affect_others() {
    let (sender, receiver) = start_pair(|_| {}).await;

    let message = text_message(
        sender.dir.path(),
        "@a@d1",
        &["@b@d2", "@x@unreachable.test"],
        b"hi",
    );
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].domain, "d2");
    assert_eq!(reports[0].accepted().len(), 1);
    assert_eq!(reports[1].domain, "unreachable.test");
    assert!(matches!(reports[1].outcome, DeliveryOutcome::Failed(_)));
    assert_eq!(receiver.mailbox_files("b").len(), 1);
}

#[tokio::test]
async fn test_spoofed_sender_is_dropped() {
    let sender = TestHost::start("d1", 0, loopback_resolver(&["d2"]), |_| {}).await;
    // d1 resolves somewhere other than where the message comes from
    let resolver = StaticResolver::new().with("d1", [IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
    let receiver = TestHost::start("d2", sender.port, resolver, |_| {}).await;

    let message = text_message(sender.dir.path(), "@a@d1", &["@b@d2"], b"hi");
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    assert!(matches!(reports[0].outcome, DeliveryOutcome::Failed(_)));
    assert!(receiver.mailbox_files("b").is_empty());
}

#[tokio::test]
async fn test_wrong_challenge_answer_stores_nothing() {
    let liar_port = spawn_lying_responder().await;
    let receiver = TestHost::start("d2", liar_port, loopback_resolver(&["d1"]), |_| {}).await;
    let sender = TestHost::idle("d1", 0, loopback_resolver(&["d2"]), |_| {});

    let message = text_message(sender.dir.path(), "@a@d1", &["@b@d2"], b"hi");
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    assert!(matches!(reports[0].outcome, DeliveryOutcome::Failed(_)));
    assert!(receiver.mailbox_files("b").is_empty());
    assert!(list_files(&receiver.host.config().incoming_dir()).is_empty());
}

#[tokio::test]
async fn test_too_big_rejected_without_reading_body() {
    let receiver = TestHost::start("d2", 1, loopback_resolver(&["d1"]), |config| {
        config.max_message_size = 4
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let message = text_message(dir.path(), "@a@d1", &["@b@d2"], b"much too long");

    let mut bytes = encode_header(&message).unwrap();
    bytes.extend_from_slice(&13u32.to_le_bytes());
    bytes.extend_from_slice(b"much too long");

    let response = exchange(receiver.port, &bytes).await;
    assert_eq!(response, vec![RejectAcceptCode::TooBig.as_byte()]);
    assert!(list_files(&receiver.host.config().incoming_dir()).is_empty());
    assert!(receiver.mailbox_files("b").is_empty());
}

#[tokio::test]
async fn test_send_reports_too_big_rejection() {
    let receiver = TestHost::start("d2", 1, loopback_resolver(&["d1"]), |config| {
        config.max_message_size = 4
    })
    .await;
    let sender = TestHost::idle("d1", 0, loopback_resolver(&["d2"]), |_| {});
    let body = vec![b'x'; 200_000];

    // The receiver closes while the body is still being written
    for _ in 0..5 {
        let message = text_message(sender.dir.path(), "@a@d1", &["@b@d2"], &body);
        let reports = sender
            .host
            .send(Arc::new(message), receiver.port)
            .await
            .unwrap();

        assert_eq!(
            reports[0].outcome,
            DeliveryOutcome::Rejected(RejectAcceptCode::TooBig)
        );
    }
    assert!(receiver.mailbox_files("b").is_empty());
}

#[tokio::test]
async fn test_future_timestamp_rejected() {
    let receiver = TestHost::start("d2", 1, loopback_resolver(&["d1"]), |_| {}).await;
    let dir = tempfile::tempdir().unwrap();
    let mut message = text_message(dir.path(), "@a@d1", &["@b@d2"], b"hi");
    message.set_timestamp(chrono::Utc::now().timestamp() + 3600);

    let mut bytes = encode_header(&message).unwrap();
    bytes.extend_from_slice(&2u32.to_le_bytes());

    let response = exchange(receiver.port, &bytes).await;
    assert_eq!(response, vec![RejectAcceptCode::FutureTime.as_byte()]);
}

#[tokio::test]
async fn test_old_timestamp_rejected_when_age_limited() {
    let receiver = TestHost::start("d2", 1, loopback_resolver(&["d1"]), |config| {
        config.max_message_age_secs = Some(60)
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut message = text_message(dir.path(), "@a@d1", &["@b@d2"], b"hi");
    message.set_timestamp(chrono::Utc::now().timestamp() - 3600);

    let mut bytes = encode_header(&message).unwrap();
    bytes.extend_from_slice(&2u32.to_le_bytes());

    let response = exchange(receiver.port, &bytes).await;
    assert_eq!(response, vec![RejectAcceptCode::PastTime.as_byte()]);
    assert!(receiver.mailbox_files("b").is_empty());
}

#[tokio::test]
async fn test_old_timestamp_accepted_without_age_limit() {
    let (sender, receiver) = start_pair(|_| {}).await;
    assert!(receiver.host.config().max_message_age_secs.is_none());

    let mut message = text_message(sender.dir.path(), "@a@d1", &["@b@d2"], b"hi");
    message.set_timestamp(chrono::Utc::now().timestamp() - 3600);
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    assert_eq!(reports[0].accepted().len(), 1);
    assert_eq!(receiver.mailbox_files("b").len(), 1);
}

#[tokio::test]
async fn test_existing_mailbox_file_reported_per_recipient() {
    let (sender, receiver) = start_pair(|_| {}).await;

    let message = Arc::new(text_message(sender.dir.path(), "@a@d1", &["@b@d2"], b"hi"));
    let first = sender
        .host
        .send(Arc::clone(&message), receiver.port)
        .await
        .unwrap();
    assert_eq!(first[0].accepted().len(), 1);

    // Same timestamp and type, so the same file name in b's mailbox
    let second = sender.host.send(message, receiver.port).await.unwrap();
    match &second[0].outcome {
        DeliveryOutcome::Delivered(codes) => {
            assert_eq!(codes.len(), 1);
            assert_eq!(codes[0].1, RejectAcceptCode::UserFull);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(receiver.mailbox_files("b").len(), 1);
}

#[tokio::test]
async fn test_no_recipients_for_host_dropped() {
    let receiver = TestHost::start("d2", 1, loopback_resolver(&["d1"]), |_| {}).await;
    let dir = tempfile::tempdir().unwrap();
    let message = text_message(dir.path(), "@a@d1", &["@b@d3"], b"hi");

    let mut bytes = encode_header(&message).unwrap();
    bytes.extend_from_slice(&2u32.to_le_bytes());

    assert!(exchange(receiver.port, &bytes).await.is_empty());
}

#[tokio::test]
async fn test_unknown_challenge_gets_no_answer() {
    let host = TestHost::start("d1", 0, loopback_resolver(&[]), |_| {}).await;

    let challenge = codec::encode_challenge(&HeaderHash::of(b"never sent"));
    assert!(exchange(host.port, &challenge).await.is_empty());
}

#[tokio::test]
async fn test_skip_challenge_refused_by_default() {
    let (sender, receiver) = start_pair(|_| {}).await;

    let mut message = text_message(sender.dir.path(), "@a@d1", &["@b@d2"], b"hi");
    message.set_no_challenge();
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    assert!(matches!(reports[0].outcome, DeliveryOutcome::Failed(_)));
    assert!(receiver.mailbox_files("b").is_empty());
}

#[tokio::test]
async fn test_skip_challenge_when_allowed() {
    // Any challenge would be answered wrongly, so delivery proves none was made
    let liar_port = spawn_lying_responder().await;
    let receiver = TestHost::start("d2", liar_port, loopback_resolver(&["d1"]), |config| {
        config.allow_skip_challenge = true
    })
    .await;
    let sender = TestHost::idle("d1", 0, loopback_resolver(&["d2"]), |_| {});

    let mut message = text_message(sender.dir.path(), "@a@d1", &["@b@d2"], b"hi");
    message.set_no_challenge();
    let reports = sender
        .host
        .send(Arc::new(message), receiver.port)
        .await
        .unwrap();

    assert_eq!(reports[0].accepted().len(), 1);
    assert_eq!(receiver.mailbox_files("b").len(), 1);
}

#[tokio::test]
async fn test_stop_then_listen_again() {
    let host = TestHost::idle("d1", 0, loopback_resolver(&[]), |_| {});

    let listener = host.host.bind().await.unwrap();
    let server = tokio::spawn(Arc::clone(&host.host).serve(listener));
    while !host.host.is_listening() {
        tokio::task::yield_now().await;
    }

    host.host.stop().unwrap();
    server.await.unwrap().unwrap();
    assert!(!host.host.is_listening());
    assert!(host.host.stop().is_err());

    // A stopped host can serve again
    let listener = host.host.bind().await.unwrap();
    let server = tokio::spawn(Arc::clone(&host.host).serve(listener));
    while !host.host.is_listening() {
        tokio::task::yield_now().await;
    }
    host.host.stop().unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_serve_twice_is_invalid() {
    let host = TestHost::start("d1", 0, loopback_resolver(&[]), |_| {}).await;
    while !host.host.is_listening() {
        tokio::task::yield_now().await;
    }

    let listener = tokio::net::TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let err = Arc::clone(&host.host).serve(listener).await.unwrap_err();
    assert!(matches!(err, FmsgError::InvalidOperation(_)));
}

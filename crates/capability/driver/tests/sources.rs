mod common;

use domain::{EventRecord, Origin, ResourceState};
use edge_driver::{AisReceiver, CustomProtocolSource, InternalEventSource};
use edge_protocol::FrameConfig;
use edge_protocol::frame::pack;
use edge_resource::Resource;
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn custom_protocol_decodes_frames_with_expression() {
    let h = common::harness();
    let source = CustomProtocolSource::new(h.ctx.clone());
    source
        .init(
            "C1",
            &json!({ "host": "127.0.0.1", "port": 0, "expression": "a:1:I:B;b:1:I:B;c:1:I:B;" }),
        )
        .await
        .unwrap();
    source.start(CancellationToken::new()).await.unwrap();
    let port = source.details()["port"].as_u64().unwrap() as u16;

    let packet = pack(&FrameConfig::default(), &[0x01, 0x02, 0x03]).unwrap();
    assert_eq!(&packet[..7], &[0xAF, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03]);
    assert_eq!(&packet[9..], &[0xFA, 0x00]);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&packet).await.unwrap();
    assert!(h.wait_records(1, Duration::from_secs(1)).await);
    assert_eq!(h.payloads()[0], json!({ "a": 1, "b": 2, "c": 3 }));
    assert_eq!(h.records.lock().unwrap()[0].origin, Origin::Source("C1".to_string()));

    let clients = source.on_ctrl("listClients", &json!({})).await.unwrap();
    assert_eq!(clients.as_array().unwrap().len(), 1);

    source.stop().await;
    assert_eq!(source.status(), ResourceState::Stop);
}

#[tokio::test]
async fn custom_protocol_rejects_bad_expression() {
    let h = common::harness();
    let source = CustomProtocolSource::new(h.ctx.clone());
    let err = source
        .init("C2", &json!({ "port": 0, "expression": "a:9:F:B;" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), domain::ErrorKind::BadConfig);
}

#[tokio::test]
async fn ais_server_forwards_allowed_lines_verbatim() {
    let h = common::harness();
    let source = AisReceiver::new(h.ctx.clone());
    source
        .init("A1", &json!({ "host": "127.0.0.1", "port": 0, "gwsn": "GW01" }))
        .await
        .unwrap();
    source.start(CancellationToken::new()).await.unwrap();
    let port = source.details()["port"].as_u64().unwrap() as u16;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"$GPGSV,3,1,11*70\r\nAIS33VR1!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5C\r\n")
        .await
        .unwrap();
    assert!(h.wait_records(1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let payloads = h.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["gwsn"], "GW01");
    assert_eq!(
        payloads[0]["ais_data"],
        "AIS33VR1!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5C"
    );
    source.stop().await;
}

#[tokio::test]
async fn ais_client_decodes_when_parsing_enabled() {
    let h = common::harness();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream
            .write_all(b"!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5C\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let source = AisReceiver::new(h.ctx.clone());
    source
        .init(
            "A2",
            &json!({ "mode": "CLIENT", "host": "127.0.0.1", "port": port, "gwsn": "GW02", "parseAis": true }),
        )
        .await
        .unwrap();
    source.start(CancellationToken::new()).await.unwrap();

    assert!(h.wait_records(1, Duration::from_secs(2)).await);
    let payload = &h.payloads()[0];
    assert_eq!(payload["mmsi"], 477553000);
    assert_eq!(payload["gwsn"], "GW02");

    source.stop().await;
    server.abort();
}

#[tokio::test]
async fn internal_event_bridges_broker_to_ingress() {
    let h = common::harness();
    let source = InternalEventSource::new(h.ctx.clone());
    source.init("E1", &json!({ "topics": ["event.device.#"] })).await.unwrap();
    source.start(CancellationToken::new()).await.unwrap();

    let record = EventRecord::new("event.device.down.D1", "D1", "DEVICE", "down", json!({}));
    assert_eq!(h.ctx.broker.publish("event.device.down.D1", record), 1);
    assert!(h.wait_records(1, Duration::from_secs(1)).await);
    let payload = &h.payloads()[0];
    assert_eq!(payload["topic"], "event.device.down.D1");
    assert_eq!(payload["event"], "down");

    source.stop().await;
    let record = EventRecord::new("event.device.down.D2", "D2", "DEVICE", "down", json!({}));
    assert_eq!(h.ctx.broker.publish("event.device.down.D2", record), 0);
}

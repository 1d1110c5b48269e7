//! Downstream pushes and command replies share one socket without tearing.
use bridge::AppState;
use bridge_protocol::LOGIN_SUCCESS;
use bridge_test_utils::{MockWsClient, RecordingConnector, RecordingTopology};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

const SNAPSHOT: &str = r#"[{"productSN":"P1","deviceSN":"D1"}]"#;

async fn run_case(pushes: usize, commands: usize) {
    let connector = RecordingConnector::new();
    let state = AppState::new(
        Arc::new(connector.clone()),
        Arc::new(RecordingTopology::new(SNAPSHOT)),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, bridge::build_router(state, "/ws")).await.unwrap();
    });

    let mut client = MockWsClient::connect_as(&format!("ws://{addr}/ws"), "P1", "D1")
        .await
        .unwrap();
    assert_eq!(client.recv_text().await.unwrap(), LOGIN_SUCCESS);

    let link = connector.last_link().unwrap();
    let pusher = std::thread::spawn(move || {
        for i in 0..pushes {
            assert!(link.push_downstream("/P1/D1/down", format!(r#"{{"seq":{i}}}"#).as_bytes()));
        }
    });
    for _ in 0..commands {
        client.send_json(&json!({"action": "get_topo"})).await.unwrap();
    }

    let mut next_seq = 0;
    let mut snapshots = 0;
    for _ in 0..pushes + commands {
        let text = client.recv_text().await.unwrap();
        if text == SNAPSHOT {
            snapshots += 1;
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["seq"], next_seq, "push out of order: {text}");
        next_seq += 1;
    }
    pusher.join().unwrap();
    assert_eq!(snapshots, commands);
    assert_eq!(next_seq, pushes);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn pushes_and_replies_arrive_whole(pushes in 0usize..40, commands in 0usize..10) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(run_case(pushes, commands));
    }
}

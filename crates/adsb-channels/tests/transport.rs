// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use adsb_channels::{
    BackoffConfig, Client, ClientConfig, ConnectionConfig, ConnectionState, InterpolationConfig,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn client_config(url: String) -> ClientConfig {
    ClientConfig {
        connection: ConnectionConfig {
            url,
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        },
        interpolation: InterpolationConfig {
            enabled: false,
            ..Default::default()
        },
    }
}

async fn drive_until<F>(client: &mut Client, mut done: F)
where
    F: FnMut(&Client) -> bool,
{
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !done(client) {
            assert!(client.process_next().await, "connection task stopped");
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_subscribe_snapshot_and_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Value>();
    let (close_tx, close_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        frames_tx
            .send(serde_json::from_str(first.to_text().unwrap()).unwrap())
            .unwrap();

        let snapshot = json!({
            "type": "aircraft:snapshot",
            "data": {"aircraft": [
                {"hex": "abc123", "lat": 51.47, "lon": -0.45, "alt_baro": 1200, "flight": "BAW12 "},
                {"icao": "def456", "latitude": 51.5, "lng": -0.1},
            ]}
        });
        ws.send(Message::text(snapshot.to_string())).await.unwrap();

        let _ = close_rx.await;
        let _ = ws.close(None).await;
    });

    let mut client = Client::spawn(client_config(format!("ws://{addr}/ws/aircraft/")));
    drive_until(&mut client, |c| c.aircraft_count() == 2).await;

    let subscribe = frames_rx.recv().await.unwrap();
    assert_eq!(subscribe, json!({"action": "subscribe", "topics": ["aircraft"]}));

    let position = client.get_position("ABC123").unwrap();
    assert_eq!(position.alt, Some(1200.0));
    let aircraft = client.channels().get_aircraft("abc123").unwrap();
    assert_eq!(aircraft.callsign.as_deref(), Some("BAW12"));
    assert!(client.get_position("DEF456").is_some());

    close_tx.send(()).unwrap();
    drive_until(&mut client, |c| {
        c.connection_state() == ConnectionState::Disconnected
    })
    .await;
    assert_eq!(client.aircraft_count(), 0);
    assert!(client.get_positions_snapshot().is_empty());

    client.shutdown();
}

#[tokio::test]
async fn test_request_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            let Ok(text) = frame.to_text() else { continue };
            let Ok(action) = serde_json::from_str::<Value>(text) else {
                continue;
            };
            if action["action"] == "request" {
                let reply = json!({
                    "type": "response",
                    "request_id": action["request_id"],
                    "data": {"kind": action["type"], "icao": action["params"]["icao"]},
                });
                ws.send(Message::text(reply.to_string())).await.unwrap();
            }
        }
    });

    let mut client = Client::spawn(client_config(format!("ws://{addr}/ws/aircraft/")));
    drive_until(&mut client, |c| c.connection_state().is_connected()).await;
    let handle = client.handle();
    let request = tokio::spawn(async move {
        handle
            .request("aircraft-info", json!({"icao": "ABC123"}))
            .await
    });

    tokio::time::timeout(TEST_TIMEOUT, async {
        while !request.is_finished() {
            tokio::select! {
                alive = client.process_next() => assert!(alive),
                () = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    })
    .await
    .expect("request not answered in time");

    let reply = request.await.unwrap().unwrap();
    assert_eq!(reply, json!({"kind": "aircraft-info", "icao": "ABC123"}));
    assert!(client.handle().pending().is_empty());

    client.shutdown();
}

#[tokio::test]
async fn test_reconnects_after_server_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<usize>();

    tokio::spawn(async move {
        for session in 1..=2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Subscribe action
            let _ = ws.next().await;
            accepted_tx.send(session).unwrap();
            if session == 1 {
                let _ = ws.close(None).await;
            } else {
                while ws.next().await.is_some() {}
            }
        }
    });

    let mut client = Client::spawn(client_config(format!("ws://{addr}/ws/aircraft/")));
    // Connected, then dropped, then connected again
    let mut phase = 0;
    drive_until(&mut client, |c| {
        phase = match (phase, c.connection_state()) {
            (0, ConnectionState::Connected) => 1,
            (1, ConnectionState::Disconnected) => 2,
            (2, ConnectionState::Connected) => 3,
            (current, _) => current,
        };
        phase == 3
    })
    .await;

    assert_eq!(accepted_rx.recv().await, Some(1));
    assert_eq!(accepted_rx.recv().await, Some(2));
    client.shutdown();
}

#[tokio::test]
async fn test_offline_subscribe_sent_once_on_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Value>();
    let (accept_tx, accept_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        // Hold the handshake until the client has changed its topics
        let _ = accept_rx.await;
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if let Ok(value) = serde_json::from_str::<Value>(frame.to_text().unwrap_or_default()) {
                frames_tx.send(value).unwrap();
            }
        }
    });

    let mut client = Client::spawn(client_config(format!("ws://{addr}/ws/aircraft/")));
    client.subscribe(["alerts"]).unwrap();
    accept_tx.send(()).unwrap();
    drive_until(&mut client, |c| c.connection_state().is_connected()).await;

    let first = tokio::time::timeout(TEST_TIMEOUT, frames_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        first,
        json!({"action": "subscribe", "topics": ["aircraft", "alerts"]})
    );
    let again = tokio::time::timeout(Duration::from_millis(200), frames_rx.recv()).await;
    assert!(again.is_err(), "unexpected second frame: {again:?}");

    client.shutdown();
}

//! End-to-end runs of `EventBus` over the real STOMP session against a small
//! in-process broker.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::broker::{CircuitState, InboundMessage};
use crate::client::{BOOK_PURCHASES_DESTINATION, BookEvent, EventBus, HandlerError, TransactionType};
use crate::config::Settings;
use crate::transport::{Command, Decoded, Frame, FrameDecoder};

/// Accepts one connection and plays a single-node broker: SEND frames are
/// fanned out as MESSAGE frames to matching subscriptions and every ACK is
/// reported on `acks`.
async fn serve_one(listener: TcpListener, acks: mpsc::UnboundedSender<String>) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut decoder = FrameDecoder::new();
    let mut subscriptions: Vec<(String, String)> = Vec::new();
    let mut next_id = 0u32;

    while let Some(frame) = next_frame(&mut stream, &mut decoder).await {
        let reply = match frame.command {
            Command::Connect | Command::Stomp => vec![
                Frame::new(Command::Connected)
                    .header("version", "1.2")
                    .header("heart-beat", "0,0"),
            ],
            Command::Subscribe => {
                let id = frame.get("id").unwrap_or_default().to_string();
                let destination = frame.get("destination").unwrap_or_default().to_string();
                subscriptions.push((id, destination));
                Vec::new()
            }
            Command::Send => {
                let destination = frame.get("destination").unwrap_or_default();
                subscriptions
                    .iter()
                    .filter(|(_, d)| d == destination)
                    .map(|(id, d)| {
                        next_id += 1;
                        Frame::new(Command::Message)
                            .header("destination", d.as_str())
                            .header("subscription", id.as_str())
                            .header("message-id", format!("ID:broker-{next_id}"))
                            .header("ack", format!("ack-{next_id}"))
                            .with_body(frame.body.clone())
                    })
                    .collect()
            }
            Command::Ack => {
                let _ = acks.send(frame.get("id").unwrap_or_default().to_string());
                Vec::new()
            }
            Command::Disconnect => match frame.get("receipt") {
                Some(receipt) => vec![Frame::new(Command::Receipt).header("receipt-id", receipt)],
                None => Vec::new(),
            },
            _ => Vec::new(),
        };
        for out in reply {
            if stream.write_all(&out.encode()).await.is_err() {
                return;
            }
        }
    }
}

async fn next_frame(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> Option<Frame> {
    let mut chunk = [0u8; 4096];
    loop {
        while let Some(decoded) = decoder.next_frame().unwrap() {
            if let Decoded::Frame(frame) = decoded {
                return Some(frame);
            }
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => decoder.extend(&chunk[..n]),
        }
    }
}

fn settings_for(port: u16) -> Settings {
    let mut settings = Settings::default();
    settings.broker.url = Some(format!("tcp://127.0.0.1:{port}"));
    settings.broker.connect_timeout_ms = 1000;
    settings.delivery.send_retry_delay_ms = 20;
    settings.delivery.resubscribe_delay_ms = 20;
    settings
}

#[tokio::test]
async fn integration_publish_and_consume_over_stomp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(serve_one(listener, ack_tx));

    let bus = EventBus::from_settings(&settings_for(port)).unwrap();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<BookEvent>();
    bus.subscribe(
        BOOK_PURCHASES_DESTINATION,
        move |m: &InboundMessage| -> Result<(), HandlerError> {
            event_tx.send(m.decode()?)?;
            Ok(())
        },
    )
    .unwrap();

    // Publish until the subscription is live on the broker side.
    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            bus.publish_event("42", 7, TransactionType::Purchase);
            if let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await
            {
                return event;
            }
        }
    })
    .await
    .expect("no event received over the broker");

    assert_eq!(event.user_id, "42");
    assert_eq!(event.book_id, 7);
    assert_eq!(event.transaction_type, TransactionType::Purchase);

    let ack = tokio::time::timeout(Duration::from_secs(5), ack_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(ack.starts_with("ack-"), "unexpected ack id {ack}");

    assert_eq!(bus.circuit_state(), CircuitState::Enabled);
    bus.shutdown(Duration::from_secs(5)).await;
    server.await.unwrap();
}

#[tokio::test]
async fn integration_unreachable_broker_disables_the_circuit() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let bus = EventBus::from_settings(&settings_for(port)).unwrap();
    bus.publish_event("1", 1, TransactionType::Borrow);

    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.circuit_state() != CircuitState::Disabled {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("circuit should open after exhausting retries");

    assert_eq!(bus.stats().failed_attempts, 3);
    assert!(bus.subscribe(BOOK_PURCHASES_DESTINATION, crate::client::BookPurchaseLogger).is_err());
    bus.shutdown(Duration::from_secs(1)).await;
}

//! End-to-end tests of raw-socket resources against a local fake instrument.

use metrology_core::{ConnectOptions, Instrument, InstrumentError, Reading, ReplyFormat};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Minimal SCPI responder: answers `*IDN?` and `MEAS?`, records everything else.
async fn spawn_fake_dmm() -> (u16, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut seen = Vec::new();

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            match line.as_str() {
                "*IDN?" => write_half
                    .write_all(b"HEWLETT-PACKARD,34401A,0,10-5-2\n")
                    .await
                    .unwrap(),
                "MEAS?" => write_half.write_all(b"-1.00004E+01VDC\n").await.unwrap(),
                _ => {}
            }
            seen.push(line);
        }
        seen
    });

    (port, handle)
}

#[tokio::test]
async fn socket_instrument_round_trip() {
    let (port, server) = spawn_fake_dmm().await;
    let resource = format!("TCPIP0::127.0.0.1::{}::SOCKET", port);
    let options = ConnectOptions::default().with_timeout(Duration::from_secs(2));

    let dmm = Instrument::open(&resource, &options).await.unwrap();
    assert_eq!(dmm.name(), resource);

    dmm.reset().await.unwrap();
    assert!(dmm.identify().await.unwrap().contains("34401A"));

    let reading = dmm
        .query_reading("MEAS?", ReplyFormat::Scientific)
        .await
        .unwrap();
    assert_eq!(reading, Reading::Float(-10.0004));

    drop(dmm);
    let seen = server.await.unwrap();
    assert_eq!(seen, vec!["*RST", "*IDN?", "MEAS?"]);
}

#[tokio::test]
async fn unanswered_query_times_out() {
    let (port, _server) = spawn_fake_dmm().await;
    let resource = format!("TCPIP0::127.0.0.1::{}::SOCKET", port);
    let options = ConnectOptions::default().with_timeout(Duration::from_millis(150));

    let dmm = Instrument::open(&resource, &options).await.unwrap();
    let err = dmm.query("SYST:ERR?").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InstrumentError>(),
        Some(InstrumentError::Timeout { .. })
    ));
}

#[tokio::test]
async fn refused_connection_is_communication_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let resource = format!("TCPIP0::127.0.0.1::{}::SOCKET", port);
    let err = Instrument::open(&resource, &ConnectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InstrumentError>(),
        Some(InstrumentError::Communication { .. })
    ));
}

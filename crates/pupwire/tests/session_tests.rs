use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_net::TcpListener;
use futures_lite::{AsyncReadExt, AsyncWriteExt};

use pupwire::{
    Device, Direction, MotionOptions, NetworkError, Port, Router, ServerAddr, Session,
    SessionSettings, tcp::TcpProvider,
};

/// Stands in for the proxy server: records every frame a session writes and
/// confirms registrations if told to.
struct FakeProxy {
    addr: ServerAddr,
    frames: Receiver<Vec<u8>>,
    outgoing: Sender<Vec<u8>>,
}

impl FakeProxy {
    async fn start(confirm_registrations: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = ServerAddr::new("127.0.0.1", listener.local_addr().unwrap().port());
        let (frames_tx, frames) = async_channel::unbounded();
        let (outgoing, outgoing_rx) = async_channel::unbounded::<Vec<u8>>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();

            let mut pusher = stream.clone();
            tokio::spawn(async move {
                while let Ok(bytes) = outgoing_rx.recv().await {
                    if pusher.write_all(&bytes).await.is_err() {
                        break;
                    }
                    // An empty push hangs up
                    if bytes.is_empty() {
                        let _ = pusher.close().await;
                        break;
                    }
                }
            });

            let mut reader = stream.clone();
            let mut writer = stream;
            loop {
                let mut prefix = [0u8; 1];
                if reader.read_exact(&mut prefix).await.is_err() {
                    break;
                }
                let mut frame = vec![0u8; usize::from(prefix[0])];
                if reader.read_exact(&mut frame).await.is_err() {
                    break;
                }
                if confirm_registrations && frame[2] == 0x46 && frame[4] == 0x00 {
                    let ack = [0x06, 0x06, 0x00, 0x46, frame[3], 0x00, 0x01];
                    if writer.write_all(&ack).await.is_err() {
                        break;
                    }
                }
                if frames_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Self { addr, frames, outgoing }
    }

    async fn next_frame(&self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), self.frames.recv())
            .await
            .expect("no frame arrived")
            .unwrap()
    }

    /// Send raw bytes, prefix included, to the session.
    async fn push(&self, bytes: &[u8]) {
        self.outgoing.send(bytes.to_vec()).await.unwrap();
    }

    async fn hang_up(&self) {
        self.outgoing.send(Vec::new()).await.unwrap();
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn connect(proxy: &FakeProxy, device: &Arc<Device>) -> Session {
    Session::connect::<TcpProvider, _>(
        device.clone(),
        proxy.addr.clone(),
        &SessionSettings::default(),
        &tokio::runtime::Handle::current(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn registration_connects_the_device() {
    let proxy = FakeProxy::start(true).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));

    let session = connect(&proxy, &motor).await;

    assert_eq!(proxy.next_frame().await, [0x05, 0x00, 0x46, 0x02, 0x00]);
    assert!(motor.is_connected());
    assert!(motor.is_port_free());
    assert!(session.is_running());
    assert_eq!(session.devices().len(), 1);
    assert_eq!(session.peer(), proxy.addr.to_string());
}

#[tokio::test]
async fn completed_feedback_frees_the_port() {
    let proxy = FakeProxy::start(true).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let _session = connect(&proxy, &motor).await;
    proxy.next_frame().await;

    let sent = motor
        .start_speed_for_time(1000, 60, Direction::Forward, MotionOptions::default())
        .await;
    assert!(sent);
    assert!(!motor.is_port_free());
    assert_eq!(
        proxy.next_frame().await,
        [0x0c, 0x00, 0x81, 0x02, 0x11, 0x09, 0xe8, 0x03, 0x3c, 0x64, 0x7f, 0x03]
    );

    // Still running
    proxy.push(&[0x05, 0x05, 0x00, 0x82, 0x02, 0x01]).await;
    eventually("in progress feedback", || motor.feedback_log().len() == 1).await;
    assert!(!motor.is_port_free());

    proxy.push(&[0x05, 0x05, 0x00, 0x82, 0x02, 0x0a]).await;
    eventually("the port to be freed", || motor.is_port_free()).await;
    assert_eq!(motor.feedback_log().len(), 2);
}

#[tokio::test]
async fn commands_queue_behind_the_running_one() {
    let proxy = FakeProxy::start(true).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let _session = connect(&proxy, &motor).await;
    proxy.next_frame().await;

    assert!(motor.start_speed(40, Direction::Forward, MotionOptions::default()).await);
    proxy.next_frame().await;

    let queued = {
        let motor = motor.clone();
        tokio::spawn(async move {
            motor.start_speed(40, Direction::Reverse, MotionOptions::default()).await
        })
    };
    let early = tokio::time::timeout(Duration::from_millis(50), proxy.frames.recv()).await;
    assert!(early.is_err(), "second command went out while the port was taken");

    proxy.push(&[0x05, 0x05, 0x00, 0x82, 0x02, 0x0a]).await;
    assert!(queued.await.unwrap());
    let frame = proxy.next_frame().await;
    assert_eq!(frame[5], 0x07);
    assert_eq!(frame[6], (-40i8) as u8);
}

#[tokio::test]
async fn shared_session_routes_by_port() {
    let proxy = FakeProxy::start(true).await;
    let router = Arc::new(Router::new());
    let steer = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let drive = Arc::new(
        Device::synchronized_motor("drive", Port::A, Port::B, proxy.addr.clone())
            .with_virtual_port(Port(0x10)),
    );
    router.register(steer.clone());
    router.register(drive.clone());

    let session = Session::connect_shared::<TcpProvider, _>(
        router.clone(),
        proxy.addr.clone(),
        &SessionSettings::default(),
        &tokio::runtime::Handle::current(),
    )
    .await
    .unwrap();
    assert!(steer.is_connected());
    assert!(drive.is_connected());
    assert_eq!(session.devices().len(), 2);

    let mut registered = vec![proxy.next_frame().await[3], proxy.next_frame().await[3]];
    registered.sort();
    assert_eq!(registered, [0x00, 0x02]);

    assert!(drive.start_speed(50, Direction::Forward, MotionOptions::default()).await);
    assert_eq!(proxy.next_frame().await[3], 0x10);
    assert!(!drive.is_port_free());

    // Reported by both physical ports, in reverse order
    proxy.push(&[0x07, 0x07, 0x00, 0x82, 0x01, 0x0a, 0x00, 0x0a]).await;
    eventually("the pair to be freed", || drive.is_port_free()).await;
    assert!(steer.feedback_log().is_empty());
}

#[tokio::test]
async fn rejected_command_frees_a_shared_motor() {
    let proxy = FakeProxy::start(true).await;
    let router = Arc::new(Router::new());
    let hub = Arc::new(Device::hub("hub", Port(0xFE), proxy.addr.clone()));
    let steer = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    router.register(hub.clone());
    router.register(steer.clone());

    let _session = Session::connect_shared::<TcpProvider, _>(
        router,
        proxy.addr.clone(),
        &SessionSettings::default(),
        &tokio::runtime::Handle::current(),
    )
    .await
    .unwrap();
    proxy.next_frame().await;
    proxy.next_frame().await;

    assert!(steer.start_speed(40, Direction::Forward, MotionOptions::default()).await);
    proxy.next_frame().await;
    assert!(!steer.is_port_free());

    // Invalid use of a port output command
    proxy.push(&[0x05, 0x05, 0x00, 0x05, 0x81, 0x06]).await;
    eventually("the rejected port to be freed", || steer.is_port_free()).await;
    assert!(steer.last_error().is_some());
    assert!(hub.last_error().is_none());

    let next = tokio::time::timeout(
        Duration::from_secs(2),
        steer.start_speed(20, Direction::Reverse, MotionOptions::default()),
    )
    .await;
    assert_eq!(next.ok(), Some(true));
}

#[tokio::test]
async fn close_wakes_waiting_commands() {
    let proxy = FakeProxy::start(true).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let session = connect(&proxy, &motor).await;

    assert!(motor.start_speed(40, Direction::Forward, MotionOptions::default()).await);
    let waiting = {
        let motor = motor.clone();
        tokio::spawn(async move {
            motor.start_speed(20, Direction::Forward, MotionOptions::default()).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    session.close().await;
    assert!(!waiting.await.unwrap());
    assert!(!motor.is_connected());
    assert!(!session.is_running());
    assert!(session.devices().is_empty());

    let failed = motor.last_failed().unwrap();
    assert!(failed.reason.contains("disconnected"));

    // No session, no command
    assert!(!motor.start_speed(20, Direction::Forward, MotionOptions::default()).await);
    assert!(motor.last_failed().unwrap().reason.contains("not connected"));
}

#[tokio::test]
async fn undecodable_frames_are_skipped_until_the_stream_breaks() {
    let proxy = FakeProxy::start(true).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let session = connect(&proxy, &motor).await;
    let frames = session.subscribe();

    // Unknown message type
    proxy.push(&[0x03, 0x03, 0x00, 0x99]).await;
    proxy.push(&[0x05, 0x05, 0x00, 0x82, 0x02, 0x0a]).await;
    let received = tokio::time::timeout(Duration::from_secs(2), frames.recv()).await;
    assert!(matches!(received, Ok(Ok(pupwire::Message::PortFeedback(_)))));
    assert!(session.is_running());

    // Declares 9 bytes, carries 4
    proxy.push(&[0x04, 0x09, 0x00, 0x82, 0x02]).await;
    eventually("the session to stop", || !session.is_running()).await;
    assert!(!motor.is_connected());
    assert!(frames.recv().await.is_err());
}

#[tokio::test]
async fn server_hang_up_disconnects() {
    let proxy = FakeProxy::start(true).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let session = connect(&proxy, &motor).await;

    proxy.hang_up().await;
    eventually("the session to stop", || !session.is_running()).await;
    assert!(!motor.is_connected());
}

#[tokio::test]
async fn unregistering_ends_a_device_session() {
    let proxy = FakeProxy::start(true).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let session = connect(&proxy, &motor).await;

    proxy.push(&[0x06, 0x06, 0x00, 0x46, 0x02, 0xdd, 0x00]).await;
    eventually("the session to stop", || !session.is_running()).await;
    assert!(!motor.is_connected());
}

#[tokio::test]
async fn unconfirmed_registration_times_out() {
    let proxy = FakeProxy::start(false).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    let settings = SessionSettings { handshake_timeout_ms: 100, ..SessionSettings::default() };

    let result = Session::connect::<TcpProvider, _>(
        motor.clone(),
        proxy.addr.clone(),
        &settings,
        &tokio::runtime::Handle::current(),
    )
    .await;

    assert!(matches!(result, Err(NetworkError::HandshakeTimeout(name)) if name == "steer"));
    assert!(!motor.is_connected());
}

#[tokio::test]
async fn rejected_registration_fails() {
    let proxy = FakeProxy::start(false).await;
    let motor = Arc::new(Device::single_motor("steer", Port::C, proxy.addr.clone()));
    proxy.push(&[0x06, 0x06, 0x00, 0x46, 0x02, 0x00, 0x00]).await;

    let result = Session::connect::<TcpProvider, _>(
        motor.clone(),
        proxy.addr.clone(),
        &SessionSettings::default(),
        &tokio::runtime::Handle::current(),
    )
    .await;

    assert!(matches!(result, Err(NetworkError::HandshakeRejected(_))));
}

#[tokio::test]
async fn unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = ServerAddr::new("127.0.0.1", listener.local_addr().unwrap().port());
    drop(listener);
    let motor = Arc::new(Device::single_motor("steer", Port::C, addr.clone()));

    let result = Session::connect::<TcpProvider, _>(
        motor,
        addr,
        &SessionSettings::default(),
        &tokio::runtime::Handle::current(),
    )
    .await;

    assert!(matches!(result, Err(NetworkError::Connection { .. })));
}

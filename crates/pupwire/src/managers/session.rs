use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_channel::{Receiver, Sender, TrySendError};
use codee::Decoder;
use futures_lite::AsyncRead;
use tracing::{debug, error, info, trace, warn};

use pupwire_common::codec::LwpCodec;
use pupwire_common::{ExtServer, MAX_FRAME_LEN, Message, ServerCommand, ServerEvent};

use crate::config::SessionSettings;
use crate::error::{NetworkError, WireError};
use crate::managers::{HubProvider, Link, read_frame};
use crate::runtime::{JoinHandle, Runtime, run_async};
use crate::{Device, Router};

/// Where the read loop delivers decoded frames.
#[derive(Clone)]
enum Target {
    Device(Arc<Device>),
    Router(Arc<Router>),
}

impl Target {
    fn deliver(&self, message: &Message) {
        match self {
            Target::Device(device) => {
                if let Err(err) = device.apply_incoming(message) {
                    warn!("{}", err);
                }
            }
            Target::Router(router) => {
                router.route(message);
            }
        }
    }

    fn devices(&self) -> Vec<Arc<Device>> {
        match self {
            Target::Device(device) => vec![device.clone()],
            Target::Router(router) => router.devices(),
        }
    }

    /// The per-device loop ends once the server dropped the registration.
    fn keep_reading(&self) -> bool {
        match self {
            Target::Device(device) => device.is_connected(),
            Target::Router(_) => true,
        }
    }
}

/// Observers of a session's decoded frames.
struct Subscribers {
    senders: Mutex<Vec<Sender<Message>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl Subscribers {
    fn new(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    fn subscribe(&self) -> Receiver<Message> {
        let (sender, receiver) = async_channel::bounded(self.capacity);
        if !self.closed.load(Ordering::Acquire) {
            self.senders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(sender);
        }
        receiver
    }

    fn publish(&self, message: &Message) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|sender| match sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Subscriber lagging behind, dropped {:?}", message.message_type());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// A live byte stream to the proxy server.
///
/// A session either belongs to a single device ([`Session::connect`]) or is
/// shared by every device of a [`Router`] ([`Session::connect_shared`]).
/// Dropping a session closes it without flushing the write half.
pub struct Session {
    peer: String,
    link: Arc<Link>,
    target: Target,
    subscribers: Arc<Subscribers>,
    read_task: Mutex<Box<dyn JoinHandle>>,
    closed: AtomicBool,
}

impl Session {
    /// Connect `device` to the server and register its port.
    ///
    /// Returns once the server confirmed the registration, or fails with
    /// [`NetworkError::HandshakeTimeout`] after
    /// [`handshake_timeout_ms`](SessionSettings::handshake_timeout_ms).
    pub async fn connect<NP, RT>(
        device: Arc<Device>,
        connect_info: NP::ConnectInfo,
        settings: &SessionSettings,
        runtime: &RT,
    ) -> Result<Session, NetworkError>
    where
        NP: HubProvider,
        RT: Runtime,
    {
        let peer = connect_info.to_string();
        info!("Connecting {} to {} over {}", device.name(), peer, NP::PROVIDER_NAME);

        let socket = NP::connect_task(connect_info, settings).await?;
        let (mut read_half, write_half) = NP::split(socket);
        let link = Arc::new(Link::new(write_half, peer.clone()));
        device.attach_link(link.clone());

        let handshake = tokio::time::timeout(
            settings.handshake_timeout(),
            handshake(&device, &mut read_half, settings.max_frame_length),
        )
        .await
        .unwrap_or_else(|_| Err(NetworkError::HandshakeTimeout(device.name().to_string())));
        if let Err(err) = handshake {
            error!("Handshake of {} with {} failed: {}", device.name(), peer, err);
            link.shutdown().await;
            device.detach_link(&link);
            return Err(err);
        }

        Ok(Self::start(peer, link, Target::Device(device), read_half, settings, runtime))
    }

    /// Connect every device registered on `router` over one stream.
    ///
    /// The read loop starts first and hands frames to the router, then each
    /// device registers its port in turn. Fails if any device is not confirmed
    /// within the handshake timeout.
    pub async fn connect_shared<NP, RT>(
        router: Arc<Router>,
        connect_info: NP::ConnectInfo,
        settings: &SessionSettings,
        runtime: &RT,
    ) -> Result<Session, NetworkError>
    where
        NP: HubProvider,
        RT: Runtime,
    {
        let peer = connect_info.to_string();
        let devices = router.devices();
        info!("Connecting {} devices to {} over {}", devices.len(), peer, NP::PROVIDER_NAME);

        let socket = NP::connect_task(connect_info, settings).await?;
        let (read_half, write_half) = NP::split(socket);
        let link = Arc::new(Link::new(write_half, peer.clone()));
        for device in &devices {
            device.attach_link(link.clone());
        }

        let session = Self::start(peer, link, Target::Router(router), read_half, settings, runtime);
        for device in &devices {
            let registered = match device.send(&register(device)).await {
                Ok(()) => device.wait_connected(settings.handshake_timeout()).await,
                Err(err) => {
                    session.close().await;
                    return Err(err);
                }
            };
            if !registered {
                session.close().await;
                return Err(NetworkError::HandshakeTimeout(device.name().to_string()));
            }
        }
        Ok(session)
    }

    fn start<R, RT>(
        peer: String,
        link: Arc<Link>,
        target: Target,
        read_half: R,
        settings: &SessionSettings,
        runtime: &RT,
    ) -> Session
    where
        R: AsyncRead + Unpin + Send + 'static,
        RT: Runtime,
    {
        let subscribers = Arc::new(Subscribers::new(settings.channel_capacity));
        let read_task: Box<dyn JoinHandle> = Box::new(run_async(
            read_loop(
                read_half,
                target.clone(),
                link.clone(),
                subscribers.clone(),
                settings.max_frame_length,
            ),
            runtime,
        ));
        debug!("Session with {} running", peer);

        Session {
            peer,
            link,
            target,
            subscribers,
            read_task: Mutex::new(read_task),
            closed: AtomicBool::new(false),
        }
    }

    /// Address of the server this session talks to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The devices fed by this session.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.target
            .devices()
            .into_iter()
            .filter(|device| device.is_linked_to(&self.link))
            .collect()
    }

    /// True while the read loop runs.
    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && !self
                .read_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_finished()
    }

    /// A receiver of every frame decoded from now on.
    ///
    /// The channel closes with the session. A receiver that falls more than
    /// [`channel_capacity`](SessionSettings::channel_capacity) frames behind
    /// misses frames.
    pub fn subscribe(&self) -> Receiver<Message> {
        self.subscribers.subscribe()
    }

    /// Stop reading, mark the devices disconnected and wake their gate waiters.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing session with {}", self.peer);
        self.abort_read_loop();
        self.link.shutdown().await;
        teardown(&self.target, &self.link, &self.subscribers);
    }

    fn abort_read_loop(&self) {
        self.read_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.abort_read_loop();
            teardown(&self.target, &self.link, &self.subscribers);
        }
    }
}

fn register(device: &Device) -> Message {
    device.ext_server(ServerCommand::Register)
}

/// Register `device` and read frames until the server confirms it.
async fn handshake<R>(device: &Device, reader: &mut R, max_frame_length: usize) -> Result<(), NetworkError>
where
    R: AsyncRead + Unpin,
{
    device.send(&register(device)).await?;

    let mut buffer = vec![0u8; MAX_FRAME_LEN];
    loop {
        let len = read_frame(reader, &mut buffer, max_frame_length).await?;
        let message = match decode(&buffer[..len]) {
            Ok(message) => message,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!("Skipping frame {:02x?} during handshake: {}", &buffer[..len], err);
                continue;
            }
        };
        if let Err(err) = device.apply_incoming(&message) {
            warn!("{}", err);
        }
        if device.is_connected() {
            return Ok(());
        }
        if let Message::ExtServer(ExtServer { port, event: Some(ServerEvent::Disconnected), .. }) = message
            && port == device.port()
        {
            return Err(NetworkError::HandshakeRejected(device.name().to_string()));
        }
    }
}

fn decode(frame: &[u8]) -> Result<Message, WireError> {
    <LwpCodec as Decoder<Message>>::decode(frame)
}

async fn read_loop<R>(
    mut reader: R,
    target: Target,
    link: Arc<Link>,
    subscribers: Arc<Subscribers>,
    max_frame_length: usize,
) where
    R: AsyncRead + Unpin,
{
    trace!("Starting read loop for {}", link.peer());
    let mut buffer = vec![0u8; MAX_FRAME_LEN];
    loop {
        let len = match read_frame(&mut reader, &mut buffer, max_frame_length).await {
            Ok(len) => len,
            Err(NetworkError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!("Server {} closed the connection", link.peer());
                break;
            }
            Err(err) => {
                error!("Reading from {} failed: {}", link.peer(), err);
                break;
            }
        };
        trace!("Received {:02x?}", &buffer[..len]);

        let message = match decode(&buffer[..len]) {
            Ok(message) => message,
            Err(err) if err.is_fatal() => {
                error!("Stream from {} out of sync: {}", link.peer(), err);
                break;
            }
            Err(err) => {
                warn!("Skipping frame {:02x?}: {}", &buffer[..len], err);
                continue;
            }
        };

        target.deliver(&message);
        subscribers.publish(&message);

        if !target.keep_reading() {
            info!("Registration with {} dropped", link.peer());
            break;
        }
    }
    teardown(&target, &link, &subscribers);
}

fn teardown(target: &Target, link: &Arc<Link>, subscribers: &Subscribers) {
    for device in target.devices() {
        device.detach_link(link);
    }
    subscribers.close();
}

// Tests for the client driver against an in-process fake server

use super::*;

use async_trait::async_trait;
use futures::SinkExt;
use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

#[derive(Default)]
struct FakePlayer {
    unavailable: bool,
    started: SyncMutex<Vec<(String, u16)>>,
    stops: SyncMutex<usize>,
}

#[async_trait]
impl PlaybackPort for FakePlayer {
    async fn start_playback(
        &self,
        server_address: &str,
        profile: &StreamProfile,
        on_line: LineSink,
    ) -> Result<Completion, DomainError> {
        self.started
            .lock()
            .push((server_address.to_string(), profile.port));
        on_line("frame=1".to_string());
        Ok(Completion::ready(Ok(ExitOutcome::Completed)))
    }

    async fn stop_playback(&self) {
        *self.stops.lock() += 1;
    }

    async fn is_available(&self) -> bool {
        !self.unavailable
    }
}

enum ProbeBehaviour {
    Speed(f64),
    Fail,
    Hang,
}

struct FakeProbe(ProbeBehaviour);

#[async_trait]
impl SpeedProbePort for FakeProbe {
    async fn measure_downlink_mbps(&self) -> Result<f64, DomainError> {
        match self.0 {
            ProbeBehaviour::Speed(speed) => Ok(speed),
            ProbeBehaviour::Fail => Err(DomainError::ResourceUnavailable("offline".to_string())),
            ProbeBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(100.0)
            }
        }
    }
}

fn settings() -> ClientSettings {
    ClientSettings {
        probe_timeout: Duration::from_millis(200),
        default_speed_mbps: 2.0,
    }
}

fn client_with(
    player: Arc<FakePlayer>,
    probe: ProbeBehaviour,
) -> (StreamingClient, mpsc::UnboundedReceiver<ClientEvent>) {
    StreamingClient::new(settings(), player, Arc::new(FakeProbe(probe)))
}

async fn next_message(server: &mut Framed<TcpStream, MessageCodec>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), server.next())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed")
        .expect("transport error")
        .expect("invalid message")
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Connect `client` to a fresh listener and return the server side of the connection
async fn connect(client: &StreamingClient) -> Framed<TcpStream, MessageCodec> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (connected, accepted) = tokio::join!(client.connect("127.0.0.1", port), listener.accept());
    connected.unwrap();
    Framed::new(accepted.unwrap().0, MessageCodec::new())
}

#[tokio::test]
async fn test_connect_requires_player() {
    let player = Arc::new(FakePlayer {
        unavailable: true,
        ..FakePlayer::default()
    });
    let (client, _events) = client_with(player, ProbeBehaviour::Speed(10.0));
    let err = client.connect("127.0.0.1", 1).await.unwrap_err();
    assert!(matches!(err, DomainError::ResourceUnavailable(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connect_reports_measured_speed() {
    let (client, _events) = client_with(Arc::new(FakePlayer::default()), ProbeBehaviour::Speed(12.5));
    let mut server = connect(&client).await;

    let report = next_message(&mut server).await;
    assert_eq!(report.kind, MessageKind::ReportConnectionSpeed);
    assert_eq!(report.speed(), Some(12.5));
    assert!(client.is_connected());
    assert_eq!(client.speed_mbps(), 12.5);
    assert_eq!(client.server_address().await.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_failed_probe_uses_default_speed() {
    let (client, _events) = client_with(Arc::new(FakePlayer::default()), ProbeBehaviour::Fail);
    let mut server = connect(&client).await;
    assert_eq!(next_message(&mut server).await.speed(), Some(2.0));
}

#[tokio::test]
async fn test_hanging_probe_is_bounded() {
    let (client, _events) = client_with(Arc::new(FakePlayer::default()), ProbeBehaviour::Hang);
    let mut server = connect(&client).await;
    assert_eq!(next_message(&mut server).await.speed(), Some(2.0));
    assert_eq!(client.speed_mbps(), 2.0);
}

#[tokio::test]
async fn test_requests_while_disconnected_fail() {
    let (client, _events) = client_with(Arc::new(FakePlayer::default()), ProbeBehaviour::Fail);
    assert_eq!(client.request_video_list().await, Err(DomainError::NotConnected));
    assert_eq!(client.request_stream("a.mp4").await, Err(DomainError::NotConnected));
    assert_eq!(client.stop_streaming().await, Err(DomainError::NotConnected));
    client.disconnect().await;
}

#[tokio::test]
async fn test_requests_reach_server() {
    let player = Arc::new(FakePlayer::default());
    let (client, _events) = client_with(player.clone(), ProbeBehaviour::Speed(5.0));
    let mut server = connect(&client).await;
    next_message(&mut server).await;

    client.request_video_list().await.unwrap();
    assert_eq!(next_message(&mut server).await, Message::request_video_list());

    client.request_stream("movie.mp4").await.unwrap();
    let request = next_message(&mut server).await;
    assert_eq!(request.kind, MessageKind::RequestStreamVideo);
    assert_eq!(request.text(), Some("movie.mp4"));
    assert_eq!(*player.stops.lock(), 1);

    client.stop_streaming().await.unwrap();
    assert_eq!(next_message(&mut server).await, Message::stop_streaming());
    assert_eq!(*player.stops.lock(), 2);
}

#[tokio::test]
async fn test_server_messages_become_events() {
    let player = Arc::new(FakePlayer::default());
    let (client, mut events) = client_with(player.clone(), ProbeBehaviour::Speed(5.0));
    let mut server = connect(&client).await;
    next_message(&mut server).await;

    let entry = VideoEntry::new("/srv/videos/a.mp4", 10).unwrap();
    server.send(Message::video_list(vec![entry.clone()])).await.unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::VideoList(vec![entry]));

    server.send(Message::server_info("hello")).await.unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::ServerInfo("hello".to_string()));

    let profile = StreamProfile::sd_480p().with_port(9100).with_format(STREAMING_CONTAINER);
    server.send(Message::stream_ready(profile.clone())).await.unwrap();

    let mut saw_ready = false;
    let mut saw_output = false;
    while !(saw_ready && saw_output) {
        match next_event(&mut events).await {
            ClientEvent::StreamReady(announced) => {
                assert_eq!(announced, profile);
                saw_ready = true;
            }
            ClientEvent::PlayerOutput(line) => {
                assert_eq!(line, "frame=1");
                saw_output = true;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(
        player.started.lock().clone(),
        vec![("127.0.0.1".to_string(), 9100)]
    );

    server.send(Message::stream_error("boom")).await.unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::StreamError("boom".to_string()));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (client, mut events) = client_with(Arc::new(FakePlayer::default()), ProbeBehaviour::Speed(5.0));
    let mut server = connect(&client).await;
    next_message(&mut server).await;

    client.disconnect().await;
    client.disconnect().await;
    assert!(!client.is_connected());
    assert_eq!(next_message(&mut server).await, Message::disconnect());
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_server_close_disconnects_client() {
    let (client, mut events) = client_with(Arc::new(FakePlayer::default()), ProbeBehaviour::Speed(5.0));
    let server = connect(&client).await;
    drop(server);

    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert!(!client.is_connected());
}

//! End-to-end tests: the real router on an ephemeral port, a scripted remote
//! shell behind a fake connector, and a tungstenite client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{self, Message};

use termgate::config::Config;
use termgate::remote::{PtyRequest, RemoteError, SessionStreams};
use termgate::{server, AppState, Connector, RemoteSession, SshTarget};

const WAIT: Duration = Duration::from_secs(5);

/// What the fake remote side observed.
#[derive(Default)]
struct Recorder {
    targets: Mutex<Vec<String>>,
    resizes: Mutex<Vec<(u32, u32)>>,
    closes: AtomicUsize,
}

struct ScriptedConnector {
    recorder: Arc<Recorder>,
    refuse: Option<RemoteError>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, RemoteError> {
        self.recorder
            .targets
            .lock()
            .unwrap()
            .push(target.to_string());
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        Ok(Box::new(ScriptedSession::new(Arc::clone(&self.recorder))))
    }
}

/// Shell stand-in: answers `ls\n` with a file list, hangs up on `exit\n`,
/// echoes everything else.
struct ScriptedSession {
    recorder: Arc<Recorder>,
    streams: Option<SessionStreams>,
    shell: Mutex<Option<(DuplexStream, DuplexStream, DuplexStream)>>,
    close_tx: Mutex<Option<oneshot::Sender<()>>>,
    close_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ScriptedSession {
    fn new(recorder: Arc<Recorder>) -> Self {
        let (stdin_bridge, stdin_shell) = tokio::io::duplex(4096);
        let (stdout_bridge, stdout_shell) = tokio::io::duplex(4096);
        let (stderr_bridge, stderr_shell) = tokio::io::duplex(4096);
        let (close_tx, close_rx) = oneshot::channel();
        Self {
            recorder,
            streams: Some(SessionStreams {
                stdin: Box::new(stdin_bridge),
                stdout: Box::new(stdout_bridge),
                stderr: Box::new(stderr_bridge),
            }),
            shell: Mutex::new(Some((stdin_shell, stdout_shell, stderr_shell))),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx: Mutex::new(Some(close_rx)),
        }
    }
}

async fn scripted_shell(
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    stderr: DuplexStream,
    mut closed: oneshot::Receiver<()>,
) {
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            _ = &mut closed => break,
            read = stdin.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let reply: &[u8] = match &buf[..n] {
                    b"ls\n" => b"file1\nfile2\n",
                    b"exit\n" => break,
                    other => other,
                };
                if stdout.write_all(reply).await.is_err() {
                    break;
                }
            }
        }
    }
    drop(stderr);
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn request_pty(&self, _request: &PtyRequest) -> Result<(), RemoteError> {
        Ok(())
    }

    fn take_streams(&mut self) -> Result<SessionStreams, RemoteError> {
        self.streams.take().ok_or(RemoteError::StreamsTaken)
    }

    async fn start_shell(&self) -> Result<(), RemoteError> {
        let (stdin, stdout, stderr) = self.shell.lock().unwrap().take().ok_or(RemoteError::Closed)?;
        let closed = self.close_rx.lock().unwrap().take().ok_or(RemoteError::Closed)?;
        tokio::spawn(scripted_shell(stdin, stdout, stderr, closed));
        Ok(())
    }

    async fn resize(&self, rows: u32, cols: u32) -> Result<(), RemoteError> {
        self.recorder.resizes.lock().unwrap().push((rows, cols));
        Ok(())
    }

    async fn close(&self) {
        self.recorder.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.close_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

async fn spawn_gateway(refuse: Option<RemoteError>, max_sessions: usize) -> (SocketAddr, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let connector = ScriptedConnector {
        recorder: Arc::clone(&recorder),
        refuse,
    };
    let mut config = Config::default();
    config.server.max_sessions = max_sessions;
    config.ssh.default_host = "shell.internal".into();
    let state = AppState::new(config, Arc::new(connector));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::router(state)).await.unwrap();
    });
    (addr, recorder)
}

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/ws?{query}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Next frame; a transport error after the server hangs up counts as end of stream.
async fn next(ws: &mut Client) -> Option<Message> {
    tokio::time::timeout(WAIT, ws.next())
        .await
        .unwrap()
        .and_then(Result::ok)
}

async fn wait_for_close(recorder: &Recorder) {
    tokio::time::timeout(WAIT, async {
        while recorder.closes.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_terminal_session_end_to_end() {
    let (addr, recorder) = spawn_gateway(None, 4).await;
    let mut ws = connect(addr, "user=alice&pass=secret&port=2022").await;

    ws.send(Message::text(r#"{"rows":40,"cols":120}"#))
        .await
        .unwrap();
    ws.send(Message::binary(b"ls\n".to_vec())).await.unwrap();

    match next(&mut ws).await {
        Some(Message::Binary(data)) => assert_eq!(data.as_ref(), b"file1\nfile2\n"),
        other => panic!("unexpected message: {other:?}"),
    }
    assert_eq!(*recorder.resizes.lock().unwrap(), vec![(40, 120)]);
    assert_eq!(
        *recorder.targets.lock().unwrap(),
        vec!["alice@shell.internal:2022".to_string()]
    );

    ws.close(None).await.unwrap();
    wait_for_close(&recorder).await;
}

#[tokio::test]
async fn test_text_input_is_echoed_through_shell() {
    let (addr, _recorder) = spawn_gateway(None, 4).await;
    let mut ws = connect(addr, "user=bob").await;

    ws.send(Message::text(r#"{"rows":0,"cols":80}"#)).await.unwrap();
    match next(&mut ws).await {
        Some(Message::Binary(data)) => assert_eq!(data.as_ref(), br#"{"rows":0,"cols":80}"#),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_exit_closes_websocket() {
    let (addr, recorder) = spawn_gateway(None, 4).await;
    let mut ws = connect(addr, "user=carol").await;

    ws.send(Message::binary(b"exit\n".to_vec())).await.unwrap();
    match next(&mut ws).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("unexpected message: {other:?}"),
    }
    wait_for_close(&recorder).await;
}

#[tokio::test]
async fn test_connect_failure_reports_diagnostic() {
    let (addr, _recorder) = spawn_gateway(Some(RemoteError::AuthRejected), 4).await;
    let mut ws = connect(addr, "user=mallory&pass=wrong").await;

    match next(&mut ws).await {
        Some(Message::Text(text)) => {
            assert_eq!(text.as_str(), "SSH connection failed: authentication rejected\r\n");
        }
        other => panic!("unexpected message: {other:?}"),
    }
    match next(&mut ws).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn test_session_limit_refuses_upgrade() {
    let (addr, _recorder) = spawn_gateway(None, 1).await;
    let _first = connect(addr, "user=dave").await;

    let url = format!("ws://{addr}/ws?user=erin");
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 503);
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("second session should be refused"),
    }
}

#[tokio::test]
async fn test_invalid_port_rejected() {
    let (addr, recorder) = spawn_gateway(None, 4).await;

    let url = format!("ws://{addr}/ws?user=frank&port=not-a-port");
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 400);
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("invalid port should be refused"),
    }
    assert!(recorder.targets.lock().unwrap().is_empty());
}

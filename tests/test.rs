use std::sync::Arc;

use cryptdrive::codec::SentinelCodec;
use cryptdrive::config::ServerConfig;
use cryptdrive::protocol::Payload;
use cryptdrive::{
    Code, DriveConfig, DriveServices, ItemsList, Request, Response, Server, Status, Verb,
};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::codec::Framed;

struct TestServer {
    addr: std::net::SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start() -> TestServer {
    start_with(ServerConfig::default()).await
}

async fn start_with(server: ServerConfig) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DriveConfig::from_toml(&format!(
        r#"
        [server]
        bind_addr = "127.0.0.1:0"

        [storage]
        data_dir = "{}"

        [tokens]
        secret = "integration-secret"
        "#,
        dir.path().display()
    ))
    .unwrap();
    config.server.idle_timeout_secs = server.idle_timeout_secs;
    config.server.upload_timeout_secs = server.upload_timeout_secs;

    let services = Arc::new(DriveServices::open(&config).await.unwrap());
    let server = Server::bind(config.server, services).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
    }));

    TestServer {
        addr,
        stop: Some(stop),
        _dir: dir,
    }
}

struct Client {
    framed: Framed<TcpStream, SentinelCodec>,
    token: String,
}

impl Client {
    async fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr).await.unwrap();
        Self {
            framed: Framed::new(stream, SentinelCodec::new(1 << 20)),
            token: String::new(),
        }
    }

    async fn send_raw(&mut self, frame: &[u8]) -> Response {
        self.framed.send(frame).await.unwrap();
        let reply = self.framed.next().await.unwrap().unwrap();
        let response = Response::parse(&reply).unwrap();
        if response.is_success() {
            self.token = response.token.clone();
        }
        response
    }

    async fn call(&mut self, verb: Verb, fields: &[&str]) -> Response {
        let request = Request::new(verb, self.token.clone(), fields).encode();
        self.send_raw(&request).await
    }

    async fn sign_up(&mut self, username: &str) {
        let resp = self.call(Verb::SignUp, &[username, "5f4dcc3b"]).await;
        assert!(resp.is_success(), "{resp:?}");
    }

    async fn upload(&mut self, path: &str, name: &str, content: &[u8]) -> Response {
        let ready = self.call(Verb::CreateFile, &[path, name]).await;
        if ready.code != Some(Code::ReadyForData) {
            return ready;
        }
        self.send_raw(content).await
    }

    async fn list(&mut self, path: &str) -> ItemsList {
        let resp = self.call(Verb::GetItemsList, &[path]).await;
        assert_eq!(resp.code, Some(Code::SendingData));
        match resp.payload {
            Some(Payload::Text(json)) => serde_json::from_str(&json).unwrap(),
            other => panic!("expected a text payload, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_upload_list_delete_round() {
    let server = start().await;
    let mut alice = Client::connect(&server).await;
    alice.sign_up("alice").await;

    assert_eq!(alice.list("/").await, ItemsList::default());

    let created = alice.upload("/", "notes.txt", b"hello world").await;
    assert_eq!(created.status, Status::Success);
    assert_eq!(created.code, Some(Code::FileCreated));

    let listing = alice.list("/").await;
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].name, "notes.txt");
    assert_eq!(listing.files[0].size, 11);

    let download = alice.call(Verb::DownloadFile, &["/", "notes.txt"]).await;
    assert_eq!(download.payload, Some(Payload::Bytes(b"hello world".to_vec())));

    let deleted = alice.call(Verb::DeleteFile, &["/", "notes.txt"]).await;
    assert!(deleted.is_success());
    assert_eq!(alice.list("/").await, ItemsList::default());
}

#[tokio::test]
async fn test_rename_directory_carries_files() {
    let server = start().await;
    let mut client = Client::connect(&server).await;
    client.sign_up("bob").await;

    assert!(client.call(Verb::CreateDir, &["/", "docs"]).await.is_success());
    client.upload("/docs", "a.txt", b"alpha").await;

    let renamed = client.call(Verb::RenameDir, &["/", "docs", "papers"]).await;
    assert!(renamed.is_success(), "{renamed:?}");

    let root = client.list("/").await;
    assert_eq!(root.directories.len(), 1);
    assert_eq!(root.directories[0].path, "/papers");
    assert_eq!(root.directories[0].item_count, 1);

    let papers = client.list("/papers").await;
    assert_eq!(papers.files[0].name, "a.txt");
    assert_eq!(client.list("/docs").await, ItemsList::default());
}

#[tokio::test]
async fn test_refusals_keep_connection_usable() {
    let server = start().await;
    let mut client = Client::connect(&server).await;

    let resp = client.call(Verb::GetItemsList, &["/"]).await;
    assert_eq!(resp, Response::error("", Code::InvalidToken));

    client.sign_up("carol").await;

    let resp = client.send_raw(b"FORMAT_DISK|||x").await;
    assert_eq!(resp.code, Some(Code::InvalidVerb));

    let resp = client.send_raw(b"garbage").await;
    assert_eq!(resp.code, Some(Code::MalformedRequest));

    client.upload("/", "a", b"1").await;
    let again = client.upload("/", "a", b"2").await;
    assert_eq!(again.code, Some(Code::FileExists));

    let resp = client.call(Verb::MoveFile, &["/", "/missing", "a"]).await;
    assert_eq!(resp.code, Some(Code::FileNotFoundOrAlreadyExists));

    // Still serving after every refusal.
    let download = client.call(Verb::DownloadFile, &["/", "a"]).await;
    assert_eq!(download.payload, Some(Payload::Bytes(b"1".to_vec())));
}

#[tokio::test]
async fn test_users_are_isolated() {
    let server = start().await;
    let mut alice = Client::connect(&server).await;
    let mut bob = Client::connect(&server).await;
    alice.sign_up("alice").await;
    bob.sign_up("bob").await;

    alice.upload("/", "secret.txt", b"mine").await;

    assert_eq!(bob.list("/").await, ItemsList::default());
    let resp = bob.call(Verb::DownloadFile, &["/", "secret.txt"]).await;
    assert_eq!(resp.code, Some(Code::FileNotFound));

    // Both may use the same names.
    let created = bob.upload("/", "secret.txt", b"his").await;
    assert_eq!(created.code, Some(Code::FileCreated));
}

#[tokio::test]
async fn test_log_in_from_new_connection() {
    let server = start().await;
    let mut first = Client::connect(&server).await;
    first.sign_up("dave").await;
    first.call(Verb::CreateDir, &["/", "keep"]).await;
    drop(first);

    let mut second = Client::connect(&server).await;
    let bad = second.call(Verb::LogIn, &["dave", "nope"]).await;
    assert_eq!(bad.code, Some(Code::InvalidCredentials));

    let good = second.call(Verb::LogIn, &["dave", "5f4dcc3b"]).await;
    assert!(good.is_success());
    assert_eq!(second.list("/").await.directories[0].path, "/keep");
}

#[tokio::test]
async fn test_stalled_upload_is_abandoned() {
    let server = start_with(ServerConfig {
        upload_timeout_secs: 1,
        ..ServerConfig::default()
    })
    .await;
    let mut client = Client::connect(&server).await;
    client.sign_up("erin").await;

    let ready = client.call(Verb::CreateFile, &["/", "slow.bin"]).await;
    assert_eq!(ready.code, Some(Code::ReadyForData));

    // Never send the payload; the server gives up and says so.
    let reply = client.framed.next().await.unwrap().unwrap();
    let resp = Response::parse(&reply).unwrap();
    assert_eq!(resp.code, Some(Code::FileNotCreated));
    assert!(client.framed.next().await.is_none());

    let mut again = Client::connect(&server).await;
    again.call(Verb::LogIn, &["erin", "5f4dcc3b"]).await;
    assert_eq!(again.list("/").await, ItemsList::default());
}

#[tokio::test]
async fn test_client_hangup_mid_frame() {
    let server = start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"SIGN_UP|||").await.unwrap();
    drop(stream);

    // The server survives and keeps accepting.
    let mut client = Client::connect(&server).await;
    client.sign_up("frank").await;
}

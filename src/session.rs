//! Per-connection protocol state machine.
//!
//! ```text
//!             CREATE_FILE accepted
//! AwaitingRequest ───────────────▶ AwaitingPayload
//!        ▲                               │
//!        └──── FILE_CREATED / FILE_NOT_CREATED
//! ```
//!
//! Every other request is answered in place and leaves the session in
//! `AwaitingRequest`. No failure while handling a frame escapes as an error:
//! each one becomes an `ERROR` response carrying the echoed token.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::codec::SentinelCodec;
use crate::config::ServerConfig;
use crate::error::{DriveError, Result};
use crate::protocol::{Code, Payload, Request, Response, Verb};
use crate::schema::OwnerId;
use crate::server::DriveServices;
use crate::token::Authenticated;

/// An accepted `CREATE_FILE` waiting for its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub owner: OwnerId,
    pub path: String,
    pub name: String,
    /// Token to echo in the second response.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRequest,
    AwaitingPayload(PendingUpload),
}

pub struct Session {
    services: Arc<DriveServices>,
    state: SessionState,
}

impl Session {
    pub fn new(services: Arc<DriveServices>) -> Self {
        Self {
            services,
            state: SessionState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn awaiting_payload(&self) -> bool {
        matches!(self.state, SessionState::AwaitingPayload(_))
    }

    /// Feed one frame (sentinel stripped) and produce the response to send.
    pub async fn on_frame(&mut self, frame: &[u8]) -> Response {
        match std::mem::replace(&mut self.state, SessionState::AwaitingRequest) {
            SessionState::AwaitingRequest => self.on_request(frame).await,
            SessionState::AwaitingPayload(upload) => self.on_payload(upload, frame).await,
        }
    }

    /// Abandon the session after a transport fault. Returns the response owed
    /// to the client if an upload was in flight.
    pub fn abort(&mut self) -> Option<Response> {
        match std::mem::replace(&mut self.state, SessionState::AwaitingRequest) {
            SessionState::AwaitingPayload(upload) => {
                warn!(path = %upload.path, name = %upload.name, "upload abandoned");
                Some(Response::error(upload.token, Code::FileNotCreated))
            }
            SessionState::AwaitingRequest => None,
        }
    }

    async fn on_request(&mut self, frame: &[u8]) -> Response {
        let request = match Request::parse(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed request");
                return Response::error("", Code::MalformedRequest);
            }
        };

        let auth = self.services.tokens.authenticate(&request.token);
        let echo = auth
            .as_ref()
            .map(|a| a.token.clone())
            .unwrap_or_else(|| request.token.clone());

        let verb = match request.verb() {
            Ok(verb) => verb,
            Err(e) => {
                debug!(error = %e, "rejecting request");
                return Response::error(echo, Code::InvalidVerb);
            }
        };
        debug!(%verb, fields = request.fields.len(), authenticated = auth.is_some(), "request received");

        if request.fields.len() < verb.field_count() {
            warn!(%verb, got = request.fields.len(), "request is missing fields");
            return Response::error(echo, Code::MalformedRequest);
        }

        if !verb.requires_token() {
            return self.on_account(verb, &request.fields, echo).await;
        }

        // Invalid tokens never reach the filesystem.
        let Some(auth) = auth else {
            info!(%verb, "invalid token");
            return Response::error(echo, Code::InvalidToken);
        };

        let owner = match self.services.users.owner_id(&auth.username).await {
            Ok(owner) => owner,
            Err(DriveError::NotFound(_)) => {
                warn!(username = %auth.username, "token names an unknown user");
                return Response::error(auth.token, Code::InvalidToken);
            }
            Err(e) => {
                error!(error = %e, "owner lookup failed");
                return Response::error(auth.token, Code::InternalError);
            }
        };

        match self.dispatch(verb, owner, &auth, &request.fields).await {
            Ok(response) => response,
            Err(e) => {
                let code = failure_code(verb, &e);
                if e.is_internal() {
                    error!(%verb, error = %e, "request failed");
                } else {
                    debug!(%verb, error = %e, %code, "request refused");
                }
                Response::error(auth.token, code)
            }
        }
    }

    async fn on_account(&mut self, verb: Verb, fields: &[String], echo: String) -> Response {
        let (username, password_hash) = (fields[0].as_str(), fields[1].as_str());
        if username.is_empty() || password_hash.is_empty() {
            return Response::error(echo, Code::MalformedRequest);
        }

        let outcome = match verb {
            Verb::SignUp => self.sign_up(username, password_hash).await,
            _ => self.log_in(username, password_hash).await,
        };

        match outcome {
            Ok(token) => Response::success(token),
            Err(DriveError::UserExists(_)) => Response::error(echo, Code::UserExists),
            Err(DriveError::InvalidCredentials(_)) => {
                Response::error(echo, Code::InvalidCredentials)
            }
            Err(e) => {
                error!(%verb, error = %e, "account request failed");
                Response::error(echo, Code::InternalError)
            }
        }
    }

    async fn sign_up(&self, username: &str, password_hash: &str) -> Result<String> {
        let owner = self.services.users.register(username, password_hash).await?;
        self.services.fs.create_root(owner).await?;
        info!(username, owner, "user signed up");
        self.services.tokens.issue(username)
    }

    async fn log_in(&self, username: &str, password_hash: &str) -> Result<String> {
        if !self.services.users.verify(username, password_hash).await? {
            info!(username, "login refused");
            return Err(DriveError::InvalidCredentials(username.to_string()));
        }
        let owner = self.services.users.owner_id(username).await?;
        self.services.fs.ensure_root(owner).await?;
        info!(username, owner, "user logged in");
        self.services.tokens.issue(username)
    }

    async fn dispatch(
        &mut self,
        verb: Verb,
        owner: OwnerId,
        auth: &Authenticated,
        f: &[String],
    ) -> Result<Response> {
        let fs = &self.services.fs;
        let ok = || Response::success(auth.token.clone());

        match verb {
            Verb::GetItemsList => {
                let items = fs.list_items(owner, &f[0]).await?;
                let json = serde_json::to_string(&items)?;
                Ok(ok()
                    .with_code(Code::SendingData)
                    .with_payload(Payload::Text(json)))
            }
            Verb::DownloadFile => {
                let bytes = fs.get_file_contents(owner, &f[0], &f[1]).await?;
                Ok(ok()
                    .with_code(Code::SendingData)
                    .with_payload(Payload::Bytes(bytes)))
            }
            Verb::CreateFile => {
                fs.ensure_can_create_file(owner, &f[0], &f[1]).await?;
                self.state = SessionState::AwaitingPayload(PendingUpload {
                    owner,
                    path: f[0].clone(),
                    name: f[1].clone(),
                    token: auth.token.clone(),
                });
                Ok(ok().with_code(Code::ReadyForData))
            }
            Verb::DeleteFile => fs.delete_file(owner, &f[0], &f[1]).await.map(|_| ok()),
            Verb::CreateDir => fs.create_dir(owner, &f[0], &f[1]).await.map(|_| ok()),
            Verb::DeleteDir => fs.delete_dir(owner, &f[0], &f[1]).await.map(|_| ok()),
            Verb::RenameFile => fs
                .rename_file(owner, &f[0], &f[1], &f[2])
                .await
                .map(|_| ok()),
            Verb::RenameDir => fs
                .rename_dir(owner, &f[0], &f[1], &f[2])
                .await
                .map(|_| ok()),
            Verb::MoveFile => fs
                .move_file(owner, &f[0], &f[1], &f[2])
                .await
                .map(|_| ok()),
            Verb::MoveDir => fs
                .move_dir(owner, &f[0], &f[1], &f[2])
                .await
                .map(|_| ok()),
            Verb::SignUp | Verb::LogIn => Err(DriveError::InvalidVerb(verb.to_string())),
        }
    }

    async fn on_payload(&mut self, upload: PendingUpload, content: &[u8]) -> Response {
        match self
            .services
            .fs
            .create_file(upload.owner, &upload.path, &upload.name, content)
            .await
        {
            Ok(size) => {
                info!(path = %upload.path, name = %upload.name, size, "upload stored");
                Response::success(upload.token).with_code(Code::FileCreated)
            }
            Err(e) => {
                if e.is_internal() {
                    error!(path = %upload.path, name = %upload.name, error = %e, "upload failed");
                } else {
                    warn!(path = %upload.path, name = %upload.name, error = %e, "upload refused");
                }
                Response::error(upload.token, Code::FileNotCreated)
            }
        }
    }
}

/// Wire code for a failed request.
fn failure_code(verb: Verb, err: &DriveError) -> Code {
    if err.is_internal() {
        return Code::InternalError;
    }
    match (verb, err) {
        (_, DriveError::InvalidPath(_)) => Code::InvalidPath,
        (_, DriveError::InvalidToken) => Code::InvalidToken,
        (Verb::DownloadFile | Verb::DeleteFile, DriveError::NotFound(_)) => Code::FileNotFound,
        (Verb::CreateFile, DriveError::Conflict(_)) => Code::FileExists,
        (Verb::CreateDir, DriveError::Conflict(_)) => Code::DirExists,
        (
            Verb::CreateFile | Verb::CreateDir | Verb::DeleteDir | Verb::GetItemsList,
            DriveError::NotFound(_),
        ) => Code::DirNotFound,
        (Verb::RenameFile | Verb::MoveFile, DriveError::NotFound(_) | DriveError::Conflict(_)) => {
            Code::FileNotFoundOrAlreadyExists
        }
        (Verb::RenameDir | Verb::MoveDir, DriveError::NotFound(_) | DriveError::Conflict(_)) => {
            Code::DirNotFoundOrAlreadyExists
        }
        _ => Code::InternalError,
    }
}

/// Drive one connection until the client leaves, goes idle, or breaks framing.
pub async fn serve_connection<S>(
    stream: S,
    services: Arc<DriveServices>,
    config: &ServerConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, SentinelCodec::new(config.max_frame_len));
    let mut session = Session::new(services);

    loop {
        let uploading = session.awaiting_payload();
        let limit = if uploading {
            config.upload_timeout()
        } else {
            config.idle_timeout()
        };

        let fault = match tokio::time::timeout(limit, framed.next()).await {
            Ok(Some(Ok(frame))) => {
                let response = session.on_frame(&frame).await;
                framed.send(response.encode()).await?;
                continue;
            }
            Ok(None) if !uploading => return Ok(()),
            Err(_) if !uploading => {
                debug!("idle connection closed");
                return Ok(());
            }
            Ok(None) => DriveError::Transport("connection closed before the upload payload".into()),
            Err(_) => DriveError::Timeout("upload payload"),
            Ok(Some(Err(e))) => e,
        };

        let owed = session
            .abort()
            .unwrap_or_else(|| Response::error("", Code::MalformedRequest));
        // Best effort: the peer may already be gone.
        if let Err(e) = framed.send(owed.encode()).await {
            debug!(error = %e, "could not report transport fault");
        }
        return Err(fault);
    }
}

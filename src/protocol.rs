//! Wire format.
//!
//! ```text
//! request  := VERB SEP TOKEN (SEP FIELD)*
//! response := STATUS SEP TOKEN (SEP CODE)? (DATA_FLAG DATA)?
//! ```
//!
//! `SEP` is `|||`. The data flags carry their own separators, so a response
//! with a payload reads `SUCCESS|||<token>|||SENDING_DATA||| BYTE_DATA |||<bytes>`.
//! Every frame on the wire, upload payloads included, is terminated by
//! [`END_FLAG`]; see [`crate::codec`].

use std::str::FromStr;

use memchr::memmem;
use strum::{AsRefStr, Display, EnumString};

use crate::error::{DriveError, Result};

pub const SEPARATOR: &str = "|||";
pub const END_FLAG: &[u8] = b"||| END |||";
pub const STRING_DATA_FLAG: &[u8] = b"||| STRING_DATA |||";
pub const BYTE_DATA_FLAG: &[u8] = b"||| BYTE_DATA |||";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Verb {
    SignUp,
    LogIn,
    GetItemsList,
    DownloadFile,
    CreateFile,
    DeleteFile,
    CreateDir,
    DeleteDir,
    RenameFile,
    RenameDir,
    MoveFile,
    MoveDir,
}

impl Verb {
    /// Everything except account creation and login needs a valid token.
    pub fn requires_token(self) -> bool {
        !matches!(self, Verb::SignUp | Verb::LogIn)
    }

    /// Number of fields following the token.
    pub fn field_count(self) -> usize {
        match self {
            Verb::GetItemsList => 1,
            Verb::SignUp
            | Verb::LogIn
            | Verb::DownloadFile
            | Verb::CreateFile
            | Verb::DeleteFile
            | Verb::CreateDir
            | Verb::DeleteDir => 2,
            Verb::RenameFile | Verb::RenameDir | Verb::MoveFile | Verb::MoveDir => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Error,
}

/// Machine-readable reason attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    ReadyForData,
    SendingData,
    FileCreated,
    FileNotCreated,
    FileNotFound,
    FileExists,
    DirNotFound,
    DirExists,
    FileNotFoundOrAlreadyExists,
    DirNotFoundOrAlreadyExists,
    UserExists,
    InvalidCredentials,
    InvalidToken,
    InvalidVerb,
    InvalidPath,
    MalformedRequest,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Raw verb text; see [`Request::verb`].
    pub verb: String,
    pub token: String,
    pub fields: Vec<String>,
}

impl Request {
    pub fn new(verb: Verb, token: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            verb: verb.as_ref().to_string(),
            token: token.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Split a frame (sentinel already stripped) into verb, token and fields.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| DriveError::Transport("request is not valid UTF-8".into()))?;

        let mut parts = text.split(SEPARATOR);
        let verb = parts.next().unwrap_or_default().to_string();
        let token = parts
            .next()
            .ok_or_else(|| DriveError::Transport(format!("request {verb:?} has no token")))?
            .to_string();

        Ok(Self {
            verb,
            token,
            fields: parts.map(str::to_string).collect(),
        })
    }

    pub fn verb(&self) -> Result<Verb> {
        Verb::from_str(&self.verb).map_err(|_| DriveError::InvalidVerb(self.verb.clone()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{}{SEPARATOR}{}", self.verb, self.token);
        for field in &self.fields {
            out.push_str(SEPARATOR);
            out.push_str(field);
        }
        out.into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub token: String,
    pub code: Option<Code>,
    pub payload: Option<Payload>,
}

impl Response {
    pub fn success(token: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            token: token.into(),
            code: None,
            payload: None,
        }
    }

    pub fn error(token: impl Into<String>, code: Code) -> Self {
        Self {
            status: Status::Error,
            token: token.into(),
            code: Some(code),
            payload: None,
        }
    }

    pub fn with_code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{}{SEPARATOR}{}", self.status, self.token).into_bytes();
        if let Some(code) = self.code {
            out.extend_from_slice(SEPARATOR.as_bytes());
            out.extend_from_slice(code.as_ref().as_bytes());
        }
        match &self.payload {
            Some(Payload::Text(text)) => {
                out.extend_from_slice(STRING_DATA_FLAG);
                out.extend_from_slice(text.as_bytes());
            }
            Some(Payload::Bytes(bytes)) => {
                out.extend_from_slice(BYTE_DATA_FLAG);
                out.extend_from_slice(bytes);
            }
            None => {}
        }
        out
    }

    /// Client-side decoding of a response frame.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let text_at = memmem::find(frame, STRING_DATA_FLAG);
        let bytes_at = memmem::find(frame, BYTE_DATA_FLAG);

        let (header, payload) = match (text_at, bytes_at) {
            (Some(t), b) if b.is_none_or(|b| t < b) => {
                let data = &frame[t + STRING_DATA_FLAG.len()..];
                let text = String::from_utf8(data.to_vec())
                    .map_err(|_| DriveError::Transport("text payload is not UTF-8".into()))?;
                (&frame[..t], Some(Payload::Text(text)))
            }
            (_, Some(b)) => (
                &frame[..b],
                Some(Payload::Bytes(frame[b + BYTE_DATA_FLAG.len()..].to_vec())),
            ),
            _ => (frame, None),
        };

        let header = std::str::from_utf8(header)
            .map_err(|_| DriveError::Transport("response header is not UTF-8".into()))?;
        let mut parts = header.split(SEPARATOR);
        let status = parts
            .next()
            .and_then(|s| Status::from_str(s).ok())
            .ok_or_else(|| DriveError::Transport(format!("bad response status in {header:?}")))?;
        let token = parts
            .next()
            .ok_or_else(|| DriveError::Transport("response has no token".into()))?
            .to_string();
        let code = parts
            .next()
            .map(|c| {
                Code::from_str(c).map_err(|_| DriveError::Transport(format!("unknown code {c:?}")))
            })
            .transpose()?;

        Ok(Self {
            status,
            token,
            code,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_names() {
        assert_eq!(Verb::SignUp.as_ref(), "SIGN_UP");
        assert_eq!(Verb::LogIn.as_ref(), "LOG_IN");
        assert_eq!(Verb::GetItemsList.as_ref(), "GET_ITEMS_LIST");
        assert_eq!(Verb::from_str("MOVE_DIR").unwrap(), Verb::MoveDir);
        assert!(Verb::from_str("move_dir").is_err());
        assert_eq!(
            Code::FileNotFoundOrAlreadyExists.as_ref(),
            "FILE_NOT_FOUND_OR_ALREADY_EXISTS"
        );
    }

    #[test]
    fn test_parse_request() {
        let req = Request::parse(b"CREATE_FILE|||tok|||/docs|||a.txt").unwrap();
        assert_eq!(req.verb().unwrap(), Verb::CreateFile);
        assert_eq!(req.token, "tok");
        assert_eq!(req.fields, vec!["/docs", "a.txt"]);

        let bare = Request::parse(b"GET_ITEMS_LIST|||tok").unwrap();
        assert!(bare.fields.is_empty());

        let unknown = Request::parse(b"FORMAT_DISK|||tok").unwrap();
        assert!(matches!(unknown.verb(), Err(DriveError::InvalidVerb(_))));

        assert!(matches!(
            Request::parse(b"LOG_IN"),
            Err(DriveError::Transport(_))
        ));
        assert!(Request::parse(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_encode_response() {
        let plain = Response::success("tok");
        assert_eq!(plain.encode(), b"SUCCESS|||tok");

        let err = Response::error("tok", Code::InvalidToken);
        assert_eq!(err.encode(), b"ERROR|||tok|||INVALID_TOKEN");

        let data = Response::success("tok")
            .with_code(Code::SendingData)
            .with_payload(Payload::Bytes(b"raw".to_vec()));
        assert_eq!(
            data.encode(),
            b"SUCCESS|||tok|||SENDING_DATA||| BYTE_DATA |||raw".to_vec()
        );
    }

    #[test]
    fn test_parse_response_with_payload() {
        let listing = Response::success("tok")
            .with_code(Code::SendingData)
            .with_payload(Payload::Text("{\"files\":[]}".into()));
        assert_eq!(Response::parse(&listing.encode()).unwrap(), listing);

        // Binary content may itself contain separators.
        let download = Response::success("tok")
            .with_code(Code::SendingData)
            .with_payload(Payload::Bytes(b"a|||b".to_vec()));
        assert_eq!(Response::parse(&download.encode()).unwrap(), download);

        assert!(Response::parse(b"MAYBE|||tok").is_err());
    }
}

use std::time::Duration;

use bytes::Bytes;
use lineio::{LineFramer, LineReader};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::Credential;

pub const PROMPT: &[u8] = b"> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    AuthMenu,
    LoginAttempt,
    RegisterAttempt,
    Authenticated,
    MainLoop,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection closed by peer")]
    Closed,
    #[error("idle timeout")]
    TimedOut,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("menu has no options")]
    EmptyMenu,
    #[error("session already authenticated")]
    AlreadyAuthenticated,
}

/// One connection's line-based I/O surface.
///
/// A reader task frames incoming bytes and hands lines over a channel of capacity 1;
/// a writer task drains outgoing bytes in order. When the peer goes away the line
/// channel closes, so a pending [`Session::next_line`] fails instead of hanging.
///
/// `next_line` takes `&mut self`, which keeps at most one line request outstanding.
#[derive(Debug)]
pub struct Session {
    id: ConnId,
    peer: String,
    user: Option<Credential>,
    state: SessionState,
    idle_timeout: Option<Duration>,
    lines: mpsc::Receiver<std::io::Result<Bytes>>,
    out: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new<S>(id: ConnId, peer: impl Into<String>, stream: S, framer: LineFramer) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, mut wr) = tokio::io::split(stream);

        let (line_tx, lines) = mpsc::channel::<std::io::Result<Bytes>>(1);
        let reader = tokio::spawn(async move {
            let mut lr = LineReader::with_framer(rd, framer);
            loop {
                match lr.read_line().await {
                    Ok(Some(line)) => {
                        if line_tx.send(Ok(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = line_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        let (out, mut write_rx) = mpsc::unbounded_channel::<Bytes>();
        let writer = tokio::spawn(async move {
            while let Some(b) = write_rx.recv().await {
                if wr.write_all(&b[..]).await.is_err() {
                    break;
                }
            }
            let _ = wr.shutdown().await;
        });

        Self {
            id,
            peer: peer.into(),
            user: None,
            state: SessionState::Connected,
            idle_timeout: None,
            lines,
            out,
            reader,
            writer: Some(writer),
        }
    }

    /// Fail [`Session::next_line`] with [`SessionError::TimedOut`] after `d` without input.
    pub fn idle_timeout(mut self, d: Option<Duration>) -> Self {
        self.idle_timeout = d.filter(|d| !d.is_zero());
        self
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn user(&self) -> Option<&Credential> {
        self.user.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(conn = %self.id, from = ?self.state, to = ?state, "session state");
            self.state = state;
        }
    }

    /// Record the logged-in user. Only the first call succeeds.
    pub fn set_user(&mut self, cred: Credential) -> Result<(), SessionError> {
        if self.user.is_some() {
            return Err(SessionError::AlreadyAuthenticated);
        }
        self.user = Some(cred);
        self.set_state(SessionState::Authenticated);
        Ok(())
    }

    /// Wait for the next input line and return it without its terminator.
    pub async fn next_line(&mut self) -> Result<String, SessionError> {
        let next = match self.idle_timeout {
            Some(d) => match tokio::time::timeout(d, self.lines.recv()).await {
                Ok(v) => v,
                Err(_) => {
                    self.set_state(SessionState::Closed);
                    return Err(SessionError::TimedOut);
                }
            },
            None => self.lines.recv().await,
        };

        match next {
            Some(Ok(line)) => Ok(String::from_utf8_lossy(&line).into_owned()),
            Some(Err(e)) => {
                self.set_state(SessionState::Closed);
                Err(SessionError::Io(e))
            }
            None => {
                self.set_state(SessionState::Closed);
                Err(SessionError::Closed)
            }
        }
    }

    /// Send `text` as one or more CRLF-terminated lines.
    pub fn send(&self, text: &str) -> Result<(), SessionError> {
        self.write(Bytes::from(crlf_lines(text)))
    }

    pub fn show_prompt(&self) -> Result<(), SessionError> {
        self.write(Bytes::from_static(PROMPT))
    }

    fn write(&self, b: Bytes) -> Result<(), SessionError> {
        self.out.send(b).map_err(|_| SessionError::Closed)
    }

    /// Flush queued output and shut down the write side.
    pub async fn close(mut self) {
        let writer = self.writer.take();
        drop(self);
        if let Some(w) = writer {
            let _ = w.await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Normalize every `\r`, `\n` or `\r\n` in `text` to CRLF and append one more CRLF.
pub fn crlf_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }
    out.push_str("\r\n");
    out
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::pair;
    use super::*;

    #[test]
    fn crlf_normalization() {
        assert_eq!(crlf_lines("a\nb"), "a\r\nb\r\n");
        assert_eq!(crlf_lines("a\r\nb"), "a\r\nb\r\n");
        assert_eq!(crlf_lines("a\rb"), "a\r\nb\r\n");
        assert_eq!(crlf_lines(""), "\r\n");
    }

    #[tokio::test]
    async fn next_line_returns_lines_in_order() {
        let (mut s, mut peer) = pair();
        peer.write_raw(b"hello\r\nworld\nthird\r").await;
        assert_eq!(s.next_line().await.unwrap(), "hello");
        assert_eq!(s.next_line().await.unwrap(), "world");
        assert_eq!(s.next_line().await.unwrap(), "third");
    }

    #[tokio::test]
    async fn send_and_prompt_write_in_call_order() {
        let (s, peer) = pair();
        s.send("a\nb").unwrap();
        s.show_prompt().unwrap();
        s.send("c").unwrap();
        s.close().await;
        assert_eq!(peer.read_to_end().await, "a\r\nb\r\n> c\r\n");
    }

    #[tokio::test]
    async fn pending_next_line_fails_when_peer_closes() {
        let (mut s, peer) = pair();
        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(peer);
        });
        let err = s.next_line().await.unwrap_err();
        assert!(matches!(err, SessionError::Closed), "{err:?}");
        assert_eq!(s.state(), SessionState::Closed);
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn overlong_line_closes_the_session() {
        let (client, server) = tokio::io::duplex(1024);
        let framer = LineFramer::default().max_line_len(8);
        let mut s = Session::new(ConnId(1), "test-peer", server, framer);
        let mut peer = super::testing::Peer::new(client);

        peer.write_raw(b"ok\r\n").await;
        assert_eq!(s.next_line().await.unwrap(), "ok");

        peer.write_raw(b"far-too-long-for-eight").await;
        let err = s.next_line().await.unwrap_err();
        match err {
            SessionError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
            other => panic!("expected io error, got {other:?}"),
        }
        assert_eq!(s.state(), SessionState::Closed);
        assert!(matches!(s.next_line().await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn idle_timeout_fails_next_line() {
        let (s, _peer) = pair();
        let mut s = s.idle_timeout(Some(Duration::from_millis(30)));
        let err = s.next_line().await.unwrap_err();
        assert!(matches!(err, SessionError::TimedOut), "{err:?}");
    }

    #[tokio::test]
    async fn user_is_set_once() {
        let (mut s, _peer) = pair();
        assert!(s.user().is_none());
        s.set_user(Credential::new("bob", "h")).unwrap();
        assert_eq!(s.state(), SessionState::Authenticated);
        assert!(matches!(
            s.set_user(Credential::new("eve", "h")),
            Err(SessionError::AlreadyAuthenticated)
        ));
        assert_eq!(s.user().unwrap().username, "bob");
    }
}

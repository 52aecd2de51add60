use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::auth;
use crate::config::Config;
use crate::menu::{MenuOption, show_menu};
use crate::session::{ConnId, Session, SessionError, SessionState};
use crate::store::UserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChoice {
    Login,
    CreateUser,
    ResetPassword,
}

pub fn auth_menu() -> Vec<MenuOption<AuthChoice>> {
    vec![
        MenuOption::new(AuthChoice::Login, "Login"),
        MenuOption::new(AuthChoice::CreateUser, "Create User"),
        MenuOption::new(AuthChoice::ResetPassword, "Reset Password"),
    ]
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: String,
    pub connected_at: Instant,
    pub user: Option<String>,
}

/// Live connections keyed by id. Ids come from a counter and are never handed out twice,
/// even after the connection that held one is gone.
#[derive(Debug, Default)]
pub struct Registry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<ConnId, SessionInfo>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, peer: &str) -> ConnId {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.lock().await.insert(
            id,
            SessionInfo {
                peer: peer.to_string(),
                connected_at: Instant::now(),
                user: None,
            },
        );
        id
    }

    pub async fn set_user(&self, id: ConnId, name: &str) {
        if let Some(info) = self.sessions.lock().await.get_mut(&id) {
            info.user = Some(name.to_string());
        }
    }

    pub async fn remove(&self, id: ConnId) -> Option<SessionInfo> {
        self.sessions.lock().await.remove(&id)
    }

    pub async fn get(&self, id: ConnId) -> Option<SessionInfo> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<(ConnId, SessionInfo)> {
        let mut v = self
            .sessions
            .lock()
            .await
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect::<Vec<_>>();
        v.sort_by_key(|(id, _)| *id);
        v
    }
}

/// What a logged-in session does with each line it reads.
pub trait LineHandler: Send + Sync {
    fn on_line(&self, session: &mut Session, line: &str) -> Result<(), SessionError>;
}

/// Ignores input and shows the prompt again.
#[derive(Debug, Default)]
pub struct Reprompt;

impl LineHandler for Reprompt {
    fn on_line(&self, session: &mut Session, _line: &str) -> Result<(), SessionError> {
        session.show_prompt()
    }
}

#[derive(Clone)]
pub struct Server {
    cfg: Arc<Config>,
    store: Arc<dyn UserStore>,
    registry: Arc<Registry>,
    handler: Arc<dyn LineHandler>,
}

impl Server {
    pub fn new(cfg: Config, store: Arc<dyn UserStore>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            store,
            registry: Arc::new(Registry::new()),
            handler: Arc::new(Reprompt),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn LineHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` turns true, then close the store.
    ///
    /// Sessions already running are left alone.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let shutdown = wait_for_shutdown(shutdown);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                res = listener.accept() => match res {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(err = %e, "accept failed");
                        continue;
                    }
                },
            };

            let id = self.registry.register(&peer.to_string()).await;
            let srv = self.clone();
            tokio::spawn(async move {
                srv.handle_conn(id, stream, peer).await;
            });
        }

        info!("stopped accepting connections");
        self.store.close()?;
        Ok(())
    }

    async fn handle_conn(&self, id: ConnId, stream: TcpStream, peer: SocketAddr) {
        info!(conn = %id, peer = %peer, "connected");
        let mut session = Session::new(id, peer.to_string(), stream, self.cfg.line_framer())
            .idle_timeout(self.cfg.idle_timeout);

        match self.run_session(&mut session).await {
            Ok(()) => {}
            Err(SessionError::Closed) => info!(conn = %id, peer = %peer, "disconnected"),
            Err(SessionError::TimedOut) => info!(conn = %id, peer = %peer, "idle timeout"),
            Err(e) => warn!(conn = %id, peer = %peer, err = %e, "connection ended with error"),
        }

        if let Some(info) = self.registry.remove(id).await {
            info!(
                conn = %id,
                user = info.user.as_deref().unwrap_or("-"),
                secs = info.connected_at.elapsed().as_secs(),
                "session ended"
            );
        }
        session.close().await;
    }

    /// Welcome, auth menu until logged in, then hand every line to the handler.
    ///
    /// Only returns on a connection-level error.
    pub async fn run_session(&self, session: &mut Session) -> Result<(), SessionError> {
        session.send(&format!("Welcome! You are connection #{}", session.id()))?;

        let menu = auth_menu();
        while session.user().is_none() {
            session.set_state(SessionState::AuthMenu);
            match show_menu(session, &menu).await? {
                AuthChoice::Login => {
                    auth::login(session, &*self.store).await?;
                }
                AuthChoice::CreateUser => {
                    auth::register(session, &*self.store, self.cfg.password_scheme)
                        .await?;
                }
                AuthChoice::ResetPassword => {
                    debug!(conn = %session.id(), "reset password chosen; nothing to do");
                }
            }
        }

        if let Some(user) = session.user() {
            self.registry.set_user(session.id(), &user.username).await;
        }
        session.set_state(SessionState::MainLoop);
        session.show_prompt()?;

        loop {
            let line = session.next_line().await?;
            self.handler.on_line(session, &line)?;
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

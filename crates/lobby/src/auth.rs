//! Login and account creation over a [`Session`].
//!
//! Failed logins and taken names are ordinary outcomes: the user gets a message and
//! the caller goes back to its menu. Store failures get a generic message and are
//! logged; they never tear the session down.

use tracing::{info, warn};
use zeroize::Zeroize;

use crate::password::{self, PasswordScheme};
use crate::session::{Session, SessionError, SessionState};
use crate::store::{Credential, StoreError, UserStore};

pub const MSG_NO_USER: &str = "No user by that username";
pub const MSG_BAD_PASSWORD: &str = "Incorrect password";
pub const MSG_NAME_TAKEN: &str = "A user already exists with that user name";
pub const MSG_EMPTY_NAME: &str = "Username cannot be empty";
pub const MSG_STORE_FAILED: &str = "Something went wrong, please try again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    LoggedIn,
    UnknownUser,
    BadPassword,
    Registered,
    NameTaken,
    InvalidName,
    StoreFailed,
}

pub async fn login(
    session: &mut Session,
    store: &dyn UserStore,
) -> Result<AuthOutcome, SessionError> {
    session.set_state(SessionState::LoginAttempt);
    let (name, mut pw) = read_credentials(session).await?;
    let res = check_login(session, store, &name, pw.as_bytes());
    pw.zeroize();

    let outcome = res?;
    if outcome != AuthOutcome::LoggedIn {
        session.set_state(SessionState::AuthMenu);
    }
    Ok(outcome)
}

pub async fn register(
    session: &mut Session,
    store: &dyn UserStore,
    scheme: PasswordScheme,
) -> Result<AuthOutcome, SessionError> {
    session.set_state(SessionState::RegisterAttempt);
    let (name, mut pw) = read_credentials(session).await?;
    let res = create_user(session, store, scheme, &name, pw.as_bytes());
    pw.zeroize();

    session.set_state(SessionState::AuthMenu);
    res
}

async fn read_credentials(session: &mut Session) -> Result<(String, String), SessionError> {
    session.send("Username:")?;
    let name = session.next_line().await?.trim().to_string();
    session.send("Password:")?;
    let pw = session.next_line().await?;
    Ok((name, pw))
}

fn check_login(
    session: &mut Session,
    store: &dyn UserStore,
    name: &str,
    pw: &[u8],
) -> Result<AuthOutcome, SessionError> {
    let rec = match store.find_by_username(name) {
        Ok(Some(rec)) => rec,
        Ok(None) => {
            info!(conn = %session.id(), peer = %session.peer(), user = %name, "login: unknown user");
            session.send(MSG_NO_USER)?;
            return Ok(AuthOutcome::UnknownUser);
        }
        Err(e) => {
            warn!(conn = %session.id(), user = %name, err = %e, "login: store lookup failed");
            session.send(MSG_STORE_FAILED)?;
            return Ok(AuthOutcome::StoreFailed);
        }
    };

    if !password::verify(pw, &rec.pw_hash) {
        info!(conn = %session.id(), peer = %session.peer(), user = %name, "login: bad password");
        session.send(MSG_BAD_PASSWORD)?;
        return Ok(AuthOutcome::BadPassword);
    }

    session.send(&format!("Welcome, {}!", rec.username))?;
    info!(conn = %session.id(), peer = %session.peer(), user = %rec.username, "login ok");
    session.set_user(rec)?;
    Ok(AuthOutcome::LoggedIn)
}

fn create_user(
    session: &mut Session,
    store: &dyn UserStore,
    scheme: PasswordScheme,
    name: &str,
    pw: &[u8],
) -> Result<AuthOutcome, SessionError> {
    if name.is_empty() {
        session.send(MSG_EMPTY_NAME)?;
        return Ok(AuthOutcome::InvalidName);
    }

    match store.find_by_username(name) {
        Ok(Some(_)) => {
            session.send(MSG_NAME_TAKEN)?;
            return Ok(AuthOutcome::NameTaken);
        }
        Ok(None) => {}
        Err(e) => {
            warn!(conn = %session.id(), user = %name, err = %e, "register: store lookup failed");
            session.send(MSG_STORE_FAILED)?;
            return Ok(AuthOutcome::StoreFailed);
        }
    }

    let hash = match scheme.hash(pw) {
        Ok(h) => h,
        Err(e) => {
            warn!(conn = %session.id(), user = %name, err = %e, "register: hash failed");
            session.send(MSG_STORE_FAILED)?;
            return Ok(AuthOutcome::StoreFailed);
        }
    };

    match store.save(Credential::new(name, hash)) {
        Ok(()) => {}
        // Another session registered the name between the lookup and the save.
        Err(StoreError::Exists(_)) => {
            session.send(MSG_NAME_TAKEN)?;
            return Ok(AuthOutcome::NameTaken);
        }
        Err(e) => {
            warn!(conn = %session.id(), user = %name, err = %e, "register: store save failed");
            session.send(MSG_STORE_FAILED)?;
            return Ok(AuthOutcome::StoreFailed);
        }
    }

    info!(conn = %session.id(), peer = %session.peer(), user = %name, "user created");
    session.send(&format!("User {name} created"))?;
    Ok(AuthOutcome::Registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{Peer, pair};
    use crate::store::MemoryStore;

    async fn try_login(
        s: &mut Session,
        peer: &mut Peer,
        store: &dyn UserStore,
        name: &str,
        pw: &str,
    ) -> AuthOutcome {
        peer.type_line(name).await;
        peer.type_line(pw).await;
        login(s, store).await.unwrap()
    }

    async fn try_register(
        s: &mut Session,
        peer: &mut Peer,
        store: &dyn UserStore,
        name: &str,
        pw: &str,
    ) -> AuthOutcome {
        peer.type_line(name).await;
        peer.type_line(pw).await;
        register(s, store, PasswordScheme::Sha256).await.unwrap()
    }

    #[tokio::test]
    async fn login_unknown_user() {
        let store = MemoryStore::new();
        let (mut s, mut peer) = pair();
        let out = try_login(&mut s, &mut peer, &store, "alice", "pw").await;
        assert_eq!(out, AuthOutcome::UnknownUser);
        assert!(s.user().is_none());
        assert_eq!(s.state(), SessionState::AuthMenu);

        let text = peer.expect(MSG_NO_USER).await;
        assert!(text.starts_with("Username:\r\nPassword:\r\n"), "{text:?}");
    }

    #[tokio::test]
    async fn register_then_login() {
        let store = MemoryStore::new();
        let (mut s, mut peer) = pair();

        let out = try_register(&mut s, &mut peer, &store, "bob", "secret").await;
        assert_eq!(out, AuthOutcome::Registered);
        assert!(s.user().is_none(), "registration does not log in");
        peer.expect("User bob created").await;

        let out = try_login(&mut s, &mut peer, &store, "bob", "wrong").await;
        assert_eq!(out, AuthOutcome::BadPassword);
        assert!(s.user().is_none());
        peer.expect(MSG_BAD_PASSWORD).await;

        let out = try_login(&mut s, &mut peer, &store, "bob", "secret").await;
        assert_eq!(out, AuthOutcome::LoggedIn);
        peer.expect("Welcome, bob!").await;
        let user = s.user().unwrap();
        assert_eq!(user, &store.find_by_username("bob").unwrap().unwrap());
        assert_eq!(s.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn register_refuses_taken_and_empty_names() {
        let store = MemoryStore::new();
        store.save(Credential::new("bob", "x")).unwrap();
        let (mut s, mut peer) = pair();

        let out = try_register(&mut s, &mut peer, &store, "bob", "pw").await;
        assert_eq!(out, AuthOutcome::NameTaken);
        peer.expect(MSG_NAME_TAKEN).await;
        assert_eq!(store.find_by_username("bob").unwrap().unwrap().pw_hash, "x");

        let out = try_register(&mut s, &mut peer, &store, "   ", "pw").await;
        assert_eq!(out, AuthOutcome::InvalidName);
        peer.expect(MSG_EMPTY_NAME).await;
    }

    #[tokio::test]
    async fn login_accepts_argon2_hashes() {
        let store = MemoryStore::new();
        let (mut s, mut peer) = pair();
        peer.type_line("carol").await;
        peer.type_line("hunter22").await;
        let out = register(&mut s, &store, PasswordScheme::Argon2)
            .await
            .unwrap();
        assert_eq!(out, AuthOutcome::Registered);
        let rec = store.find_by_username("carol").unwrap().unwrap();
        assert!(rec.pw_hash.starts_with("$argon2"));

        let out = try_login(&mut s, &mut peer, &store, "carol", "hunter22").await;
        assert_eq!(out, AuthOutcome::LoggedIn);
    }

    struct BrokenStore;

    impl UserStore for BrokenStore {
        fn find_by_username(&self, _name: &str) -> Result<Option<Credential>, StoreError> {
            Ok(None)
        }

        fn save(&self, _cred: Credential) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[tokio::test]
    async fn store_failure_keeps_session_usable() {
        let (mut s, mut peer) = pair();
        let out = try_register(&mut s, &mut peer, &BrokenStore, "dave", "pw").await;
        assert_eq!(out, AuthOutcome::StoreFailed);
        peer.expect(MSG_STORE_FAILED).await;

        peer.type_line("still here").await;
        assert_eq!(s.next_line().await.unwrap(), "still here");
    }

    struct LookupFails;

    impl UserStore for LookupFails {
        fn find_by_username(&self, _name: &str) -> Result<Option<Credential>, StoreError> {
            Err(StoreError::Poisoned)
        }

        fn save(&self, _cred: Credential) -> Result<(), StoreError> {
            panic!("save must not run after a failed lookup");
        }
    }

    #[tokio::test]
    async fn lookup_failure_keeps_session_usable() {
        let (mut s, mut peer) = pair();

        let out = try_login(&mut s, &mut peer, &LookupFails, "erin", "pw").await;
        assert_eq!(out, AuthOutcome::StoreFailed);
        assert!(s.user().is_none());
        assert_eq!(s.state(), SessionState::AuthMenu);
        let text = peer.expect(MSG_STORE_FAILED).await;
        assert!(!text.contains(MSG_NO_USER), "{text:?}");

        let out = try_register(&mut s, &mut peer, &LookupFails, "erin", "pw").await;
        assert_eq!(out, AuthOutcome::StoreFailed);
        assert!(s.user().is_none());
        peer.expect(MSG_STORE_FAILED).await;

        peer.type_line("still here").await;
        assert_eq!(s.next_line().await.unwrap(), "still here");
    }

    /// Lookup sees no account but the save loses to a concurrent registration.
    struct RaceLost;

    impl UserStore for RaceLost {
        fn find_by_username(&self, _name: &str) -> Result<Option<Credential>, StoreError> {
            Ok(None)
        }

        fn save(&self, cred: Credential) -> Result<(), StoreError> {
            Err(StoreError::Exists(cred.username))
        }
    }

    #[tokio::test]
    async fn register_losing_a_race_reports_name_taken() {
        let (mut s, mut peer) = pair();
        let out = try_register(&mut s, &mut peer, &RaceLost, "bob", "pw").await;
        assert_eq!(out, AuthOutcome::NameTaken);
        let text = peer.expect(MSG_NAME_TAKEN).await;
        assert!(!text.contains(MSG_STORE_FAILED), "{text:?}");
    }

    #[tokio::test]
    async fn concurrent_registrations_keep_the_first_password() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let (mut a, mut pa) = pair();
        let (mut b, mut pb) = pair();

        let sa = store.clone();
        let ra = tokio::spawn(async move {
            try_register(&mut a, &mut pa, &*sa, "bob", "first").await
        });
        let sb = store.clone();
        let rb = tokio::spawn(async move {
            try_register(&mut b, &mut pb, &*sb, "bob", "second").await
        });
        let mut outs = vec![ra.await.unwrap(), rb.await.unwrap()];
        outs.sort_by_key(|o| *o == AuthOutcome::NameTaken);
        assert_eq!(outs, vec![AuthOutcome::Registered, AuthOutcome::NameTaken]);

        let rec = store.find_by_username("bob").unwrap().unwrap();
        let first = password::verify(b"first", &rec.pw_hash);
        let second = password::verify(b"second", &rec.pw_hash);
        assert!(first ^ second, "exactly one password owns the account");
    }
}

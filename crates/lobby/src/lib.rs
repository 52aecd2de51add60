//! `lobby`: a line-oriented TCP session server.
//!
//! Each connection gets a [`session::Session`] that frames input into lines and writes
//! CRLF-terminated output. On top of it the [`server::Server`] runs a numbered
//! [`menu`] for login / account creation ([`auth`]) and then hands lines to a
//! [`server::LineHandler`].

pub mod auth;
pub mod config;
pub mod menu;
pub mod password;
pub mod server;
pub mod session;
pub mod store;

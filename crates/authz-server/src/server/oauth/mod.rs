//! HTTP endpoints of the authorization server.
//!
//! Handlers only translate between HTTP and [`crate::oauth`]; no protocol
//! decisions are made here.

pub mod handlers;
pub mod login;

//! EventDesk Server - Event management REST API.
//!
//! This crate provides the EventDesk HTTP service, responsible for:
//! - Registering users and issuing opaque login tokens
//! - Creating, editing, listing and searching events
//! - Recording which users registered for which events
//! - Optionally emailing a confirmation after each event registration
//!
//! # Architecture
//!
//! Handlers in [`routes`] validate wire JSON through [`serializers`], apply
//! [`policy`] checks, and persist through [`db`], a thin layer over a SQLite
//! pool where every operation is a single statement. Authentication lives in
//! [`auth`] and outgoing mail in [`mailer`].

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod models;
pub mod policy;
pub mod routes;
pub mod serializers;

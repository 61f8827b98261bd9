//! # Document Translation Service Library
//!
//! OAuth2 token acquisition for the document translation front end. The
//! library resolves sovereign-cloud endpoints, runs the delegated sign-in
//! protocol against Entra ID, keeps the resulting token fresh, and hands it
//! to HTTP clients through a generic credential.
//!
//! ## Modules
//!
//! - [`auth`] - Cloud resolution, token authenticator, credential adapter and factory
//! - [`common`] - Error types shared across the crate

pub mod auth;
pub mod common;

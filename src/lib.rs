//! Select text, get a short AI explanation in a popup next to it.
//!
//! The page side ([`selection`], [`popup`]) never holds the API key. It talks
//! to the privileged side ([`router`]) only through the message [`transport`].

pub mod config;
pub mod credentials;
pub mod error;
pub mod format;
pub mod input;
pub mod models;
pub mod network;
pub mod page;
pub mod popup;
pub mod prompts;
pub mod router;
pub mod selection;
pub mod storage;
pub mod theme;
pub mod transport;
pub mod ui;

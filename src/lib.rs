//! # SEI chat
//!
//! A chatbot over the case files ("processos") of an SEI electronic-records
//! archive. A supervisor model talks to the user and delegates lookups to a
//! research agent that can locate a case, page through its documents, and
//! filter them by type. The case archive is a ZIP downloaded in the
//! background; the chat is usable while it downloads.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌───────────────┐
//! │ Remote ZIP  │──▶│  fetch /    │──▶│ ./processos/  │
//! │             │   │  download   │   │ SEI_NNN_YYYY/ │
//! └─────────────┘   └──────┬──────┘   └──────┬────────┘
//!                          │ status          │ locator / listing
//!                          ▼                 ▼
//!                   ┌─────────────┐   ┌─────────────┐
//!                   │ chat banner │   │   tools     │
//!                   └─────────────┘   └──────┬──────┘
//!                                            ▼
//!                      ┌─────────────────────────────────┐
//!                      │ pipeline: supervisor ⇄ research │
//!                      └──────────────┬──────────────────┘
//!                           ┌─────────┴─────────┐
//!                           ▼                   ▼
//!                     ┌──────────┐        ┌──────────┐
//!                     │   CLI    │        │   HTTP   │
//!                     │  (sei)   │        │  (axum)  │
//!                     └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`case_id`] | Case identifier parsing and folder names |
//! | [`locator`] | Resolve a case to its folder |
//! | [`listing`] | Paginated document listing and type filter |
//! | [`fetch`] | Download and extract the archive |
//! | [`status`] | Shared download status |
//! | [`download`] | Background download task |
//! | [`traits`] | Tool trait, registry and built-in tools |
//! | [`messages`] | Conversation messages and display policy |
//! | [`llm`] | Chat model clients |
//! | [`agents`] | Agent prompts and hand-off tools |
//! | [`pipeline`] | Supervisor/worker pipeline |
//! | [`progress`] | Download banner |
//! | [`chat`] | Terminal chat loop |
//! | [`server`] | HTTP API |

pub mod agents;
pub mod archive_cmd;
pub mod case_id;
pub mod chat;
pub mod config;
pub mod download;
pub mod fetch;
pub mod listing;
pub mod llm;
pub mod locator;
pub mod messages;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod status;
pub mod traits;

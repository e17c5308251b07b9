//! # Hypothesis Sync
//!
//! Incremental sync of Hypothesis annotations into a folder of Markdown
//! documents.
//!
//! Annotations are fetched page by page from the Hypothesis API, grouped
//! into one article per annotated URL, and written as documents carrying
//! YAML front matter. Later syncs append new highlights to the existing
//! document, or replace it when overwrite-on-update is enabled.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌──────────────┐   ┌─────────┐
//! │ Hypothesis   │──▶│  Parser  │──▶│ ArticleStore │──▶│  Vault  │
//! │ API (search) │   │ articles │   │ create/append│   │ FS/mem  │
//! └──────────────┘   └──────────┘   └──────────────┘   └─────────┘
//!         ▲                                  │
//!         └────────── Syncer (cursor, groups, progress) ─┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export HYPOTHESIS_TOKEN=...
//! hsync connect                  # resolve the token, fetch groups
//! hsync groups deselect <id>     # skip a group
//! hsync sync                     # fetch new annotations into the vault
//! hsync status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and the per-run [`SyncConfig`](config::SyncConfig) |
//! | [`error`] | [`SyncError`](error::SyncError) taxonomy |
//! | [`models`] | Annotation, highlight, and article types |
//! | [`api`] | API client and cursor pagination |
//! | [`parser`] | Raw rows to articles |
//! | [`frontmatter`] | Document front matter |
//! | [`render`] | Markdown rendering |
//! | [`vault`] | Storage backends |
//! | [`article_store`] | Create, append, or replace article documents |
//! | [`groups`] | Group-list refresh |
//! | [`settings`] | Persistent user, cursor, groups, and history |
//! | [`progress`] | Progress reporting |
//! | [`sync`] | Sync orchestration |
//! | [`commands`] | `hsync` command implementations |

pub mod api;
pub mod article_store;
pub mod commands;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod groups;
pub mod models;
pub mod parser;
pub mod progress;
pub mod render;
pub mod settings;
pub mod sync;
pub mod vault;

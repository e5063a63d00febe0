//! # embed-backfill
//!
//! Makes sure every code chunk of a repository has a vector embedding
//! stored for retrieval.
//!
//! The ingestion service parses repositories into chunks and stores them in
//! Postgres with an empty `embedding` column. This crate resolves the
//! repository (asking the ingestion service, or recovering the id from the
//! store when the service is overloaded or slow), embeds every chunk that
//! still lacks a vector, and writes the vectors back in one transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Ingestion  │──▶│   Resolver   │──▶│            │
//! │     API     │   └──────┬───────┘   │  Backfill  │
//! └─────────────┘          │ fallback  │            │
//!                   ┌──────▼───────┐   │  fetch ─▶  │   ┌─────────┐
//!                   │  Chunk store │◀─▶│  encode ─▶ │◀─▶│ Encoder │
//!                   │  (pgvector)  │   │  persist   │   └─────────┘
//!                   └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export DATABASE_URL=postgres://localhost/codelearner
//! embed-backfill run octo demo                  # whole repository
//! embed-backfill run octo demo --folder backend # one subfolder
//! embed-backfill status octo demo
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`backfill`] | Pipeline orchestration |
//! | [`resolver`] | Repository resolution with store fallback |
//! | [`store`] | Chunk store trait, Postgres and in-memory backends |
//! | [`embedding`] | Embedding model adapters |
//! | [`chunk`] | Embedding input text framing |
//! | [`config`] | TOML + environment configuration |
//! | [`db`] | Database connection |
//! | [`models`] | Core data types |
//! | [`progress`] | Stage progress reporting |
//! | [`stats`] | Embedding coverage |
//! | [`error`] | Run-aborting errors |

pub mod backfill;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod models;
pub mod progress;
pub mod resolver;
pub mod stats;
pub mod store;

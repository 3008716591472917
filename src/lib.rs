//! # folheto
//!
//! Supermarket flyer ingestion with vision-LLM extraction and product
//! de-duplication.
//!
//! Photographs of supermarket flyers go in; normalized products,
//! merchants, and price observations come out, stored in SQLite. The
//! interesting part is keeping the product table clean while extractions
//! keep producing spelling variants of the same thing: a layered resolver
//! (exact → alias → fuzzy), an append-only alias store with provenance, a
//! pairwise duplicate detector, and a transactional merge engine that
//! collapses duplicates without orphaning their price history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌──────────┐
//! │  Images  │──▶│     Pipeline       │──▶│  SQLite   │
//! │ (flyers) │   │ extract → expand   │   │ products  │
//! └──────────┘   │ → resolve → price  │   │ aliases   │
//!                └───────────────────┘   │ prices    │
//!                                        └────┬─────┘
//!                                             │
//!                              ┌──────────────┤
//!                              ▼              ▼
//!                        ┌──────────┐   ┌──────────┐
//!                        │ resolver │   │  dedup + │
//!                        │  lookup  │   │  merge   │
//!                        └──────────┘   └──────────┘
//! ```
//!
//! ## Quick start
//!
//! ```bash
//! folheto init                         # create database
//! folheto ingest flyers/               # extract and persist a folder
//! folheto duplicates                   # review near-duplicate products
//! folheto merge <keep-id> <discard-id> # collapse a confirmed pair
//! folheto export --output prices.csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`normalize`] | Name normalization and similarity |
//! | [`extract`] | Vision-LLM extraction providers |
//! | [`expand`] | Multi-product line expansion |
//! | [`resolver`] | Layered product resolution |
//! | [`aliases`] | Alias store |
//! | [`dedup`] | Duplicate and bidirectional-alias detection |
//! | [`merge`] | Transactional merge engine |
//! | [`ingest`] | Pipeline orchestration |
//! | [`categories`] | Category mapping |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod aliases;
pub mod categories;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod expand;
pub mod export;
pub mod extract;
pub mod ingest;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod resolver;
pub mod stats;

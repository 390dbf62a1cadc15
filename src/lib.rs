//! # hybrid-sql
//!
//! Natural-language questions over a PostgreSQL database.
//!
//! Every answer combines two sources: a similarity search over table rows
//! that were embedded into a pgvector collection, and an LLM-driven SQL
//! agent that lists tables, reads schemas and runs queries. The retrieved
//! rows are placed in the agent's prompt next to the question.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  rows   ┌─────────────┐  embed  ┌──────────────┐
//! │ PostgreSQL │────────▶│  Ingestion  │────────▶│   pgvector   │
//! │  (tables)  │         │ dedup probe │         │  collection  │
//! └─────┬──────┘         └─────────────┘         └──────┬───────┘
//!       │ SQL tools                          top-k      │
//!       ▼                                               ▼
//! ┌────────────┐       prompt (context + question)  ┌──────────┐
//! │ SQL agent  │◀───────────────────────────────────│  Hybrid  │
//! │ (LLM loop) │───────────── answer ──────────────▶│  search  │
//! └────────────┘                                    └────┬─────┘
//!                                              ┌─────────┴───────┐
//!                                              ▼                 ▼
//!                                         ┌─────────┐      ┌──────────┐
//!                                         │   CLI   │      │   HTTP   │
//!                                         │ (hsql)  │      │ sessions │
//!                                         └─────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hsql init                       # pgvector extension + collection tables
//! hsql ingest                     # embed rows from the configured tables
//! hsql ask "What are the top 5 products by price?"
//! hsql serve                      # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connection`] | Database connection fields and advisory |
//! | [`models`] | Core data types |
//! | [`relational`] | Relational store adapter |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | pgvector and in-memory vector stores |
//! | [`ingest`] | Table rows → vector store |
//! | [`llm`] | Chat model client |
//! | [`tools`] | SQL toolkit for the agent |
//! | [`agent`] | Tool-calling SQL agent |
//! | [`search`] | Hybrid search orchestration |
//! | [`session`] | Conversation sessions |
//! | [`server`] | HTTP API |
//! | [`db`] | Vector store connection pool |
//! | [`migrate`] | Vector store schema |

pub mod agent;
pub mod config;
pub mod connection;
pub mod db;
pub mod embedding;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod relational;
pub mod search;
pub mod server;
pub mod session;
pub mod tools;
pub mod vector_store;

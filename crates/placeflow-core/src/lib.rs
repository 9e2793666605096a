// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Placeflow Core - Contractor Placement Workflow Engine
//!
//! This crate coordinates the lifecycle of a contractor being placed with a
//! client across multiple onboarding routes. It owns the canonical case
//! state, enforces legal transitions, and drives the token-based protocol
//! that lets clients, contractors, and third-party companies act on a case
//! through time-limited secure links, without sessions or logins.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Surrounding layers (HTTP API, CLI, jobs)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │ internal events                          │ act_on_token
//!        ▼                                          ▼
//! ┌───────────────────────┐              ┌─────────────────────────────┐
//! │    WorkflowEngine     │◄─────────────│    External Actor Gateway   │
//! │  (state machine core) │  consumed    │  (generic failure surface)  │
//! │  per-case serialization│  token scope└─────────────────────────────┘
//! └───────┬───────────────┘                         │
//!         │                                         ▼
//!         │ declarative side effects      ┌──────────────────┐
//!         ▼                               │  Token Service   │
//! ┌───────────────────────┐               │ (single-use CAS) │
//! │      Persistence      │               └──────────────────┘
//! │  (memory / SQLite)    │
//! └───────────────────────┘
//!         │ after commit, outside the case lock
//!         ▼
//! ┌───────────────────────┐     ┌──────────────────┐     ┌───────────┐
//! │       Notifier        │     │  Document Store  │     │   Clock   │
//! │    (best-effort)      │     │    (DocRefs)     │     │ (injected)│
//! └───────────────────────┘     └──────────────────┘     └───────────┘
//! ```
//!
//! # Case Status State Machine
//!
//! The union across routes; each route walks a fixed subsequence (see
//! [`routes`]):
//!
//! ```text
//!  draft ──► pending_documents ──► documents_uploaded
//!    │                                     │ advance
//!    └───── documents_uploaded ────────────┤
//!                     ┌────────────────────┴──────────────────┐
//!                     ▼ (quote routes)                        ▼ (costing routes)
//!        pending_third_party_response                   pending_cds_cs
//!                     └────────────────────┬──────────────────┘
//!                                          ▼
//!                                   pending_review ──► rejected ◄─┐
//!                                          │ approve       │ reopen
//!                                          ▼               ▼
//!                                      approved        (preceding stage)
//!                                          │ send_for_signature
//!                                          ▼
//!                                  pending_signature ──► pending_superadmin_signature
//!                                          │  quorum          │ quorum
//!                                          └───────┬──────────┘
//!                                                  ▼
//!                                               signed
//!                     ┌────────────────────────────┴─────────────┬──────────────┐
//!                     ▼ (upload routes)                          ▼ (work order) ▼ (freelancer)
//!        pending_contract_upload ──► contract_uploaded           │           active
//!                                          │ approve             │
//!                                          ▼                     │
//!                                  contract_approved ────────────┤
//!                                                                ▼
//!                                            pending_client_wo_signature
//!                                                                │ client_signed
//!                                                                ▼
//!                                                     work_order_completed
//!                                                                │
//!                                                                ▼
//!                                            awaiting_work_order_approval
//!                                                                │ approve
//!                                                                ▼
//!                                                   active ⇄ suspended
//! ```
//!
//! # Capability tokens
//!
//! | Scope | TTL | External actor |
//! |-------|-----|----------------|
//! | `document_upload` | 7 days | contractor |
//! | `quote_submission` | 30 days | third-party company |
//! | `cohf_signature` / `contract_signature` | 72 hours | signer the token names |
//! | `contract_upload` | 7 days | third-party company |
//! | `work_order_signature` | 72 hours | client |
//!
//! Tokens are single-use (atomic compare-and-swap), digest-at-rest, and
//! reissuing a stage's link invalidates the previous one. External actors
//! only ever see one failure message, whatever actually went wrong.
//!
//! # Modules
//!
//! - [`case`]: domain model (cases, stages, signatures, events, snapshots)
//! - [`clock`]: injected time source
//! - [`config`]: environment configuration
//! - [`document`]: document store adapter
//! - [`engine`]: the workflow engine and its builder
//! - [`error`]: error types with stable error codes
//! - [`gateway`]: external actor gateway
//! - [`machine`]: the pure transition table
//! - [`notify`]: notification trait and dispatch
//! - [`persistence`]: persistence trait and backends
//! - [`routes`]: route resolver
//! - [`signature`]: signature capture and quorum evaluation
//! - [`token`]: capability token service

#![deny(missing_docs)]

/// Domain model: cases, stages, signatures, events, snapshots.
pub mod case;

/// Injected wall-clock time.
pub mod clock;

/// Configuration from environment variables.
pub mod config;

/// Document store adapter.
pub mod document;

/// The workflow engine and its builder.
pub mod engine;

/// Error types with stable error codes.
pub mod error;

/// External actor gateway.
pub mod gateway;

/// The pure transition table.
pub mod machine;

/// Notification trait and best-effort dispatch.
pub mod notify;

/// Persistence trait and backends (memory, SQLite).
pub mod persistence;

/// Route resolver: per-route stage tables and quorums.
pub mod routes;

/// Signature capture and quorum evaluation.
pub mod signature;

/// Capability token service.
pub mod token;

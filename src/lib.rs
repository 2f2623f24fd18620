//! # Folio - Report Composition Engine
//!
//! Folio assembles reports from reusable templates. It provides:
//!
//! - **Workflow**: stepped report editing (template, geography, variables,
//!   preview) with a forward-only review status lifecycle
//! - **Variable resolution**: canonical keys that merge saved snippets and
//!   dropdown values across legacy variable ids
//! - **Geography lookup**: a cascading province to section resolver that
//!   discards superseded responses
//! - **Checklists**: tri-state completion derived from per-item flags
//! - **Image editing**: crop, draw and pixelate with undo
//!
//! ## Quick Start
//!
//! ```no_run
//! use folio::{
//!     EngineConfig,
//!     session::SessionContext,
//!     store::memory::MemoryStores,
//!     workflow::{Step, Workflow},
//! };
//!
//! # async fn example() -> Result<(), folio::FolioError> {
//! let stores = MemoryStores::new(Vec::new());
//! let mut workflow = Workflow::new(
//!     SessionContext::new("alice"),
//!     stores.stores(),
//!     EngineConfig::default(),
//! );
//!
//! workflow.select_template("site-survey").await?;
//! workflow.set_title("North parcel");
//! assert_eq!(workflow.next().await?, Step::VariableFill);
//!
//! workflow.set_value("Owner", "J. Doe");
//! workflow.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`workflow`] | Step state machine, status lifecycle, export |
//! | [`template`] | Templates in legacy (sections) or imported (flat) shape |
//! | [`report`] | Reports, status lifecycle, appendix items |
//! | [`variables`] | Canonical variable keys and saved-entry merging |
//! | [`geo`] | Cascading geography lookup |
//! | [`checklist`] | Checklist aggregation |
//! | [`editor`] | Raster image editor |
//! | [`store`] | Collaborator traits with HTTP and in-memory backends |
//! | [`server`] | HTTP API for editor sessions |
//! | [`error`] | Error types |

pub mod checklist;
pub mod config;
pub mod debounce;
pub mod editor;
pub mod error;
pub mod geo;
pub mod logging;
pub mod notice;
pub mod report;
pub mod server;
pub mod session;
pub mod store;
pub mod template;
pub mod user_template;
pub mod variables;
pub mod workflow;

// Re-exports for convenience
pub use config::EngineConfig;
pub use error::FolioError;

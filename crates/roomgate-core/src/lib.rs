//! ============================================================================
//! ROOMGATE-CORE: Card Reader Access Control
//! ============================================================================
//! Backend for spreadsheet-driven room access:
//! - Keyed table store over A1 ranges (Google Sheets, in-memory)
//! - Table cache with all-or-nothing snapshot loads
//! - Module-completion rules and scan resolution
//! - Reader session, sync schedule and scan loop
//! - LMS bulk import on the control node
//! ============================================================================

pub mod access;
pub mod cache;
pub mod config;
pub mod feedback;
pub mod hardware;
pub mod lms;
pub mod scan;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use access::{evaluate, resolve, Resolved};
pub use cache::{LoadMode, TableCache};
pub use config::AppConfig;
pub use feedback::{Feedback, FeedbackConfig, LedStrip};
pub use hardware::{CardReader, LineCardReader, TracingStrip};
pub use lms::{run_bulk_import, CanvasClient, LmsClient};
pub use scan::{ExitReason, ScanLoop};
pub use session::ReaderSession;
pub use store::{KeyedTableStore, MemoryStore, SheetsStore};

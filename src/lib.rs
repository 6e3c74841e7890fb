//! SIEM Policy Manager
//!
//! Multi-tenant management of vendor correlation rules and alarms: XML
//! import/export with byte-level payload fidelity, signature-based
//! rule/alarm relationship detection, platform event-ID resolution, and
//! tenant-isolated document storage.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌────────────┐    ┌────────────┐
//! │  codec   │───▶│  imports  │───▶│  detector  │───▶│    dal     │
//! │ XML in/  │    │ replace + │    │ signature  │    │ repository │
//! │   out    │    │   seed    │    │  matching  │    │   (async)  │
//! └──────────┘    └───────────┘    └────────────┘    └────────────┘
//!       │                                 │
//!       ▼                                 ▼
//! ┌──────────┐                     ┌────────────┐
//! │file_store│                     │ signature  │
//! │ tenant   │                     │ event-ID   │
//! │ uploads  │                     │ resolution │
//! └──────────┘                     └────────────┘
//! ```
//!
//! Rules and alarms carry their source XML verbatim (`raw_payload`), so an
//! export reproduces the vendor document the downstream product expects.

pub mod codec;
pub mod config;
pub mod dal;
pub mod detector;
pub mod error;
pub mod file_store;
pub mod imports;
pub mod models;
pub mod signature;
pub mod transform;

pub use config::ManagerConfig;
pub use dal::{MemoryRepository, PolicyRepository};
pub use detector::{DetectionOutcome, RelationshipDetector};
pub use error::{PolicyError, Result};
pub use file_store::TenantFileStore;
pub use imports::ImportService;
pub use models::{Alarm, Rule, RuleAlarmLink, TenantId};
pub use signature::{IndexHandle, SignatureIndex};
pub use transform::AlarmTemplate;

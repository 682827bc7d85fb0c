//! Entity lifecycle: admission, the evaluation window, and finalization

pub mod detector;
pub mod entity;
pub mod finalizer;
pub mod registry;
pub mod scheduler;

pub use detector::{AdmissionFilter, FilterReason, FilterResult, IngestionDetector};
pub use entity::{EntityState, MonitoredEntity};
pub use finalizer::{Decision, DecisionFinalizer, QualifiedEntity};
pub use registry::MonitoringRegistry;
pub use scheduler::AnalysisScheduler;

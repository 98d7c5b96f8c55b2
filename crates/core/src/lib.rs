pub mod audit;
pub mod backorder;
pub mod capability;
pub mod clock;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod order;
pub mod spec_value;
pub mod status;
pub mod view;
pub mod workflow;

pub use audit::AuditAction;
pub use backorder::{Allocation, BackorderRejection, DelayPromotion};
pub use capability::{Capability, CapabilitySet, OrderFacts};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use ids::*;
pub use ledger::{PaymentRejection, PaymentRequest};
pub use order::*;
pub use spec_value::{SpecPayload, SpecValue};
pub use status::*;
pub use view::{AuditEntryView, OrderView, StaffDirectory, ViewPolicy};
pub use workflow::Edge;

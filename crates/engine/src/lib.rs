pub mod bootstrap;
pub mod directory;
pub mod engine;
pub mod gate;

pub use bootstrap::{bootstrap, wire_engine, Application, BootstrapError};
pub use directory::{
    DirectoryError, MemberDirectory, StaticMemberDirectory, StaticVenueDirectory, VenueDirectory,
};
pub use engine::{CouponEngine, IssuedReceipt, TracingAuditSink};
pub use gate::IssuanceGate;

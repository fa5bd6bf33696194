//! # medicare-core: domain values for the MediCare+ portal
//!
//! Everything in this crate is plain data and pure functions: no async,
//! no I/O. The synchronization layer (`medicare-sync`) and the portal
//! binary build on these types.
//!
//! ## Modules
//!
//! - [`session`]: identity, role, session state machine, access predicates
//! - [`record`]: collection records, wire documents, ordering keys, patches
//! - [`appointment`]: appointment schema, patch and list filter
//! - [`contact`]: contact-message schema, patch and contact-form validation
//! - [`directory`]: doctor directory search
//! - [`dashboard`]: admin dashboard summary over live snapshots

pub mod session;
pub mod record;
pub mod appointment;
pub mod contact;
pub mod directory;
pub mod dashboard;

pub use session::{
    access, Gate, Identity, Requirement, Role, Session, SessionState,
};
pub use record::{
    apply_patch, patch_fields, Collection, Direction, OrderBy, OrderValue, Record,
    RecordError, RemoteDocument,
};
pub use appointment::{Appointment, AppointmentFilter, AppointmentPatch, AppointmentStatus};
pub use contact::{ContactForm, ContactMessage, ContactPatch, ContactStatus, ValidationError};
pub use directory::{Doctor, DoctorQuery, SpecialtyFilter};
pub use dashboard::DashboardSummary;

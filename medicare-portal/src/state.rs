//! Portal state: configuration, the mounted views and their text rendering.
//!
//! Each view checks the session gate before it opens anything and owns the
//! subscriptions it opened; dropping the view closes them.

use std::env;
use std::fmt::Write as _;

use medicare_core::{
    access, Appointment, AppointmentFilter, AppointmentStatus, ContactMessage, ContactStatus,
    DashboardSummary, Doctor, DoctorQuery, Gate, OrderBy, Requirement, Session,
};
use medicare_sync::{CollectionSnapshot, LiveCollectionSync, SubscriptionHandle, SyncError};
use thiserror::Error;

/// A demo account the driver signs in with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoAccount {
    pub email: String,
    pub password: String,
}

impl DemoAccount {
    fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
        }
    }
}

/// Portal driver configuration.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub admin: DemoAccount,
    pub patient: DemoAccount,
    /// Accounts given the admin role when the demo backend is seeded.
    pub admin_emails: Vec<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            admin: DemoAccount::new("admin@medicare.test", "admin-demo"),
            patient: DemoAccount::new("john@example.com", "patient-demo"),
            admin_emails: vec!["admin@medicare.test".to_string()],
        }
    }
}

impl PortalConfig {
    /// Defaults, with `MEDICARE_ADMIN_EMAIL` / `MEDICARE_PATIENT_EMAIL` overrides.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(email) = lookup("MEDICARE_ADMIN_EMAIL").filter(|e| !e.trim().is_empty()) {
            let email = email.trim().to_string();
            config.admin.email = email.clone();
            config.admin_emails = vec![email];
        }
        if let Some(email) = lookup("MEDICARE_PATIENT_EMAIL").filter(|e| !e.trim().is_empty()) {
            config.patient.email = email.trim().to_string();
        }
        config
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails.iter().any(|e| e.eq_ignore_ascii_case(email))
    }
}

#[derive(Error, Debug)]
pub enum PortalError {
    #[error(transparent)]
    Session(#[from] medicare_sync::SessionError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Form(#[from] medicare_core::ValidationError),
    #[error("malformed form submission: {0}")]
    Submission(#[from] serde_json::Error),
    #[error("view unavailable: {0:?}")]
    NotMounted(Gate),
}

/// Outcome of mounting a protected view.
pub enum Mounted<V> {
    /// Role still resolving; render a loading state.
    Loading,
    Denied,
    Ready(V),
}

impl<V> Mounted<V> {
    fn from_gate(gate: Gate) -> Option<Self> {
        match gate {
            Gate::Pending => Some(Mounted::Loading),
            Gate::Denied => Some(Mounted::Denied),
            Gate::Allowed => None,
        }
    }

    pub fn ready(self) -> Result<V, PortalError> {
        match self {
            Mounted::Ready(view) => Ok(view),
            Mounted::Loading => Err(PortalError::NotMounted(Gate::Pending)),
            Mounted::Denied => Err(PortalError::NotMounted(Gate::Denied)),
        }
    }
}

/// Admin dashboard: every appointment and contact message, live.
pub struct DashboardView {
    pub appointments: SubscriptionHandle<Appointment>,
    pub messages: SubscriptionHandle<ContactMessage>,
    pub filter: AppointmentFilter,
}

impl DashboardView {
    pub fn mount(sync: &LiveCollectionSync) -> Result<Mounted<Self>, SyncError> {
        let session = sync.sessions().current_session();
        if let Some(early) = Mounted::from_gate(session.gate(Requirement::Admin)) {
            return Ok(early);
        }
        let appointments = sync.open::<Appointment, _>(OrderBy::desc("createdAt"), access::admin_only)?;
        let messages = sync.open::<ContactMessage, _>(OrderBy::desc("createdAt"), access::admin_only)?;
        Ok(Mounted::Ready(Self {
            appointments,
            messages,
            filter: AppointmentFilter::new(),
        }))
    }

    pub fn summary(&self) -> DashboardSummary {
        DashboardSummary::compute(
            &self.appointments.snapshot().records,
            &self.messages.snapshot().records,
        )
    }

    pub fn render(&self) -> String {
        let appointments = self.appointments.snapshot();
        let messages = self.messages.snapshot();
        let summary = DashboardSummary::compute(&appointments.records, &messages.records);

        let mut out = String::new();
        let _ = writeln!(out, "== Admin dashboard ==");
        let _ = writeln!(
            out,
            "Appointments: {} total | {} pending | {} confirmed | {} completed | {} cancelled",
            summary.total_appointments,
            summary.pending,
            summary.confirmed,
            summary.completed,
            summary.cancelled
        );
        let _ = writeln!(
            out,
            "Messages: {} total | {} unread",
            summary.total_messages, summary.unread_messages
        );
        render_appointments(&mut out, &appointments, &self.filter);
        for message in messages.iter() {
            let _ = writeln!(
                out,
                "  [{}] {} <{}>: {}",
                contact_status_label(message.status),
                message.full_name(),
                message.email,
                message.subject
            );
        }
        out
    }
}

/// Patient portal: the signed-in patient's own appointments.
pub struct PatientPortalView {
    pub appointments: SubscriptionHandle<Appointment>,
    filter: AppointmentFilter,
    patient: String,
}

impl PatientPortalView {
    pub fn mount(sync: &LiveCollectionSync) -> Result<Mounted<Self>, SyncError> {
        let session: Session = sync.sessions().current_session();
        if let Some(early) = Mounted::from_gate(session.gate(Requirement::Authenticated)) {
            return Ok(early);
        }
        let Some(email) = session.identity.as_ref().and_then(|i| i.email.clone()) else {
            return Ok(Mounted::Denied);
        };
        let appointments = sync.open::<Appointment, _>(OrderBy::asc("date"), access::authenticated)?;
        Ok(Mounted::Ready(Self {
            appointments,
            filter: AppointmentFilter::new().owned_by(email.clone()),
            patient: email,
        }))
    }

    pub fn upcoming(&self) -> Vec<Appointment> {
        let snapshot = self.appointments.snapshot();
        self.filter
            .apply(&snapshot.records)
            .into_iter()
            .filter(|a| matches!(a.status, AppointmentStatus::Pending | AppointmentStatus::Confirmed))
            .cloned()
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== Patient portal ({}) ==", self.patient);
        render_appointments(&mut out, &self.appointments.snapshot(), &self.filter);
        out
    }
}

fn render_appointments(out: &mut String, snapshot: &CollectionSnapshot<Appointment>, filter: &AppointmentFilter) {
    let shown = filter.apply(&snapshot.records);
    if shown.is_empty() {
        let _ = writeln!(out, "  (no appointments)");
    }
    for appointment in shown {
        let _ = writeln!(
            out,
            "  {} {} {:<10} {} with {} ({})",
            appointment.date,
            appointment.time,
            appointment.status.as_str(),
            appointment.patient_name,
            appointment.doctor,
            appointment.department
        );
    }
}

fn contact_status_label(status: ContactStatus) -> &'static str {
    match status {
        ContactStatus::New => "new",
        ContactStatus::Read => "read",
        ContactStatus::Replied => "replied",
        ContactStatus::Archived => "archived",
    }
}

/// Text shown in place of a protected view that did not mount.
pub fn render_gate(view: &str, gate: Gate) -> String {
    match gate {
        Gate::Pending => format!("{view}: loading..."),
        Gate::Denied => format!("{view}: access denied"),
        Gate::Allowed => format!("{view}: ready"),
    }
}

pub fn demo_doctors() -> Vec<Doctor> {
    let doctor = |id: &str, name: &str, specialty: &str, experience: u32, rating: f32, location: &str| Doctor {
        id: id.to_string(),
        name: name.to_string(),
        specialty: specialty.to_string(),
        experience,
        rating,
        location: location.to_string(),
        availability: "Mon-Fri".to_string(),
    };
    vec![
        doctor("d1", "Dr. Sarah Johnson", "Cardiology", 15, 4.9, "Main Campus"),
        doctor("d2", "Dr. Michael Chen", "Neurology", 12, 4.8, "North Wing"),
        doctor("d3", "Dr. Emily Davis", "Pediatrics", 10, 4.9, "Children's Center"),
        doctor("d4", "Dr. James Wilson", "Orthopedics", 18, 4.7, "Main Campus"),
        doctor("d5", "Dr. Lisa Anderson", "Dermatology", 8, 4.8, "East Clinic"),
        doctor("d6", "Dr. Robert Taylor", "Cardiology", 20, 4.9, "Main Campus"),
    ]
}

pub fn render_directory(doctors: &[Doctor], query: &DoctorQuery) -> String {
    let mut out = String::new();
    let shown = query.apply(doctors);
    let _ = writeln!(out, "== Doctors ({} of {}) ==", shown.len(), doctors.len());
    for doctor in shown {
        let _ = writeln!(
            out,
            "  {} - {} ({} yrs, {:.1}) {}",
            doctor.name, doctor.specialty, doctor.experience, doctor.rating, doctor.location
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use medicare_core::SpecialtyFilter;
    use medicare_sync::memory::demo_appointment;
    use medicare_sync::{Credentials, InMemoryBackend, SessionConfig, SessionStore, SyncConfig};
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    fn sync_for(backend: &InMemoryBackend) -> LiveCollectionSync {
        let sessions = SessionStore::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            SessionConfig::default(),
        );
        LiveCollectionSync::new(Arc::new(backend.clone()), sessions, SyncConfig::default())
    }

    #[test]
    fn test_config_defaults() {
        let config = PortalConfig::from_lookup(|_| None);
        assert_eq!(config.admin.email, "admin@medicare.test");
        assert!(config.is_admin_email("ADMIN@medicare.test"));
        assert!(!config.is_admin_email(&config.patient.email));
    }

    #[test]
    fn test_config_env_overrides() {
        let config = PortalConfig::from_lookup(|key| match key {
            "MEDICARE_ADMIN_EMAIL" => Some(" ops@clinic.test ".to_string()),
            "MEDICARE_PATIENT_EMAIL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.admin.email, "ops@clinic.test");
        assert_eq!(config.admin_emails, vec!["ops@clinic.test".to_string()]);
        assert_eq!(config.patient.email, "john@example.com");
    }

    #[test]
    fn test_render_gate() {
        assert_eq!(render_gate("Dashboard", Gate::Pending), "Dashboard: loading...");
        assert_eq!(render_gate("Dashboard", Gate::Denied), "Dashboard: access denied");
    }

    #[test]
    fn test_directory_render_filters() {
        let doctors = demo_doctors();
        let query = DoctorQuery::new("", SpecialtyFilter::parse("Cardiology"));
        let text = render_directory(&doctors, &query);
        assert!(text.starts_with("== Doctors (2 of 6) =="));
        assert!(text.contains("Dr. Robert Taylor"));
        assert!(!text.contains("Dr. Michael Chen"));
    }

    #[tokio::test]
    async fn test_dashboard_denied_for_signed_out() {
        let backend = InMemoryBackend::new();
        let sync = sync_for(&backend);
        assert!(matches!(DashboardView::mount(&sync), Ok(Mounted::Denied)));
        assert_eq!(backend.stats().subscribes, 0);
    }

    #[tokio::test]
    async fn test_dashboard_mounts_for_admin() {
        let backend = InMemoryBackend::new();
        backend.register_user("admin@medicare.test", "pw", Some("admin"));
        backend.seed(demo_appointment("a1", 1, "pending"));
        let sync = sync_for(&backend);
        sync.sessions()
            .login(&Credentials::new("admin@medicare.test", "pw"))
            .await
            .unwrap();

        let view = DashboardView::mount(&sync).unwrap().ready().unwrap();
        timeout(Duration::from_secs(2), view.appointments.wait_for(|s| s.len() == 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.summary().pending, 1);
        assert!(view.render().contains("1 pending"));

        drop(view);
        assert_eq!(backend.stats().unsubscribes, 2);
    }

    #[tokio::test]
    async fn test_patient_portal_shows_own_appointments() {
        let backend = InMemoryBackend::new();
        backend.register_user("john@example.com", "pw", Some("patient"));
        backend.seed(demo_appointment("mine", 1, "pending"));
        let mut other = demo_appointment("theirs", 2, "pending");
        other.patient_email = "someone@example.com".to_string();
        backend.seed(other);
        let sync = sync_for(&backend);
        sync.sessions()
            .login(&Credentials::new("john@example.com", "pw"))
            .await
            .unwrap();

        assert!(matches!(DashboardView::mount(&sync), Ok(Mounted::Denied)));
        let portal = PatientPortalView::mount(&sync).unwrap().ready().unwrap();
        timeout(Duration::from_secs(2), portal.appointments.wait_for(|s| s.len() == 2))
            .await
            .unwrap()
            .unwrap();
        let upcoming = portal.upcoming();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, "mine");
    }
}

//! Appointment records, as listed on the admin dashboard and the patient portal.

use serde::{Deserialize, Serialize};

use crate::record::{lenient_timestamp, Collection, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Appointment {
    pub id: String,
    pub patient_name: String,
    /// Owner of the appointment; patients only ever see their own.
    pub patient_email: String,
    pub doctor: String,
    pub department: String,
    pub date: String,
    pub time: String,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Creation time in milliseconds since the epoch.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<i64>,
}

impl Record for Appointment {
    type Patch = AppointmentPatch;
    const COLLECTION: Collection = Collection::Appointments;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Fields an admin can change on an appointment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AppointmentPatch {
    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Self::default()
        }
    }

    pub fn reschedule(date: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            time: Some(time.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Client-side filter over an appointment snapshot.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    statuses: Vec<AppointmentStatus>,
    search: String,
    owner: Option<String>,
}

impl AppointmentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only these statuses (empty keeps all).
    pub fn with_status(mut self, status: AppointmentStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    /// Case-insensitive search over patient name, doctor and department.
    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = query.into().trim().to_lowercase();
        self
    }

    /// Restrict to one patient's appointments (patient portal).
    pub fn owned_by(mut self, email: impl Into<String>) -> Self {
        self.owner = Some(email.into().to_lowercase());
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&appointment.status) {
            return false;
        }
        if let Some(owner) = &self.owner {
            if appointment.patient_email.to_lowercase() != *owner {
                return false;
            }
        }
        if self.search.is_empty() {
            return true;
        }
        [
            &appointment.patient_name,
            &appointment.doctor,
            &appointment.department,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&self.search))
    }

    /// Filter a snapshot, preserving its order.
    pub fn apply<'a>(&self, appointments: &'a [Appointment]) -> Vec<&'a Appointment> {
        appointments.iter().filter(|a| self.matches(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appt(id: &str, patient: &str, email: &str, doctor: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: id.into(),
            patient_name: patient.into(),
            patient_email: email.into(),
            doctor: doctor.into(),
            department: "Cardiology".into(),
            date: "2024-02-15".into(),
            time: "10:00 AM".into(),
            status,
            notes: None,
            created_at: Some(1),
        }
    }

    fn sample() -> Vec<Appointment> {
        vec![
            appt("1", "John Doe", "john@example.com", "Dr. Sarah Johnson", AppointmentStatus::Confirmed),
            appt("2", "Jane Smith", "jane@example.com", "Dr. Michael Chen", AppointmentStatus::Pending),
            appt("3", "Bob Wilson", "John@Example.com", "Dr. Emily Davis", AppointmentStatus::Completed),
        ]
    }

    #[test]
    fn test_empty_filter_keeps_all() {
        let list = sample();
        assert_eq!(AppointmentFilter::new().apply(&list).len(), 3);
    }

    #[test]
    fn test_filter_by_status() {
        let list = sample();
        let pending = AppointmentFilter::new()
            .with_status(AppointmentStatus::Pending)
            .apply(&list);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "2");
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let list = sample();
        let found = AppointmentFilter::new().search("  CHEN ").apply(&list);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "2");

        let by_department = AppointmentFilter::new().search("cardio").apply(&list);
        assert_eq!(by_department.len(), 3);
    }

    #[test]
    fn test_owned_by_restricts_to_patient() {
        let list = sample();
        let mine = AppointmentFilter::new().owned_by("john@example.com").apply(&list);
        let ids: Vec<&str> = mine.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_patch_builders() {
        assert!(AppointmentPatch::default().is_empty());
        let patch = AppointmentPatch::reschedule("2024-03-01", "9:00 AM");
        assert_eq!(patch.date.as_deref(), Some("2024-03-01"));
        assert!(patch.status.is_none());
    }
}

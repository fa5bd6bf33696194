//! Admin dashboard overview numbers, derived from live snapshots.

use crate::appointment::{Appointment, AppointmentStatus};
use crate::contact::{ContactMessage, ContactStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardSummary {
    pub total_appointments: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub total_messages: usize,
    pub unread_messages: usize,
}

impl DashboardSummary {
    pub fn compute(appointments: &[Appointment], messages: &[ContactMessage]) -> Self {
        let mut summary = Self {
            total_appointments: appointments.len(),
            total_messages: messages.len(),
            ..Self::default()
        };
        for appointment in appointments {
            match appointment.status {
                AppointmentStatus::Pending => summary.pending += 1,
                AppointmentStatus::Confirmed => summary.confirmed += 1,
                AppointmentStatus::Completed => summary.completed += 1,
                AppointmentStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary.unread_messages = messages
            .iter()
            .filter(|m| m.status == ContactStatus::New)
            .count();
        summary
    }

    pub fn count(&self, status: AppointmentStatus) -> usize {
        match status {
            AppointmentStatus::Pending => self.pending,
            AppointmentStatus::Confirmed => self.confirmed,
            AppointmentStatus::Completed => self.completed,
            AppointmentStatus::Cancelled => self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appt(id: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: id.into(),
            patient_name: "John Doe".into(),
            patient_email: "john@example.com".into(),
            doctor: "Dr. Sarah Johnson".into(),
            department: "Cardiology".into(),
            date: "2024-02-15".into(),
            time: "09:00 AM".into(),
            status,
            notes: None,
            created_at: None,
        }
    }

    fn message(id: &str, status: ContactStatus) -> ContactMessage {
        ContactMessage {
            id: id.into(),
            first_name: "Jane".into(),
            last_name: "Smith".into(),
            email: "jane@example.com".into(),
            phone: None,
            subject: "Hi".into(),
            message: "Hello".into(),
            status,
            created_at: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let appointments = vec![
            appt("1", AppointmentStatus::Pending),
            appt("2", AppointmentStatus::Pending),
            appt("3", AppointmentStatus::Confirmed),
            appt("4", AppointmentStatus::Cancelled),
        ];
        let messages = vec![
            message("m1", ContactStatus::New),
            message("m2", ContactStatus::Read),
        ];

        let summary = DashboardSummary::compute(&appointments, &messages);
        assert_eq!(summary.total_appointments, 4);
        assert_eq!(summary.count(AppointmentStatus::Pending), 2);
        assert_eq!(summary.count(AppointmentStatus::Confirmed), 1);
        assert_eq!(summary.count(AppointmentStatus::Completed), 0);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.total_messages, 2);
        assert_eq!(summary.unread_messages, 1);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(DashboardSummary::compute(&[], &[]), DashboardSummary::default());
    }
}

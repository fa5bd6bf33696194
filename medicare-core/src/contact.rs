//! Contact-page messages and the form that produces them.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::record::{lenient_timestamp, Collection, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    New,
    Read,
    Replied,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContactMessage {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub status: ContactStatus,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<i64>,
}

impl ContactMessage {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl Record for ContactMessage {
    type Patch = ContactPatch;
    const COLLECTION: Collection = Collection::Contacts;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
}

impl ContactPatch {
    pub fn status(status: ContactStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

/// Raw input of the public contact form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub subject: String,
    pub message: String,
}

impl ContactForm {
    /// Validate the form and turn it into a new, unread message.
    pub fn submit(self, created_at: i64) -> Result<ContactMessage, ValidationError> {
        let first_name = required("firstName", self.first_name)?;
        let last_name = required("lastName", self.last_name)?;
        let email = required("email", self.email)?;
        if !looks_like_email(&email) {
            return Err(ValidationError::InvalidEmail(email));
        }
        let subject = required("subject", self.subject)?;
        let message = required("message", self.message)?;
        let phone = Some(self.phone.trim().to_string()).filter(|p| !p.is_empty());

        Ok(ContactMessage {
            id: Uuid::new_v4().to_string(),
            first_name,
            last_name,
            email,
            phone,
            subject,
            message,
            status: ContactStatus::New,
            created_at: Some(created_at),
        })
    }
}

fn required(name: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(name));
    }
    Ok(trimmed.to_string())
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|part| !part.is_empty())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> ContactForm {
        ContactForm {
            first_name: "Jane".into(),
            last_name: "Smith".into(),
            email: "jane@example.com".into(),
            phone: "".into(),
            subject: "Billing".into(),
            message: "Question about my invoice".into(),
        }
    }

    #[test]
    fn test_submit_valid_form() {
        let msg = form().submit(42).unwrap();
        assert_eq!(msg.status, ContactStatus::New);
        assert_eq!(msg.phone, None);
        assert_eq!(msg.created_at, Some(42));
        assert_eq!(msg.full_name(), "Jane Smith");
        assert!(Uuid::parse_str(&msg.id).is_ok());
    }

    #[test]
    fn test_missing_fields() {
        let mut f = form();
        f.subject = "   ".into();
        assert_eq!(f.submit(0), Err(ValidationError::MissingField("subject")));

        let mut f = form();
        f.first_name.clear();
        assert_eq!(f.submit(0), Err(ValidationError::MissingField("firstName")));
    }

    #[test]
    fn test_invalid_email() {
        for bad in ["jane", "jane@", "@example.com", "jane@example", "jane@ex..com", "a@b@c.com"] {
            let mut f = form();
            f.email = bad.into();
            assert!(
                matches!(f.submit(0), Err(ValidationError::InvalidEmail(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_phone_is_trimmed() {
        let mut f = form();
        f.phone = " +1 (555) 123-4567 ".into();
        assert_eq!(f.submit(0).unwrap().phone.as_deref(), Some("+1 (555) 123-4567"));
    }
}

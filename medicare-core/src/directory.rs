//! Doctor directory search.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub specialty: String,
    /// Years in practice.
    pub experience: u32,
    pub rating: f32,
    pub location: String,
    pub availability: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpecialtyFilter {
    #[default]
    All,
    Only(String),
}

impl SpecialtyFilter {
    /// `"all"` (any case) or empty selects every specialty.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            SpecialtyFilter::All
        } else {
            SpecialtyFilter::Only(raw.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DoctorQuery {
    pub search: String,
    pub specialty: SpecialtyFilter,
}

impl DoctorQuery {
    pub fn new(search: impl Into<String>, specialty: SpecialtyFilter) -> Self {
        Self {
            search: search.into(),
            specialty,
        }
    }

    /// Search matches name or specialty, case-insensitively; the specialty
    /// selection must match exactly.
    pub fn matches(&self, doctor: &Doctor) -> bool {
        let needle = self.search.trim().to_lowercase();
        let matches_search = needle.is_empty()
            || doctor.name.to_lowercase().contains(&needle)
            || doctor.specialty.to_lowercase().contains(&needle);
        let matches_specialty = match &self.specialty {
            SpecialtyFilter::All => true,
            SpecialtyFilter::Only(s) => doctor.specialty == *s,
        };
        matches_search && matches_specialty
    }

    pub fn apply<'a>(&self, doctors: &'a [Doctor]) -> Vec<&'a Doctor> {
        doctors.iter().filter(|d| self.matches(d)).collect()
    }
}

/// Distinct specialties in first-seen order, for the filter dropdown.
pub fn specialties(doctors: &[Doctor]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for doctor in doctors {
        if !seen.contains(&doctor.specialty.as_str()) {
            seen.push(&doctor.specialty);
        }
    }
    seen
}

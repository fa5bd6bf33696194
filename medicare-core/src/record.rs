//! Collection records and the wire documents they arrive as.
//!
//! The remote store speaks loosely-typed documents: an id plus a JSON
//! field map. Each collection decodes those into a concrete record type
//! that rejects unknown fields, so nothing untyped reaches a view.
//!
//! Patches are typed too. A patch is merged by overlaying its present
//! fields on the serialized record and decoding again, which means a
//! patch can never smuggle in a field the schema does not know.

use std::cmp::Ordering;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Remote collections the portal reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Appointments,
    Contacts,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Appointments => "appointments",
            Collection::Contacts => "contacts",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed record belonging to exactly one collection.
pub trait Record: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Partial update; serializes to only the fields it sets.
    type Patch: Clone + fmt::Debug + Serialize + Send + Sync + 'static;

    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("record {id} rejected: {reason}")]
    Rejected { id: String, reason: String },
    #[error("ordering key `{field}` missing on record {id}")]
    MissingOrderKey { id: String, field: String },
    #[error("ordering key `{field}` on record {id} is neither a number nor a string")]
    MalformedOrderKey { id: String, field: String },
    #[error("encoding error: {0}")]
    Codec(String),
}

/// A document as delivered by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Encode a typed record into its wire form (id split out of the fields).
    pub fn from_record<R: Record>(record: &R) -> Result<Self, RecordError> {
        let mut fields = to_object(record)?;
        fields.remove("id");
        Ok(Self {
            id: record.id().to_string(),
            fields,
        })
    }

    /// Decode into a typed record. Unknown fields or wrong types reject.
    pub fn decode<R: Record>(&self) -> Result<R, RecordError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| RecordError::Rejected {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Read the ordering key named by `order_by`.
    pub fn order_value(&self, order_by: &OrderBy) -> Result<OrderValue, RecordError> {
        order_value_in(&self.id, &self.fields, order_by)
    }
}

/// The fields a patch sets, as a wire field map.
pub fn patch_fields<P: Serialize>(patch: &P) -> Result<Map<String, Value>, RecordError> {
    to_object(patch)
}

/// Merge `patch` into a copy of `record`.
pub fn apply_patch<R: Record>(record: &R, patch: &R::Patch) -> Result<R, RecordError> {
    let mut fields = to_object(record)?;
    for (name, value) in patch_fields(patch)? {
        if name == "id" {
            continue;
        }
        fields.insert(name, value);
    }
    serde_json::from_value(Value::Object(fields)).map_err(|e| RecordError::Rejected {
        id: record.id().to_string(),
        reason: e.to_string(),
    })
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, RecordError> {
    match serde_json::to_value(value).map_err(|e| RecordError::Codec(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(RecordError::Codec(format!("expected a field map, got {other}"))),
    }
}

fn order_value_in(
    id: &str,
    fields: &Map<String, Value>,
    order_by: &OrderBy,
) -> Result<OrderValue, RecordError> {
    match fields.get(&order_by.field) {
        None | Some(Value::Null) => Err(RecordError::MissingOrderKey {
            id: id.to_string(),
            field: order_by.field.clone(),
        }),
        Some(Value::Number(n)) => n.as_f64().map(OrderValue::Number).ok_or_else(|| {
            RecordError::MalformedOrderKey {
                id: id.to_string(),
                field: order_by.field.clone(),
            }
        }),
        Some(Value::String(s)) => Ok(OrderValue::Text(s.clone())),
        Some(_) => Err(RecordError::MalformedOrderKey {
            id: id.to_string(),
            field: order_by.field.clone(),
        }),
    }
}

/// Deserialize an optional timestamp, mapping any non-numeric value to
/// `None` so a bad ordering key never makes the whole record undecodable.
pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Server-side ordering of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }

    /// Ordering key of a typed record (re-read after a local patch).
    pub fn key_of<R: Record>(&self, record: &R) -> Result<OrderValue, RecordError> {
        let fields = to_object(record)?;
        order_value_in(record.id(), &fields, self)
    }

    /// Compare two keys in this ordering's direction.
    pub fn compare(&self, a: &OrderValue, b: &OrderValue) -> Ordering {
        let natural = a.cmp(b);
        match self.direction {
            Direction::Ascending => natural,
            Direction::Descending => natural.reverse(),
        }
    }

    /// Compare two optional keys: keyed records first, unkeyed ones last
    /// (and equal among themselves, so a stable sort keeps their order).
    pub fn compare_opt(&self, a: Option<&OrderValue>, b: Option<&OrderValue>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => self.compare(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// A comparable ordering key. Numbers sort before strings.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderValue {
    Number(f64),
    Text(String),
}

impl Eq for OrderValue {}

impl PartialOrd for OrderValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (OrderValue::Number(a), OrderValue::Number(b)) => a.total_cmp(b),
            (OrderValue::Text(a), OrderValue::Text(b)) => a.cmp(b),
            (OrderValue::Number(_), OrderValue::Text(_)) => Ordering::Less,
            (OrderValue::Text(_), OrderValue::Number(_)) => Ordering::Greater,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::{Appointment, AppointmentPatch, AppointmentStatus};
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn appointment_doc(id: &str, created_at: Value) -> RemoteDocument {
        RemoteDocument::new(
            id,
            fields(json!({
                "patientName": "John Doe",
                "patientEmail": "john@example.com",
                "doctor": "Dr. Sarah Johnson",
                "department": "Cardiology",
                "date": "2024-02-15",
                "time": "10:00 AM",
                "status": "pending",
                "createdAt": created_at,
            })),
        )
    }

    #[test]
    fn test_decode_typed_record() {
        let doc = appointment_doc("a1", json!(1700));
        let appt: Appointment = doc.decode().unwrap();
        assert_eq!(appt.id, "a1");
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.created_at, Some(1700));
    }

    #[test]
    fn test_decode_rejects_unknown_field() {
        let mut doc = appointment_doc("a1", json!(1));
        doc.fields.insert("isAdmin".into(), json!(true));
        let err = doc.decode::<Appointment>().unwrap_err();
        assert!(matches!(err, RecordError::Rejected { ref id, .. } if id == "a1"));
    }

    #[test]
    fn test_bad_timestamp_still_decodes() {
        let doc = appointment_doc("a1", json!({"seconds": 12}));
        let appt: Appointment = doc.decode().unwrap();
        assert_eq!(appt.created_at, None);

        let order = OrderBy::desc("createdAt");
        assert!(matches!(
            doc.order_value(&order),
            Err(RecordError::MalformedOrderKey { .. })
        ));
    }

    #[test]
    fn test_missing_order_key() {
        let mut doc = appointment_doc("a1", json!(1));
        doc.fields.remove("createdAt");
        let order = OrderBy::desc("createdAt");
        assert!(matches!(
            doc.order_value(&order),
            Err(RecordError::MissingOrderKey { .. })
        ));
    }

    #[test]
    fn test_from_record_splits_id() {
        let appt: Appointment = appointment_doc("a9", json!(5)).decode().unwrap();
        let doc = RemoteDocument::from_record(&appt).unwrap();
        assert_eq!(doc.id, "a9");
        assert!(!doc.fields.contains_key("id"));
        assert_eq!(doc.fields["status"], json!("pending"));
    }

    #[test]
    fn test_apply_patch_merges_only_set_fields() {
        let appt: Appointment = appointment_doc("a1", json!(1)).decode().unwrap();
        let patched = apply_patch(&appt, &AppointmentPatch::status(AppointmentStatus::Confirmed)).unwrap();
        assert_eq!(patched.status, AppointmentStatus::Confirmed);
        assert_eq!(patched.doctor, appt.doctor);
        assert_eq!(patched.created_at, appt.created_at);
    }

    #[test]
    fn test_patch_fields_omit_unset() {
        let patch = AppointmentPatch::status(AppointmentStatus::Cancelled);
        let map = patch_fields(&patch).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["status"], json!("cancelled"));
    }

    #[test]
    fn test_order_compare_directions() {
        let asc = OrderBy::asc("ts");
        let desc = OrderBy::desc("ts");
        let one = OrderValue::Number(1.0);
        let two = OrderValue::Number(2.0);
        assert_eq!(asc.compare(&one, &two), Ordering::Less);
        assert_eq!(desc.compare(&one, &two), Ordering::Greater);
        assert_eq!(desc.compare_opt(Some(&one), None), Ordering::Less);
        assert_eq!(asc.compare_opt(None, Some(&one)), Ordering::Greater);
        assert!(OrderValue::Number(99.0) < OrderValue::Text("a".into()));
    }
}

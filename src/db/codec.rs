//! Conversions between domain entries and store [`Fields`].

use crate::models::{FavouriteEntry, Sample, ScheduledEntry};

use super::{FieldValue, Fields, StoreError};

pub fn scheduled_to_fields(entry: &ScheduledEntry) -> Result<Fields, StoreError> {
    let mut fields = Fields::new();
    fields.insert("feed_id".to_string(), entry.feed_id.as_str().into());
    fields.insert("name".to_string(), entry.name.as_str().into());
    fields.insert("unit".to_string(), entry.unit.as_str().into());
    fields.insert("sample".to_string(), sample_to_field(entry.sample.as_ref())?);
    fields.insert("pending".to_string(), entry.pending.into());
    Ok(fields)
}

pub fn scheduled_from_fields(fields: &Fields) -> Result<ScheduledEntry, StoreError> {
    Ok(ScheduledEntry {
        id: fields.get("id").and_then(FieldValue::as_i64),
        feed_id: required_text(fields, "feed_id")?,
        name: optional_text(fields, "name"),
        unit: optional_text(fields, "unit"),
        sample: sample_from_field(fields.get("sample"))?,
        pending: fields
            .get("pending")
            .and_then(FieldValue::as_i64)
            .is_some_and(|pending| pending != 0),
    })
}

pub fn favourite_to_fields(entry: &FavouriteEntry) -> Result<Fields, StoreError> {
    let mut fields = favourite_sample_fields(&entry.feed_id, entry.sample.as_ref())?;
    fields.insert("name".to_string(), entry.name.as_str().into());
    fields.insert("unit".to_string(), entry.unit.as_str().into());
    Ok(fields)
}

/// Only the columns the scheduler owns on a favourite, so an update leaves
/// the rest of the favourite untouched.
pub fn favourite_sample_fields(feed_id: &str, sample: Option<&Sample>) -> Result<Fields, StoreError> {
    let mut fields = Fields::new();
    fields.insert("feed_id".to_string(), feed_id.into());
    fields.insert("sample".to_string(), sample_to_field(sample)?);
    Ok(fields)
}

pub fn favourite_from_fields(fields: &Fields) -> Result<FavouriteEntry, StoreError> {
    Ok(FavouriteEntry {
        feed_id: required_text(fields, "feed_id")?,
        name: optional_text(fields, "name"),
        unit: optional_text(fields, "unit"),
        sample: sample_from_field(fields.get("sample"))?,
    })
}

fn sample_to_field(sample: Option<&Sample>) -> Result<FieldValue, StoreError> {
    Ok(sample
        .map(serde_json::to_string)
        .transpose()?
        .into())
}

fn sample_from_field(value: Option<&FieldValue>) -> Result<Option<Sample>, StoreError> {
    match value.and_then(FieldValue::as_str) {
        Some(json) => Ok(Some(serde_json::from_str(json)?)),
        None => Ok(None),
    }
}

fn required_text(fields: &Fields, name: &'static str) -> Result<String, StoreError> {
    fields
        .get(name)
        .and_then(FieldValue::as_str)
        .map(str::to_string)
        .ok_or(StoreError::MissingField(name))
}

fn optional_text(fields: &Fields, name: &str) -> String {
    fields
        .get(name)
        .and_then(FieldValue::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn reading() -> Sample {
        Sample::new(21.5, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    }

    #[test]
    fn scheduled_entry_fields_exclude_id() {
        let mut entry = ScheduledEntry::new("temp-1").with_name("Kitchen").with_unit("°C");
        entry.id = Some(7);
        entry.pending = true;

        let fields = scheduled_to_fields(&entry).expect("encode");

        assert!(!fields.contains_key("id"));
        assert_eq!(fields["pending"], FieldValue::Integer(1));
        assert_eq!(fields["sample"], FieldValue::Null);
    }

    #[test]
    fn sample_is_stored_as_millisecond_json() {
        let mut entry = ScheduledEntry::new("temp-1");
        entry.sample = Some(reading());

        let fields = scheduled_to_fields(&entry).expect("encode");

        assert_eq!(
            fields["sample"].as_str(),
            Some(r#"{"value":21.5,"timestamp":1700000000000}"#)
        );
    }

    #[test]
    fn scheduled_entry_decodes_with_row_id() {
        let mut entry = ScheduledEntry::new("temp-1").with_unit("°C");
        entry.sample = Some(reading());
        let mut fields = scheduled_to_fields(&entry).expect("encode");
        fields.insert("id".to_string(), FieldValue::Integer(3));

        let decoded = scheduled_from_fields(&fields).expect("decode");

        assert_eq!(decoded.id, Some(3));
        assert_eq!(decoded.sample, entry.sample);
        assert_eq!(decoded.unit, "°C");
        assert!(!decoded.pending);
    }

    #[test]
    fn missing_feed_id_is_an_error() {
        let fields = Fields::new();
        assert!(matches!(
            scheduled_from_fields(&fields),
            Err(StoreError::MissingField("feed_id"))
        ));
    }

    #[test]
    fn corrupt_sample_is_an_error() {
        let mut fields = Fields::new();
        fields.insert("feed_id".to_string(), "temp-1".into());
        fields.insert("sample".to_string(), "not json".into());

        assert!(matches!(
            favourite_from_fields(&fields),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn favourite_sample_fields_carry_only_feed_and_sample() {
        let sample = reading();
        let fields = favourite_sample_fields("temp-1", Some(&sample)).expect("encode");

        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["feed_id", "sample"]);
    }
}

//! Form reader: the three identified input fields.

use std::collections::HashMap;

use devops_pack_core::types::{
    RunParameters, FIELD_ACCESS_KEY_ID, FIELD_REGION, FIELD_SECRET_ACCESS_KEY,
};

/// Anything that can report the current value of a field by id.
pub trait FormSource {
    fn value(&self, id: &str) -> Option<String>;
}

/// An in-memory form keyed by field id.
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    fields: HashMap<String, String>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(id, value);
        self
    }

    pub fn set(&mut self, id: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(id.into(), value.into());
    }

    /// A form pre-filled with the three credential fields.
    pub fn credentials(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self::new()
            .with(FIELD_ACCESS_KEY_ID, access_key_id)
            .with(FIELD_SECRET_ACCESS_KEY, secret_access_key)
            .with(FIELD_REGION, region)
    }
}

impl FormSource for FormFields {
    fn value(&self, id: &str) -> Option<String> {
        self.fields.get(id).cloned()
    }
}

/// Read the current field values into a fresh [`RunParameters`].
///
/// Values pass through unchanged. A missing field reads as an empty string.
pub fn read_run_parameters<F: FormSource + ?Sized>(form: &F) -> RunParameters {
    let read = |id: &str| form.value(id).unwrap_or_default();
    RunParameters {
        aws_access_key_id: read(FIELD_ACCESS_KEY_ID),
        aws_secret_access_key: read(FIELD_SECRET_ACCESS_KEY),
        region: read(FIELD_REGION),
    }
}

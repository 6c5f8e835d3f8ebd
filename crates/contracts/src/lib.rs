use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Branch code stored when a submission leaves the field empty ("head office").
pub const DEFAULT_BRANCH_CODE: &str = "00000";

pub const NAME_MAX_CHARS: usize = 255;
pub const TAX_ID_LEN: usize = 13;
pub const PHONE_MIN_LEN: usize = 9;
pub const PHONE_MAX_LEN: usize = 15;

/// A persisted business-customer record as stored and returned by the API.
///
/// `id`, `created_at` and `updated_at` are owned by the store; they are never
/// taken from client input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub tax_id: String,
    pub branch_code: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An inbound create-or-update submission, before validation.
///
/// `id == 0` means create intent, `id > 0` means update intent; the caller
/// routes on this before touching the store. Every field carries a serde
/// default so a missing JSON key binds to an empty value and fails
/// [`CustomerDraft::validate`] with a field-keyed message rather than a
/// parser error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDraft {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub branch_code: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone_number: String,
}

/// Field name → human-readable message. Empty map means the draft passed.
pub type FieldErrors = BTreeMap<&'static str, String>;

impl CustomerDraft {
    /// Trim every textual field, then run all field checks.
    ///
    /// Checks are independent and never short-circuit: a draft with a blank
    /// name and a malformed phone number reports both keys in one map.
    pub fn validate(mut self) -> Result<CustomerDraft, FieldErrors> {
        self.trim_fields();

        let mut errors = FieldErrors::new();

        if self.name.is_empty() {
            errors.insert("name", "name is required".to_string());
        } else if self.name.chars().count() > NAME_MAX_CHARS {
            errors.insert(
                "name",
                format!("name must be at most {} characters", NAME_MAX_CHARS),
            );
        }

        if self.tax_id.is_empty() {
            errors.insert("tax_id", "tax id is required".to_string());
        } else if !is_tax_id(&self.tax_id) {
            errors.insert(
                "tax_id",
                format!("tax id must be exactly {} digits", TAX_ID_LEN),
            );
        }

        if self.address.is_empty() {
            errors.insert("address", "address is required".to_string());
        }

        if !self.phone_number.is_empty() && !is_phone_number(&self.phone_number) {
            errors.insert(
                "phone_number",
                format!(
                    "phone number must be {}-{} characters of digits, + or -",
                    PHONE_MIN_LEN, PHONE_MAX_LEN
                ),
            );
        }

        // branch_code is free-form; empty is legal and resolved to
        // DEFAULT_BRANCH_CODE at the store.

        if errors.is_empty() { Ok(self) } else { Err(errors) }
    }

    pub fn is_update(&self) -> bool {
        self.id > 0
    }

    /// Branch code as it will be persisted.
    pub fn branch_code_or_default(&self) -> &str {
        if self.branch_code.is_empty() {
            DEFAULT_BRANCH_CODE
        } else {
            &self.branch_code
        }
    }

    /// Phone number as it will be persisted: empty input becomes absent, so
    /// the store never holds an empty string.
    pub fn phone_number_opt(&self) -> Option<&str> {
        if self.phone_number.is_empty() {
            None
        } else {
            Some(&self.phone_number)
        }
    }

    fn trim_fields(&mut self) {
        trim_in_place(&mut self.name);
        trim_in_place(&mut self.tax_id);
        trim_in_place(&mut self.branch_code);
        trim_in_place(&mut self.address);
        trim_in_place(&mut self.phone_number);
    }
}

fn trim_in_place(field: &mut String) {
    if field.trim().len() != field.len() {
        *field = field.trim().to_string();
    }
}

fn is_tax_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == TAX_ID_LEN && bytes.iter().all(|b| b.is_ascii_digit())
}

fn is_phone_number(s: &str) -> bool {
    let bytes = s.as_bytes();
    (PHONE_MIN_LEN..=PHONE_MAX_LEN).contains(&bytes.len())
        && bytes.iter().all(|b| matches!(b, b'0'..=b'9' | b'+' | b'-'))
}

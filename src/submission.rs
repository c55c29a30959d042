use chrono::{SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;

use crate::error::ValidationError;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// One contact-form submission.
///
/// Field names follow the camelCase wire format shared by the form, the proxy
/// and the destination. Absent optional text fields (and explicit `null`s) are
/// read as empty strings, which is also how they land in the sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default, deserialize_with = "scalar_as_text")]
    pub name: String,

    #[serde(default, deserialize_with = "scalar_as_text")]
    pub email: String,

    #[serde(default, deserialize_with = "scalar_as_text")]
    pub phone: String,

    #[serde(default, deserialize_with = "scalar_as_text")]
    pub company: String,

    #[serde(default, deserialize_with = "scalar_as_text")]
    pub message: String,

    /// ISO-8601 submission time; filled in by [`Submission::stamped`] when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Server-observed `User-Agent` of the submitter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Server-observed address of the submitter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Read any JSON scalar as text: `null` becomes empty, numbers and booleans
/// their literal form. Arrays and objects are rejected.
fn scalar_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(D::Error::custom(format!(
            "expected text, found {}",
            if other.is_array() { "an array" } else { "an object" }
        ))),
    }
}

impl Submission {
    /// Create a submission from the three required fields
    pub fn new(name: &str, email: &str, message: &str) -> Self {
        Submission {
            name: name.to_string(),
            email: email.to_string(),
            message: message.to_string(),
            ..Default::default()
        }
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = phone.to_string();
        self
    }

    pub fn with_company(mut self, company: &str) -> Self {
        self.company = company.to_string();
        self
    }

    pub fn with_timestamp(mut self, timestamp: &str) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }

    /// Check presence of the required fields, then the email shape
    ///
    /// Presence is checked first so that a submission missing its email is
    /// reported as incomplete rather than malformed.
    ///
    /// # Returns
    /// * `Ok(())` - The submission may be sent
    /// * `Err(ValidationError)` - Which check failed
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = [&self.name, &self.email, &self.message]
            .iter()
            .any(|field| field.trim().is_empty());
        if missing {
            return Err(ValidationError::MissingFields);
        }

        if !is_valid_email(self.email.trim()) {
            return Err(ValidationError::InvalidEmail);
        }

        Ok(())
    }

    /// Fill in the timestamp with the current time unless one was supplied
    pub fn stamped(mut self) -> Self {
        let blank = self
            .timestamp
            .as_deref()
            .map(|t| t.trim().is_empty())
            .unwrap_or(true);
        if blank {
            self.timestamp = Some(now_iso());
        }
        self
    }

    /// Attach what the server saw of the submitter
    pub fn observed(mut self, user_agent: Option<String>, ip: Option<String>) -> Self {
        self.user_agent = user_agent;
        self.ip = ip;
        self
    }

    /// Flatten into `key=value` pairs for form-encoded delivery.
    ///
    /// Every field is present so the receiving side always sees the full set
    /// of keys, with blanks for whatever was not provided.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("email", self.email.clone()),
            ("phone", self.phone.clone()),
            ("company", self.company.clone()),
            ("message", self.message.clone()),
            ("timestamp", self.timestamp.clone().unwrap_or_default()),
            ("userAgent", self.user_agent.clone().unwrap_or_default()),
            ("ip", self.ip.clone().unwrap_or_default()),
        ]
    }
}

/// Simple `local@domain.tld` check, no whitespace and exactly one `@`
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

/// Current UTC time as ISO-8601 with millisecond precision (`2024-01-31T09:15:00.000Z`)
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// OAuth client credentials used to mint a short-lived access token.
#[derive(Clone)]
pub struct SheetsCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_url: String,
}

impl std::fmt::Debug for SheetsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsCredentials")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SheetsSettings {
    pub spreadsheet_id: String,
    pub api_base: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetNames {
    pub sales: String,
    pub clients: String,
    pub sessions: String,
    pub teacher_sessions: String,
    pub late_cancellations: String,
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{key} must be set to fetch from Google Sheets"))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl SheetsCredentials {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(SheetsCredentials {
            client_id: required(&lookup, "STUDIO_SHEETS_CLIENT_ID")?,
            client_secret: required(&lookup, "STUDIO_SHEETS_CLIENT_SECRET")?,
            refresh_token: required(&lookup, "STUDIO_SHEETS_REFRESH_TOKEN")?,
            token_url: optional(&lookup, "STUDIO_SHEETS_TOKEN_URL", DEFAULT_TOKEN_URL),
        })
    }
}

impl SheetsSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let timeout_secs = match lookup("STUDIO_FETCH_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("STUDIO_FETCH_TIMEOUT_SECS is not a number: {raw}"))?,
            _ => DEFAULT_TIMEOUT_SECS,
        };

        Ok(SheetsSettings {
            spreadsheet_id: required(&lookup, "STUDIO_SPREADSHEET_ID")?,
            api_base: optional(&lookup, "STUDIO_SHEETS_API_BASE", DEFAULT_API_BASE),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }
}

impl SheetNames {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        SheetNames {
            sales: optional(&lookup, "STUDIO_SHEET_SALES", "Sales"),
            clients: optional(&lookup, "STUDIO_SHEET_CLIENTS", "New"),
            sessions: optional(&lookup, "STUDIO_SHEET_SESSIONS", "Recurring"),
            teacher_sessions: optional(
                &lookup,
                "STUDIO_SHEET_TEACHER_SESSIONS",
                "Teacher Recurring",
            ),
            late_cancellations: optional(
                &lookup,
                "STUDIO_SHEET_LATE_CANCELLATIONS",
                "Late Cancellations",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn credentials_require_all_secrets() {
        let lookup = lookup_from(&[
            ("STUDIO_SHEETS_CLIENT_ID", "client"),
            ("STUDIO_SHEETS_CLIENT_SECRET", "secret"),
        ]);
        let err = SheetsCredentials::from_lookup(lookup).unwrap_err();
        assert!(err.to_string().contains("STUDIO_SHEETS_REFRESH_TOKEN"));
    }

    #[test]
    fn credentials_default_token_url_and_hide_secrets() {
        let lookup = lookup_from(&[
            ("STUDIO_SHEETS_CLIENT_ID", "client"),
            ("STUDIO_SHEETS_CLIENT_SECRET", "secret"),
            ("STUDIO_SHEETS_REFRESH_TOKEN", "refresh"),
        ]);
        let creds = SheetsCredentials::from_lookup(lookup).unwrap();
        assert_eq!(creds.token_url, DEFAULT_TOKEN_URL);

        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("refresh"));
    }

    #[test]
    fn settings_parse_timeout() {
        let lookup = lookup_from(&[
            ("STUDIO_SPREADSHEET_ID", "sheet-id"),
            ("STUDIO_FETCH_TIMEOUT_SECS", "5"),
        ]);
        let settings = SheetsSettings::from_lookup(lookup).unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.api_base, DEFAULT_API_BASE);

        let bad = lookup_from(&[
            ("STUDIO_SPREADSHEET_ID", "sheet-id"),
            ("STUDIO_FETCH_TIMEOUT_SECS", "soon"),
        ]);
        assert!(SheetsSettings::from_lookup(bad).is_err());
    }

    #[test]
    fn sheet_names_fall_back_to_defaults() {
        let names = SheetNames::from_lookup(lookup_from(&[("STUDIO_SHEET_SALES", "Sales 2025")]));
        assert_eq!(names.sales, "Sales 2025");
        assert_eq!(names.late_cancellations, "Late Cancellations");
    }
}

use crate::{
    config::{MAX_BATCH_SIZE, MIN_BATCH_SIZE},
    settings::error::{FieldError, ValidationErrors},
};
use model::execution::settings::{BATCH_SIZE_KEY, DRY_RUN_KEY, ImportSettings, UploadedFile};
use tracing::{debug, warn};

/// Collects field errors while an adapter reads its typed settings out of
/// the raw bag. Call [`SettingsValidator::finish`] last.
pub struct SettingsValidator<'a> {
    raw: &'a ImportSettings,
    uploads: &'a [UploadedFile],
    errors: Vec<FieldError>,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(raw: &'a ImportSettings, uploads: &'a [UploadedFile]) -> Self {
        Self {
            raw,
            uploads,
            errors: Vec::new(),
        }
    }

    pub fn reject(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn required_str(&mut self, key: &str) -> Option<String> {
        match self.raw.get_str(key).map(str::trim) {
            Some(value) if !value.is_empty() => Some(value.to_string()),
            Some(_) => {
                self.reject(key, "must not be empty");
                None
            }
            None if self.raw.contains(key) => {
                self.reject(key, "must be a string");
                None
            }
            None => {
                self.reject(key, "is required");
                None
            }
        }
    }

    pub fn optional_str(&mut self, key: &str) -> Option<String> {
        self.raw
            .get_str(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn bool(&mut self, key: &str, default: bool) -> bool {
        if !self.raw.contains(key) {
            return default;
        }
        match self.raw.get_bool(key) {
            Some(value) => value,
            None => {
                self.reject(key, "must be a boolean");
                default
            }
        }
    }

    pub fn u64_in_range(&mut self, key: &str, default: u64, min: u64, max: u64) -> u64 {
        if !self.raw.contains(key) {
            return default;
        }
        match self.raw.get_u64(key) {
            Some(value) if (min..=max).contains(&value) => value,
            Some(value) => {
                self.reject(key, format!("{value} is outside {min}..={max}"));
                default
            }
            None => {
                self.reject(key, "must be an unsigned integer");
                default
            }
        }
    }

    /// A string restricted to `allowed`. Missing falls back to `default`;
    /// a missing value with no default is an error.
    pub fn one_of(&mut self, key: &str, allowed: &[&str], default: Option<&str>) -> Option<String> {
        let value = match self.optional_str(key) {
            Some(value) => value,
            None => match default {
                Some(default) => return Some(default.to_string()),
                None => {
                    self.reject(key, "is required");
                    return None;
                }
            },
        };

        if allowed.contains(&value.as_str()) {
            Some(value)
        } else {
            self.reject(key, format!("'{value}' is not one of: {}", allowed.join(", ")));
            None
        }
    }

    pub fn dry_run(&mut self) -> bool {
        self.bool(DRY_RUN_KEY, false)
    }

    /// Per-run batch size override, bounded like the engine default.
    pub fn batch_size(&mut self, default: usize) -> usize {
        let size = self.u64_in_range(
            BATCH_SIZE_KEY,
            default as u64,
            MIN_BATCH_SIZE as u64,
            MAX_BATCH_SIZE as u64,
        );
        size as usize
    }

    pub fn upload(&mut self, field: &str, required: bool) -> Option<&'a UploadedFile> {
        let found = self.uploads.iter().find(|u| u.field == field);
        if found.is_none() && required {
            self.reject(field, "an uploaded file is required");
        }
        found
    }

    pub fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.errors.is_empty() {
            debug!("Settings validated");
            return Ok(value);
        }

        for error in &self.errors {
            warn!(field = %error.field, "Rejected setting: {}", error.message);
        }
        Err(ValidationErrors(self.errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn collects_every_error() {
        let raw = ImportSettings::new()
            .with("destination", "page")
            .with("author", "")
            .with("batch_size", 5)
            .with("dry_run", "perhaps");

        let mut v = SettingsValidator::new(&raw, &[]);
        let destination = v.one_of("destination", &["listing", "event"], None);
        let author = v.required_str("author");
        let batch = v.batch_size(50);
        let dry_run = v.dry_run();

        assert_eq!(destination, None);
        assert_eq!(author, None);
        assert_eq!(batch, 50);
        assert!(!dry_run);

        let err = v.finish(()).unwrap_err();
        assert_eq!(
            err.fields().collect::<Vec<_>>(),
            vec!["destination", "author", "batch_size", "dry_run"]
        );
    }

    #[test]
    fn accepts_well_formed_settings() {
        let raw = ImportSettings::new()
            .with("destination", "listing")
            .with("batch_size", "20")
            .with("dry_run", true);
        let uploads = vec![UploadedFile {
            field: "csv".into(),
            file_name: "listings.csv".into(),
            path: PathBuf::from("/tmp/listings.csv"),
        }];

        let mut v = SettingsValidator::new(&raw, &uploads);
        let parsed = (
            v.one_of("destination", &["listing", "event"], None),
            v.batch_size(50),
            v.dry_run(),
            v.upload("csv", true).map(|u| u.file_name.clone()),
        );

        let (destination, batch, dry_run, file) = v.finish(parsed).unwrap();
        assert_eq!(destination.as_deref(), Some("listing"));
        assert_eq!(batch, 20);
        assert!(dry_run);
        assert_eq!(file.as_deref(), Some("listings.csv"));
    }

    #[test]
    fn missing_required_upload_is_reported() {
        let raw = ImportSettings::new();
        let mut v = SettingsValidator::new(&raw, &[]);
        assert!(v.upload("csv", true).is_none());
        assert!(v.finish(()).is_err());
    }
}

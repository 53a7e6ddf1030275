use std::path::Path;

use json::JsonValue;

use crate::error::CcxError;

/// Limits beyond which an evaluated element is reported as a problem
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub max_aspect_ratio: f64,
    pub min_size: f64,
    pub min_scaled_jacobian: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            max_aspect_ratio: 20.0,
            min_size: 1e-6,
            min_scaled_jacobian: 0.0,
        }
    }
}

/// Loads thresholds from a json file, falling back to the defaults for
/// every key the file leaves out
///
/// # Arguments
/// * `path` - The path to the thresholds json
pub fn load_thresholds(path: &Path) -> Result<Thresholds, CcxError> {
    let file_string = match std::fs::read_to_string(path) {
        Ok(f) => f,
        Err(_err) => {
            return Err(CcxError::Config(format!(
                "Unable to open thresholds file {}",
                path.display()
            )))
        }
    };

    parse_thresholds(&file_string)
}

pub fn parse_thresholds(contents: &str) -> Result<Thresholds, CcxError> {
    let config_json = match json::parse(contents) {
        Ok(f) => f,
        Err(err) => return Err(CcxError::Config(format!("Error in thresholds json: {err}"))),
    };

    if !config_json.has_key("thresholds") || !config_json["thresholds"].is_object() {
        return Err(CcxError::Config(
            "Thresholds json missing thresholds object".to_string(),
        ));
    }

    let section = &config_json["thresholds"];
    let defaults = Thresholds::default();

    let thresholds = Thresholds {
        max_aspect_ratio: read_number(section, "max_aspect_ratio", defaults.max_aspect_ratio)?,
        min_size: read_number(section, "min_size", defaults.min_size)?,
        min_scaled_jacobian: read_number(
            section,
            "min_scaled_jacobian",
            defaults.min_scaled_jacobian,
        )?,
    };

    if thresholds.max_aspect_ratio < 0.0 {
        return Err(CcxError::Config(
            "max_aspect_ratio must not be negative".to_string(),
        ));
    }
    if thresholds.min_size < 0.0 {
        return Err(CcxError::Config("min_size must not be negative".to_string()));
    }

    Ok(thresholds)
}

fn read_number(section: &JsonValue, key: &str, default: f64) -> Result<f64, CcxError> {
    if !section.has_key(key) {
        return Ok(default);
    }

    match section[key].as_f64() {
        Some(value) => Ok(value),
        None => Err(CcxError::Config(format!(
            "Bad value for {key} in thresholds json"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let thresholds = parse_thresholds(r#"{"thresholds": {"max_aspect_ratio": 8}}"#).unwrap();
        assert_eq!(thresholds.max_aspect_ratio, 8.0);
        assert_eq!(thresholds.min_size, 1e-6);
        assert_eq!(thresholds.min_scaled_jacobian, 0.0);
    }

    #[test]
    fn reads_every_key() {
        let contents = concat!(
            r#"{"thresholds": {"max_aspect_ratio": 5, "#,
            r#""min_size": 0.001, "min_scaled_jacobian": 0.2}}"#
        );
        let thresholds = parse_thresholds(contents).unwrap();
        assert_eq!(
            thresholds,
            Thresholds {
                max_aspect_ratio: 5.0,
                min_size: 0.001,
                min_scaled_jacobian: 0.2,
            }
        );
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(matches!(parse_thresholds("{"), Err(CcxError::Config(_))));
        assert!(matches!(parse_thresholds("{}"), Err(CcxError::Config(_))));
        assert!(matches!(
            parse_thresholds(r#"{"thresholds": {"min_size": "tiny"}}"#),
            Err(CcxError::Config(_))
        ));
        assert!(matches!(
            parse_thresholds(r#"{"thresholds": {"max_aspect_ratio": -1}}"#),
            Err(CcxError::Config(_))
        ));
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let err = load_thresholds(Path::new("/no/such/thresholds.json")).unwrap_err();
        assert!(matches!(err, CcxError::Config(_)));
    }
}

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use json::JsonValue;

use crate::{
    datatypes::{DIM, LOWER_BOUNDS, UPPER_BOUNDS},
    error::WaterbombError,
};

/// Placeholder in the launch template replaced by the parameter list
pub const PARAMS_PLACEHOLDER: &str = "{params}";

const DEFAULT_LAUNCH_TEMPLATE: &str = "from fem_model import *
from post_process import *
model({params})
post_process({params})
";

const KNOWN_KEYS: [&str; 16] = [
    "project",
    "working_dir",
    "command",
    "launch_script",
    "launch_template",
    "keep_launch_script",
    "report_file",
    "stats_file",
    "cleanup_prefixes",
    "timeout_secs",
    "initial_point",
    "lower_bounds",
    "upper_bounds",
    "max_evaluations",
    "simplex_step",
    "sd_tolerance",
];

/// Settings of one optimization experiment
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub project: String,
    pub working_dir: PathBuf,
    /// Program and arguments of the FE batch run
    pub command: Vec<String>,
    pub launch_script: String,
    pub launch_template: String,
    pub keep_launch_script: bool,
    pub report_file: String,
    pub stats_file: String,
    /// Files starting with any of these are deleted after each evaluation
    pub cleanup_prefixes: Vec<String>,
    pub timeout: Option<Duration>,
    pub initial_point: [f64; DIM],
    pub lower_bounds: [f64; DIM],
    pub upper_bounds: [f64; DIM],
    pub max_evaluations: usize,
    /// Initial simplex edge, as a fraction of each bound range
    pub simplex_step: f64,
    pub sd_tolerance: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            project: "waterbomb".to_owned(),
            working_dir: PathBuf::from("."),
            command: vec![
                "abaqus".to_owned(),
                "cae".to_owned(),
                "nogui=Launch.py".to_owned(),
            ],
            launch_script: "Launch.py".to_owned(),
            launch_template: DEFAULT_LAUNCH_TEMPLATE.to_owned(),
            keep_launch_script: true,
            report_file: "Report.txt".to_owned(),
            stats_file: "Blackbox_result.txt".to_owned(),
            cleanup_prefixes: vec!["waterbomb".to_owned(), "abaqus".to_owned()],
            timeout: None,
            initial_point: [1.0, 0.1, 0.5, 0.9],
            lower_bounds: LOWER_BOUNDS,
            upper_bounds: UPPER_BOUNDS,
            max_evaluations: 1000,
            simplex_step: 0.1,
            sd_tolerance: 1e-6,
        }
    }
}

impl RunConfig {
    pub fn report_path(&self) -> PathBuf {
        self.working_dir.join(&self.report_file)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.working_dir.join(&self.stats_file)
    }

    /// Checks cross-field constraints
    pub fn validate(&self) -> Result<(), WaterbombError> {
        if self.command.is_empty() {
            return Err(WaterbombError::Input("command must not be empty".to_owned()));
        }
        if !self.launch_template.contains(PARAMS_PLACEHOLDER) {
            return Err(WaterbombError::Input(format!(
                "launch_template never mentions {PARAMS_PLACEHOLDER}"
            )));
        }
        if self.max_evaluations == 0 {
            return Err(WaterbombError::Input(
                "max_evaluations must be positive".to_owned(),
            ));
        }
        if !(self.simplex_step > 0.0) {
            return Err(WaterbombError::Input(
                "simplex_step must be positive".to_owned(),
            ));
        }
        for i in 0..DIM {
            let (lo, hi, x0) = (
                self.lower_bounds[i],
                self.upper_bounds[i],
                self.initial_point[i],
            );
            if !(lo <= hi) {
                return Err(WaterbombError::Input(format!(
                    "lower bound {lo} above upper bound {hi} for parameter {i}"
                )));
            }
            if !(lo <= x0 && x0 <= hi) {
                return Err(WaterbombError::Input(format!(
                    "initial point {x0} outside [{lo}, {hi}] for parameter {i}"
                )));
            }
        }
        if self
            .cleanup_prefixes
            .iter()
            .any(|p| {
                p.is_empty()
                    || self.report_file.starts_with(p.as_str())
                    || self.stats_file.starts_with(p.as_str())
            })
        {
            return Err(WaterbombError::Input(
                "cleanup_prefixes must be non-empty and must not match the report or stats file"
                    .to_owned(),
            ));
        }

        Ok(())
    }
}

fn expect_str(value: &JsonValue, key: &str) -> Result<String, WaterbombError> {
    match value.as_str() {
        Some(s) => Ok(s.to_owned()),
        None => Err(WaterbombError::Input(format!(
            "Config field {key} must be a string"
        ))),
    }
}

fn expect_f64(value: &JsonValue, key: &str) -> Result<f64, WaterbombError> {
    match value.as_f64() {
        Some(n) => Ok(n),
        None => Err(WaterbombError::Input(format!(
            "Config field {key} must be a number"
        ))),
    }
}

fn expect_strings(value: &JsonValue, key: &str) -> Result<Vec<String>, WaterbombError> {
    if !value.is_array() {
        return Err(WaterbombError::Input(format!(
            "Config field {key} must be an array of strings"
        )));
    }
    value.members().map(|v| expect_str(v, key)).collect()
}

fn expect_point(value: &JsonValue, key: &str) -> Result<[f64; DIM], WaterbombError> {
    if !value.is_array() || value.len() != DIM {
        return Err(WaterbombError::Input(format!(
            "Config field {key} must be an array of {DIM} numbers"
        )));
    }

    let mut point = [0.0; DIM];
    for (slot, member) in point.iter_mut().zip(value.members()) {
        *slot = expect_f64(member, key)?;
    }
    Ok(point)
}

/// Parses a JSON config document. Missing keys keep their defaults.
pub fn parse_config(contents: &str) -> Result<RunConfig, WaterbombError> {
    let root = match json::parse(contents) {
        Ok(v) => v,
        Err(err) => {
            return Err(WaterbombError::Input(format!(
                "Error in config json: {err}"
            )))
        }
    };
    if !root.is_object() {
        return Err(WaterbombError::Input(
            "Config json must be an object".to_owned(),
        ));
    }

    let mut config = RunConfig::default();

    for (key, value) in root.entries() {
        match key {
            "project" => config.project = expect_str(value, key)?,
            "working_dir" => config.working_dir = PathBuf::from(expect_str(value, key)?),
            "command" => config.command = expect_strings(value, key)?,
            "launch_script" => config.launch_script = expect_str(value, key)?,
            "launch_template" => config.launch_template = expect_str(value, key)?,
            "keep_launch_script" => {
                config.keep_launch_script = match value.as_bool() {
                    Some(b) => b,
                    None => {
                        return Err(WaterbombError::Input(
                            "Config field keep_launch_script must be a boolean".to_owned(),
                        ))
                    }
                }
            }
            "report_file" => config.report_file = expect_str(value, key)?,
            "stats_file" => config.stats_file = expect_str(value, key)?,
            "cleanup_prefixes" => config.cleanup_prefixes = expect_strings(value, key)?,
            "timeout_secs" => {
                let secs = expect_f64(value, key)?;
                if !(secs >= 0.0) || !secs.is_finite() {
                    return Err(WaterbombError::Input(format!(
                        "timeout_secs must be a non-negative number, got {secs}"
                    )));
                }
                config.timeout = if secs == 0.0 {
                    None
                } else {
                    Some(Duration::from_secs_f64(secs))
                };
            }
            "initial_point" => config.initial_point = expect_point(value, key)?,
            "lower_bounds" => config.lower_bounds = expect_point(value, key)?,
            "upper_bounds" => config.upper_bounds = expect_point(value, key)?,
            "max_evaluations" => {
                config.max_evaluations = match value.as_usize() {
                    Some(n) => n,
                    None => {
                        return Err(WaterbombError::Input(
                            "Config field max_evaluations must be a non-negative integer"
                                .to_owned(),
                        ))
                    }
                }
            }
            "simplex_step" => config.simplex_step = expect_f64(value, key)?,
            "sd_tolerance" => config.sd_tolerance = expect_f64(value, key)?,
            other => {
                return Err(WaterbombError::Input(format!(
                    "Unknown config field {other}, expected one of {:?}",
                    KNOWN_KEYS
                )))
            }
        }
    }

    config.validate()?;
    Ok(config)
}

/// Loads the config file, or the defaults when no file is given
///
/// # Arguments
/// * `config_file` - Optional path to a JSON config
pub fn load_config(config_file: Option<&Path>) -> Result<RunConfig, WaterbombError> {
    let config_file = match config_file {
        Some(p) => p,
        None => {
            let config = RunConfig::default();
            config.validate()?;
            return Ok(config);
        }
    };

    let contents = match std::fs::read_to_string(config_file) {
        Ok(c) => c,
        Err(_err) => {
            return Err(WaterbombError::Input(format!(
                "Unable to open config file {}",
                config_file.display()
            )))
        }
    };

    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let config = load_config(None).unwrap();
        assert_eq!(config.initial_point, [1.0, 0.1, 0.5, 0.9]);
        assert_eq!(config.lower_bounds, [0.0, 0.01, 0.01, 0.01]);
        assert_eq!(config.upper_bounds, [2.0, 0.99, 0.99, 0.99]);
        assert_eq!(config.max_evaluations, 1000);
        assert_eq!(config.report_file, "Report.txt");
        assert_eq!(config.command.join(" "), "abaqus cae nogui=Launch.py");
        assert!(config.timeout.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = parse_config(
            r#"{
                "command": ["sh", "run.sh"],
                "timeout_secs": 90,
                "max_evaluations": 25,
                "initial_point": [0.5, 0.2, 0.2, 0.2],
                "cleanup_prefixes": ["job"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.command, vec!["sh", "run.sh"]);
        assert_eq!(config.timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.max_evaluations, 25);
        assert_eq!(config.initial_point, [0.5, 0.2, 0.2, 0.2]);
        assert_eq!(config.cleanup_prefixes, vec!["job"]);
        assert_eq!(config.project, "waterbomb");
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(parse_config(r#"{"max_evals": 3}"#).is_err());
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(parse_config(r#"{"command": "abaqus cae"}"#).is_err());
        assert!(parse_config(r#"{"initial_point": [1.0, 0.1]}"#).is_err());
        assert!(parse_config(r#"{"timeout_secs": -1}"#).is_err());
        assert!(parse_config("[1, 2]").is_err());
    }

    #[test]
    fn initial_point_must_be_inside_bounds() {
        assert!(parse_config(r#"{"initial_point": [3.0, 0.1, 0.5, 0.9]}"#).is_err());
    }

    #[test]
    fn demo_config_parses() {
        let config = parse_config(include_str!("../demos/waterbomb.json")).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(7200)));
        assert!(config.launch_template.contains("post-process"));
    }

    #[test]
    fn report_file_cannot_be_cleaned_up() {
        assert!(parse_config(r#"{"report_file": "waterbomb_report.txt"}"#).is_err());
    }

    #[test]
    fn stats_file_cannot_be_cleaned_up() {
        assert!(parse_config(r#"{"stats_file": "waterbomb_stats.txt"}"#).is_err());
        assert!(parse_config(r#"{"stats_file": "Abaqus_stats.txt"}"#).is_ok());
        assert!(parse_config(
            r#"{"stats_file": "Abaqus_stats.txt", "cleanup_prefixes": ["Abaqus"]}"#
        )
        .is_err());
    }
}

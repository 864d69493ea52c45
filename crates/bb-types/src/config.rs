//! `key: value` config file loader.
//!
//! ```text
//! algorithm_name: RBFopt
//! num_design_vars: 2
//! up_bounds: 3 3
//! low_bounds: 0 0
//! max_evaluations: 50
//! file_path: D:\Solvers\run1
//! initial_value: 1 1
//! ```
//!
//! Each line is split at its first `:` so drive-letter paths survive intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::ConfigError;
use crate::spec::OptimizerSpec;

pub const KEY_ALGORITHM: &str = "algorithm_name";
pub const KEY_NUM_VARS: &str = "num_design_vars";
pub const KEY_UP_BOUNDS: &str = "up_bounds";
pub const KEY_LOW_BOUNDS: &str = "low_bounds";
pub const KEY_MAX_EVALUATIONS: &str = "max_evaluations";
pub const KEY_FILE_PATH: &str = "file_path";
pub const KEY_INITIAL_VALUE: &str = "initial_value";
pub const KEY_SEED: &str = "seed";
pub const KEY_SIGMA0: &str = "sigma0";

const KNOWN_KEYS: [&str; 9] = [
    KEY_ALGORITHM,
    KEY_NUM_VARS,
    KEY_UP_BOUNDS,
    KEY_LOW_BOUNDS,
    KEY_MAX_EVALUATIONS,
    KEY_FILE_PATH,
    KEY_INITIAL_VALUE,
    KEY_SEED,
    KEY_SIGMA0,
];

/// Read and parse a config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<OptimizerSpec, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    debug!("Loaded config file {}", path.display());
    parse_config(&text)
}

/// Parse config text into a validated [`OptimizerSpec`].
pub fn parse_config(text: &str) -> Result<OptimizerSpec, ConfigError> {
    let entries = parse_entries(text);

    let algorithm_name = required(&entries, KEY_ALGORITHM)?.to_string();
    let num_design_vars = parse_count(KEY_NUM_VARS, required(&entries, KEY_NUM_VARS)?)?;
    let up_bounds = parse_reals(KEY_UP_BOUNDS, required(&entries, KEY_UP_BOUNDS)?)?;
    let low_bounds = parse_reals(KEY_LOW_BOUNDS, required(&entries, KEY_LOW_BOUNDS)?)?;
    let max_evaluations = parse_count(
        KEY_MAX_EVALUATIONS,
        required(&entries, KEY_MAX_EVALUATIONS)?,
    )?;
    let handshake_dir = PathBuf::from(required(&entries, KEY_FILE_PATH)?);

    let initial_value = optional(&entries, KEY_INITIAL_VALUE)
        .map(|v| parse_reals(KEY_INITIAL_VALUE, v))
        .transpose()?;
    let seed = optional(&entries, KEY_SEED)
        .map(|v| {
            v.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: KEY_SEED.into(),
                value: v.into(),
                message: e.to_string(),
            })
        })
        .transpose()?;
    let sigma0 = optional(&entries, KEY_SIGMA0)
        .map(|v| parse_real(KEY_SIGMA0, v))
        .transpose()?;

    let spec = OptimizerSpec {
        algorithm_name,
        num_design_vars,
        low_bounds,
        up_bounds,
        max_evaluations,
        initial_value,
        handshake_dir,
        seed,
        sigma0,
    };
    spec.validate()?;
    Ok(spec)
}

fn parse_entries(text: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if !KNOWN_KEYS.contains(&key) {
            warn!("Ignoring unknown config key: {}", key);
            continue;
        }
        entries.insert(key.to_string(), value.trim().to_string());
    }
    entries
}

fn required<'a>(entries: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ConfigError> {
    match entries.get(key).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingKey { key: key.to_string() }),
    }
}

fn optional<'a>(entries: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    entries
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn invalid(key: &str, value: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        message: message.into(),
    }
}

/// Non-negative integer; `50.0` is accepted as `50`.
fn parse_count(key: &str, value: &str) -> Result<usize, ConfigError> {
    if let Ok(n) = value.parse::<usize>() {
        return Ok(n);
    }
    match value.parse::<f64>() {
        Ok(x) if x >= 0.0 && x.fract() == 0.0 && x <= u32::MAX as f64 => Ok(x as usize),
        _ => Err(invalid(key, value, "expected a non-negative integer")),
    }
}

fn parse_real(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse::<f64>()
        .map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_reals(key: &str, value: &str) -> Result<Vec<f64>, ConfigError> {
    value
        .split_whitespace()
        .map(|token| parse_real(key, token))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
algorithm_name: RBFopt
num_design_vars: 2
up_bounds: 3 3
low_bounds: 0 0
max_evaluations: 50
file_path: D:\\VS_Repos\\Solvers
";

    #[test]
    fn parses_sample_config() {
        let spec = parse_config(SAMPLE).unwrap();
        assert_eq!(spec.algorithm_name, "RBFopt");
        assert_eq!(spec.num_design_vars, 2);
        assert_eq!(spec.up_bounds, vec![3.0, 3.0]);
        assert_eq!(spec.low_bounds, vec![0.0, 0.0]);
        assert_eq!(spec.max_evaluations, 50);
        assert_eq!(spec.handshake_dir, PathBuf::from("D:\\VS_Repos\\Solvers"));
        assert_eq!(spec.initial_value, None);
        assert_eq!(spec.initial_point(), vec![1.5, 1.5]);
    }

    #[test]
    fn parses_optional_keys() {
        let text = format!("{SAMPLE}initial_value: 1 1.25\nseed: 42\nsigma0: 0.3\n");
        let spec = parse_config(&text).unwrap();
        assert_eq!(spec.initial_value, Some(vec![1.0, 1.25]));
        assert_eq!(spec.seed, Some(42));
        assert_eq!(spec.sigma0, Some(0.3));
    }

    #[test]
    fn ignores_comments_unknown_keys_and_noise() {
        let text = format!("# header\n\nrandom line\nverbosity: 3\n{SAMPLE}");
        assert!(parse_config(&text).is_ok());
    }

    #[test]
    fn float_written_counts_are_accepted() {
        let text = SAMPLE.replace("max_evaluations: 50", "max_evaluations: 50.0");
        assert_eq!(parse_config(&text).unwrap().max_evaluations, 50);

        let text = SAMPLE.replace("max_evaluations: 50", "max_evaluations: 50.5");
        assert!(matches!(
            parse_config(&text),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == KEY_MAX_EVALUATIONS
        ));
    }

    #[test]
    fn missing_required_key_is_reported() {
        let text = SAMPLE.replace("max_evaluations: 50\n", "");
        assert_eq!(
            parse_config(&text),
            Err(ConfigError::MissingKey {
                key: KEY_MAX_EVALUATIONS.into()
            })
        );
    }

    #[test]
    fn bound_length_mismatch_is_reported() {
        let text = SAMPLE.replace("up_bounds: 3 3", "up_bounds: 3 3 3");
        assert!(matches!(
            parse_config(&text),
            Err(ConfigError::LengthMismatch { ref key, expected: 2, actual: 3 }) if key == KEY_UP_BOUNDS
        ));
    }

    #[test]
    fn unsupported_algorithm_is_not_a_loader_error() {
        let text = SAMPLE.replace("RBFopt", "SimulatedAnnealing");
        let spec = parse_config(&text).unwrap();
        assert!(spec.algorithm().is_err());
    }

    #[test]
    fn load_config_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let spec = load_config(file.path()).unwrap();
        assert_eq!(spec.num_design_vars, 2);

        let missing = load_config(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Unreadable { .. })));
    }
}

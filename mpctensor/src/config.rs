//! Session configuration, loadable from TOML.
//!
//! ```toml
//! [encoding]
//! precision_bits = 16
//!
//! [approximation]
//! reciprocal_iterations = 10
//!
//! [session]
//! round_tagging = true
//!
//! [dealer]
//! capacity = 100000
//! seed = "000102030405060708090a0b0c0d0e0f"
//! ```

use crate::error::{Error, Result};
use crate::fixedpoint::FixedPointEncoding;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub encoding: EncodingConfig,
    pub approximation: ApproximationConfig,
    pub session: SessionConfig,
    pub dealer: DealerConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EncodingConfig {
    pub precision_bits: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        EncodingConfig { precision_bits: 16 }
    }
}

/// Fixed iteration counts of the approximation routines.
///
/// These never adapt to the data; a data-dependent count would leak through
/// the number of rounds.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ApproximationConfig {
    /// Squarings in `exp`; inputs must stay above `-2^(exp_iterations + 1)`.
    pub exp_iterations: u32,
    pub reciprocal_iterations: u32,
    pub sqrt_iterations: u32,
    pub log_iterations: u32,
    /// Order of the Householder correction in `log`.
    pub log_order: u32,
    /// Squarings of the `exp` nested inside `log`.
    pub log_exp_iterations: u32,
    /// Angle doublings in `cos` and `sin`.
    pub trig_iterations: u32,
}

impl Default for ApproximationConfig {
    fn default() -> Self {
        ApproximationConfig {
            exp_iterations: 8,
            reciprocal_iterations: 10,
            sqrt_iterations: 5,
            log_iterations: 2,
            log_order: 8,
            log_exp_iterations: 6,
            trig_iterations: 6,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Exchange a digest of (label, round) before every collective and fail
    /// with `Error::ProtocolDesync` when parties disagree.
    pub round_tagging: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DealerConfig {
    /// Maximum number of correlations the dealer hands out.
    pub capacity: Option<u64>,
    /// 16 byte hex seed; fresh randomness when absent.
    pub seed: Option<String>,
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(source).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Configuration(format!("failed to read {:?}: {}", path.as_ref(), e))
        })?;
        Config::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        let bits = self.encoding.precision_bits;
        if !(1..=30).contains(&bits) {
            return Err(Error::Configuration(format!(
                "precision_bits must be within 1..=30, got {}",
                bits
            )));
        }
        let approx = &self.approximation;
        let counts = [
            ("exp_iterations", approx.exp_iterations),
            ("reciprocal_iterations", approx.reciprocal_iterations),
            ("sqrt_iterations", approx.sqrt_iterations),
            ("log_iterations", approx.log_iterations),
            ("log_order", approx.log_order),
            ("log_exp_iterations", approx.log_exp_iterations),
            ("trig_iterations", approx.trig_iterations),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, count)| *count == 0) {
            return Err(Error::Configuration(format!("{} must be positive", name)));
        }
        // exp divides by 2^iterations with a single truncation
        if approx.exp_iterations.max(approx.log_exp_iterations).max(approx.trig_iterations) > 20 {
            return Err(Error::Configuration(
                "iteration counts of exp and trig routines must be at most 20".into(),
            ));
        }
        self.dealer_seed()?;
        Ok(())
    }

    pub fn encoding(&self) -> FixedPointEncoding {
        FixedPointEncoding::new(self.encoding.precision_bits)
    }

    pub fn dealer_seed(&self) -> Result<Option<[u8; 16]>> {
        let hex = match &self.dealer.seed {
            Some(hex) => hex,
            None => return Ok(None),
        };
        if hex.len() != 32 {
            return Err(Error::Configuration(format!(
                "dealer seed must be 32 hex characters, got {}",
                hex.len()
            )));
        }
        let mut seed = [0u8; 16];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|e| Error::Configuration(format!("invalid dealer seed: {}", e)))?;
        }
        Ok(Some(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.encoding.precision_bits, 16);
        assert_eq!(config.approximation.reciprocal_iterations, 10);
        assert!(!config.session.round_tagging);
    }

    #[test]
    fn test_partial_document() {
        let source = r#"
            [encoding]
            precision_bits = 20

            [session]
            round_tagging = true

            [dealer]
            capacity = 12
            seed = "000102030405060708090a0b0c0d0e0f"
        "#;
        let config = Config::from_toml_str(source).unwrap();
        assert_eq!(config.encoding.precision_bits, 20);
        assert_eq!(config.approximation, ApproximationConfig::default());
        assert!(config.session.round_tagging);
        assert_eq!(config.dealer.capacity, Some(12));
        let seed = config.dealer_seed().unwrap().unwrap();
        assert_eq!(seed[15], 15);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            Config::from_toml_str("[encoding]\nprecision_bits = 40"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[approximation]\nexp_iterations = 0"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[dealer]\nseed = \"zz\""),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[encoding]\nprecision_bits = \"sixteen\""),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[approximation]\nsqrt_iterations = 7").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.approximation.sqrt_iterations, 7);
    }
}

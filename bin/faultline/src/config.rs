use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use figment::{
    providers::{Env, Format as _, Yaml},
    Figment,
};
use serde::Deserialize;
use snafu::{ensure, Snafu};

use crate::{error::GenericError, marker::HoneycombCredentials, storefront::CartLookup};

const ENV_PREFIX: &str = "FAULTLINE_";
const HONEYCOMB_API_KEY_ENV_VAR: &str = "HONEYCOMB_API_KEY";
const SERVICE_NAME_ENV_VAR: &str = "OTEL_SERVICE_NAME";

/// Serves a storefront and drives traffic against it, injecting a fault on a fixed timeline.
#[derive(Clone, Debug, Parser)]
pub struct Cli {
    /// Path to a YAML configuration file.
    ///
    /// Settings in the file are overridden by `FAULTLINE_`-prefixed environment variables.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

/// Configuration error.
#[derive(Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigError {
    /// A setting that must be non-zero was zero.
    #[snafu(display("'{}' must be greater than zero", setting))]
    ZeroValue {
        /// Name of the setting.
        setting: &'static str,
    },
}

/// Faultline configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the storefront listens on.
    pub listen_address: SocketAddr,

    /// Base URL the traffic generator sends requests to.
    ///
    /// Defaults to the storefront itself, on `localhost`.
    pub target_url: Option<String>,

    /// Time between traffic ticks, in milliseconds.
    pub tick_interval_ms: u64,

    /// Length of one phase unit, in milliseconds.
    ///
    /// The fault window opens after 7 units, closes after 10, and traffic stops after 11.
    pub phase_unit_ms: u64,

    /// Number of items in the generated catalog.
    pub catalog_size: usize,

    /// How add-to-cart requests resolve items.
    pub cart_lookup: CartLookup,

    /// Latency of the simulated database call, in milliseconds.
    pub db_latency_ms: u64,

    /// Whether request handlers open spans.
    pub spans_enabled: bool,

    /// Seed for the random number generator used for the catalog and traffic choices.
    ///
    /// When unset, a seed is drawn from the operating system.
    pub seed: Option<u64>,

    /// Honeycomb API key used for markers.
    pub honeycomb_api_key: Option<String>,

    /// Service name, used as the Honeycomb dataset for markers.
    pub service_name: Option<String>,

    /// Base URL of the Honeycomb API.
    pub marker_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            target_url: None,
            tick_interval_ms: 100,
            phase_unit_ms: 60_000,
            catalog_size: 10,
            cart_lookup: CartLookup::Database,
            db_latency_ms: 15,
            spans_enabled: true,
            seed: None,
            honeycomb_api_key: None,
            service_name: None,
            marker_endpoint: "https://api.honeycomb.io".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration from the given file, if any, and the environment.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed, a value has the wrong type, or the resulting configuration is invalid, an
    /// error is returned.
    pub fn load(config_path: Option<&Path>) -> Result<Self, GenericError> {
        let config: Self = Self::figment(config_path).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file_exact(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(
                Env::raw()
                    .only(&[HONEYCOMB_API_KEY_ENV_VAR])
                    .map(|_| "honeycomb_api_key".into()),
            )
            .merge(Env::raw().only(&[SERVICE_NAME_ENV_VAR]).map(|_| "service_name".into()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.tick_interval_ms > 0, ZeroValue { setting: "tick_interval_ms" });
        ensure!(self.phase_unit_ms > 0, ZeroValue { setting: "phase_unit_ms" });
        ensure!(self.catalog_size > 0, ZeroValue { setting: "catalog_size" });
        Ok(())
    }

    /// Returns the tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Returns the phase unit.
    pub fn phase_unit(&self) -> Duration {
        Duration::from_millis(self.phase_unit_ms)
    }

    /// Returns the catalog size.
    pub fn catalog_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.catalog_size).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the simulated database latency.
    pub fn db_latency(&self) -> Duration {
        Duration::from_millis(self.db_latency_ms)
    }

    /// Returns the base URL traffic is sent to.
    pub fn target_url(&self) -> String {
        match &self.target_url {
            Some(url) => url.clone(),
            None => format!("http://localhost:{}", self.listen_address.port()),
        }
    }

    /// Returns the Honeycomb credentials, if both the API key and the service name are set.
    pub fn honeycomb_credentials(&self) -> Option<HoneycombCredentials> {
        HoneycombCredentials::from_parts(self.honeycomb_api_key.clone(), self.service_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults() {
        Jail::expect_with(|_| {
            let config = Config::load(None).unwrap();
            assert_eq!(config.listen_address, "0.0.0.0:3000".parse().unwrap());
            assert_eq!(config.tick_interval(), Duration::from_millis(100));
            assert_eq!(config.phase_unit(), Duration::from_secs(60));
            assert_eq!(config.catalog_size().get(), 10);
            assert_eq!(config.cart_lookup, CartLookup::Database);
            assert_eq!(config.db_latency(), Duration::from_millis(15));
            assert!(config.spans_enabled);
            assert_eq!(config.target_url(), "http://localhost:3000");
            assert!(config.honeycomb_credentials().is_none());
            Ok(())
        });
    }

    #[test]
    fn file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "faultline.yaml",
                r#"
                listen_address: "127.0.0.1:8080"
                tick_interval_ms: 10
                cart_lookup: catalog
                seed: 42
                "#,
            )?;
            jail.set_env("FAULTLINE_TICK_INTERVAL_MS", "25");
            jail.set_env("FAULTLINE_SPANS_ENABLED", "false");

            let config = Config::load(Some(Path::new("faultline.yaml"))).unwrap();
            assert_eq!(config.listen_address, "127.0.0.1:8080".parse().unwrap());
            assert_eq!(config.tick_interval(), Duration::from_millis(25));
            assert_eq!(config.cart_lookup, CartLookup::Catalog);
            assert_eq!(config.seed, Some(42));
            assert!(!config.spans_enabled);
            assert_eq!(config.target_url(), "http://localhost:8080");
            Ok(())
        });
    }

    #[test]
    fn honeycomb_variables() {
        Jail::expect_with(|jail| {
            jail.set_env("HONEYCOMB_API_KEY", "secret");
            let config = Config::load(None).unwrap();
            assert!(config.honeycomb_credentials().is_none());

            jail.set_env("OTEL_SERVICE_NAME", "storefront");
            let config = Config::load(None).unwrap();
            let credentials = config.honeycomb_credentials().unwrap();
            assert_eq!(credentials.api_key, "secret");
            assert_eq!(credentials.dataset, "storefront");
            Ok(())
        });
    }

    #[test]
    fn zero_values_are_rejected() {
        for setting in ["tick_interval_ms", "phase_unit_ms", "catalog_size"] {
            Jail::expect_with(|jail| {
                jail.set_env(format!("FAULTLINE_{}", setting.to_uppercase()), "0");
                let err = Config::figment(None).extract::<Config>()?.validate().unwrap_err();
                assert_eq!(err, ConfigError::ZeroValue { setting });
                Ok(())
            });
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        Jail::expect_with(|_| {
            assert!(Config::load(Some(Path::new("does-not-exist.yaml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn explicit_target_url() {
        let config = Config {
            target_url: Some("http://storefront:3000".to_string()),
            ..Default::default()
        };
        assert_eq!(config.target_url(), "http://storefront:3000");
    }
}

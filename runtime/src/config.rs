//! Subscription configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CATCHUP_SUBSCRIPTION_ID` | required |
//! | `CATCHUP_BATCH_SIZE` | `1` |
//! | `CATCHUP_RESUBSCRIBE_DELAY_MS` | `1000` |

use catchup_core::projection::ProjectionError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default pause between a dropped subscription and the next attempt.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Default number of envelopes handed to handlers per unit of work.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Settings of one subscription runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Checkpoint key of the subscription
    pub subscription_id: String,
    /// Maximum envelopes per unit of work
    pub batch_size: usize,
    /// Pause before resubscribing after a drop
    pub resubscribe_delay: Duration,
}

impl SubscriptionConfig {
    /// Configuration with default batching and delay.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if `CATCHUP_SUBSCRIPTION_ID` is
    /// missing or a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ProjectionError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, one call per variable name.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProjectionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let subscription_id = lookup("CATCHUP_SUBSCRIPTION_ID")
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ProjectionError::Configuration("CATCHUP_SUBSCRIPTION_ID is not set".to_string())
            })?;

        let batch_size = parse_var(&lookup, "CATCHUP_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        let resubscribe_delay = parse_var::<u64, _>(&lookup, "CATCHUP_RESUBSCRIBE_DELAY_MS")?
            .map_or(DEFAULT_RESUBSCRIBE_DELAY, Duration::from_millis);

        Ok(Self {
            subscription_id,
            batch_size,
            resubscribe_delay,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ProjectionError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ProjectionError::Configuration(format!("{key}={raw:?} is invalid: {e}"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_id_is_set() {
        let config =
            SubscriptionConfig::from_lookup(lookup(&[("CATCHUP_SUBSCRIPTION_ID", "carts")]))
                .unwrap();

        assert_eq!(config, SubscriptionConfig::new("carts"));
    }

    #[test]
    fn reads_all_variables() {
        let config = SubscriptionConfig::from_lookup(lookup(&[
            ("CATCHUP_SUBSCRIPTION_ID", "carts"),
            ("CATCHUP_BATCH_SIZE", "50"),
            ("CATCHUP_RESUBSCRIBE_DELAY_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.resubscribe_delay, Duration::from_millis(250));
    }

    #[test]
    fn missing_id_is_a_configuration_error() {
        let result = SubscriptionConfig::from_lookup(lookup(&[("CATCHUP_BATCH_SIZE", "5")]));
        assert!(matches!(result, Err(ProjectionError::Configuration(_))));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let result = SubscriptionConfig::from_lookup(lookup(&[
            ("CATCHUP_SUBSCRIPTION_ID", "carts"),
            ("CATCHUP_BATCH_SIZE", "many"),
        ]));
        assert!(
            matches!(result, Err(ProjectionError::Configuration(msg)) if msg.contains("CATCHUP_BATCH_SIZE"))
        );
    }
}

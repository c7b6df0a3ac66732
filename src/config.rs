use crate::domain::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Price per unit used to compute batch investment.
    pub unit_price: Decimal,
    /// Percent of the total investment fronted by the operator.
    pub operator_investment_pct: u32,
    /// Agent id that represents the operator in sponsor chains.
    pub operator_agent_id: i64,
    /// Dwell before a RELEASED tranche is swept to IN_TRANSIT.
    pub tranche_dwell_secs: i64,
    /// Interval between runs of the release sweep.
    pub tranche_sweep_secs: u64,
    pub outbox_poll_secs: u64,
    pub outbox_batch_size: i64,
    pub outbox_max_retries: i32,
    /// Cap on the exponential publish-failure backoff.
    pub outbox_backoff_cap_secs: u64,
    /// Processed outbox messages older than this many days are deleted.
    pub outbox_retention_days: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn parse_var<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
    expectation: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string()))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_var(&env_map, "PORT", "8080", "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let unit_price: Decimal =
            parse_var(&env_map, "UNIT_PRICE", "2400", "must be a decimal number")?;
        if !unit_price.is_positive() {
            return Err(ConfigError::InvalidValue(
                "UNIT_PRICE".to_string(),
                "must be positive".to_string(),
            ));
        }

        let operator_investment_pct: u32 = parse_var(
            &env_map,
            "OPERATOR_INVESTMENT_PCT",
            "50",
            "must be an integer percentage",
        )?;
        if operator_investment_pct > 100 {
            return Err(ConfigError::InvalidValue(
                "OPERATOR_INVESTMENT_PCT".to_string(),
                "must be between 0 and 100".to_string(),
            ));
        }

        Ok(Config {
            port,
            database_path,
            unit_price,
            operator_investment_pct,
            operator_agent_id: parse_var(
                &env_map,
                "OPERATOR_AGENT_ID",
                "1",
                "must be a valid i64",
            )?,
            tranche_dwell_secs: parse_var(
                &env_map,
                "TRANCHE_DWELL_SECS",
                "7200",
                "must be a valid i64",
            )?,
            tranche_sweep_secs: parse_var(
                &env_map,
                "TRANCHE_SWEEP_SECS",
                "60",
                "must be a valid u64",
            )?,
            outbox_poll_secs: parse_var(
                &env_map,
                "OUTBOX_POLL_SECS",
                "5",
                "must be a valid u64",
            )?,
            outbox_batch_size: parse_var(
                &env_map,
                "OUTBOX_BATCH_SIZE",
                "20",
                "must be a valid i64",
            )?,
            outbox_max_retries: parse_var(
                &env_map,
                "OUTBOX_MAX_RETRIES",
                "3",
                "must be a valid i32",
            )?,
            outbox_backoff_cap_secs: parse_var(
                &env_map,
                "OUTBOX_BACKOFF_CAP_SECS",
                "60",
                "must be a valid u64",
            )?,
            outbox_retention_days: parse_var(
                &env_map,
                "OUTBOX_RETENTION_DAYS",
                "7",
                "must be a valid i64",
            )?,
        })
    }
}

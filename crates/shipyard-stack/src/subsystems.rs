//! Optional subsystem resolution.
//!
//! Each flag in the configuration is turned into a [`Toggle`] (or
//! [`NetworkMode`]) once, before any node is declared. Components match on
//! the resolved choice and never look at the raw flags.

use serde::Serialize;
use shipyard_config::AppConfig;
use shipyard_core::{NetworkMode, Toggle};
use tracing::info;

/// Parameters of the managed database cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseParams {
    pub engine: String,
    pub engine_mode: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub username: String,
    #[serde(skip)]
    pub password: String,
    pub database_name: String,
    pub skip_final_snapshot: bool,
}

/// Parameters of the backup plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupParams {
    pub secondary_region: String,
    pub schedule: String,
    pub start_window_minutes: u32,
    pub completion_window_minutes: u32,
}

impl BackupParams {
    pub const DAILY_SCHEDULE: &'static str = "cron(0 5 ? * * *)";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subsystems {
    pub network: NetworkMode,
    pub database: Toggle<DatabaseParams>,
    pub backup: Toggle<BackupParams>,
}

impl Subsystems {
    pub fn resolve(config: &AppConfig) -> Self {
        let network = NetworkMode::from_flag(config.create_vpc);
        let database = Toggle::from_flag(config.db.create_database, || DatabaseParams {
            engine: "aurora-mysql".to_string(),
            engine_mode: "serverless".to_string(),
            min_capacity: 1,
            max_capacity: 4,
            username: config.db.credentials.username.clone(),
            password: config.db.credentials.password.clone(),
            database_name: config.db.credentials.database_name.clone(),
            skip_final_snapshot: config.db.skip_final_snapshot,
        });
        let backup = Toggle::from_flag(config.backup.enabled, || BackupParams {
            secondary_region: config.backup.secondary_region.clone(),
            schedule: BackupParams::DAILY_SCHEDULE.to_string(),
            start_window_minutes: 480,
            completion_window_minutes: 10080,
        });

        info!(
            custom_network = matches!(network, NetworkMode::Custom { .. }),
            database = database.is_enabled(),
            backup = backup.is_enabled(),
            "resolved subsystems"
        );

        Self {
            network,
            database,
            backup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::new("app-name", "us-east-1")
    }

    #[test]
    fn test_all_disabled_by_default() {
        let subsystems = Subsystems::resolve(&config());
        assert_eq!(subsystems.network, NetworkMode::Default);
        assert!(!subsystems.database.is_enabled());
        assert!(!subsystems.backup.is_enabled());
    }

    #[test]
    fn test_enabled_subsystems_carry_params() {
        let mut config = config();
        config.create_vpc = true;
        config.db.create_database = true;
        config.db.credentials.username = "admin".to_string();
        config.backup.enabled = true;

        let subsystems = Subsystems::resolve(&config);
        assert_eq!(
            subsystems.network,
            NetworkMode::Custom {
                cidr: "172.17.0.0/16".to_string()
            }
        );
        match subsystems.database {
            Toggle::Enabled(params) => {
                assert_eq!(params.username, "admin");
                assert_eq!((params.min_capacity, params.max_capacity), (1, 4));
            }
            Toggle::Disabled => panic!("database should be enabled"),
        }
        match subsystems.backup {
            Toggle::Enabled(params) => {
                assert_eq!(params.secondary_region, "us-west-1");
                assert_eq!(params.schedule, "cron(0 5 ? * * *)");
            }
            Toggle::Disabled => panic!("backup should be enabled"),
        }
    }
}

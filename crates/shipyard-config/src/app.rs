//! Application stack configuration parsing.

use kdl::{KdlDocument, KdlNode};
use regex::Regex;
use serde::Serialize;
use shipyard_core::event::EventPattern;
use shipyard_core::release::ReleasePolicy;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::{ConfigError, ConfigResult, VariableContext};

static APP_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap());

/// Fully parsed stack configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub app_name: String,
    pub region: String,
    pub create_vpc: bool,
    pub auto_scaling: AutoScalingConfig,
    pub load_balancer: LoadBalancerConfig,
    pub container: ContainerConfig,
    pub db: DatabaseConfig,
    pub backup: BackupConfig,
    pub release: ReleaseConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoScalingConfig {
    pub min: u32,
    pub max: u32,
    /// Target average CPU utilization, in percent.
    pub cpu_target: f64,
    pub scale_in_cooldown: u32,
    pub scale_out_cooldown: u32,
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 5,
            cpu_target: 65.0,
            scale_in_cooldown: 30,
            scale_out_cooldown: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancerConfig {
    pub port: u16,
    pub health_check: HealthCheckConfig,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            health_check: HealthCheckConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckConfig {
    pub path: String,
    pub interval: u32,
    pub protocol: String,
    pub timeout: u32,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/alb-status".to_string(),
            interval: 30,
            protocol: "HTTP".to_string(),
            timeout: 5,
            unhealthy_threshold: 2,
            healthy_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerConfig {
    pub port: u16,
    pub cpu: u32,
    pub memory: u32,
    pub environment: Vec<EnvVar>,
    pub mount_points: Vec<MountPoint>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            cpu: 256,
            memory: 512,
            environment: Vec::new(),
            mount_points: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseConfig {
    pub create_database: bool,
    pub credentials: DbCredentials,
    pub skip_final_snapshot: bool,
}

#[derive(Clone, Default, Serialize)]
pub struct DbCredentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database_name: String,
}

impl std::fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("database_name", &self.database_name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupConfig {
    pub enabled: bool,
    pub secondary_region: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secondary_region: "us-west-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseConfig {
    pub termination_wait_minutes: u32,
}

impl ReleaseConfig {
    /// Longest wait the release engine accepts (two days).
    pub const MAX_TERMINATION_WAIT_MINUTES: u32 = 2880;

    pub fn policy(&self) -> ReleasePolicy {
        ReleasePolicy {
            termination_wait: Duration::from_secs(u64::from(self.termination_wait_minutes) * 60),
            ..ReleasePolicy::default()
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            termination_wait_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationsConfig {
    pub slack: SlackConfig,
    /// Event patterns by rule name. Empty means the default families.
    pub events: BTreeMap<String, EventPattern>,
}

impl NotificationsConfig {
    /// Configured patterns, or pipeline and deployment state changes when
    /// none are configured.
    pub fn effective_events(&self) -> BTreeMap<String, EventPattern> {
        if !self.events.is_empty() {
            return self.events.clone();
        }
        BTreeMap::from([
            ("CodeDeploy".to_string(), EventPattern::deployment_states()),
            ("CodePipeline".to_string(), EventPattern::pipeline_states()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: String,
    pub username: String,
    pub icon: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            webhook_url:
                "https://hooks.slack.com/services/XXXXXXXXX/XXXXXXXXXX/XXXXXXXXXXXXXXXXXXXXXXXX"
                    .to_string(),
            channel: "#${app.name}".to_string(),
            username: "AWS".to_string(),
            icon: ":fire:".to_string(),
        }
    }
}

impl AppConfig {
    /// Configuration with every optional block at its default.
    pub fn new(app_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            region: region.into(),
            create_vpc: false,
            auto_scaling: AutoScalingConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            container: ContainerConfig::default(),
            db: DatabaseConfig::default(),
            backup: BackupConfig::default(),
            release: ReleaseConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> ConfigResult<()> {
        if !APP_NAME_REGEX.is_match(&self.app_name) {
            return Err(ConfigError::invalid(
                "app name",
                format!(
                    "'{}' must start with a lowercase letter and contain only lowercase letters, digits and dashes",
                    self.app_name
                ),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::MissingField("region".to_string()));
        }

        let scaling = &self.auto_scaling;
        if scaling.min < 1 {
            return Err(ConfigError::invalid("auto-scaling min", "must be at least 1"));
        }
        if scaling.min > scaling.max {
            return Err(ConfigError::invalid(
                "auto-scaling",
                format!("min {} exceeds max {}", scaling.min, scaling.max),
            ));
        }
        if !(scaling.cpu_target > 0.0 && scaling.cpu_target <= 100.0) {
            return Err(ConfigError::invalid(
                "auto-scaling cpu-target",
                format!("{} is not in (0, 100]", scaling.cpu_target),
            ));
        }

        if self.load_balancer.port == 0 {
            return Err(ConfigError::invalid("load-balancer port", "must be non-zero"));
        }
        let hc = &self.load_balancer.health_check;
        if !hc.path.starts_with('/') {
            return Err(ConfigError::invalid("health-check path", "must start with '/'"));
        }
        if hc.interval == 0 || hc.timeout == 0 {
            return Err(ConfigError::invalid(
                "health-check",
                "interval and timeout must be non-zero",
            ));
        }
        if hc.healthy_threshold < 2 || hc.unhealthy_threshold < 2 {
            return Err(ConfigError::invalid(
                "health-check",
                "thresholds must be at least 2",
            ));
        }

        if self.container.port == 0 {
            return Err(ConfigError::invalid("container port", "must be non-zero"));
        }
        if self.container.cpu == 0 || self.container.memory == 0 {
            return Err(ConfigError::invalid(
                "container",
                "cpu and memory must be non-zero",
            ));
        }

        if self.db.create_database {
            let creds = &self.db.credentials;
            for (field, value) in [
                ("db username", &creds.username),
                ("db password", &creds.password),
                ("db database-name", &creds.database_name),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingField(field.to_string()));
                }
            }
        }

        if self.backup.enabled && self.backup.secondary_region == self.region {
            return Err(ConfigError::invalid(
                "backup secondary-region",
                "must differ from the primary region",
            ));
        }

        if self.release.termination_wait_minutes > ReleaseConfig::MAX_TERMINATION_WAIT_MINUTES {
            return Err(ConfigError::invalid(
                "release termination-wait-minutes",
                format!(
                    "must be at most {}",
                    ReleaseConfig::MAX_TERMINATION_WAIT_MINUTES
                ),
            ));
        }

        url::Url::parse(&self.notifications.slack.webhook_url)
            .map_err(|e| ConfigError::invalid("slack webhook-url", e.to_string()))?;

        Ok(())
    }

    /// Substitute variables. Database credentials must resolve completely when
    /// the database is enabled; other values keep unknown variables verbatim.
    pub fn interpolate(&mut self, vars: &VariableContext) -> ConfigResult<()> {
        let vars = vars.for_app(&self.app_name, &self.region);

        for env in &mut self.container.environment {
            env.value = vars.interpolate(&env.value);
        }

        let slack = &mut self.notifications.slack;
        slack.webhook_url = vars.interpolate(&slack.webhook_url);
        slack.channel = vars.interpolate(&slack.channel);
        slack.username = vars.interpolate(&slack.username);
        slack.icon = vars.interpolate(&slack.icon);

        if self.db.create_database {
            let creds = &mut self.db.credentials;
            creds.username = vars.interpolate_required("db username", &creds.username)?;
            creds.password = vars.interpolate_required("db password", &creds.password)?;
            creds.database_name =
                vars.interpolate_required("db database-name", &creds.database_name)?;
        }

        Ok(())
    }
}

/// Parse, interpolate and validate a configuration.
pub fn load_app_config(kdl: &str, vars: &VariableContext) -> ConfigResult<AppConfig> {
    let mut config = parse_app_config(kdl)?;
    config.interpolate(vars)?;
    config.validate()?;
    Ok(config)
}

/// Read and load a configuration file.
pub fn load_app_config_file(path: &Path, vars: &VariableContext) -> ConfigResult<AppConfig> {
    let kdl = std::fs::read_to_string(path)?;
    load_app_config(&kdl, vars)
}

/// Parse a configuration from KDL text, applying defaults for absent blocks.
/// No interpolation or validation happens here.
pub fn parse_app_config(kdl: &str) -> ConfigResult<AppConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut app: Option<(String, String, bool)> = None;
    let mut auto_scaling = AutoScalingConfig::default();
    let mut load_balancer = LoadBalancerConfig::default();
    let mut container = ContainerConfig::default();
    let mut db = DatabaseConfig::default();
    let mut backup = BackupConfig::default();
    let mut release = ReleaseConfig::default();
    let mut notifications = NotificationsConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "app" => {
                if app.is_some() {
                    return Err(ConfigError::Duplicate("app".to_string()));
                }
                let name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("app name".to_string()))?;
                let region = get_string_prop(node, "region")
                    .ok_or_else(|| ConfigError::MissingField("app region".to_string()))?;
                let create_vpc = get_bool_prop(node, "create-vpc").unwrap_or(false);
                app = Some((name, region, create_vpc));
            }
            "auto-scaling" => auto_scaling = parse_auto_scaling(node)?,
            "load-balancer" => load_balancer = parse_load_balancer(node)?,
            "container" => container = parse_container(node)?,
            "db" => db = parse_database(node)?,
            "backup" => {
                backup.enabled = get_bool_prop(node, "enabled").unwrap_or(backup.enabled);
                if let Some(region) = get_string_prop(node, "secondary-region") {
                    backup.secondary_region = region;
                }
            }
            "release" => {
                if let Some(wait) = get_int_prop(node, "termination-wait-minutes")? {
                    release.termination_wait_minutes = wait;
                }
            }
            "notifications" => notifications = parse_notifications(node)?,
            _ => {} // Ignore unknown nodes
        }
    }

    let (app_name, region, create_vpc) =
        app.ok_or_else(|| ConfigError::MissingField("app".to_string()))?;

    Ok(AppConfig {
        app_name,
        region,
        create_vpc,
        auto_scaling,
        load_balancer,
        container,
        db,
        backup,
        release,
        notifications,
    })
}

fn parse_auto_scaling(node: &KdlNode) -> ConfigResult<AutoScalingConfig> {
    let defaults = AutoScalingConfig::default();
    Ok(AutoScalingConfig {
        min: get_int_prop(node, "min")?.unwrap_or(defaults.min),
        max: get_int_prop(node, "max")?.unwrap_or(defaults.max),
        cpu_target: get_float_prop(node, "cpu-target")?.unwrap_or(defaults.cpu_target),
        scale_in_cooldown: get_int_prop(node, "scale-in-cooldown")?
            .unwrap_or(defaults.scale_in_cooldown),
        scale_out_cooldown: get_int_prop(node, "scale-out-cooldown")?
            .unwrap_or(defaults.scale_out_cooldown),
    })
}

fn parse_load_balancer(node: &KdlNode) -> ConfigResult<LoadBalancerConfig> {
    let mut config = LoadBalancerConfig::default();
    if let Some(port) = get_int_prop(node, "port")? {
        config.port = port;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "health-check" {
                let hc = &mut config.health_check;
                if let Some(path) = get_string_prop(child, "path") {
                    hc.path = path;
                }
                if let Some(protocol) = get_string_prop(child, "protocol") {
                    hc.protocol = protocol;
                }
                hc.interval = get_int_prop(child, "interval")?.unwrap_or(hc.interval);
                hc.timeout = get_int_prop(child, "timeout")?.unwrap_or(hc.timeout);
                hc.unhealthy_threshold = get_int_prop(child, "unhealthy-threshold")?
                    .unwrap_or(hc.unhealthy_threshold);
                hc.healthy_threshold =
                    get_int_prop(child, "healthy-threshold")?.unwrap_or(hc.healthy_threshold);
            }
        }
    }

    Ok(config)
}

fn parse_container(node: &KdlNode) -> ConfigResult<ContainerConfig> {
    let defaults = ContainerConfig::default();
    let mut environment: Vec<EnvVar> = Vec::new();
    let mut mount_points = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "env" => {
                    let args = get_all_string_args(child);
                    let [name, value] = args.as_slice() else {
                        return Err(ConfigError::invalid(
                            "container env",
                            "expected a name and a value",
                        ));
                    };
                    if environment.iter().any(|e| &e.name == name) {
                        return Err(ConfigError::Duplicate(format!("container env {}", name)));
                    }
                    environment.push(EnvVar {
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
                "mount" => {
                    let args = get_all_string_args(child);
                    let [source_volume, container_path] = args.as_slice() else {
                        return Err(ConfigError::invalid(
                            "container mount",
                            "expected a volume name and a container path",
                        ));
                    };
                    mount_points.push(MountPoint {
                        source_volume: source_volume.clone(),
                        container_path: container_path.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    Ok(ContainerConfig {
        port: get_int_prop(node, "port")?.unwrap_or(defaults.port),
        cpu: get_int_prop(node, "cpu")?.unwrap_or(defaults.cpu),
        memory: get_int_prop(node, "memory")?.unwrap_or(defaults.memory),
        environment,
        mount_points,
    })
}

fn parse_database(node: &KdlNode) -> ConfigResult<DatabaseConfig> {
    let mut config = DatabaseConfig {
        create_database: get_bool_prop(node, "create-database").unwrap_or(false),
        ..DatabaseConfig::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "username" => {
                    config.credentials.username = get_first_string_arg(child).unwrap_or_default()
                }
                "password" => {
                    config.credentials.password = get_first_string_arg(child).unwrap_or_default()
                }
                "database-name" => {
                    config.credentials.database_name =
                        get_first_string_arg(child).unwrap_or_default()
                }
                "skip-final-snapshot" => {
                    config.skip_final_snapshot = get_first_bool_arg(child).unwrap_or(false)
                }
                _ => {}
            }
        }
    }

    Ok(config)
}

fn parse_notifications(node: &KdlNode) -> ConfigResult<NotificationsConfig> {
    let mut config = NotificationsConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "slack" => {
                    let slack = &mut config.slack;
                    if let Some(url) = get_string_prop(child, "webhook-url") {
                        slack.webhook_url = url;
                    }
                    if let Some(channel) = get_string_prop(child, "channel") {
                        slack.channel = channel;
                    }
                    if let Some(username) = get_string_prop(child, "username") {
                        slack.username = username;
                    }
                    if let Some(icon) = get_string_prop(child, "icon") {
                        slack.icon = icon;
                    }
                }
                "event" => {
                    let (name, pattern) = parse_event_pattern(child)?;
                    if config.events.insert(name.clone(), pattern).is_some() {
                        return Err(ConfigError::Duplicate(format!("event {}", name)));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(config)
}

fn parse_event_pattern(node: &KdlNode) -> ConfigResult<(String, EventPattern)> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("event name".to_string()))?;
    let source = get_string_list_prop(node, "source");
    if source.is_empty() {
        return Err(ConfigError::MissingField(format!("source for event '{}'", name)));
    }

    let mut pattern = EventPattern {
        source,
        detail_type: get_string_list_prop(node, "detail-type"),
        detail: BTreeMap::new(),
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            pattern = pattern.with_detail(child.name().value(), get_all_string_args(child));
        }
    }

    Ok((name, pattern))
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_int_prop<T: TryFrom<i128>>(node: &KdlNode, name: &str) -> ConfigResult<Option<T>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    let int = value
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(name, "expected an integer"))?;
    T::try_from(int)
        .map(Some)
        .map_err(|_| ConfigError::invalid(name, format!("{} is out of range", int)))
}

fn get_float_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<f64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
        .map(Some)
        .ok_or_else(|| ConfigError::invalid(name, "expected a number"))
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().map(|n| n.value() == name).unwrap_or(false))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VariableContextBuilder;

    const FULL: &str = r##"
        app "app-name" region="us-east-1" create-vpc=#false
        auto-scaling min=1 max=5 cpu-target=65 scale-in-cooldown=30 scale-out-cooldown=30
        load-balancer port=80 {
            health-check path="/alb-status" interval=30 protocol="HTTP" timeout=5 unhealthy-threshold=2 healthy-threshold=3
        }
        container port=80 cpu=256 memory=512 {
            env "FOO" "bar"
            mount "efs-vol" "/var/www"
        }
        db create-database=#true {
            username "${env.DB_USERNAME}"
            password "${env.DB_PASSWORD}"
            database-name "${env.DB_NAME}"
            skip-final-snapshot #true
        }
        backup enabled=#false secondary-region="us-west-1"
        release termination-wait-minutes=5
        notifications {
            slack webhook-url="https://hooks.slack.com/services/T000/B000/XXXX" channel="#app-name" username="AWS" icon=":fire:"
            event "CodePipeline" source="aws.codepipeline" detail-type="CodePipeline Pipeline Execution State Change" {
                state "STARTED" "SUCCEEDED" "FAILED" "CANCELED"
            }
        }
    "##;

    fn db_env() -> VariableContext {
        VariableContextBuilder::new()
            .with_env("DB_USERNAME", "admin")
            .with_env("DB_PASSWORD", "hunter2")
            .with_env("DB_NAME", "app")
            .build()
    }

    #[test]
    fn test_parse_full_config() {
        let config = load_app_config(FULL, &db_env()).unwrap();

        assert_eq!(config.app_name, "app-name");
        assert_eq!(config.region, "us-east-1");
        assert!(!config.create_vpc);
        assert_eq!(config.auto_scaling.cpu_target, 65.0);
        assert_eq!(config.load_balancer.health_check.path, "/alb-status");
        assert_eq!(config.container.environment[0].name, "FOO");
        assert_eq!(config.container.mount_points[0].container_path, "/var/www");
        assert!(config.db.create_database);
        assert!(config.db.skip_final_snapshot);
        assert_eq!(config.db.credentials.username, "admin");
        assert_eq!(config.db.credentials.password, "hunter2");
        assert!(!config.backup.enabled);
        assert_eq!(config.release.policy().termination_wait_minutes(), 5);

        let slack = &config.notifications.slack;
        assert_eq!(slack.channel, "#app-name");
        assert_eq!(slack.username, "AWS");
        assert_eq!(slack.icon, ":fire:");

        let events = config.notifications.effective_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events["CodePipeline"].detail["state"].len(), 4);
    }

    #[test]
    fn test_defaults_for_minimal_config() {
        let config = load_app_config(
            r#"app "shop" region="eu-west-1""#,
            &VariableContext::new(),
        )
        .unwrap();

        assert_eq!(config.auto_scaling, AutoScalingConfig::default());
        assert_eq!(config.load_balancer.port, 80);
        assert_eq!(config.container.cpu, 256);
        assert!(!config.db.create_database);
        assert_eq!(config.backup.secondary_region, "us-west-1");
        assert_eq!(config.notifications.slack.channel, "#shop");

        let events = config.notifications.effective_events();
        assert_eq!(
            events.keys().collect::<Vec<_>>(),
            vec!["CodeDeploy", "CodePipeline"]
        );
    }

    #[test]
    fn test_missing_app_node() {
        let result = parse_app_config("container port=80");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_duplicate_app_node() {
        let result = parse_app_config(
            r#"
            app "a" region="us-east-1"
            app "b" region="us-east-1"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_unresolved_credential() {
        let vars = VariableContextBuilder::new()
            .with_env("DB_USERNAME", "admin")
            .build();
        let result = load_app_config(FULL, &vars);
        assert!(matches!(
            result,
            Err(ConfigError::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_credentials_ignored_without_database() {
        let kdl = r#"
            app "app-name" region="us-east-1"
            db create-database=#false {
                password "${env.NOT_SET}"
            }
        "#;
        assert!(load_app_config(kdl, &VariableContext::new()).is_ok());
    }

    #[test]
    fn test_rejects_min_above_max() {
        let kdl = r#"
            app "app-name" region="us-east-1"
            auto-scaling min=6 max=5
        "#;
        let err = load_app_config(kdl, &VariableContext::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        let kdl = r#"
            app "app-name" region="us-east-1"
            container port=70000
        "#;
        assert!(parse_app_config(kdl).is_err());

        let zero = r#"
            app "app-name" region="us-east-1"
            load-balancer port=0
        "#;
        assert!(parse_app_config(zero).unwrap().validate().is_err());
    }

    #[test]
    fn test_rejects_bad_app_name() {
        let kdl = r#"app "App_Name" region="us-east-1""#;
        assert!(load_app_config(kdl, &VariableContext::new()).is_err());
    }

    #[test]
    fn test_rejects_cpu_target_out_of_range() {
        let kdl = r#"
            app "app-name" region="us-east-1"
            auto-scaling cpu-target=120
        "#;
        assert!(load_app_config(kdl, &VariableContext::new()).is_err());
    }

    #[test]
    fn test_rejects_low_health_threshold() {
        let kdl = r#"
            app "app-name" region="us-east-1"
            load-balancer {
                health-check healthy-threshold=1
            }
        "#;
        assert!(load_app_config(kdl, &VariableContext::new()).is_err());
    }

    #[test]
    fn test_rejects_invalid_webhook() {
        let kdl = r#"
            app "app-name" region="us-east-1"
            notifications {
                slack webhook-url="not a url"
            }
        "#;
        let err = load_app_config(kdl, &VariableContext::new()).unwrap_err();
        assert!(err.to_string().contains("webhook-url"));
    }

    #[test]
    fn test_duplicate_event_name() {
        let kdl = r#"
            app "app-name" region="us-east-1"
            notifications {
                event "Deploys" source="aws.codedeploy"
                event "Deploys" source="aws.codedeploy"
            }
        "#;
        assert!(matches!(
            parse_app_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_credentials_debug_is_masked() {
        let config = load_app_config(FULL, &db_env()).unwrap();
        let debug = format!("{:?}", config.db.credentials);
        assert!(!debug.contains("hunter2"));
    }
}

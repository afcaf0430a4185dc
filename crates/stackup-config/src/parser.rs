//! KDL parser for stack files
//!
//! ```kdl
//! deployment "newsbuddy" region="us-east-1" key-dir="./keys"
//!
//! security-group {
//!     ingress 22 cidr="0.0.0.0/0" description="SSH"
//!     ingress 80
//! }
//!
//! instance {
//!     image "ami-0c02fb55956c7d316"
//!     type "t3.medium"
//!     volume-size 30
//! }
//!
//! target-group "frontend" port=3000
//! target-group "backend" port=5000 priority=100 {
//!     routes "/api/*" "/health"
//!     health-check "/health" interval=30 timeout=10
//! }
//!
//! timing {
//!     instance-timeout 600
//!     grace-period 300
//! }
//! ```
//!
//! Anything left out keeps its built-in default. `ingress` and
//! `target-group` nodes replace the default lists instead of extending them.

use crate::error::{ConfigError, Result};
use kdl::{KdlDocument, KdlNode, KdlValue};
use stackup_cloud::{DeploymentConfig, IngressRule, RetryPolicy, TargetGroupSettings, Timing};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parse a stack document. Relative paths stay relative.
pub fn parse_stack_str(content: &str) -> Result<DeploymentConfig> {
    let doc: KdlDocument = content.parse()?;

    // The deployment name seeds derived defaults, so it goes first.
    let mut config = match doc.nodes().iter().find(|n| n.name().value() == "deployment") {
        Some(node) => {
            let name = string_arg(node, 0)?.ok_or_else(|| {
                ConfigError::invalid("deployment", "a deployment name is required")
            })?;
            let mut config = DeploymentConfig::named(name);
            if let Some(region) = string_prop(node, "region")? {
                config.region = region;
            }
            if let Some(key_dir) = string_prop(node, "key-dir")? {
                config.key_dir = PathBuf::from(key_dir);
            }
            config
        }
        None => DeploymentConfig::default(),
    };

    let mut target_groups = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "deployment" => {}
            "security-group" => parse_security_group(node, &mut config)?,
            "instance" => parse_instance(node, &mut config)?,
            "load-balancer" => parse_load_balancer(node, &mut config)?,
            "target-group" => target_groups.push(parse_target_group(node)?),
            "timing" => parse_timing(node, &mut config.timing)?,
            "retry" => parse_retry(node, &mut config.retry)?,
            other => tracing::warn!(node = %other, "Ignoring unknown stack node"),
        }
    }

    if !target_groups.is_empty() {
        config.target_groups = target_groups;
    }

    Ok(config)
}

/// Parse a stack file. Relative `key-dir` and `boot-script` paths are
/// resolved against the file's directory.
pub fn parse_stack_file(path: &Path) -> Result<DeploymentConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_stack_str(&content)?;

    if let Some(base) = path.parent() {
        if config.key_dir.is_relative() {
            config.key_dir = base.join(&config.key_dir);
        }
        if let Some(script) = config.instance.boot_script.as_mut()
            && script.is_relative()
        {
            *script = base.join(&*script);
        }
    }

    Ok(config)
}

fn parse_security_group(node: &KdlNode, config: &mut DeploymentConfig) -> Result<()> {
    let mut ingress = Vec::new();

    for child in children(node) {
        match child.name().value() {
            "description" => {
                if let Some(description) = string_arg(child, 0)? {
                    config.security_group.description = description;
                }
            }
            "ingress" => {
                let port = port_arg(child)?;
                let cidr = string_prop(child, "cidr")?.unwrap_or_else(|| "0.0.0.0/0".to_string());
                let description =
                    string_prop(child, "description")?.unwrap_or_else(|| format!("Port {}", port));
                ingress.push(IngressRule::new(port, cidr, description));
            }
            "allow-all-egress" => {
                if let Some(value) = bool_arg(child)? {
                    config.security_group.allow_all_egress = value;
                }
            }
            other => tracing::warn!(node = %other, "Ignoring unknown security-group setting"),
        }
    }

    if !ingress.is_empty() {
        config.security_group.ingress = ingress;
    }
    Ok(())
}

fn parse_instance(node: &KdlNode, config: &mut DeploymentConfig) -> Result<()> {
    let instance = &mut config.instance;

    for child in children(node) {
        match child.name().value() {
            "image" => {
                if let Some(image) = string_arg(child, 0)? {
                    instance.image_id = image;
                }
            }
            "type" => {
                if let Some(instance_type) = string_arg(child, 0)? {
                    instance.instance_type = instance_type;
                }
            }
            "volume-size" => {
                if let Some(size) = u32_arg(child)? {
                    instance.volume_size_gib = size;
                }
            }
            "ssh-user" => {
                if let Some(user) = string_arg(child, 0)? {
                    instance.ssh_user = user;
                }
            }
            "boot-script" => {
                instance.boot_script = string_arg(child, 0)?.map(PathBuf::from);
            }
            "repository" => {
                instance.repository = string_arg(child, 0)?;
            }
            other => tracing::warn!(node = %other, "Ignoring unknown instance setting"),
        }
    }
    Ok(())
}

fn parse_load_balancer(node: &KdlNode, config: &mut DeploymentConfig) -> Result<()> {
    let lb = &mut config.load_balancer;

    for child in children(node) {
        match child.name().value() {
            "listener-port" => lb.listener_port = port_arg(child)?,
            "internet-facing" => {
                if let Some(value) = bool_arg(child)? {
                    lb.internet_facing = value;
                }
            }
            "subnets" => {
                if let Some(count) = u32_arg(child)? {
                    lb.subnet_count = count as usize;
                }
            }
            other => tracing::warn!(node = %other, "Ignoring unknown load-balancer setting"),
        }
    }
    Ok(())
}

fn parse_target_group(node: &KdlNode) -> Result<TargetGroupSettings> {
    let name = string_arg(node, 0)?
        .ok_or_else(|| ConfigError::invalid("target-group", "a target group name is required"))?;
    let port = match prop(node, "port") {
        Some(value) => to_port("target-group", value)?,
        None => {
            return Err(ConfigError::invalid(
                "target-group",
                format!("'{}' needs port=<number>", name),
            ));
        }
    };

    let mut tg = TargetGroupSettings::new(name, port);
    if let Some(value) = prop(node, "priority") {
        tg.priority = Some(to_u32("priority", value)?);
    }

    for child in children(node) {
        match child.name().value() {
            "routes" => {
                tg.routes = child
                    .entries()
                    .iter()
                    .filter(|e| e.name().is_none())
                    .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
                    .collect();
            }
            "priority" => tg.priority = u32_arg(child)?,
            "health-check" => {
                let hc = &mut tg.health_check;
                if let Some(path) = string_arg(child, 0)? {
                    hc.path = path;
                }
                if let Some(value) = prop(child, "port") {
                    hc.port = to_port("health-check", value)?;
                }
                if let Some(value) = prop(child, "interval") {
                    hc.interval_secs = to_u32("interval", value)?;
                }
                if let Some(value) = prop(child, "timeout") {
                    hc.timeout_secs = to_u32("timeout", value)?;
                }
                if let Some(value) = prop(child, "healthy") {
                    hc.healthy_threshold = to_u32("healthy", value)?;
                }
                if let Some(value) = prop(child, "unhealthy") {
                    hc.unhealthy_threshold = to_u32("unhealthy", value)?;
                }
            }
            other => tracing::warn!(node = %other, "Ignoring unknown target-group setting"),
        }
    }

    Ok(tg)
}

fn parse_timing(node: &KdlNode, timing: &mut Timing) -> Result<()> {
    for child in children(node) {
        let name = child.name().value();
        match name {
            "pre-clean" => {
                if let Some(value) = bool_arg(child)? {
                    timing.pre_clean = value;
                }
            }
            "proceed-on-timeout" => {
                if let Some(value) = bool_arg(child)? {
                    timing.proceed_on_timeout = value;
                }
            }
            _ => {
                let slot = match name {
                    "settle-after-clean" => &mut timing.settle_after_clean,
                    "instance-timeout" => &mut timing.instance_timeout,
                    "grace-period" => &mut timing.grace_period,
                    "settle-after-load-balancer" => &mut timing.settle_after_load_balancer,
                    "settle-after-instance" => &mut timing.settle_after_instance,
                    "poll-initial-delay" => &mut timing.poll_initial_delay,
                    "poll-max-delay" => &mut timing.poll_max_delay,
                    other => {
                        tracing::warn!(node = %other, "Ignoring unknown timing setting");
                        continue;
                    }
                };
                if let Some(seconds) = u32_arg(child)? {
                    *slot = Duration::from_secs(u64::from(seconds));
                }
            }
        }
    }
    Ok(())
}

fn parse_retry(node: &KdlNode, retry: &mut RetryPolicy) -> Result<()> {
    for child in children(node) {
        match child.name().value() {
            "max-attempts" => {
                if let Some(value) = u32_arg(child)? {
                    retry.max_attempts = value;
                }
            }
            "initial-delay-ms" => {
                if let Some(value) = u32_arg(child)? {
                    retry.initial_delay = Duration::from_millis(u64::from(value));
                }
            }
            "max-delay-ms" => {
                if let Some(value) = u32_arg(child)? {
                    retry.max_delay = Duration::from_millis(u64::from(value));
                }
            }
            "multiplier" => {
                if let Some(entry) = child.entries().first() {
                    // Integer or float
                    if let Some(value) = entry.value().as_float() {
                        retry.backoff_multiplier = value as f32;
                    } else if let Some(value) = entry.value().as_integer() {
                        retry.backoff_multiplier = value as f32;
                    }
                }
            }
            other => tracing::warn!(node = %other, "Ignoring unknown retry setting"),
        }
    }
    Ok(())
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn arg(node: &KdlNode, index: usize) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(index)
        .map(|e| e.value())
}

fn prop<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .map(|e| e.value())
}

fn string_arg(node: &KdlNode, index: usize) -> Result<Option<String>> {
    match arg(node, index) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| ConfigError::invalid(node.name().value(), "expected a string")),
    }
}

fn string_prop(node: &KdlNode, key: &str) -> Result<Option<String>> {
    match prop(node, key) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| ConfigError::invalid(key, "expected a string")),
    }
}

fn bool_arg(node: &KdlNode) -> Result<Option<bool>> {
    match arg(node, 0) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(node.name().value(), "expected #true or #false")),
    }
}

fn u32_arg(node: &KdlNode) -> Result<Option<u32>> {
    arg(node, 0)
        .map(|value| to_u32(node.name().value(), value))
        .transpose()
}

fn port_arg(node: &KdlNode) -> Result<u16> {
    let value = arg(node, 0)
        .ok_or_else(|| ConfigError::invalid(node.name().value(), "a port number is required"))?;
    to_port(node.name().value(), value)
}

fn to_u32(name: &str, value: &KdlValue) -> Result<u32> {
    let number = value
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(name, "expected an integer"))?;
    u32::try_from(number)
        .map_err(|_| ConfigError::invalid(name, format!("{} is out of range", number)))
}

fn to_port(name: &str, value: &KdlValue) -> Result<u16> {
    let number = value
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(name, "expected a port number"))?;
    match u16::try_from(number) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::invalid(
            name,
            format!("{} is not a valid port", number),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = parse_stack_str("").unwrap();
        assert_eq!(config, DeploymentConfig::default());
    }

    #[test]
    fn test_deployment_node() {
        let config =
            parse_stack_str(r#"deployment "shop" region="eu-west-1" key-dir="./keys""#).unwrap();

        assert_eq!(config.name, "shop");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.key_dir, PathBuf::from("./keys"));
        assert_eq!(config.security_group.description, "Security group for shop");
    }

    #[test]
    fn test_full_document() {
        let kdl = r#"
deployment "shop"

security-group {
    description "shop firewall"
    ingress 22 cidr="203.0.113.0/24" description="Office SSH"
    ingress 80
    ingress 8080
    allow-all-egress #false
}

instance {
    image "ami-0123456789abcdef0"
    type "t3.small"
    volume-size 20
    ssh-user "ubuntu"
    boot-script "boot.sh"
}

load-balancer {
    listener-port 80
    internet-facing #false
    subnets 3
}

target-group "web" port=8080 {
    health-check "/ready" interval=15 timeout=5 healthy=3 unhealthy=4
}

timing {
    pre-clean #false
    instance-timeout 120
    grace-period 0
    proceed-on-timeout #false
}

retry {
    max-attempts 5
    initial-delay-ms 250
    max-delay-ms 4000
    multiplier 1.5
}
"#;
        let config = parse_stack_str(kdl).unwrap();

        assert_eq!(config.security_group.description, "shop firewall");
        assert_eq!(config.security_group.ingress.len(), 3);
        assert_eq!(config.security_group.ingress[0].cidr, "203.0.113.0/24");
        assert_eq!(config.security_group.ingress[1].cidr, "0.0.0.0/0");
        assert!(!config.security_group.allow_all_egress);

        assert_eq!(config.instance.instance_type, "t3.small");
        assert_eq!(config.instance.volume_size_gib, 20);
        assert_eq!(config.instance.ssh_user, "ubuntu");
        assert_eq!(config.instance.boot_script, Some(PathBuf::from("boot.sh")));

        assert!(!config.load_balancer.internet_facing);
        assert_eq!(config.load_balancer.subnet_count, 3);

        assert_eq!(config.target_groups.len(), 1);
        let web = &config.target_groups[0];
        assert_eq!(web.port, 8080);
        assert_eq!(web.health_check.port, 8080);
        assert_eq!(web.health_check.path, "/ready");
        assert_eq!(web.health_check.interval_secs, 15);
        assert_eq!(web.health_check.unhealthy_threshold, 4);

        assert!(!config.timing.pre_clean);
        assert!(!config.timing.proceed_on_timeout);
        assert_eq!(config.timing.instance_timeout, Duration::from_secs(120));
        assert_eq!(config.timing.grace_period, Duration::ZERO);

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.backoff_multiplier, 1.5);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_routed_target_group() {
        let kdl = r#"
target-group "frontend" port=3000
target-group "backend" port=5000 priority=100 {
    routes "/api/*" "/health"
}
"#;
        let config = parse_stack_str(kdl).unwrap();

        assert_eq!(config.target_groups.len(), 2);
        let backend = &config.target_groups[1];
        assert_eq!(backend.priority, Some(100));
        assert_eq!(backend.routes, vec!["/api/*", "/health"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_target_group_requires_port() {
        let err = parse_stack_str(r#"target-group "web""#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(parse_stack_str("security-group { ingress 70000 }").is_err());
        assert!(parse_stack_str(r#"instance { volume-size "big" }"#).is_err());
        assert!(parse_stack_str("timing { pre-clean 1 }").is_err());
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_stack_str("deployment \"unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::KdlParse(_)));
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let config = parse_stack_str("dashboard { port 8080 }").unwrap();
        assert_eq!(config, DeploymentConfig::default());
    }

    #[test]
    fn test_file_paths_resolve_against_stack_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.kdl");
        std::fs::write(
            &path,
            "deployment \"shop\" key-dir=\"keys\"\ninstance { boot-script \"boot.sh\" }\n",
        )
        .unwrap();

        let config = parse_stack_file(&path).unwrap();
        assert_eq!(config.key_dir, dir.path().join("keys"));
        assert_eq!(config.instance.boot_script, Some(dir.path().join("boot.sh")));
    }
}

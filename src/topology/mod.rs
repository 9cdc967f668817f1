//! Cart Service Topology
//!
//! The fixed five-resource stack: a network, an access rule admitting one
//! caller to the database port, a postgres database, the compute function
//! serving the cart application, and the HTTP endpoint in front of it.
//!
//! ```text
//! cart-network -> cart-access-rule -> cart-database -> cart-function -> cart-api
//! ```

pub mod bundle;
pub mod settings;

pub use bundle::{BundleOptions, Bundler, DirectoryBundler, Package};
pub use settings::{EnvSource, MapSource, SecretSource, ServiceSettings};

use crate::error::GraphError;
use crate::graph::{ConfigValue, Resource, ResourceKind, Topology};
use anyhow::Context;
use std::path::Path;

pub const TOPOLOGY_NAME: &str = "cart-service";

pub const NETWORK: &str = "cart-network";
pub const ACCESS_RULE: &str = "cart-access-rule";
pub const DATABASE: &str = "cart-database";
pub const FUNCTION: &str = "cart-function";
pub const ENDPOINT: &str = "cart-api";

/// Declare the cart topology from already-read settings and a built package
pub fn define(settings: &ServiceSettings, package: &Package) -> Result<Topology, GraphError> {
    let mut topology = Topology::new(TOPOLOGY_NAME);

    let network = topology.declare(
        Resource::new(NETWORK, ResourceKind::Network)
            .with("cidr_block", settings.network_cidr.as_str())
            .with("max_azs", 1u32)
            .with(
                "subnets",
                ConfigValue::list([ConfigValue::map([
                    ("name", ConfigValue::from("public")),
                    ("type", ConfigValue::from("public")),
                    ("cidr_mask", ConfigValue::from(24u32)),
                ])]),
            ),
    )?;

    let rule = topology.declare(
        Resource::new(ACCESS_RULE, ResourceKind::AccessRule)
            .with("network_id", network.attr("network_id"))
            .with("description", "Database access for the cart service")
            .with("allow_all_outbound", true)
            .with(
                "ingress",
                ConfigValue::list([ConfigValue::map([
                    ("protocol", ConfigValue::from("tcp")),
                    ("port", ConfigValue::from(settings.db_port)),
                    ("source", ConfigValue::from(settings.allowed_source.as_str())),
                ])]),
            )
            .depends_on(&network),
    )?;

    let database = topology.declare(
        Resource::new(DATABASE, ResourceKind::Database)
            .with("engine", "postgres")
            .with("instance_class", "t3.micro")
            .with("network_id", network.attr("network_id"))
            .with("subnet_type", "public")
            .with("access_rule_ids", ConfigValue::list([rule.attr("rule_id")]))
            .with("multi_az", false)
            .with("iam_authentication", false)
            .with("allocated_storage", 20u32)
            .with("max_allocated_storage", 100u32)
            .with("delete_automated_backups", true)
            .with("deletion_protection", false)
            .with("removal_policy", "destroy")
            .with("database_name", settings.db_name.as_str())
            .with("port", settings.db_port)
            .with(
                "credentials",
                ConfigValue::map([
                    ("generated", ConfigValue::from(true)),
                    ("username", ConfigValue::from(settings.db_admin_username.as_str())),
                ]),
            ),
    )?;

    let function = topology.declare(
        Resource::new(FUNCTION, ResourceKind::ComputeFunction)
            .with("runtime", "nodejs20.x")
            .with("handler", package.handler.as_str())
            .with("network_id", network.attr("network_id"))
            .with("subnet_type", "public")
            .with("access_rule_ids", ConfigValue::list([rule.attr("rule_id")]))
            .with("package", package.to_config())
            .with(
                "environment",
                ConfigValue::map([
                    ("DB_HOST", ConfigValue::from(database.attr("address"))),
                    ("DB_PORT", ConfigValue::from(settings.db_port.to_string())),
                    ("DB_USER", ConfigValue::from(settings.db_user.as_str())),
                    ("DB_PASSWORD", ConfigValue::sensitive(settings.db_password.as_str())),
                    ("DB_NAME", ConfigValue::from(settings.db_name.as_str())),
                ]),
            ),
    )?;

    topology.declare(
        Resource::new(ENDPOINT, ResourceKind::HttpEndpoint)
            .with("name", "Nest Service")
            .with("description", "This service serves a Nest.js application.")
            .with(
                "routes",
                ConfigValue::list([ConfigValue::map([
                    ("method", ConfigValue::from("ANY")),
                    ("path", ConfigValue::from("/")),
                    ("target", ConfigValue::from(function.attr("invoke_arn"))),
                ])]),
            ),
    )?;

    tracing::debug!(resources = topology.len(), "Cart topology declared");
    Ok(topology)
}

/// Read settings from `source`, package `source_dir`, then declare the topology
pub fn from_environment(
    source: &dyn SecretSource,
    bundler: &dyn Bundler,
    source_dir: &Path,
) -> anyhow::Result<Topology> {
    let settings = ServiceSettings::from_source(source)?;
    let package = bundler
        .package(source_dir)
        .with_context(|| format!("Failed to package handler from {}", source_dir.display()))?;
    Ok(define(&settings, &package)?)
}

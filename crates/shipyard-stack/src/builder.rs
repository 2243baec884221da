//! Whole-stack graph assembly.

use shipyard_config::AppConfig;
use shipyard_core::access::AccessRule;
use shipyard_core::notify::NotificationSink;
use shipyard_core::{Error, NodeId, Result, Toggle};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::binder::SecurityGroupBinder;
use crate::components::backup::{self, Backup};
use crate::components::bulk_copy::{self, BulkCopy};
use crate::components::compute::{self, ComputeCluster, ComputeInputs};
use crate::components::database::{self, Database};
use crate::components::filesystem::{self, SharedFilesystem};
use crate::components::load_balancer::{self, LoadBalancer};
use crate::components::network::{self, Network};
use crate::components::notifications::{self, Notifications};
use crate::components::pipeline::{self, ReleasePipeline};
use crate::components::providers::{self, Providers};
use crate::components::registry::{self, Registry};
use crate::components::release::{self, ReleaseDeclaration};
use crate::graph::ResourceGraph;
use crate::naming::Naming;
use crate::router::NotificationRouter;
use crate::subsystems::Subsystems;

/// A built stack: the graph plus handles to every component in it.
#[derive(Debug, Clone)]
pub struct Stack {
    pub graph: ResourceGraph,
    pub subsystems: Subsystems,
    pub providers: Providers,
    pub network: Network,
    pub registry: Registry,
    pub load_balancer: LoadBalancer,
    pub filesystem: SharedFilesystem,
    pub bulk_copy: BulkCopy,
    pub database: Toggle<Database>,
    pub compute: ComputeCluster,
    /// Inbound rules of every patched security group.
    pub bindings: BTreeMap<NodeId, Vec<AccessRule>>,
    pub release: ReleaseDeclaration,
    pub pipeline: ReleasePipeline,
    pub backup: Toggle<Backup>,
    pub notifications: Notifications,
}

impl Stack {
    /// Router over the declared notification rules.
    pub fn router(&self, sink: Arc<dyn NotificationSink>) -> NotificationRouter {
        NotificationRouter::new(self.notifications.patterns(), sink)
    }
}

pub struct GraphBuilder<'a> {
    config: &'a AppConfig,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self { config }
    }

    /// Declare every component in dependency order. The first failing
    /// declaration aborts the build.
    pub fn build(&self) -> Result<Stack> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let naming = Naming::new(config.app_name.as_str());
        let subsystems = Subsystems::resolve(config);
        let mut graph = ResourceGraph::new(config.app_name.as_str());
        let mut binder = SecurityGroupBinder::new();

        info!(app = %config.app_name, region = %config.region, "building stack");

        let providers = providers::declare(&mut graph, &naming, &config.region)?;
        let network = network::declare(&mut graph, &naming, &config.region, &subsystems.network)?;
        let registry = registry::declare(&mut graph, &naming)?;
        let load_balancer = load_balancer::declare(
            &mut graph,
            &naming,
            &mut binder,
            &network,
            &config.load_balancer,
        )?;
        let filesystem = filesystem::declare(&mut graph, &naming, &mut binder, &network)?;
        let bulk_copy =
            bulk_copy::declare(&mut graph, &naming, &mut binder, &network, &filesystem)?;
        let database = subsystems.database.as_ref().try_map(|params| {
            database::declare(&mut graph, &naming, &mut binder, &network, params)
        })?;
        let compute = compute::declare(
            &mut graph,
            &naming,
            &mut binder,
            ComputeInputs {
                region: &config.region,
                network: &network,
                registry: &registry,
                load_balancer: &load_balancer,
                filesystem: &filesystem,
                database: database.as_ref(),
                container: &config.container,
                auto_scaling: &config.auto_scaling,
            },
        )?;

        let bindings = binder.bind(&mut graph)?;

        let release = release::declare(
            &mut graph,
            &naming,
            &config.release.policy(),
            &registry,
            &load_balancer,
            &compute,
        )?;
        let pipeline = pipeline::declare(&mut graph, &naming, &registry, &release)?;
        let backup = subsystems
            .backup
            .as_ref()
            .try_map(|params| backup::declare(&mut graph, &naming, params, &filesystem))?;
        let notifications = notifications::declare(
            &mut graph,
            &naming,
            &config.notifications.slack,
            &config.notifications.effective_events(),
        )?;

        graph.validate()?;
        info!(
            app = %config.app_name,
            nodes = graph.len(),
            patches = graph.patches().count(),
            fingerprint = %graph.fingerprint(),
            "stack built"
        );

        Ok(Stack {
            graph,
            subsystems,
            providers,
            network,
            registry,
            load_balancer,
            filesystem,
            bulk_copy,
            database,
            compute,
            bindings,
            release,
            pipeline,
            backup,
            notifications,
        })
    }
}

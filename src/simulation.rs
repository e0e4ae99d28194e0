//! Assembly of a runnable simulation from an asset graph.
//!
//! [`Simulation::new`] splits every carrier into trees, instantiates one
//! [`Network`] per tree, checks that no port is written twice and ranks the
//! networks so that every primary conversion clears before the networks
//! reading its flows.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::config::ScenarioConfig;
use crate::error::{SimError, SimResult};
use crate::model::{AssetGraph, ControlStrategy};
use crate::network::allocation::Clearing;
use crate::network::order::{self, RankMap};
use crate::network::{Network, tree};
use crate::nodes::RemoteLogic;
use crate::observation::Publisher;
use crate::sim::context::SimulationContext;
use crate::sim::scheduler::{Scheduler, SharedSimulatable};
use crate::sim::status::SimulationStatus;

/// Identity of one network, as reported by the status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub id: String,
    pub carrier: String,
    pub has_transport: bool,
    pub device_count: usize,
    pub rank: usize,
}

/// Ranked networks plus the run context they share.
pub struct Simulation {
    ctx: SimulationContext,
    networks: Vec<Arc<Mutex<Network>>>,
    summaries: Vec<NetworkSummary>,
    ranks: RankMap,
    status: Arc<SimulationStatus>,
}

impl Simulation {
    /// Builds and ranks every network of `graph`.
    ///
    /// # Arguments
    ///
    /// * `graph` - Validated asset graph
    /// * `ctx` - Settings and collaborators shared by all networks
    ///
    /// # Errors
    ///
    /// Returns a structural [`SimError`] when a profile reference is
    /// unknown, a carrier has no root, a port would be written by two
    /// networks, a conversion's designated port belongs to no network or
    /// the ordering constraints are cyclic.
    pub fn new(graph: &AssetGraph, ctx: SimulationContext) -> SimResult<Self> {
        check_profiles(graph, &ctx)?;

        let mut networks = Vec::new();
        for carrier in graph.carriers() {
            let used = graph
                .assets()
                .iter()
                .any(|a| a.ports.iter().any(|p| p.carrier == carrier.id));
            if !used {
                continue;
            }
            for built in tree::build_forest(graph, carrier)? {
                networks.push(Network::new(graph, built, &ctx)?);
            }
        }

        let mut writers: HashMap<String, String> = HashMap::new();
        for network in &networks {
            for port in network.written_ports() {
                if let Some(first) = writers.get(&port) {
                    if first != network.id() {
                        return Err(SimError::PortWrittenTwice {
                            port,
                            first: first.clone(),
                            second: network.id().to_string(),
                        });
                    }
                    continue;
                }
                writers.insert(port, network.id().to_string());
            }
        }

        let boundaries: Vec<_> = networks
            .iter()
            .enumerate()
            .flat_map(|(i, n)| n.boundaries(i))
            .collect();
        let constraints = order::derive_constraints(&boundaries)?;
        let ids: Vec<String> = networks.iter().map(|n| n.id().to_string()).collect();
        let ranks = order::order_networks(&ids, &constraints)?;

        let mut summaries: Vec<NetworkSummary> = networks
            .iter()
            .map(|n| NetworkSummary {
                id: n.id().to_string(),
                carrier: n.carrier().id.clone(),
                has_transport: n.has_transport(),
                device_count: n.device_count(),
                rank: 0,
            })
            .collect();
        for (rank, members) in &ranks {
            for &i in members {
                summaries[i].rank = *rank;
            }
        }
        info!(
            simulation = %ctx.id,
            networks = networks.len(),
            ranks = ranks.len(),
            "simulation built"
        );

        Ok(Self {
            ctx,
            networks: networks.into_iter().map(|n| Arc::new(Mutex::new(n))).collect(),
            summaries,
            ranks,
            status: Arc::new(SimulationStatus::new()),
        })
    }

    /// Builds a simulation from a scenario file.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] when the scenario does not validate, and
    /// anything [`Simulation::new`] returns.
    pub fn from_config(
        config: &ScenarioConfig,
        publisher: Arc<dyn Publisher>,
        remote: Option<Arc<dyn RemoteLogic>>,
    ) -> SimResult<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(SimError::Config(joined.join("; ")));
        }
        let graph = config.asset_graph()?;
        let mut ctx = SimulationContext::new(
            config.simulation.id.clone(),
            config.settings(),
            Arc::new(config.profile_store()),
            publisher,
        );
        if let Some(logic) = remote {
            ctx = ctx.with_remote(logic);
        }
        Self::new(&graph, ctx)
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn networks(&self) -> &[NetworkSummary] {
        &self.summaries
    }

    pub fn ranks(&self) -> &RankMap {
        &self.ranks
    }

    pub fn status(&self) -> &Arc<SimulationStatus> {
        &self.status
    }

    /// Clearing result of the last step of network `id`.
    pub fn clearing(&self, id: &str) -> Option<Clearing> {
        self.networks
            .iter()
            .map(|n| n.lock())
            .find(|n| n.id() == id)
            .and_then(|n| n.last_clearing())
    }

    /// Runs every step from start to end.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Aborted`] once any network or the emission pass
    /// fails; the status surface then reports the failure.
    pub fn run(&self) -> SimResult<()> {
        let result = self.schedule();
        if let Err(e) = &result {
            if !self.status.is_failed() {
                self.status.fail(e.to_string());
            }
            error!(simulation = %self.ctx.id, error = %e, "simulation aborted");
        }
        result
    }

    fn schedule(&self) -> SimResult<()> {
        let scheduler = Scheduler::new(self.ctx.settings.workers, Arc::clone(&self.status))?;
        let ranks: Vec<Vec<SharedSimulatable>> = self
            .ranks
            .values()
            .map(|members| {
                members
                    .iter()
                    .map(|&i| Arc::clone(&self.networks[i]) as SharedSimulatable)
                    .collect()
            })
            .collect();
        let emissions: SharedSimulatable = Arc::new(Mutex::new(Arc::clone(&self.ctx.emissions)));
        scheduler.run(
            &self.ctx.settings,
            &ranks,
            &[emissions],
            self.ctx.publisher.as_ref(),
        )
    }
}

/// Every profile referenced by a port or a control strategy must exist.
fn check_profiles(graph: &AssetGraph, ctx: &SimulationContext) -> SimResult<()> {
    for asset in graph.assets() {
        let mut referenced: Vec<&String> =
            asset.ports.iter().filter_map(|p| p.profile.as_ref()).collect();
        match &asset.control {
            Some(ControlStrategy::DrivenByProfile { profile, .. }) => referenced.push(profile),
            Some(ControlStrategy::Storage {
                charge_cost_profile,
                discharge_cost_profile,
            }) => referenced.extend(charge_cost_profile.iter().chain(discharge_cost_profile)),
            _ => {}
        }
        if let Some(missing) = referenced.into_iter().find(|p| !ctx.profiles.has_profile(p)) {
            return Err(SimError::UnknownProfile {
                profile: missing.clone(),
                by: asset.id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::model::{Asset, AssetKind, Carrier, CarrierKind, Port, PortDirection};
    use crate::observation::MemoryPublisher;
    use crate::profile::ProfileStore;
    use crate::sim::status::RunState;
    use crate::sim::types::SimulationSettings;

    fn context(profiles: ProfileStore) -> SimulationContext {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let settings =
            SimulationSettings::new(start, start + TimeDelta::hours(2), TimeDelta::hours(1));
        SimulationContext::new("t", settings, Arc::new(profiles), Arc::new(MemoryPublisher::new()))
    }

    fn plant_and_house() -> Vec<Asset> {
        vec![
            Asset::new("plant", AssetKind::Producer { renewable: false })
                .with_power(2.0)
                .with_cost(0.1)
                .with_port(Port::new("plant.out", PortDirection::Out, "heat").connect("house.in")),
            Asset::new("house", AssetKind::Consumer)
                .with_power(1.0)
                .with_cost(0.8)
                .with_port(Port::new("house.in", PortDirection::In, "heat")),
        ]
    }

    #[test]
    fn unknown_profile_is_rejected_at_build_time() {
        let mut assets = plant_and_house();
        assets[1].ports[0].profile = Some("missing".into());
        let graph =
            AssetGraph::new(vec![Carrier::new("heat", CarrierKind::Heat)], assets).unwrap();
        let err = Simulation::new(&graph, context(ProfileStore::new())).err().unwrap();
        assert!(matches!(err, SimError::UnknownProfile { ref by, .. } if by == "house"));
    }

    #[test]
    fn unused_carriers_are_skipped() {
        let graph = AssetGraph::new(
            vec![
                Carrier::new("heat", CarrierKind::Heat),
                Carrier::new("gas", CarrierKind::Gas),
            ],
            plant_and_house(),
        )
        .unwrap();
        let sim = Simulation::new(&graph, context(ProfileStore::new())).unwrap();
        assert_eq!(sim.networks().len(), 1);
        assert_eq!(sim.networks()[0].carrier, "heat");
        assert_eq!(sim.networks()[0].rank, 0);
    }

    #[test]
    fn run_finishes_and_keeps_last_clearing() {
        let graph = AssetGraph::new(
            vec![Carrier::new("heat", CarrierKind::Heat)],
            plant_and_house(),
        )
        .unwrap();
        let sim = Simulation::new(&graph, context(ProfileStore::new())).unwrap();
        sim.run().unwrap();
        assert_eq!(sim.status().state(), RunState::Finished);
        assert!(sim.clearing("heat-0").is_some());
        assert!(sim.clearing("nope").is_none());
    }
}

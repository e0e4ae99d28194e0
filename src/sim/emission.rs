//! Attribution of producer emissions to the consumers they supplied.
//!
//! Networks record who produced and who consumed during a step. Once every
//! network has cleared, producer energy is split proportionally over each
//! network's consumers and energy supplied by intermediate producers (assets
//! that also consume elsewhere, like a boiler) is traced back to the root
//! producers feeding them. Consumers then carry the emission intensity of
//! those roots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::types::{Horizon, Lifecycle, Simulatable};
use crate::error::SimResult;
use crate::observation::{Observation, Publisher};

/// Provider name of emission observations.
pub const EMISSION_PROVIDER: &str = "emission";

/// Upper bound on remapping rounds; deeper chains are treated as cycles.
const MAX_REMAP_ROUNDS: usize = 32;

const SUM_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
struct Supply {
    network: String,
    carrier: String,
    asset: String,
    energy: f64,
    emission: f64,
}

#[derive(Debug, Clone)]
struct Demand {
    network: String,
    carrier: String,
    asset: String,
    energy: f64,
}

/// Consumer asset and carrier.
type ConsumerKey = (String, String);

#[derive(Debug)]
struct Ledger {
    supplies: Vec<Supply>,
    demands: Vec<Demand>,
    /// Energy each consumer received from each producer.
    attributed: BTreeMap<ConsumerKey, Vec<(String, f64)>>,
    lifecycle: Lifecycle,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            supplies: Vec::new(),
            demands: Vec::new(),
            attributed: BTreeMap::new(),
            lifecycle: Lifecycle::Created,
        }
    }
}

impl Ledger {
    fn output_of(&self, producer: &str) -> f64 {
        self.supplies
            .iter()
            .filter(|s| s.asset == producer)
            .map(|s| s.energy)
            .sum()
    }

    fn emission_of(&self, producer: &str) -> f64 {
        self.supplies
            .iter()
            .filter(|s| s.asset == producer)
            .map(|s| s.emission)
            .sum()
    }

    /// Everything the asset received as a consumer, over all carriers.
    fn upstream_of(&self, asset: &str) -> Vec<(String, f64)> {
        self.attributed
            .iter()
            .filter(|((consumer, _), _)| consumer == asset)
            .flat_map(|(_, sources)| sources.iter().cloned())
            .collect()
    }

    fn is_intermediate(&self, asset: &str) -> bool {
        self.attributed.keys().any(|(consumer, _)| consumer == asset)
    }
}

/// Per-run emission bookkeeping shared by all networks of a simulation.
pub struct EmissionAttributor {
    ledger: Mutex<Ledger>,
    publisher: Arc<dyn Publisher>,
}

impl std::fmt::Debug for EmissionAttributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionAttributor").finish_non_exhaustive()
    }
}

impl EmissionAttributor {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            publisher,
        }
    }

    /// Records `energy` joule produced by `asset` with the given emission.
    pub fn record_producer(
        &self,
        network: &str,
        carrier: &str,
        asset: &str,
        energy: f64,
        emission: f64,
    ) {
        self.ledger.lock().supplies.push(Supply {
            network: network.to_string(),
            carrier: carrier.to_string(),
            asset: asset.to_string(),
            energy: energy.abs(),
            emission,
        });
    }

    /// Records `energy` joule consumed by `asset`.
    pub fn record_consumer(&self, network: &str, carrier: &str, asset: &str, energy: f64) {
        self.ledger.lock().demands.push(Demand {
            network: network.to_string(),
            carrier: carrier.to_string(),
            asset: asset.to_string(),
            energy: energy.abs(),
        });
    }

    /// Splits every producer's energy in `network` over its consumers.
    ///
    /// A consumer receives `producer energy * consumer energy / total
    /// production`, so a surplus that nobody consumed is not attributed.
    pub fn organise_network(&self, network: &str) {
        let mut ledger = self.ledger.lock();
        let producers: Vec<(String, f64)> = ledger
            .supplies
            .iter()
            .filter(|s| s.network == network)
            .map(|s| (s.asset.clone(), s.energy))
            .collect();
        let consumers: Vec<Demand> = ledger
            .demands
            .iter()
            .filter(|d| d.network == network)
            .cloned()
            .collect();

        let mut total: f64 = producers.iter().map(|(_, e)| e).sum();
        if total.abs() < SUM_EPSILON {
            total = 1.0;
        }
        for consumer in consumers {
            let share = consumer.energy / total;
            let entry = ledger
                .attributed
                .entry((consumer.asset, consumer.carrier))
                .or_default();
            for (producer, energy) in &producers {
                entry.push((producer.clone(), energy * share));
            }
        }
    }

    /// Re-expresses energy attributed to intermediate producers in terms of
    /// their own suppliers until only root producers remain.
    pub fn remap_producers(&self) {
        let mut ledger = self.ledger.lock();
        for round in 0..MAX_REMAP_ROUNDS {
            let mut changed = false;
            let mut next = BTreeMap::new();
            for (key, sources) in &ledger.attributed {
                let mut merged: BTreeMap<String, f64> = BTreeMap::new();
                for (producer, energy) in sources {
                    if producer != &key.0 && ledger.is_intermediate(producer) {
                        let output = ledger.output_of(producer);
                        let scale = if output.abs() < SUM_EPSILON {
                            0.0
                        } else {
                            energy / output
                        };
                        for (upstream, e) in ledger.upstream_of(producer) {
                            *merged.entry(upstream).or_default() += e * scale;
                        }
                        changed = true;
                    } else {
                        *merged.entry(producer.clone()).or_default() += energy;
                    }
                }
                next.insert(key.clone(), merged.into_iter().collect());
            }
            ledger.attributed = next;
            if !changed {
                debug!(rounds = round, "emission attribution remapped");
                return;
            }
        }
        warn!(
            rounds = MAX_REMAP_ROUNDS,
            "emission attribution did not settle, supply chain contains a cycle"
        );
    }

    /// Organises every recorded network, remaps and builds one observation
    /// per (producer, carrier) and (consumer, carrier). Clears the ledger.
    pub fn attribute(&self, at: DateTime<Utc>) -> Vec<Observation> {
        let networks: BTreeSet<String> = {
            let ledger = self.ledger.lock();
            ledger
                .supplies
                .iter()
                .map(|s| s.network.clone())
                .chain(ledger.demands.iter().map(|d| d.network.clone()))
                .collect()
        };
        for network in &networks {
            self.organise_network(network);
        }
        self.remap_producers();

        let mut ledger = self.ledger.lock();
        let mut out = Vec::new();

        let mut produced: BTreeMap<(String, String), (f64, f64)> = BTreeMap::new();
        for s in &ledger.supplies {
            let entry = produced
                .entry((s.asset.clone(), s.carrier.clone()))
                .or_default();
            entry.0 += s.energy;
            entry.1 += s.emission;
        }
        for ((asset, carrier), (energy, emission)) in produced {
            out.push(observation(at, &asset, &carrier, "PRODUCER", energy, emission));
        }

        let mut consumed: BTreeMap<ConsumerKey, f64> = BTreeMap::new();
        for d in &ledger.demands {
            *consumed.entry((d.asset.clone(), d.carrier.clone())).or_default() += d.energy;
        }
        for (key, energy) in consumed {
            let emission = ledger.attributed.get(&key).map_or(0.0, |sources| {
                sources
                    .iter()
                    .map(|(root, e)| {
                        let output = ledger.output_of(root);
                        if output.abs() < SUM_EPSILON {
                            0.0
                        } else {
                            e * ledger.emission_of(root) / output
                        }
                    })
                    .sum()
            });
            out.push(observation(at, &key.0, &key.1, "CONSUMER", energy, emission));
        }

        ledger.supplies.clear();
        ledger.demands.clear();
        ledger.attributed.clear();
        out
    }
}

fn observation(
    at: DateTime<Utc>,
    asset: &str,
    carrier: &str,
    role: &str,
    energy: f64,
    emission: f64,
) -> Observation {
    Observation::new(at)
        .tag("measurement", "emission")
        .tag("asset_id", asset)
        .tag("carrier_id", carrier)
        .tag("role", role)
        .value("energy", energy)
        .value("emission", emission)
}

impl Simulatable for Arc<EmissionAttributor> {
    fn init(&mut self, _horizon: &Horizon) -> SimResult<()> {
        let mut ledger = self.ledger.lock();
        ledger.supplies.clear();
        ledger.demands.clear();
        ledger.attributed.clear();
        ledger.lifecycle = Lifecycle::Initialized;
        Ok(())
    }

    fn step(&mut self, at: DateTime<Utc>) -> SimResult<()> {
        self.ledger.lock().lifecycle = Lifecycle::Running;
        for obs in self.attribute(at) {
            self.publisher.publish(EMISSION_PROVIDER, obs);
        }
        Ok(())
    }

    fn stop(&mut self) -> SimResult<()> {
        self.ledger.lock().lifecycle = Lifecycle::Stopped;
        Ok(())
    }

    fn lifecycle(&self) -> Lifecycle {
        self.ledger.lock().lifecycle
    }

    fn name(&self) -> &str {
        EMISSION_PROVIDER
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::warn;

use super::{Asset, AssetKind, Carrier, ControlStrategy, Port, PortDirection};
use crate::error::{SimError, SimResult};

/// Read-only view over carriers, assets and the symmetric port links.
///
/// Construction validates every reference and fills in missing control
/// strategies; afterwards the graph is shared behind `Arc`s and never
/// changes.
#[derive(Debug, Clone)]
pub struct AssetGraph {
    carriers: BTreeMap<String, Carrier>,
    assets: Vec<Arc<Asset>>,
    by_id: HashMap<String, usize>,
    /// Port id to (asset index, port index).
    ports: HashMap<String, (usize, usize)>,
    links: HashMap<String, Vec<String>>,
}

impl AssetGraph {
    /// Builds the graph, checking references and defaulting strategies.
    ///
    /// # Arguments
    ///
    /// * `carriers` - Every carrier a port may refer to
    /// * `assets` - The assets in declaration order
    ///
    /// # Errors
    ///
    /// Returns a structural [`SimError`] for duplicate ids, unknown carriers
    /// or ports, links across carriers and ambiguous control strategies.
    pub fn new(carriers: Vec<Carrier>, assets: Vec<Asset>) -> SimResult<Self> {
        let mut carrier_map = BTreeMap::new();
        for carrier in carriers {
            if carrier_map.contains_key(&carrier.id) {
                return Err(SimError::Config(format!(
                    "carrier `{}` declared twice",
                    carrier.id
                )));
            }
            carrier_map.insert(carrier.id.clone(), carrier);
        }

        let mut by_id = HashMap::new();
        let mut ports = HashMap::new();
        let mut owned = Vec::with_capacity(assets.len());
        for (a, mut asset) in assets.into_iter().enumerate() {
            if by_id.insert(asset.id.clone(), a).is_some() {
                return Err(SimError::Config(format!(
                    "asset `{}` declared twice",
                    asset.id
                )));
            }
            for (p, port) in asset.ports.iter().enumerate() {
                if !carrier_map.contains_key(&port.carrier) {
                    return Err(SimError::UnknownCarrier {
                        carrier: port.carrier.clone(),
                        by: port.id.clone(),
                    });
                }
                if ports.insert(port.id.clone(), (a, p)).is_some() {
                    return Err(SimError::Config(format!("port `{}` declared twice", port.id)));
                }
            }
            default_control(&mut asset)?;
            owned.push(asset);
        }

        let mut links: HashMap<String, Vec<String>> = HashMap::new();
        for asset in &owned {
            for port in &asset.ports {
                for peer in &port.connected_to {
                    let Some(&(pa, pp)) = ports.get(peer) else {
                        return Err(SimError::UnknownPort {
                            port: peer.clone(),
                            by: port.id.clone(),
                        });
                    };
                    let peer_port = &owned[pa].ports[pp];
                    if peer_port.carrier != port.carrier {
                        return Err(SimError::InvalidAsset {
                            asset: asset.id.clone(),
                            reason: format!(
                                "port `{}` on `{}` is connected to port `{peer}` on `{}`",
                                port.id, port.carrier, peer_port.carrier
                            ),
                        });
                    }
                    link(&mut links, &port.id, peer);
                    link(&mut links, peer, &port.id);
                }
            }
            if let Some(designated) = asset.control.as_ref().and_then(ControlStrategy::port) {
                if asset.port(designated).is_none() {
                    return Err(SimError::UnknownPort {
                        port: designated.clone(),
                        by: asset.id.clone(),
                    });
                }
            }
        }

        Ok(Self {
            carriers: carrier_map,
            assets: owned.into_iter().map(Arc::new).collect(),
            by_id,
            ports,
            links,
        })
    }

    pub fn carriers(&self) -> impl Iterator<Item = &Carrier> {
        self.carriers.values()
    }

    pub fn carrier(&self, id: &str) -> Option<&Carrier> {
        self.carriers.get(id)
    }

    pub fn assets(&self) -> &[Arc<Asset>] {
        &self.assets
    }

    pub fn asset(&self, id: &str) -> Option<&Arc<Asset>> {
        self.by_id.get(id).map(|&i| &self.assets[i])
    }

    /// Asset owning the given port.
    pub fn owner(&self, port: &str) -> Option<&Arc<Asset>> {
        self.ports.get(port).map(|&(a, _)| &self.assets[a])
    }

    pub fn port(&self, port: &str) -> Option<&Port> {
        self.ports
            .get(port)
            .map(|&(a, p)| &self.assets[a].ports[p])
    }

    /// Ports linked to `port`, in declaration order.
    pub fn peers(&self, port: &str) -> &[String] {
        self.links.get(port).map_or(&[], Vec::as_slice)
    }

    /// Carrier of a port, resolved through the carrier table.
    pub fn port_carrier(&self, port: &str) -> Option<&Carrier> {
        self.port(port).and_then(|p| self.carrier(&p.carrier))
    }
}

fn link(links: &mut HashMap<String, Vec<String>>, from: &str, to: &str) {
    let peers = links.entry(from.to_string()).or_default();
    if !peers.iter().any(|p| p == to) {
        peers.push(to.to_string());
    }
}

/// Fills in the control strategy of assets that need one and lack it.
fn default_control(asset: &mut Asset) -> SimResult<()> {
    if asset.control.is_some() {
        return Ok(());
    }
    if matches!(asset.kind, AssetKind::Storage { .. }) {
        asset.control = Some(ControlStrategy::Storage {
            charge_cost_profile: None,
            discharge_cost_profile: None,
        });
        return Ok(());
    }
    if !asset.kind.is_conversion() {
        return Ok(());
    }

    let outputs: Vec<&Port> = asset
        .ports
        .iter()
        .filter(|p| p.direction == PortDirection::Out)
        .collect();
    match outputs.as_slice() {
        [only] => {
            warn!(
                asset = %asset.id,
                port = %only.id,
                "no control strategy, defaulting to driven by demand"
            );
            asset.control = Some(ControlStrategy::DrivenByDemand {
                port: only.id.clone(),
            });
            Ok(())
        }
        [] => Err(SimError::InvalidAsset {
            asset: asset.id.clone(),
            reason: "a conversion needs at least one output port".into(),
        }),
        many => Err(SimError::AmbiguousControlStrategy {
            asset: asset.id.clone(),
            outputs: many.len(),
        }),
    }
}

use std::fmt;

use super::cogeneration::CoGeneration;
use super::heat_pump::HeatPump;
use super::hybrid_heat_pump::HybridHeatPump;
use super::{
    Allocation, NodeBehavior, NodeSite, StepFrame, adjustable_consumption, adjustable_production,
};
use crate::curve::Curve;
use crate::error::{SimError, SimResult};
use crate::model::{Asset, AssetGraph, AssetKind, CarrierKind, ControlStrategy, Port, PortId, Role};
use crate::profile::step_energy;

/// Energy relationship between the ports of a conversion asset.
///
/// Flows are signed from the asset's point of view: positive into the asset
/// through an input, negative out of it through an output.
pub(super) trait EnergyBalance: fmt::Debug + Send {
    /// Largest energy magnitude the asset can move through `port` in one step.
    ///
    /// `None` if `port` is not one the balance knows about.
    fn max_energy(&self, port: &str, capacity: f64, seconds: f64) -> Option<f64>;

    /// Flows on every port given `magnitude` joule on `port`.
    ///
    /// `None` if the flows cannot be derived from that port.
    fn port_flows(&self, port: &str, magnitude: f64, seconds: f64) -> Option<Vec<(PortId, f64)>>;

    /// Input whose energy is reported as fuel.
    fn fuel_port(&self) -> Option<&str> {
        None
    }

    /// Replacement for the single-segment production curve, if the asset
    /// has a richer cost structure.
    fn production_curve(
        &self,
        _port: &str,
        _cost: f64,
        _frame: &StepFrame<'_>,
    ) -> Option<Curve> {
        None
    }

    fn scale_costs(&mut self, _factor: f64) {}
}

/// Single input, single output, fixed efficiency. Capacity is on the output.
#[derive(Debug, Clone)]
pub(super) struct SimpleConversion {
    efficiency: f64,
    input: PortId,
    output: PortId,
}

impl SimpleConversion {
    fn resolve(asset: &Asset, efficiency: f64) -> SimResult<Self> {
        if efficiency <= 0.0 {
            return Err(invalid(asset, "efficiency must be > 0"));
        }
        let (inputs, outputs) = (ports(asset.inputs()), ports(asset.outputs()));
        let ([input], [output]) = (inputs.as_slice(), outputs.as_slice()) else {
            return Err(invalid(asset, "needs exactly one input and one output port"));
        };
        Ok(Self {
            efficiency,
            input: input.id.clone(),
            output: output.id.clone(),
        })
    }
}

impl EnergyBalance for SimpleConversion {
    fn max_energy(&self, port: &str, capacity: f64, seconds: f64) -> Option<f64> {
        let out = capacity * seconds;
        if port == self.output {
            Some(out)
        } else if port == self.input {
            Some(out / self.efficiency)
        } else {
            None
        }
    }

    fn port_flows(&self, port: &str, magnitude: f64, _seconds: f64) -> Option<Vec<(PortId, f64)>> {
        let (input, output) = if port == self.output {
            (magnitude / self.efficiency, magnitude)
        } else if port == self.input {
            (magnitude, magnitude * self.efficiency)
        } else {
            return None;
        };
        Some(vec![
            (self.input.clone(), input),
            (self.output.clone(), -output),
        ])
    }

    fn fuel_port(&self) -> Option<&str> {
        Some(&self.input)
    }
}

#[derive(Debug)]
enum ConversionModel {
    Simple(SimpleConversion),
    HeatPump(HeatPump),
    CoGeneration(CoGeneration),
    Hybrid(HybridHeatPump),
}

impl ConversionModel {
    fn balance(&self) -> &dyn EnergyBalance {
        match self {
            ConversionModel::Simple(m) => m,
            ConversionModel::HeatPump(m) => m,
            ConversionModel::CoGeneration(m) => m,
            ConversionModel::Hybrid(m) => m,
        }
    }

    fn balance_mut(&mut self) -> &mut dyn EnergyBalance {
        match self {
            ConversionModel::Simple(m) => m,
            ConversionModel::HeatPump(m) => m,
            ConversionModel::CoGeneration(m) => m,
            ConversionModel::Hybrid(m) => m,
        }
    }
}

#[derive(Debug, Clone)]
struct InputPort {
    id: PortId,
    emission_factor: f64,
    energy_content: f64,
}

/// Boundary asset between networks.
///
/// On the network holding its strategy's designated port the node is
/// primary: it bids flexibly (or from a profile) and, once cleared, writes
/// the flows of every port of the asset. On its other networks it is a
/// read-through with an inflexible bid equal to the flows the primary side
/// wrote for the same timestamp.
#[derive(Debug)]
pub struct ConversionNode {
    model: ConversionModel,
    strategy: ControlStrategy,
    primary: bool,
    inputs: Vec<InputPort>,
}

impl ConversionNode {
    /// # Errors
    ///
    /// Returns [`SimError::InvalidAsset`] when the asset's ports or
    /// parameters do not fit its kind, or when it has no control strategy.
    pub fn new(graph: &AssetGraph, site: &NodeSite) -> SimResult<Self> {
        let asset = site.asset.as_ref();
        let strategy = asset
            .control
            .clone()
            .ok_or_else(|| invalid(asset, "conversion without control strategy"))?;

        let model = match asset.kind {
            AssetKind::Conversion { efficiency } => {
                ConversionModel::Simple(SimpleConversion::resolve(asset, efficiency)?)
            }
            AssetKind::HeatPump { cop } => {
                ConversionModel::HeatPump(HeatPump::resolve(graph, asset, cop)?)
            }
            AssetKind::CoGeneration {
                heat_efficiency,
                electrical_efficiency,
            } => ConversionModel::CoGeneration(CoGeneration::resolve(
                graph,
                asset,
                heat_efficiency,
                electrical_efficiency,
            )?),
            AssetKind::HybridHeatPump {
                cop,
                gas_efficiency,
                heat_pump_power,
                boiler_power,
                boiler_cost,
            } => ConversionModel::Hybrid(HybridHeatPump::resolve(
                graph,
                asset,
                cop,
                gas_efficiency,
                heat_pump_power,
                boiler_power,
                boiler_cost,
            )?),
            _ => return Err(invalid(asset, "not a conversion")),
        };

        let primary = strategy
            .port()
            .is_some_and(|designated| site.ports.contains(designated));
        let inputs = asset
            .inputs()
            .map(|p| {
                let carrier = graph.carrier(&p.carrier);
                InputPort {
                    id: p.id.clone(),
                    emission_factor: carrier.map_or(0.0, |c| c.emission_factor),
                    energy_content: carrier.map_or(1.0, |c| c.energy_content),
                }
            })
            .collect();

        Ok(Self {
            model,
            strategy,
            primary,
            inputs,
        })
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    fn read_through(&self, site: &NodeSite, frame: &StepFrame<'_>) -> SimResult<Curve> {
        let mut quantity = 0.0;
        for port in &site.ports {
            quantity += frame
                .profiles
                .read_flow(port, frame.at())
                .ok_or_else(|| SimError::MissingFlow {
                    asset: site.asset.id.clone(),
                    port: port.clone(),
                    timestamp: frame.at(),
                })?;
        }
        Ok(frame.inflexible(quantity))
    }

    fn max_energy(&self, site: &NodeSite, port: &str, seconds: f64) -> SimResult<f64> {
        self.model
            .balance()
            .max_energy(port, site.asset.capacity(), seconds)
            .ok_or_else(|| impossible(site, format!("size port `{port}`")))
    }
}

impl NodeBehavior for ConversionNode {
    fn build_curve(&mut self, site: &NodeSite, frame: &StepFrame<'_>) -> SimResult<Curve> {
        if !self.primary {
            return self.read_through(site, frame);
        }

        match &self.strategy {
            ControlStrategy::DrivenByDemand { port } => {
                if site.role != Role::Producer {
                    return Err(impossible(
                        site,
                        format!("follow demand through input port `{port}`"),
                    ));
                }
                let qmax = self.max_energy(site, port, frame.seconds())?;
                Ok(self
                    .model
                    .balance()
                    .production_curve(port, site.cost, frame)
                    .unwrap_or_else(|| {
                        adjustable_production(qmax, site.cost, frame.price_min, frame.price_max)
                    }))
            }
            ControlStrategy::DrivenBySupply { port } => {
                if site.role != Role::Consumer {
                    return Err(impossible(
                        site,
                        format!("follow supply through output port `{port}`"),
                    ));
                }
                let qmax = self.max_energy(site, port, frame.seconds())?;
                Ok(adjustable_consumption(
                    qmax,
                    site.cost,
                    frame.price_min,
                    frame.price_max,
                ))
            }
            ControlStrategy::DrivenByProfile { profile, .. } => {
                let energy = step_energy(frame.profiles, profile, &frame.horizon).abs();
                let quantity = if site.role == Role::Producer {
                    -energy
                } else {
                    energy
                };
                Ok(frame.inflexible(quantity))
            }
            ControlStrategy::Storage { .. } => {
                Err(impossible(site, "run a storage strategy".to_string()))
            }
        }
    }

    fn allocate(
        &mut self,
        site: &NodeSite,
        frame: &StepFrame<'_>,
        energy: f64,
        _price: f64,
    ) -> SimResult<Allocation> {
        let at = frame.at();
        let flows: Vec<(PortId, f64)> = match (self.primary, self.strategy.port()) {
            (true, Some(port)) => {
                let flows = self
                    .model
                    .balance()
                    .port_flows(port, energy.abs(), frame.seconds())
                    .ok_or_else(|| impossible(site, format!("derive its flows from port `{port}`")))?;
                for (p, flow) in &flows {
                    frame.profiles.write_flow(p, at, *flow);
                }
                flows
            }
            _ => self
                .inputs
                .iter()
                .filter_map(|i| frame.profiles.read_flow(&i.id, at).map(|f| (i.id.clone(), f)))
                .collect(),
        };
        let flow_of = |id: &str| {
            flows
                .iter()
                .find(|(p, _)| p == id)
                .map_or(0.0, |(_, f)| f.max(0.0))
        };

        let emission = if site.role == Role::Producer {
            self.inputs
                .iter()
                .map(|i| flow_of(&i.id) * i.emission_factor)
                .sum()
        } else {
            0.0
        };
        let fuel = self.model.balance().fuel_port().and_then(|fuel| {
            self.inputs
                .iter()
                .find(|i| i.id == fuel && i.energy_content > 0.0)
                .map(|i| flow_of(&i.id) / i.energy_content)
        });

        Ok(Allocation {
            emission,
            cost: energy.abs() * site.cost,
            fuel,
            ..Allocation::default()
        })
    }

    fn scale_costs(&mut self, factor: f64) {
        self.model.balance_mut().scale_costs(factor);
    }

    fn written_ports(&self, site: &NodeSite) -> Vec<PortId> {
        if self.primary {
            site.asset.ports.iter().map(|p| p.id.clone()).collect()
        } else {
            Vec::new()
        }
    }
}

pub(super) fn ports<'a>(iter: impl Iterator<Item = &'a Port>) -> Vec<&'a Port> {
    iter.collect()
}

pub(super) fn carrier_kind(graph: &AssetGraph, port: &Port) -> CarrierKind {
    graph.carrier(&port.carrier).map_or(CarrierKind::Other, |c| c.kind)
}

pub(super) fn invalid(asset: &Asset, reason: &str) -> SimError {
    SimError::InvalidAsset {
        asset: asset.id.clone(),
        reason: reason.to_string(),
    }
}

fn impossible(site: &NodeSite, reason: String) -> SimError {
    SimError::ImpossibleAllocation {
        asset: site.asset.id.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::TimeDelta;

    use super::*;
    use crate::model::{Carrier, PortDirection};
    use crate::nodes::test_support::*;
    use crate::profile::{ProfileKind, ProfileService, ProfileStore, Series};

    fn graph(asset: &Asset) -> AssetGraph {
        AssetGraph::new(
            vec![
                Carrier::new("gas", CarrierKind::Gas).with_emission_factor(0.2),
                Carrier::new("heat", CarrierKind::Heat),
            ],
            vec![asset.clone()],
        )
        .unwrap()
    }

    fn boiler(control: ControlStrategy) -> Asset {
        Asset::new("boiler", AssetKind::Conversion { efficiency: 0.8 })
            .with_port(in_port("boiler.in", "gas"))
            .with_port(out_port("boiler.out", "heat"))
            .with_power(1.0)
            .with_cost(0.2)
            .with_control(control)
    }

    fn side(asset: &Asset, dir: PortDirection, carrier: &str, role: Role) -> NodeSite {
        let ports = asset
            .ports
            .iter()
            .filter(|p| p.direction == dir)
            .map(|p| p.id.clone())
            .collect();
        site(asset.clone(), carrier, role).with_ports(ports)
    }

    #[test]
    fn demand_driven_boiler_bids_output_and_writes_both_ports() {
        let asset = boiler(ControlStrategy::DrivenByDemand {
            port: "boiler.out".into(),
        });
        let g = graph(&asset);
        let store = ProfileStore::new();
        let frame = frame(&store);
        let heat = side(&asset, PortDirection::Out, "heat", Role::Producer);
        let mut node = ConversionNode::new(&g, &heat).unwrap();
        assert!(node.is_primary());

        let curve = node.build_curve(&heat, &frame).unwrap();
        assert_eq!(curve.value_at(1.0), -3600.0);

        let alloc = node.allocate(&heat, &frame, -800.0, 0.5).unwrap();
        assert_eq!(store.read_flow("boiler.out", frame.at()), Some(-800.0));
        assert_eq!(store.read_flow("boiler.in", frame.at()), Some(1000.0));
        assert_abs_diff_eq!(alloc.emission, 200.0, epsilon = 1e-9);
        assert_eq!(alloc.fuel, Some(1000.0));
    }

    #[test]
    fn read_through_side_follows_primary_flow() {
        let asset = boiler(ControlStrategy::DrivenByDemand {
            port: "boiler.out".into(),
        });
        let g = graph(&asset);
        let store = ProfileStore::new();
        let frame = frame(&store);
        let gas = side(&asset, PortDirection::In, "gas", Role::Consumer);
        let mut node = ConversionNode::new(&g, &gas).unwrap();
        assert!(!node.is_primary());
        assert!(node.written_ports(&gas).is_empty());

        let err = node.build_curve(&gas, &frame).unwrap_err();
        assert!(matches!(err, SimError::MissingFlow { .. }));

        store.write_flow("boiler.in", frame.at(), 1000.0);
        let curve = node.build_curve(&gas, &frame).unwrap();
        assert_eq!(curve.value_at(0.0), 1000.0);
        assert_eq!(curve.value_at(1.0), 1000.0);
    }

    #[test]
    fn supply_driven_conversion_bids_as_consumer() {
        let asset = boiler(ControlStrategy::DrivenBySupply {
            port: "boiler.in".into(),
        });
        let g = graph(&asset);
        let store = ProfileStore::new();
        let gas = side(&asset, PortDirection::In, "gas", Role::Consumer);
        let mut node = ConversionNode::new(&g, &gas).unwrap();
        let curve = node.build_curve(&gas, &frame(&store)).unwrap();
        assert_eq!(curve.value_at(0.0), 4500.0);
        assert_eq!(curve.value_at(0.2), 0.0);
    }

    #[test]
    fn demand_strategy_on_input_port_is_impossible() {
        let asset = boiler(ControlStrategy::DrivenByDemand {
            port: "boiler.in".into(),
        });
        let g = graph(&asset);
        let store = ProfileStore::new();
        let gas = side(&asset, PortDirection::In, "gas", Role::Consumer);
        let mut node = ConversionNode::new(&g, &gas).unwrap();
        let err = node.build_curve(&gas, &frame(&store)).unwrap_err();
        assert!(matches!(err, SimError::ImpossibleAllocation { .. }));
    }

    #[test]
    fn profile_driven_conversion_is_inflexible() {
        let h = horizon();
        let asset = boiler(ControlStrategy::DrivenByProfile {
            port: "boiler.out".into(),
            profile: "heat-demand".into(),
        });
        let g = graph(&asset);
        let store = ProfileStore::new().with_series(
            "heat-demand",
            Series::new(ProfileKind::Energy, h.start, TimeDelta::hours(1), vec![400.0]),
        );
        let heat = side(&asset, PortDirection::Out, "heat", Role::Producer);
        let mut node = ConversionNode::new(&g, &heat).unwrap();
        let curve = node.build_curve(&heat, &frame(&store)).unwrap();
        assert_eq!(curve.value_at(0.0), -400.0);
        assert_eq!(curve.value_at(1.0), -400.0);
    }

    #[test]
    fn wrong_port_layout_is_invalid() {
        let asset = Asset::new("boiler", AssetKind::Conversion { efficiency: 0.8 })
            .with_port(out_port("boiler.out", "heat"))
            .with_control(ControlStrategy::DrivenByDemand {
                port: "boiler.out".into(),
            });
        let g = graph(&asset);
        let heat = side(&asset, PortDirection::Out, "heat", Role::Producer);
        assert!(matches!(
            ConversionNode::new(&g, &heat),
            Err(SimError::InvalidAsset { .. })
        ));
    }
}

use super::conversion::{EnergyBalance, carrier_kind, invalid, ports};
use crate::error::SimResult;
use crate::model::{Asset, AssetGraph, CarrierKind, PortId};

/// Electric heat pump, optionally drawing on a low-temperature heat source.
///
/// Without a source all heat comes from electricity (`heat = elec * cop`).
/// With a source the electricity covers `heat / cop` and the source the
/// rest, so that `heat = elec + source`.
#[derive(Debug, Clone)]
pub(super) struct HeatPump {
    cop: f64,
    electricity: PortId,
    source: Option<PortId>,
    heat: PortId,
}

impl HeatPump {
    pub(super) fn resolve(graph: &AssetGraph, asset: &Asset, cop: f64) -> SimResult<Self> {
        if cop <= 0.0 {
            return Err(invalid(asset, "cop must be > 0"));
        }
        let outputs = ports(asset.outputs());
        let [heat] = outputs.as_slice() else {
            return Err(invalid(asset, "a heat pump needs exactly one output port"));
        };

        let inputs = ports(asset.inputs());
        let (electricity, source) = match inputs.as_slice() {
            [only] => (only, None),
            [a, b] => {
                let is_source = |p: &crate::model::Port| {
                    p.carrier == heat.carrier || carrier_kind(graph, p) == CarrierKind::Heat
                };
                match (is_source(*a), is_source(*b)) {
                    (false, true) => (a, Some(b)),
                    (true, false) => (b, Some(a)),
                    _ => {
                        return Err(invalid(
                            asset,
                            "cannot tell the electricity input from the heat source",
                        ));
                    }
                }
            }
            _ => return Err(invalid(asset, "a heat pump needs one or two input ports")),
        };
        if source.is_some() && cop <= 1.0 {
            return Err(invalid(asset, "cop must be > 1 with a heat source"));
        }

        Ok(Self {
            cop,
            electricity: electricity.id.clone(),
            source: source.map(|p| p.id.clone()),
            heat: heat.id.clone(),
        })
    }

    /// Share of the heat output drawn from the source.
    fn source_share(&self) -> f64 {
        1.0 - 1.0 / self.cop
    }

    fn is_source(&self, port: &str) -> bool {
        self.source.as_deref() == Some(port)
    }

    fn heat_from(&self, port: &str, magnitude: f64) -> Option<f64> {
        if port == self.heat {
            Some(magnitude)
        } else if port == self.electricity {
            Some(magnitude * self.cop)
        } else if self.is_source(port) {
            Some(magnitude / self.source_share())
        } else {
            None
        }
    }
}

impl EnergyBalance for HeatPump {
    fn max_energy(&self, port: &str, capacity: f64, seconds: f64) -> Option<f64> {
        let heat = capacity * seconds;
        if port == self.heat {
            Some(heat)
        } else if port == self.electricity {
            Some(heat / self.cop)
        } else if self.is_source(port) {
            Some(heat * self.source_share())
        } else {
            None
        }
    }

    fn port_flows(&self, port: &str, magnitude: f64, _seconds: f64) -> Option<Vec<(PortId, f64)>> {
        let heat = self.heat_from(port, magnitude)?;
        let electricity = heat / self.cop;
        let mut flows = vec![
            (self.electricity.clone(), electricity),
            (self.heat.clone(), -heat),
        ];
        if let Some(source) = &self.source {
            flows.push((source.clone(), heat - electricity));
        }
        Some(flows)
    }
}

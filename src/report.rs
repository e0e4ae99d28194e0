//! End-of-run summary computed from the published observations.

use std::collections::BTreeMap;
use std::fmt;

use crate::network::IMBALANCE_TOLERANCE;
use crate::observation::Observation;
use crate::simulation::NetworkSummary;

/// Per-network figures over the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkReport {
    pub summary: NetworkSummary,
    pub steps: usize,
    pub mean_price: f64,
    pub max_price: f64,
    /// Steps whose clearing left more than the tolerated residual.
    pub imbalanced_steps: usize,
    /// Joule delivered by producers, positive.
    pub produced: f64,
}

/// Aggregate report of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub networks: Vec<NetworkReport>,
    /// Emission caused by every producer, summed.
    pub total_emission: f64,
    /// Emission attributed to each consumer asset, summed over carriers.
    pub consumer_emission: BTreeMap<String, f64>,
}

impl RunReport {
    /// Builds the report from `(provider, observation)` records.
    ///
    /// # Arguments
    ///
    /// * `networks` - Identity of every simulated network
    /// * `records` - Everything published during the run
    pub fn from_records(networks: &[NetworkSummary], records: &[(String, Observation)]) -> Self {
        let mut reports: Vec<NetworkReport> = networks
            .iter()
            .map(|summary| NetworkReport {
                summary: summary.clone(),
                steps: 0,
                mean_price: 0.0,
                max_price: 0.0,
                imbalanced_steps: 0,
                produced: 0.0,
            })
            .collect();
        let index: BTreeMap<&str, usize> = networks
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut total_emission = 0.0;
        let mut consumer_emission: BTreeMap<String, f64> = BTreeMap::new();
        for (_, obs) in records {
            match obs.get_tag("measurement") {
                Some("clearing") => {
                    let Some(report) = network_of(obs, &index).map(|i| &mut reports[i]) else {
                        continue;
                    };
                    let price = obs.get_value("price").unwrap_or(0.0);
                    report.steps += 1;
                    report.mean_price += price;
                    report.max_price = report.max_price.max(price);
                    if obs
                        .get_value("imbalance")
                        .is_some_and(|v| v.abs() > IMBALANCE_TOLERANCE)
                    {
                        report.imbalanced_steps += 1;
                    }
                }
                Some("allocation") => {
                    let Some(report) = network_of(obs, &index).map(|i| &mut reports[i]) else {
                        continue;
                    };
                    if obs.get_tag("role") != Some("TRANSPORT") {
                        let energy = obs.get_value("energy").unwrap_or(0.0);
                        if energy < 0.0 {
                            report.produced -= energy;
                        }
                    }
                }
                Some("emission") => {
                    let emission = obs.get_value("emission").unwrap_or(0.0);
                    match (obs.get_tag("role"), obs.get_tag("asset_id")) {
                        (Some("PRODUCER"), _) => total_emission += emission,
                        (Some("CONSUMER"), Some(asset)) => {
                            *consumer_emission.entry(asset.to_string()).or_default() += emission;
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        for report in &mut reports {
            if report.steps > 0 {
                report.mean_price /= report.steps as f64;
            }
        }

        Self {
            networks: reports,
            total_emission,
            consumer_emission,
        }
    }
}

fn network_of(obs: &Observation, index: &BTreeMap<&str, usize>) -> Option<usize> {
    obs.get_tag("network_id").and_then(|id| index.get(id).copied())
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Run Report ---")?;
        for n in &self.networks {
            writeln!(
                f,
                "{:<16} rank {}  {} devices{}  mean price {:.3} (max {:.3})  produced {:.1} kWh  imbalanced steps {}/{}",
                n.summary.id,
                n.summary.rank,
                n.summary.device_count,
                if n.summary.has_transport { " + transport" } else { "" },
                n.mean_price,
                n.max_price,
                n.produced / 3.6e6,
                n.imbalanced_steps,
                n.steps,
            )?;
        }
        writeln!(f, "Total emission:        {:.3}", self.total_emission)?;
        for (asset, emission) in &self.consumer_emission {
            writeln!(f, "  attributed to {asset:<12} {emission:.3}")?;
        }
        Ok(())
    }
}

//! Built-in presets and TOML scenarios run end to end.

use std::sync::Arc;

use flownet_sim::config::ScenarioConfig;
use flownet_sim::observation::MemoryPublisher;
use flownet_sim::report::RunReport;
use flownet_sim::sim::status::RunState;
use flownet_sim::simulation::Simulation;
use rstest::rstest;

fn run_preset(name: &str) -> (Simulation, Arc<MemoryPublisher>) {
    let mut config = ScenarioConfig::from_preset(name).unwrap();
    config.simulation.workers = 2;
    let sink = Arc::new(MemoryPublisher::new());
    let sim = Simulation::from_config(&config, sink.clone(), None).unwrap();
    sim.run().unwrap();
    (sim, sink)
}

#[rstest]
#[case("district_heating", "heat", "gas")]
#[case("heat_pump_chain", "heat", "elec")]
fn presets_rank_the_driving_carrier_first(
    #[case] preset: &str,
    #[case] driving: &str,
    #[case] driven: &str,
) {
    let (sim, _) = run_preset(preset);
    let rank_of = |carrier: &str| {
        sim.networks()
            .iter()
            .find(|n| n.carrier == carrier)
            .map(|n| n.rank)
    };
    assert_eq!(sim.networks().len(), 2);
    assert_eq!(rank_of(driving), Some(0));
    assert_eq!(rank_of(driven), Some(1));
    assert_eq!(sim.status().state(), RunState::Finished);
}

#[rstest]
#[case("district_heating")]
#[case("heat_pump_chain")]
fn presets_clear_every_step(#[case] preset: &str) {
    let (sim, sink) = run_preset(preset);
    let steps = 24;
    let report = RunReport::from_records(sim.networks(), &sink.records());
    for network in &report.networks {
        assert_eq!(network.steps, steps, "{}", network.summary.id);
        assert!(network.mean_price.is_finite());
        assert!(network.produced > 0.0, "{} produced nothing", network.summary.id);
    }
    assert!(report.total_emission > 0.0);
}

#[test]
fn district_heating_pipe_is_reported_as_transport() {
    let (sim, sink) = run_preset("district_heating");
    let heat = sim.networks().iter().find(|n| n.carrier == "heat").unwrap();
    assert!(heat.has_transport);
    let pipe = sink
        .tagged("measurement", "allocation")
        .into_iter()
        .find(|o| o.get_tag("asset_id") == Some("main"))
        .unwrap();
    assert_eq!(pipe.get_tag("role"), Some("TRANSPORT"));
    assert!(pipe.get_value("load").is_some());
}

#[test]
fn solar_heat_carries_no_emission() {
    let (_, sink) = run_preset("district_heating");
    let solar: Vec<_> = sink
        .tagged("measurement", "emission")
        .into_iter()
        .filter(|o| o.get_tag("asset_id") == Some("solar_collector"))
        .collect();
    assert!(!solar.is_empty());
    assert!(solar.iter().all(|o| o.get_value("emission") == Some(0.0)));
}

#[test]
fn toml_scenario_runs_like_a_preset() {
    let toml = r#"
[simulation]
id = "toml"
start = "2024-03-01T00:00:00Z"
end = "2024-03-01T02:00:00Z"

[[carriers]]
id = "elec"
kind = "electricity"
emission_factor = 1e-7

[[assets]]
id = "plant"
kind = "producer"
power = 2000.0
cost = 0.2

[[assets.ports]]
id = "plant.out"
direction = "out"
carrier = "elec"
connected_to = ["home.in"]

[[assets]]
id = "home"
kind = "consumer"
power = 1000.0
cost = 0.6

[[assets.ports]]
id = "home.in"
direction = "in"
carrier = "elec"
"#;
    let config = ScenarioConfig::from_toml_str(toml).unwrap();
    let sink = Arc::new(MemoryPublisher::new());
    let sim = Simulation::from_config(&config, sink.clone(), None).unwrap();
    sim.run().unwrap();
    assert_eq!(sink.tagged("measurement", "clearing").len(), 3);
    let clearing = sim.clearing("elec-0").unwrap();
    assert!(clearing.price > 0.2 && clearing.price < 0.6, "{clearing:?}");
}

#[test]
fn invalid_scenario_is_rejected_before_building() {
    let mut config = ScenarioConfig::district_heating();
    config.simulation.step_seconds = 0;
    let err = Simulation::from_config(&config, Arc::new(MemoryPublisher::new()), None)
        .err()
        .unwrap();
    assert!(err.to_string().contains("simulation.step_seconds"));
}

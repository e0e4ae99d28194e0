use std::env;
use std::path::PathBuf;

/// Default preset when neither `--scenario` nor `--preset` is given.
pub const DEFAULT_PRESET: &str = "district_heating";

/// Default port of the status API.
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug)]
pub struct CliOptions {
    pub scenario: Option<PathBuf>,
    pub preset: Option<String>,
    /// CSV file receiving every observation.
    pub out: Option<PathBuf>,
    pub workers: Option<usize>,
    /// Serve the status API while the run progresses.
    pub serve: bool,
    pub port: u16,
}

/// Parses the process arguments.
///
/// # Errors
///
/// Returns a message describing the first malformed argument.
pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    if args.len() == 1 && (args[0] == "--help" || args[0] == "-h") {
        print_usage();
        std::process::exit(0);
    }
    parse_options(&args)
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut scenario = None;
    let mut preset = None;
    let mut out = None;
    let mut workers = None;
    let mut serve = false;
    let mut port = None;

    while i < args.len() {
        match args[i].as_str() {
            "--scenario" => {
                i += 1;
                let path =
                    args.next_or_err(i, "missing value for --scenario (expected a TOML file path)")?;
                if scenario.replace(PathBuf::from(path)).is_some() {
                    return Err("--scenario provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name = args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--out" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --out (expected a file path)")?;
                if out.replace(PathBuf::from(path)).is_some() {
                    return Err("--out provided more than once".to_string());
                }
            }
            "--workers" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --workers (expected a count)")?;
                let n = raw
                    .parse::<usize>()
                    .map_err(|_| format!("invalid value for --workers: {raw}"))?;
                workers = Some(n);
            }
            "--serve" => serve = true,
            "--port" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --port (expected a port number)")?;
                let p = raw
                    .parse::<u16>()
                    .map_err(|_| format!("invalid value for --port: {raw}"))?;
                port = Some(p);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if scenario.is_some() && preset.is_some() {
        return Err(
            "arguments `--scenario` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }
    if port.is_some() && !serve {
        return Err("--port requires --serve".to_string());
    }

    if scenario.is_none() && preset.is_none() {
        preset = Some(DEFAULT_PRESET.to_string());
    }

    Ok(CliOptions {
        scenario,
        preset,
        out,
        workers,
        serve,
        port: port.unwrap_or(DEFAULT_PORT),
    })
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  flownet-sim [--scenario <path> | --preset <name>] [--out <csv>] [--workers <n>] [--serve [--port <port>]]"
    );
}

#[cfg(test)]
mod tests {
    use super::parse_args_from;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn supports_scenario_cli() {
        let opts = parse_args_from(args(&["--scenario", "scenario.toml"]))
            .expect("parse should succeed");
        assert_eq!(
            opts.scenario.as_deref().and_then(|p| p.to_str()),
            Some("scenario.toml")
        );
        assert!(opts.preset.is_none());
    }

    #[test]
    fn defaults_to_district_heating_preset() {
        let opts = parse_args_from(Vec::new()).expect("parse should succeed");
        assert_eq!(opts.preset.as_deref(), Some("district_heating"));
        assert!(!opts.serve);
        assert_eq!(opts.port, 3000);
    }

    #[test]
    fn parses_output_workers_and_server() {
        let opts = parse_args_from(args(&[
            "--preset",
            "heat_pump_chain",
            "--out",
            "obs.csv",
            "--workers",
            "4",
            "--serve",
            "--port",
            "8080",
        ]))
        .expect("parse should succeed");
        assert_eq!(opts.preset.as_deref(), Some("heat_pump_chain"));
        assert_eq!(opts.out.as_deref().and_then(|p| p.to_str()), Some("obs.csv"));
        assert_eq!(opts.workers, Some(4));
        assert!(opts.serve);
        assert_eq!(opts.port, 8080);
    }

    #[test]
    fn rejects_conflicting_sources() {
        let err = parse_args_from(args(&["--scenario", "a.toml", "--preset", "x"])).unwrap_err();
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(parse_args_from(args(&["--workers", "many"])).is_err());
        assert!(parse_args_from(args(&["--port", "80"])).is_err());
        assert!(parse_args_from(args(&["--out"])).is_err());
        assert!(parse_args_from(args(&["--bogus"])).is_err());
    }
}

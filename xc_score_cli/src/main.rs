use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use xc_score::{
    climb_rates, parse_flight, ColorRamp, DistanceIndex, Flight, Kernel, Solution, SolveParams,
    TurningPointSolver, VarioParams,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Free-flight cross-country scoring CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the longest polygon through the fixes of one or more IGC/GPX/FIT files
    Score(ScoreArgs),
    /// Write the smoothed climb rate and its colour for every track segment
    Vario(VarioArgs),
    /// Summarise headers, fix counts and extents of recordings
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct ScoreArgs {
    /// IGC/GPX/FIT files to score
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "turnpoints.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional JSON report path
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// JSON file with default parameters (flags override it)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Interior turn points (polygon has points + 2 vertices)
    #[arg(long)]
    points: Option<usize>,

    /// Size of the evenly spaced seed pool
    #[arg(long)]
    guess: Option<usize>,

    /// Maximum refinement rounds
    #[arg(long)]
    max_iter: Option<usize>,

    /// Wall-clock limit per flight in seconds
    #[arg(long)]
    time_limit: Option<f64>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct VarioArgs {
    /// IGC/GPX/FIT file
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "vario.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// JSON file with default parameters (flags override it)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Smoothing window in samples
    #[arg(long)]
    window: Option<usize>,

    /// Smoothing kernel
    #[arg(long, value_enum)]
    kernel: Option<KernelOpt>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// IGC/GPX/FIT files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KernelOpt {
    Moving,
    Binomial,
}

impl From<KernelOpt> for Kernel {
    fn from(value: KernelOpt) -> Self {
        match value {
            KernelOpt::Moving => Kernel::Moving,
            KernelOpt::Binomial => Kernel::Binomial,
        }
    }
}

/// Parameters accepted by `--config`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
struct ScoreConfig {
    solve: SolveParams,
    vario: VarioParams,
}

#[derive(Debug, Serialize)]
struct FlightReport<'a> {
    file: String,
    name: &'a str,
    pilot: Option<&'a str>,
    glider: Option<&'a str>,
    site: Option<&'a str>,
    fixes: usize,
    params_hash: &'a str,
    solution: &'a Solution,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Score(args) => args.verbose,
        Command::Vario(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Score(args) => handle_score(args),
        Command::Vario(args) => handle_vario(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn handle_score(args: ScoreArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut params = config.solve;
    if let Some(points) = args.points {
        params.points = points;
    }
    if let Some(guess) = args.guess {
        params.guess = guess;
    }
    if let Some(max_iter) = args.max_iter {
        params.max_iter = max_iter;
    }
    if args.time_limit.is_some() {
        params.time_limit_s = args.time_limit;
    }
    let params_hash = params.params_hash_sha256()?;

    let t_parse = Instant::now();
    let flights = read_flights(&args.inputs)?;
    if args.profile || args.verbose {
        info!(
            "Parse stage: {:.1} ms ({} files)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            flights.len()
        );
    }

    let mut scored = Vec::with_capacity(flights.len());
    for (path, flight) in &flights {
        let t_solve = Instant::now();
        let solver = TurningPointSolver::new(&flight.track, params.clone());
        let solution = solver
            .solve()
            .with_context(|| format!("failed to score {}", path.display()))?;
        if args.profile || args.verbose {
            info!(
                "Solve stage {}: {:.1} ms ({} rounds, {} distance rows)",
                flight.name,
                t_solve.elapsed().as_secs_f64() * 1000.0,
                solution.rounds,
                solver.distance_index().materialized_rows()
            );
        }
        info!(
            "{}: {:.3} km over {} turn points ({:?})",
            flight.name,
            solution.distance_m / 1000.0,
            params.points,
            solution.termination
        );
        scored.push((path, flight, solution));
    }

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_turnpoints(&scored, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_turnpoints(&scored, &mut writer)?;
        info!("Wrote turn points CSV: {}", args.output.display());
    }

    if let Some(json_path) = args.json.as_ref() {
        let reports: Vec<FlightReport> = scored
            .iter()
            .map(|(path, flight, solution)| FlightReport {
                file: path.display().to_string(),
                name: &flight.name,
                pilot: flight.info.pilot.as_deref(),
                glider: flight.info.glider.as_deref(),
                site: flight.info.site.as_deref(),
                fixes: flight.track.len(),
                params_hash: &params_hash,
                solution,
            })
            .collect();
        let text = serde_json::to_string_pretty(&reports)?;
        fs::write(json_path, text)
            .with_context(|| format!("failed to write {}", json_path.display()))?;
        info!("Wrote JSON report: {}", json_path.display());
    }

    Ok(())
}

fn handle_vario(args: VarioArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut params = config.vario;
    if let Some(window) = args.window {
        params.window = window;
    }
    if let Some(kernel) = args.kernel {
        params.kernel = kernel.into();
    }

    let flight = read_flight(&args.input)?;
    let rates = climb_rates(&flight.track, &params);
    let ramp = ColorRamp::default();

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_vario_rows(&flight, &rates, &ramp, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_vario_rows(&flight, &rates, &ramp, &mut writer)?;
        info!(
            "Wrote climb rates: {} ({} segments)",
            args.output.display(),
            rates.len()
        );
    }
    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let flights = read_flights(&args.inputs)?;
    let mut report = String::new();
    for (path, flight) in &flights {
        report.push_str(&flight_summary(path, flight));
        report.push('\n');
    }

    if args.output.as_os_str() == "-" {
        io::stdout().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Inspection report written: {}", args.output.display());
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ScoreConfig> {
    let Some(path) = path else {
        return Ok(ScoreConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ScoreConfig = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid config", path.display()))?;
    Ok(config)
}

/// Parse all inputs in parallel, keeping the command-line order.
fn read_flights(inputs: &[PathBuf]) -> Result<Vec<(PathBuf, Flight)>> {
    if inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    inputs
        .par_iter()
        .map(|path| -> Result<(PathBuf, Flight)> { Ok((path.clone(), read_flight(path)?)) })
        .collect()
}

fn read_flight(path: &Path) -> Result<Flight> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hint = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("igc");
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("flight");
    let flight = parse_flight(&data, name, hint)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if flight.track.is_empty() {
        warn!("{} contains no fixes", path.display());
    }
    Ok(flight)
}

fn write_turnpoints<W: Write>(
    scored: &[(&PathBuf, &Flight, Solution)],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "file",
        "vertex",
        "fix_index",
        "time",
        "latitude",
        "longitude",
        "gps_altitude_m",
        "leg_m",
        "bearing_deg",
    ])?;
    for (path, flight, solution) in scored {
        write_turnpoint_rows(path, flight, solution, writer)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_turnpoint_rows<W: Write>(
    path: &Path,
    flight: &Flight,
    solution: &Solution,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let index = DistanceIndex::new(&flight.track);
    let fixes = flight.track.fixes();
    let file = path.display().to_string();
    let mut previous: Option<usize> = None;
    for (vertex, &idx) in solution.indices.iter().enumerate() {
        let fix = fixes
            .get(idx)
            .ok_or_else(|| anyhow!("turn point {} outside track of {}", idx, fixes.len()))?;
        let (leg, bearing) = match previous {
            Some(prev) => (
                format!("{:.1}", index.distance(prev, idx)),
                index
                    .bearing(prev, idx)
                    .map_or_else(String::new, |b| format!("{:.1}", b)),
            ),
            None => (String::new(), String::new()),
        };
        writer.write_record([
            file.clone(),
            vertex.to_string(),
            idx.to_string(),
            iso_time(&fix.time),
            format!("{:.6}", fix.latitude),
            format!("{:.6}", fix.longitude),
            format!("{:.0}", fix.gps_altitude_m),
            leg,
            bearing,
        ])?;
        previous = Some(idx);
    }
    Ok(())
}

fn write_vario_rows<W: Write>(
    flight: &Flight,
    rates: &[f64],
    ramp: &ColorRamp,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "segment",
        "start_time",
        "end_time",
        "latitude",
        "longitude",
        "gps_altitude_m",
        "climb_m_s",
        "kml_color",
    ])?;
    let fixes = flight.track.fixes();
    for (segment, (pair, &rate)) in fixes.windows(2).zip(rates).enumerate() {
        let color = ramp
            .color(rate)
            .map_or_else(String::new, |c| c.kml_hex(255));
        writer.write_record([
            segment.to_string(),
            iso_time(&pair[0].time),
            iso_time(&pair[1].time),
            format!("{:.6}", pair[1].latitude),
            format!("{:.6}", pair[1].longitude),
            format!("{:.0}", pair[1].gps_altitude_m),
            format!("{:.2}", rate),
            color,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn iso_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn flight_summary(path: &Path, flight: &Flight) -> String {
    let track = &flight.track;
    let mut out = String::new();
    out.push_str(&format!("FILE: {}\n", path.display()));
    out.push_str(&format!("  name: {}\n", flight.name));
    let fields = [
        ("pilot", flight.info.pilot.as_deref()),
        ("glider", flight.info.glider.as_deref()),
        ("site", flight.info.site.as_deref()),
    ];
    for (label, value) in fields {
        out.push_str(&format!("  {}: {}\n", label, value.unwrap_or("n/a")));
    }
    if let Some(date) = flight.info.date {
        out.push_str(&format!("  date: {}\n", date));
    }
    out.push_str(&format!("  fixes: {}\n", track.len()));
    if let (Some(first), Some(last)) = (track.fixes().first(), track.fixes().last()) {
        out.push_str(&format!(
            "  time: {} .. {} ({:.0} s)\n",
            iso_time(&first.time),
            iso_time(&last.time),
            track.duration_s()
        ));
        let (mut lat_min, mut lat_max) = (f64::MAX, f64::MIN);
        let (mut lon_min, mut lon_max) = (f64::MAX, f64::MIN);
        let mut alt_max = f64::MIN;
        for fix in track.fixes() {
            lat_min = lat_min.min(fix.latitude);
            lat_max = lat_max.max(fix.latitude);
            lon_min = lon_min.min(fix.longitude);
            lon_max = lon_max.max(fix.longitude);
            alt_max = alt_max.max(fix.gps_altitude_m);
        }
        out.push_str(&format!(
            "  bbox: lat {:.5}..{:.5}, lon {:.5}..{:.5}\n",
            lat_min, lat_max, lon_min, lon_max
        ));
        out.push_str(&format!("  max_gps_altitude_m: {:.0}\n", alt_max));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const IGC: &str = "HFDTE040721
HFPLTPILOTINCHARGE:Jane Doe
B1000004630000N00800000EA0150001510
B1000104631000N00801000EA0152001530
B1000204633000N00803000EA0153001540
B1000304632000N00806000EA0151001520
";

    fn sample_flight() -> Flight {
        parse_flight(IGC.as_bytes(), "sample.igc", "igc").unwrap()
    }

    #[test]
    fn config_defaults_and_partial_json() {
        let config = load_config(None).unwrap();
        assert_eq!(config, ScoreConfig::default());

        let parsed: ScoreConfig =
            serde_json::from_str(r#"{"solve": {"points": 5}, "vario": {"kernel": "moving"}}"#)
                .unwrap();
        assert_eq!(parsed.solve.points, 5);
        assert_eq!(parsed.solve.max_iter, 20);
        assert_eq!(parsed.vario.kernel, Kernel::Moving);
        assert_eq!(parsed.vario.window, 20);
    }

    #[test]
    fn turnpoint_rows_include_legs() {
        let flight = sample_flight();
        let params = SolveParams {
            points: 1,
            ..SolveParams::default()
        };
        let solution = TurningPointSolver::new(&flight.track, params).solve().unwrap();
        let path = PathBuf::from("sample.igc");
        let scored = vec![(&path, &flight, solution)];
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_turnpoints(&scored, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("file,vertex,fix_index"));
        // First vertex has no incoming leg.
        assert!(lines[1].ends_with(",,"));
        assert!(!lines[2].ends_with(",,"));
    }

    #[test]
    fn vario_rows_cover_every_segment() {
        let flight = sample_flight();
        let params = VarioParams {
            window: 1,
            kernel: Kernel::Moving,
        };
        let rates = climb_rates(&flight.track, &params);
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_vario_rows(&flight, &rates, &ColorRamp::default(), &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 4);
        // 20 m in 10 s.
        assert!(text.lines().nth(1).unwrap().contains(",2.00,"));
    }

    #[test]
    fn summary_lists_headers_and_extent() {
        let flight = sample_flight();
        let summary = flight_summary(Path::new("sample.igc"), &flight);
        assert!(summary.contains("pilot: Jane Doe"));
        assert!(summary.contains("glider: n/a"));
        assert!(summary.contains("fixes: 4"));
        assert!(summary.contains("(30 s)"));
        assert!(summary.contains("max_gps_altitude_m: 1540"));
    }
}

use std::ffi::OsString;
use std::io::{Read, Write};

use anyhow::{self, Context};
use clap::Parser;

use crate::core::configuration::{
    self, CliOptions, Command, ConfigOptions, DecodeOptions, RunOptions, ScenarioFile,
};
use crate::core::engine::Engine;
use crate::core::logger::vnet_logger;
use crate::core::scenario;
use crate::host::session::GuestSession;
use crate::network::capture::PcapCapture;

/// Main entry point for the command-line runner.
pub fn run_vnet(args: Vec<OsString>) -> anyhow::Result<()> {
    // parse the options from the command line
    let options = match CliOptions::try_parse_from(args.clone()) {
        Ok(x) => x,
        Err(e) => {
            if e.use_stderr() {
                eprint!("{}", e);
                std::process::exit(1);
            } else {
                print!("{}", e);
                std::process::exit(0);
            }
        }
    };

    match options.command {
        Command::Run(options) => run_scenario(&options, &args),
        Command::Decode(options) => decode_frames(&options),
        Command::Schema => {
            let schema = configuration::scenario_schema();
            let stdout = std::io::stdout();
            let mut stdout = stdout.lock();
            serde_json::to_writer_pretty(&mut stdout, &schema)
                .context("Could not write the scenario schema")?;
            writeln!(stdout)?;
            Ok(())
        }
    }
}

fn run_scenario(options: &RunOptions, args: &[OsString]) -> anyhow::Result<()> {
    // read from stdin if the scenario filename is given as '-'
    let mut yaml = String::new();
    if options.scenario == "-" {
        std::io::stdin()
            .read_to_string(&mut yaml)
            .context("Could not read the scenario from stdin")?;
    } else {
        yaml = std::fs::read_to_string(&options.scenario)
            .context(format!("Could not open scenario file {:?}", &options.scenario))?;
    }

    let scenario_file: ScenarioFile = serde_yaml::from_str(&yaml).context(format!(
        "Could not parse scenario file {:?}",
        &options.scenario
    ))?;

    // generate the final configuration from the scenario file and cli options
    let config = ConfigOptions::new(scenario_file, options);

    if options.show_config {
        eprintln!("{:#?}", config);
        return Ok(());
    }

    // disable log buffering during startup so that we see every message immediately in the terminal
    let log_level = config.log_level();
    vnet_logger::init(log_level.to_level_filter()).context("Could not start the logger")?;
    vnet_logger::set_buffering_enabled(false);

    // check if some log levels have been compiled out
    if log_level > log::STATIC_MAX_LEVEL {
        log::warn!(
            "Log level set to {}, but messages higher than {} have been compiled out",
            log_level,
            log::STATIC_MAX_LEVEL,
        );
    }

    for arg in args {
        log::debug!("arg: {}", arg.to_string_lossy());
    }

    scenario::validate_script(&config).context("Invalid scenario script")?;
    let policy = scenario::build_policy(&config).context("Invalid scenario")?;

    let mut engine = Engine::with_config(config.engine_config(), policy);

    if let Some(path) = &options.pcap {
        let file = std::fs::File::create(path)
            .context(format!("Could not create pcap file {:?}", path))?;
        let capture = PcapCapture::new(std::io::BufWriter::new(file))
            .context(format!("Could not write to pcap file {:?}", path))?;
        engine.add_observer(capture);
    }

    log::debug!("Startup checks passed, running the scenario script");
    vnet_logger::set_buffering_enabled(true);

    let report = {
        let session = GuestSession::new(&mut engine);
        let stdout = std::io::stdout();
        let report = scenario::run_script(&session, &config, stdout.lock())
            .context("Could not write the received datagrams")?;
        session.end();
        report
    };

    log::debug!(
        "Script finished with {} frames still in the outbox",
        engine.pending()
    );

    if options.stats {
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();
        engine
            .stats()
            .write_json(&mut stdout)
            .context("Could not write the network statistics")?;
        writeln!(stdout)?;
    }

    // dropping the engine flushes the pcap file
    drop(engine);

    if !report.succeeded() {
        for failure in &report.failures {
            log::error!("{failure}");
        }
        return Err(anyhow::anyhow!(
            "{} of the scenario's script steps failed",
            report.failures.len()
        ));
    }

    Ok(())
}

fn decode_frames(options: &DecodeOptions) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();

    for (i, hex) in options.frames.iter().enumerate() {
        let bytes = parse_hex(hex).context(format!("Frame {i} is not valid hex"))?;

        let decoded = if options.ethernet {
            vnet_wire::decode_ethernet_frame(&bytes)
        } else {
            Engine::decode_frame(&bytes).map(Some)
        };

        match decoded {
            Ok(Some(packet)) => writeln!(stdout, "frame {i}:\n{packet}")?,
            Ok(None) => writeln!(stdout, "frame {i}: not an IPv4 frame")?,
            Err(e) => writeln!(stdout, "frame {i}: {e}")?,
        }
    }

    Ok(())
}

/// Parse hex digits, ignoring whitespace and ':' separators.
fn parse_hex(hex: &str) -> anyhow::Result<Vec<u8>> {
    let digits: Vec<u8> = hex
        .bytes()
        .filter(|x| !x.is_ascii_whitespace() && *x != b':')
        .collect();

    if let Some(x) = digits.iter().find(|x| !x.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid hex digit {:?}", char::from(*x));
    }
    if digits.len() % 2 != 0 {
        anyhow::bail!("Odd number of hex digits ({})", digits.len());
    }

    let nibble = |x: u8| (x as char).to_digit(16).unwrap() as u8;
    Ok(digits
        .chunks(2)
        .map(|pair| nibble(pair[0]) << 4 | nibble(pair[1]))
        .collect())
}

/// Run vnet and report any error. Returns the process exit code.
pub fn main_run_vnet(args: impl IntoIterator<Item = OsString>) -> i32 {
    let result = run_vnet(args.into_iter().collect());
    log::logger().flush();

    if let Err(e) = result {
        // log the full error and its context
        if log::log_enabled!(log::Level::Error) {
            for line in format!("{:?}", e).split('\n') {
                log::error!("{}", line);
            }
            log::logger().flush();

            // print the short error
            eprintln!("** vnet did not complete successfully: {}", e);
            eprintln!("** See the log for details");
        } else {
            eprintln!("{:?}", e);
        }

        return 1;
    }

    0
}

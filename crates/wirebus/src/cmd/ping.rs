use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::cmd::PingArgs;
use crate::exit::{rpc_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_value, OutputFormat};

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }

    let proxy = wirebus_rpc::connect(&args.path, &args.service)
        .map_err(|err| rpc_error("connect failed", err))?;

    let mut round_trips = Vec::with_capacity(args.count);
    for seq in 0..args.count {
        let start = Instant::now();
        proxy
            .call("echo", json!({ "seq": seq }))
            .map_err(|err| rpc_error("ping failed", err))?;
        round_trips.push(start.elapsed());
    }
    proxy.close();

    print_value(&summarize(&args.service, &round_trips), format);
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct PingSummary<'a> {
    service: &'a str,
    count: usize,
    min_us: u64,
    avg_us: u64,
    max_us: u64,
}

fn summarize(service: &str, round_trips: &[Duration]) -> serde_json::Value {
    let micros: Vec<u64> = round_trips
        .iter()
        .map(|rt| rt.as_micros() as u64)
        .collect();
    let summary = PingSummary {
        service,
        count: micros.len(),
        min_us: micros.iter().min().copied().unwrap_or(0),
        avg_us: if micros.is_empty() {
            0
        } else {
            micros.iter().sum::<u64>() / micros.len() as u64
        },
        max_us: micros.iter().max().copied().unwrap_or(0),
    };
    serde_json::to_value(&summary).unwrap_or_else(|_| json!(null))
}

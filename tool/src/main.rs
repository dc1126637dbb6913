// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Reads base64 encoded histograms, one per line from stdin or one per
//! positional argument, and prints approximate statistics for each as a JSON
//! object. With no statistics requested, prints a raw dump mapping each
//! bucket edge to its count.

use getopts::Options;
use log::{error, warn};
use loghist::Histogram;
use serde_json::{json, Map, Value};

use std::io::BufRead;

// Inputs longer than this are rejected rather than truncated.
const MAX_LINE: usize = 256 * 1024;

struct Calcs {
    above: Vec<f64>,
    below: Vec<f64>,
    quantiles: Vec<f64>,
    inverse: Vec<f64>,
}

impl Calcs {
    fn any(&self) -> bool {
        !self.above.is_empty()
            || !self.below.is_empty()
            || !self.quantiles.is_empty()
            || !self.inverse.is_empty()
    }
}

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();
    std::process::exit(run());
}

fn run() -> i32 {
    let args: Vec<String> = std::env::args().collect();

    let mut opts = Options::new();
    opts.optflag("h", "", "print this help");
    opts.optmulti("a", "", "compute number of samples above <val>", "VAL");
    opts.optmulti("b", "", "compute number of samples below <val>", "VAL");
    opts.optmulti("p", "", "compute approximate percentile", "0-100");
    opts.optmulti("i", "", "compute approximate inverse quantile at <val>", "VAL");
    opts.optflag("C", "", "calculate difference between cumulative histograms");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(err) => {
            error!("{err}");
            return -1;
        }
    };

    if matches.opt_present("h") {
        let brief = format!("Usage: {} [options] [hist1 [hist2 [...]]]", args[0]);
        print!("{}", opts.usage(&brief));
        println!("\nIf no hists are specified, stdin is read");
        return 0;
    }

    let above = match parse_values(&matches, "a") {
        Ok(values) => values,
        Err(code) => return code,
    };
    let below = match parse_values(&matches, "b") {
        Ok(values) => values,
        Err(code) => return code,
    };
    let inverse = match parse_values(&matches, "i") {
        Ok(values) => values,
        Err(code) => return code,
    };
    let percents = match parse_values(&matches, "p") {
        Ok(values) => values,
        Err(code) => return code,
    };
    let mut quantiles = Vec::new();
    for percent in percents {
        if !(0.0..=100.0).contains(&percent) {
            error!("invalid percentile {percent}");
            return -1;
        }
        quantiles.push(percent / 100.0);
    }
    quantiles.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let calcs = Calcs {
        above,
        below,
        quantiles,
        inverse,
    };
    let cumulative = matches.opt_present("C");

    let mut last: Option<Histogram> = None;
    if !matches.free.is_empty() {
        for input in &matches.free {
            if let Some(code) = process(input, &mut last, &calcs, cumulative) {
                return code;
            }
        }
    } else {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    error!("reading stdin: {err}");
                    return -1;
                }
            };
            if let Some(code) = process(&line, &mut last, &calcs, cumulative) {
                return code;
            }
        }
    }
    0
}

fn parse_values(matches: &getopts::Matches, flag: &str) -> Result<Vec<f64>, i32> {
    let mut out = Vec::new();
    for raw in matches.opt_strs(flag) {
        match raw.parse::<f64>() {
            Ok(value) => out.push(value),
            Err(_) => {
                error!("invalid -{flag} value: {raw}");
                return Err(-1);
            }
        }
    }
    Ok(out)
}

// Handles one input. Returns an exit code to abort with, or None to
// continue.
fn process(
    input: &str,
    last: &mut Option<Histogram>,
    calcs: &Calcs,
    cumulative: bool,
) -> Option<i32> {
    if input.len() > MAX_LINE {
        error!("histogram too large");
        return Some(-1);
    }
    if input.trim().is_empty() {
        return None;
    }
    if let Some(histogram) = decode(input) {
        if let Some(shown) = cumulative_diff(last.as_ref(), &histogram, cumulative) {
            println!("{}", render(&shown, calcs));
        }
        *last = Some(histogram);
    }
    None
}

fn decode(input: &str) -> Option<Histogram> {
    let mut histogram = Histogram::new();
    match histogram.deserialize_b64(input) {
        Ok(_) => Some(histogram),
        Err(err) => {
            warn!("histogram invalid: {err}");
            None
        }
    }
}

// With `-C` each histogram is a cumulative counter; report the delta
// against the previous one. A delta that fails to subtract means the
// counter reset.
fn cumulative_diff(
    last: Option<&Histogram>,
    now: &Histogram,
    cumulative: bool,
) -> Option<Histogram> {
    if !cumulative {
        return Some(now.clone());
    }
    let base = last?;
    let mut result = now.clone();
    match result.subtract(&[base]) {
        Ok(()) => Some(result),
        Err(_) => {
            warn!("histogram cumulative calculation reset");
            None
        }
    }
}

fn render(histogram: &Histogram, calcs: &Calcs) -> String {
    if calcs.any() {
        stats_json(histogram, calcs).to_string()
    } else {
        buckets_json(histogram).to_string()
    }
}

fn stats_json(histogram: &Histogram, calcs: &Calcs) -> Value {
    let mut obj = Map::new();
    for &value in &calcs.above {
        obj.insert(
            format!("above({value})"),
            json!(histogram.approx_count_above(value)),
        );
    }
    for &value in &calcs.below {
        obj.insert(
            format!("below({value})"),
            json!(histogram.approx_count_below(value)),
        );
    }
    if !calcs.quantiles.is_empty() {
        match histogram.approx_quantile(&calcs.quantiles) {
            Ok(out) => {
                for (q, value) in calcs.quantiles.iter().zip(out) {
                    obj.insert(format!("p({:.6}%)", q * 100.0), float_json(value));
                }
            }
            Err(err) => warn!("quantile calculation failed: {err}"),
        }
    }
    if !calcs.inverse.is_empty() {
        let out = histogram.approx_inverse_quantile(&calcs.inverse);
        for (value, fraction) in calcs.inverse.iter().zip(out) {
            obj.insert(format!("invq({value:.6})"), float_json(fraction));
        }
    }
    obj.insert("count".to_string(), json!(histogram.sample_count()));
    Value::Object(obj)
}

fn buckets_json(histogram: &Histogram) -> Value {
    let mut obj = Map::new();
    for (bucket, count) in histogram {
        obj.insert(format!("{}", bucket.to_f64()), json!(count));
    }
    Value::Object(obj)
}

fn float_json(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Histogram {
        let mut histogram = Histogram::new();
        for value in [1.0, 1.0, 2.0, 3.0] {
            histogram.insert(value, 1);
        }
        histogram
    }

    #[test]
    fn stats_object_shape() {
        let calcs = Calcs {
            above: vec![1.0],
            below: vec![1.0],
            quantiles: vec![0.5],
            inverse: vec![2.0],
        };
        let value = stats_json(&sample(), &calcs);
        assert_eq!(value["above(1)"], json!(2));
        assert_eq!(value["below(1)"], json!(0));
        assert_eq!(value["count"], json!(4));
        assert!(value["p(50.000000%)"].is_number());
        assert!(value["invq(2.000000)"].is_number());
    }

    #[test]
    fn bucket_dump_shape() {
        let value = buckets_json(&sample());
        assert_eq!(value["1"], json!(2));
        assert_eq!(value["2"], json!(1));
        assert_eq!(value["3"], json!(1));
    }

    #[test]
    fn cumulative_diffing() {
        let mut first = Histogram::new();
        first.insert(1.0, 2);
        let mut second = first.clone();
        second.insert(1.0, 3);

        // no base yet
        assert!(cumulative_diff(None, &first, true).is_none());
        let delta = cumulative_diff(Some(&first), &second, true).unwrap();
        assert_eq!(delta.sample_count(), 3);
        // counter reset: the new cumulative value is smaller
        assert!(cumulative_diff(Some(&second), &first, true).is_none());
        // without -C the histogram passes through
        assert_eq!(cumulative_diff(None, &first, false).unwrap(), first);
    }

    #[test]
    fn round_trip_through_text() {
        let encoded = sample().serialize_b64();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
        assert!(decode("not base64 at all").is_none());
    }
}

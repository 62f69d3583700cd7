//! Command-line parsing for the terminal client.

use crate::ws::StreamOptions;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";

#[derive(Debug, Default, PartialEq)]
pub struct ParsedArgs {
    pub url: Option<String>,
    pub stream: StreamOptions,
    /// Stop after this many snapshots.
    pub count: Option<u64>,
    pub demo: bool,
}

impl ParsedArgs {
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_URL)
    }
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--policy coalesce|lossless] [--backlog N|-b N] [--metrics a,b|-m a,b] \
         [--count N|-n N] [--gzip] [--demo] [ws://HOST:PORT/ws]"
    )
}

fn number<T: std::str::FromStr>(flag: &str, v: Option<String>, prog: &str) -> Result<T, String> {
    v.as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("{flag} needs a number\n{}", usage(prog)))
}

/// `Err` carries text for the user: usage on `--help`, otherwise what was wrong.
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "hostpulse".into());
    let mut parsed = ParsedArgs::default();

    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        match flag.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--policy" => {
                parsed.stream.policy = inline.or_else(|| it.next());
                if parsed.stream.policy.is_none() {
                    return Err(format!("--policy needs a value\n{}", usage(&prog)));
                }
            }
            "--backlog" | "-b" => {
                parsed.stream.backlog = Some(number(&flag, inline.or_else(|| it.next()), &prog)?)
            }
            "--metrics" | "-m" => parsed.stream.metrics = inline.or_else(|| it.next()),
            "--count" | "-n" => {
                parsed.count = Some(number(&flag, inline.or_else(|| it.next()), &prog)?)
            }
            "--gzip" => parsed.stream.gzip = true,
            "--demo" => parsed.demo = true,
            _ if arg.starts_with('-') => {
                return Err(format!("Unexpected argument {arg:?}\n{}", usage(&prog)))
            }
            _ => {
                if parsed.url.is_some() {
                    return Err(format!("Unexpected argument. {}", usage(&prog)));
                }
                parsed.url = Some(arg);
            }
        }
    }
    Ok(parsed)
}

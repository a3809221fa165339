//! `--opt KEY[=VALUE]` parsing

use anyhow::{bail, Context, Result};
use openssl_exec_core::domain::{OptionValue, Options};

/// Build Options from an optional JSON object followed by `--opt` entries.
///
/// - `KEY` or `KEY=true` -> `-KEY`
/// - `KEY=false` -> bare `KEY`
/// - `KEY=VALUE` -> `-KEY VALUE`; repeating the key collects a list at the
///   key's first position
pub fn build_options(json: Option<&str>, opts: &[String]) -> Result<Options> {
    let mut options = match json {
        Some(json) => serde_json::from_str(json).context("Invalid --options-json")?,
        None => Options::new(),
    };

    for opt in opts {
        let (key, value) = parse_opt(opt)?;
        let merged = match (options.get(&key), value) {
            (Some(OptionValue::Value(first)), OptionValue::Value(next)) => {
                OptionValue::Values(vec![first.clone(), next])
            }
            (Some(OptionValue::Values(existing)), OptionValue::Value(next)) => {
                let mut values = existing.clone();
                values.push(next);
                OptionValue::Values(values)
            }
            (_, value) => value,
        };
        options.insert(key, merged);
    }

    Ok(options)
}

fn parse_opt(opt: &str) -> Result<(String, OptionValue)> {
    let (key, value) = match opt.split_once('=') {
        Some((key, "true")) => (key, OptionValue::Flag),
        Some((key, "false")) => (key, OptionValue::Bare),
        Some((key, value)) => (key, OptionValue::Value(value.to_string())),
        None => (opt, OptionValue::Flag),
    };

    if key.is_empty() {
        bail!("Empty option name in {:?}", opt);
    }

    Ok((key.to_string(), value))
}

use std::collections::HashMap;
use std::time::Duration;

use serde_yaml::Value;
use thiserror::Error;

use crate::{executor, interpolate, scanner};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("step {0}: {1}")]
    Step(usize, String),
}

/// An experiment: named variables plus an ordered list of steps.
#[derive(Debug, Clone)]
pub struct Plan {
    pub variables: HashMap<String, Value>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct Step {
    /// Offset from the start of the run; `None` runs as soon as the previous step ends.
    pub time: Option<Duration>,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Executor(executor::Command),
    Scanner(scanner::Command),
    Interpolator(interpolate::Command),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Executor(executor::Command::RunShell { .. }) => "executor.run_shell",
            Command::Executor(executor::Command::StopAll) => "executor.stop_all",
            Command::Scanner(scanner::Command::Scan { .. }) => "scanner.scan",
            Command::Scanner(scanner::Command::Park) => "scanner.park",
            Command::Interpolator(interpolate::Command::Fit { .. }) => "interpolator.fit",
        }
    }
}

impl Plan {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(yaml: &str) -> Result<Self, ParseError> {
        let root: Value = serde_yaml::from_str(yaml)?;

        let variables: HashMap<String, Value> = root
            .get("variables")
            .map(|v| serde_yaml::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();

        let steps = root
            .get("steps")
            .and_then(Value::as_sequence)
            .ok_or_else(|| ParseError::Step(0, "missing 'steps'".into()))?
            .iter()
            .enumerate()
            .map(|(i, v)| parse_step(i, v, &variables))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Plan { variables, steps })
    }
}

fn parse_step(i: usize, value: &Value, vars: &HashMap<String, Value>) -> Result<Step, ParseError> {
    let err = |msg: String| ParseError::Step(i, msg);
    let map = value
        .as_mapping()
        .ok_or_else(|| err("expected mapping".into()))?;

    let time = match map.get("time").map(|v| substitute(v, vars)) {
        None => None,
        Some(Value::String(s)) => Some(parse_offset(&s).map_err(err)?),
        Some(other) => return Err(err(format!("time must be a string, got {:?}", other))),
    };

    let mut modules = map.iter().filter(|(k, _)| k.as_str() != Some("time"));
    let (module, body) = modules
        .next()
        .ok_or_else(|| err("no command found".into()))?;
    if let Some((extra, _)) = modules.next() {
        return Err(err(format!(
            "more than one command in step (extra key {:?})",
            extra.as_str().unwrap_or("?")
        )));
    }

    let module = module
        .as_str()
        .ok_or_else(|| err("command must be string".into()))?;
    let body = substitute(body, vars);
    let decode_err = |e: serde_yaml::Error| err(format!("{}: {}", module, e));

    let command = match module {
        "executor" => Command::Executor(serde_yaml::from_value(body).map_err(decode_err)?),
        "scanner" => Command::Scanner(serde_yaml::from_value(body).map_err(decode_err)?),
        "interpolator" => {
            Command::Interpolator(serde_yaml::from_value(body).map_err(decode_err)?)
        }
        _ => return Err(err(format!("unknown module: {}", module))),
    };

    Ok(Step { time, command })
}

/// Parses `T+<humantime>`, e.g. `T+30s` or `t+1m 30s`.
fn parse_offset(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let rest = s
        .strip_prefix(['T', 't'])
        .ok_or_else(|| format!("time must be relative to plan start (T+...): {}", s))?;
    if rest.starts_with('-') {
        return Err(format!("negative offsets are not allowed: {}", s));
    }
    let rest = rest.strip_prefix('+').unwrap_or(rest);
    humantime::parse_duration(rest.trim()).map_err(|e| format!("{}: {}", s, e))
}

/// Replaces `$name` references. A string that is exactly one reference takes
/// the variable's value with its type; otherwise scalars are spliced in as text.
fn substitute(value: &Value, vars: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(v) = s.trim().strip_prefix('$').and_then(|name| vars.get(name)) {
                return v.clone();
            }
            Value::String(splice(s, vars))
        }
        Value::Mapping(m) => Value::Mapping(
            m.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        Value::Sequence(items) => {
            Value::Sequence(items.iter().map(|v| substitute(v, vars)).collect())
        }
        other => other.clone(),
    }
}

fn splice(s: &str, vars: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let len = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        let name = &tail[..len];
        match vars.get(name).and_then(scalar_text) {
            Some(text) if !name.is_empty() => out.push_str(&text),
            _ => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &tail[len..];
    }
    out.push_str(rest);
    out
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

//! Operator commands read by the balancer binary.
//!
//! ```text
//! update <metric,metric,...> <interval_secs>   broadcast CONFIG_UPDATE
//! status                                       print the pool status
//! quit                                         shut the pool down
//! ```

use thiserror::Error;

use crate::protocol::ConfigUpdate;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Update(ConfigUpdate),
    Status,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (expected update, status or quit)")]
    Unknown(String),

    #[error("usage: update <metric,metric,...> <interval_secs>")]
    Usage,

    #[error("metric list is empty")]
    NoMetrics,

    #[error("invalid interval '{0}': expected a positive number of seconds")]
    InvalidInterval(String),
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(CommandError::Empty);
    };

    match verb.to_ascii_lowercase().as_str() {
        "update" => {
            let (Some(metrics), Some(interval), None) = (words.next(), words.next(), words.next())
            else {
                return Err(CommandError::Usage);
            };
            parse_update(metrics, interval).map(Command::Update)
        }
        "status" => Ok(Command::Status),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_update(metrics: &str, interval: &str) -> Result<ConfigUpdate, CommandError> {
    let new_metrics: Vec<String> = metrics
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    if new_metrics.is_empty() {
        return Err(CommandError::NoMetrics);
    }

    let new_check_interval = match interval.parse::<u64>() {
        Ok(secs) if secs > 0 => secs,
        _ => return Err(CommandError::InvalidInterval(interval.to_string())),
    };

    Ok(ConfigUpdate {
        new_metrics,
        new_check_interval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update() {
        assert_eq!(
            parse_command("update cpu_usage_percent,memory_usage_percent 10").unwrap(),
            Command::Update(ConfigUpdate {
                new_metrics: vec!["cpu_usage_percent".into(), "memory_usage_percent".into()],
                new_check_interval: 10,
            })
        );
    }

    #[test]
    fn blank_metric_entries_are_dropped() {
        match parse_command("UPDATE cpu_usage_percent,, 3").unwrap() {
            Command::Update(update) => assert_eq!(update.new_metrics, vec!["cpu_usage_percent"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_updates() {
        assert_eq!(parse_command("update cpu"), Err(CommandError::Usage));
        assert_eq!(parse_command("update a b c"), Err(CommandError::Usage));
        assert_eq!(parse_command("update , 5"), Err(CommandError::NoMetrics));
        assert_eq!(
            parse_command("update cpu 0"),
            Err(CommandError::InvalidInterval("0".into()))
        );
        assert_eq!(
            parse_command("update cpu soon"),
            Err(CommandError::InvalidInterval("soon".into()))
        );
    }

    #[test]
    fn other_commands() {
        assert_eq!(parse_command("  status "), Ok(Command::Status));
        assert_eq!(parse_command("exit"), Ok(Command::Quit));
        assert_eq!(parse_command(""), Err(CommandError::Empty));
        assert_eq!(
            parse_command("restart"),
            Err(CommandError::Unknown("restart".into()))
        );
    }
}

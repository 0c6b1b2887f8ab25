//! Start-up command script.
//!
//! Each step is one line: `wait <ms>`, `space <name>`, `shard <alias>`,
//! `entry <id>`, `command <name> [json-args]`, `info` or `detail`. Steps run
//! in order against a cursor of the current space, shard and entry.

use std::str::FromStr;
use std::time::Duration;

use serde_json::{Value, json};

use shardhub_app::hub::Hub;
use shardhub_app::shard::Shard;
use shardhub_app::space::{FindOptions, Space};
use shardhub_domain::error::HubError;
use shardhub_domain::id::EntryId;

/// How long a `shard` step waits for a replica's home peer.
const SHARD_WAIT: Duration = Duration::from_secs(10);

/// One parsed script line.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Wait(Duration),
    Space(String),
    Shard(String),
    Entry(EntryId),
    Command { name: String, args: Value },
    /// Log a one-line summary of the current entry.
    Info,
    /// Log the full current entry.
    Detail,
}

impl FromStr for Step {
    type Err = ScriptError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));
        let parse_err = |reason: &str| ScriptError::Parse {
            step: line.to_string(),
            reason: reason.to_string(),
        };
        let argument = |what: &str| {
            if rest.is_empty() {
                Err(parse_err(&format!("missing {what}")))
            } else {
                Ok(rest.to_string())
            }
        };
        match word {
            "wait" => rest
                .parse::<u64>()
                .map(|ms| Self::Wait(Duration::from_millis(ms)))
                .map_err(|_| parse_err("expected milliseconds")),
            "space" => argument("space name").map(Self::Space),
            "shard" => argument("shard alias").map(Self::Shard),
            "entry" => argument("entry id").map(|id| Self::Entry(id.into())),
            "command" => {
                let (name, args) = rest
                    .split_once(char::is_whitespace)
                    .map_or((rest, ""), |(name, args)| (name, args.trim()));
                if name.is_empty() {
                    return Err(parse_err("missing command name"));
                }
                let args = if args.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(args).map_err(|err| parse_err(&err.to_string()))?
                };
                Ok(Self::Command {
                    name: name.to_string(),
                    args,
                })
            }
            "info" => Ok(Self::Info),
            "detail" => Ok(Self::Detail),
            "" => Err(parse_err("empty step")),
            _ => Err(parse_err("unknown step")),
        }
    }
}

/// What a step produced.
#[derive(Debug)]
pub enum Output {
    Reply {
        entry: EntryId,
        command: String,
        result: Result<Value, HubError>,
    },
    Info(Value),
    Detail(Value),
}

/// A parsed script.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
}

#[derive(Default)]
struct Cursor {
    space: Option<Space>,
    shard: Option<Shard>,
    entry: Option<EntryId>,
}

impl Script {
    /// Parse every line.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Parse`] for the first malformed line.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Self, ScriptError> {
        let steps = lines
            .iter()
            .map(|line| line.as_ref().parse())
            .collect::<Result<_, _>>()?;
        Ok(Self { steps })
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run the steps against `hub`.
    ///
    /// Command failures are recorded in the output and do not stop the
    /// script; a missing space, shard or entry does.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] when a step lacks its context or cannot
    /// resolve its target.
    #[tracing::instrument(skip_all, fields(steps = self.steps.len()))]
    pub async fn run(&self, hub: &Hub) -> Result<Vec<Output>, ScriptError> {
        let mut cursor = Cursor::default();
        let mut outputs = Vec::new();
        for step in &self.steps {
            tracing::debug!(?step, "script step");
            match step {
                Step::Wait(delay) => tokio::time::sleep(*delay).await,
                Step::Space(name) => {
                    cursor.space = Some(hub.get_space(name)?);
                    cursor.shard = None;
                    cursor.entry = None;
                }
                Step::Shard(alias) => {
                    let space = cursor.space.as_ref().ok_or(ScriptError::NoSpace)?;
                    let options = FindOptions {
                        wait_for_peer: true,
                        timeout: Some(SHARD_WAIT),
                    };
                    cursor.shard = Some(space.find_shard_with(alias, options).await?);
                    cursor.entry = None;
                }
                Step::Entry(id) => {
                    let shard = cursor.shard.as_ref().ok_or(ScriptError::NoShard)?;
                    shard.find(id.as_str())?;
                    cursor.entry = Some(id.clone());
                }
                Step::Command { name, args } => {
                    let (shard, entry) = cursor.target()?;
                    let result = shard.post(entry.as_str(), name, args.clone()).await;
                    match &result {
                        Ok(reply) => tracing::info!(%entry, command = %name, %reply, "command done"),
                        Err(err) => tracing::warn!(%entry, command = %name, error = %err, "command failed"),
                    }
                    outputs.push(Output::Reply {
                        entry: entry.clone(),
                        command: name.clone(),
                        result,
                    });
                }
                Step::Info => {
                    let (shard, entry) = cursor.target()?;
                    let entry = shard.find(entry.as_str())?;
                    let info = json!({
                        "id": entry.id,
                        "kind": entry.kind,
                        "state": entry.state,
                        "cache": entry.cache,
                    });
                    tracing::info!(%info, "entry info");
                    outputs.push(Output::Info(info));
                }
                Step::Detail => {
                    let (shard, entry) = cursor.target()?;
                    let detail = serde_json::to_value(shard.find(entry.as_str())?)
                        .map_err(|err| ScriptError::Render(err.to_string()))?;
                    tracing::info!(%detail, "entry detail");
                    outputs.push(Output::Detail(detail));
                }
            }
        }
        Ok(outputs)
    }
}

impl Cursor {
    fn target(&self) -> Result<(&Shard, &EntryId), ScriptError> {
        let shard = self.shard.as_ref().ok_or(ScriptError::NoShard)?;
        let entry = self.entry.as_ref().ok_or(ScriptError::NoEntry)?;
        Ok((shard, entry))
    }
}

/// Script errors.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("cannot parse step `{step}`: {reason}")]
    Parse { step: String, reason: String },
    #[error("no space selected")]
    NoSpace,
    #[error("no shard selected")]
    NoShard,
    #[error("no entry selected")]
    NoEntry,
    #[error("cannot render entry: {0}")]
    Render(String),
    #[error(transparent)]
    Hub(#[from] HubError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardhub_domain::entry::EntryKind;
    use shardhub_domain::shard::{EntrySeed, ShardDescriptor, ShardSchema};
    use shardhub_domain::space::SpaceDescriptor;

    #[test]
    fn should_parse_every_step_kind() {
        let script = Script::parse(&[
            "wait 2000",
            "space example.org",
            "shard rpi",
            "entry heater1",
            "command power 0.5",
            "command emulatePin {\"pin\": 15, \"value\": 1}",
            "command still",
            "info",
            "detail",
        ])
        .unwrap();
        assert_eq!(
            script.steps(),
            &[
                Step::Wait(Duration::from_secs(2)),
                Step::Space("example.org".to_string()),
                Step::Shard("rpi".to_string()),
                Step::Entry("heater1".into()),
                Step::Command {
                    name: "power".to_string(),
                    args: json!(0.5)
                },
                Step::Command {
                    name: "emulatePin".to_string(),
                    args: json!({"pin": 15, "value": 1})
                },
                Step::Command {
                    name: "still".to_string(),
                    args: Value::Null
                },
                Step::Info,
                Step::Detail,
            ]
        );
    }

    #[test]
    fn should_reject_malformed_steps() {
        for line in ["wait soon", "space", "command", "command x {bad", "jump 3", "  "] {
            assert!(
                matches!(line.parse::<Step>(), Err(ScriptError::Parse { .. })),
                "{line}"
            );
        }
    }

    #[tokio::test]
    async fn should_require_context_before_commands() {
        let hub = Hub::new("rpi");
        let script = Script::parse(&["command get"]).unwrap();
        assert!(matches!(script.run(&hub).await, Err(ScriptError::NoShard)));

        let script = Script::parse(&["shard rpi"]).unwrap();
        assert!(matches!(script.run(&hub).await, Err(ScriptError::NoSpace)));
    }

    #[tokio::test]
    async fn should_stop_on_unknown_entry() {
        let hub = Hub::new("rpi");
        let space = hub
            .add_space(SpaceDescriptor::new("example.org", "rpi"))
            .unwrap();
        space
            .init_shard(
                ShardDescriptor::new(6, "rpi", ShardSchema::Control),
                vec![EntrySeed::new("rpi", EntryKind::Rpi, Value::Null)],
            )
            .await
            .unwrap();

        let script = Script::parse(&["space example.org", "shard rpi", "entry lamp"]).unwrap();
        assert!(matches!(
            script.run(&hub).await,
            Err(ScriptError::Hub(HubError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn should_record_failed_command_and_continue() {
        let hub = Hub::new("rpi");
        let space = hub
            .add_space(SpaceDescriptor::new("example.org", "rpi"))
            .unwrap();
        space
            .init_shard(
                ShardDescriptor::new(6, "rpi", ShardSchema::Control),
                vec![EntrySeed::new("rpi", EntryKind::Rpi, Value::Null)],
            )
            .await
            .unwrap();

        let script =
            Script::parse(&["space example.org", "shard rpi", "entry rpi", "command get", "info"])
                .unwrap();
        let outputs = script.run(&hub).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(matches!(
            &outputs[0],
            Output::Reply { result: Err(HubError::Fatal(_)), .. }
        ));
        let Output::Info(info) = &outputs[1] else {
            panic!("expected info");
        };
        assert_eq!(info["id"], "rpi");
        assert_eq!(info["kind"], "rpi");
    }
}

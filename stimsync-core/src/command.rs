use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword under which the controller stamps its wall-clock reading.
pub const TIMESTAMP_KEY: &str = "t";

/// One named call in a command batch.
///
/// Wire form: `{"name": "...", "args": [...], "kwargs": {...}}`; `args` and
/// `kwargs` may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// The stamped wall-clock time, if any.
    pub fn timestamp(&self) -> Option<f64> {
        self.kwargs.get(TIMESTAMP_KEY).and_then(Value::as_f64)
    }

    /// True only for a numeric `t`; a null or non-numeric `t` counts as
    /// unstamped.
    pub fn has_timestamp(&self) -> bool {
        self.timestamp().is_some()
    }

    pub fn stamp(&mut self, t: f64) {
        self.kwargs.insert(TIMESTAMP_KEY.to_string(), Value::from(t));
    }

    /// Looks up an argument by position first, then by keyword.
    pub fn arg(&self, position: usize, key: &str) -> Option<&Value> {
        self.args.get(position).or_else(|| self.kwargs.get(key))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBatch {
    Batch(Vec<Command>),
    Single(Command),
}

/// Decodes one line of the command stream: a batch, or a lone command.
pub fn decode_batch(line: &[u8]) -> Result<Vec<Command>, serde_json::Error> {
    Ok(match serde_json::from_slice(line)? {
        WireBatch::Batch(batch) => batch,
        WireBatch::Single(cmd) => vec![cmd],
    })
}

/// Encodes a batch as one newline-terminated line.
pub fn encode_batch(batch: &[Command]) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(batch)?;
    line.push(b'\n');
    Ok(line)
}

/// Datagram on the closed-loop side channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OffsetUpdate {
    Theta { radians: f64 },
    Position { x: f64, y: f64, z: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_line_round_trips_and_single_command_is_a_batch() {
        let batch = vec![
            Command::new("load_stim").with_kwarg("name", "SineGrating"),
            Command::new("start_stim").with_kwarg("t", 12.5),
        ];
        let line = encode_batch(&batch).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(decode_batch(&line).unwrap(), batch);

        let single = decode_batch(br#"{"name": "stop_stim"}"#).unwrap();
        assert_eq!(single, vec![Command::new("stop_stim")]);
        assert!(decode_batch(b"[1, 2]").is_err());
    }

    #[test]
    fn offset_update_wire_form() {
        let update: OffsetUpdate =
            serde_json::from_str(r#"{"kind": "theta", "radians": 0.5}"#).unwrap();
        assert_eq!(update, OffsetUpdate::Theta { radians: 0.5 });
    }

    #[test]
    fn args_and_kwargs_default_to_empty() {
        let cmd: Command = serde_json::from_str(r#"{"name": "stop_stim"}"#).unwrap();
        assert_eq!(cmd, Command::new("stop_stim"));
        assert!(cmd.timestamp().is_none());
    }

    #[test]
    fn positional_argument_shadows_keyword() {
        let cmd = Command::new("start_stim").with_arg(3.0).with_kwarg("t", 9.0);
        assert_eq!(cmd.arg(0, "t").and_then(Value::as_f64), Some(3.0));
        assert_eq!(cmd.timestamp(), Some(9.0));
    }

    #[test]
    fn null_time_is_not_a_timestamp() {
        let mut cmd: Command =
            serde_json::from_str(r#"{"name": "start_stim", "kwargs": {"t": null}}"#).unwrap();
        assert!(!cmd.has_timestamp());
        cmd.stamp(4.5);
        assert!(cmd.has_timestamp());
        assert_eq!(cmd.timestamp(), Some(4.5));
    }
}

use serde_json::{Map, Value};
use stimsync_core::{Command, ConfigurationError, TIMESTAMP_KEY};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` is missing argument `{argument}`")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },
    #[error("`{command}` argument `{argument}` {reason}")]
    InvalidArgument {
        command: String,
        argument: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// A screen-level instruction decoded from a wire `Command`.
///
/// Times are `None` when the controller did not stamp the command; the
/// runtime falls back to its own clock.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenCommand {
    LoadStim {
        name: String,
        hold: bool,
        config: Map<String, Value>,
    },
    StartStim {
        t: Option<f64>,
    },
    PauseStim {
        t: Option<f64>,
    },
    StopStim,
    UpdateStim {
        rate: f64,
        t: Option<f64>,
    },
    StartCornerSquare,
    StopCornerSquare,
    WhiteCornerSquare,
    BlackCornerSquare,
    SetCornerSquare {
        color: f64,
    },
    ShowCornerSquare,
    HideCornerSquare,
    SetIdleBackground {
        color: f64,
    },
    SetGlobalFlyPos {
        x: f64,
        y: f64,
        z: f64,
    },
    SetGlobalThetaOffset {
        degrees: f64,
    },
    Quit,
}

struct Args<'a> {
    cmd: &'a Command,
}

impl<'a> Args<'a> {
    fn value(&self, position: usize, key: &str) -> Option<&'a Value> {
        self.cmd.arg(position, key).filter(|v| !v.is_null())
    }

    fn number(&self, position: usize, key: &'static str) -> Result<Option<f64>, CommandError> {
        match self.value(position, key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .filter(|x| x.is_finite())
                .map(Some)
                .ok_or_else(|| self.invalid(key, "must be a finite number")),
        }
    }

    fn required(&self, position: usize, key: &'static str) -> Result<f64, CommandError> {
        self.number(position, key)?
            .ok_or_else(|| CommandError::MissingArgument {
                command: self.cmd.name.clone(),
                argument: key,
            })
    }

    fn invalid(&self, argument: &'static str, reason: &'static str) -> CommandError {
        CommandError::InvalidArgument {
            command: self.cmd.name.clone(),
            argument,
            reason,
        }
    }
}

impl TryFrom<&Command> for ScreenCommand {
    type Error = CommandError;

    fn try_from(cmd: &Command) -> Result<Self, Self::Error> {
        let args = Args { cmd };
        let parsed = match cmd.name.as_str() {
            "load_stim" => {
                let name = match args.value(0, "name") {
                    Some(Value::String(name)) => name.clone(),
                    Some(_) => return Err(args.invalid("name", "must be a string")),
                    None => {
                        return Err(CommandError::MissingArgument {
                            command: cmd.name.clone(),
                            argument: "name",
                        });
                    }
                };
                let hold = match args.value(1, "hold") {
                    None => false,
                    Some(Value::Bool(hold)) => *hold,
                    Some(_) => return Err(args.invalid("hold", "must be a boolean")),
                };
                let config = cmd
                    .kwargs
                    .iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "name" | "hold" | TIMESTAMP_KEY))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Self::LoadStim { name, hold, config }
            }
            "start_stim" => Self::StartStim {
                t: args.number(0, TIMESTAMP_KEY)?,
            },
            "pause_stim" => Self::PauseStim {
                t: args.number(0, TIMESTAMP_KEY)?,
            },
            "stop_stim" => Self::StopStim,
            "update_stim" => Self::UpdateStim {
                rate: args.required(0, "rate")?,
                t: args.number(1, TIMESTAMP_KEY)?,
            },
            "start_corner_square" => Self::StartCornerSquare,
            "stop_corner_square" => Self::StopCornerSquare,
            "white_corner_square" => Self::WhiteCornerSquare,
            "black_corner_square" => Self::BlackCornerSquare,
            "set_corner_square" => Self::SetCornerSquare {
                color: args.required(0, "color")?,
            },
            "show_corner_square" => Self::ShowCornerSquare,
            "hide_corner_square" => Self::HideCornerSquare,
            "set_idle_background" => Self::SetIdleBackground {
                color: args.required(0, "color")?,
            },
            "set_global_fly_pos" => Self::SetGlobalFlyPos {
                x: args.required(0, "x")?,
                y: args.required(1, "y")?,
                z: args.required(2, "z")?,
            },
            "set_global_theta_offset" => Self::SetGlobalThetaOffset {
                degrees: args.required(0, "value")?,
            },
            "quit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(cmd: Command) -> Result<ScreenCommand, CommandError> {
        ScreenCommand::try_from(&cmd)
    }

    #[test]
    fn load_stim_splits_name_hold_and_config() {
        let cmd = Command::new("load_stim")
            .with_kwarg("name", "SineGrating")
            .with_kwarg("hold", true)
            .with_kwarg("rate", 30.0);
        let ScreenCommand::LoadStim { name, hold, config } = parse(cmd).unwrap() else {
            panic!("expected load_stim");
        };
        assert_eq!(name, "SineGrating");
        assert!(hold);
        assert_eq!(config.len(), 1);
        assert_eq!(config["rate"], 30.0);

        let positional = Command::new("load_stim").with_arg("Checkerboard");
        assert!(matches!(
            parse(positional).unwrap(),
            ScreenCommand::LoadStim { hold: false, .. }
        ));
    }

    #[test]
    fn time_is_optional_and_positional_first() {
        assert_eq!(
            parse(Command::new("start_stim")).unwrap(),
            ScreenCommand::StartStim { t: None }
        );
        assert_eq!(
            parse(Command::new("pause_stim").with_arg(4.0).with_kwarg("t", 9.0)).unwrap(),
            ScreenCommand::PauseStim { t: Some(4.0) }
        );
        assert_eq!(
            parse(Command::new("update_stim").with_kwarg("rate", -20).with_kwarg("t", 1.5))
                .unwrap(),
            ScreenCommand::UpdateStim {
                rate: -20.0,
                t: Some(1.5)
            }
        );
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(matches!(
            parse(Command::new("explode")),
            Err(CommandError::Unknown(_))
        ));
        assert!(matches!(
            parse(Command::new("update_stim")),
            Err(CommandError::MissingArgument { argument: "rate", .. })
        ));
        assert!(matches!(
            parse(Command::new("set_corner_square").with_arg("white")),
            Err(CommandError::InvalidArgument { argument: "color", .. })
        ));
        assert!(matches!(
            parse(Command::new("set_global_fly_pos").with_arg(1.0).with_arg(2.0)),
            Err(CommandError::MissingArgument { argument: "z", .. })
        ));
    }
}

// src/protocol/loader.rs
//! Protocol file parsing and start-step truncation
//!
//! The file is an ordered JSON object of step name to step object. Object
//! order is execution order, so `serde_json` is built with `preserve_order`.

use crate::config::constants::protocol;
use crate::hal::{ChannelAddr, Target};
use crate::protocol::{
    Action, FlowParams, GrabParams, MachineStep, Protocol, ProtocolError, Step, StepKind,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const USER_ACTION_SCREEN: &str = "UserActionScreen";
const MACHINE_ACTION_SCREEN: &str = "MachineActionScreen";

#[derive(Deserialize)]
struct FlowSpec {
    target: Target,
    rate_mh: f64,
    vol_ml: f64,
    #[serde(default)]
    eq_time: f64,
}

#[derive(Deserialize)]
struct IncubateSpec {
    time: f64,
}

#[derive(Deserialize)]
struct GrabSpec {
    post_run_rate_mm: f64,
    post_run_vol_ml: f64,
}

#[derive(Deserialize)]
struct ChangeSyringeSpec {
    diam: f64,
    pump_addr: u8,
}

/// Parses serialized protocols into [`Protocol`]
pub struct ProtocolLoader;

impl ProtocolLoader {
    /// Parse protocol JSON text, keeping the suffix that begins at `start_step`
    pub fn parse(json: &str, start_step: &str) -> Result<Protocol, ProtocolError> {
        let value: Value = serde_json::from_str(json).map_err(|e| ProtocolError::Malformed {
            step: None,
            reason: e.to_string(),
        })?;
        Self::from_value(value, start_step)
    }

    /// Read and parse a protocol file
    pub fn from_path<P: AsRef<Path>>(path: P, start_step: &str) -> Result<Protocol, ProtocolError> {
        let path = path.as_ref();
        info!(path = %path.display(), start_step, "loading protocol");
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content, start_step)
    }

    /// Build a protocol from an already parsed JSON document
    pub fn from_value(value: Value, start_step: &str) -> Result<Protocol, ProtocolError> {
        let Value::Object(entries) = value else {
            return Err(ProtocolError::Malformed {
                step: None,
                reason: "protocol must be a JSON object of named steps".to_string(),
            });
        };

        if !entries.contains_key(start_step) {
            return Err(ProtocolError::InvalidStartStep {
                start_step: start_step.to_string(),
            });
        }

        let mut steps = entries
            .into_iter()
            .map(|(name, body)| Self::parse_step(name, body))
            .collect::<Result<Vec<_>, _>>()?;

        let start = steps
            .iter()
            .position(|s| s.name == start_step)
            .unwrap_or_default();
        if start > 0 {
            debug!(dropped = start, start_step, "truncating protocol to start step");
            steps.drain(..start);
        }

        Protocol::from_steps(steps)
    }

    fn parse_step(name: String, body: Value) -> Result<Step, ProtocolError> {
        let Value::Object(body) = body else {
            return Err(ProtocolError::Malformed {
                step: Some(name),
                reason: "step must be a JSON object".to_string(),
            });
        };

        let kind = match body.get("type") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingTypeKey { step: name }),
            Some(Value::String(tag)) if tag == USER_ACTION_SCREEN => StepKind::Operator,
            Some(Value::String(tag)) if tag == MACHINE_ACTION_SCREEN => {
                StepKind::Machine(Self::parse_machine(&name, &body)?)
            }
            Some(other) => {
                return Err(ProtocolError::UnknownTypeKey {
                    step: name,
                    found: other.as_str().map_or_else(|| other.to_string(), str::to_string),
                })
            }
        };

        let text = |key: &str, default: &str| -> String {
            body.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        Ok(Step {
            header: text("header", protocol::DEFAULT_HEADER),
            description: text("description", protocol::DEFAULT_DESCRIPTION),
            next_label: text("next_text", protocol::DEFAULT_NEXT_TEXT),
            completion_message: body
                .get("completion_msg")
                .and_then(Value::as_str)
                .filter(|msg| !msg.is_empty())
                .map(str::to_string),
            kind,
            name,
        })
    }

    fn parse_machine(step: &str, body: &Map<String, Value>) -> Result<MachineStep, ProtocolError> {
        let Some(Value::Object(actions)) = body.get("action") else {
            return Err(ProtocolError::Malformed {
                step: Some(step.to_string()),
                reason: "machine step requires an 'action' object".to_string(),
            });
        };

        let actions = actions
            .iter()
            .map(|(keyword, params)| Self::parse_action(step, keyword, params))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MachineStep {
            actions,
            suppress_progress_ui: body
                .get("remove_progress_bar")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    fn parse_action(step: &str, keyword: &str, params: &Value) -> Result<Action, ProtocolError> {
        let action = match keyword {
            "PUMP" => Action::Pump(Self::flow(step, keyword, params)?),
            "RELEASE" => Action::Release(Self::flow(step, keyword, params)?),
            "INCUBATE" => {
                let spec: IncubateSpec = Self::params(step, keyword, params)?;
                if spec.time < 0.0 {
                    return Err(Self::invalid(step, keyword, "time must not be negative"));
                }
                if Duration::try_from_secs_f64(spec.time).is_err() {
                    return Err(Self::invalid(step, keyword, "time is too large"));
                }
                Action::Incubate { seconds: spec.time }
            }
            "RESET" => Action::Reset,
            "RESET_WASTE" => Action::ResetWaste,
            "GRAB" => Action::Grab(Self::grab(step, keyword, params)?),
            "GRAB_WASTE" => Action::GrabWaste(Self::grab(step, keyword, params)?),
            "CHANGE_SYRINGE" => {
                let spec: ChangeSyringeSpec = Self::params(step, keyword, params)?;
                if spec.diam <= 0.0 {
                    return Err(Self::invalid(step, keyword, "diam must be greater than 0"));
                }
                Action::ChangeSyringe {
                    diameter_mm: spec.diam,
                    channel: ChannelAddr(spec.pump_addr),
                }
            }
            _ => {
                return Err(ProtocolError::UnknownAction {
                    step: step.to_string(),
                    action: keyword.to_string(),
                })
            }
        };
        Ok(action)
    }

    fn flow(step: &str, keyword: &str, params: &Value) -> Result<FlowParams, ProtocolError> {
        let spec: FlowSpec = Self::params(step, keyword, params)?;
        if spec.rate_mh == 0.0 || !spec.rate_mh.is_finite() {
            return Err(Self::invalid(step, keyword, "rate_mh must be a non-zero number"));
        }
        if spec.eq_time < 0.0 {
            return Err(Self::invalid(step, keyword, "eq_time must not be negative"));
        }
        let flow = FlowParams {
            target: spec.target,
            rate_ml_per_hour: spec.rate_mh,
            volume_ml: spec.vol_ml,
            equilibration_seconds: spec.eq_time,
        };
        if flow.try_duration().is_none() {
            return Err(Self::invalid(step, keyword, "vol_ml / rate_mh gives a run time too large to schedule"));
        }
        Ok(flow)
    }

    fn grab(step: &str, keyword: &str, params: &Value) -> Result<GrabParams, ProtocolError> {
        let spec: GrabSpec = Self::params(step, keyword, params)?;
        Ok(GrabParams {
            post_run_rate: spec.post_run_rate_mm,
            post_run_volume: spec.post_run_vol_ml,
        })
    }

    fn params<T: DeserializeOwned>(step: &str, keyword: &str, params: &Value) -> Result<T, ProtocolError> {
        T::deserialize(params).map_err(|e| Self::invalid(step, keyword, &e.to_string()))
    }

    fn invalid(step: &str, keyword: &str, reason: &str) -> ProtocolError {
        ProtocolError::InvalidParameter {
            step: step.to_string(),
            action: keyword.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FOUR_STEPS: &str = r#"{
        "home": {"type": "UserActionScreen", "header": "Welcome", "next_text": "Start"},
        "step1": {
            "type": "MachineActionScreen",
            "header": "Priming",
            "action": {"PUMP": {"target": "waste", "rate_mh": 1.0, "vol_ml": 2.0, "eq_time": 30}},
            "completion_msg": "Primed"
        },
        "summary": {"type": "UserActionScreen"},
        "done": {"type": "UserActionScreen", "header": "Finished"}
    }"#;

    #[test]
    fn test_well_formed_protocol_keeps_declared_order() {
        let protocol = ProtocolLoader::parse(FOUR_STEPS, "home").unwrap();
        let names: Vec<_> = protocol.names().collect();
        assert_eq!(names, vec!["home", "step1", "summary", "done"]);

        let home = &protocol.steps()[0];
        assert_eq!(home.header, "Welcome");
        assert_eq!(home.next_label, "Start");
        assert_eq!(home.description, "NO DESCRIPTION");

        let step1 = &protocol.steps()[1];
        assert_eq!(step1.completion_message.as_deref(), Some("Primed"));
        let machine = step1.machine_step().unwrap();
        assert_eq!(
            machine.actions,
            vec![Action::Pump(FlowParams {
                target: Target::Waste,
                rate_ml_per_hour: 1.0,
                volume_ml: 2.0,
                equilibration_seconds: 30.0,
            })]
        );
    }

    #[test]
    fn test_start_step_truncates_prefix() {
        let protocol = ProtocolLoader::parse(FOUR_STEPS, "summary").unwrap();
        let names: Vec<_> = protocol.names().collect();
        assert_eq!(names, vec!["summary", "done"]);
    }

    #[test]
    fn test_unknown_start_step() {
        assert_eq!(
            ProtocolLoader::parse(FOUR_STEPS, "calibrate"),
            Err(ProtocolError::InvalidStartStep { start_step: "calibrate".to_string() })
        );
    }

    #[test]
    fn test_missing_and_unknown_type_keys() {
        let missing = r#"{"home": {"header": "x"}}"#;
        assert_eq!(
            ProtocolLoader::parse(missing, "home"),
            Err(ProtocolError::MissingTypeKey { step: "home".to_string() })
        );

        let unknown = r#"{"home": {"type": "PopupScreen"}}"#;
        assert_eq!(
            ProtocolLoader::parse(unknown, "home"),
            Err(ProtocolError::UnknownTypeKey {
                step: "home".to_string(),
                found: "PopupScreen".to_string(),
            })
        );
    }

    #[test]
    fn test_all_action_keywords() {
        let json = r#"{
            "run": {
                "type": "MachineActionScreen",
                "remove_progress_bar": true,
                "action": {
                    "CHANGE_SYRINGE": {"diam": 4.78, "pump_addr": 1},
                    "RESET": {},
                    "RESET_WASTE": {},
                    "GRAB": {"post_run_rate_mm": 1.5, "post_run_vol_ml": 0.05},
                    "GRAB_WASTE": {"post_run_rate_mm": 1.0, "post_run_vol_ml": 0.02},
                    "INCUBATE": {"time": 60},
                    "RELEASE": {"target": "lysate", "rate_mh": -5.0, "vol_ml": 0.5},
                    "PUMP": {"target": "lysate", "rate_mh": 10, "vol_ml": 1}
                }
            }
        }"#;
        let protocol = ProtocolLoader::parse(json, "run").unwrap();
        let machine = protocol.steps()[0].machine_step().unwrap();

        assert!(machine.suppress_progress_ui);
        let keywords: Vec<_> = machine.actions.iter().map(Action::keyword).collect();
        assert_eq!(
            keywords,
            vec!["CHANGE_SYRINGE", "RESET", "RESET_WASTE", "GRAB", "GRAB_WASTE", "INCUBATE", "RELEASE", "PUMP"]
        );
        assert_eq!(
            machine.actions[0],
            Action::ChangeSyringe { diameter_mm: 4.78, channel: ChannelAddr(1) }
        );
    }

    #[test]
    fn test_invalid_action_parameters() {
        let zero_rate = r#"{"p": {"type": "MachineActionScreen",
            "action": {"PUMP": {"target": "waste", "rate_mh": 0, "vol_ml": 1}}}}"#;
        assert!(matches!(
            ProtocolLoader::parse(zero_rate, "p"),
            Err(ProtocolError::InvalidParameter { .. })
        ));

        let bad_target = r#"{"p": {"type": "MachineActionScreen",
            "action": {"PUMP": {"target": "reservoir", "rate_mh": 1, "vol_ml": 1}}}}"#;
        assert!(matches!(
            ProtocolLoader::parse(bad_target, "p"),
            Err(ProtocolError::InvalidParameter { .. })
        ));

        let unknown = r#"{"p": {"type": "MachineActionScreen", "action": {"SPIN": {}}}}"#;
        assert_eq!(
            ProtocolLoader::parse(unknown, "p"),
            Err(ProtocolError::UnknownAction { step: "p".to_string(), action: "SPIN".to_string() })
        );

        let no_action = r#"{"p": {"type": "MachineActionScreen"}}"#;
        assert!(matches!(
            ProtocolLoader::parse(no_action, "p"),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unschedulable_run_times_are_rejected() {
        let long_incubation = r#"{"p": {"type": "MachineActionScreen", "action": {"INCUBATE": {"time": 1e20}}}}"#;
        assert!(matches!(
            ProtocolLoader::parse(long_incubation, "p"),
            Err(ProtocolError::InvalidParameter { ref action, .. }) if action == "INCUBATE"
        ));

        let tiny_rate = r#"{"p": {"type": "MachineActionScreen",
            "action": {"PUMP": {"target": "waste", "rate_mh": 1e-300, "vol_ml": 1.0}}}}"#;
        assert!(matches!(
            ProtocolLoader::parse(tiny_rate, "p"),
            Err(ProtocolError::InvalidParameter { ref action, .. }) if action == "PUMP"
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", FOUR_STEPS).unwrap();

        let protocol = ProtocolLoader::from_path(file.path(), "step1").unwrap();
        assert_eq!(protocol.len(), 3);

        assert!(matches!(
            ProtocolLoader::from_path("/nonexistent/protocol.json", "home"),
            Err(ProtocolError::Io(_))
        ));
    }
}

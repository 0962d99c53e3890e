//! JSON command scripts
//!
//! A script is a JSON array of commands, each tagged by `op`:
//!
//! ```json
//! [
//!   { "op": "declare", "name": "x",
//!     "shape": { "kind": "prim", "of": "int" }, "value": { "int": 7 } },
//!   { "op": "assign", "name": "x", "value": { "int": 8 } },
//!   { "op": "point", "name": "b", "target": { "slot": "a" } },
//!   { "op": "enter", "name": "main" },
//!   { "op": "leave" },
//!   { "op": "reset" }
//! ]
//! ```

use crate::engine::errors::Result;
use crate::engine::{Declaration, MemoryEngine, RefTarget};
use crate::memory::format_address;
use crate::memory::value::Value;
use crate::snapshot::{DiffEvent, SnapshotHistory};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Command {
    /// Declare a new variable in the innermost frame
    Declare(Declaration),
    /// Store a fresh value into an existing variable
    Assign { name: String, value: Value },
    /// Repoint a reference variable
    Point { name: String, target: RefTarget },
    Enter { name: String },
    Leave,
    Reset,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Declare(decl) => write!(f, "{} {} = {}", decl.shape, decl.name, decl.value),
            Command::Assign { name, value } => write!(f, "{} = {}", name, value),
            Command::Point { name, target } => match target {
                RefTarget::Null => write!(f, "{} = null", name),
                RefTarget::Slot(other) => write!(f, "{} = {}", name, other),
                RefTarget::Address(addr) => write!(f, "{} = {}", name, format_address(*addr)),
            },
            Command::Enter { name } => write!(f, "enter {}", name),
            Command::Leave => f.write_str("leave"),
            Command::Reset => f.write_str("reset"),
        }
    }
}

/// Parse a script from JSON text
pub fn parse_script(text: &str) -> serde_json::Result<Vec<Command>> {
    serde_json::from_str(text)
}

/// Apply one command to the engine
pub fn apply(engine: &mut MemoryEngine, command: &Command) -> Result<()> {
    match command {
        Command::Declare(decl) => {
            engine.declare(decl)?;
        }
        Command::Assign { name, value } => {
            engine.assign_value(name, value)?;
        }
        Command::Point { name, target } => {
            engine.assign_reference(name, target)?;
        }
        Command::Enter { name } => {
            engine.enter_frame(name);
        }
        Command::Leave => {
            engine.leave_frame()?;
        }
        Command::Reset => engine.reset(),
    }
    Ok(())
}

/// Outcome of one script step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub command: String,
    /// `Display` of the error when the command was rejected
    pub error: Option<String>,
    pub events: Vec<DiffEvent>,
}

/// Run a whole script, keeping a snapshot after every step
///
/// The returned history holds the starting state at index 0 and the state after
/// step `i` at index `i + 1`. User-facing errors (capacity, collisions, unknown
/// names) are recorded on the step and the script carries on; anything else,
/// including running out of snapshot budget, aborts the run.
pub fn run_script(
    engine: &mut MemoryEngine,
    commands: &[Command],
) -> Result<(Vec<Step>, SnapshotHistory)> {
    let mut history = SnapshotHistory::from_config(engine.config());
    history.push(engine.snapshot()?)?;
    let mut steps = Vec::with_capacity(commands.len());

    for command in commands {
        let error = match apply(engine, command) {
            Ok(()) => None,
            Err(err) if err.is_user_facing() => {
                log::debug!("rejected `{}`: {}", command, err);
                Some(err.to_string())
            }
            Err(err) => return Err(err),
        };
        history.push(engine.snapshot()?)?;
        steps.push(Step {
            command: command.to_string(),
            error,
            events: history.diff_at(history.len() - 1).unwrap_or_default(),
        });
    }

    Ok((steps, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::value::PrimType;

    #[test]
    fn test_parse_commands() {
        let text = r#"[
            {"op": "declare", "name": "x",
             "shape": {"kind": "prim", "of": "int"}, "value": {"int": 7}},
            {"op": "point", "name": "b", "target": "null"},
            {"op": "enter", "name": "f"},
            {"op": "leave"},
            {"op": "reset"}
        ]"#;
        let commands = parse_script(text).unwrap();
        assert_eq!(
            commands[0],
            Command::Declare(Declaration::prim("x", PrimType::Int, Value::Int(7)))
        );
        assert_eq!(
            commands[1],
            Command::Point {
                name: "b".to_string(),
                target: RefTarget::Null
            }
        );
        assert_eq!(commands[4], Command::Reset);
        assert_eq!(commands[0].to_string(), "int x = 7");
    }

    #[test]
    fn test_rejected_step_continues() {
        let mut engine = MemoryEngine::default();
        let decl = Command::Declare(Declaration::prim("x", PrimType::Int, Value::Int(1)));
        let (steps, history) = run_script(&mut engine, &[decl.clone(), decl]).unwrap();

        assert_eq!(steps.len(), 2);
        assert!(steps[0].error.is_none());
        assert_eq!(steps[0].events.len(), 2);
        assert!(steps[1].error.is_some());
        assert!(steps[1].events.is_empty());
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest().unwrap().stack[0].slots.len(), 1);
    }
}

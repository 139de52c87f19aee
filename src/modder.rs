//! Interpreter for the actions handlers record in the ledger.
//!
//! Actions follow a Mongo-like language with a leading underscore instead of
//! `$`. Dict actions edit a JSON object in place (`{"_set": {"a->b": 1}}`);
//! file actions act on a file named relative to the working directory
//! (`{"_file_create": {"content": "LSTOP = .TRUE."}}`).

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ModderError {
    #[error("{0} is not a supported action!")]
    Unsupported(String),

    #[error("Keyword {0} does not refer to an array.")]
    NotAnArray(String),

    #[error("Invalid settings for {action}: {reason}")]
    InvalidSettings { action: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Applies modifications. In strict mode unknown actions are an error,
/// otherwise they are ignored.
#[derive(Debug, Clone, Copy)]
pub struct Modder {
    pub strict: bool,
}

impl Default for Modder {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl Modder {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Apply every `{action: settings}` pair of `modification` to `target`.
    pub fn modify(&self, modification: &Value, target: &mut Map<String, Value>) -> Result<(), ModderError> {
        for (action, settings) in as_object(modification, "modification")? {
            let settings = as_object(settings, action)?;
            match action.as_str() {
                "_set" => set(target, settings),
                "_unset" => unset(target, settings),
                "_push" => push(target, settings),
                "_push_all" => push_all(target, settings)?,
                "_inc" => inc(target, settings)?,
                "_rename" => rename(target, settings)?,
                "_add_to_set" => add_to_set(target, settings)?,
                "_pull" => pull(target, settings)?,
                "_pull_all" => pull_all(target, settings)?,
                "_pop" => pop(target, settings)?,
                other => self.unsupported(other)?,
            }
        }
        Ok(())
    }

    /// Apply file actions to `file`. Destinations are resolved against the
    /// directory holding `file`.
    pub fn modify_file(&self, modification: &Value, file: &Path) -> Result<(), ModderError> {
        let directory = file.parent().unwrap_or(Path::new("."));
        for (action, settings) in as_object(modification, "modification")? {
            let settings = as_object(settings, action)?;
            match action.as_str() {
                "_file_create" => {
                    let content = single_str(settings, action, "content")?;
                    fs::write(file, content)?;
                }
                "_file_move" => {
                    let dest = single_str(settings, action, "dest")?;
                    fs::rename(file, directory.join(dest))?;
                }
                "_file_delete" => match single_str(settings, action, "mode")? {
                    "actual" => match fs::remove_file(file) {
                        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    },
                    "simulated" => info!(file = %file.display(), "simulated removal"),
                    other => {
                        return Err(ModderError::InvalidSettings {
                            action: action.clone(),
                            reason: format!("unknown mode {other}"),
                        });
                    }
                },
                "_file_copy" => {
                    for (key, dest) in settings {
                        if !key.starts_with("dest") {
                            continue;
                        }
                        let dest = dest.as_str().ok_or_else(|| ModderError::InvalidSettings {
                            action: action.clone(),
                            reason: format!("{key} must be a string"),
                        })?;
                        fs::copy(file, directory.join(dest))?;
                    }
                }
                "_file_modify" => {
                    if let Some(mode) = settings.get("mode") {
                        let mode = mode.as_u64().and_then(|m| u32::try_from(m).ok()).ok_or_else(|| {
                            ModderError::InvalidSettings {
                                action: action.clone(),
                                reason: "mode must be an integer".to_string(),
                            }
                        })?;
                        set_mode(file, mode)?;
                    }
                }
                other => self.unsupported(other)?,
            }
        }
        Ok(())
    }

    fn unsupported(&self, action: &str) -> Result<(), ModderError> {
        if self.strict {
            Err(ModderError::Unsupported(action.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Apply one recorded action inside `directory`.
///
/// Accepts `{"file": name, "action": {...}}` for file actions and
/// `{"dict": json_file, "action": {...}}` for dict actions on a JSON file.
pub fn apply_action(directory: &Path, action: &Value) -> Result<(), ModderError> {
    let record = as_object(action, "action record")?;
    let modification = record.get("action").ok_or_else(|| ModderError::InvalidSettings {
        action: "action record".to_string(),
        reason: "missing \"action\"".to_string(),
    })?;
    let modder = Modder::default();

    if let Some(name) = record.get("file").and_then(Value::as_str) {
        return modder.modify_file(modification, &directory.join(name));
    }
    if let Some(name) = record.get("dict").and_then(Value::as_str) {
        let path = directory.join(name);
        let mut object = if path.exists() {
            match serde_json::from_str::<Value>(&fs::read_to_string(&path)?)? {
                Value::Object(map) => map,
                _ => {
                    return Err(ModderError::InvalidSettings {
                        action: name.to_string(),
                        reason: "file does not hold a JSON object".to_string(),
                    });
                }
            }
        } else {
            Map::new()
        };
        modder.modify(modification, &mut object)?;
        fs::write(&path, serde_json::to_string_pretty(&Value::Object(object))?)?;
        return Ok(());
    }
    Err(ModderError::InvalidSettings {
        action: "action record".to_string(),
        reason: "expected a \"file\" or \"dict\" target".to_string(),
    })
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, ModderError> {
    value.as_object().ok_or_else(|| ModderError::InvalidSettings {
        action: what.to_string(),
        reason: "expected an object".to_string(),
    })
}

fn single_str<'a>(settings: &'a Map<String, Value>, action: &str, key: &str) -> Result<&'a str, ModderError> {
    if settings.len() != 1 {
        return Err(ModderError::InvalidSettings {
            action: action.to_string(),
            reason: format!("settings must only contain one item with key '{key}'"),
        });
    }
    settings.get(key).and_then(Value::as_str).ok_or_else(|| ModderError::InvalidSettings {
        action: action.to_string(),
        reason: format!("'{key}' must be a string"),
    })
}

#[cfg(unix)]
fn set_mode(file: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(file, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Resolve `a->b->c` to the map holding `c`, creating intermediate objects.
/// Returns `None` when an intermediate key holds something other than an object.
fn nested<'a>(root: &'a mut Map<String, Value>, key: &'a str) -> Option<(&'a mut Map<String, Value>, &'a str)> {
    let mut tokens: Vec<&str> = key.split("->").collect();
    let last = tokens.pop()?;
    let mut current = root;
    for token in tokens {
        current = current
            .entry(token)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()?;
    }
    Some((current, last))
}

fn set(target: &mut Map<String, Value>, settings: &Map<String, Value>) {
    for (key, value) in settings {
        if let Some((map, leaf)) = nested(target, key) {
            map.insert(leaf.to_string(), value.clone());
        }
    }
}

fn unset(target: &mut Map<String, Value>, settings: &Map<String, Value>) {
    for key in settings.keys() {
        if let Some((map, leaf)) = nested(target, key) {
            map.remove(leaf);
        }
    }
}

fn push(target: &mut Map<String, Value>, settings: &Map<String, Value>) {
    for (key, value) in settings {
        if let Some((map, leaf)) = nested(target, key) {
            match map.get_mut(leaf) {
                Some(Value::Array(items)) => items.push(value.clone()),
                _ => {
                    map.insert(leaf.to_string(), Value::Array(vec![value.clone()]));
                }
            }
        }
    }
}

fn push_all(target: &mut Map<String, Value>, settings: &Map<String, Value>) -> Result<(), ModderError> {
    for (key, value) in settings {
        let Value::Array(values) = value else {
            return Err(ModderError::NotAnArray(key.clone()));
        };
        let Some((map, leaf)) = nested(target, key) else { continue };
        match map.get_mut(leaf) {
            Some(Value::Array(items)) => items.extend(values.iter().cloned()),
            Some(_) => return Err(ModderError::NotAnArray(key.clone())),
            None => {
                map.insert(leaf.to_string(), value.clone());
            }
        }
    }
    Ok(())
}

fn inc(target: &mut Map<String, Value>, settings: &Map<String, Value>) -> Result<(), ModderError> {
    for (key, value) in settings {
        let Some((map, leaf)) = nested(target, key) else { continue };
        let updated = match map.get(leaf) {
            None => value.clone(),
            Some(current) => add(current, value).ok_or_else(|| ModderError::InvalidSettings {
                action: "_inc".to_string(),
                reason: format!("{key} is not numeric"),
            })?,
        };
        map.insert(leaf.to_string(), updated);
    }
    Ok(())
}

fn add(a: &Value, b: &Value) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(Value::from(x.checked_add(y)?));
    }
    let sum = a.as_f64()? + b.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

fn rename(target: &mut Map<String, Value>, settings: &Map<String, Value>) -> Result<(), ModderError> {
    for (key, new_name) in settings {
        let new_name = new_name.as_str().ok_or_else(|| ModderError::InvalidSettings {
            action: "_rename".to_string(),
            reason: format!("new name for {key} must be a string"),
        })?;
        if let Some(value) = target.remove(key) {
            target.insert(new_name.to_string(), value);
        }
    }
    Ok(())
}

fn add_to_set(target: &mut Map<String, Value>, settings: &Map<String, Value>) -> Result<(), ModderError> {
    for (key, value) in settings {
        let Some((map, leaf)) = nested(target, key) else { continue };
        match map.get_mut(leaf) {
            Some(Value::Array(items)) => {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            Some(_) => return Err(ModderError::NotAnArray(key.clone())),
            None => {
                map.insert(leaf.to_string(), value.clone());
            }
        }
    }
    Ok(())
}

fn pull(target: &mut Map<String, Value>, settings: &Map<String, Value>) -> Result<(), ModderError> {
    for (key, value) in settings {
        let Some((map, leaf)) = nested(target, key) else { continue };
        match map.get_mut(leaf) {
            Some(Value::Array(items)) => items.retain(|item| item != value),
            Some(_) => return Err(ModderError::NotAnArray(key.clone())),
            None => {}
        }
    }
    Ok(())
}

fn pull_all(target: &mut Map<String, Value>, settings: &Map<String, Value>) -> Result<(), ModderError> {
    for (key, values) in settings {
        let Value::Array(values) = values else {
            return Err(ModderError::NotAnArray(key.clone()));
        };
        for value in values {
            let mut single = Map::new();
            single.insert(key.clone(), value.clone());
            pull(target, &single)?;
        }
    }
    Ok(())
}

fn pop(target: &mut Map<String, Value>, settings: &Map<String, Value>) -> Result<(), ModderError> {
    for (key, end) in settings {
        let Some((map, leaf)) = nested(target, key) else { continue };
        match map.get_mut(leaf) {
            Some(Value::Array(items)) => match end.as_i64() {
                Some(1) => {
                    items.pop();
                }
                Some(-1) if !items.is_empty() => {
                    items.remove(0);
                }
                _ => {}
            },
            Some(_) => return Err(ModderError::NotAnArray(key.clone())),
            None => {}
        }
    }
    Ok(())
}

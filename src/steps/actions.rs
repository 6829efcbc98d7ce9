//! Built-in actions.
//!
//! - `run` - execute an external command
//! - `chdir` - change the working directory for later steps
//! - `var` - update the template variable mapping
//! - `env` - update the child-process environment
//! - `include` - splice in steps from another file (a step action)
//!
//! Configuration is validated at parse time; `${var}` templates inside it
//! are rendered as late as possible, when the action runs (or, for
//! `include`, when the step list is flattened).

use crate::address::Address;
use crate::context::Context;
use crate::environment::canonicalize_path;
use crate::error::{Result, StrideError};
use crate::render::{type_name, Template};
use crate::sensitive::DisplayValue;
use crate::steps::{Action, Flattener, Step, StepResult, StepState};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

fn bad_conf(action: &str, detail: impl std::fmt::Display, addr: &Address) -> StrideError {
    StrideError::config(
        format!("Bad configuration for action \"{}\": {}", action, detail),
        Some(addr),
    )
}

/// Resolve a path mentioned by a step relative to the directory of the file
/// the step came from.
fn resolve_relative(source: &str, path: &str) -> Result<PathBuf> {
    let base = std::env::current_dir()?;
    let dir = match Path::new(source).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => canonicalize_path(&base, parent),
        _ => base,
    };
    Ok(canonicalize_path(&dir, Path::new(path)))
}

/// Execute an external command, directly or through the platform shell.
#[derive(Debug)]
pub struct RunAction {
    command: RunCommand,
    addr: Address,
}

#[derive(Debug)]
enum RunCommand {
    /// String form; interpreted by the shell.
    Shell(Template),
    /// List form; executed directly, no shell.
    Argv(Vec<Template>),
}

pub(crate) fn build_run(config: &Value, addr: &Address) -> Result<Box<dyn Action>> {
    let command = match config {
        Value::String(_) => RunCommand::Shell(Template::parse(config)),
        Value::Sequence(items) => {
            if items.is_empty() {
                return Err(bad_conf("run", "empty command list", addr));
            }
            RunCommand::Argv(items.iter().map(Template::parse).collect())
        }
        other => {
            return Err(bad_conf(
                "run",
                format!("expecting string or list, not {}", type_name(other)),
                addr,
            ))
        }
    };
    Ok(Box::new(RunAction {
        command,
        addr: addr.clone(),
    }))
}

impl Action for RunAction {
    fn name(&self) -> &str {
        "run"
    }

    fn call(&self, ctxt: &mut Context) -> Result<StepResult> {
        let returncode = match &self.command {
            RunCommand::Shell(template) => {
                let command = template.render_string(&ctxt.variables, &self.addr)?;
                ctxt.environment.shell(&command)?
            }
            RunCommand::Argv(templates) => {
                let argv: Vec<String> = templates
                    .iter()
                    .map(|t| t.render_string(&ctxt.variables, &self.addr))
                    .collect::<Result<_>>()?;
                ctxt.environment.spawn(&argv)?
            }
        };
        Ok(StepResult::from_returncode(returncode))
    }
}

/// Change the working directory used by later steps.
#[derive(Debug)]
pub struct ChdirAction {
    path: Template,
    addr: Address,
}

pub(crate) fn build_chdir(config: &Value, addr: &Address) -> Result<Box<dyn Action>> {
    match config {
        Value::String(_) => Ok(Box::new(ChdirAction {
            path: Template::parse(config),
            addr: addr.clone(),
        })),
        other => Err(bad_conf(
            "chdir",
            format!("expecting string, not {}", type_name(other)),
            addr,
        )),
    }
}

impl Action for ChdirAction {
    fn name(&self) -> &str {
        "chdir"
    }

    fn call(&self, ctxt: &mut Context) -> Result<StepResult> {
        let path = self.path.render_string(&ctxt.variables, &self.addr)?;
        ctxt.environment.set_cwd(Path::new(&path));
        Ok(StepResult::new(StepState::Success))
    }
}

/// The shared configuration shape of the `var` and `env` actions: load
/// mappings from files, flag names sensitive, unset names, set values.
#[derive(Debug)]
struct UpdateConf {
    files: Vec<Template>,
    sensitive: Vec<String>,
    unset: Vec<String>,
    set: Vec<(String, Template)>,
}

impl UpdateConf {
    fn parse(action: &str, config: &Value, addr: &Address) -> Result<Self> {
        let mut out = Self {
            files: Vec::new(),
            sensitive: Vec::new(),
            unset: Vec::new(),
            set: Vec::new(),
        };

        let map = match config {
            // Null is an empty update; useful under a modifier.
            Value::Null => return Ok(out),
            Value::Mapping(map) => map,
            other => {
                return Err(bad_conf(
                    action,
                    format!("expecting mapping, not {}", type_name(other)),
                    addr,
                ))
            }
        };

        for (key, key_conf) in map {
            let key = match key {
                Value::String(key) => key.as_str(),
                other => {
                    return Err(bad_conf(
                        action,
                        format!("expecting string key, not {}", type_name(other)),
                        addr,
                    ))
                }
            };
            match key {
                "files" => out.files = parse_string_list(action, key, key_conf, addr)?
                    .iter()
                    .map(|s| Template::parse(&Value::String(s.clone())))
                    .collect(),
                "sensitive" => out.sensitive = parse_string_list(action, key, key_conf, addr)?,
                "unset" => out.unset = parse_string_list(action, key, key_conf, addr)?,
                "set" => match key_conf {
                    Value::Mapping(set) => {
                        for (name, value) in set {
                            let name = match name {
                                Value::String(name) => name.clone(),
                                other => {
                                    return Err(bad_conf(
                                        action,
                                        format!(
                                            "\"set\" keys must be strings, not {}",
                                            type_name(other)
                                        ),
                                        addr,
                                    ))
                                }
                            };
                            out.set.push((name, Template::parse(value)));
                        }
                    }
                    other => {
                        return Err(bad_conf(
                            action,
                            format!("\"set\" must be a mapping, not {}", type_name(other)),
                            addr,
                        ))
                    }
                },
                other => {
                    return Err(bad_conf(
                        action,
                        format!("unknown key \"{}\"", other),
                        addr,
                    ))
                }
            }
        }

        Ok(out)
    }

    /// Mappings loaded from `files`, in order. Missing files and files that
    /// do not hold a mapping are skipped.
    fn load_files(&self, ctxt: &Context, addr: &Address) -> Result<Vec<(String, Value)>> {
        let mut loaded = Vec::new();
        for template in &self.files {
            let file = template.render_string(&ctxt.variables, addr)?;
            let path = resolve_relative(&addr.source, &file)?;
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(_) => {
                    tracing::debug!(file = %path.display(), "skipping unreadable file");
                    continue;
                }
            };
            let data: Value = serde_yaml::from_str(&text).map_err(|e| {
                StrideError::config(
                    format!("Failed to parse file \"{}\": {}", path.display(), e),
                    Some(addr),
                )
            })?;
            match data {
                Value::Mapping(map) => {
                    for (name, value) in map {
                        if let Value::String(name) = name {
                            loaded.push((name, value));
                        }
                    }
                }
                _ => {
                    tracing::debug!(file = %path.display(), "skipping non-mapping file");
                }
            }
        }
        Ok(loaded)
    }
}

/// Update the template variable mapping.
#[derive(Debug)]
pub struct VarAction {
    conf: UpdateConf,
    addr: Address,
}

pub(crate) fn build_var(config: &Value, addr: &Address) -> Result<Box<dyn Action>> {
    Ok(Box::new(VarAction {
        conf: UpdateConf::parse("var", config, addr)?,
        addr: addr.clone(),
    }))
}

impl Action for VarAction {
    fn name(&self) -> &str {
        "var"
    }

    fn call(&self, ctxt: &mut Context) -> Result<StepResult> {
        for (name, value) in self.conf.load_files(ctxt, &self.addr)? {
            ctxt.variables.set(&name, value);
        }
        for name in &self.conf.sensitive {
            ctxt.variables.declare_sensitive(name);
        }
        for name in &self.conf.unset {
            ctxt.variables.remove(name);
        }
        for (name, template) in &self.conf.set {
            let value = template.render(&ctxt.variables, &self.addr)?;
            ctxt.variables.set(name, value);
        }
        Ok(StepResult::new(StepState::Success))
    }
}

/// Update the child-process environment.
#[derive(Debug)]
pub struct EnvAction {
    conf: UpdateConf,
    addr: Address,
}

pub(crate) fn build_env(config: &Value, addr: &Address) -> Result<Box<dyn Action>> {
    Ok(Box::new(EnvAction {
        conf: UpdateConf::parse("env", config, addr)?,
        addr: addr.clone(),
    }))
}

impl Action for EnvAction {
    fn name(&self) -> &str {
        "env"
    }

    fn call(&self, ctxt: &mut Context) -> Result<StepResult> {
        for (name, value) in self.conf.load_files(ctxt, &self.addr)? {
            ctxt.environment.set(&name, value.display());
        }
        for name in &self.conf.sensitive {
            ctxt.environment.declare_sensitive(name);
        }
        for name in &self.conf.unset {
            ctxt.environment.unset(name);
        }
        for (name, template) in &self.conf.set {
            let value = template.render_string(&ctxt.variables, &self.addr)?;
            ctxt.environment.set(name, value);
        }
        Ok(StepResult::new(StepState::Success))
    }
}

/// Splice in the steps of another file. A step action; it expands at
/// flatten time and never reaches the run loop.
#[derive(Debug)]
pub struct IncludeAction {
    path: Template,
    key: Option<Template>,
    start: Option<usize>,
    stop: Option<usize>,
    addr: Address,
}

pub(crate) fn build_include(config: &Value, addr: &Address) -> Result<Box<dyn Action>> {
    let (path, key, start, stop) = match config {
        // String form is shorthand for { path: ... }.
        Value::String(_) => (Template::parse(config), None, None, None),
        Value::Mapping(map) => {
            let mut path = None;
            let mut key = None;
            let mut start = None;
            let mut stop = None;
            for (item_key, item_conf) in map {
                let item_key = match item_key {
                    Value::String(k) => k.as_str(),
                    other => {
                        return Err(bad_conf(
                            "include",
                            format!("expecting string key, not {}", type_name(other)),
                            addr,
                        ))
                    }
                };
                match item_key {
                    "path" => path = Some(Template::parse(item_conf)),
                    "key" => key = Some(Template::parse(item_conf)),
                    "start" => start = Some(parse_index("start", item_conf, addr)?),
                    "stop" => stop = Some(parse_index("stop", item_conf, addr)?),
                    other => {
                        return Err(bad_conf(
                            "include",
                            format!("unknown key \"{}\"", other),
                            addr,
                        ))
                    }
                }
            }
            let path = path
                .ok_or_else(|| bad_conf("include", "missing required key \"path\"", addr))?;
            (path, key, start, stop)
        }
        other => {
            return Err(bad_conf(
                "include",
                format!("expecting string or mapping, not {}", type_name(other)),
                addr,
            ))
        }
    };

    Ok(Box::new(IncludeAction {
        path,
        key,
        start,
        stop,
        addr: addr.clone(),
    }))
}

fn parse_index(name: &str, value: &Value, addr: &Address) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| {
            bad_conf(
                "include",
                format!("\"{}\" must be a non-negative integer, not {}", name, type_name(value)),
                addr,
            )
        })
}

impl Action for IncludeAction {
    fn name(&self) -> &str {
        "include"
    }

    fn call(&self, _ctxt: &mut Context) -> Result<StepResult> {
        Err(StrideError::config(
            "action \"include\" cannot run; it expands at flatten time",
            Some(&self.addr),
        ))
    }

    fn expand(&self, ctxt: &mut Context, flattener: &mut Flattener) -> Result<Vec<Step>> {
        let file = self.path.render_string(&ctxt.variables, &self.addr)?;
        let key = self
            .key
            .as_ref()
            .map(|t| t.render_string(&ctxt.variables, &self.addr))
            .transpose()?;
        let path = resolve_relative(&self.addr.source, &file)?;

        let mut steps = flattener.parse_file(ctxt, &path, key.as_deref(), Some(&self.addr))?;

        // Subrange selection, clamped to the available steps.
        let stop = self.stop.unwrap_or(steps.len()).min(steps.len());
        let start = self.start.unwrap_or(0).min(stop);
        steps.truncate(stop);
        steps.drain(..start);
        Ok(steps)
    }
}

fn parse_string_list(
    action: &str,
    key: &str,
    value: &Value,
    addr: &Address,
) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(bad_conf(
                    action,
                    format!(
                        "\"{}\" entries must be strings, not {}",
                        key,
                        type_name(other)
                    ),
                    addr,
                )),
            })
            .collect(),
        other => Err(bad_conf(
            action,
            format!(
                "\"{}\" must be a string or list of strings, not {}",
                key,
                type_name(other)
            ),
            addr,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use std::path::PathBuf;

    fn context() -> Context {
        let env = Environment::from_parts(std::iter::empty(), PathBuf::from("/work"));
        Context::new(0, false, env)
    }

    fn addr() -> Address {
        Address::new("test.yml", 0, None)
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn run_rejects_bad_config() {
        assert!(build_run(&yaml("{a: 1}"), &addr()).is_err());
        assert!(build_run(&yaml("[]"), &addr()).is_err());
        assert!(build_run(&yaml("echo hi"), &addr()).is_ok());
        assert!(build_run(&yaml("[echo, hi]"), &addr()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn run_shell_form_reports_state() {
        let env = Environment::from_host(None).unwrap();
        let mut ctxt = Context::new(0, false, env);
        let action = build_run(&yaml("exit 0"), &addr()).unwrap();
        assert_eq!(action.call(&mut ctxt).unwrap().state, StepState::Success);
        let action = build_run(&yaml("exit 4"), &addr()).unwrap();
        let result = action.call(&mut ctxt).unwrap();
        assert_eq!(result.state, StepState::Failure);
        assert_eq!(result.returncode, Some(4));
    }

    #[cfg(unix)]
    #[test]
    fn run_list_form_skips_the_shell() {
        let env = Environment::from_host(None).unwrap();
        let mut ctxt = Context::new(0, false, env);
        let action = build_run(&yaml("[\"true\"]"), &addr()).unwrap();
        assert_eq!(action.call(&mut ctxt).unwrap().state, StepState::Success);
        let action = build_run(&yaml("[\"false\"]"), &addr()).unwrap();
        assert_eq!(action.call(&mut ctxt).unwrap().state, StepState::Failure);
    }

    #[cfg(unix)]
    #[test]
    fn run_renders_variables() {
        let env = Environment::from_host(None).unwrap();
        let mut ctxt = Context::new(0, false, env);
        ctxt.variables.set("code", Value::Number(0.into()));
        let action = build_run(&yaml("exit ${code}"), &addr()).unwrap();
        assert_eq!(action.call(&mut ctxt).unwrap().state, StepState::Success);
    }

    #[test]
    fn chdir_updates_environment_cwd() {
        let mut ctxt = context();
        let action = build_chdir(&yaml("sub"), &addr()).unwrap();
        action.call(&mut ctxt).unwrap();
        assert_eq!(ctxt.environment.cwd(), Path::new("/work/sub"));
    }

    #[test]
    fn chdir_requires_a_string() {
        assert!(build_chdir(&yaml("[a]"), &addr()).is_err());
    }

    #[test]
    fn var_sets_and_unsets() {
        let mut ctxt = context();
        ctxt.variables.set("old", Value::Bool(true));
        let action = build_var(
            &yaml("set:\n  x: 1\n  y: two\nunset: old\n"),
            &addr(),
        )
        .unwrap();
        action.call(&mut ctxt).unwrap();
        assert_eq!(ctxt.variables.get("x"), Some(&Value::Number(1.into())));
        assert_eq!(ctxt.variables.get("y"), Some(&Value::String("two".into())));
        assert_eq!(ctxt.variables.get("old"), None);
    }

    #[test]
    fn var_set_values_render_templates() {
        let mut ctxt = context();
        ctxt.variables.set("base", Value::String("v1".into()));
        let action = build_var(&yaml("set:\n  tag: \"${base}-rc\"\n"), &addr()).unwrap();
        action.call(&mut ctxt).unwrap();
        assert_eq!(
            ctxt.variables.get("tag"),
            Some(&Value::String("v1-rc".into()))
        );
    }

    #[test]
    fn var_sensitive_is_applied_before_set() {
        let mut ctxt = context();
        let action = build_var(
            &yaml("set:\n  token: hunter2\nsensitive: token\n"),
            &addr(),
        )
        .unwrap();
        action.call(&mut ctxt).unwrap();
        assert!(ctxt.variables.is_sensitive("token"));
        assert_eq!(
            ctxt.variables.get("token"),
            Some(&Value::String("hunter2".into()))
        );
    }

    #[test]
    fn var_null_config_is_an_empty_update() {
        let mut ctxt = context();
        let action = build_var(&Value::Null, &addr()).unwrap();
        action.call(&mut ctxt).unwrap();
        assert!(ctxt.variables.is_empty());
    }

    #[test]
    fn var_rejects_unknown_keys() {
        assert!(build_var(&yaml("frob: 1"), &addr()).is_err());
    }

    #[test]
    fn var_loads_files_then_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("vars.yml");
        std::fs::write(&file, "x: from-file\ny: kept\n").unwrap();

        let mut ctxt = context();
        let conf = format!("files: {}\nset:\n  x: overridden\n", file.display());
        let step_addr = Address::new(
            dir.path().join("test.yml").display().to_string(),
            0,
            None,
        );
        let action = build_var(&yaml(&conf), &step_addr).unwrap();
        action.call(&mut ctxt).unwrap();
        assert_eq!(
            ctxt.variables.get("x"),
            Some(&Value::String("overridden".into()))
        );
        assert_eq!(ctxt.variables.get("y"), Some(&Value::String("kept".into())));
    }

    #[test]
    fn var_files_relative_to_step_source() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("vars.yml"), "z: 9\n").unwrap();

        let mut ctxt = context();
        let step_addr = Address::new(
            dir.path().join("test.yml").display().to_string(),
            0,
            None,
        );
        let action = build_var(&yaml("files: vars.yml"), &step_addr).unwrap();
        action.call(&mut ctxt).unwrap();
        assert_eq!(ctxt.variables.get("z"), Some(&Value::Number(9.into())));
    }

    #[test]
    fn var_missing_file_is_skipped() {
        let mut ctxt = context();
        let action = build_var(&yaml("files: /no/such/file.yml"), &addr()).unwrap();
        assert_eq!(
            action.call(&mut ctxt).unwrap().state,
            StepState::Success
        );
    }

    #[test]
    fn env_values_are_stringified() {
        let mut ctxt = context();
        let action = build_env(&yaml("set:\n  COUNT: 3\n"), &addr()).unwrap();
        action.call(&mut ctxt).unwrap();
        assert_eq!(ctxt.environment.get("COUNT"), Some("3"));
    }

    #[test]
    fn env_sensitive_reaches_the_channel() {
        let mut ctxt = context();
        let action = build_env(
            &yaml("set:\n  PASSWORD: hunter2\nsensitive: PASSWORD\n"),
            &addr(),
        )
        .unwrap();
        action.call(&mut ctxt).unwrap();
        assert!(ctxt.environment.is_sensitive("PASSWORD"));
        assert_eq!(ctxt.environment.get("PASSWORD"), Some("hunter2"));
        let channel = ctxt
            .environment
            .get(crate::environment::SENSITIVE_CHANNEL)
            .unwrap();
        assert!(channel.contains("PASSWORD"));
    }

    #[test]
    fn include_requires_a_path() {
        assert!(build_include(&yaml("key: smoke"), &addr()).is_err());
        assert!(build_include(&yaml("sub.yml"), &addr()).is_ok());
        assert!(build_include(&yaml("path: sub.yml\nstart: 1\nstop: 3\n"), &addr()).is_ok());
    }

    #[test]
    fn include_rejects_negative_indices() {
        assert!(build_include(&yaml("path: sub.yml\nstart: -1\n"), &addr()).is_err());
    }

    #[test]
    fn include_cannot_run() {
        let mut ctxt = context();
        let action = build_include(&yaml("sub.yml"), &addr()).unwrap();
        assert!(action.call(&mut ctxt).is_err());
    }

    #[test]
    fn include_subrange_is_clamped() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("sub.yml"),
            "- run: echo a\n- run: echo b\n- run: echo c\n",
        )
        .unwrap();

        let mut ctxt = context();
        let step_addr = Address::new(
            dir.path().join("main.yml").display().to_string(),
            0,
            None,
        );
        let action = build_include(
            &yaml("path: sub.yml\nstart: 1\nstop: 99\n"),
            &step_addr,
        )
        .unwrap();
        let mut flattener = Flattener::new();
        let steps = action.expand(&mut ctxt, &mut flattener).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].address.index, 1);
    }
}

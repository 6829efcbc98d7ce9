//! Step resolution, the capability registry, and include flattening.
//!
//! Raw parsed steps are mappings of capability keys to raw configuration.
//! Resolution separates exactly one action key from zero or more modifier
//! keys through a static registration table; there is no runtime discovery.
//! New action or modifier variants are added by extending the tables below.
//!
//! Step actions (currently `include`) are invoked here, at flatten time, and
//! splice their replacement steps in place. The [`Flattener`] tracks the
//! stack of sources currently being expanded so that an include cycle fails
//! fast instead of recursing forever.

use crate::address::Address;
use crate::context::Context;
use crate::environment::canonicalize_path;
use crate::error::{Result, StrideError};
use crate::render::type_name;
use crate::steps::{actions, modifiers, Action, Modifier, Step};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Which action classes a modifier is compatible with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restriction {
    /// Ordinary actions only.
    Normal,

    /// Step actions only.
    StepAction,

    /// Either.
    Unrestricted,
}

impl Restriction {
    /// Whether a modifier with this restriction may wrap the given action
    /// class.
    pub fn allows(&self, step_action: bool) -> bool {
        match self {
            Restriction::Normal => !step_action,
            Restriction::StepAction => step_action,
            Restriction::Unrestricted => true,
        }
    }
}

type ActionBuilder = fn(&Value, &Address) -> Result<Box<dyn Action>>;
type ModifierBuilder = fn(&Value, &Address) -> Result<Box<dyn Modifier>>;

/// Registry entry for an action variant.
#[derive(Debug)]
pub struct ActionSpec {
    /// The configuration key the action is resolved from.
    pub name: &'static str,

    /// Step actions run at flatten time and expand into replacement steps.
    pub step_action: bool,

    build: ActionBuilder,
}

/// Registry entry for a modifier variant.
#[derive(Debug)]
pub struct ModifierSpec {
    /// The configuration key the modifier is resolved from.
    pub name: &'static str,

    /// Application order; lower is outer.
    pub priority: i32,

    /// Action classes the modifier is compatible with.
    pub restriction: Restriction,

    build: ModifierBuilder,
}

/// The action registration table.
static ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "run",
        step_action: false,
        build: actions::build_run,
    },
    ActionSpec {
        name: "chdir",
        step_action: false,
        build: actions::build_chdir,
    },
    ActionSpec {
        name: "var",
        step_action: false,
        build: actions::build_var,
    },
    ActionSpec {
        name: "env",
        step_action: false,
        build: actions::build_env,
    },
    ActionSpec {
        name: "include",
        step_action: true,
        build: actions::build_include,
    },
];

/// The modifier registration table.
static MODIFIERS: &[ModifierSpec] = &[
    ModifierSpec {
        name: "when",
        priority: modifiers::CONDITIONAL_PRIORITY,
        restriction: Restriction::Unrestricted,
        build: modifiers::build_when,
    },
    ModifierSpec {
        name: "ignore-errors",
        priority: modifiers::IGNORE_ERRORS_PRIORITY,
        restriction: Restriction::Normal,
        build: modifiers::build_ignore_errors,
    },
];

fn find_action(name: &str) -> Option<&'static ActionSpec> {
    ACTIONS.iter().find(|spec| spec.name == name)
}

fn find_modifier(name: &str) -> Option<&'static ModifierSpec> {
    MODIFIERS.iter().find(|spec| spec.name == name)
}

/// Parse a test description file into a fully flattened step list.
pub fn parse_file(ctxt: &mut Context, path: &Path, key: Option<&str>) -> Result<Vec<Step>> {
    Flattener::new().parse_file(ctxt, path, key, None)
}

/// Tracks the sources currently being flattened, for cycle detection.
#[derive(Debug, Default)]
pub struct Flattener {
    stack: Vec<(PathBuf, Option<String>)>,
}

impl Flattener {
    /// Create a flattener with an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one source file (or one keyed list within it), expanding step
    /// actions recursively. `from` is the address of the including step,
    /// when there is one.
    pub fn parse_file(
        &mut self,
        ctxt: &mut Context,
        path: &Path,
        key: Option<&str>,
        from: Option<&Address>,
    ) -> Result<Vec<Step>> {
        let base = std::env::current_dir()?;
        let canonical = canonicalize_path(&base, path);
        let frame = (canonical, key.map(String::from));
        if self.stack.contains(&frame) {
            let mut chain: Vec<String> = self
                .stack
                .iter()
                .map(|(p, _)| p.display().to_string())
                .collect();
            chain.push(frame.0.display().to_string());
            return Err(StrideError::config(
                format!("include cycle detected: {}", chain.join(" -> ")),
                from,
            ));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            StrideError::config(
                format!("Failed to read file \"{}\": {}", path.display(), e),
                from,
            )
        })?;
        let data: Value = serde_yaml::from_str(&text).map_err(|e| {
            StrideError::config(
                format!("Failed to parse file \"{}\": {}", path.display(), e),
                from,
            )
        })?;

        let source = path.display().to_string();
        let step_data = match key {
            Some(key) => match data {
                Value::Mapping(mut map) => map
                    .remove(key)
                    .ok_or_else(|| {
                        StrideError::config(
                            format!(
                                "Bad step configuration file \"{}\": expecting mapping with key \"{}\"",
                                source, key
                            ),
                            from,
                        )
                    })?,
                other => {
                    return Err(StrideError::config(
                        format!(
                            "Bad step configuration file \"{}\": expecting mapping, not {}",
                            source,
                            type_name(&other)
                        ),
                        from,
                    ))
                }
            },
            None => data,
        };

        let items = match step_data {
            Value::Sequence(items) => items,
            other => {
                let at = match key {
                    Some(key) => format!("{}[{}]", source, key),
                    None => source.clone(),
                };
                return Err(StrideError::config(
                    format!(
                        "Bad step configuration sequence at {}: expecting list, not {}",
                        at,
                        type_name(&other)
                    ),
                    from,
                ));
            }
        };

        self.stack.push(frame);
        let mut steps = Vec::new();
        let mut outcome = Ok(());
        for (idx, step_conf) in items.into_iter().enumerate() {
            let addr = Address::new(source.clone(), idx, key.map(String::from));
            match self.parse_step(ctxt, addr, step_conf) {
                Ok(mut expanded) => steps.append(&mut expanded),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.stack.pop();
        outcome.map(|_| steps)
    }

    /// Resolve one raw step into zero or more steps (more than one only via
    /// step-action expansion).
    pub fn parse_step(
        &mut self,
        ctxt: &mut Context,
        addr: Address,
        step_conf: Value,
    ) -> Result<Vec<Step>> {
        // A bare string is shorthand for an action with no configuration.
        let map = match step_conf {
            Value::String(s) => {
                let mut map = serde_yaml::Mapping::new();
                map.insert(Value::String(s), Value::Null);
                map
            }
            Value::Mapping(map) => map,
            other => {
                return Err(StrideError::config(
                    format!(
                        "Unable to parse step configuration: expecting string or mapping, not {}",
                        type_name(&other)
                    ),
                    Some(&addr),
                ))
            }
        };

        let mut name = None;
        let mut description = None;
        let mut action_item: Option<(&'static ActionSpec, Value)> = None;
        let mut mod_items: Vec<(&'static ModifierSpec, Value)> = Vec::new();

        for (key, key_conf) in map {
            let key = match key {
                Value::String(key) => key,
                other => {
                    return Err(StrideError::config(
                        format!("Bad step configuration: expecting string key, not {}", type_name(&other)),
                        Some(&addr),
                    ))
                }
            };

            match key.as_str() {
                "name" | "description" => {
                    let text = match key_conf {
                        Value::String(text) => text,
                        other => {
                            return Err(StrideError::config(
                                format!(
                                    "Bad step configuration: \"{}\" must be a string, not {}",
                                    key,
                                    type_name(&other)
                                ),
                                Some(&addr),
                            ))
                        }
                    };
                    if key == "name" {
                        name = Some(text);
                    } else {
                        description = Some(text);
                    }
                }
                other_key => {
                    if let Some(spec) = find_action(other_key) {
                        if let Some((existing, _)) = action_item {
                            return Err(StrideError::config(
                                format!(
                                    "Bad step configuration: action \"{}\" specified, but action \"{}\" already processed",
                                    other_key, existing.name
                                ),
                                Some(&addr),
                            ));
                        }
                        action_item = Some((spec, key_conf));
                    } else if let Some(spec) = find_modifier(other_key) {
                        mod_items.push((spec, key_conf));
                    } else {
                        return Err(StrideError::config(
                            format!("Bad step configuration: unable to resolve action \"{}\"", other_key),
                            Some(&addr),
                        ));
                    }
                }
            }
        }

        let (action_spec, action_conf) = action_item.ok_or_else(|| {
            StrideError::config("Bad step configuration: no action specified", Some(&addr))
        })?;

        // Ascending priority; sort_by_key is stable, so declaration order
        // breaks ties.
        mod_items.sort_by_key(|(spec, _)| spec.priority);

        let mut modifiers: Vec<Box<dyn Modifier>> = Vec::with_capacity(mod_items.len());
        for (spec, conf) in &mod_items {
            if !spec.restriction.allows(action_spec.step_action) {
                return Err(StrideError::config(
                    format!(
                        "Bad step configuration: modifier \"{}\" is incompatible with the action \"{}\"",
                        spec.name, action_spec.name
                    ),
                    Some(&addr),
                ));
            }
            modifiers.push((spec.build)(conf, &addr)?);
        }

        // Fold each modifier's configuration rewrite over the action's raw
        // configuration, lowest priority first, then construct the action.
        let action_conf = fold_action_conf(ctxt, &modifiers, action_spec, action_conf, &addr)?;
        let action = (action_spec.build)(&action_conf, &addr)?;

        let step = Step::new(addr, action, modifiers, name, description);

        if action_spec.step_action {
            step.expand(ctxt, self)
        } else {
            Ok(vec![step])
        }
    }
}

/// Apply `action_conf` across modifiers in ascending priority order.
pub(crate) fn fold_action_conf(
    ctxt: &mut Context,
    modifiers: &[Box<dyn Modifier>],
    action: &ActionSpec,
    mut config: Value,
    addr: &Address,
) -> Result<Value> {
    for modifier in modifiers {
        config = modifier.action_conf(ctxt, action, config, addr)?;
    }
    Ok(config)
}

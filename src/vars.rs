//! Variable resolution: turns symbolic references into concrete strings.
//!
//! Every reference in a manifest is lowered into a [`VarTable`], an arena of
//! nodes addressed by [`VarId`], each with a cache slot. Scopes map names to
//! ids: one map per entry, one manifest-wide map, then the built-in
//! constants. A structured reference caches its value the first time it is
//! resolved, so a prompt is shown at most once per run no matter how many
//! times the variable is used.
use std::collections::HashMap;

use serde_yaml::Value;

use crate::error::{MyinitError, PromptError, ResolveError};
use crate::platform::Identity;
use crate::prompt::{Choice, Gate};

/// Chained resolutions allowed before giving up (bounds reference cycles).
pub const MAX_DEPTH: usize = 100;

/// Name of the built-in switch that makes prompts with a default answer
/// themselves.
pub const AUTO_DEFAULT_VAR: &str = "AutomaticallyUseDefault";

/// Name of the built-in holding the archive prefix for extra content.
pub const EXTRA_PREFIX_VAR: &str = "ExtraArchiveFilePrefix";

/// Default archive prefix for verbatim-copied extra content.
pub const EXTRA_PREFIX: &str = "__extra__/";

const DIR_SUFFIX_TOKEN: &str = "does_not_end_with_backslash";

/// Index of a node in a [`VarTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(usize);

/// Index of an entry-local scope in a [`VarTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// A lowered variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarNode {
    /// A plain string; `{name}` placeholders are substituted on every use.
    Template(String),
    /// An immediate value; templated unless `literal`.
    Value { text: String, literal: bool },
    /// The value of another variable, looked up by name.
    Ref(String),
    /// Ask the user, optionally offering a default.
    Prompt {
        default: Option<String>,
        description: Option<String>,
    },
    /// `null` or an unsupported shape; fails when resolved.
    Invalid,
}

impl VarNode {
    /// Lower a YAML value into a node.
    ///
    /// Strings become templates, booleans and numbers literal values, and
    /// mappings structured references (`value`/`doNotFormat`, `refVar`, or a
    /// prompt with `defaultValue`/`description`).
    #[must_use]
    pub fn from_yaml(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Template(s.clone()),
            Value::Bool(_) | Value::Number(_) => Self::Value {
                text: scalar_text(value).unwrap_or_default(),
                literal: true,
            },
            Value::Mapping(map) => {
                let field = |key: &str| map.get(key).filter(|v| !v.is_null());
                if let Some(imm) = field("value") {
                    let Some(text) = scalar_text(imm) else {
                        return Self::Invalid;
                    };
                    let do_not_format = field("doNotFormat").and_then(Value::as_bool) == Some(true);
                    Self::Value {
                        literal: do_not_format || !imm.is_string(),
                        text,
                    }
                } else if let Some(target) = field("refVar") {
                    scalar_text(target).map_or(Self::Invalid, Self::Ref)
                } else {
                    Self::Prompt {
                        default: field("defaultValue").and_then(scalar_text),
                        description: field("description").and_then(scalar_text),
                    }
                }
            }
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
            Value::Null | Value::Sequence(_) => Self::Invalid,
        }
    }
}

/// Render a YAML scalar as a string.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whether a resolved value reads as "true".
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    matches!(value, "True" | "true" | "yes" | "Yes")
}

/// Built-in constants, consulted after the entry and manifest scopes.
#[derive(Debug, Clone, Default)]
pub struct Builtins(HashMap<String, String>);

impl Builtins {
    /// The constants for a run by `identity`.
    #[must_use]
    pub fn new(identity: &Identity, use_defaults: bool) -> Self {
        let tool_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| format!("{}/", p.display())))
            .unwrap_or_else(|| "./".to_string());

        let mut map = HashMap::new();
        map.insert("MyInitDir".to_string(), tool_dir);
        map.insert("TmpSystemDir".to_string(), "/tmp/".to_string());
        map.insert(EXTRA_PREFIX_VAR.to_string(), EXTRA_PREFIX.to_string());
        map.insert(
            AUTO_DEFAULT_VAR.to_string(),
            if use_defaults { "true" } else { "false" }.to_string(),
        );
        map.insert("CurrentUser".to_string(), identity.user.clone());
        map.insert("CurrentUserId".to_string(), identity.uid.to_string());
        map.insert("CurrentGroup".to_string(), identity.group.clone());
        map.insert("CurrentGroupId".to_string(), identity.gid.to_string());
        Self(map)
    }

    /// Add or replace a constant.
    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    /// Look up a constant.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

#[derive(Debug)]
struct Slot {
    node: VarNode,
    cache: Option<String>,
}

enum Found {
    Var(VarId),
    Const(String),
}

enum Piece {
    Text(String),
    Field(String),
}

/// Arena of variable nodes plus their scopes.
#[derive(Debug)]
pub struct VarTable {
    slots: Vec<Slot>,
    global: HashMap<String, VarId>,
    scopes: Vec<HashMap<String, VarId>>,
    builtins: Builtins,
}

impl VarTable {
    /// Create an empty table backed by `builtins`.
    #[must_use]
    pub fn new(builtins: Builtins) -> Self {
        Self {
            slots: Vec::new(),
            global: HashMap::new(),
            scopes: Vec::new(),
            builtins,
        }
    }

    /// Store a node that is not bound to any name (e.g. an entry's command).
    pub fn alloc(&mut self, node: VarNode) -> VarId {
        self.slots.push(Slot { node, cache: None });
        VarId(self.slots.len() - 1)
    }

    /// Bind `name` in the manifest-wide scope, replacing any earlier binding.
    pub fn define_global(&mut self, name: &str, node: VarNode) -> VarId {
        let id = self.alloc(node);
        self.global.insert(name.to_string(), id);
        id
    }

    /// Open a new, empty entry-local scope.
    pub fn new_scope(&mut self) -> ScopeId {
        self.scopes.push(HashMap::new());
        ScopeId(self.scopes.len() - 1)
    }

    /// Bind `name` in an entry-local scope.
    pub fn define_local(&mut self, scope: ScopeId, name: &str, node: VarNode) -> VarId {
        let id = self.alloc(node);
        if let Some(map) = self.scopes.get_mut(scope.0) {
            map.insert(name.to_string(), id);
        }
        id
    }

    /// The cached value of a node, if it has been resolved.
    #[cfg(test)]
    pub(crate) fn cached(&self, id: VarId) -> Option<&str> {
        self.slots.get(id.0).and_then(|s| s.cache.as_deref())
    }

    /// Resolve node `id`, displayed to the user as `name`.
    ///
    /// `scope` is the entry being processed; placeholders and references are
    /// looked up there first, then in the manifest scope, then in the
    /// built-ins.
    ///
    /// # Errors
    ///
    /// Fails with a [`ResolveError`] for unknown names, invalid references
    /// and chains deeper than [`MAX_DEPTH`], or with a [`PromptError`] if the
    /// user aborts.
    pub fn resolve(
        &mut self,
        name: &str,
        id: VarId,
        scope: Option<ScopeId>,
        gate: &mut Gate,
    ) -> Result<String, MyinitError> {
        self.resolve_at(name, id, scope, gate, 0)
    }

    /// Look `name` up through the scopes and resolve it.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn resolve_name(
        &mut self,
        name: &str,
        scope: Option<ScopeId>,
        gate: &mut Gate,
    ) -> Result<String, MyinitError> {
        self.resolve_lookup(name, scope, gate, 0)
    }

    fn resolve_at(
        &mut self,
        name: &str,
        id: VarId,
        scope: Option<ScopeId>,
        gate: &mut Gate,
        depth: usize,
    ) -> Result<String, MyinitError> {
        let value = self.resolve_node(name, id, scope, gate, depth)?;
        check_dir_suffix(name, &value, gate)?;
        Ok(value)
    }

    fn resolve_node(
        &mut self,
        name: &str,
        id: VarId,
        scope: Option<ScopeId>,
        gate: &mut Gate,
        depth: usize,
    ) -> Result<String, MyinitError> {
        if depth >= MAX_DEPTH {
            return Err(ResolveError::RecursionLimit(name.to_string()).into());
        }
        let slot = self
            .slots
            .get(id.0)
            .ok_or_else(|| ResolveError::InvalidReference(name.to_string()))?;
        if let Some(cached) = &slot.cache {
            return Ok(cached.clone());
        }

        let value = match slot.node.clone() {
            VarNode::Invalid => {
                return Err(ResolveError::InvalidReference(name.to_string()).into());
            }
            // Plain strings are re-formatted on every use and never cached.
            VarNode::Template(template) => {
                return self.format(name, &template, scope, gate, depth);
            }
            VarNode::Value {
                text,
                literal: true,
            } => text,
            VarNode::Value {
                text,
                literal: false,
            } => self.format(name, &text, scope, gate, depth)?,
            VarNode::Ref(target) => self.resolve_lookup(&target, scope, gate, depth + 1)?,
            VarNode::Prompt {
                default,
                description,
            } => self.prompt_value(name, default, description, scope, gate, depth)?,
        };

        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.cache = Some(value.clone());
        }
        Ok(value)
    }

    fn resolve_lookup(
        &mut self,
        name: &str,
        scope: Option<ScopeId>,
        gate: &mut Gate,
        depth: usize,
    ) -> Result<String, MyinitError> {
        match self.lookup(name, scope)? {
            Found::Var(id) => self.resolve_at(name, id, scope, gate, depth),
            Found::Const(value) => {
                if depth >= MAX_DEPTH {
                    return Err(ResolveError::RecursionLimit(name.to_string()).into());
                }
                check_dir_suffix(name, &value, gate)?;
                Ok(value)
            }
        }
    }

    fn lookup(&self, name: &str, scope: Option<ScopeId>) -> Result<Found, ResolveError> {
        let local = scope
            .and_then(|s| self.scopes.get(s.0))
            .and_then(|map| map.get(name));
        if let Some(id) = local.or_else(|| self.global.get(name)) {
            return Ok(Found::Var(*id));
        }
        self.builtins
            .get(name)
            .map(|v| Found::Const(v.to_string()))
            .ok_or_else(|| ResolveError::UnresolvedReference(name.to_string()))
    }

    fn format(
        &mut self,
        name: &str,
        template: &str,
        scope: Option<ScopeId>,
        gate: &mut Gate,
        depth: usize,
    ) -> Result<String, MyinitError> {
        let pieces = parse_template(template).ok_or_else(|| ResolveError::MalformedTemplate {
            name: name.to_string(),
            template: template.to_string(),
        })?;

        let mut out = String::with_capacity(template.len());
        for piece in pieces {
            match piece {
                Piece::Text(text) => out.push_str(&text),
                Piece::Field(field) => {
                    out.push_str(&self.resolve_lookup(&field, scope, gate, depth + 1)?);
                }
            }
        }
        Ok(out)
    }

    fn prompt_value(
        &mut self,
        name: &str,
        default: Option<String>,
        description: Option<String>,
        scope: Option<ScopeId>,
        gate: &mut Gate,
        depth: usize,
    ) -> Result<String, MyinitError> {
        let about = description.map_or_else(String::new, |d| format!("({d})"));
        let Some(default) = default else {
            return Ok(gate.read_value(&format!("Input value for variable {name}{about}: "))?);
        };

        let auto = self.resolve_lookup(AUTO_DEFAULT_VAR, scope, gate, depth + 1)?;
        if is_truthy(&auto) {
            return Ok(default);
        }

        let input =
            gate.read_value(&format!("Input value for variable {name}{about} [Default={default}]: "))?;
        Ok(if input.is_empty() { default } else { input })
    }
}

/// Names ending in `dir` must hold a directory string ending in `/`, since
/// paths are built by plain concatenation.
fn check_dir_suffix(name: &str, value: &str, gate: &mut Gate) -> Result<(), PromptError> {
    if !name.to_ascii_lowercase().ends_with("dir") || value.ends_with('/') {
        return Ok(());
    }
    let answer = gate.ask(
        DIR_SUFFIX_TOKEN,
        &format!("{name} does not end with a slash. Continue? "),
        &[Choice::Yes, Choice::No, Choice::All, Choice::Exit],
    )?;
    if answer == Choice::Yes {
        Ok(())
    } else {
        Err(PromptError::UserAbort)
    }
}

/// Split a template into literal text and `{field}` placeholders.
///
/// `{{` and `}}` are literal braces. A `:spec` or `!conv` suffix inside a
/// placeholder is ignored. Returns `None` for unbalanced braces or empty
/// field names.
fn parse_template(template: &str) -> Option<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '}' => return None,
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        '{' => return None,
                        ch => field.push(ch),
                    }
                }
                let field = field
                    .split([':', '!'])
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if field.is_empty() {
                    return None;
                }
                if !text.is_empty() {
                    pieces.push(Piece::Text(std::mem::take(&mut text)));
                }
                pieces.push(Piece::Field(field));
            }
            _ => text.push(c),
        }
    }
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Some(pieces)
}

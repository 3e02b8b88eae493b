//! Resource descriptors
//!
//! A [`ResourceDescriptor`] is the immutable template for one resource kind:
//! which attributes exist, which of them may change in place, and which
//! lifecycle actions the platform accepts. The engine validates every
//! request against it before calling the client.

use crate::action::LifecycleAction;
use crate::desired::DesiredState;
use crate::duration::parse_duration;
use crate::enums::{ClosedEnum, allowed_values};
use crate::error::{ReconcileError, Result};
use crate::value::{AttrValue, Attributes, Setting};

/// Value placeholder used in logs for sensitive attributes
pub const REDACTED: &str = "(sensitive)";

/// Semantic type of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttrType {
    String,
    Number,
    Bool,
    /// Duration string such as "20m" or "1h30m"
    Duration,
    List(Box<AttrType>),
    /// String restricted to a fixed set, matched case-insensitively
    OneOf(Vec<&'static str>),
}

impl AttrType {
    /// Restrict to the wire values of a closed enum
    pub fn one_of<T: ClosedEnum>() -> Self {
        AttrType::OneOf(allowed_values::<T>())
    }

    pub fn list_of(inner: AttrType) -> Self {
        AttrType::List(Box::new(inner))
    }

    fn name(&self) -> String {
        match self {
            AttrType::String | AttrType::OneOf(_) => "string".to_string(),
            AttrType::Number => "number".to_string(),
            AttrType::Bool => "bool".to_string(),
            AttrType::Duration => "duration string".to_string(),
            AttrType::List(inner) => format!("list of {}", inner.name()),
        }
    }

    /// Check `value` against this type, returning its normalized form
    /// (numbers and bools given as strings are converted, enum values take
    /// their canonical spelling).
    pub fn check(&self, value: &AttrValue) -> std::result::Result<AttrValue, String> {
        match (self, value) {
            (AttrType::String, AttrValue::String(_))
            | (AttrType::Number, AttrValue::Number(_))
            | (AttrType::Bool, AttrValue::Bool(_)) => Ok(value.clone()),
            (AttrType::Number, AttrValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(AttrValue::Number)
                .map_err(|_| format!("expected a number, got \"{}\"", s)),
            (AttrType::Bool, AttrValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(AttrValue::Bool(true)),
                "false" => Ok(AttrValue::Bool(false)),
                _ => Err(format!("expected a bool, got \"{}\"", s)),
            },
            (AttrType::Duration, AttrValue::String(s)) => parse_duration(s)
                .map(|_| value.clone())
                .map_err(|e| e.to_string()),
            (AttrType::OneOf(allowed), AttrValue::String(s)) => allowed
                .iter()
                .find(|candidate| candidate.eq_ignore_ascii_case(s.trim()))
                .map(|canonical| AttrValue::from(*canonical))
                .ok_or_else(|| {
                    format!(
                        "unsupported value \"{}\". Supported values are: {}",
                        s,
                        allowed.join(",")
                    )
                }),
            (AttrType::List(inner), AttrValue::List(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| inner.check(item).map_err(|e| format!("element {}: {}", i, e)))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(AttrValue::List),
            (expected, actual) => Err(format!(
                "expected {}, got {}",
                expected.name(),
                actual.type_name()
            )),
        }
    }
}

/// Whether and how an attribute may change after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Set at creation; changing it requires replacing the resource
    Immutable,
    /// May be changed in place with an UPDATE
    Mutable,
    /// Assigned by the platform, never configured
    Computed,
}

/// Schema of a single attribute or action parameter
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttrType,
    pub required: bool,
    pub mutability: Mutability,
    pub default: Option<AttrValue>,
    pub sensitive: bool,
}

impl AttributeSchema {
    pub fn required(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: true,
            mutability: Mutability::Immutable,
            default: None,
            sensitive: false,
        }
    }

    pub fn optional(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            required: false,
            ..Self::required(name, attr_type)
        }
    }

    pub fn computed(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            mutability: Mutability::Computed,
            ..Self::optional(name, attr_type)
        }
    }

    pub fn mutable(mut self) -> Self {
        self.mutability = Mutability::Mutable;
        self
    }

    pub fn with_default(mut self, value: impl Into<AttrValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn is_computed(&self) -> bool {
        self.mutability == Mutability::Computed
    }
}

/// `param` must be present whenever `when` equals `equals`
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub param: String,
    pub when: String,
    pub equals: String,
}

/// A lifecycle action the resource kind accepts, with its parameter schema
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSchema {
    pub action: LifecycleAction,
    pub params: Vec<AttributeSchema>,
    pub conditions: Vec<Condition>,
}

impl ActionSchema {
    pub fn new(action: LifecycleAction) -> Self {
        Self {
            action,
            params: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn param(mut self, schema: AttributeSchema) -> Self {
        self.params.push(schema);
        self
    }

    pub fn require_when(
        mut self,
        param: impl Into<String>,
        when: impl Into<String>,
        equals: impl Into<String>,
    ) -> Self {
        self.conditions.push(Condition {
            param: param.into(),
            when: when.into(),
            equals: equals.into(),
        });
        self
    }
}

/// Immutable template describing one resource kind
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    kind: String,
    identity_field: String,
    attributes: Vec<AttributeSchema>,
    actions: Vec<ActionSchema>,
}

impl ResourceDescriptor {
    pub fn new(kind: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identity_field: identity_field.into(),
            attributes: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.push(schema);
        self
    }

    pub fn action(mut self, schema: ActionSchema) -> Self {
        self.actions.push(schema);
        self
    }

    /// Declare parameterless actions (CREATE, DELETE, ...)
    pub fn actions(mut self, actions: &[LifecycleAction]) -> Self {
        self.actions
            .extend(actions.iter().copied().map(ActionSchema::new));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    pub fn attributes(&self) -> &[AttributeSchema] {
        &self.attributes
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attributes that may appear in a create request
    pub fn creatable(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| !a.is_computed())
    }

    /// Attributes that may change in place
    pub fn mutable_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes
            .iter()
            .filter(|a| a.mutability == Mutability::Mutable)
    }

    pub fn supports(&self, action: LifecycleAction) -> bool {
        self.actions.iter().any(|a| a.action == action)
    }

    pub fn supported_actions(&self) -> Vec<LifecycleAction> {
        self.actions.iter().map(|a| a.action).collect()
    }

    pub fn action_schema(&self, action: LifecycleAction) -> Option<&ActionSchema> {
        self.actions.iter().find(|a| a.action == action)
    }

    /// The schema of `action`, or a validation error naming the supported actions
    pub fn require_action(&self, action: LifecycleAction) -> Result<&ActionSchema> {
        self.action_schema(action).ok_or_else(|| {
            let supported = self
                .actions
                .iter()
                .map(|a| a.action.to_string())
                .collect::<Vec<_>>()
                .join(",");
            ReconcileError::validation(
                &self.kind,
                "action",
                format!("{} is not supported. Supported actions are: {}", action, supported),
            )
        })
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.get_attribute(name).is_some_and(|a| a.sensitive)
    }

    /// Copy of `attributes` with sensitive values masked, for logging
    pub fn redact(&self, attributes: &Attributes) -> Attributes {
        attributes
            .iter()
            .map(|(name, value)| {
                let shown = if self.is_sensitive(name) {
                    AttrValue::from(REDACTED)
                } else {
                    value.clone()
                };
                (name.clone(), shown)
            })
            .collect()
    }

    /// Validate desired configuration for creation: CREATE must be declared,
    /// every key must be a creatable attribute, required attributes present.
    pub fn validate_create(&self, desired: &DesiredState) -> Result<Attributes> {
        self.require_action(LifecycleAction::Create)?;
        self.normalize(desired)
    }

    /// Type-check and default desired configuration without requiring CREATE
    pub fn normalize(&self, desired: &DesiredState) -> Result<Attributes> {
        for (name, _) in desired.iter() {
            if self.get_attribute(name).is_some_and(AttributeSchema::is_computed) {
                return Err(ReconcileError::validation(
                    &self.kind,
                    name,
                    "computed attribute cannot be configured",
                ));
            }
        }
        let schemas: Vec<&AttributeSchema> = self.creatable().collect();
        validate_against(&self.kind, &schemas, desired)
    }

    /// Validate the parameters of a lifecycle action.
    ///
    /// UPDATE takes any subset of the mutable attributes; other actions use
    /// their own parameter schema and conditional requirements.
    pub fn validate_action(
        &self,
        action: LifecycleAction,
        params: &DesiredState,
    ) -> Result<Attributes> {
        let schema = self.require_action(action)?;

        if action == LifecycleAction::Update {
            let updatable: Vec<AttributeSchema> = self
                .mutable_attributes()
                .map(|a| AttributeSchema {
                    required: false,
                    default: None,
                    ..a.clone()
                })
                .collect();
            let refs: Vec<&AttributeSchema> = updatable.iter().collect();
            let validated = validate_against(&self.kind, &refs, params)?;
            if validated.is_empty() {
                return Err(ReconcileError::validation(
                    &self.kind,
                    "action",
                    "UPDATE needs at least one mutable attribute",
                ));
            }
            return Ok(validated);
        }

        let refs: Vec<&AttributeSchema> = schema.params.iter().collect();
        let validated = validate_against(&self.kind, &refs, params)?;

        for condition in &schema.conditions {
            let triggered = validated
                .get(&condition.when)
                .and_then(AttrValue::as_str)
                .is_some_and(|v| v.eq_ignore_ascii_case(&condition.equals));
            if triggered && !validated.contains_key(&condition.param) {
                return Err(ReconcileError::validation(
                    &self.kind,
                    &condition.param,
                    format!(
                        "required for {} when {} is {}",
                        action, condition.when, condition.equals
                    ),
                ));
            }
        }

        Ok(validated)
    }
}

fn validate_against(
    kind: &str,
    schemas: &[&AttributeSchema],
    input: &DesiredState,
) -> Result<Attributes> {
    for (name, _) in input.iter() {
        if !schemas.iter().any(|s| &s.name == name) {
            return Err(ReconcileError::validation(kind, name, "unknown attribute"));
        }
    }

    let mut validated = Attributes::new();
    for schema in schemas {
        match input.get(&schema.name) {
            Setting::Set(value) => {
                let normalized = schema
                    .attr_type
                    .check(&value)
                    .map_err(|reason| ReconcileError::validation(kind, &schema.name, reason))?;
                validated.insert(schema.name.clone(), normalized);
            }
            Setting::Absent => {
                if let Some(default) = &schema.default {
                    validated.insert(schema.name.clone(), default.clone());
                } else if schema.required {
                    return Err(ReconcileError::validation(
                        kind,
                        &schema.name,
                        "required attribute is missing",
                    ));
                }
            }
        }
    }
    Ok(validated)
}

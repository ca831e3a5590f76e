//! Protocol activity trees.
//!
//! The front end hands over an already-parsed protocol as a tree of
//! activities. Trees are exchanged as JSON:
//!
//! ```json
//! {
//!   "name": "BuyerSeller",
//!   "at": "Seller",
//!   "roles": ["Buyer", "Seller"],
//!   "activities": [
//!     {"interaction": {"direction": "receive", "label": "item",
//!                      "payload": [{"name": "item", "type": "string"}],
//!                      "partner": "Buyer"}},
//!     {"choice": {"branches": [
//!       [{"interaction": {"direction": "send", "label": "price", "partner": "Buyer"}}],
//!       [{"interaction": {"direction": "send", "label": "reject", "partner": "Buyer"}}]
//!     ]}}
//!   ]
//! }
//! ```

use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named participant in a protocol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primitive payload type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Int,
    String,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::Int => f.write_str("int"),
            PrimitiveType::String => f.write_str("string"),
        }
    }
}

/// A named payload value, optionally typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueDecl {
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<PrimitiveType>,
}

impl ValueDecl {
    pub fn new(name: impl Into<String>, ty: Option<PrimitiveType>) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl fmt::Display for ValueDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Some(ty) => write!(f, "{}:{}", self.name, ty),
            None => f.write_str(&self.name),
        }
    }
}

/// Direction of an interaction, seen from the local role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Receive,
    Send,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Receive => f.write_str("?"),
            Direction::Send => f.write_str("!"),
        }
    }
}

/// Opaque guard attached to an interaction.
///
/// The surface syntax wraps assertions as `@{expr}`; the markers are stripped
/// so that equal expressions compare equal regardless of how they were quoted.
/// The compiler never evaluates the expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Assertion(String);

impl Assertion {
    pub fn new(text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim();
        let text = text.strip_prefix("@{").unwrap_or(text);
        let text = text.strip_suffix('}').unwrap_or(text);
        Self(text.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Assertion {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Assertion> for String {
    fn from(a: Assertion) -> Self {
        a.0
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{{{}}}", self.0)
    }
}

/// The observable part of an interaction: what a monitor matches traffic on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Message {
    pub direction: Direction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub partner: Role,
}

impl Message {
    pub fn receive(label: impl Into<String>, partner: impl Into<Role>) -> Self {
        Self {
            direction: Direction::Receive,
            label: Some(label.into()),
            partner: partner.into(),
        }
    }

    pub fn send(label: impl Into<String>, partner: impl Into<Role>) -> Self {
        Self {
            direction: Direction::Send,
            label: Some(label.into()),
            partner: partner.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.partner,
            self.direction,
            self.label.as_deref().unwrap_or("_")
        )
    }
}

/// Key a directed choice dispatches on: the label plus the ordered payload
/// types of the selecting message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DispatchKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub types: Vec<Option<PrimitiveType>>,
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.label.as_deref().unwrap_or("_"))?;
        for (i, ty) in self.types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match ty {
                Some(ty) => write!(f, "{}", ty)?,
                None => f.write_str("_")?,
            }
        }
        f.write_str(")")
    }
}

/// A single directed message exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub direction: Direction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<ValueDecl>,

    pub partner: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<Assertion>,
}

impl Interaction {
    /// A labelled receive from `partner`.
    pub fn receive(label: impl Into<String>, partner: impl Into<Role>) -> Self {
        Self::new(Direction::Receive, Some(label.into()), partner)
    }

    /// A labelled send to `partner`.
    pub fn send(label: impl Into<String>, partner: impl Into<Role>) -> Self {
        Self::new(Direction::Send, Some(label.into()), partner)
    }

    pub fn new(direction: Direction, label: Option<String>, partner: impl Into<Role>) -> Self {
        Self {
            direction,
            label,
            payload: Vec::new(),
            partner: partner.into(),
            assertion: None,
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, ty: Option<PrimitiveType>) -> Self {
        self.payload.push(ValueDecl::new(name, ty));
        self
    }

    pub fn with_assertion(mut self, text: impl AsRef<str>) -> Self {
        self.assertion = Some(Assertion::new(text));
        self
    }

    pub fn message(&self) -> Message {
        Message {
            direction: self.direction,
            label: self.label.clone(),
            partner: self.partner.clone(),
        }
    }

    pub fn dispatch_key(&self) -> DispatchKey {
        DispatchKey {
            label: self.label.clone(),
            types: self.payload.iter().map(|v| v.ty).collect(),
        }
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())?;
        if !self.payload.is_empty() {
            f.write_str("(")?;
            for (i, v) in self.payload.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", v)?;
            }
            f.write_str(")")?;
        }
        if let Some(assertion) = &self.assertion {
            write!(f, " {}", assertion)?;
        }
        Ok(())
    }
}

/// One branch of a directed choice: the selecting message and what follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectedBranch {
    pub message: Interaction,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: ActivityList,
}

/// An ordered sequence of activities.
pub type ActivityList = Vec<Activity>;

/// A node of the activity tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Interaction(Interaction),
    Choice {
        branches: Vec<ActivityList>,
    },
    DirectedChoice {
        from: Role,
        to: Vec<Role>,
        on_message: Vec<DirectedBranch>,
    },
    Parallel {
        branches: Vec<ActivityList>,
    },
    Repeat {
        body: ActivityList,
    },
    RecursionDef {
        label: String,
        body: ActivityList,
    },
    RecursionCall {
        label: String,
    },
    GlobalEscape {
        body: ActivityList,
        interrupt_role: Role,
        interrupt_body: ActivityList,
    },
    End,
}

impl Activity {
    /// Name of the construct, as used in diagnostics.
    pub fn construct(&self) -> &'static str {
        match self {
            Activity::Interaction(_) => "interaction",
            Activity::Choice { .. } => "choice",
            Activity::DirectedChoice { .. } => "directed choice",
            Activity::Parallel { .. } => "parallel",
            Activity::Repeat { .. } => "repeat",
            Activity::RecursionDef { .. } => "rec",
            Activity::RecursionCall { .. } => "recursion call",
            Activity::GlobalEscape { .. } => "global escape",
            Activity::End => "end",
        }
    }

    /// Returns the single interaction this activity necessarily starts with.
    ///
    /// `repeat` and `rec` are looked through; constructs that may start with
    /// more than one message (or none) yield the name of the offending
    /// construct instead.
    pub fn leading_interaction(&self) -> Result<&Interaction, &'static str> {
        match self {
            Activity::Interaction(i) => Ok(i),
            Activity::Repeat { body } | Activity::RecursionDef { body, .. } => body
                .first()
                .ok_or_else(|| self.construct())
                .and_then(Activity::leading_interaction),
            other => Err(other.construct()),
        }
    }
}

impl From<Interaction> for Activity {
    fn from(i: Interaction) -> Self {
        Activity::Interaction(i)
    }
}

/// A parsed protocol, localized (optionally) at one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<Role>,

    #[serde(default)]
    pub roles: Vec<Role>,

    pub activities: ActivityList,
}

impl Protocol {
    pub fn new(name: impl Into<String>, activities: ActivityList) -> Self {
        Self {
            name: name.into(),
            at: None,
            roles: Vec::new(),
            activities,
        }
    }

    pub fn at(mut self, role: impl Into<Role>) -> Self {
        self.at = Some(role.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<Role>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Parses a protocol from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, BuildError> {
        Ok(serde_json::from_value(json.clone())?)
    }

    /// Parses a protocol from JSON text.
    pub fn from_json_str(s: &str) -> Result<Self, BuildError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, BuildError> {
        Ok(serde_json::to_value(self)?)
    }

    /// CRC32C of the canonical JSON encoding, for integrity checks.
    pub fn checksum(&self) -> Result<String, BuildError> {
        let json_bytes = serde_json::to_vec(self)?;
        Ok(format!("{:08x}", crc32c::crc32c(&json_bytes)))
    }
}

//! Model elements: the closed set of declaration kinds and their payloads.
//!
//! Elements are stored in the [`Model`](crate::model::Model) arena. Ownership
//! is a strict tree: an element owns its `children` (in declaration order) and
//! refers back to its parent by id only.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log::Message;

/// Stable element identifier, preserved across renames and moves.
pub type ElementId = Uuid;

/// Direction/role of a variable or structure element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Constant,
    Incoming,
    Outgoing,
    InOut,
    Internal,
}

impl Mode {
    /// Whether rule actions may assign a slot with this mode.
    pub fn is_writable(self) -> bool {
        matches!(self, Mode::Outgoing | Mode::InOut | Mode::Internal)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Constant => write!(f, "Constant"),
            Mode::Incoming => write!(f, "Incoming"),
            Mode::Outgoing => write!(f, "Outgoing"),
            Mode::InOut => write!(f, "InOut"),
            Mode::Internal => write!(f, "Internal"),
        }
    }
}

/// Execution phase of a rule within one cycle. Declaration order is the
/// execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RulePriority {
    Verification,
    Processing,
    #[serde(rename = "UpdateINTERNAL")]
    UpdateInternal,
    #[serde(rename = "UpdateOUT")]
    UpdateOut,
    CleanUp,
}

impl RulePriority {
    /// All phases in execution order.
    pub const ALL: [RulePriority; 5] = [
        RulePriority::Verification,
        RulePriority::Processing,
        RulePriority::UpdateInternal,
        RulePriority::UpdateOut,
        RulePriority::CleanUp,
    ];
}

impl fmt::Display for RulePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulePriority::Verification => write!(f, "Verification"),
            RulePriority::Processing => write!(f, "Processing"),
            RulePriority::UpdateInternal => write!(f, "UpdateINTERNAL"),
            RulePriority::UpdateOut => write!(f, "UpdateOUT"),
            RulePriority::CleanUp => write!(f, "CleanUp"),
        }
    }
}

/// Numeric precision of a range type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    Integer,
    Double,
}

/// A type name plus mode and optional default value expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedSlot {
    /// Textual type designator, resolved during analysis.
    pub type_name: String,
    pub mode: Mode,
    /// Default value expression text.
    #[serde(default)]
    pub default: Option<String>,
}

impl TypedSlot {
    pub fn new(type_name: &str, mode: Mode) -> Self {
        Self {
            type_name: type_name.to_string(),
            mode,
            default: None,
        }
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// Piecewise-linear function of one argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Breakpoints `(x, y)`, sorted by `x`.
    pub points: Vec<(f64, f64)>,
}

impl Graph {
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    /// Interpolate at `x`. Returns `None` outside the defined domain.
    pub fn evaluate(&self, x: f64) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if x < first.0 || x > last.0 {
            return None;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if x >= x0 && x <= x1 {
                if x1 == x0 {
                    return Some(y1);
                }
                return Some(y0 + (y1 - y0) * (x - x0) / (x1 - x0));
            }
        }
        // Single breakpoint: only its own abscissa is in the domain.
        Some(first.1)
    }
}

/// Bilinear surface over a rectangular grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Grid abscissas, ascending.
    pub xs: Vec<f64>,
    /// Grid ordinates, ascending.
    pub ys: Vec<f64>,
    /// `values[i][j]` is the value at `(xs[i], ys[j])`.
    pub values: Vec<Vec<f64>>,
}

impl Surface {
    /// Interpolate at `(x, y)`. Returns `None` outside the grid or when the
    /// grid is malformed.
    pub fn evaluate(&self, x: f64, y: f64) -> Option<f64> {
        let (i0, i1, tx) = bracket(&self.xs, x)?;
        let (j0, j1, ty) = bracket(&self.ys, y)?;
        let at = |i: usize, j: usize| self.values.get(i).and_then(|row| row.get(j)).copied();
        let v00 = at(i0, j0)?;
        let v01 = at(i0, j1)?;
        let v10 = at(i1, j0)?;
        let v11 = at(i1, j1)?;
        let low = v00 + (v10 - v00) * tx;
        let high = v01 + (v11 - v01) * tx;
        Some(low + (high - low) * ty)
    }
}

/// Locate `v` in ascending `axis`: the bracketing indices and the fraction.
fn bracket(axis: &[f64], v: f64) -> Option<(usize, usize, f64)> {
    let first = *axis.first()?;
    let last = *axis.last()?;
    if v < first || v > last {
        return None;
    }
    if axis.len() == 1 {
        return Some((0, 0, 0.0));
    }
    for i in 0..axis.len() - 1 {
        let (a, b) = (axis[i], axis[i + 1]);
        if v >= a && v <= b {
            let t = if b == a { 0.0 } else { (v - a) / (b - a) };
            return Some((i, i + 1, t));
        }
    }
    None
}

/// Interpolated function body used when a function has no cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Interpolation {
    Graph(Graph),
    Surface(Surface),
}

/// The kind of an element, with its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    NameSpace,
    Range {
        min: f64,
        max: f64,
        precision: Precision,
    },
    Enum,
    /// A value of an enum, or a named special value of a range.
    EnumValue {
        #[serde(default)]
        value: Option<f64>,
    },
    Structure {
        /// Names of structures this structure implements.
        #[serde(default)]
        interfaces: Vec<String>,
    },
    StructureElement(TypedSlot),
    Collection {
        element_type: String,
        max_size: usize,
    },
    StateMachine {
        initial_state: String,
    },
    State,
    Function {
        return_type: String,
        cacheable: bool,
        #[serde(default)]
        interpolation: Option<Interpolation>,
    },
    Parameter {
        type_name: String,
    },
    Case {
        expression: String,
    },
    Procedure,
    Variable(TypedSlot),
    Rule {
        priority: RulePriority,
    },
    RuleCondition,
    PreCondition {
        expression: String,
    },
    Action {
        statement: String,
    },
}

/// Discriminant of [`ElementKind`], used for per-kind name uniqueness and
/// resolution filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KindTag {
    NameSpace,
    Range,
    Enum,
    EnumValue,
    Structure,
    StructureElement,
    Collection,
    StateMachine,
    State,
    Function,
    Parameter,
    Case,
    Procedure,
    Variable,
    Rule,
    RuleCondition,
    PreCondition,
    Action,
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl KindTag {
    /// Kinds that denote a type.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            KindTag::Range
                | KindTag::Enum
                | KindTag::Structure
                | KindTag::Collection
                | KindTag::StateMachine
        )
    }

    /// Kinds that denote a value when referenced in an expression.
    pub fn is_value(self) -> bool {
        matches!(
            self,
            KindTag::Variable
                | KindTag::StructureElement
                | KindTag::Parameter
                | KindTag::EnumValue
                | KindTag::State
        )
    }

    /// Kinds that may be called.
    pub fn is_callable(self) -> bool {
        matches!(self, KindTag::Function | KindTag::Procedure)
    }

    /// Kinds whose children may be referenced by name from an expression.
    pub fn is_declaration(self) -> bool {
        !matches!(
            self,
            KindTag::Case | KindTag::RuleCondition | KindTag::PreCondition | KindTag::Action
        )
    }
}

/// Which kind of text an element owns, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Expression,
    Statement,
}

impl ElementKind {
    pub fn tag(&self) -> KindTag {
        match self {
            ElementKind::NameSpace => KindTag::NameSpace,
            ElementKind::Range { .. } => KindTag::Range,
            ElementKind::Enum => KindTag::Enum,
            ElementKind::EnumValue { .. } => KindTag::EnumValue,
            ElementKind::Structure { .. } => KindTag::Structure,
            ElementKind::StructureElement(_) => KindTag::StructureElement,
            ElementKind::Collection { .. } => KindTag::Collection,
            ElementKind::StateMachine { .. } => KindTag::StateMachine,
            ElementKind::State => KindTag::State,
            ElementKind::Function { .. } => KindTag::Function,
            ElementKind::Parameter { .. } => KindTag::Parameter,
            ElementKind::Case { .. } => KindTag::Case,
            ElementKind::Procedure => KindTag::Procedure,
            ElementKind::Variable(_) => KindTag::Variable,
            ElementKind::Rule { .. } => KindTag::Rule,
            ElementKind::RuleCondition => KindTag::RuleCondition,
            ElementKind::PreCondition { .. } => KindTag::PreCondition,
            ElementKind::Action { .. } => KindTag::Action,
        }
    }

    /// The expression or statement text owned by this element.
    pub fn slot_text(&self) -> Option<(&str, SlotKind)> {
        match self {
            ElementKind::Variable(slot) | ElementKind::StructureElement(slot) => slot
                .default
                .as_deref()
                .map(|text| (text, SlotKind::Expression)),
            ElementKind::Case { expression } | ElementKind::PreCondition { expression } => {
                Some((expression.as_str(), SlotKind::Expression))
            }
            ElementKind::Action { statement } => Some((statement.as_str(), SlotKind::Statement)),
            _ => None,
        }
    }

    /// Replace the slot text. Returns `false` when this kind owns no slot.
    pub fn set_slot_text(&mut self, text: &str) -> bool {
        match self {
            ElementKind::Variable(slot) | ElementKind::StructureElement(slot) => {
                slot.default = Some(text.to_string());
                true
            }
            ElementKind::Case { expression } | ElementKind::PreCondition { expression } => {
                *expression = text.to_string();
                true
            }
            ElementKind::Action { statement } => {
                *statement = text.to_string();
                true
            }
            _ => false,
        }
    }

    /// The declared type name of a typed element.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ElementKind::Variable(slot) | ElementKind::StructureElement(slot) => {
                Some(&slot.type_name)
            }
            ElementKind::Parameter { type_name } => Some(type_name),
            _ => None,
        }
    }

    /// The mode of a variable or structure element.
    pub fn mode(&self) -> Option<Mode> {
        match self {
            ElementKind::Variable(slot) | ElementKind::StructureElement(slot) => Some(slot.mode),
            _ => None,
        }
    }

    /// Whether an element of kind `child` may be placed under this kind.
    pub fn accepts_child(&self, child: KindTag) -> bool {
        use KindTag as K;
        match self.tag() {
            K::NameSpace => matches!(
                child,
                K::NameSpace
                    | K::Range
                    | K::Enum
                    | K::Structure
                    | K::Collection
                    | K::StateMachine
                    | K::Function
                    | K::Procedure
                    | K::Variable
                    | K::Rule
            ),
            K::Range | K::Enum => child == K::EnumValue,
            K::Structure => matches!(
                child,
                K::StructureElement | K::Procedure | K::StateMachine | K::Rule
            ),
            K::StateMachine => matches!(child, K::State | K::Rule),
            K::State => child == K::Rule,
            K::Function => matches!(child, K::Parameter | K::Case),
            K::Case => child == K::PreCondition,
            K::Procedure => matches!(child, K::Parameter | K::Rule),
            K::Rule => child == K::RuleCondition,
            K::RuleCondition => matches!(child, K::PreCondition | K::Action | K::Rule),
            K::EnumValue
            | K::StructureElement
            | K::Collection
            | K::Parameter
            | K::Variable
            | K::PreCondition
            | K::Action => false,
        }
    }
}

/// A named, addressable node of the model tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub kind: ElementKind,
    pub parent: Option<ElementId>,
    #[serde(default)]
    pub children: Vec<ElementId>,
    /// Diagnostics attached to this element.
    #[serde(skip)]
    pub messages: Vec<Message>,
}

impl Element {
    /// Create a detached element with a fresh id.
    pub fn new(name: &str, kind: ElementKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            comment: None,
            kind,
            parent: None,
            children: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn tag(&self) -> KindTag {
        self.kind.tag()
    }
}

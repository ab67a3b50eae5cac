//! Correction-set JSON schema types
//!
//! Mirrors the published correction-table format (schema version 2): a set
//! of named corrections, each a tree of binning, multibinning, category and
//! formula nodes with numeric leaves, plus compound corrections that chain
//! several corrections.

use serde::{Deserialize, Serialize};

/// Correction-set document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionSet {
    /// Schema version
    pub schema_version: u32,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Corrections
    pub corrections: Vec<Correction>,
    /// Compound corrections
    #[serde(default)]
    pub compound_corrections: Vec<CompoundCorrection>,
}

/// A single correction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    /// Correction name (lookup key)
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Version of this correction
    #[serde(default)]
    pub version: u32,
    /// Ordered inputs
    pub inputs: Vec<Variable>,
    /// Output description
    pub output: Variable,
    /// Content tree
    pub data: Content,
}

/// Input or output variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name
    pub name: String,
    /// Value type
    #[serde(rename = "type")]
    pub kind: VarType,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Variable value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    /// Floating point
    Real,
    /// Integer
    Int,
    /// String
    String,
}

/// Content: a numeric leaf or a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Constant leaf
    Value(f64),
    /// Nested node
    Node(Box<Node>),
}

/// Node types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "nodetype")]
pub enum Node {
    /// 1D binning over one real input
    #[serde(rename = "binning")]
    Binning(Binning),
    /// N-dimensional binning, content in row-major order
    #[serde(rename = "multibinning")]
    MultiBinning(MultiBinning),
    /// Discrete lookup on an int or string input
    #[serde(rename = "category")]
    Category(Category),
    /// Parametrised formula
    #[serde(rename = "formula")]
    Formula(Formula),
}

/// Bin edges: explicit list or uniform binning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Edges {
    /// Explicit, strictly increasing edges
    List(Vec<f64>),
    /// `n` equal-width bins between `low` and `high`
    Uniform {
        /// Number of bins
        n: usize,
        /// Lower edge
        low: f64,
        /// Upper edge
        high: f64,
    },
}

/// Out-of-range behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flow {
    /// `"clamp"` or `"error"`
    Mode(FlowMode),
    /// Fallback content
    Content(Content),
}

impl Default for Flow {
    fn default() -> Self {
        Flow::Mode(FlowMode::Error)
    }
}

/// Named flow modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    /// Use the nearest edge bin
    Clamp,
    /// Reject the input
    Error,
}

/// 1D binning node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binning {
    /// Input name
    pub input: String,
    /// Edges
    pub edges: Edges,
    /// One content per bin
    pub content: Vec<Content>,
    /// Out-of-range behaviour
    #[serde(default)]
    pub flow: Flow,
}

/// Multi-dimensional binning node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiBinning {
    /// Input names, outermost first
    pub inputs: Vec<String>,
    /// Edges per input
    pub edges: Vec<Edges>,
    /// Row-major content (last input varies fastest)
    pub content: Vec<Content>,
    /// Out-of-range behaviour
    #[serde(default)]
    pub flow: Flow,
}

/// Category node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Input name
    pub input: String,
    /// Keyed content
    pub content: Vec<CategoryItem>,
    /// Fallback for unknown keys
    #[serde(default)]
    pub default: Option<Content>,
}

/// One keyed entry of a category node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryItem {
    /// Key
    pub key: CategoryKey,
    /// Value
    pub value: Content,
}

/// Category key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryKey {
    /// Integer key
    Int(i64),
    /// String key
    Str(String),
}

/// Formula node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Expression text
    pub expression: String,
    /// Parser dialect; only `TFormula` is accepted
    #[serde(default = "default_parser")]
    pub parser: String,
    /// Inputs bound to `x, y, z, t`
    pub variables: Vec<String>,
    /// Values for `[i]` parameters
    #[serde(default)]
    pub parameters: Vec<f64>,
}

fn default_parser() -> String {
    "TFormula".to_string()
}

/// Chain of corrections evaluated in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundCorrection {
    /// Compound name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Inputs (union of the stack's inputs)
    pub inputs: Vec<Variable>,
    /// Output description
    pub output: Variable,
    /// Inputs rewritten after every stage
    pub inputs_update: Vec<String>,
    /// How a stage's output updates `inputs_update`: `*`, `+` or `/`
    pub input_op: String,
    /// How stage outputs accumulate: `*`, `+`, `/` or `last`
    pub output_op: String,
    /// Correction names, evaluated in order
    pub stack: Vec<String>,
}

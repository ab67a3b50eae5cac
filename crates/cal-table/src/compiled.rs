//! Compiled correction trees.
//!
//! Compilation resolves input names to positions, checks node shapes and
//! key types, and parses formulas once, so evaluation only walks the tree.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cal_core::{Error, Result};

use crate::formula::Formula;
use crate::schema::{self, CategoryKey, Content, Edges, Flow, FlowMode, Node, VarType, Variable};

/// One input value for a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    /// Real input
    Real(f64),
    /// Integer input
    Int(i64),
    /// String input
    Str(&'a str),
}

impl Value<'_> {
    fn kind(&self) -> VarType {
        match self {
            Value::Real(_) => VarType::Real,
            Value::Int(_) => VarType::Int,
            Value::Str(_) => VarType::String,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Real(x) => Some(x),
            Value::Int(i) => Some(i as f64),
            Value::Str(_) => None,
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Real(x) => write!(f, "{x}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone)]
enum CEdges {
    List(Vec<f64>),
    Uniform { n: usize, low: f64, high: f64 },
}

enum BinLookup {
    In(usize),
    Under,
    Over,
}

impl CEdges {
    fn compile(edges: &Edges) -> Result<Self> {
        match edges {
            Edges::List(e) => {
                if e.len() < 2 {
                    return Err(Error::Config("binning needs at least two edges".into()));
                }
                if e.windows(2).any(|w| !(w[1] > w[0])) {
                    return Err(Error::Config(format!("bin edges not strictly increasing: {e:?}")));
                }
                Ok(CEdges::List(e.clone()))
            }
            Edges::Uniform { n, low, high } => {
                if *n == 0 || !(high > low) {
                    return Err(Error::Config(format!(
                        "invalid uniform binning n={n} low={low} high={high}"
                    )));
                }
                Ok(CEdges::Uniform { n: *n, low: *low, high: *high })
            }
        }
    }

    fn n_bins(&self) -> usize {
        match self {
            CEdges::List(e) => e.len() - 1,
            CEdges::Uniform { n, .. } => *n,
        }
    }

    fn range(&self) -> (f64, f64) {
        match self {
            CEdges::List(e) => (e[0], e[e.len() - 1]),
            CEdges::Uniform { low, high, .. } => (*low, *high),
        }
    }

    fn find(&self, x: f64) -> BinLookup {
        let (lo, hi) = self.range();
        if x.is_nan() {
            return BinLookup::Over;
        }
        if x < lo {
            return BinLookup::Under;
        }
        if x >= hi {
            return BinLookup::Over;
        }
        match self {
            CEdges::List(e) => BinLookup::In(e.partition_point(|&edge| edge <= x) - 1),
            CEdges::Uniform { n, low, high } => {
                let i = ((x - low) / (high - low) * *n as f64) as usize;
                BinLookup::In(i.min(n - 1))
            }
        }
    }
}

#[derive(Debug, Clone)]
enum CFlow {
    Clamp,
    Error,
    Default(Box<CNode>),
}

#[derive(Debug, Clone)]
enum CKeys {
    Int(HashMap<i64, usize>),
    Str(HashMap<String, usize>),
}

#[derive(Debug, Clone)]
enum CNode {
    Const(f64),
    Binning { input: usize, edges: CEdges, content: Vec<CNode>, flow: CFlow },
    MultiBinning {
        inputs: Vec<usize>,
        edges: Vec<CEdges>,
        strides: Vec<usize>,
        content: Vec<CNode>,
        flow: CFlow,
    },
    Category { input: usize, keys: CKeys, content: Vec<CNode>, default: Option<Box<CNode>> },
    Formula { inputs: Vec<usize>, formula: Formula },
}

struct Compiler<'a> {
    name: &'a str,
    inputs: &'a [Variable],
}

impl Compiler<'_> {
    fn index(&self, input: &str) -> Result<usize> {
        self.inputs.iter().position(|v| v.name == input).ok_or_else(|| {
            Error::Config(format!("correction '{}': node refers to unknown input '{input}'", self.name))
        })
    }

    fn numeric_index(&self, input: &str) -> Result<usize> {
        let i = self.index(input)?;
        if self.inputs[i].kind == VarType::String {
            return Err(Error::Config(format!(
                "correction '{}': input '{input}' is a string but is used numerically",
                self.name
            )));
        }
        Ok(i)
    }

    fn content(&self, c: &Content) -> Result<CNode> {
        match c {
            Content::Value(v) => Ok(CNode::Const(*v)),
            Content::Node(n) => self.node(n),
        }
    }

    fn flow(&self, f: &Flow) -> Result<CFlow> {
        Ok(match f {
            Flow::Mode(FlowMode::Clamp) => CFlow::Clamp,
            Flow::Mode(FlowMode::Error) => CFlow::Error,
            Flow::Content(c) => CFlow::Default(Box::new(self.content(c)?)),
        })
    }

    fn contents(&self, cs: &[Content]) -> Result<Vec<CNode>> {
        cs.iter().map(|c| self.content(c)).collect()
    }

    fn node(&self, n: &Node) -> Result<CNode> {
        match n {
            Node::Binning(b) => {
                let edges = CEdges::compile(&b.edges)?;
                if b.content.len() != edges.n_bins() {
                    return Err(Error::Config(format!(
                        "correction '{}': binning on '{}' has {} bins but {} contents",
                        self.name,
                        b.input,
                        edges.n_bins(),
                        b.content.len()
                    )));
                }
                Ok(CNode::Binning {
                    input: self.numeric_index(&b.input)?,
                    edges,
                    content: self.contents(&b.content)?,
                    flow: self.flow(&b.flow)?,
                })
            }
            Node::MultiBinning(m) => {
                if m.inputs.len() != m.edges.len() || m.inputs.is_empty() {
                    return Err(Error::Config(format!(
                        "correction '{}': multibinning has {} inputs and {} edge lists",
                        self.name,
                        m.inputs.len(),
                        m.edges.len()
                    )));
                }
                let edges: Vec<CEdges> = m.edges.iter().map(CEdges::compile).collect::<Result<_>>()?;
                let mut strides = vec![1usize; edges.len()];
                for d in (0..edges.len().saturating_sub(1)).rev() {
                    strides[d] = strides[d + 1] * edges[d + 1].n_bins();
                }
                let total: usize = edges.iter().map(CEdges::n_bins).product();
                if m.content.len() != total {
                    return Err(Error::Config(format!(
                        "correction '{}': multibinning expects {total} contents, got {}",
                        self.name,
                        m.content.len()
                    )));
                }
                let inputs = m.inputs.iter().map(|i| self.numeric_index(i)).collect::<Result<_>>()?;
                Ok(CNode::MultiBinning {
                    inputs,
                    edges,
                    strides,
                    content: self.contents(&m.content)?,
                    flow: self.flow(&m.flow)?,
                })
            }
            Node::Category(c) => {
                let input = self.index(&c.input)?;
                let kind = self.inputs[input].kind;
                let keys = match kind {
                    VarType::Int => {
                        let mut map = HashMap::new();
                        for (i, item) in c.content.iter().enumerate() {
                            let CategoryKey::Int(k) = item.key else {
                                return Err(self.key_mismatch(&c.input, &item.key));
                            };
                            map.insert(k, i);
                        }
                        CKeys::Int(map)
                    }
                    VarType::String => {
                        let mut map = HashMap::new();
                        for (i, item) in c.content.iter().enumerate() {
                            let CategoryKey::Str(ref k) = item.key else {
                                return Err(self.key_mismatch(&c.input, &item.key));
                            };
                            map.insert(k.clone(), i);
                        }
                        CKeys::Str(map)
                    }
                    VarType::Real => {
                        return Err(Error::Config(format!(
                            "correction '{}': category on real input '{}'",
                            self.name, c.input
                        )));
                    }
                };
                let content = c.content.iter().map(|item| self.content(&item.value)).collect::<Result<_>>()?;
                let default = match c.default {
                    Some(ref d) => Some(Box::new(self.content(d)?)),
                    None => None,
                };
                Ok(CNode::Category { input, keys, content, default })
            }
            Node::Formula(f) => {
                if f.parser != "TFormula" {
                    return Err(Error::Config(format!(
                        "correction '{}': unsupported formula parser '{}'",
                        self.name, f.parser
                    )));
                }
                let inputs: Vec<usize> =
                    f.variables.iter().map(|v| self.numeric_index(v)).collect::<Result<_>>()?;
                let formula = Formula::compile(&f.expression, inputs.len(), &f.parameters)?;
                Ok(CNode::Formula { inputs, formula })
            }
        }
    }

    fn key_mismatch(&self, input: &str, key: &CategoryKey) -> Error {
        Error::Config(format!(
            "correction '{}': category key {key:?} does not match the type of input '{input}'",
            self.name
        ))
    }
}

/// A correction ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledCorrection {
    name: String,
    version: u32,
    inputs: Vec<Variable>,
    output: Variable,
    root: CNode,
}

impl CompiledCorrection {
    /// Validate and compile a correction document.
    pub fn compile(c: &schema::Correction) -> Result<Self> {
        let compiler = Compiler { name: &c.name, inputs: &c.inputs };
        let root = compiler.content(&c.data)?;
        Ok(Self {
            name: c.name.clone(),
            version: c.version,
            inputs: c.inputs.clone(),
            output: c.output.clone(),
            root,
        })
    }

    /// Correction name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Correction version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Ordered inputs.
    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    /// Output description.
    pub fn output(&self) -> &Variable {
        &self.output
    }

    /// Position of the named input.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|v| v.name == name)
    }

    /// Evaluate for one ordered set of inputs.
    pub fn evaluate(&self, values: &[Value<'_>]) -> Result<f64> {
        if values.len() != self.inputs.len() {
            return Err(Error::Table(format!(
                "correction '{}' takes {} inputs, got {}",
                self.name,
                self.inputs.len(),
                values.len()
            )));
        }
        for (var, v) in self.inputs.iter().zip(values) {
            let ok = var.kind == v.kind() || (var.kind == VarType::Real && v.kind() == VarType::Int);
            if !ok {
                return Err(Error::Table(format!(
                    "correction '{}': input '{}' expects {:?}, got {v}",
                    self.name, var.name, var.kind
                )));
            }
        }
        self.eval_node(&self.root, values)
    }

    fn eval_node(&self, node: &CNode, values: &[Value<'_>]) -> Result<f64> {
        match node {
            CNode::Const(v) => Ok(*v),
            CNode::Binning { input, edges, content, flow } => {
                let x = self.numeric(values, *input)?;
                match edges.find(x) {
                    BinLookup::In(i) => self.eval_node(&content[i], values),
                    other => match flow {
                        CFlow::Clamp if !x.is_nan() => {
                            let i = if matches!(other, BinLookup::Under) { 0 } else { content.len() - 1 };
                            self.eval_node(&content[i], values)
                        }
                        CFlow::Default(d) => self.eval_node(d, values),
                        _ => Err(self.out_of_range(*input, x, edges)),
                    },
                }
            }
            CNode::MultiBinning { inputs, edges, strides, content, flow } => {
                let mut flat = 0usize;
                for ((&input, e), &stride) in inputs.iter().zip(edges).zip(strides) {
                    let x = self.numeric(values, input)?;
                    let i = match e.find(x) {
                        BinLookup::In(i) => i,
                        other => match flow {
                            CFlow::Clamp if !x.is_nan() => {
                                if matches!(other, BinLookup::Under) { 0 } else { e.n_bins() - 1 }
                            }
                            CFlow::Default(d) => return self.eval_node(d, values),
                            _ => return Err(self.out_of_range(input, x, e)),
                        },
                    };
                    flat += i * stride;
                }
                self.eval_node(&content[flat], values)
            }
            CNode::Category { input, keys, content, default } => {
                let slot = match (keys, &values[*input]) {
                    (CKeys::Int(map), Value::Int(k)) => map.get(k).copied(),
                    (CKeys::Str(map), Value::Str(k)) => map.get(*k).copied(),
                    _ => None,
                };
                match (slot, default) {
                    (Some(i), _) => self.eval_node(&content[i], values),
                    (None, Some(d)) => self.eval_node(d, values),
                    (None, None) => Err(Error::Table(format!(
                        "correction '{}': input '{}' has no category {}",
                        self.name, self.inputs[*input].name, values[*input]
                    ))),
                }
            }
            CNode::Formula { inputs, formula } => {
                let mut vars = [0.0f64; 4];
                for (slot, &i) in vars.iter_mut().zip(inputs) {
                    *slot = self.numeric(values, i)?;
                }
                Ok(formula.eval(&vars[..inputs.len()]))
            }
        }
    }

    fn numeric(&self, values: &[Value<'_>], i: usize) -> Result<f64> {
        values[i].as_f64().ok_or_else(|| {
            Error::Table(format!(
                "correction '{}': input '{}' must be numeric, got {}",
                self.name, self.inputs[i].name, values[i]
            ))
        })
    }

    fn out_of_range(&self, input: usize, x: f64, edges: &CEdges) -> Error {
        let (lo, hi) = edges.range();
        Error::Table(format!(
            "correction '{}': input '{}' = {x} outside [{lo}, {hi})",
            self.name, self.inputs[input].name
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Mul,
    Add,
    Div,
    Last,
}

impl Op {
    fn parse(s: &str, allow_last: bool) -> Option<Op> {
        match s {
            "*" => Some(Op::Mul),
            "+" => Some(Op::Add),
            "/" => Some(Op::Div),
            "last" if allow_last => Some(Op::Last),
            _ => None,
        }
    }

    fn apply(self, acc: f64, x: f64) -> f64 {
        match self {
            Op::Mul => acc * x,
            Op::Add => acc + x,
            Op::Div => acc / x,
            Op::Last => x,
        }
    }
}

/// A chain of corrections with cumulative input updates.
///
/// After every stage the inputs named in `inputs_update` are rewritten with
/// that stage's output via `input_op`; outputs accumulate via `output_op`.
/// A JEC stack uses `*` for both, so each level sees the pt corrected by
/// all previous levels and the result is the product of all factors.
#[derive(Debug, Clone)]
pub struct CompiledCompound {
    name: String,
    inputs: Vec<Variable>,
    updates: Vec<usize>,
    input_op: Op,
    output_op: Op,
    stack: Vec<(Arc<CompiledCorrection>, Vec<usize>)>,
}

impl CompiledCompound {
    /// Compile against already compiled member corrections.
    pub fn compile(
        c: &schema::CompoundCorrection,
        members: &HashMap<String, Arc<CompiledCorrection>>,
    ) -> Result<Self> {
        let index = |name: &str| {
            c.inputs.iter().position(|v| v.name == name).ok_or_else(|| {
                Error::Config(format!("compound '{}': unknown input '{name}'", c.name))
            })
        };
        let input_op = Op::parse(&c.input_op, false).ok_or_else(|| {
            Error::Config(format!("compound '{}': bad input_op '{}'", c.name, c.input_op))
        })?;
        let output_op = Op::parse(&c.output_op, true).ok_or_else(|| {
            Error::Config(format!("compound '{}': bad output_op '{}'", c.name, c.output_op))
        })?;
        let updates = c.inputs_update.iter().map(|n| index(n)).collect::<Result<Vec<_>>>()?;
        for &u in &updates {
            if c.inputs[u].kind != VarType::Real {
                return Err(Error::Config(format!(
                    "compound '{}': updated input '{}' must be real",
                    c.name, c.inputs[u].name
                )));
            }
        }
        let mut stack = Vec::with_capacity(c.stack.len());
        for member in &c.stack {
            let corr = members.get(member).cloned().ok_or_else(|| {
                Error::Config(format!("compound '{}': stack member '{member}' not found", c.name))
            })?;
            let map = corr.inputs().iter().map(|v| index(&v.name)).collect::<Result<Vec<_>>>()?;
            stack.push((corr, map));
        }
        Ok(Self { name: c.name.clone(), inputs: c.inputs.clone(), updates, input_op, output_op, stack })
    }

    /// Compound name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered inputs.
    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    /// Number of corrections in the stack.
    pub fn n_stages(&self) -> usize {
        self.stack.len()
    }

    /// Evaluate the whole stack for one ordered set of inputs.
    pub fn evaluate(&self, values: &[Value<'_>]) -> Result<f64> {
        Ok(self.evaluate_stages(values)?.0)
    }

    /// Evaluate and also return every stage output in stack order.
    pub fn evaluate_stages(&self, values: &[Value<'_>]) -> Result<(f64, Vec<f64>)> {
        if values.len() != self.inputs.len() {
            return Err(Error::Table(format!(
                "compound '{}' takes {} inputs, got {}",
                self.name,
                self.inputs.len(),
                values.len()
            )));
        }
        let mut current: Vec<Value<'_>> = values.to_vec();
        let mut out = match self.output_op {
            Op::Add => 0.0,
            _ => 1.0,
        };
        let mut stages = Vec::with_capacity(self.stack.len());
        let mut member_values = Vec::new();
        for (corr, map) in &self.stack {
            member_values.clear();
            member_values.extend(map.iter().map(|&i| current[i]));
            let c = corr.evaluate(&member_values)?;
            stages.push(c);
            for &u in &self.updates {
                if let Value::Real(x) = current[u] {
                    current[u] = Value::Real(self.input_op.apply(x, c));
                } else if let Value::Int(x) = current[u] {
                    current[u] = Value::Real(self.input_op.apply(x as f64, c));
                }
            }
            out = self.output_op.apply(out, c);
        }
        Ok((out, stages))
    }
}

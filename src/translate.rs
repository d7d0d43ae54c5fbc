// Copyright (c) 2021 The Minispec Authors

//! Compile-time elaboration of Minispec parse trees and emission of the
//! translated Bluespec (BSV) code.
//!
//! Elaboration evaluates `Integer`/`Bool` expressions, unrolls `for` loops,
//! selects statically-known `if` branches, rewrites module definitions into
//! the BSV interface + module shape, and specializes parametric
//! definitions on demand. Emission streams BSV text while recording a map
//! from every emitted span back to the parse tree node that produced it,
//! which later lets BSV compiler diagnostics be translated back to
//! Minispec source locations.

use crate::common::errors::*;
use crate::common::name::get_name_table;
use crate::common::name::Name;
use crate::common::source::get_source_manager;
use crate::common::NodeId;
use crate::common::{Session, Verbosity};
use crate::report::{context_str, loc_str, quote, subloc_str};
use crate::syntax::ast;
use crate::syntax::lexer::Lexer;
use crate::syntax::token::{DelimToken, Op, Token};
use crate::syntax::tree::{self, Listener, NodeKind, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Parametric uses

/// A single argument of a parametric use: a compile-time integer or a
/// nested use.
#[derive(Debug, Clone)]
pub enum ParamArg {
    Int(i64),
    Use(Rc<ParametricUse>),
}

impl PartialEq for ParamArg {
    fn eq(&self, other: &ParamArg) -> bool {
        match (self, other) {
            (ParamArg::Int(a), ParamArg::Int(b)) => a == b,
            (ParamArg::Use(a), ParamArg::Use(b)) => **a == **b,
            _ => false,
        }
    }
}

impl Eq for ParamArg {}

impl std::hash::Hash for ParamArg {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            ParamArg::Int(v) => v.hash(state),
            ParamArg::Use(u) => u.hash(state),
        }
    }
}

/// An instantiation descriptor: `name#(a1,a2,…)`. Two uses are equal iff
/// their names and structural argument lists are equal; the escape flag is
/// derived from the name and does not participate.
#[derive(Debug, Clone)]
pub struct ParametricUse {
    pub name: String,
    /// Whether the BSV identifier must be wrapped in backslash escaping.
    /// Required for identifiers that do not start with an uppercase letter
    /// and for all locally defined types.
    pub escape: bool,
    pub params: Vec<ParamArg>,
}

impl PartialEq for ParametricUse {
    fn eq(&self, other: &ParametricUse) -> bool {
        self.name == other.name && self.params == other.params
    }
}

impl Eq for ParametricUse {}

impl std::hash::Hash for ParametricUse {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        for p in &self.params {
            p.hash(state);
        }
    }
}

impl ParametricUse {
    /// The printed form, `name#(…)`, escaped as `\name#(…) ` (with the
    /// mandatory trailing space) when required. An already-escaped context
    /// suppresses nested escaping.
    pub fn render(&self, already_escaped: bool) -> String {
        let mut ss = String::new();
        let should_escape = self.escape && !already_escaped;
        let inner_escaped = already_escaped || should_escape;
        if should_escape {
            ss.push('\\');
        }
        ss.push_str(&self.name);
        if !self.params.is_empty() {
            ss.push_str("#(");
            for (i, p) in self.params.iter().enumerate() {
                match p {
                    ParamArg::Int(v) => ss.push_str(&v.to_string()),
                    ParamArg::Use(u) => ss.push_str(&u.render(inner_escaped)),
                }
                ss.push(if i + 1 == self.params.len() { ')' } else { ',' });
            }
        }
        if should_escape {
            ss.push(' ');
        }
        ss
    }
}

impl std::fmt::Display for ParametricUse {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.render(false))
    }
}

// ---------------------------------------------------------------------------
// Elaborated values

/// A deferred diagnostic attached to an expression node. Only reported if
/// the value is actually consumed in a compile-time context.
#[derive(Debug, Clone)]
pub struct BasicError {
    pub node: NodeId,
    pub msg: String,
}

/// One or more deferred diagnostics, kept as a flat list.
#[derive(Debug, Clone, Default)]
pub struct ErrorValue {
    pub errors: Vec<Rc<BasicError>>,
}

/// The value attached to a parse tree node by elaboration. A missing entry
/// means "emit the node verbatim".
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Bool(bool),
    /// A literal BSV fragment emitted in place of the node.
    Text(String),
    Parametric(Rc<ParametricUse>),
    /// A pre-rendered sub-emission spliced in, with its own span maps.
    Translated(Rc<TranslatedCode>),
    /// Emit nothing for this node.
    Skip,
    /// Deferred diagnostics; the node still emits verbatim.
    Error(ErrorValue),
}

fn errors_of(v: Option<&Value>) -> Vec<Rc<BasicError>> {
    match v {
        Some(Value::Error(ev)) => ev.errors.clone(),
        _ => Vec::new(),
    }
}

/// Merge the deferred errors of several operand values into a single value,
/// or nothing if none of the operands carried errors.
fn merge_errors(values: &[Option<&Value>]) -> Option<Value> {
    let mut errors = Vec::new();
    for v in values {
        errors.extend(errors_of(*v));
    }
    if errors.is_empty() {
        None
    } else {
        Some(Value::Error(ErrorValue { errors: errors }))
    }
}

fn basic_error(node: NodeId, msg: String) -> Value {
    Value::Error(ErrorValue {
        errors: vec![Rc::new(BasicError {
            node: node,
            msg: msg,
        })],
    })
}

/// The table of elaborated values, keyed by parse tree node.
#[derive(Default)]
pub struct ValueTable {
    map: HashMap<NodeId, Value>,
}

impl ValueTable {
    pub fn get(&self, node: NodeId) -> Option<&Value> {
        self.map.get(&node)
    }

    pub fn set(&mut self, node: NodeId, value: Option<Value>) {
        match value {
            Some(v) => {
                self.map.insert(node, v);
            }
            None => {
                self.map.remove(&node);
            }
        }
    }

    /// Remove all values under a subtree. Invoked before re-walking for
    /// `for` iterations and parametric instantiation so that stale values
    /// do not leak between contexts.
    pub fn clear_subtree(&mut self, tree: &Tree, node: NodeId) {
        self.map.remove(&node);
        for &c in tree.children(node) {
            self.clear_subtree(tree, c);
        }
    }
}

/// Read-only context handed to the emitter.
pub struct EmitCtx<'a> {
    pub tree: &'a Tree,
    pub values: &'a ValueTable,
}

// ---------------------------------------------------------------------------
// Source map

pub type Range = (usize, usize);

/// The translated BSV source along with the map from emitted spans back to
/// the Minispec parse tree elements that produced them.
pub struct SourceMap {
    dst_to_src: BTreeMap<Range, NodeId>,
    dst_to_info: BTreeMap<Range, String>,
    code: String,
    top_module: String,
    line_to_pos: Vec<usize>,
}

impl SourceMap {
    fn new(
        dst_to_src: BTreeMap<Range, NodeId>,
        dst_to_info: BTreeMap<Range, String>,
        code: String,
        top_module: String,
    ) -> SourceMap {
        let mut line_to_pos = vec![0];
        for (p, b) in code.bytes().enumerate() {
            if b == b'\n' {
                line_to_pos.push(p + 1);
            }
        }
        SourceMap {
            dst_to_src: dst_to_src,
            dst_to_info: dst_to_info,
            code: code,
            top_module: top_module,
            line_to_pos: line_to_pos,
        }
    }

    fn get_pos(&self, line: usize, line_char: usize) -> Option<usize> {
        if line == 0 || line > self.line_to_pos.len() || line_char == 0 {
            return None;
        }
        Some(self.line_to_pos[line - 1] + (line_char - 1))
    }

    /// Find the source element whose emitted range begins exactly at this
    /// output position.
    pub fn find(&self, line: usize, line_char: usize) -> Option<NodeId> {
        let pos = self.get_pos(line, line_char)?;
        let (&(start, _), &node) = self.dst_to_src.range((pos, pos)..).next()?;
        if start != pos {
            return None;
        }
        Some(node)
    }

    /// Find the source element that emitted exactly the given text at this
    /// output position.
    pub fn find_exact(&self, line: usize, line_char: usize, text: &str) -> Option<NodeId> {
        let pos = self.get_pos(line, line_char)?;
        let end = pos + text.len();
        let &node = self.dst_to_src.get(&(pos, end))?;
        if end > self.code.len() || &self.code[pos..end] != text {
            return None;
        }
        Some(node)
    }

    /// All contextual info strings covering this output position, outermost
    /// first, each on an `In …` line.
    pub fn context_info(&self, line: usize, line_char: usize) -> String {
        let pos = match self.get_pos(line, line_char) {
            Some(p) => p,
            None => return String::new(),
        };
        let mut ss = String::new();
        for (&(start, end), info) in &self.dst_to_info {
            if start <= pos && end >= pos {
                ss.push_str(&format!("In {}\n", info));
            }
            if start > pos {
                break; // nothing useful beyond
            }
        }
        ss
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn top_module(&self) -> &str {
        &self.top_module
    }

    /// All recorded emission spans, in output order.
    pub fn spans(&self) -> impl Iterator<Item = (Range, NodeId)> + '_ {
        self.dst_to_src.iter().map(|(&r, &n)| (r, n))
    }

    /// All recorded contextual info strings, in output order.
    pub fn infos(&self) -> impl Iterator<Item = (Range, &str)> + '_ {
        self.dst_to_info.iter().map(|(&r, s)| (r, s.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Emitter

/// An operand of a multi-part emission. Adjacent node operands receive a
/// single separating space; strings do not.
#[derive(Clone, Copy)]
pub enum Part<'a> {
    S(&'a str),
    N(NodeId),
    /// An optional node; emits nothing when absent, but still counts as a
    /// node operand for spacing.
    ON(Option<NodeId>),
}

/// Streams translated text while maintaining the span maps and the list of
/// parametric uses printed since the last dequeue.
pub struct TranslatedCode {
    skip_spaces: bool,
    dst_to_src: BTreeMap<Range, NodeId>,
    dst_to_info: BTreeMap<Range, String>,
    code: String,
    emit_stack: Vec<(NodeId, usize)>,
    parametric_uses_emitted: Vec<(ParametricUse, Option<NodeId>)>,
}

impl TranslatedCode {
    pub fn new(skip_spaces: bool) -> TranslatedCode {
        TranslatedCode {
            skip_spaces: skip_spaces,
            dst_to_src: BTreeMap::new(),
            dst_to_info: BTreeMap::new(),
            code: String::new(),
            emit_stack: Vec::new(),
            parametric_uses_emitted: Vec::new(),
        }
    }

    fn pos(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn emit_str(&mut self, s: &str) {
        self.code.push_str(s);
    }

    pub fn emit_line_str(&mut self, s: &str) {
        self.code.push_str(s);
        self.code.push('\n');
    }

    /// Emit a node: its elaborated value if one is attached, otherwise the
    /// node verbatim, reproducing the original inter-child whitespace.
    pub fn emit_node(&mut self, ectx: &EmitCtx, node: NodeId) {
        self.emit_start(node);
        match ectx.values.get(node) {
            Some(Value::Int(v)) => self.code.push_str(&v.to_string()),
            Some(Value::Bool(b)) => self.code.push_str(if *b { "True" } else { "False" }),
            Some(Value::Text(s)) => self.code.push_str(s),
            Some(Value::Parametric(pu)) => {
                let s = pu.render(false);
                self.code.push_str(&s);
                self.parametric_uses_emitted
                    .push(((**pu).clone(), Some(node)));
            }
            Some(Value::Skip) => {}
            Some(Value::Translated(tc)) => {
                // Splice the sub-emission, shifting its maps to the current
                // offset and adopting its pending parametric uses.
                assert!(tc.emit_stack.is_empty());
                let offset = self.pos();
                for (&(start, end), &src) in &tc.dst_to_src {
                    self.dst_to_src.insert((start + offset, end + offset), src);
                }
                for (&(start, end), info) in &tc.dst_to_info {
                    self.dst_to_info
                        .insert((start + offset, end + offset), info.clone());
                }
                for pui in &tc.parametric_uses_emitted {
                    self.parametric_uses_emitted.push(pui.clone());
                }
                self.code.push_str(&tc.code);
            }
            _ => {
                // No value (or a deferred error): emit verbatim. Deferred
                // errors only matter if the value is consumed elsewhere.
                let children = ectx.tree.children(node);
                if children.is_empty() {
                    if let Some(tok) = ectx.tree.token(node) {
                        self.code.push_str(&tok.spelling());
                    }
                } else {
                    for i in 0..children.len() {
                        if !self.skip_spaces && i > 0 {
                            let gap = ectx.tree.gap_text(children[i - 1], children[i]);
                            self.code.push_str(&gap);
                        }
                        self.emit_node(ectx, children[i]);
                    }
                }
            }
        }
        self.emit_end(None);
    }

    /// Emit a mixed sequence of strings and nodes, inserting a single space
    /// between adjacent node operands.
    pub fn emit_parts(&mut self, ectx: &EmitCtx, parts: &[Part]) {
        let mut prev_node = false;
        for p in parts {
            match *p {
                Part::S(s) => {
                    self.emit_str(s);
                    prev_node = false;
                }
                Part::N(n) => {
                    if prev_node {
                        self.emit_str(" ");
                    }
                    self.emit_node(ectx, n);
                    prev_node = true;
                }
                Part::ON(o) => {
                    if prev_node {
                        self.emit_str(" ");
                    }
                    if let Some(n) = o {
                        self.emit_node(ectx, n);
                    }
                    prev_node = true;
                }
            }
        }
    }

    pub fn emit_parts_line(&mut self, ectx: &EmitCtx, parts: &[Part]) {
        self.emit_parts(ectx, parts);
        self.emit_str("\n");
    }

    /// Open a manually built region attributed to `node`.
    pub fn emit_start(&mut self, node: NodeId) {
        self.emit_stack.push((node, self.pos()));
    }

    /// Close the innermost region; records the range if any bytes were
    /// produced, along with an optional contextual info string.
    pub fn emit_end(&mut self, ctx_info: Option<String>) {
        let (node, start_pos) = self.emit_stack.pop().expect("emit_end without emit_start");
        let end_pos = self.pos();
        if start_pos == end_pos {
            return;
        }
        let range = (start_pos, end_pos);
        self.dst_to_src.insert(range, node);
        if let Some(info) = ctx_info {
            self.dst_to_info.insert(range, info);
        }
    }

    /// Take the parametric uses printed since the last call.
    pub fn dequeue_parametric_uses(&mut self) -> Vec<(ParametricUse, Option<NodeId>)> {
        std::mem::replace(&mut self.parametric_uses_emitted, Vec::new())
    }

    pub fn into_source_map(self, top_module: String) -> SourceMap {
        SourceMap::new(self.dst_to_src, self.dst_to_info, self.code, top_module)
    }
}

// ---------------------------------------------------------------------------
// Integer context

/// An Integer binding is `Invalid` if it has been declared but does not
/// hold a value, `Valid` if it does, and `Poisoned` if it was defined
/// outside an if/else or case block and then modified inside one.
/// `Poisoned` behaves like `Invalid` (using it is an error) but produces a
/// flow-sensitivity diagnostic instead of an uninitialized-value one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerState {
    Invalid,
    Valid,
    Poisoned,
}

#[derive(Debug, Clone, Copy)]
pub struct IntegerData {
    pub state: IntegerState,
    pub value: i64,
}

struct Level {
    integers: HashMap<Name, IntegerData>,
    non_integers: HashSet<Name>,
    types: HashMap<Name, Rc<ParametricUse>>,
    children_can_mutate: bool,
    poisons_ancestors: bool,
}

impl Level {
    fn new(children_can_mutate: bool, poisons_ancestors: bool) -> Level {
        Level {
            integers: HashMap::new(),
            non_integers: HashSet::new(),
            types: HashMap::new(),
            children_can_mutate: children_can_mutate,
            poisons_ancestors: poisons_ancestors,
        }
    }
}

/// A stack of scopes tracking which names denote compile-time `Integer`s
/// (and bound type parameters) and their values.
pub struct IntegerContext {
    levels: Vec<Level>,
}

impl IntegerContext {
    pub fn new() -> IntegerContext {
        let mut ic = IntegerContext { levels: Vec::new() };
        // The outermost context is immutable.
        ic.enter_immutable_level();
        ic
    }

    /// Packages, modules.
    pub fn enter_immutable_level(&mut self) {
        self.levels.push(Level::new(false, false));
    }

    /// Functions, methods, rules, begin/end blocks, for loops.
    pub fn enter_mutable_level(&mut self) {
        self.levels.push(Level::new(true, false));
    }

    /// If/else, case.
    pub fn enter_poisoning_level(&mut self) {
        self.levels.push(Level::new(true, true));
    }

    pub fn exit_level(&mut self) {
        assert!(self.levels.len() > 1);
        self.levels.pop();
    }

    /// Returns false on failure (variable already defined in this scope).
    pub fn define_var(&mut self, name: Name, is_integer: bool) -> bool {
        let cur = self.levels.last_mut().unwrap();
        if cur.non_integers.contains(&name) || cur.integers.contains_key(&name) {
            return false;
        }
        if is_integer {
            cur.integers.insert(
                name,
                IntegerData {
                    state: IntegerState::Invalid,
                    value: 0,
                },
            );
        } else {
            cur.non_integers.insert(name);
        }
        true
    }

    fn find_integer(&self, name: Name) -> Option<IntegerData> {
        for level in self.levels.iter().rev() {
            if let Some(id) = level.integers.get(&name) {
                return Some(*id);
            }
            if level.non_integers.contains(&name) {
                return None;
            }
        }
        None
    }

    pub fn is_integer(&self, name: Name) -> bool {
        self.find_integer(name).is_some()
    }

    /// Returns the binding if the variable is defined; the caller still
    /// must check the state for validity.
    pub fn get(&self, name: Name) -> Option<IntegerData> {
        self.find_integer(name)
    }

    /// Write a value. Finds the innermost binding by walking outward,
    /// stopping at the first non-mutable scope. If a poisoning scope was
    /// crossed, the ancestor binding becomes `Poisoned` and a fresh binding
    /// holding the value is created in the outermost crossed poisoning
    /// scope; it is discarded when that scope exits. Returns false if the
    /// variable is not reachable.
    pub fn set(&mut self, name: Name, value: i64) -> bool {
        let mut poisoning_idx: Option<usize> = None;
        let mut binding_idx: Option<usize> = None;
        for idx in (0..self.levels.len()).rev() {
            let level = &self.levels[idx];
            if idx != self.levels.len() - 1 && !level.children_can_mutate {
                break;
            }
            if level.integers.contains_key(&name) {
                binding_idx = Some(idx);
                break;
            }
            if level.non_integers.contains(&name) {
                break;
            }
            if level.poisons_ancestors {
                poisoning_idx = Some(idx);
            }
        }
        let binding_idx = match binding_idx {
            Some(i) => i,
            None => return false,
        };

        let data = IntegerData {
            state: IntegerState::Valid,
            value: value,
        };
        if let Some(pidx) = poisoning_idx {
            self.levels[binding_idx]
                .integers
                .get_mut(&name)
                .unwrap()
                .state = IntegerState::Poisoned;
            self.levels[pidx].integers.insert(name, data);
        } else {
            self.levels[binding_idx].integers.insert(name, data);
        }
        true
    }

    /// Bind a type parameter in the current scope.
    pub fn set_type(&mut self, name: Name, pu: Rc<ParametricUse>) {
        self.levels.last_mut().unwrap().types.insert(name, pu);
    }

    pub fn get_type(&self, name: Name) -> Option<Rc<ParametricUse>> {
        for level in self.levels.iter().rev() {
            if let Some(pu) = level.types.get(&name) {
                return Some(pu.clone());
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Elaboration step control

/// Limits bounding the total elaboration work, to catch non-terminating
/// designs.
#[derive(Debug, Clone, Copy)]
pub struct ElabLimits {
    pub max_steps: u64,
    pub max_depth: u64,
}

impl Default for ElabLimits {
    fn default() -> ElabLimits {
        ElabLimits {
            max_steps: 50000,
            max_depth: 1000,
        }
    }
}

#[derive(Clone)]
enum ElabStep {
    Parametric(ParametricUse),
    ForLoop { loc: String, var: String, value: i64 },
}

impl ElabStep {
    fn render(&self) -> String {
        match self {
            ElabStep::Parametric(pu) => pu.render(true),
            ElabStep::ForLoop { loc, var, value } => format!(
                "for loop at {}, iteration {} = {}",
                hl_colored(loc),
                var,
                value
            ),
        }
    }
}

const ELAB_STEP_BUF_SIZE: usize = 16;

/// A circular buffer of the most recent elaboration steps, used to print a
/// trace when the step or depth limit is exceeded.
struct StepTracker {
    buf: Vec<Option<ElabStep>>,
    num_steps: u64,
    limits: ElabLimits,
}

impl StepTracker {
    fn new(limits: ElabLimits) -> StepTracker {
        StepTracker {
            buf: vec![None; ELAB_STEP_BUF_SIZE],
            num_steps: 0,
            limits: limits,
        }
    }

    fn register(&mut self, step: ElabStep, depth: u64) {
        let idx = (self.num_steps % ELAB_STEP_BUF_SIZE as u64) as usize;
        self.buf[idx] = Some(step);
        self.num_steps += 1;

        let mut failed = false;
        if self.limits.max_steps != 0 && self.num_steps > self.limits.max_steps {
            failed = true;
            print!(
                "{}exceeded maximum number of elaboration steps ({}). \
                 The design may have a non-terminating loop or sequence of parametric \
                 functions, modules, or types. Fix the design to avoid non-termination, \
                 or increase the maximum number of elaboration steps if the design is correct.",
                error_colored("error: "),
                self.limits.max_steps
            );
        } else if self.limits.max_depth != 0 && depth > self.limits.max_depth {
            failed = true;
            print!(
                "{}exceeded maximum elaboration depth ({}). \
                 The design may have a non-terminating recursion of parametric \
                 functions, modules, or types. Fix the design to avoid non-termination, \
                 or increase the maximum elaboration depth if the design is correct.",
                error_colored("error: "),
                self.limits.max_depth
            );
        }
        if failed {
            println!("The last elaboration steps are:");
            let shown = std::cmp::min(ELAB_STEP_BUF_SIZE as u64, self.num_steps);
            for i in 0..shown {
                let idx = ((self.num_steps - 1 - i) % ELAB_STEP_BUF_SIZE as u64) as usize;
                let step_str = self.buf[idx].as_ref().map(|s| s.render()).unwrap_or_default();
                println!(
                    "    {:>12}: {}",
                    hl_colored(&(self.num_steps - i).to_string()),
                    step_str
                );
            }
            std::process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Keyword tables

// bsc checks against SystemVerilog keywords, but we'd get epic error
// messages if a BSV keyword was used as an identifier in Minispec, so both
// sets are rejected up front.
const SV_KEYWORDS: &[&str] = &[
    "alias", "always", "always_comb", "always_ff", "always_latch", "and", "assert",
    "assert_strobe", "assign", "assume", "automatic", "before", "begin", "bind", "bins", "binsof",
    "break", "buf", "bufif0", "bufif1", "byte", "case", "casex", "casez", "cell", "chandle",
    "class", "clocking", "cmos", "config", "const", "constraint", "context", "continue", "cover",
    "covergroup", "coverpoint", "cross", "deassign", "default", "defparam", "design", "disable",
    "dist", "do", "edge", "else", "end", "endcase", "endclass", "endclocking", "endconfig",
    "endfunction", "endgenerate", "endgroup", "endinterface", "endmodule", "endpackage",
    "endprimitive", "endprogram", "endproperty", "endspecify", "endsequence", "endtable",
    "endtask", "enum", "event", "expect", "export", "extends", "extern", "final", "first_match",
    "for", "force", "foreach", "forever", "fork", "forkjoin", "function", "generate", "genvar",
    "highz0", "highz1", "if", "iff", "ifnone", "ignore_bins", "illegal_bins", "import", "incdir",
    "include", "initial", "inout", "input", "inside", "instance", "int", "integer", "interface",
    "intersect", "join", "join_any", "join_none", "large", "liblist", "library", "local",
    "localparam", "logic", "longint", "macromodule", "matches", "medium", "modport", "module",
    "nand", "negedge", "new", "nmos", "nor", "noshowcancelled", "not", "notif0", "notif1", "null",
    "or", "output", "package", "packed", "parameter", "pmos", "posedge", "primitive", "priority",
    "program", "property", "protected", "pull0", "pull1", "pulldown", "pullup",
    "pulsestyle_onevent", "pulsestyle_ondetect", "pure", "rand", "randc", "randcase",
    "randsequence", "rcmos", "real", "realtime", "ref", "reg", "release", "repeat", "return",
    "rnmos", "rpmos", "rtran", "rtranif0", "rtranif1", "scalared", "sequence", "shortint",
    "shortreal", "showcancelled", "signed", "small", "solve", "specify", "specparam", "static",
    "string", "strong0", "strong1", "struct", "super", "supply0", "supply1", "table", "tagged",
    "task", "this", "throughout", "time", "timeprecision", "timeunit", "tran", "tranif0",
    "tranif1", "tri", "tri0", "tri1", "triand", "trior", "trireg", "type", "typedef", "union",
    "unique", "unsigned", "use", "var", "vectored", "virtual", "void", "wait", "wait_order",
    "wand", "weak0", "weak1", "while", "wildcard", "wire", "with", "within", "wor", "xnor", "xor",
];

const BSV_KEYWORDS: &[&str] = &[
    "action", "endaction", "actionvalue", "endactionvalue", "ancestor", "deriving",
    "endinstance", "let", "match", "method", "endmethod", "par", "endpar", "powered_by",
    "provisos", "rule", "endrule", "rules", "endrules", "seq", "endseq", "schedule", "typeclass",
    "endtypeclass", "clock", "reset", "noreset", "no_reset", "valueof", "valueOf", "clocked_by",
    "reset_by", "default_clock", "default_reset", "output_clock", "output_reset", "input_clock",
    "input_reset", "same_family",
];

// ---------------------------------------------------------------------------
// Integer literal parsing

fn is_unsized_literal(text: &str) -> bool {
    match text.find('\'') {
        None => true,
        Some(0) => true,
        Some(_) => false,
    }
}

fn parse_unsized_literal(text: &str) -> Option<i64> {
    let s: String = text.chars().filter(|&c| c != '_').collect();
    if !s.contains('\'') {
        return s.parse().ok();
    }
    if s.len() < 3 {
        return None;
    }
    let base = s.as_bytes()[1] as char;
    let num = &s[2..];
    match base.to_ascii_lowercase() {
        'd' => num.parse().ok(),
        'b' => i64::from_str_radix(num, 2).ok(),
        'h' => i64::from_str_radix(num, 16).ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// The elaborator

fn stops_walk(kind: NodeKind) -> bool {
    // These nodes are walked manually by their handlers, because the
    // translated code does not follow the original structure.
    match kind {
        NodeKind::PackageDef | NodeKind::ModuleDef | NodeKind::ForStmt => true,
        _ => false,
    }
}

pub struct Elaborator<'a> {
    sess: &'a Session,
    tree: &'a Tree,
    ic: IntegerContext,
    parametrics: HashMap<String, NodeId>,
    local_type_names: HashSet<String>,
    top_level_parametric: Option<Rc<ParametricUse>>,
    parametrics_emitted: HashSet<ParametricUse>,
    values: ValueTable,
    submodule_names: HashSet<String>,
    steps: StepTracker,
}

fn starts_lowercase(s: &str) -> bool {
    s.chars().next().map_or(false, |c| c.is_ascii_lowercase())
}

impl<'a> Elaborator<'a> {
    pub fn new(
        sess: &'a Session,
        tree: &'a Tree,
        local_type_names: HashSet<String>,
        top_level_parametric: Option<Rc<ParametricUse>>,
        limits: ElabLimits,
    ) -> Elaborator<'a> {
        Elaborator {
            sess: sess,
            tree: tree,
            ic: IntegerContext::new(),
            parametrics: HashMap::new(),
            local_type_names: local_type_names,
            top_level_parametric: top_level_parametric,
            parametrics_emitted: HashSet::new(),
            values: ValueTable::default(),
            submodule_names: HashSet::new(),
            steps: StepTracker::new(limits),
        }
    }

    pub fn values(&self) -> &ValueTable {
        &self.values
    }

    pub fn is_parametric_emitted(&self, pu: &ParametricUse) -> bool {
        self.parametrics_emitted.contains(pu)
    }

    /// Walk a subtree with the elaborating listener.
    pub fn walk(&mut self, node: NodeId) {
        let tree = self.tree;
        tree::walk_filtered(self, tree, node, &|k| !stops_walk(k));
    }

    fn ectx(&self) -> EmitCtx {
        EmitCtx {
            tree: self.tree,
            values: &self.values,
        }
    }

    // -- reporting ---------------------------------------------------------

    fn report_basic(&self, node: NodeId, msg: &str) {
        let msg = msg.replace("$CTX", &quote(self.tree, node));
        let s = format!(
            "{} {}\n{}",
            hl_colored(&(loc_str(self.tree, node) + ":")),
            msg,
            context_str(self.tree, node, &[node])
        );
        self.sess.report_err(&s, "", Some(node));
    }

    fn report_elab(&self, node: NodeId, subs: &[Rc<BasicError>], msg: Option<&str>) {
        let mut s = format!(
            "{} {} {}\n",
            hl_colored(&(loc_str(self.tree, node) + ":")),
            error_colored("error:"),
            msg.unwrap_or("could not elaborate Integer expression")
        );
        for e in subs {
            s.push_str(&format!(
                "{} {}\n",
                hl_colored(&(subloc_str(self.tree, e.node) + ":")),
                e.msg.replace("$CTX", &quote(self.tree, e.node))
            ));
        }
        let highlights: Vec<NodeId> = if subs.is_empty() {
            vec![node]
        } else {
            subs.iter().map(|e| e.node).collect()
        };
        s.push_str(&context_str(self.tree, node, &highlights));
        self.sess.report_err(&s, "", Some(node));
    }

    /// The elaborated value of an expression that must be a compile-time
    /// Integer. Reports an error and returns a dummy value otherwise.
    fn get_integer_value(&self, expr: NodeId) -> i64 {
        match self.values.get(expr) {
            Some(Value::Int(v)) => *v,
            other => {
                let subs = errors_of(other);
                self.report_elab(expr, &subs, None);
                // A dummy value; the error above already fails the
                // compilation, and downstream uses of this variable should
                // not pile on more reports.
                42424242
            }
        }
    }

    // -- parametric use construction ---------------------------------------

    fn escape_for(&self, name: &str) -> bool {
        starts_lowercase(name) || self.local_type_names.contains(name)
    }

    fn param_arg(&self, p: ast::Param, out: &mut Vec<ParamArg>) {
        let tree = self.tree;
        if let Some(expr) = p.int_param(tree) {
            match self.values.get(p.id()) {
                Some(Value::Int(v)) => out.push(ParamArg::Int(*v)),
                _ => self.report_elab(expr, &[], None),
            }
        } else {
            match self.values.get(p.id()) {
                Some(Value::Parametric(pu)) => out.push(ParamArg::Use(pu.clone())),
                _ => {
                    let ty = p.ty(tree).expect("param is neither expression nor type");
                    let nested = self
                        .create_parametric_use(&tree.text(ty.name(tree)), ty.params(tree));
                    out.push(ParamArg::Use(Rc::new(nested)));
                }
            }
        }
    }

    fn create_parametric_use(&self, name: &str, params: Option<ast::Params>) -> ParametricUse {
        let mut res = ParametricUse {
            name: name.to_string(),
            escape: self.escape_for(name),
            params: Vec::new(),
        };
        if let Some(ps) = params {
            for p in ps.params(self.tree) {
                self.param_arg(p, &mut res.params);
            }
        }
        res
    }

    /// Build a use from elaborated `paramFormals`, so the same descriptor
    /// type covers both uses and emitted specializations.
    fn create_parametric_use_from_formals(
        &self,
        name: &str,
        formals: Option<ast::ParamFormals>,
    ) -> ParametricUse {
        let tree = self.tree;
        let mut res = ParametricUse {
            name: name.to_string(),
            escape: self.escape_for(name),
            params: Vec::new(),
        };
        if let Some(fs) = formals {
            self.check_elaborated_params(fs.id());
            for pf in fs.formals(tree) {
                match self.values.get(pf.id()) {
                    Some(Value::Int(v)) => res.params.push(ParamArg::Int(*v)),
                    Some(Value::Parametric(pu)) => res.params.push(ParamArg::Use(pu.clone())),
                    _ => {
                        let p = pf.param(tree).expect("unbound named parameter formal");
                        self.param_arg(p, &mut res.params);
                    }
                }
            }
        }
        res
    }

    /// Report an elaboration error for every parameter expression in the
    /// subtree that did not fold to an Integer.
    fn check_elaborated_params(&self, node: NodeId) {
        let tree = self.tree;
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if tree.kind(n) == NodeKind::Param {
                if let Some(expr) = ast::Param(n).int_param(tree) {
                    match self.values.get(expr) {
                        Some(Value::Int(_)) => {}
                        other => {
                            let subs = errors_of(other);
                            self.report_elab(expr, &subs, None);
                        }
                    }
                }
            }
            for &c in tree.children(n).iter().rev() {
                stack.push(c);
            }
        }
    }

    fn is_concrete(&self, formals: ast::ParamFormals) -> bool {
        for pf in formals.formals(self.tree) {
            let val = self.values.get(pf.id());
            if pf.int_name(self.tree).is_some() {
                match val {
                    Some(Value::Int(_)) => {}
                    _ => return false,
                }
            } else if pf.type_name(self.tree).is_some() {
                match val {
                    Some(Value::Parametric(_)) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    fn ident(&self, node: NodeId) -> Name {
        self.tree
            .ident_name(node)
            .expect("expected an identifier node")
    }

    // -- statement handlers ------------------------------------------------

    fn exit_var_binding(&mut self, node: NodeId) {
        let tree = self.tree;
        let vb = ast::VarBinding(node);
        let ty = vb.ty(tree);
        let type_name = tree.text(ty.name(tree));
        if type_name == "Integer" {
            if ty.params(tree).is_some() {
                self.report_basic(node, "Integer type cannot have parameters");
            }
            for vi in vb.var_inits(tree) {
                let var = self.ident(vi.var(tree));
                self.ic.define_var(var, true);
                if let Some(rhs) = vi.rhs(tree) {
                    let v = self.get_integer_value(rhs);
                    self.ic.set(var, v);
                }
            }
            self.values.set(node, Some(Value::Skip));
        } else {
            for vi in vb.var_inits(tree) {
                let var = self.ident(vi.var(tree));
                self.ic.define_var(var, false);
            }
        }
    }

    fn exit_let_binding(&mut self, node: NodeId) {
        let tree = self.tree;
        let lb = ast::LetBinding(node);
        // Try to see if it's an Integer expression, and deduce the variable
        // as Integer if so.
        if let Some(rhs) = lb.rhs(tree) {
            if let Some(Value::Int(v)) = self.values.get(rhs).cloned() {
                let idents = lb.idents(tree);
                if idents.len() != 1 {
                    self.report_basic(
                        node,
                        "cannot assign an Integer value to multiple variables with unknown types",
                    );
                } else {
                    let var = self.ident(idents[0]);
                    self.ic.define_var(var, true);
                    self.ic.set(var, v);
                    self.values.set(node, Some(Value::Skip));
                    return;
                }
            }
        }
        // If this wasn't an Integer, define as non-Integer(s).
        for id in lb.idents(tree) {
            let var = self.ident(id);
            self.ic.define_var(var, false);
        }
    }

    fn exit_param_formal(&mut self, node: NodeId) {
        let tree = self.tree;
        let pf = ast::ParamFormal(node);
        if let Some(int_name) = pf.int_name(tree) {
            // The bound variable can't be invalid or poisoned, because it is
            // set when elaborating each instance.
            if let Some(id) = self.ic.get(self.ident(int_name)) {
                if id.state == IntegerState::Valid {
                    self.values.set(node, Some(Value::Int(id.value)));
                }
            }
        } else if let Some(type_name) = pf.type_name(tree) {
            if let Some(pu) = self.ic.get_type(self.ident(type_name)) {
                self.values.set(node, Some(Value::Parametric(pu)));
            }
        } else if let Some(p) = pf.param(tree) {
            let v = self.values.get(p.id()).cloned();
            self.values.set(node, v);
        }
    }

    fn exit_param(&mut self, node: NodeId) {
        let tree = self.tree;
        let p = ast::Param(node);
        let inner = if let Some(expr) = p.int_param(tree) {
            expr
        } else if let Some(ty) = p.ty(tree) {
            ty.id()
        } else {
            return;
        };
        let v = self.values.get(inner).cloned();
        self.values.set(node, v);
    }

    fn exit_arg_formal(&mut self, node: NodeId) {
        let tree = self.tree;
        let af = ast::ArgFormal(node);
        if tree.text(af.ty(tree).id()) == "Integer" {
            self.report_basic(
                af.ty(tree).id(),
                "arguments cannot be of Integer type (use a parameter instead)",
            );
        }
    }

    fn exit_var_assign(&mut self, node: NodeId) {
        let tree = self.tree;
        let va = ast::VarAssign(node);
        // The bit-unpacking form can't involve Integers.
        let lv = match va.lvalue(tree) {
            Some(lv) => lv,
            None => return,
        };
        match tree.kind(lv) {
            NodeKind::SimpleLvalue => {
                let var = self.ident(tree.children(lv)[0]);
                if self.ic.is_integer(var) {
                    let v = self.get_integer_value(va.rhs(tree));
                    self.ic.set(var, v);
                    self.values.set(node, Some(Value::Skip));
                }
            }
            NodeKind::MemberLvalue => {
                let base = tree.children(lv)[0];
                if tree.kind(base) != NodeKind::SimpleLvalue {
                    return;
                }
                let base_name = tree.text(base);
                if !self.submodule_names.contains(&base_name) {
                    return;
                }
                // Rewrite `submod.method = e;` into an input-wire write,
                // `submod.method___input(e);`.
                let member = tree.child_of_kind(lv, NodeKind::LowerCaseIdentifier).unwrap();
                let member_name = tree.text(member);
                let mut tc = TranslatedCode::new(false);
                {
                    let ectx = self.ectx();
                    tc.emit_start(node);
                    tc.emit_start(lv);
                    let call = format!(".{}___input", member_name);
                    tc.emit_parts(&ectx, &[Part::N(base), Part::S(&call)]);
                    tc.emit_end(None);
                    tc.emit_parts(&ectx, &[Part::S("("), Part::N(va.rhs(tree)), Part::S(");")]);
                    tc.emit_end(None);
                }
                self.values.set(node, Some(Value::Translated(Rc::new(tc))));
            }
            _ => {}
        }
    }

    fn exit_var_expr(&mut self, node: NodeId) {
        let tree = self.tree;
        let ve = ast::VarExpr(node);
        let var_node = ve.var(tree);
        if ve.params(tree).is_none() {
            // Handle Integer elaboration.
            let var_name = tree.text(var_node);
            let res = if var_name == "True" {
                Some(Value::Bool(true))
            } else if var_name == "False" {
                Some(Value::Bool(false))
            } else {
                let name = self.ident(var_node);
                match self.ic.get(name) {
                    None => Some(basic_error(
                        var_node,
                        "$CTX is not an Integer variable".to_string(),
                    )),
                    Some(id) => match id.state {
                        IntegerState::Invalid => Some(basic_error(
                            var_node,
                            "Integer variable $CTX is uninitialized".to_string(),
                        )),
                        IntegerState::Poisoned => Some(basic_error(
                            var_node,
                            "Integer variable $CTX is poisoned (it was set inside an \
                             if/else or case statement, so its value is unknown at \
                             compilation time)"
                                .to_string(),
                        )),
                        IntegerState::Valid => Some(Value::Int(id.value)),
                    },
                }
            };
            self.values.set(node, res);
        } else {
            // Handle parametric function calls.
            let params = ve.params(tree).unwrap();
            self.check_elaborated_params(params.id());
            let pu = self.create_parametric_use(&tree.text(var_node), Some(params));
            self.values
                .set(node, Some(Value::Parametric(Rc::new(pu))));
        }
    }

    fn exit_if_stmt(&mut self, node: NodeId) {
        self.ic.exit_level(); // was a poisoning level
        let tree = self.tree;
        let ifs = ast::IfStmt(node);
        // If the condition is known at elaboration time, emit only the
        // taken branch.
        let cond = match self.values.get(ifs.cond(tree)) {
            Some(Value::Bool(b)) => *b,
            _ => return,
        };
        let stmts = ifs.stmts(tree);
        let has_else = stmts.len() == 2;
        let mut tc = TranslatedCode::new(false);
        {
            let ectx = self.ectx();
            tc.emit_start(node);
            tc.emit_str(if cond {
                "/* taken if */ "
            } else if has_else {
                "/* taken else */ "
            } else {
                "/* non-taken if */ "
            });
            // The discarded if/else initiated a lexical scope, so keep the
            // taken statement inside begin/end.
            if cond {
                tc.emit_parts(&ectx, &[Part::S("begin "), Part::N(stmts[0].id()), Part::S(" end")]);
            } else if has_else {
                tc.emit_parts(&ectx, &[Part::S("begin "), Part::N(stmts[1].id()), Part::S(" end")]);
            }
            tc.emit_end(None);
        }
        self.values.set(node, Some(Value::Translated(Rc::new(tc))));
    }

    fn exit_for_stmt(&mut self, node: NodeId) {
        let tree = self.tree;
        let fs = ast::ForStmt(node);

        // Initial sanity checks.
        if tree.text(fs.ty(tree).id()) != "Integer" {
            self.report_basic(fs.ty(tree).id(), "induction variable must be an Integer");
            return;
        }
        let var_name = tree.text(fs.init_var(tree));
        if tree.text(fs.upd_var(tree)) != var_name {
            self.report_basic(
                fs.ty(tree).id(),
                &format!(
                    "for loop must update (assign to the) induction variable, {}",
                    var_name
                ),
            );
            return;
        }

        // The loop's level is mutable, so the body may modify the induction
        // variable; a poisoning modification is caught by the termination
        // check.
        self.ic.enter_mutable_level();
        let exprs = fs.exprs(tree);
        let (init_expr, cond_expr, update_expr) = (exprs[0], exprs[1], exprs[2]);
        self.walk(init_expr);
        let mut ind_var = match self.values.get(init_expr) {
            Some(Value::Int(v)) => *v,
            other => {
                let subs = errors_of(other);
                self.report_elab(init_expr, &subs, None);
                self.ic.exit_level();
                return;
            }
        };
        let var = self.ident(fs.init_var(tree));
        self.ic.define_var(var, true);
        self.ic.set(var, ind_var);

        let mut tc = TranslatedCode::new(false);
        tc.emit_start(node);
        tc.emit_str("/* for loop */");
        loop {
            self.values.clear_subtree(tree, cond_expr);
            self.walk(cond_expr);
            let cond = match self.values.get(cond_expr) {
                Some(Value::Bool(b)) => *b,
                _ => {
                    self.report_elab(
                        cond_expr,
                        &[],
                        Some(
                            "could not elaborate Boolean expression (make sure this is \
                             a comparison involving only Integers)",
                        ),
                    );
                    self.ic.exit_level();
                    return;
                }
            };
            if !cond {
                tc.emit_end(None);
                self.values.set(node, Some(Value::Translated(Rc::new(tc))));
                self.ic.exit_level();
                return;
            }

            self.steps.register(
                ElabStep::ForLoop {
                    loc: loc_str(tree, node),
                    var: var_name.clone(),
                    value: ind_var,
                },
                0,
            );
            let body = fs.stmt(tree).id();
            self.values.clear_subtree(tree, body);
            self.walk(body);
            {
                let ectx = self.ectx();
                tc.emit_start(body);
                tc.emit_parts(&ectx, &[Part::S("begin "), Part::N(body), Part::S(" end")]);
                tc.emit_str("\n");
                tc.emit_end(Some(format!(
                    "for loop in {}, iteration with {}",
                    hl_colored(&loc_str(tree, node)),
                    note_colored(&format!("{} = {}", var_name, ind_var))
                )));
            }

            self.values.clear_subtree(tree, update_expr);
            self.walk(update_expr);
            ind_var = match self.values.get(update_expr) {
                Some(Value::Int(v)) => *v,
                other => {
                    let subs = errors_of(other);
                    self.report_elab(update_expr, &subs, None);
                    self.ic.exit_level();
                    return;
                }
            };
            self.ic.set(var, ind_var);
        }
    }

    // -- expression handlers -----------------------------------------------

    fn exit_int_literal(&mut self, node: NodeId) {
        let text = self.tree.text(node);
        if is_unsized_literal(&text) {
            // Sized literals pass through to BSV untouched; a literal too
            // large for an i64 does as well.
            if let Some(v) = parse_unsized_literal(&text) {
                self.values.set(node, Some(Value::Int(v)));
            }
        }
    }

    fn exit_binop_expr(&mut self, node: NodeId) {
        let tree = self.tree;
        let be = ast::BinopExpr(node);
        let op = match tree.token(be.op_token(tree)) {
            Some(Token::Operator(op)) => op,
            _ => return,
        };
        let left = self.values.get(be.left(tree)).cloned();
        let right = self.values.get(be.right(tree)).cloned();
        let res = match (&left, &right) {
            (Some(Value::Int(l)), Some(Value::Int(r))) => {
                let (l, r) = (*l, *r);
                match op {
                    Op::Add => Some(Value::Int(l.wrapping_add(r))),
                    Op::Sub => Some(Value::Int(l.wrapping_sub(r))),
                    Op::Mul => Some(Value::Int(l.wrapping_mul(r))),
                    Op::Div => Some(Value::Int(if r != 0 { l.wrapping_div(r) } else { 0 })),
                    Op::Mod => Some(Value::Int(if r != 0 { l.wrapping_rem(r) } else { 0 })),
                    Op::Pow => {
                        let mut e: i64 = 1;
                        let mut n = r;
                        while n > 0 {
                            e = e.wrapping_mul(l);
                            n -= 1;
                        }
                        Some(Value::Int(e))
                    }
                    Op::Shl => Some(Value::Int(l.wrapping_shl(r as u32))),
                    Op::Shr => Some(Value::Int(l.wrapping_shr(r as u32))),
                    Op::BitAnd => Some(Value::Int(l & r)),
                    Op::BitOr => Some(Value::Int(l | r)),
                    Op::BitXor => Some(Value::Int(l ^ r)),
                    // Which operand gets negated doesn't matter.
                    Op::BitXnor | Op::BitNxor => Some(Value::Int(!(l ^ r))),
                    Op::Lt => Some(Value::Bool(l < r)),
                    Op::Leq => Some(Value::Bool(l <= r)),
                    Op::Gt => Some(Value::Bool(l > r)),
                    Op::Geq => Some(Value::Bool(l >= r)),
                    Op::LogicEq => Some(Value::Bool(l == r)),
                    Op::LogicNeq => Some(Value::Bool(l != r)),
                    _ => Some(basic_error(
                        node,
                        format!(
                            "{} is not a valid operator for Integer values",
                            error_colored(op.as_str())
                        ),
                    )),
                }
            }
            (Some(Value::Bool(l)), Some(Value::Bool(r))) => match op {
                Op::LogicAnd => Some(Value::Bool(*l && *r)),
                Op::LogicOr => Some(Value::Bool(*l || *r)),
                _ => Some(basic_error(
                    node,
                    format!(
                        "{} is not a valid operator for Bool values",
                        error_colored(op.as_str())
                    ),
                )),
            },
            (Some(Value::Int(_)), Some(Value::Bool(_))) => Some(basic_error(
                node,
                "operands have values of incompatible types (Integer and Bool)".to_string(),
            )),
            (Some(Value::Bool(_)), Some(Value::Int(_))) => Some(basic_error(
                node,
                "operands have values of incompatible types (Bool and Integer)".to_string(),
            )),
            _ => merge_errors(&[left.as_ref(), right.as_ref()]),
        };
        self.values.set(node, res);
    }

    fn exit_unop_expr(&mut self, node: NodeId) {
        let tree = self.tree;
        let ue = ast::UnopExpr(node);
        let op = match tree.token(ue.op_token(tree)) {
            Some(Token::Operator(op)) => op,
            _ => return,
        };
        let value = self.values.get(ue.arg(tree)).cloned();
        let xor_reduce = |v: i64| -> i64 { (v.count_ones() & 1) as i64 };
        let res = match &value {
            Some(Value::Int(v)) => {
                let v = *v;
                match op {
                    Op::BitNot => Some(Value::Int(!v)),
                    Op::BitAnd => Some(Value::Int(if v == -1 { 1 } else { 0 })),
                    Op::BitNand => Some(Value::Int(if v == -1 { 0 } else { 1 })),
                    Op::BitOr => Some(Value::Int(if v == 0 { 0 } else { 1 })),
                    Op::BitNor => Some(Value::Int(if v == 0 { 1 } else { 0 })),
                    Op::BitXor => Some(Value::Int(xor_reduce(v))),
                    Op::BitXnor | Op::BitNxor => {
                        Some(Value::Int(if xor_reduce(v) == 0 { 1 } else { 0 }))
                    }
                    Op::Add => Some(Value::Int(v)),
                    Op::Sub => Some(Value::Int(v.wrapping_neg())),
                    _ => Some(basic_error(
                        node,
                        format!(
                            "{} is not a valid unary operator for an Integer value",
                            error_colored(op.as_str())
                        ),
                    )),
                }
            }
            Some(Value::Bool(v)) => match op {
                Op::LogicNot => Some(Value::Bool(!*v)),
                _ => Some(basic_error(
                    node,
                    format!(
                        "{} is not a valid unary operator for a Bool value",
                        error_colored(op.as_str())
                    ),
                )),
            },
            // Propagate errors, if any.
            _ => value.clone(),
        };
        self.values.set(node, res);
    }

    fn exit_cond_expr(&mut self, node: NodeId) {
        let tree = self.tree;
        let ce = ast::CondExpr(node);
        let pred_value = self.values.get(ce.pred(tree)).cloned();
        let res = match &pred_value {
            Some(Value::Bool(b)) => {
                let taken = if *b {
                    ce.then_expr(tree)
                } else {
                    ce.else_expr(tree)
                };
                match self.values.get(taken) {
                    Some(Value::Int(v)) => Some(Value::Int(*v)),
                    Some(Value::Bool(v)) => Some(Value::Bool(*v)),
                    _ => {
                        // Wrap the taken subtree in parentheses so the BSV
                        // parser treats it as a single operand.
                        let mut tc = TranslatedCode::new(false);
                        let ectx = self.ectx();
                        tc.emit_start(node);
                        tc.emit_parts(&ectx, &[Part::S("("), Part::N(taken), Part::S(")")]);
                        tc.emit_end(None);
                        Some(Value::Translated(Rc::new(tc)))
                    }
                }
            }
            Some(Value::Int(_)) => Some(basic_error(
                ce.pred(tree),
                "$CTX has type Integer, should be Bool".to_string(),
            )),
            _ => {
                // Elaboration errors on the non-taken branch of a folded
                // conditional are not collected; here the condition is
                // unknown, so both branches contribute.
                let then_v = self.values.get(ce.then_expr(tree)).cloned();
                let else_v = self.values.get(ce.else_expr(tree)).cloned();
                merge_errors(&[pred_value.as_ref(), then_v.as_ref(), else_v.as_ref()])
            }
        };
        self.values.set(node, res);
    }

    fn exit_case_expr_item(&mut self, node: NodeId) {
        // bsc does not parse compound expressions correctly in case
        // expressions, so wrap every item body in parentheses. The value is
        // attached to the body, not the item; the pre-rendered text already
        // reflects the body's own elaboration.
        let tree = self.tree;
        let body = ast::CaseExprItem(node).body(tree);
        let mut tc = TranslatedCode::new(false);
        {
            let ectx = self.ectx();
            tc.emit_start(body);
            tc.emit_parts(&ectx, &[Part::S("("), Part::N(body), Part::S(")")]);
            tc.emit_end(None);
        }
        self.values.set(body, Some(Value::Translated(Rc::new(tc))));
    }

    fn exit_paren_expr(&mut self, node: NodeId) {
        let tree = self.tree;
        let inner = ast::ParenExpr(node).expr(tree);
        let v = self.values.get(inner).cloned();
        self.values.set(node, v);
    }

    fn exit_call_expr(&mut self, node: NodeId) {
        let tree = self.tree;
        let call = ast::CallExpr(node);
        let args = call.args(tree);
        if tree.text(call.fcn(tree)) == "log2" && args.len() == 1 {
            let v = self.values.get(args[0]).cloned();
            let res = match &v {
                Some(Value::Int(val)) => {
                    let val = *val;
                    Some(Value::Int(if val > 0 {
                        (63 - (val as u64).leading_zeros()) as i64
                    } else {
                        0
                    }))
                }
                None | Some(Value::Bool(_)) => Some(basic_error(
                    node,
                    "log2() requires an Integer expression as an argument".to_string(),
                )),
                _ => v.clone(), // propagate error
            };
            self.values.set(node, res);
        }
    }

    // -- module elaboration ------------------------------------------------

    fn handle_module_def(&mut self, node: NodeId) {
        let tree = self.tree;
        let md = ast::ModuleDef(node);
        let module_id = md.module_id(tree);

        self.ic.enter_immutable_level();
        // Elaborate paramFormals, if they exist.
        self.walk(module_id.id());
        if let Some(af) = md.arg_formals(tree) {
            self.walk(af.id());
        }

        // Elaborate module elements in the right order: submodules, inputs,
        // and free statements first, then rules and methods, which may
        // legally refer to locals defined later in source order.
        self.submodule_names.clear();
        for stmt in md.stmts(tree) {
            if stmt.input_def(tree).is_some()
                || stmt.submodule_decl(tree).is_some()
                || stmt.stmt(tree).is_some()
            {
                self.walk(stmt.id());
            }
            if let Some(s) = stmt.submodule_decl(tree) {
                self.submodule_names.insert(tree.text(s.name(tree)));
            }
        }
        // Arguments also behave as submodules for input-wire writes.
        if let Some(af) = md.arg_formals(tree) {
            for f in af.formals(tree) {
                self.submodule_names.insert(tree.text(f.name(tree)));
            }
        }
        for stmt in md.stmts(tree) {
            // Rules are emitted before methods, but elaboration order
            // between them doesn't matter: they're independent.
            if stmt.rule_def(tree).is_some() || stmt.method_def(tree).is_some() {
                self.walk(stmt.id());
            }
        }
        self.ic.exit_level();

        // Emit.
        let mut tc = TranslatedCode::new(false);
        {
            let ectx = self.ectx();
            tc.emit_start(node);

            // First, the interface.
            tc.emit_parts_line(&ectx, &[Part::S("interface "), Part::N(module_id.id()), Part::S(";")]);
            for stmt in md.stmts(tree) {
                if let Some(m) = stmt.method_def(tree) {
                    tc.emit_parts_line(
                        &ectx,
                        &[
                            Part::S("  method "),
                            Part::N(m.ty(tree).id()),
                            Part::N(m.name(tree)),
                            Part::S(""),
                            Part::ON(m.arg_formals(tree).map(|a| a.id())),
                            Part::S(";"),
                        ],
                    );
                } else if let Some(i) = stmt.input_def(tree) {
                    tc.emit_parts_line(
                        &ectx,
                        &[
                            Part::S("  method Action "),
                            Part::N(i.name(tree)),
                            Part::S("___input("),
                            Part::N(i.ty(tree).id()),
                            Part::S(" value);"),
                        ],
                    );
                }
            }
            tc.emit_line_str("endinterface\n");

            // The interface and the module are recorded as separate ranges:
            // bsc reports some errors (e.g. conflicting declarations) at the
            // beginning of the module rather than at the name, and this way
            // the exact location is caught.
            tc.emit_end(None);
            tc.emit_start(node);

            // Then the module, following standard BSV naming conventions.
            if module_id.param_formals(tree).is_some() {
                let pu = match self.values.get(module_id.id()) {
                    Some(Value::Parametric(pu)) => pu.clone(),
                    _ => panic!("parametric module id without a bound use"),
                };
                let s = pu.render(true);
                tc.emit_str("module \\mk");
                tc.emit_str(&s);
                tc.emit_str(" ");
            } else {
                tc.emit_parts(&ectx, &[Part::S("module mk"), Part::N(module_id.id())]);
            }
            if let Some(af) = md.arg_formals(tree) {
                tc.emit_parts(&ectx, &[Part::S("#"), Part::N(af.id())]);
            }
            tc.emit_parts_line(&ectx, &[Part::S("("), Part::N(module_id.id()), Part::S(");")]);

            // Emit in the order required by BSV: submodules and input
            // wires, then rules, then methods.
            for stmt in md.stmts(tree) {
                tc.emit_start(stmt.id());
                if let Some(i) = stmt.input_def(tree) {
                    if let Some(dv) = i.default_val(tree) {
                        tc.emit_parts_line(
                            &ectx,
                            &[
                                Part::S("  Wire#("),
                                Part::N(i.ty(tree).id()),
                                Part::S(") "),
                                Part::N(i.name(tree)),
                                Part::S(" <- mkDWire("),
                                Part::N(dv),
                                Part::S(");"),
                            ],
                        );
                    } else {
                        tc.emit_parts_line(
                            &ectx,
                            &[
                                Part::S("  Wire#("),
                                Part::N(i.ty(tree).id()),
                                Part::S(") "),
                                Part::N(i.name(tree)),
                                Part::S(" <- mkBypassWire;"),
                            ],
                        );
                    }
                } else if let Some(s) = stmt.submodule_decl(tree) {
                    let sty = s.ty(tree);
                    if tree.text(sty.name(tree)) == "Vector" {
                        // Vectors of submodules construct their element
                        // module through replicateM.
                        match sty.params(tree) {
                            None => self.report_basic(sty.id(), "Vector must use parameters"),
                            Some(ps) => {
                                let pvec = ps.params(tree);
                                if pvec.len() != 2 {
                                    self.report_basic(sty.id(), "Vector must use 2 parameters");
                                } else {
                                    match pvec[1].ty(tree) {
                                        None => self.report_basic(
                                            pvec[1].id(),
                                            "Vector's second parameter must be a type",
                                        ),
                                        Some(elem_ty) => {
                                            let ctor = self.module_ctor_name(&ectx, elem_ty.id());
                                            tc.emit_parts_line(
                                                &ectx,
                                                &[
                                                    Part::S("  "),
                                                    Part::N(sty.id()),
                                                    Part::N(s.name(tree)),
                                                    Part::S(" <- replicateM("),
                                                    Part::S(&ctor),
                                                    Part::S(""),
                                                    Part::ON(s.args(tree)),
                                                    Part::S(");"),
                                                ],
                                            );
                                        }
                                    }
                                }
                            }
                        }
                    } else {
                        let ctor = self.module_ctor_name(&ectx, sty.id());
                        tc.emit_parts_line(
                            &ectx,
                            &[
                                Part::S("  "),
                                Part::N(sty.id()),
                                Part::N(s.name(tree)),
                                Part::S(" <- "),
                                Part::S(&ctor),
                                Part::ON(s.args(tree)),
                                Part::S(";"),
                            ],
                        );
                    }
                } else if let Some(x) = stmt.stmt(tree) {
                    tc.emit_parts_line(&ectx, &[Part::S("  "), Part::N(x.id())]);
                }
                tc.emit_end(None);
            }

            for stmt in md.stmts(tree) {
                tc.emit_start(stmt.id());
                if let Some(r) = stmt.rule_def(tree) {
                    // Ensure all rules fire every cycle.
                    tc.emit_parts_line(
                        &ectx,
                        &[
                            Part::S("  (* no_implicit_conditions, fire_when_enabled *) "),
                            Part::N(r.id()),
                        ],
                    );
                }
                tc.emit_end(None);
            }

            for stmt in md.stmts(tree) {
                tc.emit_start(stmt.id());
                if let Some(m) = stmt.method_def(tree) {
                    tc.emit_parts_line(&ectx, &[Part::S("  "), Part::N(m.id())]);
                } else if let Some(i) = stmt.input_def(tree) {
                    tc.emit_parts_line(
                        &ectx,
                        &[
                            Part::S("  method Action "),
                            Part::N(i.name(tree)),
                            Part::S("___input("),
                            Part::N(i.ty(tree).id()),
                            Part::S(" value);"),
                        ],
                    );
                    tc.emit_parts_line(
                        &ectx,
                        &[Part::S("    "), Part::N(i.name(tree)), Part::S(" <= value;")],
                    );
                    tc.emit_line_str("  endmethod");
                }
                tc.emit_end(None);
            }
            tc.emit_line_str("endmodule\n");
            tc.emit_end(None);
        }
        self.values.set(node, Some(Value::Translated(Rc::new(tc))));

        if let Some(top) = &self.top_level_parametric {
            if top.name == tree.text(module_id.name(tree)) {
                if let Some(af) = md.arg_formals(tree) {
                    if !af.formals(tree).is_empty() {
                        let msg = format!(
                            "top-level module {} cannot have arguments",
                            quote(tree, module_id.name(tree))
                        );
                        self.report_basic(af.id(), &msg);
                    }
                }
            }
        }
    }

    /// The BSV constructor name for a submodule type: `mkName` for plain
    /// types (parameters stripped), `\mk…` for escaped parametric ones.
    fn module_ctor_name(&self, ectx: &EmitCtx, type_node: NodeId) -> String {
        let mut tc = TranslatedCode::new(false);
        tc.emit_node(ectx, type_node);
        let type_name = tc.code().to_string();
        if type_name.starts_with('\\') {
            format!("\\mk{}", &type_name[1..])
        } else {
            let head = &type_name[..type_name.find('#').unwrap_or(type_name.len())];
            format!("mk{}", head)
        }
    }

    // -- function elaboration ----------------------------------------------

    fn exit_function_def(&mut self, node: NodeId) {
        let tree = self.tree;
        let fd = ast::FunctionDef(node);
        let fid = fd.function_id(tree);
        let name = tree.text(fid.name(tree));
        let pu = self.create_parametric_use_from_formals(&name, fid.param_formals(tree));
        let is_top = match &self.top_level_parametric {
            Some(top) => **top == pu,
            None => false,
        };
        if is_top {
            // Emit a synthesis wrapper exposing the function as a module,
            // with the result on a clean port.
            let mut ifc_name = name.clone();
            if let Some(c) = ifc_name.get_mut(0..1) {
                c.make_ascii_uppercase();
            }
            ifc_name.push_str("___");
            let mod_name = format!("mk{}", name);
            let mut ifc_pu =
                self.create_parametric_use_from_formals(&ifc_name, fid.param_formals(tree));
            // Not recognized as a local type, but it is one: we're making
            // it up right here.
            ifc_pu.escape = true;
            let mod_pu =
                self.create_parametric_use_from_formals(&mod_name, fid.param_formals(tree));

            let mut tc = TranslatedCode::new(false);
            {
                let ectx = self.ectx();
                tc.emit_start(node);
                tc.emit_node(&ectx, node);
                tc.emit_str("\n");
                tc.emit_str("\n");
                let ifc_str = ifc_pu.render(false);
                let mod_str = mod_pu.render(false);
                let fn_str = pu.render(false);
                tc.emit_line_str(&format!("interface {} ;", ifc_str));
                tc.emit_line_str("  (* prefix=\"_\", result = \"out\" *)");
                tc.emit_parts_line(
                    &ectx,
                    &[
                        Part::S("  method "),
                        Part::N(fd.ty(tree).id()),
                        Part::S(" fn"),
                        Part::ON(fd.arg_formals(tree).map(|a| a.id())),
                        Part::S(";"),
                    ],
                );
                tc.emit_line_str("endinterface\n");
                tc.emit_line_str(&format!("module {} ( {} );", mod_str, ifc_str));
                tc.emit_parts(
                    &ectx,
                    &[
                        Part::S("  method "),
                        Part::N(fd.ty(tree).id()),
                        Part::S(" fn"),
                        Part::ON(fd.arg_formals(tree).map(|a| a.id())),
                        Part::S(" = "),
                        Part::S(&fn_str),
                        Part::S(" ("),
                    ],
                );
                if let Some(af) = fd.arg_formals(tree) {
                    let formals = af.formals(tree);
                    for (i, f) in formals.iter().enumerate() {
                        tc.emit_parts(&ectx, &[Part::N(f.name(tree))]);
                        if i + 1 < formals.len() {
                            tc.emit_str(", ");
                        }
                    }
                }
                tc.emit_line_str(");");
                tc.emit_line_str("endmodule");
                tc.emit_end(None);
            }
            self.values.set(node, Some(Value::Translated(Rc::new(tc))));
        }
        self.ic.exit_level();
    }

    fn exit_id_with_formals(&mut self, node: NodeId, name: NodeId, formals: Option<ast::ParamFormals>) {
        if formals.is_none() {
            return;
        }
        let name = self.tree.text(name);
        let pu = self.create_parametric_use_from_formals(&name, formals);
        self.parametrics_emitted.insert(pu.clone());
        self.values
            .set(node, Some(Value::Parametric(Rc::new(pu))));
    }

    fn exit_type(&mut self, node: NodeId) {
        let tree = self.tree;
        let ty = ast::TypeNode(node);
        let name_node = ty.name(tree);
        let name = tree.text(name_node);
        if let Some(formal_pu) = self.ic.get_type(self.ident(name_node)) {
            match ty.params(tree) {
                None => {
                    self.values
                        .set(node, Some(Value::Parametric(formal_pu)));
                }
                Some(ps) => {
                    // Curry the parameters: given T = Vector#(4), a use
                    // T#(Reg#(Bit#(8))) elaborates to
                    // Vector#(4, Reg#(Bit#(8))).
                    let use_pu = self.create_parametric_use("", Some(ps));
                    let mut merged = formal_pu.params.clone();
                    merged.extend(use_pu.params);
                    let pu = ParametricUse {
                        name: formal_pu.name.clone(),
                        escape: formal_pu.escape,
                        params: merged,
                    };
                    self.values
                        .set(node, Some(Value::Parametric(Rc::new(pu))));
                }
            }
        } else if self.local_type_names.contains(&name) && ty.params(tree).is_some() {
            let ps = ty.params(tree).unwrap();
            self.check_elaborated_params(ps.id());
            let pu = self.create_parametric_use(&name, Some(ps));
            self.values
                .set(node, Some(Value::Parametric(Rc::new(pu))));
        }
    }

    // -- declarations and identifiers --------------------------------------

    fn exit_type_def_with_deriving(&mut self, node: NodeId) {
        // Auto-derive the standard typeclasses on the trailing semicolon.
        let last = *self.tree.children(node).last().unwrap();
        self.values.set(
            last,
            Some(Value::Text(" deriving(Bits, Eq, FShow);".to_string())),
        );
    }

    fn exit_import_decl(&mut self, node: NodeId) {
        self.values.set(node, Some(Value::Skip));
    }

    fn exit_bsv_import_decl(&mut self, node: NodeId) {
        let tree = self.tree;
        let bi = ast::BsvImportDecl(node);
        let mut tc = TranslatedCode::new(false);
        {
            let ectx = self.ectx();
            tc.emit_start(node);
            for id in bi.identifiers(tree) {
                tc.emit_parts_line(&ectx, &[Part::S("import "), Part::N(id), Part::S("::*;")]);
            }
            tc.emit_end(None);
        }
        self.values.set(node, Some(Value::Translated(Rc::new(tc))));
    }

    fn exit_lower_case_identifier(&mut self, node: NodeId) {
        // Forbid identifiers that would collide with generated code or
        // confuse the downstream compiler.
        let id = self.tree.text(node);
        let err = |e: &str| {
            let msg = format!(
                "lowercase identifier {} {}, which is forbidden",
                quote(self.tree, node),
                e
            );
            self.report_basic(node, &msg);
        };
        if id.starts_with("mk") {
            err(&format!("begins with {}", hl_colored("'mk'")));
        }
        if id.contains("___input") {
            err(&format!("contains {}", hl_colored("'___input'")));
        }
        if SV_KEYWORDS.contains(&id.as_str()) {
            err("is a SystemVerilog keyword");
        }
        if BSV_KEYWORDS.contains(&id.as_str()) {
            err("is a Bluespec (BSV) keyword");
        }
    }

    fn exit_package_def(&mut self, node: NodeId) {
        let tree = self.tree;
        let pkg = ast::PackageDef(node);
        for stmt in pkg.stmts(tree) {
            // Detect non-concrete parametrics; they are stored for
            // on-demand specialization and skipped here.
            let mut formals: Option<ast::ParamFormals> = None;
            let mut def_node: Option<NodeId> = None;
            let mut name = String::new();
            if let Some(f) = stmt.function_def(tree) {
                let fid = f.function_id(tree);
                formals = fid.param_formals(tree);
                name = tree.text(fid.name(tree));
                def_node = Some(f.id());
            } else if let Some(m) = stmt.module_def(tree) {
                let mid = m.module_id(tree);
                formals = mid.param_formals(tree);
                name = tree.text(mid.name(tree));
                def_node = Some(m.id());
            } else if let Some(t) = stmt.type_def_synonym(tree) {
                let tid = t.type_id(tree);
                formals = tid.param_formals(tree);
                name = tree.text(tid.name(tree));
                def_node = Some(t.id());
            } else if let Some(t) = stmt.type_def_struct(tree) {
                let tid = t.type_id(tree);
                formals = tid.param_formals(tree);
                name = tree.text(tid.name(tree));
                def_node = Some(t.id());
            }

            match formals {
                Some(fs) => {
                    self.walk(fs.id());
                    if self.is_concrete(fs) {
                        self.walk(stmt.id());
                    } else {
                        debug!("storing parametric {} for on-demand specialization", name);
                        self.parametrics.insert(name, def_node.unwrap());
                        self.values.set(stmt.id(), Some(Value::Skip));
                    }
                }
                None => self.walk(stmt.id()),
            }
        }
        if let Some(eof) = pkg.eof(tree) {
            self.values.set(eof, Some(Value::Skip));
        }
    }
}

impl<'a> Listener for Elaborator<'a> {
    fn enter(&mut self, tree: &Tree, node: NodeId) {
        match tree.kind(node) {
            NodeKind::MethodDef
            | NodeKind::RuleDef
            | NodeKind::FunctionDef
            | NodeKind::BeginEndBlock => self.ic.enter_mutable_level(),
            NodeKind::IfStmt | NodeKind::CaseStmt | NodeKind::CaseExpr => {
                self.ic.enter_poisoning_level()
            }
            NodeKind::SubmoduleDecl => {
                let name = self.ident(ast::SubmoduleDecl(node).name(tree));
                self.ic.define_var(name, false);
            }
            NodeKind::ArgFormal => {
                let name = self.ident(ast::ArgFormal(node).name(tree));
                self.ic.define_var(name, false);
            }
            NodeKind::ModuleDef => self.handle_module_def(node),
            _ => {}
        }
    }

    fn exit(&mut self, tree: &Tree, node: NodeId) {
        match tree.kind(node) {
            NodeKind::MethodDef
            | NodeKind::RuleDef
            | NodeKind::BeginEndBlock
            | NodeKind::CaseStmt
            | NodeKind::CaseExpr => self.ic.exit_level(),
            NodeKind::VarBinding => self.exit_var_binding(node),
            NodeKind::LetBinding => self.exit_let_binding(node),
            NodeKind::ParamFormal => self.exit_param_formal(node),
            NodeKind::Param => self.exit_param(node),
            NodeKind::Params => self.check_elaborated_params(node),
            NodeKind::ArgFormal => self.exit_arg_formal(node),
            NodeKind::VarAssign => self.exit_var_assign(node),
            NodeKind::VarExpr => self.exit_var_expr(node),
            NodeKind::IfStmt => self.exit_if_stmt(node),
            NodeKind::ForStmt => self.exit_for_stmt(node),
            NodeKind::IntLiteral => self.exit_int_literal(node),
            NodeKind::BinopExpr => self.exit_binop_expr(node),
            NodeKind::UnopExpr => self.exit_unop_expr(node),
            NodeKind::CondExpr => self.exit_cond_expr(node),
            NodeKind::CaseExprItem => self.exit_case_expr_item(node),
            NodeKind::ParenExpr => self.exit_paren_expr(node),
            NodeKind::CallExpr => self.exit_call_expr(node),
            NodeKind::FunctionDef => self.exit_function_def(node),
            NodeKind::FunctionId => {
                let fid = ast::FunctionId(node);
                self.exit_id_with_formals(node, fid.name(tree), fid.param_formals(tree));
            }
            NodeKind::TypeId => {
                let tid = ast::TypeId(node);
                self.exit_id_with_formals(node, tid.name(tree), tid.param_formals(tree));
            }
            NodeKind::ModuleId => {
                let mid = ast::ModuleId(node);
                self.exit_id_with_formals(node, mid.name(tree), mid.param_formals(tree));
            }
            NodeKind::Type => self.exit_type(node),
            NodeKind::TypeDefEnum | NodeKind::TypeDefStruct => {
                self.exit_type_def_with_deriving(node)
            }
            NodeKind::ImportDecl => self.exit_import_decl(node),
            NodeKind::BsvImportDecl => self.exit_bsv_import_decl(node),
            NodeKind::LowerCaseIdentifier => self.exit_lower_case_identifier(node),
            NodeKind::PackageDef => self.exit_package_def(node),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level validation

fn fatal(sess: &Session, msg: String) -> Result<std::convert::Infallible, ()> {
    sess.report_err(&format!("{} {}", error_colored("error:"), msg), "", None);
    Err(())
}

/// Parse the `topLevel` CLI argument into a parametric use. Parameters must
/// be unsized integer literals or (possibly parametric) type names.
fn validate_top_level(sess: &Session, top_level: &str) -> Result<Option<Rc<ParametricUse>>, ()> {
    if top_level.is_empty() {
        return Ok(None);
    }
    let err_hdr = format!(
        "invalid top-level argument {}: ",
        error_colored(&format!("'{}'", top_level))
    );
    let src = get_source_manager().add_anonymous(top_level.to_string());
    let tokens = match Lexer::new(src).all_tokens() {
        Ok(t) => t,
        Err(_) => {
            fatal(sess, format!("{}not a module or function id", err_hdr))?;
            unreachable!()
        }
    };
    let toks: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
    let mut i = 0;
    let pu = parse_top_level_use(sess, &toks, &mut i, &err_hdr)?;
    if toks[i] != Token::Eof {
        fatal(sess, format!("{}not a module or function id", err_hdr))?;
    }
    Ok(Some(Rc::new(pu)))
}

fn parse_top_level_use(
    sess: &Session,
    toks: &[Token],
    i: &mut usize,
    err_hdr: &str,
) -> Result<ParametricUse, ()> {
    let name = match toks[*i] {
        Token::UpperIdent(n) | Token::LowerIdent(n) => n.as_str().to_string(),
        _ => {
            fatal(sess, format!("{}not a module or function id", err_hdr))?;
            unreachable!()
        }
    };
    *i += 1;
    let mut params = Vec::new();
    if toks[*i] == Token::Hashtag && toks.get(*i + 1) == Some(&Token::OpenDelim(DelimToken::Paren)) {
        *i += 2;
        loop {
            match toks[*i] {
                Token::IntLiteral(n) => {
                    let text = n.as_str().to_string();
                    if !is_unsized_literal(&text) {
                        fatal(
                            sess,
                            format!(
                                "{}{} is a sized integer literal (must be unsized)",
                                err_hdr,
                                error_colored(&format!("'{}'", text))
                            ),
                        )?;
                    }
                    match parse_unsized_literal(&text) {
                        Some(v) => params.push(ParamArg::Int(v)),
                        None => {
                            fatal(
                                sess,
                                format!(
                                    "{}{} is not an integer literal",
                                    err_hdr,
                                    error_colored(&format!("'{}'", text))
                                ),
                            )?;
                        }
                    }
                    *i += 1;
                }
                Token::UpperIdent(_) => {
                    let nested = parse_top_level_use(sess, toks, i, err_hdr)?;
                    params.push(ParamArg::Use(Rc::new(nested)));
                }
                ref t => {
                    fatal(
                        sess,
                        format!(
                            "{}{} is not an integer literal",
                            err_hdr,
                            error_colored(&format!("'{}'", t))
                        ),
                    )?;
                }
            }
            match toks[*i] {
                Token::Comma => *i += 1,
                Token::CloseDelim(DelimToken::Paren) => {
                    *i += 1;
                    break;
                }
                _ => {
                    fatal(sess, format!("{}not a module or function id", err_hdr))?;
                }
            }
        }
    }
    Ok(ParametricUse {
        name: name,
        escape: false,
        params: params,
    })
}

// ---------------------------------------------------------------------------
// The translation driver

const MINISPEC_PRELUDE: &str = "\
import Vector::*;

// Registers without a reset value.
typedef Reg#(t) RegU#(type t);
";

fn prelude() -> String {
    format!(
        "// Produced by msc, version {}\n\n{}",
        env!("CARGO_PKG_VERSION"),
        MINISPEC_PRELUDE
    )
}

fn report_params_err(
    sess: &Session,
    tree: &Tree,
    emit_ctx: Option<NodeId>,
    p: &ParametricUse,
    param_type: &str,
    def_str: &str,
    def: NodeId,
    msg: &str,
) {
    let loc = match emit_ctx {
        Some(n) => loc_str(tree, n),
        None => "command-line arg".to_string(),
    };
    let mut ss = format!(
        "{} {} cannot instantiate {} from parametric {} {} defined at {}: {}\n",
        hl_colored(&(loc + ":")),
        error_colored(" error:"),
        error_colored(&format!("'{}'", p.render(true))),
        param_type,
        hl_colored(def_str),
        hl_colored(&loc_str(tree, def)),
        msg
    );
    if let Some(n) = emit_ctx {
        ss.push_str(&context_str(tree, n, &[]));
    }
    sess.report_err(&ss, "", emit_ctx);
}

/// Translate the parsed files (in topological import order) into a single
/// BSV compilation unit. Emits all user diagnostics through the session and
/// fails if any error was recorded.
pub fn translate_files(
    sess: &Session,
    tree: &Tree,
    parsed_trees: &[ast::PackageDef],
    top_level: &str,
    limits: ElabLimits,
) -> Result<SourceMap, ()> {
    let top_level_parametric = validate_top_level(sess, top_level)?;

    // An initial pass captures all type and module names declared in user
    // code. This advance visibility is needed to decide whether a
    // parametric type use maps to a Minispec type or to a Bluespec
    // primitive, which changes the emitted code.
    let mut local_type_names = HashSet::new();
    for pkg in parsed_trees {
        for stmt in pkg.stmts(tree) {
            if let Some(m) = stmt.module_def(tree) {
                local_type_names.insert(tree.text(m.module_id(tree).name(tree)));
            } else if let Some(t) = stmt.type_def_synonym(tree) {
                local_type_names.insert(tree.text(t.type_id(tree).name(tree)));
            } else if let Some(t) = stmt.type_def_enum(tree) {
                local_type_names.insert(tree.text(t.name(tree)));
            } else if let Some(t) = stmt.type_def_struct(tree) {
                local_type_names.insert(tree.text(t.type_id(tree).name(tree)));
            }
        }
    }

    let mut elab = Elaborator::new(
        sess,
        tree,
        local_type_names,
        top_level_parametric.clone(),
        limits,
    );
    let mut tc = TranslatedCode::new(false);

    // Emit all non-parametrics (and fully elaborated parametrics).
    tc.emit_str(&prelude());
    for pkg in parsed_trees {
        if sess.opts.verbosity.contains(Verbosity::ELAB) {
            debug!("elaborating {}", tree.span(pkg.id()).source.get_path());
        }
        elab.walk(pkg.id());
        let ectx = EmitCtx {
            tree: tree,
            values: elab.values(),
        };
        tc.emit_node(&ectx, pkg.id());
        // Keep a newline between files even if the emitted file doesn't end
        // with one.
        tc.emit_str("\n");
    }
    if sess.opts.verbosity.contains(Verbosity::PARAMS) {
        for name in elab.parametrics.keys() {
            debug!("parametric awaiting specialization: {}", name);
        }
    }

    // Emit parametrics on demand until a pass produces no new uses.
    let mut elab_depth: u64 = 0;
    loop {
        elab_depth += 1;
        let mut param_uses = tc.dequeue_parametric_uses();
        if elab_depth == 1 {
            if let Some(top) = &top_level_parametric {
                if !top.params.is_empty() {
                    param_uses.push(((**top).clone(), None));
                }
            }
        }
        if param_uses.is_empty() {
            break;
        }

        for (p, emit_ctx) in param_uses {
            // Uses of non-local names are silently skipped: they refer to
            // BSV primitives such as Bit#(n) or Vector#(n, t).
            let def = match elab.parametrics.get(&p.name) {
                Some(&d) => d,
                None => continue,
            };
            if elab.is_parametric_emitted(&p) {
                continue;
            }
            debug!("instantiating {} (depth {})", p.render(true), elab_depth);
            elab.steps.register(ElabStep::Parametric(p.clone()), elab_depth);

            let (formals, param_type) = match tree.kind(def) {
                NodeKind::FunctionDef => (
                    ast::FunctionDef(def).function_id(tree).param_formals(tree),
                    "function",
                ),
                NodeKind::ModuleDef => (
                    ast::ModuleDef(def).module_id(tree).param_formals(tree),
                    "module",
                ),
                NodeKind::TypeDefSynonym => (
                    ast::TypeDefSynonym(def).type_id(tree).param_formals(tree),
                    "typedef",
                ),
                NodeKind::TypeDefStruct => (
                    ast::TypeDefStruct(def).type_id(tree).param_formals(tree),
                    "struct",
                ),
                _ => panic!("unhandled parametric definition kind ({})", p.name),
            };
            let formals = formals.expect("stored parametric without formals").formals(tree);

            // Render the formals without going through the raw source, to
            // leave out comments and normalize whitespace.
            let mut formals_ss = String::new();
            for (i, pf) in formals.iter().enumerate() {
                if i > 0 {
                    formals_ss.push_str(", ");
                }
                if let Some(n) = pf.int_name(tree) {
                    formals_ss.push_str(&format!("Integer {}", tree.text(n)));
                } else if let Some(n) = pf.type_name(tree) {
                    formals_ss.push_str(&format!("type {}", tree.text(n)));
                } else {
                    formals_ss.push_str(&tree.text(pf.id()));
                }
            }
            let def_str = format!("{}#({})", p.name, formals_ss);

            // Bind the parameters in a fresh scope.
            elab.ic.enter_immutable_level();
            if p.params.len() != formals.len() {
                report_params_err(
                    sess,
                    tree,
                    emit_ctx,
                    &p,
                    param_type,
                    &def_str,
                    def,
                    &format!(
                        "{} parameter{} required, {} given",
                        formals.len(),
                        if formals.len() > 1 { "s" } else { "" },
                        p.params.len()
                    ),
                );
                elab.ic.exit_level();
                continue;
            }
            let mut params_ss = String::new();
            let mut param_match_error = false;
            for (i, pf) in formals.iter().enumerate() {
                if i > 0 {
                    params_ss.push_str(", ");
                }
                if let Some(int_name) = pf.int_name(tree) {
                    let v = match p.params[i] {
                        ParamArg::Int(v) => v,
                        _ => {
                            report_params_err(
                                sess,
                                tree,
                                emit_ctx,
                                &p,
                                param_type,
                                &def_str,
                                def,
                                &format!("parameter {} is not an Integer", i + 1),
                            );
                            param_match_error = true;
                            continue;
                        }
                    };
                    let var = get_name_table().intern(&tree.text(int_name));
                    elab.ic.define_var(var, true);
                    elab.ic.set(var, v);
                    params_ss.push_str(&format!("{} = {}", tree.text(int_name), v));
                } else if let Some(type_name) = pf.type_name(tree) {
                    let pu = match &p.params[i] {
                        ParamArg::Use(pu) => pu.clone(),
                        _ => {
                            report_params_err(
                                sess,
                                tree,
                                emit_ctx,
                                &p,
                                param_type,
                                &def_str,
                                def,
                                &format!("parameter {} is not a type", i + 1),
                            );
                            param_match_error = true;
                            continue;
                        }
                    };
                    let var = get_name_table().intern(&tree.text(type_name));
                    params_ss
                        .push_str(&format!("{} = {}", tree.text(type_name), pu.render(true)));
                    elab.ic.set_type(var, pu);
                } else {
                    report_params_err(
                        sess,
                        tree,
                        emit_ctx,
                        &p,
                        param_type,
                        &def_str,
                        def,
                        "partially specialized parametrics not yet allowed",
                    );
                }
            }
            if param_match_error {
                elab.ic.exit_level();
                continue;
            }

            let param_info = format!(
                "{} {} with {}",
                param_type,
                hl_colored(&def_str),
                note_colored(&params_ss)
            );

            elab.values.clear_subtree(tree, def);
            elab.walk(def);
            elab.ic.exit_level();
            tc.emit_start(def);
            tc.emit_str("\n");
            {
                let ectx = EmitCtx {
                    tree: tree,
                    values: elab.values(),
                };
                tc.emit_node(&ectx, def);
            }
            tc.emit_str("\n");
            tc.emit_end(Some(param_info));
        }
    }

    let mut top_module = String::new();
    if let Some(top) = &top_level_parametric {
        top_module = format!("mk{}", top.render(false));
    }

    // Top-level parametric modules have names containing `#()`, which break
    // both simulation builds and Verilog output, so wrap them in a plainly
    // named module.
    if let Some(top) = &top_level_parametric {
        if !top.params.is_empty() {
            if !elab.is_parametric_emitted(top) {
                let msg = format!(
                    "{} cannot find top-level parametric {}",
                    error_colored("error:"),
                    error_colored(&format!("'{}'", top.render(false)))
                );
                sess.report_err(&msg, "", None);
            }

            let mut ifc_pu = (**top).clone();
            if !ifc_pu.name.chars().next().map_or(false, |c| c.is_ascii_uppercase()) {
                if let Some(c) = ifc_pu.name.get_mut(0..1) {
                    c.make_ascii_uppercase();
                }
                ifc_pu.name.push_str("___");
            }
            let ifc_str = ifc_pu.render(false);
            tc.emit_line_str("\n// Top-level wrapper module");
            tc.emit_line_str(&format!("module mkTopLevel___( \\{} );", ifc_str));
            tc.emit_line_str(&format!(
                "  \\{} res <- \\mk{} ;",
                ifc_str,
                top.render(false)
            ));
            tc.emit_line_str("  return res;");
            tc.emit_line_str("endmodule");
            top_module = "mkTopLevel___".to_string();
        }
    }

    if sess.opts.verbosity.contains(Verbosity::EMIT) {
        debug!(
            "emitted {} bytes of translated code, top module '{}'",
            tc.code().len(),
            top_module
        );
    }
    sess.finish()?;
    Ok(tc.into_source_map(top_module))
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        get_name_table().intern(s)
    }

    #[test]
    fn integer_context_scoping() {
        let mut ic = IntegerContext::new();
        assert!(ic.define_var(name("i"), true));
        assert!(!ic.define_var(name("i"), true));
        assert!(ic.set(name("i"), 4));
        assert_eq!(ic.get(name("i")).unwrap().value, 4);

        // A mutable child scope writes through to the parent.
        ic.enter_mutable_level();
        assert!(ic.set(name("i"), 5));
        ic.exit_level();
        assert_eq!(ic.get(name("i")).unwrap().value, 5);
    }

    #[test]
    fn integer_context_poisoning() {
        let mut ic = IntegerContext::new();
        ic.enter_mutable_level();
        ic.define_var(name("x"), true);
        ic.set(name("x"), 1);

        ic.enter_poisoning_level();
        assert!(ic.set(name("x"), 2));
        // Inside the poisoning scope the fresh binding is visible.
        assert_eq!(ic.get(name("x")).unwrap().value, 2);
        assert_eq!(ic.get(name("x")).unwrap().state, IntegerState::Valid);
        ic.exit_level();

        // After exit, the ancestor is poisoned and the value is gone.
        assert_eq!(ic.get(name("x")).unwrap().state, IntegerState::Poisoned);
    }

    #[test]
    fn integer_context_blocked_by_immutable() {
        let mut ic = IntegerContext::new();
        ic.define_var(name("g"), true);
        ic.set(name("g"), 1);
        // A write from below an immutable boundary fails.
        ic.enter_immutable_level();
        ic.enter_mutable_level();
        assert!(!ic.set(name("g"), 2));
        ic.exit_level();
        ic.exit_level();
        assert_eq!(ic.get(name("g")).unwrap().value, 1);
    }

    #[test]
    fn integer_context_non_integer_blocks_lookup() {
        let mut ic = IntegerContext::new();
        ic.define_var(name("v"), true);
        ic.set(name("v"), 7);
        ic.enter_mutable_level();
        ic.define_var(name("v"), false);
        assert!(!ic.is_integer(name("v")));
        assert!(!ic.set(name("v"), 8));
        ic.exit_level();
        assert_eq!(ic.get(name("v")).unwrap().value, 7);
    }

    #[test]
    fn parametric_use_identity() {
        let a = ParametricUse {
            name: "Foo".to_string(),
            escape: true,
            params: vec![ParamArg::Int(4)],
        };
        let b = ParametricUse {
            name: "Foo".to_string(),
            escape: false,
            params: vec![ParamArg::Int(4)],
        };
        // The escape flag does not participate in identity.
        assert_eq!(a, b);
        let nested_a = ParametricUse {
            name: "Vec".to_string(),
            escape: false,
            params: vec![ParamArg::Int(2), ParamArg::Use(Rc::new(a.clone()))],
        };
        let nested_b = ParametricUse {
            name: "Vec".to_string(),
            escape: false,
            params: vec![ParamArg::Int(2), ParamArg::Use(Rc::new(b.clone()))],
        };
        assert_eq!(nested_a, nested_b);

        let mut set = HashSet::new();
        set.insert(nested_a);
        assert!(set.contains(&nested_b));
    }

    #[test]
    fn parametric_use_render() {
        let inner = ParametricUse {
            name: "Bit".to_string(),
            escape: false,
            params: vec![ParamArg::Int(8)],
        };
        let outer = ParametricUse {
            name: "myVec".to_string(),
            escape: true,
            params: vec![ParamArg::Int(4), ParamArg::Use(Rc::new(inner))],
        };
        assert_eq!(outer.render(false), "\\myVec#(4,Bit#(8)) ");
        assert_eq!(outer.render(true), "myVec#(4,Bit#(8))");
    }

    #[test]
    fn unsized_literals() {
        assert!(is_unsized_literal("42"));
        assert!(is_unsized_literal("'b1010"));
        assert!(!is_unsized_literal("4'b1010"));
        assert_eq!(parse_unsized_literal("1_000"), Some(1000));
        assert_eq!(parse_unsized_literal("'hFF"), Some(255));
        assert_eq!(parse_unsized_literal("'b10_10"), Some(10));
        assert_eq!(parse_unsized_literal("'d15"), Some(15));
    }

    #[test]
    fn source_map_lookup() {
        let mut src = BTreeMap::new();
        let n1 = NodeId::new(1);
        let n2 = NodeId::new(2);
        src.insert((0, 5), n1);
        src.insert((6, 11), n2);
        let mut info = BTreeMap::new();
        info.insert((0, 11), "outer context".to_string());
        let sm = SourceMap::new(src, info, "hello world".to_string(), "mkTop".to_string());
        assert_eq!(sm.find(1, 1), Some(n1));
        assert_eq!(sm.find(1, 7), Some(n2));
        assert_eq!(sm.find(1, 2), None);
        assert_eq!(sm.find_exact(1, 7, "world"), Some(n2));
        assert_eq!(sm.find_exact(1, 7, "worl"), None);
        assert!(sm.context_info(1, 3).contains("outer context"));
        assert_eq!(sm.top_module(), "mkTop");
    }

    #[test]
    fn emitter_spacing_rules() {
        use crate::syntax::tree::Tree;
        let tree = Tree::new();
        let values = ValueTable::default();
        let ectx = EmitCtx {
            tree: &tree,
            values: &values,
        };
        let mut tc = TranslatedCode::new(false);
        tc.emit_parts(&ectx, &[Part::S("a"), Part::S("b")]);
        assert_eq!(tc.code(), "ab");
    }
}

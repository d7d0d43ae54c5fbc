// Copyright (c) 2021 The Minispec Authors

//! The homogeneous parse tree.
//!
//! Every grammar rule produces a node carrying a kind, a source span, and an
//! ordered child list; terminals are token leaves. All nodes from all files
//! of a compilation live in one arena so that side tables (elaborated
//! values, renames) can be keyed by `NodeId` across files.

use crate::token::Token;
use minispec_common::name::Name;
use minispec_common::source::Span;
use minispec_common::NodeId;

/// The kind of a parse tree node. One variant per grammar rule, plus the
/// token leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    PackageDef,
    PackageStmt,
    ImportDecl,
    BsvImportDecl,
    TypeDefSynonym,
    TypeDefEnum,
    TypeDefEnumElement,
    TypeDefStruct,
    StructMember,
    TypeId,
    Type,
    Params,
    Param,
    ParamFormals,
    ParamFormal,
    ArgFormals,
    ArgFormal,
    Args,
    FunctionDef,
    FunctionId,
    ModuleDef,
    ModuleId,
    ModuleStmt,
    SubmoduleDecl,
    InputDef,
    MethodDef,
    RuleDef,
    Stmt,
    VarBinding,
    VarInit,
    LetBinding,
    VarAssign,
    RegWrite,
    SimpleLvalue,
    MemberLvalue,
    IndexLvalue,
    SliceLvalue,
    BeginEndBlock,
    IfStmt,
    CaseStmt,
    CaseStmtItem,
    CaseStmtDefaultItem,
    ForStmt,
    ReturnStmt,
    ExprStmt,

    // Expressions
    CondExpr,
    CaseExpr,
    CaseExprItem,
    BinopExpr,
    UnopExpr,
    ParenExpr,
    VarExpr,
    IntLiteral,
    StringLiteral,
    UndefinedExpr,
    MemberExpr,
    IndexExpr,
    SliceExpr,
    CallExpr,
    BitConcat,
    StructExpr,
    MemberBind,

    // Identifier wrappers
    LowerCaseIdentifier,
    UpperCaseIdentifier,
    DollarIdentifier,
    Identifier,
    AnyIdentifier,

    /// A terminal.
    Token,
}

impl NodeKind {
    /// Whether this node produces an expression value.
    pub fn is_expression(self) -> bool {
        match self {
            NodeKind::CondExpr
            | NodeKind::CaseExpr
            | NodeKind::BinopExpr
            | NodeKind::UnopExpr
            | NodeKind::ParenExpr
            | NodeKind::VarExpr
            | NodeKind::IntLiteral
            | NodeKind::StringLiteral
            | NodeKind::UndefinedExpr
            | NodeKind::MemberExpr
            | NodeKind::IndexExpr
            | NodeKind::SliceExpr
            | NodeKind::CallExpr
            | NodeKind::BitConcat
            | NodeKind::StructExpr => true,
            _ => false,
        }
    }

    /// A human-readable name for the syntax element, used in diagnostics.
    pub fn desc(self) -> &'static str {
        match self {
            NodeKind::FunctionDef => "function definition",
            NodeKind::MethodDef => "method definition",
            NodeKind::ModuleDef => "module definition",
            NodeKind::IfStmt => "if statement",
            NodeKind::ForStmt => "for loop",
            NodeKind::Stmt => "statement",
            NodeKind::Args => "arguments",
            NodeKind::ArgFormal => "argument definition",
            NodeKind::ArgFormals => "arguments list",
            NodeKind::Param => "parameter",
            NodeKind::Params => "parameters",
            NodeKind::ParamFormal => "parameter definition",
            NodeKind::ParamFormals => "parameters list",
            NodeKind::Type => "type",
            NodeKind::TypeId => "type id",
            NodeKind::VarBinding | NodeKind::LetBinding => "variable declaration",
            k if k.is_expression() => "expression",
            _ => "",
        }
    }
}

struct NodeData {
    kind: NodeKind,
    span: Span,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    token: Option<Token>,
}

/// The parse tree arena.
pub struct Tree {
    nodes: Vec<NodeData>,
}

impl Tree {
    pub fn new() -> Tree {
        Tree { nodes: Vec::new() }
    }

    /// Add a token leaf.
    pub fn add_token(&mut self, token: Token, span: Span) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(NodeData {
            kind: NodeKind::Token,
            span: span,
            parent: None,
            children: Vec::new(),
            token: Some(token),
        });
        id
    }

    /// Add an interior node. Its span is the union of the children's spans.
    pub fn add_node(&mut self, kind: NodeKind, children: Vec<NodeId>) -> NodeId {
        assert!(!children.is_empty(), "rule node without children");
        let mut span = self.span(children[0]);
        for &c in &children[1..] {
            span.expand(self.span(c));
        }
        let id = NodeId::new(self.nodes.len());
        for &c in &children {
            self.nodes[c.as_usize()].parent = Some(id);
        }
        self.nodes.push(NodeData {
            kind: kind,
            span: span,
            parent: None,
            children: children,
            token: None,
        });
        id
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.as_usize()].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.as_usize()].span
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.as_usize()].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.as_usize()].children
    }

    pub fn token(&self, id: NodeId) -> Option<Token> {
        self.nodes[id.as_usize()].token
    }

    /// The concatenated token spelling of the subtree, without any
    /// inter-token whitespace. The equivalent of a parse tree `getText()`.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        if let Some(tok) = self.token(id) {
            out.push_str(&tok.spelling());
        } else {
            for &c in self.children(id) {
                self.collect_text(c, out);
            }
        }
    }

    /// The raw source text covered by this node, including whitespace and
    /// comments between its tokens.
    pub fn src_text(&self, id: NodeId) -> String {
        self.span(id).extract()
    }

    /// The source text strictly between two sibling nodes (whitespace and
    /// comments swallowed by the lexer), empty if they touch.
    pub fn gap_text(&self, prev: NodeId, next: NodeId) -> String {
        let a = self.span(prev);
        let b = self.span(next);
        if a.source == b.source && a.end < b.begin {
            Span::new(a.source, a.end, b.begin).extract()
        } else {
            String::new()
        }
    }

    /// The first child of the given kind.
    pub fn child_of_kind(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.children(id).iter().cloned().find(|&c| self.kind(c) == kind)
    }

    /// All children of the given kind, in order.
    pub fn children_of_kind(&self, id: NodeId, kind: NodeKind) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .cloned()
            .filter(|&c| self.kind(c) == kind)
            .collect()
    }

    /// The first child that is an expression.
    pub fn expr_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id)
            .iter()
            .cloned()
            .find(|&c| self.kind(c).is_expression())
    }

    /// All expression children, in order.
    pub fn expr_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .cloned()
            .filter(|&c| self.kind(c).is_expression())
            .collect()
    }

    /// The interned name of an identifier wrapper node (or identifier token
    /// leaf).
    pub fn ident_name(&self, id: NodeId) -> Option<Name> {
        match self.token(id) {
            Some(Token::UpperIdent(n))
            | Some(Token::LowerIdent(n))
            | Some(Token::DollarIdent(n)) => return Some(n),
            Some(_) => return None,
            None => {}
        }
        match self.kind(id) {
            NodeKind::LowerCaseIdentifier
            | NodeKind::UpperCaseIdentifier
            | NodeKind::DollarIdentifier
            | NodeKind::Identifier
            | NodeKind::AnyIdentifier => {
                let c = self.children(id)[0];
                self.ident_name(c)
            }
            _ => None,
        }
    }

    /// Total number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// A parse tree listener, invoked on node entry and exit during a walk.
pub trait Listener {
    fn enter(&mut self, tree: &Tree, node: NodeId) {
        let _ = (tree, node);
    }
    fn exit(&mut self, tree: &Tree, node: NodeId) {
        let _ = (tree, node);
    }
}

/// Depth-first walk over the subtree rooted at `node`, calling the listener
/// on entry and exit of every node.
pub fn walk<L: Listener + ?Sized>(listener: &mut L, tree: &Tree, node: NodeId) {
    walk_filtered(listener, tree, node, &|_| true)
}

/// Depth-first walk that consults `descend` before visiting a node's
/// children. When `descend` returns false the listener still sees the enter
/// and exit events for the node, but its subtree is skipped; handlers for
/// such nodes drive the walk of their children manually.
pub fn walk_filtered<L: Listener + ?Sized>(
    listener: &mut L,
    tree: &Tree,
    node: NodeId,
    descend: &dyn Fn(NodeKind) -> bool,
) {
    listener.enter(tree, node);
    if descend(tree.kind(node)) {
        // The child list is cloned so listeners may inspect the tree while
        // the walk is in progress.
        let children: Vec<_> = tree.children(node).to_vec();
        for c in children {
            walk_filtered(listener, tree, c, descend);
        }
    }
    listener.exit(tree, node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Kw, Token};
    use minispec_common::source::get_source_manager;

    #[test]
    fn spans_and_text() {
        let sm = get_source_manager();
        let src = sm.add("tree.ms", "let  x ;");
        let nt = minispec_common::name::get_name_table();
        let mut tree = Tree::new();
        let t0 = tree.add_token(Token::Keyword(Kw::Let), Span::new(src, 0, 3));
        let t1 = tree.add_token(Token::LowerIdent(nt.intern("x")), Span::new(src, 5, 6));
        let t2 = tree.add_token(Token::Semicolon, Span::new(src, 7, 8));
        let id = tree.add_node(NodeKind::LetBinding, vec![t0, t1, t2]);
        assert_eq!(tree.span(id), Span::new(src, 0, 8));
        assert_eq!(tree.text(id), "letx;");
        assert_eq!(tree.src_text(id), "let  x ;");
        assert_eq!(tree.gap_text(t0, t1), "  ");
        assert_eq!(tree.parent(t1), Some(id));
    }
}

// Copyright (c) 2021 The Minispec Authors

//! Combine multiple Minispec files into a single stream, renaming
//! redefined globals so the result still compiles. This implements
//! notebook-style history: each cell's source is a file, and later cells
//! may redefine earlier globals.
//!
//! All files except the last are emitted, with globals that a later file
//! redefines renamed to `name___In<k>` in their defining file and in all
//! references up to the redefinition. Renaming is done at most once per
//! (name, file) and keeps previously-working code working. Redefining a
//! parametric renames all previous parametrics of the same name, so a
//! file must contain the full set of definitions of a parametric for
//! deterministic behavior. Out-of-order cell re-execution can produce
//! confusing but well-defined renames.

use crate::common::util::replace;
use crate::common::NodeId;
use crate::syntax::ast;
use crate::syntax::token::Token;
use crate::syntax::tree::{walk, Listener, NodeKind, Tree};
use std::collections::{HashMap, HashSet, VecDeque};

fn file_of(tree: &Tree, node: NodeId) -> String {
    tree.span(node).source.get_path().to_string()
}

/// The per-name queue of renames. Each element carries the effective name
/// and the file whose definition made it effective.
pub struct RenameTable {
    table: HashMap<String, VecDeque<(String, String)>>,
}

impl RenameTable {
    pub fn new(tree: &Tree, parse_trees: &[ast::PackageDef]) -> RenameTable {
        let mut table: HashMap<String, VecDeque<(String, String)>> = HashMap::new();
        for pkg in parse_trees {
            for stmt in pkg.stmts(tree) {
                let mut names = Vec::new();
                if let Some(f) = stmt.function_def(tree) {
                    names.push(tree.text(f.function_id(tree).name(tree)));
                }
                if let Some(m) = stmt.module_def(tree) {
                    names.push(tree.text(m.module_id(tree).name(tree)));
                } else if let Some(t) = stmt.type_def_synonym(tree) {
                    names.push(tree.text(t.type_id(tree).name(tree)));
                } else if let Some(t) = stmt.type_def_enum(tree) {
                    names.push(tree.text(t.name(tree)));
                    for elem in t.elements(tree) {
                        names.push(tree.text(elem.tag(tree)));
                    }
                } else if let Some(t) = stmt.type_def_struct(tree) {
                    names.push(tree.text(t.type_id(tree).name(tree)));
                } else if let Some(lb) = stmt.let_binding(tree) {
                    for var in lb.idents(tree) {
                        names.push(tree.text(var));
                    }
                } else if let Some(vb) = stmt.var_binding(tree) {
                    for vi in vb.var_inits(tree) {
                        names.push(tree.text(vi.var(tree)));
                    }
                }

                let file_name = file_of(tree, stmt.id());
                for name in names {
                    if !table.contains_key(&name) {
                        let mut q = VecDeque::new();
                        q.push_back((name.clone(), file_name.clone()));
                        table.insert(name, q);
                    } else {
                        let q = table.get_mut(&name).unwrap();
                        let (prev_name, prev_file) = q.back().unwrap().clone();
                        debug_assert_eq!(prev_name, name);
                        // Only one rename per file, no matter how many
                        // redefinitions it contains.
                        if prev_file != file_name {
                            let mut suffix = format!("___{}", prev_file);
                            // These files are always named InXXX.ms.
                            replace(&mut suffix, ".ms", "");
                            *q.back_mut().unwrap() = (format!("{}{}", name, suffix), prev_file);
                            q.push_back((name.clone(), file_name.clone()));
                        }
                    }
                }
            }
        }
        RenameTable { table: table }
    }

    /// Move to the next file: any rename whose redefinition lives in this
    /// file becomes effective.
    pub fn advance(&mut self, tree: &Tree, pkg: ast::PackageDef) {
        let file_name = file_of(tree, pkg.id());
        for q in self.table.values_mut() {
            if q.len() > 1 {
                let next_file = q[1].1.clone();
                if next_file == file_name {
                    q.pop_front();
                }
            }
        }
    }

    pub fn rename(&self, name: &str) -> String {
        match self.table.get(name) {
            Some(q) => q.front().unwrap().0.clone(),
            None => name.to_string(),
        }
    }
}

/// Scope tracking for locally bound identifiers, which are never renamed
/// even when they shadow a renamed global.
struct LocalVars {
    level_defs: Vec<HashSet<String>>,
}

impl LocalVars {
    fn new() -> LocalVars {
        LocalVars {
            level_defs: Vec::new(),
        }
    }

    fn enter_level(&mut self) {
        self.level_defs.push(HashSet::new());
    }

    fn exit_level(&mut self) {
        assert!(!self.level_defs.is_empty());
        self.level_defs.pop();
    }

    fn define(&mut self, var: String) {
        if let Some(l) = self.level_defs.last_mut() {
            l.insert(var);
        }
    }

    fn is_defined(&self, name: &str) -> bool {
        self.level_defs.iter().any(|l| l.contains(name))
    }
}

/// Walks parse trees collecting the rename decisions for each identifier
/// occurrence, then emits the trees verbatim with renames applied.
pub struct RenameListener<'a> {
    rt: &'a RenameTable,
    lv: LocalVars,
    names: HashMap<NodeId, String>,
}

impl<'a> RenameListener<'a> {
    pub fn new(rt: &'a RenameTable) -> RenameListener<'a> {
        RenameListener {
            rt: rt,
            lv: LocalVars::new(),
            names: HashMap::new(),
        }
    }

    fn maybe_rename(&mut self, tree: &Tree, node: NodeId) {
        let name = tree.text(node);
        if !self.lv.is_defined(&name) {
            let new_name = self.rt.rename(&name);
            if new_name != name {
                self.names.insert(node, new_name);
            }
        }
    }

    fn enter_lower(&mut self, tree: &Tree, node: NodeId) {
        // Not every lowercase identifier is renameable; the only cases are
        // variable declarations, function ids, and variable expressions
        // (which may be function calls). Struct member declarations, member
        // binds, field accesses, and the like are never renamed.
        let renameable = match tree.parent(node) {
            Some(p) => match tree.kind(p) {
                NodeKind::VarInit | NodeKind::LetBinding | NodeKind::FunctionId => true,
                NodeKind::AnyIdentifier => match tree.parent(p) {
                    Some(pp) => tree.kind(pp) == NodeKind::VarExpr,
                    None => false,
                },
                _ => false,
            },
            None => false,
        };
        if renameable {
            self.maybe_rename(tree, node);
        }
    }

    fn enter_upper(&mut self, tree: &Tree, node: NodeId) {
        // Most uppercase identifiers are renameable; only those naming
        // imports are not.
        let renameable = match tree.parent(node) {
            Some(p) => match tree.kind(p) {
                NodeKind::BsvImportDecl => false,
                NodeKind::Identifier => match tree.parent(p) {
                    Some(pp) => tree.kind(pp) != NodeKind::ImportDecl,
                    None => true,
                },
                _ => true,
            },
            None => false,
        };
        if renameable {
            self.maybe_rename(tree, node);
        }
    }

    /// Emit a tree verbatim (inter-token whitespace included), substituting
    /// the collected renames.
    pub fn emit(&self, tree: &Tree, node: NodeId, out: &mut String) {
        if let Some(new_name) = self.names.get(&node) {
            out.push_str(new_name);
            return;
        }
        let children = tree.children(node);
        if children.is_empty() {
            match tree.token(node) {
                Some(Token::Eof) => out.push('\n'),
                Some(tok) => out.push_str(&tok.spelling()),
                None => {}
            }
            return;
        }
        for (i, &c) in children.iter().enumerate() {
            if i > 0 {
                out.push_str(&tree.gap_text(children[i - 1], c));
            }
            self.emit(tree, c, out);
        }
    }
}

impl<'a> Listener for RenameListener<'a> {
    fn enter(&mut self, tree: &Tree, node: NodeId) {
        match tree.kind(node) {
            NodeKind::MethodDef
            | NodeKind::RuleDef
            | NodeKind::BeginEndBlock
            | NodeKind::IfStmt
            | NodeKind::CaseStmt => self.lv.enter_level(),
            NodeKind::VarBinding => {
                for vi in ast::VarBinding(node).var_inits(tree) {
                    self.lv.define(tree.text(vi.var(tree)));
                }
            }
            NodeKind::LetBinding => {
                for var in ast::LetBinding(node).idents(tree) {
                    self.lv.define(tree.text(var));
                }
            }
            NodeKind::ParamFormal => {
                let pf = ast::ParamFormal(node);
                if let Some(n) = pf.int_name(tree) {
                    self.lv.define(tree.text(n));
                } else if let Some(n) = pf.type_name(tree) {
                    self.lv.define(tree.text(n));
                }
            }
            NodeKind::ArgFormal => {
                self.lv.define(tree.text(ast::ArgFormal(node).name(tree)));
            }
            NodeKind::SubmoduleDecl => {
                self.lv
                    .define(tree.text(ast::SubmoduleDecl(node).name(tree)));
            }
            NodeKind::InputDef => {
                self.lv.define(tree.text(ast::InputDef(node).name(tree)));
            }
            NodeKind::ForStmt => {
                self.lv.enter_level();
                self.lv.define(tree.text(ast::ForStmt(node).init_var(tree)));
            }
            // Parametric definitions bind their formals before anything
            // else in the definition is seen, so walk them early.
            NodeKind::TypeDefSynonym => {
                self.lv.enter_level();
                if let Some(pf) = ast::TypeDefSynonym(node).type_id(tree).param_formals(tree) {
                    walk(self, tree, pf.id());
                }
            }
            NodeKind::TypeDefStruct => {
                self.lv.enter_level();
                if let Some(pf) = ast::TypeDefStruct(node).type_id(tree).param_formals(tree) {
                    walk(self, tree, pf.id());
                }
            }
            NodeKind::FunctionDef => {
                self.lv.enter_level();
                if let Some(pf) = ast::FunctionDef(node)
                    .function_id(tree)
                    .param_formals(tree)
                {
                    walk(self, tree, pf.id());
                }
            }
            NodeKind::ModuleDef => {
                self.lv.enter_level();
                let md = ast::ModuleDef(node);
                if let Some(pf) = md.module_id(tree).param_formals(tree) {
                    walk(self, tree, pf.id());
                }
                // Visit inputs, submodules, and free statements before
                // methods and rules, so a method referring to a local
                // defined later in source order does not get its local
                // renamed.
                for stmt in md.stmts(tree) {
                    if stmt.input_def(tree).is_some()
                        || stmt.submodule_decl(tree).is_some()
                        || stmt.stmt(tree).is_some()
                    {
                        walk(self, tree, stmt.id());
                    }
                }
            }
            NodeKind::LowerCaseIdentifier => self.enter_lower(tree, node),
            NodeKind::UpperCaseIdentifier => self.enter_upper(tree, node),
            _ => {}
        }
    }

    fn exit(&mut self, tree: &Tree, node: NodeId) {
        match tree.kind(node) {
            NodeKind::TypeDefSynonym
            | NodeKind::TypeDefStruct
            | NodeKind::FunctionDef
            | NodeKind::ModuleDef
            | NodeKind::MethodDef
            | NodeKind::RuleDef
            | NodeKind::BeginEndBlock
            | NodeKind::IfStmt
            | NodeKind::CaseStmt
            | NodeKind::ForStmt => self.lv.exit_level(),
            _ => {}
        }
    }
}

/// Combine the parsed files: emit all but the last, with renames applied
/// and a `// File <path>` marker before each file's contents.
pub fn combine_to_string(tree: &Tree, parse_trees: &[ast::PackageDef]) -> String {
    let mut rt = RenameTable::new(tree, parse_trees);
    let mut out = String::new();
    for (i, &pkg) in parse_trees.iter().enumerate() {
        if i + 1 == parse_trees.len() {
            continue; // the last file renames but is not emitted
        }
        rt.advance(tree, pkg);
        let mut listener = RenameListener::new(&rt);
        walk(&mut listener, tree, pkg.id());
        out.push_str(&format!("// File {}\n", file_of(tree, pkg.id())));
        listener.emit(tree, pkg.id(), &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::get_source_manager;
    use crate::common::Session;
    use crate::syntax::parser;

    fn parse_files(inputs: &[(&str, &str)]) -> (Tree, Vec<ast::PackageDef>) {
        let sm = get_source_manager();
        let sess = Session::new();
        let mut tree = Tree::new();
        let mut pkgs = Vec::new();
        for (name, content) in inputs {
            let src = sm.add(name, content);
            pkgs.push(parser::parse(src, &mut tree, &sess).unwrap());
        }
        (tree, pkgs)
    }

    #[test]
    fn renames_redefined_globals() {
        let (tree, pkgs) = parse_files(&[
            ("In1.ms", "Integer i = 1;\n"),
            ("In2.ms", "Integer j = i + 1;\n"),
            ("In3.ms", "Bool i = True;\n"),
            ("In4.ms", "function Bool j = i;\n"),
        ]);
        let out = combine_to_string(&tree, &pkgs);
        assert!(out.contains("// File In1.ms"));
        assert!(out.contains("Integer i___In1 = 1;"));
        assert!(out.contains("Integer j___In2 = i___In1 + 1;"));
        assert!(out.contains("Bool i = True;"));
        // The last file renames j but is not emitted.
        assert!(!out.contains("function Bool j"));
    }

    #[test]
    fn locals_shadowing_globals_are_untouched() {
        let (tree, pkgs) = parse_files(&[
            ("In1.ms", "Integer n = 1;\n"),
            (
                "In2.ms",
                "function Integer f;\n  Integer n = 2;\n  return n;\nendfunction\n",
            ),
            ("In3.ms", "Bool n = False;\n"),
        ]);
        let out = combine_to_string(&tree, &pkgs);
        assert!(out.contains("Integer n___In1 = 1;"));
        // The local n inside f is never renamed.
        assert!(out.contains("Integer n = 2;"));
        assert!(out.contains("return n;"));
    }

    #[test]
    fn whitespace_is_preserved() {
        let (tree, pkgs) = parse_files(&[
            ("In1.ms", "Integer  x   = 1;  // a note\nBool t = True;\n"),
            ("In2.ms", "Integer y = 2;\n"),
        ]);
        let out = combine_to_string(&tree, &pkgs);
        assert!(out.contains("Integer  x   = 1;  // a note\nBool t = True;"));
    }
}

// Copyright (c) 2021 The Minispec Authors

//! Typed views over the homogeneous parse tree.
//!
//! Each grammar rule gets a lightweight copyable wrapper around its
//! `NodeId` with accessors that resolve labeled children by kind. These are
//! the moral equivalent of a parser generator's per-rule context accessors;
//! the tree itself stays homogeneous.

use crate::token::{Kw, Token};
use crate::tree::{NodeKind, Tree};
use minispec_common::NodeId;

macro_rules! ast_node {
    ($name:ident, $kind:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub NodeId);

        impl $name {
            /// Wrap a node, checking its kind.
            pub fn cast(tree: &Tree, id: NodeId) -> Option<$name> {
                if tree.kind(id) == NodeKind::$kind {
                    Some($name(id))
                } else {
                    None
                }
            }

            pub fn id(self) -> NodeId {
                self.0
            }
        }
    };
}

ast_node!(PackageDef, PackageDef);
ast_node!(PackageStmt, PackageStmt);
ast_node!(ImportDecl, ImportDecl);
ast_node!(BsvImportDecl, BsvImportDecl);
ast_node!(TypeDefSynonym, TypeDefSynonym);
ast_node!(TypeDefEnum, TypeDefEnum);
ast_node!(TypeDefEnumElement, TypeDefEnumElement);
ast_node!(TypeDefStruct, TypeDefStruct);
ast_node!(StructMember, StructMember);
ast_node!(TypeId, TypeId);
ast_node!(TypeNode, Type);
ast_node!(Params, Params);
ast_node!(Param, Param);
ast_node!(ParamFormals, ParamFormals);
ast_node!(ParamFormal, ParamFormal);
ast_node!(ArgFormals, ArgFormals);
ast_node!(ArgFormal, ArgFormal);
ast_node!(FunctionDef, FunctionDef);
ast_node!(FunctionId, FunctionId);
ast_node!(ModuleDef, ModuleDef);
ast_node!(ModuleId, ModuleId);
ast_node!(ModuleStmt, ModuleStmt);
ast_node!(SubmoduleDecl, SubmoduleDecl);
ast_node!(InputDef, InputDef);
ast_node!(MethodDef, MethodDef);
ast_node!(RuleDef, RuleDef);
ast_node!(Stmt, Stmt);
ast_node!(VarBinding, VarBinding);
ast_node!(VarInit, VarInit);
ast_node!(LetBinding, LetBinding);
ast_node!(VarAssign, VarAssign);
ast_node!(IfStmt, IfStmt);
ast_node!(ForStmt, ForStmt);
ast_node!(CondExpr, CondExpr);
ast_node!(CaseExprItem, CaseExprItem);
ast_node!(BinopExpr, BinopExpr);
ast_node!(UnopExpr, UnopExpr);
ast_node!(ParenExpr, ParenExpr);
ast_node!(VarExpr, VarExpr);
ast_node!(CallExpr, CallExpr);

impl PackageDef {
    pub fn stmts(self, tree: &Tree) -> Vec<PackageStmt> {
        tree.children_of_kind(self.0, NodeKind::PackageStmt)
            .into_iter()
            .map(PackageStmt)
            .collect()
    }

    /// The end-of-file leaf terminating the package.
    pub fn eof(self, tree: &Tree) -> Option<NodeId> {
        tree.children(self.0)
            .iter()
            .cloned()
            .find(|&c| tree.token(c) == Some(Token::Eof))
    }
}

impl PackageStmt {
    /// The wrapped declaration or statement.
    pub fn inner(self, tree: &Tree) -> NodeId {
        tree.children(self.0)[0]
    }

    pub fn function_def(self, tree: &Tree) -> Option<FunctionDef> {
        FunctionDef::cast(tree, self.inner(tree))
    }

    pub fn module_def(self, tree: &Tree) -> Option<ModuleDef> {
        ModuleDef::cast(tree, self.inner(tree))
    }

    pub fn type_def_synonym(self, tree: &Tree) -> Option<TypeDefSynonym> {
        TypeDefSynonym::cast(tree, self.inner(tree))
    }

    pub fn type_def_enum(self, tree: &Tree) -> Option<TypeDefEnum> {
        TypeDefEnum::cast(tree, self.inner(tree))
    }

    pub fn type_def_struct(self, tree: &Tree) -> Option<TypeDefStruct> {
        TypeDefStruct::cast(tree, self.inner(tree))
    }

    pub fn import_decl(self, tree: &Tree) -> Option<ImportDecl> {
        ImportDecl::cast(tree, self.inner(tree))
    }

    pub fn var_binding(self, tree: &Tree) -> Option<VarBinding> {
        VarBinding::cast(tree, self.inner(tree))
    }

    pub fn let_binding(self, tree: &Tree) -> Option<LetBinding> {
        LetBinding::cast(tree, self.inner(tree))
    }
}

impl ImportDecl {
    pub fn identifiers(self, tree: &Tree) -> Vec<NodeId> {
        tree.children_of_kind(self.0, NodeKind::Identifier)
    }
}

impl BsvImportDecl {
    pub fn identifiers(self, tree: &Tree) -> Vec<NodeId> {
        tree.children_of_kind(self.0, NodeKind::UpperCaseIdentifier)
    }
}

impl TypeDefSynonym {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn type_id(self, tree: &Tree) -> TypeId {
        TypeId(tree.child_of_kind(self.0, NodeKind::TypeId).unwrap())
    }
}

impl TypeDefEnum {
    /// The enum's name; it follows the closing brace.
    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::UpperCaseIdentifier)
            .unwrap()
    }

    pub fn elements(self, tree: &Tree) -> Vec<TypeDefEnumElement> {
        tree.children_of_kind(self.0, NodeKind::TypeDefEnumElement)
            .into_iter()
            .map(TypeDefEnumElement)
            .collect()
    }
}

impl TypeDefEnumElement {
    pub fn tag(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::UpperCaseIdentifier)
            .unwrap()
    }
}

impl TypeDefStruct {
    pub fn type_id(self, tree: &Tree) -> TypeId {
        TypeId(tree.child_of_kind(self.0, NodeKind::TypeId).unwrap())
    }

    pub fn members(self, tree: &Tree) -> Vec<StructMember> {
        tree.children_of_kind(self.0, NodeKind::StructMember)
            .into_iter()
            .map(StructMember)
            .collect()
    }
}

impl StructMember {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }
}

impl TypeId {
    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::UpperCaseIdentifier)
            .unwrap()
    }

    pub fn param_formals(self, tree: &Tree) -> Option<ParamFormals> {
        tree.child_of_kind(self.0, NodeKind::ParamFormals)
            .map(ParamFormals)
    }
}

impl TypeNode {
    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::UpperCaseIdentifier)
            .unwrap()
    }

    pub fn params(self, tree: &Tree) -> Option<Params> {
        tree.child_of_kind(self.0, NodeKind::Params).map(Params)
    }
}

impl Params {
    pub fn params(self, tree: &Tree) -> Vec<Param> {
        tree.children_of_kind(self.0, NodeKind::Param)
            .into_iter()
            .map(Param)
            .collect()
    }
}

impl Param {
    /// The integer-parameter alternative: an expression.
    pub fn int_param(self, tree: &Tree) -> Option<NodeId> {
        tree.expr_child(self.0)
    }

    /// The type alternative.
    pub fn ty(self, tree: &Tree) -> Option<TypeNode> {
        tree.child_of_kind(self.0, NodeKind::Type).map(TypeNode)
    }
}

impl ParamFormals {
    pub fn formals(self, tree: &Tree) -> Vec<ParamFormal> {
        tree.children_of_kind(self.0, NodeKind::ParamFormal)
            .into_iter()
            .map(ParamFormal)
            .collect()
    }
}

impl ParamFormal {
    /// The `Integer name` alternative; returns the name.
    pub fn int_name(self, tree: &Tree) -> Option<NodeId> {
        let first = tree.children(self.0)[0];
        match tree.token(first) {
            Some(Token::UpperIdent(n)) if &*n.as_str() == "Integer" => {
                tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            }
            _ => None,
        }
    }

    /// The `type Name` alternative; returns the name.
    pub fn type_name(self, tree: &Tree) -> Option<NodeId> {
        let first = tree.children(self.0)[0];
        match tree.token(first) {
            Some(Token::Keyword(Kw::Type)) => {
                tree.child_of_kind(self.0, NodeKind::UpperCaseIdentifier)
            }
            _ => None,
        }
    }

    /// The plain parameter alternative (a specialization definition).
    pub fn param(self, tree: &Tree) -> Option<Param> {
        tree.child_of_kind(self.0, NodeKind::Param).map(Param)
    }
}

impl ArgFormals {
    pub fn formals(self, tree: &Tree) -> Vec<ArgFormal> {
        tree.children_of_kind(self.0, NodeKind::ArgFormal)
            .into_iter()
            .map(ArgFormal)
            .collect()
    }
}

impl ArgFormal {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }
}

impl FunctionDef {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn function_id(self, tree: &Tree) -> FunctionId {
        FunctionId(tree.child_of_kind(self.0, NodeKind::FunctionId).unwrap())
    }

    pub fn arg_formals(self, tree: &Tree) -> Option<ArgFormals> {
        tree.child_of_kind(self.0, NodeKind::ArgFormals)
            .map(ArgFormals)
    }
}

impl FunctionId {
    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }

    pub fn param_formals(self, tree: &Tree) -> Option<ParamFormals> {
        tree.child_of_kind(self.0, NodeKind::ParamFormals)
            .map(ParamFormals)
    }
}

impl ModuleDef {
    pub fn module_id(self, tree: &Tree) -> ModuleId {
        ModuleId(tree.child_of_kind(self.0, NodeKind::ModuleId).unwrap())
    }

    pub fn arg_formals(self, tree: &Tree) -> Option<ArgFormals> {
        tree.child_of_kind(self.0, NodeKind::ArgFormals)
            .map(ArgFormals)
    }

    pub fn stmts(self, tree: &Tree) -> Vec<ModuleStmt> {
        tree.children_of_kind(self.0, NodeKind::ModuleStmt)
            .into_iter()
            .map(ModuleStmt)
            .collect()
    }
}

impl ModuleId {
    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::UpperCaseIdentifier)
            .unwrap()
    }

    pub fn param_formals(self, tree: &Tree) -> Option<ParamFormals> {
        tree.child_of_kind(self.0, NodeKind::ParamFormals)
            .map(ParamFormals)
    }
}

impl ModuleStmt {
    pub fn inner(self, tree: &Tree) -> NodeId {
        tree.children(self.0)[0]
    }

    pub fn submodule_decl(self, tree: &Tree) -> Option<SubmoduleDecl> {
        SubmoduleDecl::cast(tree, self.inner(tree))
    }

    pub fn input_def(self, tree: &Tree) -> Option<InputDef> {
        InputDef::cast(tree, self.inner(tree))
    }

    pub fn method_def(self, tree: &Tree) -> Option<MethodDef> {
        MethodDef::cast(tree, self.inner(tree))
    }

    pub fn rule_def(self, tree: &Tree) -> Option<RuleDef> {
        RuleDef::cast(tree, self.inner(tree))
    }

    pub fn stmt(self, tree: &Tree) -> Option<Stmt> {
        Stmt::cast(tree, self.inner(tree))
    }
}

impl SubmoduleDecl {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }

    pub fn args(self, tree: &Tree) -> Option<NodeId> {
        tree.child_of_kind(self.0, NodeKind::Args)
    }
}

impl InputDef {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }

    pub fn default_val(self, tree: &Tree) -> Option<NodeId> {
        tree.expr_child(self.0)
    }
}

impl MethodDef {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }

    pub fn arg_formals(self, tree: &Tree) -> Option<ArgFormals> {
        tree.child_of_kind(self.0, NodeKind::ArgFormals)
            .map(ArgFormals)
    }
}

impl RuleDef {
    pub fn name(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }
}

impl Stmt {
    pub fn inner(self, tree: &Tree) -> NodeId {
        tree.children(self.0)[0]
    }
}

impl VarBinding {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn var_inits(self, tree: &Tree) -> Vec<VarInit> {
        tree.children_of_kind(self.0, NodeKind::VarInit)
            .into_iter()
            .map(VarInit)
            .collect()
    }
}

impl VarInit {
    pub fn var(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::LowerCaseIdentifier)
            .unwrap()
    }

    pub fn rhs(self, tree: &Tree) -> Option<NodeId> {
        tree.expr_child(self.0)
    }
}

impl LetBinding {
    pub fn idents(self, tree: &Tree) -> Vec<NodeId> {
        tree.children_of_kind(self.0, NodeKind::LowerCaseIdentifier)
    }

    pub fn rhs(self, tree: &Tree) -> Option<NodeId> {
        tree.expr_child(self.0)
    }
}

impl VarAssign {
    /// The single-lvalue form; `None` for the `{a, b} = …` unpacking form.
    pub fn lvalue(self, tree: &Tree) -> Option<NodeId> {
        let first = tree.children(self.0)[0];
        match tree.kind(first) {
            NodeKind::SimpleLvalue
            | NodeKind::MemberLvalue
            | NodeKind::IndexLvalue
            | NodeKind::SliceLvalue => Some(first),
            _ => None,
        }
    }

    pub fn rhs(self, tree: &Tree) -> NodeId {
        tree.expr_children(self.0).pop().unwrap()
    }
}

impl IfStmt {
    pub fn cond(self, tree: &Tree) -> NodeId {
        tree.expr_child(self.0).unwrap()
    }

    /// One statement, or two if there is an `else` branch.
    pub fn stmts(self, tree: &Tree) -> Vec<Stmt> {
        tree.children_of_kind(self.0, NodeKind::Stmt)
            .into_iter()
            .map(Stmt)
            .collect()
    }
}

impl ForStmt {
    pub fn ty(self, tree: &Tree) -> TypeNode {
        TypeNode(tree.child_of_kind(self.0, NodeKind::Type).unwrap())
    }

    pub fn init_var(self, tree: &Tree) -> NodeId {
        tree.children_of_kind(self.0, NodeKind::LowerCaseIdentifier)[0]
    }

    pub fn upd_var(self, tree: &Tree) -> NodeId {
        tree.children_of_kind(self.0, NodeKind::LowerCaseIdentifier)[1]
    }

    /// Init, condition, and update expressions, in that order.
    pub fn exprs(self, tree: &Tree) -> Vec<NodeId> {
        tree.expr_children(self.0)
    }

    pub fn stmt(self, tree: &Tree) -> Stmt {
        Stmt(tree.child_of_kind(self.0, NodeKind::Stmt).unwrap())
    }
}

impl CondExpr {
    pub fn pred(self, tree: &Tree) -> NodeId {
        tree.expr_children(self.0)[0]
    }

    pub fn then_expr(self, tree: &Tree) -> NodeId {
        tree.expr_children(self.0)[1]
    }

    pub fn else_expr(self, tree: &Tree) -> NodeId {
        tree.expr_children(self.0)[2]
    }
}

impl CaseExprItem {
    /// The item's body: the expression following the colon.
    pub fn body(self, tree: &Tree) -> NodeId {
        let children = tree.children(self.0);
        let colon = children
            .iter()
            .position(|&c| tree.token(c) == Some(Token::Colon))
            .unwrap();
        children[colon + 1..]
            .iter()
            .cloned()
            .find(|&c| tree.kind(c).is_expression())
            .unwrap()
    }
}

impl BinopExpr {
    pub fn left(self, tree: &Tree) -> NodeId {
        tree.expr_children(self.0)[0]
    }

    pub fn right(self, tree: &Tree) -> NodeId {
        tree.expr_children(self.0)[1]
    }

    pub fn op_token(self, tree: &Tree) -> NodeId {
        tree.children(self.0)[1]
    }
}

impl UnopExpr {
    pub fn op_token(self, tree: &Tree) -> NodeId {
        tree.children(self.0)[0]
    }

    pub fn arg(self, tree: &Tree) -> NodeId {
        tree.expr_child(self.0).unwrap()
    }
}

impl ParenExpr {
    pub fn expr(self, tree: &Tree) -> NodeId {
        tree.expr_child(self.0).unwrap()
    }
}

impl VarExpr {
    pub fn var(self, tree: &Tree) -> NodeId {
        tree.child_of_kind(self.0, NodeKind::AnyIdentifier).unwrap()
    }

    pub fn params(self, tree: &Tree) -> Option<Params> {
        tree.child_of_kind(self.0, NodeKind::Params).map(Params)
    }
}

impl CallExpr {
    pub fn fcn(self, tree: &Tree) -> NodeId {
        tree.children(self.0)[0]
    }

    /// The call's argument expressions.
    pub fn args(self, tree: &Tree) -> Vec<NodeId> {
        tree.expr_children(self.0)
            .into_iter()
            .skip(1)
            .collect()
    }
}

// Copyright (c) 2021 The Minispec Authors

//! A recursive descent parser for the Minispec language.
//!
//! The parser builds the homogeneous parse tree of `tree.rs`. Error
//! recovery is deliberately disabled: the first syntax error aborts the
//! parse, since cascading recovery messages tend to confuse more than they
//! help.

use crate::ast;
use crate::lexer::{Lexer, TokenAndSpan};
use crate::token::*;
use crate::tree::{NodeKind, Tree};
use minispec_common::errors::*;
use minispec_common::source::*;
use minispec_common::NodeId;

/// Return type of functions that emit diagnostic messages and only need to
/// communicate success to the parent.
pub type ReportedResult<T> = Result<T, ()>;

/// Parse a single source file into the shared tree arena, returning the
/// package node. The first lexer or parser error is emitted through the
/// provided emitter and aborts the parse.
pub fn parse(
    source: Source,
    tree: &mut Tree,
    emitter: &dyn DiagEmitter,
) -> ReportedResult<ast::PackageDef> {
    let tokens = match Lexer::new(source).all_tokens() {
        Ok(t) => t,
        Err(d) => {
            emitter.emit(d);
            return Err(());
        }
    };
    debug!("parsing {} ({} tokens)", source.get_path(), tokens.len());
    let mut p = Parser {
        tree: tree,
        tokens: tokens,
        idx: 0,
        emitter: emitter,
    };
    p.parse_package_def().map(ast::PackageDef)
}

struct Parser<'a> {
    tree: &'a mut Tree,
    tokens: Vec<TokenAndSpan>,
    idx: usize,
    emitter: &'a dyn DiagEmitter,
}

impl<'a> Parser<'a> {
    fn peek(&self, offset: usize) -> Token {
        let i = self.idx + offset;
        if i < self.tokens.len() {
            self.tokens[i].0
        } else {
            Eof
        }
    }

    fn peek_span(&self) -> Span {
        let i = self.idx.min(self.tokens.len() - 1);
        self.tokens[i].1
    }

    /// Consume the current token and add it to the tree as a leaf.
    fn bump(&mut self) -> NodeId {
        let (tkn, sp) = self.tokens[self.idx.min(self.tokens.len() - 1)];
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        self.tree.add_token(tkn, sp)
    }

    fn add_diag(&self, diag: DiagBuilder2) {
        self.emitter.emit(diag);
    }

    fn error_expected(&self, what: &str) -> ReportedResult<NodeId> {
        self.add_diag(
            DiagBuilder2::error(format!("expected {} before `{}`", what, self.peek(0)))
                .span(self.peek_span()),
        );
        Err(())
    }

    fn require(&mut self, expect: Token, what: &str) -> ReportedResult<NodeId> {
        if self.peek(0) == expect {
            Ok(self.bump())
        } else {
            self.error_expected(what)
        }
    }

    fn try_eat(&mut self, expect: Token) -> Option<NodeId> {
        if self.peek(0) == expect {
            Some(self.bump())
        } else {
            None
        }
    }

    /// Consume a lowercase identifier, wrapping it in its rule node.
    fn eat_lower_ident(&mut self, what: &str) -> ReportedResult<NodeId> {
        match self.peek(0) {
            LowerIdent(_) => {
                let t = self.bump();
                Ok(self.tree.add_node(NodeKind::LowerCaseIdentifier, vec![t]))
            }
            _ => self.error_expected(what),
        }
    }

    /// Consume an uppercase identifier, wrapping it in its rule node.
    fn eat_upper_ident(&mut self, what: &str) -> ReportedResult<NodeId> {
        match self.peek(0) {
            UpperIdent(_) => {
                let t = self.bump();
                Ok(self.tree.add_node(NodeKind::UpperCaseIdentifier, vec![t]))
            }
            _ => self.error_expected(what),
        }
    }

    /// Consume any identifier kind, wrapped in its rule node and the
    /// `anyIdentifier` rule node.
    fn eat_any_ident(&mut self, what: &str) -> ReportedResult<NodeId> {
        let inner_kind = match self.peek(0) {
            LowerIdent(_) => NodeKind::LowerCaseIdentifier,
            UpperIdent(_) => NodeKind::UpperCaseIdentifier,
            DollarIdent(_) => NodeKind::DollarIdentifier,
            _ => return self.error_expected(what),
        };
        let t = self.bump();
        let inner = self.tree.add_node(inner_kind, vec![t]);
        Ok(self.tree.add_node(NodeKind::AnyIdentifier, vec![inner]))
    }

    // ------------------------------------------------------------------
    // Package level

    fn parse_package_def(&mut self) -> ReportedResult<NodeId> {
        let mut children = Vec::new();
        while self.peek(0) != Eof {
            let stmt = self.parse_package_stmt()?;
            children.push(self.tree.add_node(NodeKind::PackageStmt, vec![stmt]));
        }
        // The end-of-file leaf keeps trailing whitespace and comments
        // reachable for verbatim re-emission.
        children.push(self.bump());
        Ok(self.tree.add_node(NodeKind::PackageDef, children))
    }

    fn parse_package_stmt(&mut self) -> ReportedResult<NodeId> {
        match self.peek(0) {
            Keyword(Kw::Import) => self.parse_import_decl(),
            Keyword(Kw::Bsvimport) => self.parse_bsv_import_decl(),
            Keyword(Kw::Typedef) => self.parse_type_decl(),
            Keyword(Kw::Function) => self.parse_function_def(),
            Keyword(Kw::Module) => self.parse_module_def(),
            Keyword(Kw::Let) => self.parse_let_binding(),
            UpperIdent(_) => self.parse_var_binding(),
            _ => {
                self.error_expected("declaration")?;
                Err(())
            }
        }
    }

    fn parse_import_decl(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()];
        loop {
            let kind = match self.peek(0) {
                LowerIdent(_) => NodeKind::LowerCaseIdentifier,
                UpperIdent(_) => NodeKind::UpperCaseIdentifier,
                _ => {
                    self.error_expected("imported file name")?;
                    unreachable!()
                }
            };
            let t = self.bump();
            let inner = self.tree.add_node(kind, vec![t]);
            ch.push(self.tree.add_node(NodeKind::Identifier, vec![inner]));
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::ImportDecl, ch))
    }

    fn parse_bsv_import_decl(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()];
        loop {
            ch.push(self.eat_upper_ident("imported BSV package name")?);
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::BsvImportDecl, ch))
    }

    fn parse_type_decl(&mut self) -> ReportedResult<NodeId> {
        match self.peek(1) {
            Keyword(Kw::Enum) => self.parse_type_def_enum(),
            Keyword(Kw::Struct) => self.parse_type_def_struct(),
            _ => self.parse_type_def_synonym(),
        }
    }

    fn parse_type_def_synonym(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()];
        ch.push(self.parse_type()?);
        ch.push(self.parse_type_id()?);
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::TypeDefSynonym, ch))
    }

    fn parse_type_id(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.eat_upper_ident("type name (uppercase identifier)")?];
        if self.peek(0) == Hashtag {
            ch.push(self.parse_param_formals()?);
        }
        Ok(self.tree.add_node(NodeKind::TypeId, ch))
    }

    fn parse_type_def_enum(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump(), self.bump()]; // typedef enum
        ch.push(self.require(OpenDelim(Brace), "`{`")?);
        loop {
            let mut ech = vec![self.eat_upper_ident("enum tag (uppercase identifier)")?];
            if let Some(eq) = self.try_eat(Assign) {
                ech.push(eq);
                match self.peek(0) {
                    IntLiteral(_) => {
                        let t = self.bump();
                        ech.push(self.tree.add_node(NodeKind::IntLiteral, vec![t]));
                    }
                    _ => {
                        self.error_expected("integer literal")?;
                    }
                }
            }
            ch.push(self.tree.add_node(NodeKind::TypeDefEnumElement, ech));
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        ch.push(self.require(CloseDelim(Brace), "`}`")?);
        ch.push(self.eat_upper_ident("enum name (uppercase identifier)")?);
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::TypeDefEnum, ch))
    }

    fn parse_type_def_struct(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump(), self.bump()]; // typedef struct
        ch.push(self.require(OpenDelim(Brace), "`{`")?);
        while self.peek(0) != CloseDelim(Brace) {
            let mut mch = vec![self.parse_type()?];
            mch.push(self.eat_lower_ident("member name (lowercase identifier)")?);
            mch.push(self.require(Semicolon, "`;`")?);
            ch.push(self.tree.add_node(NodeKind::StructMember, mch));
        }
        ch.push(self.bump()); // }
        ch.push(self.parse_type_id()?);
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::TypeDefStruct, ch))
    }

    // ------------------------------------------------------------------
    // Types and parameters

    fn parse_type(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.eat_upper_ident("type or module name (uppercase identifier)")?];
        if self.peek(0) == Hashtag {
            ch.push(self.parse_params()?);
        }
        Ok(self.tree.add_node(NodeKind::Type, ch))
    }

    fn parse_params(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.require(Hashtag, "`#`")?];
        ch.push(self.require(OpenDelim(Paren), "`(`")?);
        loop {
            ch.push(self.parse_param()?);
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        Ok(self.tree.add_node(NodeKind::Params, ch))
    }

    fn parse_param(&mut self) -> ReportedResult<NodeId> {
        let inner = match self.peek(0) {
            UpperIdent(_) => self.parse_type()?,
            _ => self.parse_expression()?,
        };
        Ok(self.tree.add_node(NodeKind::Param, vec![inner]))
    }

    fn parse_param_formals(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.require(Hashtag, "`#`")?];
        ch.push(self.require(OpenDelim(Paren), "`(`")?);
        loop {
            ch.push(self.parse_param_formal()?);
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        Ok(self.tree.add_node(NodeKind::ParamFormals, ch))
    }

    fn parse_param_formal(&mut self) -> ReportedResult<NodeId> {
        match (self.peek(0), self.peek(1)) {
            (UpperIdent(n), LowerIdent(_)) if &*n.as_str() == "Integer" => {
                let kw = self.bump();
                let name = self.eat_lower_ident("parameter name")?;
                Ok(self.tree.add_node(NodeKind::ParamFormal, vec![kw, name]))
            }
            (Keyword(Kw::Type), _) => {
                let kw = self.bump();
                let name = self.eat_upper_ident("type parameter name (uppercase identifier)")?;
                Ok(self.tree.add_node(NodeKind::ParamFormal, vec![kw, name]))
            }
            _ => {
                let p = self.parse_param()?;
                Ok(self.tree.add_node(NodeKind::ParamFormal, vec![p]))
            }
        }
    }

    fn parse_arg_formals(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.require(OpenDelim(Paren), "`(`")?];
        if self.peek(0) != CloseDelim(Paren) {
            loop {
                let mut ach = vec![self.parse_type()?];
                ach.push(self.eat_lower_ident("argument name (lowercase identifier)")?);
                ch.push(self.tree.add_node(NodeKind::ArgFormal, ach));
                match self.try_eat(Comma) {
                    Some(c) => ch.push(c),
                    None => break,
                }
            }
        }
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        Ok(self.tree.add_node(NodeKind::ArgFormals, ch))
    }

    fn parse_args(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.require(OpenDelim(Paren), "`(`")?];
        if self.peek(0) != CloseDelim(Paren) {
            loop {
                ch.push(self.parse_expression()?);
                match self.try_eat(Comma) {
                    Some(c) => ch.push(c),
                    None => break,
                }
            }
        }
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        Ok(self.tree.add_node(NodeKind::Args, ch))
    }

    // ------------------------------------------------------------------
    // Functions and modules

    fn parse_function_def(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // function
        ch.push(self.parse_type()?);
        let mut idch = vec![self.eat_lower_ident("function name (lowercase identifier)")?];
        if self.peek(0) == Hashtag {
            idch.push(self.parse_param_formals()?);
        }
        ch.push(self.tree.add_node(NodeKind::FunctionId, idch));
        if self.peek(0) == OpenDelim(Paren) {
            ch.push(self.parse_arg_formals()?);
        }
        if let Some(eq) = self.try_eat(Assign) {
            // Shorthand single-expression body.
            ch.push(eq);
            ch.push(self.parse_expression()?);
            ch.push(self.require(Semicolon, "`;`")?);
        } else {
            ch.push(self.require(Semicolon, "`;`")?);
            while self.peek(0) != Keyword(Kw::Endfunction) {
                if self.peek(0) == Eof {
                    self.error_expected("`endfunction`")?;
                }
                ch.push(self.parse_stmt()?);
            }
            ch.push(self.bump());
        }
        Ok(self.tree.add_node(NodeKind::FunctionDef, ch))
    }

    fn parse_module_def(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // module
        let mut idch = vec![self.eat_upper_ident("module name (uppercase identifier)")?];
        if self.peek(0) == Hashtag {
            idch.push(self.parse_param_formals()?);
        }
        ch.push(self.tree.add_node(NodeKind::ModuleId, idch));
        if self.peek(0) == OpenDelim(Paren) {
            ch.push(self.parse_arg_formals()?);
        }
        ch.push(self.require(Semicolon, "`;`")?);
        while self.peek(0) != Keyword(Kw::Endmodule) {
            if self.peek(0) == Eof {
                self.error_expected("`endmodule`")?;
            }
            let stmt = self.parse_module_stmt()?;
            ch.push(self.tree.add_node(NodeKind::ModuleStmt, vec![stmt]));
        }
        ch.push(self.bump());
        Ok(self.tree.add_node(NodeKind::ModuleDef, ch))
    }

    fn parse_module_stmt(&mut self) -> ReportedResult<NodeId> {
        match self.peek(0) {
            Keyword(Kw::Input) => self.parse_input_def(),
            Keyword(Kw::Method) => self.parse_method_def(),
            Keyword(Kw::Rule) => self.parse_rule_def(),
            UpperIdent(_) if self.looks_like_submodule_decl() => self.parse_submodule_decl(),
            _ => self.parse_stmt(),
        }
    }

    /// Decide between a submodule declaration (`Type name;` or
    /// `Type name(args);`) and an ordinary variable binding statement
    /// (`Type name = e, …;`). Plain declarations without an initializer
    /// count as submodules.
    fn looks_like_submodule_decl(&self) -> bool {
        let mut i = match self.scan_type(0) {
            Some(i) => i,
            None => return false,
        };
        match self.peek(i) {
            LowerIdent(_) => i += 1,
            _ => return false,
        }
        match self.peek(i) {
            Semicolon | OpenDelim(Paren) => true,
            _ => false,
        }
    }

    /// Token-level scan over a type (`Upper` possibly followed by a
    /// balanced `#(…)`), returning the offset just past it.
    fn scan_type(&self, mut i: usize) -> Option<usize> {
        match self.peek(i) {
            UpperIdent(_) => i += 1,
            _ => return None,
        }
        if self.peek(i) == Hashtag && self.peek(i + 1) == OpenDelim(Paren) {
            i += 2;
            let mut depth = 1;
            while depth > 0 {
                match self.peek(i) {
                    OpenDelim(Paren) => depth += 1,
                    CloseDelim(Paren) => depth -= 1,
                    Eof => return None,
                    _ => {}
                }
                i += 1;
            }
        }
        Some(i)
    }

    fn parse_submodule_decl(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.parse_type()?];
        ch.push(self.eat_lower_ident("submodule name (lowercase identifier)")?);
        if self.peek(0) == OpenDelim(Paren) {
            ch.push(self.parse_args()?);
        }
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::SubmoduleDecl, ch))
    }

    fn parse_input_def(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // input
        ch.push(self.parse_type()?);
        ch.push(self.eat_lower_ident("input name (lowercase identifier)")?);
        if let Some(kw) = self.try_eat(Keyword(Kw::Default)) {
            ch.push(kw);
            ch.push(self.require(Assign, "`=`")?);
            ch.push(self.parse_expression()?);
        }
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::InputDef, ch))
    }

    fn parse_method_def(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // method
        ch.push(self.parse_type()?);
        ch.push(self.eat_lower_ident("method name (lowercase identifier)")?);
        if self.peek(0) == OpenDelim(Paren) {
            ch.push(self.parse_arg_formals()?);
        }
        if let Some(eq) = self.try_eat(Assign) {
            ch.push(eq);
            ch.push(self.parse_expression()?);
            ch.push(self.require(Semicolon, "`;`")?);
        } else {
            ch.push(self.require(Semicolon, "`;`")?);
            while self.peek(0) != Keyword(Kw::Endmethod) {
                if self.peek(0) == Eof {
                    self.error_expected("`endmethod`")?;
                }
                ch.push(self.parse_stmt()?);
            }
            ch.push(self.bump());
        }
        Ok(self.tree.add_node(NodeKind::MethodDef, ch))
    }

    fn parse_rule_def(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // rule
        ch.push(self.eat_lower_ident("rule name (lowercase identifier)")?);
        ch.push(self.require(Semicolon, "`;`")?);
        while self.peek(0) != Keyword(Kw::Endrule) {
            if self.peek(0) == Eof {
                self.error_expected("`endrule`")?;
            }
            ch.push(self.parse_stmt()?);
        }
        ch.push(self.bump());
        Ok(self.tree.add_node(NodeKind::RuleDef, ch))
    }

    // ------------------------------------------------------------------
    // Statements

    fn parse_stmt(&mut self) -> ReportedResult<NodeId> {
        let inner = match self.peek(0) {
            Keyword(Kw::Let) => self.parse_let_binding()?,
            Keyword(Kw::Begin) => self.parse_begin_end_block()?,
            Keyword(Kw::If) => self.parse_if_stmt()?,
            Keyword(Kw::Case) => self.parse_case_stmt()?,
            Keyword(Kw::For) => self.parse_for_stmt()?,
            Keyword(Kw::Return) => self.parse_return_stmt()?,
            UpperIdent(_) => self.parse_var_binding()?,
            OpenDelim(Brace) => self.parse_var_assign_unpack()?,
            LowerIdent(_) | DollarIdent(_) => match self.scan_lvalue_stmt() {
                Some(LvalueStmt::Assign) => self.parse_var_assign()?,
                Some(LvalueStmt::RegWrite) => self.parse_reg_write()?,
                None => self.parse_expr_stmt()?,
            },
            _ => self.parse_expr_stmt()?,
        };
        Ok(self.tree.add_node(NodeKind::Stmt, vec![inner]))
    }

    fn parse_let_binding(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // let
        loop {
            ch.push(self.eat_lower_ident("variable name (lowercase identifier)")?);
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        if let Some(eq) = self.try_eat(Assign) {
            ch.push(eq);
            ch.push(self.parse_expression()?);
        }
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::LetBinding, ch))
    }

    fn parse_var_binding(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.parse_type()?];
        loop {
            let mut vch = vec![self.eat_lower_ident("variable name (lowercase identifier)")?];
            if let Some(eq) = self.try_eat(Assign) {
                vch.push(eq);
                vch.push(self.parse_expression()?);
            }
            ch.push(self.tree.add_node(NodeKind::VarInit, vch));
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::VarBinding, ch))
    }

    /// Distinguish `lvalue = e;` and `lvalue <= e;` from an expression
    /// statement with a token-level scan, without building nodes.
    fn scan_lvalue_stmt(&self) -> Option<LvalueStmt> {
        let mut i = 0;
        match self.peek(i) {
            LowerIdent(_) => i += 1,
            _ => return None,
        }
        loop {
            match self.peek(i) {
                Period => match self.peek(i + 1) {
                    LowerIdent(_) => i += 2,
                    _ => return None,
                },
                OpenDelim(Brack) => {
                    i += 1;
                    let mut depth = 1;
                    while depth > 0 {
                        match self.peek(i) {
                            OpenDelim(Brack) => depth += 1,
                            CloseDelim(Brack) => depth -= 1,
                            Eof => return None,
                            _ => {}
                        }
                        i += 1;
                    }
                }
                Assign => return Some(LvalueStmt::Assign),
                Operator(Op::Leq) => return Some(LvalueStmt::RegWrite),
                _ => return None,
            }
        }
    }

    fn parse_lvalue(&mut self) -> ReportedResult<NodeId> {
        let name = self.eat_lower_ident("variable name (lowercase identifier)")?;
        let mut lv = self.tree.add_node(NodeKind::SimpleLvalue, vec![name]);
        loop {
            match self.peek(0) {
                Period => {
                    let dot = self.bump();
                    let member = self.eat_lower_ident("member name (lowercase identifier)")?;
                    lv = self
                        .tree
                        .add_node(NodeKind::MemberLvalue, vec![lv, dot, member]);
                }
                OpenDelim(Brack) => {
                    let open = self.bump();
                    let idx = self.parse_expression()?;
                    if let Some(colon) = self.try_eat(Colon) {
                        let lsb = self.parse_expression()?;
                        let close = self.require(CloseDelim(Brack), "`]`")?;
                        lv = self.tree.add_node(
                            NodeKind::SliceLvalue,
                            vec![lv, open, idx, colon, lsb, close],
                        );
                    } else {
                        let close = self.require(CloseDelim(Brack), "`]`")?;
                        lv = self
                            .tree
                            .add_node(NodeKind::IndexLvalue, vec![lv, open, idx, close]);
                    }
                }
                _ => return Ok(lv),
            }
        }
    }

    fn parse_var_assign(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.parse_lvalue()?];
        ch.push(self.require(Assign, "`=`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::VarAssign, ch))
    }

    fn parse_var_assign_unpack(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // {
        loop {
            ch.push(self.parse_lvalue()?);
            match self.try_eat(Comma) {
                Some(c) => ch.push(c),
                None => break,
            }
        }
        ch.push(self.require(CloseDelim(Brace), "`}`")?);
        ch.push(self.require(Assign, "`=`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::VarAssign, ch))
    }

    fn parse_reg_write(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.parse_lvalue()?];
        ch.push(self.require(Operator(Op::Leq), "`<=`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::RegWrite, ch))
    }

    fn parse_begin_end_block(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // begin
        while self.peek(0) != Keyword(Kw::End) {
            if self.peek(0) == Eof {
                self.error_expected("`end`")?;
            }
            ch.push(self.parse_stmt()?);
        }
        ch.push(self.bump());
        Ok(self.tree.add_node(NodeKind::BeginEndBlock, ch))
    }

    fn parse_if_stmt(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // if
        ch.push(self.require(OpenDelim(Paren), "`(`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        ch.push(self.parse_stmt()?);
        if let Some(kw) = self.try_eat(Keyword(Kw::Else)) {
            ch.push(kw);
            ch.push(self.parse_stmt()?);
        }
        Ok(self.tree.add_node(NodeKind::IfStmt, ch))
    }

    fn parse_case_stmt(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // case
        ch.push(self.require(OpenDelim(Paren), "`(`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        while self.peek(0) != Keyword(Kw::Endcase) {
            if self.peek(0) == Eof {
                self.error_expected("`endcase`")?;
            }
            if self.peek(0) == Keyword(Kw::Default) {
                let mut ich = vec![self.bump()];
                if let Some(c) = self.try_eat(Colon) {
                    ich.push(c);
                }
                ich.push(self.parse_stmt()?);
                ch.push(self.tree.add_node(NodeKind::CaseStmtDefaultItem, ich));
            } else {
                let mut ich = Vec::new();
                loop {
                    ich.push(self.parse_expression()?);
                    match self.try_eat(Comma) {
                        Some(c) => ich.push(c),
                        None => break,
                    }
                }
                ich.push(self.require(Colon, "`:`")?);
                ich.push(self.parse_stmt()?);
                ch.push(self.tree.add_node(NodeKind::CaseStmtItem, ich));
            }
        }
        ch.push(self.bump());
        Ok(self.tree.add_node(NodeKind::CaseStmt, ch))
    }

    fn parse_for_stmt(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // for
        ch.push(self.require(OpenDelim(Paren), "`(`")?);
        ch.push(self.parse_type()?);
        ch.push(self.eat_lower_ident("induction variable (lowercase identifier)")?);
        ch.push(self.require(Assign, "`=`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(Semicolon, "`;`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(Semicolon, "`;`")?);
        ch.push(self.eat_lower_ident("induction variable (lowercase identifier)")?);
        ch.push(self.require(Assign, "`=`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        ch.push(self.parse_stmt()?);
        Ok(self.tree.add_node(NodeKind::ForStmt, ch))
    }

    fn parse_return_stmt(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // return
        ch.push(self.parse_expression()?);
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::ReturnStmt, ch))
    }

    fn parse_expr_stmt(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.parse_expression()?];
        ch.push(self.require(Semicolon, "`;`")?);
        Ok(self.tree.add_node(NodeKind::ExprStmt, ch))
    }

    // ------------------------------------------------------------------
    // Expressions

    fn parse_expression(&mut self) -> ReportedResult<NodeId> {
        if self.peek(0) == Keyword(Kw::Case) {
            return self.parse_case_expr();
        }
        let cond = self.parse_binop_expr(0)?;
        if self.peek(0) == Ternary {
            let q = self.bump();
            let then_expr = self.parse_expression()?;
            let colon = self.require(Colon, "`:`")?;
            let else_expr = self.parse_expression()?;
            return Ok(self.tree.add_node(
                NodeKind::CondExpr,
                vec![cond, q, then_expr, colon, else_expr],
            ));
        }
        Ok(cond)
    }

    fn parse_case_expr(&mut self) -> ReportedResult<NodeId> {
        let mut ch = vec![self.bump()]; // case
        ch.push(self.require(OpenDelim(Paren), "`(`")?);
        ch.push(self.parse_expression()?);
        ch.push(self.require(CloseDelim(Paren), "`)`")?);
        while self.peek(0) != Keyword(Kw::Endcase) {
            if self.peek(0) == Eof {
                self.error_expected("`endcase`")?;
            }
            let mut ich = Vec::new();
            if self.peek(0) == Keyword(Kw::Default) {
                ich.push(self.bump());
            } else {
                loop {
                    ich.push(self.parse_expr_primary()?);
                    match self.try_eat(Comma) {
                        Some(c) => ich.push(c),
                        None => break,
                    }
                }
            }
            ich.push(self.require(Colon, "`:`")?);
            ich.push(self.parse_expression()?);
            ich.push(self.require(Semicolon, "`;`")?);
            ch.push(self.tree.add_node(NodeKind::CaseExprItem, ich));
        }
        ch.push(self.bump());
        Ok(self.tree.add_node(NodeKind::CaseExpr, ch))
    }

    fn parse_binop_expr(&mut self, min_prec: u8) -> ReportedResult<NodeId> {
        let mut left = self.parse_unop_expr()?;
        loop {
            let op = match self.peek(0) {
                Operator(op) => op,
                _ => return Ok(left),
            };
            let prec = match op.binary_prec() {
                Some(p) if p >= min_prec => p,
                _ => return Ok(left),
            };
            let op_tok = self.bump();
            let right = self.parse_binop_expr(prec + 1)?;
            left = self
                .tree
                .add_node(NodeKind::BinopExpr, vec![left, op_tok, right]);
        }
    }

    fn parse_unop_expr(&mut self) -> ReportedResult<NodeId> {
        match self.peek(0) {
            Operator(op) if op.is_unary() => {
                let op_tok = self.bump();
                let arg = self.parse_expr_primary()?;
                Ok(self.tree.add_node(NodeKind::UnopExpr, vec![op_tok, arg]))
            }
            _ => self.parse_expr_primary(),
        }
    }

    fn parse_expr_primary(&mut self) -> ReportedResult<NodeId> {
        let mut expr = match self.peek(0) {
            OpenDelim(Paren) => {
                let open = self.bump();
                let inner = self.parse_expression()?;
                let close = self.require(CloseDelim(Paren), "`)`")?;
                self.tree
                    .add_node(NodeKind::ParenExpr, vec![open, inner, close])
            }
            IntLiteral(_) => {
                let t = self.bump();
                self.tree.add_node(NodeKind::IntLiteral, vec![t])
            }
            StringLiteral(_) => {
                let t = self.bump();
                self.tree.add_node(NodeKind::StringLiteral, vec![t])
            }
            Ternary => {
                let t = self.bump();
                self.tree.add_node(NodeKind::UndefinedExpr, vec![t])
            }
            OpenDelim(Brace) => {
                let mut ch = vec![self.bump()];
                loop {
                    ch.push(self.parse_expression()?);
                    match self.try_eat(Comma) {
                        Some(c) => ch.push(c),
                        None => break,
                    }
                }
                ch.push(self.require(CloseDelim(Brace), "`}`")?);
                self.tree.add_node(NodeKind::BitConcat, ch)
            }
            UpperIdent(_) if self.looks_like_struct_expr() => {
                let ty = self.parse_type()?;
                let mut ch = vec![ty, self.bump()]; // type {
                if self.peek(0) != CloseDelim(Brace) {
                    loop {
                        let mut mch =
                            vec![self.eat_lower_ident("member name (lowercase identifier)")?];
                        mch.push(self.require(Colon, "`:`")?);
                        mch.push(self.parse_expression()?);
                        ch.push(self.tree.add_node(NodeKind::MemberBind, mch));
                        match self.try_eat(Comma) {
                            Some(c) => ch.push(c),
                            None => break,
                        }
                    }
                }
                ch.push(self.require(CloseDelim(Brace), "`}`")?);
                self.tree.add_node(NodeKind::StructExpr, ch)
            }
            LowerIdent(_) | UpperIdent(_) | DollarIdent(_) => {
                let ident = self.eat_any_ident("identifier")?;
                let mut ch = vec![ident];
                if self.peek(0) == Hashtag && self.peek(1) == OpenDelim(Paren) {
                    ch.push(self.parse_params()?);
                }
                self.tree.add_node(NodeKind::VarExpr, ch)
            }
            _ => {
                self.error_expected("expression")?;
                unreachable!()
            }
        };

        // Postfix operators: member access, indexing/slicing, calls.
        loop {
            match self.peek(0) {
                Period => {
                    let dot = self.bump();
                    let field = self.eat_lower_ident("member name (lowercase identifier)")?;
                    expr = self
                        .tree
                        .add_node(NodeKind::MemberExpr, vec![expr, dot, field]);
                }
                OpenDelim(Brack) => {
                    let open = self.bump();
                    let msb = self.parse_expression()?;
                    if let Some(colon) = self.try_eat(Colon) {
                        let lsb = self.parse_expression()?;
                        let close = self.require(CloseDelim(Brack), "`]`")?;
                        expr = self.tree.add_node(
                            NodeKind::SliceExpr,
                            vec![expr, open, msb, colon, lsb, close],
                        );
                    } else {
                        let close = self.require(CloseDelim(Brack), "`]`")?;
                        expr = self
                            .tree
                            .add_node(NodeKind::IndexExpr, vec![expr, open, msb, close]);
                    }
                }
                OpenDelim(Paren) => {
                    let mut ch = vec![expr, self.bump()];
                    if self.peek(0) != CloseDelim(Paren) {
                        loop {
                            ch.push(self.parse_expression()?);
                            match self.try_eat(Comma) {
                                Some(c) => ch.push(c),
                                None => break,
                            }
                        }
                    }
                    ch.push(self.require(CloseDelim(Paren), "`)`")?);
                    expr = self.tree.add_node(NodeKind::CallExpr, ch);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn looks_like_struct_expr(&self) -> bool {
        match self.scan_type(0) {
            Some(i) => self.peek(i) == OpenDelim(Brace),
            None => false,
        }
    }
}

enum LvalueStmt {
    Assign,
    RegWrite,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::tree::{walk, Listener};
    use minispec_common::Session;

    fn parse_str(name: &str, input: &str) -> (Tree, ast::PackageDef) {
        let sm = get_source_manager();
        let src = sm.add(name, input);
        let sess = Session::new();
        let mut tree = Tree::new();
        let pkg = parse(src, &mut tree, &sess).expect("parse failed");
        assert!(!sess.failed());
        (tree, pkg)
    }

    struct KindCounter {
        kind: NodeKind,
        count: usize,
    }

    impl Listener for KindCounter {
        fn enter(&mut self, tree: &Tree, node: minispec_common::NodeId) {
            if tree.kind(node) == self.kind {
                self.count += 1;
            }
        }
    }

    fn count_kind(tree: &Tree, root: minispec_common::NodeId, kind: NodeKind) -> usize {
        let mut counter = KindCounter {
            kind: kind,
            count: 0,
        };
        walk(&mut counter, tree, root);
        counter.count
    }

    #[test]
    fn function_shorthand() {
        let (tree, pkg) = parse_str("p1.ms", "function Integer f = (1 + 2) * 3;\n");
        let stmts = pkg.stmts(&tree);
        assert_eq!(stmts.len(), 1);
        let f = stmts[0].function_def(&tree).unwrap();
        assert_eq!(tree.text(f.function_id(&tree).name(&tree)), "f");
        assert_eq!(count_kind(&tree, f.id(), NodeKind::BinopExpr), 2);
    }

    #[test]
    fn module_with_everything() {
        let (tree, pkg) = parse_str(
            "p2.ms",
            "module Counter;\n\
             \x20 Reg#(Bit#(8)) count(0);\n\
             \x20 input Bool enable default = True;\n\
             \x20 method Bit#(8) value = count;\n\
             \x20 rule tick;\n\
             \x20   if (enable) count <= count + 1;\n\
             \x20 endrule\n\
             endmodule\n",
        );
        let m = pkg.stmts(&tree)[0].module_def(&tree).unwrap();
        assert_eq!(tree.text(m.module_id(&tree).name(&tree)), "Counter");
        let stmts = m.stmts(&tree);
        assert_eq!(stmts.len(), 4);
        assert!(stmts[0].submodule_decl(&tree).is_some());
        assert!(stmts[1].input_def(&tree).is_some());
        assert!(stmts[2].method_def(&tree).is_some());
        assert!(stmts[3].rule_def(&tree).is_some());
    }

    #[test]
    fn parametric_typedef() {
        let (tree, pkg) = parse_str("p3.ms", "typedef Bit#(n) MyBit#(Integer n);\n");
        let td = pkg.stmts(&tree)[0].type_def_synonym(&tree).unwrap();
        let id = td.type_id(&tree);
        assert_eq!(tree.text(id.name(&tree)), "MyBit");
        let formals = id.param_formals(&tree).unwrap().formals(&tree);
        assert_eq!(formals.len(), 1);
        assert!(formals[0].int_name(&tree).is_some());
    }

    #[test]
    fn for_loop_shape() {
        let (tree, pkg) = parse_str(
            "p4.ms",
            "function Bit#(4) g;\n\
             \x20 Bit#(4) x = 0;\n\
             \x20 for (Integer i = 0; i < 4; i = i + 1) x[i] = 1;\n\
             \x20 return x;\n\
             endfunction\n",
        );
        let f = pkg.stmts(&tree)[0].function_def(&tree).unwrap();
        assert_eq!(count_kind(&tree, f.id(), NodeKind::ForStmt), 1);
        struct Find(Option<minispec_common::NodeId>);
        impl Listener for Find {
            fn enter(&mut self, tree: &Tree, node: minispec_common::NodeId) {
                if tree.kind(node) == NodeKind::ForStmt {
                    self.0 = Some(node);
                }
            }
        }
        let mut find = Find(None);
        walk(&mut find, &tree, f.id());
        let fs = ast::ForStmt(find.0.unwrap());
        assert_eq!(tree.text(fs.init_var(&tree)), "i");
        assert_eq!(tree.text(fs.upd_var(&tree)), "i");
        assert_eq!(fs.exprs(&tree).len(), 3);
    }

    #[test]
    fn verbatim_roundtrip() {
        let input = "function Bool id(Bool x);\n  // comment\n  return x;  // trailing\nendfunction\n";
        let (tree, pkg) = parse_str("p5.ms", input);
        // Re-emitting all tokens with the inter-child gaps must reproduce
        // the file byte for byte.
        fn emit(tree: &Tree, node: minispec_common::NodeId, out: &mut String) {
            let children = tree.children(node);
            if children.is_empty() {
                if let Some(t) = tree.token(node) {
                    out.push_str(&t.spelling());
                }
                return;
            }
            for (i, &c) in children.iter().enumerate() {
                if i > 0 {
                    out.push_str(&tree.gap_text(children[i - 1], c));
                }
                emit(tree, c, out);
            }
        }
        let mut out = String::new();
        emit(&tree, pkg.id(), &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn ternary_and_case_expr() {
        let (tree, pkg) = parse_str(
            "p6.ms",
            "function Integer f = True ? 1 : 2;\n\
             function Bit#(2) h(Bit#(2) v) = case (v) 0: 1; default: 0; endcase;\n",
        );
        let stmts = pkg.stmts(&tree);
        assert_eq!(count_kind(&tree, stmts[0].id(), NodeKind::CondExpr), 1);
        assert_eq!(count_kind(&tree, stmts[1].id(), NodeKind::CaseExpr), 1);
        assert_eq!(count_kind(&tree, stmts[1].id(), NodeKind::CaseExprItem), 2);
    }
}

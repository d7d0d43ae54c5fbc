// Copyright (c) 2021 The Minispec Authors

//! Lexer, parser, and homogeneous parse tree for the Minispec language.
//!
//! The parse tree is deliberately generic: every grammar rule yields a node
//! with a kind, a span, and ordered children, and terminals are token
//! leaves. Downstream passes attach values to nodes through side tables
//! keyed by `NodeId` and re-emit unmodified regions verbatim, including the
//! whitespace and comments between children.

#[macro_use]
extern crate log;

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod tree;

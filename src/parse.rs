// Copyright (c) 2021 The Minispec Authors

//! Parsing of a root file and its transitive imports.
//!
//! Imports resolve against a search path; files are parsed once, cycles are
//! detected, and the resulting parse trees are returned in topological
//! order so that imported files precede their importers.

use crate::common::errors::error_colored;
use crate::common::source::get_source_manager;
use crate::common::Session;
use crate::syntax::ast;
use crate::syntax::parser;
use crate::syntax::tree::Tree;
use std::collections::HashMap;
use std::path::Path;

fn report_fatal(sess: &Session, msg: String) -> Result<std::convert::Infallible, ()> {
    sess.report_err(&format!("{} {}", error_colored("error:"), msg), "", None);
    Err(())
}

struct ParsedFile {
    file_name: String,
    pkg: ast::PackageDef,
    imports: Vec<usize>,
}

/// Parse a single file without following imports.
pub fn parse_single_file(
    sess: &Session,
    tree: &mut Tree,
    file_name: &str,
) -> Result<ast::PackageDef, ()> {
    let sm = get_source_manager();
    let source = match sm.open(file_name) {
        Some(s) => s,
        None => {
            report_fatal(sess, format!("Could not read source file {}", file_name))?;
            unreachable!()
        }
    };
    match parser::parse(source, tree, sess) {
        Ok(pkg) => Ok(pkg),
        Err(()) => {
            report_fatal(sess, format!("could not parse file {}", file_name))?;
            unreachable!()
        }
    }
}

fn find_imported_file(
    sess: &Session,
    import_name: &str,
    importer: &str,
    path: &[String],
) -> Result<String, ()> {
    let file_name = format!("{}.ms", import_name);
    for dir in path {
        let full = Path::new(dir).join(&file_name);
        if full.exists() {
            return Ok(full.to_string_lossy().into_owned());
        }
    }
    report_fatal(
        sess,
        format!(
            "Could not find import {} from parsed file {}",
            file_name, importer
        ),
    )?;
    unreachable!()
}

fn parse_recursive(
    sess: &Session,
    tree: &mut Tree,
    files: &mut Vec<ParsedFile>,
    by_name: &mut HashMap<String, usize>,
    file_name: &str,
    path: &[String],
) -> Result<usize, ()> {
    if let Some(&idx) = by_name.get(file_name) {
        return Ok(idx);
    }
    let pkg = parse_single_file(sess, tree, file_name)?;
    let idx = files.len();
    files.push(ParsedFile {
        file_name: file_name.to_string(),
        pkg: pkg,
        imports: Vec::new(),
    });
    by_name.insert(file_name.to_string(), idx);

    let mut import_names = Vec::new();
    for stmt in pkg.stmts(tree) {
        if let Some(imp) = stmt.import_decl(tree) {
            for item in imp.identifiers(tree) {
                import_names.push(tree.text(item));
            }
        }
    }
    for name in import_names {
        let import_file = find_imported_file(sess, &name, file_name, path)?;
        let imported = parse_recursive(sess, tree, files, by_name, &import_file, path)?;
        files[idx].imports.push(imported);
    }
    Ok(idx)
}

fn topo_sort(
    sess: &Session,
    files: &[ParsedFile],
    idx: usize,
    trail: &mut Vec<usize>,
    out: &mut Vec<usize>,
) -> Result<(), ()> {
    if let Some(pos) = trail.iter().position(|&i| i == idx) {
        let mut ss = String::new();
        for &i in &trail[pos..] {
            ss.push_str(&files[i].file_name);
            ss.push_str(" -> ");
        }
        ss.push_str(&files[idx].file_name);
        report_fatal(sess, format!("import cycle detected: {}", ss))?;
    }
    if out.contains(&idx) {
        return Ok(());
    }
    trail.push(idx);
    let imports = files[idx].imports.clone();
    for i in imports {
        topo_sort(sess, files, i, trail, out)?;
    }
    trail.pop();
    out.push(idx);
    Ok(())
}

/// Parse a file and all the files it transitively imports. Returns the
/// parse trees sorted topologically, imported files first. Fails on the
/// first lexer or parser error.
pub fn parse_file_and_imports(
    sess: &Session,
    tree: &mut Tree,
    file_name: &str,
    path: &[String],
) -> Result<Vec<ast::PackageDef>, ()> {
    let mut files = Vec::new();
    let mut by_name = HashMap::new();
    let root = parse_recursive(sess, tree, &mut files, &mut by_name, file_name, path)?;

    let mut order = Vec::new();
    topo_sort(sess, &files, root, &mut Vec::new(), &mut order)?;
    debug!(
        "parsed {} files, root {}",
        files.len(),
        files[root].file_name
    );
    Ok(order.into_iter().map(|i| files[i].pkg).collect())
}

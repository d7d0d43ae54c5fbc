// Copyright (c) 2021 The Minispec Authors

//! End-to-end tests for the translation of BSV compiler diagnostics back
//! to Minispec locations and phrasing.

use minispec::common::source::get_source_manager;
use minispec::common::Session;
use minispec::diag::report_bluespec_output;
use minispec::report::loc_str;
use minispec::syntax::parser;
use minispec::syntax::tree::Tree;
use minispec::translate::{translate_files, ElabLimits, SourceMap};

fn setup(name: &str, input: &str) -> (Tree, SourceMap) {
    let sm = get_source_manager();
    let src = sm.add(name, input);
    let sess = Session::new();
    let mut tree = Tree::new();
    let pkg = parser::parse(src, &mut tree, &sess).expect("parse failed");
    let map = translate_files(&sess, &tree, &[pkg], "", ElabLimits::default())
        .expect("translation failed");
    (tree, map)
}

/// 1-based line and column of the first occurrence of `needle` in `code`.
fn find_line_col(code: &str, needle: &str) -> (usize, usize) {
    let pos = code.find(needle).expect("needle not in code");
    let mut line = 1;
    let mut col = 1;
    for b in code[..pos].bytes() {
        if b == b'\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[test]
fn unbound_variable_location_translates() {
    let (tree, map) = setup("d1.ms", "function Bool g = mystery;\n");
    let (line, col) = find_line_col(map.code(), "mystery");

    // The emitted span maps back to the Minispec use site.
    let node = map.find(line, col).expect("no node at location");
    assert_eq!(loc_str(&tree, node), "d1.ms:1:19");

    let sess = Session::new();
    let bsc = format!(
        "Error: \"Translated.bsv\", line {}, column {}: (T0004)\n  Unbound variable `mystery'\n",
        line, col
    );
    report_bluespec_output(&sess, &tree, &bsc, &map, "");
    assert!(sess.failed());
    assert_eq!(sess.error_count(), 1);

    // An exact repeat of the same bsc output is dropped entirely.
    report_bluespec_output(&sess, &tree, &bsc, &map, "");
    assert_eq!(sess.error_count(), 1);
}

#[test]
fn same_node_errors_are_coalesced_unless_all_errors() {
    let (tree, map) = setup("d2.ms", "function Bool g = other;\n");
    let (line, col) = find_line_col(map.code(), "other");

    let ev1 = format!(
        "Error: \"Translated.bsv\", line {}, column {}: (T0004)\n  Unbound variable `other'\n",
        line, col
    );
    let ev2 = format!(
        "Error: \"Translated.bsv\", line {}, column {}: (T0007)\n  Unbound type constructor `other'\n",
        line, col
    );

    // By default, a second distinct message on the same node is counted but
    // not printed.
    let sess = Session::new();
    report_bluespec_output(&sess, &tree, &ev1, &map, "");
    report_bluespec_output(&sess, &tree, &ev2, &map, "");
    assert_eq!(sess.error_count(), 2);
    assert_eq!(sess.printed_error_count(), 1);

    // With --all-errors, both are printed.
    let mut sess = Session::new();
    sess.opts.report_all_errors = true;
    report_bluespec_output(&sess, &tree, &ev1, &map, "");
    report_bluespec_output(&sess, &tree, &ev2, &map, "");
    assert_eq!(sess.error_count(), 2);
    assert_eq!(sess.printed_error_count(), 2);
}

#[test]
fn unknown_file_locations_pass_through() {
    let (tree, map) = setup("d3.ms", "function Bool g = True;\n");
    let sess = Session::new();
    let bsc = "Error: \"Other.bsv\", line 3, column 7: (T0004)\n  Unbound variable `foo'\n";
    report_bluespec_output(&sess, &tree, bsc, &map, "");
    // Still an error, just not translated.
    assert!(sess.failed());
    assert_eq!(sess.error_count(), 1);
}

#[test]
fn warnings_do_not_fail_the_session() {
    let (tree, map) = setup("d4.ms", "function Bool g = True;\n");
    let sess = Session::new();
    let bsc = "Warning: \"Translated.bsv\", line 1, column 1: (G0010)\n  Rule shadowing\n";
    report_bluespec_output(&sess, &tree, bsc, &map, "");
    assert!(!sess.failed());
    assert_eq!(sess.warning_count(), 1);
}

#[test]
fn missing_top_level_special_case() {
    let (tree, map) = setup("d5.ms", "function Bool g = True;\n");
    let sess = Session::new();
    let bsc = "Error: Command line: (S0008)\n  Unbound variable `mkGadget'\n";
    report_bluespec_output(&sess, &tree, bsc, &map, "Gadget");
    assert!(sess.failed());
    assert_eq!(sess.error_count(), 1);
}

#[test]
fn untranslatable_location_falls_back() {
    let (_tree, map) = setup("d6.ms", "function Bool g = True;\n");
    // Column 2 of a span start is not a recorded range beginning.
    assert_eq!(map.find(100000, 1), None);
}

// Copyright (c) 2021 The Minispec Authors

//! End-to-end elaboration tests: parse Minispec source from virtual files
//! and check the translated BSV output and its source map.

use minispec::common::source::get_source_manager;
use minispec::common::Session;
use minispec::syntax::parser;
use minispec::syntax::tree::Tree;
use minispec::translate::{translate_files, ElabLimits, SourceMap};

fn try_translate(name: &str, input: &str, top: &str) -> (Session, Result<SourceMap, ()>) {
    let sm = get_source_manager();
    let src = sm.add(name, input);
    let sess = Session::new();
    let mut tree = Tree::new();
    let pkg = parser::parse(src, &mut tree, &sess).expect("parse failed");
    let res = translate_files(&sess, &tree, &[pkg], top, ElabLimits::default());
    (sess, res)
}

fn translate_ok(name: &str, input: &str, top: &str) -> SourceMap {
    let (sess, res) = try_translate(name, input, top);
    let sm = res.expect("translation failed");
    assert!(!sess.failed());
    sm
}

/// 1-based line and column of a byte offset in the emitted code.
fn line_col(code: &str, pos: usize) -> (usize, usize) {
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
fn constant_folding() {
    let sm = translate_ok("fold.ms", "function Integer f = (1 + 2) * 3;\n", "");
    assert!(sm.code().contains("function Integer f = 9;"));
    assert!(!sm.code().contains("(1 + 2)"));
}

#[test]
fn folding_covers_the_operator_zoo() {
    let sm = translate_ok(
        "ops.ms",
        "function Integer a = 2 ** 10;\n\
         function Integer b = 7 / 0;\n\
         function Integer c = 7 % 0;\n\
         function Integer d = (1 << 6) | 1;\n\
         function Integer e = log2(1024);\n\
         function Integer g = -(~0);\n\
         function Integer h = True && False ? 1 : 2;\n",
        "",
    );
    let code = sm.code();
    assert!(code.contains("function Integer a = 1024;"));
    assert!(code.contains("function Integer b = 0;"));
    assert!(code.contains("function Integer c = 0;"));
    assert!(code.contains("function Integer d = 65;"));
    assert!(code.contains("function Integer e = 10;"));
    assert!(code.contains("function Integer g = 1;"));
    assert!(code.contains("function Integer h = 2;"));
}

#[test]
fn for_unrolling() {
    let sm = translate_ok(
        "unroll.ms",
        "function Bit#(4) g;\n\
         \x20 Bit#(4) x = 0;\n\
         \x20 for (Integer i = 0; i < 4; i = i + 1)\n\
         \x20   x[i] = 1;\n\
         \x20 return x;\n\
         endfunction\n",
        "",
    );
    let code = sm.code();
    for i in 0..4 {
        assert!(
            code.contains(&format!("x[{}] = 1;", i)),
            "missing unrolled iteration {}:\n{}",
            i,
            code
        );
    }
    assert_eq!(code.matches("begin ").count(), 4);

    // Each unrolled body is tagged with an info string naming the loop
    // location and the iteration value.
    let pos = code.find("x[2]").unwrap();
    let (line, col) = line_col(code, pos);
    let info = sm.context_info(line, col);
    assert!(info.contains("for loop in"), "info was: {:?}", info);
    assert!(info.contains("i = 2"), "info was: {:?}", info);
}

#[test]
fn if_specialization() {
    let sm = translate_ok(
        "ifspec.ms",
        "function Bit#(2) f(Bool c);\n\
         \x20 Bit#(2) x = 0;\n\
         \x20 if (True) x = 1; else x = 2;\n\
         \x20 return x;\n\
         endfunction\n",
        "",
    );
    let code = sm.code();
    assert!(code.contains("/* taken if */"));
    assert!(code.contains("begin x = 1; end"));
    assert!(!code.contains("x = 2"));
}

#[test]
fn else_specialization() {
    let sm = translate_ok(
        "elsespec.ms",
        "function Bit#(2) f(Bool c);\n\
         \x20 Bit#(2) x = 0;\n\
         \x20 if (1 > 2) x = 1; else x = 2;\n\
         \x20 return x;\n\
         endfunction\n",
        "",
    );
    let code = sm.code();
    assert!(code.contains("/* taken else */"));
    assert!(code.contains("begin x = 2; end"));
    assert!(!code.contains("x = 1;"));
}

#[test]
fn parametric_instantiation_is_idempotent() {
    let sm = translate_ok(
        "param.ms",
        "typedef Bit#(n) MyBit#(Integer n);\n\
         function MyBit#(8) h = 0;\n\
         function MyBit#(8) h2 = 1;\n",
        "",
    );
    let code = sm.code();
    // The specialization is emitted exactly once, with the escaped name.
    assert_eq!(code.matches("typedef Bit#(8) \\MyBit#(8) ;").count(), 1);
    // Both uses print the escaped specialized name.
    assert!(code.contains("function \\MyBit#(8)  h ="));
}

#[test]
fn parametric_function_specialization() {
    let sm = translate_ok(
        "pfunc.ms",
        "function Bit#(n) ones#(Integer n);\n\
         \x20 Bit#(n) x = ~0;\n\
         \x20 return x;\n\
         endfunction\n\
         function Bit#(4) user = ones#(4)();\n",
        "",
    );
    let code = sm.code();
    assert!(code.contains("function Bit#(4) \\ones#(4)"));
    // The generic template is not emitted.
    assert!(!code.contains("Bit#(n)"));
}

#[test]
fn poisoned_integer_reports_error() {
    let (sess, res) = try_translate(
        "poison.ms",
        "function Bit#(4) f(Bool cond);\n\
         \x20 Integer i = 1;\n\
         \x20 if (cond) i = 2;\n\
         \x20 Bit#(i) x = 0;\n\
         \x20 return x;\n\
         endfunction\n",
        "",
    );
    assert!(res.is_err());
    assert!(sess.failed());
    assert!(sess.error_count() >= 1);
}

#[test]
fn uninitialized_integer_reports_error() {
    let (sess, res) = try_translate(
        "uninit.ms",
        "function Bit#(4) f;\n\
         \x20 Integer i;\n\
         \x20 Bit#(i) x = 0;\n\
         \x20 return x;\n\
         endfunction\n",
        "",
    );
    assert!(res.is_err());
    assert!(sess.failed());
}

#[test]
fn module_rewrite_shape() {
    let sm = translate_ok(
        "mod.ms",
        "module Counter;\n\
         \x20 RegU#(Bit#(8)) count;\n\
         \x20 input Bool enable default = True;\n\
         \x20 method Bit#(8) value = count;\n\
         \x20 rule tick;\n\
         \x20   if (enable) count <= count + 1;\n\
         \x20 endrule\n\
         endmodule\n",
        "",
    );
    let code = sm.code();
    // Interface with one method per user method plus the input setter.
    assert!(code.contains("interface Counter;"));
    assert!(code.contains("method Bit#(8) value;"));
    assert!(code.contains("method Action enable___input(Bool value);"));
    assert!(code.contains("endinterface"));
    // Module body: submodule, input wire with default, attribute-wrapped
    // rule, method, and the input implementation.
    assert!(code.contains("module mkCounter(Counter);"));
    assert!(code.contains("RegU#(Bit#(8)) count <- mkRegU;"));
    assert!(code.contains("Wire#(Bool) enable <- mkDWire(True);"));
    assert!(code.contains("(* no_implicit_conditions, fire_when_enabled *)"));
    assert!(code.contains("enable <= value;"));
}

#[test]
fn input_without_default_uses_bypass_wire() {
    let sm = translate_ok(
        "mod2.ms",
        "module Echo;\n\
         \x20 input Bit#(8) in;\n\
         \x20 method Bit#(8) out = in;\n\
         endmodule\n",
        "",
    );
    assert!(sm.code().contains("Wire#(Bit#(8)) in <- mkBypassWire;"));
}

#[test]
fn input_wire_assignment_rewrite() {
    let sm = translate_ok(
        "wires.ms",
        "module Inner;\n\
         \x20 input Bool go default = False;\n\
         \x20 method Bool ready = go;\n\
         endmodule\n\
         module Outer;\n\
         \x20 Inner sub;\n\
         \x20 rule drive;\n\
         \x20   sub.go = True;\n\
         \x20 endrule\n\
         endmodule\n",
        "",
    );
    assert!(sm.code().contains("sub.go___input(True);"));
}

#[test]
fn vector_submodule_uses_replicate() {
    let sm = translate_ok(
        "vec.ms",
        "module Cell;\n\
         \x20 method Bool isSet = False;\n\
         endmodule\n\
         module Grid;\n\
         \x20 Vector#(4, Cell) cells;\n\
         endmodule\n",
        "",
    );
    assert!(sm
        .code()
        .contains("Vector#(4, Cell) cells <- replicateM(mkCell);"));
}

#[test]
fn enum_and_struct_derive() {
    let sm = translate_ok(
        "types.ms",
        "typedef enum {Red, Green, Blue} Color;\n\
         typedef struct { Bit#(8) x; Bit#(8) y; } Point;\n",
        "",
    );
    let code = sm.code();
    assert_eq!(code.matches(" deriving(Bits, Eq, FShow);").count(), 2);
}

#[test]
fn imports_rewrite() {
    let sm = translate_ok(
        "imp.ms",
        "bsvimport FIFO, GetPut;\nfunction Bool t = True;\n",
        "",
    );
    let code = sm.code();
    assert!(code.contains("import FIFO::*;"));
    assert!(code.contains("import GetPut::*;"));
}

#[test]
fn forbidden_identifiers() {
    for (name, src) in &[
        ("forbid1.ms", "function Bool mkThing = True;\n"),
        ("forbid2.ms", "function Bool wire = True;\n"),
        ("forbid3.ms", "function Bool valueOf = True;\n"),
    ] {
        let (sess, res) = try_translate(name, src, "");
        assert!(res.is_err(), "{} should be rejected", name);
        assert!(sess.failed());
    }
}

#[test]
fn integer_arguments_are_rejected() {
    let (sess, res) = try_translate(
        "intarg.ms",
        "function Bool f(Integer n) = True;\n",
        "",
    );
    assert!(res.is_err());
    assert!(sess.failed());
}

#[test]
fn top_level_parametric_gets_wrapper() {
    let sm = translate_ok(
        "top.ms",
        "module Queue#(Integer n);\n\
         \x20 method Bit#(8) size = 0;\n\
         endmodule\n",
        "Queue#(4)",
    );
    let code = sm.code();
    assert!(code.contains("// Top-level wrapper module"));
    assert!(code.contains("module mkTopLevel___( \\Queue#(4) );"));
    assert!(code.contains("\\Queue#(4) res <- \\mkQueue#(4) ;"));
    assert_eq!(sm.top_module(), "mkTopLevel___");
}

#[test]
fn missing_top_level_parametric_is_an_error() {
    let (sess, res) = try_translate(
        "notop.ms",
        "function Bool t = True;\n",
        "Nonexistent#(4)",
    );
    assert!(res.is_err());
    assert!(sess.failed());
}

#[test]
fn top_level_module_with_arguments_is_an_error() {
    let (sess, res) = try_translate(
        "argtop.ms",
        "module Thing(Bit#(8) seed);\n\
         \x20 method Bit#(8) get = seed;\n\
         endmodule\n",
        "Thing",
    );
    assert!(res.is_err());
    assert!(sess.failed());
}

#[test]
fn source_map_spans_are_well_formed() {
    let sm = translate_ok(
        "spans.ms",
        "function Integer f = 1 + 2;\n\
         module Counter;\n\
         \x20 method Bool b = True;\n\
         endmodule\n",
        "",
    );
    let len = sm.code().len();
    let mut count = 0;
    for ((start, end), _) in sm.spans() {
        assert!(start < end, "empty span ({}, {})", start, end);
        assert!(end <= len, "span ({}, {}) beyond code length {}", start, end, len);
        count += 1;
    }
    assert!(count > 0);
}

#[test]
fn find_maps_emitted_text_to_source() {
    let input = "function Bool g = someVar;\n";
    let sm = translate_ok("map.ms", input, "");
    let code = sm.code();
    let pos = code.find("someVar").expect("emitted variable not found");
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
    assert!(sm.find(line, col).is_some());
    assert!(sm.find_exact(line, col, "someVar").is_some());
    assert!(sm.find_exact(line, col, "someVarX").is_none());
}

#[test]
fn type_parameter_currying() {
    let sm = translate_ok(
        "curry2.ms",
        "module Fifo#(type T);\n\
         \x20 method Bool has = False;\n\
         endmodule\n\
         module Sys#(type Q);\n\
         \x20 Q#(Bit#(8)) q;\n\
         endmodule\n\
         module Top2;\n\
         \x20 Sys#(Fifo) s;\n\
         endmodule\n",
        "",
    );
    let code = sm.code();
    // The bound formal Q = Fifo curries its use-site parameters, and the
    // curried use drives a further specialization.
    assert!(code.contains("\\Fifo#(Bit#(8))  q <- \\mkFifo#(Bit#(8)) ;"));
    assert!(code.contains("module \\mkFifo#(Bit#(8))"));
}

#[test]
fn type_parameter_binding() {
    let sm = translate_ok(
        "curry.ms",
        "module Box#(type T);\n\
         \x20 RegU#(T) store;\n\
         endmodule\n\
         module User;\n\
         \x20 Box#(Bit#(8)) box1;\n\
         endmodule\n",
        "",
    );
    let code = sm.code();
    // The specialized module is emitted with the bound type substituted.
    assert!(code.contains("RegU#(Bit#(8)) store"));
    assert!(code.contains("\\Box#(Bit#(8))"));
}

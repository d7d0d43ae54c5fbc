// Copyright (c) 2021 The Minispec Authors

//! Combine multiple Minispec files into a single file, used to represent
//! all previous cells in a Minispec Jupyter notebook. The files it
//! processes have already been compiled for the most part, so error
//! checking is minimal.

extern crate minispec;

use minispec::combine::combine_to_string;
use minispec::common::Session;
use minispec::parse::parse_single_file;
use minispec::syntax::tree::Tree;
use std::env;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("error: need some files!");
        std::process::exit(1);
    }

    let sess = Session::new();
    let mut tree = Tree::new();
    let mut parse_trees = Vec::new();
    for file in &args {
        match parse_single_file(&sess, &mut tree, file) {
            Ok(pkg) => parse_trees.push(pkg),
            Err(()) => std::process::exit(1),
        }
    }

    print!("{}", combine_to_string(&tree, &parse_trees));
}

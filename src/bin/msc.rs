// Copyright (c) 2021 The Minispec Authors

//! The Minispec compiler driver: parses and translates Minispec source,
//! runs the Bluespec compiler on the result, and translates its
//! diagnostics back to Minispec terms.

extern crate clap;
extern crate minispec;
extern crate stderrlog;
#[macro_use]
extern crate log;

use clap::{App, Arg};
use minispec::common::errors::*;
use minispec::common::{Session, Verbosity};
use minispec::syntax::tree::Tree;
use minispec::{diag, parse, translate};
use std::path::Path;
use std::process::Command;

fn fatal(msg: &str) -> ! {
    eprintln!("{} {}", error_colored("error:"), msg);
    std::process::exit(1);
}

fn warn_user(msg: &str) {
    eprintln!("{} {}", warn_colored("warning:"), msg);
}

struct RunResult {
    output: String,
    exit_code: i32,
}

fn run(cmd: &str) -> RunResult {
    debug!("running: {}", cmd);
    let out = match Command::new("sh").arg("-c").arg(cmd).output() {
        Ok(o) => o,
        Err(_) => fatal("cannot invoke subprocess"),
    };
    RunResult {
        output: String::from_utf8_lossy(&out.stdout).into_owned(),
        exit_code: out.status.code().unwrap_or(-1),
    }
}

fn main() {
    let matches = App::new("msc")
        .about("Minispec compiler")
        .arg(
            Arg::with_name("inputFile")
                .help("input file")
                .index(1),
        )
        .arg(
            Arg::with_name("topLevel")
                .help(
                    "name of module/function to compile (if not given, checks input \
                     for correctness)",
                )
                .index(2),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .default_value("sim")
                .help(
                    "type of output(s) desired [default: sim]\n\
                     sim: simulation executable\n\
                     verilog (or v): Verilog file\n\
                     bsv: Bluespec file\n\
                     Use commas to specify multiple outputs (e.g., -o sim,verilog)",
                ),
        )
        .arg(
            Arg::with_name("path")
                .short("p")
                .long("path")
                .takes_value(true)
                .default_value("")
                .help("path for source files (for multiple directories, use : as separator)"),
        )
        .arg(
            Arg::with_name("bscOpts")
                .short("b")
                .long("bscOpts")
                .takes_value(true)
                .default_value("")
                .help("extra options for the Bluespec compiler (use quotes for multiple options)"),
        )
        .arg(
            Arg::with_name("version")
                .short("v")
                .long("version")
                .help("show version information"),
        )
        .arg(
            Arg::with_name("all-errors")
                .long("all-errors")
                .help(
                    "report all errors and warnings (by default, similar/repeating \
                     errors are filtered)",
                ),
        )
        .arg(
            Arg::with_name("keep-tmps")
                .long("keep-tmps")
                .help("keep temporary files around (useful for compiler debugging)"),
        )
        .arg(
            Arg::with_name("verbosity-opts")
                .short("V")
                .help("set verbosity options (compiler debugging)")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .possible_values(&["elab", "params", "emit"]),
        )
        .get_matches();

    if matches.is_present("version") {
        println!("Minispec compiler version {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    // Configure the logger; the verbosity options imply debug logging.
    let mut verbosity = Verbosity::default();
    for v in matches.values_of("verbosity-opts").into_iter().flatten() {
        verbosity |= match v {
            "elab" => Verbosity::ELAB,
            "params" => Verbosity::PARAMS,
            "emit" => Verbosity::EMIT,
            _ => unreachable!(),
        };
    }
    stderrlog::new()
        .verbosity(if verbosity.is_empty() { 1 } else { 4 })
        .init()
        .unwrap();

    let input_file = match matches.value_of("inputFile") {
        Some(f) if !f.is_empty() => f.to_string(),
        _ => fatal("no input file"),
    };
    let top_level = matches.value_of("topLevel").unwrap_or("").to_string();

    // Find the desired outputs.
    let mut bsv_out = false;
    let mut sim_out = false;
    let mut verilog_out = false;
    let default_out = matches.occurrences_of("output") == 0;
    let outs_arg = matches.value_of("output").unwrap();
    for out in outs_arg.split(',').filter(|s| !s.is_empty()) {
        match out {
            "bsv" => bsv_out = true,
            "sim" => sim_out = true,
            "verilog" | "v" => verilog_out = true,
            _ => fatal(&format!(
                "invalid output type {} (full argument: {})",
                error_colored(&format!("'{}'", out)),
                error_colored(&format!("'{}'", outs_arg))
            )),
        }
    }

    let mut sess = Session::new();
    sess.opts.report_all_errors = matches.is_present("all-errors");
    sess.opts.verbosity = verbosity;

    // Construct the Minispec path: the input file's directory, the
    // directories in the --path flag, and the current directory. Catching
    // current-folder includes this way avoids some corner cases without
    // clobbering same-dir includes.
    let mut path: Vec<String> = Vec::new();
    path.push(
        Path::new(&input_file)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    let path_arg = matches.value_of("path").unwrap();
    if !path_arg.is_empty() {
        for dir in path_arg.split(':') {
            path.push(dir.to_string());
        }
    }
    path.push(String::new());
    let mut seen = std::collections::HashSet::new();
    path.retain(|p| seen.insert(p.clone()));

    // Parse all files; exits on lexer/parser errors.
    let mut tree = Tree::new();
    let parsed_trees = match parse::parse_file_and_imports(&sess, &mut tree, &input_file, &path) {
        Ok(t) => t,
        Err(()) => std::process::exit(1),
    };

    // Translate the files to Bluespec; exits on elaboration errors.
    let sm = match translate::translate_files(
        &sess,
        &tree,
        &parsed_trees,
        &top_level,
        translate::ElabLimits::default(),
    ) {
        Ok(sm) => sm,
        Err(()) => std::process::exit(1),
    };

    // Save the translated code in a scratch directory.
    let tmp = match tempfile::Builder::new().prefix("tmp_msc_").tempdir_in(".") {
        Ok(t) => t,
        Err(_) => fatal("could not create temporary directory"),
    };
    let keep_tmps = matches.is_present("keep-tmps");
    let mut _tmp_holder = None;
    let tmp_dir = if keep_tmps {
        let p = tmp.into_path();
        let s = p.to_string_lossy().into_owned();
        println!("storing temporary files in {}", hl_colored(&s));
        s
    } else {
        let s = tmp.path().to_string_lossy().into_owned();
        _tmp_holder = Some(tmp);
        s
    };
    let bsv_file_name = format!("{}/Translated.bsv", tmp_dir);
    if std::fs::write(&bsv_file_name, format!("{}\n", sm.code())).is_err() {
        fatal(&format!("Could not open output file {}", bsv_file_name));
    }

    // The bsc path is the Minispec path with a corrected base for relative
    // directories, since bsc runs inside the scratch directory.
    let mut bsc_path = String::new();
    for dir in &path {
        let prefix = if Path::new(dir).is_relative() { "../" } else { "" };
        bsc_path.push_str(&format!("{}{}:", prefix, dir));
    }
    bsc_path.push_str("%:+");
    let bsc_opts = format!("-p {} {}", bsc_path, matches.value_of("bscOpts").unwrap());

    // Invoke the Bluespec compiler and translate its complaints.
    let run_bsc_cmd = |cmd: &str| {
        let res = run(cmd);
        diag::report_bluespec_output(&sess, &tree, &res.output, &sm, &top_level);
        if sess.finish().is_err() {
            std::process::exit(1);
        }
        if res.exit_code != 0 {
            // No parsed diagnostics but a failing bsc usually means bsc
            // wasn't found; show the raw output.
            fatal(&format!("could not compile file: {}", res.output));
        }
    };

    let mut out_name = top_level.clone();
    if out_name.is_empty() {
        out_name = Path::new(&input_file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    } else {
        // Sanitize parametric names into something shell-friendly.
        out_name = out_name
            .replace('#', "_")
            .replace(',', "_")
            .replace('(', "")
            .replace(')', "")
            .replace(' ', "")
            .replace('\'', "")
            .replace('\t', "");
    }
    let mut typechecked = false;

    if sim_out {
        let top_is_module = top_level.chars().next().map_or(false, |c| c.is_ascii_uppercase());
        if top_is_module {
            run_bsc_cmd(&format!(
                "(cd {} && bsc {} -sim -g '{}' -u Translated.bsv) 2>&1 >/dev/null",
                tmp_dir,
                bsc_opts,
                sm.top_module()
            ));
            typechecked = true;

            // Link the simulation executable.
            run_bsc_cmd(&format!(
                "(cd {} && bsc {} -sim -e '{}' -o '../{}') 2>&1 >/dev/null",
                tmp_dir,
                bsc_opts,
                sm.top_module(),
                out_name
            ));
            println!(
                "produced simulation executable {}",
                hl_colored(&out_name)
            );
        } else if !default_out {
            let problem = if top_level.is_empty() {
                "did not provide a top-level module"
            } else {
                "specified a top-level function, which can't be simulated"
            };
            warn_user(&format!(
                "you asked for sim output but {}, so not producing simulation executable",
                problem
            ));
        }
    }

    if verilog_out {
        if !top_level.is_empty() {
            run_bsc_cmd(&format!(
                "(cd {} && bsc {} -verilog -g '{}' -u Translated.bsv) 2>&1 >/dev/null",
                tmp_dir,
                bsc_opts,
                sm.top_module()
            ));
            typechecked = true;

            run(&format!(
                "cp '{}/{}.v' '{}.v'",
                tmp_dir,
                sm.top_module(),
                out_name
            ));
            println!(
                "produced verilog output {}",
                hl_colored(&format!("{}.v", out_name))
            );
        } else if !default_out {
            warn_user(
                "you asked for verilog output but did not provide a top-level module \
                 or function, so not producing verilog",
            );
        }
    }

    if !typechecked {
        run_bsc_cmd(&format!(
            "(cd {} && bsc {} -u Translated.bsv) 2>&1 >/dev/null",
            tmp_dir, bsc_opts
        ));
        println!("no errors found on {}", hl_colored(&input_file));
    }

    if bsv_out {
        let cp = run(&format!(
            "cp {}/Translated.bsv '{}.bsv'",
            tmp_dir, out_name
        ));
        if cp.exit_code != 0 {
            fatal("could not copy bsv file");
        }
        println!(
            "produced bsv output {}",
            hl_colored(&format!("{}.bsv", out_name))
        );
    }
}

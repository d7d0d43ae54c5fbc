// Copyright (c) 2021 The Minispec Authors

//! Translation of the downstream BSV compiler's diagnostics back to
//! Minispec terms: locations are mapped through the source map, syntax
//! elements are unwrapped and highlighted, and a catalogue of known error
//! codes is rewritten into Minispec-level phrasing.

use crate::common::errors::*;
use crate::common::util::{replace, trim};
use crate::common::Session;
use crate::report::context_str;
use crate::syntax::tree::Tree;
use crate::translate::SourceMap;
use itertools::Itertools;
use regex::Regex;

// The regex pipeline is line-unaware, so newlines are substituted with a
// terminator token that does not show up in Bluespec output.
const LINE_TERM: &str = " _@%@_ ";

const LOC_REGEX_STR: &str = r#""(\S+)",\s+line\s+(\d+),\s+column\s+(\d+)"#;

/// The compiled regexes shared by the event pipeline.
pub struct EventRegexes {
    loc: Regex,
    hdr: Regex,
    elem: Regex,
    t0020: Regex,
    t0080: Regex,
    proviso: Regex,
    blocked: Regex,
}

impl EventRegexes {
    pub fn new() -> EventRegexes {
        EventRegexes {
            loc: Regex::new(LOC_REGEX_STR).unwrap(),
            hdr: Regex::new(&format!(r"{}:\s+\((\S+)\)", LOC_REGEX_STR)).unwrap(),
            elem: Regex::new(r"`(.*?)'").unwrap(),
            t0020: Regex::new(r"type error at: (.*?) Expected type: (.*?) Inferred type: (.*?)$")
                .unwrap(),
            t0080: Regex::new(concat!(
                r"type error at the use of the following function: (.*?) ",
                r"The expected return type of the function: (.*?) ",
                r"The return type according to the use: (.*?)$"
            ))
            .unwrap(),
            proviso: Regex::new(r"no instances of the form:\s+(\S+)#\((.*)\)").unwrap(),
            blocked: Regex::new(concat!(
                r"The assertion `fire_when_enabled' failed for rule `(.*?)' ",
                r"because it is blocked by rule (.*?) in the scheduler"
            ))
            .unwrap(),
        }
    }
}

/// Split the raw compiler output (with newlines already substituted) into
/// `(is_error, message)` events, one per `Error:`/`Warning:` marker.
fn split_events(s: &str) -> Vec<(bool, String)> {
    let mut markers: Vec<(usize, bool)> = Vec::new();
    let mut search = 0;
    loop {
        let err = s[search..].find("Error:");
        let warn = s[search..].find("Warning:");
        let (pos, is_error) = match (err, warn) {
            (None, None) => break,
            (Some(p), None) => (p, true),
            (None, Some(p)) => (p, false),
            (Some(pe), Some(pw)) => {
                if pe < pw {
                    (pe, true)
                } else {
                    (pw, false)
                }
            }
        };
        markers.push((search + pos, is_error));
        search += pos + if is_error { "Error:".len() } else { "Warning:".len() };
    }
    let mut events = Vec::new();
    for (i, &(pos, is_error)) in markers.iter().enumerate() {
        let skip = if is_error { "Error:".len() } else { "Warning:".len() };
        let end = markers.get(i + 1).map(|&(p, _)| p).unwrap_or(s.len());
        let body = s[pos + skip..end].trim_start().to_string();
        events.push((is_error, body));
    }
    events
}

/// Apply the per-code rewrites to an event body. Returns the additional
/// syntax elements extracted by the rewrite, to be used for context lookup.
pub fn rewrite_coded_body(
    rx: &EventRegexes,
    code: &str,
    body: &mut String,
    unprocessed_body: &str,
) -> Vec<String> {
    let mut elems = Vec::new();
    if code == "T0020" || code == "T0080" {
        // T0020 is for expressions and T0080 for functions, but Bluespec
        // implements several constants as functions (e.g. True and False),
        // so both produce the same message.
        let re = if code == "T0020" { &rx.t0020 } else { &rx.t0080 };
        if let Some(m) = re.captures(body) {
            let elem = m[1].to_string();
            let expected_type = m[2].to_string();
            let ty = m[3].to_string();
            *body = format!(
                "expression {} has type {}, but use requires type {}",
                error_colored(&format!("'{}'", elem)),
                hl_colored(&ty),
                hl_colored(&expected_type)
            );
            elems.push(elem);
        }
    } else if code == "T0031" {
        // Some of these messages are followed by "The proviso was implied
        // by expressions at the following positions:" clarifications, so
        // don't anchor the match at the end.
        if let Some(m) = rx.proviso.captures(body) {
            let typeclass = m[1].to_string();
            let ty = m[2].to_string();
            if typeclass == "Arith" {
                *body = format!(
                    "type {} does not support arithmetic operations",
                    hl_colored(&ty)
                );
            } else if typeclass == "Ord" {
                *body = format!(
                    "type {} does not support comparison operations",
                    hl_colored(&ty)
                );
            } else if typeclass == "Literal" {
                *body = format!("cannot convert literal to type {}", hl_colored(&ty));
            }
        }
    } else if code == "T0003" {
        // Seen on mistyped literals, but unbound constructor is such a
        // general message that it may show up elsewhere, so keep it broad.
        replace(body, "unbound constructor", "undefined literal, type, or module");
    } else if code == "T0004" {
        replace(body, "unbound variable", "undefined variable or function");
    } else if code == "T0007" {
        replace(body, "unbound type constructor", "undefined type or module");
    } else if code == "G0005" {
        if let Some(m) = rx.blocked.captures(unprocessed_body) {
            *body = format!(
                "rules {} and {} conflict and cannot both fire every cycle \
                 (e.g., they both try to set the same input of a shared module)",
                error_colored(&m[1]),
                error_colored(&m[2])
            );
        }
    }
    elems
}

/// Parse the BSV compiler's output, translate its diagnostics into Minispec
/// terms, and report them through the session.
pub fn report_bluespec_output(
    sess: &Session,
    tree: &Tree,
    raw: &str,
    sm: &SourceMap,
    top_level: &str,
) {
    let rx = EventRegexes::new();
    let mut s = raw.to_string();
    replace(&mut s, "\n", LINE_TERM);

    let translate_loc = |line: usize, line_char: usize| -> String {
        match sm.find(line, line_char) {
            Some(node) => crate::report::loc_str(tree, node),
            None => format!("(translated bsv:{}:{})", line, line_char),
        }
    };

    let translate_all_locs = |msg: &mut String| {
        while let Some(m) = rx.loc.captures(msg) {
            let whole = m[0].to_string();
            let file = m[1].to_string();
            let line: usize = m[2].parse().unwrap_or(0);
            let line_char: usize = m[3].parse().unwrap_or(0);
            let loc = if file == "Translated.bsv" {
                translate_loc(line, line_char)
            } else {
                format!("{}:{}:{}", file, line, line_char)
            };
            replace(msg, &whole, &hl_colored(&loc));
        }
    };

    let context_str_for = |line: usize, line_char: usize, elems: &[String]| -> String {
        let mut ctx = None;
        for elem in elems {
            ctx = sm.find_exact(line, line_char, elem);
            if ctx.is_some() {
                break;
            }
        }
        if ctx.is_none() {
            ctx = sm.find(line, line_char);
        }
        match ctx {
            Some(node) => context_str(tree, node, &[node]),
            None => String::new(),
        }
    };

    let report_unknown = |is_error: bool, msg: &str| {
        let mut msg = msg.to_string();
        replace(&mut msg, LINE_TERM, "\n");
        translate_all_locs(&mut msg);
        let tag = if is_error {
            error_colored("error:")
        } else {
            warn_colored("warning:")
        };
        sess.report_msg(is_error, &format!("{} {}\n", tag, msg), "", None);
    };

    for (is_error, msg) in split_events(&s) {
        let hdr = match rx.hdr.captures(&msg) {
            Some(h) => h,
            None => {
                // Special-case the not-found top-level error, which has no
                // file location.
                if msg.contains("Command line:")
                    && msg.contains("Unbound variable `mk")
                    && !top_level.is_empty()
                {
                    let is_module = top_level.chars().next().map_or(false, |c| c.is_ascii_uppercase());
                    let out = format!(
                        "{} cannot find top-level {} {}",
                        error_colored("error:"),
                        if is_module { "module" } else { "function" },
                        error_colored(&format!("'{}'", top_level))
                    );
                    sess.report_msg(is_error, &out, "", None);
                } else {
                    report_unknown(is_error, &msg);
                }
                continue;
            }
        };

        let file = hdr[1].to_string();
        let line: usize = hdr[2].parse().unwrap_or(0);
        let line_char: usize = hdr[3].parse().unwrap_or(0);
        let code = hdr[4].to_string();
        let hdr_end = hdr.get(0).unwrap().end();
        let mut body = msg[hdr_end..].to_string();
        if file != "Translated.bsv" {
            report_unknown(is_error, &format!("in imported BSV file {}", msg));
            continue;
        }

        replace(&mut body, LINE_TERM, " ");
        replace(&mut body, "  ", " ");
        let loc = translate_loc(line, line_char);
        body = trim(&body);
        let unprocessed_body = body.clone();
        if !body.is_empty() {
            // The original messages start with a capital; ours continue a
            // sentence.
            let lower = body[0..1].to_lowercase();
            body.replace_range(0..1, &lower);
        }
        translate_all_locs(&mut body);

        // Find and highlight backtick-quoted syntax elements, unwrapping
        // `mkX' constructors back to the module name.
        let mut elems: Vec<String> = Vec::new();
        while let Some(m) = rx.elem.captures(&body) {
            let whole = m[0].to_string();
            let mut elem = m[1].to_string();
            if elem.len() > 2
                && elem.starts_with("mk")
                && elem.as_bytes()[2].is_ascii_uppercase()
            {
                elem = elem[2..].to_string();
            }
            replace(&mut body, &whole, &error_colored(&format!("'{}'", elem)));
            elems.push(elem);
        }

        elems.extend(rewrite_coded_body(&rx, &code, &mut body, &unprocessed_body));

        let tag = if is_error {
            error_colored("error:")
        } else {
            warn_colored("warning:")
        };
        let out = format!(
            "{} {} {}\n{}",
            hl_colored(&(loc + ":")),
            tag,
            body,
            context_str_for(line, line_char, &elems)
        );
        trace!(
            "translated bsc event [{}] at {}:{} with elems [{}]",
            code,
            line,
            line_char,
            elems.iter().join(", ")
        );
        sess.report_msg(
            is_error,
            &out,
            &sm.context_info(line, line_char),
            sm.find(line, line_char),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_splitting() {
        let mut s = "Warning: first part\nError: second part\n".to_string();
        replace(&mut s, "\n", LINE_TERM);
        let events = split_events(&s);
        assert_eq!(events.len(), 2);
        assert!(!events[0].0);
        assert!(events[0].1.contains("first part"));
        assert!(events[1].0);
        assert!(events[1].1.contains("second part"));
    }

    #[test]
    fn unbound_variable_rewrite() {
        let rx = EventRegexes::new();
        let mut body = "unbound variable 'foo'".to_string();
        let elems = rewrite_coded_body(&rx, "T0004", &mut body, "");
        assert!(body.contains("undefined variable or function"));
        assert!(elems.is_empty());
    }

    #[test]
    fn type_mismatch_rewrite() {
        let rx = EventRegexes::new();
        let mut body =
            "type error at: x Expected type: Bit#(4) Inferred type: Bool".to_string();
        let elems = rewrite_coded_body(&rx, "T0020", &mut body, "");
        assert!(body.contains("has type"));
        assert!(body.contains("but use requires type"));
        assert_eq!(elems, vec!["x".to_string()]);
    }

    #[test]
    fn proviso_rewrite() {
        let rx = EventRegexes::new();
        let mut body = "no instances of the form: Arith#(Bool)".to_string();
        rewrite_coded_body(&rx, "T0031", &mut body, "");
        assert!(body.contains("does not support arithmetic operations"));

        let mut body = "no instances of the form: Literal#(MyEnum)".to_string();
        rewrite_coded_body(&rx, "T0031", &mut body, "");
        assert!(body.contains("cannot convert literal to type"));
    }

    #[test]
    fn rule_conflict_rewrite() {
        let rx = EventRegexes::new();
        let unprocessed = "The assertion `fire_when_enabled' failed for rule `tick' \
                           because it is blocked by rule tock in the scheduler";
        let mut body = unprocessed.to_string();
        rewrite_coded_body(&rx, "G0005", &mut body, unprocessed);
        assert!(body.contains("conflict and cannot both fire every cycle"));
    }
}

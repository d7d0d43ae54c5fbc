// Copyright (c) 2021 The Minispec Authors

//! Location strings, identifier quoting, and highlighted source excerpts
//! for user-facing diagnostics.

use crate::common::errors::error_colored;
use crate::common::NodeId;
use crate::syntax::tree::Tree;

/// `file:line:col` for the start of a node.
pub fn loc_str(tree: &Tree, node: NodeId) -> String {
    let sp = tree.span(node);
    let (line, col, _) = sp.begin().human();
    format!("{}:{}:{}", sp.source.get_path(), line, col)
}

/// Like `loc_str`, but with the file name blanked out. Used for secondary
/// lines of a multi-part diagnostic, so locations align under the primary.
pub fn subloc_str(tree: &Tree, node: NodeId) -> String {
    let sp = tree.span(node);
    let (line, col, _) = sp.begin().human();
    let pad: String = sp.source.get_path().chars().map(|_| ' ').collect();
    format!("{} {}:{}", pad, line, col)
}

/// The node's source text, single-lined and quoted for inclusion in an
/// error message.
pub fn quote(tree: &Tree, node: NodeId) -> String {
    let mut s = tree.src_text(node);
    s = s.replace('\n', "\\n");
    s = s.replace('\r', "\\r");
    s = s.replace('\t', "\\t");
    error_colored(&format!("'{}'", s))
}

/// Render the source lines covered by `node`, indented, with the given
/// subtrees highlighted. Nested highlights are skipped in favor of the
/// outermost one.
pub fn context_str(tree: &Tree, node: NodeId, highlights: &[NodeId]) -> String {
    let sp = tree.span(node);
    let content = sp.source.get_content();
    let text = content.as_str();

    // 1-based start offsets of every line in the file.
    let mut line_starts = vec![0usize];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            line_starts.push(i + 1);
        }
    }
    let get_line = |line: usize| -> &str {
        if line == 0 || line > line_starts.len() {
            return "";
        }
        let begin = line_starts[line - 1];
        let end = text[begin..]
            .find('\n')
            .map(|p| begin + p)
            .unwrap_or(text.len());
        &text[begin..end]
    };

    let (start_line, _, _) = sp.begin().human();
    let end_off = if sp.end > sp.begin { sp.end - 1 } else { sp.begin };
    let (end_line, _, _) =
        crate::common::source::Location::new(sp.source, end_off.min(text.len())).human();
    let end_line = end_line.max(start_line);

    // Assemble the excerpt and per-line offsets into it.
    let mut excerpt = String::new();
    let mut line_offsets = vec![0usize];
    for line in start_line..=end_line {
        let sv = get_line(line);
        excerpt.push_str(sv);
        excerpt.push('\n');
        line_offsets.push(line_offsets.last().unwrap() + sv.len() + 1);
    }

    // Compute highlight ranges relative to the excerpt.
    let mut ranges = Vec::new();
    for &h in highlights {
        let hsp = tree.span(h);
        if hsp.source != sp.source {
            continue;
        }
        let (hline, hcol, _) = hsp.begin().human();
        if hline < start_line || hline > end_line {
            continue;
        }
        let start_pos = line_offsets[hline - start_line] + (hcol - 1);
        let len = hsp.end - hsp.begin;
        ranges.push((start_pos, len));
    }
    ranges.sort();

    let mut out = String::new();
    let mut pos = 0usize;
    for (start_pos, len) in ranges {
        if start_pos < pos {
            continue; // nested within the previous highlight
        }
        let end_pos = (start_pos + len).min(excerpt.len());
        out.push_str(&excerpt[pos..start_pos.min(excerpt.len())]);
        out.push_str(&error_colored(&excerpt[start_pos.min(excerpt.len())..end_pos]));
        pos = end_pos;
    }
    if pos < excerpt.len() {
        out.push_str(&excerpt[pos..]);
    }

    let out = out.replace('\n', "\n    ");
    let mut res = format!("    {}", out);
    // The excerpt ends with a newline, so drop the indent after it.
    res.truncate(res.len() - 4);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::get_source_manager;
    use crate::common::Session;
    use crate::syntax::parser;
    use crate::syntax::tree::Tree;

    #[test]
    fn locations_and_quotes() {
        let sm = get_source_manager();
        let src = sm.add("report.ms", "function Integer f = 1 + 2;\n");
        let sess = Session::new();
        let mut tree = Tree::new();
        let pkg = parser::parse(src, &mut tree, &sess).unwrap();
        let f = pkg.stmts(&tree)[0].function_def(&tree).unwrap();
        assert_eq!(loc_str(&tree, f.id()), "report.ms:1:1");
        let name = f.function_id(&tree).name(&tree);
        assert!(quote(&tree, name).contains("'f'"));
        let excerpt = context_str(&tree, f.id(), &[name]);
        assert!(excerpt.contains("function Integer"));
        assert!(excerpt.starts_with("    "));
    }
}

// Copyright (c) 2021 The Minispec Authors

//! Utilities to implement diagnostics and error reporting facilities.

use crate::source::Span;
use std::fmt;

// Colorized output (chosen to be gcc-like).
const ERROR_COLOR: &str = "\x1B[1;31m";
const WARN_COLOR: &str = "\x1B[1;35m";
const NOTE_COLOR: &str = "\x1B[1;34m";
const FIX_COLOR: &str = "\x1B[32m";
const HL_COLOR: &str = "\x1B[1;37m";
const CLEAR: &str = "\x1B[0m";

fn colorize(code: &str, s: &str) -> String {
    format!("{}{}{}", code, s, CLEAR)
}

pub fn error_colored(s: &str) -> String {
    colorize(ERROR_COLOR, s)
}

pub fn warn_colored(s: &str) -> String {
    colorize(WARN_COLOR, s)
}

pub fn note_colored(s: &str) -> String {
    colorize(NOTE_COLOR, s)
}

pub fn fix_colored(s: &str) -> String {
    colorize(FIX_COLOR, s)
}

pub fn hl_colored(s: &str) -> String {
    colorize(HL_COLOR, s)
}

/// Emits diagnostic messages.
pub trait DiagEmitter {
    /// Emit a diagnostic message.
    fn emit(&self, diag: DiagBuilder2);
}

impl<'a, T> DiagEmitter for &'a T
where
    T: DiagEmitter + ?Sized,
{
    fn emit(&self, diag: DiagBuilder2) {
        (*self).emit(diag)
    }
}

#[must_use]
#[derive(Clone, Debug)]
pub struct DiagBuilder2 {
    pub severity: Severity,
    pub message: String,
    pub segments: Vec<DiagSegment>,
}

#[derive(Clone, Debug)]
pub enum DiagSegment {
    Span(Span),
    Note(String),
}

/// A diagnostic result type. Either carries the result `T` in the Ok
/// variant, or an assembled diagnostic in the Err variant.
pub type DiagResult2<T> = Result<T, DiagBuilder2>;

impl DiagBuilder2 {
    pub fn new<S: Into<String>>(severity: Severity, message: S) -> DiagBuilder2 {
        DiagBuilder2 {
            severity: severity,
            message: message.into(),
            segments: Vec::new(),
        }
    }

    pub fn fatal<S: Into<String>>(message: S) -> DiagBuilder2 {
        DiagBuilder2::new(Severity::Fatal, message)
    }

    pub fn error<S: Into<String>>(message: S) -> DiagBuilder2 {
        DiagBuilder2::new(Severity::Error, message)
    }

    pub fn warning<S: Into<String>>(message: S) -> DiagBuilder2 {
        DiagBuilder2::new(Severity::Warning, message)
    }

    pub fn note<S: Into<String>>(message: S) -> DiagBuilder2 {
        DiagBuilder2::new(Severity::Note, message)
    }

    pub fn segment(self, segment: DiagSegment) -> DiagBuilder2 {
        let mut segments = self.segments;
        segments.push(segment);
        DiagBuilder2 {
            segments: segments,
            ..self
        }
    }

    pub fn span<S: Into<Span>>(self, span: S) -> DiagBuilder2 {
        self.segment(DiagSegment::Span(span.into()))
    }

    pub fn add_note<S: Into<String>>(self, message: S) -> DiagBuilder2 {
        self.segment(DiagSegment::Note(message.into()))
    }

    pub fn get_severity(&self) -> Severity {
        self.severity
    }

    pub fn get_message(&self) -> &String {
        &self.message
    }

    pub fn get_segments(&self) -> &[DiagSegment] {
        &self.segments
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn to_str(self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl fmt::Display for DiagBuilder2 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut colorcode = match self.get_severity() {
            Severity::Fatal | Severity::Error => ERROR_COLOR,
            Severity::Warning => WARN_COLOR,
            Severity::Note => NOTE_COLOR,
        };
        write!(
            f,
            "{}{}:{} {}{}{}\n",
            colorcode,
            self.get_severity(),
            CLEAR,
            HL_COLOR,
            self.get_message(),
            CLEAR
        )?;

        for segment in &self.segments {
            match *segment {
                DiagSegment::Span(sp) => {
                    let c = sp.source.get_content();
                    let mut iter = c.extract_iter(0, sp.begin);

                    // Look for the start of the line.
                    let mut col = 1;
                    let mut line = 1;
                    let mut line_offset = sp.begin;
                    while let Some(c) = iter.next_back() {
                        match c.1 {
                            '\n' => {
                                line += 1;
                                break;
                            }
                            '\r' => continue,
                            _ => {
                                col += 1;
                                line_offset = c.0;
                            }
                        }
                    }

                    // Count the number of lines.
                    while let Some(c) = iter.next_back() {
                        if c.1 == '\n' {
                            line += 1;
                        }
                    }

                    // Print the line in question.
                    let text: String = c
                        .iter_from(line_offset)
                        .map(|x| x.1)
                        .take_while(|c| *c != '\n' && *c != '\r')
                        .collect();
                    write!(
                        f,
                        "  --> {}:{}:{}-{}:\n",
                        sp.source.get_path(),
                        line,
                        col,
                        col + sp.extract().len()
                    )?;
                    write!(f, "   | \n")?;
                    write!(f, "   | ")?;
                    for (mut i, c) in text.char_indices() {
                        i += line_offset;
                        if sp.begin != sp.end {
                            if i == sp.begin {
                                write!(f, "{}", colorcode)?;
                            }
                            if i == sp.end {
                                write!(f, "{}", CLEAR)?;
                            }
                        }
                        match c {
                            '\t' => write!(f, "    ")?,
                            c => write!(f, "{}", c)?,
                        }
                    }
                    write!(f, "{}\n", CLEAR)?;
                    write!(f, "   | ")?;

                    // Print the caret markers for the line in question.
                    let mut pd = ' ';
                    for (mut i, c) in text.char_indices() {
                        i += line_offset;
                        let d = if (i >= sp.begin && i < sp.end)
                            || (i == sp.begin && sp.begin == sp.end)
                        {
                            '^'
                        } else {
                            ' '
                        };
                        if d != pd {
                            write!(f, "{}", if d == ' ' { CLEAR } else { colorcode })?;
                        }
                        pd = d;
                        match c {
                            '\t' => write!(f, "{}{}{}{}", d, d, d, d)?,
                            _ => write!(f, "{}", d)?,
                        }
                    }
                    write!(f, "{}\n", CLEAR)?;
                    colorcode = HL_COLOR;
                }
                DiagSegment::Note(ref message) => {
                    write!(f, "   = {}note:{} {}\n", HL_COLOR, CLEAR, message)?
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::get_source_manager;

    #[test]
    fn severity_order() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Fatal > Severity::Error);
    }

    #[test]
    fn render_with_span() {
        let sm = get_source_manager();
        let src = sm.add("diag.ms", "let x = oops;\n");
        let d = DiagBuilder2::error("something went wrong")
            .span(Span::new(src, 8, 12))
            .add_note("try something else");
        let rendered = format!("{}", d);
        assert!(rendered.contains("something went wrong"));
        assert!(rendered.contains("diag.ms:1:9-13"));
        assert!(rendered.contains("^^^^"));
        assert!(rendered.contains("try something else"));
    }
}

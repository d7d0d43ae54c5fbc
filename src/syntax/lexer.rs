// Copyright (c) 2021 The Minispec Authors

//! A lexical analyzer for Minispec source files.

use crate::token::*;
use minispec_common::errors::*;
use minispec_common::name::get_name_table;
use minispec_common::source::*;

pub type TokenAndSpan = (Token, Span);

/// A lexical analyzer for Minispec source files.
///
/// Whitespace and comments are skipped rather than tokenized; downstream
/// emission recovers them from the raw source gaps between token spans.
pub struct Lexer {
    source: Source,
    text: String,
    pos: usize,
}

impl Lexer {
    pub fn new(source: Source) -> Lexer {
        let text = source.get_content().as_str().to_string();
        Lexer {
            source: source,
            text: text,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut it = self.text[self.pos..].chars();
        it.next();
        it.next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn span_from(&self, begin: usize) -> Span {
        Span::new(self.source, begin, self.pos)
    }

    /// Skip whitespace and comments. Returns an error on an unterminated
    /// block comment.
    fn skip_noise(&mut self) -> DiagResult2<()> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => self.bump(),
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let begin = self.pos;
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_second()) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => self.bump(),
                            (None, _) => {
                                return Err(DiagBuilder2::error("unterminated block comment")
                                    .span(self.span_from(begin)));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Produce the next token and its span.
    pub fn next_token(&mut self) -> DiagResult2<TokenAndSpan> {
        self.skip_noise()?;
        let begin = self.pos;
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok((Eof, self.span_from(begin))),
        };

        // Identifiers and keywords.
        if c.is_ascii_alphabetic() || c == '_' {
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let s = &self.text[begin..self.pos];
            let tkn = if let Some(kw) = Kw::from_str(s) {
                Keyword(kw)
            } else if s.chars().next().unwrap().is_ascii_uppercase() {
                UpperIdent(get_name_table().intern(s))
            } else {
                LowerIdent(get_name_table().intern(s))
            };
            return Ok((tkn, self.span_from(begin)));
        }

        // System identifiers.
        if c == '$' {
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let s = &self.text[begin..self.pos];
            return Ok((
                DollarIdent(get_name_table().intern(s)),
                self.span_from(begin),
            ));
        }

        // Integer literals: `42`, `4'b10_10`, `'hFF`.
        if c.is_ascii_digit() || (c == '\'' && self.peek_second().map_or(false, is_base_char)) {
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == '_' {
                    self.bump();
                } else {
                    break;
                }
            }
            if self.peek() == Some('\'') {
                self.bump();
                match self.peek() {
                    Some(b) if is_base_char(b) => self.bump(),
                    _ => {
                        return Err(DiagBuilder2::error(format!(
                            "invalid integer literal {}",
                            error_colored(&format!("'{}'", &self.text[begin..self.pos]))
                        ))
                        .span(self.span_from(begin)));
                    }
                }
                let digits_begin = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_hexdigit() || c == '_' {
                        self.bump();
                    } else {
                        break;
                    }
                }
                if self.pos == digits_begin {
                    return Err(DiagBuilder2::error(format!(
                        "invalid integer literal {}",
                        error_colored(&format!("'{}'", &self.text[begin..self.pos]))
                    ))
                    .span(self.span_from(begin)));
                }
            }
            let s = &self.text[begin..self.pos];
            return Ok((IntLiteral(get_name_table().intern(s)), self.span_from(begin)));
        }

        // String literals.
        if c == '"' {
            self.bump();
            loop {
                match self.peek() {
                    Some('"') => {
                        self.bump();
                        break;
                    }
                    Some('\\') => {
                        self.bump();
                        self.bump();
                    }
                    Some('\n') | None => {
                        return Err(DiagBuilder2::error(format!(
                            "unterminated string {}",
                            error_colored(&format!("'{}'", &self.text[begin..self.pos]))
                        ))
                        .span(self.span_from(begin)));
                    }
                    Some(_) => self.bump(),
                }
            }
            let s = &self.text[begin..self.pos];
            return Ok((
                StringLiteral(get_name_table().intern(s)),
                self.span_from(begin),
            ));
        }

        // Match 2-character symbols.
        if let Some(c1) = self.peek_second() {
            let sym = match (c, c1) {
                ('*', '*') => Some(Operator(Op::Pow)),
                ('<', '<') => Some(Operator(Op::Shl)),
                ('>', '>') => Some(Operator(Op::Shr)),
                ('<', '=') => Some(Operator(Op::Leq)),
                ('>', '=') => Some(Operator(Op::Geq)),
                ('=', '=') => Some(Operator(Op::LogicEq)),
                ('!', '=') => Some(Operator(Op::LogicNeq)),
                ('&', '&') => Some(Operator(Op::LogicAnd)),
                ('|', '|') => Some(Operator(Op::LogicOr)),
                ('~', '&') => Some(Operator(Op::BitNand)),
                ('~', '|') => Some(Operator(Op::BitNor)),
                ('^', '~') => Some(Operator(Op::BitXnor)),
                ('~', '^') => Some(Operator(Op::BitNxor)),
                ('<', '-') => Some(LeftArrow),
                _ => None,
            };
            if let Some(tkn) = sym {
                self.bump();
                self.bump();
                return Ok((tkn, self.span_from(begin)));
            }
        }

        // Match 1-character symbols.
        let sym = match c {
            '+' => Some(Operator(Op::Add)),
            '-' => Some(Operator(Op::Sub)),
            '*' => Some(Operator(Op::Mul)),
            '/' => Some(Operator(Op::Div)),
            '%' => Some(Operator(Op::Mod)),
            '<' => Some(Operator(Op::Lt)),
            '>' => Some(Operator(Op::Gt)),
            '!' => Some(Operator(Op::LogicNot)),
            '~' => Some(Operator(Op::BitNot)),
            '&' => Some(Operator(Op::BitAnd)),
            '|' => Some(Operator(Op::BitOr)),
            '^' => Some(Operator(Op::BitXor)),
            '(' => Some(OpenDelim(Paren)),
            ')' => Some(CloseDelim(Paren)),
            '[' => Some(OpenDelim(Brack)),
            ']' => Some(CloseDelim(Brack)),
            '{' => Some(OpenDelim(Brace)),
            '}' => Some(CloseDelim(Brace)),
            '#' => Some(Hashtag),
            ',' => Some(Comma),
            '.' => Some(Period),
            ':' => Some(Colon),
            ';' => Some(Semicolon),
            '?' => Some(Ternary),
            '=' => Some(Assign),
            _ => None,
        };
        if let Some(tkn) = sym {
            self.bump();
            return Ok((tkn, self.span_from(begin)));
        }

        self.bump();
        let what = if c == '\'' {
            "invalid integer literal"
        } else {
            "invalid input"
        };
        Err(DiagBuilder2::error(format!(
            "{} {}",
            what,
            error_colored(&format!("'{}'", c))
        ))
        .span(self.span_from(begin)))
    }

    /// Lex the entire file, including the trailing end-of-file token.
    pub fn all_tokens(mut self) -> DiagResult2<Vec<TokenAndSpan>> {
        let mut tokens = Vec::new();
        loop {
            let (tkn, sp) = self.next_token()?;
            let done = tkn == Eof;
            tokens.push((tkn, sp));
            if done {
                return Ok(tokens);
            }
        }
    }
}

fn is_base_char(c: char) -> bool {
    match c {
        'b' | 'B' | 'd' | 'D' | 'h' | 'H' => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(name: &str, input: &str) -> Vec<Token> {
        let sm = get_source_manager();
        let src = sm.add(name, input);
        Lexer::new(src)
            .all_tokens()
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn idents_and_keywords() {
        let toks = lex("lex1.ms", "module Foo bar $display endmodule");
        assert_eq!(toks.len(), 6);
        assert_eq!(toks[0], Keyword(Kw::Module));
        match toks[1] {
            UpperIdent(n) => assert_eq!(&*n.as_str(), "Foo"),
            ref t => panic!("unexpected token {:?}", t),
        }
        match toks[2] {
            LowerIdent(_) => {}
            ref t => panic!("unexpected token {:?}", t),
        }
        match toks[3] {
            DollarIdent(n) => assert_eq!(&*n.as_str(), "$display"),
            ref t => panic!("unexpected token {:?}", t),
        }
        assert_eq!(toks[4], Keyword(Kw::Endmodule));
        assert_eq!(toks[5], Eof);
    }

    #[test]
    fn literals() {
        let toks = lex("lex2.ms", "42 4'b10_10 'hFF \"hi\\\"there\"");
        match toks[0] {
            IntLiteral(n) => assert_eq!(&*n.as_str(), "42"),
            ref t => panic!("unexpected token {:?}", t),
        }
        match toks[1] {
            IntLiteral(n) => assert_eq!(&*n.as_str(), "4'b10_10"),
            ref t => panic!("unexpected token {:?}", t),
        }
        match toks[2] {
            IntLiteral(n) => assert_eq!(&*n.as_str(), "'hFF"),
            ref t => panic!("unexpected token {:?}", t),
        }
        match toks[3] {
            StringLiteral(n) => assert_eq!(&*n.as_str(), "\"hi\\\"there\""),
            ref t => panic!("unexpected token {:?}", t),
        }
    }

    #[test]
    fn symbols_maximal_munch() {
        let toks = lex("lex3.ms", "a <= b <- c ** d ^~ e < = f");
        let syms: Vec<_> = toks
            .iter()
            .filter(|t| match t {
                LowerIdent(_) | Eof => false,
                _ => true,
            })
            .cloned()
            .collect();
        assert_eq!(
            syms,
            vec![
                Operator(Op::Leq),
                LeftArrow,
                Operator(Op::Pow),
                Operator(Op::BitXnor),
                Operator(Op::Lt),
                Assign,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let toks = lex("lex4.ms", "a // line\n/* block\nstill */ b");
        assert_eq!(toks.len(), 3);
    }

    #[test]
    fn unterminated_string() {
        let sm = get_source_manager();
        let src = sm.add("lex5.ms", "\"oops");
        let err = Lexer::new(src).all_tokens().unwrap_err();
        assert!(err.get_message().contains("unterminated string"));
    }
}

/// Tokenizer for the calculator language.
///
/// Reads from a pushdown of input sources (files, strings) so a `read`
/// statement can splice a file into the token stream; each source tracks
/// its own name and line number. One token of pushback (`rescan`) and one
/// character of pushback (inside the scanner) are supported.
///
/// Two stackable modes change scanning:
///   - newlines: a newline becomes a token (statement terminator at the
///     top level) instead of whitespace
///   - allsyms: almost any non-whitespace run scans as one symbol (used
///     for file names after `read`)

use crate::errors::{ScanError, SourcePos};
use std::rc::Rc;

pub const TM_DEFAULT: u8 = 0;
pub const TM_NEWLINES: u8 = 1;
pub const TM_ALLSYMS: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // punctuation
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Semicolon,
    Colon,
    Comma,
    QuestionMark,
    At,
    BackQuote,
    Dollar,
    Newline,
    Eof,

    // operators
    Assign,
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    Power,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    PlusEquals,
    MinusEquals,
    MultEquals,
    DivEquals,
    ModEquals,
    SlashSlash,
    SlashSlashEquals,
    PlusPlus,
    MinusMinus,
    AndAnd,
    OrOr,
    And,
    Or,
    Not,
    LeftShift,
    RightShift,
    AndEquals,
    OrEquals,
    LshiftEquals,
    RshiftEquals,
    PowerEquals,
    Period,
    Arrow,
    Tilde,
    TildeEquals,
    Backslash,
    BackslashEquals,
    Hash,
    HashEquals,
    OldValue,

    // literals
    Symbol(Rc<str>),
    Str(Rc<str>),
    Number(Rc<str>),
    Imaginary(Rc<str>),

    // keywords
    If,
    Else,
    While,
    Continue,
    Break,
    Goto,
    Return,
    Local,
    Global,
    Static,
    Do,
    For,
    Switch,
    Case,
    Default,
    Quit,
    Define,
    Read,
    Show,
    Help,
    Write,
    Mat,
    Obj,
    Print,
    Cd,
    Undefine,
    Abort,
}

impl Token {
    pub fn is_keyword(&self) -> bool {
        use Token::*;
        matches!(
            self,
            If | Else
                | While
                | Continue
                | Break
                | Goto
                | Return
                | Local
                | Global
                | Static
                | Do
                | For
                | Switch
                | Case
                | Default
                | Quit
                | Define
                | Read
                | Show
                | Help
                | Write
                | Mat
                | Obj
                | Print
                | Cd
                | Undefine
                | Abort
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Token::Symbol(s) => format!("symbol \"{}\"", s),
            Token::Str(_) => "string literal".into(),
            Token::Number(s) | Token::Imaginary(s) => format!("number \"{}\"", s),
            Token::Newline => "newline".into(),
            Token::Eof => "end of input".into(),
            other => format!("{:?}", other),
        }
    }
}

fn keyword(s: &str) -> Option<Token> {
    Some(match s {
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "continue" => Token::Continue,
        "break" => Token::Break,
        "goto" => Token::Goto,
        "return" => Token::Return,
        "local" => Token::Local,
        "global" => Token::Global,
        "static" => Token::Static,
        "do" => Token::Do,
        "for" => Token::For,
        "switch" => Token::Switch,
        "case" => Token::Case,
        "default" => Token::Default,
        "quit" | "exit" => Token::Quit,
        "define" => Token::Define,
        "read" => Token::Read,
        "show" => Token::Show,
        "help" => Token::Help,
        "write" => Token::Write,
        "mat" => Token::Mat,
        "obj" => Token::Obj,
        "print" => Token::Print,
        "cd" => Token::Cd,
        "undefine" => Token::Undefine,
        "abort" => Token::Abort,
        _ => return None,
    })
}

struct Source {
    name: Option<Rc<str>>,
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

pub struct Lexer {
    sources: Vec<Source>,
    newlines: bool,
    allsyms: bool,
    rescan: bool,
    current: Token,
}

impl Lexer {
    pub fn new(text: &str, name: Option<&str>) -> Self {
        let mut lx = Lexer {
            sources: Vec::new(),
            newlines: true,
            allsyms: false,
            rescan: false,
            current: Token::Eof,
        };
        lx.push_source(text, name);
        lx
    }

    /// Splice another input on top of the current one (`read`).
    pub fn push_source(&mut self, text: &str, name: Option<&str>) {
        self.sources.push(Source {
            name: name.map(Rc::from),
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
        });
    }

    /// Drop the finished top source; true if any source remains.
    pub fn pop_source(&mut self) -> bool {
        self.sources.pop();
        !self.sources.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.sources.len()
    }

    pub fn pos(&self) -> SourcePos {
        match self.sources.last() {
            Some(s) => SourcePos::new(s.name.clone(), s.line),
            None => SourcePos::default(),
        }
    }

    pub fn line(&self) -> u32 {
        self.sources.last().map_or(0, |s| s.line)
    }

    /// Install token modes, returning the previous ones.
    pub fn set_mode(&mut self, flags: u8) -> u8 {
        let old = (self.newlines as u8 * TM_NEWLINES) | (self.allsyms as u8 * TM_ALLSYMS);
        self.newlines = flags & TM_NEWLINES != 0;
        self.allsyms = flags & TM_ALLSYMS != 0;
        old
    }

    /// Push the current token back; the next gettoken returns it again.
    pub fn rescan(&mut self) {
        self.rescan = true;
    }

    fn nextchar(&mut self) -> Option<char> {
        let src = self.sources.last_mut()?;
        let ch = src.chars.get(src.pos).copied();
        if let Some(c) = ch {
            src.pos += 1;
            if c == '\n' {
                src.line += 1;
            }
        }
        ch
    }

    /// Peek at the very next character (no whitespace skipping),
    /// consuming it when it matches. Used for the label-definition
    /// lookahead after a symbol.
    pub fn next_char_is(&mut self, want: char) -> bool {
        match self.nextchar() {
            Some(c) if c == want => true,
            Some(_) => {
                self.reread();
                false
            }
            None => false,
        }
    }

    /// Character-level pushback.
    fn reread(&mut self) {
        if let Some(src) = self.sources.last_mut() {
            if src.pos > 0 {
                src.pos -= 1;
                if src.chars.get(src.pos) == Some(&'\n') {
                    src.line -= 1;
                }
            }
        }
    }

    fn peekchar(&mut self) -> Option<char> {
        let src = self.sources.last()?;
        src.chars.get(src.pos).copied()
    }

    pub fn gettoken(&mut self) -> Result<Token, ScanError> {
        if self.rescan {
            self.rescan = false;
            return Ok(self.current.clone());
        }
        let tok = self.scan()?;
        self.current = tok.clone();
        Ok(tok)
    }

    fn scan(&mut self) -> Result<Token, ScanError> {
        loop {
            let ch = match self.nextchar() {
                Some(c) => c,
                None => return Ok(Token::Eof),
            };
            if self.allsyms
                && ch != ' '
                && ch != ';'
                && ch != '"'
                && ch != '\''
                && ch != '\n'
                && ch != '\t'
            {
                self.reread();
                return self.eat_allsym();
            }
            match ch {
                ' ' | '\t' | '\r' | '\x07' | '\x08' | '\x0c' | '\x0b' | '\0' => continue,
                '\n' => {
                    if self.newlines {
                        return Ok(Token::Newline);
                    }
                }
                '{' => return Ok(Token::LeftBrace),
                '}' => return Ok(Token::RightBrace),
                '(' => return Ok(Token::LeftParen),
                ')' => return Ok(Token::RightParen),
                '[' => return Ok(Token::LeftBracket),
                ']' => return Ok(Token::RightBracket),
                ';' => return Ok(Token::Semicolon),
                ':' => return Ok(Token::Colon),
                ',' => return Ok(Token::Comma),
                '?' => return Ok(Token::QuestionMark),
                '@' => return Ok(Token::At),
                '`' => return Ok(Token::BackQuote),
                '$' => return Ok(Token::Dollar),
                '"' | '\'' => return self.eat_string(ch),
                '^' => {
                    return Ok(match self.peek_eat('=') {
                        true => Token::PowerEquals,
                        false => Token::Power,
                    })
                }
                '=' => {
                    return Ok(match self.peek_eat('=') {
                        true => Token::Eq,
                        false => Token::Assign,
                    })
                }
                '+' => {
                    return Ok(if self.peek_eat('+') {
                        Token::PlusPlus
                    } else if self.peek_eat('=') {
                        Token::PlusEquals
                    } else {
                        Token::Plus
                    })
                }
                '-' => {
                    return Ok(if self.peek_eat('-') {
                        Token::MinusMinus
                    } else if self.peek_eat('=') {
                        Token::MinusEquals
                    } else if self.peek_eat('>') {
                        Token::Arrow
                    } else {
                        Token::Minus
                    })
                }
                '*' => {
                    return Ok(if self.peek_eat('=') {
                        Token::MultEquals
                    } else if self.peek_eat('*') {
                        if self.peek_eat('=') {
                            Token::PowerEquals
                        } else {
                            Token::Power
                        }
                    } else {
                        Token::Mult
                    })
                }
                '/' => {
                    if self.peek_eat('/') {
                        return Ok(if self.peek_eat('=') {
                            Token::SlashSlashEquals
                        } else {
                            Token::SlashSlash
                        });
                    }
                    if self.peek_eat('=') {
                        return Ok(Token::DivEquals);
                    }
                    if self.peek_eat('*') {
                        self.eat_comment()?;
                        continue;
                    }
                    return Ok(Token::Div);
                }
                '%' => {
                    return Ok(match self.peek_eat('=') {
                        true => Token::ModEquals,
                        false => Token::Mod,
                    })
                }
                '<' => {
                    return Ok(if self.peek_eat('=') {
                        Token::Le
                    } else if self.peek_eat('<') {
                        if self.peek_eat('=') {
                            Token::LshiftEquals
                        } else {
                            Token::LeftShift
                        }
                    } else {
                        Token::Lt
                    })
                }
                '>' => {
                    return Ok(if self.peek_eat('=') {
                        Token::Ge
                    } else if self.peek_eat('>') {
                        if self.peek_eat('=') {
                            Token::RshiftEquals
                        } else {
                            Token::RightShift
                        }
                    } else {
                        Token::Gt
                    })
                }
                '&' => {
                    return Ok(if self.peek_eat('&') {
                        Token::AndAnd
                    } else if self.peek_eat('=') {
                        Token::AndEquals
                    } else {
                        Token::And
                    })
                }
                '|' => {
                    return Ok(if self.peek_eat('|') {
                        Token::OrOr
                    } else if self.peek_eat('=') {
                        Token::OrEquals
                    } else {
                        Token::Or
                    })
                }
                '!' => {
                    return Ok(match self.peek_eat('=') {
                        true => Token::Ne,
                        false => Token::Not,
                    })
                }
                '#' => {
                    if self.peek_eat('=') {
                        return Ok(Token::HashEquals);
                    }
                    match self.peekchar() {
                        Some('!') | Some('#') => {
                            self.eat_line();
                            continue;
                        }
                        Some('\n') => return Ok(Token::Hash),
                        _ => return Ok(Token::Hash),
                    }
                }
                '~' => {
                    return Ok(match self.peek_eat('=') {
                        true => Token::TildeEquals,
                        false => Token::Tilde,
                    })
                }
                '\\' => {
                    if self.peek_eat('\n') {
                        continue; // escaped newline continues the line
                    }
                    return Ok(match self.peek_eat('=') {
                        true => Token::BackslashEquals,
                        false => Token::Backslash,
                    });
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    self.reread();
                    return self.eat_symbol();
                }
                c if c.is_ascii_digit() || c == '.' => {
                    self.reread();
                    return self.eat_number();
                }
                c => {
                    return Err(ScanError::Parse(format!(
                        "unknown token character '{}'",
                        c
                    )))
                }
            }
        }
    }

    fn peek_eat(&mut self, want: char) -> bool {
        if self.peekchar() == Some(want) {
            self.nextchar();
            true
        } else {
            false
        }
    }

    fn eat_line(&mut self) {
        while let Some(c) = self.nextchar() {
            if c == '\n' {
                self.reread();
                break;
            }
        }
    }

    fn eat_comment(&mut self) -> Result<(), ScanError> {
        loop {
            match self.nextchar() {
                None => return Err(ScanError::Parse("unterminated comment".into())),
                Some('*') => {
                    if self.peek_eat('/') {
                        return Ok(());
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn eat_allsym(&mut self) -> Result<Token, ScanError> {
        let mut buf = String::new();
        while let Some(c) = self.nextchar() {
            if c == ' ' || c == ';' || c == '\n' || c == '\t' {
                self.reread();
                break;
            }
            buf.push(c);
        }
        Ok(Token::Symbol(Rc::from(buf.as_str())))
    }

    fn eat_symbol(&mut self) -> Result<Token, ScanError> {
        let mut buf = String::new();
        while let Some(c) = self.nextchar() {
            if c.is_ascii_alphanumeric() || c == '_' {
                buf.push(c);
            } else {
                self.reread();
                break;
            }
        }
        if let Some(kw) = keyword(&buf) {
            return Ok(kw);
        }
        Ok(Token::Symbol(Rc::from(buf.as_str())))
    }

    /// Scan a numeric literal. Also produces the bare-period tokens: `.`
    /// alone is the old-value expression, `.name` is element access.
    fn eat_number(&mut self) -> Result<Token, ScanError> {
        let first = self.nextchar().unwrap();
        if first == '.' {
            match self.peekchar() {
                Some(c) if c.is_ascii_digit() => {}
                Some(c) if c.is_ascii_alphabetic() || c == '_' => return Ok(Token::Period),
                _ => return Ok(Token::OldValue),
            }
        }
        let mut buf = String::new();
        buf.push(first);
        // radix-prefixed integers
        if first == '0' {
            if let Some(c) = self.peekchar() {
                if c == 'x' || c == 'X' || c == 'b' || c == 'B' {
                    buf.push(self.nextchar().unwrap());
                    while let Some(d) = self.peekchar() {
                        if d.is_ascii_hexdigit() {
                            buf.push(self.nextchar().unwrap());
                        } else {
                            break;
                        }
                    }
                    return self.finish_number(buf, false);
                }
            }
        }
        let mut seen_dot = first == '.';
        while let Some(c) = self.peekchar() {
            if c.is_ascii_digit() {
                buf.push(self.nextchar().unwrap());
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                buf.push(self.nextchar().unwrap());
            } else if c == 'e' || c == 'E' {
                // exponent: e[+-]?digits
                self.nextchar();
                let sign = self.peekchar();
                let mut exp = String::new();
                if sign == Some('+') || sign == Some('-') {
                    exp.push(self.nextchar().unwrap());
                }
                if !matches!(self.peekchar(), Some(d) if d.is_ascii_digit()) {
                    // not an exponent after all: put back what we took
                    for _ in 0..=exp.len() {
                        self.reread();
                    }
                    break;
                }
                while let Some(d) = self.peekchar() {
                    if d.is_ascii_digit() {
                        exp.push(self.nextchar().unwrap());
                    } else {
                        break;
                    }
                }
                buf.push('e');
                buf.push_str(&exp);
                break;
            } else {
                break;
            }
        }
        let imaginary = self.peek_eat('i') || self.peek_eat('I');
        self.finish_number(buf, imaginary)
    }

    fn finish_number(&mut self, buf: String, imaginary: bool) -> Result<Token, ScanError> {
        if crate::core::number::Number::parse(&buf).is_none() {
            return Err(ScanError::Parse(format!("badly formatted number \"{}\"", buf)));
        }
        let text: Rc<str> = Rc::from(buf.as_str());
        Ok(if imaginary {
            Token::Imaginary(text)
        } else {
            Token::Number(text)
        })
    }

    fn eat_string(&mut self, quote: char) -> Result<Token, ScanError> {
        let mut buf = String::new();
        loop {
            let ch = match self.nextchar() {
                None => return Err(ScanError::Parse("unterminated string constant".into())),
                Some('\n') if self.newlines => {
                    self.reread();
                    return Err(ScanError::Parse("unterminated string constant".into()));
                }
                Some(c) => c,
            };
            if ch == quote {
                // adjacent string literals concatenate across whitespace
                loop {
                    match self.peekchar() {
                        Some(' ') | Some('\t') | Some('\r') => {
                            self.nextchar();
                        }
                        Some('\n') if !self.newlines => {
                            self.nextchar();
                        }
                        _ => break,
                    }
                }
                if let Some(q) = self.peekchar() {
                    if q == '"' || q == '\'' {
                        let q = self.nextchar().unwrap();
                        return match self.eat_string(q)? {
                            Token::Str(rest) => {
                                buf.push_str(&rest);
                                Ok(Token::Str(Rc::from(buf.as_str())))
                            }
                            other => Ok(other),
                        };
                    }
                }
                return Ok(Token::Str(Rc::from(buf.as_str())));
            }
            if ch != '\\' {
                buf.push(ch);
                continue;
            }
            let esc = match self.nextchar() {
                None => return Err(ScanError::Parse("unterminated string constant".into())),
                Some(c) => c,
            };
            match esc {
                'n' => buf.push('\n'),
                'r' => buf.push('\r'),
                't' => buf.push('\t'),
                'b' => buf.push('\x08'),
                'f' => buf.push('\x0c'),
                'v' => buf.push('\x0b'),
                'a' => buf.push('\x07'),
                'e' => buf.push('\x1b'),
                '\n' => {} // escaped newline continues the string
                '0'..='7' => {
                    let mut v = esc as u32 - '0' as u32;
                    for _ in 0..2 {
                        match self.peekchar() {
                            Some(d @ '0'..='7') => {
                                v = v * 8 + (d as u32 - '0' as u32);
                                self.nextchar();
                            }
                            _ => break,
                        }
                    }
                    buf.push(char::from((v & 0xff) as u8));
                }
                'x' => {
                    let mut v = 0u32;
                    let mut any = false;
                    for _ in 0..2 {
                        match self.peekchar() {
                            Some(d) if d.is_ascii_hexdigit() => {
                                v = v * 16 + d.to_digit(16).unwrap();
                                self.nextchar();
                                any = true;
                            }
                            _ => break,
                        }
                    }
                    if any {
                        buf.push(char::from(v as u8));
                    } else {
                        buf.push('x');
                    }
                }
                other => buf.push(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(src: &str) -> Vec<Token> {
        let mut lx = Lexer::new(src, None);
        let mut out = Vec::new();
        loop {
            let t = lx.gettoken().expect("token");
            if t == Token::Eof {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn operators_and_compounds() {
        let toks = all_tokens("a **= b // c; d <<= 2");
        assert_eq!(
            toks,
            vec![
                Token::Symbol(Rc::from("a")),
                Token::PowerEquals,
                Token::Symbol(Rc::from("b")),
                Token::SlashSlash,
                Token::Symbol(Rc::from("c")),
                Token::Semicolon,
                Token::Symbol(Rc::from("d")),
                Token::LshiftEquals,
                Token::Number(Rc::from("2")),
            ]
        );
    }

    #[test]
    fn newline_mode_is_switchable() {
        let mut lx = Lexer::new("a\nb", None);
        assert!(matches!(lx.gettoken().unwrap(), Token::Symbol(_)));
        assert_eq!(lx.gettoken().unwrap(), Token::Newline);
        let mut lx = Lexer::new("a\nb", None);
        lx.set_mode(TM_DEFAULT);
        assert!(matches!(lx.gettoken().unwrap(), Token::Symbol(_)));
        assert!(matches!(lx.gettoken().unwrap(), Token::Symbol(_)));
    }

    #[test]
    fn rescan_returns_the_same_token() {
        let mut lx = Lexer::new("x y", None);
        let a = lx.gettoken().unwrap();
        lx.rescan();
        let b = lx.gettoken().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn string_escapes_and_concatenation() {
        let toks = all_tokens(r#""a\tb" "c""#);
        assert_eq!(toks, vec![Token::Str(Rc::from("a\tb" .to_owned() + "c"))]);
        let toks = all_tokens(r#""\101\x41""#);
        assert_eq!(toks, vec![Token::Str(Rc::from("AA"))]);
    }

    #[test]
    fn period_forms() {
        assert_eq!(all_tokens(". ")[0], Token::OldValue);
        assert_eq!(all_tokens(".x")[0], Token::Period);
        assert_eq!(all_tokens(".5")[0], Token::Number(Rc::from(".5")));
    }

    #[test]
    fn imaginary_literals() {
        assert_eq!(all_tokens("3i")[0], Token::Imaginary(Rc::from("3")));
        assert_eq!(all_tokens("2.5i")[0], Token::Imaginary(Rc::from("2.5")));
    }

    #[test]
    fn comment_forms() {
        assert_eq!(all_tokens("1 /* skip */ 2").len(), 2);
        assert_eq!(all_tokens("#! shebang\n1").len(), 2); // newline + number
        assert_eq!(all_tokens("## note\n1").len(), 2);
        let mut lx = Lexer::new("/* open", None);
        assert!(lx.gettoken().is_err());
    }

    #[test]
    fn allsyms_mode_scans_filenames() {
        let mut lx = Lexer::new("some/file-1.cal rest", None);
        lx.set_mode(TM_NEWLINES | TM_ALLSYMS);
        assert_eq!(
            lx.gettoken().unwrap(),
            Token::Symbol(Rc::from("some/file-1.cal"))
        );
    }

    #[test]
    fn source_pushdown_tracks_names_and_lines() {
        let mut lx = Lexer::new("1\n2", Some("outer"));
        assert_eq!(lx.gettoken().unwrap(), Token::Number(Rc::from("1")));
        lx.push_source("9", Some("inner"));
        assert_eq!(lx.pos().file.as_deref(), Some("inner"));
        assert_eq!(lx.gettoken().unwrap(), Token::Number(Rc::from("9")));
        assert_eq!(lx.gettoken().unwrap(), Token::Eof);
        assert!(lx.pop_source());
        assert_eq!(lx.pos().file.as_deref(), Some("outer"));
    }
}

//! Parser for buildfiles.
//!
//! Paths are expanded against the variables in scope as they are read, so
//! statements come out owned.  A parser can be recreated at a saved
//! position, which lets a load stop at an `include` and pick up after the
//! nested load finishes.

use crate::eval::{EvalPart, EvalString, LazyVars, Vars};
use crate::scanner::{ParseError, ParseResult, Scanner};

#[derive(Debug)]
pub struct Rule {
    pub name: String,
    pub vars: LazyVars,
}

#[derive(Debug)]
pub struct Build {
    pub rule: String,
    pub line: usize,
    pub outs: Vec<String>,
    pub explicit_outs: usize,
    pub ins: Vec<String>,
    pub explicit_ins: usize,
    pub implicit_ins: usize,
    pub order_only_ins: usize,
    pub vars: LazyVars,
}

impl Build {
    pub fn explicit_ins(&self) -> &[String] {
        &self.ins[..self.explicit_ins]
    }

    /// Inputs that must be up to date but don't appear in `$in`.
    pub fn implicit_ins(&self) -> &[String] {
        &self.ins[self.explicit_ins..self.explicit_ins + self.implicit_ins]
    }

    pub fn order_only_ins(&self) -> &[String] {
        &self.ins[self.explicit_ins + self.implicit_ins..]
    }

    pub fn explicit_outs(&self) -> &[String] {
        &self.outs[..self.explicit_outs]
    }
}

#[derive(Debug)]
pub enum Statement {
    Rule(Rule),
    Build(Build),
    Default(Vec<String>),
    Include(String),
}

pub struct Parser<'text> {
    scanner: Scanner<'text>,
    path_buf: String,
}

fn is_ident_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.')
}

fn is_path_char(c: char) -> bool {
    matches!(
        c,
        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' | '/' | '\\' | ',' | '+' | '@' | '='
    )
}

impl<'text> Parser<'text> {
    /// `buf` must end in a nul byte.
    pub fn new(buf: &'text [u8]) -> Parser<'text> {
        Parser::at(buf, 0, 1)
    }

    pub fn at(buf: &'text [u8], ofs: usize, line: usize) -> Parser<'text> {
        Parser {
            scanner: Scanner::at(buf, ofs, line),
            path_buf: String::with_capacity(64),
        }
    }

    /// Offset and line to resume parsing from.
    pub fn position(&self) -> (usize, usize) {
        (self.scanner.ofs, self.scanner.line)
    }

    pub fn format_parse_error(&self, filename: &str, err: ParseError) -> String {
        self.scanner.format_parse_error(filename, err)
    }

    /// Read the next statement.  Top-level variable definitions are folded
    /// into `vars` as they are met.
    pub fn read(&mut self, vars: &mut Vars) -> ParseResult<Option<Statement>> {
        loop {
            match self.scanner.peek() {
                '\0' => return Ok(None),
                '\n' | '\r' => {
                    if !self.scanner.skip_newline() {
                        return self.scanner.parse_error("unexpected carriage return");
                    }
                }
                '#' => self.skip_comment()?,
                ' ' | '\t' => return self.scanner.parse_error("unexpected whitespace"),
                _ => {
                    let ident = self.read_ident()?;
                    self.scanner.skip_spaces();
                    match ident {
                        "rule" => return Ok(Some(Statement::Rule(self.read_rule()?))),
                        "build" => return Ok(Some(Statement::Build(self.read_build(vars)?))),
                        "default" => {
                            return Ok(Some(Statement::Default(self.read_default(vars)?)))
                        }
                        "include" => {
                            let path = match self.read_path(vars)? {
                                None => return self.scanner.parse_error("expected path"),
                                Some(p) => p,
                            };
                            self.scanner.skip_spaces();
                            self.scanner.expect('\n')?;
                            return Ok(Some(Statement::Include(path)));
                        }
                        ident => {
                            let val = self.read_vardef()?.evaluate(&[&*vars]);
                            vars.insert(ident, val);
                        }
                    }
                }
            }
        }
    }

    fn read_vardef(&mut self) -> ParseResult<EvalString<&'text str>> {
        self.scanner.skip_spaces();
        self.scanner.expect('=')?;
        self.scanner.skip_spaces();
        self.read_eval()
    }

    fn read_scoped_vars(&mut self) -> ParseResult<LazyVars> {
        let mut vars = LazyVars::new();
        while self.scanner.peek() == ' ' {
            self.scanner.skip_spaces();
            let name = self.read_ident()?;
            self.scanner.skip_spaces();
            let val = self.read_vardef()?;
            vars.insert(name.to_owned(), val.into_owned());
        }
        Ok(vars)
    }

    fn read_rule(&mut self) -> ParseResult<Rule> {
        let name = self.read_ident()?.to_owned();
        self.scanner.skip_spaces();
        self.scanner.expect('\n')?;
        let vars = self.read_scoped_vars()?;
        for (key, _) in vars.keyvals() {
            if !matches!(key.as_str(), "command" | "description" | "depfile") {
                return self
                    .scanner
                    .parse_error(format!("unexpected rule attribute {:?}", key));
            }
        }
        Ok(Rule { name, vars })
    }

    fn read_paths_to(&mut self, vars: &Vars, v: &mut Vec<String>) -> ParseResult<()> {
        self.scanner.skip_spaces();
        while let Some(path) = self.read_path(vars)? {
            v.push(path);
            self.scanner.skip_spaces();
        }
        Ok(())
    }

    fn read_build(&mut self, vars: &Vars) -> ParseResult<Build> {
        let line = self.scanner.line;
        let mut outs = Vec::new();
        self.read_paths_to(vars, &mut outs)?;
        let explicit_outs = outs.len();
        if explicit_outs == 0 {
            return self.scanner.parse_error("expected output path");
        }

        if self.scanner.peek() == '|' {
            self.scanner.next();
            self.read_paths_to(vars, &mut outs)?;
        }

        self.scanner.expect(':')?;
        self.scanner.skip_spaces();
        let rule = self.read_ident()?.to_owned();

        let mut ins = Vec::new();
        self.read_paths_to(vars, &mut ins)?;
        let explicit_ins = ins.len();

        if self.scanner.peek() == '|' {
            self.scanner.next();
            if self.scanner.peek() == '|' {
                self.scanner.back();
            } else {
                self.read_paths_to(vars, &mut ins)?;
            }
        }
        let implicit_ins = ins.len() - explicit_ins;

        if self.scanner.peek() == '|' {
            self.scanner.next();
            self.scanner.expect('|')?;
            self.read_paths_to(vars, &mut ins)?;
        }
        let order_only_ins = ins.len() - implicit_ins - explicit_ins;

        self.scanner.expect('\n')?;
        let vars = self.read_scoped_vars()?;
        Ok(Build {
            rule,
            line,
            outs,
            explicit_outs,
            ins,
            explicit_ins,
            implicit_ins,
            order_only_ins,
            vars,
        })
    }

    fn read_default(&mut self, vars: &Vars) -> ParseResult<Vec<String>> {
        let mut defaults = Vec::new();
        self.read_paths_to(vars, &mut defaults)?;
        if defaults.is_empty() {
            return self.scanner.parse_error("expected path");
        }
        self.scanner.expect('\n')?;
        Ok(defaults)
    }

    fn skip_comment(&mut self) -> ParseResult<()> {
        loop {
            match self.scanner.read() {
                '\0' => return Ok(()),
                '\n' => return Ok(()),
                _ => {}
            }
        }
    }

    fn read_ident(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while is_ident_char(self.scanner.peek()) {
            self.scanner.next();
        }
        let end = self.scanner.ofs;
        if end == start {
            return self.scanner.parse_error("failed to scan ident");
        }
        Ok(self.scanner.slice(start, end))
    }

    fn read_eval(&mut self) -> ParseResult<EvalString<&'text str>> {
        let mut parts = Vec::new();
        let mut ofs = self.scanner.ofs;
        let end = loop {
            match self.scanner.peek() {
                '\0' => break self.scanner.ofs,
                '\r' if self.scanner.peek_newline() => {
                    let end = self.scanner.ofs;
                    self.scanner.skip_newline();
                    break end;
                }
                '\n' => {
                    let end = self.scanner.ofs;
                    self.scanner.next();
                    break end;
                }
                '$' => {
                    let end = self.scanner.ofs;
                    if end > ofs {
                        parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
                    }
                    self.scanner.next();
                    if let Some(part) = self.read_escape()? {
                        parts.push(part);
                    }
                    ofs = self.scanner.ofs;
                }
                _ => self.scanner.next(),
            }
        };
        if end > ofs {
            parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
        }
        Ok(EvalString::new(parts))
    }

    fn read_path(&mut self, vars: &Vars) -> ParseResult<Option<String>> {
        self.path_buf.clear();
        loop {
            let c = self.scanner.peek();
            if is_path_char(c) {
                self.path_buf.push(c);
                self.scanner.next();
                continue;
            }
            match c {
                '$' => {
                    self.scanner.next();
                    match self.read_escape()? {
                        Some(EvalPart::Literal(l)) => self.path_buf.push_str(l),
                        Some(EvalPart::VarRef(v)) => {
                            if let Some(v) = vars.get(v) {
                                self.path_buf.push_str(v);
                            }
                        }
                        None => {}
                    }
                }
                '\0' | ':' | '|' | ' ' | '\n' | '\r' => break,
                c => {
                    return self
                        .scanner
                        .parse_error(format!("unexpected character {:?}", c));
                }
            }
        }
        if self.path_buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.path_buf.clone()))
    }

    /// Read what follows a '$'.  A line continuation yields nothing.
    fn read_escape(&mut self) -> ParseResult<Option<EvalPart<&'text str>>> {
        let c = self.scanner.peek();
        Ok(match c {
            '\n' | '\r' => {
                if !self.scanner.skip_newline() {
                    return self.scanner.parse_error("unexpected carriage return");
                }
                self.scanner.skip_spaces();
                None
            }
            ' ' | '$' | ':' => {
                let start = self.scanner.ofs;
                self.scanner.next();
                Some(EvalPart::Literal(self.scanner.slice(start, start + 1)))
            }
            '{' => {
                self.scanner.next();
                let start = self.scanner.ofs;
                loop {
                    match self.scanner.read() {
                        '\0' => return self.scanner.parse_error("unexpected EOF"),
                        '}' => break,
                        _ => {}
                    }
                }
                let end = self.scanner.ofs - 1;
                Some(EvalPart::VarRef(self.scanner.slice(start, end)))
            }
            _ => Some(EvalPart::VarRef(self.read_ident()?)),
        })
    }
}

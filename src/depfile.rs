//! Parser for the Makefile-style dependency files compilers write with
//! `-MD`: a single rule naming the output and the inputs it read.

use crate::scanner::{ParseResult, Scanner};

#[derive(Debug)]
pub struct Deps<'a> {
    pub target: &'a str,
    pub deps: Vec<&'a str>,
}

/// Skip spaces and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.peek() {
            ' ' | '\t' => scanner.next(),
            '\\' => {
                scanner.next();
                if !scanner.skip_newline() {
                    return scanner.parse_error("invalid backslash escape");
                }
            }
            _ => return Ok(()),
        }
    }
}

fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<&'a str>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    loop {
        match scanner.peek() {
            '\0' | ' ' | '\t' | '\n' | '\r' => break,
            // A colon ends the target unless it's part of a drive letter.
            ':' if !(scanner.ofs == start + 1 && matches!(scanner.peek_next(), '/' | '\\')) => {
                break
            }
            _ => scanner.next(),
        }
    }
    let end = scanner.ofs;
    if end == start {
        return Ok(None);
    }
    Ok(Some(scanner.slice(start, end)))
}

pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Deps<'a>> {
    let target = match read_path(scanner)? {
        None => return scanner.parse_error("expected file"),
        Some(o) => o,
    };
    scanner.expect(':')?;
    let mut deps = Vec::new();
    while let Some(p) = read_path(scanner)? {
        deps.push(p);
    }
    while scanner.skip_newline() {}
    if scanner.peek() != '\0' {
        return scanner.parse_error("expected end of file");
    }
    Ok(Deps { target, deps })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_parse(text: &str) -> (String, Vec<String>) {
        let mut buf = text.as_bytes().to_vec();
        buf.push(0);
        let mut scanner = Scanner::new(&buf);
        match parse(&mut scanner) {
            Err(err) => panic!("{}", scanner.format_parse_error("test.d", err)),
            Ok(d) => (
                d.target.to_string(),
                d.deps.iter().map(|s| s.to_string()).collect(),
            ),
        }
    }

    #[test]
    fn single_line() {
        let (target, deps) =
            must_parse("build/browse.o: src/browse.cc src/browse.h build/browse_py.h\n");
        assert_eq!(target, "build/browse.o");
        assert_eq!(deps, vec!["src/browse.cc", "src/browse.h", "build/browse_py.h"]);
    }

    #[test]
    fn continuations_and_crlf() {
        let (target, deps) = must_parse("foo.o: \\\r\n  foo.c \\\n  foo.h\r\n");
        assert_eq!(target, "foo.o");
        assert_eq!(deps, vec!["foo.c", "foo.h"]);
    }

    #[test]
    fn drive_letters() {
        let (target, deps) = must_parse("c:/out/foo.obj: c:/src/foo.cpp");
        assert_eq!(target, "c:/out/foo.obj");
        assert_eq!(deps, vec!["c:/src/foo.cpp"]);
    }

    #[test]
    fn rejects_trailing_rules() {
        let buf = b"a: b\nc: d\n\0".to_vec();
        let mut scanner = Scanner::new(&buf);
        assert!(parse(&mut scanner).is_err());
    }
}

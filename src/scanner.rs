//! Scans an input buffer character by character.  The buffer must end in a
//! nul byte, which reads as end of input.

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

pub struct Scanner<'a> {
    buf: &'a [u8],
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Scanner::at(buf, 0, 1)
    }

    /// Pick up scanning where an earlier scanner over the same buffer left
    /// off.
    pub fn at(buf: &'a [u8], ofs: usize, line: usize) -> Self {
        assert!(buf.ends_with(b"\0"), "Scanner requires nul-terminated buf");
        Scanner { buf, ofs, line }
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        // Slices are only taken on ASCII delimiters, so a valid UTF-8
        // buffer yields valid pieces; anything else reads as empty.
        std::str::from_utf8(&self.buf[start..end]).unwrap_or("")
    }

    pub fn peek(&self) -> char {
        self.buf[self.ofs] as char
    }

    /// The character after the next one.
    pub fn peek_next(&self) -> char {
        self.buf.get(self.ofs + 1).map_or('\0', |&c| c as char)
    }

    pub fn peek_newline(&self) -> bool {
        match self.peek() {
            '\n' => true,
            '\r' => self.buf.get(self.ofs + 1) == Some(&b'\n'),
            _ => false,
        }
    }

    pub fn next(&mut self) {
        if self.peek() == '\n' {
            self.line += 1;
        }
        if self.ofs == self.buf.len() - 1 {
            panic!("scanned past end")
        }
        self.ofs += 1;
    }

    pub fn back(&mut self) {
        if self.ofs == 0 {
            panic!("back at start")
        }
        self.ofs -= 1;
        if self.peek() == '\n' {
            self.line -= 1;
        }
    }

    /// Read one character; at the end of input this keeps returning '\0'.
    pub fn read(&mut self) -> char {
        let c = self.peek();
        if c != '\0' || self.ofs < self.buf.len() - 1 {
            self.next();
        }
        c
    }

    pub fn skip(&mut self, ch: char) -> bool {
        if self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    pub fn skip_spaces(&mut self) {
        while self.skip(' ') {}
    }

    /// Skip a newline, accepting CRLF.
    pub fn skip_newline(&mut self) -> bool {
        if self.peek() == '\r' && self.peek_newline() {
            self.next();
        }
        self.skip('\n')
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        if ch == '\n' && self.skip_newline() {
            return Ok(());
        }
        if self.skip(ch) {
            return Ok(());
        }
        self.parse_error(format!("expected {:?}, got {:?}", ch, self.peek()))
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    pub fn format_parse_error(&self, filename: &str, err: ParseError) -> String {
        let mut ofs = 0;
        let text = &self.buf[..self.buf.len() - 1];
        for (line_number, line) in text.split(|&c| c == b'\n').enumerate() {
            if ofs + line.len() >= err.ofs {
                let mut msg = format!("parse error: {}\n", err.msg);
                let prefix = format!("{}:{}: ", filename, line_number + 1);
                msg.push_str(&prefix);

                let context = String::from_utf8_lossy(line);
                let mut context: &str = &context;
                let mut col = err.ofs - ofs;
                if col > 40 && context.is_char_boundary(col - 20) {
                    // Trim beginning of line to fit it on screen.
                    msg.push_str("...");
                    context = &context[col - 20..];
                    col = 3 + 20;
                }
                if context.len() > 40 && context.is_char_boundary(40) {
                    msg.push_str(&context[0..40]);
                    msg.push_str("...");
                } else {
                    msg.push_str(context);
                }
                msg.push('\n');
                msg.push_str(&" ".repeat(prefix.len() + col));
                msg.push_str("^\n");
                return msg;
            }
            ofs += line.len() + 1;
        }
        format!("parse error: {}\n{}: at end of file\n", err.msg, filename)
    }
}

//! Indented line builder for kernel text.

const TAB: &str = "    ";

/// Accumulates kernel source one line at a time at the current indentation.
#[derive(Debug, Default, Clone)]
pub struct KernelStream {
    buf: String,
    indent: usize,
}

impl KernelStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` on its own line.
    pub fn line(&mut self, text: impl AsRef<str>) -> &mut Self {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.buf.push_str(TAB);
            }
            self.buf.push_str(text);
        }
        self.buf.push('\n');
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.line("")
    }

    pub fn comment(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.line(format!("// {}", text.as_ref()))
    }

    pub fn inc_tab(&mut self) -> &mut Self {
        self.indent += 1;
        self
    }

    pub fn dec_tab(&mut self) -> &mut Self {
        self.indent = self.indent.saturating_sub(1);
        self
    }

    /// Open a braced block: `header {` then indent.
    pub fn open(&mut self, header: impl AsRef<str>) -> &mut Self {
        let header = header.as_ref();
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(format!("{} {{", header));
        }
        self.inc_tab()
    }

    /// Close the innermost block.
    pub fn close(&mut self) -> &mut Self {
        self.dec_tab().line("}")
    }

    pub fn indent(&self) -> usize {
        self.indent
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks() {
        let mut s = KernelStream::new();
        s.open("void f()");
        s.open("for(int i = 0; i < 4; ++i)");
        s.line("x += i;");
        s.close();
        s.blank();
        s.close();
        assert_eq!(
            s.as_str(),
            "void f() {\n    for(int i = 0; i < 4; ++i) {\n        x += i;\n    }\n\n}\n"
        );
        assert_eq!(s.indent(), 0);
    }

    #[test]
    fn test_dec_tab_saturates() {
        let mut s = KernelStream::new();
        s.dec_tab().comment("top");
        assert_eq!(s.into_string(), "// top\n");
    }
}

// UI layer: console prompting for manual weight entry. On a terminal the
// prompt goes through `dialoguer`; when stdin is piped (or in tests) a plain
// line reader is used instead so input can be scripted.

use dialoguer::Input;
use std::io::{self, BufRead, BufReader, IsTerminal, Stdin, Stdout, Write};

/// Something that can ask the operator a question and return the answer.
/// `Ok(None)` means the input is closed and no more answers will come.
pub trait Prompt {
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

impl<P: Prompt + ?Sized> Prompt for Box<P> {
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        (**self).ask(prompt)
    }
}

/// Interactive terminal prompt backed by `dialoguer::Input`.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        // Empty input must reach the caller so it can be reported as invalid.
        let value: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?;
        Ok(Some(value))
    }
}

/// Line-oriented prompt over any reader/writer pair.
pub struct LinePrompt<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        LinePrompt { reader, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<R: BufRead, W: Write> Prompt for LinePrompt<R, W> {
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.writer, "{}: ", prompt)?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

/// Prompt for the process console: dialoguer on a terminal, a line reader
/// otherwise.
pub fn console_prompt() -> Box<dyn Prompt + Send> {
    if io::stdin().is_terminal() {
        Box::new(TerminalPrompt)
    } else {
        let prompt: LinePrompt<BufReader<Stdin>, Stdout> =
            LinePrompt::new(BufReader::new(io::stdin()), io::stdout());
        Box::new(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn line_prompt_writes_prompt_and_returns_lines() {
        let mut prompt = LinePrompt::new(Cursor::new("12.5\n"), Vec::new());

        assert_eq!(prompt.ask("Weight").unwrap().as_deref(), Some("12.5\n"));
        assert_eq!(prompt.ask("Weight").unwrap(), None);
        assert_eq!(
            String::from_utf8(prompt.into_writer()).unwrap(),
            "Weight: Weight: "
        );
    }
}

use std::io::{BufRead, Write};

use crate::{AppError, Result};

/// Line-oriented question/answer over any reader and writer pair.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, line: &str) -> Result<()> {
        writeln!(self.output, "{line}")?;
        Ok(())
    }

    /// Returns the answer without its line ending. A closed input is an error.
    pub fn ask(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            return Err(AppError::MissingInput(question.trim_end().to_string()));
        }
        let trimmed = answer.trim_end_matches(['\n', '\r']).len();
        answer.truncate(trimmed);
        Ok(answer)
    }
}

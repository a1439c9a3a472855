use std::io::{self, BufRead, Write};

/// Console streams the program talks to through syscalls.
pub struct Host {
    pub out: Box<dyn Write>,
    pub input: Box<dyn BufRead>,
}

impl Host {
    pub fn stdio() -> Self {
        Self {
            out: Box::new(io::stdout()),
            input: Box::new(io::BufReader::new(io::stdin())),
        }
    }

    /// Reads one line without its terminator. `None` at end of input.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

#[cfg(test)]
pub use capture::SharedBuffer;

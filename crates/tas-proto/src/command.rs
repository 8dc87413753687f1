//! Command line grammar.
//!
//! A protocol line is one command name plus arguments, terminated by a single
//! linefeed (the terminator itself is owned by the transport, not this
//! crate). Arguments come in two kinds:
//!
//! - *words*: single tokens separated by one space;
//! - *sentences*: free-text arguments that may contain spaces. The first
//!   sentence follows the last word after a space; every further sentence is
//!   separated by a TAB.
//!
//! Because the first sentence is space-joined onto the word segment, a
//! decoded line cannot tell a trailing sentence from trailing words without
//! per-command knowledge. [`unmarshall`] therefore splits the head segment
//! fully into words and consumers re-join with [`Command::rest`] where a
//! command's grammar says "rest of line". TAB-separated sentences past the
//! first are unambiguous and preserved verbatim in [`Command::tails`].
//!
//! A line may carry a `#<id>` correlation prefix ahead of the name; it is
//! surfaced as [`Command::prefix`] and re-emitted by [`marshall`].

use crate::error::{ProtocolError, Result};

/// A decoded (or to-be-encoded) protocol command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// Correlation prefix (`#<id>`), if the line carried one.
    pub prefix: Option<u32>,
    /// The command name followed by its word arguments. `words[0]` is the
    /// name and is never empty for a value produced by [`unmarshall`].
    pub words: Vec<String>,
    /// TAB-separated sentences past the first (see module docs).
    pub tails: Vec<String>,
}

impl Command {
    /// Start a command with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            words: vec![name.into()],
            tails: Vec::new(),
        }
    }

    /// Append one word argument.
    #[must_use]
    pub fn word(mut self, word: impl Into<String>) -> Self {
        self.words.push(word.into());
        self
    }

    /// Append a sentence argument.
    ///
    /// The first sentence lands space-joined after the words; later ones are
    /// TAB-separated.
    #[must_use]
    pub fn sentence(mut self, text: impl Into<String>) -> Self {
        self.tails.push(text.into());
        self
    }

    /// Attach a `#<id>` correlation prefix.
    #[must_use]
    pub fn with_prefix(mut self, id: u32) -> Self {
        self.prefix = Some(id);
        self
    }

    /// The command name (empty only for hand-built values).
    pub fn name(&self) -> &str {
        self.words.first().map(String::as_str).unwrap_or("")
    }

    /// The `n`-th word argument (0-based, name excluded).
    pub fn arg(&self, n: usize) -> Option<&str> {
        self.words.get(n + 1).map(String::as_str)
    }

    /// All word arguments (name excluded).
    pub fn args(&self) -> &[String] {
        self.words.get(1..).unwrap_or(&[])
    }

    /// The `n`-th TAB sentence (0-based).
    pub fn tail(&self, n: usize) -> Option<&str> {
        self.tails.get(n).map(String::as_str)
    }

    /// Re-join the word arguments from index `n` on into the original
    /// space-separated text. `None` when fewer than `n + 1` arguments exist.
    pub fn rest(&self, n: usize) -> Option<String> {
        self.words.get(n + 1..).and_then(|tail| {
            if tail.is_empty() {
                None
            } else {
                Some(tail.join(" "))
            }
        })
    }

    /// The event name with the correlation prefix re-attached, as it
    /// appeared on the wire (`"#7 PONG"`), or just the name without one.
    pub fn full_name(&self) -> String {
        match self.prefix {
            Some(id) => format!("#{} {}", id, self.name()),
            None => self.name().to_string(),
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Encode a command into a wire line (terminator excluded).
///
/// Word arguments must be free of spaces, TABs and line breaks; sentences
/// must be free of TABs and line breaks.
pub fn marshall(cmd: &Command) -> Result<String> {
    if cmd.words.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }
    if !valid_name(cmd.name()) {
        return Err(ProtocolError::BadCommandName(cmd.name().to_string()));
    }

    let mut line = String::with_capacity(64);
    if let Some(id) = cmd.prefix {
        line.push('#');
        line.push_str(&id.to_string());
        line.push(' ');
    }
    line.push_str(cmd.name());

    for word in &cmd.words[1..] {
        if word.contains([' ', '\t', '\n']) {
            return Err(ProtocolError::IllegalWord(word.clone()));
        }
        line.push(' ');
        line.push_str(word);
    }

    for (i, tail) in cmd.tails.iter().enumerate() {
        if tail.contains(['\t', '\n']) {
            return Err(ProtocolError::IllegalSentence(tail.clone()));
        }
        line.push(if i == 0 { ' ' } else { '\t' });
        line.push_str(tail);
    }

    Ok(line)
}

/// Decode a wire line (terminator excluded) into a [`Command`].
///
/// The head TAB segment is split fully on single spaces; empty words from
/// doubled spaces are preserved so [`Command::rest`] reproduces the original
/// text byte for byte.
pub fn unmarshall(line: &str) -> Result<Command> {
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let mut segments = line.split('\t');
    let head = segments.next().unwrap_or("");
    let tails: Vec<String> = segments.map(str::to_string).collect();

    let mut words: Vec<String> = head.split(' ').map(str::to_string).collect();

    let mut prefix = None;
    if let Some(first) = words.first() {
        if let Some(digits) = first.strip_prefix('#') {
            match digits.parse::<u32>() {
                Ok(id) => {
                    prefix = Some(id);
                    words.remove(0);
                }
                Err(_) => return Err(ProtocolError::BadPrefix(first.clone())),
            }
        }
    }

    match words.first() {
        Some(name) if valid_name(name) => Ok(Command {
            prefix,
            words,
            tails,
        }),
        Some(name) => Err(ProtocolError::BadCommandName(name.clone())),
        None => Err(ProtocolError::EmptyLine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_round_trip() {
        let cmd = Command::new("LEAVE").word("main");
        let line = marshall(&cmd).unwrap();
        assert_eq!(line, "LEAVE main");
        assert_eq!(unmarshall(&line).unwrap(), cmd);
    }

    #[test]
    fn test_sentences_encode_with_tab_separators() {
        let cmd = Command::new("OPENBATTLE")
            .word("0")
            .word("0")
            .word("*")
            .word("8452")
            .word("16")
            .sentence("spring 105.1")
            .sentence("Delta Siege Dry")
            .sentence("Team Fortress");
        assert_eq!(
            marshall(&cmd).unwrap(),
            "OPENBATTLE 0 0 * 8452 16 spring 105.1\tDelta Siege Dry\tTeam Fortress"
        );
    }

    #[test]
    fn test_first_sentence_merges_into_words_on_decode() {
        let parsed = unmarshall("SAID main Bitey hello  there").unwrap();
        assert_eq!(parsed.name(), "SAID");
        assert_eq!(parsed.arg(0), Some("main"));
        assert_eq!(parsed.arg(1), Some("Bitey"));
        // Doubled space preserved through the re-join.
        assert_eq!(parsed.rest(2).as_deref(), Some("hello  there"));
        assert!(parsed.rest(4).is_none());
    }

    #[test]
    fn test_tab_sentences_survive_decode() {
        let parsed = unmarshall("BATTLEOPENED 3 0 0 F 1.2.3.4 8452 16 0 0 777 spring\t105.1\tDSD\tMy Game\tBA").unwrap();
        assert_eq!(parsed.arg(9), Some("777"));
        assert_eq!(parsed.arg(10), Some("spring"));
        assert_eq!(parsed.tail(0), Some("105.1"));
        assert_eq!(parsed.tail(3), Some("BA"));
    }

    #[test]
    fn test_correlation_prefix() {
        let parsed = unmarshall("#12 PONG").unwrap();
        assert_eq!(parsed.prefix, Some(12));
        assert_eq!(parsed.name(), "PONG");
        assert_eq!(parsed.full_name(), "#12 PONG");

        let again = marshall(&parsed).unwrap();
        assert_eq!(again, "#12 PONG");
    }

    #[test]
    fn test_bad_prefix_rejected() {
        assert!(matches!(
            unmarshall("#twelve PONG"),
            Err(ProtocolError::BadPrefix(_))
        ));
    }

    #[test]
    fn test_garbage_name_rejected() {
        assert!(matches!(
            unmarshall("{\"not\":\"a command\"}"),
            Err(ProtocolError::BadCommandName(_))
        ));
        assert!(matches!(unmarshall(""), Err(ProtocolError::EmptyLine)));
    }

    #[test]
    fn test_word_with_space_rejected_on_encode() {
        let cmd = Command::new("JOIN").word("two words");
        assert!(matches!(marshall(&cmd), Err(ProtocolError::IllegalWord(_))));
    }

    #[test]
    fn test_sentence_with_tab_rejected_on_encode() {
        let cmd = Command::new("SAY").word("main").sentence("a\tb");
        assert!(matches!(
            marshall(&cmd),
            Err(ProtocolError::IllegalSentence(_))
        ));
    }
}

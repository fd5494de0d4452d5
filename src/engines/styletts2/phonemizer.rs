use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::model::{StyleTtsError, StyleTts2Model};
use super::vocab::{Vocab, PAD_ID};

/// Location of the espeak-ng binary and its data directory.
///
/// `None` falls back to `espeak-ng` on PATH and its built-in data path.
#[derive(Debug, Clone, Default)]
pub struct EspeakConfig {
    pub bin_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
}

/// Grapheme-to-phoneme backend.
///
/// Receives punctuation-free text runs and returns one IPA string per run.
pub trait GraphemeToPhoneme: Send + Sync {
    fn phonemize_batch(&self, segments: &[&str]) -> Result<Vec<String>, StyleTtsError>;
}

/// espeak-ng driven through its command-line interface.
#[derive(Debug, Clone)]
pub struct EspeakBackend {
    config: EspeakConfig,
    language: String,
}

impl EspeakBackend {
    pub fn new(config: EspeakConfig, language: impl Into<String>) -> Self {
        Self {
            config,
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Phonemize a short fixed sentence to confirm the backend works.
    pub fn self_check(&self) -> Result<String, StyleTtsError> {
        self.run("hello world").map(|ipa| normalize_ipa(&ipa))
    }

    fn run(&self, input: &str) -> Result<String, StyleTtsError> {
        let bin = self
            .config
            .bin_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("espeak-ng"));

        let mut command = Command::new(bin);
        command
            .args(["--ipa", "--stdin", "-q", "-v", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(data) = &self.config.data_path {
            command.env("ESPEAK_DATA_PATH", data);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StyleTtsError::EspeakNotFound
            } else {
                StyleTtsError::Io(e)
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // the last line is only spoken in full when newline-terminated
            writeln!(stdin, "{}", input.trim_end_matches('\n'))?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StyleTtsError::PhonemizerFailed(format!(
                "espeak-ng exited with code {:?}: {stderr}",
                output.status.code()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl GraphemeToPhoneme for EspeakBackend {
    fn phonemize_batch(&self, segments: &[&str]) -> Result<Vec<String>, StyleTtsError> {
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let output = self.run(&segments.join("\n"))?;
        let lines: Vec<&str> = output.lines().collect();

        // One output line per input line is expected in stdin mode; otherwise
        // fall back to one invocation per run.
        if lines.len() != segments.len() {
            return segments
                .iter()
                .map(|segment| self.run(segment).map(|ipa| normalize_ipa(&ipa)))
                .collect();
        }

        Ok(lines.iter().map(|line| normalize_ipa(line)).collect())
    }
}

/// Join output lines, drop espeak's `_` pause markers and collapse whitespace.
fn normalize_ipa(ipa: &str) -> String {
    ipa.split_whitespace()
        .map(|word| word.replace('_', ""))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Phoneme string of one text segment and its token ids.
///
/// `tokens[0]` is the start-of-sequence id; `tokens[i + 1]` is the id of the
/// `i`-th char of `phonemes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhonemeSequence {
    pub phonemes: String,
    pub tokens: Vec<i64>,
}

impl PhonemeSequence {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Converts text into token ids of the model's closed vocabulary.
pub struct Phonemizer<'a> {
    backend: &'a dyn GraphemeToPhoneme,
    vocab: &'a Vocab,
}

impl<'a> Phonemizer<'a> {
    pub fn new(model: &'a StyleTts2Model) -> Self {
        Self::with_backend(model.g2p(), model.vocab())
    }

    pub fn with_backend(backend: &'a dyn GraphemeToPhoneme, vocab: &'a Vocab) -> Self {
        Self { backend, vocab }
    }

    /// Phonemize `text` and map every phoneme symbol to its id.
    ///
    /// Sentence punctuation is carried over from the text, since the backend
    /// drops it. Words and punctuation are separated by single spaces.
    /// A symbol outside the vocabulary is an error, never silently dropped.
    pub fn to_phonemes(&self, text: &str) -> Result<PhonemeSequence, StyleTtsError> {
        let parts = pieces(text);

        let runs: Vec<&str> = parts
            .iter()
            .filter_map(|part| match part {
                Piece::Words(run) => Some(*run),
                Piece::Mark(_) => None,
            })
            .collect();
        let run_ipa = self.backend.phonemize_batch(&runs)?;
        if run_ipa.len() != runs.len() {
            return Err(StyleTtsError::PhonemizerFailed(format!(
                "backend returned {} results for {} inputs",
                run_ipa.len(),
                runs.len()
            )));
        }

        let mut spoken = Vec::with_capacity(parts.len());
        let mut next_run = run_ipa.iter();
        for part in &parts {
            match part {
                Piece::Words(_) => {
                    if let Some(ipa) = next_run.next() {
                        spoken.push(ipa.clone());
                    }
                }
                Piece::Mark(ch) => spoken.push(ch.to_string()),
            }
        }
        let phonemes = tokenize_words(&spoken.join(" "));

        let mut tokens = Vec::with_capacity(phonemes.chars().count() + 1);
        tokens.push(PAD_ID);
        for (position, symbol) in phonemes.chars().enumerate() {
            let id = self
                .vocab
                .id(symbol)
                .ok_or(StyleTtsError::UnsupportedSymbol { symbol, position })?;
            tokens.push(id);
        }

        Ok(PhonemeSequence { phonemes, tokens })
    }
}

/// Separate leading and trailing punctuation from each word and re-join the
/// tokens with single spaces (`"wˈɜːld."` becomes `"wˈɜːld ."`).
fn tokenize_words(phonemes: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for word in phonemes.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        let start = chars.iter().position(|c| !is_boundary_punct(*c));
        let Some(start) = start else {
            tokens.extend(chars.iter().map(|c| c.to_string()));
            continue;
        };
        let end = chars
            .iter()
            .rposition(|c| !is_boundary_punct(*c))
            .map_or(chars.len(), |idx| idx + 1);

        tokens.extend(chars[..start].iter().map(|c| c.to_string()));
        tokens.push(chars[start..end].iter().collect());
        tokens.extend(chars[end..].iter().map(|c| c.to_string()));
    }
    tokens.join(" ")
}

fn is_boundary_punct(c: char) -> bool {
    sentence_mark(c).is_some()
}

/// A stretch of input text: words for the backend, or a mark copied as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'t> {
    Words(&'t str),
    Mark(char),
}

/// Cut `text` at sentence punctuation. A `.` or `,` between two digits stays
/// inside its number.
fn pieces(text: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let next = chars.peek().map(|&(_, c)| c);
        let in_number = matches!(ch, '.' | ',')
            && prev.is_some_and(|c| c.is_ascii_digit())
            && next.is_some_and(|c| c.is_ascii_digit());
        prev = Some(ch);

        let Some(mark) = sentence_mark(ch).filter(|_| !in_number) else {
            continue;
        };
        push_words(&mut out, &text[start..idx]);
        out.push(Piece::Mark(mark));
        start = idx + ch.len_utf8();
    }
    push_words(&mut out, &text[start..]);
    out
}

fn push_words<'t>(out: &mut Vec<Piece<'t>>, run: &'t str) {
    let run = run.trim();
    if !run.is_empty() {
        out.push(Piece::Words(run));
    }
}

/// Punctuation kept as its own token. Only symbols present in the trained
/// vocabulary are listed; line breaks end a sentence.
fn sentence_mark(ch: char) -> Option<char> {
    match ch {
        '.' | '!' | '?' | ',' | ';' | ':' | '¡' | '¿' | '—' | '…' | '"' | '«' | '»'
        | '\u{201c}' | '\u{201d}' => Some(ch),
        '\n' | '\r' => Some('.'),
        _ => None,
    }
}

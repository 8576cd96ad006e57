//! Interaction gate: fixed-option prompts with remembered ("pinned") answers.
//!
//! Every question carries a token. Answering `all`, `nottoall` or one of the
//! `always*` options pins the token to the base answer, and later questions
//! with the same token return it without prompting. The pinned table lives
//! in the [`Gate`], so each run (and each test) starts from a clean slate.
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, BufRead as _, Write as _};
use std::sync::{Arc, Mutex};

use crate::error::PromptError;

/// One answer a prompt can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Choice {
    /// Go ahead.
    Yes,
    /// Leave this one alone.
    No,
    /// Stop the run.
    Exit,
    /// `yes` now and for every later question with the same token.
    All,
    /// `no` now and for every later question with the same token.
    NotToAll,
    /// Replace the system file with the new version.
    Overwrite,
    /// Keep the system file.
    Skip,
    /// Merge the new version into the system file.
    Resolve,
    /// `overwrite` for every later conflict.
    AlwaysOverwrite,
    /// `skip` for every later conflict.
    AlwaysSkip,
    /// `resolve` for every later conflict.
    AlwaysResolve,
}

impl Choice {
    /// The lowercase word accepted as input.
    #[must_use]
    pub const fn word(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Exit => "exit",
            Self::All => "all",
            Self::NotToAll => "nottoall",
            Self::Overwrite => "overwrite",
            Self::Skip => "skip",
            Self::Resolve => "resolve",
            Self::AlwaysOverwrite => "alwaysoverwrite",
            Self::AlwaysSkip => "alwaysskip",
            Self::AlwaysResolve => "alwaysresolve",
        }
    }

    /// One-letter shortcut; the compound answers have none.
    #[must_use]
    pub fn shortcut(self) -> Option<char> {
        match self {
            Self::NotToAll | Self::AlwaysOverwrite | Self::AlwaysSkip | Self::AlwaysResolve => {
                None
            }
            _ => self.word().chars().next(),
        }
    }

    /// Capitalized display label, e.g. `Alwaysoverwrite`.
    #[must_use]
    pub fn label(self) -> String {
        let word = self.word();
        let mut chars = word.chars();
        chars.next().map_or_else(String::new, |first| {
            first.to_ascii_uppercase().to_string() + chars.as_str()
        })
    }

    /// The base meaning this answer pins for later questions, if any.
    #[must_use]
    pub const fn pins(self) -> Option<Self> {
        match self {
            Self::All => Some(Self::Yes),
            Self::NotToAll => Some(Self::No),
            Self::AlwaysOverwrite => Some(Self::Overwrite),
            Self::AlwaysSkip => Some(Self::Skip),
            Self::AlwaysResolve => Some(Self::Resolve),
            _ => None,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.word())
    }
}

/// Render a prompt line: `<prompt>[Opt1/Opt2/...]: `.
#[must_use]
pub fn render(prompt: &str, options: &[Choice]) -> String {
    let labels: Vec<String> = options.iter().map(|o| o.label()).collect();
    format!("{prompt}[{}]: ", labels.join("/"))
}

/// Match raw input against the offered options.
///
/// Empty input selects the first option; otherwise a full word
/// (case-insensitive) or a single-letter shortcut is accepted.
#[must_use]
pub fn parse_answer(input: &str, options: &[Choice]) -> Option<Choice> {
    let input = input.trim().to_ascii_lowercase();
    if input.is_empty() {
        return options.first().copied();
    }
    if let Some(choice) = options.iter().find(|o| o.word() == input) {
        return Some(*choice);
    }
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => options
            .iter()
            .find(|o| o.shortcut() == Some(letter))
            .copied(),
        _ => None,
    }
}

/// Where answers come from.
pub trait LineSource: Send + fmt::Debug {
    /// Show `prompt` and read one line; `Ok(None)` means end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stream fails.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// Reads answers from the terminal; prompts go to stderr.
#[derive(Debug, Default)]
pub struct StdinSource;

impl LineSource for StdinSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut err = io::stderr();
        write!(err, "\x1b[33m{prompt}\x1b[0m")?;
        err.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Feeds pre-recorded answers and remembers every prompt shown.
#[derive(Debug, Default, Clone)]
pub struct ScriptedSource {
    answers: Arc<Mutex<VecDeque<String>>>,
    shown: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSource {
    /// Create a source answering with `answers` in order.
    #[must_use]
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Arc::new(Mutex::new(answers.into_iter().map(Into::into).collect())),
            shown: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every prompt displayed so far (shared with clones).
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.shown.lock().map_or_else(|_| Vec::new(), |g| g.clone())
    }

    /// Number of answers not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.answers.lock().map_or(0, |g| g.len())
    }
}

impl LineSource for ScriptedSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(prompt.to_string());
        }
        Ok(self.answers.lock().ok().and_then(|mut q| q.pop_front()))
    }
}

/// The interaction gate: asks questions and remembers pinned answers.
#[derive(Debug)]
pub struct Gate {
    pinned: HashMap<String, Choice>,
    input: Box<dyn LineSource>,
}

impl Gate {
    /// Create a gate reading from `input`.
    #[must_use]
    pub fn new(input: Box<dyn LineSource>) -> Self {
        Self {
            pinned: HashMap::new(),
            input,
        }
    }

    /// Create a gate reading from the terminal.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(Box::new(StdinSource))
    }

    /// The answer pinned for `token`, if any.
    #[must_use]
    pub fn pinned(&self, token: &str) -> Option<Choice> {
        self.pinned.get(token).copied()
    }

    /// Ask a question, returning the base answer.
    ///
    /// A token with a pinned answer returns it without prompting. `exit`
    /// stops the run. Unrecognised input repeats the question.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::UserAbort`] when `exit` is chosen, and
    /// [`PromptError::InputClosed`] if input ends before an answer.
    pub fn ask(
        &mut self,
        token: &str,
        prompt: &str,
        options: &[Choice],
    ) -> Result<Choice, PromptError> {
        if let Some(answer) = self.pinned(token) {
            return Ok(answer);
        }

        let line = render(prompt, options);
        loop {
            let raw = self
                .input
                .read_line(&line)
                .ok()
                .flatten()
                .ok_or_else(|| PromptError::InputClosed(prompt.to_string()))?;

            let Some(choice) = parse_answer(&raw, options) else {
                continue;
            };

            if choice == Choice::Exit {
                return Err(PromptError::UserAbort);
            }
            if let Some(base) = choice.pins() {
                self.pinned.insert(token.to_string(), base);
                return Ok(base);
            }
            return Ok(choice);
        }
    }

    /// Read a free-form value (used for variable prompts).
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::InputClosed`] if input ends.
    pub fn read_value(&mut self, prompt: &str) -> Result<String, PromptError> {
        self.input
            .read_line(prompt)
            .ok()
            .flatten()
            .ok_or_else(|| PromptError::InputClosed(prompt.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const CONFLICT: &[Choice] = &[
        Choice::Overwrite,
        Choice::Skip,
        Choice::Resolve,
        Choice::AlwaysOverwrite,
        Choice::AlwaysSkip,
        Choice::AlwaysResolve,
        Choice::Exit,
    ];

    fn gate(answers: &[&str]) -> (Gate, ScriptedSource) {
        let source = ScriptedSource::new(answers.iter().copied());
        (Gate::new(Box::new(source.clone())), source)
    }

    #[test]
    fn render_conflict_prompt() {
        insta::assert_snapshot!(
            render("f is modified. ", CONFLICT).trim_end(),
            @"f is modified. [Overwrite/Skip/Resolve/Alwaysoverwrite/Alwaysskip/Alwaysresolve/Exit]:"
        );
    }

    #[test]
    fn render_yes_no_prompt() {
        insta::assert_snapshot!(
            render("Continue? ", &[Choice::Yes, Choice::No, Choice::All, Choice::NotToAll, Choice::Exit]).trim_end(),
            @"Continue? [Yes/No/All/Nottoall/Exit]:"
        );
    }

    #[test]
    fn empty_input_selects_first_option() {
        assert_eq!(parse_answer("", CONFLICT), Some(Choice::Overwrite));
        assert_eq!(parse_answer("  ", &[Choice::No, Choice::Yes]), Some(Choice::No));
    }

    #[test]
    fn full_word_is_case_insensitive() {
        assert_eq!(parse_answer("ReSoLvE", CONFLICT), Some(Choice::Resolve));
        assert_eq!(parse_answer("alwaysskip", CONFLICT), Some(Choice::AlwaysSkip));
    }

    #[test]
    fn shortcut_letters_only_for_base_options() {
        assert_eq!(parse_answer("s", CONFLICT), Some(Choice::Skip));
        assert_eq!(parse_answer("E", CONFLICT), Some(Choice::Exit));
        assert_eq!(parse_answer("a", CONFLICT), None);
        assert_eq!(parse_answer("x", CONFLICT), None);
    }

    #[test]
    fn shortcut_must_be_offered() {
        assert_eq!(parse_answer("r", &[Choice::Overwrite, Choice::Skip]), None);
    }

    #[test]
    fn unknown_input_repeats_question() {
        let (mut gate, source) = gate(&["maybe", "s"]);
        let answer = gate.ask("conflict", "q? ", CONFLICT).unwrap();
        assert_eq!(answer, Choice::Skip);
        assert_eq!(source.prompts().len(), 2);
    }

    #[test]
    fn always_answer_pins_token() {
        let (mut gate, source) = gate(&["alwaysoverwrite"]);
        assert_eq!(gate.ask("conflict", "a? ", CONFLICT).unwrap(), Choice::Overwrite);
        assert_eq!(gate.ask("conflict", "b? ", CONFLICT).unwrap(), Choice::Overwrite);
        assert_eq!(source.prompts().len(), 1, "second ask must not prompt");
        assert_eq!(gate.pinned("conflict"), Some(Choice::Overwrite));
    }

    #[test]
    fn pin_is_per_token() {
        let (mut gate, source) = gate(&["alwaysskip", "overwrite"]);
        assert_eq!(gate.ask("conflict", "a? ", CONFLICT).unwrap(), Choice::Skip);
        let bin = [Choice::Overwrite, Choice::Skip, Choice::Exit];
        assert_eq!(gate.ask("conflict_bin", "b? ", &bin).unwrap(), Choice::Overwrite);
        assert_eq!(source.prompts().len(), 2);
    }

    #[test]
    fn all_and_nottoall_pin_yes_and_no() {
        let opts = [Choice::Yes, Choice::No, Choice::All, Choice::NotToAll, Choice::Exit];
        let (mut gate, _) = gate(&["all", "nottoall"]);
        assert_eq!(gate.ask("t1", "? ", &opts).unwrap(), Choice::Yes);
        assert_eq!(gate.ask("t1", "? ", &opts).unwrap(), Choice::Yes);
        assert_eq!(gate.ask("t2", "? ", &opts).unwrap(), Choice::No);
        assert_eq!(gate.pinned("t2"), Some(Choice::No));
    }

    #[test]
    fn plain_answer_does_not_pin() {
        let (mut gate, source) = gate(&["o", "s"]);
        assert_eq!(gate.ask("conflict", "? ", CONFLICT).unwrap(), Choice::Overwrite);
        assert_eq!(gate.ask("conflict", "? ", CONFLICT).unwrap(), Choice::Skip);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn exit_aborts() {
        let (mut gate, _) = gate(&["exit"]);
        assert_eq!(
            gate.ask("conflict", "? ", CONFLICT).unwrap_err(),
            PromptError::UserAbort
        );
    }

    #[test]
    fn closed_input_is_error() {
        let (mut gate, _) = gate(&[]);
        assert!(matches!(
            gate.ask("conflict", "q? ", CONFLICT),
            Err(PromptError::InputClosed(_))
        ));
    }

    #[test]
    fn fresh_gate_forgets_pins() {
        let (mut first, _) = gate(&["alwaysskip"]);
        first.ask("conflict", "? ", CONFLICT).unwrap();
        let (second, _) = gate(&[]);
        assert_eq!(second.pinned("conflict"), None);
    }

    #[test]
    fn read_value_returns_line() {
        let (mut gate, source) = gate(&["/srv/"]);
        assert_eq!(gate.read_value("Input value: ").unwrap(), "/srv/");
        assert_eq!(source.prompts(), vec!["Input value: "]);
    }
}

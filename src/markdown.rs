//! Terminal markdown renderer using winnow 0.7 + crossterm.
//!
//! Renders a complete research answer token by token, writing ANSI-styled
//! output (or plain text when styling is off) to a `Write` sink.

use std::io::{self, Write};

use crossterm::Command;
use crossterm::style::{self, Attribute};
use winnow::ascii::{self, digit1, space0, space1, till_line_ending};
use winnow::combinator::{alt, delimited, opt, preceded, terminated};
use winnow::error::{ErrMode, ModalResult, ParserError};
use winnow::prelude::*;
use winnow::stream::{AsChar, Stream};
use winnow::token::{any, take_until, take_while};

#[derive(Debug)]
pub enum MdError {
    Io(io::Error),
    Parse,
}

impl std::fmt::Display for MdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MdError::Io(e) => write!(f, "io: {e}"),
            MdError::Parse => write!(f, "parse error"),
        }
    }
}

impl<I: Stream> ParserError<I> for MdError {
    type Inner = Self;

    fn from_input(_input: &I) -> Self {
        Self::Parse
    }

    fn into_inner(self) -> Result<Self::Inner, Self> {
        Ok(self)
    }
}

pub struct RenderState {
    pub styled: bool,
    pub in_codeblock: bool,
    pub bold: bool,
    pub italic: bool,
    pub newline: bool,
    pub set_newline: bool,
    pub column: usize,
    pub terminal_width: Option<usize>,
    /// Last source character before the current token.
    pub prev_char: Option<char>,
}

impl RenderState {
    /// Styled output wrapped to the current terminal width.
    pub fn terminal() -> Self {
        let mut state = Self::plain();
        state.styled = true;
        state.terminal_width = crossterm::terminal::size().ok().map(|(w, _)| w as usize);
        state
    }

    /// No escape sequences, no wrapping.
    pub fn plain() -> Self {
        Self {
            styled: false,
            in_codeblock: false,
            bold: false,
            italic: false,
            newline: true,
            set_newline: false,
            column: 0,
            terminal_width: None,
            prev_char: None,
        }
    }
}

/// Renders `text` to `o`, always ending on a fresh line.
pub fn render_markdown(text: &str, mut o: impl Write, state: &mut RenderState) -> io::Result<()> {
    let mut input = text;
    while !input.is_empty() {
        state.prev_char = text[..text.len() - input.len()].chars().next_back();
        match render_token(&mut input, &mut o, state) {
            Ok(()) => {
                state.newline = state.set_newline;
                state.set_newline = false;
            }
            Err(ErrMode::Backtrack(MdError::Io(err)) | ErrMode::Cut(MdError::Io(err))) => {
                return Err(err);
            }
            // `fallback` consumes any character, so this only happens on
            // an unexpected parser state; stop instead of spinning.
            Err(_) => break,
        }
    }

    if state.styled {
        o.queue_cmd(style::ResetColor)?;
        o.queue_cmd(style::SetAttribute(Attribute::Reset))?;
    }
    if !text.ends_with('\n') {
        o.write_all(b"\n")?;
    }
    o.flush()
}

/// Renders to a `String` without styling.
pub fn render_plain(text: &str) -> String {
    let mut out = Vec::<u8>::new();
    let mut state = RenderState::plain();
    // Writing into a Vec cannot fail.
    let _ = render_markdown(text, &mut out, &mut state);
    String::from_utf8_lossy(&out).into_owned()
}

trait QueueCmd {
    fn queue_cmd(&mut self, cmd: impl Command) -> io::Result<()>;
}

impl<W: Write> QueueCmd for W {
    fn queue_cmd(&mut self, cmd: impl Command) -> io::Result<()> {
        use crossterm::QueueableCommand;
        self.queue(cmd).map(|_| ())
    }
}

/// Renders one markdown token and advances `i` past it.
fn render_token(
    i: &mut &str,
    mut o: impl Write,
    state: &mut RenderState,
) -> ModalResult<(), MdError> {
    let start = i.checkpoint();

    macro_rules! try_parser {
        ($($parser:ident),*) => {
            $({
                i.reset(&start);
                match $parser(&mut o, state).parse_next(i) {
                    Err(ErrMode::Backtrack(_)) => {},
                    res => return res,
                }
            })*
        };
    }

    if state.in_codeblock {
        try_parser!(codeblock_end, codeblock_line_ending, codeblock_fallback);
    } else {
        try_parser!(
            codeblock_begin,
            horizontal_rule,
            heading,
            bulleted_item,
            numbered_item,
            blockquote,
            bare_url,
            text,
            link,
            code,
            bold,
            italic,
            line_ending,
            fallback
        );
    }

    Err(ErrMode::Backtrack(MdError::Parse))
}

fn text<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        let start = *i;
        let content = take_while(1.., |t| {
            AsChar::is_alphanum(t) || "+,.!?\"'/:;=@%&() ".contains(t)
        })
        .parse_next(i)?;
        // Stop in front of a URL so `bare_url` prints it untouched.
        let content = match url_start(content) {
            Some(idx) if idx > 0 => {
                *i = &start[idx..];
                &content[..idx]
            }
            _ => content,
        };
        advance(&mut o, state, content.chars().count())?;
        print(&mut o, content)
    }
}

fn heading<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        if !state.newline {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        let level = terminated(take_while(1.., |c| c == '#'), space1).parse_next(i)?;
        let prefix = format!("{level} ");
        advance(&mut o, state, prefix.len())?;
        styled(&mut o, state, style::SetForegroundColor(style::Color::Magenta))?;
        styled(&mut o, state, style::SetAttribute(Attribute::Bold))?;
        print(&mut o, &prefix)
    }
}

fn bulleted_item<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        if !state.newline {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        let ws = (space0, alt(("-", "*", "+")), space1).parse_next(i)?.0;
        let bullet = format!("{ws}• ");
        advance(&mut o, state, bullet.chars().count())?;
        print(&mut o, &bullet)
    }
}

fn numbered_item<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        if !state.newline {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        let (ws, digits, _, _) = (space0, digit1, alt((".", ")")), space1).parse_next(i)?;
        let marker = format!("{ws}{digits}. ");
        advance(&mut o, state, marker.len())?;
        styled(&mut o, state, style::SetForegroundColor(style::Color::Cyan))?;
        print(&mut o, &marker)?;
        styled(&mut o, state, style::ResetColor)
    }
}

fn horizontal_rule<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        if !state.newline {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        (
            space0,
            alt((
                take_while(3.., '-'),
                take_while(3.., '*'),
                take_while(3.., '_'),
            )),
            space0,
            ascii::line_ending,
        )
            .parse_next(i)?;
        state.column = 0;
        state.set_newline = true;
        styled(&mut o, state, style::SetForegroundColor(style::Color::DarkGrey))?;
        print(&mut o, &"━".repeat(40))?;
        styled(&mut o, state, style::ResetColor)?;
        print(&mut o, "\n")
    }
}

/// A bare `http(s)://` URL, printed verbatim. Trailing sentence punctuation
/// is left for the following token.
fn bare_url<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        let start = *i;
        (
            alt(("https://", "http://")),
            take_while(1.., |c: char| !c.is_whitespace() && !"()[]<>\"`".contains(c)),
        )
            .parse_next(i)?;
        let url = start[..start.len() - i.len()].trim_end_matches(['.', ',', ';', ':', '!', '?']);
        *i = &start[url.len()..];
        advance(&mut o, state, url.chars().count())?;
        styled(&mut o, state, style::SetForegroundColor(style::Color::Blue))?;
        print(&mut o, url)?;
        styled(&mut o, state, style::ResetColor)
    }
}

fn url_start(text: &str) -> Option<usize> {
    text.match_indices("http")
        .map(|(idx, _)| idx)
        .find(|&idx| text[idx..].starts_with("http://") || text[idx..].starts_with("https://"))
}

/// `[label](url)` is shown as `label (url)`.
fn link<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        let label = delimited("[", take_until(0.., "]"), "]").parse_next(i)?;
        let url = delimited("(", take_until(0.., ")"), ")").parse_next(i)?;
        if label.contains('\n') || url.contains(char::is_whitespace) {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        advance(&mut o, state, label.chars().count() + url.chars().count() + 3)?;
        print(&mut o, label)?;
        print(&mut o, " (")?;
        styled(&mut o, state, style::SetForegroundColor(style::Color::Blue))?;
        styled(&mut o, state, style::SetAttribute(Attribute::Underlined))?;
        print(&mut o, url)?;
        styled(&mut o, state, style::SetAttribute(Attribute::NoUnderline))?;
        styled(&mut o, state, style::ResetColor)?;
        print(&mut o, ")")
    }
}

fn code<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        "`".parse_next(i)?;
        let content = terminated(take_until(0.., "`"), "`").parse_next(i)?;
        advance(&mut o, state, content.chars().count())?;
        styled(&mut o, state, style::SetForegroundColor(style::Color::Green))?;
        print(&mut o, content)?;
        styled(&mut o, state, style::ResetColor)
    }
}

fn bold<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        let marker = alt(("**", "__")).parse_next(i)?;
        if !toggles_emphasis(state.bold, state.prev_char, i.chars().next(), marker) {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        state.bold = !state.bold;
        if state.bold {
            styled(&mut o, state, style::SetAttribute(Attribute::Bold))
        } else {
            styled(&mut o, state, style::SetAttribute(Attribute::NormalIntensity))
        }
    }
}

fn italic<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        let marker = alt(("*", "_")).parse_next(i)?;
        if !toggles_emphasis(state.italic, state.prev_char, i.chars().next(), marker) {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        state.italic = !state.italic;
        if state.italic {
            styled(&mut o, state, style::SetAttribute(Attribute::Italic))
        } else {
            styled(&mut o, state, style::SetAttribute(Attribute::NoItalic))
        }
    }
}

/// Emphasis opens only at the start of a word and closes only at its end, so
/// `snake_case`, `2 * 3` and URLs keep their characters.
fn toggles_emphasis(open: bool, prev: Option<char>, next: Option<char>, marker: &str) -> bool {
    if open {
        prev.is_some_and(|c| !c.is_whitespace()) && !next.is_some_and(char::is_alphanumeric)
    } else {
        !prev.is_some_and(char::is_alphanumeric)
            && next.is_some_and(|c| !c.is_whitespace() && !marker.starts_with(c))
    }
}

fn blockquote<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        if !state.newline {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        (">", space0).parse_next(i)?;
        let bar = "│ ";
        advance(&mut o, state, 2)?;
        styled(&mut o, state, style::SetForegroundColor(style::Color::DarkGrey))?;
        print(&mut o, bar)
    }
}

fn line_ending<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        ascii::line_ending.parse_next(i)?;
        state.column = 0;
        state.set_newline = true;
        // Emphasis does not carry across lines.
        state.bold = false;
        state.italic = false;
        styled(&mut o, state, style::ResetColor)?;
        styled(&mut o, state, style::SetAttribute(Attribute::Reset))?;
        print(&mut o, "\n")
    }
}

fn fallback<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        let c = any.parse_next(i)?;
        advance(&mut o, state, 1)?;
        let mut buf = [0u8; 4];
        print(&mut o, c.encode_utf8(&mut buf))
    }
}

fn codeblock_begin<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        if !state.newline {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        let language = preceded("```", till_line_ending).parse_next(i)?;
        ascii::line_ending.parse_next(i)?;
        state.in_codeblock = true;
        state.set_newline = true;
        let language = language.trim();
        if !language.is_empty() {
            styled(&mut o, state, style::SetAttribute(Attribute::Bold))?;
            print(&mut o, language)?;
            styled(&mut o, state, style::SetAttribute(Attribute::Reset))?;
            print(&mut o, "\n")?;
        }
        styled(&mut o, state, style::SetForegroundColor(style::Color::Green))
    }
}

fn codeblock_end<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        if !state.newline {
            return Err(ErrMode::Backtrack(MdError::Parse));
        }
        ("```", till_line_ending).parse_next(i)?;
        opt(ascii::line_ending).parse_next(i)?;
        state.in_codeblock = false;
        state.column = 0;
        state.set_newline = true;
        styled(&mut o, state, style::ResetColor)
    }
}

fn codeblock_line_ending<'a, 'b>(
    mut o: impl Write + 'b,
    state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        ascii::line_ending.parse_next(i)?;
        state.set_newline = true;
        print(&mut o, "\n")
    }
}

fn codeblock_fallback<'a, 'b>(
    mut o: impl Write + 'b,
    _state: &'b mut RenderState,
) -> impl FnMut(&mut &'a str) -> ModalResult<(), MdError> + 'b {
    move |i| {
        let line = take_while(1.., |c| c != '\n' && c != '\r').parse_next(i)?;
        print(&mut o, line)
    }
}

/// Track column position and emit a newline if we'd overflow the terminal width.
fn advance(
    mut o: impl Write,
    state: &mut RenderState,
    width: usize,
) -> Result<(), ErrMode<MdError>> {
    if let Some(tw) = state.terminal_width {
        if state.column > 0 && state.column + width > tw {
            state.column = width;
            return print(&mut o, "\n");
        }
    }
    state.column += width;
    Ok(())
}

fn print(mut o: impl Write, text: &str) -> Result<(), ErrMode<MdError>> {
    o.write_all(text.as_bytes())
        .map_err(|e| ErrMode::Cut(MdError::Io(e)))
}

fn styled(
    mut o: impl Write,
    state: &RenderState,
    cmd: impl Command,
) -> Result<(), ErrMode<MdError>> {
    if !state.styled {
        return Ok(());
    }
    o.queue_cmd(cmd).map_err(|e| ErrMode::Cut(MdError::Io(e)))
}

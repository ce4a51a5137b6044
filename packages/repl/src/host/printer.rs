//! Colored rendering of evaluator output.

use std::borrow::Cow;
use std::io::IsTerminal;

use clap::ValueEnum;
use nu_ansi_term::Color;

/// What a piece of text is, for coloring purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Text the evaluated code printed.
    Out,
    /// A printed result.
    Value,
    /// An error report.
    Error,
}

/// When to use colors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Always,
    #[default]
    Auto,
    None,
}

impl ColorMode {
    /// Resolve the mode against the actual stdout.
    pub fn enabled(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::None => false,
            ColorMode::Auto => std::io::stdout().is_terminal(),
        }
    }
}

/// Paints text according to its [`Style`], or passes it through untouched
/// when colors are off.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    colored: bool,
}

impl Printer {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    pub fn paint<'a>(&self, style: Style, text: &'a str) -> Cow<'a, str> {
        if !self.colored {
            return Cow::Borrowed(text);
        }
        let color = match style {
            Style::Out => Color::Yellow,
            Style::Value => Color::Green,
            Style::Error => Color::Red,
        };
        Cow::Owned(color.paint(text).to_string())
    }
}

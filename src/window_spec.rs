//! Window matching criterion for the launched program

use std::fmt;
use std::path::Path;

/// Selects the window to wait for: by class or by name, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSpec {
    Class(String),
    Name(String),
}

impl WindowSpec {
    /// Resolve the criterion in priority order: explicit class, then window
    /// name, then the base name of the first command token.
    ///
    /// `first_token` must be the command as the user typed it. When the launch
    /// goes through a package-run wrapper the rewritten command starts with the
    /// wrapper, but the window still carries the package's class.
    ///
    /// # Example
    /// ```
    /// use startrace::window_spec::WindowSpec;
    ///
    /// let spec = WindowSpec::resolve(None, None, "/usr/bin/gedit");
    /// assert_eq!(spec, WindowSpec::Class("gedit".to_string()));
    /// ```
    pub fn resolve(class: Option<&str>, name: Option<&str>, first_token: &str) -> Self {
        match (non_empty(class), non_empty(name)) {
            (Some(class), _) => WindowSpec::Class(class.to_string()),
            (None, Some(name)) => WindowSpec::Name(name.to_string()),
            (None, None) => WindowSpec::Class(base_name(first_token)),
        }
    }

    /// The value being matched, whichever field is active
    pub fn value(&self) -> &str {
        match self {
            WindowSpec::Class(v) | WindowSpec::Name(v) => v,
        }
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Class(c) => write!(f, "class {}", c),
            WindowSpec::Name(n) => write!(f, "name {}", n),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn base_name(token: &str) -> String {
    Path::new(token)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| token.to_string())
}

//! Uncaught script failures and their diagnostics.

/// An error raised while a script ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// First line of the error text.
    pub message: String,
    /// Full error text including the traceback.
    pub stack: String,
}

impl ScriptFailure {
    pub fn new(stack: impl Into<String>) -> Self {
        let stack = stack.into();
        let message = stack.lines().next().unwrap_or_default().trim_end().to_string();
        Self { message, stack }
    }

    /// Errors raised by host callbacks arrive wrapped; the root cause's own
    /// text leads and the traceback follows it.
    pub(crate) fn from_lua(error: &mlua::Error) -> Self {
        let mut root = error;
        let mut traceback = None;
        while let mlua::Error::CallbackError {
            cause,
            traceback: frames,
        } = root
        {
            traceback = Some(frames.as_str());
            root = cause.as_ref();
        }

        let mut stack = match root {
            mlua::Error::RuntimeError(message) => message.clone(),
            other => other.to_string(),
        };
        if let Some(frames) = traceback {
            stack.push('\n');
            stack.push_str(frames.trim_end());
        }
        Self::new(stack)
    }

    /// Human readable diagnostic: the located `ReferenceError` when one can
    /// be found in the stack, otherwise the plain message.
    pub fn diagnostic(&self) -> String {
        diagnose(&self.stack).unwrap_or_else(|| self.message.clone())
    }
}

impl std::fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ScriptFailure {}

/// Find the first `ReferenceError` line in a stack trace.
///
/// When the line after it ends in `:<line>:<col>` (or just `:<line>`), the
/// location is appended with the line shifted back by one to account for
/// the function header wrapped around the script body.
pub fn diagnose(stack: &str) -> Option<String> {
    let mut lines = stack.lines();
    while let Some(line) = lines.next() {
        let line = line.trim();
        if !line.starts_with("ReferenceError") {
            continue;
        }

        let mut message = line.to_string();
        match lines.next().and_then(trailing_location) {
            Some((row, Some(col))) => {
                message.push_str(&format!(" (line {}, col {})", row.saturating_sub(1), col));
            }
            Some((row, None)) => {
                message.push_str(&format!(" (line {})", row.saturating_sub(1)));
            }
            None => {}
        }
        return Some(message);
    }
    None
}

/// Parse a trailing `:<line>:<col>` or `:<line>` suffix.
fn trailing_location(frame: &str) -> Option<(u32, Option<u32>)> {
    let mut parts = frame.trim_end().rsplitn(3, ':');
    let last: u32 = parts.next()?.parse().ok()?;
    let middle = parts.next()?;
    let rest = parts.next();

    match (middle.parse::<u32>(), rest) {
        (Ok(row), Some(_)) => Some((row, Some(last))),
        _ => Some((last, None)),
    }
}

use crate::backup::redacted::REDACTED_PASSWORD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Placeholder for the password; arguments containing it are dropped when
/// the password is empty
pub static PASSWORD_PLACEHOLDER: &str = "{password}";
pub static PASSWORD_KEY: &str = "password";

static DEFAULT_DUMP_COMMAND: [&str; 11] = [
    "mysqldump",
    "--add-drop-table",
    "--allow-keywords",
    "-q",
    "-c",
    "-u",
    "{username}",
    "-h",
    "{host}",
    "-p{password}",
    "{db}",
];

/// Argument vector for the dump tool, program first.
///
/// Each argument may contain `{key}` placeholders. Rendering substitutes the
/// values per argument, so a value is never split or reinterpreted and no
/// shell is involved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DumpCommandTemplate {
    args: Vec<String>,
}

impl Default for DumpCommandTemplate {
    fn default() -> Self {
        DEFAULT_DUMP_COMMAND.iter().copied().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for DumpCommandTemplate {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            args: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl DumpCommandTemplate {
    pub fn is_empty(&self) -> bool {
        self.args.first().map_or(true, |program| program.is_empty())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Substitutes `params` into every argument.
    ///
    /// If `params` has no `password` (or it is empty) every argument that
    /// references `{password}` is omitted. Returns `None` for an empty
    /// template.
    pub fn render(&self, params: &BTreeMap<&str, &str>) -> Option<DumpInvocation> {
        if self.is_empty() {
            return None;
        }

        let has_password = params
            .get(PASSWORD_KEY)
            .is_some_and(|password| !password.is_empty());
        let mut redacted = params.clone();
        if has_password {
            redacted.insert(PASSWORD_KEY, REDACTED_PASSWORD);
        }

        let kept = self
            .args
            .iter()
            .filter(|arg| has_password || !arg.contains(PASSWORD_PLACEHOLDER));
        let (args, display): (Vec<_>, Vec<_>) = kept
            .map(|arg| (substitute(arg, params), substitute(arg, &redacted)))
            .unzip();

        let mut args = args.into_iter();
        let program = args.next()?;
        Some(DumpInvocation {
            program,
            args: args.collect(),
            display: display.join(" "),
        })
    }
}

/// Single pass, so a substituted value is never scanned for placeholders again.
fn substitute(arg: &str, params: &BTreeMap<&str, &str>) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find('}') {
            Some(end) => {
                match params.get(&tail[1..end]) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// A rendered dump command, ready to spawn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpInvocation {
    pub program: String,
    pub args: Vec<String>,
    display: String,
}

/// Shows the command line with the password replaced by a placeholder
impl Display for DumpInvocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display)
    }
}

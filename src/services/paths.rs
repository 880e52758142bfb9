//! Placeholder expansion and deflation for save and install paths.
//!
//! Save manifests store paths like `{InstallDir}/base/autoexec.cfg` or
//! `%APPDATA%/Game/profile.sav` so a save packed on one machine restores on
//! another with a different install root or user profile. [`PathEnvironment`]
//! holds the machine-specific value of every recognized placeholder and maps
//! between the two forms.
//!
//! Neither direction fails: an unknown token or an unmatched prefix is passed
//! through unchanged.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Placeholder for the caller-supplied install directory.
pub const INSTALL_DIR: &str = "{InstallDir}";

pub const SYSTEM_DRIVE: &str = "%SYSTEMDRIVE%";
pub const PROGRAM_DATA: &str = "%PROGRAMDATA%";
pub const SYSTEM_ROOT: &str = "%SYSTEMROOT%";
pub const USER_NAME: &str = "%USERNAME%";
pub const LOCAL_APP_DATA: &str = "%LOCALAPPDATA%";
pub const TEMP: &str = "%TEMP%";
pub const APP_DATA: &str = "%APPDATA%";
pub const MY_DOCUMENTS: &str = "%MyDocuments%";
pub const USER_PROFILE: &str = "%USERPROFILE%";

static OS_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_()]*)%").expect("Invalid variable regex"));

/// Resolved values for the recognized placeholders on one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathEnvironment {
    variables: Vec<(&'static str, String)>,
}

impl PathEnvironment {
    /// An environment with no placeholders resolved; `{InstallDir}` still works.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set (or replace) the value of a recognized placeholder.
    pub fn with(mut self, placeholder: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self
            .variables
            .iter_mut()
            .find(|(p, _)| p.eq_ignore_ascii_case(placeholder))
        {
            Some(existing) => existing.1 = value,
            None => self.variables.push((placeholder, value)),
        }
        self
    }

    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(p, _)| p.eq_ignore_ascii_case(placeholder))
            .map(|(_, v)| v.as_str())
    }

    /// Resolve every placeholder from the running OS.
    pub fn from_host() -> Self {
        let mut environment = Self::empty();

        if let Some(name) = std::env::var("USERNAME")
            .ok()
            .or_else(|| std::env::var("USER").ok())
        {
            environment = environment.with(USER_NAME, name);
        }

        environment = environment.with(TEMP, path_string(&std::env::temp_dir()));

        if let Some(base) = directories::BaseDirs::new() {
            let home = path_string(base.home_dir());
            environment = environment
                .with(USER_PROFILE, home.clone())
                .with(APP_DATA, path_string(base.config_dir()))
                .with(LOCAL_APP_DATA, path_string(base.data_local_dir()));

            let documents = directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(path_string))
                .unwrap_or_else(|| format!("{}/Documents", home));
            environment = environment.with(MY_DOCUMENTS, documents);
        }

        if cfg!(windows) {
            for (placeholder, variable) in [
                (SYSTEM_DRIVE, "SYSTEMDRIVE"),
                (PROGRAM_DATA, "PROGRAMDATA"),
                (SYSTEM_ROOT, "SYSTEMROOT"),
            ] {
                if let Ok(value) = std::env::var(variable) {
                    environment = environment.with(placeholder, value);
                }
            }
        }

        tracing::debug!("Resolved {} path placeholders", environment.variables.len());
        environment
    }

    /// Replace every recognized placeholder in `input` with its absolute value.
    ///
    /// `{InstallDir}` becomes `install_directory` without its trailing separator.
    /// Unrecognized `%X%` tokens are expanded from the process environment when such
    /// a variable exists and are otherwise left untouched.
    pub fn expand(&self, input: &str, install_directory: &str) -> String {
        let mut output = replace_ignore_ascii_case(
            input,
            INSTALL_DIR,
            trim_trailing_separators(install_directory),
        );

        for (placeholder, value) in &self.variables {
            output = replace_ignore_ascii_case(&output, placeholder, trim_trailing_separators(value));
        }

        OS_VARIABLE
            .replace_all(&output, |caps: &Captures| {
                std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
            })
            .into_owned()
    }

    /// Replace the longest known absolute prefix of `input` with its placeholder.
    ///
    /// `{InstallDir}` is tried first so a caller's install root wins over generic
    /// profile folders that may contain it. The remainder of the path keeps its
    /// original separators.
    pub fn deflate(&self, input: &str, install_directory: &str) -> String {
        if let Some(rest) = strip_path_prefix(input, install_directory) {
            return format!("{}{}", INSTALL_DIR, rest);
        }

        let mut candidates: Vec<&(&'static str, String)> = self.variables.iter().collect();
        candidates.sort_by_key(|(_, value)| std::cmp::Reverse(trim_trailing_separators(value).len()));

        for (placeholder, value) in candidates {
            if let Some(rest) = strip_path_prefix(input, value) {
                return format!("{}{}", placeholder, rest);
            }
        }

        input.to_string()
    }
}

/// Convert every `\` to the canonical `/` separator.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Convert `\` separators in a regex pattern to `/`, keeping regex escapes.
///
/// `\d`, `\w`, `\s`, `\b` (and their negations) and escaped metacharacters stay
/// escapes. `\.` followed by a quantifier is a separator before `.*`-style
/// wildcards, and `\\` is an escaped separator.
pub fn normalize_regex_separators(pattern: &str) -> String {
    const CLASS_ESCAPES: &[char] = &['d', 'D', 'w', 'W', 's', 'S', 'b', 'B'];
    const META: &[char] = &[
        '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '-',
    ];
    const QUANTIFIERS: &[char] = &['*', '+', '?'];

    let chars: Vec<char> = pattern.chars().collect();
    let mut normalized = String::with_capacity(pattern.len());
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        if current != '\\' {
            normalized.push(current);
            index += 1;
            continue;
        }

        match chars.get(index + 1) {
            Some('\\') => {
                normalized.push('/');
                index += 2;
            }
            Some('.') if chars.get(index + 2).is_some_and(|c| QUANTIFIERS.contains(c)) => {
                normalized.push('/');
                index += 1;
            }
            Some(&next) if CLASS_ESCAPES.contains(&next) || META.contains(&next) => {
                normalized.push('\\');
                normalized.push(next);
                index += 2;
            }
            _ => {
                normalized.push('/');
                index += 1;
            }
        }
    }

    normalized
}

pub(crate) fn trim_trailing_separators(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
}

/// Windows-style paths (drive letter or backslashes) compare case-insensitively.
pub(crate) fn is_windows_style(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.contains('\\') || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Strip `prefix` from `input` when it matches on a whole-segment boundary.
///
/// `/` and `\` are treated as equal. Returns the remainder, which is empty or
/// starts with a separator.
pub(crate) fn strip_path_prefix<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = trim_trailing_separators(prefix);
    if prefix.is_empty() {
        return None;
    }

    let ignore_case = is_windows_style(prefix) || is_windows_style(input);
    let mut input_chars = input.char_indices();
    let mut end = 0;

    for expected in prefix.chars() {
        let (index, actual) = input_chars.next()?;
        let matches = if is_separator(expected) {
            is_separator(actual)
        } else if ignore_case {
            expected.to_lowercase().eq(actual.to_lowercase())
        } else {
            expected == actual
        };

        if !matches {
            return None;
        }
        end = index + actual.len_utf8();
    }

    let rest = &input[end..];
    if rest.is_empty() || rest.starts_with(is_separator) {
        Some(rest)
    } else {
        None
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

fn replace_ignore_ascii_case(input: &str, token: &str, value: &str) -> String {
    let haystack = input.to_ascii_lowercase();
    let needle = token.to_ascii_lowercase();

    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for (index, _) in haystack.match_indices(&needle) {
        output.push_str(&input[last..index]);
        output.push_str(value);
        last = index + needle.len();
    }
    output.push_str(&input[last..]);
    output
}

fn path_string(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows_environment() -> PathEnvironment {
        PathEnvironment::empty()
            .with(USER_NAME, "gordon")
            .with(USER_PROFILE, "C:\\Users\\gordon")
            .with(MY_DOCUMENTS, "C:\\Users\\gordon\\Documents")
            .with(APP_DATA, "C:\\Users\\gordon\\AppData\\Roaming")
            .with(LOCAL_APP_DATA, "C:\\Users\\gordon\\AppData\\Local")
            .with(TEMP, "C:\\Users\\gordon\\AppData\\Local\\Temp")
    }

    #[test]
    fn test_expand_install_dir() {
        let env = PathEnvironment::empty();
        assert_eq!(env.expand("{InstallDir}\\base", "C:\\Games\\Quake\\"), "C:\\Games\\Quake\\base");
        assert_eq!(env.expand("{InstallDir}/base", "/games/quake"), "/games/quake/base");
    }

    #[test]
    fn test_expand_is_case_insensitive_for_tokens() {
        let env = windows_environment();
        assert_eq!(env.expand("%appdata%\\id", "C:\\Games"), "C:\\Users\\gordon\\AppData\\Roaming\\id");
        assert_eq!(env.expand("%MYDOCUMENTS%", "C:\\Games"), "C:\\Users\\gordon\\Documents");
    }

    #[test]
    fn test_expand_leaves_unknown_tokens() {
        let env = PathEnvironment::empty();
        let input = "%LANCOMMANDER_SURELY_UNSET_VARIABLE%\\saves";
        assert_eq!(env.expand(input, "C:\\Games"), input);
    }

    #[test]
    fn test_deflate_prefers_install_dir() {
        let env = windows_environment();
        let install = "C:\\Users\\gordon\\Documents\\Games\\Quake";

        assert_eq!(
            env.deflate("C:\\Users\\gordon\\Documents\\Games\\Quake\\base\\q3config.cfg", install),
            "{InstallDir}\\base\\q3config.cfg"
        );
    }

    #[test]
    fn test_deflate_longest_prefix_wins() {
        let env = windows_environment();
        assert_eq!(
            env.deflate("C:\\Users\\gordon\\AppData\\Local\\Temp\\x.tmp", "D:\\Games"),
            "%TEMP%\\x.tmp"
        );
        assert_eq!(
            env.deflate("C:\\Users\\gordon\\Documents\\My Games", "D:\\Games"),
            "%MyDocuments%\\My Games"
        );
        assert_eq!(env.deflate("C:\\Users\\gordon\\ntuser.dat", "D:\\Games"), "%USERPROFILE%\\ntuser.dat");
    }

    #[test]
    fn test_deflate_case_insensitive_on_windows_paths() {
        let env = windows_environment();
        assert_eq!(
            env.deflate("c:\\users\\GORDON\\appdata\\roaming\\id", "D:\\Games"),
            "%APPDATA%\\id"
        );
    }

    #[test]
    fn test_deflate_respects_segment_boundary() {
        let env = PathEnvironment::empty().with(USER_PROFILE, "/home/gordon");
        assert_eq!(env.deflate("/home/gordonf/save", "/games"), "/home/gordonf/save");
        assert_eq!(env.deflate("/home/gordon/save", "/games"), "%USERPROFILE%/save");
    }

    #[test]
    fn test_deflate_no_match_is_identity() {
        let env = windows_environment();
        assert_eq!(env.deflate("E:\\Other\\file.txt", "D:\\Games"), "E:\\Other\\file.txt");
    }

    #[test]
    fn test_trailing_separator_round_trips() {
        let env = PathEnvironment::empty();
        let expanded = env.expand("{InstallDir}\\", "C:\\Games");
        assert_eq!(expanded, "C:\\Games\\");
        assert_eq!(env.deflate(&expanded, "C:\\Games"), "{InstallDir}\\");
    }

    #[test]
    fn test_user_name_round_trip() {
        let env = PathEnvironment::from_host();
        if let Some(name) = env.get(USER_NAME).map(str::to_string) {
            let expanded = env.expand(USER_NAME, "C:\\Games");
            assert_eq!(expanded, name);
            assert_eq!(env.deflate(&expanded, "C:\\Games"), USER_NAME);
        }
    }

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_separators("a\\b/c\\d"), "a/b/c/d");
    }

    #[test]
    fn test_strip_path_prefix_mixed_separators() {
        assert_eq!(strip_path_prefix("C:/Games/Quake/base", "C:\\Games\\Quake\\"), Some("/base"));
        assert_eq!(strip_path_prefix("C:/Games", "C:\\Games"), Some(""));
        assert_eq!(strip_path_prefix("C:/Gam", "C:\\Games"), None);
    }
}

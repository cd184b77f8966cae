use regex::Regex;

/// A path glob compiled to an anchored regex.
///
/// `*` matches within one path segment, `**` spans segments (`**/` matches
/// zero or more leading directories), `?` matches one non-`/` character and
/// `[...]` is a character class (`[!...]` negates).
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&translate(pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Matches a tree-relative path either as-is or prefixed with its version
    /// directory, so `*/whoami.spec` applies to a top-level `whoami.spec`.
    pub fn matches_file(&self, version: &str, path: &str) -> bool {
        self.is_match(path) || self.is_match(&format!("{version}/{path}"))
    }
}

fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:[^/]+/)*");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) if len > 0 => {
                    let class: String = chars[i + 1..i + 1 + len].iter().collect();
                    out.push('[');
                    let class = match class.strip_prefix('!') {
                        Some(rest) => {
                            out.push('^');
                            rest.to_string()
                        }
                        None => class,
                    };
                    out.push_str(&class.replace('\\', "\\\\").replace('[', "\\["));
                    out.push(']');
                    i += len + 2;
                }
                _ => {
                    out.push_str("\\[");
                    i += 1;
                }
            },
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(p: &str) -> Glob {
        Glob::new(p).unwrap()
    }

    #[test]
    fn star_stays_within_a_segment() {
        assert!(g("*.spec").is_match("login.spec"));
        assert!(!g("*.spec").is_match("auth/login.spec"));
        assert!(g("auth/*.spec").is_match("auth/login.spec"));
    }

    #[test]
    fn double_star_spans_segments() {
        assert!(g("**/login.spec").is_match("login.spec"));
        assert!(g("**/login.spec").is_match("a/b/login.spec"));
        assert!(g("auth/**").is_match("auth/x/y.spec"));
    }

    #[test]
    fn classes_and_single_chars() {
        assert!(g("v?/[ab].spec").is_match("v1/a.spec"));
        assert!(!g("[!ab].spec").is_match("a.spec"));
        assert!(g("[!ab].spec").is_match("c.spec"));
    }

    #[test]
    fn version_prefixed_form_matches() {
        let glob = g("*/whoami.spec");
        assert!(!glob.is_match("whoami.spec"));
        assert!(glob.matches_file("v202", "whoami.spec"));
    }

    #[test]
    fn dots_are_literal() {
        assert!(!g("a.spec").is_match("abspec"));
    }
}

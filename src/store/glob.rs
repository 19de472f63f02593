//! Redis-style glob matching for pattern deletion.
//!
//! Supports `*`, `?`, character classes (`[abc]`, `[a-z]`, `[^x]`) and
//! backslash escapes.

/// Match `text` against a Redis-style glob `pattern`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    matches_from(&p, &t)
}

fn matches_from(p: &[char], t: &[char]) -> bool {
    let (mut pi, mut ti) = (0usize, 0usize);
    // Backtrack point for the most recent '*'
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(p, pi, t[ti]) {
                        if matched {
                            pi = next;
                            ti += 1;
                            continue;
                        }
                    } else if t[ti] == '[' {
                        // Unterminated class matches a literal '['
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Match `c` against the class starting at `p[start] == '['`.
///
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let lo = if p[i] == '\\' && i + 1 < p.len() {
            i += 1;
            p[i]
        } else {
            p[i]
        };

        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let hi = p[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if lo <= c && c <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_star_and_question() {
        assert!(glob_match("players:*", "players:a"));
        assert!(glob_match("players:*", "players:"));
        assert!(!glob_match("players:*", "guilds:a"));
        assert!(!glob_match("players:*", "players"));
        assert!(glob_match("p?ayers:*", "players:steve"));
        assert!(glob_match("*:*:nether", "stats:3:nether"));
    }

    #[test]
    fn test_character_classes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
    }

    #[test]
    fn test_escapes() {
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
    }

    proptest! {
        #[test]
        fn prop_namespace_pattern_matches_only_namespace(
            name in "[a-z]{1,8}",
            other in "[a-z]{1,8}",
            key in "[a-z0-9:]{0,12}",
        ) {
            let pattern = format!("{}:*", name);
            let own = format!("{}:{}", name, key);
            prop_assert!(glob_match(&pattern, &own));

            let foreign = format!("{}:{}", other, key);
            prop_assert_eq!(glob_match(&pattern, &foreign), other == name);
        }

        #[test]
        fn prop_literal_pattern_matches_itself(text in "[a-zA-Z0-9:_-]{0,24}") {
            prop_assert!(glob_match(&text, &text));
        }
    }
}

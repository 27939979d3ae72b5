//! Variable expansion over the quoting mask captured by the lexer.
//!
//! Only two forms exist: `$NAME` and `$?`. A `$` tagged `Single` is always
//! literal; `Unquoted` and `Double` bytes are eligible. There is no field
//! splitting: an expansion never turns one word into several.

use crate::env::Environment;
use crate::lexer::{Quoting, Word};
use crate::parser::{Pipeline, RedirectKind};

/// Expand every word of the pipeline in place and drop argv words that
/// expanded to nothing without ever being quoted.
///
/// Redirection targets are expanded too, except heredoc delimiters, which
/// undergo quote removal only. A target that expands to the empty string is
/// kept; the resulting open failure is the diagnostic the user should see.
pub fn expand_pipeline(pipeline: &mut Pipeline, env: &Environment) {
    for command in &mut pipeline.commands {
        for word in &mut command.argv {
            expand_word(word, env);
        }
        command
            .argv
            .retain(|w| !(w.text.is_empty() && !w.quoted));
        for redirect in &mut command.redirects {
            if redirect.kind != RedirectKind::Heredoc {
                expand_word(&mut redirect.target, env);
            }
        }
    }
}

/// Rewrite one word's text according to its quoting mask.
pub fn expand_word(word: &mut Word, env: &Environment) {
    let text = std::mem::take(&mut word.text);
    let mask = std::mem::take(&mut word.mask);
    let (new_text, new_mask) = substitute(&text, |i| mask[i], env);
    word.text = new_text;
    word.mask = new_mask;
}

/// Expand a heredoc body line: every byte behaves like double-quoted text.
pub fn expand_heredoc_line(line: &str, env: &Environment) -> String {
    substitute(line, |_| Quoting::Double, env).0
}

/// Core `$` scan. `tag_at` reports the quoting context of a byte offset; the
/// produced mask tags substituted text with the context of its `$`.
fn substitute(
    src: &str,
    tag_at: impl Fn(usize) -> Quoting,
    env: &Environment,
) -> (String, Vec<Quoting>) {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut out_mask = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < bytes.len() {
        let tag = tag_at(i);
        if bytes[i] == b'$' && tag != Quoting::Single {
            if let Some(&next) = bytes.get(i + 1) {
                if next == b'?' {
                    push_tagged(&mut out, &mut out_mask, &env.last_status.to_string(), tag);
                    i += 2;
                    continue;
                }
                if next == b'_' || next.is_ascii_alphabetic() {
                    let start = i + 1;
                    let mut end = start + 1;
                    while end < bytes.len()
                        && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric())
                    {
                        end += 1;
                    }
                    if let Some(value) = env.get(&src[start..end]) {
                        push_tagged(&mut out, &mut out_mask, value, tag);
                    }
                    i = end;
                    continue;
                }
            }
            // `$` followed by nothing expandable stays literal
        }
        // copy one whole character, tagging each of its bytes
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&src[i..i + ch_len]);
        for k in 0..ch_len {
            out_mask.push(tag_at(i + k));
        }
        i += ch_len;
    }

    (out, out_mask)
}

fn push_tagged(out: &mut String, mask: &mut Vec<Quoting>, s: &str, tag: Quoting) {
    out.push_str(s);
    for _ in 0..s.len() {
        mask.push(tag);
    }
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xf0 => 4,
        b if b >= 0xe0 => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::split_into_tokens;
    use crate::parser::construct_pipeline;

    fn env_with(pairs: &[(&str, &str)], last_status: i32) -> Environment {
        let mut env = Environment::empty();
        for (name, value) in pairs {
            env.set(name, value);
        }
        env.last_status = last_status;
        env
    }

    fn expand_line(line: &str, env: &Environment) -> Vec<Vec<String>> {
        let mut pipeline = construct_pipeline(split_into_tokens(line).unwrap()).unwrap();
        expand_pipeline(&mut pipeline, env);
        pipeline
            .commands
            .iter()
            .map(|c| c.argv.iter().map(|w| w.text.clone()).collect())
            .collect()
    }

    #[test]
    fn substitutes_unquoted_and_double_quoted() {
        let env = env_with(&[("X", "42")], 0);
        assert_eq!(expand_line("echo $X \"$X\"", &env), [["echo", "42", "42"]]);
    }

    #[test]
    fn single_quotes_suppress_expansion() {
        let env = env_with(&[("HOME", "/root")], 0);
        assert_eq!(expand_line("echo '$HOME'", &env), [["echo", "$HOME"]]);
    }

    #[test]
    fn single_quoted_bytes_are_never_modified() {
        let env = env_with(&[("a", "zzz")], 0);
        // `$a` quoted single, adjacent to expandable text
        let argv = expand_line("echo '$a'$a", &env);
        assert_eq!(argv, [["echo", "$azzz"]]);
    }

    #[test]
    fn question_mark_expands_to_last_status() {
        let env = env_with(&[("X", "42")], 0);
        assert_eq!(expand_line("echo \"$X$?\"", &env), [["echo", "420"]]);
        let env = env_with(&[], 127);
        assert_eq!(expand_line("echo $?", &env), [["echo", "127"]]);
    }

    #[test]
    fn longest_identifier_is_consumed() {
        let env = env_with(&[("AB", "long"), ("A", "short")], 0);
        // $ABc looks up ABc (unset, empty, dropped); $AB.c stops at the dot
        assert_eq!(expand_line("echo $ABc $AB.c", &env), [["echo", "long.c"]]);
    }

    #[test]
    fn undefined_variable_expands_to_empty() {
        let env = env_with(&[], 0);
        assert_eq!(expand_line("echo a$UNDEF-b", &env), [["echo", "a-b"]]);
    }

    #[test]
    fn bare_dollar_stays_literal() {
        let env = env_with(&[], 0);
        assert_eq!(expand_line("echo $ $1 a$", &env), [["echo", "$", "$1", "a$"]]);
    }

    #[test]
    fn empty_unquoted_expansion_is_dropped_from_argv() {
        let env = env_with(&[], 0);
        assert_eq!(expand_line("echo $UNDEF foo", &env), [["echo", "foo"]]);
    }

    #[test]
    fn empty_quoted_expansion_is_retained() {
        let env = env_with(&[], 0);
        assert_eq!(expand_line("echo \"$UNDEF\" foo", &env), [["echo", "", "foo"]]);
        assert_eq!(expand_line("echo \"\" foo", &env), [["echo", "", "foo"]]);
    }

    #[test]
    fn redirect_targets_are_expanded_but_never_dropped() {
        let env = env_with(&[("OUT", "/tmp/file")], 0);
        let mut pipeline =
            construct_pipeline(split_into_tokens("echo hi > $OUT < $MISSING").unwrap()).unwrap();
        expand_pipeline(&mut pipeline, &env);
        let redirects = &pipeline.commands[0].redirects;
        assert_eq!(redirects[0].target.text, "/tmp/file");
        assert_eq!(redirects[1].target.text, "");
    }

    #[test]
    fn heredoc_delimiter_is_not_expanded() {
        let env = env_with(&[("END", "gotcha")], 0);
        let mut pipeline =
            construct_pipeline(split_into_tokens("cat << $END").unwrap()).unwrap();
        expand_pipeline(&mut pipeline, &env);
        assert_eq!(pipeline.commands[0].redirects[0].target.text, "$END");
    }

    #[test]
    fn heredoc_line_expansion() {
        let env = env_with(&[("USER", "root")], 3);
        assert_eq!(expand_heredoc_line("hi $USER $?", &env), "hi root 3");
        assert_eq!(expand_heredoc_line("plain", &env), "plain");
    }

    #[test]
    fn quote_removal_round_trip() {
        // any word without `$` survives lex + expand with quote characters
        // removed and everything else byte-for-byte intact
        let env = env_with(&[], 0);
        for (input, expected) in [
            ("a\"b\"'c'", "abc"),
            ("'spaced  out'", "spaced  out"),
            ("mixed\"-|-\"'<>'", "mixed-|-<>"),
        ] {
            let line = format!("echo {}", input);
            let argv = expand_line(&line, &env);
            assert_eq!(argv[0][1], expected);
        }
    }

    #[test]
    fn mask_stays_byte_aligned_after_expansion() {
        let mut env = env_with(&[("V", "päx")], 0);
        env.set("W", "↯");
        let mut pipeline =
            construct_pipeline(split_into_tokens("echo $V\"$W\"é").unwrap()).unwrap();
        expand_pipeline(&mut pipeline, &env);
        for word in &pipeline.commands[0].argv {
            assert_eq!(word.text.len(), word.mask.len());
        }
    }
}

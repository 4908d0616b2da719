//! Shell-style word splitting without invoking a shell.
//!
//! Supports single and double quoting and backslash escapes, which is
//! enough for the command templates this crate substitutes into (device
//! names, rates, netem tails and `iptables` comment strings) — it is not
//! a general POSIX shell grammar.

#[derive(Debug, PartialEq, Eq)]
pub struct TokenizeError(pub String);

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unterminated quote in command: {}", self.0)
    }
}

impl std::error::Error for TokenizeError {}

pub fn tokenize(command: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' if !in_token => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            '\'' => {
                in_token = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        in_token = false;
                        break;
                    }
                    current.push(c);
                }
                if in_token {
                    return Err(TokenizeError(command.to_string()));
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => {
                            in_token = false;
                            break;
                        }
                        Some('\\') if matches!(chars.peek(), Some('"') | Some('\\')) => {
                            current.push(chars.next().unwrap());
                        }
                        Some(c) => current.push(c),
                        None => break,
                    }
                }
                if in_token {
                    return Err(TokenizeError(command.to_string()));
                }
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(
            tokenize("tc qdisc add dev eth1 root handle 1: drr").unwrap(),
            vec!["tc", "qdisc", "add", "dev", "eth1", "root", "handle", "1:", "drr"]
        );
    }

    #[test]
    fn collapses_runs_of_whitespace() {
        assert_eq!(
            tokenize("iptables  -t mangle   -A kitero-PREROUTING").unwrap(),
            vec!["iptables", "-t", "mangle", "-A", "kitero-PREROUTING"]
        );
    }

    #[test]
    fn preserves_quoted_comment_with_spaces() {
        assert_eq!(
            tokenize(r#"iptables -m comment --comment "up-eth1-192.168.15.2""#).unwrap(),
            vec!["iptables", "-m", "comment", "--comment", "up-eth1-192.168.15.2"]
        );
    }

    #[test]
    fn unterminated_quote_errors() {
        assert!(tokenize("iptables --comment \"unterminated").is_err());
    }
}

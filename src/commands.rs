use anyhow::{anyhow, bail, Context, Result};

/// A line typed on the daemon's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LoopCompleted,
    TimeChanged,
    Activate,
    Preferences,
    Token(Vec<u8>),
    Sync,
    Status,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(None);
        };

        let command = match name {
            "loop-completed" => Command::LoopCompleted,
            "time-changed" => Command::TimeChanged,
            "activate" => Command::Activate,
            "preferences" => Command::Preferences,
            "token" => {
                let digits = parts
                    .next()
                    .ok_or_else(|| anyhow!("usage: token <hex>"))?;
                Command::Token(decode_token(digits)?)
            }
            "sync" => Command::Sync,
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{other}'"),
        };

        if parts.next().is_some() {
            bail!("unexpected arguments after '{name}'");
        }
        Ok(Some(command))
    }
}

fn decode_token(digits: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(digits).with_context(|| format!("invalid hex token '{digits}'"))?;
    if bytes.is_empty() {
        bail!("token must not be empty");
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(
            Command::parse("loop-completed").unwrap(),
            Some(Command::LoopCompleted)
        );
        assert_eq!(
            Command::parse("token 0aFF10").unwrap(),
            Some(Command::Token(vec![0x0a, 0xff, 0x10]))
        );
        assert_eq!(Command::parse("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse("reboot").is_err());
        assert!(Command::parse("token").is_err());
        assert!(Command::parse("token abc").is_err());
        assert!(Command::parse("token zz").is_err());
        assert!(Command::parse("status now").is_err());
    }

    #[test]
    fn token_accepts_mixed_case_hex() {
        assert_eq!(
            Command::parse("token DEADbeef").unwrap(),
            Some(Command::Token(vec![0xde, 0xad, 0xbe, 0xef]))
        );
    }
}

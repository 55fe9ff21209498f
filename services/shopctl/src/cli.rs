//! Command line parsing
//!
//! `shopctl [--config PATH] [--metrics] <command> [args]`. Global flags may
//! appear anywhere before the command.

use serde_json::Value;

pub const USAGE: &str = "\
usage: shopctl [--config PATH] [--metrics] <command>

commands:
  login <email>        sign in (password from SHOP_PASSWORD)
  logout               end the session
  status               show whether a session is stored
  get <path>           GET an API path
  delete <path>        DELETE an API path
  post <path> <json>   POST a JSON body
  put <path> <json>    PUT a JSON body";

#[derive(Debug, PartialEq)]
pub enum Command {
    Login { email: String },
    Logout,
    Status,
    Get { path: String },
    Delete { path: String },
    Post { path: String, body: Value },
    Put { path: String, body: Value },
}

#[derive(Debug, PartialEq)]
pub struct Invocation {
    pub config: Option<String>,
    pub metrics: bool,
    pub command: Command,
}

/// Parse arguments, excluding the program name.
pub fn parse(args: &[String]) -> Result<Invocation, String> {
    let mut config = None;
    let mut metrics = false;
    let mut rest = args.iter();
    let mut positional: Vec<&str> = Vec::new();

    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--config" if positional.is_empty() => {
                let path = rest.next().ok_or("--config requires a path")?;
                config = Some(path.clone());
            }
            "--metrics" if positional.is_empty() => metrics = true,
            flag if flag.starts_with("--") && positional.is_empty() => {
                return Err(format!("unknown flag: {flag}"));
            }
            other => positional.push(other),
        }
    }

    let command = match positional.as_slice() {
        ["login", email] => Command::Login {
            email: email.to_string(),
        },
        ["logout"] => Command::Logout,
        ["status"] => Command::Status,
        ["get", path] => Command::Get {
            path: path.to_string(),
        },
        ["delete", path] => Command::Delete {
            path: path.to_string(),
        },
        ["post", path, body] => Command::Post {
            path: path.to_string(),
            body: parse_body(body)?,
        },
        ["put", path, body] => Command::Put {
            path: path.to_string(),
            body: parse_body(body)?,
        },
        [] => return Err("missing command".to_string()),
        [name, ..] => return Err(format!("unknown command or wrong arguments: {name}")),
    };

    Ok(Invocation {
        config,
        metrics,
        command,
    })
}

fn parse_body(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("body is not valid JSON: {e}"))
}
